//! Notification scheduler
//!
//! Named background jobs on fixed intervals: the overdue sweep, due-date
//! reminders, the weekly government summary, and audit expiry purge. Jobs
//! run as detached tasks registered by name so they can be stopped and
//! inspected individually. Overdue notices go out once per milestone;
//! due-date reminders repeat on each sweep while a milestone stays due.

use bson::{doc, DateTime};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::audit::AuditLogger;
use crate::db::schemas::{MilestoneDoc, ProjectDoc, UserDoc};
use crate::db::MongoCollection;
use crate::notify::mailer::{Mail, Mailer};
use crate::types::Result;

const OVERDUE_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const DUE_REMINDER_INTERVAL: Duration = Duration::from_secs(86_400);
const WEEKLY_SUMMARY_INTERVAL: Duration = Duration::from_secs(7 * 86_400);
const AUDIT_PURGE_INTERVAL: Duration = Duration::from_secs(86_400);

/// Reminder lead time before the due date
const DUE_SOON_DAYS: i64 = 7;

/// Shared state the jobs run against
pub struct SchedulerContext {
    pub projects: MongoCollection<ProjectDoc>,
    pub milestones: MongoCollection<MilestoneDoc>,
    pub users: MongoCollection<UserDoc>,
    pub mailer: Arc<dyn Mailer>,
    pub audit: AuditLogger,
}

struct JobHandle {
    handle: JoinHandle<()>,
    interval: Duration,
    started_at: DateTime,
}

/// Reported job state
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobStatus {
    pub name: String,
    pub running: bool,
    pub interval_secs: u64,
    pub started_at: DateTime,
}

/// Job registry. One instance, started at boot, stopped at shutdown.
pub struct NotificationScheduler {
    ctx: Arc<SchedulerContext>,
    jobs: DashMap<String, JobHandle>,
}

impl NotificationScheduler {
    pub fn new(ctx: SchedulerContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            jobs: DashMap::new(),
        }
    }

    /// Register and start every job
    pub fn start(&self) {
        self.spawn("overdue-sweep", OVERDUE_SWEEP_INTERVAL, |ctx| async move {
            run_overdue_sweep(&ctx).await
        });
        self.spawn("due-reminder", DUE_REMINDER_INTERVAL, |ctx| async move {
            run_due_reminders(&ctx).await
        });
        self.spawn("weekly-summary", WEEKLY_SUMMARY_INTERVAL, |ctx| async move {
            run_weekly_summary(&ctx).await
        });
        self.spawn("audit-purge", AUDIT_PURGE_INTERVAL, |ctx| async move {
            ctx.audit.purge_expired(DateTime::now()).await
        });

        info!(jobs = self.jobs.len(), "Notification scheduler started");
    }

    fn spawn<F, Fut, T>(&self, name: &str, interval: Duration, job: F)
    where
        F: Fn(Arc<SchedulerContext>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T>> + Send,
        T: std::fmt::Debug,
    {
        let ctx = Arc::clone(&self.ctx);
        let job_name = name.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so jobs start one
            // interval after boot
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match job(Arc::clone(&ctx)).await {
                    Ok(outcome) => {
                        info!(job = %job_name, ?outcome, "Scheduled job completed");
                    }
                    Err(e) => {
                        error!(job = %job_name, error = %e, "Scheduled job failed");
                    }
                }
            }
        });

        self.jobs.insert(
            name.to_string(),
            JobHandle {
                handle,
                interval,
                started_at: DateTime::now(),
            },
        );
    }

    /// Stop one job by name
    pub fn stop(&self, name: &str) -> bool {
        match self.jobs.remove(name) {
            Some((_, job)) => {
                job.handle.abort();
                info!(job = name, "Scheduled job stopped");
                true
            }
            None => false,
        }
    }

    /// Stop every registered job
    pub fn stop_all(&self) {
        let names: Vec<String> = self.jobs.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.stop(&name);
        }
    }

    /// Registry snapshot for the health endpoint
    pub fn status(&self) -> Vec<JobStatus> {
        let mut statuses: Vec<JobStatus> = self
            .jobs
            .iter()
            .map(|entry| JobStatus {
                name: entry.key().clone(),
                running: !entry.value().handle.is_finished(),
                interval_secs: entry.value().interval.as_secs(),
                started_at: entry.value().started_at,
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }
}

/// Notify producers of milestones newly past their due date. Overdue is a
/// derived condition, so the stored status stays untouched; the notified
/// flag keeps the hourly sweep from repeating itself.
async fn run_overdue_sweep(ctx: &SchedulerContext) -> Result<u64> {
    let now = DateTime::now();
    let due = ctx
        .milestones
        .find_many(
            doc! {
                "status": { "$in": ["pending", "in_progress"] },
                "planned_end": { "$lt": now },
                "overdue_notified": { "$ne": true },
            },
            None,
            None,
        )
        .await?;

    let mut swept = 0u64;
    for milestone in &due {
        let Some(id) = milestone._id else { continue };

        let result = ctx
            .milestones
            .update_one(
                doc! { "_id": id, "overdue_notified": { "$ne": true } },
                doc! { "$set": { "overdue_notified": true } },
            )
            .await?;
        if result.modified_count == 0 {
            continue;
        }
        swept += 1;

        if let Err(e) = notify_producer(ctx, milestone, overdue_mail).await {
            warn!(milestone = %id, error = %e, "Overdue notification failed");
        }
    }

    Ok(swept)
}

/// Remind producers of milestones coming due within the lead window
async fn run_due_reminders(ctx: &SchedulerContext) -> Result<u64> {
    let now = DateTime::now();
    let horizon = DateTime::from_millis(now.timestamp_millis() + DUE_SOON_DAYS * 86_400_000);

    let due_soon = ctx
        .milestones
        .find_many(
            doc! {
                "status": { "$in": ["pending", "in_progress"] },
                "planned_end": { "$gte": now, "$lte": horizon },
            },
            Some(doc! { "planned_end": 1 }),
            None,
        )
        .await?;

    let mut sent = 0u64;
    for milestone in &due_soon {
        match notify_producer(ctx, milestone, reminder_mail).await {
            Ok(()) => sent += 1,
            Err(e) => {
                warn!(milestone = ?milestone._id, error = %e, "Due reminder failed");
            }
        }
    }

    Ok(sent)
}

/// Weekly portfolio summary to every government user
async fn run_weekly_summary(ctx: &SchedulerContext) -> Result<u64> {
    let active_projects = ctx.projects.count(doc! { "status": "active" }).await?;
    let overdue_milestones = ctx
        .milestones
        .count(doc! {
            "status": { "$in": ["pending", "in_progress"] },
            "planned_end": { "$lt": DateTime::now() },
        })
        .await?;
    let pending_approvals = ctx
        .projects
        .count(doc! { "approval_status": "pending" })
        .await?;

    let recipients = ctx
        .users
        .find_many(doc! { "role": "government", "is_active": true }, None, None)
        .await?;

    let mut sent = 0u64;
    for user in &recipients {
        let mail = summary_mail(&user.email, active_projects, overdue_milestones, pending_approvals);
        match ctx.mailer.send(mail).await {
            Ok(()) => sent += 1,
            Err(e) => warn!(to = %user.email, error = %e, "Weekly summary failed"),
        }
    }

    Ok(sent)
}

/// Resolve the producer behind a milestone and send them a message
async fn notify_producer(
    ctx: &SchedulerContext,
    milestone: &MilestoneDoc,
    compose: fn(&str, &MilestoneDoc, &ProjectDoc) -> Mail,
) -> Result<()> {
    let Some(project) = ctx.projects.find_by_id(milestone.project_id).await? else {
        return Ok(());
    };
    let Some(producer) = ctx.users.find_by_id(project.producer_id).await? else {
        return Ok(());
    };

    ctx.mailer
        .send(compose(&producer.email, milestone, &project))
        .await
}

fn overdue_mail(to: &str, milestone: &MilestoneDoc, project: &ProjectDoc) -> Mail {
    Mail {
        to: to.to_string(),
        subject: format!("Milestone overdue: {}", milestone.title),
        body: format!(
            "Milestone '{}' in project '{}' has passed its planned end date and is now overdue.",
            milestone.title, project.name
        ),
    }
}

fn reminder_mail(to: &str, milestone: &MilestoneDoc, project: &ProjectDoc) -> Mail {
    Mail {
        to: to.to_string(),
        subject: format!("Milestone due soon: {}", milestone.title),
        body: format!(
            "Milestone '{}' in project '{}' is approaching its planned end date.",
            milestone.title, project.name
        ),
    }
}

fn summary_mail(to: &str, active: u64, overdue: u64, pending: u64) -> Mail {
    Mail {
        to: to.to_string(),
        subject: "Weekly subsidy programme summary".to_string(),
        body: format!(
            "Active projects: {}\nOverdue milestones: {}\nProjects awaiting approval: {}",
            active, overdue, pending
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::MilestoneCategory;
    use bson::oid::ObjectId;

    fn fixture() -> (MilestoneDoc, ProjectDoc) {
        let project = ProjectDoc::new(
            "Electrolyser Phase 1".into(),
            "".into(),
            ObjectId::new(),
            ObjectId::new(),
            100_000.0,
        );
        let milestone = MilestoneDoc::new(
            ObjectId::new(),
            1,
            "Commissioning".into(),
            MilestoneCategory::Testing,
            25_000.0,
        );
        (milestone, project)
    }

    #[test]
    fn test_overdue_mail_content() {
        let (milestone, project) = fixture();
        let mail = overdue_mail("producer@example.com", &milestone, &project);
        assert_eq!(mail.to, "producer@example.com");
        assert!(mail.subject.contains("overdue"));
        assert!(mail.body.contains("Commissioning"));
        assert!(mail.body.contains("Electrolyser Phase 1"));
    }

    #[test]
    fn test_reminder_mail_content() {
        let (milestone, project) = fixture();
        let mail = reminder_mail("producer@example.com", &milestone, &project);
        assert!(mail.subject.contains("due soon"));
        assert!(mail.body.contains(&milestone.title));
    }

    #[test]
    fn test_summary_mail_counts() {
        let mail = summary_mail("gov@example.com", 12, 3, 2);
        assert!(mail.body.contains("Active projects: 12"));
        assert!(mail.body.contains("Overdue milestones: 3"));
        assert!(mail.body.contains("awaiting approval: 2"));
    }
}
