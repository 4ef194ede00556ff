//! Notifications: the mail seam and the background job scheduler

pub mod mailer;
pub mod scheduler;

pub use mailer::{Mail, Mailer, NullMailer, RelayMailer};
pub use scheduler::{JobStatus, NotificationScheduler, SchedulerContext};
