//! Weighted oracle aggregation
//!
//! Queries every configured provider independently and folds the responses
//! into a single advisory aggregate. A provider failure never aborts the
//! aggregation; the failed source is recorded and excluded from the
//! weighted computation. The consensus score measures how much of the
//! configured weight actually responded, not whether responders agree.

use bson::DateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::chain::verify_oracle_signature;
use crate::db::schemas::{MilestoneCategory, MilestoneDoc, PerformanceTarget, ProjectDoc};
use crate::oracle::provider::OracleProvider;
use crate::types::{PlatformError, Result};

/// Compliance bar for the Testing & Commissioning category rule
const TESTING_COMPLIANCE_BAR: f64 = 0.8;

/// A successful provider response: named numeric fields
#[derive(Debug, Clone)]
pub struct ProviderReading {
    pub provider: String,
    pub weight: f64,
    pub fields: BTreeMap<String, f64>,
}

/// A failed provider query, recorded but excluded from the computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: String,
    /// Always false; kept explicit so the persisted record reads plainly
    pub verified: bool,
    pub error: String,
}

/// The persisted aggregation result. Advisory: the verify transition does
/// not gate on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleAggregate {
    /// Weighted average per field, over responding providers only
    pub fields: BTreeMap<String, f64>,
    /// Responding weight / total configured weight
    pub verification_score: f64,
    /// `verification_score >= threshold`
    pub consensus: bool,
    /// Names of providers that responded
    pub responders: Vec<String>,
    /// Providers that failed, with their errors
    pub failures: Vec<ProviderFailure>,
    /// SHA-256 over the canonical aggregate content, for integrity
    pub content_hash: String,
    pub aggregated_at: DateTime,
}

/// Category-specific downstream assessment of an aggregate
#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    pub passed: bool,
    pub checks: Vec<TargetCheck>,
}

/// One performance-target comparison
#[derive(Debug, Clone, Serialize)]
pub struct TargetCheck {
    pub metric: String,
    pub target: f64,
    /// None when the aggregated field was missing (skipped, not failed)
    pub observed: Option<f64>,
    pub passed: bool,
}

/// Pure aggregation over collected readings and failures.
///
/// Per-field rule: `sum(value_i * w_i) / sum(w_i over responders that
/// reported the field)`. Score rule: responding weight over total weight —
/// responders that reply with an empty payload still count as responding.
pub fn aggregate_readings(
    readings: &[ProviderReading],
    failures: Vec<ProviderFailure>,
    total_weight: f64,
    threshold: f64,
) -> OracleAggregate {
    let responding_weight: f64 = readings.iter().map(|r| r.weight).sum();

    let mut sums: BTreeMap<String, (f64, f64)> = BTreeMap::new();
    for reading in readings {
        for (field, value) in &reading.fields {
            let entry = sums.entry(field.clone()).or_insert((0.0, 0.0));
            entry.0 += value * reading.weight;
            entry.1 += reading.weight;
        }
    }

    let fields: BTreeMap<String, f64> = sums
        .into_iter()
        .map(|(field, (weighted_sum, weight))| (field, weighted_sum / weight))
        .collect();

    let verification_score = if total_weight > 0.0 {
        responding_weight / total_weight
    } else {
        0.0
    };

    let mut aggregate = OracleAggregate {
        fields,
        verification_score,
        consensus: verification_score >= threshold,
        responders: readings.iter().map(|r| r.provider.clone()).collect(),
        failures,
        content_hash: String::new(),
        aggregated_at: DateTime::now(),
    };
    aggregate.content_hash = content_hash(&aggregate);
    aggregate
}

/// SHA-256 over the deterministic parts of the aggregate. BTreeMap keys
/// iterate sorted, so the hash is stable for identical content.
pub fn content_hash(aggregate: &OracleAggregate) -> String {
    let mut hasher = Sha256::new();
    for (field, value) in &aggregate.fields {
        hasher.update(field.as_bytes());
        hasher.update(value.to_le_bytes());
    }
    hasher.update(aggregate.verification_score.to_le_bytes());
    for responder in &aggregate.responders {
        hasher.update(responder.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Category-specific verification rules over an aggregate.
///
/// - Performance: every declared target is checked against the matching
///   aggregated field; a missing field skips the check rather than failing.
/// - Testing & Commissioning: the compliance sub-score must clear a fixed bar.
/// - Everything else: bare consensus.
pub fn assess(
    category: MilestoneCategory,
    targets: &[PerformanceTarget],
    aggregate: &OracleAggregate,
) -> Assessment {
    match category {
        MilestoneCategory::Performance => {
            let mut checks = Vec::new();
            let mut passed = aggregate.consensus;
            for target in targets {
                match aggregate.fields.get(&target.metric) {
                    Some(&observed) => {
                        let ok = observed >= target.target;
                        passed &= ok;
                        checks.push(TargetCheck {
                            metric: target.metric.clone(),
                            target: target.target,
                            observed: Some(observed),
                            passed: ok,
                        });
                    }
                    None => {
                        // Skipped, not failed
                        checks.push(TargetCheck {
                            metric: target.metric.clone(),
                            target: target.target,
                            observed: None,
                            passed: true,
                        });
                    }
                }
            }
            Assessment { passed, checks }
        }
        MilestoneCategory::Testing => {
            let compliance = aggregate.fields.get("compliance_score").copied();
            let ok = aggregate.consensus
                && compliance.map(|c| c >= TESTING_COMPLIANCE_BAR).unwrap_or(false);
            Assessment {
                passed: ok,
                checks: vec![TargetCheck {
                    metric: "compliance_score".into(),
                    target: TESTING_COMPLIANCE_BAR,
                    observed: compliance,
                    passed: ok,
                }],
            }
        }
        _ => Assessment {
            passed: aggregate.consensus,
            checks: Vec::new(),
        },
    }
}

/// Oracle aggregation service: the provider registry plus the HTTP client
/// used to query it. Constructed once at startup and injected. When a
/// verifying key is configured, every provider payload must carry a valid
/// ed25519 attestation signature; an unsigned or mis-signed payload counts
/// as a provider failure.
pub struct OracleService {
    client: reqwest::Client,
    providers: Vec<OracleProvider>,
    total_weight: f64,
    threshold: f64,
    verifying_key: Option<String>,
}

impl OracleService {
    pub fn new(
        providers: Vec<OracleProvider>,
        threshold: f64,
        timeout: Duration,
        verifying_key: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let total_weight = providers.iter().map(|p| p.weight).sum();

        Ok(Self {
            client,
            providers,
            total_weight,
            threshold,
            verifying_key,
        })
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Query every provider for attestation data on a milestone and fold
    /// the responses into one aggregate. Individual failures are absorbed.
    pub async fn aggregate_for_milestone(
        &self,
        milestone: &MilestoneDoc,
        project: &ProjectDoc,
    ) -> Result<OracleAggregate> {
        if self.providers.is_empty() {
            return Err(PlatformError::Oracle("No oracle providers configured".into()));
        }

        let project_id = project._id.map(|id| id.to_hex()).unwrap_or_default();
        let milestone_id = milestone._id.map(|id| id.to_hex()).unwrap_or_default();

        let mut readings = Vec::new();
        let mut failures = Vec::new();

        for provider in &self.providers {
            match self.query_provider(provider, &project_id, &milestone_id).await {
                Ok(fields) => {
                    debug!(
                        provider = %provider.name,
                        fields = fields.len(),
                        "Oracle provider responded"
                    );
                    readings.push(ProviderReading {
                        provider: provider.name.clone(),
                        weight: provider.weight,
                        fields,
                    });
                }
                Err(e) => {
                    warn!(provider = %provider.name, error = %e, "Oracle provider failed");
                    failures.push(ProviderFailure {
                        provider: provider.name.clone(),
                        verified: false,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(aggregate_readings(
            &readings,
            failures,
            self.total_weight,
            self.threshold,
        ))
    }

    /// Fetch one provider's attestation payload. Expects a JSON object of
    /// numeric fields under `data`; non-numeric entries are ignored.
    async fn query_provider(
        &self,
        provider: &OracleProvider,
        project_id: &str,
        milestone_id: &str,
    ) -> Result<BTreeMap<String, f64>> {
        let url = format!(
            "{}/attestations?project={}&milestone={}",
            provider.endpoint.trim_end_matches('/'),
            project_id,
            milestone_id
        );

        let mut request = self.client.get(&url);
        if let Some(ref key) = provider.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PlatformError::Oracle(format!("{}: {}", provider.name, e)))?;

        if !response.status().is_success() {
            return Err(PlatformError::Oracle(format!(
                "{}: status {}",
                provider.name,
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PlatformError::Oracle(format!("{}: invalid JSON: {}", provider.name, e)))?;

        let data = body
            .get("data")
            .and_then(|d| d.as_object())
            .ok_or_else(|| {
                PlatformError::Oracle(format!("{}: missing data object", provider.name))
            })?;

        // Signature covers the compact serialization of the data object;
        // serde_json's map keeps keys sorted, so both sides serialize alike
        if let Some(ref key) = self.verifying_key {
            let signature = body
                .get("signature")
                .and_then(|s| s.as_str())
                .ok_or_else(|| {
                    PlatformError::Oracle(format!(
                        "{}: missing attestation signature",
                        provider.name
                    ))
                })?;
            let payload = serde_json::to_vec(data).map_err(|e| {
                PlatformError::Oracle(format!("{}: payload serialization: {}", provider.name, e))
            })?;
            if !verify_oracle_signature(key, &payload, signature)? {
                return Err(PlatformError::Oracle(format!(
                    "{}: attestation signature check failed",
                    provider.name
                )));
            }
        }

        let fields = data
            .iter()
            .filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n)))
            .collect();

        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(provider: &str, weight: f64, fields: &[(&str, f64)]) -> ProviderReading {
        ProviderReading {
            provider: provider.into(),
            weight,
            fields: fields.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    #[test]
    fn test_weighted_average_over_responders_only() {
        // Three providers configured (total weight 1.0), one fails
        let readings = vec![
            reading("grid", 0.4, &[("production_rate", 100.0)]),
            reading("meter", 0.35, &[("production_rate", 130.0)]),
        ];
        let failures = vec![ProviderFailure {
            provider: "environmental".into(),
            verified: false,
            error: "connection refused".into(),
        }];

        let agg = aggregate_readings(&readings, failures, 1.0, 0.75);

        // (100*0.4 + 130*0.35) / 0.75 = 85.5 / 0.75 = 114.0
        let rate = agg.fields["production_rate"];
        assert!((rate - 114.0).abs() < 1e-9);

        // Score is responding weight over total, threshold met exactly
        assert!((agg.verification_score - 0.75).abs() < 1e-9);
        assert!(agg.consensus);
        assert_eq!(agg.responders.len(), 2);
        assert_eq!(agg.failures.len(), 1);
        assert!(!agg.failures[0].verified);
    }

    #[test]
    fn test_no_consensus_below_threshold() {
        // Only 0.4 of 1.0 weight responded; agreement among responders is
        // irrelevant to the score
        let readings = vec![reading("grid", 0.4, &[("purity", 99.9)])];
        let agg = aggregate_readings(&readings, Vec::new(), 1.0, 0.75);

        assert!((agg.verification_score - 0.4).abs() < 1e-9);
        assert!(!agg.consensus);
    }

    #[test]
    fn test_field_missing_from_some_responders() {
        // Field reported by only one responder averages over that
        // responder's weight alone
        let readings = vec![
            reading("grid", 0.5, &[("output", 10.0), ("purity", 99.0)]),
            reading("meter", 0.5, &[("output", 20.0)]),
        ];
        let agg = aggregate_readings(&readings, Vec::new(), 1.0, 0.5);

        assert!((agg.fields["output"] - 15.0).abs() < 1e-9);
        assert!((agg.fields["purity"] - 99.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_providers_failed() {
        let failures = vec![
            ProviderFailure {
                provider: "grid".into(),
                verified: false,
                error: "timeout".into(),
            },
            ProviderFailure {
                provider: "meter".into(),
                verified: false,
                error: "500".into(),
            },
        ];
        let agg = aggregate_readings(&[], failures, 0.75, 0.75);

        assert_eq!(agg.verification_score, 0.0);
        assert!(!agg.consensus);
        assert!(agg.fields.is_empty());
        assert_eq!(agg.failures.len(), 2);
    }

    #[test]
    fn test_content_hash_stable() {
        let readings = vec![reading("grid", 1.0, &[("a", 1.0), ("b", 2.0)])];
        let agg1 = aggregate_readings(&readings, Vec::new(), 1.0, 0.5);
        let agg2 = aggregate_readings(&readings, Vec::new(), 1.0, 0.5);
        assert_eq!(agg1.content_hash, agg2.content_hash);
        assert_eq!(agg1.content_hash.len(), 64);

        let other = vec![reading("grid", 1.0, &[("a", 1.0), ("b", 3.0)])];
        let agg3 = aggregate_readings(&other, Vec::new(), 1.0, 0.5);
        assert_ne!(agg1.content_hash, agg3.content_hash);
    }

    #[test]
    fn test_performance_assessment() {
        let readings = vec![reading(
            "grid",
            1.0,
            &[("production_rate_kg_day", 520.0)],
        )];
        let agg = aggregate_readings(&readings, Vec::new(), 1.0, 0.75);

        let targets = vec![
            PerformanceTarget {
                metric: "production_rate_kg_day".into(),
                target: 500.0,
                unit: "kg/day".into(),
            },
            // No aggregated field for this one: skipped, not failed
            PerformanceTarget {
                metric: "purity_percent".into(),
                target: 99.5,
                unit: "%".into(),
            },
        ];

        let assessment = assess(MilestoneCategory::Performance, &targets, &agg);
        assert!(assessment.passed);
        assert_eq!(assessment.checks.len(), 2);
        assert!(assessment.checks[0].observed.is_some());
        assert!(assessment.checks[1].observed.is_none());
        assert!(assessment.checks[1].passed);
    }

    #[test]
    fn test_performance_assessment_fails_missed_target() {
        let readings = vec![reading("grid", 1.0, &[("production_rate_kg_day", 480.0)])];
        let agg = aggregate_readings(&readings, Vec::new(), 1.0, 0.75);

        let targets = vec![PerformanceTarget {
            metric: "production_rate_kg_day".into(),
            target: 500.0,
            unit: "kg/day".into(),
        }];

        assert!(!assess(MilestoneCategory::Performance, &targets, &agg).passed);
    }

    #[test]
    fn test_testing_assessment_compliance_bar() {
        let good = vec![reading("lab", 1.0, &[("compliance_score", 0.92)])];
        let agg = aggregate_readings(&good, Vec::new(), 1.0, 0.75);
        assert!(assess(MilestoneCategory::Testing, &[], &agg).passed);

        let bad = vec![reading("lab", 1.0, &[("compliance_score", 0.7)])];
        let agg = aggregate_readings(&bad, Vec::new(), 1.0, 0.75);
        assert!(!assess(MilestoneCategory::Testing, &[], &agg).passed);

        // Missing compliance score fails rather than skips for this category
        let none = vec![reading("lab", 1.0, &[("other", 1.0)])];
        let agg = aggregate_readings(&none, Vec::new(), 1.0, 0.75);
        assert!(!assess(MilestoneCategory::Testing, &[], &agg).passed);
    }

    #[test]
    fn test_default_category_bare_consensus() {
        let readings = vec![reading("grid", 0.8, &[])];
        let agg = aggregate_readings(&readings, Vec::new(), 1.0, 0.75);
        assert!(assess(MilestoneCategory::Construction, &[], &agg).passed);

        let agg = aggregate_readings(&readings, Vec::new(), 2.0, 0.75);
        assert!(!assess(MilestoneCategory::Construction, &[], &agg).passed);
    }
}
