//! Oracle provider registry
//!
//! A fixed set of named attestation sources, each with a relative weight.
//! Weights need not sum to 1; the aggregator tracks the running total.

use crate::types::PlatformError;

/// One configured attestation provider
#[derive(Debug, Clone)]
pub struct OracleProvider {
    pub name: String,
    /// Base URL of the provider's attestation endpoint
    pub endpoint: String,
    /// API key sent as a bearer header when present
    pub api_key: Option<String>,
    /// Relative weight in the consensus computation
    pub weight: f64,
}

/// Parse the `ORACLE_PROVIDERS` registry spec: comma-separated
/// `name=url@weight` entries. An omitted weight defaults to 1.0.
pub fn parse_provider_spec(spec: &str) -> Result<Vec<OracleProvider>, PlatformError> {
    let mut providers = Vec::new();

    for entry in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, rest) = entry.split_once('=').ok_or_else(|| {
            PlatformError::Config(format!("Invalid oracle provider entry '{}'", entry))
        })?;

        let (endpoint, weight) = match rest.rsplit_once('@') {
            Some((url, w)) => {
                let weight: f64 = w.parse().map_err(|_| {
                    PlatformError::Config(format!("Invalid weight '{}' for provider '{}'", w, name))
                })?;
                (url.to_string(), weight)
            }
            None => (rest.to_string(), 1.0),
        };

        if weight <= 0.0 {
            return Err(PlatformError::Config(format!(
                "Provider '{}' weight must be positive",
                name
            )));
        }

        providers.push(OracleProvider {
            name: name.trim().to_string(),
            endpoint,
            api_key: None,
            weight,
        });
    }

    Ok(providers)
}

/// Default registry used when `ORACLE_PROVIDERS` is unset: the three
/// programme data sources with the weights from the subsidy scheme.
pub fn default_providers() -> Vec<OracleProvider> {
    vec![
        OracleProvider {
            name: "energy-grid".into(),
            endpoint: "http://localhost:9101".into(),
            api_key: None,
            weight: 0.4,
        },
        OracleProvider {
            name: "production-meter".into(),
            endpoint: "http://localhost:9102".into(),
            api_key: None,
            weight: 0.35,
        },
        OracleProvider {
            name: "environmental".into(),
            endpoint: "http://localhost:9103".into(),
            api_key: None,
            weight: 0.25,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_provider_spec() {
        let providers = parse_provider_spec(
            "grid=https://grid.example/api@0.4, wx=https://wx.example@0.3, meter=https://m.example",
        )
        .unwrap();

        assert_eq!(providers.len(), 3);
        assert_eq!(providers[0].name, "grid");
        assert_eq!(providers[0].endpoint, "https://grid.example/api");
        assert_eq!(providers[0].weight, 0.4);
        // Omitted weight defaults to 1.0
        assert_eq!(providers[2].weight, 1.0);
    }

    #[test]
    fn test_parse_rejects_bad_entries() {
        assert!(parse_provider_spec("no-equals-sign").is_err());
        assert!(parse_provider_spec("grid=url@not-a-number").is_err());
        assert!(parse_provider_spec("grid=url@-0.5").is_err());
    }

    #[test]
    fn test_empty_spec() {
        assert!(parse_provider_spec("").unwrap().is_empty());
    }
}
