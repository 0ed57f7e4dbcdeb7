use crate::types::{EndpointHealth, Result, SourceHealth};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct EndpointStats {
    successes: u64,
    failures: u64,
    latency_total_ms: u64,
    last_success: Option<DateTime<Utc>>,
    /// Error of the latest call, cleared by the next success
    last_error: Option<String>,
}

impl EndpointStats {
    fn is_healthy(&self) -> bool {
        self.successes > 0 && self.last_error.is_none()
    }
}

/// Call outcomes of one provider, keyed by endpoint
pub(crate) struct HealthTracker {
    source: &'static str,
    endpoints: Mutex<BTreeMap<&'static str, EndpointStats>>,
}

impl HealthTracker {
    pub(crate) fn new(source: &'static str) -> Self {
        Self {
            source,
            endpoints: Mutex::new(BTreeMap::new()),
        }
    }

    pub(crate) fn record<T>(&self, endpoint: &'static str, elapsed: Duration, outcome: &Result<T>) {
        let mut endpoints = self.endpoints.lock().unwrap_or_else(PoisonError::into_inner);
        let stats = endpoints.entry(endpoint).or_default();
        match outcome {
            Ok(_) => {
                stats.successes += 1;
                stats.latency_total_ms += elapsed.as_millis() as u64;
                stats.last_success = Some(Utc::now());
                stats.last_error = None;
            }
            Err(e) => {
                stats.failures += 1;
                stats.last_error = Some(e.to_string());
            }
        }
    }

    /// Healthy once something succeeded and no endpoint's latest call failed
    pub(crate) fn snapshot(&self) -> SourceHealth {
        let endpoints = self.endpoints.lock().unwrap_or_else(PoisonError::into_inner);

        let successes: u64 = endpoints.values().map(|s| s.successes).sum();
        let failures: u64 = endpoints.values().map(|s| s.failures).sum();
        let latency_total: u64 = endpoints.values().map(|s| s.latency_total_ms).sum();
        let last_error = endpoints
            .iter()
            .find_map(|(name, s)| s.last_error.as_ref().map(|e| format!("{}: {}", name, e)));

        SourceHealth {
            source: self.source.to_string(),
            is_healthy: successes > 0 && last_error.is_none(),
            last_success: endpoints.values().filter_map(|s| s.last_success).max(),
            last_error,
            success_rate: match successes + failures {
                0 => 1.0,
                total => successes as f64 / total as f64,
            },
            avg_latency_ms: latency_total.checked_div(successes).unwrap_or(0),
            endpoints: endpoints
                .iter()
                .map(|(name, s)| EndpointHealth {
                    endpoint: name.to_string(),
                    is_healthy: s.is_healthy(),
                    successes: s.successes,
                    failures: s.failures,
                    last_error: s.last_error.clone(),
                })
                .collect(),
        }
    }
}

/// Reads a provider number that may arrive as a JSON number or a string.
/// Non-finite values are treated as absent.
pub(crate) fn json_f64(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Provider collections collapse to a bare object when they hold one element.
pub(crate) fn one_or_many(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::types::MarketDataError;

    fn failed(msg: &str) -> Result<()> {
        Err(MarketDataError::Http(msg.to_string()))
    }

    #[test]
    fn test_tracker_starts_unhealthy_with_full_rate() {
        let health = HealthTracker::new("tradier").snapshot();
        assert_eq!(health.source, "tradier");
        assert!(!health.is_healthy);
        assert_eq!(health.success_rate, 1.0);
        assert!(health.endpoints.is_empty());
    }

    #[test]
    fn test_failing_endpoint_marks_source_unhealthy() {
        let tracker = HealthTracker::new("tradier");
        tracker.record("quotes", Duration::from_millis(10), &Ok(()));
        tracker.record("quotes", Duration::from_millis(30), &Ok(()));
        tracker.record("chains", Duration::from_millis(5), &failed("reset"));

        let health = tracker.snapshot();
        assert!(!health.is_healthy);
        assert_eq!(health.avg_latency_ms, 20);
        assert!((health.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(health.last_error.as_deref(), Some("chains: HTTP request failed: reset"));

        let chains = health.endpoints.iter().find(|e| e.endpoint == "chains").unwrap();
        assert!(!chains.is_healthy);
        assert_eq!(chains.failures, 1);
        let quotes = health.endpoints.iter().find(|e| e.endpoint == "quotes").unwrap();
        assert!(quotes.is_healthy);
        assert_eq!(quotes.successes, 2);
    }

    #[test]
    fn test_success_clears_endpoint_error() {
        let tracker = HealthTracker::new("alpaca");
        tracker.record("clock", Duration::from_millis(5), &failed("refused"));
        tracker.record("clock", Duration::from_millis(5), &Ok(()));
        let health = tracker.snapshot();
        assert!(health.is_healthy);
        assert!(health.last_error.is_none());
        assert_eq!(health.endpoints[0].failures, 1);
    }

    #[test]
    fn test_json_f64_accepts_strings() {
        assert_eq!(json_f64(Some(&json!(1.5))), Some(1.5));
        assert_eq!(json_f64(Some(&json!("2.25"))), Some(2.25));
        assert_eq!(json_f64(Some(&json!("n/a"))), None);
        assert_eq!(json_f64(Some(&Value::Null)), None);
        assert_eq!(json_f64(None), None);
    }

    #[test]
    fn test_one_or_many() {
        let single = json!({"symbol": "AAPL"});
        let many = json!([{"symbol": "AAPL"}, {"symbol": "MSFT"}]);
        assert_eq!(one_or_many(Some(&single)).len(), 1);
        assert_eq!(one_or_many(Some(&many)).len(), 2);
        assert!(one_or_many(Some(&Value::Null)).is_empty());
    }
}
