//! Webhook dedupe keys and the claim/counter store

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::signal::Signal;

/// Hex characters of the payload digest kept in the key
const PAYLOAD_HASH_LEN: usize = 32;

/// Atomic claim and daily-counter operations backing dedupe and limits.
/// Implementations must make `claim` and `increment_daily` atomic.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Set `key -> owner` only if absent. `true` when this caller won.
    async fn claim(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Current owner of a claimed key
    async fn owner(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn daily_trade_count(&self, day: &str) -> Result<u32, StoreError>;

    /// Increment and return the new count
    async fn increment_daily(&self, day: &str) -> Result<u32, StoreError>;
}

/// Dedupe key: source, ticker, direction, timestamp and a payload digest
pub fn dedupe_key(signal: &Signal) -> String {
    format!(
        "dedupe:webhook:{}:{}:{}:{}:{}",
        signal.source.as_str(),
        signal.ticker,
        signal.direction.as_str(),
        signal.timestamp_ms,
        payload_hash(&signal.raw)
    )
}

/// Truncated SHA-256 of the canonical serialization
pub fn payload_hash(raw: &Value) -> String {
    let digest = Sha256::digest(canonical_json(raw).as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(PAYLOAD_HASH_LEN);
    hex
}

/// JSON with object keys sorted at every level. `Value::Object` is a
/// `BTreeMap` without serde_json's `preserve_order` feature, so compact
/// serialization already emits keys in order.
pub fn canonical_json(value: &Value) -> String {
    value.to_string()
}

/// UTC calendar day used for the daily trade counter
pub fn utc_day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

fn daily_key(day: &str) -> String {
    format!("metrics:daily_trades:{}", day)
}

struct Claim {
    owner: String,
    expires_at: Instant,
}

/// Process-local store for tests and the single-shot binary
#[derive(Default)]
pub struct InMemoryStore {
    claims: Mutex<HashMap<String, Claim>>,
    counters: Mutex<HashMap<String, u32>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired claims. `claim` also prunes on every call.
    pub async fn cleanup(&self) {
        let mut claims = self.claims.lock().await;
        prune_expired(&mut claims, Instant::now());
    }
}

fn prune_expired(claims: &mut HashMap<String, Claim>, now: Instant) {
    let before = claims.len();
    claims.retain(|_, c| c.expires_at > now);
    if before != claims.len() {
        debug!("Cleaned up {} expired dedupe claims", before - claims.len());
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryStore {
    async fn claim(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut claims = self.claims.lock().await;
        let now = Instant::now();
        prune_expired(&mut claims, now);
        if claims.contains_key(key) {
            return Ok(false);
        }
        claims.insert(
            key.to_string(),
            Claim {
                owner: owner.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn owner(&self, key: &str) -> Result<Option<String>, StoreError> {
        let claims = self.claims.lock().await;
        let now = Instant::now();
        Ok(claims
            .get(key)
            .filter(|c| c.expires_at > now)
            .map(|c| c.owner.clone()))
    }

    async fn daily_trade_count(&self, day: &str) -> Result<u32, StoreError> {
        let counters = self.counters.lock().await;
        Ok(counters.get(&daily_key(day)).copied().unwrap_or(0))
    }

    async fn increment_daily(&self, day: &str) -> Result<u32, StoreError> {
        let mut counters = self.counters.lock().await;
        let count = counters.entry(daily_key(day)).or_insert(0);
        *count = count.saturating_add(1);
        Ok(*count)
    }
}
