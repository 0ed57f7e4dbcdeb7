//! `DecisionPipeline`: one webhook in, one reasoned decision out
//!
//! normalize -> dedupe claim -> enrich -> score -> risk plan -> validate
//! -> select/size/decide -> (optional) execute. Validation, scoring and
//! sizing all read the same enrichment snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use market_data::SourceHealth;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::decision::{decide, Decision, DecisionInput, Disposition};
use crate::enrichment::{enrich, Collaborators, Enrichment};
use crate::error::Result;
use crate::execution::{execute, ExecutionResult};
use crate::idempotency::{dedupe_key, utc_day_key, IdempotencyStore};
use crate::scoring::{score, Scores};
use crate::signal::{normalize, Signal};
use crate::sizing::derive_risk_plan;
use crate::validation::{validate, ValidationInput, ValidationResult};

/// Caller-supplied context
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessContext {
    /// Trades placed today; read from the store when absent
    pub daily_trade_count: Option<u32>,
}

/// Summary status of one processed webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Duplicate,
    Rejected,
    Skipped,
    Paper,
    Executed,
    ExecuteFailed,
    Approved,
}

impl WebhookStatus {
    fn resolve(validation: &ValidationResult, decision: &Decision, should_execute: bool, execution: Option<&ExecutionResult>) -> Self {
        if !validation.is_valid {
            return WebhookStatus::Rejected;
        }
        match decision.disposition {
            Disposition::Skip => WebhookStatus::Skipped,
            Disposition::Paper => WebhookStatus::Paper,
            Disposition::Execute if execution.map_or(false, |e| e.executed) => WebhookStatus::Executed,
            Disposition::Execute if should_execute => WebhookStatus::ExecuteFailed,
            Disposition::Execute => WebhookStatus::Approved,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookResult {
    pub webhook_id: String,
    pub status: WebhookStatus,
    pub signal: Signal,
    pub validation: ValidationResult,
    pub enrichment: Enrichment,
    pub scores: Scores,
    pub decision: Decision,
    pub should_execute: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
    /// Webhook id that first claimed the dedupe key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<String>,
}

pub struct DecisionPipeline {
    config: EngineConfig,
    collaborators: Collaborators,
    store: Arc<dyn IdempotencyStore>,
}

impl DecisionPipeline {
    /// Validates the configuration up front
    pub fn new(config: EngineConfig, collaborators: Collaborators, store: Arc<dyn IdempotencyStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            collaborators,
            store,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Health of every live collaborator client
    pub fn source_health(&self) -> Vec<SourceHealth> {
        self.collaborators.health_probes.iter().map(|probe| probe()).collect()
    }

    /// Only `UnrecognizedPayload` escapes; every other failure is folded
    /// into the returned decision.
    pub async fn process_webhook(&self, raw: &Value, ctx: ProcessContext) -> Result<WebhookResult> {
        self.process_webhook_at(raw, ctx, Utc::now()).await
    }

    pub async fn process_webhook_at(&self, raw: &Value, ctx: ProcessContext, now: DateTime<Utc>) -> Result<WebhookResult> {
        let signal = normalize(raw)?;
        let webhook_id = format!("wh_{}", Uuid::new_v4());
        let cfg = &self.config;

        debug!(
            webhook_id = %webhook_id,
            source = signal.source.as_str(),
            ticker = %signal.ticker,
            direction = signal.direction.as_str(),
            "Signal normalized"
        );

        let dedupe_key = cfg.dedupe_enabled.then(|| dedupe_key(&signal));
        if let Some(key) = &dedupe_key {
            if let Some(original) = self.claim(key, &webhook_id).await {
                info!(webhook_id = %webhook_id, ticker = %signal.ticker, original = %original, "Duplicate webhook");
                return Ok(WebhookResult {
                    webhook_id,
                    status: WebhookStatus::Duplicate,
                    decision: Decision::duplicate(&signal, &original),
                    signal,
                    validation: ValidationResult::duplicate(),
                    enrichment: Enrichment::default(),
                    scores: Scores::default(),
                    should_execute: false,
                    execution: None,
                    dedupe_key,
                    duplicate_of: Some(original),
                });
            }
        }

        let enrichment = enrich(
            &self.collaborators,
            &signal.ticker,
            signal.timeframe_minutes,
            cfg.collaborator_timeout(),
        )
        .await;

        let scores = score(&signal, &enrichment);
        let plan = derive_risk_plan(&signal, &enrichment, cfg);
        let day = utc_day_key(now);

        let daily_trade_count = match ctx.daily_trade_count {
            Some(count) => count,
            None => self.store.daily_trade_count(&day).await.unwrap_or_else(|e| {
                warn!(error = %e, "Daily trade count unavailable, assuming 0");
                0
            }),
        };

        let validation = validate(
            &ValidationInput {
                signal: &signal,
                enrichment: &enrichment,
                plan: &plan,
                daily_trade_count,
                market_clock_configured: self.collaborators.market_clock.is_some(),
                now_ms: now.timestamp_millis(),
            },
            cfg,
        );

        let decision = decide(
            &DecisionInput {
                signal: &signal,
                enrichment: &enrichment,
                scores: &scores,
                plan: &plan,
                today: now.date_naive(),
            },
            cfg,
        );

        let should_execute =
            cfg.enable_auto_trading && validation.is_valid && decision.disposition == Disposition::Execute;

        let execution = if should_execute {
            let result = execute(&decision, self.collaborators.brokerage.as_deref(), cfg).await;
            if result.executed {
                if let Err(e) = self.store.increment_daily(&day).await {
                    warn!(error = %e, "Failed to increment daily trade count");
                }
            }
            Some(result)
        } else {
            None
        };

        let status = WebhookStatus::resolve(&validation, &decision, should_execute, execution.as_ref());

        info!(
            webhook_id = %webhook_id,
            ticker = %signal.ticker,
            disposition = decision.disposition.as_str(),
            confidence = decision.confidence,
            quantity = decision.quantity,
            status = ?status,
            failed_checks = ?validation.failed_checks,
            "Webhook processed"
        );

        Ok(WebhookResult {
            webhook_id,
            status,
            signal,
            validation,
            enrichment,
            scores,
            decision,
            should_execute,
            execution,
            dedupe_key,
            duplicate_of: None,
        })
    }

    /// `Some(original_id)` when another webhook already owns the key.
    /// Store failures fail open.
    async fn claim(&self, key: &str, webhook_id: &str) -> Option<String> {
        match self.store.claim(key, webhook_id, self.config.dedupe_ttl()).await {
            Ok(true) => None,
            Ok(false) => {
                let original = self.store.owner(key).await.ok().flatten();
                Some(original.unwrap_or_else(|| "unknown".to_string()))
            }
            Err(e) => {
                warn!(key, error = %e, "Dedupe claim failed, processing anyway");
                None
            }
        }
    }
}
