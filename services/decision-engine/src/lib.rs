//! Signal Decision Engine
//!
//! Turns an inbound trading alert into an auditable SKIP / PAPER / EXECUTE
//! decision, optionally forwarding a bracket order to the brokerage.

pub mod config;
pub mod decision;
pub mod enrichment;
pub mod error;
pub mod execution;
pub mod idempotency;
pub mod pipeline;
pub mod scoring;
pub mod selector;
pub mod signal;
pub mod sizing;
pub mod validation;

// Re-export main types for convenience
pub use config::{ConfigSummary, EngineConfig, PresetSeed, ProviderCredentials, StrategyPreset};
pub use decision::{Decision, Disposition, InstrumentType, TradeAction};
pub use enrichment::{Collaborators, DerivedMetrics, Enrichment};
pub use error::{EngineError, Result, StoreError};
pub use execution::ExecutionResult;
pub use idempotency::{IdempotencyStore, InMemoryStore};
pub use pipeline::{DecisionPipeline, ProcessContext, WebhookResult, WebhookStatus};
pub use scoring::Scores;
pub use selector::{Instrument, OptionLeg, OptionSpread, OptionStructure};
pub use signal::{Direction, QualityLabel, Signal, SignalSource};
pub use validation::ValidationResult;
