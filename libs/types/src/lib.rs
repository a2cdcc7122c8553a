//! # Torq Decision Engine Types
//!
//! Shared data model for every crate in the decision engine workspace.
//!
//! ## Design Philosophy
//!
//! - **Tagged Variants**: Directions, phases, regimes and exit reasons are enums,
//!   validated once at the codec boundary and never re-checked downstream
//! - **Money as Decimal**: Prices, stops, targets and P&L use `rust_decimal::Decimal`
//! - **Statistics as f64**: Features, scores and confidences use `f64`
//! - **Explicit Conversions**: [`precision`] holds the only crossings between the two
//!
//! ## Ownership Rules
//!
//! - [`Position`] is mutated only by the position tracker
//! - [`RiskState`] is mutated only by the feedback loop
//! - [`TrailingState`] lives exactly as long as its open position
//! - [`TradeOutcome`] is immutable and closes exactly one position lifecycle

pub mod errors;
pub mod features;
pub mod identifiers;
pub mod market;
pub mod outcome;
pub mod position;
pub mod precision;
pub mod prediction;
pub mod risk;
pub mod status;
pub mod trailing;

pub use errors::ValidationError;
pub use features::{feature_index, FeatureVector, FEATURE_COUNT, FEATURE_SCHEMA_VERSION};
pub use identifiers::InstrumentId;
pub use market::MarketSnapshot;
pub use outcome::{ExitReason, TradeOutcome};
pub use position::{Position, PositionPhase};
pub use prediction::{
    Direction, DirectionalScore, EnsembleDecision, ModelPrediction, PredictionFailure,
    RecommendationTier, TradePlan,
};
pub use risk::RiskState;
pub use status::StatusSnapshot;
pub use trailing::{Regime, TrailingAlgorithmId, TrailingState};

pub use rust_decimal::Decimal;
