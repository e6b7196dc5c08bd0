pub mod experiment;
pub mod market;
pub mod signal;
pub mod sim;
pub mod trade;

pub use experiment::{EngineId, ExecutionMode, ExecutionPolicy, Experiment, Variant};
pub use market::{
    Candle, IndicatorSet, MarketContext, MarketDataProvider, MarketHours, MarketSnapshot,
};
pub use signal::{RejectionReason, Signal, SignalDirection, SignalStatus};
pub use sim::SimulatedMarketData;
pub use trade::{
    EngineDecision, ExitReason, PerformanceMetrics, PositionStatus, ShadowPosition, ShadowTrade,
    TradeOutcome, TradeRecommendation,
};
