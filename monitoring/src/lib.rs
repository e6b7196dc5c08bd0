pub mod outcomes;
pub mod shadow;

pub use outcomes::{EngineComparison, NewOutcome, OutcomeTracker};
pub use shadow::{RefreshReport, ShadowExecutor, ShadowExecutorConfig};
