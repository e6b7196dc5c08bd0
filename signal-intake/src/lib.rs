pub mod dedup;
pub mod payload;
pub mod server;
pub mod signature;

pub use dedup::{DedupConfig, DedupGate, DedupOutcome};
pub use payload::{PayloadError, SignalPayload};
pub use server::{router, AppState};
