pub mod config;
pub mod context;
pub mod coordinator;
pub mod pipeline;
pub mod policy;
pub mod processor;
pub mod router;
pub mod settings;

pub use config::AppConfig;
pub use context::{context_hash, verify_context_hash, ContextStore};
pub use coordinator::{DecisionEngine, DualEvaluation, EngineCoordinator, EngineCoordinatorConfig};
pub use pipeline::SignalPipeline;
pub use policy::{resolve_policy, EngineAvailability, PolicyDecision, PolicyEngine};
pub use processor::{EnrichedSignal, ProcessorConfig, SignalProcessor};
pub use router::{RouteResult, RoutingConfig, StrategyRouter};
pub use settings::{RuntimeSettings, SettingsSource};
