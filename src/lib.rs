// statusflow - status-transition workflow engine
// This exposes the core components for embedding and integration tests

pub mod config;
pub mod database;
pub mod http;
pub mod notifications;
pub mod observability;
pub mod repository;
pub mod telemetry;
pub mod workflows;

// Re-export key types for easy access
pub use config::{config, init_config, StatusFlowConfig};
#[cfg(feature = "database")]
pub use database::DatabaseManager;
pub use http::RateLimitedHttpClient;
#[cfg(any(test, feature = "testing"))]
pub use notifications::RecordingGateway;
pub use notifications::{
    NotificationError, NotificationGateway, OutgoingMessage, ParseMode, TelegramGateway,
};
pub use observability::{engine_metrics, EngineMetrics, OperationTimer};
#[cfg(feature = "database")]
pub use repository::SqliteRepository;
pub use repository::{InMemoryRepository, RepositoryError, StepOwner, WorkflowRepository};
pub use telemetry::{create_transition_span, generate_correlation_id, init_telemetry};
pub use workflows::{
    ChainReport, EngineSettings, StateMachine, StepOutcome, TransitionError, TransitionResult,
    Transitioned,
};
