// Status workflow engine: ordered positions, chain resolution, trigger
// evaluation and step execution around an atomic status write.

pub mod actions;
pub mod chain;
pub mod errors;
pub mod executor;
pub mod model;
pub mod positions;
pub mod state_machine;
pub mod triggers;

pub use chain::{ChainReport, StepOutcome, StepReport};
pub use errors::{ConfigurationError, StepError, TransitionError};
pub use executor::ActionExecutor;
pub use state_machine::{EngineSettings, StateMachine, TransitionResult, Transitioned};
pub use triggers::{Condition, FieldRegistry, FieldValue, TriggerEvaluator};
