use std::time::Duration;
use thiserror::Error;

use crate::notifications::NotificationError;
use crate::repository::RepositoryError;
use crate::workflows::model::ApplicationId;

/// Failure of the status write itself. Any of these means nothing changed.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("application {0} not found")]
    ApplicationNotFound(ApplicationId),

    #[error("status '{0}' does not exist")]
    UnknownStatus(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// A step whose stored configuration cannot be executed.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("config is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("invalid {kind} config: {reason}")]
    InvalidConfig { kind: &'static str, reason: String },

    #[error("unknown action type '{0}'")]
    UnknownActionType(String),

    #[error("unknown condition type '{0}'")]
    UnknownConditionType(String),

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("cannot compare field '{field}' ({found}) with {expected}")]
    TypeMismatch {
        field: String,
        found: &'static str,
        expected: &'static str,
    },

    #[error("operator '{operator}' is not supported for {kind} values")]
    UnsupportedOperator {
        operator: &'static str,
        kind: &'static str,
    },

    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    #[error("chain depth limit of {max_depth} reached")]
    RecursionLimit { max_depth: usize },
}

/// Why a single step failed. Never aborts the rest of the chain.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("notification failed: {0}")]
    Notification(#[from] NotificationError),

    #[error("nested transition failed: {0}")]
    Transition(Box<TransitionError>),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<TransitionError> for StepError {
    fn from(err: TransitionError) -> Self {
        StepError::Transition(Box::new(err))
    }
}

impl StepError {
    pub fn timeout(after: Duration) -> Self {
        StepError::Notification(NotificationError::Timeout(after))
    }
}
