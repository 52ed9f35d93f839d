//! Repository abstraction for workflow persistence.
//!
//! `WorkflowRepository` is the only way the engine reads applications and
//! workflow configuration and the only way it writes an application's status.
//! Two backends are provided: [`InMemoryRepository`] and, with the `database`
//! feature, [`SqliteRepository`].

mod memory;
#[cfg(feature = "database")]
mod sqlite;

pub use memory::InMemoryRepository;
#[cfg(feature = "database")]
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::workflows::model::{
    Application, ApplicationId, Event, EventId, FunctionOrder, FunctionStep, NewApplication,
    NewFunction, NewRobot, NewTrigger, Robot, RobotId, Status, StatusId, StatusOrder,
    StatusOrderId, Trigger, TriggerId,
};
use crate::workflows::positions::{PositionOutOfRange, PositionScope, Slot};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },

    #[error("invalid position in {scope}: {reason}")]
    InvalidPosition {
        scope: PositionScope,
        reason: PositionOutOfRange,
    },

    #[error("{entity} {id} is still referenced by {references} step(s)")]
    InUse {
        entity: &'static str,
        id: i64,
        references: usize,
    },

    #[error("invalid JSON in {field}: {reason}")]
    InvalidJson { field: &'static str, reason: String },

    #[error("{entity} '{key}' already exists")]
    Duplicate { entity: &'static str, key: String },

    #[error("storage inconsistency: {0}")]
    Corrupt(String),

    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "database")]
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        RepositoryError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }
}

/// Owner of a positioned step: a status order's chain or a trigger's actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepOwner {
    StatusOrder(StatusOrderId),
    Trigger(TriggerId),
}

impl From<StepOwner> for PositionScope {
    fn from(owner: StepOwner) -> Self {
        match owner {
            StepOwner::StatusOrder(id) => PositionScope::StatusOrder(id),
            StepOwner::Trigger(id) => PositionScope::TriggerActions(id),
        }
    }
}

/// A status order joined with its status, as listed for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedStatus {
    pub order: StatusOrder,
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStatus {
    pub name: String,
    pub description: Option<String>,
    pub is_positive: bool,
}

impl NewStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            is_positive: true,
        }
    }
}

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    // Engine reads and the single status write.

    /// Load an application with its current status.
    async fn get_application(&self, id: ApplicationId) -> Result<Application, RepositoryError>;

    async fn find_status(&self, name: &str) -> Result<Option<Status>, RepositoryError>;

    /// Set the application's status and bump `updated_at` in one unit of
    /// work. Returns the application as committed.
    async fn commit_status(
        &self,
        id: ApplicationId,
        status: &Status,
        at: DateTime<Utc>,
    ) -> Result<Application, RepositoryError>;

    /// Steps of every status order for `status`, restricted to `event` when
    /// given, ordered by event, status order position and step position.
    async fn resolve_chain(
        &self,
        status: StatusId,
        event: Option<EventId>,
    ) -> Result<Vec<FunctionStep>, RepositoryError>;

    /// Cascading actions of a trigger, in stored order.
    async fn trigger_actions(&self, trigger: TriggerId)
        -> Result<Vec<FunctionStep>, RepositoryError>;

    async fn list_statuses(&self, event: EventId) -> Result<Vec<OrderedStatus>, RepositoryError>;

    // Operator authoring.

    async fn create_event(&self, name: &str) -> Result<Event, RepositoryError>;

    async fn create_status(&self, status: NewStatus) -> Result<Status, RepositoryError>;

    async fn create_robot(&self, robot: NewRobot) -> Result<Robot, RepositoryError>;

    async fn create_trigger(&self, trigger: NewTrigger) -> Result<Trigger, RepositoryError>;

    /// Rejected with [`RepositoryError::InUse`] while any step references it.
    async fn delete_robot(&self, id: RobotId) -> Result<(), RepositoryError>;

    /// Rejected with [`RepositoryError::InUse`] while any step references it.
    /// Its own action list is removed with it.
    async fn delete_trigger(&self, id: TriggerId) -> Result<(), RepositoryError>;

    async fn create_application(
        &self,
        application: NewApplication,
    ) -> Result<Application, RepositoryError>;

    // Ordered position store.

    async fn insert_status_order(
        &self,
        event: EventId,
        status: StatusId,
        position: i64,
    ) -> Result<StatusOrder, RepositoryError>;

    async fn insert_step(
        &self,
        owner: StepOwner,
        step: NewFunction,
        position: i64,
    ) -> Result<FunctionOrder, RepositoryError>;

    async fn move_item(
        &self,
        scope: PositionScope,
        item: i64,
        position: i64,
    ) -> Result<(), RepositoryError>;

    /// Delete a positioned row and compact its siblings. Deleting a status
    /// order removes its steps as well.
    async fn delete_item(&self, scope: PositionScope, item: i64) -> Result<(), RepositoryError>;

    async fn slots(&self, scope: PositionScope) -> Result<Vec<Slot>, RepositoryError>;
}

/// Validate that stored JSON text is an object.
pub(crate) fn validate_json_object(field: &'static str, text: &str) -> Result<(), RepositoryError> {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Object(_)) => Ok(()),
        Ok(other) => Err(RepositoryError::InvalidJson {
            field,
            reason: format!("expected an object, found {other}"),
        }),
        Err(e) => Err(RepositoryError::InvalidJson {
            field,
            reason: e.to_string(),
        }),
    }
}

/// Validate that stored JSON text parses at all.
pub(crate) fn validate_json(field: &'static str, text: &str) -> Result<(), RepositoryError> {
    serde_json::from_str::<serde_json::Value>(text)
        .map(|_| ())
        .map_err(|e| RepositoryError::InvalidJson {
            field,
            reason: e.to_string(),
        })
}
