// Function chains: resolving the steps of a status and the per-step outcomes
// of running them, nested through move_status re-entries and trigger actions.

use tracing::debug;

use super::errors::{ConfigurationError, StepError};
use super::model::{EventId, FunctionOrderId, FunctionStep, Status};
use crate::notifications::MessageId;
use crate::repository::{RepositoryError, WorkflowRepository};

/// Steps configured for `status`, restricted to `event` when the application
/// belongs to one and across all events otherwise. Read fresh on every call.
pub async fn resolve(
    repository: &dyn WorkflowRepository,
    status: &Status,
    event: Option<EventId>,
) -> Result<Vec<FunctionStep>, RepositoryError> {
    let steps = repository.resolve_chain(status.id, event).await?;
    debug!(status = %status.name, ?event, steps = steps.len(), "Resolved function chain");
    Ok(steps)
}

#[derive(Debug)]
pub enum StepOutcome {
    /// A move_status robot re-entered the orchestrator.
    Moved { status: String, chain: ChainReport },
    Notified { message_id: MessageId },
    ConditionMet { actions: ChainReport },
    ConditionNotMet,
    Skipped { reason: String },
    Failed(StepError),
}

impl StepOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }

    pub fn is_recursion_limit(&self) -> bool {
        matches!(
            self,
            StepOutcome::Failed(StepError::Configuration(ConfigurationError::RecursionLimit { .. }))
        )
    }

    fn nested(&self) -> Option<&ChainReport> {
        match self {
            StepOutcome::Moved { chain, .. } => Some(chain),
            StepOutcome::ConditionMet { actions } => Some(actions),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct StepReport {
    pub step_id: FunctionOrderId,
    pub position: u32,
    pub label: String,
    pub outcome: StepOutcome,
}

impl StepReport {
    pub fn new(step: &FunctionStep, outcome: StepOutcome) -> Self {
        Self {
            step_id: step.id,
            position: step.position,
            label: step.label(),
            outcome,
        }
    }
}

/// What happened to every step of one chain, in execution order.
#[derive(Debug, Default)]
pub struct ChainReport {
    pub steps: Vec<StepReport>,
    /// Set when the chain could not be loaded at all.
    pub resolution_error: Option<String>,
}

impl ChainReport {
    pub fn unresolved(reason: impl ToString) -> Self {
        Self {
            steps: Vec::new(),
            resolution_error: Some(reason.to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Every step report including nested chains, depth first.
    pub fn walk(&self) -> Vec<&StepReport> {
        let mut all = Vec::new();
        for step in &self.steps {
            all.push(step);
            if let Some(nested) = step.outcome.nested() {
                all.extend(nested.walk());
            }
        }
        all
    }

    pub fn failures(&self) -> Vec<&StepReport> {
        self.walk()
            .into_iter()
            .filter(|step| step.outcome.is_failure())
            .collect()
    }

    pub fn notifications_sent(&self) -> usize {
        self.walk()
            .into_iter()
            .filter(|step| matches!(step.outcome, StepOutcome::Notified { .. }))
            .count()
    }
}
