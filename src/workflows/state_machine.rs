// Status transitions: commit the new status atomically, then run the status's
// function chain best-effort.
//
// Only the status write decides success. Chain steps run after the commit,
// one at a time, and report their failures in the ChainReport.

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument};

use super::chain::{self, ChainReport, StepOutcome, StepReport};
use super::errors::TransitionError;
use super::executor::ActionExecutor;
use super::model::{Application, ApplicationId, FunctionStep, Status};
use super::triggers::TriggerEvaluator;
use crate::notifications::{NotificationGateway, ParseMode};
use crate::observability::engine_metrics;
use crate::repository::WorkflowRepository;
use crate::telemetry::{create_transition_span, generate_correlation_id};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Maximum nesting of move_status re-entries and trigger actions.
    pub max_chain_depth: usize,
    pub notification_timeout: Duration,
    /// Used by notification steps that do not choose a parse mode.
    pub default_parse_mode: Option<ParseMode>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_chain_depth: 16,
            notification_timeout: Duration::from_secs(10),
            default_parse_mode: Some(ParseMode::Html),
        }
    }
}

/// Outcome of [`StateMachine::transition`]: whether the status write committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionResult {
    pub ok: bool,
    pub message: String,
}

/// A committed transition with the report of its chain.
#[derive(Debug)]
pub struct Transitioned {
    pub application: Application,
    pub previous_status: Status,
    pub chain: ChainReport,
    pub correlation_id: String,
}

pub struct StateMachine {
    repository: Arc<dyn WorkflowRepository>,
    executor: ActionExecutor,
    settings: EngineSettings,
}

impl StateMachine {
    pub fn new(
        repository: Arc<dyn WorkflowRepository>,
        gateway: Arc<dyn NotificationGateway>,
    ) -> Self {
        Self::with_settings(repository, gateway, EngineSettings::default())
    }

    pub fn with_settings(
        repository: Arc<dyn WorkflowRepository>,
        gateway: Arc<dyn NotificationGateway>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            repository,
            executor: ActionExecutor::new(gateway, TriggerEvaluator::default()),
            settings,
        }
    }

    /// Replace the trigger evaluator, e.g. to expose a different field set.
    pub fn with_evaluator(mut self, evaluator: TriggerEvaluator) -> Self {
        self.executor = ActionExecutor::new(self.executor.gateway(), evaluator);
        self
    }

    pub fn repository(&self) -> &Arc<dyn WorkflowRepository> {
        &self.repository
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Move an application to the status named `new_status_name`.
    ///
    /// `ok` is true iff the status write committed; chain failures only show
    /// up in the logs and in [`Self::transition_detailed`]'s report.
    pub async fn transition(
        &self,
        application_id: ApplicationId,
        new_status_name: &str,
    ) -> TransitionResult {
        match self.transition_detailed(application_id, new_status_name).await {
            Ok(done) => {
                let failures = done.chain.failures().len();
                TransitionResult {
                    ok: true,
                    message: format!(
                        "Application {} moved from '{}' to '{}'; {} chain step(s) run, {} failed",
                        application_id,
                        done.previous_status.name,
                        new_status_name,
                        done.chain.walk().len(),
                        failures
                    ),
                }
            }
            Err(e) => TransitionResult {
                ok: false,
                message: e.to_string(),
            },
        }
    }

    pub async fn transition_detailed(
        &self,
        application_id: ApplicationId,
        new_status_name: &str,
    ) -> Result<Transitioned, TransitionError> {
        self.transition_at_depth(application_id, new_status_name, 0)
            .await
    }

    pub(crate) fn transition_at_depth<'a>(
        &'a self,
        application_id: ApplicationId,
        new_status_name: &'a str,
        depth: usize,
    ) -> BoxFuture<'a, Result<Transitioned, TransitionError>> {
        let correlation_id = generate_correlation_id();
        let span = create_transition_span(application_id, new_status_name, depth, &correlation_id);

        async move {
            let result = self
                .commit_and_run(application_id, new_status_name, depth, correlation_id)
                .await;
            if let Err(e) = &result {
                engine_metrics().record_transition_rejected();
                warn!(error = %e, "Transition rejected");
            }
            result
        }
        .instrument(span)
        .boxed()
    }

    async fn commit_and_run(
        &self,
        application_id: ApplicationId,
        new_status_name: &str,
        depth: usize,
        correlation_id: String,
    ) -> Result<Transitioned, TransitionError> {
        let current = self
            .repository
            .get_application(application_id)
            .await
            .map_err(|e| not_found_as(application_id, e))?;

        let status = self
            .repository
            .find_status(new_status_name)
            .await?
            .ok_or_else(|| TransitionError::UnknownStatus(new_status_name.to_string()))?;

        let application = self
            .repository
            .commit_status(application_id, &status, Utc::now())
            .await
            .map_err(|e| not_found_as(application_id, e))?;

        engine_metrics().record_transition_committed();
        info!(
            from = %current.status.name,
            to = %status.name,
            "Status committed"
        );

        let chain = match chain::resolve(self.repository.as_ref(), &status, application.event_id)
            .await
        {
            Ok(steps) => self.run_chain(&steps, application_id, depth).await,
            Err(e) => {
                warn!(error = %e, "Could not resolve function chain");
                ChainReport::unresolved(e)
            }
        };

        Ok(Transitioned {
            application,
            previous_status: current.status,
            chain,
            correlation_id,
        })
    }

    /// Execute `steps` strictly in order; a failing step never stops the rest.
    pub(crate) async fn run_chain(
        &self,
        steps: &[FunctionStep],
        application_id: ApplicationId,
        depth: usize,
    ) -> ChainReport {
        let mut report = ChainReport::default();
        for step in steps {
            let outcome = self
                .executor
                .execute(self, step, application_id, depth)
                .await;

            let metrics = engine_metrics();
            metrics.record_step_executed();
            match &outcome {
                StepOutcome::Failed(e) if outcome.is_recursion_limit() => {
                    metrics.record_step_failed();
                    error!(step = %step.label(), error = %e, "Chain depth limit reached");
                }
                StepOutcome::Failed(e) => {
                    metrics.record_step_failed();
                    warn!(step = %step.label(), error = %e, "Chain step failed");
                }
                StepOutcome::Skipped { reason } => {
                    metrics.record_step_skipped();
                    info!(step = %step.label(), reason = %reason, "Chain step skipped");
                }
                _ => {}
            }

            report.steps.push(StepReport::new(step, outcome));
        }
        report
    }
}

fn not_found_as(application_id: ApplicationId, err: crate::repository::RepositoryError) -> TransitionError {
    if err.is_not_found() {
        TransitionError::ApplicationNotFound(application_id)
    } else {
        TransitionError::Repository(err)
    }
}
