use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tracing::{debug, info};

use super::actions::{Action, MoveStatusConfig, NotificationConfig};
use super::chain::StepOutcome;
use super::errors::{ConfigurationError, StepError};
use super::model::{ApplicationId, FunctionStep, Robot, StepTemplate, Trigger};
use super::state_machine::StateMachine;
use super::triggers::{Condition, TriggerEvaluator};
use crate::notifications::{NotificationGateway, OutgoingMessage};
use crate::observability::engine_metrics;

/// Runs one chain step: a robot action or a trigger with its cascading actions.
pub struct ActionExecutor {
    gateway: Arc<dyn NotificationGateway>,
    evaluator: TriggerEvaluator,
}

impl ActionExecutor {
    pub fn new(gateway: Arc<dyn NotificationGateway>, evaluator: TriggerEvaluator) -> Self {
        Self { gateway, evaluator }
    }

    pub fn gateway(&self) -> Arc<dyn NotificationGateway> {
        self.gateway.clone()
    }

    pub fn evaluator(&self) -> &TriggerEvaluator {
        &self.evaluator
    }

    /// Execute `step` for `application_id` at nesting `depth`. Never fails:
    /// errors are reported as [`StepOutcome::Failed`].
    pub fn execute<'a>(
        &'a self,
        engine: &'a StateMachine,
        step: &'a FunctionStep,
        application_id: ApplicationId,
        depth: usize,
    ) -> BoxFuture<'a, StepOutcome> {
        async move {
            if !step.template.is_active() {
                return StepOutcome::Skipped {
                    reason: format!("{} '{}' is inactive", step.template.kind(), step.template.name()),
                };
            }

            let result = match &step.template {
                StepTemplate::Robot(robot) => {
                    self.run_robot(engine, robot, &step.config, application_id, depth)
                        .await
                }
                StepTemplate::Trigger(trigger) => {
                    self.run_trigger(engine, trigger, &step.config, application_id, depth)
                        .await
                }
            };
            result.unwrap_or_else(StepOutcome::Failed)
        }
        .boxed()
    }

    async fn run_robot(
        &self,
        engine: &StateMachine,
        robot: &Robot,
        config: &str,
        application_id: ApplicationId,
        depth: usize,
    ) -> Result<StepOutcome, StepError> {
        match Action::parse(&robot.action_type, config)? {
            Action::MoveStatus(config) => self.move_status(engine, &config, application_id, depth).await,
            Action::Notification(config) => self.notify(engine, &config, application_id).await,
        }
    }

    async fn move_status(
        &self,
        engine: &StateMachine,
        config: &MoveStatusConfig,
        application_id: ApplicationId,
        depth: usize,
    ) -> Result<StepOutcome, StepError> {
        let next = nested_depth(engine, depth)?;
        debug!(target_status = %config.target_status, depth = next, "Re-entering transition");
        let transitioned = engine
            .transition_at_depth(application_id, &config.target_status, next)
            .await?;
        Ok(StepOutcome::Moved {
            status: transitioned.application.status.name,
            chain: transitioned.chain,
        })
    }

    async fn notify(
        &self,
        engine: &StateMachine,
        config: &NotificationConfig,
        application_id: ApplicationId,
    ) -> Result<StepOutcome, StepError> {
        // Re-read so the text reflects moves made by earlier steps.
        let application = engine.repository().get_application(application_id).await?;
        let settings = engine.settings();
        let message = OutgoingMessage {
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            text: config.render(&application.status.name),
            parse_mode: config.resolve_parse_mode(settings.default_parse_mode),
        };

        let sent = tokio::time::timeout(settings.notification_timeout, self.gateway.send(&message))
            .await
            .map_err(|_| StepError::timeout(settings.notification_timeout))
            .and_then(|result| result.map_err(StepError::from));

        match sent {
            Ok(message_id) => {
                engine_metrics().record_notification_sent();
                info!(chat_id = %message.chat_id, message_id, "Notification sent");
                Ok(StepOutcome::Notified { message_id })
            }
            Err(e) => {
                engine_metrics().record_notification_failed();
                Err(e)
            }
        }
    }

    async fn run_trigger(
        &self,
        engine: &StateMachine,
        trigger: &Trigger,
        config: &str,
        application_id: ApplicationId,
        depth: usize,
    ) -> Result<StepOutcome, StepError> {
        let condition = Condition::parse(&trigger.condition_type, config)?;
        let application = engine.repository().get_application(application_id).await?;

        if !self.evaluator.evaluate(&condition, &application)? {
            debug!(trigger = %trigger.name, "Condition not met");
            return Ok(StepOutcome::ConditionNotMet);
        }

        let next = nested_depth(engine, depth)?;
        let actions = engine.repository().trigger_actions(trigger.id).await?;
        debug!(trigger = %trigger.name, actions = actions.len(), "Condition met");
        let report = engine.run_chain(&actions, application_id, next).await;
        Ok(StepOutcome::ConditionMet { actions: report })
    }
}

fn nested_depth(engine: &StateMachine, depth: usize) -> Result<usize, ConfigurationError> {
    let max_depth = engine.settings().max_chain_depth;
    if depth >= max_depth {
        return Err(ConfigurationError::RecursionLimit { max_depth });
    }
    Ok(depth + 1)
}
