/// Workflow fixtures: an event with ordered statuses, reusable robot/trigger
/// templates and a recording notification gateway.
use serde_json::{json, Value};
use std::sync::Arc;

use statusflow::repository::{InMemoryRepository, NewStatus, StepOwner, WorkflowRepository};
use statusflow::workflows::model::{
    ActionType, Application, ConditionType, NewApplication, NewFunction, NewRobot, NewTrigger,
    Robot, Status, StatusOrder, Trigger,
};
use statusflow::{EngineSettings, RecordingGateway, StateMachine};

pub const BOT_TOKEN: &str = "123456:TEST";

pub struct WorkflowFixture {
    pub repo: Arc<InMemoryRepository>,
    pub gateway: Arc<RecordingGateway>,
    pub event_id: i64,
    pub notify: Robot,
    pub mover: Robot,
}

impl WorkflowFixture {
    pub async fn new() -> Self {
        Self::with_gateway(RecordingGateway::new()).await
    }

    pub async fn with_gateway(gateway: RecordingGateway) -> Self {
        let repo = Arc::new(InMemoryRepository::new());
        let event = repo.create_event("Summer School").await.unwrap();
        let notify = repo
            .create_robot(NewRobot::new("notify participant", ActionType::Notification))
            .await
            .unwrap();
        let mover = repo
            .create_robot(NewRobot::new("advance", ActionType::MoveStatus))
            .await
            .unwrap();

        Self {
            repo,
            gateway: Arc::new(gateway),
            event_id: event.id,
            notify,
            mover,
        }
    }

    pub fn engine(&self) -> StateMachine {
        self.engine_with(EngineSettings::default())
    }

    pub fn engine_with(&self, settings: EngineSettings) -> StateMachine {
        StateMachine::with_settings(self.repo.clone(), self.gateway.clone(), settings)
    }

    /// Create a status and append it to the event's ordering.
    pub async fn status(&self, name: &str) -> (Status, StatusOrder) {
        let status = self.repo.create_status(NewStatus::new(name)).await.unwrap();
        let count = self.repo.list_statuses(self.event_id).await.unwrap().len() as i64;
        let order = self
            .repo
            .insert_status_order(self.event_id, status.id, count + 1)
            .await
            .unwrap();
        (status, order)
    }

    pub async fn trigger(&self, name: &str, condition: ConditionType) -> Trigger {
        self.repo
            .create_trigger(NewTrigger::new(name, condition))
            .await
            .unwrap()
    }

    /// Append a step to `owner`.
    pub async fn push(&self, owner: StepOwner, step: NewFunction) {
        let count = self
            .repo
            .slots(owner.into())
            .await
            .unwrap()
            .len() as i64;
        self.repo.insert_step(owner, step, count + 1).await.unwrap();
    }

    pub fn notification(&self, message: &str) -> NewFunction {
        NewFunction::robot(
            self.notify.id,
            json!({"bot_token": BOT_TOKEN, "chat_id": 1001, "message": message}),
        )
    }

    pub fn move_to(&self, status: &str) -> NewFunction {
        NewFunction::robot(self.mover.id, json!({"target_status": status}))
    }

    pub async fn application(&self, status: &Status) -> Application {
        self.application_with(status, |_| {}).await
    }

    pub async fn application_with(
        &self,
        status: &Status,
        customize: impl FnOnce(&mut NewApplication),
    ) -> Application {
        let mut new = NewApplication::new(Some(self.event_id), status.id);
        customize(&mut new);
        self.repo.create_application(new).await.unwrap()
    }

    pub async fn current_status(&self, application_id: i64) -> String {
        self.repo
            .get_application(application_id)
            .await
            .unwrap()
            .status
            .name
    }
}

pub fn trigger_step(trigger: &Trigger, config: Value) -> NewFunction {
    NewFunction::trigger(trigger.id, config)
}
