// Workflow domain types: statuses, positioned steps, robot/trigger templates
// and the application that moves through them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type ApplicationId = i64;
pub type EventId = i64;
pub type StatusId = i64;
pub type StatusOrderId = i64;
pub type FunctionOrderId = i64;
pub type RobotId = i64;
pub type TriggerId = i64;

/// A named stage of an event workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub id: StatusId,
    pub name: String,
    pub description: Option<String>,
    pub is_positive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub name: String,
}

/// Positioned association of a status with an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusOrder {
    pub id: StatusOrderId,
    pub event_id: EventId,
    pub status_id: StatusId,
    pub position: u32,
}

/// Discriminator stored alongside every positioned step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    Robot,
    Trigger,
}

impl FunctionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionKind::Robot => "robot",
            FunctionKind::Trigger => "trigger",
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FunctionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "robot" => Ok(FunctionKind::Robot),
            "trigger" => Ok(FunctionKind::Trigger),
            other => Err(other.to_string()),
        }
    }
}

/// The single template a step points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum StepTarget {
    Robot(RobotId),
    Trigger(TriggerId),
}

impl StepTarget {
    pub fn kind(&self) -> FunctionKind {
        match self {
            StepTarget::Robot(_) => FunctionKind::Robot,
            StepTarget::Trigger(_) => FunctionKind::Trigger,
        }
    }

    pub fn robot_id(&self) -> Option<RobotId> {
        match self {
            StepTarget::Robot(id) => Some(*id),
            StepTarget::Trigger(_) => None,
        }
    }

    pub fn trigger_id(&self) -> Option<TriggerId> {
        match self {
            StepTarget::Trigger(id) => Some(*id),
            StepTarget::Robot(_) => None,
        }
    }

    /// Rebuild a target from the stored discriminator and nullable columns.
    pub fn from_columns(
        kind: FunctionKind,
        robot_id: Option<RobotId>,
        trigger_id: Option<TriggerId>,
    ) -> Option<Self> {
        match (kind, robot_id, trigger_id) {
            (FunctionKind::Robot, Some(id), None) => Some(StepTarget::Robot(id)),
            (FunctionKind::Trigger, None, Some(id)) => Some(StepTarget::Trigger(id)),
            _ => None,
        }
    }
}

/// Operator-authored positioned step, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionOrder {
    pub id: FunctionOrderId,
    pub position: u32,
    pub target: StepTarget,
    /// Raw JSON object text; its shape depends on the template category.
    pub config: String,
}

/// Input for creating a positioned step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFunction {
    pub target: StepTarget,
    pub config: String,
}

impl NewFunction {
    pub fn robot(robot_id: RobotId, config: serde_json::Value) -> Self {
        Self {
            target: StepTarget::Robot(robot_id),
            config: config.to_string(),
        }
    }

    pub fn trigger(trigger_id: TriggerId, config: serde_json::Value) -> Self {
        Self {
            target: StepTarget::Trigger(trigger_id),
            config: config.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    MoveStatus,
    Notification,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::MoveStatus => "move_status",
            ActionType::Notification => "notification",
        }
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "move_status" => Ok(ActionType::MoveStatus),
            "notification" => Ok(ActionType::Notification),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    TimeExpiration,
    StatusCheck,
    FieldComparison,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::TimeExpiration => "time_expiration",
            ConditionType::StatusCheck => "status_check",
            ConditionType::FieldComparison => "field_comparison",
        }
    }
}

impl FromStr for ConditionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "time_expiration" => Ok(ConditionType::TimeExpiration),
            "status_check" => Ok(ConditionType::StatusCheck),
            "field_comparison" => Ok(ConditionType::FieldComparison),
            other => Err(other.to_string()),
        }
    }
}

/// Reusable automated-action template.
///
/// `action_type` is kept as stored text and decoded into [`ActionType`]
/// when a step is executed; unknown values fail only that step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Robot {
    pub id: RobotId,
    pub name: String,
    pub description: Option<String>,
    pub action_type: String,
    pub active: bool,
    pub parameters_template: String,
}

/// Reusable condition template. Its cascading actions live in the
/// trigger-action scope of the position store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: TriggerId,
    pub name: String,
    pub description: Option<String>,
    pub condition_type: String,
    pub active: bool,
    pub parameters_template: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRobot {
    pub name: String,
    pub description: Option<String>,
    pub action_type: ActionType,
    pub active: bool,
    pub parameters_template: String,
}

impl NewRobot {
    pub fn new(name: impl Into<String>, action_type: ActionType) -> Self {
        Self {
            name: name.into(),
            description: None,
            action_type,
            active: true,
            parameters_template: "{}".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrigger {
    pub name: String,
    pub description: Option<String>,
    pub condition_type: ConditionType,
    pub active: bool,
    pub parameters_template: String,
}

impl NewTrigger {
    pub fn new(name: impl Into<String>, condition_type: ConditionType) -> Self {
        Self {
            name: name.into(),
            description: None,
            condition_type,
            active: true,
            parameters_template: "{}".to_string(),
        }
    }
}

/// Resolved template a chain step refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepTemplate {
    Robot(Robot),
    Trigger(Trigger),
}

impl StepTemplate {
    pub fn kind(&self) -> FunctionKind {
        match self {
            StepTemplate::Robot(_) => FunctionKind::Robot,
            StepTemplate::Trigger(_) => FunctionKind::Trigger,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            StepTemplate::Robot(robot) => &robot.name,
            StepTemplate::Trigger(trigger) => &trigger.name,
        }
    }

    pub fn is_active(&self) -> bool {
        match self {
            StepTemplate::Robot(robot) => robot.active,
            StepTemplate::Trigger(trigger) => trigger.active,
        }
    }
}

/// One executable entry of a chain: the stored step joined with its template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionStep {
    pub id: FunctionOrderId,
    pub position: u32,
    pub template: StepTemplate,
    pub config: String,
}

impl FunctionStep {
    pub fn label(&self) -> String {
        format!(
            "#{} {} '{}'",
            self.position,
            self.template.kind(),
            self.template.name()
        )
    }
}

/// Applicant attributes carried by an application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicantProfile {
    pub surname: Option<String>,
    pub name: Option<String>,
    pub patronymic: Option<String>,
    pub course: Option<i64>,
    pub university: Option<String>,
    pub job: Option<String>,
    pub telegram: Option<String>,
    pub email: Option<String>,
}

/// A participant's submission tracked through a status workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub event_id: Option<EventId>,
    pub status: Status,
    pub message: Option<String>,
    pub comment: Option<String>,
    pub is_link: bool,
    pub is_approved: bool,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub date_end: Option<DateTime<Utc>>,
    pub profile: ApplicantProfile,
}

/// Input for registering an application with the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct NewApplication {
    pub event_id: Option<EventId>,
    pub status_id: StatusId,
    pub message: Option<String>,
    pub comment: Option<String>,
    pub is_link: bool,
    pub is_approved: bool,
    pub date_end: Option<DateTime<Utc>>,
    pub profile: ApplicantProfile,
}

impl NewApplication {
    pub fn new(event_id: Option<EventId>, status_id: StatusId) -> Self {
        Self {
            event_id,
            status_id,
            message: None,
            comment: None,
            is_link: false,
            is_approved: false,
            date_end: None,
            profile: ApplicantProfile::default(),
        }
    }
}
