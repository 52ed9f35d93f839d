//! In-memory implementation of `WorkflowRepository`.
//!
//! All tables live behind one `RwLock`; every write operation holds the write
//! guard for its whole duration, which makes each one atomic. State is lost
//! on restart.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    validate_json, validate_json_object, NewStatus, OrderedStatus, RepositoryError, StepOwner,
    WorkflowRepository,
};
use crate::workflows::model::{
    Application, ApplicationId, Event, EventId, FunctionOrder, FunctionStep, NewApplication,
    NewFunction, NewRobot, NewTrigger, Robot, RobotId, Status, StatusId, StatusOrder, StepTarget,
    StepTemplate, Trigger, TriggerId,
};
use crate::workflows::positions::{self, PositionScope, Shift, Slot};

#[derive(Debug, Clone)]
struct StoredStep {
    owner: StepOwner,
    order: FunctionOrder,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    events: BTreeMap<EventId, Event>,
    statuses: BTreeMap<StatusId, Status>,
    robots: BTreeMap<RobotId, Robot>,
    triggers: BTreeMap<TriggerId, Trigger>,
    applications: BTreeMap<ApplicationId, Application>,
    status_orders: BTreeMap<i64, StatusOrder>,
    steps: BTreeMap<i64, StoredStep>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_scope(&self, scope: PositionScope) -> Result<(), RepositoryError> {
        let exists = match scope {
            PositionScope::Event(id) => self.events.contains_key(&id),
            PositionScope::StatusOrder(id) => self.status_orders.contains_key(&id),
            PositionScope::TriggerActions(id) => self.triggers.contains_key(&id),
        };
        if exists {
            Ok(())
        } else {
            Err(match scope {
                PositionScope::Event(id) => RepositoryError::not_found("event", id),
                PositionScope::StatusOrder(id) => RepositoryError::not_found("status order", id),
                PositionScope::TriggerActions(id) => RepositoryError::not_found("trigger", id),
            })
        }
    }

    fn slots(&self, scope: PositionScope) -> Vec<Slot> {
        match scope {
            PositionScope::Event(event) => self
                .status_orders
                .values()
                .filter(|order| order.event_id == event)
                .map(|order| Slot {
                    id: order.id,
                    position: order.position,
                })
                .collect(),
            PositionScope::StatusOrder(_) | PositionScope::TriggerActions(_) => self
                .steps
                .values()
                .filter(|step| PositionScope::from(step.owner) == scope)
                .map(|step| Slot {
                    id: step.order.id,
                    position: step.order.position,
                })
                .collect(),
        }
    }

    fn apply_shifts(&mut self, scope: PositionScope, shifts: &[Shift]) {
        for shift in shifts {
            match scope {
                PositionScope::Event(_) => {
                    if let Some(order) = self.status_orders.get_mut(&shift.id) {
                        order.position = shift.to;
                    }
                }
                PositionScope::StatusOrder(_) | PositionScope::TriggerActions(_) => {
                    if let Some(step) = self.steps.get_mut(&shift.id) {
                        step.order.position = shift.to;
                    }
                }
            }
        }
    }

    fn references(&self, target: StepTarget) -> usize {
        self.steps
            .values()
            .filter(|step| step.order.target == target)
            .count()
    }

    fn join(&self, order: &FunctionOrder) -> Result<FunctionStep, RepositoryError> {
        let template = match order.target {
            StepTarget::Robot(id) => StepTemplate::Robot(self.robots.get(&id).cloned().ok_or_else(
                || RepositoryError::Corrupt(format!("step {} references missing robot {id}", order.id)),
            )?),
            StepTarget::Trigger(id) => {
                StepTemplate::Trigger(self.triggers.get(&id).cloned().ok_or_else(|| {
                    RepositoryError::Corrupt(format!(
                        "step {} references missing trigger {id}",
                        order.id
                    ))
                })?)
            }
        };
        Ok(FunctionStep {
            id: order.id,
            position: order.position,
            template,
            config: order.config.clone(),
        })
    }

    fn steps_of(&self, owner: StepOwner) -> Result<Vec<FunctionStep>, RepositoryError> {
        let mut orders: Vec<&FunctionOrder> = self
            .steps
            .values()
            .filter(|step| step.owner == owner)
            .map(|step| &step.order)
            .collect();
        orders.sort_by_key(|order| order.position);
        orders.into_iter().map(|order| self.join(order)).collect()
    }
}

/// In-memory workflow repository.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite an application's last-modified timestamp. Intended for
    /// seeding fixtures and tests of time-based triggers.
    pub async fn set_updated_at(
        &self,
        id: ApplicationId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let application = tables
            .applications
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found("application", id))?;
        application.updated_at = at;
        Ok(())
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryRepository {
    async fn get_application(&self, id: ApplicationId) -> Result<Application, RepositoryError> {
        let tables = self.tables.read().await;
        tables
            .applications
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("application", id))
    }

    async fn find_status(&self, name: &str) -> Result<Option<Status>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.statuses.values().find(|s| s.name == name).cloned())
    }

    async fn commit_status(
        &self,
        id: ApplicationId,
        status: &Status,
        at: DateTime<Utc>,
    ) -> Result<Application, RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.statuses.contains_key(&status.id) {
            return Err(RepositoryError::not_found("status", &status.name));
        }
        let application = tables
            .applications
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found("application", id))?;
        application.status = status.clone();
        application.updated_at = at;
        Ok(application.clone())
    }

    async fn resolve_chain(
        &self,
        status: StatusId,
        event: Option<EventId>,
    ) -> Result<Vec<FunctionStep>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut orders: Vec<&StatusOrder> = tables
            .status_orders
            .values()
            .filter(|order| order.status_id == status)
            .filter(|order| event.map_or(true, |event| order.event_id == event))
            .collect();
        orders.sort_by_key(|order| (order.event_id, order.position));

        let mut chain = Vec::new();
        for order in orders {
            chain.extend(tables.steps_of(StepOwner::StatusOrder(order.id))?);
        }
        Ok(chain)
    }

    async fn trigger_actions(
        &self,
        trigger: TriggerId,
    ) -> Result<Vec<FunctionStep>, RepositoryError> {
        let tables = self.tables.read().await;
        tables.steps_of(StepOwner::Trigger(trigger))
    }

    async fn list_statuses(&self, event: EventId) -> Result<Vec<OrderedStatus>, RepositoryError> {
        let tables = self.tables.read().await;
        tables.ensure_scope(PositionScope::Event(event))?;
        let mut listed = Vec::new();
        for order in tables.status_orders.values().filter(|o| o.event_id == event) {
            let status = tables.statuses.get(&order.status_id).cloned().ok_or_else(|| {
                RepositoryError::Corrupt(format!("status order {} has no status", order.id))
            })?;
            listed.push(OrderedStatus {
                order: order.clone(),
                status,
            });
        }
        listed.sort_by_key(|entry| entry.order.position);
        Ok(listed)
    }

    async fn create_event(&self, name: &str) -> Result<Event, RepositoryError> {
        let mut tables = self.tables.write().await;
        let event = Event {
            id: tables.allocate_id(),
            name: name.to_string(),
        };
        tables.events.insert(event.id, event.clone());
        Ok(event)
    }

    async fn create_status(&self, status: NewStatus) -> Result<Status, RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.statuses.values().any(|s| s.name == status.name) {
            return Err(RepositoryError::Duplicate {
                entity: "status",
                key: status.name,
            });
        }
        let status = Status {
            id: tables.allocate_id(),
            name: status.name,
            description: status.description,
            is_positive: status.is_positive,
        };
        tables.statuses.insert(status.id, status.clone());
        Ok(status)
    }

    async fn create_robot(&self, robot: NewRobot) -> Result<Robot, RepositoryError> {
        validate_json("parameters_template", &robot.parameters_template)?;
        let mut tables = self.tables.write().await;
        let robot = Robot {
            id: tables.allocate_id(),
            name: robot.name,
            description: robot.description,
            action_type: robot.action_type.as_str().to_string(),
            active: robot.active,
            parameters_template: robot.parameters_template,
        };
        tables.robots.insert(robot.id, robot.clone());
        Ok(robot)
    }

    async fn create_trigger(&self, trigger: NewTrigger) -> Result<Trigger, RepositoryError> {
        validate_json("parameters_template", &trigger.parameters_template)?;
        let mut tables = self.tables.write().await;
        let trigger = Trigger {
            id: tables.allocate_id(),
            name: trigger.name,
            description: trigger.description,
            condition_type: trigger.condition_type.as_str().to_string(),
            active: trigger.active,
            parameters_template: trigger.parameters_template,
        };
        tables.triggers.insert(trigger.id, trigger.clone());
        Ok(trigger)
    }

    async fn delete_robot(&self, id: RobotId) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.robots.contains_key(&id) {
            return Err(RepositoryError::not_found("robot", id));
        }
        let references = tables.references(StepTarget::Robot(id));
        if references > 0 {
            return Err(RepositoryError::InUse {
                entity: "robot",
                id,
                references,
            });
        }
        tables.robots.remove(&id);
        Ok(())
    }

    async fn delete_trigger(&self, id: TriggerId) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.triggers.contains_key(&id) {
            return Err(RepositoryError::not_found("trigger", id));
        }
        let references = tables.references(StepTarget::Trigger(id));
        if references > 0 {
            return Err(RepositoryError::InUse {
                entity: "trigger",
                id,
                references,
            });
        }
        tables.steps.retain(|_, step| step.owner != StepOwner::Trigger(id));
        tables.triggers.remove(&id);
        Ok(())
    }

    async fn create_application(
        &self,
        application: NewApplication,
    ) -> Result<Application, RepositoryError> {
        let mut tables = self.tables.write().await;
        let status = tables
            .statuses
            .get(&application.status_id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("status", application.status_id))?;
        if let Some(event) = application.event_id {
            tables.ensure_scope(PositionScope::Event(event))?;
        }
        let now = Utc::now();
        let created = Application {
            id: tables.allocate_id(),
            event_id: application.event_id,
            status,
            message: application.message,
            comment: application.comment,
            is_link: application.is_link,
            is_approved: application.is_approved,
            submitted_at: now,
            updated_at: now,
            date_end: application.date_end,
            profile: application.profile,
        };
        tables.applications.insert(created.id, created.clone());
        Ok(created)
    }

    async fn insert_status_order(
        &self,
        event: EventId,
        status: StatusId,
        position: i64,
    ) -> Result<StatusOrder, RepositoryError> {
        let scope = PositionScope::Event(event);
        let mut tables = self.tables.write().await;
        tables.ensure_scope(scope)?;
        if !tables.statuses.contains_key(&status) {
            return Err(RepositoryError::not_found("status", status));
        }
        let plan = positions::plan_insert(&tables.slots(scope), position)
            .map_err(|reason| RepositoryError::InvalidPosition { scope, reason })?;
        tables.apply_shifts(scope, &plan.shifts);

        let order = StatusOrder {
            id: tables.allocate_id(),
            event_id: event,
            status_id: status,
            position: plan.position,
        };
        tables.status_orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn insert_step(
        &self,
        owner: StepOwner,
        step: NewFunction,
        position: i64,
    ) -> Result<FunctionOrder, RepositoryError> {
        validate_json_object("config", &step.config)?;
        let scope = PositionScope::from(owner);
        let mut tables = self.tables.write().await;
        tables.ensure_scope(scope)?;
        match step.target {
            StepTarget::Robot(id) if !tables.robots.contains_key(&id) => {
                return Err(RepositoryError::not_found("robot", id));
            }
            StepTarget::Trigger(id) if !tables.triggers.contains_key(&id) => {
                return Err(RepositoryError::not_found("trigger", id));
            }
            _ => {}
        }
        let plan = positions::plan_insert(&tables.slots(scope), position)
            .map_err(|reason| RepositoryError::InvalidPosition { scope, reason })?;
        tables.apply_shifts(scope, &plan.shifts);

        let order = FunctionOrder {
            id: tables.allocate_id(),
            position: plan.position,
            target: step.target,
            config: step.config,
        };
        tables.steps.insert(
            order.id,
            StoredStep {
                owner,
                order: order.clone(),
            },
        );
        Ok(order)
    }

    async fn move_item(
        &self,
        scope: PositionScope,
        item: i64,
        position: i64,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.ensure_scope(scope)?;
        let shifts = positions::plan_move(&tables.slots(scope), item, position)
            .map_err(|reason| RepositoryError::InvalidPosition { scope, reason })?
            .ok_or_else(|| RepositoryError::not_found("positioned item", item))?;
        tables.apply_shifts(scope, &shifts);
        Ok(())
    }

    async fn delete_item(&self, scope: PositionScope, item: i64) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.ensure_scope(scope)?;
        let shifts = positions::plan_delete(&tables.slots(scope), item)
            .ok_or_else(|| RepositoryError::not_found("positioned item", item))?;
        match scope {
            PositionScope::Event(_) => {
                tables.status_orders.remove(&item);
                tables
                    .steps
                    .retain(|_, step| step.owner != StepOwner::StatusOrder(item));
            }
            PositionScope::StatusOrder(_) | PositionScope::TriggerActions(_) => {
                tables.steps.remove(&item);
            }
        }
        tables.apply_shifts(scope, &shifts);
        Ok(())
    }

    async fn slots(&self, scope: PositionScope) -> Result<Vec<Slot>, RepositoryError> {
        let tables = self.tables.read().await;
        tables.ensure_scope(scope)?;
        let mut slots = tables.slots(scope);
        slots.sort_by_key(|slot| slot.position);
        Ok(slots)
    }
}
