//! SQLite implementation of `WorkflowRepository`.
//!
//! Each write operation runs in its own transaction. Position shifts are
//! applied in two phases (negate, then flip back) so the per-scope UNIQUE
//! indexes never see a transient duplicate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use super::{
    validate_json, validate_json_object, NewStatus, OrderedStatus, RepositoryError, StepOwner,
    WorkflowRepository,
};
use crate::database::DatabaseManager;
use crate::workflows::model::{
    ApplicantProfile, Application, ApplicationId, Event, EventId, FunctionKind, FunctionOrder,
    FunctionStep, NewApplication, NewFunction, NewRobot, NewTrigger, Robot, RobotId, Status,
    StatusId, StatusOrder, StepTarget, StepTemplate, Trigger, TriggerId,
};
use crate::workflows::positions::{self, PositionScope, Shift, Slot};

const APPLICATION_SELECT: &str = r#"
    SELECT a.id, a.event_id, a.status_id,
           s.name AS status_name, s.description AS status_description,
           s.is_positive AS status_is_positive,
           a.message, a.comment, a.is_link, a.is_approved,
           a.submitted_at, a.updated_at, a.date_end,
           a.surname, a.name, a.patronymic, a.course, a.university, a.job,
           a.telegram, a.email
    FROM applications a
    JOIN statuses s ON s.id = a.status_id
"#;

const STEP_SELECT: &str = r#"
    SELECT f.id, f.position, f.type_function, f.robot_id, f.trigger_id, f.config,
           r.name AS robot_name, r.description AS robot_description,
           r.action_type, r.active AS robot_active,
           r.parameters_template AS robot_parameters,
           t.name AS trigger_name, t.description AS trigger_description,
           t.condition_type, t.active AS trigger_active,
           t.parameters_template AS trigger_parameters
    FROM function_orders f
    LEFT JOIN robots r ON r.id = f.robot_id
    LEFT JOIN triggers t ON t.id = f.trigger_id
"#;

/// Table, owning column and parent table of a position scope.
fn scope_columns(scope: PositionScope) -> (&'static str, &'static str, &'static str, i64) {
    match scope {
        PositionScope::Event(id) => ("status_orders", "event_id", "events", id),
        PositionScope::StatusOrder(id) => {
            ("function_orders", "status_order_id", "status_orders", id)
        }
        PositionScope::TriggerActions(id) => {
            ("function_orders", "owner_trigger_id", "triggers", id)
        }
    }
}

fn scope_entity(scope: PositionScope) -> &'static str {
    match scope {
        PositionScope::Event(_) => "event",
        PositionScope::StatusOrder(_) => "status order",
        PositionScope::TriggerActions(_) => "trigger",
    }
}

fn position_from(value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| RepositoryError::Corrupt(format!("stored position {value}")))
}

fn application_from_row(row: &SqliteRow) -> Result<Application, RepositoryError> {
    Ok(Application {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        status: Status {
            id: row.try_get("status_id")?,
            name: row.try_get("status_name")?,
            description: row.try_get("status_description")?,
            is_positive: row.try_get("status_is_positive")?,
        },
        message: row.try_get("message")?,
        comment: row.try_get("comment")?,
        is_link: row.try_get("is_link")?,
        is_approved: row.try_get("is_approved")?,
        submitted_at: row.try_get("submitted_at")?,
        updated_at: row.try_get("updated_at")?,
        date_end: row.try_get("date_end")?,
        profile: ApplicantProfile {
            surname: row.try_get("surname")?,
            name: row.try_get("name")?,
            patronymic: row.try_get("patronymic")?,
            course: row.try_get("course")?,
            university: row.try_get("university")?,
            job: row.try_get("job")?,
            telegram: row.try_get("telegram")?,
            email: row.try_get("email")?,
        },
    })
}

fn step_from_row(row: &SqliteRow) -> Result<FunctionStep, RepositoryError> {
    let id: i64 = row.try_get("id")?;
    let kind: String = row.try_get("type_function")?;
    let kind = kind
        .parse::<FunctionKind>()
        .map_err(|k| RepositoryError::Corrupt(format!("step {id} has unknown type '{k}'")))?;
    let target = StepTarget::from_columns(kind, row.try_get("robot_id")?, row.try_get("trigger_id")?)
        .ok_or_else(|| {
            RepositoryError::Corrupt(format!("step {id} reference does not match its type"))
        })?;

    let template = match target {
        StepTarget::Robot(robot_id) => StepTemplate::Robot(Robot {
            id: robot_id,
            name: row.try_get("robot_name")?,
            description: row.try_get("robot_description")?,
            action_type: row.try_get("action_type")?,
            active: row.try_get("robot_active")?,
            parameters_template: row.try_get("robot_parameters")?,
        }),
        StepTarget::Trigger(trigger_id) => StepTemplate::Trigger(Trigger {
            id: trigger_id,
            name: row.try_get("trigger_name")?,
            description: row.try_get("trigger_description")?,
            condition_type: row.try_get("condition_type")?,
            active: row.try_get("trigger_active")?,
            parameters_template: row.try_get("trigger_parameters")?,
        }),
    };

    Ok(FunctionStep {
        id,
        position: position_from(row.try_get("position")?)?,
        template,
        config: row.try_get("config")?,
    })
}

async fn fetch_application(
    conn: &mut SqliteConnection,
    id: ApplicationId,
) -> Result<Application, RepositoryError> {
    let row = sqlx::query(&format!("{APPLICATION_SELECT} WHERE a.id = ?1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| RepositoryError::not_found("application", id))?;
    application_from_row(&row)
}

async fn ensure_exists(
    conn: &mut SqliteConnection,
    table: &'static str,
    entity: &'static str,
    id: i64,
) -> Result<(), RepositoryError> {
    let found: Option<i64> = sqlx::query_scalar(&format!("SELECT id FROM {table} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    found
        .map(|_| ())
        .ok_or_else(|| RepositoryError::not_found(entity, id))
}

async fn ensure_scope(
    conn: &mut SqliteConnection,
    scope: PositionScope,
) -> Result<(), RepositoryError> {
    let (_, _, parent, id) = scope_columns(scope);
    ensure_exists(conn, parent, scope_entity(scope), id).await
}

async fn load_slots(
    conn: &mut SqliteConnection,
    scope: PositionScope,
) -> Result<Vec<Slot>, RepositoryError> {
    let (table, column, _, id) = scope_columns(scope);
    let rows = sqlx::query(&format!(
        "SELECT id, position FROM {table} WHERE {column} = ?1 ORDER BY position"
    ))
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(Slot {
                id: row.try_get("id")?,
                position: position_from(row.try_get("position")?)?,
            })
        })
        .collect()
}

async fn apply_shifts(
    conn: &mut SqliteConnection,
    scope: PositionScope,
    shifts: &[Shift],
) -> Result<(), RepositoryError> {
    if shifts.is_empty() {
        return Ok(());
    }
    let (table, column, _, id) = scope_columns(scope);
    for shift in shifts {
        sqlx::query(&format!("UPDATE {table} SET position = ?1 WHERE id = ?2"))
            .bind(-i64::from(shift.to))
            .bind(shift.id)
            .execute(&mut *conn)
            .await?;
    }
    sqlx::query(&format!(
        "UPDATE {table} SET position = -position WHERE {column} = ?1 AND position < 0"
    ))
    .bind(id)
    .execute(&mut *conn)
    .await?;
    debug!("Applied {} position shift(s) in {}", shifts.len(), scope);
    Ok(())
}

/// SQLite-backed workflow repository.
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn from_manager(manager: &DatabaseManager) -> Self {
        Self::new(manager.pool().clone())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Overwrite an application's last-modified timestamp. Intended for
    /// seeding fixtures and tests of time-based triggers.
    pub async fn set_updated_at(
        &self,
        id: ApplicationId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE applications SET updated_at = ?1 WHERE id = ?2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::not_found("application", id));
        }
        Ok(())
    }

    /// Delete a shared template unless a step still references it. The guarded
    /// DELETE runs first, so the write lock is held before references are
    /// counted and no step can be attached in between.
    async fn delete_template(
        &self,
        table: &'static str,
        entity: &'static str,
        column: &'static str,
        id: i64,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query(&format!(
            r#"
            DELETE FROM {table}
            WHERE id = ?1
              AND NOT EXISTS (SELECT 1 FROM function_orders WHERE {column} = ?1)
            "#
        ))
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if deleted.rows_affected() > 0 {
            tx.commit().await?;
            return Ok(());
        }

        let references: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM function_orders WHERE {column} = ?1"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        tx.rollback().await?;

        if references > 0 {
            Err(RepositoryError::InUse {
                entity,
                id,
                references: references as usize,
            })
        } else {
            Err(RepositoryError::not_found(entity, id))
        }
    }
}

#[async_trait]
impl WorkflowRepository for SqliteRepository {
    async fn get_application(&self, id: ApplicationId) -> Result<Application, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_application(&mut conn, id).await
    }

    async fn find_status(&self, name: &str) -> Result<Option<Status>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, description, is_positive FROM statuses WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(Status {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                is_positive: row.try_get("is_positive")?,
            })
        })
        .transpose()
    }

    async fn commit_status(
        &self,
        id: ApplicationId,
        status: &Status,
        at: DateTime<Utc>,
    ) -> Result<Application, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // The UPDATE is the first statement so the write lock is taken before
        // anything is read; a concurrent commit for the same row waits here.
        let updated = sqlx::query(
            r#"
            UPDATE applications
            SET status_id = ?1, updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(status.id)
        .bind(at)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::not_found("application", id));
        }

        let application = fetch_application(&mut tx, id).await?;
        tx.commit().await?;
        Ok(application)
    }

    async fn resolve_chain(
        &self,
        status: StatusId,
        event: Option<EventId>,
    ) -> Result<Vec<FunctionStep>, RepositoryError> {
        let rows = sqlx::query(&format!(
            r#"{STEP_SELECT}
            JOIN status_orders so ON so.id = f.status_order_id
            WHERE so.status_id = ?1 AND (?2 IS NULL OR so.event_id = ?2)
            ORDER BY so.event_id, so.position, f.position
            "#
        ))
        .bind(status)
        .bind(event)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(step_from_row).collect()
    }

    async fn trigger_actions(
        &self,
        trigger: TriggerId,
    ) -> Result<Vec<FunctionStep>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{STEP_SELECT} WHERE f.owner_trigger_id = ?1 ORDER BY f.position"
        ))
        .bind(trigger)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(step_from_row).collect()
    }

    async fn list_statuses(&self, event: EventId) -> Result<Vec<OrderedStatus>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        ensure_exists(&mut conn, "events", "event", event).await?;

        let rows = sqlx::query(
            r#"
            SELECT so.id, so.event_id, so.status_id, so.position,
                   s.name, s.description, s.is_positive
            FROM status_orders so
            JOIN statuses s ON s.id = so.status_id
            WHERE so.event_id = ?1
            ORDER BY so.position
            "#,
        )
        .bind(event)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(OrderedStatus {
                    order: StatusOrder {
                        id: row.try_get("id")?,
                        event_id: row.try_get("event_id")?,
                        status_id: row.try_get("status_id")?,
                        position: position_from(row.try_get("position")?)?,
                    },
                    status: Status {
                        id: row.try_get("status_id")?,
                        name: row.try_get("name")?,
                        description: row.try_get("description")?,
                        is_positive: row.try_get("is_positive")?,
                    },
                })
            })
            .collect()
    }

    async fn create_event(&self, name: &str) -> Result<Event, RepositoryError> {
        let result = sqlx::query("INSERT INTO events (name) VALUES (?1)")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(Event {
            id: result.last_insert_rowid(),
            name: name.to_string(),
        })
    }

    async fn create_status(&self, status: NewStatus) -> Result<Status, RepositoryError> {
        if self.find_status(&status.name).await?.is_some() {
            return Err(RepositoryError::Duplicate {
                entity: "status",
                key: status.name,
            });
        }
        let result =
            sqlx::query("INSERT INTO statuses (name, description, is_positive) VALUES (?1, ?2, ?3)")
                .bind(&status.name)
                .bind(&status.description)
                .bind(status.is_positive)
                .execute(&self.pool)
                .await?;
        Ok(Status {
            id: result.last_insert_rowid(),
            name: status.name,
            description: status.description,
            is_positive: status.is_positive,
        })
    }

    async fn create_robot(&self, robot: NewRobot) -> Result<Robot, RepositoryError> {
        validate_json("parameters_template", &robot.parameters_template)?;
        let result = sqlx::query(
            r#"
            INSERT INTO robots (name, description, action_type, active, parameters_template)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&robot.name)
        .bind(&robot.description)
        .bind(robot.action_type.as_str())
        .bind(robot.active)
        .bind(&robot.parameters_template)
        .execute(&self.pool)
        .await?;

        Ok(Robot {
            id: result.last_insert_rowid(),
            name: robot.name,
            description: robot.description,
            action_type: robot.action_type.as_str().to_string(),
            active: robot.active,
            parameters_template: robot.parameters_template,
        })
    }

    async fn create_trigger(&self, trigger: NewTrigger) -> Result<Trigger, RepositoryError> {
        validate_json("parameters_template", &trigger.parameters_template)?;
        let result = sqlx::query(
            r#"
            INSERT INTO triggers (name, description, condition_type, active, parameters_template)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&trigger.name)
        .bind(&trigger.description)
        .bind(trigger.condition_type.as_str())
        .bind(trigger.active)
        .bind(&trigger.parameters_template)
        .execute(&self.pool)
        .await?;

        Ok(Trigger {
            id: result.last_insert_rowid(),
            name: trigger.name,
            description: trigger.description,
            condition_type: trigger.condition_type.as_str().to_string(),
            active: trigger.active,
            parameters_template: trigger.parameters_template,
        })
    }

    async fn delete_robot(&self, id: RobotId) -> Result<(), RepositoryError> {
        self.delete_template("robots", "robot", "robot_id", id).await
    }

    /// The trigger's own action list goes with it through ON DELETE CASCADE.
    async fn delete_trigger(&self, id: TriggerId) -> Result<(), RepositoryError> {
        self.delete_template("triggers", "trigger", "trigger_id", id).await
    }

    async fn create_application(
        &self,
        application: NewApplication,
    ) -> Result<Application, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        ensure_exists(&mut tx, "statuses", "status", application.status_id).await?;
        if let Some(event) = application.event_id {
            ensure_exists(&mut tx, "events", "event", event).await?;
        }

        let now = Utc::now();
        let profile = &application.profile;
        let result = sqlx::query(
            r#"
            INSERT INTO applications (
                event_id, status_id, message, comment, is_link, is_approved,
                submitted_at, updated_at, date_end,
                surname, name, patronymic, course, university, job, telegram, email
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(application.event_id)
        .bind(application.status_id)
        .bind(&application.message)
        .bind(&application.comment)
        .bind(application.is_link)
        .bind(application.is_approved)
        .bind(now)
        .bind(application.date_end)
        .bind(&profile.surname)
        .bind(&profile.name)
        .bind(&profile.patronymic)
        .bind(profile.course)
        .bind(&profile.university)
        .bind(&profile.job)
        .bind(&profile.telegram)
        .bind(&profile.email)
        .execute(&mut *tx)
        .await?;

        let created = fetch_application(&mut tx, result.last_insert_rowid()).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn insert_status_order(
        &self,
        event: EventId,
        status: StatusId,
        position: i64,
    ) -> Result<StatusOrder, RepositoryError> {
        let scope = PositionScope::Event(event);
        let mut tx = self.pool.begin().await?;
        ensure_scope(&mut tx, scope).await?;
        ensure_exists(&mut tx, "statuses", "status", status).await?;

        let slots = load_slots(&mut tx, scope).await?;
        let plan = positions::plan_insert(&slots, position)
            .map_err(|reason| RepositoryError::InvalidPosition { scope, reason })?;
        apply_shifts(&mut tx, scope, &plan.shifts).await?;

        let result =
            sqlx::query("INSERT INTO status_orders (event_id, status_id, position) VALUES (?1, ?2, ?3)")
                .bind(event)
                .bind(status)
                .bind(i64::from(plan.position))
                .execute(&mut *tx)
                .await?;
        tx.commit().await?;

        Ok(StatusOrder {
            id: result.last_insert_rowid(),
            event_id: event,
            status_id: status,
            position: plan.position,
        })
    }

    async fn insert_step(
        &self,
        owner: StepOwner,
        step: NewFunction,
        position: i64,
    ) -> Result<FunctionOrder, RepositoryError> {
        validate_json_object("config", &step.config)?;
        let scope = PositionScope::from(owner);
        let mut tx = self.pool.begin().await?;
        ensure_scope(&mut tx, scope).await?;
        match step.target {
            StepTarget::Robot(id) => ensure_exists(&mut tx, "robots", "robot", id).await?,
            StepTarget::Trigger(id) => ensure_exists(&mut tx, "triggers", "trigger", id).await?,
        }

        let slots = load_slots(&mut tx, scope).await?;
        let plan = positions::plan_insert(&slots, position)
            .map_err(|reason| RepositoryError::InvalidPosition { scope, reason })?;
        apply_shifts(&mut tx, scope, &plan.shifts).await?;

        let (status_order_id, owner_trigger_id) = match owner {
            StepOwner::StatusOrder(id) => (Some(id), None),
            StepOwner::Trigger(id) => (None, Some(id)),
        };
        let result = sqlx::query(
            r#"
            INSERT INTO function_orders (
                status_order_id, owner_trigger_id, position, type_function,
                robot_id, trigger_id, config
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(status_order_id)
        .bind(owner_trigger_id)
        .bind(i64::from(plan.position))
        .bind(step.target.kind().as_str())
        .bind(step.target.robot_id())
        .bind(step.target.trigger_id())
        .bind(&step.config)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(FunctionOrder {
            id: result.last_insert_rowid(),
            position: plan.position,
            target: step.target,
            config: step.config,
        })
    }

    async fn move_item(
        &self,
        scope: PositionScope,
        item: i64,
        position: i64,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        ensure_scope(&mut tx, scope).await?;
        let slots = load_slots(&mut tx, scope).await?;
        let shifts = positions::plan_move(&slots, item, position)
            .map_err(|reason| RepositoryError::InvalidPosition { scope, reason })?
            .ok_or_else(|| RepositoryError::not_found("positioned item", item))?;
        apply_shifts(&mut tx, scope, &shifts).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_item(&self, scope: PositionScope, item: i64) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        ensure_scope(&mut tx, scope).await?;
        let slots = load_slots(&mut tx, scope).await?;
        let shifts = positions::plan_delete(&slots, item)
            .ok_or_else(|| RepositoryError::not_found("positioned item", item))?;

        // Steps of a deleted status order go with it through ON DELETE CASCADE.
        let (table, _, _, _) = scope_columns(scope);
        sqlx::query(&format!("DELETE FROM {table} WHERE id = ?1"))
            .bind(item)
            .execute(&mut *tx)
            .await?;
        apply_shifts(&mut tx, scope, &shifts).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn slots(&self, scope: PositionScope) -> Result<Vec<Slot>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        ensure_scope(&mut conn, scope).await?;
        load_slots(&mut conn, scope).await
    }
}
