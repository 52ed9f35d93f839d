// Property-Based Testing for the Ordered Position Store
// Any sequence of insert/move/delete keeps every scope numbered exactly 1..=N

use proptest::prelude::*;
use serde_json::json;

use statusflow::repository::{
    InMemoryRepository, NewStatus, RepositoryError, StepOwner, WorkflowRepository,
};
#[cfg(feature = "database")]
use statusflow::{database::DatabaseManager, repository::SqliteRepository};
use statusflow::workflows::model::{ActionType, NewFunction, NewRobot};
use statusflow::workflows::positions::{
    self, is_contiguous, PositionScope, Slot,
};

#[derive(Debug, Clone)]
enum Op {
    Insert { scope: usize, position: i64 },
    Move { scope: usize, item: usize, position: i64 },
    Delete { scope: usize, item: usize },
}

// Positions deliberately run past the valid range to exercise rejection.
fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..3, -1i64..10).prop_map(|(scope, position)| Op::Insert { scope, position }),
        2 => (0usize..3, 0usize..16, -1i64..10)
            .prop_map(|(scope, item, position)| Op::Move { scope, item, position }),
        1 => (0usize..3, 0usize..16).prop_map(|(scope, item)| Op::Delete { scope, item }),
    ]
}

struct Scopes {
    repo: Box<dyn WorkflowRepository>,
    // Keeps a database file alive for the length of one case.
    _dir: Option<tempfile::TempDir>,
    scopes: [PositionScope; 3],
    status_id: i64,
    robot_id: i64,
}

impl Scopes {
    async fn in_memory() -> Self {
        Self::new(Box::new(InMemoryRepository::new()), None).await
    }

    #[cfg(feature = "database")]
    async fn sqlite() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("positions.db").display());
        let manager = DatabaseManager::new(&url, true, 2).await.unwrap();
        Self::new(Box::new(SqliteRepository::from_manager(&manager)), Some(dir)).await
    }

    async fn new(repo: Box<dyn WorkflowRepository>, dir: Option<tempfile::TempDir>) -> Self {
        let status = repo.create_status(NewStatus::new("Open")).await.unwrap();
        let robot = repo
            .create_robot(NewRobot::new("notify", ActionType::Notification))
            .await
            .unwrap();
        let trigger = repo
            .create_trigger(statusflow::workflows::model::NewTrigger::new(
                "check",
                statusflow::workflows::model::ConditionType::StatusCheck,
            ))
            .await
            .unwrap();

        // Status orders of `ordered` are mutated; the step owner lives elsewhere.
        let ordered = repo.create_event("ordered").await.unwrap();
        let holder = repo.create_event("holder").await.unwrap();
        let owner = repo.insert_status_order(holder.id, status.id, 1).await.unwrap();

        Self {
            repo,
            _dir: dir,
            scopes: [
                PositionScope::Event(ordered.id),
                PositionScope::StatusOrder(owner.id),
                PositionScope::TriggerActions(trigger.id),
            ],
            status_id: status.id,
            robot_id: robot.id,
        }
    }

    async fn insert(&self, scope: PositionScope, position: i64) -> Result<(), RepositoryError> {
        let step = NewFunction::robot(self.robot_id, json!({}));
        match scope {
            PositionScope::Event(event) => self
                .repo
                .insert_status_order(event, self.status_id, position)
                .await
                .map(|_| ()),
            PositionScope::StatusOrder(id) => self
                .repo
                .insert_step(StepOwner::StatusOrder(id), step, position)
                .await
                .map(|_| ()),
            PositionScope::TriggerActions(id) => self
                .repo
                .insert_step(StepOwner::Trigger(id), step, position)
                .await
                .map(|_| ()),
        }
    }

    async fn apply(&self, op: &Op) -> Result<(), TestCaseError> {
        let scope = match op {
            Op::Insert { scope, .. } | Op::Move { scope, .. } | Op::Delete { scope, .. } => {
                self.scopes[*scope]
            }
        };
        let before = self.repo.slots(scope).await.unwrap();
        let count = before.len() as i64;
        let pick = |item: usize| before.get(item % before.len().max(1)).map(|slot| slot.id);

        match *op {
            Op::Insert { position, .. } => {
                let result = self.insert(scope, position).await;
                let after = self.repo.slots(scope).await.unwrap();
                if (1..=count + 1).contains(&position) {
                    prop_assert!(result.is_ok(), "insert at {} failed: {:?}", position, result);
                    prop_assert_eq!(after.len(), before.len() + 1);
                } else {
                    let rejected = matches!(result, Err(RepositoryError::InvalidPosition { .. }));
                    prop_assert!(rejected);
                    prop_assert_eq!(sorted(after), sorted(before));
                }
            }
            Op::Move { item, position, .. } => {
                let Some(id) = pick(item) else { return Ok(()) };
                let result = self.repo.move_item(scope, id, position).await;
                let after = self.repo.slots(scope).await.unwrap();
                if (1..=count).contains(&position) {
                    prop_assert!(result.is_ok());
                    let moved = after.iter().find(|slot| slot.id == id).unwrap();
                    prop_assert_eq!(i64::from(moved.position), position);
                } else {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(sorted(after), sorted(before));
                }
            }
            Op::Delete { item, .. } => {
                let Some(id) = pick(item) else { return Ok(()) };
                self.repo.delete_item(scope, id).await.unwrap();
                let after = self.repo.slots(scope).await.unwrap();
                prop_assert_eq!(after.len(), before.len() - 1);
                prop_assert!(after.iter().all(|slot| slot.id != id));
            }
        }

        for scope in self.scopes {
            let slots = self.repo.slots(scope).await.unwrap();
            prop_assert!(is_contiguous(&slots), "{} lost contiguity: {:?}", scope, slots);
        }
        Ok(())
    }
}

fn sorted(mut slots: Vec<Slot>) -> Vec<Slot> {
    slots.sort_by_key(|slot| slot.id);
    slots
}

fn run_operations<F, Fut>(cases: u32, open: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Scopes>,
{
    let mut runner =
        proptest::test_runner::TestRunner::new(proptest::test_runner::Config::with_cases(cases));

    runner
        .run(&prop::collection::vec(op_strategy(), 1..40), |ops| {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let scopes = open().await;
                for op in &ops {
                    scopes.apply(op).await?;
                }
                Ok(())
            })
        })
        .unwrap();
}

#[test]
fn prop_repository_positions_stay_contiguous() {
    run_operations(64, Scopes::in_memory);
}

// Exercises the two-phase shift updates against the UNIQUE position indexes.
#[cfg(feature = "database")]
#[test]
fn prop_sqlite_positions_stay_contiguous() {
    run_operations(16, Scopes::sqlite);
}

#[test]
fn prop_planner_preserves_relative_order() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&(1usize..12, any::<prop::sample::Index>(), any::<prop::sample::Index>()), |(n, from, to)| {
            let mut slots: Vec<Slot> = (1..=n as i64)
                .map(|id| Slot { id, position: id as u32 })
                .collect();
            let item = slots[from.index(n)].id;
            let target = to.index(n) as i64 + 1;

            let shifts = positions::plan_move(&slots, item, target).unwrap().unwrap();
            positions::apply(&mut slots, &shifts);
            prop_assert!(is_contiguous(&slots));

            // Everything except the moved item keeps its relative order.
            let mut by_position = slots.clone();
            by_position.sort_by_key(|slot| slot.position);
            let others: Vec<i64> = by_position
                .iter()
                .map(|slot| slot.id)
                .filter(|id| *id != item)
                .collect();
            let mut expected: Vec<i64> = (1..=n as i64).filter(|id| *id != item).collect();
            expected.sort();
            prop_assert_eq!(others, expected);
            prop_assert_eq!(
                by_position[(target - 1) as usize].id,
                item
            );
            Ok(())
        })
        .unwrap();
}
