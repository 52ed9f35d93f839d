// Ordered position store: planning of unique, gapless sibling positions.
//
// Backends load the sibling slots of one scope, ask for a plan, and apply the
// resulting position changes inside a single transaction.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::model::{EventId, StatusOrderId, TriggerId};

/// Parent scope whose children share one position sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionScope {
    /// Status orders of an event.
    Event(EventId),
    /// Function orders of a status order.
    StatusOrder(StatusOrderId),
    /// Cascading actions of a trigger.
    TriggerActions(TriggerId),
}

impl fmt::Display for PositionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionScope::Event(id) => write!(f, "event {id}"),
            PositionScope::StatusOrder(id) => write!(f, "status order {id}"),
            PositionScope::TriggerActions(id) => write!(f, "trigger {id} actions"),
        }
    }
}

/// A sibling row as seen by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub id: i64,
    pub position: u32,
}

/// A position change to apply to an existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shift {
    pub id: i64,
    pub from: u32,
    pub to: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertPlan {
    pub position: u32,
    pub shifts: Vec<Shift>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOutOfRange {
    pub requested: i64,
    pub max: u32,
}

impl fmt::Display for PositionOutOfRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "position {} is outside the allowed range 1..={}",
            self.requested, self.max
        )
    }
}

fn sorted(siblings: &[Slot]) -> Vec<Slot> {
    let mut slots = siblings.to_vec();
    slots.sort_by_key(|slot| (slot.position, slot.id));
    slots
}

fn check_range(requested: i64, max: u32) -> Result<u32, PositionOutOfRange> {
    if requested < 1 || requested > i64::from(max) {
        return Err(PositionOutOfRange { requested, max });
    }
    Ok(requested as u32)
}

/// Assign `1..=n` in the existing order, placing `insert_at` free for a new
/// or moved row, and report every row whose position changes.
fn renumber(ordered: &[Slot], insert_at: Option<u32>) -> Vec<Shift> {
    let mut shifts = Vec::new();
    let mut next = 1u32;
    for slot in ordered {
        if Some(next) == insert_at {
            next += 1;
        }
        if slot.position != next {
            shifts.push(Shift {
                id: slot.id,
                from: slot.position,
                to: next,
            });
        }
        next += 1;
    }
    shifts
}

/// Open a slot at `requested` among `siblings`. Valid range is `1..=count+1`.
pub fn plan_insert(siblings: &[Slot], requested: i64) -> Result<InsertPlan, PositionOutOfRange> {
    let max = siblings.len() as u32 + 1;
    let position = check_range(requested, max)?;
    let ordered = sorted(siblings);
    Ok(InsertPlan {
        position,
        shifts: renumber(&ordered, Some(position)),
    })
}

/// Move `item` to `requested`. Valid range is `1..=count`. The returned shifts
/// include the moved item itself when its position changes.
pub fn plan_move(
    siblings: &[Slot],
    item: i64,
    requested: i64,
) -> Result<Option<Vec<Shift>>, PositionOutOfRange> {
    let Some(current) = siblings.iter().find(|slot| slot.id == item).copied() else {
        return Ok(None);
    };
    let position = check_range(requested, siblings.len() as u32)?;
    let others: Vec<Slot> = sorted(siblings)
        .into_iter()
        .filter(|slot| slot.id != item)
        .collect();

    let mut shifts = renumber(&others, Some(position));
    if current.position != position {
        shifts.push(Shift {
            id: item,
            from: current.position,
            to: position,
        });
    }
    Ok(Some(shifts))
}

/// Remove `item` and close the gap it leaves. Returns `None` when `item` is
/// not among `siblings`.
pub fn plan_delete(siblings: &[Slot], item: i64) -> Option<Vec<Shift>> {
    if !siblings.iter().any(|slot| slot.id == item) {
        return None;
    }
    let others: Vec<Slot> = sorted(siblings)
        .into_iter()
        .filter(|slot| slot.id != item)
        .collect();
    Some(renumber(&others, None))
}

/// Apply shifts to an in-memory slot list.
pub fn apply(slots: &mut [Slot], shifts: &[Shift]) {
    for shift in shifts {
        if let Some(slot) = slots.iter_mut().find(|slot| slot.id == shift.id) {
            slot.position = shift.to;
        }
    }
}

/// True when positions are exactly `1..=n` with no duplicates.
pub fn is_contiguous(slots: &[Slot]) -> bool {
    let mut positions: Vec<u32> = slots.iter().map(|slot| slot.position).collect();
    positions.sort_unstable();
    positions
        .iter()
        .enumerate()
        .all(|(index, position)| *position == index as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(positions: &[(i64, u32)]) -> Vec<Slot> {
        positions
            .iter()
            .map(|(id, position)| Slot {
                id: *id,
                position: *position,
            })
            .collect()
    }

    #[test]
    fn insert_in_the_middle_shifts_tail() {
        let siblings = slots(&[(1, 1), (2, 2), (3, 3)]);
        let plan = plan_insert(&siblings, 2).unwrap();
        assert_eq!(plan.position, 2);
        assert_eq!(
            plan.shifts,
            vec![
                Shift { id: 2, from: 2, to: 3 },
                Shift { id: 3, from: 3, to: 4 },
            ]
        );
    }

    #[test]
    fn insert_rejects_out_of_range() {
        let siblings = slots(&[(1, 1), (2, 2)]);
        assert_eq!(
            plan_insert(&siblings, 0),
            Err(PositionOutOfRange { requested: 0, max: 3 })
        );
        assert!(plan_insert(&siblings, 4).is_err());
        assert!(plan_insert(&siblings, 3).unwrap().shifts.is_empty());
        assert_eq!(plan_insert(&[], 1).unwrap().position, 1);
    }

    #[test]
    fn move_keeps_sequence_gapless() {
        let mut siblings = slots(&[(10, 1), (11, 2), (12, 3), (13, 4)]);
        let shifts = plan_move(&siblings, 10, 3).unwrap().unwrap();
        apply(&mut siblings, &shifts);
        let mut order: Vec<(u32, i64)> = siblings.iter().map(|s| (s.position, s.id)).collect();
        order.sort();
        assert_eq!(order, vec![(1, 11), (2, 12), (3, 10), (4, 13)]);
        assert!(is_contiguous(&siblings));
    }

    #[test]
    fn move_upwards_and_to_same_place() {
        let mut siblings = slots(&[(1, 1), (2, 2), (3, 3)]);
        let shifts = plan_move(&siblings, 3, 1).unwrap().unwrap();
        apply(&mut siblings, &shifts);
        let mut order: Vec<(u32, i64)> = siblings.iter().map(|s| (s.position, s.id)).collect();
        order.sort();
        assert_eq!(order, vec![(1, 3), (2, 1), (3, 2)]);

        let unchanged = plan_move(&siblings, 1, 2).unwrap().unwrap();
        assert!(unchanged.is_empty());
    }

    #[test]
    fn move_rejects_past_the_end_and_unknown_items() {
        let siblings = slots(&[(1, 1), (2, 2)]);
        assert!(plan_move(&siblings, 1, 3).is_err());
        assert_eq!(plan_move(&siblings, 99, 1), Ok(None));
    }

    #[test]
    fn delete_compacts_remainder() {
        let mut siblings = slots(&[(1, 1), (2, 2), (3, 3)]);
        let shifts = plan_delete(&siblings, 1).unwrap();
        siblings.retain(|slot| slot.id != 1);
        apply(&mut siblings, &shifts);
        assert_eq!(siblings, slots(&[(2, 1), (3, 2)]));
        assert_eq!(plan_delete(&siblings, 1), None);
    }
}
