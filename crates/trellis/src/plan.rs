//! Per-region plans and their backing task store.
//!
//! A plan is an ordered list of `{origin, destination, transition type}`
//! tasks attached to one region. Tasks live in a single fixed-capacity
//! free-list store shared by all regions; each region owns a `{first,
//! last}` bounds pair into it. Alongside the store sit two state-indexed
//! bit vectors recording which states reported success or failure; the
//! plan executor advances on success marks and both marks clear when the
//! state destructs.

use trellis_types::{RegionId, StateId, TransitionType};

use crate::bits::BitArray;

pub(crate) type TaskIndex = u16;

pub(crate) const INVALID_TASK: TaskIndex = TaskIndex::MAX;

/// One pending step of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
    pub transition_type: TransitionType,
    pub origin: StateId,
    pub destination: StateId,
}

#[derive(Debug, Clone)]
struct TaskSlot {
    task: Task,
    prev: TaskIndex,
    next: TaskIndex,
    /// Free slots reuse `next` as the free-list link; `used` disambiguates.
    used: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bounds {
    first: TaskIndex,
    last: TaskIndex,
}

impl Bounds {
    const EMPTY: Bounds = Bounds {
        first: INVALID_TASK,
        last: INVALID_TASK,
    };
}

/// All plan state of a machine: the shared task store, per-region bounds,
/// and the success/failure marks.
#[derive(Debug)]
pub(crate) struct PlanData {
    slots: Vec<TaskSlot>,
    free_head: TaskIndex,
    bounds: Vec<Bounds>,
    plan_exists: BitArray,
    task_successes: BitArray,
    task_failures: BitArray,
}

impl PlanData {
    pub fn new(task_capacity: usize, region_count: usize, state_count: usize) -> Self {
        let placeholder = Task {
            transition_type: TransitionType::Change,
            origin: StateId::INVALID,
            destination: StateId::INVALID,
        };
        let mut slots = Vec::with_capacity(task_capacity);
        for index in 0..task_capacity {
            let next = if index + 1 < task_capacity {
                (index + 1) as TaskIndex
            } else {
                INVALID_TASK
            };
            slots.push(TaskSlot {
                task: placeholder,
                prev: INVALID_TASK,
                next,
                used: false,
            });
        }
        Self {
            slots,
            free_head: if task_capacity > 0 { 0 } else { INVALID_TASK },
            bounds: vec![Bounds::EMPTY; region_count],
            plan_exists: BitArray::new(region_count),
            task_successes: BitArray::new(state_count),
            task_failures: BitArray::new(state_count),
        }
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Appends a task to a region's plan. Overflowing the store means the
    /// tree was built with too small a `TASK_CAPACITY`.
    pub fn append(
        &mut self,
        region: RegionId,
        transition_type: TransitionType,
        origin: StateId,
        destination: StateId,
    ) {
        assert!(
            self.free_head != INVALID_TASK,
            "plan task store overflow: size TASK_CAPACITY to the tree"
        );

        let index = self.free_head;
        self.free_head = self.slots[index as usize].next;

        let bounds = self.bounds[region.index()];
        self.slots[index as usize] = TaskSlot {
            task: Task {
                transition_type,
                origin,
                destination,
            },
            prev: bounds.last,
            next: INVALID_TASK,
            used: true,
        };

        let bounds = &mut self.bounds[region.index()];
        if bounds.last != INVALID_TASK {
            self.slots[bounds.last as usize].next = index;
        } else {
            bounds.first = index;
        }
        bounds.last = index;
        self.plan_exists.set(region.index());
    }

    /// Unlinks and frees one task of a region's plan.
    pub fn remove(&mut self, region: RegionId, index: TaskIndex) {
        debug_assert!(self.slots[index as usize].used);
        let (prev, next) = {
            let slot = &self.slots[index as usize];
            (slot.prev, slot.next)
        };

        let bounds = &mut self.bounds[region.index()];
        if prev != INVALID_TASK {
            self.slots[prev as usize].next = next;
        } else {
            bounds.first = next;
        }
        if next != INVALID_TASK {
            self.slots[next as usize].prev = prev;
        } else {
            bounds.last = prev;
        }
        if bounds.first == INVALID_TASK {
            self.plan_exists.clear(region.index());
        }

        let slot = &mut self.slots[index as usize];
        slot.used = false;
        slot.prev = INVALID_TASK;
        slot.next = self.free_head;
        self.free_head = index;
    }

    /// Drops every task of a region's plan.
    pub fn clear_region(&mut self, region: RegionId) {
        let mut index = self.bounds[region.index()].first;
        while index != INVALID_TASK {
            let next = self.slots[index as usize].next;
            let slot = &mut self.slots[index as usize];
            slot.used = false;
            slot.prev = INVALID_TASK;
            slot.next = self.free_head;
            self.free_head = index;
            index = next;
        }
        self.bounds[region.index()] = Bounds::EMPTY;
        self.plan_exists.clear(region.index());
    }

    pub fn plan_exists(&self, region: RegionId) -> bool {
        self.plan_exists.get(region.index())
    }

    pub fn first_task(&self, region: RegionId) -> TaskIndex {
        self.bounds[region.index()].first
    }

    pub fn next_task(&self, index: TaskIndex) -> TaskIndex {
        self.slots[index as usize].next
    }

    pub fn task(&self, index: TaskIndex) -> Task {
        debug_assert!(self.slots[index as usize].used);
        self.slots[index as usize].task
    }

    pub fn task_count(&self, region: RegionId) -> usize {
        let mut count = 0;
        let mut index = self.bounds[region.index()].first;
        while index != INVALID_TASK {
            count += 1;
            index = self.slots[index as usize].next;
        }
        count
    }

    // ------------------------------------------------------------------
    // Success / failure marks
    // ------------------------------------------------------------------

    pub fn mark_success(&mut self, state: StateId) {
        self.task_successes.set(state.index());
    }

    pub fn mark_failure(&mut self, state: StateId) {
        self.task_failures.set(state.index());
    }

    pub fn succeeded(&self, state: StateId) -> bool {
        self.task_successes.get(state.index())
    }

    pub fn failed(&self, state: StateId) -> bool {
        self.task_failures.get(state.index())
    }

    /// Called when a state destructs; its marks are no longer meaningful.
    pub fn clear_marks(&mut self, state: StateId) {
        self.task_successes.clear(state.index());
        self.task_failures.clear(state.index());
    }

    /// Full reset, for `Machine::reset` and `load`.
    pub fn clear_all(&mut self) {
        let regions = self.bounds.len();
        for region in 0..regions {
            self.clear_region(RegionId::new(region as u8));
        }
        self.task_successes.clear_all();
        self.task_failures.clear_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: u16) -> StateId {
        StateId::new(id)
    }

    fn change(data: &mut PlanData, region: RegionId, origin: u16, destination: u16) {
        data.append(region, TransitionType::Change, state(origin), state(destination));
    }

    fn tasks_of(data: &PlanData, region: RegionId) -> Vec<(u16, u16)> {
        let mut out = Vec::new();
        let mut index = data.first_task(region);
        while index != INVALID_TASK {
            let task = data.task(index);
            out.push((task.origin.into(), task.destination.into()));
            index = data.next_task(index);
        }
        out
    }

    #[test]
    fn append_preserves_order() {
        let region = RegionId::new(0);
        let mut data = PlanData::new(4, 1, 8);
        assert!(!data.plan_exists(region));

        change(&mut data, region, 1, 2);
        change(&mut data, region, 2, 3);
        change(&mut data, region, 3, 4);

        assert!(data.plan_exists(region));
        assert_eq!(data.task_count(region), 3);
        assert_eq!(tasks_of(&data, region), vec![(1, 2), (2, 3), (3, 4)]);
    }

    #[test]
    fn remove_head_mid_tail() {
        let region = RegionId::new(0);
        let mut data = PlanData::new(4, 1, 8);
        change(&mut data, region, 1, 2);
        change(&mut data, region, 2, 3);
        change(&mut data, region, 3, 4);

        let head = data.first_task(region);
        data.remove(region, head);
        assert_eq!(tasks_of(&data, region), vec![(2, 3), (3, 4)]);

        let tail = data.next_task(data.first_task(region));
        data.remove(region, tail);
        assert_eq!(tasks_of(&data, region), vec![(2, 3)]);

        data.remove(region, data.first_task(region));
        assert!(!data.plan_exists(region));
        assert_eq!(data.task_count(region), 0);
    }

    #[test]
    fn freed_slots_are_reused() {
        let region = RegionId::new(0);
        let mut data = PlanData::new(2, 1, 8);
        change(&mut data, region, 1, 2);
        change(&mut data, region, 2, 3);
        data.clear_region(region);

        // Capacity 2 again after clearing; a third append would overflow
        // without the free list.
        change(&mut data, region, 4, 5);
        change(&mut data, region, 5, 6);
        assert_eq!(tasks_of(&data, region), vec![(4, 5), (5, 6)]);
    }

    #[test]
    fn regions_are_independent() {
        let first = RegionId::new(0);
        let second = RegionId::new(1);
        let mut data = PlanData::new(4, 2, 8);
        change(&mut data, first, 1, 2);
        change(&mut data, second, 5, 6);

        data.clear_region(first);
        assert!(!data.plan_exists(first));
        assert!(data.plan_exists(second));
        assert_eq!(tasks_of(&data, second), vec![(5, 6)]);
    }

    #[test]
    fn marks_clear_per_state() {
        let mut data = PlanData::new(2, 1, 8);
        data.mark_success(state(3));
        data.mark_failure(state(4));
        assert!(data.succeeded(state(3)));
        assert!(data.failed(state(4)));

        data.clear_marks(state(3));
        assert!(!data.succeeded(state(3)));
        assert!(data.failed(state(4)));
    }

    #[test]
    #[should_panic(expected = "plan task store overflow")]
    fn overflow_asserts() {
        let region = RegionId::new(0);
        let mut data = PlanData::new(1, 1, 8);
        change(&mut data, region, 1, 2);
        change(&mut data, region, 2, 3);
    }
}
