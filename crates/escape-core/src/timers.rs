//! Named timers on a virtual millisecond clock.
//!
//! `TimerQueue` is a discrete-event priority queue: every timer has a due time
//! and timers fire in `(due_ms, id)` order, so two timers due at the same instant
//! fire in the order they were scheduled. Cancelling a handle removes the timer
//! from the live set; a cancelled entry is skipped when it reaches the head of
//! the heap and can never fire.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timer {
    DecayTick,
    CountdownTick,
    RepairTick,
    MovementStep { player_id: String, position: u8 },
    ChallengeTimeout { challenge_id: u64 },
    ChallengeAutoAnswer { challenge_id: u64 },
    AutonomousRoll { player_id: String },
}

impl Timer {
    pub fn label(&self) -> &'static str {
        match self {
            Self::DecayTick => "decay_tick",
            Self::CountdownTick => "countdown_tick",
            Self::RepairTick => "repair_tick",
            Self::MovementStep { .. } => "movement_step",
            Self::ChallengeTimeout { .. } => "challenge_timeout",
            Self::ChallengeAutoAnswer { .. } => "challenge_auto_answer",
            Self::AutonomousRoll { .. } => "autonomous_roll",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredTimer {
    pub handle: TimerHandle,
    pub due_ms: u64,
    pub timer: Timer,
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct OrderedTimer(FiredTimer);

impl PartialOrd for OrderedTimer {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedTimer {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .due_ms
            .cmp(&other.0.due_ms)
            .then_with(|| self.0.handle.cmp(&other.0.handle))
    }
}

#[derive(Debug, Clone, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<OrderedTimer>>,
    live: BTreeSet<TimerHandle>,
    next_id: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_at(&mut self, due_ms: u64, timer: Timer) -> TimerHandle {
        let handle = TimerHandle(self.next_id);
        self.next_id += 1;
        self.live.insert(handle);
        self.heap.push(Reverse(OrderedTimer(FiredTimer {
            handle,
            due_ms,
            timer,
        })));
        handle
    }

    /// Returns `true` if the timer was still pending.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.live.remove(&handle)
    }

    /// Cancel through an optional slot, leaving the slot empty.
    pub fn cancel_slot(&mut self, slot: &mut Option<TimerHandle>) {
        if let Some(handle) = slot.take() {
            self.cancel(handle);
        }
    }

    pub fn cancel_all(&mut self) {
        self.live.clear();
        self.heap.clear();
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.live.contains(&handle)
    }

    /// Pop the earliest live timer due at or before `now_ms`.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<FiredTimer> {
        loop {
            let head = self.heap.peek()?;
            if !self.live.contains(&head.0 .0.handle) {
                self.heap.pop();
                continue;
            }
            if head.0 .0.due_ms > now_ms {
                return None;
            }
            let fired = self.heap.pop()?.0 .0;
            self.live.remove(&fired.handle);
            return Some(fired);
        }
    }

    pub fn next_due(&mut self) -> Option<u64> {
        while let Some(head) = self.heap.peek() {
            if self.live.contains(&head.0 .0.handle) {
                return Some(head.0 .0.due_ms);
            }
            self.heap.pop();
        }
        None
    }

    pub fn pending_len(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_due_then_insertion_order() {
        let mut queue = TimerQueue::new();
        queue.schedule_at(200, Timer::RepairTick);
        queue.schedule_at(100, Timer::DecayTick);
        queue.schedule_at(100, Timer::CountdownTick);

        assert_eq!(queue.pop_due(50), None);
        let order: Vec<Timer> = std::iter::from_fn(|| queue.pop_due(1_000))
            .map(|fired| fired.timer)
            .collect();
        assert_eq!(
            order,
            vec![Timer::DecayTick, Timer::CountdownTick, Timer::RepairTick]
        );
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut queue = TimerQueue::new();
        let timeout = queue.schedule_at(10_000, Timer::ChallengeTimeout { challenge_id: 1 });
        let answer = queue.schedule_at(4_000, Timer::ChallengeAutoAnswer { challenge_id: 1 });

        assert!(queue.cancel(timeout));
        assert!(!queue.cancel(timeout));
        assert!(queue.is_pending(answer));

        let fired = queue.pop_due(20_000).expect("answer fires");
        assert_eq!(fired.handle, answer);
        assert_eq!(queue.pop_due(20_000), None);
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn cancel_slot_empties_the_slot() {
        let mut queue = TimerQueue::new();
        let mut slot = Some(queue.schedule_at(5, Timer::RepairTick));
        queue.cancel_slot(&mut slot);
        assert!(slot.is_none());
        assert_eq!(queue.next_due(), None);
    }

    #[test]
    fn cancel_all_clears_everything() {
        let mut queue = TimerQueue::new();
        queue.schedule_at(1, Timer::DecayTick);
        queue.schedule_at(2, Timer::AutonomousRoll {
            player_id: "bot".to_string(),
        });
        queue.cancel_all();
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.pop_due(u64::MAX), None);
    }
}
