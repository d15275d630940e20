//! Deadline-ordered transient effects: toast dismissal and delayed task
//! clearing. Callers pass the current `Instant`, so the scheduler itself never
//! reads a clock.

use ptrack_core::AgentId;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    ClearTask(AgentId),
    DismissToast(String),
}

#[derive(Debug, Clone)]
struct Pending {
    due: Instant,
    seq: u64,
    effect: Effect,
}

#[derive(Debug, Default)]
pub struct EffectScheduler {
    pending: Vec<Pending>,
    next_seq: u64,
}

impl EffectScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, now: Instant, delay: Duration, effect: Effect) {
        self.next_seq += 1;
        self.pending.push(Pending {
            due: now + delay,
            seq: self.next_seq,
            effect,
        });
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|pending| pending.due).min()
    }

    /// Remove and return every effect due at `now`, earliest first; ties keep
    /// arming order.
    pub fn take_due(&mut self, now: Instant) -> Vec<Effect> {
        let (mut due, rest): (Vec<Pending>, Vec<Pending>) = self
            .pending
            .drain(..)
            .partition(|pending| pending.due <= now);
        self.pending = rest;
        due.sort_by_key(|pending| (pending.due, pending.seq));
        due.into_iter().map(|pending| pending.effect).collect()
    }

    /// Drop every pending copy of `effect`; returns how many were dropped.
    pub fn cancel(&mut self, effect: &Effect) -> usize {
        let before = self.pending.len();
        self.pending.retain(|pending| pending.effect != *effect);
        before - self.pending.len()
    }

    pub fn cancel_all(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effects_fire_only_once_due() {
        let start = Instant::now();
        let mut scheduler = EffectScheduler::new();
        scheduler.arm(start, Duration::from_millis(3000), Effect::ClearTask(7));
        scheduler.arm(start, Duration::from_millis(1000), Effect::DismissToast("t1".into()));

        assert_eq!(
            scheduler.next_deadline(),
            Some(start + Duration::from_millis(1000))
        );
        assert!(scheduler.take_due(start + Duration::from_millis(999)).is_empty());
        assert_eq!(
            scheduler.take_due(start + Duration::from_millis(1000)),
            vec![Effect::DismissToast("t1".into())]
        );
        assert!(scheduler.take_due(start + Duration::from_millis(2999)).is_empty());
        assert_eq!(
            scheduler.take_due(start + Duration::from_millis(3000)),
            vec![Effect::ClearTask(7)]
        );
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.next_deadline(), None);
    }

    #[test]
    fn simultaneous_effects_keep_arming_order() {
        let start = Instant::now();
        let mut scheduler = EffectScheduler::new();
        scheduler.arm(start, Duration::from_millis(500), Effect::ClearTask(2));
        scheduler.arm(start, Duration::from_millis(500), Effect::ClearTask(1));
        scheduler.arm(start, Duration::from_millis(100), Effect::ClearTask(3));

        let fired = scheduler.take_due(start + Duration::from_secs(1));
        assert_eq!(
            fired,
            vec![Effect::ClearTask(3), Effect::ClearTask(2), Effect::ClearTask(1)]
        );
    }

    #[test]
    fn cancel_drops_only_matching_effects() {
        let start = Instant::now();
        let mut scheduler = EffectScheduler::new();
        scheduler.arm(start, Duration::from_millis(10), Effect::ClearTask(1));
        scheduler.arm(start, Duration::from_millis(10), Effect::ClearTask(2));
        assert_eq!(scheduler.cancel(&Effect::ClearTask(1)), 1);
        assert_eq!(scheduler.cancel(&Effect::ClearTask(1)), 0);
        assert_eq!(
            scheduler.take_due(start + Duration::from_secs(1)),
            vec![Effect::ClearTask(2)]
        );
    }

    #[test]
    fn cancel_all_drops_pending() {
        let start = Instant::now();
        let mut scheduler = EffectScheduler::new();
        scheduler.arm(start, Duration::from_millis(10), Effect::ClearTask(1));
        scheduler.cancel_all();
        assert!(scheduler.take_due(start + Duration::from_secs(10)).is_empty());
        assert_eq!(scheduler.len(), 0);
    }
}
