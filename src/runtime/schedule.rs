use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use crate::common::config::Config;
use crate::fsm::{Deferred, TickKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Timer {
    due: Instant,
    seq: u64,
    token: u64,
    kind: Deferred,
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Single-shot timers, fired in due order and then insertion order.
#[derive(Debug, Default)]
pub struct Timers {
    heap: BinaryHeap<Reverse<Timer>>,
    seq: u64,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, now: Instant, after: Duration, token: u64, kind: Deferred) {
        self.seq += 1;
        self.heap.push(Reverse(Timer {
            due: now + after,
            seq: self.seq,
            token,
            kind,
        }));
    }

    pub fn pop_due(&mut self, now: Instant) -> Option<(u64, Deferred)> {
        match self.heap.peek() {
            Some(Reverse(timer)) if timer.due <= now => {
                let Reverse(timer) = self.heap.pop()?;
                Some((timer.token, timer.kind))
            }
            _ => None,
        }
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(timer)| timer.due)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Periodic ticks for whichever kinds the current state wants.
#[derive(Debug)]
pub struct TickSchedule {
    intervals: HashMap<TickKind, Duration>,
    next: HashMap<TickKind, Instant>,
}

impl TickSchedule {
    pub fn new(intervals: HashMap<TickKind, Duration>) -> Self {
        Self {
            intervals,
            next: HashMap::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let camera_ms = 1000 / u64::from(config.camera.fps.max(1));
        let intervals = HashMap::from([
            (TickKind::Camera, Duration::from_millis(camera_ms)),
            (TickKind::Face, Duration::from_millis(config.recognition.face_detect_interval_ms)),
            (TickKind::Clock, Duration::from_millis(config.timing.clock_tick_ms)),
            (TickKind::Distance, Duration::from_millis(config.timing.distance_poll_ms)),
            (TickKind::Measure, Duration::from_millis(config.timing.measure_poll_ms)),
        ]);
        Self::new(intervals)
    }

    pub fn interval(&self, kind: TickKind) -> Duration {
        self.intervals.get(&kind).copied().unwrap_or(Duration::from_secs(1))
    }

    /// Keeps running kinds on their cadence, starts new ones one interval
    /// from `now` and drops the rest.
    pub fn sync(&mut self, active: &[TickKind], now: Instant) {
        self.next.retain(|kind, _| active.contains(kind));
        for &kind in active {
            let interval = self.interval(kind);
            self.next.entry(kind).or_insert(now + interval);
        }
    }

    /// Kinds that are due, each at most once. A tick that fell behind is
    /// rescheduled from `now` rather than replayed.
    pub fn due(&mut self, now: Instant) -> Vec<TickKind> {
        let mut fired: Vec<TickKind> = Vec::new();
        for (kind, next) in self.next.iter_mut() {
            if *next <= now {
                fired.push(*kind);
                let interval = self.intervals.get(kind).copied().unwrap_or(Duration::from_secs(1));
                *next += interval;
                if *next <= now {
                    *next = now + interval;
                }
            }
        }
        fired.sort_by_key(|kind| *kind as u8);
        fired
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.next.values().min().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timers_fire_in_order() {
        let now = Instant::now();
        let mut timers = Timers::new();
        timers.schedule(now, Duration::from_millis(300), 1, Deferred::ReturnToIdle);
        timers.schedule(now, Duration::from_millis(100), 2, Deferred::CaptureShot);
        timers.schedule(now, Duration::from_millis(100), 3, Deferred::RetryExpired);

        assert_eq!(timers.next_due(), Some(now + Duration::from_millis(100)));
        assert_eq!(timers.pop_due(now), None);

        let later = now + Duration::from_millis(150);
        assert_eq!(timers.pop_due(later), Some((2, Deferred::CaptureShot)));
        assert_eq!(timers.pop_due(later), Some((3, Deferred::RetryExpired)));
        assert_eq!(timers.pop_due(later), None);
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn test_ticks_follow_active_kinds() {
        let now = Instant::now();
        let mut ticks = TickSchedule::from_config(&Config::default());
        ticks.sync(&[TickKind::Face, TickKind::Clock], now);
        assert!(ticks.due(now).is_empty());

        let fired = ticks.due(now + Duration::from_millis(250));
        assert_eq!(fired, vec![TickKind::Clock]);
        let fired = ticks.due(now + Duration::from_millis(1000));
        assert_eq!(fired, vec![TickKind::Face, TickKind::Clock]);

        ticks.sync(&[TickKind::Measure], now + Duration::from_millis(1000));
        assert_eq!(ticks.next_due(), Some(now + Duration::from_millis(1100)));
    }

    #[test]
    fn test_late_tick_is_not_replayed() {
        let now = Instant::now();
        let mut ticks = TickSchedule::from_config(&Config::default());
        ticks.sync(&[TickKind::Measure], now);
        let late = now + Duration::from_secs(5);
        assert_eq!(ticks.due(late), vec![TickKind::Measure]);
        assert!(ticks.due(late).is_empty());
        assert_eq!(ticks.next_due(), Some(late + Duration::from_millis(100)));
    }
}
