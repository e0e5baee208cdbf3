//! Host-side timer bookkeeping.
//!
//! The queue is independent of V8: the bridge stores the callback handles as
//! the payload and the executor drives firing after the synchronous run.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::Duration;

use tokio::time::Instant;

/// Delays above this many milliseconds overflow a signed 32-bit timer and
/// are treated as 1 ms, like browsers and Node do.
const MAX_DELAY_MS: f64 = 2_147_483_647.0;

/// Coerce a guest-supplied delay into a duration.
///
/// NaN, negative and missing delays mean "as soon as possible". Intervals
/// never repeat faster than every millisecond.
pub fn normalize_delay(raw: f64, repeating: bool) -> Duration {
    let ms = if raw.is_nan() || raw <= 0.0 {
        0.0
    } else if raw > MAX_DELAY_MS {
        1.0
    } else {
        raw.trunc()
    };
    let ms = if repeating { ms.max(1.0) } else { ms };
    Duration::from_millis(ms as u64)
}

/// A timer that became due.
#[derive(Debug)]
pub struct Fired<T> {
    /// Id returned to the guest at registration.
    pub id: u32,
    /// Registered payload. Intervals hand out the same payload every time.
    pub payload: Rc<T>,
}

#[derive(Debug)]
struct Timer<T> {
    key: (Instant, u64),
    interval: Option<Duration>,
    payload: Rc<T>,
}

/// Pending timers ordered by due time, then registration order.
#[derive(Debug)]
pub struct TimerQueue<T> {
    next_id: u32,
    next_seq: u64,
    order: BTreeMap<(Instant, u64), u32>,
    timers: HashMap<u32, Timer<T>>,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            next_id: 1,
            next_seq: 0,
            order: BTreeMap::new(),
            timers: HashMap::new(),
        }
    }
}

impl<T> TimerQueue<T> {
    /// Register a timer due `delay` after `now`. Returns its id (never 0).
    pub fn schedule(&mut self, now: Instant, delay: Duration, repeating: bool, payload: T) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.checked_add(1).unwrap_or(1);
        let key = self.key(now + delay);
        self.order.insert(key, id);
        self.timers.insert(
            id,
            Timer {
                key,
                interval: repeating.then_some(delay.max(Duration::from_millis(1))),
                payload: Rc::new(payload),
            },
        );
        id
    }

    /// Remove a pending timer. Unknown ids are ignored.
    pub fn cancel(&mut self, id: u32) -> bool {
        match self.timers.remove(&id) {
            Some(timer) => {
                self.order.remove(&timer.key);
                true
            }
            None => false,
        }
    }

    /// Due time of the earliest pending timer.
    pub fn next_due(&self) -> Option<Instant> {
        self.order.keys().next().map(|(due, _)| *due)
    }

    /// Take the earliest timer due at or before `now`.
    ///
    /// Intervals are re-armed one period after their previous due time.
    pub fn pop_due(&mut self, now: Instant) -> Option<Fired<T>> {
        let (&key, &id) = self.order.iter().next()?;
        if key.0 > now {
            return None;
        }
        self.order.remove(&key);

        let interval = self.timers.get(&id)?.interval;
        match interval {
            Some(period) => {
                let next = self.key(key.0 + period);
                self.order.insert(next, id);
                let timer = self.timers.get_mut(&id)?;
                timer.key = next;
                Some(Fired {
                    id,
                    payload: Rc::clone(&timer.payload),
                })
            }
            None => {
                let timer = self.timers.remove(&id)?;
                Some(Fired {
                    id,
                    payload: timer.payload,
                })
            }
        }
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Whether no timers are pending.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Drop every pending timer.
    pub fn clear(&mut self) {
        self.order.clear();
        self.timers.clear();
    }

    fn key(&mut self, due: Instant) -> (Instant, u64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        (due, seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn fires_in_due_order_then_registration_order() {
        let start = Instant::now();
        let mut queue = TimerQueue::default();
        queue.schedule(start, ms(20), false, "late");
        queue.schedule(start, ms(10), false, "first");
        queue.schedule(start, ms(10), false, "second");

        let now = start + ms(30);
        let fired: Vec<_> = std::iter::from_fn(|| queue.pop_due(now))
            .map(|f| *f.payload)
            .collect();
        assert_eq!(fired, vec!["first", "second", "late"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn nothing_fires_before_its_due_time() {
        let start = Instant::now();
        let mut queue = TimerQueue::default();
        queue.schedule(start, ms(50), false, ());
        assert!(queue.pop_due(start + ms(49)).is_none());
        assert_eq!(queue.next_due(), Some(start + ms(50)));
        assert!(queue.pop_due(start + ms(50)).is_some());
    }

    #[test]
    fn ids_are_positive_and_distinct() {
        let start = Instant::now();
        let mut queue = TimerQueue::default();
        let a = queue.schedule(start, ms(0), false, ());
        let b = queue.schedule(start, ms(0), true, ());
        assert!(a > 0 && b > 0);
        assert_ne!(a, b);
    }

    #[test]
    fn cancel_removes_pending_timer() {
        let start = Instant::now();
        let mut queue = TimerQueue::default();
        let id = queue.schedule(start, ms(5), false, ());
        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        assert!(!queue.cancel(999));
        assert!(queue.pop_due(start + ms(10)).is_none());
    }

    #[test]
    fn intervals_rearm_until_cancelled() {
        let start = Instant::now();
        let mut queue = TimerQueue::default();
        let id = queue.schedule(start, ms(10), true, "tick");

        let first = queue.pop_due(start + ms(10)).unwrap();
        assert_eq!(first.id, id);
        assert_eq!(queue.next_due(), Some(start + ms(20)));
        assert!(queue.pop_due(start + ms(20)).is_some());

        queue.cancel(id);
        assert!(queue.next_due().is_none());
    }

    #[test]
    fn delay_normalization() {
        assert_eq!(normalize_delay(f64::NAN, false), ms(0));
        assert_eq!(normalize_delay(-5.0, false), ms(0));
        assert_eq!(normalize_delay(12.9, false), ms(12));
        assert_eq!(normalize_delay(0.0, true), ms(1));
        assert_eq!(normalize_delay(3e10, false), ms(1));
    }
}
