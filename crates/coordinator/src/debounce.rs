//! Debounce and cooldown state per (channel, author, trigger).
//!
//! With a debounce window, a burst collapses to its last event, emitted
//! once the channel has been quiet for the window. With a cooldown, at most
//! one emission leaves per key per cooldown; a deferred event is emitted
//! when the cooldown ends. Timers are plain tasks that report back through
//! a channel, so all state stays with the owning task.

use std::{collections::HashMap, time::Duration};

use {
    switchboard_protocol::TriggerParameters,
    tokio::{sync::mpsc, task::AbortHandle, time::Instant},
    tracing::debug,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebounceKey {
    pub channel_id: String,
    pub author_id: String,
    pub node_id: String,
}

impl DebounceKey {
    pub fn new(
        channel_id: impl Into<String>,
        author_id: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            author_id: author_id.into(),
            node_id: node_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timing {
    pub debounce: Duration,
    pub cooldown: Duration,
}

impl Timing {
    pub fn from_parameters(params: &TriggerParameters) -> Self {
        Self {
            debounce: seconds(params.debounce_seconds()),
            cooldown: seconds(params.cooldown_seconds()),
        }
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

/// Sent by a timer task when its delay has elapsed.
#[derive(Debug, Clone)]
pub struct TimerFired {
    pub key: DebounceKey,
    generation: u64,
}

#[derive(Debug)]
pub enum Offer<P> {
    /// Emit right away.
    EmitNow(P),
    /// Held back; a timer fires after `delay`.
    Deferred { delay: Duration },
}

#[derive(Debug)]
pub enum Fired<P> {
    Emit(P),
    /// The cooldown was still running; tried again after `delay`.
    Rescheduled { delay: Duration },
    /// Rescheduled too often and given up.
    Dropped,
    /// The timer was superseded or cancelled.
    Stale,
}

struct Pending<P> {
    payload: P,
    generation: u64,
    reschedules: u32,
    timer: AbortHandle,
}

struct Entry<P> {
    pending: Option<Pending<P>>,
    last_emit: Option<Instant>,
    cooldown: Duration,
}

impl<P> Entry<P> {
    fn cooldown_remaining(&self, now: Instant) -> Duration {
        match self.last_emit {
            Some(at) => self.cooldown.saturating_sub(now.saturating_duration_since(at)),
            None => Duration::ZERO,
        }
    }

    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.timer.abort();
        }
    }

    fn is_idle(&self, now: Instant) -> bool {
        self.pending.is_none() && self.cooldown_remaining(now).is_zero()
    }
}

/// Round up to whole seconds.
fn ceil_secs(duration: Duration) -> Duration {
    let extra = u64::from(duration.subsec_nanos() > 0);
    Duration::from_secs(duration.as_secs().saturating_add(extra))
}

pub struct Debouncer<P> {
    entries: HashMap<DebounceKey, Entry<P>>,
    timers: mpsc::UnboundedSender<TimerFired>,
    next_generation: u64,
    max_reschedules: u32,
}

impl<P: Send + 'static> Debouncer<P> {
    pub fn new(timers: mpsc::UnboundedSender<TimerFired>, max_reschedules: u32) -> Self {
        Self {
            entries: HashMap::new(),
            timers,
            next_generation: 0,
            max_reschedules,
        }
    }

    /// Offer one matched event.
    pub fn offer(&mut self, key: DebounceKey, payload: P, timing: Timing) -> Offer<P> {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_idle(now));

        let entry = self.entries.entry(key.clone()).or_insert_with(|| Entry {
            pending: None,
            last_emit: None,
            cooldown: timing.cooldown,
        });
        entry.cooldown = timing.cooldown;

        if !timing.debounce.is_zero() {
            self.schedule(key, payload, timing.debounce);
            return Offer::Deferred {
                delay: timing.debounce,
            };
        }

        let remaining = entry.cooldown_remaining(now);
        if remaining.is_zero() {
            entry.cancel_pending();
            entry.last_emit = Some(now);
            if entry.cooldown.is_zero() {
                self.entries.remove(&key);
            }
            Offer::EmitNow(payload)
        } else {
            let delay = ceil_secs(remaining);
            self.schedule(key, payload, delay);
            Offer::Deferred { delay }
        }
    }

    /// Resolve a timer reported through the timer channel.
    pub fn fire(&mut self, fired: TimerFired) -> Fired<P> {
        let now = Instant::now();
        let Some(entry) = self.entries.get_mut(&fired.key) else {
            return Fired::Stale;
        };
        if entry
            .pending
            .as_ref()
            .is_none_or(|p| p.generation != fired.generation)
        {
            return Fired::Stale;
        }

        let remaining = entry.cooldown_remaining(now);
        if remaining.is_zero() {
            let Some(pending) = entry.pending.take() else {
                return Fired::Stale;
            };
            entry.last_emit = Some(now);
            if entry.cooldown.is_zero() {
                self.entries.remove(&fired.key);
            }
            return Fired::Emit(pending.payload);
        }

        let reschedules = entry.pending.as_ref().map_or(0, |p| p.reschedules);
        if reschedules >= self.max_reschedules {
            entry.pending = None;
            debug!(node_id = %fired.key.node_id, reschedules, "pending emission dropped");
            return Fired::Dropped;
        }
        let delay = ceil_secs(remaining);
        let generation = self.next_generation();
        let timer = self.spawn_timer(fired.key.clone(), generation, delay);
        if let Some(entry) = self.entries.get_mut(&fired.key)
            && let Some(pending) = entry.pending.as_mut()
        {
            pending.generation = generation;
            pending.reschedules += 1;
            pending.timer = timer;
        }
        Fired::Rescheduled { delay }
    }

    /// Forget every key of `node_id`, cancelling pending timers.
    pub fn cancel_node(&mut self, node_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            let keep = key.node_id != node_id;
            if !keep {
                entry.cancel_pending();
            }
            keep
        });
        before - self.entries.len()
    }

    pub fn cancel_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.cancel_pending();
        }
        self.entries.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.entries.values().filter(|e| e.pending.is_some()).count()
    }

    /// Replace any pending event of `key` with `payload`, due after `delay`.
    fn schedule(&mut self, key: DebounceKey, payload: P, delay: Duration) {
        let generation = self.next_generation();
        let timer = self.spawn_timer(key.clone(), generation, delay);
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.cancel_pending();
            entry.pending = Some(Pending {
                payload,
                generation,
                reschedules: 0,
                timer,
            });
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn spawn_timer(&self, key: DebounceKey, generation: u64, delay: Duration) -> AbortHandle {
        let timers = self.timers.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timers.send(TimerFired { key, generation });
        })
        .abort_handle()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn key(node: &str) -> DebounceKey {
        DebounceKey::new("c1", "u1", node)
    }

    fn timing(debounce: u64, cooldown: u64) -> Timing {
        Timing {
            debounce: Duration::from_secs(debounce),
            cooldown: Duration::from_secs(cooldown),
        }
    }

    fn setup(max: u32) -> (Debouncer<&'static str>, mpsc::UnboundedReceiver<TimerFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Debouncer::new(tx, max), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn no_timing_emits_immediately() {
        let (mut d, _rx) = setup(16);
        assert!(matches!(d.offer(key("n"), "a", timing(0, 0)), Offer::EmitNow("a")));
        assert!(matches!(d.offer(key("n"), "b", timing(0, 0)), Offer::EmitNow("b")));
        assert_eq!(d.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_collapses_burst_to_last() {
        let (mut d, mut rx) = setup(16);
        d.offer(key("n"), "a", timing(2, 0));
        tokio::time::sleep(Duration::from_secs(1)).await;
        d.offer(key("n"), "b", timing(2, 0));
        tokio::time::sleep(Duration::from_millis(500)).await;
        d.offer(key("n"), "c", timing(2, 0));

        let start = Instant::now();
        let fired = rx.recv().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert!(matches!(d.fire(fired), Fired::Emit("c")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_defers_until_it_ends() {
        let (mut d, mut rx) = setup(16);
        assert!(matches!(d.offer(key("n"), "a", timing(0, 5)), Offer::EmitNow("a")));
        tokio::time::sleep(Duration::from_secs(2)).await;
        let offer = d.offer(key("n"), "b", timing(0, 5));
        assert!(matches!(offer, Offer::Deferred { delay } if delay == Duration::from_secs(3)));

        let fired = rx.recv().await.unwrap();
        assert!(matches!(d.fire(fired), Fired::Emit("b")));
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_inside_cooldown_is_rescheduled() {
        let (mut d, mut rx) = setup(16);
        d.offer(key("n"), "a", timing(1, 10));
        let fired = rx.recv().await.unwrap();
        assert!(matches!(d.fire(fired), Fired::Emit("a")));

        d.offer(key("n"), "b", timing(1, 10));
        let fired = rx.recv().await.unwrap();
        assert!(matches!(
            d.fire(fired),
            Fired::Rescheduled { delay } if delay == Duration::from_secs(9)
        ));
        let fired = rx.recv().await.unwrap();
        assert!(matches!(d.fire(fired), Fired::Emit("b")));
    }

    #[tokio::test(start_paused = true)]
    async fn reschedules_are_bounded() {
        let (mut d, mut rx) = setup(0);
        d.offer(key("n"), "a", timing(1, 10));
        let fired = rx.recv().await.unwrap();
        assert!(matches!(d.fire(fired), Fired::Emit("a")));
        d.offer(key("n"), "b", timing(1, 10));
        let fired = rx.recv().await.unwrap();
        assert!(matches!(d.fire(fired), Fired::Dropped));
        assert_eq!(d.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let (mut d, _rx) = setup(16);
        assert!(matches!(d.offer(key("n1"), "a", timing(0, 5)), Offer::EmitNow(_)));
        assert!(matches!(d.offer(key("n2"), "b", timing(0, 5)), Offer::EmitNow(_)));
        let other_author = DebounceKey::new("c1", "u2", "n1");
        assert!(matches!(d.offer(other_author, "c", timing(0, 5)), Offer::EmitNow(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_node_timers_are_stale() {
        let (mut d, mut rx) = setup(16);
        d.offer(key("n"), "a", timing(1, 0));
        assert_eq!(d.cancel_node("n"), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(d.pending_count(), 0);
    }

    #[test]
    fn remaining_rounds_up() {
        assert_eq!(ceil_secs(Duration::from_millis(2100)), Duration::from_secs(3));
        assert_eq!(ceil_secs(Duration::from_secs(2)), Duration::from_secs(2));
        assert_eq!(ceil_secs(Duration::ZERO), Duration::ZERO);
    }
}
