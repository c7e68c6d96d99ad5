// Fixed-tick scheduler over simulated time: per-tick callbacks plus delayed
// continuations. Generic over the context it mutates so it can be tested alone.

use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickInfo {
    pub tick: u64,
    pub now: Duration,
    pub dt: Duration,
}

type TickCallback<C> = Box<dyn FnMut(&mut C, &mut Timers<C>, TickInfo) + Send>;
type Continuation<C> = Box<dyn FnOnce(&mut C, &mut Timers<C>) + Send>;

/// Pending continuations, keyed by `(due, scheduling order)` so ties keep their order.
pub struct Timers<C> {
    now: Duration,
    next_seq: u64,
    pending: BTreeMap<(Duration, u64), Continuation<C>>,
}

impl<C> Timers<C> {
    fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_seq: 0,
            pending: BTreeMap::new(),
        }
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn schedule_after<F>(&mut self, delay: Duration, continuation: F)
    where
        F: FnOnce(&mut C, &mut Timers<C>) + Send + 'static,
    {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending
            .insert((self.now + delay, seq), Box::new(continuation));
    }

    fn pop_due(&mut self) -> Option<Continuation<C>> {
        let (&key, _) = self.pending.first_key_value()?;
        if key.0 > self.now {
            return None;
        }
        self.pending.remove(&key)
    }
}

pub struct Scheduler<C> {
    tick: u64,
    dt: Duration,
    per_tick: Vec<TickCallback<C>>,
    timers: Timers<C>,
}

impl<C> Scheduler<C> {
    pub fn new(dt: Duration) -> Self {
        Self {
            tick: 0,
            dt,
            per_tick: Vec::new(),
            timers: Timers::new(),
        }
    }

    pub fn every_tick<F>(&mut self, callback: F)
    where
        F: FnMut(&mut C, &mut Timers<C>, TickInfo) + Send + 'static,
    {
        self.per_tick.push(Box::new(callback));
    }

    pub fn schedule_after<F>(&mut self, delay: Duration, continuation: F)
    where
        F: FnOnce(&mut C, &mut Timers<C>) + Send + 'static,
    {
        self.timers.schedule_after(delay, continuation);
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn now(&self) -> Duration {
        self.timers.now
    }

    pub fn pending(&self) -> usize {
        self.timers.pending()
    }

    /// Advances simulated time by one tick: per-tick callbacks first, in
    /// registration order, then every continuation that has come due.
    pub fn advance(&mut self, ctx: &mut C) -> TickInfo {
        self.tick += 1;
        self.timers.now += self.dt;
        let info = TickInfo {
            tick: self.tick,
            now: self.timers.now,
            dt: self.dt,
        };

        for callback in self.per_tick.iter_mut() {
            callback(ctx, &mut self.timers, info);
        }
        while let Some(continuation) = self.timers.pop_due() {
            continuation(ctx, &mut self.timers);
        }
        info
    }
}
