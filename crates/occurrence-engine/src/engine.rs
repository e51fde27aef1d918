//! The scheduling engine.
//!
//! A timer thread owns the engine's state. It receives commands over a
//! channel, runs a next-occurrence search on every restart, and sleeps until
//! the next occurrence is due (or a command arrives). Due occurrences are
//! handed to an [`AlarmSink`] with the databases blocked, after which the
//! engine searches again.
//!
//! Opening a store also starts a catch-up search on a worker thread for the
//! occurrences that became due while the store was closed; the worker sends
//! its finished [`OccurrencesRange`] back to the timer thread.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{after, bounded, never, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::occurrence::{Occurrence, StoreId};
use crate::range::OccurrencesRange;
use crate::search::{OccurrencesRangeSearch, StopHandle};
use crate::store::RuleStore;
use crate::timeline::Timeline;

/// Source of the current time, in Unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// Downstream consumer of due occurrences.
pub trait AlarmSink: Send + Sync {
    /// Occurrences having a time point at `time`, which has been reached.
    fn activate(&self, time: i64, occurrences: Vec<Occurrence>);

    /// Occurrences of `store` that became due while it was closed.
    fn activate_old(&self, store: &str, occurrences: Vec<Occurrence>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No timer pending.
    Idle,
    /// Waiting for the occurrences due at `next`.
    Armed { next: i64 },
    /// Handing due occurrences to the sink.
    Activating,
    /// The last cycle failed; a retry timer is pending.
    Retrying,
}

enum Command {
    Restart,
    Cancel,
    Flush(Sender<()>),
    Shutdown,
}

struct CatchUp {
    store: StoreId,
    since: i64,
    until: i64,
    result: Result<OccurrencesRange, EngineError>,
}

struct Shared {
    timeline: Timeline,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn AlarmSink>,
    retry_delay: Duration,
    state: Mutex<EngineState>,
    catch_ups: Mutex<BTreeMap<StoreId, StopHandle>>,
}

pub struct NextOccurrencesEngine {
    shared: Arc<Shared>,
    commands: Sender<Command>,
    catch_up_tx: Sender<CatchUp>,
    timer: Option<JoinHandle<()>>,
}

impl NextOccurrencesEngine {
    /// Spawn the timer thread and run a first search.
    pub fn start(
        timeline: Timeline,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn AlarmSink>,
        config: &EngineConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            timeline,
            clock,
            sink,
            retry_delay: config.retry_delay(),
            state: Mutex::new(EngineState::Idle),
            catch_ups: Mutex::new(BTreeMap::new()),
        });
        let (commands, command_rx) = unbounded();
        let (catch_up_tx, catch_up_rx) = unbounded();
        let timer = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || run_timer(shared, command_rx, catch_up_rx))
        };
        let engine = Self {
            shared,
            commands,
            catch_up_tx,
            timer: Some(timer),
        };
        engine.restart();
        engine
    }

    pub fn timeline(&self) -> &Timeline {
        &self.shared.timeline
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state.lock()
    }

    /// Drop any pending timer and search again.
    pub fn restart(&self) {
        self.send(Command::Restart);
    }

    /// Drop any pending timer.
    pub fn cancel(&self) {
        self.send(Command::Cancel);
    }

    /// Wait until every command sent so far has been handled.
    pub fn flush(&self) {
        let (tx, rx) = bounded(1);
        self.send(Command::Flush(tx));
        let _ = rx.recv();
    }

    /// Open `store` and look for what it missed since its last search.
    ///
    /// The store's watermark moves to now at once so that the timer never
    /// hands out the missed occurrences a second time; the catch-up search
    /// covers the interval in between on a worker thread.
    pub fn open_store(&self, store: Arc<dyn RuleStore>) -> Result<(), EngineError> {
        let shared = &self.shared;
        let id = store.store_id().to_string();
        let since = store.last_search()?;
        let until = shared.clock.now();
        {
            let _guard = shared.timeline.stores().block_databases();
            if until > since {
                store.set_last_search(until)?;
            }
            shared.timeline.stores().open(Arc::clone(&store));
        }

        if until > since {
            let stop = StopHandle::new();
            if let Some(previous) = shared.catch_ups.lock().insert(id.clone(), stop.clone()) {
                previous.stop();
            }
            let registry = Arc::clone(shared.timeline.registry());
            let utc_offset = shared.timeline.utc_offset();
            let tx = self.catch_up_tx.clone();
            debug!(store = %id, since, until, "starting catch-up search");
            thread::spawn(move || {
                let result =
                    OccurrencesRangeSearch::new(since, until, vec![store], &registry, utc_offset)
                        .with_stop_handle(stop)
                        .start();
                let _ = tx.send(CatchUp {
                    store: id,
                    since,
                    until,
                    result,
                });
            });
        }
        self.restart();
        Ok(())
    }

    /// Close a store, abandoning its catch-up search if one is running.
    pub fn close_store(&self, id: &str) -> Option<Arc<dyn RuleStore>> {
        if let Some(stop) = self.shared.catch_ups.lock().remove(id) {
            stop.stop();
        }
        let closed = {
            let _guard = self.shared.timeline.stores().block_databases();
            self.shared.timeline.stores().close(id)
        };
        self.restart();
        closed
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("engine timer thread is gone");
        }
    }
}

impl Drop for NextOccurrencesEngine {
    fn drop(&mut self) {
        for stop in self.shared.catch_ups.lock().values() {
            stop.stop();
        }
        let _ = self.commands.send(Command::Shutdown);
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }
    }
}

fn run_timer(shared: Arc<Shared>, commands: Receiver<Command>, catch_ups: Receiver<CatchUp>) {
    let mut deadline: Option<Instant> = None;
    loop {
        let timeout = match deadline {
            Some(at) => after(at.saturating_duration_since(Instant::now())),
            None => never(),
        };
        select! {
            recv(commands) -> command => match command {
                Ok(Command::Restart) => deadline = shared.cycle(),
                Ok(Command::Cancel) => {
                    deadline = None;
                    shared.set_state(EngineState::Idle);
                }
                Ok(Command::Flush(ack)) => {
                    let _ = ack.send(());
                }
                Ok(Command::Shutdown) | Err(_) => break,
            },
            recv(catch_ups) -> done => {
                if let Ok(done) = done {
                    shared.finish_catch_up(done);
                    deadline = shared.cycle();
                }
            },
            recv(timeout) -> _ => deadline = shared.cycle(),
        }
    }
    debug!("engine timer stopped");
}

impl Shared {
    fn set_state(&self, state: EngineState) {
        *self.state.lock() = state;
    }

    /// Search, hand out whatever is already due, and return when to wake up
    /// next. A failed cycle is logged and retried after `retry_delay`.
    fn cycle(&self) -> Option<Instant> {
        match self.search_and_activate() {
            Ok(deadline) => deadline,
            Err(e) => {
                error!(error = %e, retry_secs = self.retry_delay.as_secs(), "search cycle failed");
                self.set_state(EngineState::Retrying);
                Some(Instant::now() + self.retry_delay)
            }
        }
    }

    fn search_and_activate(&self) -> Result<Option<Instant>, EngineError> {
        loop {
            let now = self.clock.now();
            let stores = self.timeline.stores().snapshot();
            let mut bases = BTreeMap::new();
            for store in &stores {
                bases.insert(store.store_id().to_string(), store.last_search()?);
            }
            let occs = self
                .timeline
                .next_search(now)
                .with_base_times(bases)
                .start()?;

            match occs.get_next_occurrence_time() {
                Some(next) if next <= now => {
                    self.activate(next, occs.get_list(), &stores)?;
                }
                Some(next) => {
                    advance_watermarks(&stores, now)?;
                    self.set_state(EngineState::Armed { next });
                    let delay = Duration::from_secs((next - now).unsigned_abs());
                    info!(next, delay_secs = delay.as_secs(), "engine armed");
                    return Ok(Some(Instant::now() + delay));
                }
                None => {
                    advance_watermarks(&stores, now)?;
                    self.set_state(EngineState::Idle);
                    info!("no next occurrence, engine idle");
                    return Ok(None);
                }
            }
        }
    }

    fn activate(
        &self,
        next: i64,
        occurrences: Vec<Occurrence>,
        stores: &[Arc<dyn RuleStore>],
    ) -> Result<(), EngineError> {
        self.set_state(EngineState::Activating);
        let _guard = self.timeline.stores().block_databases();
        let due = self.still_present(occurrences);
        info!(next, count = due.len(), "activating occurrences");
        if !due.is_empty() {
            self.sink.activate(next, due);
        }
        advance_watermarks(stores, next)
    }

    /// Drop occurrences whose store or item vanished since the search.
    fn still_present(&self, occurrences: Vec<Occurrence>) -> Vec<Occurrence> {
        occurrences
            .into_iter()
            .filter(|o| match self.timeline.stores().get(&o.store) {
                Some(store) if store.item_exists(o.item) => true,
                Some(_) => {
                    warn!(store = %o.store, item = o.item, "skipping occurrence of deleted item");
                    false
                }
                None => {
                    warn!(store = %o.store, item = o.item, "skipping occurrence of closed store");
                    false
                }
            })
            .collect()
    }

    fn finish_catch_up(&self, done: CatchUp) {
        let CatchUp {
            store,
            since,
            until,
            result,
        } = done;
        {
            let mut catch_ups = self.catch_ups.lock();
            match catch_ups.get(&store) {
                Some(stop) if !stop.is_stopped() => {
                    catch_ups.remove(&store);
                }
                _ => {
                    debug!(store = %store, "discarding abandoned catch-up");
                    return;
                }
            }
        }
        let occs = match result {
            Ok(occs) => occs,
            Err(e) => {
                error!(store = %store, error = %e, "catch-up search failed");
                return;
            }
        };

        let _guard = self.timeline.stores().block_databases();
        let old: Vec<Occurrence> = occs
            .get_dict()
            .values()
            .flat_map(|items| items.values().flatten())
            .filter(|o| {
                let due = o.alarm.time().unwrap_or(o.start);
                since < due && due <= until
            })
            .cloned()
            .collect();
        let old = self.still_present(old);
        info!(store = %store, count = old.len(), "catch-up completed");
        if !old.is_empty() {
            self.sink.activate_old(&store, old);
        }
    }
}

/// Move every store's watermark forward to `time`; never backward.
fn advance_watermarks(stores: &[Arc<dyn RuleStore>], time: i64) -> Result<(), EngineError> {
    for store in stores {
        let current = store.last_search()?;
        if current > time {
            warn!(
                store = store.store_id(),
                current, time, "watermark ahead of search time, not moving it back"
            );
            continue;
        }
        store.set_last_search(time)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occurrence::Alarm;
    use crate::registry::RuleRegistry;
    use crate::rule::{Rule, TimeStandard};
    use crate::rules::once;
    use crate::store::{MemoryStore, StoreSet};
    use crate::utc_offset::UtcOffset;
    use serde_json::Value;
    use std::sync::atomic::{AtomicI64, Ordering};

    const NOW: i64 = 1_780_000_000;
    const WAIT: Duration = Duration::from_secs(5);

    struct FixedClock(AtomicI64);

    impl FixedClock {
        fn new(now: i64) -> Arc<Self> {
            Arc::new(Self(AtomicI64::new(now)))
        }

        fn set(&self, now: i64) {
            self.0.store(now, Ordering::SeqCst);
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    enum Event {
        Due(i64, Vec<Occurrence>),
        Old(String, Vec<Occurrence>),
    }

    struct ChannelSink(Sender<Event>);

    impl AlarmSink for ChannelSink {
        fn activate(&self, time: i64, occurrences: Vec<Occurrence>) {
            let _ = self.0.send(Event::Due(time, occurrences));
        }

        fn activate_old(&self, store: &str, occurrences: Vec<Occurrence>) {
            let _ = self.0.send(Event::Old(store.to_string(), occurrences));
        }
    }

    fn once_at(start: i64) -> Rule {
        once::make_rule(start, None, None, TimeStandard::Utc, Value::Null).unwrap()
    }

    fn setup(
        registry: RuleRegistry,
        clock: Arc<FixedClock>,
    ) -> (NextOccurrencesEngine, Receiver<Event>) {
        let timeline = Timeline::new(
            Arc::new(StoreSet::new()),
            Arc::new(registry),
            UtcOffset::fixed(0),
        );
        let (tx, rx) = unbounded();
        let engine = NextOccurrencesEngine::start(
            timeline,
            clock,
            Arc::new(ChannelSink(tx)),
            &EngineConfig::default(),
        );
        (engine, rx)
    }

    #[test]
    fn test_idle_without_stores() {
        let (engine, _rx) = setup(RuleRegistry::with_basic_rules(), FixedClock::new(NOW));
        engine.flush();
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_armed_for_future_occurrence_then_cancel() {
        let (engine, rx) = setup(RuleRegistry::with_basic_rules(), FixedClock::new(NOW));
        let store = Arc::new(MemoryStore::new("a", NOW));
        store.update_item_rules(1, &[once_at(NOW + 3600)]).unwrap();
        engine.open_store(store.clone()).unwrap();
        engine.flush();
        assert_eq!(engine.state(), EngineState::Armed { next: NOW + 3600 });
        assert_eq!(store.last_search().unwrap(), NOW);

        engine.cancel();
        engine.flush();
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_fires_when_timer_expires() {
        let clock = FixedClock::new(NOW);
        let (engine, rx) = setup(RuleRegistry::with_basic_rules(), clock.clone());
        let store = Arc::new(MemoryStore::new("a", NOW));
        store.update_item_rules(1, &[once_at(NOW + 1)]).unwrap();
        engine.open_store(store.clone()).unwrap();
        engine.flush();
        clock.set(NOW + 1);

        match rx.recv_timeout(WAIT).unwrap() {
            Event::Due(time, occs) => {
                assert_eq!(time, NOW + 1);
                assert_eq!(occs.len(), 1);
                assert_eq!(occs[0].alarm, Alarm::Unset);
            }
            Event::Old(..) => panic!("unexpected catch-up"),
        }
        engine.flush();
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(store.last_search().unwrap(), NOW + 1);
    }

    #[test]
    fn test_catch_up_reports_missed_occurrences_once() {
        let clock = FixedClock::new(NOW);
        let (engine, rx) = setup(RuleRegistry::with_basic_rules(), clock);
        let store = Arc::new(MemoryStore::new("a", NOW - 7200));
        store
            .update_item_rules(1, &[once_at(NOW - 3600), once_at(NOW - 10_000)])
            .unwrap();
        engine.open_store(store.clone()).unwrap();

        match rx.recv_timeout(WAIT).unwrap() {
            Event::Old(id, occs) => {
                assert_eq!(id, "a");
                assert_eq!(occs.len(), 1);
                assert_eq!(occs[0].start, NOW - 3600);
            }
            Event::Due(..) => panic!("missed occurrence handed out by the timer"),
        }
        engine.flush();
        assert_eq!(store.last_search().unwrap(), NOW);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_due_occurrences_activated_in_order() {
        let clock = FixedClock::new(NOW);
        let (engine, rx) = setup(RuleRegistry::with_basic_rules(), clock.clone());
        let store = Arc::new(MemoryStore::new("a", NOW));
        store.update_item_rules(1, &[once_at(NOW + 100)]).unwrap();
        store.update_item_rules(2, &[once_at(NOW + 50)]).unwrap();
        engine.open_store(store.clone()).unwrap();
        engine.flush();
        assert_eq!(engine.state(), EngineState::Armed { next: NOW + 50 });

        // Jumping past both: each time point is handed out separately.
        clock.set(NOW + 200);
        engine.restart();
        engine.flush();
        let mut seen = Vec::new();
        while let Ok(Event::Due(time, occs)) = rx.try_recv() {
            seen.push((time, occs[0].item));
        }
        assert_eq!(seen, vec![(NOW + 50, 2), (NOW + 100, 1)]);
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(store.last_search().unwrap(), NOW + 200);
    }

    #[test]
    fn test_failed_cycle_retries() {
        let (engine, _rx) = setup(RuleRegistry::new(), FixedClock::new(NOW));
        let store = Arc::new(MemoryStore::new("a", NOW));
        store.update_item_rules(1, &[once_at(NOW + 100)]).unwrap();
        engine.open_store(store).unwrap();
        engine.flush();
        assert_eq!(engine.state(), EngineState::Retrying);
    }

    #[test]
    fn test_watermarks_never_move_back() {
        let a: Arc<dyn RuleStore> = Arc::new(MemoryStore::new("a", 100));
        let b: Arc<dyn RuleStore> = Arc::new(MemoryStore::new("b", 300));
        advance_watermarks(&[a.clone(), b.clone()], 200).unwrap();
        assert_eq!(a.last_search().unwrap(), 200);
        assert_eq!(b.last_search().unwrap(), 300);
    }
}
