//! End-to-end properties of the controller/mutator handshake, driven with
//! mock targets and counting perturbation sources.

use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dfrace_core::{
    Controller, DelayMode, PayloadLayout, PerturbationPlan, PerturbationSource, RaceObserver,
    RaceSettings, SharedPayload, SpinPolicy, TargetStatus,
};

struct CountHeader;

impl PayloadLayout for CountHeader {
    type Word = u32;
    const HEADER_SIZE: usize = 16;
    const ELEMENT_SIZE: usize = 16;
    const ALIGN: usize = 8;
    const RACE_OFFSET: usize = 8;
}

const VALID: usize = 12;
const OVERFLOW: u32 = 0x7fff_ffff;

fn settings(iterations: u64) -> RaceSettings<u32> {
    RaceSettings {
        iterations,
        overflow: OVERFLOW,
        initial_delay_us: 1,
        delay_bound_us: 3,
        delay_mode: DelayMode::Spin,
        spin: SpinPolicy::Yield { every: 16 },
        perturb: PerturbationPlan {
            count: 10,
            snipe: vec![5, 6],
        },
    }
}

struct Token(Arc<AtomicUsize>);

impl Drop for Token {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Counts live resources; optionally fails every `fail_every`-th open.
struct TokenSource {
    live: Arc<AtomicUsize>,
    fail_every: usize,
}

impl TokenSource {
    fn new(fail_every: usize) -> Self {
        Self {
            live: Arc::new(AtomicUsize::new(0)),
            fail_every,
        }
    }
}

impl PerturbationSource for TokenSource {
    type Resource = Token;

    fn acquire(&mut self, slot: usize) -> io::Result<Token> {
        if self.fail_every != 0 && slot % self.fail_every == 1 {
            return Err(io::Error::from_raw_os_error(libc::ENFILE));
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Token(self.live.clone()))
    }
}

fn noop_target(_: &SharedPayload<CountHeader>) -> TargetStatus {
    0
}

// Handshake liveness: both sides complete exactly N cycles for small N.
#[test]
fn test_handshake_liveness() {
    for n in [0u64, 1, 5] {
        let payload = SharedPayload::<CountHeader>::new(VALID).unwrap();
        let mut calls = 0u64;
        let mut target = |_: &SharedPayload<CountHeader>| -> TargetStatus {
            calls += 1;
            0
        };

        let report = Controller::new(&payload, settings(n))
            .run(&mut target, &mut TokenSource::new(0))
            .unwrap();

        assert_eq!(calls, n, "target calls for N={n}");
        assert_eq!(report.mutator_cycles, n, "mutator cycles for N={n}");
        assert_eq!(report.iterations, n);
    }
}

#[derive(Default)]
struct ResetProbe {
    before_arm: Mutex<Vec<(u64, u32)>>,
}

impl RaceObserver<u32> for ResetProbe {
    fn before_arm(&self, iteration: u64, race_value: u32) {
        self.before_arm.lock().unwrap().push((iteration, race_value));
    }
}

// Reset invariant: the raced field holds the valid value right before every arm.
#[test]
fn test_reset_invariant_before_each_arm() {
    let payload = SharedPayload::<CountHeader>::new(VALID).unwrap();
    let probe = ResetProbe::default();

    Controller::new(&payload, settings(8))
        .with_observer(&probe)
        .run(&mut noop_target, &mut TokenSource::new(0))
        .unwrap();

    let seen = probe.before_arm.lock().unwrap();
    assert_eq!(seen.len(), 8);
    for (i, (iteration, value)) in seen.iter().enumerate() {
        assert_eq!(*iteration, i as u64);
        assert_eq!(*value, VALID as u32);
    }
    assert_eq!(payload.race_value(), VALID as u32);
}

/// Global sequence numbers for mutator writes and controller reads.
#[derive(Default)]
struct Lockstep {
    seq: AtomicU64,
    writes: Mutex<Vec<(u64, u64, u32)>>,
    reads: Mutex<Vec<(u64, u64, u32)>>,
}

impl RaceObserver<u32> for Lockstep {
    fn on_mutate(&self, cycle: u64, written: u32, _delay_us: u64) {
        let s = self.seq.fetch_add(1, Ordering::SeqCst);
        self.writes.lock().unwrap().push((cycle, s, written));
    }

    fn after_disarm(&self, iteration: u64, race_value: u32) {
        let s = self.seq.fetch_add(1, Ordering::SeqCst);
        self.reads.lock().unwrap().push((iteration, s, race_value));
    }
}

// Mutation visibility: each armed-window write is seen by the controller's
// post-disarm read, and the write's sequence number precedes the read's.
#[test]
fn test_mutation_visible_after_disarm() {
    let payload = SharedPayload::<CountHeader>::new(VALID).unwrap();
    let log = Lockstep::default();

    Controller::new(&payload, settings(20))
        .with_observer(&log)
        .run(&mut noop_target, &mut TokenSource::new(0))
        .unwrap();

    let writes = log.writes.lock().unwrap();
    let reads = log.reads.lock().unwrap();
    assert_eq!(writes.len(), 20);
    assert_eq!(reads.len(), 20);
    for (w, r) in writes.iter().zip(reads.iter()) {
        assert_eq!(w.0, r.0, "cycle and iteration line up");
        assert!(w.1 < r.1, "write seq {} must precede read seq {}", w.1, r.1);
        assert_eq!(r.2, OVERFLOW);
        assert_eq!(w.2, OVERFLOW);
    }
}

#[derive(Default)]
struct DelayLog {
    delays: Mutex<Vec<u64>>,
}

impl RaceObserver<u32> for DelayLog {
    fn on_mutate(&self, _cycle: u64, _written: u32, delay_us: u64) {
        self.delays.lock().unwrap().push(delay_us);
    }
}

// Calibration wrap as observed from the running mutator.
#[test]
fn test_delay_sweep_wraps_in_flight() {
    let payload = SharedPayload::<CountHeader>::new(VALID).unwrap();
    let log = DelayLog::default();

    let report = Controller::new(&payload, settings(7))
        .with_observer(&log)
        .run(&mut noop_target, &mut TokenSource::new(0))
        .unwrap();

    // initial 1, bound 3
    assert_eq!(*log.delays.lock().unwrap(), vec![1, 2, 3, 1, 2, 3, 1]);
    assert_eq!(report.final_delay_us, 2);
}

// Perturbation scoping: nothing opened in an iteration outlives it, even
// when some opens fail.
#[test]
fn test_perturbation_released_every_iteration() {
    let payload = SharedPayload::<CountHeader>::new(VALID).unwrap();
    let mut source = TokenSource::new(4);
    let live = source.live.clone();
    let mut at_fire = Vec::new();

    let mut target = |_: &SharedPayload<CountHeader>| -> TargetStatus {
        at_fire.push(live.load(Ordering::SeqCst));
        0
    };

    let report = Controller::new(&payload, settings(5))
        .run(&mut target, &mut source)
        .unwrap();

    // 10 slots, slots 1, 5, 9 fail; slot 6 is sniped before the call (5 already empty)
    assert_eq!(at_fire, vec![6; 5]);
    assert_eq!(report.perturb_failures, 15);
    assert_eq!(source.live.load(Ordering::SeqCst), 0);
}

// Stop termination: once the last target call returns, the run ends within
// the mutator's last pending delay plus scheduling slack.
#[test]
fn test_stop_terminates_with_sleeping_mutator() {
    let payload = SharedPayload::<CountHeader>::new(VALID).unwrap();
    let mut s = settings(3);
    s.delay_mode = DelayMode::Sleep;
    s.initial_delay_us = 2_000;
    s.delay_bound_us = 10_000;

    let mut last_return = None;
    let mut target = |_: &SharedPayload<CountHeader>| -> TargetStatus {
        last_return = Some(Instant::now());
        0
    };

    let report = Controller::new(&payload, s)
        .run(&mut target, &mut TokenSource::new(0))
        .unwrap();
    let tail = last_return.unwrap().elapsed();

    assert_eq!(report.mutator_cycles, 3);
    assert_eq!(report.final_delay_us, 2_003);
    // delays were 2000, 2001, 2002us; only the last can still be pending
    let bound = Duration::from_micros(2_002) + Duration::from_millis(100);
    assert!(tail < bound, "run ended {tail:?} after the last call");
}

// A target that holds the window open longer than the mutator's delay still
// sees the overflow value land while it is running.
#[test]
fn test_slow_target_observes_mutation_in_window() {
    let payload = SharedPayload::<CountHeader>::new(VALID).unwrap();
    let mut saw_overflow = 0u64;

    let mut target = |p: &SharedPayload<CountHeader>| -> TargetStatus {
        let first = p.race_value();
        let deadline = Instant::now() + Duration::from_millis(200);
        while Instant::now() < deadline {
            if p.race_value() != first {
                saw_overflow += 1;
                break;
            }
            std::hint::spin_loop();
        }
        0
    };

    Controller::new(&payload, settings(3))
        .run(&mut target, &mut TokenSource::new(0))
        .unwrap();

    assert_eq!(saw_overflow, 3);
}
