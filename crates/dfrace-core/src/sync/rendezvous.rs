use std::sync::atomic::{fence, AtomicBool, Ordering};

use super::signal::{ArmPhase, BusyPhase, CachePadded, Phase, Signal};

/// How a busy-wait loop spends each poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SpinPolicy {
    /// CPU relax hint only. Tightest handoff.
    #[default]
    Spin,
    /// Relax hint plus `thread::yield_now` every `every` polls, for
    /// single-core or oversubscribed hosts. Ordering is unchanged.
    Yield { every: u32 },
}

impl SpinPolicy {
    #[inline(always)]
    fn relax(self, polls: u64) {
        std::hint::spin_loop();
        if let SpinPolicy::Yield { every } = self {
            if polls % u64::from(every.max(1)) == 0 {
                std::thread::yield_now();
            }
        }
    }
}

/// Lock-free handshake state shared by the controller and the mutator.
///
/// Per cycle the controller drives `armed` through
/// `Open → Armed → Closed` and the mutator drives `busy` through
/// `Busy → Done`. Each side only advances after observing the other:
///
/// ```text
/// controller: open ─┐           ┌─ arm ── target ── disarm ─┐          ┌─ reset ─ open ...
/// mutator:          └─ busy ────┘  sleep ─ mutate ─────────┴─ done ───┘
/// ```
///
/// The mutator cannot re-commit until the controller reopens the cycle, so
/// the controller's wait for `Done` can never miss a transition.
pub struct Rendezvous {
    armed: CachePadded<Signal<ArmPhase>>,
    busy: CachePadded<Signal<BusyPhase>>,
    stop: CachePadded<AtomicBool>,
    policy: SpinPolicy,
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self::new(SpinPolicy::default())
    }
}

impl Rendezvous {
    pub fn new(policy: SpinPolicy) -> Self {
        Self {
            armed: CachePadded(Signal::new(ArmPhase::Closed)),
            busy: CachePadded(Signal::new(BusyPhase::Idle)),
            stop: CachePadded(AtomicBool::new(false)),
            policy,
        }
    }

    /// Controller: `true` opens the race window, `false` disarms it.
    #[inline(always)]
    pub fn signal_armed(&self, armed: bool) {
        let phase = if armed {
            ArmPhase::Armed
        } else {
            ArmPhase::Closed
        };
        self.armed.0.publish(phase);
    }

    /// Mutator: `true` commits to the current cycle, `false` reports done.
    #[inline(always)]
    pub fn signal_busy(&self, busy: bool) {
        let phase = if busy {
            BusyPhase::Busy
        } else {
            BusyPhase::Done
        };
        self.busy.0.publish(phase);
    }

    /// Controller: allow the mutator to start its next cycle.
    #[inline(always)]
    pub fn open_cycle(&self) {
        self.armed.0.publish(ArmPhase::Open);
    }

    /// Must be followed by [`open_cycle`](Self::open_cycle) so a mutator
    /// parked at its gate wakes up and observes it.
    pub fn request_stop(&self) {
        self.stop.0.store(true, Ordering::Release);
        fence(Ordering::SeqCst);
    }

    #[inline(always)]
    pub fn stop_requested(&self) -> bool {
        self.stop.0.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn arm_phase(&self) -> ArmPhase {
        self.armed.0.load()
    }

    #[inline(always)]
    pub fn busy_phase(&self) -> BusyPhase {
        self.busy.0.load()
    }

    /// Spin until the arm signal reads `phase`. Returns the number of polls.
    #[inline(always)]
    pub fn wait_until_armed(&self, phase: ArmPhase) -> u64 {
        spin_until(&self.armed.0, phase, self.policy)
    }

    /// Spin while the arm signal still reads `phase` and return the phase
    /// that replaced it. Use this where the next phase may be transient: a
    /// fast target can arm and disarm before the mutator polls once.
    #[inline(always)]
    pub fn wait_while_armed(&self, phase: ArmPhase) -> ArmPhase {
        let mut polls = 0u64;
        loop {
            let seen = self.armed.0.load();
            if seen != phase {
                return seen;
            }
            polls = polls.wrapping_add(1);
            self.policy.relax(polls);
        }
    }

    /// Spin until the busy signal reads `phase`. Returns the number of polls.
    #[inline(always)]
    pub fn wait_until_busy(&self, phase: BusyPhase) -> u64 {
        spin_until(&self.busy.0, phase, self.policy)
    }
}

// Only use on phases that stay put until the waiter itself acts.
#[inline(always)]
fn spin_until<P: Phase>(signal: &Signal<P>, target: P, policy: SpinPolicy) -> u64 {
    let mut polls = 0u64;
    while signal.load() != target {
        polls = polls.wrapping_add(1);
        policy.relax(polls);
    }
    polls
}
