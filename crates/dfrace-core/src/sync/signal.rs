use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::atomic::{fence, AtomicU8, Ordering};

// Keep each signal on its own pair of cache lines so the two spinning
// threads never share a line they are not handing off.
#[repr(align(128))]
pub(crate) struct CachePadded<T>(pub(crate) T);

/// A value that fits in one byte and can travel through a [`Signal`].
pub trait Phase: Copy + Eq + Debug {
    fn to_raw(self) -> u8;
    fn from_raw(raw: u8) -> Self;
}

/// Controller → mutator signal.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmPhase {
    /// Previous window disarmed; the mutator must not start a new cycle.
    Closed = 0,
    /// State has been reset; the mutator may commit to the next cycle.
    Open = 1,
    /// Race window is open.
    Armed = 2,
}

impl Phase for ArmPhase {
    #[inline(always)]
    fn to_raw(self) -> u8 {
        self as u8
    }

    #[inline(always)]
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => ArmPhase::Open,
            2 => ArmPhase::Armed,
            _ => ArmPhase::Closed,
        }
    }
}

/// Mutator → controller signal.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyPhase {
    /// Nothing committed yet.
    Idle = 0,
    /// Mutator has committed to the current cycle and is waiting for (or inside) the window.
    Busy = 1,
    /// Mutation written and disarm observed.
    Done = 2,
}

impl Phase for BusyPhase {
    #[inline(always)]
    fn to_raw(self) -> u8 {
        self as u8
    }

    #[inline(always)]
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => BusyPhase::Busy,
            2 => BusyPhase::Done,
            _ => BusyPhase::Idle,
        }
    }
}

/// Single-writer, single-reader ternary flag.
///
/// `publish` is a release store followed by a full fence, so every write
/// the publisher made before it (including plain payload stores) is ordered
/// before the transition. `load` is an acquire load; anything read after
/// observing a phase sees those writes.
pub struct Signal<P: Phase> {
    raw: AtomicU8,
    _phase: PhantomData<P>,
}

impl<P: Phase> Signal<P> {
    pub fn new(initial: P) -> Self {
        Self {
            raw: AtomicU8::new(initial.to_raw()),
            _phase: PhantomData,
        }
    }

    #[inline(always)]
    pub fn load(&self) -> P {
        P::from_raw(self.raw.load(Ordering::Acquire))
    }

    #[inline(always)]
    pub fn publish(&self, phase: P) {
        self.raw.store(phase.to_raw(), Ordering::Release);
        fence(Ordering::SeqCst);
    }
}
