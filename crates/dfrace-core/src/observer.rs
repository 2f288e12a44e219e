use crate::payload::RaceWord;
use crate::target::TargetStatus;

/// Instrumentation hooks called at the handshake points.
///
/// Controller hooks run on the controller thread, `on_mutate` on the mutator
/// thread. Every method defaults to a no-op. Keep implementations cheap:
/// `before_arm` and `on_mutate` sit right next to the race window.
pub trait RaceObserver<W: RaceWord>: Sync {
    /// Race field as seen just before `armed` is raised.
    fn before_arm(&self, _iteration: u64, _race_value: W) {}

    /// Race field as seen after the mutator reported done.
    fn after_disarm(&self, _iteration: u64, _race_value: W) {}

    /// Race field right after the controller restored it.
    fn on_reset(&self, _iteration: u64, _race_value: W) {}

    /// Mutator wrote `written` after waiting `delay_us`.
    fn on_mutate(&self, _cycle: u64, _written: W, _delay_us: u64) {}

    fn on_target_status(&self, _iteration: u64, _status: TargetStatus) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl<W: RaceWord> RaceObserver<W> for NoopObserver {}
