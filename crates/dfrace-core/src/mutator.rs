//! # Mutator thread
//!
//! Waits for the controller to open the race window, sleeps the calibrated
//! delay, overwrites the raced field and reports back. One cycle per
//! controller iteration:
//!
//! ```text
//! Idle → WaitArmed → Delaying → Mutating → SignalDone → Idle
//!   └─ (stop observed at the cycle gate) → Stopped
//! ```

use crate::calibration::{DelayCalibration, DelayMode};
use crate::observer::RaceObserver;
use crate::payload::{PayloadLayout, SharedPayload};
use crate::sync::{ArmPhase, Rendezvous};

use dfrace_config::{log_mutator_debug, log_mutator_trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutatorState {
    Idle,
    WaitArmed,
    Delaying,
    Mutating,
    SignalDone,
    Stopped,
}

/// Returned by the mutator thread when it exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutatorReport {
    pub cycles: u64,
    pub final_delay_us: u64,
    /// Where the loop ended; `Stopped` after a clean stop.
    pub state: MutatorState,
}

pub struct Mutator<'a, L: PayloadLayout, O> {
    rendezvous: &'a Rendezvous,
    payload: &'a SharedPayload<L>,
    observer: &'a O,
    overflow: L::Word,
    calibration: DelayCalibration,
    delay_mode: DelayMode,
    state: MutatorState,
    cycles: u64,
}

impl<'a, L, O> Mutator<'a, L, O>
where
    L: PayloadLayout,
    O: RaceObserver<L::Word>,
{
    pub fn new(
        rendezvous: &'a Rendezvous,
        payload: &'a SharedPayload<L>,
        observer: &'a O,
        overflow: L::Word,
        calibration: DelayCalibration,
        delay_mode: DelayMode,
    ) -> Self {
        Self {
            rendezvous,
            payload,
            observer,
            overflow,
            calibration,
            delay_mode,
            state: MutatorState::Idle,
            cycles: 0,
        }
    }

    /// Run cycles until the controller requests stop.
    pub fn run(mut self) -> MutatorReport {
        log_mutator_debug!(
            "Mutator started",
            initial_delay_us = self.calibration.current_us(),
            bound_us = self.calibration.bound_us()
        );

        loop {
            // Gate: the controller reopens the cycle after every reset, and
            // once more after requesting stop.
            self.rendezvous.wait_until_armed(ArmPhase::Open);
            if self.rendezvous.stop_requested() {
                self.state = MutatorState::Stopped;
                break;
            }
            self.cycle();
        }

        log_mutator_debug!(
            "Mutator stopped",
            cycles = self.cycles,
            final_delay_us = self.calibration.current_us()
        );
        MutatorReport {
            cycles: self.cycles,
            final_delay_us: self.calibration.current_us(),
            state: self.state,
        }
    }

    #[inline(always)]
    fn cycle(&mut self) {
        self.state = MutatorState::WaitArmed;
        self.rendezvous.signal_busy(true);
        // Armed, or already Closed again if the target returned before we
        // polled. Either way the controller has moved past Open.
        let seen = self.rendezvous.wait_while_armed(ArmPhase::Open);
        if seen == ArmPhase::Closed {
            log_mutator_trace!("Window closed before observed", cycle = self.cycles);
        }

        self.state = MutatorState::Delaying;
        let delay_us = self.calibration.current_us();
        self.delay_mode.wait(self.calibration.current());

        self.state = MutatorState::Mutating;
        self.payload.store_race(self.overflow);
        self.observer.on_mutate(self.cycles, self.overflow, delay_us);

        self.state = MutatorState::SignalDone;
        self.calibration.advance();
        self.rendezvous.wait_until_armed(ArmPhase::Closed);
        self.rendezvous.signal_busy(false);

        self.cycles += 1;
        self.state = MutatorState::Idle;
        log_mutator_trace!("Cycle done", cycle = self.cycles, delay_us = delay_us);
    }
}
