//! # Race controller
//!
//! Owns the iteration loop. Spawns the mutator once inside a thread scope,
//! drives one handshake per iteration around a single target call, then
//! stops and joins the mutator. Shared state lives on the controller's
//! stack and is borrowed by both threads, so nothing outlives the scope.

use std::thread;
use std::time::{Duration, Instant};

use crate::calibration::{DelayCalibration, DelayMode};
use crate::error::{HarnessError, Result};
use crate::mutator::Mutator;
use crate::observer::{NoopObserver, RaceObserver};
use crate::payload::{PayloadLayout, RaceWord, SharedPayload};
use crate::perturb::{PerturbationPlan, PerturbationSet, PerturbationSource};
use crate::sync::{BusyPhase, Rendezvous, SpinPolicy};
use crate::target::TargetOperation;

use dfrace_config::{log_controller_debug, log_controller_info, log_controller_trace};

/// Name given to the spawned mutator thread.
pub const MUTATOR_THREAD_NAME: &str = "dfrace-mutator";

/// Per-run parameters.
#[derive(Debug, Clone)]
pub struct RaceSettings<W: RaceWord> {
    pub iterations: u64,
    /// Value the mutator writes into the raced field.
    pub overflow: W,
    pub initial_delay_us: u64,
    pub delay_bound_us: u64,
    pub delay_mode: DelayMode,
    pub spin: SpinPolicy,
    pub perturb: PerturbationPlan,
}

impl<W: RaceWord> RaceSettings<W> {
    pub fn new(iterations: u64, overflow: W, initial_delay_us: u64) -> Self {
        Self {
            iterations,
            overflow,
            initial_delay_us,
            delay_bound_us: 100_000,
            delay_mode: DelayMode::Sleep,
            spin: SpinPolicy::Spin,
            perturb: PerturbationPlan::default(),
        }
    }
}

/// Summary of one run. Says nothing about whether the race was won.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub iterations: u64,
    pub mutator_cycles: u64,
    pub perturb_failures: u64,
    /// Target calls that returned a non-zero status.
    pub target_errors: u64,
    pub final_delay_us: u64,
    pub elapsed: Duration,
}

#[derive(Default)]
struct LoopStats {
    perturb_failures: u64,
    target_errors: u64,
}

pub struct Controller<'a, L: PayloadLayout, O = NoopObserver> {
    payload: &'a SharedPayload<L>,
    settings: RaceSettings<L::Word>,
    observer: &'a O,
}

impl<'a, L: PayloadLayout> Controller<'a, L, NoopObserver> {
    pub fn new(payload: &'a SharedPayload<L>, settings: RaceSettings<L::Word>) -> Self {
        Self {
            payload,
            settings,
            observer: &NoopObserver,
        }
    }
}

impl<'a, L, O> Controller<'a, L, O>
where
    L: PayloadLayout,
    O: RaceObserver<L::Word>,
{
    pub fn with_observer<O2: RaceObserver<L::Word>>(self, observer: &'a O2) -> Controller<'a, L, O2> {
        Controller {
            payload: self.payload,
            settings: self.settings,
            observer,
        }
    }

    pub fn settings(&self) -> &RaceSettings<L::Word> {
        &self.settings
    }

    /// Run all iterations against `target`, perturbing with `source`.
    pub fn run<T, S>(&self, target: &mut T, source: &mut S) -> Result<RunReport>
    where
        T: TargetOperation<L>,
        S: PerturbationSource,
    {
        let settings = &self.settings;
        let rendezvous = Rendezvous::new(settings.spin);
        let start = Instant::now();

        log_controller_info!(
            "Starting race",
            iterations = settings.iterations,
            overflow = settings.overflow.as_u64(),
            valid = self.payload.valid_value().as_u64(),
            initial_delay_us = settings.initial_delay_us,
            perturb = settings.perturb.count
        );

        thread::scope(|scope| -> Result<RunReport> {
            let mutator = Mutator::new(
                &rendezvous,
                self.payload,
                self.observer,
                settings.overflow,
                DelayCalibration::new(settings.initial_delay_us, settings.delay_bound_us),
                settings.delay_mode,
            );
            let handle = thread::Builder::new()
                .name(MUTATOR_THREAD_NAME.to_string())
                .spawn_scoped(scope, move || mutator.run())
                .map_err(HarnessError::Spawn)?;

            let mut stats = LoopStats::default();
            for iteration in 0..settings.iterations {
                self.iterate(iteration, &rendezvous, target, source, &mut stats);
            }

            // Stop must be visible before the gate reopens.
            rendezvous.request_stop();
            rendezvous.open_cycle();
            let mutator = handle.join().map_err(|_| HarnessError::MutatorPanicked)?;
            log_controller_debug!(
                "Mutator joined",
                state = tracing::field::debug(mutator.state),
                cycles = mutator.cycles
            );

            let report = RunReport {
                iterations: settings.iterations,
                mutator_cycles: mutator.cycles,
                perturb_failures: stats.perturb_failures,
                target_errors: stats.target_errors,
                final_delay_us: mutator.final_delay_us,
                elapsed: start.elapsed(),
            };
            log_controller_info!(
                "Race finished",
                iterations = report.iterations,
                mutator_cycles = report.mutator_cycles,
                target_errors = report.target_errors,
                elapsed_ms = report.elapsed.as_millis() as u64
            );
            Ok(report)
        })
    }

    #[inline(always)]
    fn iterate<T, S>(
        &self,
        iteration: u64,
        rendezvous: &Rendezvous,
        target: &mut T,
        source: &mut S,
        stats: &mut LoopStats,
    ) where
        T: TargetOperation<L>,
        S: PerturbationSource,
    {
        let plan = &self.settings.perturb;

        rendezvous.open_cycle();
        let mut perturbation = PerturbationSet::acquire(source, plan.count);
        stats.perturb_failures += perturbation.failed() as u64;

        // Mutator must be committed to this cycle before the window opens.
        rendezvous.wait_until_busy(BusyPhase::Busy);
        self.observer.before_arm(iteration, self.payload.race_value());
        rendezvous.signal_armed(true);

        // Snipe between arming and the call, not before.
        perturbation.release_slots(&plan.snipe);
        let status = target.fire(self.payload);

        rendezvous.signal_armed(false);
        rendezvous.wait_until_busy(BusyPhase::Done);
        self.observer.after_disarm(iteration, self.payload.race_value());

        if status != 0 {
            stats.target_errors += 1;
            log_controller_trace!("Target returned error", iteration = iteration, status = status);
        }
        self.observer.on_target_status(iteration, status);

        self.payload.reset();
        self.observer.on_reset(iteration, self.payload.race_value());
        perturbation.release_all();

        log_controller_debug!("Iteration complete", iteration = iteration, status = status);
    }
}
