//! # race subcommand plumbing
//!
//! Turns the positional arguments plus layered config into harness
//! settings, opens the backing files, and runs the controller.

use anyhow::{Context, Result};
use console::style;

use dfrace_config::{log_cli_debug, log_cli_info, Config, DelayModeConfig, SpinMode};
use dfrace_core::{
    Controller, DelayMode, FileRangeCopy, PerturbationPlan, RaceSettings, RangeRequest, RunReport,
    SocketSource, SpinPolicy,
};

/// The four positional run parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaceArgs {
    pub elements: usize,
    pub overflow: u16,
    pub iterations: u64,
    pub initial_delay_us: u64,
}

pub fn settings_from(args: &RaceArgs, config: &Config) -> RaceSettings<u16> {
    let spin = match config.race.spin {
        SpinMode::Spin => SpinPolicy::Spin,
        SpinMode::Yield => SpinPolicy::Yield {
            every: config.race.yield_every,
        },
    };
    let delay_mode = match config.race.delay_mode {
        DelayModeConfig::Sleep => DelayMode::Sleep,
        DelayModeConfig::Spin => DelayMode::Spin,
    };
    let perturb = if config.perturb.enabled {
        PerturbationPlan {
            count: config.perturb.count,
            snipe: config.perturb.snipe.clone(),
        }
    } else {
        PerturbationPlan::disabled()
    };

    RaceSettings {
        iterations: args.iterations,
        overflow: args.overflow,
        initial_delay_us: args.initial_delay_us,
        delay_bound_us: config.race.delay_bound,
        delay_mode,
        spin,
        perturb,
    }
}

/// Open backing resources, build the request and race it.
pub fn execute(args: &RaceArgs, config: &Config) -> Result<RunReport> {
    let mut target = FileRangeCopy::open(&config.target.source, &config.target.dest)
        .context("Failed to set up backing files")?;
    let payload = RangeRequest::build(
        args.elements,
        config.target.src_offset,
        config.target.src_length,
        target.dest_fd(),
    )
    .context("Failed to build request payload")?;
    target
        .reserve(config.target.src_length)
        .context("Failed to size copy buffer")?;

    log_cli_info!(
        "Backing files ready",
        source = tracing::field::display(target.source_path().display()),
        dest = tracing::field::display(target.dest_path().display()),
        bytes = payload.size() as u64
    );

    // Flush dirty pages so the first iterations are not skewed by writeback.
    nix::unistd::sync();

    let settings = settings_from(args, config);
    log_cli_debug!("Resolved settings", bound_us = settings.delay_bound_us);

    let report = Controller::new(&payload, settings)
        .run(&mut target, &mut SocketSource)
        .context("Race harness failed")?;
    Ok(report)
}

pub fn print_report(report: &RunReport) {
    println!("{}", style("Race complete").green().bold());
    println!("  Iterations:        {}", report.iterations);
    println!("  Mutator cycles:    {}", report.mutator_cycles);
    println!("  Target errors:     {}", report.target_errors);
    println!("  Perturb failures:  {}", report.perturb_failures);
    println!("  Final delay:       {}us", report.final_delay_us);
    println!("  Elapsed:           {:.3}s", report.elapsed.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfrace_config::testing::TestEnvironment;
    use dfrace_core::HarnessError;

    fn args(iterations: u64) -> RaceArgs {
        RaceArgs {
            elements: 4,
            overflow: 0xfff0,
            iterations,
            initial_delay_us: 1,
        }
    }

    #[test]
    fn test_settings_follow_config() {
        let mut config = Config::default();
        config.race.spin = SpinMode::Yield;
        config.race.yield_every = 7;
        config.race.delay_bound = 321;
        config.race.delay_mode = DelayModeConfig::Spin;

        let s = settings_from(&args(9), &config);
        assert_eq!(s.iterations, 9);
        assert_eq!(s.overflow, 0xfff0);
        assert_eq!(s.delay_bound_us, 321);
        assert_eq!(s.spin, SpinPolicy::Yield { every: 7 });
        assert_eq!(s.delay_mode, DelayMode::Spin);
        assert_eq!(s.perturb.snipe, vec![50, 51]);
    }

    #[test]
    fn test_disabled_perturbation() {
        let mut config = Config::default();
        config.perturb.enabled = false;
        let s = settings_from(&args(1), &config);
        assert_eq!(s.perturb, PerturbationPlan::disabled());
    }

    #[test]
    fn test_execute_against_temp_files() {
        let env = TestEnvironment::new().unwrap();
        env.seed_source(b"0123456789").unwrap();
        let mut config = env.config();
        config.target.src_length = 10;
        config.race.spin = SpinMode::Yield;
        config.race.delay_mode = DelayModeConfig::Spin;

        let report = execute(&args(3), &config).unwrap();
        assert_eq!(report.mutator_cycles, 3);
        assert!(env.dest.exists());
    }

    #[test]
    fn test_execute_reports_unallocatable_src_length() {
        let env = TestEnvironment::new().unwrap();
        let mut config = env.config();
        config.target.src_length = u64::MAX;

        let err = execute(&args(1), &config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::Alloc { .. })
        ));
    }

    #[test]
    fn test_execute_fails_on_unopenable_source() {
        let env = TestEnvironment::new().unwrap();
        let mut config = env.config();
        config.target.source = env.root.join("missing-dir/src.bin");

        let err = execute(&args(1), &config).unwrap_err();
        assert!(format!("{err:#}").contains("missing-dir"));
    }
}
