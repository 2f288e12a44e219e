//! # dfrace-config
//!
//! Configuration management for the dfrace race harness.
//!
//! Loads configuration from:
//! 1. `~/.dfrace/config.toml` (global)
//! 2. `.dfrace/config.toml` (project-local, overrides global)
//! 3. An explicit file passed by the caller (overrides both)
//! 4. Environment variables (highest priority)
//!
//! The four positional run parameters (element count, overflow value,
//! iterations, initial delay) are never read from here; they always come
//! from the command line.

pub mod logging;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default source backing file
pub const DEFAULT_SOURCE: &str = "/tmp/test.txt";
/// Default destination backing file
pub const DEFAULT_DEST: &str = "/tmp/test2.txt";
/// Default wrap bound for the calibration delay, in microseconds
pub const DEFAULT_DELAY_BOUND: u64 = 100_000;
/// Default number of perturbation sockets per iteration
pub const DEFAULT_PERTURB_COUNT: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub race: RaceConfig,
    pub perturb: PerturbConfig,
    pub target: TargetConfig,
}

impl Config {
    /// Load config from standard locations plus an optional explicit file.
    pub fn load_with(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Global config (~/.dfrace/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::from_file(&global_path)?;
            }
        }

        // 2. Project config (.dfrace/config.toml)
        let project_path = Path::new(".dfrace/config.toml");
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            config.merge(Self::from_file(project_path)?);
        }

        // 3. Explicit file
        if let Some(path) = explicit {
            debug!("Loading explicit config from {:?}", path);
            config.merge(Self::from_file(path)?);
        }

        // 4. Environment
        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Parse a single config file without layering.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.dfrace/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".dfrace/config.toml"))
    }

    /// Merge another config over this one. Fields that still hold their
    /// default value in `other` do not override.
    fn merge(&mut self, other: Config) {
        let defaults = Config::default();

        if other.race.delay_bound != defaults.race.delay_bound {
            self.race.delay_bound = other.race.delay_bound;
        }
        if other.race.spin != defaults.race.spin {
            self.race.spin = other.race.spin;
        }
        if other.race.yield_every != defaults.race.yield_every {
            self.race.yield_every = other.race.yield_every;
        }
        if other.race.delay_mode != defaults.race.delay_mode {
            self.race.delay_mode = other.race.delay_mode;
        }

        if other.perturb.enabled != defaults.perturb.enabled {
            self.perturb.enabled = other.perturb.enabled;
        }
        if other.perturb.count != defaults.perturb.count {
            self.perturb.count = other.perturb.count;
        }
        if other.perturb.snipe != defaults.perturb.snipe {
            self.perturb.snipe = other.perturb.snipe;
        }

        if other.target.source != defaults.target.source {
            self.target.source = other.target.source;
        }
        if other.target.dest != defaults.target.dest {
            self.target.dest = other.target.dest;
        }
        if other.target.src_offset != defaults.target.src_offset {
            self.target.src_offset = other.target.src_offset;
        }
        if other.target.src_length != defaults.target.src_length {
            self.target.src_length = other.target.src_length;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("DFRACE_SOURCE") {
            self.target.source = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("DFRACE_DEST") {
            self.target.dest = PathBuf::from(path);
        }
        if let Ok(bound) = std::env::var("DFRACE_DELAY_BOUND") {
            if let Ok(n) = bound.parse() {
                self.race.delay_bound = n;
            }
        }
        if let Ok(spin) = std::env::var("DFRACE_SPIN") {
            match spin.as_str() {
                "spin" => self.race.spin = SpinMode::Spin,
                "yield" => self.race.spin = SpinMode::Yield,
                _ => debug!("Ignoring unknown DFRACE_SPIN value {:?}", spin),
            }
        }
    }

    /// Reject values the harness cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.race.delay_bound == 0 {
            return Err(ConfigError::Invalid("race.delay_bound must be >= 1".into()));
        }
        if self.race.yield_every == 0 {
            return Err(ConfigError::Invalid("race.yield_every must be >= 1".into()));
        }
        if let Some(bad) = self
            .perturb
            .snipe
            .iter()
            .find(|&&slot| slot >= self.perturb.count)
        {
            return Err(ConfigError::Invalid(format!(
                "perturb.snipe slot {} is outside a set of {}",
                bad, self.perturb.count
            )));
        }
        if self.target.source.as_os_str().is_empty() || self.target.dest.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("target paths must not be empty".into()));
        }
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// How the busy-wait loops poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpinMode {
    /// Pure spin with a CPU relax hint
    Spin,
    /// Spin, yielding to the scheduler every `yield_every` polls
    Yield,
}

/// How the mutator waits out its calibrated delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayModeConfig {
    /// OS sleep (coarse)
    Sleep,
    /// Busy-wait until the deadline
    Spin,
}

/// Handshake and calibration tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceConfig {
    /// Calibration delay wraps back to 1 after this many microseconds
    pub delay_bound: u64,
    pub spin: SpinMode,
    /// Polls between yields when `spin = "yield"`
    pub yield_every: u32,
    pub delay_mode: DelayModeConfig,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            delay_bound: DEFAULT_DELAY_BOUND,
            spin: SpinMode::Spin,
            yield_every: 1024,
            delay_mode: DelayModeConfig::Sleep,
        }
    }
}

/// Per-iteration perturbation set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerturbConfig {
    pub enabled: bool,
    /// Sockets opened per iteration
    pub count: usize,
    /// Slots closed immediately before the target fires
    pub snipe: Vec<usize>,
}

impl Default for PerturbConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            count: DEFAULT_PERTURB_COUNT,
            snipe: vec![50, 51],
        }
    }
}

/// Backing resources for the file-range target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub src_offset: u64,
    pub src_length: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from(DEFAULT_SOURCE),
            dest: PathBuf::from(DEFAULT_DEST),
            src_offset: 0,
            src_length: 65535 + 4096 + 4096,
        }
    }
}
