//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - Isolated source/destination backing files
//! - A config file pointing the harness at them
//!
//! # Usage
//!
//! ```ignore
//! use dfrace_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let config = env.config();
//!     // config.target.source / dest live in a private temp dir
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique backing file paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Root of the isolated directory
    pub root: PathBuf,
    /// Source backing file
    pub source: PathBuf,
    /// Destination backing file
    pub dest: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment. Backing files are not
    /// created; the harness opens them with create semantics.
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().to_path_buf();

        let source = root.join(format!("dfrace-src-{}.bin", test_id));
        let dest = root.join(format!("dfrace-dst-{}.bin", test_id));

        Ok(Self {
            _temp_dir: temp_dir,
            root,
            source,
            dest,
            test_id,
        })
    }

    /// Write `content` into the source backing file
    pub fn seed_source(&self, content: &[u8]) -> anyhow::Result<()> {
        std::fs::write(&self.source, content)?;
        Ok(())
    }

    /// Config pointing at this environment's backing files, with a small
    /// perturbation set so tests do not exhaust descriptors.
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.target.source = self.source.clone();
        cfg.target.dest = self.dest.clone();
        cfg.perturb.count = 8;
        cfg.perturb.snipe = vec![4, 5];
        cfg
    }

    /// Serialize `config` into a file inside the environment and return its path
    pub fn write_config(&self, config: &Config) -> anyhow::Result<PathBuf> {
        let path = self.root.join("config.toml");
        std::fs::write(&path, toml::to_string_pretty(config)?)?;
        Ok(path)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
