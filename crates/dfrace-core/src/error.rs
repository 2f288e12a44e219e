use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    /// A backing resource could not be opened. Reported before the mutator starts.
    #[error("Failed to open {path}: {source}")]
    Setup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to allocate {size}-byte payload buffer")]
    Alloc { size: usize },

    #[error("Invalid payload layout: {0}")]
    InvalidLayout(String),

    #[error("Failed to spawn mutator thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Mutator thread panicked")]
    MutatorPanicked,
}

pub type Result<T> = std::result::Result<T, HarnessError>;
