//! # dfrace-core
//!
//! Double-fetch race trigger harness.
//!
//! A controller thread repeatedly calls a target operation with a shared
//! request payload while a mutator thread rewrites one field of that payload
//! inside the call. The two threads meet through lock-free spin handshakes
//! ([`sync::Rendezvous`]) rather than OS primitives, and the mutator sweeps
//! its pre-write delay ([`calibration::DelayCalibration`]) to find the gap
//! between the target's validation read and its use.
//!
//! ```ignore
//! use dfrace_core::{Controller, RaceSettings, RangeRequest, FileRangeCopy, SocketSource};
//!
//! let mut target = FileRangeCopy::open(src.as_ref(), dst.as_ref())?;
//! let payload = RangeRequest::build(8, 0, 4096, target.dest_fd())?;
//! let report = Controller::new(&payload, RaceSettings::new(1000, 0xffff, 1))
//!     .run(&mut target, &mut SocketSource)?;
//! ```
//!
//! Whether a run actually won the race is deliberately out of view here.

pub mod calibration;
pub mod controller;
pub mod error;
pub mod mutator;
pub mod observer;
pub mod payload;
pub mod perturb;
pub mod range;
pub mod sync;
pub mod target;

pub use calibration::{DelayCalibration, DelayMode};
pub use controller::{Controller, RaceSettings, RunReport};
pub use error::{HarnessError, Result};
pub use mutator::{Mutator, MutatorReport, MutatorState};
pub use observer::{NoopObserver, RaceObserver};
pub use payload::{PayloadLayout, RaceWord, SharedPayload};
pub use perturb::{PerturbationPlan, PerturbationSet, PerturbationSource, SocketSource};
pub use range::{FileRangeCopy, RangeRequest};
pub use sync::{Rendezvous, SpinPolicy};
pub use target::{TargetOperation, TargetStatus};
