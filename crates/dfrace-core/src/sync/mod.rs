pub mod rendezvous;
pub mod signal;

pub use rendezvous::{Rendezvous, SpinPolicy};
pub use signal::{ArmPhase, BusyPhase, Phase, Signal};
