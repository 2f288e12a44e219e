//! # Per-iteration perturbation
//!
//! A batch of throwaway resources opened before each attempt, with a chosen
//! few closed immediately before the target fires. The churn shifts
//! allocator and descriptor-table state around the race window.
//!
//! Every resource is owned by the set, so whatever is still open is released
//! when the set drops, on every exit path. A failed open just leaves its slot
//! empty; timing matters more than a complete set, so there is no retry.

use std::io;
use std::os::fd::OwnedFd;

use nix::sys::socket::{socket, AddressFamily, SockFlag, SockType};

use dfrace_config::{log_perturb_trace, log_perturb_warn};

/// Something that can produce one perturbation resource.
pub trait PerturbationSource {
    type Resource;

    fn acquire(&mut self, slot: usize) -> io::Result<Self::Resource>;
}

/// Unbound `AF_INET`/`SOCK_STREAM` sockets. Never connected; pure descriptor noise.
#[derive(Debug, Default, Clone, Copy)]
pub struct SocketSource;

impl PerturbationSource for SocketSource {
    type Resource = OwnedFd;

    fn acquire(&mut self, _slot: usize) -> io::Result<OwnedFd> {
        socket(
            AddressFamily::Inet,
            SockType::Stream,
            SockFlag::empty(),
            None,
        )
        .map_err(io::Error::from)
    }
}

/// How many resources to open and which slots to snipe before the target call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerturbationPlan {
    pub count: usize,
    pub snipe: Vec<usize>,
}

impl Default for PerturbationPlan {
    fn default() -> Self {
        Self {
            count: 100,
            snipe: vec![50, 51],
        }
    }
}

impl PerturbationPlan {
    /// No resources at all.
    pub fn disabled() -> Self {
        Self {
            count: 0,
            snipe: Vec::new(),
        }
    }
}

pub struct PerturbationSet<R> {
    slots: Vec<Option<R>>,
    failed: usize,
}

impl<R> PerturbationSet<R> {
    /// Open `count` resources. Individual failures are logged and skipped.
    pub fn acquire<S>(source: &mut S, count: usize) -> Self
    where
        S: PerturbationSource<Resource = R>,
    {
        let mut slots = Vec::with_capacity(count);
        let mut failed = 0;
        for slot in 0..count {
            match source.acquire(slot) {
                Ok(r) => slots.push(Some(r)),
                Err(e) => {
                    log_perturb_warn!(
                        "Failed to open perturbation resource",
                        slot = slot,
                        error = tracing::field::display(&e)
                    );
                    failed += 1;
                    slots.push(None);
                }
            }
        }
        Self { slots, failed }
    }

    /// Resources currently held.
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Opens that failed during `acquire`.
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Close the given slots now. Out-of-range or already-empty slots are
    /// skipped. Returns how many were actually released.
    #[inline(always)]
    pub fn release_slots(&mut self, slots: &[usize]) -> usize {
        let mut released = 0;
        for &i in slots {
            if let Some(r) = self.slots.get_mut(i).and_then(Option::take) {
                drop(r);
                released += 1;
            }
        }
        released
    }

    /// Close everything still held.
    pub fn release_all(self) {
        let live = self.live();
        drop(self);
        log_perturb_trace!("Perturbation set released", live = live);
    }
}
