//! The operation being raced.
//!
//! The harness treats the target as a black box: it is called once per
//! iteration with the shared payload, while the mutator may be rewriting the
//! raced field underneath it. The returned status is recorded but never
//! interpreted; whether the race was won is judged outside the harness.

use crate::payload::{PayloadLayout, SharedPayload};

/// Raw status of one target call. By convention 0 is success and a negative
/// value is `-errno`.
pub type TargetStatus = i64;

pub trait TargetOperation<L: PayloadLayout> {
    fn fire(&mut self, payload: &SharedPayload<L>) -> TargetStatus;
}

impl<L, F> TargetOperation<L> for F
where
    L: PayloadLayout,
    F: FnMut(&SharedPayload<L>) -> TargetStatus,
{
    #[inline(always)]
    fn fire(&mut self, payload: &SharedPayload<L>) -> TargetStatus {
        self(payload)
    }
}
