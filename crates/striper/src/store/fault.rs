//! Fault injection for the reference stores
//!
//! Faults are queued per operation and consumed one at a time, so a test can
//! make exactly the next write (or connect, or stat...) fail.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use super::{StoreError, StoreResult};

/// Store operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    CreateSession,
    ApplyConfig,
    Connect,
    OpenPool,
    ReleasePool,
    CreateStriper,
    Write,
    Read,
    Remove,
    Truncate,
    SetXattr,
    GetXattr,
    Stat,
}

#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail the operation with this error
    Fail(StoreError),
    /// Accept only this many bytes of a write
    Short(usize),
}

#[derive(Debug, Default)]
pub struct FaultInjector {
    pending: Mutex<HashMap<StoreOp, VecDeque<Fault>>>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fault for the next call of `op`
    pub fn inject(&self, op: StoreOp, fault: Fault) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(op)
            .or_default()
            .push_back(fault);
    }

    /// Make the next call of `op` fail with `err`
    pub fn fail_next(&self, op: StoreOp, err: StoreError) {
        self.inject(op, Fault::Fail(err));
    }

    /// Make the next write accept only `accepted` bytes
    pub fn short_next_write(&self, accepted: usize) {
        self.inject(StoreOp::Write, Fault::Short(accepted));
    }

    /// Pop the next fault queued for `op`
    pub fn take(&self, op: StoreOp) -> Option<Fault> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
    }

    /// Fail if a `Fail` fault is queued for `op`
    pub fn check(&self, op: StoreOp) -> StoreResult<()> {
        match self.take(op) {
            Some(Fault::Fail(err)) => Err(err),
            _ => Ok(()),
        }
    }

    /// Number of faults not yet consumed
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(VecDeque::len)
            .sum()
    }
}
