use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use mio::Token;

use crate::error::{Result, SelectorError};
use crate::ops::Ops;

/// Per-channel registration cookie.
///
/// Bound 1:1 with a channel when the selector registers it. Carries the
/// channel's token and interest-ops. Interest mutation happens only on the
/// selector thread; the interest and cancelled fields are atomics so other
/// threads may observe them (invariant sampling, diagnostics) without a lock.
///
/// A cancelled key rejects every interest operation with
/// [`SelectorError::CancelledKey`], which the selector routes to the
/// submitter's listener.
#[derive(Debug)]
pub struct SelectionKey {
    token: Token,
    interest: AtomicU8,
    cancelled: AtomicBool,
}

impl SelectionKey {
    pub fn new(token: Token, interest: Ops) -> Self {
        Self {
            token,
            interest: AtomicU8::new(interest.bits()),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn is_valid(&self) -> bool {
        !self.cancelled.load(Ordering::Acquire)
    }

    /// Marks the key dead. Idempotent. All further interest operations fail
    /// with `CancelledKey`.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn interest_ops(&self) -> Result<Ops> {
        self.check_valid()?;
        Ok(Ops::from_bits(self.interest.load(Ordering::Acquire)))
    }

    /// Replaces the interest mask, returning the previous one.
    pub fn set_interest_ops(&self, ops: Ops) -> Result<Ops> {
        self.check_valid()?;
        let prev = self.interest.swap(ops.bits(), Ordering::AcqRel);
        Ok(Ops::from_bits(prev))
    }

    fn check_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(SelectorError::CancelledKey)
        }
    }
}
