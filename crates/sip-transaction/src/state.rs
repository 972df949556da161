//! Transaction state machine vocabulary (spec.md §4.5), grounded on
//! `rvoip_dialog_core::transaction::AtomicTransactionState` — a lock-free
//! `AtomicU8` cell rather than a mutex, since every transaction event loop
//! reads and writes its own state from a single owning task and only needs
//! to publish the current value for observers (e.g. `Drop` impls, metrics).

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{Error, Result};

/// Which of the four RFC 3261 §17 machines a transaction is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    ClientInvite,
    ClientNonInvite,
    ServerInvite,
    ServerNonInvite,
}

/// Union of every state across the four machines (spec.md §4.5). Not every
/// kind visits every state — `AtomicTransactionState::validate_transition`
/// enforces the per-kind table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransactionState {
    Calling = 0,
    Trying = 1,
    Proceeding = 2,
    Completed = 3,
    Confirmed = 4,
    Terminated = 5,
}

impl TransactionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TransactionState::Calling,
            1 => TransactionState::Trying,
            2 => TransactionState::Proceeding,
            3 => TransactionState::Completed,
            4 => TransactionState::Confirmed,
            _ => TransactionState::Terminated,
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The per-kind transition tables from spec.md §4.5.
fn is_valid_transition(kind: TransactionKind, from: TransactionState, to: TransactionState) -> bool {
    use TransactionState::*;
    if from == to {
        return true;
    }
    match kind {
        TransactionKind::ClientInvite => matches!(
            (from, to),
            (Calling, Proceeding) | (Calling, Completed) | (Calling, Terminated) | (Proceeding, Completed) | (Proceeding, Terminated) | (Completed, Terminated)
        ),
        TransactionKind::ServerInvite => matches!(
            (from, to),
            (Proceeding, Completed) | (Proceeding, Terminated) | (Completed, Confirmed) | (Completed, Terminated) | (Confirmed, Terminated)
        ),
        TransactionKind::ClientNonInvite | TransactionKind::ServerNonInvite => matches!(
            (from, to),
            (Trying, Proceeding) | (Trying, Completed) | (Trying, Terminated) | (Proceeding, Completed) | (Proceeding, Terminated) | (Completed, Terminated)
        ),
    }
}

/// Lock-free transaction state cell shared between the owning event loop
/// and observers.
#[derive(Debug)]
pub struct AtomicTransactionState {
    kind: TransactionKind,
    cell: AtomicU8,
}

impl AtomicTransactionState {
    pub fn new(kind: TransactionKind, initial: TransactionState) -> Self {
        AtomicTransactionState { kind, cell: AtomicU8::new(initial as u8) }
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn get(&self) -> TransactionState {
        TransactionState::from_u8(self.cell.load(Ordering::Acquire))
    }

    /// Validate and apply a transition, per the table for this kind.
    pub fn validate_transition(&self, to: TransactionState) -> Result<()> {
        let from = self.get();
        if !is_valid_transition(self.kind, from, to) {
            return Err(Error::InvalidTransition { kind: self.kind, from, to });
        }
        self.cell.store(to as u8, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_invite_cannot_go_backwards() {
        let st = AtomicTransactionState::new(TransactionKind::ClientInvite, TransactionState::Calling);
        st.validate_transition(TransactionState::Completed).unwrap();
        assert!(st.validate_transition(TransactionState::Calling).is_err());
    }

    #[test]
    fn server_invite_follows_the_confirmed_path() {
        let st = AtomicTransactionState::new(TransactionKind::ServerInvite, TransactionState::Proceeding);
        st.validate_transition(TransactionState::Completed).unwrap();
        st.validate_transition(TransactionState::Confirmed).unwrap();
        st.validate_transition(TransactionState::Terminated).unwrap();
    }
}
