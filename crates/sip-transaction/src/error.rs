use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Transaction-engine errors (spec.md §7 "Resource errors" / §4.5 "Capacity").
#[derive(Error, Debug)]
pub enum Error {
    #[error("transaction table is full ({0} pending)")]
    TooManyTransactions(usize),

    #[error("no transaction matches key {0}")]
    NoSuchTransaction(String),

    #[error("transaction {0} already exists")]
    DuplicateTransaction(String),

    #[error("invalid state transition for {kind:?}: {from:?} -> {to:?}")]
    InvalidTransition {
        kind: crate::state::TransactionKind,
        from: crate::state::TransactionState,
        to: crate::state::TransactionState,
    },

    #[error(transparent)]
    Transport(#[from] sip_transport::Error),

    #[error(transparent)]
    Codec(#[from] sip_core::Error),
}
