//! Supporting types for the transaction manager, grounded on
//! `dialog-core::transaction::manager::types::StrayRequest`.

use std::net::SocketAddr;

use sip_core::types::Request;

/// An inbound request that matched no existing transaction and isn't a
/// CANCEL for a known INVITE either — handed to the caller to decide
/// whether to start a new server transaction (spec.md §4.5 "Matching").
#[derive(Debug, Clone)]
pub struct StrayRequest {
    pub request: Request,
    pub source: SocketAddr,
}
