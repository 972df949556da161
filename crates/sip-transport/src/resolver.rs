//! The resolver capability the transport consumes (spec.md §6). DNS
//! resolution internals are explicitly out of scope (spec.md §1); the core
//! only calls through this trait, matching how `rvoip-dialog-core`'s tests
//! construct a dummy transport instead of exercising real I/O.

use async_trait::async_trait;
use std::net::SocketAddr;

use sip_core::types::Uri;

/// Outcome of a cache lookup: a concrete endpoint, a negative cache entry
/// ("don't retry soon"), or no entry at all ("try async") — spec.md §6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Found(SocketAddr),
    Empty,
    None,
}

/// Outcome of an async resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncLookup {
    Found(SocketAddr),
    Empty,
}

#[async_trait]
pub trait Resolver: Send + Sync {
    fn resolve_from_cache(&self, uri: &Uri, prefer_v6: bool) -> CacheLookup;

    async fn resolve_async(&self, uri: &Uri, prefer_v6: bool, cancel: tokio::sync::watch::Receiver<bool>) -> AsyncLookup;
}

/// An in-memory resolver for tests: a fixed table of `host -> SocketAddr`,
/// always resolved synchronously from the "cache" so tests don't depend on
/// real DNS or timing.
#[derive(Debug, Default)]
pub struct StaticResolver {
    entries: dashmap::DashMap<String, SocketAddr>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, host: impl Into<String>, addr: SocketAddr) {
        self.entries.insert(host.into(), addr);
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    fn resolve_from_cache(&self, uri: &Uri, _prefer_v6: bool) -> CacheLookup {
        let host = uri.host.to_string();
        match self.entries.get(&host) {
            Some(addr) => CacheLookup::Found(*addr),
            None => CacheLookup::None,
        }
    }

    async fn resolve_async(&self, uri: &Uri, prefer_v6: bool, _cancel: tokio::sync::watch::Receiver<bool>) -> AsyncLookup {
        match self.resolve_from_cache(uri, prefer_v6) {
            CacheLookup::Found(addr) => AsyncLookup::Found(addr),
            _ => AsyncLookup::Empty,
        }
    }
}
