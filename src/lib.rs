//! Tattler: distributed cache invalidation over best-effort group messaging.
//!
//! Nodes sharing a logical cache region join a named group; when one node
//! mutates or evicts a local entry it broadcasts a small invalidation
//! command, and every peer evicts (or clears) its own copy. Delivery is
//! best-effort: no acknowledgement, retry or cross-node ordering. A missed
//! message means one peer serves a stale read until the entry expires or
//! is overwritten.
//!
//! The [`cluster::ClusterController`] drives the protocol over any
//! [`transport::GroupTransport`] against any [`cache::CacheStore`]; the
//! crate ships a UDP transport, an in-process transport, and a minimal
//! in-memory store.
pub mod cache;
pub mod cluster;
pub mod error;
pub mod settings;
pub mod transport;
