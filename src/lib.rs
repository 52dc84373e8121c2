//! xdsnap - Envoy admin snapshots for Consul Connect sidecars on Nomad.
//!
//! The crate captures a sidecar proxy's administrative state (config dump,
//! stats, listeners, clusters, certs), task logs and an optional packet
//! capture into a single `.tar.gz` per allocation.
//!
//! The admin interface listens on a namespace-local address, so the tool
//! reaches it either directly (when the allocation IP is routable) or by
//! executing an HTTP-capable tool inside one of the allocation's tasks.
//! See [`admin`] for the fallback protocol and [`capture`] for the
//! collection cycle.

pub mod admin;
pub mod capture;
pub mod cli;
pub mod config;
pub mod error;
pub mod exec;
pub mod testing;
