//! Reachability and fallback layer for the Envoy admin interface.
//!
//! The admin listener binds a namespace-local address, and the containers
//! sharing that namespace may have no HTTP client at all (distroless images
//! have no shell either). Requests therefore go through a fallback chain:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                          AdminSession::get(path)                       │
//! │                                                                        │
//! │   allocation IP known?                                                 │
//! │         │ yes                                                          │
//! │         ▼                                                              │
//! │   ┌──────────────────┐  non-empty body                                 │
//! │   │ Direct HTTP (x3) │────────────────────────────────▶ done           │
//! │   └──────────────────┘                                                 │
//! │         │ exhausted / no IP                                            │
//! │         ▼                                                              │
//! │   ┌──────────────────┐     ┌──────────────────┐     ┌───────────────┐  │
//! │   │ Resolve strategy │────▶│ Build command    │────▶│ Exec in task  │  │
//! │   │ (probe tasks)    │     │ for (tool, path) │     │               │  │
//! │   └──────────────────┘     └──────────────────┘     └───────────────┘  │
//! │                                                             │          │
//! │                                            raw socket?      ▼          │
//! │                                                     ┌───────────────┐  │
//! │                                                     │ Strip headers │  │
//! │                                                     │ + de-chunk    │  │
//! │                                                     └───────────────┘  │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Tools are tried in a fixed preference order (see [`probe::PROBE_TABLE`]);
//! tasks are tried sidecar first, then siblings. The first task with any
//! usable tool wins.

pub mod client;
pub mod command;
pub mod decode;
pub mod direct;
pub mod error;
pub mod probe;
pub mod strategy;
pub mod tool;

pub use client::{AdminSession, AdminSettings, LogLevel};
pub use command::{ADMIN_HOST, build_get, build_post};
pub use decode::{decode_chunked, decode_raw_response, strip_headers};
pub use direct::{DirectTransport, HttpTransport};
pub use error::{AdminError, ResolveError, Result};
pub use probe::{PROBE_TABLE, probe_task};
pub use strategy::{ExecStrategy, build_task_order, resolve_exec_strategy, short_alloc_id};
pub use tool::HttpTool;
