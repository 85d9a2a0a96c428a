//! # laf
//!
//! **laf** is an OpenAPI 3.0 driven resource-API framework. A resource
//! handler (a *lone*, grouped with its siblings into a *family*) is written
//! once against a uniform invocation contract and can then be driven
//! locally from the command line or dispatched remotely through a hosted
//! gateway.
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//!
//! - **[`spec`]** - discovery and compilation of the versioned OpenAPI
//!   documents into operation tables and draft-04 validators
//! - **[`router`]** - typed path matching over the compiled operations
//! - **[`cli`]** - the lone command line: input merging, pk/path
//!   expressions, interactive prompting, the run entry point
//! - **[`client`]** - the remote client: URL generation, pagination
//!   iteration, long-running polling
//! - **[`server`]** - the HTTP gateway built on `may_minihttp`
//! - **[`broker`]** - the gateway↔worker dispatch fabric with its LRU
//!   assignment table and worker lifecycle
//! - **[`worker`]** - the worker runtime hosting the handlers
//! - **[`handler`]** - the per-request state machine
//!   (begin → auth → invoke → commit/abort)
//! - **[`lone`]** - handler registration tables
//! - **[`journal`]**, **[`services`]** - best-effort audit journal and the
//!   unix-socket policy hooks (authorization, validation, notification)
//!
//! ## Request flow (server path)
//!
//! ```text
//! CLI → remote client → gateway → broker → worker → handler
//! ```
//!
//! The gateway validates inputs against the operation's schema, enforces
//! change-management policy, authorizes the caller, then forwards the
//! request envelope over the fabric. The broker assigns it to an idle
//! worker or answers 503; the worker journals each state transition and
//! replies with the handler's payload. Locally the same envelope skips the
//! fabric and runs the handler in process.

pub mod auth;
pub mod broker;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod framing;
pub mod handler;
pub mod ids;
pub mod journal;
pub mod logger;
pub mod lone;
pub mod media;
pub mod merge;
pub mod request;
pub mod router;
pub mod server;
pub mod services;
pub mod spec;
pub mod util;
pub mod worker;

pub use config::{FamilyConfig, Mode};
pub use error::ApiError;
pub use lone::{Lone, Outcome};
pub use request::{Request, RequestParts};
