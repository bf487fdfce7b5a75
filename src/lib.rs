//! Dotfiles deployment engine.
//!
//! Treats a root directory as a collection of independent packs and
//! applies each one through a small set of handlers: linking handlers
//! create idempotent configuration (three-layer symlink chains, PATH
//! entries, shell-init fragments), provisioning handlers execute
//! side effects exactly once per source content, tracked by sentinel
//! files under a content-addressed state directory. Prior deployments
//! can be inspected (`status`, dangling-link detection) and reversed
//! (`deprovision`) under ownership checks that never touch files the
//! engine does not own.
//!
//! The command-line surface, configuration-file loading, and terminal
//! rendering are external collaborators; this crate exposes the engine
//! API they drive:
//!
//! - **[`engine`]** — the pipelines: link, provision, status,
//!   deprovision, dangling-link repair
//! - **[`datastore`]** — durable state: data links, sentinels,
//!   per-(pack, handler) trees
//! - **[`packs`]** — discovery, rule matching, per-pack configuration
//! - **[`handlers`]** — the two handler families and their registry
//! - **[`results`]** — serializable value objects describing a run
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod clock;
pub mod config;
pub mod datastore;
pub mod engine;
pub mod error;
pub mod exec;
pub mod fsys;
pub mod handlers;
pub mod logging;
pub mod packs;
pub mod paths;
pub mod results;

pub use engine::Engine;
pub use error::{EngineError, Result};
