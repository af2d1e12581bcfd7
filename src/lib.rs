//! ScriptGate Library
//!
//! Runs a fixed allow-list of Python, Bash and Zsh scripts on behalf of a
//! validated user id, behind a small web form.
//!
//! - [`scripts`]: validation, path containment and sandboxed execution
//! - [`server`]: the HTTP front end
//! - [`config`], [`logging`], [`metrics`], [`port`]: service plumbing

pub mod config;
pub mod logging;
pub mod metrics;
pub mod port;
pub mod scripts;
pub mod server;
