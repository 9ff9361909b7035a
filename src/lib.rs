//! `jobforge`: a persistent, dependency-aware computation engine. Jobs are
//! named units of computation whose arguments may embed promises to other
//! jobs' results; the engine persists the resulting graph, executes stale
//! jobs in dependency order, and supports jobs that define further jobs at
//! run time. See `DESIGN.md` for how this crate is grounded in `podcore`.

#[macro_use]
extern crate error_chain;
extern crate chan;
extern crate chrono;
extern crate clap;
extern crate crossbeam_utils;
#[macro_use]
extern crate lazy_static;
extern crate lz4;
extern crate regex;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate sled;
#[macro_use]
extern crate slog;
extern crate slog_async;
extern crate slog_term;
extern crate time;

#[cfg(test)]
extern crate tempfile;

pub mod config;
pub mod consistency;
pub mod error_helpers;
pub mod errors;
pub mod graph;
pub mod mediators;
pub mod model;
pub mod registry;
pub mod selection;
pub mod session;
pub mod store;
#[cfg(test)]
pub mod test_helpers;
pub mod time_helpers;

pub use config::Config;
pub use errors::{Error, ErrorKind, Result};
pub use registry::register;
pub use session::Session;

#[cfg(test)]
mod scenarios;
