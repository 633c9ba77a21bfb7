//! Restricted execution of learner snippets.
//!
//! A snippet is checked against a static [`policy`], then parsed and run by a
//! small tree-walking interpreter on a supervised worker thread. The only names
//! visible to the snippet come from a capability table built fresh for every run.

#![forbid(unsafe_code)]

pub mod config;
mod executor;
mod interpreter;
mod parser;
pub mod policy;
mod result;

pub use config::{Denylist, SandboxConfig};
pub use executor::{CancelToken, Sandbox};
pub use policy::PolicyViolation;
pub use result::{ErrorKind, ExecutionError, ExecutionResult};
