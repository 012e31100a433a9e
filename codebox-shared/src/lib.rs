//! Shared value types for the Codebox execution service.
//!
//! These types cross process boundaries: they are what a frontend serializes
//! onto the wire and what the execution core hands back. Keeping them in a
//! leaf crate lets future surfaces (HTTP frontend, SDK bindings) depend on
//! the models without pulling in the runtime.

pub mod errors;
pub mod models;

pub use errors::{CodeboxError, CodeboxResult};
pub use models::{Command, ProjectCore, Response, Sourcefiles};
