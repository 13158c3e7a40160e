//! Client for the single-shot remote execution server: authenticates with the
//! pinned shared key, announces readiness, and runs one command remotely with
//! the local identity, terminal and signals mirrored across.

mod dial;
mod error;
mod exec;
pub mod identity;
mod or_cancel;
mod ready;
mod terminal;

pub use error::ClientError;
pub use exec::Client;
pub use exec::ExecOptions;
pub use exec::IoStreams;
