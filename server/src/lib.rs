//! Single-shot remote execution server. It listens for one client, requires
//! the pinned shared key on both sides of the handshake, and runs exactly the
//! commands that client describes, with the client's own credentials applied
//! to each child process.

mod error;
mod exec;
mod handler;
mod privilege;
mod pty;
mod run;
pub mod shutdown;

pub use error::ServerError;
pub use run::bind;
pub use run::run;
pub use run::serve;
