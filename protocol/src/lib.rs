//! Shared wire-adjacent types for the launch client and server: the exec
//! descriptor and its codec, the window-change value type, and the fixed
//! signal mapping table.

pub mod descriptor;
pub mod signals;
pub mod window;

pub use descriptor::DescriptorError;
pub use descriptor::ExecDescriptor;
pub use window::WindowChange;
pub use window::WindowTracker;

/// Out-of-band readiness request name sent by the client once the transport
/// handshake has completed, before it opens a session channel.
pub const READY_REQUEST: &str = "prepared";

/// Server identification string presented during the transport handshake.
pub const SERVER_ID: &str = "SSH-2.0-launch";
