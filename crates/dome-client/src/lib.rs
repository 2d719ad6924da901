//! Session runtime for the Dome Support chat client.
//!
//! A [`Session`] registers the device over the control plane, merges the
//! conversation history, then keeps the log current from the streaming
//! channel. Application code observes it through handlers registered on
//! the [`SessionBuilder`] or the session, or through [`Session::subscribe`].

/// Session tunables.
pub mod config;
/// Builder, startup pipeline and the live session handle.
pub mod session;

pub use config::SessionConfig;
pub use session::{Session, SessionBuilder};
