//! Service-restart fallback
//!
//! Coarse rotation path used when the control port is unusable: restarting
//! the daemon drops every circuit and connection, and needs privileges.

mod manager;

pub use manager::{command_lines, Action, Platform, ServiceManager};
