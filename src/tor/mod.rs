//! Tor daemon interaction
//!
//! Handles Tor ControlPort communication. Tor is treated as a black box:
//! we authenticate, ask for new circuits and read a few status keys.

pub mod client;
pub mod control;

pub use client::{Credential, TorControlClient};
pub use control::{ProtocolInfo, Reply, TorController};
