//! Task scheduling and main loop
//!
//! Wires the real collaborators into the rotation controller.
//! All tokio::spawn calls live here.

mod loops;

pub use loops::{prepare_tor, run};
