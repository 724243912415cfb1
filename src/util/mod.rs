//! Utility functions
//!
//! Pure helpers - time formatting, backoff.

pub mod rand;
pub mod time;
