//! IP reporter
//!
//! Observes the exit address Tor currently gives us.

mod reporter;

pub use reporter::{parse_response, IpObservation, IpReporter};
