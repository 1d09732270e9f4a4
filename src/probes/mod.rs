//! Network probes used by the scenarios.
//!
//! [`ConnectionProbe`] bounds a connection attempt; [`EchoValidator`] checks
//! what the server sends back on an already open connection.

pub mod connect;
pub mod echo;

pub use connect::{CompletionToken, ConnectionProbe, ProbeOutcome, DEFAULT_CONNECT_TIMEOUT};
pub use echo::{BurstOutcome, EchoOutcome, EchoValidator, DEFAULT_SETTLE_WINDOW};
