//! wsregress -- sequential regression harness for WebSocket servers.
//!
//! The crate drives an ordered suite of network scenarios against one
//! server, one test at a time, and narrates the run as a stream of log
//! events. It also ships a small reference echo listener to test against.

pub mod config;
pub mod listener;
pub mod probes;
pub mod report;
pub mod scenarios;
pub mod sequencer;
pub mod transport;

use std::sync::Arc;

use anyhow::Result;

use crate::config::HarnessConfig;
use crate::report::{LogSink, RunReport};
use crate::sequencer::{Registry, RunHandle, Runner};
use crate::transport::WsTransport;

/// Run `registry` against the target named in `config` over real sockets.
pub async fn run_suite(
    config: &HarnessConfig,
    registry: &Registry,
    sink: Arc<dyn LogSink>,
    handle: &RunHandle,
) -> Result<RunReport> {
    let transport = Arc::new(WsTransport::new()?);
    let runner = Runner::new(transport, config.scenario_settings())
        .with_dispatch_delay(config.dispatch_delay());

    tracing::info!(
        host = %config.target.host,
        port = config.target.port,
        "running regression suite"
    );
    Ok(runner
        .run(registry, &config.target.host, config.target.port, sink, handle)
        .await)
}
