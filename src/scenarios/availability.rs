//! Is there a WebSocket capability at all?

use tracing::info;

use super::{TestContext, TestFailure};

pub fn run(ctx: &TestContext) -> Result<(), TestFailure> {
    let transport = ctx.transport();
    if !transport.is_available() {
        return Err(TestFailure::EnvironmentUnavailable(format!(
            "transport '{}' cannot open WebSocket connections here",
            transport.name()
        )));
    }
    info!(transport = transport.name(), "websocket transport available");
    Ok(())
}
