//! Open a connection, confirm it is OPEN, close it.

use tracing::info;

use super::{TestContext, TestFailure};

pub async fn run(ctx: &TestContext, tls: bool) -> Result<(), TestFailure> {
    let endpoint = ctx.endpoint(tls)?;
    info!(endpoint = %endpoint, "connecting");
    let mut conn = ctx.connect(&endpoint).await?;
    conn.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;
    use crate::scenarios::ScenarioSettings;
    use crate::transport::scripted::{Peer, ScriptedTransport};

    #[tokio::test]
    async fn test_connect_and_close() {
        let transport = Arc::new(ScriptedTransport::new(Peer::Echo));
        let ctx = TestContext::new("localhost", 1234, transport.clone(), ScenarioSettings::default());
        run(&ctx, true).await.unwrap();
        assert_eq!(transport.counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(transport.counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails() {
        let ctx = TestContext::new(
            "localhost",
            1234,
            Arc::new(ScriptedTransport::new(Peer::NeverOpen)),
            ScenarioSettings::default(),
        );
        let err = run(&ctx, false).await.unwrap_err();
        assert!(matches!(err, TestFailure::ConnectTimeout { .. }));
    }
}
