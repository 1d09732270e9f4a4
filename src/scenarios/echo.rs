//! Request/reply: send one message, expect the identical message back.

use tracing::info;

use super::{MessageSize, Phase, TestContext, TestFailure};
use crate::probes::EchoOutcome;

pub async fn run(ctx: &TestContext, tls: bool, size: MessageSize) -> Result<(), TestFailure> {
    let endpoint = ctx.endpoint(tls)?;
    let payload = size.build();
    let mut conn = ctx.connect(&endpoint).await?;

    ctx.enter(Phase::AwaitingReply);
    let outcome = ctx
        .validator()
        .send_and_expect_echo(conn.as_mut(), &payload)
        .await;
    conn.close().await;

    match outcome? {
        EchoOutcome::Match => {
            info!(endpoint = %endpoint, bytes = payload.len(), ?size, "echo matched");
            Ok(())
        }
        EchoOutcome::Mismatch {
            expected_len,
            actual_len,
        } => Err(TestFailure::ProtocolMismatch {
            expected_len,
            actual_len,
        }),
        EchoOutcome::KindMismatch => Err(TestFailure::FrameKindMismatch),
        EchoOutcome::PeerClosed => Err(TestFailure::PeerClosed),
        EchoOutcome::NoReply { waited_ms } => Err(TestFailure::ReplyTimeout {
            timeout_ms: waited_ms,
        }),
    }
}
