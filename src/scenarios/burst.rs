//! Intensive data transfer: a burst of alternating small and large messages
//! with no per-message acknowledgement, then a liveness check.

use tracing::info;

use super::{payload, Phase, TestContext, TestFailure};
use crate::probes::BurstOutcome;

pub async fn run(ctx: &TestContext) -> Result<(), TestFailure> {
    let settings = &ctx.settings().burst;
    let payloads = payload::burst(settings.messages, settings.small_size, settings.large_size);

    let endpoint = ctx.endpoint(false)?;
    let mut conn = ctx.connect(&endpoint).await?;

    ctx.enter(Phase::Settling);
    let outcome = ctx.validator().burst_send(conn.as_mut(), &payloads).await;
    conn.close().await;

    match outcome {
        BurstOutcome::Alive { sent } => {
            info!(endpoint = %endpoint, sent, "connection alive after burst");
            Ok(())
        }
        BurstOutcome::Degraded { sent, state } => Err(TestFailure::Degraded { sent, state }),
    }
}
