//! Sleeps for a fixed duration. Used by tests that need a controllable
//! long-running or hanging task without burning CPU (§4.9).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskqueue_core::Payload;

use crate::registry::{ExecutionContext, TaskFn};

#[derive(Debug, Deserialize)]
struct Input {
    duration_ms: u64,
}

#[derive(Debug, Serialize)]
struct Output {
    slept_ms: u64,
}

pub struct Sleep;

#[async_trait]
impl TaskFn for Sleep {
    async fn run(&self, ctx: &mut ExecutionContext) -> Result<Payload, String> {
        let input: Input = serde_json::from_slice(ctx.payload.as_bytes())
            .map_err(|e| format!("invalid payload: {e}"))?;

        tokio::time::sleep(std::time::Duration::from_millis(input.duration_ms)).await;

        let output = Output { slept_ms: input.duration_ms };
        serde_json::to_vec(&output).map(Payload).map_err(|e| e.to_string())
    }
}
