//! Counts primes up to a limit, checkpointing periodically so a worker
//! that loses its lease mid-run can be resumed by whichever worker claims
//! the task next (§4.9).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskqueue_core::Payload;

use crate::registry::{ExecutionContext, TaskFn};

/// How many candidates to check between checkpoints. Small enough that a
/// reclaimed task loses little progress, large enough not to spam the
/// coordinator with checkpoint writes.
const CHECKPOINT_EVERY: u64 = 5_000;

#[derive(Debug, Deserialize)]
struct Input {
    limit: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct State {
    candidate: u64,
    count: u64,
}

#[derive(Debug, Serialize)]
struct Output {
    count: u64,
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d: u64 = 3;
    while d.saturating_mul(d) <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

pub struct Prime;

#[async_trait]
impl TaskFn for Prime {
    async fn run(&self, ctx: &mut ExecutionContext) -> Result<Payload, String> {
        let input: Input = serde_json::from_slice(ctx.payload.as_bytes())
            .map_err(|e| format!("invalid payload: {e}"))?;

        let mut state = match &ctx.resume_state {
            Some(payload) => serde_json::from_slice(payload.as_bytes())
                .map_err(|e| format!("invalid resume state: {e}"))?,
            None => State { candidate: 2, count: 0 },
        };

        let mut since_checkpoint = 0u64;
        while state.candidate <= input.limit {
            if is_prime(state.candidate) {
                state.count += 1;
            }
            state.candidate += 1;
            since_checkpoint += 1;

            if since_checkpoint >= CHECKPOINT_EVERY {
                since_checkpoint = 0;
                let blob = serde_json::to_vec(&state).map_err(|e| e.to_string())?;
                ctx.checkpoint(Payload(blob)).await;
            }
        }

        let output = Output { count: state.count };
        serde_json::to_vec(&output).map(Payload).map_err(|e| e.to_string())
    }
}
