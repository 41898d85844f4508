use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{Checkpoint, Outcome, Payload, Task};

/// Request body for `POST /v1/tasks`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitTaskRequest {
    pub task_type: String,
    pub payload: Payload,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitTaskResponse {
    pub task_id: i64,
}

/// Request body for `POST /v1/claim`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClaimRequest {
    pub worker_id: String,
    /// Lease duration in milliseconds; falls back to the coordinator's
    /// `default_lease_duration` if omitted.
    #[serde(default)]
    pub lease_duration_ms: Option<u64>,
}

/// `task: None` is the wire representation of the `NONE` outcome in §4.2 —
/// there was nothing pending to claim.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClaimResponse {
    pub task: Option<Task>,
    pub checkpoint: Option<Checkpoint>,
}

/// Request body for `POST /v1/tasks/:task_id/result`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitResultRequest {
    pub worker_id: String,
    pub outcome: Outcome,
    pub result: Payload,
}

/// Request body for `POST /v1/tasks/:task_id/checkpoint`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckpointRequest {
    pub worker_id: String,
    pub state: Payload,
    pub elapsed_ms: u64,
}

/// Request body for `POST /v1/workers/:worker_id/heartbeat`. Empty today;
/// kept as a named type so the wire contract can grow without touching
/// handler signatures.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct HeartbeatRequest {}

/// Response body for `GET /v1/stats`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatsResponse {
    /// Task counts keyed by `TaskStatus`'s wire name (`pending`, …).
    pub tasks_by_status: HashMap<String, u64>,
    pub workers_alive: u64,
    pub workers_dead: u64,
}
