//! # Task Queue — client
//!
//! A thin `reqwest` wrapper over the coordinator's `/v1` API (§4.10),
//! shared by the worker crate and by coordinator integration tests.

mod error;

pub use error::{ClientError, ClientResult};

use std::time::Duration;

use serde::Deserialize;
use taskqueue_core::{
    Checkpoint, ClaimRequest, ClaimResponse, CheckpointRequest, HeartbeatRequest, Outcome,
    Payload, StatsResponse, SubmitResultRequest, SubmitTaskRequest, SubmitTaskResponse, Task,
    TaskResult,
};

/// Bounded timeout for control-plane RPCs (claim, heartbeat, checkpoint);
/// result submission uses a longer one since payloads can be larger.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: String,
    message: String,
}

#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    pub fn new(base_url: impl Into<String>) -> Self {
        Client { http: reqwest::Client::new(), base_url: base_url.into() }
    }

    async fn reject_or_ack(resp: reqwest::Response) -> ClientResult<()> {
        if resp.status().is_success() {
            return Ok(());
        }
        let status = resp.status();
        let envelope: ErrorEnvelope = resp.json().await.unwrap_or(ErrorEnvelope {
            error: "unknown".to_string(),
            message: status.to_string(),
        });
        if status == reqwest::StatusCode::CONFLICT {
            Err(ClientError::Rejected(envelope.message))
        } else {
            Err(ClientError::Coordinator { status: status.as_u16(), message: envelope.message })
        }
    }

    pub async fn submit_task(&self, task_type: &str, payload: Payload) -> ClientResult<i64> {
        let resp = self
            .http
            .post(format!("{}/v1/tasks", self.base_url))
            .timeout(CONTROL_TIMEOUT)
            .json(&SubmitTaskRequest { task_type: task_type.to_string(), payload })
            .send()
            .await?;
        let resp: SubmitTaskResponse = resp.error_for_status()?.json().await?;
        Ok(resp.task_id)
    }

    pub async fn get_task(&self, task_id: i64) -> ClientResult<Task> {
        let resp = self
            .http
            .get(format!("{}/v1/tasks/{task_id}", self.base_url))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await?;
        Ok(resp.error_for_status()?.json().await?)
    }

    pub async fn get_result(&self, task_id: i64) -> ClientResult<TaskResult> {
        let resp = self
            .http
            .get(format!("{}/v1/tasks/{task_id}/result", self.base_url))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await?;
        Ok(resp.error_for_status()?.json().await?)
    }

    pub async fn stats(&self) -> ClientResult<StatsResponse> {
        let resp = self
            .http
            .get(format!("{}/v1/stats", self.base_url))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await?;
        Ok(resp.error_for_status()?.json().await?)
    }

    pub async fn claim_task(
        &self,
        worker_id: &str,
        lease_duration_ms: Option<u64>,
    ) -> ClientResult<Option<(Task, Option<Checkpoint>)>> {
        let resp = self
            .http
            .post(format!("{}/v1/claim", self.base_url))
            .timeout(CONTROL_TIMEOUT)
            .json(&ClaimRequest { worker_id: worker_id.to_string(), lease_duration_ms })
            .send()
            .await?;
        let resp: ClaimResponse = resp.error_for_status()?.json().await?;
        Ok(resp.task.map(|task| (task, resp.checkpoint)))
    }

    pub async fn submit_result(
        &self,
        worker_id: &str,
        task_id: i64,
        outcome: Outcome,
        result: Payload,
    ) -> ClientResult<()> {
        let resp = self
            .http
            .post(format!("{}/v1/tasks/{task_id}/result", self.base_url))
            .timeout(SUBMIT_TIMEOUT)
            .json(&SubmitResultRequest { worker_id: worker_id.to_string(), outcome, result })
            .send()
            .await?;
        Self::reject_or_ack(resp).await
    }

    pub async fn save_checkpoint(
        &self,
        worker_id: &str,
        task_id: i64,
        state: Payload,
        elapsed_ms: u64,
    ) -> ClientResult<()> {
        let resp = self
            .http
            .post(format!("{}/v1/tasks/{task_id}/checkpoint", self.base_url))
            .timeout(CONTROL_TIMEOUT)
            .json(&CheckpointRequest { worker_id: worker_id.to_string(), state, elapsed_ms })
            .send()
            .await?;
        Self::reject_or_ack(resp).await
    }

    pub async fn heartbeat(&self, worker_id: &str) -> ClientResult<()> {
        let resp = self
            .http
            .post(format!("{}/v1/workers/{worker_id}/heartbeat", self.base_url))
            .timeout(CONTROL_TIMEOUT)
            .json(&HeartbeatRequest::default())
            .send()
            .await?;
        Self::reject_or_ack(resp).await
    }
}
