use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::task;
use tracing::{error, warn};

use crate::{
    jobs::JOB_RECOMPUTE_MONTHLY_STATISTICS,
    models::Job,
    state::AppState,
    statistics::recompute_month,
};

use super::{JobExecution, JobHandler};

#[derive(Debug, Deserialize)]
struct RecomputePayload {
    year: i32,
    month: u32,
}

pub struct RecomputeStatisticsJob;

impl RecomputeStatisticsJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RecomputeStatisticsJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for RecomputeStatisticsJob {
    fn job_type(&self) -> &'static str {
        JOB_RECOMPUTE_MONTHLY_STATISTICS
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let payload: RecomputePayload = match serde_json::from_value(job.payload.clone()) {
            Ok(p) => p,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid statistics payload: {err}"),
                }
            }
        };

        if !(1..=12).contains(&payload.month) {
            return JobExecution::Failed {
                error: format!("invalid statistics month {}", payload.month),
            };
        }

        let result = task::spawn_blocking(move || {
            let mut conn = state.pool.get().map_err(|err| err.to_string())?;
            recompute_month(&mut conn, payload.year, payload.month).map_err(|err| err.to_string())
        })
        .await;

        match result {
            Ok(Ok(_)) => JobExecution::Success,
            Ok(Err(err)) => {
                warn!(job_id = %job.id, error = %err, "statistics job will retry");
                JobExecution::Retry {
                    delay: Duration::from_secs(30),
                    error: err,
                }
            }
            Err(join_err) => {
                error!(job_id = %job.id, error = %join_err, "statistics task panicked");
                JobExecution::Retry {
                    delay: Duration::from_secs(60),
                    error: format!("worker panicked: {join_err}"),
                }
            }
        }
    }
}
