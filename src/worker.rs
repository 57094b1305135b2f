//! Background ingestion worker.
//!
//! Polls the jobs table for PENDING rows and drives each claimed job to a
//! terminal state. The claim in [`IngestionCoordinator::claim_next_pending`]
//! is what keeps two workers off the same job, so any number of worker
//! processes can share one database.

use std::time::Duration;

use tracing::{error, info};

use crate::ingestion::IngestionCoordinator;

pub async fn run(coordinator: &IngestionCoordinator, poll_interval: Duration) {
    info!(poll_secs = poll_interval.as_secs(), "ingestion worker started");

    loop {
        match coordinator.claim_next_pending().await {
            Ok(Some(job)) => {
                // run_claimed already marked the job FAILED and logged;
                // the worker moves on to the next one.
                let _ = coordinator.run_claimed(&job).await;
            }
            Ok(None) => tokio::time::sleep(poll_interval).await,
            Err(e) => {
                error!(error = %e, "worker could not poll for jobs");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}
