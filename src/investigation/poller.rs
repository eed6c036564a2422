//! Waiting on the remote agent's pending record.

use std::time::Duration;
use tokio::time::Instant;

use super::InvestigationError;
use crate::store::{PendingInvestigation, PendingStatus, RelationalStore};

/// How read failures are treated while polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Inside a create request: any store error ends the wait.
    Interactive,
    /// Long-running wait: store errors are logged and polling continues.
    Background,
}

/// Poll until the pending record for `investigation_id` reaches a terminal
/// state or `budget` elapses.
///
/// The record is read once immediately, then every `interval`. A timeout is
/// only reported after a read that happened at or past the budget.
pub async fn wait_for_pending(
    store: &dyn RelationalStore,
    investigation_id: &str,
    interval: Duration,
    budget: Duration,
    mode: WaitMode,
) -> Result<PendingInvestigation, InvestigationError> {
    let started = Instant::now();
    let mut polls: u32 = 0;

    loop {
        polls += 1;
        match store.get_pending(investigation_id).await {
            Ok(Some(pending)) => match pending.status {
                PendingStatus::Completed => {
                    tracing::debug!(
                        "Pending {} completed after {} polls",
                        investigation_id,
                        polls
                    );
                    return Ok(pending);
                }
                PendingStatus::Failed => {
                    let message = pending
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "agent reported failure without a message".to_string());
                    return Err(InvestigationError::AgentExecution(message));
                }
                PendingStatus::Pending => {}
            },
            Ok(None) => {
                tracing::debug!("No pending record yet for {}", investigation_id);
            }
            Err(e) => match mode {
                WaitMode::Interactive => {
                    return Err(InvestigationError::Internal(format!(
                        "Failed to read pending record: {:#}",
                        e
                    )))
                }
                WaitMode::Background => {
                    tracing::warn!(
                        "Transient error polling pending record {}: {:#}",
                        investigation_id,
                        e
                    );
                }
            },
        }

        let elapsed = started.elapsed();
        if elapsed >= budget {
            tracing::warn!(
                "Gave up waiting for {} after {:?} ({} polls)",
                investigation_id,
                elapsed,
                polls
            );
            return Err(InvestigationError::Timeout(budget));
        }
        tokio::time::sleep(interval.min(budget - elapsed)).await;
    }
}
