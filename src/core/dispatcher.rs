use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{error, info, warn};

use super::client::{GroupInfo, MessagingClient};
use super::config::PollConfig;
use super::connection::ConnectionState;
use super::error::BotError;
use super::poll::{DispatchOutcome, DispatchStatus, PollJob};
use super::status::{BotStatus, StatusUpdate};

/// Sends polls to the configured destination, but only while the client is
/// ready and only one at a time.
pub struct PollDispatcher {
    client: Arc<dyn MessagingClient>,
    status: Arc<BotStatus>,
    destination: String,
    poll: PollConfig,
    in_flight: AtomicBool,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PollDispatcher {
    pub fn new(
        client: Arc<dyn MessagingClient>,
        status: Arc<BotStatus>,
        destination: &str,
        poll: PollConfig,
    ) -> Self {
        Self {
            client,
            status,
            destination: destination.to_string(),
            poll,
            in_flight: AtomicBool::new(false),
        }
    }

    /// The configured recurring poll.
    pub async fn send_scheduled(&self) -> DispatchOutcome {
        let name = self.poll.name.clone();
        self.send(&name, &self.poll.options, self.poll.allow_multiple_answers, false)
            .await
    }

    /// Same poll, marked as a test. Leaves the schedule bookkeeping alone.
    pub async fn send_test(&self) -> DispatchOutcome {
        let name = format!("{}{}", self.poll.test_prefix, self.poll.name);
        self.send(&name, &self.poll.options, self.poll.allow_multiple_answers, true)
            .await
    }

    pub async fn send(
        &self,
        name: &str,
        options: &[String],
        allow_multiple_answers: bool,
        is_test: bool,
    ) -> DispatchOutcome {
        let started = Instant::now();
        let outcome = |status: DispatchStatus| DispatchOutcome {
            status,
            poll_name: name.trim().to_string(),
            is_test,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        let state = self.status.connection_state();
        if state != ConnectionState::Ready {
            info!(
                "Skipping poll \"{}\": client is not ready ({})",
                name.trim(),
                state
            );
            return outcome(DispatchStatus::NotReady {
                state: state.label().to_string(),
            });
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            warn!(
                "Skipping poll \"{}\": another poll is still being sent",
                name.trim()
            );
            return outcome(DispatchStatus::Busy);
        }
        let _guard = InFlight(&self.in_flight);

        let job = match PollJob::new(name, options, allow_multiple_answers, is_test) {
            Ok(job) => job,
            Err(e) => return self.failed(e, outcome),
        };

        let kind = if is_test { "Test poll" } else { "Poll" };
        info!("Sending {} \"{}\" to {}", kind.to_lowercase(), job.name, self.destination);
        match self.client.send_poll(&self.destination, &job).await {
            Ok(()) => {
                let sent_at = Utc::now();
                if !is_test {
                    self.status.apply(StatusUpdate::PollSent { at: sent_at });
                }
                let result = outcome(DispatchStatus::Sent { sent_at });
                info!(
                    "{} \"{}\" sent in {}ms",
                    kind, job.name, result.duration_ms
                );
                result
            }
            Err(e) => self.failed(e, outcome),
        }
    }

    fn failed<F>(&self, e: BotError, outcome: F) -> DispatchOutcome
    where
        F: Fn(DispatchStatus) -> DispatchOutcome,
    {
        let message = e.to_string();
        error!("Failed to send poll: {}", message);
        self.status.apply(StatusUpdate::Error(message.clone()));
        outcome(DispatchStatus::Failed { error: message })
    }

    /// Every group chat the client account belongs to.
    pub async fn list_groups(&self) -> Result<Vec<GroupInfo>, BotError> {
        let state = self.status.connection_state();
        if !state.is_ready() {
            return Err(BotError::NotReady(state.label().to_string()));
        }
        self.client.list_groups().await
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }
}
