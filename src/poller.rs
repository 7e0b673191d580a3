use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::channel::{ConnectionState, Sender};
use crate::types::OutboundRequest;

/// Re-issues one request on a fixed period.
///
/// The first request goes out as soon as the channel is open, then one per
/// period. Ticks that land while the channel is not open are dropped like
/// any other send. The poller ends on its own once the channel is closed.
pub struct Poller {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Poller {
    pub fn spawn(sender: Sender, request: OutboundRequest, period: Duration) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(sender, request, period, cancel.clone()));
        Self {
            cancel,
            task: Some(task),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "poller task ended abnormally");
            }
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(sender: Sender, request: OutboundRequest, period: Duration, cancel: CancellationToken) {
    let action = request.action().to_string();
    let mut states = sender.states();
    let initial = *states.borrow_and_update();
    if initial == ConnectionState::Closed {
        return;
    }
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately; the opening send replaces it
    ticker.tick().await;
    if initial == ConnectionState::Open {
        sender.send(&request);
    }

    tracing::debug!(action = %action, period_ms = period.as_millis() as u64, "poller started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(action = %action, "poller stopped");
                break;
            }
            _ = ticker.tick() => {
                sender.send(&request);
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                match state {
                    ConnectionState::Open => {
                        sender.send(&request);
                        ticker.reset();
                    }
                    ConnectionState::Closed => {
                        tracing::debug!(action = %action, "channel closed, poller stopping");
                        break;
                    }
                    ConnectionState::Connecting => {}
                }
            }
        }
    }
}
