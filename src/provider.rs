use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buffer::InboundBuffer;
use crate::channel::{Channel, ConnectionState, Sender};
use crate::config::Config;
use crate::error::ChannelError;
use crate::poller::Poller;
use crate::types::{AccountEntry, OutboundRequest};

pub const ACCOUNTS_ACTION: &str = "accounts";
pub const BOT_STATUS_ACTION: &str = "bot_status";

/// What the shell of the panel keeps on screen regardless of page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PanelState {
    pub bot_status: Option<Value>,
    pub accounts: Vec<AccountEntry>,
    pub accounts_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub accounts_every: Duration,
    pub status_every: Option<Duration>,
}

impl ProviderOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            accounts_every: config.accounts_every(),
            status_every: config.status_every(),
        }
    }
}

/// A single channel shared by every reader in the process.
///
/// Keeps the account list and bot status fresh by polling, and republishes
/// them as [`PanelState`]. Readers that need anything else subscribe to the
/// underlying message log.
pub struct Provider {
    channel: Channel,
    state_rx: watch::Receiver<PanelState>,
    pollers: Vec<Poller>,
    cancel: CancellationToken,
    watcher: Option<JoinHandle<()>>,
}

impl Provider {
    pub fn open(address: &str, options: ProviderOptions) -> Result<Self, ChannelError> {
        let channel = Channel::open(address)?;

        let mut pollers = vec![Poller::spawn(
            channel.sender(),
            OutboundRequest::new(ACCOUNTS_ACTION).with("type", "all"),
            options.accounts_every,
        )];
        if let Some(every) = options.status_every {
            pollers.push(Poller::spawn(
                channel.sender(),
                OutboundRequest::new(BOT_STATUS_ACTION),
                every,
            ));
        }

        let (state_tx, state_rx) = watch::channel(PanelState::default());
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(watch_log(channel.messages(), state_tx, cancel.clone()));

        Ok(Self {
            channel,
            state_rx,
            pollers,
            cancel,
            watcher: Some(watcher),
        })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.channel.state()
    }

    pub fn sender(&self) -> Sender {
        self.channel.sender()
    }

    pub fn messages(&self) -> watch::Receiver<InboundBuffer> {
        self.channel.messages()
    }

    pub fn panel(&self) -> watch::Receiver<PanelState> {
        self.state_rx.clone()
    }

    pub fn panel_snapshot(&self) -> PanelState {
        self.state_rx.borrow().clone()
    }

    /// Stop polling, then close the channel and wait for the transport to
    /// be released.
    pub async fn close(self) {
        let Self {
            channel,
            pollers,
            cancel,
            watcher,
            ..
        } = self;

        for poller in pollers {
            poller.stop().await;
        }
        cancel.cancel();
        if let Some(watcher) = watcher {
            if let Err(e) = watcher.await {
                tracing::warn!(error = %e, "panel watcher ended abnormally");
            }
        }
        channel.close().await;
    }
}

async fn watch_log(
    mut log_rx: watch::Receiver<InboundBuffer>,
    state_tx: watch::Sender<PanelState>,
    cancel: CancellationToken,
) {
    loop {
        {
            let log = log_rx.borrow_and_update();
            apply_log(&log, &state_tx);
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = log_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("panel watcher stopped");
}

/// Fold the newest relevant entries of `log` into the published state.
/// Entries already folded in are harmless to apply again; state survives
/// the log being reset.
pub(crate) fn apply_log(log: &InboundBuffer, state_tx: &watch::Sender<PanelState>) {
    let status = log.latest(BOT_STATUS_ACTION).map(|m| m.result().cloned().unwrap_or(Value::Null));
    let accounts = log
        .iter()
        .rev()
        .find(|m| m.action() == Some(ACCOUNTS_ACTION) && !m.is_error())
        .and_then(|m| m.result())
        .map(parse_accounts);

    if status.is_none() && accounts.is_none() {
        return;
    }

    state_tx.send_if_modified(|state| {
        let mut modified = false;
        if let Some(status) = status {
            if state.bot_status.as_ref() != Some(&status) {
                state.bot_status = Some(status);
                modified = true;
            }
        }
        if let Some(accounts) = accounts {
            if state.accounts != accounts {
                tracing::info!(count = accounts.len(), "account list updated");
                state.accounts = accounts;
                state.accounts_updated_at = Some(Utc::now());
                modified = true;
            }
        }
        modified
    });
}

/// `result` is either the list itself or an object carrying `accounts`.
pub(crate) fn parse_accounts(result: &Value) -> Vec<AccountEntry> {
    let items = match result {
        Value::Array(items) => items,
        Value::Object(obj) => match obj.get("accounts") {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    items
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect()
}
