use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::buffer::{InboundBuffer, Pushed, DEFAULT_CAPACITY};
use crate::error::ChannelError;
use crate::types::{InboundMessage, OutboundRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// One connection to the backend and the log of what it has received.
///
/// There is no reconnect: once the state reaches [`ConnectionState::Closed`]
/// the instance is spent and a new one has to be opened. Dropping the
/// channel tears the connection down; [`Channel::close`] does the same and
/// waits for the transport to be released.
pub struct Channel {
    address: Url,
    sender: Sender,
    log_rx: watch::Receiver<InboundBuffer>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Channel {
    /// Start connecting to `address`. Must be called inside a tokio runtime.
    ///
    /// Only a malformed address fails here. A backend that refuses the
    /// connection is reported by the state moving to `Closed`.
    pub fn open(address: &str) -> Result<Self, ChannelError> {
        Self::open_with_capacity(address, DEFAULT_CAPACITY)
    }

    pub fn open_with_capacity(address: &str, capacity: usize) -> Result<Self, ChannelError> {
        let url = parse_address(address)?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (log_tx, log_rx) = watch::channel(InboundBuffer::with_capacity(capacity));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(
            url.clone(),
            state_tx,
            log_tx,
            outbound_rx,
            cancel.clone(),
        ));

        Ok(Self {
            address: url,
            sender: Sender {
                state_rx,
                outbound_tx,
            },
            log_rx,
            cancel,
            task: Some(task),
        })
    }

    pub fn address(&self) -> &Url {
        &self.address
    }

    pub fn state(&self) -> ConnectionState {
        self.sender.state()
    }

    pub fn is_open(&self) -> bool {
        self.sender.is_open()
    }

    /// Watch the lifecycle state.
    pub fn states(&self) -> watch::Receiver<ConnectionState> {
        self.sender.state_rx.clone()
    }

    /// Wait until the handshake has either succeeded or failed.
    pub async fn ready(&self) -> ConnectionState {
        let mut rx = self.states();
        let state = match rx.wait_for(|s| *s != ConnectionState::Connecting).await {
            Ok(state) => *state,
            Err(_) => ConnectionState::Closed,
        };
        state
    }

    /// Transmit `request` if the connection is open, otherwise do nothing.
    pub fn send(&self, request: &OutboundRequest) {
        self.sender.send(request);
    }

    /// A cloneable send handle for timers and other tasks.
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    /// Subscribe to the message log. The receiver is notified on every
    /// append and every reset.
    ///
    /// Do not hold a `borrow()` across an await point; it blocks the
    /// connection task from appending.
    pub fn messages(&self) -> watch::Receiver<InboundBuffer> {
        self.log_rx.clone()
    }

    pub fn snapshot(&self) -> InboundBuffer {
        self.log_rx.borrow().clone()
    }

    /// Close the connection and wait for the transport to be released.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "channel task ended abnormally");
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Send half of a [`Channel`]. Cheap to clone; every clone shares the
/// channel's open/closed gate.
#[derive(Clone)]
pub struct Sender {
    state_rx: watch::Receiver<ConnectionState>,
    outbound_tx: mpsc::UnboundedSender<String>,
}

impl Sender {
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn states(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Same contract as [`Channel::send`]: nothing is queued for later.
    pub fn send(&self, request: &OutboundRequest) {
        if !self.is_open() {
            tracing::debug!(action = request.action(), "channel not open, request dropped");
            return;
        }
        if self.outbound_tx.send(request.encode()).is_err() {
            tracing::debug!(action = request.action(), "channel task gone, request dropped");
        }
    }
}

fn parse_address(address: &str) -> Result<Url, ChannelError> {
    let url = Url::parse(address).map_err(|source| ChannelError::InvalidAddress {
        address: address.to_string(),
        source,
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ChannelError::UnsupportedScheme(other.to_string())),
    }
}

async fn run(
    url: Url,
    state_tx: watch::Sender<ConnectionState>,
    log_tx: watch::Sender<InboundBuffer>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    tracing::info!(url = %url, "connecting to backend");

    let connected = tokio::select! {
        res = connect_async(url.as_str()) => res,
        _ = cancel.cancelled() => {
            tracing::debug!(url = %url, "channel closed while connecting");
            state_tx.send_replace(ConnectionState::Closed);
            return;
        }
    };

    let ws_stream = match connected {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "failed to connect to backend");
            state_tx.send_replace(ConnectionState::Closed);
            return;
        }
    };

    state_tx.send_replace(ConnectionState::Open);
    tracing::info!(url = %url, "backend channel open");

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                // Refuse further sends before the close handshake goes out.
                state_tx.send_replace(ConnectionState::Closed);
                if let Err(e) = write.send(Message::Close(None)).await {
                    tracing::debug!(error = %e, "close frame not delivered");
                }
                tracing::info!(url = %url, "backend channel closed by consumer");
                break;
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_frame(&text, &log_tx),
                    Some(Ok(Message::Binary(_))) => {
                        tracing::debug!("ignoring binary frame");
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::warn!(url = %url, "backend channel closed by peer");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!(url = %url, error = %e, "backend channel error");
                        break;
                    }
                    _ => {}
                }
            }
            Some(text) = outbound_rx.recv() => {
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    tracing::error!(url = %url, error = %e, "failed to send request");
                    break;
                }
            }
        }
    }

    state_tx.send_replace(ConnectionState::Closed);
}

fn handle_frame(text: &str, log_tx: &watch::Sender<InboundBuffer>) {
    let message = match InboundMessage::decode(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "dropping undecodable frame");
            return;
        }
    };

    log_tx.send_modify(|log| {
        if log.push(message) == Pushed::Reset {
            tracing::debug!(
                capacity = log.capacity(),
                received = log.received(),
                "message log reached capacity, cleared"
            );
        }
    });
}
