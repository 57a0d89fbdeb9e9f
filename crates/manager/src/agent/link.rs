//! Agent link — per-slot reconnecting WebSocket channel to the
//! in-container agent.
//!
//! Each slot owns at most one link. The link surfaces connection state and
//! typed events to the pool through an unbounded channel; it never touches
//! the slot table itself.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::event::{self, AgentEvent};

/// Signals surfaced to the pool, keyed by slot name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSignal {
    /// An agent connection was established.
    Connected { slot: String },
    /// An established agent connection dropped.
    Disconnected { slot: String },
    /// A decoded agent event arrived.
    Event { slot: String, event: AgentEvent },
}

const MAX_CONNECT_ATTEMPTS: u32 = 15;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handle to one slot's channel task. Dropping the handle does not stop
/// the task; call [`AgentLink::close`].
pub struct AgentLink {
    slot: String,
    task: JoinHandle<()>,
}

impl AgentLink {
    /// Spawn the channel task for `slot` against `url`
    /// (`ws://<host>:<app_port>/events`).
    pub fn open(slot: String, url: String, signals: mpsc::UnboundedSender<LinkSignal>) -> Self {
        let task = tokio::spawn(channel_task(slot.clone(), url, signals));
        Self { slot, task }
    }

    pub fn close(&self) {
        debug!("closing agent link for {}", self.slot);
        self.task.abort();
    }
}

async fn channel_task(slot: String, url: String, signals: mpsc::UnboundedSender<LinkSignal>) {
    loop {
        let Some(stream) = connect_with_retry(&slot, &url).await else {
            // Never connected within the attempt cap. The pool decides
            // what happens to the container; this task is done.
            return;
        };
        let _ = signals.send(LinkSignal::Connected { slot: slot.clone() });
        read_until_drop(&slot, stream, &signals).await;
        let _ = signals.send(LinkSignal::Disconnected { slot: slot.clone() });
        // Established connection dropped: go around and reconnect with a
        // fresh round of attempts. In full-lifecycle mode the pool usually
        // replaces this link before those run out.
    }
}

async fn connect_with_retry(slot: &str, url: &str) -> Option<WsStream> {
    for attempt in 1..=MAX_CONNECT_ATTEMPTS {
        match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url)).await {
            Ok(Ok((stream, _response))) => {
                debug!("agent channel for {} connected (attempt {})", slot, attempt);
                return Some(stream);
            }
            Ok(Err(e)) => debug!(
                "agent connect failed for {} (attempt {}/{}): {}",
                slot, attempt, MAX_CONNECT_ATTEMPTS, e
            ),
            Err(_) => debug!(
                "agent connect timed out for {} (attempt {}/{})",
                slot, attempt, MAX_CONNECT_ATTEMPTS
            ),
        }
        let backoff = INITIAL_BACKOFF
            .saturating_mul(1u32 << (attempt - 1).min(5))
            .min(MAX_BACKOFF);
        tokio::time::sleep(backoff).await;
    }
    warn!(
        "agent channel for {} gave up after {} attempts",
        slot, MAX_CONNECT_ATTEMPTS
    );
    None
}

async fn read_until_drop(
    slot: &str,
    mut stream: WsStream,
    signals: &mpsc::UnboundedSender<LinkSignal>,
) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match event::decode(&text) {
                Ok(Some(event)) => {
                    let _ = signals.send(LinkSignal::Event {
                        slot: slot.to_string(),
                        event,
                    });
                }
                Ok(None) => debug!("ignoring unrecognized agent message from {}", slot),
                Err(e) => warn!("malformed agent event from {}: {}", slot, e),
            },
            Ok(Message::Close(_)) => {
                debug!("agent channel for {} closed by peer", slot);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("agent channel error for {}: {}", slot, e);
                return;
            }
        }
    }
}
