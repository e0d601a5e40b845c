//! Connection lifecycle and the command outbox.
//!
//! One logical websocket per session. The state machine is
//! `Disconnected -> Connecting -> Open`, back to `Disconnected` on any
//! fault, with a single fixed-delay reconnect timer: a second fault while
//! one is armed must not arm another. Commands always pass through the
//! outbox so that anything produced while the link is down is replayed, in
//! order, on the next successful connect.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use foc_core::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
        }
    }
}

/// Reconnect tuning. Fixed delay, unlimited retries: disconnection is
/// always treated as transient.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
        }
    }
}

/// An established bidirectional text channel to the hub.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, text: &str) -> anyhow::Result<()>;
    /// Next inbound text frame; `None` once the peer closes or the stream
    /// faults.
    async fn recv(&mut self) -> Option<String>;
}

/// Connection factory, the seam that keeps the state machine testable
/// without sockets.
#[async_trait]
pub trait Transport: Send {
    type Conn: Connection;
    async fn connect(&mut self, url: &Url) -> anyhow::Result<Self::Conn>;
}

/// Production transport: one websocket per connect, text frames only.
pub struct WsTransport;

pub struct WsConnection {
    inner: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

#[async_trait]
impl Transport for WsTransport {
    type Conn = WsConnection;

    async fn connect(&mut self, url: &Url) -> anyhow::Result<WsConnection> {
        let (inner, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        Ok(WsConnection { inner })
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, text: &str) -> anyhow::Result<()> {
        self.inner
            .send(Message::Text(text.to_string()))
            .await
            .map_err(Into::into)
    }

    async fn recv(&mut self) -> Option<String> {
        while let Some(frame) = self.inner.next().await {
            match frame {
                Ok(Message::Text(text)) => return Some(text),
                Ok(Message::Close(_)) => return None,
                // ping/pong are answered by tungstenite itself
                Ok(_) => continue,
                Err(err) => {
                    warn!("websocket receive error: {err}");
                    return None;
                }
            }
        }
        None
    }
}

/// FIFO buffer of serialized commands awaiting a live transport. In-memory
/// only: a process restart drops undelivered entries.
#[derive(Debug, Default)]
pub struct Outbox {
    entries: VecDeque<String>,
}

impl Outbox {
    pub fn enqueue(&mut self, message: String) {
        self.entries.push_back(message);
    }

    pub fn pop_front(&mut self) -> Option<String> {
        self.entries.pop_front()
    }

    /// Puts a failed entry back at the head so order is preserved on the
    /// next drain.
    pub fn requeue_front(&mut self, message: String) {
        self.entries.push_front(message);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct TransportManager<T: Transport> {
    transport: T,
    url: Url,
    state: ConnectionState,
    conn: Option<T::Conn>,
    outbox: Outbox,
    policy: ReconnectPolicy,
    reconnect_pending: bool,
}

impl<T: Transport> TransportManager<T> {
    pub fn new(transport: T, url: Url) -> Self {
        Self::with_policy(transport, url, ReconnectPolicy::default())
    }

    pub fn with_policy(transport: T, url: Url, policy: ReconnectPolicy) -> Self {
        Self {
            transport,
            url,
            state: ConnectionState::Disconnected,
            conn: None,
            outbox: Outbox::default(),
            policy,
            reconnect_pending: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn queued(&self) -> usize {
        self.outbox.len()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.policy.delay
    }

    /// Idempotent: a no-op while connecting or open, so repeated calls
    /// never stack transports or duplicate the hello.
    pub async fn ensure_connected(&mut self) {
        if self.state != ConnectionState::Disconnected {
            return;
        }
        self.state = ConnectionState::Connecting;
        match self.transport.connect(&self.url).await {
            Ok(conn) => {
                info!("connected to {}", self.url);
                self.conn = Some(conn);
                self.state = ConnectionState::Open;
                // a successful connect cancels the pending retry
                self.reconnect_pending = false;
                self.drain_if_open().await;
                if self.state == ConnectionState::Open {
                    let hello = Command::hello().encode();
                    self.send_now(&hello).await;
                }
            }
            Err(err) => {
                warn!("connect to {} failed: {err}", self.url);
                self.state = ConnectionState::Disconnected;
                self.schedule_reconnect();
            }
        }
    }

    /// Public entry point for outbound commands: enqueue first, then try to
    /// get the queue onto the wire. A command issued while disconnected is
    /// delivered, in order, on the next successful connection.
    pub async fn send(&mut self, command: &Command) {
        self.outbox.enqueue(command.encode());
        self.ensure_connected().await;
        self.drain_if_open().await;
    }

    /// Pops and sends head-first while open; a mid-drain failure leaves the
    /// failed entry (and everything behind it) queued.
    pub async fn drain_if_open(&mut self) {
        while self.state == ConnectionState::Open {
            let Some(entry) = self.outbox.pop_front() else {
                break;
            };
            if !self.send_now(&entry).await {
                self.outbox.requeue_front(entry);
                break;
            }
        }
    }

    async fn send_now(&mut self, text: &str) -> bool {
        let Some(conn) = self.conn.as_mut() else {
            return false;
        };
        match conn.send(text).await {
            Ok(()) => true,
            Err(err) => {
                warn!("send failed: {err}");
                self.mark_disconnected();
                false
            }
        }
    }

    /// Next inbound frame, unparsed. Returns `None` and transitions to
    /// `Disconnected` when the stream ends.
    pub async fn recv(&mut self) -> Option<String> {
        let conn = self.conn.as_mut()?;
        match conn.recv().await {
            Some(text) => Some(text),
            None => {
                debug!("transport closed by peer");
                self.mark_disconnected();
                None
            }
        }
    }

    /// Transition to `Disconnected` after a fault and arm the retry timer.
    /// Repeated faults while a timer is armed are no-ops.
    pub fn mark_disconnected(&mut self) {
        self.conn = None;
        self.state = ConnectionState::Disconnected;
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) -> bool {
        if self.reconnect_pending {
            return false;
        }
        self.reconnect_pending = true;
        true
    }

    /// Called by the session loop when the armed timer fires.
    pub async fn reconnect_now(&mut self) {
        if !self.reconnect_pending {
            return;
        }
        self.reconnect_pending = false;
        self.ensure_connected().await;
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{hub_url, MockTransport};
    use super::*;
    use foc_core::DeviceId;

    fn id() -> DeviceId {
        DeviceId::from(7u64)
    }

    #[tokio::test]
    async fn ensure_connected_is_idempotent_while_open() {
        let (transport, net) = MockTransport::new();
        let mut manager = TransportManager::new(transport, hub_url());

        manager.ensure_connected().await;
        manager.ensure_connected().await;
        manager.ensure_connected().await;

        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(net.connects(), 1);
        // exactly one hello
        let hellos = net
            .sent()
            .iter()
            .filter(|frame| frame.contains("\"hello\""))
            .count();
        assert_eq!(hellos, 1);
    }

    #[tokio::test]
    async fn commands_queued_while_down_replay_in_order() {
        let (transport, net) = MockTransport::new();
        net.set_refuse_connect(true);
        let mut manager = TransportManager::new(transport, hub_url());

        manager
            .send(&Command::rename(id(), "Relay 7").expect("valid"))
            .await;
        manager.send(&Command::ping(id())).await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.queued(), 2);
        assert!(manager.reconnect_pending());
        assert!(net.sent().is_empty());

        net.set_refuse_connect(false);
        manager.reconnect_now().await;

        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(manager.queued(), 0);
        assert!(!manager.reconnect_pending());

        let sent = net.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent[0].contains("\"rename\""));
        assert!(sent[1].contains("\"ping\""));
        // hello goes out after the backlog
        assert!(sent[2].contains("\"hello\""));
    }

    #[tokio::test]
    async fn repeated_faults_arm_only_one_timer() {
        let (transport, net) = MockTransport::new();
        net.set_refuse_connect(true);
        let mut manager = TransportManager::new(transport, hub_url());

        manager.ensure_connected().await;
        assert!(manager.reconnect_pending());
        let connects_after_first = net.connects();

        // a second fault while the timer is pending is a no-op
        manager.mark_disconnected();
        manager.mark_disconnected();
        assert!(manager.reconnect_pending());
        assert_eq!(net.connects(), connects_after_first);

        net.set_refuse_connect(false);
        manager.reconnect_now().await;
        assert_eq!(net.connects(), connects_after_first + 1);

        // timer consumed; firing again does nothing
        manager.reconnect_now().await;
        assert_eq!(net.connects(), connects_after_first + 1);
    }

    #[tokio::test]
    async fn mid_drain_failure_keeps_remaining_entries_queued() {
        let (transport, net) = MockTransport::new();
        let mut manager = TransportManager::new(transport, hub_url());
        manager.ensure_connected().await;
        assert_eq!(net.sent().len(), 1); // hello

        net.set_fail_sends(true);
        manager.send(&Command::ping(id())).await;

        // the failed entry stays at the head for the next connection
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.queued(), 1);
        assert!(manager.reconnect_pending());

        net.set_fail_sends(false);
        manager.reconnect_now().await;
        assert_eq!(manager.queued(), 0);

        let sent = net.sent();
        // delivered exactly once, before the reconnect hello
        let pings = sent.iter().filter(|frame| frame.contains("\"ping\"")).count();
        assert_eq!(pings, 1);
        assert!(sent[sent.len() - 2].contains("\"ping\""));
        assert!(sent[sent.len() - 1].contains("\"hello\""));
    }

    #[tokio::test]
    async fn send_while_open_goes_straight_out() {
        let (transport, net) = MockTransport::new();
        let mut manager = TransportManager::new(transport, hub_url());
        manager.ensure_connected().await;

        manager.send(&Command::debug(id(), true)).await;
        assert_eq!(manager.queued(), 0);
        assert!(net.sent().last().expect("frames").contains("\"debug\""));
        assert_eq!(net.connects(), 1);
    }
}
