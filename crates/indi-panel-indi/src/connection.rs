//! Connection lifecycle against an INDI server.
//!
//! One background task owns the socket. It connects, requests every
//! property, then multiplexes four event sources until the session ends:
//! bytes from the server, the coalescing queue's next deadline, outbound
//! commands, and shutdown. Each delivered message is applied to the device
//! tree and committed on the shared hub, then the connection revision is
//! bumped so [`wait`](crate::wait::wait) callers re-check their predicates.
//!
//! When the session ends the device tree is cleared and the task retries
//! after the configured delay, until [`IndiConnection::shutdown`].

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indi_panel_core::{Serial, SerialClock};
use indi_panel_sync::StateHub;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::device::{DeviceHandle, DeviceTreeView};
use crate::device_tree::{DeviceTreeWriter, TreeConfig};
use crate::error::{IndiError, Result};
use crate::message::{get_properties, IndiMessage};
use crate::queue::{MessageQueue, QueueConfig};
use crate::wait::CancelToken;
use crate::xml::{XmlFramer, DEFAULT_MAX_MESSAGE_SIZE};

/// Standard INDI server port.
pub const DEFAULT_PORT: u16 = 7624;

const READ_CHUNK: usize = 8192;

/// The hub shared between the connection task and application code.
pub type SharedHub = Arc<Mutex<StateHub>>;

// ─────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────

/// A bidirectional byte stream to an INDI server.
pub trait IndiStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> IndiStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Opens streams to an INDI server. Called once per (re)connect attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> io::Result<Box<dyn IndiStream>>;

    /// Human-readable target, for logs.
    fn describe(&self) -> String;
}

/// Plain TCP to `host:port`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> io::Result<Box<dyn IndiStream>> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ─────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Observable connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// A protocol or connect error happened since the last successful connect.
    pub errored: bool,
    /// Advances on every state change and every processed message.
    pub revision: Serial,
}

/// Connection behaviour.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Pause between a lost session and the next connect attempt.
    pub reconnect_delay: Duration,
    /// Element depth of messages in the stream.
    pub message_level: usize,
    pub max_message_size: usize,
    pub queue: QueueConfig,
    pub tree: TreeConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(3),
            message_level: 0,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            queue: QueueConfig::default(),
            tree: TreeConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────
// Connection
// ─────────────────────────────────────────────────────────────

struct Inner {
    hub: SharedHub,
    clock: SerialClock,
    config: ConnectionConfig,
    /// Locked after the hub when both are needed.
    writer: Mutex<DeviceTreeWriter>,
    status: watch::Sender<ConnectionStatus>,
    outbound: mpsc::UnboundedSender<String>,
    shutdown: CancelToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a managed INDI connection. Cheap to clone.
#[derive(Clone)]
pub struct IndiConnection {
    inner: Arc<Inner>,
}

impl IndiConnection {
    /// Start the connection task. Must be called within a tokio runtime.
    pub fn spawn(
        hub: SharedHub,
        clock: SerialClock,
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus {
            state: ConnectionState::Disconnected,
            errored: false,
            revision: clock.current(),
        });
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let writer = DeviceTreeWriter::new(config.tree.clone(), clock.clone());

        let conn = Self {
            inner: Arc::new(Inner {
                hub,
                clock,
                config,
                writer: Mutex::new(writer),
                status,
                outbound,
                shutdown: CancelToken::new(),
                task: Mutex::new(None),
            }),
        };
        let task = tokio::spawn(conn.clone().run(connector, outbound_rx));
        *conn.inner.task.lock() = Some(task);
        conn
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn state(&self) -> ConnectionState {
        self.status().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn hub(&self) -> &SharedHub {
        &self.inner.hub
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Run `f` against the device tree while holding the hub.
    pub fn with_tree<R>(&self, f: impl FnOnce(&DeviceTreeView<'_>) -> R) -> R {
        let hub = self.inner.hub.lock();
        let view = DeviceTreeView::new(hub.store(), &self.inner.config.tree.tree_path);
        f(&view)
    }

    pub fn device(&self, name: &str) -> DeviceHandle {
        DeviceHandle::new(self.clone(), name)
    }

    pub fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(IndiError::Disconnected)
        }
    }

    /// Queue raw XML for the server.
    pub fn send_command(&self, xml: String) -> Result<()> {
        self.ensure_connected()?;
        self.inner
            .outbound
            .send(xml)
            .map_err(|_| IndiError::Disconnected)
    }

    /// Send a vector command and mark the vector Busy.
    ///
    /// Both happen under the hub lock, so the driver's answer is applied
    /// after the Busy mark. A command that could not be queued leaves the
    /// tree untouched.
    pub(crate) fn submit(&self, device: &str, vector: &str, xml: String) -> Result<()> {
        {
            let mut hub = self.inner.hub.lock();
            self.send_command(xml)?;
            self.inner
                .writer
                .lock()
                .mark_busy(hub.store_mut(), device, vector)?;
            hub.commit();
        }
        self.bump(|_| {});
        Ok(())
    }

    /// Ask the task to stop without waiting for it.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
    }

    /// Stop the task and wait for it to finish. The device tree is left
    /// cleared.
    pub async fn shutdown(&self) {
        self.close();
        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "indi connection task failed");
            }
        }
    }

    fn bump(&self, f: impl FnOnce(&mut ConnectionStatus)) {
        let revision = self.inner.clock.next();
        self.inner.status.send_modify(|status| {
            f(status);
            status.revision = revision;
        });
    }

    fn set_state(&self, state: ConnectionState) {
        self.bump(|status| {
            status.state = state;
            if state == ConnectionState::Connected {
                status.errored = false;
            }
        });
    }

    fn flag_error(&self, err: &IndiError) {
        warn!(error = %err, "indi protocol error");
        self.bump(|status| status.errored = true);
    }

    // ─────────────────────────────────────────────────────────
    // Task
    // ─────────────────────────────────────────────────────────

    async fn run(self, connector: Arc<dyn Connector>, mut outbound: mpsc::UnboundedReceiver<String>) {
        let config = &self.inner.config;
        let shutdown = self.inner.shutdown.clone();
        let mut framer = XmlFramer::new(config.message_level, config.max_message_size);
        let mut queue = MessageQueue::new(config.queue.clone());
        let server = connector.describe();

        while !shutdown.is_cancelled() {
            self.set_state(ConnectionState::Connecting);
            debug!(%server, "connecting to indi server");

            let attempt = tokio::select! {
                attempt = connector.connect() => attempt,
                _ = shutdown.cancelled() => break,
            };

            match attempt {
                Ok(stream) => {
                    self.set_state(ConnectionState::Connected);
                    info!(%server, "indi server connected");

                    let ended = self
                        .session(stream, &mut framer, &mut queue, &mut outbound)
                        .await;
                    match ended {
                        Ok(()) => info!(%server, "indi session closed"),
                        Err(err) => {
                            warn!(%server, error = %err, "indi session failed");
                            self.bump(|status| status.errored = true);
                        }
                    }

                    framer.reset();
                    queue.clear();
                    // Commands for the old session must not reach the next one.
                    while outbound.try_recv().is_ok() {}
                    self.clear_tree();
                }
                Err(err) => {
                    warn!(%server, error = %err, "indi connect failed");
                    self.bump(|status| {
                        status.state = ConnectionState::Disconnected;
                        status.errored = true;
                    });
                }
            }

            self.set_state(ConnectionState::Disconnected);
            tokio::select! {
                _ = tokio::time::sleep(config.reconnect_delay) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        self.set_state(ConnectionState::Disconnected);
        debug!(%server, "indi connection task stopped");
    }

    async fn session(
        &self,
        stream: Box<dyn IndiStream>,
        framer: &mut XmlFramer,
        queue: &mut MessageQueue,
        outbound: &mut mpsc::UnboundedReceiver<String>,
    ) -> Result<()> {
        let (mut reader, mut writer) = tokio::io::split(stream);
        writer.write_all(get_properties(None).as_bytes()).await?;
        writer.flush().await?;

        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let deadline = queue.next_due(Instant::now());
            tokio::select! {
                read = reader.read(&mut chunk) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(());
                    }
                    framer.extend(&chunk[..n]);
                    self.drain_framer(framer, queue);
                }
                _ = sleep_until(deadline) => {
                    // One delivery per turn keeps reads and writes flowing.
                    if let Some(message) = queue.pop_ready(Instant::now()) {
                        self.deliver(&message);
                    }
                }
                command = outbound.recv() => {
                    let Some(xml) = command else {
                        return Ok(());
                    };
                    debug!(bytes = xml.len(), "sending command");
                    writer.write_all(xml.as_bytes()).await?;
                    writer.flush().await?;
                }
                _ = self.inner.shutdown.cancelled() => return Ok(()),
            }
        }
    }

    fn drain_framer(&self, framer: &mut XmlFramer, queue: &mut MessageQueue) {
        loop {
            match framer.next_message() {
                Ok(Some(xml)) => match IndiMessage::parse(&xml) {
                    Ok(Some(message)) => queue.push(message, Instant::now()),
                    Ok(None) => {}
                    Err(err) => self.flag_error(&err),
                },
                Ok(None) => break,
                Err(err) => self.flag_error(&err),
            }
        }
    }

    fn deliver(&self, message: &IndiMessage) {
        let applied = {
            let mut hub = self.inner.hub.lock();
            let applied = self.inner.writer.lock().apply(hub.store_mut(), message);
            hub.commit();
            applied
        };
        if let Err(err) = applied {
            warn!(error = %err, "failed to apply indi message");
        }
        self.bump(|_| {});
    }

    fn clear_tree(&self) {
        let mut hub = self.inner.hub.lock();
        if let Err(err) = self.inner.writer.lock().clear(hub.store_mut()) {
            warn!(error = %err, "failed to clear device tree");
        }
        hub.commit();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::VectorState;
    use crate::wait::wait;
    use indi_panel_sync::SyncConfig;
    use std::collections::VecDeque;
    use tokio::io::DuplexStream;

    /// Hands out prepared in-memory streams, one per connect.
    struct ScriptedConnector {
        streams: Mutex<VecDeque<DuplexStream>>,
    }

    impl ScriptedConnector {
        fn new(count: usize) -> (Arc<Self>, Vec<DuplexStream>) {
            let mut clients = VecDeque::new();
            let mut servers = Vec::new();
            for _ in 0..count {
                let (client, server) = tokio::io::duplex(64 * 1024);
                clients.push_back(client);
                servers.push(server);
            }
            (
                Arc::new(Self {
                    streams: Mutex::new(clients),
                }),
                servers,
            )
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self) -> io::Result<Box<dyn IndiStream>> {
            match self.streams.lock().pop_front() {
                Some(stream) => Ok(Box::new(stream)),
                None => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "no server")),
            }
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    async fn read_until(server: &mut DuplexStream, needle: &str) -> String {
        let mut seen = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = server.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed before sending {needle}");
            seen.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&seen).into_owned();
            if text.contains(needle) {
                return text;
            }
        }
    }

    fn start(connector: Arc<dyn Connector>) -> IndiConnection {
        let clock = SerialClock::new();
        let hub = Arc::new(Mutex::new(StateHub::new(clock.clone(), SyncConfig::default())));
        IndiConnection::spawn(hub, clock, ConnectionConfig::default(), connector)
    }

    const DEF_EXPOSURE: &str = r#"<defNumberVector device="CCD1" name="CCD_EXPOSURE" state="Idle" perm="rw">
        <defNumber name="CCD_EXPOSURE_VALUE">5</defNumber>
    </defNumberVector>"#;

    #[tokio::test]
    async fn test_definitions_reach_the_tree() {
        let (connector, mut servers) = ScriptedConnector::new(1);
        let conn = start(connector);
        let mut server = servers.remove(0);

        read_until(&mut server, "<getProperties").await;
        server.write_all(DEF_EXPOSURE.as_bytes()).await.unwrap();

        let ct = CancelToken::new();
        let value = wait(&conn, &ct, true, |tree| {
            tree.device("CCD1")
                .vector("CCD_EXPOSURE")
                .property_value_if_exists("CCD_EXPOSURE_VALUE")
        })
        .await
        .unwrap();
        assert_eq!(value, "5");
        assert!(conn.is_connected());
        assert_eq!(
            conn.hub().lock().get(&["deviceTree", "CCD1", "CCD_EXPOSURE", "$state"]),
            Some(serde_json::json!("Idle"))
        );

        conn.shutdown().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_set_values_sends_new_vector() {
        let (connector, mut servers) = ScriptedConnector::new(1);
        let conn = start(connector);
        let mut server = servers.remove(0);

        read_until(&mut server, "<getProperties").await;
        server.write_all(DEF_EXPOSURE.as_bytes()).await.unwrap();

        let ct = CancelToken::new();
        wait(&conn, &ct, true, |tree| {
            tree.device("CCD1").vector("CCD_EXPOSURE").exists().then_some(())
        })
        .await
        .unwrap();

        let vector = conn.device("CCD1").vector("CCD_EXPOSURE");
        vector.set_values(&[("CCD_EXPOSURE_VALUE", "3")]).unwrap();
        assert_eq!(vector.state(), Some(VectorState::Busy));
        assert!(matches!(
            vector.set_values_if_ready(&[("CCD_EXPOSURE_VALUE", "1")]),
            Err(IndiError::Busy { .. })
        ));

        let sent = read_until(&mut server, "</newNumberVector>").await;
        assert!(sent.contains(r#"<oneNumber name="CCD_EXPOSURE_VALUE">3</oneNumber>"#));

        conn.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_send_leaves_vector_state() {
        let (connector, mut servers) = ScriptedConnector::new(1);
        let conn = start(connector);
        let mut server = servers.remove(0);

        read_until(&mut server, "<getProperties").await;
        server.write_all(DEF_EXPOSURE.as_bytes()).await.unwrap();
        let ct = CancelToken::new();
        wait(&conn, &ct, false, |tree| {
            tree.device("CCD1").vector("CCD_EXPOSURE").exists().then_some(())
        })
        .await
        .unwrap();

        // Kill the task without its disconnect cleanup: the status still
        // reads Connected but the outbound channel is closed.
        let task = conn.inner.task.lock().take().unwrap();
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(conn.is_connected());

        let vector = conn.device("CCD1").vector("CCD_EXPOSURE");
        assert!(matches!(
            vector.set_values(&[("CCD_EXPOSURE_VALUE", "3")]),
            Err(IndiError::Disconnected)
        ));
        assert_eq!(vector.state(), Some(VectorState::Idle));
        assert!(vector.set_values_if_ready(&[]).is_err());
        assert_eq!(vector.state(), Some(VectorState::Idle));

        conn.shutdown().await;
    }

    #[tokio::test]
    async fn test_protocol_error_flags_but_keeps_session() {
        let (connector, mut servers) = ScriptedConnector::new(1);
        let conn = start(connector);
        let mut server = servers.remove(0);

        read_until(&mut server, "<getProperties").await;
        // Missing device attribute.
        server
            .write_all(br#"<setNumberVector name="X" state="Ok"></setNumberVector>"#)
            .await
            .unwrap();
        server.write_all(DEF_EXPOSURE.as_bytes()).await.unwrap();

        let ct = CancelToken::new();
        wait(&conn, &ct, true, |tree| tree.device("CCD1").exists().then_some(()))
            .await
            .unwrap();
        let status = conn.status();
        assert!(status.errored);
        assert_eq!(status.state, ConnectionState::Connected);

        conn.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_clears_tree_and_reconnects() {
        let (connector, mut servers) = ScriptedConnector::new(2);
        let conn = start(connector);
        let mut second = servers.pop().unwrap();
        let mut first = servers.pop().unwrap();

        read_until(&mut first, "<getProperties").await;
        first.write_all(DEF_EXPOSURE.as_bytes()).await.unwrap();
        let ct = CancelToken::new();
        wait(&conn, &ct, true, |tree| tree.device("CCD1").exists().then_some(()))
            .await
            .unwrap();

        let mut status = conn.subscribe();
        drop(first);
        status
            .wait_for(|s| s.state == ConnectionState::Disconnected)
            .await
            .unwrap();
        assert!(!conn.device("CCD1").exists());

        // Rejected while disconnected.
        assert!(matches!(
            conn.device("CCD1").vector("CCD_EXPOSURE").set_values(&[]),
            Err(IndiError::Disconnected)
        ));
        assert!(matches!(
            wait(&conn, &ct, false, |_| Some(())).await,
            Err(IndiError::Disconnected)
        ));

        // The retry delay elapses on the paused clock.
        read_until(&mut second, "<getProperties").await;
        status
            .wait_for(|s| s.state == ConnectionState::Connected)
            .await
            .unwrap();

        conn.shutdown().await;
    }

    #[tokio::test]
    async fn test_wait_is_cancellable() {
        let (connector, mut servers) = ScriptedConnector::new(1);
        let conn = start(connector);
        let mut server = servers.remove(0);
        read_until(&mut server, "<getProperties").await;

        let ct = CancelToken::new();
        let waiter = {
            let conn = conn.clone();
            let ct = ct.clone();
            tokio::spawn(async move {
                wait(&conn, &ct, true, |tree| tree.device("NEVER").exists().then_some(())).await
            })
        };
        ct.cancel();
        assert!(matches!(waiter.await.unwrap(), Err(IndiError::Cancelled)));

        conn.shutdown().await;
    }
}
