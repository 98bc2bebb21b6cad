//! Test fixtures and helpers.
//!
//! A [`FakeDriver`] plays the INDI server side of an in-memory duplex
//! stream. [`DuplexConnector`] hands the client side of each prepared
//! stream to the connection task, one per connect attempt, so reconnects
//! can be scripted.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use indi_panel::{Panel, PanelConfig};
use indi_panel_indi::{Connector, IndiStream};

const BUFFER: usize = 256 * 1024;

/// Connector over prepared in-memory streams.
#[derive(Debug, Default)]
pub struct DuplexConnector {
    streams: Mutex<VecDeque<DuplexStream>>,
}

impl DuplexConnector {
    /// A connector with `sessions` scripted connections and their drivers.
    pub fn with_sessions(sessions: usize) -> (Arc<Self>, Vec<FakeDriver>) {
        let connector = Self::default();
        let drivers = (0..sessions).map(|_| connector.prepare()).collect();
        (Arc::new(connector), drivers)
    }

    /// Add one more connection and return its server side.
    pub fn prepare(&self) -> FakeDriver {
        let (client, server) = tokio::io::duplex(BUFFER);
        self.streams.lock().push_back(client);
        FakeDriver::new(server)
    }
}

#[async_trait]
impl Connector for DuplexConnector {
    async fn connect(&self) -> io::Result<Box<dyn IndiStream>> {
        let next = self.streams.lock().pop_front();
        match next {
            Some(stream) => Ok(Box::new(stream)),
            None => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "no scripted session left")),
        }
    }

    fn describe(&self) -> String {
        "duplex".into()
    }
}

/// The server side of one scripted session.
#[derive(Debug)]
pub struct FakeDriver {
    stream: DuplexStream,
    /// Bytes received but not yet consumed by `expect`.
    received: String,
}

impl FakeDriver {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            received: String::new(),
        }
    }

    /// Send raw XML to the client.
    pub async fn send(&mut self, xml: &str) {
        self.stream
            .write_all(xml.as_bytes())
            .await
            .expect("client side of the duplex is gone");
    }

    /// Read until `needle` has arrived; return everything up to and
    /// including it, keeping the rest for the next call.
    pub async fn expect(&mut self, needle: &str) -> String {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(at) = self.received.find(needle) {
                let rest = self.received.split_off(at + needle.len());
                return std::mem::replace(&mut self.received, rest);
            }
            let n = self.stream.read(&mut buf).await.expect("read from client");
            assert!(n > 0, "client closed while waiting for {needle:?}");
            self.received.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
    }

    /// Wait for the client's `getProperties` handshake.
    pub async fn handshake(&mut self) {
        self.expect("<getProperties").await;
        self.expect("/>").await;
    }

    /// Wait for a `new*Vector` command and return it.
    pub async fn expect_command(&mut self) -> String {
        self.expect("<new").await;
        let body = self.expect("Vector>").await;
        format!("<new{body}")
    }
}

/// A panel wired to scripted drivers.
pub struct PanelFixture {
    pub panel: Panel,
    pub connector: Arc<DuplexConnector>,
    pub drivers: VecDeque<FakeDriver>,
}

impl PanelFixture {
    /// Start a panel with `sessions` scripted connections and default config.
    pub fn new(sessions: usize) -> Self {
        Self::with_config(PanelConfig::default(), sessions)
    }

    pub fn with_config(config: PanelConfig, sessions: usize) -> Self {
        let (connector, drivers) = DuplexConnector::with_sessions(sessions);
        let panel = Panel::with_connector(config, connector.clone()).expect("valid test config");
        Self {
            panel,
            connector,
            drivers: drivers.into(),
        }
    }

    /// The driver for the next session, after its handshake.
    pub async fn next_driver(&mut self) -> FakeDriver {
        let mut driver = self.drivers.pop_front().expect("no scripted session left");
        driver.handshake().await;
        driver
    }
}
