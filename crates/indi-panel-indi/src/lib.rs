//! # INDI Panel INDI
//!
//! Client side of the INDI device-control protocol, projected into the
//! versioned store.
//!
//! ## Overview
//!
//! A background task holds the socket to an INDI server. Incoming XML is
//! framed, parsed, throttled and written into the device tree under
//! `deviceTree.<device>.<vector>`, with one hub commit per delivered
//! message. Application code reads the tree through views, sends commands
//! through handles, and blocks on [`wait`] until a predicate over the tree
//! holds.
//!
//! ## Key Types
//!
//! - [`IndiConnection`] - Connection task handle and status
//! - [`XmlFramer`] - Splits the raw stream into messages
//! - [`IndiMessage`] - Parsed `def*`, `set*`, `delProperty` and `message`
//! - [`DeviceTreeWriter`] - Applies messages to the store
//! - [`MessageQueue`] - Coalesces high-frequency updates
//! - [`DeviceTreeView`], [`VectorHandle`] - Reads and commands
//! - [`CancelToken`] - Cooperative cancellation for waits

pub mod connection;
pub mod device;
pub mod device_tree;
pub mod error;
pub mod message;
pub mod queue;
pub mod wait;
pub mod xml;

pub use connection::{
    ConnectionConfig, ConnectionState, ConnectionStatus, Connector, IndiConnection, IndiStream,
    SharedHub, TcpConnector, DEFAULT_PORT,
};
pub use device::{DeviceHandle, DeviceTreeView, DeviceView, VectorHandle, VectorView};
pub use device_tree::{DeviceTreeWriter, TreeConfig};
pub use error::{IndiError, Result};
pub use message::{
    get_properties, DefVector, DelProperty, IndiMessage, LogMessage, Member, NewVector, SetVector,
    VectorKind, VectorState, PROTOCOL_VERSION,
};
pub use queue::{MessageQueue, QueueConfig};
pub use wait::{set_param, wait, with_timeout, CancelToken};
pub use xml::{XmlFramer, DEFAULT_MAX_MESSAGE_SIZE};
