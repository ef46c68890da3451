//! Transport abstraction for the protocol engine.
//!
//! The engine drives a publish/subscribe connection through the [`Transport`]
//! trait. Production code uses the MQTT implementation in [`mqtt`]; tests
//! drive the engine with a scripted in-memory fake. Delivery semantics are
//! at-least-once: implementations may deliver duplicates and the engine must
//! tolerate them.

pub mod mqtt;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetlink_auth::SasToken;

use crate::tls::ClientIdentity;

pub use mqtt::MqttTransport;

/// Errors raised by a transport implementation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    /// Could not reach or handshake with the broker.
    #[error("connection failed: {0}")]
    Connect(String),

    /// TLS configuration could not be built.
    #[error("tls configuration failed: {0}")]
    Tls(String),

    /// Subscribe request failed.
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    /// Publish request failed.
    #[error("publish failed: {0}")]
    Publish(String),

    /// The connection closed while the engine was still using it.
    #[error("connection closed")]
    Closed,
}

/// How one connection attempt authenticates.
///
/// Exactly one of the two strategies is active per attempt: a SAS token
/// presented as the password, or a TLS client certificate presented during
/// the handshake with an empty password.
#[derive(Clone)]
pub enum AuthStrategy {
    /// Symmetric-key paths: password is the SAS token.
    SasToken(SasToken),
    /// Certificate paths: the identity is offered in the TLS handshake.
    ClientCertificate(Arc<ClientIdentity>),
}

impl std::fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SasToken(_) => f.write_str("AuthStrategy::SasToken"),
            Self::ClientCertificate(_) => f.write_str("AuthStrategy::ClientCertificate"),
        }
    }
}

/// Parameters for opening one connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    /// Client identifier; always the registration id.
    pub client_id: String,
    pub username: String,
    pub auth: AuthStrategy,
    pub keep_alive: Duration,
}

/// An inbound publish delivered to the engine.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// A single-connection publish/subscribe transport.
///
/// One transport instance serves one registration attempt: `connect`,
/// `subscribe` and `publish` in order, `recv` for inbound messages, and
/// `disconnect` for teardown. Implementations do not retry; retry policy
/// belongs to the caller of the engine.
#[async_trait]
pub trait Transport: Send {
    /// Open the connection and authenticate.
    async fn connect(&mut self, options: &ConnectOptions) -> Result<(), TransportError>;

    /// Subscribe to a topic filter.
    async fn subscribe(&mut self, topic_filter: &str) -> Result<(), TransportError>;

    /// Publish a payload.
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Wait for the next inbound publish.
    async fn recv(&mut self) -> Result<InboundMessage, TransportError>;

    /// Tear the connection down. Idempotent.
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}
