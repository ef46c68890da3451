//! Provisioning protocol engine and orchestrator for Fleetlink devices.
//!
//! One registration attempt owns exactly one connection, one subscription
//! and one correlation context. The crate layers as:
//! - [`transport`] - the publish/subscribe seam ([`transport::Transport`])
//!   and its MQTT implementation
//! - [`tls`] - client-certificate identity loading for mutual TLS
//! - [`engine`] - the registration state machine and poll loop
//! - [`provisioner`] - binds a [`fleetlink_auth::Credential`] to the engine
//!
//! # Example
//!
//! ```ignore
//! use fleetlink_auth::Credential;
//! use fleetlink_client::{MqttTransport, ProtocolEngine, ProvisioningClient};
//! use tokio_util::sync::CancellationToken;
//!
//! let credential = Credential::symmetric_key("device-01", device_key_base64);
//! let engine = ProtocolEngine::new(MqttTransport::new());
//! let mut client = ProvisioningClient::new(
//!     "global.provisioning.example.net",
//!     "0ne00AAAA",
//!     credential,
//!     engine,
//! );
//!
//! let result = client.register(&CancellationToken::new()).await?;
//! println!("assigned to {:?}", result.assigned_hub);
//! ```

pub mod engine;
pub mod error;
pub mod provisioner;
pub mod tls;
pub mod transport;

pub use engine::{AttemptState, ProtocolEngine, ProtocolSettings, RegisterRequest};
pub use error::ProvisionError;
pub use provisioner::ProvisioningClient;
pub use tls::{load_client_identity, ClientIdentity, IdentityError};
pub use transport::{
    AuthStrategy, ConnectOptions, InboundMessage, MqttTransport, Transport, TransportError,
};
