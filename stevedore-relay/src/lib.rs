//! Stevedore relay core
//!
//! Everything that moves envelopes over RabbitMQ lives here:
//! - Resilient broker connection management with unbounded reconnect
//! - Fanout exchange topology with per-process exclusive queues
//! - Docker lifecycle event publishing
//! - Command dispatch against local container/script capabilities
//! - Result delivery back to the originating chat session
//!
//! The container runtime, the local scripts and the chat transport are
//! capability traits implemented by the node and operator binaries.

pub mod broker;
pub mod chat;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod events;
pub mod identity;
pub mod runtime;
pub mod sink;
pub mod topology;

pub use broker::BrokerManager;
pub use chat::ChatTransport;
pub use config::{Exchanges, RelayConfig};
pub use dispatch::{CommandDispatcher, DispatchOutcome};
pub use envelope::{CommandPayload, CommandTag, ContainerSnapshot, Envelope, ResultBody};
pub use error::RelayError;
pub use events::{EventPublisher, RawContainerEvent};
pub use identity::ServerIdentity;
pub use runtime::{ContainerRuntime, NodeControl, RuntimeError};
pub use sink::{EventLogger, ResultSink};
pub use topology::Topology;
