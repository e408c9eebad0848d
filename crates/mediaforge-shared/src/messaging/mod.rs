//! Messaging: the domain event envelope, queue routing, the provider enum
//! (in-memory + AMQP), and the `MessageClient` facade tying them together.

pub mod client;
pub mod events;
pub mod router;
pub mod service;

pub use client::MessageClient;
pub use events::GatewayEvent;
pub use router::{DefaultMessageRouter, MessageRouter, MessageRouterKind};
pub use service::{
    MessageId, MessagingError, MessagingProvider, QueueMessage, QueueStats, QueuedMessage,
    ReceiptHandle,
};
