//! Runtime building blocks used by [`DynamicMqttClient`](crate::DynamicMqttClient).
//!
//! # Overview
//!
//! - [`HandlerRegistry`]: the ordered table of topic filters and their handlers
//! - [`MessageHandler`]: the capability a handler implements (closures do)
//! - [`Backoff`]: reconnect delays
//! - [`Outbox`] / [`Inbox`]: fixed-size byte buffers towards the transport
//!
//! Nothing here allocates; capacities are const generics chosen by the host.

pub(crate) mod backoff;
pub(crate) mod buffer;
pub(crate) mod registry;
pub(crate) mod traits;

pub use backoff::{Backoff, INITIAL_BACKOFF, MAX_BACKOFF};
pub use buffer::{Inbox, Outbox};
pub use registry::{HandlerRegistry, MAX_TOPIC_LEN, TopicBinding};
pub use traits::MessageHandler;
