//! The message handler capability.
//!
//! A handler is whatever the host wants to run when a message arrives on a
//! subscribed topic. Closures work directly through the blanket impl:
//!
//! ```ignore
//! let mut on_temp = |topic: &str, payload: &[u8]| {
//!     // parse payload, update state
//! };
//! client.register_handler("sensors/+/temp", &mut on_temp)?;
//! ```

/// Receives messages for a registered topic filter.
///
/// Handlers run synchronously inside `DynamicMqttClient::tick`, on the same
/// execution context as the network state machine. They must return quickly:
/// a blocking handler stalls the whole device loop.
pub trait MessageHandler {
    /// Handle one inbound message. `topic` is the concrete topic the message
    /// was published on, not the filter it matched.
    fn on_message(&mut self, topic: &str, payload: &[u8]);
}

impl<F> MessageHandler for F
where
    F: FnMut(&str, &[u8]),
{
    fn on_message(&mut self, topic: &str, payload: &[u8]) {
        self(topic, payload)
    }
}
