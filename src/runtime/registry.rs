//! Topic bindings and message dispatch.

use heapless::{String, Vec};

use super::traits::MessageHandler;
use crate::error::RegistrationError;
use crate::topic;

/// Maximum length for a single topic filter.
pub const MAX_TOPIC_LEN: usize = 128;

/// A topic filter paired with the handler it triggers.
pub struct TopicBinding<'a> {
    filter: String<MAX_TOPIC_LEN>,
    handler: &'a mut dyn MessageHandler,
}

impl TopicBinding<'_> {
    pub fn filter(&self) -> &str {
        &self.filter
    }
}

/// The ordered binding table.
///
/// Bindings keep registration order, which is also the order handlers are
/// invoked in when several filters match one message. The same filter may be
/// registered more than once; every copy fires.
pub struct HandlerRegistry<'a, const MAX_BINDINGS: usize> {
    bindings: Vec<TopicBinding<'a>, MAX_BINDINGS>,
}

impl<'a, const MAX_BINDINGS: usize> HandlerRegistry<'a, MAX_BINDINGS> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Add a binding by copying the filter string.
    pub fn add(
        &mut self,
        filter: &str,
        handler: &'a mut dyn MessageHandler,
    ) -> Result<(), RegistrationError> {
        if !topic::is_valid_filter(filter) {
            return Err(RegistrationError::InvalidFilter);
        }

        let mut owned = String::new();
        owned
            .push_str(filter)
            .map_err(|_| RegistrationError::FilterTooLong)?;

        self.bindings
            .push(TopicBinding {
                filter: owned,
                handler,
            })
            .map_err(|_| RegistrationError::TooManyBindings)
    }

    /// Invoke every handler whose filter matches `topic`, in registration
    /// order. Returns the number of handlers invoked.
    pub fn dispatch(&mut self, topic: &str, payload: &[u8]) -> usize {
        let mut invoked = 0;
        for binding in self.bindings.iter_mut() {
            if topic::matches(&binding.filter, topic) {
                binding.handler.on_message(topic, payload);
                invoked += 1;
            }
        }
        invoked
    }

    /// The filter at `index` unless an earlier binding already uses it, so
    /// each distinct filter is subscribed only once.
    pub fn distinct_filter(&self, index: usize) -> Option<&str> {
        let filter = self.bindings.get(index)?.filter();
        let seen = self.bindings[..index].iter().any(|b| b.filter() == filter);
        (!seen).then_some(filter)
    }

    /// Get an iterator over the registered filters.
    #[cfg(test)]
    pub fn filters(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(TopicBinding::filter)
    }

    /// Get the number of registered bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl<const MAX_BINDINGS: usize> Default for HandlerRegistry<'_, MAX_BINDINGS> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use core::cell::RefCell;
    use std::string::{String as StdString, ToString};
    use std::vec::Vec as StdVec;

    #[test]
    fn dispatch_follows_registration_order_and_fires_duplicates() {
        let calls: RefCell<StdVec<(&str, StdString)>> = RefCell::new(StdVec::new());
        let mut first = |topic: &str, _: &[u8]| calls.borrow_mut().push(("first", topic.to_string()));
        let mut second = |topic: &str, _: &[u8]| calls.borrow_mut().push(("second", topic.to_string()));
        let mut third = |topic: &str, _: &[u8]| calls.borrow_mut().push(("third", topic.to_string()));

        let mut registry = HandlerRegistry::<4>::new();
        registry.add("a/+", &mut first).unwrap();
        registry.add("b/#", &mut second).unwrap();
        registry.add("a/+", &mut third).unwrap();

        assert_eq!(registry.dispatch("a/x", b"1"), 2);
        assert_eq!(registry.dispatch("c", b"2"), 0);
        drop(registry);

        assert_eq!(
            calls.into_inner(),
            [
                ("first", "a/x".to_string()),
                ("third", "a/x".to_string())
            ]
        );
    }

    #[test]
    fn handler_receives_topic_and_payload() {
        let seen = RefCell::new(None);
        let mut handler = |topic: &str, payload: &[u8]| {
            *seen.borrow_mut() = Some((topic.to_string(), payload.to_vec()));
        };
        let mut registry = HandlerRegistry::<1>::new();
        registry.add("sensors/+/temp", &mut handler).unwrap();

        registry.dispatch("sensors/kitchen/temp", b"21.5");
        drop(registry);

        assert_eq!(
            seen.into_inner(),
            Some(("sensors/kitchen/temp".to_string(), b"21.5".to_vec()))
        );
    }

    #[test]
    fn rejects_invalid_long_and_excess_filters() {
        let mut a = |_: &str, _: &[u8]| {};
        let mut b = |_: &str, _: &[u8]| {};
        let mut c = |_: &str, _: &[u8]| {};
        let mut d = |_: &str, _: &[u8]| {};
        let mut e = |_: &str, _: &[u8]| {};
        let mut registry = HandlerRegistry::<2>::new();

        assert_eq!(
            registry.add("a/#/b", &mut a),
            Err(RegistrationError::InvalidFilter)
        );
        let long = "x".repeat(MAX_TOPIC_LEN + 1);
        assert_eq!(
            registry.add(&long, &mut b),
            Err(RegistrationError::FilterTooLong)
        );
        registry.add("one", &mut c).unwrap();
        registry.add("two", &mut d).unwrap();
        assert_eq!(
            registry.add("three", &mut e),
            Err(RegistrationError::TooManyBindings)
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn distinct_filter_skips_repeats() {
        let mut a = |_: &str, _: &[u8]| {};
        let mut b = |_: &str, _: &[u8]| {};
        let mut c = |_: &str, _: &[u8]| {};
        let mut registry = HandlerRegistry::<3>::new();
        registry.add("x", &mut a).unwrap();
        registry.add("y", &mut b).unwrap();
        registry.add("x", &mut c).unwrap();

        assert_eq!(registry.distinct_filter(0), Some("x"));
        assert_eq!(registry.distinct_filter(1), Some("y"));
        assert_eq!(registry.distinct_filter(2), None);
        assert_eq!(registry.distinct_filter(3), None);
        assert_eq!(registry.filters().count(), 3);
    }
}
