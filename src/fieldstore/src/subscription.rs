//! Per-container and per-field change notification, dispatched
//! synchronously after the mutation that causes them completes (spec §4.9).

use std::collections::HashMap;
use std::fmt;

/// Kind of change a subscriber is notified about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageEvent {
    Write,
    Rename,
    Delete,
}

/// Delivered to a subscriber handler. `path` is the full dotted/indexed
/// address relative to the subscriber's container.
#[derive(Debug, Clone)]
pub struct StorageEventArgs {
    pub event: StorageEvent,
    pub path: String,
}

impl fmt::Display for StorageEventArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.event, self.path)
    }
}

type Handler = Box<dyn FnMut(&StorageEventArgs)>;

/// Container-scoped (any field) and field-scoped subscriber lists, plus a
/// token allocator so a returned [`SubscriptionToken`] can unhook itself.
#[derive(Default)]
pub struct SubscriptionBus {
    next_token: u64,
    container_subs: Vec<(u64, Handler)>,
    field_subs: HashMap<String, Vec<(u64, Handler)>>,
}

impl SubscriptionBus {
    pub fn new() -> Self {
        SubscriptionBus {
            next_token: 1,
            container_subs: Vec::new(),
            field_subs: HashMap::new(),
        }
    }

    pub fn subscribe_container(&mut self, handler: Handler) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        self.container_subs.push((token, handler));
        token
    }

    pub fn subscribe_field(&mut self, field: &str, handler: Handler) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        self.field_subs.entry(field.to_string()).or_default().push((token, handler));
        token
    }

    pub fn unsubscribe_container(&mut self, token: u64) {
        self.container_subs.retain(|(t, _)| *t != token);
    }

    pub fn unsubscribe_field(&mut self, field: &str, token: u64) {
        if let Some(list) = self.field_subs.get_mut(field) {
            list.retain(|(t, _)| *t != token);
        }
    }

    /// Dispatches in registration order: container-scoped subscribers first,
    /// then the field-scoped subscribers of `field`.
    pub fn dispatch(&mut self, field: &str, event: StorageEvent, path: &str) {
        let args = StorageEventArgs {
            event,
            path: path.to_string(),
        };
        for (_, handler) in self.container_subs.iter_mut() {
            handler(&args);
        }
        if let Some(list) = self.field_subs.get_mut(field) {
            for (_, handler) in list.iter_mut() {
                handler(&args);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn write_notifies_container_and_field_scoped_subscribers() {
        let mut bus = SubscriptionBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let seen_a = seen.clone();
        bus.subscribe_container(Box::new(move |args| seen_a.borrow_mut().push(format!("container:{args}"))));
        let seen_b = seen.clone();
        bus.subscribe_field("hp", Box::new(move |args| seen_b.borrow_mut().push(format!("field:{args}"))));

        bus.dispatch("hp", StorageEvent::Write, "hp");

        assert_eq!(
            *seen.borrow(),
            vec!["container:Write(hp)".to_string(), "field:Write(hp)".to_string()]
        );
    }

    #[test]
    fn unsubscribed_handler_receives_nothing_further() {
        let mut bus = SubscriptionBus::new();
        let count = Rc::new(RefCell::new(0));
        let count_clone = count.clone();
        let token = bus.subscribe_container(Box::new(move |_| *count_clone.borrow_mut() += 1));

        bus.dispatch("f", StorageEvent::Write, "f");
        bus.unsubscribe_container(token);
        bus.dispatch("f", StorageEvent::Write, "f");

        assert_eq!(*count.borrow(), 1);
    }
}
