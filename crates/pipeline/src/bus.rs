// crates/pipeline/src/bus.rs
//! In-process event bus: queued, cooperative, single-threaded.
//!
//! Publishing never blocks and never runs subscribers inline — events
//! queue until the owning loop calls `dispatch`, which runs subscribers
//! to completion in registration order. A panicking subscriber is logged
//! and isolated; the rest still run. Subscribers must not mutate the
//! pipeline directly; they re-enter through the submission API.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};

use redline_types::{PipelineEvent, Topic};
use tracing::{trace, warn};

/// Handle returned by `subscribe`; pass back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type Callback = Box<dyn FnMut(&PipelineEvent)>;

struct Subscriber {
    id: Subscription,
    topic: Topic,
    callback: Callback,
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Subscriber>,
    queue: VecDeque<PipelineEvent>,
    next_id: u64,
    published: u64,
    delivered: u64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.len())
            .field("queued", &self.queue.len())
            .field("published", &self.published)
            .field("delivered", &self.delivered)
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &mut self,
        topic: Topic,
        callback: impl FnMut(&PipelineEvent) + 'static,
    ) -> Subscription {
        self.next_id += 1;
        let id = Subscription(self.next_id);
        self.subscribers.push(Subscriber {
            id,
            topic,
            callback: Box::new(callback),
        });
        id
    }

    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != subscription);
        self.subscribers.len() != before
    }

    /// Queue an event; non-blocking from the producer's perspective.
    pub fn publish(&mut self, event: PipelineEvent) {
        trace!(topic = ?event.topic(), "event queued");
        self.published += 1;
        self.queue.push_back(event);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Drain the queue, delivering each event to its topic's subscribers
    /// in registration order. Returns the number of events dispatched.
    pub fn dispatch(&mut self) -> usize {
        let mut dispatched = 0;
        while let Some(event) = self.queue.pop_front() {
            dispatched += 1;
            let topic = event.topic();
            for subscriber in self.subscribers.iter_mut() {
                if subscriber.topic != topic {
                    continue;
                }
                let callback = &mut subscriber.callback;
                let result = catch_unwind(AssertUnwindSafe(|| callback(&event)));
                if result.is_err() {
                    warn!(?topic, "subscriber panicked; continuing with the rest");
                } else {
                    self.delivered += 1;
                }
            }
        }
        dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use redline_types::SessionId;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn session_started(session_id: SessionId) -> PipelineEvent {
        PipelineEvent::SessionStarted {
            session_id,
            document_key: "doc.md".into(),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_publish_is_deferred_until_dispatch() {
        let mut bus = EventBus::new();
        let seen = Rc::new(RefCell::new(0));
        let observer = seen.clone();
        bus.subscribe(Topic::SessionStarted, move |_| {
            *observer.borrow_mut() += 1;
        });

        bus.publish(session_started(SessionId::new()));
        assert_eq!(*seen.borrow(), 0, "publish must not run subscribers");
        assert_eq!(bus.dispatch(), 1);
        assert_eq!(*seen.borrow(), 1);
    }

    #[test]
    fn test_registration_order_delivery() {
        let mut bus = EventBus::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            bus.subscribe(Topic::SessionStarted, move |_| {
                order.borrow_mut().push(tag);
            });
        }
        bus.publish(session_started(SessionId::new()));
        bus.dispatch();
        assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_topic_filtering() {
        let mut bus = EventBus::new();
        let seen = Rc::new(RefCell::new(0));
        let observer = seen.clone();
        bus.subscribe(Topic::SessionEnded, move |_| {
            *observer.borrow_mut() += 1;
        });
        bus.publish(session_started(SessionId::new()));
        bus.dispatch();
        assert_eq!(*seen.borrow(), 0);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let mut bus = EventBus::new();
        let seen = Rc::new(RefCell::new(0));
        bus.subscribe(Topic::SessionStarted, |_| panic!("bad subscriber"));
        let observer = seen.clone();
        bus.subscribe(Topic::SessionStarted, move |_| {
            *observer.borrow_mut() += 1;
        });
        bus.publish(session_started(SessionId::new()));
        bus.dispatch();
        assert_eq!(*seen.borrow(), 1, "later subscribers still run");
    }

    #[test]
    fn test_unsubscribe() {
        let mut bus = EventBus::new();
        let seen = Rc::new(RefCell::new(0));
        let observer = seen.clone();
        let sub = bus.subscribe(Topic::SessionStarted, move |_| {
            *observer.borrow_mut() += 1;
        });
        assert!(bus.unsubscribe(sub));
        assert!(!bus.unsubscribe(sub));
        bus.publish(session_started(SessionId::new()));
        bus.dispatch();
        assert_eq!(*seen.borrow(), 0);
    }
}
