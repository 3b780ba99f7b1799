use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use docset_core::DocumentEvent;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace};

/// Receives events from a [`NotificationBus`].
///
/// Callbacks run on the bus's dispatcher task, one event at a time, so they
/// must not block for long. Unsubscribing from inside a callback is allowed.
pub trait DocumentSubscriber: Send + Sync {
    fn on_event(&self, event: &DocumentEvent);

    /// Whether the subscriber can never receive again. The bus drops closed
    /// subscriptions after delivering an event.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Registration token returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Entry = (SubscriptionId, Arc<dyn DocumentSubscriber>);

#[derive(Default)]
struct Subscribers {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry>>,
}

impl Subscribers {
    fn entries(&self) -> std::sync::MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<Entry> {
        self.entries().clone()
    }

    fn is_registered(&self, id: SubscriptionId) -> bool {
        self.entries().iter().any(|(existing, _)| *existing == id)
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }
}

/// Ordered event channel.
///
/// Publishing only enqueues. A single dispatcher task dequeues events in
/// publish order and hands each one to every registered subscriber before
/// moving on to the next, so no subscriber ever sees two events
/// concurrently or out of order.
pub struct NotificationBus {
    sender: mpsc::UnboundedSender<DocumentEvent>,
    subscribers: Arc<Subscribers>,
}

impl fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBus")
            .field("subscribers", &self.subscribers.entries().len())
            .finish_non_exhaustive()
    }
}

impl NotificationBus {
    /// Create a bus and spawn its dispatcher. Must be called within a tokio
    /// runtime.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<DocumentEvent>();
        let subscribers = Arc::new(Subscribers::default());
        let subscribers_clone = Arc::clone(&subscribers);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                trace!("Dispatching {:?}", event);
                for (id, subscriber) in subscribers_clone.snapshot() {
                    // Skip anyone who unsubscribed since the snapshot,
                    // including during delivery of this same event.
                    if !subscribers_clone.is_registered(id) {
                        continue;
                    }
                    subscriber.on_event(&event);
                    if subscriber.is_closed() && subscribers_clone.remove(id) {
                        debug!("Dropped closed subscription {:?}", id);
                    }
                }
            }
            debug!("Notification bus dispatcher stopped");
        });

        Self {
            sender: tx,
            subscribers,
        }
    }

    /// Enqueue an event for delivery.
    pub fn publish(&self, event: DocumentEvent) {
        if self.sender.send(event).is_err() {
            debug!("Notification bus dispatcher is gone, dropping event");
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn DocumentSubscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.subscribers.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.entries().push((id, subscriber));
        debug!("Subscribed {:?}", id);
        id
    }

    /// Remove a subscription. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.remove(id);
        if removed {
            debug!("Unsubscribed {:?}", id);
        }
        removed
    }

    /// Subscribe with a channel receiving a copy of every event.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<DocumentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(Arc::new(ChannelSubscriber { sender: tx }));
        (id, rx)
    }

    /// Subscribe with a `Stream` of events.
    pub fn subscribe_stream(&self) -> (SubscriptionId, UnboundedReceiverStream<DocumentEvent>) {
        let (id, rx) = self.subscribe_channel();
        (id, UnboundedReceiverStream::new(rx))
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.entries().len()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Forwards events into an unbounded channel.
struct ChannelSubscriber {
    sender: mpsc::UnboundedSender<DocumentEvent>,
}

impl DocumentSubscriber for ChannelSubscriber {
    fn on_event(&self, event: &DocumentEvent) {
        // Receiver dropped: the dispatcher prunes us via is_closed
        let _ = self.sender.send(event.clone());
    }

    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docset_core::{DocumentRecord, Location};
    use futures::StreamExt;
    use std::sync::OnceLock;
    use tokio::time::{timeout, Duration};

    fn found(id: &str) -> DocumentEvent {
        DocumentEvent::DocumentFound {
            record: DocumentRecord::new(id, id, Location::Local),
            previous: None,
        }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<DocumentEvent>) -> DocumentEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_ordered_delivery_to_all_subscribers() {
        let bus = NotificationBus::new();
        let (_a, mut rx_a) = bus.subscribe_channel();
        let (_b, mut rx_b) = bus.subscribe_channel();

        bus.publish(DocumentEvent::ScanStarted);
        bus.publish(found("x"));
        bus.publish(DocumentEvent::ScanFinished);

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(next(rx).await, DocumentEvent::ScanStarted);
            assert_eq!(next(rx).await, found("x"));
            assert_eq!(next(rx).await, DocumentEvent::ScanFinished);
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = NotificationBus::new();
        let (id, mut rx) = bus.subscribe_channel();
        let (_other, mut rx_other) = bus.subscribe_channel();

        bus.publish(DocumentEvent::ScanStarted);
        assert_eq!(next(&mut rx).await, DocumentEvent::ScanStarted);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(DocumentEvent::ScanFinished);

        assert_eq!(next(&mut rx_other).await, DocumentEvent::ScanStarted);
        assert_eq!(next(&mut rx_other).await, DocumentEvent::ScanFinished);
        // The dropped subscription's sender is gone, so the channel closes
        // without ever yielding the second event.
        assert_eq!(rx.recv().await, None);
    }

    /// Unsubscribes itself on the first event it receives.
    struct OneShot {
        bus: Arc<NotificationBus>,
        id: OnceLock<SubscriptionId>,
        seen: Mutex<Vec<DocumentEvent>>,
    }

    impl DocumentSubscriber for OneShot {
        fn on_event(&self, event: &DocumentEvent) {
            self.seen.lock().unwrap().push(event.clone());
            if let Some(id) = self.id.get() {
                self.bus.unsubscribe(*id);
            }
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_during_delivery() {
        let bus = Arc::new(NotificationBus::new());
        let one_shot = Arc::new(OneShot {
            bus: Arc::clone(&bus),
            id: OnceLock::new(),
            seen: Mutex::new(Vec::new()),
        });
        let id = bus.subscribe(one_shot.clone());
        one_shot.id.set(id).unwrap();
        let (_later, mut rx_later) = bus.subscribe_channel();

        bus.publish(DocumentEvent::ScanStarted);
        bus.publish(found("a"));
        bus.publish(DocumentEvent::ScanFinished);

        // The subscriber registered after the one-shot is never skipped.
        assert_eq!(next(&mut rx_later).await, DocumentEvent::ScanStarted);
        assert_eq!(next(&mut rx_later).await, found("a"));
        assert_eq!(next(&mut rx_later).await, DocumentEvent::ScanFinished);

        let seen = one_shot.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![DocumentEvent::ScanStarted]);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_unsubscribed() {
        let bus = NotificationBus::new();
        let (_gone, rx_gone) = bus.subscribe_channel();
        let (_kept, mut rx_kept) = bus.subscribe_channel();
        assert_eq!(bus.subscriber_count(), 2);
        drop(rx_gone);

        bus.publish(DocumentEvent::ScanStarted);
        bus.publish(DocumentEvent::ScanFinished);
        assert_eq!(next(&mut rx_kept).await, DocumentEvent::ScanStarted);
        // The first event's delivery is complete once the second arrives
        assert_eq!(next(&mut rx_kept).await, DocumentEvent::ScanFinished);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_subscription() {
        let bus = NotificationBus::new();
        let (_id, stream) = bus.subscribe_stream();

        bus.publish(DocumentEvent::ScanStarted);
        bus.publish(DocumentEvent::ScanCancelled);

        let events = timeout(
            Duration::from_secs(5),
            stream.take(2).collect::<Vec<DocumentEvent>>(),
        )
        .await
        .unwrap();
        assert_eq!(
            events,
            vec![DocumentEvent::ScanStarted, DocumentEvent::ScanCancelled]
        );
    }
}
