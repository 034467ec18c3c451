//! EventBus - Fan-out channel for pipeline events
//!
//! The orchestrator publishes [`PipelineEvent`]s here without knowing who,
//! if anyone, is listening. Observers attach via [`EventBus::subscribe`]
//! and consume at their own pace.
//!
//! Built on `tokio::sync::broadcast`, which dictates the trade-offs:
//! emitting never blocks resolution, a receiver that falls behind loses
//! the oldest buffered events rather than applying backpressure, and
//! cloning the bus shares the underlying channel.

use super::PipelineEvent;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default capacity for the event bus channel
pub const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out channel carrying [`PipelineEvent`]s from the orchestrator to
/// any number of observers
///
/// A resolution run emits events whether or not anyone subscribed; with no
/// receivers they vanish for free. Clones share one channel, so the
/// orchestrator and its spawned sibling tasks can all hold a handle.
///
/// # Example
///
/// ```rust,ignore
/// use roma_core::events::{EventBus, PipelineEvent};
///
/// let bus = EventBus::new(1024);
/// let mut rx = bus.subscribe();
///
/// bus.emit(PipelineEvent::node_created(0, "root goal", 0));
///
/// while let Ok(event) = rx.recv().await {
///     println!("Event: {:?}", event);
/// }
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<PipelineEvent>>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per receiver
    ///
    /// A receiver more than `capacity` events behind loses the oldest ones
    /// and sees a lag error on its next recv.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create a bus with [`DEFAULT_CAPACITY`]
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Publish an event to every current subscriber
    ///
    /// Never blocks the emitter; with zero subscribers the event is
    /// discarded.
    pub fn emit(&self, event: PipelineEvent) {
        // A send error only means nobody is listening
        let _ = self.sender.send(event);
    }

    /// Attach a receiver for all events emitted from this point on
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Number of receivers currently attached
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
