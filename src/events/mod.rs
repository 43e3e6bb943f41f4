//! Presenter event delivery
//!
//! Events raised on the mixer or compositor threads are handed to the
//! host's sink on the serial task queue, so raising never blocks and never
//! re-enters the host from inside the presenter.

mod task_queue;

pub use task_queue::TaskQueue;
pub(crate) use task_queue::panic_message;

use log::{debug, trace};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::decoder::MediaType;
use crate::presenter::PresenterState;

/// Notifications for the host
#[derive(Debug, Clone, PartialEq)]
pub enum PresenterEvent {
    /// A new frame is ready for composition
    NewFrame,

    /// The clock passed the last sample after end of stream
    MediaFinished,

    /// The presenter finished a state transition
    StateReached(PresenterState),

    /// A device failed and no software fallback was possible
    FallbackFailure(String),

    /// The negotiated output type changed
    MediaTypeChanged(MediaType),
}

/// Receiver of presenter events
pub trait PresenterEventSink: Send + Sync {
    /// Handle one event; called on the presenter's task queue thread
    fn on_event(&self, event: PresenterEvent);
}

/// Fire-and-forget event forwarding
pub struct EventProxy {
    tasks: Arc<TaskQueue>,
    sink: RwLock<Option<Arc<dyn PresenterEventSink>>>,
}

impl EventProxy {
    /// Create a proxy with no sink attached
    pub fn new(tasks: Arc<TaskQueue>) -> Self {
        Self {
            tasks,
            sink: RwLock::new(None),
        }
    }

    /// Attach or detach the host sink
    pub fn set_sink(&self, sink: Option<Arc<dyn PresenterEventSink>>) {
        *self.sink.write() = sink;
    }

    /// Whether a sink is attached
    pub fn has_sink(&self) -> bool {
        self.sink.read().is_some()
    }

    /// Queue `event` for delivery
    pub fn raise(&self, event: PresenterEvent) {
        let Some(sink) = self.sink.read().clone() else {
            trace!("No event sink for {:?}", event);
            return;
        };

        trace!("Raising {:?}", event);
        let description = format!("{:?}", event);
        if !self.tasks.post(move || sink.on_event(event)) {
            debug!("Dropped {} after shutdown", description);
        }
    }
}

impl std::fmt::Debug for EventProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProxy")
            .field("has_sink", &self.has_sink())
            .finish()
    }
}
