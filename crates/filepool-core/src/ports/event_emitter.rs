//! File pool event emitter port.
//!
//! This port abstracts event delivery, allowing the engine to notify
//! listeners without coupling to transport details.

use crate::events::FilepoolEvent;

/// Port for emitting file pool events.
///
/// Implementations handle the actual event delivery (channels, UI
/// bridges). This method must not block; buffer or drop instead.
pub trait FilepoolEventEmitterPort: Send + Sync {
    /// Emit an event.
    fn emit(&self, event: FilepoolEvent);

    /// Clone this emitter into a boxed trait object.
    ///
    /// This enables cloning of `Arc<dyn FilepoolEventEmitterPort>` without
    /// requiring the underlying type to implement Clone.
    fn clone_box(&self) -> Box<dyn FilepoolEventEmitterPort>;
}

/// A no-op emitter for tests and headless contexts.
#[derive(Debug, Clone, Default)]
pub struct NoopEmitter;

impl NoopEmitter {
    /// Create a new no-op emitter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl FilepoolEventEmitterPort for NoopEmitter {
    fn emit(&self, _event: FilepoolEvent) {
        // Intentionally do nothing
    }

    fn clone_box(&self) -> Box<dyn FilepoolEventEmitterPort> {
        Box::new(self.clone())
    }
}
