//! Named event dispatch with one-shot and non-clearable registrations.
//!
//! Every stateful component of the engine surfaces its lifecycle through a
//! [Subscribable]: sessions, connectors and the supervisor each carry one,
//! parameterized over their event enum. Handlers run synchronously in
//! insertion order; a panicking handler is isolated so its siblings still
//! run.

use std::collections::HashMap;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;

/// Implemented by event enums dispatched through a [Subscribable].
pub trait Emittable {
    /// Discriminant used to route an event to its handlers.
    type Kind: Copy + Eq + Hash + std::fmt::Debug;

    /// The discriminant of this event value.
    fn kind(&self) -> Self::Kind;
}

/// Handler callback. Kept synchronous; handlers that need to do async
/// work forward into a channel.
pub type EventHandler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registration<E> {
    id: u64,
    cb: EventHandler<E>,
    permanent: bool,
    once: bool,
}

struct Registry<E: Emittable> {
    handlers: HashMap<E::Kind, Vec<Registration<E>>>,
    next_id: u64,
}

impl<E: Emittable> Default for Registry<E> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
            next_id: 0,
        }
    }
}

/// A semantic event bus: a mapping from event kind to an ordered set of
/// callbacks.
pub struct Subscribable<E: Emittable> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E: Emittable> Default for Subscribable<E> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }
}

impl<E: Emittable> Clone for Subscribable<E> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

/// Idempotent unregister handle returned by every registration.
pub struct Subscription<E: Emittable> {
    registry: Weak<Mutex<Registry<E>>>,
    kind: E::Kind,
    id: u64,
}

impl<E: Emittable> Subscription<E> {
    /// Remove the registration. Calling this more than once, or after the
    /// bus is gone, is a no-op.
    pub fn cancel(&self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock().unwrap();
            if let Some(list) = registry.handlers.get_mut(&self.kind) {
                list.retain(|r| r.id != self.id);
            }
        }
    }
}

impl<E: Emittable> Subscribable<E> {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    fn register(
        &self,
        kind: E::Kind,
        cb: EventHandler<E>,
        permanent: bool,
        once: bool,
    ) -> Subscription<E> {
        let mut registry = self.registry.lock().unwrap();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.entry(kind).or_default().push(Registration {
            id,
            cb,
            permanent,
            once,
        });
        Subscription {
            registry: Arc::downgrade(&self.registry),
            kind,
            id,
        }
    }

    /// Register a callback for `kind`.
    pub fn on(&self, kind: E::Kind, cb: impl Fn(&E) + Send + Sync + 'static) -> Subscription<E> {
        self.register(kind, Arc::new(cb), false, false)
    }

    /// Register a callback that unregisters itself before its first
    /// invocation.
    pub fn once(&self, kind: E::Kind, cb: impl Fn(&E) + Send + Sync + 'static) -> Subscription<E> {
        self.register(kind, Arc::new(cb), false, true)
    }

    /// Register a callback immune to [Subscribable::remove_all_listeners].
    pub fn permanent(
        &self,
        kind: E::Kind,
        cb: impl Fn(&E) + Send + Sync + 'static,
    ) -> Subscription<E> {
        self.register(kind, Arc::new(cb), true, false)
    }

    /// Invoke every callback registered for the event's kind,
    /// synchronously, in insertion order. A panicking callback does not
    /// prevent the remaining ones from running. One-shot callbacks are
    /// unregistered before invocation, so a handler emitting the same
    /// event recursively cannot re-enter itself.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<EventHandler<E>> = {
            let mut registry = self.registry.lock().unwrap();
            match registry.handlers.get_mut(&event.kind()) {
                None => return,
                Some(list) => {
                    let cbs = list.iter().map(|r| r.cb.clone()).collect();
                    list.retain(|r| !r.once);
                    cbs
                }
            }
        };

        for cb in snapshot {
            if std::panic::catch_unwind(AssertUnwindSafe(|| cb(event))).is_err() {
                tracing::warn!("Event handler for {:?} panicked", event.kind());
            }
        }
    }

    /// Clear non-permanent callbacks for one kind, or for all kinds when
    /// `kind` is `None`. Permanent callbacks survive.
    pub fn remove_all_listeners(&self, kind: Option<E::Kind>) {
        let mut registry = self.registry.lock().unwrap();
        match kind {
            Some(kind) => {
                if let Some(list) = registry.handlers.get_mut(&kind) {
                    list.retain(|r| r.permanent);
                }
            }
            None => {
                for list in registry.handlers.values_mut() {
                    list.retain(|r| r.permanent);
                }
            }
        }
    }
}
