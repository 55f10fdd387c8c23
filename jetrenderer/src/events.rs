//! Pointer event fan-out with scoped subscriptions.

use glam::Vec2;
use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerEventKind {
    Down,
    Up,
    Move,
    Leave,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub kind: PointerEventKind,
    /// Normalized position, see [`crate::frame::normalize_pointer`].
    pub position: Vec2,
}

type Listener = Rc<dyn Fn(&PointerEvent)>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(u64, PointerEventKind, Listener)>,
}

/// Dispatcher the input layer publishes into.
#[derive(Clone, Default)]
pub struct PointerEvents {
    registry: Rc<RefCell<Registry>>,
}

impl PointerEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` until the returned handle is released or dropped.
    #[must_use = "the listener is removed as soon as the subscription is dropped"]
    pub fn subscribe(
        &self,
        kind: PointerEventKind,
        listener: impl Fn(&PointerEvent) + 'static,
    ) -> Subscription {
        let mut registry = self.registry.borrow_mut();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.push((id, kind, Rc::new(listener)));

        Subscription {
            id,
            registry: Rc::downgrade(&self.registry),
        }
    }

    pub fn dispatch(&self, event: PointerEvent) {
        // Snapshot first: listeners may subscribe or unsubscribe while running.
        let listeners: Vec<Listener> = self
            .registry
            .borrow()
            .listeners
            .iter()
            .filter(|(_, kind, _)| *kind == event.kind)
            .map(|(_, _, listener)| listener.clone())
            .collect();

        for listener in listeners {
            listener(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry.borrow().listeners.len()
    }
}

/// Live registration in a [`PointerEvents`] dispatcher.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<RefCell<Registry>>,
}

impl Subscription {
    /// Removes the listener now. Dropping the handle does the same.
    pub fn release(self) {}

    fn remove(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .borrow_mut()
                .listeners
                .retain(|(id, _, _)| *id != self.id);
        }
        self.registry = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn down() -> PointerEvent {
        PointerEvent {
            kind: PointerEventKind::Down,
            position: Vec2::ZERO,
        }
    }

    #[test]
    fn dispatch_reaches_matching_listeners_only() {
        let events = PointerEvents::new();
        let downs = Rc::new(Cell::new(0));
        let moves = Rc::new(Cell::new(0));

        let _a = events.subscribe(PointerEventKind::Down, {
            let downs = downs.clone();
            move |_| downs.update(|n| n + 1)
        });
        let _b = events.subscribe(PointerEventKind::Move, {
            let moves = moves.clone();
            move |_| moves.update(|n| n + 1)
        });

        events.dispatch(down());
        events.dispatch(down());

        assert_eq!(downs.get(), 2);
        assert_eq!(moves.get(), 0);
    }

    #[test]
    fn dropping_subscription_removes_listener() {
        let events = PointerEvents::new();
        let hits = Rc::new(Cell::new(0));

        let subscription = events.subscribe(PointerEventKind::Down, {
            let hits = hits.clone();
            move |_| hits.update(|n| n + 1)
        });
        assert_eq!(events.listener_count(), 1);

        subscription.release();
        events.dispatch(down());

        assert_eq!(hits.get(), 0);
        assert_eq!(events.listener_count(), 0);
    }

    #[test]
    fn subscription_outliving_dispatcher_is_harmless() {
        let events = PointerEvents::new();
        let subscription = events.subscribe(PointerEventKind::Up, |_| {});
        drop(events);
        drop(subscription);
    }

    #[test]
    fn listener_may_unsubscribe_during_dispatch() {
        let events = PointerEvents::new();
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::default();
        let hits = Rc::new(Cell::new(0));

        let subscription = events.subscribe(PointerEventKind::Down, {
            let slot = slot.clone();
            let hits = hits.clone();
            move |_| {
                hits.update(|n| n + 1);
                slot.borrow_mut().take();
            }
        });
        *slot.borrow_mut() = Some(subscription);

        events.dispatch(down());
        events.dispatch(down());
        assert_eq!(hits.get(), 1);
    }
}
