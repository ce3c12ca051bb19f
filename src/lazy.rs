//! The lazy promise primitive behind [`crate::response_container::ResponseContainer`].
//!
//! A slot starts `Idle`. Whichever side acts first decides the transition:
//! the consumer subscribing moves it to `Promise` (awaiting a value); the
//! producer completing it moves it straight to `Done` with the value stored
//! inline, handed back synchronously the first time the consumer asks.
//! Once both sides have acted, the slot is `Done` and further completes are
//! no-ops.

use tokio::sync::oneshot;

use crate::status::Status;

enum State<T> {
    Idle,
    Value(Result<T, Status>),
    Promise(oneshot::Sender<Result<T, Status>>),
    Done,
}

/// A single-assignment slot that may be subscribed to before or after it is
/// completed, allocating a channel only when both a producer and a consumer
/// are actually in play.
pub struct LazySlot<T> {
    state: State<T>,
}

impl<T> LazySlot<T> {
    pub fn new() -> Self {
        LazySlot { state: State::Idle }
    }

    /// Called once by the consumer. Returns a future that resolves to the
    /// value once the producer (eventually) completes the slot.
    ///
    /// Must be called on the call's own driver task, like every other
    /// operation that touches this slot.
    pub fn subscribe(&mut self) -> oneshot::Receiver<Result<T, Status>>
    where
        T: Send + 'static,
    {
        match std::mem::replace(&mut self.state, State::Done) {
            State::Idle => {
                let (tx, rx) = oneshot::channel();
                self.state = State::Promise(tx);
                rx
            }
            State::Value(value) => {
                let (tx, rx) = oneshot::channel();
                // Never fails: rx hasn't been dropped, we just created it.
                let _ = tx.send(value);
                rx
            }
            // Already subscribed, or already subscribed-and-resolved: this
            // is a caller bug (each slot has exactly one logical consumer),
            // but we still must not panic. Hand back a receiver that will
            // fail because its sender is dropped.
            other @ (State::Promise(_) | State::Done) => {
                self.state = other;
                let (_tx, rx) = oneshot::channel();
                rx
            }
        }
    }

    /// Called by the producer when a value or failure becomes available.
    /// A no-op once the slot is already resolved.
    pub fn complete(&mut self, value: Result<T, Status>) {
        match std::mem::replace(&mut self.state, State::Done) {
            State::Idle => self.state = State::Value(value),
            State::Promise(tx) => {
                let _ = tx.send(value);
            }
            State::Value(existing) => self.state = State::Value(existing),
            State::Done => self.state = State::Done,
        }
    }

    /// Whether the slot has already been given a value (regardless of
    /// whether a consumer has read it yet). Used by the response container
    /// to decide whether an `End` should fail a still-pending promise.
    pub fn is_pending(&self) -> bool {
        matches!(self.state, State::Idle | State::Promise(_))
    }
}

impl<T> Default for LazySlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn producer_first_then_consumer() {
        let mut slot: LazySlot<u32> = LazySlot::new();
        slot.complete(Ok(7));
        let rx = slot.subscribe();
        assert_eq!(rx.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn consumer_first_then_producer() {
        let mut slot: LazySlot<u32> = LazySlot::new();
        let rx = slot.subscribe();
        slot.complete(Ok(9));
        assert_eq!(rx.await.unwrap().unwrap(), 9);
    }

    #[tokio::test]
    async fn second_complete_is_a_no_op() {
        let mut slot: LazySlot<u32> = LazySlot::new();
        slot.complete(Ok(1));
        slot.complete(Ok(2));
        let rx = slot.subscribe();
        assert_eq!(rx.await.unwrap().unwrap(), 1);
    }

    #[test]
    fn is_pending_tracks_resolution() {
        let mut slot: LazySlot<u32> = LazySlot::new();
        assert!(slot.is_pending());
        slot.complete(Ok(1));
        assert!(!slot.is_pending());
    }
}
