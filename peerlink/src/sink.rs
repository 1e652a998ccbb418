//! Error escalation channel with a fatal fallback.
//!
//! Components that cannot handle a failure themselves report it to an
//! [`ErrorSink`]. With at least one live subscriber the error is delivered
//! to every subscriber. With none, [`ErrorSink::report`] hands the error
//! back so the caller can treat it as fatal.

use std::cell::RefCell;

use tokio::sync::mpsc;

/// Fan-out channel for errors.
pub struct ErrorSink<E> {
    subscribers: RefCell<Vec<mpsc::UnboundedSender<E>>>,
}

impl<E> Default for ErrorSink<E> {
    fn default() -> Self {
        Self {
            subscribers: RefCell::new(Vec::new()),
        }
    }
}

impl<E: Clone> ErrorSink<E> {
    /// Create a sink with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.borrow_mut().push(tx);
        rx
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.borrow_mut();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    /// Deliver `error` to every live subscriber.
    ///
    /// # Errors
    ///
    /// Returns the error unchanged when nobody is subscribed.
    pub fn report(&self, error: E) -> Result<(), E> {
        let mut subscribers = self.subscribers.borrow_mut();
        subscribers.retain(|tx| !tx.is_closed());
        if subscribers.is_empty() {
            return Err(error);
        }
        for tx in subscribers.iter() {
            let _ = tx.send(error.clone());
        }
        Ok(())
    }
}
