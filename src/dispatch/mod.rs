//! Single-shot outcome dispatch.
//!
//! A subscriber gets a [`SubscriptionToken`] and a [`PendingOutcome`] for one
//! run. The outcome is delivered at most once, and only if the token is still
//! live. Unsubscribing (or cancelling) drops the sender, so a later delivery for
//! the same run is reported as [`Delivery::Stale`] and never reaches anyone.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::engine::RunId;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Proof of a live subscription. Consumed by [`EventDispatcher::unsubscribe`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    id: u64,
    run: RunId,
}

impl SubscriptionToken {
    pub fn run(&self) -> RunId {
        self.run
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("already subscribed to {0}")]
    AlreadySubscribed(RunId),
}

/// The subscription was torn down before an outcome arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("outcome cancelled before delivery")]
pub struct OutcomeCancelled;

/// What happened to a delivered outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the live subscriber
    Delivered,
    /// No live subscription for that run; dropped
    Stale,
    /// Subscription was live but its receiver had been dropped
    ReceiverDropped,
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered)
    }
}

/// Receiving side of one subscription
#[derive(Debug)]
pub struct PendingOutcome<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> PendingOutcome<T> {
    /// Take the outcome if it has already been delivered.
    ///
    /// `Ok(None)` means still pending.
    pub fn try_take(&mut self) -> Result<Option<T>, OutcomeCancelled> {
        match self.rx.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(oneshot::error::TryRecvError::Empty) => Ok(None),
            Err(oneshot::error::TryRecvError::Closed) => Err(OutcomeCancelled),
        }
    }
}

impl<T> Future for PendingOutcome<T> {
    type Output = Result<T, OutcomeCancelled>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| OutcomeCancelled))
    }
}

struct Slot<T> {
    token_id: u64,
    run: RunId,
    tx: oneshot::Sender<T>,
}

/// Holds at most one live subscription for outcomes of type `T`
pub struct EventDispatcher<T> {
    name: &'static str,
    slot: Option<Slot<T>>,
}

impl<T> EventDispatcher<T> {
    pub fn new(name: &'static str) -> Self {
        Self { name, slot: None }
    }

    /// Register for the outcome of `run`
    pub fn subscribe(
        &mut self,
        run: RunId,
    ) -> Result<(SubscriptionToken, PendingOutcome<T>), DispatchError> {
        if let Some(slot) = &self.slot {
            return Err(DispatchError::AlreadySubscribed(slot.run));
        }

        let id = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.slot = Some(Slot {
            token_id: id,
            run,
            tx,
        });
        tracing::debug!(dispatcher = self.name, run = %run, "Subscribed");
        Ok((SubscriptionToken { id, run }, PendingOutcome { rx }))
    }

    /// Deliver the outcome for `run`, consuming the subscription
    pub fn deliver(&mut self, run: RunId, outcome: T) -> Delivery {
        match self.slot.take() {
            Some(slot) if slot.run == run => {
                if slot.tx.send(outcome).is_err() {
                    tracing::debug!(
                        dispatcher = self.name,
                        run = %run,
                        "Dropping outcome; receiver already closed"
                    );
                    Delivery::ReceiverDropped
                } else {
                    tracing::debug!(dispatcher = self.name, run = %run, "Delivered outcome");
                    Delivery::Delivered
                }
            }
            other => {
                self.slot = other;
                tracing::warn!(dispatcher = self.name, run = %run, "Dropping stale outcome");
                Delivery::Stale
            }
        }
    }

    /// Remove the subscription behind `token`. A token whose subscription is
    /// already gone is a no-op.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) {
        if self
            .slot
            .as_ref()
            .is_some_and(|slot| slot.token_id == token.id)
        {
            self.slot = None;
            tracing::debug!(dispatcher = self.name, run = %token.run, "Unsubscribed");
        }
    }

    /// Drop whatever subscription is live, if any
    pub fn cancel(&mut self) {
        if let Some(slot) = self.slot.take() {
            tracing::debug!(dispatcher = self.name, run = %slot.run, "Cancelled subscription");
        }
    }

    pub fn is_active(&self) -> bool {
        self.slot.is_some()
    }

    pub fn current_run(&self) -> Option<RunId> {
        self.slot.as_ref().map(|slot| slot.run)
    }

    /// Whether `run` is the live subscription
    pub fn accepts(&self, run: RunId) -> bool {
        self.current_run() == Some(run)
    }
}

impl<T> std::fmt::Debug for EventDispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("name", &self.name)
            .field("run", &self.current_run())
            .finish()
    }
}
