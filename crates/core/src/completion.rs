//! Action completion coordinator.
//!
//! Correlates an asynchronously launched action (a build, a flash, ...) with
//! the external event that reports its completion, and races that event
//! against a deadline and the caller's cancellation signal.
//!
//! The subscription is taken *before* the action is triggered, so a fast
//! completion can never be missed. Every wait owns its own feed receiver and
//! timer; both are dropped the moment the wait returns, whichever source won.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::event::EventFeed;

/// Default time an action may take before the wait gives up.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// An external event that can be matched to the action that caused it.
pub trait Correlated {
    type Key: PartialEq + Debug + Clone + Send + Sync + 'static;

    fn correlation_key(&self) -> &Self::Key;
}

/// The single terminal result of a pending action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome<T> {
    /// A matching completion event arrived first.
    Resolved(T),
    /// The deadline elapsed first.
    TimedOut,
    /// The caller's cancellation signal fired first.
    Cancelled,
}

impl<T> ActionOutcome<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    pub fn resolved(self) -> Option<T> {
        match self {
            Self::Resolved(v) => Some(v),
            _ => None,
        }
    }
}

type Matcher<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;

/// A subscription waiting for one correlated completion event.
///
/// Consumed by [`PendingAction::wait`], so only one terminal transition is
/// possible. Dropping it without waiting releases the subscription.
pub struct PendingAction<E> {
    label: String,
    matcher: Matcher<E>,
    deadline: Instant,
    timeout: Duration,
    events: broadcast::Receiver<Arc<E>>,
}

impl<E: Send + Sync + 'static> PendingAction<E> {
    /// Override the deadline, measured from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.deadline = Instant::now() + timeout;
        self
    }

    /// Human-readable description of what is being waited for.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for the first of: matching event, deadline, cancellation.
    pub async fn wait(mut self, cancel: &CancellationToken) -> ActionOutcome<Arc<E>> {
        let sleep = tokio::time::sleep_until(self.deadline);
        tokio::pin!(sleep);
        let mut feed_open = true;

        let outcome = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break ActionOutcome::Cancelled,

                received = self.events.recv(), if feed_open => match received {
                    Ok(event) if (self.matcher)(event.as_ref()) => break ActionOutcome::Resolved(event),
                    Ok(_) => trace!(correlation_key = %self.label, "Ignoring unrelated completion event"),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(correlation_key = %self.label, skipped, "Completion feed lagged");
                    }
                    Err(RecvError::Closed) => {
                        debug!(correlation_key = %self.label, "Completion feed closed");
                        feed_open = false;
                    }
                },

                _ = &mut sleep => break ActionOutcome::TimedOut,
            }
        };

        debug!(
            correlation_key = %self.label,
            outcome = outcome_name(&outcome),
            "Pending action settled"
        );
        outcome
    }
}

fn outcome_name<T>(outcome: &ActionOutcome<T>) -> &'static str {
    match outcome {
        ActionOutcome::Resolved(_) => "resolved",
        ActionOutcome::TimedOut => "timed_out",
        ActionOutcome::Cancelled => "cancelled",
    }
}

/// Generic "fire an action, await its correlated completion" primitive.
///
/// Holds only the shared feed; every call gets its own subscription, so
/// concurrent waits for unrelated keys never share mutable state.
pub struct ActionCoordinator<E> {
    feed: EventFeed<E>,
    default_timeout: Duration,
}

impl<E: Send + Sync + 'static> ActionCoordinator<E> {
    pub fn new(feed: EventFeed<E>) -> Self {
        Self {
            feed,
            default_timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn feed(&self) -> &EventFeed<E> {
        &self.feed
    }

    /// Subscribe for the first event accepted by `predicate`.
    pub fn begin_matching<F>(&self, label: impl Into<String>, predicate: F) -> PendingAction<E>
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        PendingAction {
            label: label.into(),
            matcher: Box::new(predicate),
            deadline: Instant::now() + self.default_timeout,
            timeout: self.default_timeout,
            events: self.feed.subscribe(),
        }
    }

    /// Subscribe, run `trigger`, then wait for the outcome.
    ///
    /// If the trigger fails the subscription is released and the error is
    /// returned without waiting.
    pub async fn run<X, F>(
        &self,
        pending: PendingAction<E>,
        trigger: F,
        cancel: &CancellationToken,
    ) -> Result<ActionOutcome<Arc<E>>, X>
    where
        F: FnOnce() -> Result<(), X>,
    {
        trigger()?;
        debug!(correlation_key = %pending.label(), timeout = ?pending.timeout(), "Action triggered, awaiting completion");
        Ok(pending.wait(cancel).await)
    }
}

impl<E: Correlated + Send + Sync + 'static> ActionCoordinator<E> {
    /// Subscribe for the first event whose correlation key equals `key`.
    pub fn begin(&self, key: E::Key) -> PendingAction<E> {
        let label = format!("{key:?}");
        self.begin_matching(label, move |event: &E| event.correlation_key() == &key)
    }
}

impl<E> Clone for ActionCoordinator<E> {
    fn clone(&self) -> Self {
        Self {
            feed: self.feed.clone(),
            default_timeout: self.default_timeout,
        }
    }
}
