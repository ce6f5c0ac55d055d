//! Producer-side business transactions.
//!
//! A business transaction groups causally related events, possibly spanning
//! several aggregates, so that consumers apply them together or not at all.
//!
//! [`BusinessTransactionScope`] tracks the nesting of transaction scopes along
//! one logical call chain. It is an explicit value handed down the call chain;
//! nothing is stored in thread-locals or task-locals.
//!
//! [`ProducerBusinessTransaction`] wraps a scope with the marker records that
//! delimit the transaction on the log: a `TransactionStarted` record when the
//! outermost scope opens, a `TransactionFinished` record right before it
//! closes.
//!
//! # Example
//!
//! ```
//! use eventloom_core::business_transaction::{BusinessTransactionScope, Propagation};
//!
//! let scope = BusinessTransactionScope::new();
//! let tx = scope.open(Propagation::Required).unwrap();
//! assert_eq!(scope.open(Propagation::Required).unwrap(), tx); // joins
//! assert_eq!(scope.open_depth(), 2);
//!
//! scope.close().unwrap();
//! scope.close().unwrap();
//! assert!(scope.current_transaction_id().is_none());
//! ```

use crate::error::{ConsistencyError, Result};
use crate::event::SerializedEvent;
use crate::publisher::EventPublisher;
use crate::record::MessageKey;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// How `open` behaves when a transaction is already active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Propagation {
    /// Join the active transaction, or start one if none is active.
    Required,
    /// Start a new transaction; fails if one is already active.
    RequiresNew,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct TransactionContext {
    transaction_id: Uuid,
    open_count: u32,
}

/// Nesting state of business transactions for one call chain.
///
/// Request-scoped, never persisted. The context exists while at least one
/// scope is open and is discarded when the last one closes.
#[derive(Debug, Default)]
pub struct BusinessTransactionScope {
    context: Mutex<Option<TransactionContext>>,
}

impl BusinessTransactionScope {
    /// A scope with no active transaction.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            context: Mutex::new(None),
        }
    }

    fn context(&self) -> MutexGuard<'_, Option<TransactionContext>> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a (possibly nested) transaction scope and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::TransactionScope`] for
    /// [`Propagation::RequiresNew`] while a transaction is active.
    pub fn open(&self, propagation: Propagation) -> Result<Uuid> {
        let mut context = self.context();
        match (context.as_mut(), propagation) {
            (None, _) => {
                let transaction_id = Uuid::new_v4();
                *context = Some(TransactionContext {
                    transaction_id,
                    open_count: 1,
                });
                tracing::debug!(%transaction_id, "Business transaction started");
                Ok(transaction_id)
            }
            (Some(active), Propagation::Required) => {
                active.open_count = active.open_count.saturating_add(1);
                Ok(active.transaction_id)
            }
            (Some(active), Propagation::RequiresNew) => Err(ConsistencyError::TransactionScope(
                format!(
                    "Already inside business transaction {}; use Required to join it",
                    active.transaction_id
                ),
            )),
        }
    }

    /// Close the innermost open scope. The context is discarded when the
    /// outermost scope closes.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::TransactionScope`] if no scope is open.
    pub fn close(&self) -> Result<()> {
        let mut context = self.context();
        let Some(active) = context.as_mut() else {
            return Err(ConsistencyError::TransactionScope(
                "Cannot close business transaction: none is open".to_string(),
            ));
        };

        active.open_count -= 1;
        if active.open_count == 0 {
            tracing::debug!(transaction_id = %active.transaction_id, "Business transaction closed");
            *context = None;
        }
        Ok(())
    }

    /// Id of the active transaction, if any.
    #[must_use]
    pub fn current_transaction_id(&self) -> Option<Uuid> {
        self.context().map(|c| c.transaction_id)
    }

    /// Nesting depth; `0` when no transaction is active.
    #[must_use]
    pub fn open_depth(&self) -> u32 {
        self.context().map_or(0, |c| c.open_count)
    }

    /// Whether a transaction is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.context().is_some()
    }
}

/// Emits the marker records around a [`BusinessTransactionScope`].
///
/// Markers are keyed by the root context identifier so they land in the same
/// partition as the events of the transaction.
#[derive(Clone)]
pub struct ProducerBusinessTransaction {
    publisher: Arc<dyn EventPublisher>,
    topic: String,
}

impl ProducerBusinessTransaction {
    /// Publish markers to `topic` through `publisher`.
    #[must_use]
    pub fn new(publisher: Arc<dyn EventPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    /// Open a scope; publish `started` when this is the outermost open.
    ///
    /// # Errors
    ///
    /// Scope misuse, or a failed publish (the scope is closed again in that case).
    pub async fn start(
        &self,
        scope: &BusinessTransactionScope,
        root_context_identifier: Uuid,
        started: &SerializedEvent,
        propagation: Propagation,
    ) -> Result<Uuid> {
        let transaction_id = scope.open(propagation)?;
        if scope.open_depth() == 1 {
            let key = MessageKey::transaction_started(root_context_identifier, transaction_id);
            if let Err(e) = self.publisher.publish(&self.topic, &key, Some(started)).await {
                scope.close()?;
                return Err(e);
            }
            tracing::info!(
                %transaction_id,
                root = %root_context_identifier,
                marker = %started.event_type,
                "Published business transaction started marker"
            );
        }
        Ok(transaction_id)
    }

    /// Close a scope; when it is the outermost one, publish `finished`
    /// before the context is discarded.
    ///
    /// # Errors
    ///
    /// Close without open, or a failed publish. The scope is closed in both
    /// publish outcomes.
    pub async fn finish(
        &self,
        scope: &BusinessTransactionScope,
        root_context_identifier: Uuid,
        finished: &SerializedEvent,
    ) -> Result<()> {
        let Some(transaction_id) = scope.current_transaction_id() else {
            return scope.close();
        };

        let published = if scope.open_depth() == 1 {
            let key = MessageKey::transaction_finished(root_context_identifier, transaction_id);
            let result = self.publisher.publish(&self.topic, &key, Some(finished)).await;
            if result.is_ok() {
                tracing::info!(
                    %transaction_id,
                    root = %root_context_identifier,
                    marker = %finished.event_type,
                    "Published business transaction finished marker"
                );
            }
            result
        } else {
            Ok(())
        };

        scope.close()?;
        published
    }

    /// Run `body` inside a business transaction joined with
    /// [`Propagation::Required`].
    ///
    /// If `body` fails, the scope is closed without a finished marker and
    /// the error is returned.
    ///
    /// # Errors
    ///
    /// Errors of `start`, `body` or `finish`.
    pub async fn run<T, F, Fut>(
        &self,
        scope: &BusinessTransactionScope,
        root_context_identifier: Uuid,
        started: &SerializedEvent,
        finished: &SerializedEvent,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let transaction_id = self
            .start(scope, root_context_identifier, started, Propagation::Required)
            .await?;

        match body().await {
            Ok(value) => {
                self.finish(scope, root_context_identifier, finished).await?;
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(%transaction_id, error = %e, "Business transaction body failed");
                scope.close()?;
                Err(e)
            }
        }
    }
}
