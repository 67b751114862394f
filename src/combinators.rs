//! Future combinators for batched cache work
//!
//! Thin wrappers with the settlement semantics the facade relies on:
//! `all` is fail-fast and order-preserving, `race` settles with whichever
//! input settles first, and `all_settled` never short-circuits.

use std::future::Future;

use futures::future::{join_all, select_all, try_join_all};

/// Outcome of one input to [`all_settled`]
#[derive(Debug)]
pub enum Settled<T, E> {
    /// The future completed with a value
    Fulfilled(T),
    /// The future completed with an error
    Rejected(E),
}

impl<T, E> Settled<T, E> {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Settled::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Settled::Rejected(_))
    }

    /// The value, when fulfilled
    pub fn fulfilled(self) -> Option<T> {
        match self {
            Settled::Fulfilled(value) => Some(value),
            Settled::Rejected(_) => None,
        }
    }

    /// The error, when rejected
    pub fn rejected(self) -> Option<E> {
        match self {
            Settled::Fulfilled(_) => None,
            Settled::Rejected(err) => Some(err),
        }
    }
}

/// Run every future, failing fast on the first error
///
/// Results come back in input order regardless of completion order. An
/// empty input fulfills with an empty vector.
pub async fn all<I, F, T, E>(futures: I) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    try_join_all(futures).await
}

/// Settle with the first future to complete, dropping the rest
///
/// Returns `None` for an empty input, which would otherwise never settle.
pub async fn race<I, F, T>(futures: I) -> Option<T>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = T>,
{
    let futures: Vec<_> = futures.into_iter().map(Box::pin).collect();
    if futures.is_empty() {
        return None;
    }
    let (value, _index, _rest) = select_all(futures).await;
    Some(value)
}

/// Run every future to completion, collecting each outcome
///
/// Never short-circuits; a rejection is recorded in place and the remaining
/// futures still run. Outcomes come back in input order.
pub async fn all_settled<I, F, T, E>(futures: I) -> Vec<Settled<T, E>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    join_all(futures)
        .await
        .into_iter()
        .map(|result| match result {
            Ok(value) => Settled::Fulfilled(value),
            Err(err) => Settled::Rejected(err),
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
