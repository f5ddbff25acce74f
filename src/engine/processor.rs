//! Pluggable processing function and dead-letter sink.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::item::WorkItem;

/// Executes one work item.
///
/// Called concurrently for different items, never concurrently for the same
/// item. Cancellation is cooperative: the engine cancels `cancel` only after
/// draining on shutdown and never interrupts a running call, so long-running
/// implementations should watch the token themselves. A panic counts as a
/// failed attempt.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    async fn process(&self, cancel: &CancellationToken, item: &mut WorkItem)
    -> anyhow::Result<()>;
}

/// Adapter that lets a closure act as a [`Processor`].
///
/// The closure borrows the item for the duration of the returned future,
/// so changes to `result` carry over to the next attempt:
///
/// ```ignore
/// from_fn(|_cancel, item| Box::pin(async move {
///     item.result.insert("done".into(), true.into());
///     Ok(())
/// }))
/// ```
pub struct FnProcessor<F>(F);

/// Wrap a closure returning a boxed future as a processor.
pub fn from_fn<F>(f: F) -> FnProcessor<F>
where
    F: for<'a> Fn(CancellationToken, &'a mut WorkItem) -> BoxFuture<'a, anyhow::Result<()>>
        + Send
        + Sync
        + 'static,
{
    FnProcessor(f)
}

#[async_trait]
impl<F> Processor for FnProcessor<F>
where
    F: for<'a> Fn(CancellationToken, &'a mut WorkItem) -> BoxFuture<'a, anyhow::Result<()>>
        + Send
        + Sync
        + 'static,
{
    async fn process(
        &self,
        cancel: &CancellationToken,
        item: &mut WorkItem,
    ) -> anyhow::Result<()> {
        (self.0)(cancel.clone(), item).await
    }
}

/// Terminal callback for items that exhausted their retry budget.
///
/// Invoked once per such item, synchronously on the failure path.
pub type DeadLetterSink = Arc<dyn Fn(&str) + Send + Sync>;
