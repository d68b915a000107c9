//! The batch handler seam.

use std::future::Future;

use async_trait::async_trait;

/// Performs the batched computation behind a [`super::BatchQueue`]
///
/// The handler receives payloads in submission order and must return exactly
/// one output per payload, position-matched, or a single error for the whole
/// batch. Per-item failures belong in `Out`.
#[async_trait]
pub trait BatchHandler<In, Out>: Send + Sync + 'static {
    async fn handle(&self, batch: Vec<In>) -> anyhow::Result<Vec<Out>>;
}

/// Adapter turning an async closure into a [`BatchHandler`]
#[derive(Debug, Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap an async closure as a batch handler
///
/// ```rust
/// use mlserve_core::batcher::handler_fn;
///
/// let upper = handler_fn(|batch: Vec<String>| async move {
///     Ok(batch.into_iter().map(|s| s.to_uppercase()).collect::<Vec<String>>())
/// });
/// # let _ = upper;
/// ```
pub fn handler_fn<In, Out, F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Vec<In>) -> Fut,
    Fut: Future<Output = anyhow::Result<Vec<Out>>>,
{
    HandlerFn { f }
}

#[async_trait]
impl<In, Out, F, Fut> BatchHandler<In, Out> for HandlerFn<F>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(Vec<In>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<Out>>> + Send + 'static,
{
    async fn handle(&self, batch: Vec<In>) -> anyhow::Result<Vec<Out>> {
        (self.f)(batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Doubler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BatchHandler<u32, u32> for Doubler {
        async fn handle(&self, batch: Vec<u32>) -> anyhow::Result<Vec<u32>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(batch.into_iter().map(|n| n * 2).collect())
        }
    }

    #[tokio::test]
    async fn test_trait_handler() {
        let handler = Doubler { calls: AtomicUsize::new(0) };

        assert_eq!(handler.handle(vec![1, 2, 3]).await.unwrap(), vec![2, 4, 6]);
        assert_eq!(handler.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_closure_handler() {
        let handler = handler_fn(|batch: Vec<String>| async move {
            Ok(batch.into_iter().map(|s| s.to_uppercase()).collect())
        });

        let out: Vec<String> = handler.handle(vec!["a".into(), "b".into()]).await.unwrap();
        assert_eq!(out, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_closure_handler_error() {
        let handler = handler_fn(|_batch: Vec<u8>| async move {
            Err::<Vec<u8>, _>(anyhow::anyhow!("model not loaded"))
        });

        let err = handler.handle(vec![1]).await.unwrap_err();
        assert_eq!(err.to_string(), "model not loaded");
    }
}
