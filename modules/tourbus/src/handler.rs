//! Callback-style consumers.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::payload::SharedPayload;

/// Called by the bus with every payload of the type it was registered for.
///
/// An `Err` is logged by the dispatcher and otherwise ignored: the remaining
/// handlers and queues for the payload still run.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, payload: SharedPayload) -> Result<()>;
}

/// How handlers are stored and registered. The same `Arc` may be registered
/// more than once; it is invoked once per registration.
pub type BoxedHandler = Arc<dyn Handler>;

/// Wrap an async closure as a [`BoxedHandler`].
pub fn handler_fn<F, Fut>(f: F) -> BoxedHandler
where
    F: Fn(SharedPayload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        _phantom: PhantomData,
    })
}

struct FnHandler<F, Fut> {
    f: F,
    _phantom: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F, Fut>
where
    F: Fn(SharedPayload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, payload: SharedPayload) -> Result<()> {
        (self.f)(payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::SimplePayload;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Handler for Counting {
        async fn handle(&self, _payload: SharedPayload) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn closure_handler_sees_payload() {
        let handler = handler_fn(|p| async move {
            anyhow::ensure!(p.payload_type() == "ping", "wrong type");
            p.data().insert("handled", true);
            Ok(())
        });

        let payload = SimplePayload::new("ping").shared();
        handler.handle(payload.clone()).await.unwrap();
        assert!(payload.data().contains_key("handled"));

        let err = handler
            .handle(SimplePayload::new("pong").shared())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "wrong type");
    }

    #[tokio::test]
    async fn struct_handler_boxes_and_shares_state() {
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let boxed: BoxedHandler = inner.clone();

        boxed.handle(SimplePayload::new("x").shared()).await.unwrap();
        boxed.clone().handle(SimplePayload::new("x").shared()).await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
