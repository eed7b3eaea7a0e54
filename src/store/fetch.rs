use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;

use crate::error::{cancelled, LiveResult};
use crate::model::Model;

pub(crate) type FetchSender = oneshot::Sender<LiveResult<Vec<Model>>>;

/// Resolves with a snapshot of the collection once it is loaded, or with
/// the subscription error.
#[must_use = "a fetch does nothing unless awaited or polled"]
pub struct FetchPromise {
    receiver: oneshot::Receiver<LiveResult<Vec<Model>>>,
}

impl FetchPromise {
    pub(crate) fn channel() -> (FetchSender, Self) {
        let (sender, receiver) = oneshot::channel();
        (sender, Self { receiver })
    }

    /// Non-blocking check; `None` while the collection is still loading.
    pub fn try_take(&mut self) -> Option<LiveResult<Vec<Model>>> {
        match self.receiver.try_recv() {
            Ok(Some(result)) => Some(result),
            Ok(None) => None,
            Err(oneshot::Canceled) => Some(Err(dropped())),
        }
    }
}

impl Future for FetchPromise {
    type Output = LiveResult<Vec<Model>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(dropped())),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn dropped() -> crate::error::LiveError {
    cancelled("collection was dropped before it finished loading")
}
