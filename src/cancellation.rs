use futures::future::{FutureExt, Shared};
use futures_channel::oneshot;

/// A cloneable cancellation signal handed to the query function.
///
/// The signal fires at most once. The query engine races every attempt
/// against its signal, so a query function that ignores the signal is still
/// abandoned promptly; honoring it simply lets the function stop its own
/// I/O early.
#[derive(Clone)]
pub struct CancelSignal {
    inner: Option<Shared<oneshot::Receiver<()>>>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { inner: None }
    }

    pub(crate) fn armed(receiver: oneshot::Receiver<()>) -> Self {
        Self {
            inner: Some(receiver.shared()),
        }
    }

    /// Resolves once cancellation is requested. Pending forever for
    /// [`CancelSignal::never`].
    pub async fn cancelled(&self) {
        match &self.inner {
            None => std::future::pending().await,
            // A dropped source counts as cancellation.
            Some(shared) => {
                let _ = shared.clone().await;
            }
        }
    }

    /// Whether cancellation has already been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner
            .as_ref()
            .map(|shared| shared.clone().now_or_never().is_some())
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSignal")
            .field("armed", &self.inner.is_some())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// The sending half of a cancellation pair, for use with
/// [`Endpoint::invoke`](crate::Endpoint::invoke).
///
/// Dropping the source cancels the signal.
#[derive(Debug)]
pub struct CancelSource {
    sender: Option<oneshot::Sender<()>>,
}

impl CancelSource {
    /// Creates a connected source/signal pair.
    pub fn new() -> (CancelSource, CancelSignal) {
        let (sender, receiver) = oneshot::channel();
        (
            CancelSource {
                sender: Some(sender),
            },
            CancelSignal::armed(receiver),
        )
    }

    /// Fire the cancellation signal.
    pub fn cancel(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(());
        }
    }
}

impl Drop for CancelSource {
    fn drop(&mut self) {
        self.fire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_is_never_cancelled() {
        let signal = CancelSignal::never();
        assert!(!signal.is_cancelled());
    }

    #[test]
    fn cancel_fires_all_clones() {
        let (source, signal) = CancelSource::new();
        let clone = signal.clone();
        assert!(!signal.is_cancelled());

        source.cancel();

        assert!(signal.is_cancelled());
        assert!(clone.is_cancelled());
    }

    #[test]
    fn dropping_the_source_cancels() {
        let (source, signal) = CancelSource::new();
        drop(source);
        assert!(signal.is_cancelled());
    }
}
