use futures::future::BoxFuture;

/// Runs a unit of work in the background, detached from the caller.
/// The processor dispatches every dequeued task through this so a slow
/// handler never blocks the dequeue loop.
pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, future: BoxFuture<'static, ()>);
}
