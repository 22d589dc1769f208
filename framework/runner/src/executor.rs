use std::future::Future;

#[derive(Debug)]
pub struct Executor {
    runtime: tokio::runtime::Runtime,
}

impl Executor {
    pub(crate) fn new(runtime: tokio::runtime::Runtime) -> Self {
        Self { runtime }
    }

    /// Run async code in place, blocking the calling virtual user until it completes.
    ///
    /// The future is never cancelled when the run is stopped, because iterations always run to
    /// completion. Long waits should watch [crate::prelude::VuContext::shutdown_listener] if they
    /// need to end early.
    pub fn execute_in_place<T>(
        &self,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        self.runtime.block_on(fut)
    }

    /// Submit async code to be run in the background.
    ///
    /// It is not guaranteed that the runner will wait for the future to complete before shutting
    /// down. In behaviour hooks, use [Executor::execute_in_place] so that the work is part of
    /// the iteration.
    pub fn spawn(&self, fut: impl Future<Output = ()> + Send + 'static) {
        self.runtime.spawn(fut);
    }
}
