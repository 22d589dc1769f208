use std::sync::Arc;

use tokio::sync::watch::{Receiver, Sender};

/// A stop signal that can be shared between the driver, virtual users and background tasks.
///
/// Once [ShutdownHandle::shutdown] has been called the signal stays raised, so listeners that
/// check late, or that are created after the fact, still observe it.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<Sender<bool>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            sender: Arc::new(tokio::sync::watch::channel(false).0),
        }
    }

    pub fn shutdown(&self) {
        let already_shutdown = self.sender.send_replace(true);
        if !already_shutdown {
            log::trace!("Shutdown signal raised");
        }
    }

    /// Point in time check of the signal, without needing a listener.
    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn new_listener(&self) -> DelegatedShutdownListener {
        DelegatedShutdownListener::new(self.sender.subscribe())
    }
}

#[derive(Clone, Debug)]
pub struct DelegatedShutdownListener {
    receiver: Receiver<bool>,
}

impl DelegatedShutdownListener {
    pub(crate) fn new(receiver: Receiver<bool>) -> Self {
        Self { receiver }
    }

    /// Point in time check if the shutdown signal has been raised. If this returns true then work
    /// should be wrapped up at the next convenient point so that the run can finish.
    pub fn should_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait for the shutdown signal to be raised. Returns immediately if it already has been. It
    /// is safe to race this with another future.
    pub async fn wait_for_shutdown(&mut self) {
        let raised = self.receiver.wait_for(|raised| *raised).await.is_ok();
        if !raised {
            // The handle was dropped without raising the signal, nothing can stop us now so
            // park forever rather than report a shutdown that never happened.
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_is_sticky() {
        let handle = ShutdownHandle::new();
        let listener = handle.new_listener();
        assert!(!listener.should_shutdown());

        handle.shutdown();
        assert!(listener.should_shutdown());
        // Checking again must not consume the signal.
        assert!(listener.should_shutdown());
        assert!(handle.is_shutdown());
    }

    #[test]
    fn late_listener_sees_signal() {
        let handle = ShutdownHandle::new();
        handle.shutdown();

        assert!(handle.new_listener().should_shutdown());
    }

    #[test]
    fn repeated_shutdown_is_harmless() {
        let handle = ShutdownHandle::default();
        handle.shutdown();
        handle.shutdown();

        assert!(handle.clone().is_shutdown());
    }

    #[tokio::test]
    async fn wait_returns_once_raised() {
        let handle = ShutdownHandle::new();
        let mut listener = handle.new_listener();

        let waiter = tokio::spawn(async move { listener.wait_for_shutdown().await });
        handle.shutdown();

        tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .expect("Listener did not observe shutdown")
            .unwrap();
    }
}
