use surge_core::prelude::ShutdownHandle;
use tokio::signal;

/// Raise the shutdown signal when the process receives Ctrl-C.
pub(crate) fn start_shutdown_listener(runtime: &tokio::runtime::Runtime) -> ShutdownHandle {
    let handle = ShutdownHandle::default();

    let listener_handle = handle.clone();
    runtime.spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C, the run can only end on its own: {e:?}");
            return;
        }
        listener_handle.shutdown();
        println!("Received shutdown signal, waiting for virtual users to finish their iterations...");
    });

    handle
}
