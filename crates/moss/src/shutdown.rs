use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::config_lock::ConfigLock;
use crate::mcp::McpManager;

/// Orderly teardown shared by the normal exit path and the signal and panic paths.
///
/// Whoever calls [`Shutdown::run`] first performs the teardown; everyone else
/// waits for it to finish.
pub struct Shutdown {
    started: AtomicBool,
    done: OnceCell<()>,
    manager: Mutex<Option<McpManager>>,
    lock: Mutex<Option<ConfigLock>>,
    close_timeout: Duration,
}

impl Shutdown {
    pub fn new(close_timeout: Duration) -> Self {
        Self {
            started: AtomicBool::new(false),
            done: OnceCell::new(),
            manager: Mutex::new(None),
            lock: Mutex::new(None),
            close_timeout,
        }
    }

    pub async fn set_manager(&self, manager: McpManager) {
        *self.manager.lock().await = Some(manager);
    }

    pub async fn set_lock(&self, lock: ConfigLock) {
        *self.lock.lock().await = Some(lock);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Close the MCP manager, then release the config lock.
    ///
    /// Returns true for the caller that actually performed the teardown.
    pub async fn run(&self) -> bool {
        let first = !self.started.swap(true, Ordering::SeqCst);
        if !first {
            debug!("Shutdown already in progress");
        }
        self.done.get_or_init(|| self.teardown()).await;
        first
    }

    async fn teardown(&self) {
        info!("Shutting down");
        if let Some(mut manager) = self.manager.lock().await.take() {
            if let Err(e) = manager.close(self.close_timeout).await {
                warn!(error = %e, "Failed to close MCP servers cleanly");
            }
        }
        // Release even when the manager failed to close
        if let Some(mut lock) = self.lock.lock().await.take() {
            lock.release().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_lock::LOCK_FILE_NAME;
    use crate::tools::ToolRegistry;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_run_releases_lock_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = ConfigLock::new(dir.path());
        lock.acquire(Duration::from_secs(1)).await.unwrap();
        assert!(dir.path().join(LOCK_FILE_NAME).exists());

        let shutdown = Arc::new(Shutdown::new(Duration::from_secs(1)));
        shutdown.set_lock(lock).await;
        shutdown
            .set_manager(McpManager::new(Arc::new(ToolRegistry::new())))
            .await;

        let (a, b) = tokio::join!(shutdown.run(), shutdown.run());
        assert!(a ^ b, "exactly one caller performs the teardown");
        assert!(shutdown.is_started());
        assert!(!dir.path().join(LOCK_FILE_NAME).exists());

        assert!(!shutdown.run().await);
    }

    #[tokio::test]
    async fn test_run_without_resources() {
        let shutdown = Shutdown::new(Duration::from_millis(10));
        assert!(!shutdown.is_started());
        assert!(shutdown.run().await);
    }
}
