//! Asset-scoped exclusion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per asset id, created on first use.
///
/// Holding the guard for asset A never blocks work on asset B. The guard is
/// owned so it can live inside spawned tasks.
#[derive(Debug, Default)]
pub struct AssetLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl AssetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `asset_id`.
    pub async fn lock(&self, asset_id: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(slots.entry(asset_id.to_string()).or_default())
        };
        slot.lock_owned().await
    }

    /// Number of assets that have ever been locked.
    pub fn tracked(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_asset_is_exclusive() {
        let locks = Arc::new(AssetLocks::new());
        let guard = locks.lock("E1").await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.lock("E1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_assets_do_not_block() {
        let locks = AssetLocks::new();
        let _a = locks.lock("E1").await;

        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("E2")).await;
        assert!(b.is_ok());
        assert_eq!(locks.tracked(), 2);
    }
}
