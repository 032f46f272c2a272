//! In-process serialization of actions that target the same ticket channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::lock_or_recover;

#[derive(Debug, Default)]
pub(crate) struct ChannelLocks {
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl ChannelLocks {
    /// Waits until no other action holds `channel_id`.
    ///
    /// Registry entries are weak; a channel's lock is dropped once the last
    /// guard and waiter are gone.
    pub(crate) async fn acquire(&self, channel_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = lock_or_recover(&self.locks);
            locks.retain(|_, lock| lock.strong_count() > 0);
            match locks.get(channel_id).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(AsyncMutex::new(()));
                    locks.insert(channel_id.to_string(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    pub(crate) fn tracked_channels(&self) -> usize {
        lock_or_recover(&self.locks)
            .values()
            .filter(|lock| lock.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::ChannelLocks;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn same_channel_waits_for_release() {
        let locks = Arc::new(ChannelLocks::default());
        let guard = locks.acquire("chan-1").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire("chan-1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter finishes")
            .expect("join");
    }

    #[tokio::test]
    async fn different_channels_do_not_block_and_entries_expire() {
        let locks = ChannelLocks::default();
        let first = locks.acquire("chan-1").await;
        let second = tokio::time::timeout(Duration::from_secs(1), locks.acquire("chan-2"))
            .await
            .expect("independent channel");
        assert_eq!(locks.tracked_channels(), 2);
        drop(first);
        drop(second);
        assert_eq!(locks.tracked_channels(), 0);
    }
}
