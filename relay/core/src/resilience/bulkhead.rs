//! Isolation Groups (Bulkheads)
//!
//! Adapters can be assigned to a named group with its own concurrency cap.
//! Every attempt against a grouped adapter holds one permit from the group's
//! semaphore for its duration, so a slow group cannot starve the others.
//! Permits are handed out in FIFO order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::timeout::AttemptError;

/// One isolation group
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationGroupConfig {
    /// Adapter ids in this group
    pub adapters: Vec<String>,

    /// Attempts allowed in flight across the group
    pub max_concurrent: usize,
}

struct Group {
    name: String,
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
    acquires: AtomicU64,
    peak_in_flight: AtomicU64,
}

impl Group {
    fn in_flight(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.semaphore.available_permits())
    }
}

/// Point-in-time view of one group
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BulkheadStats {
    pub group: String,
    pub max_concurrent: usize,
    pub in_flight: usize,
    pub total_acquires: u64,
    pub peak_in_flight: u64,
}

/// Permit held while an attempt runs; released on drop
#[derive(Debug)]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
}

/// Every configured isolation group
pub struct Bulkheads {
    groups: Vec<Group>,
    membership: HashMap<String, usize>,
}

impl Bulkheads {
    /// Build groups from configuration
    ///
    /// Groups are ordered by name; an adapter listed in several groups
    /// belongs to the first.
    #[must_use]
    pub fn new(config: &HashMap<String, IsolationGroupConfig>) -> Self {
        let mut names: Vec<&String> = config.keys().collect();
        names.sort();

        let mut groups = Vec::with_capacity(names.len());
        let mut membership = HashMap::new();
        for (index, name) in names.into_iter().enumerate() {
            let group = &config[name];
            for adapter in &group.adapters {
                membership.entry(adapter.clone()).or_insert(index);
            }
            groups.push(Group {
                name: name.clone(),
                max_concurrent: group.max_concurrent,
                semaphore: Arc::new(Semaphore::new(group.max_concurrent)),
                acquires: AtomicU64::new(0),
                peak_in_flight: AtomicU64::new(0),
            });
        }

        Self { groups, membership }
    }

    /// Group an adapter belongs to
    pub fn group_of(&self, adapter_id: &str) -> Option<&str> {
        self.membership
            .get(adapter_id)
            .map(|&index| self.groups[index].name.as_str())
    }

    /// Wait for a permit for `adapter_id`; ungrouped adapters need none
    ///
    /// Fails with [`AttemptError::Cancelled`] once the bulkheads are closed.
    pub async fn acquire(&self, adapter_id: &str) -> Result<Option<BulkheadPermit>, AttemptError> {
        let Some(&index) = self.membership.get(adapter_id) else {
            return Ok(None);
        };
        let group = &self.groups[index];

        let permit = group
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AttemptError::Cancelled)?;

        group.acquires.fetch_add(1, Ordering::Relaxed);
        group
            .peak_in_flight
            .fetch_max(group.in_flight() as u64, Ordering::Relaxed);

        Ok(Some(BulkheadPermit { _permit: permit }))
    }

    /// Close every group, failing current and future waiters
    pub fn close(&self) {
        for group in &self.groups {
            group.semaphore.close();
        }
    }

    pub fn stats(&self) -> Vec<BulkheadStats> {
        self.groups
            .iter()
            .map(|g| BulkheadStats {
                group: g.name.clone(),
                max_concurrent: g.max_concurrent,
                in_flight: g.in_flight(),
                total_acquires: g.acquires.load(Ordering::Relaxed),
                peak_in_flight: g.peak_in_flight.load(Ordering::Relaxed),
            })
            .collect()
    }
}

impl std::fmt::Debug for Bulkheads {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bulkheads")
            .field("groups", &self.groups.iter().map(|g| &g.name).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn bulkheads(max_concurrent: usize) -> Bulkheads {
        let mut config = HashMap::new();
        config.insert(
            "cloud".to_string(),
            IsolationGroupConfig {
                adapters: vec!["cloud-a".into(), "cloud-b".into()],
                max_concurrent,
            },
        );
        Bulkheads::new(&config)
    }

    #[tokio::test]
    async fn test_ungrouped_adapter_needs_no_permit() {
        let b = bulkheads(1);
        assert!(b.acquire("local").await.unwrap().is_none());
        assert_eq!(b.group_of("cloud-b"), Some("cloud"));
        assert_eq!(b.group_of("local"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_cap_shared_across_members() {
        let b = Arc::new(bulkheads(1));

        let first = b.acquire("cloud-a").await.unwrap();
        assert!(first.is_some());

        let waiter = tokio::spawn({
            let b = b.clone();
            async move { b.acquire("cloud-b").await.map(|p| p.is_some()) }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished(), "second member waits for the shared permit");

        drop(first);
        assert!(waiter.await.unwrap().unwrap());

        let stats = &b.stats()[0];
        assert_eq!(stats.total_acquires, 2);
        assert_eq!(stats.peak_in_flight, 1);
    }

    #[tokio::test]
    async fn test_close_fails_waiters() {
        let b = bulkheads(1);
        b.close();
        assert!(matches!(b.acquire("cloud-a").await, Err(AttemptError::Cancelled)));
    }
}
