//! Copy-on-write cache of host sets keyed by routing identity.
//!
//! Selection never mutates a cached set. Refreshes build a complete
//! replacement and install it wholesale; readers holding the old `Arc`
//! finish their scan against a consistent snapshot.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::load_balancer::host::Host;

/// Cache key: a discovery identity (`service` or `service|tag`) or the
/// literal upstream url.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey(String);

impl ServiceKey {
    pub fn for_service(service_id: &str, tag: Option<&str>) -> Self {
        match tag {
            Some(tag) => Self(format!("{service_id}|{tag}")),
            None => Self(service_id.to_string()),
        }
    }

    pub fn for_url(url: &str) -> Self {
        Self(url.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable snapshot of the hosts serving one key, plus the shared
/// rotation cursor that spreads selections across them.
pub struct HostSet {
    hosts: Vec<Arc<Host>>,
    cursor: AtomicUsize,
}

impl HostSet {
    fn new(hosts: Vec<Arc<Host>>) -> Self {
        Self {
            hosts,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn hosts(&self) -> &[Arc<Host>] {
        &self.hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Advance the rotation cursor, returning the index a scan starts at.
    pub fn next_start(&self) -> usize {
        if self.hosts.is_empty() {
            return 0;
        }
        self.cursor.fetch_add(1, Ordering::Relaxed) % self.hosts.len()
    }
}

/// Concurrent key → host-set map.
#[derive(Default)]
pub struct HostCache {
    entries: DashMap<ServiceKey, Arc<HostSet>>,
}

impl HostCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ServiceKey) -> Option<Arc<HostSet>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Install a full replacement set for a key. Concurrent installs race
    /// benignly; the last writer wins and earlier readers keep their
    /// snapshot until they finish.
    pub fn install(&self, key: ServiceKey, hosts: Vec<Arc<Host>>) -> Arc<HostSet> {
        let set = Arc::new(HostSet::new(hosts));
        self.entries.insert(key, Arc::clone(&set));
        set
    }

    pub fn remove(&self, key: &ServiceKey) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<(ServiceKey, Arc<HostSet>)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolSettings;

    fn host(url: &str) -> Arc<Host> {
        Arc::new(Host::new(
            "svc",
            url.parse().unwrap(),
            None,
            PoolSettings::default(),
        ))
    }

    #[test]
    fn service_keys_distinguish_tags() {
        assert_eq!(
            ServiceKey::for_service("orders", None).as_str(),
            "orders"
        );
        assert_eq!(
            ServiceKey::for_service("orders", Some("staging")).as_str(),
            "orders|staging"
        );
        assert_ne!(
            ServiceKey::for_service("orders", None),
            ServiceKey::for_service("orders", Some("staging"))
        );
    }

    #[test]
    fn install_replaces_wholesale_and_old_snapshot_survives() {
        let cache = HostCache::new();
        let key = ServiceKey::for_service("orders", None);

        let old = cache.install(key.clone(), vec![host("http://10.0.0.1:1")]);
        assert_eq!(old.len(), 1);

        let new = cache.install(
            key.clone(),
            vec![host("http://10.0.0.2:1"), host("http://10.0.0.3:1")],
        );
        assert_eq!(new.len(), 2);

        // The pre-replacement snapshot is still fully usable.
        assert_eq!(old.len(), 1);
        assert_eq!(old.hosts()[0].url_text(), "http://10.0.0.1:1/");

        let current = cache.get(&key).unwrap();
        assert_eq!(current.len(), 2);
    }

    #[test]
    fn cursor_rotates_start_index() {
        let set = HostSet::new(vec![
            host("http://10.0.0.1:1"),
            host("http://10.0.0.2:1"),
            host("http://10.0.0.3:1"),
        ]);
        assert_eq!(set.next_start(), 0);
        assert_eq!(set.next_start(), 1);
        assert_eq!(set.next_start(), 2);
        assert_eq!(set.next_start(), 0);
    }
}
