//! In-memory template cache with per-entry expiry.
//!
//! Custom templates are cached with a deadline and dropped on the first
//! access after it passes. Built-in templates are cached without one and
//! only disappear on [`TemplateCache::clear`].
//!
//! The cache is a plain last-writer-wins map. Lookups and writes never
//! await, so it sits behind a synchronous lock.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::model::Template;

#[derive(Debug, Clone)]
struct CacheEntry {
    template: Template,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

#[derive(Debug)]
pub struct TemplateCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl TemplateCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a live entry, evicting it if its deadline has passed.
    pub fn get(&self, template_id: &str) -> Option<Template> {
        let now = Instant::now();

        {
            let entries = self.read();
            match entries.get(template_id) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.template.clone()),
                Some(_) => {}
            }
        }

        let mut entries = self.write();
        // Another writer may have refreshed the entry in the meantime
        if entries.get(template_id).is_some_and(|e| e.is_expired(now)) {
            entries.remove(template_id);
            debug!(template_id, "Evicted expired template");
        }
        entries.get(template_id).map(|entry| entry.template.clone())
    }

    /// Cache a template until the TTL elapses.
    ///
    /// A TTL too long to represent as a deadline never expires.
    pub fn insert(&self, template: Template) {
        let expires_at = Instant::now().checked_add(self.ttl);
        self.write().insert(
            template.template_id.clone(),
            CacheEntry {
                template,
                expires_at,
            },
        );
    }

    /// Cache a template with no expiry.
    pub fn insert_permanent(&self, template: Template) {
        self.write().insert(
            template.template_id.clone(),
            CacheEntry {
                template,
                expires_at: None,
            },
        );
    }

    /// Drop an entry. Evicting an absent key is a no-op.
    pub fn evict(&self, template_id: &str) -> bool {
        self.write().remove(template_id).is_some()
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Number of entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
