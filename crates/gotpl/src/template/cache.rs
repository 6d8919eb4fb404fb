//! Compiled template cache.
//!
//! Templates are keyed by where they came from (their source text or their
//! resolved path) together with the options that change compiled output.
//! Every key owns a slot with its own lock, so two threads asking for the
//! same template compile it once, while different templates compile in
//! parallel.
//!
//! The cache never evicts on its own. A render failure purges the failing
//! key so the next call compiles afresh.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use super::compiled::CompiledTemplate;
use crate::compiler::CompileSettings;
use crate::error::Result;

/// Where a cached template came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TemplateIdentity {
    /// A template given as text.
    Source(String),
    /// A template read from this resolved path.
    File(PathBuf),
}

/// Identifies one compiled form of one template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub identity: TemplateIdentity,
    pub open_tag: String,
    pub close_tag: String,
    pub minify: bool,
}

impl CacheKey {
    pub fn new(identity: TemplateIdentity, settings: &CompileSettings) -> Self {
        Self {
            identity,
            open_tag: settings.open_tag.clone(),
            close_tag: settings.close_tag.clone(),
            minify: settings.minify,
        }
    }
}

type Slot = Arc<Mutex<Option<Arc<CompiledTemplate>>>>;

/// Thread-safe map from [`CacheKey`] to compiled templates.
#[derive(Debug, Default)]
pub struct TemplateCache {
    slots: Mutex<HashMap<CacheKey, Slot>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding a slot leaves it empty or filled, both valid.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        Arc::clone(lock(&self.slots).entry(key.clone()).or_default())
    }

    /// Returns the template stored under `key`, compiling it with `compile`
    /// and storing the result when absent. A failed compile stores nothing.
    pub fn get_or_compile<F>(&self, key: &CacheKey, compile: F) -> Result<Arc<CompiledTemplate>>
    where
        F: FnOnce() -> Result<CompiledTemplate>,
    {
        let slot = self.slot(key);
        let mut entry = lock(&slot);
        if let Some(template) = entry.as_ref() {
            trace!(key = ?key.identity, "template cache hit");
            return Ok(Arc::clone(template));
        }
        trace!(key = ?key.identity, "template cache miss");

        match compile() {
            Ok(template) => {
                let template = Arc::new(template);
                *entry = Some(Arc::clone(&template));
                trace!(key = ?key.identity, "template cached");
                Ok(template)
            }
            Err(err) => {
                drop(entry);
                self.discard_empty(key, &slot);
                Err(err)
            }
        }
    }

    /// Returns the template stored under `key`.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CompiledTemplate>> {
        let slot = lock(&self.slots).get(key).cloned()?;
        let entry = lock(&slot);
        entry.clone()
    }

    /// Removes the template stored under `key`, returning it.
    pub fn remove(&self, key: &CacheKey) -> Option<Arc<CompiledTemplate>> {
        let slot = lock(&self.slots).remove(key)?;
        let removed = lock(&slot).take();
        if removed.is_some() {
            trace!(key = ?key.identity, "template purged from cache");
        }
        removed
    }

    /// Returns `true` if a compiled template is stored under `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.get(key).is_some()
    }

    /// Number of stored templates.
    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = lock(&self.slots).values().cloned().collect();
        slots.iter().filter(|slot| lock(slot).is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every stored template.
    pub fn clear(&self) {
        let count = lock(&self.slots).drain().count();
        trace!(slots = count, "template cache cleared");
    }

    // Forget a slot that never got filled, unless another caller replaced it.
    fn discard_empty(&self, key: &CacheKey, slot: &Slot) {
        let mut slots = lock(&self.slots);
        let unused = slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && lock(current).is_none());
        if unused {
            slots.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn key(text: &str) -> CacheKey {
        CacheKey::new(
            TemplateIdentity::Source(text.to_string()),
            &CompileSettings::default(),
        )
    }

    fn compile(text: &str) -> Result<CompiledTemplate> {
        CompiledTemplate::compile(text, &CompileSettings::default())
    }

    #[test]
    fn test_get_or_compile_stores_once() {
        let cache = TemplateCache::new();
        let calls = AtomicUsize::new(0);
        let k = key("<%= a %>");

        for _ in 0..3 {
            cache
                .get_or_compile(&k, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    compile("<%= a %>")
                })
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&k));
    }

    #[test]
    fn test_failed_compile_stores_nothing() {
        let cache = TemplateCache::new();
        let k = key("<% if (a) { %>");
        assert!(cache.get_or_compile(&k, || compile("<% if (a) { %>")).is_err());
        assert!(cache.is_empty());
        assert!(!cache.contains(&k));
    }

    #[test]
    fn test_settings_are_part_of_the_key() {
        let mut settings = CompileSettings::default();
        let minified = CacheKey::new(TemplateIdentity::Source("x".into()), &settings);
        settings.minify = false;
        let plain = CacheKey::new(TemplateIdentity::Source("x".into()), &settings);
        assert_ne!(minified, plain);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = TemplateCache::new();
        cache.get_or_compile(&key("a"), || compile("a")).unwrap();
        cache.get_or_compile(&key("b"), || compile("b")).unwrap();
        assert_eq!(cache.len(), 2);

        assert!(cache.remove(&key("a")).is_some());
        assert!(cache.remove(&key("a")).is_none());
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get(&key("b")).is_none());
    }

    #[test]
    fn test_concurrent_callers_compile_once() {
        let cache = Arc::new(TemplateCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                thread::spawn(move || {
                    cache
                        .get_or_compile(&key("<%= shared %>"), || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            compile("<%= shared %>")
                        })
                        .map(|_| ())
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
