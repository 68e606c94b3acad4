//! Content-keyed, time-bounded memo of generated mask sets

use crate::types::Mask;
use image::RgbImage;
use instant::{Duration, Instant};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// SHA-256 fingerprint of an image's dimensions, pixels and the generator id
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    #[must_use]
    pub fn for_image(image: &RgbImage, model_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(image.width().to_le_bytes());
        hasher.update(image.height().to_le_bytes());
        hasher.update(image.as_raw());
        hasher.update(model_id.as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        Self(bytes)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter().take(8) {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({self})")
    }
}

struct CacheEntry {
    inserted: Instant,
    masks: Arc<[Arc<Mask>]>,
}

/// Mask sets shared across sessions, each valid for `ttl` after insertion
///
/// A zero TTL disables reuse: every lookup misses.
pub struct MaskCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl MaskCache {
    /// Default reuse window (10 minutes)
    pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached masks for `key`, if inserted less than `ttl` ago
    pub fn get(&self, key: &CacheKey) -> Option<Arc<[Arc<Mask>]>> {
        let mut entries = self.lock();
        let fresh = entries
            .get(key)
            .map(|entry| entry.inserted.elapsed() < self.ttl)?;
        if fresh {
            entries.get(key).map(|entry| Arc::clone(&entry.masks))
        } else {
            entries.remove(key);
            None
        }
    }

    /// Store `masks` under `key`, first dropping every expired entry
    ///
    /// Nothing is stored when the TTL is zero.
    pub fn insert(&self, key: CacheKey, masks: Arc<[Arc<Mask>]>) {
        let mut entries = self.lock();
        let purged = evict_expired(&mut entries, self.ttl);
        if purged > 0 {
            log::debug!("Evicted {} expired mask set(s)", purged);
        }
        if self.ttl.is_zero() {
            return;
        }
        entries.insert(
            key,
            CacheEntry {
                inserted: Instant::now(),
                masks,
            },
        );
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        evict_expired(&mut self.lock(), self.ttl)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn evict_expired(entries: &mut HashMap<CacheKey, CacheEntry>, ttl: Duration) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.inserted.elapsed() < ttl);
    before - entries.len()
}

impl Default for MaskCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}

impl fmt::Debug for MaskCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaskCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.len())
            .finish()
    }
}
