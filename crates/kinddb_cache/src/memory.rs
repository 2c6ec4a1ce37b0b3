//! In-process cache with generations and expiry.

use crate::client::{CacheClient, Generation, Versioned};
use crate::error::{CacheError, CacheResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    bytes: Vec<u8>,
    generation: Generation,
    /// `None` never expires.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    next_generation: Generation,
    down: bool,
}

impl State {
    fn live(&mut self, name: &str) -> Option<&Entry> {
        let now = Instant::now();
        if self.entries.get(name).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(name);
        }
        self.entries.get(name)
    }

    fn check_up(&self) -> CacheResult<()> {
        if self.down {
            return Err(CacheError::Unavailable("cache server is down".into()));
        }
        Ok(())
    }
}

/// [`CacheClient`] backed by a local map.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    state: Mutex<State>,
}

impl InMemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: every call fails with `Unavailable` while set.
    pub fn set_down(&self, down: bool) {
        self.state.lock().down = down;
    }

    /// Returns the raw bytes of a live slot.
    pub fn raw(&self, name: &str) -> Option<Vec<u8>> {
        self.state.lock().live(name).map(|e| e.bytes.clone())
    }

    /// Returns the number of live slots.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.entries.retain(|_, e| !e.is_expired(now));
        state.entries.len()
    }

    /// Returns true if no slot is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every slot.
    pub fn flush(&self) {
        self.state.lock().entries.clear();
    }
}

impl CacheClient for InMemoryCache {
    fn get_multi(&self, names: &[String]) -> CacheResult<Vec<Option<Versioned>>> {
        let mut state = self.state.lock();
        state.check_up()?;
        Ok(names
            .iter()
            .map(|name| {
                state.live(name).map(|e| Versioned {
                    bytes: e.bytes.clone(),
                    generation: e.generation,
                })
            })
            .collect())
    }

    fn cas(
        &self,
        name: &str,
        expected: Option<Generation>,
        bytes: Vec<u8>,
        ttl: Duration,
    ) -> CacheResult<Option<Generation>> {
        let mut state = self.state.lock();
        state.check_up()?;
        let current = state.live(name).map(|e| e.generation);
        if current != expected {
            return Ok(None);
        }
        state.next_generation += 1;
        let generation = state.next_generation;
        state.entries.insert(
            name.to_string(),
            Entry {
                bytes,
                generation,
                expires_at: Instant::now().checked_add(ttl),
            },
        );
        Ok(Some(generation))
    }

    fn delete_if(&self, name: &str, expected: Generation) -> CacheResult<bool> {
        let mut state = self.state.lock();
        state.check_up()?;
        if state.live(name).map(|e| e.generation) != Some(expected) {
            return Ok(false);
        }
        state.entries.remove(name);
        Ok(true)
    }

    fn delete(&self, name: &str) -> CacheResult<()> {
        let mut state = self.state.lock();
        state.check_up()?;
        state.entries.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn cas_on_empty_slot_is_add() {
        let cache = InMemoryCache::new();
        let first = cache.cas("a", None, b"1".to_vec(), TTL).unwrap();
        assert!(first.is_some());
        assert_eq!(cache.cas("a", None, b"2".to_vec(), TTL).unwrap(), None);
        assert_eq!(cache.raw("a"), Some(b"1".to_vec()));
    }

    #[test]
    fn cas_requires_matching_generation() {
        let cache = InMemoryCache::new();
        let g1 = cache.cas("a", None, b"1".to_vec(), TTL).unwrap().unwrap();
        let g2 = cache.cas("a", Some(g1), b"2".to_vec(), TTL).unwrap().unwrap();
        assert!(g2 > g1);
        assert_eq!(cache.cas("a", Some(g1), b"3".to_vec(), TTL).unwrap(), None);
        assert!(!cache.delete_if("a", g1).unwrap());
        assert!(cache.delete_if("a", g2).unwrap());
        assert!(cache.is_empty());
    }

    #[test]
    fn expired_slots_read_as_empty() {
        let cache = InMemoryCache::new();
        cache
            .cas("a", None, b"1".to_vec(), Duration::from_millis(1))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get_multi(&["a".to_string()]).unwrap(), vec![None]);
        assert!(cache.cas("a", None, b"2".to_vec(), TTL).unwrap().is_some());
    }

    #[test]
    fn unbounded_ttl_never_expires() {
        let cache = InMemoryCache::new();
        assert!(cache.cas("a", None, b"1".to_vec(), Duration::MAX).unwrap().is_some());
        assert_eq!(cache.raw("a"), Some(b"1".to_vec()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn outage_fails_every_call() {
        let cache = InMemoryCache::new();
        cache.set_down(true);
        assert!(matches!(
            cache.get_multi(&["a".to_string()]),
            Err(CacheError::Unavailable(_))
        ));
        assert!(cache.delete("a").is_err());
        cache.set_down(false);
        assert!(cache.delete("a").is_ok());
    }
}
