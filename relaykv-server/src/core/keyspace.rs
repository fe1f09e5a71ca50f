use super::types::{Entry, KeyspaceConfig, KeyspaceStats, now_ms};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Concurrent key/value map with lazy millisecond expiry.
///
/// Reads that find an expired entry delete it while still holding the write
/// lock, so an expired value is never returned and never deleted twice.
#[derive(Clone)]
pub struct Keyspace {
    data: Arc<RwLock<HashMap<Bytes, Entry>>>,
    stats: Arc<Mutex<KeyspaceStats>>,
    config: KeyspaceConfig,
}

impl Keyspace {
    /// Create a new keyspace with the given configuration
    pub fn new(config: KeyspaceConfig) -> Self {
        debug!(
            "Initializing keyspace (ttl_cleanup_interval={}ms)",
            config.ttl_cleanup_interval_ms
        );

        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(Mutex::new(KeyspaceStats::default())),
            config,
        }
    }

    /// Start the background expiry sweep, if configured
    pub fn start_ttl_cleanup(&self) -> Option<tokio::task::JoinHandle<()>> {
        let interval_ms = self.config.ttl_cleanup_interval_ms;
        if interval_ms == 0 {
            return None;
        }
        info!("Starting TTL cleanup task (interval={}ms)", interval_ms);

        let keyspace = self.clone();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                interval.tick().await;
                keyspace.purge_expired();
            }
        }))
    }

    /// Upsert a value, replacing any previous entry and its TTL
    pub fn set(&self, key: impl Into<Bytes>, value: impl Into<Bytes>, expiry_ms: Option<i64>) {
        let entry = Entry::new(value.into(), expiry_ms);
        self.data.write().insert(key.into(), entry);
        self.stats.lock().sets += 1;
    }

    /// Get a live value, removing the entry if it has expired
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let now = now_ms();
        let (result, expired) = {
            let mut data = self.data.write();
            let expired = data.get(key).is_some_and(|entry| entry.is_expired_at(now));
            if expired {
                data.remove(key);
                (None, true)
            } else {
                (data.get(key).map(|entry| entry.value.clone()), false)
            }
        };

        let mut stats = self.stats.lock();
        stats.gets += 1;
        if expired {
            debug!(key = %String::from_utf8_lossy(key), "key expired on access");
            stats.expired += 1;
        }
        if result.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        result
    }

    /// Remove a key. Returns whether a live entry was removed.
    pub fn delete(&self, key: &[u8]) -> bool {
        let removed = self.data.write().remove(key);
        match removed {
            Some(entry) if !entry.is_expired() => {
                self.stats.lock().dels += 1;
                true
            }
            _ => false,
        }
    }

    /// List live keys matching a glob pattern
    pub fn keys(&self, pattern: &[u8]) -> Vec<Bytes> {
        let now = now_ms();
        let data = self.data.read();
        data.iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .filter(|(key, _)| glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Snapshot of every live entry
    pub fn entries(&self) -> Vec<(Bytes, Entry)> {
        let now = now_ms();
        let data = self.data.read();
        data.iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stored entries carrying a TTL
    pub fn volatile_len(&self) -> usize {
        self.data
            .read()
            .values()
            .filter(|entry| entry.expiry_ms.is_some())
            .count()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.data.write().clear();
    }

    /// Remove all expired entries, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = now_ms();
        let count = {
            let mut data = self.data.write();
            let before = data.len();
            data.retain(|_, entry| !entry.is_expired_at(now));
            before - data.len()
        };

        if count > 0 {
            debug!("Cleaned up {} expired keys", count);
            self.stats.lock().expired += count as u64;
        }
        count
    }

    /// Get statistics
    pub fn stats(&self) -> KeyspaceStats {
        self.stats.lock().clone()
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new(KeyspaceConfig::default())
    }
}

/// Glob-style matching as used by `KEYS`: `*`, `?`, `[abc]`, `[^a-z]` and
/// backslash escapes.
pub fn glob_match(pattern: &[u8], input: &[u8]) -> bool {
    let (mut p, mut s) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while s < input.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    backtrack = Some((p, s));
                    p += 1;
                    continue;
                }
                b'?' => {
                    p += 1;
                    s += 1;
                    continue;
                }
                b'[' => {
                    if let Some((matched, next)) = match_class(pattern, p, input[s]) {
                        if matched {
                            p = next;
                            s += 1;
                            continue;
                        }
                    } else if input[s] == b'[' {
                        p += 1;
                        s += 1;
                        continue;
                    }
                }
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == input[s] {
                        p += 2;
                        s += 1;
                        continue;
                    }
                }
                c if c == input[s] => {
                    p += 1;
                    s += 1;
                    continue;
                }
                _ => {}
            }
        }

        match backtrack {
            Some((star_p, star_s)) => {
                p = star_p + 1;
                s = star_s + 1;
                backtrack = Some((star_p, star_s + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

/// Match one byte against the class starting at `pattern[start] == b'['`.
/// Returns `(matched, index after the closing bracket)`, or `None` when the
/// class is not terminated.
fn match_class(pattern: &[u8], start: usize, c: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    while i < pattern.len() {
        if pattern[i] == b']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;

        let mut lo = pattern[i];
        if lo == b'\\' && i + 1 < pattern.len() {
            i += 1;
            lo = pattern[i];
        }
        if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let hi = pattern[i + 2];
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            if (lo..=hi).contains(&c) {
                matched = true;
            }
            i += 3;
        } else {
            if lo == c {
                matched = true;
            }
            i += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get() {
        let keyspace = Keyspace::default();

        keyspace.set("key1", "value1", None);

        assert_eq!(keyspace.get(b"key1"), Some(Bytes::from_static(b"value1")));
    }

    #[test]
    fn test_get_nonexistent() {
        let keyspace = Keyspace::default();
        assert_eq!(keyspace.get(b"nonexistent"), None);
    }

    #[test]
    fn test_set_overwrites_ttl() {
        let keyspace = Keyspace::default();

        keyspace.set("key1", "old", Some(now_ms() - 1));
        keyspace.set("key1", "new", None);

        assert_eq!(keyspace.get(b"key1"), Some(Bytes::from_static(b"new")));
    }

    #[test]
    fn test_zero_expiry_means_no_ttl() {
        let keyspace = Keyspace::default();
        keyspace.set("key1", "value1", Some(0));

        assert_eq!(keyspace.volatile_len(), 0);
        assert!(keyspace.get(b"key1").is_some());
    }

    #[test]
    fn test_delete() {
        let keyspace = Keyspace::default();
        keyspace.set("key1", "value1", None);

        assert!(keyspace.delete(b"key1"));
        assert!(!keyspace.delete(b"key1"));
        assert_eq!(keyspace.get(b"key1"), None);
    }

    #[tokio::test]
    async fn test_ttl_expiration_no_resurrection() {
        let keyspace = Keyspace::default();
        keyspace.set("key1", "value1", Some(now_ms() + 10));

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(keyspace.get(b"key1"), None);
        assert_eq!(keyspace.get(b"key1"), None);
        assert_eq!(keyspace.len(), 0);
        assert_eq!(keyspace.stats().expired, 1);
    }

    #[test]
    fn test_concurrent_expired_reads_delete_once() {
        let keyspace = Keyspace::default();
        keyspace.set("key1", "value1", Some(now_ms() - 1));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ks = keyspace.clone();
                std::thread::spawn(move || ks.get(b"key1"))
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), None);
        }
        assert_eq!(keyspace.stats().expired, 1);
    }

    #[test]
    fn test_keys_skips_expired() {
        let keyspace = Keyspace::default();
        keyspace.set("user:1", "alice", None);
        keyspace.set("user:2", "bob", Some(now_ms() - 1));
        keyspace.set("product:1", "laptop", None);

        let mut keys = keyspace.keys(b"*");
        keys.sort();
        assert_eq!(
            keys,
            vec![Bytes::from_static(b"product:1"), Bytes::from_static(b"user:1")]
        );
        assert_eq!(keyspace.keys(b"user:*"), vec![Bytes::from_static(b"user:1")]);
    }

    #[test]
    fn test_purge_expired() {
        let keyspace = Keyspace::default();
        keyspace.set("a", "1", Some(now_ms() - 1));
        keyspace.set("b", "2", None);

        assert_eq!(keyspace.purge_expired(), 1);
        assert_eq!(keyspace.len(), 1);
    }

    #[test]
    fn test_clear_and_entries() {
        let keyspace = Keyspace::default();
        keyspace.set("a", "1", None);
        keyspace.set("b", "2", Some(now_ms() + 60_000));

        assert_eq!(keyspace.entries().len(), 2);
        keyspace.clear();
        assert!(keyspace.is_empty());
    }

    #[test]
    fn test_stats() {
        let keyspace = Keyspace::default();

        keyspace.set("key1", "value1", None);
        keyspace.get(b"key1");
        keyspace.get(b"key2");

        let stats = keyspace.stats();
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.gets, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match(b"*", b"anything"));
        assert!(glob_match(b"*", b""));
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(!glob_match(b"h?llo", b"hllo"));
        assert!(glob_match(b"h*llo", b"heeeello"));
        assert!(glob_match(b"h[ae]llo", b"hallo"));
        assert!(!glob_match(b"h[ae]llo", b"hillo"));
        assert!(glob_match(b"h[^e]llo", b"hallo"));
        assert!(!glob_match(b"h[^e]llo", b"hello"));
        assert!(glob_match(b"h[a-b]llo", b"hbllo"));
        assert!(glob_match(b"foo\\*", b"foo*"));
        assert!(!glob_match(b"foo\\*", b"foobar"));
        assert!(glob_match(b"*:1", b"user:1"));
        assert!(!glob_match(b"user", b"user:1"));
    }
}
