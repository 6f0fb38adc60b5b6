use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Entry count above which `set` triggers an eager sweep of expired entries.
const SWEEP_THRESHOLD: usize = 100;

struct CacheEntry {
    value: serde_json::Value,
    inserted_at: Instant,
    inserted_wall: DateTime<Utc>,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_entry: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Process-local result cache fronting the analytics queries, keyed on
/// `"{operation}:{fleet-or-all}:{normalized params}"`. Holds no authority:
/// on a miss the store is always recomputed from scratch.
///
/// Eviction is lazy: `get` drops an expired entry when it sees one. `set`
/// additionally sweeps all expired entries once the map grows past
/// `SWEEP_THRESHOLD`, bounding memory under many distinct keys.
pub struct AnalyticsCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl AnalyticsCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Build the canonical key for an operation. Positional layout keeps
    /// identical logical queries on the same key regardless of how the
    /// caller assembled its parameters.
    pub fn cache_key(operation: &str, fleet_id: Option<&str>, rest: &[&str]) -> String {
        let mut key = format!("{}:{}", operation, fleet_id.unwrap_or("all"));
        for part in rest {
            key.push(':');
            key.push_str(part);
        }
        key
    }

    /// Returns the cached value if it is still within its TTL; an expired
    /// entry is evicted and reported as absent.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Insert or overwrite an entry with the given TTL.
    pub fn set(&self, key: String, value: serde_json::Value, ttl: Duration) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                inserted_wall: Utc::now(),
                ttl,
            },
        );
        if entries.len() > SWEEP_THRESHOLD {
            entries.retain(|_, entry| !entry.is_expired());
        }
    }

    /// Remove all entries whose key matches the predicate; returns how many
    /// were dropped.
    pub fn invalidate<F>(&self, predicate: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let before = entries.len();
        entries.retain(|key, _| !predicate(key));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.lock().expect("cache lock poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().expect("cache lock poisoned");
        let mut walls: Vec<DateTime<Utc>> =
            entries.values().map(|e| e.inserted_wall).collect();
        walls.sort();
        CacheStats {
            size: entries.len(),
            oldest_entry: walls.first().copied(),
            newest_entry: walls.last().copied(),
        }
    }
}

impl Default for AnalyticsCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(300);

    /// Force an entry past its TTL without sleeping.
    fn expire_entry(cache: &AnalyticsCache, key: &str) {
        let mut entries = cache.entries.lock().unwrap();
        let entry = entries.get_mut(key).unwrap();
        entry.ttl = Duration::ZERO;
        if let Some(backdated) = entry.inserted_at.checked_sub(Duration::from_millis(10)) {
            entry.inserted_at = backdated;
        }
    }

    #[test]
    fn get_within_ttl_returns_same_value() {
        let cache = AnalyticsCache::new();
        cache.set("fleet_analytics:all:24".to_string(), json!({"n": 1}), TTL);
        assert_eq!(
            cache.get("fleet_analytics:all:24"),
            Some(json!({"n": 1}))
        );
        // Second read within the TTL is identical
        assert_eq!(
            cache.get("fleet_analytics:all:24"),
            Some(json!({"n": 1}))
        );
    }

    #[test]
    fn expired_entry_is_absent_and_evicted() {
        let cache = AnalyticsCache::new();
        cache.set("fleet_analytics:all:24".to_string(), json!(1), TTL);
        expire_entry(&cache, "fleet_analytics:all:24");
        assert_eq!(cache.get("fleet_analytics:all:24"), None);
        // The lazy read removed the entry, not just masked it
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn set_past_threshold_sweeps_expired_entries() {
        let cache = AnalyticsCache::new();
        for i in 0..100 {
            cache.set(format!("distance_analytics:all:{i}"), json!(i), TTL);
        }
        for i in 0..50 {
            expire_entry(&cache, &format!("distance_analytics:all:{i}"));
        }
        assert_eq!(cache.len(), 100);
        // 101st insert crosses the threshold and sweeps the 50 expired keys
        cache.set("fuel_analytics:all".to_string(), json!(0), TTL);
        assert_eq!(cache.len(), 51);
        // Live entries survived the sweep
        assert!(cache.get("distance_analytics:all:99").is_some());
        assert!(cache.get("distance_analytics:all:0").is_none());
    }

    #[test]
    fn invalidate_is_scoped_by_predicate() {
        let cache = AnalyticsCache::new();
        cache.set("fleet_analytics:F1:24".to_string(), json!(1), TTL);
        cache.set("fleet_analytics:F2:24".to_string(), json!(2), TTL);
        cache.set("fleet_analytics:all:24".to_string(), json!(3), TTL);

        let removed = cache.invalidate(|key| {
            key.split(':').any(|segment| segment == "F1" || segment == "all")
        });
        assert_eq!(removed, 2);
        // Entries for other fleets are untouched
        assert!(cache.get("fleet_analytics:F2:24").is_some());
        assert!(cache.get("fleet_analytics:F1:24").is_none());
        assert!(cache.get("fleet_analytics:all:24").is_none());
    }

    #[test]
    fn clear_resets_everything() {
        let cache = AnalyticsCache::new();
        cache.set("a:all:1".to_string(), json!(1), TTL);
        cache.set("b:all:2".to_string(), json!(2), TTL);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_key_is_deterministic() {
        let a = AnalyticsCache::cache_key("fleet_analytics", Some("F1"), &["24"]);
        let b = AnalyticsCache::cache_key("fleet_analytics", Some("F1"), &["24"]);
        assert_eq!(a, b);
        assert_eq!(a, "fleet_analytics:F1:24");
        // Absent fleet normalizes to the "all" marker
        assert_eq!(
            AnalyticsCache::cache_key("fuel_analytics", None, &[]),
            "fuel_analytics:all"
        );
    }

    #[test]
    fn stats_reports_size_and_insertion_bounds() {
        let cache = AnalyticsCache::new();
        assert_eq!(cache.stats().size, 0);
        cache.set("a:all:1".to_string(), json!(1), TTL);
        cache.set("b:all:2".to_string(), json!(2), TTL);
        let stats = cache.stats();
        assert_eq!(stats.size, 2);
        assert!(stats.oldest_entry.unwrap() <= stats.newest_entry.unwrap());
    }
}
