//! Capability interface over the shared key-value store.
//!
//! The engine talks to its Redis-like shared store exclusively through
//! [`KeyValueStore`]: plain strings with optional expiry, atomic
//! set-if-absent (single-flight tokens), counters with first-write expiry
//! (rate-limit windows), lists (job queues), sets (processing set) and
//! ordered sets (the scheduled-job index). Any backend satisfying these
//! primitives with per-key linearizability is acceptable; [`MemoryStore`]
//! is the in-process implementation used as the default backend and in tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use thiserror::Error;

use crate::time::now_ms;

/// Errors surfaced by the shared store.
///
/// Store errors are never authoritative for readers: the cache layer treats
/// them as misses, while the job queue surfaces them to the worker as
/// transient failures.
#[derive(Debug, Clone, Error)]
pub enum KvError {
    /// The backend is unreachable or refused the operation.
    #[error("shared store unavailable: {0}")]
    Unavailable(String),
    /// The key holds a value of a different kind than the operation expects.
    #[error("value at {key} has the wrong type for this operation")]
    WrongType {
        /// Offending key.
        key: String,
    },
    /// `INCR` was applied to a non-integer value.
    #[error("value at {key} is not an integer")]
    NotAnInteger {
        /// Offending key.
        key: String,
    },
}

/// The shared-store capabilities the engine relies on.
///
/// Methods mirror the underlying store commands one-to-one; no policy lives
/// here. Scores are `f64` (epoch milliseconds fit losslessly).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// `GET key`.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// `SET key value` without expiry.
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// `SET key value EX ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// `SET key value NX EX ttl`; returns whether the key was set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    /// `DEL key…`; returns the number of keys removed.
    async fn del(&self, keys: &[&str]) -> Result<u64, KvError>;

    /// `EXISTS key`.
    async fn exists(&self, key: &str) -> Result<bool, KvError>;

    /// `INCR key`, applying `EXPIRE window` when this write created the key.
    /// Returns the counter value after the increment.
    async fn incr_ex(&self, key: &str, window: Duration) -> Result<u64, KvError>;

    /// `LPUSH key value`; returns the list length after the push.
    async fn lpush(&self, key: &str, value: &str) -> Result<u64, KvError>;

    /// `RPOP key`.
    async fn rpop(&self, key: &str) -> Result<Option<String>, KvError>;

    /// `LLEN key`.
    async fn llen(&self, key: &str) -> Result<u64, KvError>;

    /// `SADD key member`; returns whether the member was newly added.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, KvError>;

    /// `SREM key member`; returns whether the member was present.
    async fn srem(&self, key: &str, member: &str) -> Result<bool, KvError>;

    /// `SCARD key`.
    async fn scard(&self, key: &str) -> Result<u64, KvError>;

    /// `SMEMBERS key`.
    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError>;

    /// `ZADD key score member`; returns whether the member was newly added.
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<bool, KvError>;

    /// `ZRANGEBYSCORE key min max`, members ordered by (score, member).
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64)
        -> Result<Vec<String>, KvError>;

    /// `ZREM key member`; returns whether the member was present.
    async fn zrem(&self, key: &str, member: &str) -> Result<bool, KvError>;

    /// `ZCARD key`.
    async fn zcard(&self, key: &str) -> Result<u64, KvError>;

    /// `KEYS pattern` (`*` wildcard only). Used only by cleanup.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, KvError>;
}

enum StoreValue {
    Str(String),
    List(VecDeque<String>),
    Set(HashSet<String>),
    Zset(HashMap<String, f64>),
}

struct Entry {
    value: StoreValue,
    expires_at: Option<u64>,
}

impl Entry {
    fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// In-process [`KeyValueStore`] with lazy per-key expiry.
///
/// Single mutex over one keyspace: every operation is atomic per key, which
/// is exactly the linearizability the engine needs from the shared store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every key. Test helper.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    fn drop_if_expired(map: &mut HashMap<String, Entry>, key: &str, now: u64) {
        if let Some(entry) = map.get(key) {
            if entry.is_expired(now) {
                map.remove(key);
            }
        }
    }
}

fn glob_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut pos = 0usize;
    let last = parts.len() - 1;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !text.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if i == last {
            let rest = &text[pos..];
            return rest.ends_with(part);
        } else if let Some(found) = text[pos..].find(part) {
            pos += found + part.len();
        } else {
            return false;
        }
    }
    true
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut map = self.inner.lock();
        Self::drop_if_expired(&mut map, key, now_ms());
        match map.get(key) {
            None => Ok(None),
            Some(Entry {
                value: StoreValue::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(KvError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut map = self.inner.lock();
        map.insert(
            key.to_string(),
            Entry {
                value: StoreValue::Str(value.to_string()),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut map = self.inner.lock();
        map.insert(
            key.to_string(),
            Entry {
                value: StoreValue::Str(value.to_string()),
                expires_at: Some(now_ms() + ttl.as_millis() as u64),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut map = self.inner.lock();
        let now = now_ms();
        Self::drop_if_expired(&mut map, key, now);
        if map.contains_key(key) {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Entry {
                value: StoreValue::Str(value.to_string()),
                expires_at: Some(now + ttl.as_millis() as u64),
            },
        );
        Ok(true)
    }

    async fn del(&self, keys: &[&str]) -> Result<u64, KvError> {
        let mut map = self.inner.lock();
        let now = now_ms();
        let mut removed = 0;
        for key in keys {
            Self::drop_if_expired(&mut map, key, now);
            if map.remove(*key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut map = self.inner.lock();
        Self::drop_if_expired(&mut map, key, now_ms());
        Ok(map.contains_key(key))
    }

    async fn incr_ex(&self, key: &str, window: Duration) -> Result<u64, KvError> {
        let mut map = self.inner.lock();
        let now = now_ms();
        Self::drop_if_expired(&mut map, key, now);
        match map.get_mut(key) {
            None => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value: StoreValue::Str("1".to_string()),
                        expires_at: Some(now + window.as_millis() as u64),
                    },
                );
                Ok(1)
            }
            Some(Entry {
                value: StoreValue::Str(s),
                ..
            }) => {
                let current: u64 = s.parse().map_err(|_| KvError::NotAnInteger {
                    key: key.to_string(),
                })?;
                let next = current + 1;
                *s = next.to_string();
                Ok(next)
            }
            Some(_) => Err(KvError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<u64, KvError> {
        let mut map = self.inner.lock();
        let now = now_ms();
        Self::drop_if_expired(&mut map, key, now);
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            value: StoreValue::List(VecDeque::new()),
            expires_at: None,
        });
        match &mut entry.value {
            StoreValue::List(list) => {
                list.push_front(value.to_string());
                Ok(list.len() as u64)
            }
            _ => Err(KvError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut map = self.inner.lock();
        let now = now_ms();
        Self::drop_if_expired(&mut map, key, now);
        match map.get_mut(key) {
            None => Ok(None),
            Some(Entry {
                value: StoreValue::List(list),
                ..
            }) => {
                let popped = list.pop_back();
                if list.is_empty() {
                    map.remove(key);
                }
                Ok(popped)
            }
            Some(_) => Err(KvError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn llen(&self, key: &str) -> Result<u64, KvError> {
        let mut map = self.inner.lock();
        Self::drop_if_expired(&mut map, key, now_ms());
        match map.get(key) {
            None => Ok(0),
            Some(Entry {
                value: StoreValue::List(list),
                ..
            }) => Ok(list.len() as u64),
            Some(_) => Err(KvError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, KvError> {
        let mut map = self.inner.lock();
        Self::drop_if_expired(&mut map, key, now_ms());
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            value: StoreValue::Set(HashSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            StoreValue::Set(set) => Ok(set.insert(member.to_string())),
            _ => Err(KvError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, KvError> {
        let mut map = self.inner.lock();
        Self::drop_if_expired(&mut map, key, now_ms());
        match map.get_mut(key) {
            None => Ok(false),
            Some(Entry {
                value: StoreValue::Set(set),
                ..
            }) => {
                let removed = set.remove(member);
                if set.is_empty() {
                    map.remove(key);
                }
                Ok(removed)
            }
            Some(_) => Err(KvError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn scard(&self, key: &str) -> Result<u64, KvError> {
        let mut map = self.inner.lock();
        Self::drop_if_expired(&mut map, key, now_ms());
        match map.get(key) {
            None => Ok(0),
            Some(Entry {
                value: StoreValue::Set(set),
                ..
            }) => Ok(set.len() as u64),
            Some(_) => Err(KvError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        let mut map = self.inner.lock();
        Self::drop_if_expired(&mut map, key, now_ms());
        match map.get(key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: StoreValue::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(KvError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<bool, KvError> {
        let mut map = self.inner.lock();
        Self::drop_if_expired(&mut map, key, now_ms());
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            value: StoreValue::Zset(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            StoreValue::Zset(zset) => Ok(zset.insert(member.to_string(), score).is_none()),
            _ => Err(KvError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, KvError> {
        let mut map = self.inner.lock();
        Self::drop_if_expired(&mut map, key, now_ms());
        match map.get(key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: StoreValue::Zset(zset),
                ..
            }) => {
                let mut members: Vec<(&String, f64)> = zset
                    .iter()
                    .filter(|(_, score)| **score >= min && **score <= max)
                    .map(|(member, score)| (member, *score))
                    .collect();
                members.sort_by(|a, b| {
                    a.1.partial_cmp(&b.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(b.0))
                });
                Ok(members.into_iter().map(|(member, _)| member.clone()).collect())
            }
            Some(_) => Err(KvError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, KvError> {
        let mut map = self.inner.lock();
        Self::drop_if_expired(&mut map, key, now_ms());
        match map.get_mut(key) {
            None => Ok(false),
            Some(Entry {
                value: StoreValue::Zset(zset),
                ..
            }) => {
                let removed = zset.remove(member).is_some();
                if zset.is_empty() {
                    map.remove(key);
                }
                Ok(removed)
            }
            Some(_) => Err(KvError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn zcard(&self, key: &str) -> Result<u64, KvError> {
        let mut map = self.inner.lock();
        Self::drop_if_expired(&mut map, key, now_ms());
        match map.get(key) {
            None => Ok(0),
            Some(Entry {
                value: StoreValue::Zset(zset),
                ..
            }) => Ok(zset.len() as u64),
            Some(_) => Err(KvError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, KvError> {
        let mut map = self.inner.lock();
        let now = now_ms();
        map.retain(|_, entry| !entry.is_expired(now));
        Ok(map
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect())
    }
}
