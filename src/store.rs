// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The in-memory record store.
//!
//! The [`Store`] holds two relations keyed by `(name, type)` with
//! case-insensitive name equality:
//!
//! * **local zone** records, which are authoritative and never expire;
//!   and
//! * **cache** entries, which hold previously forwarded answers and are
//!   visible only while their TTL has not run out.
//!
//! The store is owned exclusively by the engine thread. The control
//! plane mutates the local relation inline from that same thread, so no
//! locking is involved.
//!
//! Every time-dependent operation has an `*_at` variant taking an
//! explicit [`Instant`], which the public wrappers call with
//! [`Instant::now`]. Tests use the `*_at` variants directly to drive
//! TTL arithmetic without sleeping.

use std::collections::HashMap;
use std::time::Instant;

use crate::name::Name;
use crate::rr::{Ttl, Type};

/// The TTL given to local records added without an explicit one.
pub const DEFAULT_LOCAL_TTL: u32 = 300;

////////////////////////////////////////////////////////////////////////
// RECORDS AND CACHE ENTRIES                                          //
////////////////////////////////////////////////////////////////////////

/// A single record as held by the [`Store`].
///
/// The RDATA is kept in presentation form (e.g. `"192.168.1.10"`,
/// `"target.example."`) and re-encoded into wire form each time a
/// response is synthesized. The stored casing of the name is preserved,
/// although lookup is case-insensitive.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub name: Name,
    pub rr_type: Type,
    pub rdata: String,
    pub ttl: Ttl,
}

/// A cache entry: a [`Record`] plus its insertion time, from which the
/// remaining TTL is derived.
#[derive(Clone, Debug)]
struct CacheEntry {
    record: Record,
    inserted_at: Instant,
}

impl CacheEntry {
    /// Returns the remaining TTL at `now`, or `None` if the entry has
    /// expired (and so must not be observable).
    fn remaining_at(&self, now: Instant) -> Option<Ttl> {
        let elapsed = now
            .checked_duration_since(self.inserted_at)
            .map_or(0, |elapsed| elapsed.as_secs());
        let ttl = u64::from(u32::from(self.record.ttl));
        if elapsed >= ttl {
            None
        } else {
            Some(Ttl::from((ttl - elapsed) as u32))
        }
    }
}

////////////////////////////////////////////////////////////////////////
// THE STORE                                                          //
////////////////////////////////////////////////////////////////////////

/// The key of both relations. [`Name`]'s equality and hashing are
/// ASCII-case-insensitive, which makes the whole key so.
#[derive(Clone, Eq, Hash, PartialEq)]
struct Key {
    name: Name,
    rr_type: Type,
}

/// The in-memory local zone and cache relations. See the
/// [module documentation](self) for an overview.
#[derive(Default)]
pub struct Store {
    local: HashMap<Key, Vec<Record>>,
    cache: HashMap<Key, Vec<CacheEntry>>,
}

impl Store {
    /// Creates an empty `Store`.
    pub fn new() -> Self {
        Self::default()
    }

    ////////////////////////////////////////////////////////////////////
    // LOCAL ZONE OPERATIONS                                          //
    ////////////////////////////////////////////////////////////////////

    /// Appends an authoritative record. Records are never deduplicated;
    /// adding the same tuple twice yields an RRset with two members.
    pub fn add_local(&mut self, name: Name, rr_type: Type, rdata: String, ttl: Ttl) {
        let key = Key {
            name: name.clone(),
            rr_type,
        };
        self.local.entry(key).or_default().push(Record {
            name,
            rr_type,
            rdata,
            ttl,
        });
    }

    /// Returns all authoritative records for `(name, rr_type)`. An
    /// empty result is a miss.
    pub fn lookup_local(&self, name: &Name, rr_type: Type) -> Vec<Record> {
        let key = Key {
            name: name.clone(),
            rr_type,
        };
        self.local.get(&key).cloned().unwrap_or_default()
    }

    /// Returns whether any authoritative record exists under `name`,
    /// regardless of type. This distinguishes a name that exists with
    /// no records of the queried type from one that does not exist at
    /// all.
    pub fn has_any_local(&self, name: &Name) -> bool {
        self.local.keys().any(|key| key.name == *name)
    }

    /// Removes all authoritative records for `(name, rr_type)`.
    pub fn delete_local(&mut self, name: &Name, rr_type: Type) {
        let key = Key {
            name: name.clone(),
            rr_type,
        };
        self.local.remove(&key);
    }

    /// Returns the number of authoritative records.
    pub fn local_count(&self) -> usize {
        self.local.values().map(Vec::len).sum()
    }

    ////////////////////////////////////////////////////////////////////
    // CACHE OPERATIONS                                               //
    ////////////////////////////////////////////////////////////////////

    /// Inserts a forwarded answer into the cache with the current time
    /// as its insertion time.
    pub fn cache_record(&mut self, name: Name, rr_type: Type, rdata: String, ttl: Ttl) {
        self.cache_record_at(name, rr_type, rdata, ttl, Instant::now());
    }

    /// The underlying implementation of [`Store::cache_record`] with an
    /// explicit insertion time.
    pub fn cache_record_at(
        &mut self,
        name: Name,
        rr_type: Type,
        rdata: String,
        ttl: Ttl,
        now: Instant,
    ) {
        let key = Key {
            name: name.clone(),
            rr_type,
        };
        self.cache.entry(key).or_default().push(CacheEntry {
            record: Record {
                name,
                rr_type,
                rdata,
                ttl,
            },
            inserted_at: now,
        });
    }

    /// Returns the live cache entries for `(name, rr_type)` along with
    /// each entry's remaining TTL. Expired entries are never returned.
    pub fn lookup_cache(&self, name: &Name, rr_type: Type) -> Vec<(Record, Ttl)> {
        self.lookup_cache_at(name, rr_type, Instant::now())
    }

    /// The underlying implementation of [`Store::lookup_cache`] with an
    /// explicit lookup time.
    pub fn lookup_cache_at(&self, name: &Name, rr_type: Type, now: Instant) -> Vec<(Record, Ttl)> {
        let key = Key {
            name: name.clone(),
            rr_type,
        };
        self.cache
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(|entry| {
                entry
                    .remaining_at(now)
                    .map(|remaining| (entry.record.clone(), remaining))
            })
            .collect()
    }

    /// Deletes all cache entries, live and expired.
    pub fn flush_cache(&mut self) {
        self.cache.clear();
    }

    /// Deletes all expired cache entries.
    pub fn evict_expired(&mut self) {
        self.evict_expired_at(Instant::now());
    }

    /// The underlying implementation of [`Store::evict_expired`] with
    /// an explicit eviction time.
    pub fn evict_expired_at(&mut self, now: Instant) {
        self.cache.retain(|_, entries| {
            entries.retain(|entry| entry.remaining_at(now).is_some());
            !entries.is_empty()
        });
    }

    /// Returns the number of cache entries, including entries that have
    /// expired but have not yet been evicted.
    pub fn cache_count(&self) -> usize {
        self.cache.values().map(Vec::len).sum()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
