//! TTL snapshot cache for the query path.
//!
//! Holds the last successfully classified snapshot. A fresh entry is served
//! without touching the upstream feed; an expired entry triggers a refetch.
//! When the feed is throttling and a prior snapshot exists, that snapshot is
//! served stale rather than failing the read. This applies only to
//! throttling: genuine upstream failures always propagate so they are not
//! masked by old data.

use crate::taostats::{FetchError, TransferSource};
use crate::tracker::types::TrackedSnapshot;
use crate::tracker::classify;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How long a snapshot stays fresh.
pub const SNAPSHOT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum TrackError {
    /// Feed throttled and there is no prior snapshot to fall back on.
    #[error("transfer feed rate limited and no cached data available")]
    RateLimited,
    /// Non-throttling feed failure. Stale data is never served for these.
    #[error("transfer feed error: {0}")]
    Upstream(FetchError),
}

/// A snapshot handed to the caller, flagged when it outlived its TTL.
#[derive(Debug, Clone)]
pub struct CacheRead {
    pub snapshot: TrackedSnapshot,
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub cached: bool,
    pub valid: bool,
    pub age_seconds: u64,
    pub ttl_seconds: u64,
    pub next_refresh_in_seconds: u64,
    pub last_updated: Option<String>,
}

#[derive(Default)]
struct CacheEntry {
    payload: Option<TrackedSnapshot>,
    fetched_at: Option<Instant>,
    last_updated: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn age(&self) -> Option<Duration> {
        self.fetched_at.map(|t| t.elapsed())
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        matches!((self.payload.as_ref(), self.age()), (Some(_), Some(age)) if age < ttl)
    }
}

/// Process-wide snapshot cache. One per tracked address.
pub struct SnapshotCache {
    entry: Mutex<CacheEntry>,
    ttl: Duration,
    treasury: String,
    tracked: String,
}

impl SnapshotCache {
    pub fn new(ttl: Duration, treasury: String, tracked: String) -> Self {
        Self {
            entry: Mutex::new(CacheEntry::default()),
            ttl,
            treasury,
            tracked,
        }
    }

    /// Serve the cached snapshot if fresh, otherwise refetch and classify.
    ///
    /// The entry lock is only held to read or replace the snapshot, never
    /// across the upstream call.
    pub async fn get_or_refresh<S: TransferSource + ?Sized>(
        &self,
        source: &S,
    ) -> Result<CacheRead, TrackError> {
        {
            let entry = self.entry.lock().await;
            if entry.is_fresh(self.ttl) {
                debug!("serving cached snapshot");
                return Ok(CacheRead {
                    snapshot: entry.payload.clone().unwrap_or_else(empty_snapshot),
                    stale: false,
                });
            }
        }

        debug!("cache expired or empty, fetching fresh transfer data");
        match source.fetch_all().await {
            Ok(pages) => {
                let classified = classify(&pages, &self.treasury, &self.tracked);
                let snapshot = TrackedSnapshot::from_classified(&classified);

                let mut entry = self.entry.lock().await;
                entry.payload = Some(snapshot.clone());
                entry.fetched_at = Some(Instant::now());
                entry.last_updated = Some(Utc::now());
                info!(
                    filtered = snapshot.total_after_filter,
                    inbound = snapshot.inbound.len(),
                    outbound = snapshot.outbound.len(),
                    "snapshot cache refreshed"
                );

                Ok(CacheRead {
                    snapshot,
                    stale: false,
                })
            }
            Err(FetchError::RateLimited) => {
                let entry = self.entry.lock().await;
                match entry.payload.clone() {
                    Some(snapshot) => {
                        let age_mins = entry.age().map(|a| a.as_secs() / 60).unwrap_or(0);
                        warn!(
                            age_minutes = age_mins,
                            "feed rate limited, serving stale snapshot"
                        );
                        Ok(CacheRead {
                            snapshot,
                            stale: true,
                        })
                    }
                    None => Err(TrackError::RateLimited),
                }
            }
            Err(e) => Err(TrackError::Upstream(e)),
        }
    }

    pub async fn status(&self) -> CacheStatus {
        let entry = self.entry.lock().await;
        let ttl_seconds = self.ttl.as_secs();
        match entry.age() {
            Some(age) if entry.payload.is_some() => {
                let age_seconds = age.as_secs();
                let valid = age < self.ttl;
                CacheStatus {
                    cached: true,
                    valid,
                    age_seconds,
                    ttl_seconds,
                    next_refresh_in_seconds: ttl_seconds.saturating_sub(age_seconds),
                    last_updated: entry.last_updated.map(|t| t.to_rfc3339()),
                }
            }
            _ => CacheStatus {
                cached: false,
                valid: false,
                age_seconds: 0,
                ttl_seconds,
                next_refresh_in_seconds: 0,
                last_updated: None,
            },
        }
    }
}

fn empty_snapshot() -> TrackedSnapshot {
    TrackedSnapshot {
        total_after_filter: 0,
        inbound: Vec::new(),
        outbound: Vec::new(),
    }
}
