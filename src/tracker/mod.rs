//! Transfer tracking engine.
//!
//! - `classify`: pure bucketing of raw pages into filtered/inbound/outbound
//! - `cache`: TTL snapshot cache with stale-fallback on upstream throttling
//! - `detector`: last-known-state comparison that surfaces new transfers

pub mod cache;
pub mod detector;
pub mod types;

pub use cache::{CacheRead, CacheStatus, SnapshotCache, TrackError};
pub use detector::LastKnownState;
pub use types::{
    ClassifiedTransfers, TransferPage, TransferRecord, TransferView, TrackedSnapshot,
};

/// Bucket raw pages by direction relative to `tracked`, dropping anything
/// that touches `treasury`.
///
/// Records missing either endpoint are skipped. A record lands in at most
/// one direction bucket: destination-equals-tracked wins over
/// source-equals-tracked. Records matching neither direction stay in
/// `filtered` only. Input order is preserved.
pub fn classify(
    pages: &[TransferPage],
    treasury: &str,
    tracked: &str,
) -> ClassifiedTransfers {
    let mut out = ClassifiedTransfers::default();

    for page in pages {
        for record in &page.data {
            let (from, to) = match (record.from_ss58(), record.to_ss58()) {
                (Some(from), Some(to)) => (from, to),
                _ => continue,
            };

            if from == treasury || to == treasury {
                continue;
            }

            out.filtered.push(record.clone());

            if to == tracked {
                out.inbound.push(record.clone());
            } else if from == tracked {
                out.outbound.push(record.clone());
            }
        }
    }

    out
}
