//! New-transfer detection against the last observed snapshot.
//!
//! The baseline is replaced wholesale on every observation, not unioned.
//! A transfer that drops off the paginated feed window and later reappears
//! is therefore announced again: absence-then-presence is indistinguishable
//! from first appearance here, and that trade-off is intentional.

use crate::tracker::types::TransferRecord;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tokio::sync::Mutex;

/// Records in `current` whose identity key is absent from `prior`.
pub fn detect_new(
    prior: &[TransferRecord],
    current: &[TransferRecord],
) -> Vec<TransferRecord> {
    let known: HashSet<String> = prior.iter().map(|r| r.transfer_id()).collect();
    current
        .iter()
        .filter(|r| !known.contains(&r.transfer_id()))
        .cloned()
        .collect()
}

/// Counts reported by the status endpoint.
#[derive(Debug, Clone, Copy)]
pub struct KnownCounts {
    pub inbound: usize,
    pub outbound: usize,
    pub last_check: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Baseline {
    inbound: Vec<TransferRecord>,
    outbound: Vec<TransferRecord>,
    last_check: Option<DateTime<Utc>>,
}

/// The most recently observed inbound/outbound buckets, used purely as the
/// comparison baseline for change detection.
#[derive(Default)]
pub struct LastKnownState {
    inner: Mutex<Baseline>,
}

impl LastKnownState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit point for one completed classification cycle: returns the
    /// transfers not present in the prior baseline, then replaces the
    /// baseline with `inbound`/`outbound` and stamps the check time.
    pub async fn observe(
        &self,
        inbound: &[TransferRecord],
        outbound: &[TransferRecord],
    ) -> (Vec<TransferRecord>, Vec<TransferRecord>) {
        let mut state = self.inner.lock().await;
        let new_in = detect_new(&state.inbound, inbound);
        let new_out = detect_new(&state.outbound, outbound);

        state.inbound = inbound.to_vec();
        state.outbound = outbound.to_vec();
        state.last_check = Some(Utc::now());

        (new_in, new_out)
    }

    pub async fn counts(&self) -> KnownCounts {
        let state = self.inner.lock().await;
        KnownCounts {
            inbound: state.inbound.len(),
            outbound: state.outbound.len(),
            last_check: state.last_check,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> TransferRecord {
        serde_json::from_str(&format!(
            r#"{{"extrinsic_id": "{id}", "from": {{"ss58": "5F"}}, "to": {{"ss58": "5T"}}, "amount": "10"}}"#,
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn first_observation_reports_everything() {
        let state = LastKnownState::new();
        let (new_in, new_out) = state.observe(&[record("a")], &[record("b")]).await;
        assert_eq!(new_in.len(), 1);
        assert_eq!(new_out.len(), 1);
    }

    #[tokio::test]
    async fn unchanged_buckets_report_nothing() {
        let state = LastKnownState::new();
        let inbound = [record("a"), record("b")];
        state.observe(&inbound, &[]).await;

        let (new_in, new_out) = state.observe(&inbound, &[]).await;
        assert!(new_in.is_empty());
        assert!(new_out.is_empty());
    }

    #[tokio::test]
    async fn only_unseen_records_are_new() {
        let state = LastKnownState::new();
        state.observe(&[record("a")], &[]).await;

        let (new_in, _) = state.observe(&[record("a"), record("c")], &[]).await;
        assert_eq!(new_in.len(), 1);
        assert_eq!(new_in[0].extrinsic_id.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn baseline_is_replaced_not_unioned() {
        let state = LastKnownState::new();
        state.observe(&[record("a")], &[]).await;

        // "a" drops off the feed window...
        state.observe(&[record("b")], &[]).await;

        // ...and is announced again when it reappears.
        let (new_in, _) = state.observe(&[record("a"), record("b")], &[]).await;
        assert_eq!(new_in.len(), 1);
        assert_eq!(new_in[0].extrinsic_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn buckets_are_compared_independently() {
        let state = LastKnownState::new();
        state.observe(&[record("a")], &[]).await;

        // Same identity showing up in the other direction's bucket is new
        // there; key sets are per bucket.
        let (_, new_out) = state.observe(&[record("a")], &[record("a")]).await;
        assert_eq!(new_out.len(), 1);
    }

    #[tokio::test]
    async fn observe_stamps_last_check() {
        let state = LastKnownState::new();
        assert!(state.counts().await.last_check.is_none());

        state.observe(&[record("a")], &[]).await;
        let counts = state.counts().await;
        assert!(counts.last_check.is_some());
        assert_eq!(counts.inbound, 1);
        assert_eq!(counts.outbound, 0);
    }
}
