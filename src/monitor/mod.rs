//! Background transfer monitor.
//!
//! Polls the transfer feed on a configurable interval, detects transfers
//! not present in the last observed snapshot, and dispatches one
//! notification per new transfer (inbound first, then outbound, in feed
//! order) with a fixed delay between posts.
//!
//! Failure handling:
//! - feed throttling: capped backoff, then the same cycle is retried
//! - any other feed failure: the next cycle is delayed in proportion to
//!   the consecutive failure count
//! - five consecutive failures of either kind disable the monitor until it
//!   is explicitly toggled back on
//!
//! The loop is cancellable at every sleep; a cancelled cycle commits no
//! state.

use crate::notify::{
    build_transfer_notice, dispatch, Direction, DirectionTotals, NotificationLog, Notifier,
};
use crate::taostats::{FetchError, TransferSource};
use crate::tracker::{classify, LastKnownState, TransferRecord};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consecutive failures that disable the monitor.
const MAX_CONSECUTIVE_ERRORS: u32 = 5;
/// Delay between consecutive notification dispatches.
const DISPATCH_DELAY: Duration = Duration::from_secs(5);
/// Extra per-error delay added to the polling interval.
const ERROR_DELAY_STEP_SECS: u64 = 30;
/// Rate-limit retry backoff: step per consecutive error, capped.
const RATE_LIMIT_STEP_SECS: u64 = 60;
const RATE_LIMIT_CAP_SECS: u64 = 300;

/// Lower bound on the polling interval.
const MIN_CHECK_INTERVAL_SECS: u64 = 30;

/// Runtime-adjustable monitor settings.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSettings {
    pub enabled: bool,
    pub check_interval_secs: u64,
    /// Reported threshold. The dispatch path announces every new transfer
    /// regardless; the knob is kept settable for parity with the API.
    pub min_amount_tao: Decimal,
    pub test_mode: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: 60,
            min_amount_tao: Decimal::ZERO,
            test_mode: false,
        }
    }
}

/// Partial settings update. Out-of-range values are ignored, not errors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub check_interval_secs: Option<u64>,
    pub min_amount_tao: Option<Decimal>,
    pub test_mode: Option<bool>,
}

impl MonitorSettings {
    pub fn apply(&mut self, update: SettingsUpdate) {
        if let Some(interval) = update.check_interval_secs {
            if interval >= MIN_CHECK_INTERVAL_SECS {
                self.check_interval_secs = interval;
            }
        }
        if let Some(min) = update.min_amount_tao {
            if min >= Decimal::ZERO {
                self.min_amount_tao = min;
            }
        }
        if let Some(test_mode) = update.test_mode {
            self.test_mode = test_mode;
        }
    }
}

/// Everything one monitor instance needs, shared with the HTTP surface.
#[derive(Clone)]
pub struct MonitorContext {
    pub source: Arc<dyn TransferSource>,
    pub notifier: Arc<dyn Notifier>,
    pub known: Arc<LastKnownState>,
    pub settings: Arc<Mutex<MonitorSettings>>,
    pub history: Arc<Mutex<NotificationLog>>,
    pub treasury: String,
    pub tracked: String,
}

/// Prime the change-detection baseline with whatever the feed currently
/// shows, so pre-existing transfers are not announced when polling starts.
/// Failures are logged and left for the first poll cycle to catch up on.
pub async fn seed_baseline(ctx: &MonitorContext) {
    match ctx.source.fetch_all().await {
        Ok(pages) => {
            let classified = classify(&pages, &ctx.treasury, &ctx.tracked);
            ctx.known
                .observe(&classified.inbound, &classified.outbound)
                .await;
            info!(
                inbound = classified.inbound.len(),
                outbound = classified.outbound.len(),
                "transfer baseline seeded"
            );
        }
        Err(FetchError::RateLimited) => {
            warn!("rate limited while seeding baseline, first poll cycle will seed it");
        }
        Err(e) => {
            warn!(error = %e, "failed to seed transfer baseline");
        }
    }
}

/// One polling loop instance. Consecutive-error state lives inside the
/// loop, so every fresh instance starts with a clean slate.
pub struct TransferMonitor {
    ctx: MonitorContext,
    token: CancellationToken,
}

impl TransferMonitor {
    pub fn new(ctx: MonitorContext, token: CancellationToken) -> Self {
        Self { ctx, token }
    }

    /// Run the monitor in a background task. Returns immediately.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!("transfer monitor started");
        let mut consecutive_errors: u32 = 0;

        loop {
            if self.token.is_cancelled() {
                break;
            }
            if !self.ctx.settings.lock().await.enabled {
                break;
            }

            debug!("checking for new transfers");
            match self.ctx.source.fetch_all().await {
                Ok(pages) => {
                    consecutive_errors = 0;
                    let classified =
                        classify(&pages, &self.ctx.treasury, &self.ctx.tracked);
                    let (new_in, new_out) = self
                        .ctx
                        .known
                        .observe(&classified.inbound, &classified.outbound)
                        .await;

                    info!(
                        inbound = classified.inbound.len(),
                        outbound = classified.outbound.len(),
                        new_inbound = new_in.len(),
                        new_outbound = new_out.len(),
                        "transfer check complete"
                    );

                    // One totals computation per cycle, reused by every
                    // notification below.
                    let totals = DirectionTotals::from_buckets(
                        &classified.inbound,
                        &classified.outbound,
                    );

                    if !self.dispatch_batch(&new_in, Direction::Inbound, &totals).await {
                        break;
                    }
                    if !self.dispatch_batch(&new_out, Direction::Outbound, &totals).await {
                        break;
                    }
                }
                Err(FetchError::RateLimited) => {
                    consecutive_errors += 1;
                    if self.check_disabled(consecutive_errors).await {
                        break;
                    }
                    let wait_secs = RATE_LIMIT_CAP_SECS
                        .min(RATE_LIMIT_STEP_SECS * u64::from(consecutive_errors));
                    warn!(
                        wait_secs,
                        attempt = consecutive_errors,
                        "feed rate limited, backing off before retry"
                    );
                    if !self.sleep_or_cancel(Duration::from_secs(wait_secs)).await {
                        break;
                    }
                    // Retry the cycle right away, skipping the interval sleep.
                    continue;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    error!(error = %e, attempt = consecutive_errors, "transfer check failed");
                    if self.check_disabled(consecutive_errors).await {
                        break;
                    }
                }
            }

            let interval = self.ctx.settings.lock().await.check_interval_secs;
            let wait_secs = interval + ERROR_DELAY_STEP_SECS * u64::from(consecutive_errors);
            if !self.sleep_or_cancel(Duration::from_secs(wait_secs)).await {
                break;
            }
        }

        info!("transfer monitor stopped");
    }

    /// Dispatch one notification per record, in order, with the fixed
    /// inter-dispatch delay. Returns false when cancelled mid-batch.
    async fn dispatch_batch(
        &self,
        records: &[TransferRecord],
        direction: Direction,
        totals: &DirectionTotals,
    ) -> bool {
        for record in records {
            let test_mode = self.ctx.settings.lock().await.test_mode;
            let text = build_transfer_notice(record, direction, totals);
            dispatch(
                self.ctx.notifier.as_ref(),
                &self.ctx.history,
                test_mode,
                text,
            )
            .await;

            if !self.sleep_or_cancel(DISPATCH_DELAY).await {
                return false;
            }
        }
        true
    }

    /// Disable the monitor once the consecutive-error threshold is hit,
    /// regardless of failure kind.
    async fn check_disabled(&self, consecutive_errors: u32) -> bool {
        if consecutive_errors < MAX_CONSECUTIVE_ERRORS {
            return false;
        }
        error!(
            errors = consecutive_errors,
            "too many consecutive errors, disabling transfer monitor"
        );
        self.ctx.settings.lock().await.enabled = false;
        true
    }

    /// Cancellable sleep. Returns false when the token fired first.
    async fn sleep_or_cancel(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

struct ActiveMonitor {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the at-most-one live monitor task and the start/stop/toggle
/// transitions.
pub struct MonitorController {
    ctx: MonitorContext,
    active: Mutex<Option<ActiveMonitor>>,
}

impl MonitorController {
    pub fn new(ctx: MonitorContext) -> Self {
        Self {
            ctx,
            active: Mutex::new(None),
        }
    }

    /// Start a fresh monitor instance. No-op (returns false) if one is
    /// already running.
    pub async fn start(&self) -> bool {
        let mut active = self.active.lock().await;
        if matches!(active.as_ref(), Some(a) if !a.handle.is_finished()) {
            debug!("monitor already running, start ignored");
            return false;
        }

        self.ctx.settings.lock().await.enabled = true;
        let token = CancellationToken::new();
        let handle = TransferMonitor::new(self.ctx.clone(), token.clone()).start();
        *active = Some(ActiveMonitor { token, handle });
        true
    }

    /// Cancel the live monitor, if any.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        if let Some(monitor) = active.take() {
            monitor.token.cancel();
        }
        self.ctx.settings.lock().await.enabled = false;
    }

    /// Flip the monitor state; returns the new enabled state. A monitor
    /// that disabled itself counts as stopped, so toggling starts a fresh
    /// instance with a clean error count.
    pub async fn toggle(&self) -> bool {
        if self.is_running().await {
            self.stop().await;
            info!("transfer monitor disabled by toggle");
            false
        } else {
            self.start().await;
            info!("transfer monitor enabled by toggle");
            true
        }
    }

    pub async fn is_running(&self) -> bool {
        let active = self.active.lock().await;
        matches!(active.as_ref(), Some(a) if !a.handle.is_finished())
    }

    pub fn context(&self) -> &MonitorContext {
        &self.ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::PublishResult;
    use crate::tracker::TransferPage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSource {
        error_kind: fn() -> FetchError,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TransferSource for FailingSource {
        async fn fetch_all(&self) -> Result<Vec<TransferPage>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err((self.error_kind)())
        }
    }

    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn publish(&self, _text: &str) -> PublishResult {
            PublishResult::Sent { id: None }
        }
    }

    fn context(source: Arc<dyn TransferSource>) -> MonitorContext {
        MonitorContext {
            source,
            notifier: Arc::new(NullNotifier),
            known: Arc::new(LastKnownState::new()),
            settings: Arc::new(Mutex::new(MonitorSettings::default())),
            history: Arc::new(Mutex::new(NotificationLog::new())),
            treasury: "5T".to_string(),
            tracked: "5A".to_string(),
        }
    }

    #[test]
    fn settings_ignore_out_of_range_values() {
        let mut settings = MonitorSettings::default();

        settings.apply(SettingsUpdate {
            check_interval_secs: Some(10),
            min_amount_tao: Some(Decimal::NEGATIVE_ONE),
            test_mode: None,
        });
        assert_eq!(settings.check_interval_secs, 60);
        assert_eq!(settings.min_amount_tao, Decimal::ZERO);

        settings.apply(SettingsUpdate {
            check_interval_secs: Some(120),
            min_amount_tao: Some(Decimal::ONE),
            test_mode: Some(true),
        });
        assert_eq!(settings.check_interval_secs, 120);
        assert_eq!(settings.min_amount_tao, Decimal::ONE);
        assert!(settings.test_mode);
    }

    #[tokio::test(start_paused = true)]
    async fn five_upstream_failures_disable_the_monitor() {
        let source = Arc::new(FailingSource {
            error_kind: || FetchError::Status(reqwest::StatusCode::BAD_GATEWAY),
            calls: AtomicUsize::new(0),
        });
        let ctx = context(source.clone());

        let token = CancellationToken::new();
        let handle = TransferMonitor::new(ctx.clone(), token).start();
        handle.await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 5);
        assert!(!ctx.settings.lock().await.enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_failures_also_hit_the_threshold() {
        let source = Arc::new(FailingSource {
            error_kind: || FetchError::RateLimited,
            calls: AtomicUsize::new(0),
        });
        let ctx = context(source.clone());

        let token = CancellationToken::new();
        let handle = TransferMonitor::new(ctx.clone(), token).start();
        handle.await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 5);
        assert!(!ctx.settings.lock().await.enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn controller_start_is_a_noop_while_running() {
        struct IdleSource;

        #[async_trait]
        impl TransferSource for IdleSource {
            async fn fetch_all(&self) -> Result<Vec<TransferPage>, FetchError> {
                Ok(Vec::new())
            }
        }

        let controller = MonitorController::new(context(Arc::new(IdleSource)));
        assert!(controller.start().await);
        assert!(!controller.start().await);
        assert!(controller.is_running().await);

        controller.stop().await;
        tokio::task::yield_now().await;
        assert!(!controller.is_running().await);
    }
}
