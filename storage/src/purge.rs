// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Daily purge of rows dated before the current rollover date.

use crate::TradeStore;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use log::{info, warn};
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Local wall-clock hour the purge fires at.
pub const ROLLOVER_HOUR: u32 = 3;

pub struct PurgeTask {
    store: Arc<TradeStore>,
    tz: Tz,
}

impl PurgeTask {
    pub fn new(store: Arc<TradeStore>, tz: Tz) -> Self {
        Self { store, tz }
    }

    pub async fn run(self, cancel: CancellationToken) {
        loop {
            let now = Utc::now();
            let at = next_rollover_utc(now, &self.tz);
            let wait = (at - now).to_std().unwrap_or_default();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(wait) => {}
            }
            let today = Utc::now().with_timezone(&self.tz).date_naive();
            match self.store.purge_before(today).await {
                Ok(removed) => info!("purged {removed} trades dated before {today}"),
                Err(err) => warn!("daily purge failed: {err}"),
            }
        }
    }
}

/// Next 03:00 local in `tz`, as a UTC instant. DST gaps fall forward to the
/// next representable time.
pub fn next_rollover_utc(now: DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
    let local = now.with_timezone(tz);
    let rollover = NaiveTime::from_hms_opt(ROLLOVER_HOUR, 0, 0).unwrap_or_default();
    let mut date = local.date_naive();
    if local.time() >= rollover {
        date += ChronoDuration::days(1);
    }
    for offset_hours in 0..3 {
        let candidate = date.and_time(rollover) + ChronoDuration::hours(offset_hours);
        if let Some(resolved) = tz.from_local_datetime(&candidate).earliest() {
            return resolved.with_timezone(&Utc);
        }
    }
    // No representable local time in the next few hours; fall back to a day.
    now + ChronoDuration::days(1)
}
