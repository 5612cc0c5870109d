//! Background scheduler for live feed recovery.
//!
//! Feeds never retry on their own. This loop remounts feeds whose snapshot
//! failed or whose live updates ended.

use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::main_lib::AppState;

/// Starts the feed recovery scheduler. A zero period disables it.
pub fn start_feed_recovery_scheduler(state: Arc<AppState>, period: Duration) {
    if period.is_zero() {
        info!("Feed recovery scheduler disabled");
        return;
    }

    tokio::spawn(async move {
        info!("Feed recovery scheduler started ({}s interval)", period.as_secs());

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick is immediate; feeds were just mounted.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            run_recovery(&state).await;
        }
    });
}

async fn run_recovery(state: &Arc<AppState>) {
    let remounted = state.feeds.recover().await;
    if remounted > 0 {
        info!("Feed recovery remounted {} feed(s)", remounted);
    } else {
        debug!("Feed recovery: all feeds healthy");
    }
}
