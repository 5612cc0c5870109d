//! The live feeds the application renders, and their record types.

mod audit_anomalies;
mod geo_threats;
mod sales;
mod telemetry;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::live::{EventSource, FeedHandle, FeedOptions, LiveFeed, PollMode, SnapshotSource};

pub use audit_anomalies::AuditAnomaly;
pub use geo_threats::{GeoThreatMarker, ThreatSeverity};
pub use sales::SaleEvent;
pub use telemetry::TelemetryPulse;

/// Row field used to scope a feed to one tenant.
pub const TENANT_FIELD: &str = "tenantId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedKind {
    Sales,
    Telemetry,
    GeoThreats,
    AuditAnomalies,
}

impl FeedKind {
    pub const ALL: [FeedKind; 4] = [
        FeedKind::Sales,
        FeedKind::Telemetry,
        FeedKind::GeoThreats,
        FeedKind::AuditAnomalies,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Sales => "sales",
            FeedKind::Telemetry => "telemetry",
            FeedKind::GeoThreats => "geo-threats",
            FeedKind::AuditAnomalies => "audit-anomalies",
        }
    }

    /// Backend table the feed reads and subscribes to.
    pub fn table(&self) -> &'static str {
        match self {
            FeedKind::Sales => "sales",
            FeedKind::Telemetry => "telemetry_pulses",
            FeedKind::GeoThreats => "geo_threats",
            FeedKind::AuditAnomalies => "audit_anomalies",
        }
    }

    pub fn channel(&self) -> &'static str {
        match self {
            FeedKind::Sales => "live-sales",
            FeedKind::Telemetry => "telemetry-pulse",
            FeedKind::GeoThreats => "geo-threat-markers",
            FeedKind::AuditAnomalies => "audit-anomalies",
        }
    }

    pub fn capacity(&self) -> usize {
        match self {
            FeedKind::Sales => 5,
            FeedKind::Telemetry => 150,
            FeedKind::GeoThreats | FeedKind::AuditAnomalies => 100,
        }
    }

    /// Feed options for this kind, optionally scoped to a tenant.
    pub fn options(&self, tenant_id: Option<&str>) -> FeedOptions {
        match tenant_id {
            Some(tenant) => FeedOptions::new(
                format!("{}:{}", self.channel(), tenant),
                self.table(),
                self.capacity(),
            )
            .with_filter(TENANT_FIELD, tenant),
            None => FeedOptions::new(self.channel(), self.table(), self.capacity()),
        }
    }

    /// Builds an unmounted feed of the right record type.
    pub fn build(
        &self,
        tenant_id: Option<&str>,
        poll_mode: PollMode,
        poll_interval: Duration,
        snapshot: Arc<dyn SnapshotSource>,
        events: Arc<dyn EventSource>,
    ) -> Arc<dyn FeedHandle> {
        let options = self.options(tenant_id).with_polling(poll_mode, poll_interval);
        match self {
            FeedKind::Sales => Arc::new(LiveFeed::<SaleEvent>::new(options, snapshot, events)),
            FeedKind::Telemetry => {
                Arc::new(LiveFeed::<TelemetryPulse>::new(options, snapshot, events))
            }
            FeedKind::GeoThreats => {
                Arc::new(LiveFeed::<GeoThreatMarker>::new(options, snapshot, events))
            }
            FeedKind::AuditAnomalies => {
                Arc::new(LiveFeed::<AuditAnomaly>::new(options, snapshot, events))
            }
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeedKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown feed '{}'", s))
    }
}
