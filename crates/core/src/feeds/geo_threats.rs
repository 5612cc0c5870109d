//! Geo-threat map markers.
//!
//! Coordinates are range-checked here so a bad row never reaches the map
//! geometry.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::MalformedEventError;
use crate::live::{LiveRecord, Payload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl FromStr for ThreatSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(ThreatSeverity::Low),
            "medium" => Ok(ThreatSeverity::Medium),
            "high" => Ok(ThreatSeverity::High),
            "critical" => Ok(ThreatSeverity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

impl fmt::Display for ThreatSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ThreatSeverity::Low => "low",
            ThreatSeverity::Medium => "medium",
            ThreatSeverity::High => "high",
            ThreatSeverity::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoThreatMarker {
    pub id: String,
    pub tenant_id: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub severity: ThreatSeverity,
    pub label: Option<String>,
    pub detected_at: Option<DateTime<Utc>>,
}

impl LiveRecord for GeoThreatMarker {
    type Id = String;

    fn id(&self) -> &String {
        &self.id
    }

    fn from_payload(payload: &Value) -> Result<Self, MalformedEventError> {
        let p = Payload::new(payload)?;
        let id = p.id(Self::ID_FIELD)?;
        let latitude = p.number_in("latitude", -90.0..=90.0)?;
        let longitude = p.number_in("longitude", -180.0..=180.0)?;
        let severity = match p.optional_string("severity")? {
            Some(raw) => raw
                .parse()
                .map_err(|reason| MalformedEventError::InvalidValue {
                    field: "severity".to_string(),
                    reason,
                })?,
            None => ThreatSeverity::Medium,
        };
        Ok(Self {
            id,
            tenant_id: p.optional_string("tenantId")?,
            latitude,
            longitude,
            severity,
            label: p.optional_string("label")?,
            detected_at: p.optional_timestamp("detectedAt")?,
        })
    }

    fn occurred_at(&self) -> Option<DateTime<Utc>> {
        self.detected_at
    }
}
