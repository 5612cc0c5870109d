//! Telemetry pulse records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::MalformedEventError;
use crate::live::{LiveRecord, Payload};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPulse {
    pub id: String,
    pub tenant_id: Option<String>,
    pub source: String,
    pub metric: String,
    pub value: f64,
    pub recorded_at: Option<DateTime<Utc>>,
}

impl LiveRecord for TelemetryPulse {
    type Id = String;

    fn id(&self) -> &String {
        &self.id
    }

    fn from_payload(payload: &Value) -> Result<Self, MalformedEventError> {
        let p = Payload::new(payload)?;
        Ok(Self {
            id: p.id(Self::ID_FIELD)?,
            tenant_id: p.optional_string("tenantId")?,
            source: p.string("source")?,
            metric: p.string("metric")?,
            value: p.number("value")?,
            recorded_at: p.optional_timestamp("recordedAt")?,
        })
    }

    fn occurred_at(&self) -> Option<DateTime<Utc>> {
        self.recorded_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_pulse() {
        let pulse = TelemetryPulse::from_payload(&json!({
            "id": 77,
            "source": "pos-terminal-4",
            "metric": "latency_ms",
            "value": "12.5",
            "recordedAt": 1767225600000i64
        }))
        .unwrap();
        assert_eq!(pulse.id, "77");
        assert_eq!(pulse.value, 12.5);
        assert!(pulse.recorded_at.is_some());
    }

    #[test]
    fn test_rejects_missing_value() {
        let err = TelemetryPulse::from_payload(&json!({
            "id": 1, "source": "a", "metric": "b"
        }))
        .unwrap_err();
        assert_eq!(
            err,
            MalformedEventError::MissingField {
                field: "value".to_string()
            }
        );
    }
}
