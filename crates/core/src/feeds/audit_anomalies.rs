//! Audit anomaly register records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::MalformedEventError;
use crate::live::{LiveRecord, Payload};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditAnomaly {
    pub id: String,
    pub tenant_id: Option<String>,
    /// Audited table the anomaly was raised on.
    pub table_name: String,
    pub action: String,
    pub actor: Option<String>,
    /// 0 (benign) to 100 (certain).
    pub risk_score: f64,
    pub detected_at: Option<DateTime<Utc>>,
}

impl AuditAnomaly {
    pub fn is_high_risk(&self) -> bool {
        self.risk_score >= 75.0
    }
}

impl LiveRecord for AuditAnomaly {
    type Id = String;

    fn id(&self) -> &String {
        &self.id
    }

    fn from_payload(payload: &Value) -> Result<Self, MalformedEventError> {
        let p = Payload::new(payload)?;
        Ok(Self {
            id: p.id(Self::ID_FIELD)?,
            tenant_id: p.optional_string("tenantId")?,
            table_name: p.string("tableName")?,
            action: p.string("action")?,
            actor: p.optional_string("actor")?,
            risk_score: p.number_in("riskScore", 0.0..=100.0)?,
            detected_at: p.optional_timestamp("detectedAt")?,
        })
    }

    fn occurred_at(&self) -> Option<DateTime<Utc>> {
        self.detected_at
    }
}
