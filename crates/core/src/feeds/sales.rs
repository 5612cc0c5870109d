//! Live sales feed records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::MalformedEventError;
use crate::live::{LiveRecord, Payload};

/// A completed sale as shown in the live sales ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleEvent {
    pub id: String,
    pub tenant_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub customer_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl LiveRecord for SaleEvent {
    type Id = String;

    fn id(&self) -> &String {
        &self.id
    }

    fn from_payload(payload: &Value) -> Result<Self, MalformedEventError> {
        let p = Payload::new(payload)?;
        let id = p.id(Self::ID_FIELD)?;
        let amount = p.decimal("amount")?;
        if amount < Decimal::ZERO {
            return Err(MalformedEventError::InvalidValue {
                field: "amount".to_string(),
                reason: format!("negative amount {}", amount),
            });
        }
        Ok(Self {
            id,
            tenant_id: p.optional_string("tenantId")?,
            amount,
            currency: p
                .optional_string("currency")?
                .map(|c| c.to_uppercase())
                .unwrap_or_else(|| "USD".to_string()),
            customer_name: p.optional_string("customerName")?,
            created_at: p.optional_timestamp("createdAt")?,
        })
    }

    fn occurred_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}
