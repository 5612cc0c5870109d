//! The record contract shared by every live feed.

use std::fmt::Debug;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::errors::MalformedEventError;

/// A strongly-typed row that can appear in a [`BoundedEventList`].
///
/// `from_payload` is the only way untyped source data becomes a record, so
/// anything that reaches a list has already passed validation.
///
/// [`BoundedEventList`]: super::BoundedEventList
pub trait LiveRecord: Clone + Debug + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// Payload field carrying the identity.
    const ID_FIELD: &'static str = "id";

    fn id(&self) -> &Self::Id;

    fn from_payload(payload: &Value) -> Result<Self, MalformedEventError>;

    /// Authoritative event time, when the row carries one.
    fn occurred_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}
