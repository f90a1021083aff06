use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeMap;

/// One `{Time, <channel>: value}` record of a saved collection
pub type CollectionRecord = BTreeMap<String, Value>;

// Database entity models
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SavedCollection {
    pub id: i64,
    pub group_name: String,
    /// Channel column the values were taken from
    pub energy_type: String,
    pub date: String,
    pub note: Option<String>,
    pub saved_at: DateTime<Utc>,
    pub values: Json<Vec<CollectionRecord>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCollection {
    pub group_name: String,
    pub energy_type: String,
    pub date: String,
    pub note: Option<String>,
    pub values: Vec<CollectionRecord>,
}
