//! The session record carried through one request.

use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Severity of the pending flash message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    Info,
    Error,
    #[default]
    #[serde(other)]
    None,
}

/// Session data plus metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub data: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    /// Last persist time; `None` until the record is first saved.
    pub updated_at: Option<DateTime<Utc>>,
    pub flash_level: FlashLevel,
    pub flash_message: String,
}

impl SessionRecord {
    /// A fresh, empty record created now.
    pub fn new() -> Self {
        Self::created_at(Utc::now())
    }

    /// A fresh, empty record with an explicit creation time.
    pub fn created_at(created_at: DateTime<Utc>) -> Self {
        Self {
            data: BTreeMap::new(),
            created_at,
            updated_at: None,
            flash_level: FlashLevel::None,
            flash_message: String::new(),
        }
    }

    pub fn has_flash(&self) -> bool {
        !self.flash_message.is_empty()
    }
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self::new()
    }
}
