//! Common metadata for all documents

use bson::DateTime;
use serde::{Deserialize, Serialize};

/// Write timestamps kept next to every document
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,
}

impl Metadata {
    pub fn at(
        created_at: chrono::DateTime<chrono::Utc>,
        updated_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            created_at: Some(DateTime::from_chrono(created_at)),
            updated_at: Some(DateTime::from_chrono(updated_at)),
        }
    }

    pub fn now() -> Self {
        Self {
            created_at: Some(DateTime::now()),
            updated_at: Some(DateTime::now()),
        }
    }

    pub fn created(&self) -> chrono::DateTime<chrono::Utc> {
        self.created_at
            .map(|d| d.to_chrono())
            .unwrap_or_else(chrono::Utc::now)
    }

    pub fn updated(&self) -> chrono::DateTime<chrono::Utc> {
        self.updated_at
            .or(self.created_at)
            .map(|d| d.to_chrono())
            .unwrap_or_else(chrono::Utc::now)
    }
}

/// Parse a stored uuid string
pub(crate) fn parse_id(raw: &str, what: &str) -> Result<uuid::Uuid, crate::types::GatekeeperError> {
    uuid::Uuid::parse_str(raw).map_err(|_| {
        crate::types::GatekeeperError::Database(format!("corrupt {what} id '{raw}'"))
    })
}

/// Parse a stored enum value
pub(crate) fn parse_field<T: std::str::FromStr>(
    raw: &str,
    what: &str,
) -> Result<T, crate::types::GatekeeperError> {
    raw.parse()
        .map_err(|_| crate::types::GatekeeperError::Database(format!("corrupt {what} '{raw}'")))
}
