use super::context::Context;
use super::timestamp::Timestamp;
use super::Integrations;
use crate::error::FieldError;
use serde::{Deserialize, Serialize};

/// Merges two user identities, linking `previous_id` to `user_id`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alias {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message_id: String,

    /// Identity being retired. Always serialized, even when empty.
    pub previous_id: String,

    /// Identity taking over. Always serialized, even when empty.
    pub user_id: String,

    #[serde(default, skip_serializing_if = "Timestamp::is_unset")]
    pub timestamp: Timestamp,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub integrations: Integrations,
}

impl Alias {
    pub(crate) fn validate(&self) -> Result<(), FieldError> {
        if self.user_id.is_empty() {
            return Err(FieldError::new("Alias", "UserId", &self.user_id));
        }
        if self.previous_id.is_empty() {
            return Err(FieldError::new("Alias", "PreviousId", &self.previous_id));
        }
        Ok(())
    }
}
