use super::context::Context;
use super::timestamp::Timestamp;
use super::{Integrations, Properties};
use crate::error::FieldError;
use serde::{Deserialize, Serialize};

/// Records a screen view in a mobile application.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Screen {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub anonymous_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,

    #[serde(default, skip_serializing_if = "Timestamp::is_unset")]
    pub timestamp: Timestamp,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: Properties,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub integrations: Integrations,
}

impl Screen {
    pub(crate) fn validate(&self) -> Result<(), FieldError> {
        if self.user_id.is_empty() && self.anonymous_id.is_empty() {
            return Err(FieldError::new("Screen", "UserId", &self.user_id));
        }
        Ok(())
    }
}
