use super::{Alias, Event, Group, Identify, Page, Screen, Track};
use crate::error::{Error, FieldError};
use serde_json::{Map, Value};

/// A free-form message for callers that build events dynamically: a JSON map
/// carrying a `type` key naming one of the six variants.
///
/// Validation projects the known identity keys onto the matching typed
/// variant and delegates to its rules, so the required-field matrix is the
/// same as for typed construction. Conversion to [`Event`] goes through the
/// regular deserializer; keys that the variant does not declare are dropped.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenericEvent(pub Map<String, Value>);

impl GenericEvent {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    fn get_str(&self, key: &str) -> String {
        match self.0.get(key) {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        }
    }

    /// Checks the required fields of the variant named by `type`.
    pub fn validate(&self) -> Result<(), FieldError> {
        let kind = self.get_str("type");
        match kind.as_str() {
            "alias" => Alias {
                user_id: self.get_str("userId"),
                previous_id: self.get_str("previousId"),
                ..Alias::default()
            }
            .validate(),
            "group" => Group {
                user_id: self.get_str("userId"),
                anonymous_id: self.get_str("anonymousId"),
                group_id: self.get_str("groupId"),
                ..Group::default()
            }
            .validate(),
            "identify" => Identify {
                user_id: self.get_str("userId"),
                anonymous_id: self.get_str("anonymousId"),
                ..Identify::default()
            }
            .validate(),
            "page" => Page {
                user_id: self.get_str("userId"),
                anonymous_id: self.get_str("anonymousId"),
                ..Page::default()
            }
            .validate(),
            "screen" => Screen {
                user_id: self.get_str("userId"),
                anonymous_id: self.get_str("anonymousId"),
                ..Screen::default()
            }
            .validate(),
            "track" => Track {
                user_id: self.get_str("userId"),
                anonymous_id: self.get_str("anonymousId"),
                event: self.get_str("event"),
                ..Track::default()
            }
            .validate(),
            _ => Err(FieldError::new("Event", "Type", kind)),
        }
    }
}

impl From<Map<String, Value>> for GenericEvent {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl TryFrom<GenericEvent> for Event {
    type Error = Error;

    fn try_from(generic: GenericEvent) -> Result<Self, Error> {
        generic.validate()?;
        let event = serde_json::from_value(Value::Object(generic.0))?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn generic(v: Value) -> GenericEvent {
        match v {
            Value::Object(m) => GenericEvent(m),
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn unknown_type_is_a_field_error() {
        let err = generic(json!({"type": "reticulate"})).validate().unwrap_err();
        assert_eq!(err, FieldError::new("Event", "Type", "reticulate"));

        let err = generic(json!({"userId": "1"})).validate().unwrap_err();
        assert_eq!(err, FieldError::new("Event", "Type", ""));
    }

    #[test]
    fn delegates_to_the_variant_rules() {
        let err = generic(json!({"type": "alias", "userId": "1"}))
            .validate()
            .unwrap_err();
        assert_eq!(err, FieldError::new("Alias", "PreviousId", ""));

        assert!(generic(json!({"type": "track", "event": "Download", "userId": "1"}))
            .validate()
            .is_ok());
    }

    #[test]
    fn converts_into_the_typed_variant() {
        let event = Event::try_from(generic(json!({
            "type": "track",
            "event": "Download",
            "userId": "123456",
            "properties": {"platform": "osx"}
        })))
        .unwrap();

        match event {
            Event::Track(track) => {
                assert_eq!(track.event, "Download");
                assert_eq!(track.user_id, "123456");
                assert_eq!(track.properties["platform"], json!("osx"));
            }
            other => panic!("expected a track event, got {other:?}"),
        }
    }
}
