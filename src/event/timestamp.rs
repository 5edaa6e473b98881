use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{self, Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};

/// Event time carried by every message.
///
/// Wraps an optional UTC instant so that an unset timestamp can be told apart
/// from a caller-supplied one: unset values are filled in at enqueue time and
/// omitted from serialized output, while caller values survive serialization
/// and retries unchanged.
///
/// The wire form is ISO-8601 with at most millisecond precision and no
/// trailing zeros in the fraction (`2009-11-10T23:00:00Z`,
/// `2009-11-10T23:00:00.12Z`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp(Option<DateTime<Utc>>);

impl Timestamp {
    /// A timestamp that has not been set and will default at enqueue time.
    pub const UNSET: Timestamp = Timestamp(None);

    pub fn is_unset(&self) -> bool {
        self.0.is_none()
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        self.0
    }

    /// Fills in `now` if no value was set, otherwise keeps the caller value.
    pub(crate) fn or_default(&mut self, now: DateTime<Utc>) {
        if self.0.is_none() {
            self.0 = Some(now);
        }
    }

    /// Renders the wire representation, or an empty string when unset.
    pub fn format(&self) -> String {
        match self.0 {
            Some(t) => format_iso8601_millis(&t),
            None => String::new(),
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(t: DateTime<Utc>) -> Self {
        Timestamp(Some(t))
    }
}

/// Formats with millisecond precision, trimming trailing zeros from the
/// fractional part (and the whole fraction when it is zero).
fn format_iso8601_millis(t: &DateTime<Utc>) -> String {
    let mut s = t.to_rfc3339_opts(SecondsFormat::Millis, true);
    if let Some(dot) = s.rfind('.') {
        // "....mmmZ": strip trailing zeros of the fraction, then a bare dot.
        let z = s.len() - 1;
        let mut end = z;
        while end > dot && s.as_bytes()[end - 1] == b'0' {
            end -= 1;
        }
        if end == dot + 1 {
            end = dot;
        }
        s.replace_range(end..z, "");
    }
    s
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Some(ref t) => serializer.serialize_str(&format_iso8601_millis(t)),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        match value.as_deref() {
            None | Some("") => Ok(Timestamp::UNSET),
            Some(s) => parse_iso8601(s)
                .map(|t| Timestamp(Some(t)))
                .ok_or_else(|| de::Error::custom(format!("invalid timestamp {s:?}"))),
        }
    }
}

fn parse_iso8601(s: &str) -> Option<DateTime<Utc>> {
    // RFC 3339 first, then the historical offset form without a colon
    // ("2009-11-10T23:00:00.000-0700").
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_without_empty_fraction() {
        let t: Timestamp = Utc.with_ymd_and_hms(2009, 11, 10, 23, 0, 0).unwrap().into();
        assert_eq!(t.format(), "2009-11-10T23:00:00Z");
    }

    #[test]
    fn trims_trailing_fraction_zeros() {
        let base = Utc.with_ymd_and_hms(2009, 11, 10, 23, 0, 0).unwrap();
        let t: Timestamp = (base + chrono::Duration::milliseconds(120)).into();
        assert_eq!(t.format(), "2009-11-10T23:00:00.12Z");

        let t: Timestamp = (base + chrono::Duration::milliseconds(123)).into();
        assert_eq!(t.format(), "2009-11-10T23:00:00.123Z");
    }

    #[test]
    fn parses_both_offset_forms() {
        let expected = Utc.with_ymd_and_hms(2009, 11, 10, 23, 0, 0).unwrap();
        assert_eq!(parse_iso8601("2009-11-10T23:00:00Z"), Some(expected));
        assert_eq!(parse_iso8601("2009-11-10T16:00:00-0700"), Some(expected));
        assert_eq!(parse_iso8601("2009-11-10T16:00:00-07:00"), Some(expected));
        assert_eq!(parse_iso8601("not a time"), None);
    }
}
