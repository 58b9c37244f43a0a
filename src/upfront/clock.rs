//! UTC timestamps with second resolution.
//!
//! Every timestamp leaves this service as RFC 3339 with a `Z` suffix and no
//! fractional part, so string order equals chronological order.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

/// Current time truncated to whole seconds.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

#[must_use]
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a timestamp, accepting only the canonical encoding.
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(value).ok()?.with_timezone(&Utc);
    (format_timestamp(&parsed) == value).then_some(parsed)
}

/// serde adapter for `DateTime<Utc>` fields using the canonical encoding.
pub mod rfc3339_seconds {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    /// # Errors
    /// Never fails for a well-formed timestamp.
    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(at))
    }

    /// # Errors
    /// Returns an error when the value is not a canonical UTC second-resolution timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let value = String::deserialize(deserializer)?;
        super::parse_timestamp(&value)
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {value}")))
    }
}

/// Same as [`rfc3339_seconds`] for optional fields.
pub mod rfc3339_seconds_option {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    /// # Errors
    /// Never fails for a well-formed timestamp.
    pub fn serialize<S: Serializer>(
        at: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match at {
            Some(at) => serializer.serialize_some(&super::format_timestamp(at)),
            None => serializer.serialize_none(),
        }
    }

    /// # Errors
    /// Returns an error when a present value is not a canonical timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|value| {
                super::parse_timestamp(&value)
                    .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {value}")))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn format_is_second_resolution_utc() {
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 7, 5, 1).single();
        assert_eq!(
            at.map(|at| format_timestamp(&at)).as_deref(),
            Some("2026-03-09T07:05:01Z")
        );
    }

    #[test]
    fn string_order_matches_time_order() {
        let earlier = now();
        let later = earlier + Duration::seconds(1);
        assert!(format_timestamp(&earlier) < format_timestamp(&later));
    }

    #[test]
    fn parse_rejects_non_canonical() {
        assert!(parse_timestamp("2026-03-09T07:05:01Z").is_some());
        assert!(parse_timestamp("2026-03-09T07:05:01.250Z").is_none());
        assert!(parse_timestamp("2026-03-09T08:05:01+01:00").is_none());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn now_has_no_subseconds() {
        assert_eq!(now().timestamp_subsec_nanos(), 0);
    }
}
