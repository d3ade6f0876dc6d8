//! Serde helpers for flexible deserialization of inbound frames.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, DeserializeOwned, Visitor};

use crate::Timestamp;
use crate::ws::error::WsError;

/// A `serde_as` type that deserializes integer milliseconds, fractional milliseconds,
/// numeric strings or RFC 3339 strings as a millisecond [`Timestamp`].
///
/// Always serializes as integer milliseconds.
pub struct TimestampMillis;

impl<'de> serde_with::DeserializeAs<'de, Timestamp> for TimestampMillis {
    fn deserialize_as<D>(deserializer: D) -> std::result::Result<Timestamp, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct MillisVisitor;

        impl Visitor<'_> for MillisVisitor {
            type Value = Timestamp;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("milliseconds since the epoch or an RFC 3339 timestamp")
            }

            fn visit_i64<E>(self, v: i64) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v)
            }

            fn visit_u64<E>(self, v: u64) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Timestamp::try_from(v).map_err(|_e| E::custom("timestamp out of range"))
            }

            #[expect(
                clippy::cast_possible_truncation,
                reason = "Sub-millisecond precision is intentionally discarded"
            )]
            fn visit_f64<E>(self, v: f64) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                if v.is_finite() {
                    Ok(v.trunc() as Timestamp)
                } else {
                    Err(E::custom("timestamp is not a finite number"))
                }
            }

            fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                if let Ok(millis) = v.parse::<Timestamp>() {
                    return Ok(millis);
                }
                DateTime::parse_from_rfc3339(v)
                    .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
                    .map_err(E::custom)
            }
        }

        deserializer.deserialize_any(MillisVisitor)
    }
}

impl serde_with::SerializeAs<Timestamp> for TimestampMillis {
    fn serialize_as<S>(source: &Timestamp, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i64(*source)
    }
}

/// A `serde_as` type that deserializes strings or integers as `String`.
///
/// Task ids arrive as either, depending on the service version.
pub struct StringFromAny;

impl<'de> serde_with::DeserializeAs<'de, String> for StringFromAny {
    fn deserialize_as<D>(deserializer: D) -> std::result::Result<String, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct StringOrNumberVisitor;

        impl Visitor<'_> for StringOrNumberVisitor {
            type Value = String;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("string or integer")
            }

            fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v.to_owned())
            }

            fn visit_string<E>(self, v: String) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v)
            }

            fn visit_i64<E>(self, v: i64) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v.to_string())
            }

            fn visit_u64<E>(self, v: u64) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v.to_string())
            }
        }

        deserializer.deserialize_any(StringOrNumberVisitor)
    }
}

impl serde_with::SerializeAs<String> for StringFromAny {
    fn serialize_as<S>(source: &String, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(source)
    }
}

/// Deserialize JSON bytes, reporting the path of the first offending value on failure.
pub(crate) fn from_slice_with_path<T: DeserializeOwned>(
    bytes: &[u8],
) -> std::result::Result<T, WsError> {
    let jd = &mut serde_json::Deserializer::from_slice(bytes);
    serde_path_to_error::deserialize(jd).map_err(|e| {
        let path = e.path().to_string();
        WsError::MessageParse {
            path,
            source: e.into_inner(),
        }
    })
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_with::serde_as;

    use super::*;

    #[serde_as]
    #[derive(Debug, Deserialize, Serialize)]
    struct Stamped {
        #[serde_as(as = "TimestampMillis")]
        timestamp: Timestamp,
    }

    fn parse(json: &str) -> Timestamp {
        serde_json::from_str::<Stamped>(json).unwrap().timestamp
    }

    #[test]
    fn accepts_integer_millis() {
        assert_eq!(parse(r#"{"timestamp": 1}"#), 1);
        assert_eq!(parse(r#"{"timestamp": 1753314064237}"#), 1_753_314_064_237);
    }

    #[test]
    fn accepts_fractional_and_string_millis() {
        assert_eq!(parse(r#"{"timestamp": 1753314064237.9}"#), 1_753_314_064_237);
        assert_eq!(parse(r#"{"timestamp": "1753314064237"}"#), 1_753_314_064_237);
    }

    #[test]
    fn accepts_rfc3339() {
        assert_eq!(
            parse(r#"{"timestamp": "2025-07-25T14:49:35.801Z"}"#),
            1_753_454_975_801
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(serde_json::from_str::<Stamped>(r#"{"timestamp": "yesterday"}"#).is_err());
        assert!(serde_json::from_str::<Stamped>(r#"{"timestamp": true}"#).is_err());
    }

    #[test]
    fn serializes_as_integer() {
        let json = serde_json::to_string(&Stamped { timestamp: 42 }).unwrap();

        assert_eq!(json, r#"{"timestamp":42}"#);
    }

    #[serde_as]
    #[derive(Debug, Deserialize)]
    struct Identified {
        #[serde_as(as = "StringFromAny")]
        id: String,
    }

    #[test]
    fn string_from_any_accepts_numbers() {
        let numeric: Identified = serde_json::from_str(r#"{"id": 42}"#).unwrap();
        let text: Identified = serde_json::from_str(r#"{"id": "t-42"}"#).unwrap();

        assert_eq!(numeric.id, "42");
        assert_eq!(text.id, "t-42");
    }

    #[test]
    fn parse_error_carries_path() {
        let err = from_slice_with_path::<Stamped>(br#"{"timestamp": "yesterday"}"#).unwrap_err();

        match err {
            WsError::MessageParse { path, .. } => assert_eq!(path, "timestamp"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
