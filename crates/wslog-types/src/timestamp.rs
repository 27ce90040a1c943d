//! Serde helpers for timestamps written as `YYYY-MM-DD HH:MM:SS`.
//!
//! Use with `#[serde(with = "wslog_types::timestamp")]`, or the
//! [`option`] submodule for `Option<PrimitiveDateTime>`.

use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serializer};
use time::PrimitiveDateTime;

use crate::TIMESTAMP_FORMAT;

/// Serialize a timestamp as text.
pub fn serialize<S: Serializer>(ts: &PrimitiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    let text = ts.format(TIMESTAMP_FORMAT).map_err(S::Error::custom)?;
    serializer.serialize_str(&text)
}

/// Parse a timestamp from text.
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PrimitiveDateTime, D::Error> {
    let text = String::deserialize(deserializer)?;
    PrimitiveDateTime::parse(&text, TIMESTAMP_FORMAT).map_err(D::Error::custom)
}

/// The same format for optional timestamps.
pub mod option {
    use super::*;

    /// Serialize an optional timestamp.
    pub fn serialize<S: Serializer>(
        ts: &Option<PrimitiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => super::serialize(ts, serializer),
            None => serializer.serialize_none(),
        }
    }

    /// Parse an optional timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<PrimitiveDateTime>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|text| PrimitiveDateTime::parse(&text, TIMESTAMP_FORMAT).map_err(D::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use time::PrimitiveDateTime;
    use time::macros::datetime;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Stamped {
        #[serde(with = "crate::timestamp")]
        at: PrimitiveDateTime,
        #[serde(with = "crate::timestamp::option", default)]
        seen: Option<PrimitiveDateTime>,
    }

    #[test]
    fn test_text_format() {
        let value = Stamped {
            at: datetime!(2024-06-01 09:05:00),
            seen: None,
        };
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"at":"2024-06-01 09:05:00","seen":null}"#);
        assert_eq!(serde_json::from_str::<Stamped>(&json).unwrap(), value);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(serde_json::from_str::<Stamped>(r#"{"at":"yesterday"}"#).is_err());
    }
}
