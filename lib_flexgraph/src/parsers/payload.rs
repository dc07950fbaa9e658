use serde_json::Value;

use crate::error::ParseError;
use crate::model::{parse_timestamp, Record};
use crate::parsers::KeyLayout;

const TIMESTAMP_FIELD: &str = "timestamp";

/// # Payload Parser
///
/// Stateless conversion of `(key, raw value)` into a [`Record`]. Unknown
/// fields pass through untouched; only `timestamp` is interpreted.
#[derive(Debug, Clone)]
pub struct PayloadParser {
    layout: KeyLayout,
}

impl PayloadParser {
    /// A parser that splits keys with `layout`.
    pub fn new(layout: KeyLayout) -> Self {
        Self { layout }
    }

    /// The key layout in use.
    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    /// Turns one store entry into a [`Record`].
    ///
    /// The key must fit the layout, the value must be a JSON object with a
    /// `timestamp` field in one of the accepted forms. Every other field is
    /// kept as is.
    pub fn parse(&self, key: &str, raw: &[u8]) -> Result<Record, ParseError> {
        let parts = self.layout.split(key).map_err(|reason| ParseError::MalformedKey {
            key: key.to_string(),
            reason,
        })?;

        let decoded: Value =
            serde_json::from_slice(raw).map_err(|e| ParseError::MalformedPayload {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        let mut fields = match decoded {
            Value::Object(map) => map,
            other => {
                return Err(ParseError::MalformedPayload {
                    key: key.to_string(),
                    reason: format!("expected a JSON object, found {}", json_kind(&other)),
                })
            }
        };

        let raw_ts = fields
            .remove(TIMESTAMP_FIELD)
            .ok_or_else(|| ParseError::MalformedPayload {
                key: key.to_string(),
                reason: format!("missing required field '{}'", TIMESTAMP_FIELD),
            })?;

        let timestamp = parse_timestamp(&raw_ts).ok_or_else(|| ParseError::InvalidTimestamp {
            key: key.to_string(),
            value: raw_ts.to_string(),
        })?;

        let sequence = parts.token.parse::<i64>().unwrap_or(0);

        Ok(Record::new(parts.instrument, timestamp, sequence, fields, key))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use serde_json::json;

    fn parser() -> PayloadParser {
        PayloadParser::new(KeyLayout::from_pattern("price_data:*:*").unwrap())
    }

    #[test]
    fn parses_instrument_timestamp_and_fields() {
        let raw = br#"{"timestamp": 2000, "price": 1.2, "signal": "BULLISH_CROSS", "extra": [1, 2]}"#;
        let record = parser().parse("price_data:EUR_USD:2000", raw).unwrap();

        assert_eq!(record.instrument(), "EUR_USD");
        assert_eq!(record.timestamp(), DateTime::from_timestamp_millis(2000).unwrap());
        assert_eq!(record.sequence(), 2000);
        assert_eq!(record.raw_key(), "price_data:EUR_USD:2000");
        assert!(record.field(TIMESTAMP_FIELD).is_none());
        assert_eq!(record.field("extra"), Some(&json!([1, 2])));
        assert_eq!(record.numeric_fields().collect::<Vec<_>>(), vec!["price"]);
    }

    #[test]
    fn iso_timestamp_and_non_integer_token() {
        let raw = br#"{"timestamp": "2025-08-25 11:52:32.755", "price": 150.5}"#;
        let record = parser()
            .parse("price_data:USD_JPY:2025-08-25T11:52:32", raw)
            .unwrap();
        assert_eq!(record.instrument(), "USD_JPY");
        assert_eq!(record.sequence(), 0);
        assert_eq!(record.timestamp().timestamp_subsec_millis(), 755);
    }

    #[test]
    fn malformed_key() {
        let err = parser().parse("price_data:EUR_USD", b"{}").unwrap_err();
        assert!(matches!(err, ParseError::MalformedKey { .. }));
        assert_eq!(err.kind(), "malformed_key");
    }

    #[test]
    fn malformed_payloads() {
        let p = parser();
        let not_json = p.parse("price_data:EUR_USD:1", b"not json").unwrap_err();
        assert!(matches!(not_json, ParseError::MalformedPayload { .. }));

        let not_object = p.parse("price_data:EUR_USD:1", b"[1,2]").unwrap_err();
        assert!(matches!(not_object, ParseError::MalformedPayload { .. }));

        let missing_ts = p.parse("price_data:EUR_USD:1", br#"{"price": 1}"#).unwrap_err();
        assert!(matches!(missing_ts, ParseError::MalformedPayload { .. }));
    }

    #[test]
    fn invalid_timestamp() {
        let err = parser()
            .parse("price_data:EUR_USD:1", br#"{"timestamp": "soon", "price": 1}"#)
            .unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidTimestamp {
                key: "price_data:EUR_USD:1".to_string(),
                value: "\"soon\"".to_string(),
            }
        );
    }
}
