use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// # Record
///
/// One timestamped observation for one instrument. A record's identity is
/// its `raw_key`; the buffer never retains two records with the same key.
///
/// `sequence` is the integer found in the key's trailing token (0 when the
/// token is not an integer). Records order by `(timestamp, sequence)` so
/// observations sharing a timestamp keep the order their keys imply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    instrument: String,
    timestamp: DateTime<Utc>,
    sequence: i64,
    fields: Map<String, Value>,
    raw_key: String,
}

impl Record {
    /// Builds a record from its parts; `fields` is the payload minus `timestamp`.
    pub fn new(
        instrument: impl Into<String>,
        timestamp: DateTime<Utc>,
        sequence: i64,
        fields: Map<String, Value>,
        raw_key: impl Into<String>,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            timestamp,
            sequence,
            fields,
            raw_key: raw_key.into(),
        }
    }

    /// Instrument id taken from the key.
    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Normalised UTC timestamp from the payload.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Tie-breaker parsed from the key's trailing token.
    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    /// The store key this record was read from.
    pub fn raw_key(&self) -> &str {
        &self.raw_key
    }

    /// Every payload field except `timestamp`, verbatim.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// One payload field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Sort key used by the rolling buffer.
    pub fn order_key(&self) -> (DateTime<Utc>, i64) {
        (self.timestamp, self.sequence)
    }

    /// Names of the fields whose value is a JSON integer or float.
    ///
    /// Numeric strings such as `"1.5"` are not numeric.
    pub fn numeric_fields(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields
            .iter()
            .filter(|(_, value)| value.is_number())
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn numeric_fields_skip_strings_and_bools() {
        let record = Record::new(
            "EUR_USD",
            DateTime::from_timestamp_millis(1_000).unwrap(),
            1_000,
            fields(json!({
                "price": 1.1,
                "volume": 42,
                "signal": "BULLISH_CROSS",
                "quoted": "1.5",
                "flag": true,
                "missing": null
            })),
            "price_data:EUR_USD:1000",
        );

        let mut numeric: Vec<&str> = record.numeric_fields().collect();
        numeric.sort_unstable();
        assert_eq!(numeric, vec!["price", "volume"]);
        assert_eq!(record.field("signal"), Some(&json!("BULLISH_CROSS")));
    }

    #[test]
    fn order_key_breaks_timestamp_ties_with_sequence() {
        let ts = DateTime::from_timestamp_millis(5_000).unwrap();
        let a = Record::new("X", ts, 1, Map::new(), "p:X:1");
        let b = Record::new("X", ts, 2, Map::new(), "p:X:2");
        assert!(a.order_key() < b.order_key());
    }

    #[test]
    fn serializes_camel_case() {
        let record = Record::new(
            "USD_JPY",
            DateTime::from_timestamp_millis(1_500).unwrap(),
            1_500,
            fields(json!({"price": 150.0})),
            "price_data:USD_JPY:1500",
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["rawKey"], json!("price_data:USD_JPY:1500"));
        assert_eq!(value["fields"]["price"], json!(150.0));
        assert_eq!(value["instrument"], json!("USD_JPY"));
    }
}
