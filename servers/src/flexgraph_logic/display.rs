//! Display tables handed to the renderer untouched.
//!
//! Each table is an optional JSON file in the display directory. A missing
//! or invalid file yields an empty table and a warning; the service never
//! refuses to start over styling.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

const ALLOWED_MODES: [&str; 8] = [
    "lines",
    "markers",
    "lines+markers",
    "none",
    "text",
    "lines+text",
    "markers+text",
    "lines+markers+text",
];
const FALLBACK_MODE: &str = "lines+markers";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayTables {
    /// field -> `y` or `y2`
    pub axes: BTreeMap<String, String>,
    /// field -> plot mode
    pub modes: BTreeMap<String, String>,
    pub markers: BTreeMap<String, Value>,
    pub lines: BTreeMap<String, Value>,
    /// Field order for hover tooltips.
    pub tooltip_fields: Vec<String>,
}

impl DisplayTables {
    pub fn load(dir: &Path) -> DisplayTables {
        let tables = DisplayTables {
            axes: read_object(dir, "axes.json")
                .map(|obj| {
                    obj.into_iter()
                        .map(|(field, axis)| {
                            let axis = match axis.as_str() {
                                Some("y2") => "y2",
                                _ => "y",
                            };
                            (field, axis.to_string())
                        })
                        .collect()
                })
                .unwrap_or_default(),
            modes: read_object(dir, "modes.json")
                .map(|obj| {
                    obj.into_iter()
                        .map(|(field, mode)| (field, coerce_mode(&mode)))
                        .collect()
                })
                .unwrap_or_default(),
            markers: read_object(dir, "markers.json").map(objects_only).unwrap_or_default(),
            lines: read_object(dir, "lines.json").map(objects_only).unwrap_or_default(),
            tooltip_fields: read_object(dir, "tooltip.json")
                .and_then(|mut obj| match obj.remove("fields") {
                    Some(Value::Array(fields)) => Some(
                        fields
                            .into_iter()
                            .map(|f| match f {
                                Value::String(s) => s,
                                other => other.to_string(),
                            })
                            .collect(),
                    ),
                    _ => None,
                })
                .unwrap_or_default(),
        };
        debug!(
            axes = tables.axes.len(),
            modes = tables.modes.len(),
            tooltip_fields = tables.tooltip_fields.len(),
            "Display tables loaded"
        );
        tables
    }
}

fn coerce_mode(mode: &Value) -> String {
    match mode.as_str() {
        Some(m) if ALLOWED_MODES.contains(&m) => m.to_string(),
        _ => FALLBACK_MODE.to_string(),
    }
}

fn objects_only(obj: Map<String, Value>) -> BTreeMap<String, Value> {
    obj.into_iter().filter(|(_, v)| v.is_object()).collect()
}

fn read_object(dir: &Path, name: &str) -> Option<Map<String, Value>> {
    let path = dir.join(name);
    if !path.exists() {
        debug!(path = %path.display(), "Display table not present");
        return None;
    }
    let parsed = fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|raw| serde_json::from_str::<Value>(&raw).map_err(|e| e.to_string()));
    match parsed {
        Ok(Value::Object(obj)) => Some(obj),
        Ok(_) => {
            warn!(path = %path.display(), "Display table is not a JSON object, ignoring");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to load display table, ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loads_and_sanitises_tables() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, value: Value| fs::write(dir.path().join(name), value.to_string()).unwrap();
        write("axes.json", json!({"price": "y", "rsi": "y2", "odd": "z"}));
        write("modes.json", json!({"price": "lines", "signal": "sparkles", "n": 3}));
        write("markers.json", json!({"price": {"size": 4}, "bad": 7}));
        write("tooltip.json", json!({"fields": ["timestamp", "price"]}));
        fs::write(dir.path().join("lines.json"), "{ broken").unwrap();

        let tables = DisplayTables::load(dir.path());
        assert_eq!(tables.axes["rsi"], "y2");
        assert_eq!(tables.axes["odd"], "y");
        assert_eq!(tables.modes["price"], "lines");
        assert_eq!(tables.modes["signal"], "lines+markers");
        assert_eq!(tables.modes["n"], "lines+markers");
        assert_eq!(tables.markers.len(), 1);
        assert!(tables.lines.is_empty());
        assert_eq!(tables.tooltip_fields, vec!["timestamp", "price"]);
    }

    #[test]
    fn missing_directory_gives_empty_tables() {
        let tables = DisplayTables::load(Path::new("/no/such/display/dir"));
        assert_eq!(tables, DisplayTables::default());
    }
}
