//! Durable user preferences and the layered merge used to build them.
//!
//! Layers are JSON objects applied key by key over a typed base: a key is
//! taken only when the result still decodes, so one bad field in a stored
//! document never discards the rest of it.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

pub const DEFAULT_FORGE_PORT: u16 = 3003;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Position {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    MiddleLeft,
    MiddleRight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub position: Position,
    /// Whether the command socket to the external tool should be connected.
    pub connect: bool,
    /// Port of the external tool's command socket.
    pub port: u16,
    pub expansion_level: u32,
    pub active_tab: String,
    pub route_boundary_gradient: String,
    pub height: u32,
    pub min_height: u32,
    pub max_height: u32,
    pub hide_until_hover: bool,
    pub require_url_flag_to_show: bool,
    pub url_flag: String,
    pub default_open: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            position: Position::BottomRight,
            connect: false,
            port: DEFAULT_FORGE_PORT,
            expansion_level: 0,
            active_tab: "page".to_string(),
            route_boundary_gradient: "watermelon".to_string(),
            height: 400,
            min_height: 200,
            max_height: 600,
            hide_until_hover: false,
            require_url_flag_to_show: false,
            url_flag: "rdt".to_string(),
            default_open: false,
        }
    }
}

impl Settings {
    /// Shallow merge: every recognised key in `patch` replaces the current
    /// value. Unknown keys and values of the wrong type are ignored.
    pub fn merged(&self, patch: &Map<String, Value>) -> Settings {
        apply_layer(self, patch)
    }

    /// Copies only the `fields` named from `source`.
    pub fn with_pinned(&self, source: &Map<String, Value>, fields: &[String]) -> Settings {
        let pinned: Map<String, Value> = fields
            .iter()
            .filter_map(|field| source.get(field).map(|value| (field.clone(), value.clone())))
            .collect();
        self.merged(&pinned)
    }
}

/// Applies each key of `layer` over `base`. Null values are skipped.
pub(crate) fn apply_layer<T>(base: &T, layer: &Map<String, Value>) -> T
where
    T: Serialize + DeserializeOwned + Clone,
{
    let Ok(Value::Object(mut current)) = serde_json::to_value(base) else {
        return base.clone();
    };
    let mut result = base.clone();
    for (key, value) in layer {
        if value.is_null() || !current.contains_key(key) {
            continue;
        }
        let previous = current.insert(key.clone(), value.clone());
        match serde_json::from_value::<T>(Value::Object(current.clone())) {
            Ok(decoded) => result = decoded,
            Err(err) => {
                debug!(event = "layer_key_rejected", key = %key, error = %err);
                if let Some(previous) = previous {
                    current.insert(key.clone(), previous);
                }
            }
        }
    }
    result
}
