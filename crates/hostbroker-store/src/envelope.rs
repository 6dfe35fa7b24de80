use serde::{Deserialize, Serialize};

/// Current schema version stamped on every freshly saved aggregate payload.
/// Bump when a breaking change to [`Request`](hostbroker_domain::Request),
/// [`Machine`](hostbroker_domain::Machine), or
/// [`Template`](hostbroker_domain::Template) lands; readers fall back to
/// `1` via `#[serde(default)]` so old rows still deserialize.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    1
}

/// Generic on-disk/on-wire wrapper carrying a schema version alongside the
/// aggregate payload, so every store backend persists the same shape
/// regardless of whether the backing format is a redb table or a Postgres
/// JSONB column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn new(payload: T) -> Self {
        Envelope { schema_version: CURRENT_SCHEMA_VERSION, payload }
    }

    pub fn into_payload(self) -> T {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_schema_version_defaults_to_one() {
        let json = r#"{"payload": 42}"#;
        let env: Envelope<i32> = serde_json::from_str(json).unwrap();
        assert_eq!(env.schema_version, 1);
        assert_eq!(env.payload, 42);
    }
}
