use serde::{Deserialize, Serialize};

/// Resumable sync state carried in the checkpoint's `state_json` blob.
///
/// The cursor is a monotonically increasing progress marker; unknown keys are
/// preserved verbatim so future connector versions can extend the state
/// without breaking older checkpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub cursor: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SyncState {
    /// Restore state from the optional request blob. Absent, empty, or
    /// malformed JSON falls back to the initial state: a source connector
    /// must never fail a sync on benign state corruption.
    pub fn restore(state_json: Option<&str>) -> Self {
        let raw = match state_json {
            Some(raw) if !raw.trim().is_empty() => raw,
            _ => return Self::default(),
        };
        match serde_json::from_str(raw) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(error = %err, "malformed sync state, restarting from cursor 0");
                Self::default()
            }
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"cursor":0}"#.to_string())
    }
}
