use serde::{Deserialize, Serialize};

/// Latest known status of one run.
///
/// Every field starts unset. Unset fields are omitted from the JSON form so a
/// freshly registered run serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunState {
    /// Parse a client's last-seen snapshot from a raw request body.
    ///
    /// An empty or malformed body means "no snapshot" rather than an error.
    pub fn from_body(body: &[u8]) -> Option<RunState> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        serde_json::from_slice(body).ok()
    }

    pub fn is_empty(&self) -> bool {
        self.progress.is_none() && self.message.is_none() && self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state_serializes_empty() {
        let state = RunState::default();
        assert!(state.is_empty());
        assert_eq!(serde_json::to_string(&state).unwrap(), "{}");
    }

    #[test]
    fn test_partial_state_omits_unset_fields() {
        let state = RunState {
            progress: Some(42.5),
            message: Some("Rendering".into()),
            error: None,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["progress"], 42.5);
        assert_eq!(json["message"], "Rendering");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_from_body_accepts_snapshot() {
        let state = RunState::from_body(br#"{"progress": 10, "message": "hi"}"#).unwrap();
        assert_eq!(state.progress, Some(10.0));
        assert_eq!(state.message.as_deref(), Some("hi"));
        assert_eq!(state.error, None);
    }

    #[test]
    fn test_from_body_empty_object_is_a_snapshot() {
        assert_eq!(RunState::from_body(b"{}"), Some(RunState::default()));
    }

    #[test]
    fn test_from_body_empty_or_malformed_is_none() {
        assert_eq!(RunState::from_body(b""), None);
        assert_eq!(RunState::from_body(b"  \n"), None);
        assert_eq!(RunState::from_body(b"{not json"), None);
        assert_eq!(RunState::from_body(br#"{"progress": "ten"}"#), None);
    }
}
