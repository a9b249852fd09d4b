use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadStatus {
    #[serde(rename = "created")]
    Created,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl UploadStatus {
    /// Returns `true` once the session can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Progress snapshot for an upload.
///
/// Derived from the session on every tick; never authoritative state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub upload_id: String,
    pub status: UploadStatus,
    pub total_bytes: u64,
    pub uploaded_bytes: u64,
    /// Percentage in `[0, 100]`.
    pub progress: f64,
    /// Average throughput in bytes per second.
    pub speed: f64,
    /// Estimated time remaining in milliseconds. `None` until some bytes
    /// have been acknowledged and a rate is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_remaining_ms: Option<u64>,
    pub is_paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_chunk: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
}

/// Response body, parsed according to the declared content type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResponseBody {
    Json(serde_json::Value),
    Text(String),
    Binary(Vec<u8>),
    #[default]
    Empty,
}

impl ResponseBody {
    /// Parses raw body bytes using the response `Content-Type`.
    ///
    /// A body declared as JSON that does not parse is kept as text.
    pub fn parse(content_type: Option<&str>, bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self::Empty;
        }
        let mime = content_type
            .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
            .unwrap_or_default();

        if mime == "application/json" || mime.ends_with("+json") {
            if let Ok(value) = serde_json::from_slice(bytes) {
                return Self::Json(value);
            }
            return Self::Text(String::from_utf8_lossy(bytes).into_owned());
        }
        if mime.starts_with("text/") {
            return Self::Text(String::from_utf8_lossy(bytes).into_owned());
        }
        Self::Binary(bytes.to_vec())
    }

    /// Returns the JSON value, if the body was JSON.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the body as text, if it was text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A server reply to a single upload request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerResponse {
    pub status: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: ResponseBody,
}

/// Terminal result of an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub upload_id: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: ResponseBody,
    pub upload_time_ms: u64,
    /// Average throughput over the whole upload, in bytes per second.
    pub average_speed: f64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of chunk requests acknowledged (0 for a whole-file upload).
    #[serde(default)]
    pub chunks_uploaded: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_status_serialization() {
        assert_eq!(
            serde_json::to_string(&UploadStatus::Running).unwrap(),
            "\"running\""
        );
        assert_eq!(
            serde_json::to_string(&UploadStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }

    #[test]
    fn terminal_statuses() {
        assert!(!UploadStatus::Created.is_terminal());
        assert!(!UploadStatus::Running.is_terminal());
        assert!(!UploadStatus::Paused.is_terminal());
        assert!(UploadStatus::Completed.is_terminal());
        assert!(UploadStatus::Failed.is_terminal());
        assert!(UploadStatus::Cancelled.is_terminal());
    }

    #[test]
    fn progress_omits_chunk_fields_for_whole_file() {
        let p = UploadProgress {
            upload_id: "u1".into(),
            status: UploadStatus::Running,
            total_bytes: 2048,
            uploaded_bytes: 1024,
            progress: 50.0,
            speed: 0.0,
            time_remaining_ms: None,
            is_paused: false,
            current_chunk: None,
            total_chunks: None,
        };
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"uploadedBytes\":1024"));
        assert!(!json.contains("currentChunk"));
        assert!(!json.contains("totalChunks"));
        assert!(!json.contains("timeRemainingMs"));
    }

    #[test]
    fn body_parse_json() {
        let body = ResponseBody::parse(
            Some("application/json; charset=utf-8"),
            br#"{"ok":true}"#,
        );
        assert_eq!(body.as_json().unwrap()["ok"], true);
    }

    #[test]
    fn body_parse_vendor_json() {
        let body = ResponseBody::parse(Some("application/vnd.api+json"), b"[1,2]");
        assert!(body.as_json().is_some());
    }

    #[test]
    fn body_parse_invalid_json_falls_back_to_text() {
        let body = ResponseBody::parse(Some("application/json"), b"not json");
        assert_eq!(body.as_text(), Some("not json"));
    }

    #[test]
    fn body_parse_text() {
        let body = ResponseBody::parse(Some("text/plain"), b"stored");
        assert_eq!(body, ResponseBody::Text("stored".into()));
    }

    #[test]
    fn body_parse_binary_and_empty() {
        let body = ResponseBody::parse(Some("application/octet-stream"), &[0, 1, 2]);
        assert_eq!(body, ResponseBody::Binary(vec![0, 1, 2]));

        let body = ResponseBody::parse(None, &[0xff]);
        assert_eq!(body, ResponseBody::Binary(vec![0xff]));

        assert_eq!(ResponseBody::parse(Some("text/plain"), b""), ResponseBody::Empty);
    }

    #[test]
    fn upload_response_json_roundtrip() {
        let resp = UploadResponse {
            upload_id: "u1".into(),
            status: 201,
            headers: BTreeMap::from([("location".into(), "/files/1".into())]),
            body: ResponseBody::Json(serde_json::json!({"id": 1})),
            upload_time_ms: 1500,
            average_speed: 4096.0,
            success: true,
            error: None,
            chunks_uploaded: 3,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("\"error\""));
        let parsed: UploadResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(resp, parsed);
    }
}
