//! Response payloads

use serde::{Deserialize, Serialize};

/// Outcome of `LoadLibrary` and `ResumeMainThread`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GenericResult {
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl GenericResult {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            error_message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            error_message: Some(message.into()),
        }
    }
}

/// Outcome of `StartProcess`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartProcessResult {
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
}

impl StartProcessResult {
    pub fn success(process_id: u32) -> Self {
        Self {
            succeeded: true,
            error_message: None,
            process_id: Some(process_id),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            error_message: Some(message.into()),
            process_id: None,
        }
    }
}
