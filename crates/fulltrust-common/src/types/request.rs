//! Request payloads

use serde::{Deserialize, Serialize};

/// Launch parameters stored by a `Create` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStartInfoRequest {
    /// Path to the executable
    #[serde(rename = "applicationName")]
    pub application_name: String,

    /// Arguments appended after the quoted executable path
    #[serde(rename = "commandLine")]
    pub command_line: String,

    /// Raw `CreateProcess` flags; `CREATE_SUSPENDED` is always added
    #[serde(rename = "creationFlags", default)]
    pub creation_flags: u32,

    /// Working directory (empty = inherit from the host)
    #[serde(rename = "currentDirectory")]
    pub current_directory: String,
}

impl ProcessStartInfoRequest {
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            command_line: String::new(),
            creation_flags: 0,
            current_directory: String::new(),
        }
    }

    pub fn with_command_line(mut self, command_line: impl Into<String>) -> Self {
        self.command_line = command_line.into();
        self
    }

    pub fn with_current_directory(mut self, dir: impl Into<String>) -> Self {
        self.current_directory = dir.into();
        self
    }

    pub fn with_creation_flags(mut self, flags: u32) -> Self {
        self.creation_flags = flags;
        self
    }
}

/// Library to inject into the tracked process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoadLibraryRequest {
    /// Display name, used for logging only
    pub library_name: String,

    /// Absolute path handed to `LoadLibraryW` in the target
    pub library_path: String,

    /// Optional export of interest; carried for the caller, not invoked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
}

impl LoadLibraryRequest {
    pub fn new(library_name: impl Into<String>, library_path: impl Into<String>) -> Self {
        Self {
            library_name: library_name.into(),
            library_path: library_path.into(),
            function_name: None,
        }
    }

    pub fn with_function_name(mut self, function_name: impl Into<String>) -> Self {
        self.function_name = Some(function_name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_info_field_names() {
        let request = ProcessStartInfoRequest::new(r"C:\Windows\notepad.exe")
            .with_command_line("readme.txt")
            .with_current_directory(r"C:\Temp")
            .with_creation_flags(0x10);

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "applicationName": r"C:\Windows\notepad.exe",
                "commandLine": "readme.txt",
                "creationFlags": 16,
                "currentDirectory": r"C:\Temp",
            })
        );
    }

    #[test]
    fn test_start_info_flags_default_to_zero() {
        let request: ProcessStartInfoRequest = serde_json::from_str(
            r#"{"applicationName":"notepad.exe","commandLine":"","currentDirectory":""}"#,
        )
        .unwrap();
        assert_eq!(request.creation_flags, 0);
        assert_eq!(request, ProcessStartInfoRequest::new("notepad.exe"));
    }

    #[test]
    fn test_start_info_requires_application_name() {
        let result = serde_json::from_str::<ProcessStartInfoRequest>(
            r#"{"commandLine":"","currentDirectory":""}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_library_field_names() {
        let request = LoadLibraryRequest::new("test.dll", r"C:\test.dll");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({ "LibraryName": "test.dll", "LibraryPath": r"C:\test.dll" })
        );

        let with_function = request.with_function_name("Init");
        let value = serde_json::to_value(&with_function).unwrap();
        assert_eq!(value["FunctionName"], "Init");
    }
}
