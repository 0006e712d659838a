use serde::{Deserialize, Serialize};

/// One tool invocation the backend reports alongside a study-mode answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolLog {
    /// Name of the tool that ran.
    pub name: String,

    /// Text the tool produced.
    #[serde(default)]
    pub output: String,
}

impl ToolLog {
    /// Create a new `ToolLog`.
    pub fn new(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: output.into(),
        }
    }
}
