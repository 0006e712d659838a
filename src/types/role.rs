use serde::{Deserialize, Serialize};
use std::fmt;

/// Who authored a chat message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person typing into the chat.
    User,

    /// The assistant.
    Model,
}

impl Role {
    /// The role name the backend expects on the wire.
    ///
    /// The backend speaks the OpenAI vocabulary, so `Model` becomes `assistant`.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Model => write!(f, "model"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_name_maps_model_to_assistant() {
        assert_eq!(Role::User.wire_name(), "user");
        assert_eq!(Role::Model.wire_name(), "assistant");
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Model).unwrap(), "\"model\"");
        let role: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, Role::User);
    }
}
