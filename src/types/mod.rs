// Public modules
pub mod chat_message;
pub mod chat_mode;
pub mod chat_session;
pub mod requests;
pub mod role;
pub mod session_id;
pub mod tool_log;

// Re-exports
pub use chat_message::{ChatMessage, ERROR_PREFIX};
pub use chat_mode::{ChatMode, ChatModeParseError};
pub use chat_session::{ChatSession, DEFAULT_TITLE};
pub use requests::{
    HistoryRequest, ImagePayload, RenameRequest, RenameResponse, StudyRequest, StudyResponse,
    WireMessage,
};
pub use role::Role;
pub use session_id::SessionId;
pub use tool_log::ToolLog;
