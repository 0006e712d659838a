//! Persistent storage of the chat session list.
//!
//! The session list is stored as one JSON array under [`SESSIONS_KEY`] in a
//! [`KeyValueStore`].  [`SessionStore`] owns the in-memory list, replaces
//! sessions as whole values, and writes the list back after every change.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::observability::{STORE_SKIPPED_WRITES, STORE_WRITES};
use crate::types::{ChatMessage, ChatMode, ChatSession, SessionId};

/// Key the session list is persisted under.
pub const SESSIONS_KEY: &str = "chat-sessions";

/// A string-to-string store that survives restarts.
pub trait KeyValueStore: Send {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

/// A [`KeyValueStore`] keeping one `<key>.json` file per key in a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir`.  The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory backing the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::io(format!("failed to read {key}"), err)),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|err| Error::io("failed to create store directory", err))?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        {
            let file =
                File::create(&tmp).map_err(|err| Error::io("failed to create store file", err))?;
            let mut writer = BufWriter::new(file);
            writer
                .write_all(value.as_bytes())
                .and_then(|_| writer.flush())
                .map_err(|err| Error::io("failed to write store file", err))?;
        }
        fs::rename(&tmp, &path).map_err(|err| Error::io("failed to replace store file", err))
    }
}

/// An in-memory [`KeyValueStore`].  Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: Arc<Mutex<HashMap<String, String>>>,
    writes: Arc<Mutex<usize>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set` calls the store has seen.
    pub fn writes(&self) -> usize {
        *self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read a value without going through the trait.
    pub fn value(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.value(key))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        *self.writes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

/// The ordered collection of chat sessions, most recent first.
pub struct SessionStore {
    backend: Box<dyn KeyValueStore>,
    sessions: Vec<ChatSession>,
    last_saved: Option<String>,
}

impl SessionStore {
    /// Load the session list from `backend`.  A missing key yields an empty list.
    pub fn load(backend: Box<dyn KeyValueStore>) -> Result<Self> {
        let (sessions, last_saved) = match backend.get(SESSIONS_KEY)? {
            Some(raw) if !raw.trim().is_empty() => {
                let sessions: Vec<ChatSession> = serde_json::from_str(&raw).map_err(|err| {
                    Error::serialization("failed to parse stored sessions", Some(Box::new(err)))
                })?;
                (sessions, Some(raw))
            }
            _ => (Vec::new(), None),
        };
        Ok(Self {
            backend,
            sessions,
            last_saved,
        })
    }

    /// All sessions, most recent first.
    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True if there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Look up a session.
    pub fn get(&self, id: &SessionId) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| &s.id == id)
    }

    /// Look up a session, failing with [`Error::NotFound`] if it does not exist.
    pub fn require(&self, id: &SessionId) -> Result<&ChatSession> {
        self.get(id).ok_or_else(|| session_not_found(id))
    }

    /// Create a session at `now_millis` and put it at the front of the list.
    ///
    /// The identifier is derived from the timestamp and bumped until it is unique.
    pub fn create(&mut self, now_millis: i64) -> Result<SessionId> {
        let mut candidate = now_millis;
        let mut id = SessionId::from_millis(candidate);
        while self.get(&id).is_some() {
            candidate += 1;
            id = SessionId::from_millis(candidate);
        }
        self.sessions
            .insert(0, ChatSession::new(id.clone(), now_millis));
        self.save()?;
        Ok(id)
    }

    /// Replace the session with the same identifier as `session`.
    pub fn replace(&mut self, session: ChatSession) -> Result<()> {
        let slot = self
            .sessions
            .iter_mut()
            .find(|s| s.id == session.id)
            .ok_or_else(|| session_not_found(&session.id))?;
        *slot = session;
        self.save()
    }

    /// Replace the message list of a session.
    pub fn replace_messages(&mut self, id: &SessionId, messages: Vec<ChatMessage>) -> Result<()> {
        let session = self.require(id)?.with_messages(messages);
        self.replace(session)
    }

    /// Replace the message at `index` of a session.
    pub fn replace_message(
        &mut self,
        id: &SessionId,
        index: usize,
        message: ChatMessage,
    ) -> Result<()> {
        let session = self.require(id)?;
        let session = session.with_message_at(index, message).ok_or_else(|| {
            Error::not_found(
                format!("session has {} messages", session.messages.len()),
                Some("message".to_string()),
                Some(index.to_string()),
            )
        })?;
        self.replace(session)
    }

    /// Replace the title of a session.
    pub fn set_title(&mut self, id: &SessionId, title: impl Into<String>) -> Result<()> {
        let session = self.require(id)?.with_title(title);
        self.replace(session)
    }

    /// Switch a session to another conversation mode.
    pub fn set_mode(&mut self, id: &SessionId, mode: ChatMode) -> Result<()> {
        let session = self.require(id)?.with_mode(mode);
        self.replace(session)
    }

    /// The session list exactly as it would be persisted.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.sessions)?)
    }

    /// Write the list to the backend unless it is unchanged since the last write.
    fn save(&mut self) -> Result<()> {
        let json = self.to_json()?;
        if self.last_saved.as_deref() == Some(json.as_str()) {
            STORE_SKIPPED_WRITES.click();
            return Ok(());
        }
        self.backend.set(SESSIONS_KEY, &json)?;
        STORE_WRITES.click();
        self.last_saved = Some(json);
        Ok(())
    }
}

fn session_not_found(id: &SessionId) -> Error {
    Error::not_found(
        "no such session",
        Some("session".to_string()),
        Some(id.to_string()),
    )
}
