//! Contact inbox — the persistence half of the `save_message_for_kellogg`
//! tool. One JSON file per message, owner-readable only, writes serialized
//! behind a single async lock. Failures are reported to the model as tool
//! errors; they never abort the surrounding request.

use std::path::{Path, PathBuf};

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

pub const TOOL_NAME: &str = "save_message_for_kellogg";

const MAX_MESSAGE_CHARS: usize = 4000;
const MAX_NAME_CHARS: usize = 200;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

/// Tool-call arguments as the generator emits them.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub visitor_name: Option<String>,
    #[serde(default)]
    pub visitor_email: Option<String>,
}

/// An excerpted turn stored alongside the message for context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcerptTurn {
    pub role: String,
    pub content: String,
}

/// The persisted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactMessage {
    pub id: String,
    pub created_at: String,
    #[serde(default)]
    pub visitor_name: Option<String>,
    #[serde(default)]
    pub visitor_email: Option<String>,
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub context: Vec<ExcerptTurn>,
}

pub struct ContactInbox {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl ContactInbox {
    /// Create the inbox, making the directory (mode 0700) if needed.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Validate and persist one message. Returns the record id, or a
    /// short machine-readable reason on rejection.
    pub async fn save(
        &self,
        req: &ToolRequest,
        conversation_id: Option<&str>,
        excerpt: Vec<ExcerptTurn>,
    ) -> Result<String, String> {
        let message = req.message.trim();
        if message.is_empty() {
            return Err("message_empty".to_string());
        }
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err("message_too_long".to_string());
        }
        if let Some(name) = &req.visitor_name {
            if name.chars().count() > MAX_NAME_CHARS {
                return Err("name_too_long".to_string());
            }
        }
        if let Some(email) = &req.visitor_email {
            if !EMAIL.is_match(email.trim()) {
                return Err("email_invalid".to_string());
            }
        }

        let record = ContactMessage {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now().to_rfc3339(),
            visitor_name: req.visitor_name.as_deref().map(|s| s.trim().to_string()),
            visitor_email: req.visitor_email.as_deref().map(|s| s.trim().to_string()),
            message: message.to_string(),
            conversation_id: conversation_id.map(String::from),
            context: excerpt,
        };

        let _guard = self.write_lock.lock().await;
        match self.write_record(&record) {
            Ok(()) => {
                info!(id = %record.id, "contact message saved");
                Ok(record.id)
            }
            Err(e) => {
                warn!(error = %e, "contact message write failed");
                Err("storage_error".to_string())
            }
        }
    }

    fn write_record(&self, record: &ContactMessage) -> std::io::Result<()> {
        use std::io::Write;

        let path = self.dir.join(format!("msg-{}.json", record.id));
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(serde_json::to_string_pretty(record)?.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// All messages, newest first. Admin surface only.
    pub fn list(&self) -> std::io::Result<Vec<ContactMessage>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|s| serde_json::from_str::<ContactMessage>(&s).map_err(|e| e.to_string()))
            {
                Ok(msg) => out.push(msg),
                Err(e) => warn!(path = %path.display(), error = %e, "unreadable inbox record"),
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    /// Read one message by id. The id must be a UUID — anything else
    /// (path fragments included) returns None.
    pub fn read(&self, id: &str) -> Option<ContactMessage> {
        Uuid::parse_str(id).ok()?;
        let path = self.dir.join(format!("msg-{id}.json"));
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
