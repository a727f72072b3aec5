//! Chat assistant backed by the generative-language API.
//!
//! Each session owns one transcript. Turns on the same transcript are
//! serialised behind an async mutex, so a reply is always appended right
//! after the message that produced it. Actions the assistant can take on a
//! message live in [`crate::assistant`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ChatConfig;
use crate::error::{AppError, Result};
use crate::tasks::{QUICK_VIEW_LIMIT, TaskStore};
use crate::users::{Role, User, UserStatus, UserStore};

/// Bot text recorded when the upstream call fails
pub const FALLBACK_REPLY: &str = "Sorry, I couldn't process your request. Please try again.";

const RECENT_UPDATES_IN_CONTEXT: usize = 10;

/// A text-generation backend
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

// ============================================================================
// generateContent client
// ============================================================================

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    /// Text of the first candidate, parts joined.
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn from_config(config: &ChatConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("http client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

#[async_trait]
impl ChatModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let Some(key) = &self.api_key else {
            return Err(AppError::upstream("chat is not configured"));
        };

        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
        };

        let response = self
            .http
            .post(self.url())
            .header("x-goog-api-key", key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            log::warn!("generateContent returned {}: {}", status, detail);
            return Err(AppError::upstream(format!("model returned {}", status)));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AppError::upstream(format!("bad model response: {}", e)))?;
        parsed
            .text()
            .ok_or_else(|| AppError::upstream("model returned no text"))
    }
}

// ============================================================================
// Transcripts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEntry {
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatEntry {
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Result of one send
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub entry: ChatEntry,
    /// False when the model failed and the fallback text was recorded
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatReply {
    pub fn answered(text: impl Into<String>) -> Self {
        Self {
            entry: ChatEntry::new(Sender::Bot, text),
            delivered: true,
            error: None,
        }
    }

    /// The apology recorded when the model could not be reached.
    pub fn fallback(err: &AppError) -> Self {
        log::warn!("chat reply failed: {}", err);
        Self {
            entry: ChatEntry::new(Sender::Bot, FALLBACK_REPLY),
            delivered: false,
            error: Some(err.public_message()),
        }
    }
}

/// Trimmed message text; blank messages are rejected.
pub fn check_message(message: &str) -> Result<&str> {
    let message = message.trim();
    if message.is_empty() {
        return Err(AppError::bad_request("Message cannot be empty"));
    }
    Ok(message)
}

#[derive(Debug, Default)]
struct Memory {
    entries: Vec<ChatEntry>,
    focus: Option<u32>,
}

type Transcript = Arc<tokio::sync::Mutex<Memory>>;

/// Exclusive hold on one session's transcript for the length of a turn
pub struct Conversation {
    memory: tokio::sync::OwnedMutexGuard<Memory>,
}

impl Conversation {
    pub fn entries(&self) -> &[ChatEntry] {
        &self.memory.entries
    }

    /// Daily update the conversation is about, for follow-up feedback
    pub fn focus(&self) -> Option<u32> {
        self.memory.focus
    }

    pub fn set_focus(&mut self, update_id: Option<u32>) {
        self.memory.focus = update_id;
    }

    /// Append a question and the reply it got.
    pub fn record(&mut self, question: ChatEntry, reply: &ChatReply) {
        self.memory.entries.push(question);
        self.memory.entries.push(reply.entry.clone());
    }
}

pub struct ChatService {
    model: Arc<dyn ChatModel>,
    transcripts: Mutex<HashMap<String, Transcript>>,
    history_limit: usize,
}

impl ChatService {
    pub fn new(model: Arc<dyn ChatModel>, history_limit: usize) -> Self {
        Self {
            model,
            transcripts: Mutex::new(HashMap::new()),
            history_limit,
        }
    }

    pub fn model(&self) -> &dyn ChatModel {
        self.model.as_ref()
    }

    fn transcript(&self, session: &str) -> Transcript {
        let mut map = self.transcripts.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(session.to_string()).or_default().clone()
    }

    /// Wait for the session's transcript and hold it until the returned
    /// [`Conversation`] is dropped.
    pub async fn open(&self, session: &str) -> Conversation {
        Conversation {
            memory: self.transcript(session).lock_owned().await,
        }
    }

    /// Ask the model for a plain answer to `message`, given the conversation so far.
    ///
    /// # Arguments
    /// * `conversation` - The held transcript; nothing is appended to it here
    /// * `role` - Caller's role, picks the persona
    /// * `context` - Data snapshot from [`context_for`]
    /// * `message` - The user's (already trimmed) message
    ///
    /// # Returns
    /// * `ChatReply` - The model's answer, or the fallback apology with
    ///   `delivered: false` when the model fails
    pub async fn converse(
        &self,
        conversation: &Conversation,
        role: Role,
        context: &str,
        message: &str,
    ) -> ChatReply {
        let prompt = build_prompt(
            role,
            context,
            conversation.entries(),
            self.history_limit,
            message,
        );
        match self.model.generate(&prompt).await {
            Ok(text) => ChatReply::answered(text),
            Err(err) => ChatReply::fallback(&err),
        }
    }

    /// Append `message`, ask the model, append its reply.
    pub async fn send(
        &self,
        session: &str,
        role: Role,
        context: &str,
        message: &str,
    ) -> Result<ChatReply> {
        let message = check_message(message)?;
        let question = ChatEntry::new(Sender::User, message);

        let mut conversation = self.open(session).await;
        let reply = self.converse(&conversation, role, context, message).await;
        conversation.record(question, &reply);
        Ok(reply)
    }

    pub async fn history(&self, session: &str) -> Vec<ChatEntry> {
        let transcript = {
            let map = self.transcripts.lock().unwrap_or_else(|e| e.into_inner());
            map.get(session).cloned()
        };
        match transcript {
            Some(t) => t.lock().await.entries.clone(),
            None => Vec::new(),
        }
    }

    pub fn clear(&self, session: &str) {
        let mut map = self.transcripts.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(session);
    }

    /// Number of sessions holding a transcript.
    pub fn len(&self) -> usize {
        self.transcripts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn persona(role: Role) -> &'static str {
    match role {
        Role::Admin => {
            "You are the StaffDesk admin assistant. You help administrators understand \
             user accounts, roles and activity across the whole organisation. Answer \
             briefly and only from the context given; say so when the data is not there."
        }
        Role::Manager => {
            "You are the StaffDesk manager assistant. You help a team manager follow \
             their team's daily updates and assigned tasks. Answer briefly and only \
             from the context given; say so when the data is not there."
        }
        Role::Employee => {
            "You are the StaffDesk employee assistant. You help an employee keep track \
             of their assigned tasks and daily updates and give practical productivity \
             tips. Answer briefly and only from the context given."
        }
    }
}

pub fn suggested_prompts(role: Role) -> &'static [&'static str] {
    match role {
        Role::Admin => &[
            "Show me all users in the system",
            "How many managers are active?",
            "Generate user activity report",
            "Show inactive employees",
        ],
        Role::Manager => &[
            "What has my team done today?",
            "Summarize the tasks submitted yesterday",
            "Who hasn't submitted their daily update today?",
        ],
        Role::Employee => &[
            "What tasks do I have today?",
            "Show me my recent submissions",
            "How can I improve my productivity?",
            "What's my current progress?",
        ],
    }
}

fn build_prompt(
    role: Role,
    context: &str,
    history: &[ChatEntry],
    history_limit: usize,
    message: &str,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(persona(role));
    prompt.push_str("\n\nContext:\n");
    prompt.push_str(context.trim());
    prompt.push('\n');

    let skip = history.len().saturating_sub(history_limit);
    if history.len() > skip {
        prompt.push_str("\nConversation so far:\n");
        for entry in &history[skip..] {
            let speaker = match entry.sender {
                Sender::User => "User",
                Sender::Bot => "Assistant",
            };
            let _ = writeln!(prompt, "{}: {}", speaker, entry.text);
        }
    }

    let _ = write!(prompt, "\nUser: {}\nAssistant:", message);
    prompt
}

/// Data snapshot the assistant may draw on for `user`.
pub fn context_for(
    user: &User,
    users: &UserStore,
    tasks: &TaskStore,
    today: NaiveDate,
) -> Result<String> {
    let mut out = String::new();
    let _ = writeln!(out, "Today is {}.", today);
    let _ = writeln!(
        out,
        "You are talking to {} ({}{}).",
        user.full_name,
        user.role.label(),
        user.team
            .as_deref()
            .map(|t| format!(", team {}", t))
            .unwrap_or_default()
    );

    match user.role {
        Role::Admin => {
            let all = users.all()?;
            for role in Role::ALL {
                let of_role: Vec<&User> = all.iter().filter(|u| u.role == role).collect();
                let active = of_role.iter().filter(|u| u.is_active()).count();
                let _ = writeln!(
                    out,
                    "{}s: {} total, {} active.",
                    role.label(),
                    of_role.len(),
                    active
                );
            }
            for u in all.iter().filter(|u| u.status != UserStatus::Active) {
                let _ = writeln!(out, "- {} is {}.", u.full_name, u.status);
            }
        }
        Role::Manager => {
            let team = match user.team.as_deref() {
                Some(team) => users.team_members(team)?,
                None => Vec::new(),
            };
            let _ = writeln!(out, "Team members:");
            for member in &team {
                let _ = writeln!(out, "- {} ({})", member.full_name, member.status);
            }
            let ids: Vec<u32> = team.iter().map(|u| u.id).collect();
            let _ = writeln!(out, "Recent daily updates:");
            for update in tasks
                .updates_for(&ids)?
                .iter()
                .take(RECENT_UPDATES_IN_CONTEXT)
            {
                let author = team
                    .iter()
                    .find(|u| u.id == update.user_id)
                    .map(|u| u.full_name.as_str())
                    .unwrap_or("unknown");
                let _ = writeln!(
                    out,
                    "- {} {}: {} ({})",
                    update.date, author, update.title, update.work_done
                );
            }
        }
        Role::Employee => {
            let _ = writeln!(out, "Active tasks:");
            for task in tasks.active_for(user.id, today, QUICK_VIEW_LIMIT)? {
                let due = task
                    .due_date
                    .map(|d| format!(", due {}", d))
                    .unwrap_or_default();
                let _ = writeln!(out, "- {} [{}{}]", task.title, task.status.label(), due);
            }
            let _ = writeln!(out, "Recent daily updates:");
            for update in tasks
                .history_for(user.id)?
                .iter()
                .take(RECENT_UPDATES_IN_CONTEXT)
            {
                let _ = writeln!(out, "- {} {}", update.date, update.title);
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_candidate_parts_are_joined() {
        let raw = r#"{
            "candidates": [
                {"content": {"role": "model", "parts": [{"text": "Hello "}, {"text": "there"}]}},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        }"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.text().as_deref(), Some("Hello there"));
    }

    #[test]
    fn blocked_response_has_no_text() {
        let parsed: GenerateResponse =
            serde_json::from_str(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#).unwrap();
        assert_eq!(parsed.text(), None);
    }

    #[test]
    fn prompt_keeps_only_the_latest_history() {
        let history: Vec<ChatEntry> = (0..5)
            .map(|i| ChatEntry::new(Sender::User, format!("msg-{}", i)))
            .collect();
        let prompt = build_prompt(Role::Employee, "ctx", &history, 2, "now");

        assert!(!prompt.contains("msg-2"));
        assert!(prompt.contains("msg-3"));
        assert!(prompt.contains("msg-4"));
        assert!(prompt.ends_with("User: now\nAssistant:"));
    }
}
