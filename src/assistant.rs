//! Chat assistant actions
//!
//! Every chat message is first classified. Requests that map to an operation
//! (register a user, assign a task, file a daily update, look up someone's
//! update, leave feedback on it) get their details pulled out by a second
//! model call, and the operation then runs under the caller's role rules.
//! When details are missing the assistant asks for them instead. Anything
//! else is answered as a plain conversation by [`ChatService`].
//!
//! [`ChatService`]: crate::chat::ChatService

use chrono::NaiveDate;
use std::collections::HashMap;
use std::fmt::Write as _;

use crate::app::AppState;
use crate::chat::{self, ChatEntry, ChatModel, ChatReply, Conversation, Sender};
use crate::error::{AppError, Result};
use crate::login::SessionUser;
use crate::tasks::{DailyUpdate, NewDailyUpdate, NewTask};
use crate::users::{NewUser, Role, User};

/// Transcript entries shown to the extraction step, so details given over
/// several turns can be combined.
const EXTRACTION_HISTORY: usize = 6;

/// Words kept when a title has to be made from a description
const TITLE_WORDS: usize = 6;

/// Operations the assistant can carry out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateUser,
    AssignTask,
    SubmitUpdate,
    RetrieveUpdates,
    AddComment,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::CreateUser,
        Action::AssignTask,
        Action::SubmitUpdate,
        Action::RetrieveUpdates,
        Action::AddComment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CreateUser => "create_user",
            Action::AssignTask => "assign_task",
            Action::SubmitUpdate => "submit_update",
            Action::RetrieveUpdates => "retrieve_updates",
            Action::AddComment => "add_comment",
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Action::CreateUser => "register a new user account",
            Action::AssignTask => "assign a task to an employee",
            Action::SubmitUpdate => "file their own daily work update",
            Action::RetrieveUpdates => "look up someone's daily update",
            Action::AddComment => "leave feedback on a daily update",
        }
    }

    /// Roles allowed to have the assistant do this
    pub fn roles(&self) -> &'static [Role] {
        match self {
            Action::CreateUser => &[Role::Admin],
            Action::AssignTask | Action::AddComment => &[Role::Admin, Role::Manager],
            Action::SubmitUpdate => &[Role::Employee],
            Action::RetrieveUpdates => &Role::ALL,
        }
    }

    fn denied(&self) -> &'static str {
        match self {
            Action::CreateUser => "Only admins can register new users.",
            Action::AssignTask => "Only managers and admins can assign tasks.",
            Action::SubmitUpdate => "Only employees file daily updates.",
            Action::RetrieveUpdates => "You cannot look up that update.",
            Action::AddComment => "Only managers and admins can leave feedback on updates.",
        }
    }

    /// Detail keys the extraction step answers, with a hint for each
    fn fields(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Action::CreateUser => &[
                ("full_name", "the person's full name"),
                ("email", "their email address"),
                ("password", "the initial password"),
                ("role", "admin, manager or employee"),
                ("team", "team name, empty for admins"),
            ],
            Action::AssignTask => &[
                ("assignee", "full name of the employee"),
                ("title", "short task title"),
                ("description", "what needs doing"),
                ("due_date", "YYYY-MM-DD"),
                ("priority", "low, medium or high"),
            ],
            Action::SubmitUpdate => &[
                ("title", "short title of the work"),
                ("work_done", "what was worked on"),
                ("reference_link", "http(s) link, if any"),
                ("date", "YYYY-MM-DD"),
            ],
            Action::RetrieveUpdates => &[
                ("name", "full name of the employee"),
                ("date", "YYYY-MM-DD"),
            ],
            Action::AddComment => &[
                ("comment", "the feedback text only"),
                ("name", "employee the feedback is for, if named"),
                ("date", "YYYY-MM-DD, if given"),
            ],
        }
    }
}

/// Read a classifier answer. Unknown labels, including `other`, are `None`.
pub fn parse_intent(raw: &str) -> Option<Action> {
    let label = raw
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '.' | '*'))
        .to_ascii_lowercase()
        .replace([' ', '-'], "_");
    Action::ALL.into_iter().find(|a| a.as_str() == label)
}

/// `key: value` answers from the extraction step
#[derive(Debug, Default)]
pub struct Fields(HashMap<String, String>);

impl Fields {
    /// Parse one `key: value` per line. Blank values and placeholders such
    /// as `none` are dropped.
    pub fn parse(raw: &str) -> Self {
        let mut fields = HashMap::new();
        for line in raw.lines() {
            let line = line.trim().trim_start_matches(['-', '*']).trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase().replace(' ', "_");
            let value = value
                .trim()
                .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '<' | '>'))
                .trim();
            let placeholder = ["", "none", "n/a", "unknown", "null"]
                .iter()
                .any(|p| value.eq_ignore_ascii_case(p));
            if !placeholder {
                fields.insert(key, value.to_string());
            }
        }
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

/// The reply asking for whatever is still missing, if anything is.
fn clarify(action: Action, fields: &Fields, required: &[(&str, &str)]) -> Option<String> {
    let missing: Vec<&str> = required
        .iter()
        .filter(|(key, _)| fields.get(key).is_none())
        .map(|(_, what)| *what)
        .collect();
    if missing.is_empty() {
        return None;
    }
    Some(format!(
        "I still need the following to {}: {}. Please provide the missing details.",
        action.describe(),
        missing.join(", ")
    ))
}

fn title_from(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut title = words
        .iter()
        .take(TITLE_WORDS)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    if words.len() > TITLE_WORDS {
        title.push_str("...");
    }
    title
}

fn parse_day(raw: Option<&str>, today: NaiveDate) -> Result<NaiveDate> {
    match raw {
        None => Ok(today),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| AppError::bad_request(format!("\"{}\" is not a YYYY-MM-DD date", raw))),
    }
}

// ============================================================================
// Model steps
// ============================================================================

fn classify_prompt(role: Role, message: &str) -> String {
    let mut prompt = format!(
        "Classify what a StaffDesk {} wants from the request below.\n\nLabels:\n",
        role.label().to_lowercase()
    );
    for action in Action::ALL {
        let _ = writeln!(prompt, "- {}: they want to {}", action.as_str(), action.describe());
    }
    prompt.push_str("- other: anything else, including questions about the data\n");
    let _ = write!(prompt, "\nRequest: {}\n\nAnswer with the label only.", message);
    prompt
}

fn extraction_prompt(
    action: Action,
    history: &[ChatEntry],
    today: NaiveDate,
    message: &str,
) -> String {
    let mut prompt = format!(
        "Pull the details needed to {} out of the request below. Today is {}; \
         turn relative dates into YYYY-MM-DD.\n",
        action.describe(),
        today
    );

    let skip = history.len().saturating_sub(EXTRACTION_HISTORY);
    if history.len() > skip {
        prompt.push_str("\nEarlier in this conversation:\n");
        for entry in &history[skip..] {
            let speaker = match entry.sender {
                Sender::User => "user",
                Sender::Bot => "assistant",
            };
            let _ = writeln!(prompt, "- {} said: {}", speaker, entry.text);
        }
    }

    prompt.push_str(
        "\nAnswer with exactly these lines, leaving the value empty when it is not given:\n",
    );
    for (key, hint) in action.fields() {
        let _ = writeln!(prompt, "{}: <{}>", key, hint);
    }
    let _ = write!(prompt, "\nRequest: {}", message);
    prompt
}

/// Ask the model which operation, if any, `message` asks for.
pub async fn classify(model: &dyn ChatModel, role: Role, message: &str) -> Result<Option<Action>> {
    let answer = model.generate(&classify_prompt(role, message)).await?;
    Ok(parse_intent(&answer))
}

async fn extract(
    model: &dyn ChatModel,
    conversation: &Conversation,
    action: Action,
    today: NaiveDate,
    message: &str,
) -> Result<Fields> {
    let prompt = extraction_prompt(action, conversation.entries(), today, message);
    Ok(Fields::parse(&model.generate(&prompt).await?))
}

// ============================================================================
// Turn handling
// ============================================================================

/// Handle one chat turn for `session`
///
/// Holds the session's transcript for the whole turn, so concurrent sends on
/// one session are answered in order.
///
/// # Arguments
/// * `state` - Shared application state; actions run against its stores
/// * `session` - The caller; their role decides which actions are allowed
/// * `message` - What the user typed
///
/// # Returns
/// * `Result<ChatReply>` - The recorded reply. Model failures give the
///   fallback apology with `delivered: false`; an action the stores refuse
///   is explained in the reply text.
///
/// # Errors
/// * `BadRequest` for a blank message
pub async fn respond(state: &AppState, session: &SessionUser, message: &str) -> Result<ChatReply> {
    let message = chat::check_message(message)?;
    let question = ChatEntry::new(Sender::User, message);
    let user = &session.user;
    let mut conversation = state.chat.open(&session.token).await;

    let reply = match classify(state.chat.model(), user.role, message).await {
        Err(err) => ChatReply::fallback(&err),
        Ok(None) => {
            let context = chat::context_for(user, &state.users, &state.tasks, state.today())?;
            state
                .chat
                .converse(&conversation, user.role, &context, message)
                .await
        }
        Ok(Some(action)) if !action.roles().contains(&user.role) => {
            ChatReply::answered(action.denied())
        }
        Ok(Some(action)) => {
            log::info!("chat action {} for user {}", action.as_str(), user.id);
            match act(state, user, &mut conversation, action, message).await {
                Ok(text) => ChatReply::answered(text),
                Err(err @ AppError::Upstream(_)) => ChatReply::fallback(&err),
                Err(err) => {
                    ChatReply::answered(format!("I couldn't do that: {}", err.public_message()))
                }
            }
        }
    };

    conversation.record(question, &reply);
    Ok(reply)
}

async fn act(
    state: &AppState,
    user: &User,
    conversation: &mut Conversation,
    action: Action,
    message: &str,
) -> Result<String> {
    let today = state.today();
    let fields = extract(state.chat.model(), conversation, action, today, message).await?;

    match action {
        Action::CreateUser => create_user(state, &fields),
        Action::AssignTask => assign_task(state, user, &fields),
        Action::SubmitUpdate => submit_update(state, user, &fields, today),
        Action::RetrieveUpdates => retrieve_updates(state, user, conversation, &fields, today),
        Action::AddComment => add_comment(state, user, conversation, &fields, today),
    }
}

fn create_user(state: &AppState, fields: &Fields) -> Result<String> {
    let required = [
        ("full_name", "the person's full name"),
        ("email", "an email address"),
        ("password", "an initial password"),
        ("role", "a role (admin, manager or employee)"),
    ];
    if let Some(question) = clarify(Action::CreateUser, fields, &required) {
        return Ok(question);
    }

    let user = state.users.register(&NewUser {
        full_name: fields.get("full_name").unwrap_or_default().to_string(),
        email: fields.get("email").unwrap_or_default().to_string(),
        password: fields.get("password").unwrap_or_default().to_string(),
        role: fields.get("role").unwrap_or_default().to_string(),
        team: fields.get("team").map(str::to_string),
        status: None,
    })?;

    Ok(format!(
        "User created.\n• Name: {}\n• Email: {}\n• Role: {}\n• Team: {}",
        user.full_name,
        user.email,
        user.role.label(),
        user.team.as_deref().unwrap_or("-")
    ))
}

fn assign_task(state: &AppState, assigner: &User, fields: &Fields) -> Result<String> {
    let required = [
        ("assignee", "the assignee's full name"),
        ("description", "a short task description"),
        ("due_date", "a due date (e.g. 2025-07-20)"),
    ];
    if let Some(question) = clarify(Action::AssignTask, fields, &required) {
        return Ok(question);
    }

    let name = fields.get("assignee").unwrap_or_default();
    let assignee = state
        .users
        .find_by_name(name)?
        .ok_or_else(|| AppError::not_found(format!("No user named {}", name)))?;
    let description = fields.get("description").unwrap_or_default();
    let title = fields
        .get("title")
        .map(str::to_string)
        .unwrap_or_else(|| title_from(description));

    let task = state.assign_task(
        assigner,
        &NewTask {
            assigned_to: assignee.id,
            title,
            description: description.to_string(),
            due_date: fields.get("due_date").map(str::to_string),
            priority: fields.get("priority").map(str::to_string),
        },
    )?;

    let due = task.due_date.map(|d| d.to_string()).unwrap_or_default();
    Ok(format!(
        "Task assigned.\n• Title: {}\n• Assigned to: {}\n• Due: {}",
        task.title, assignee.full_name, due
    ))
}

fn submit_update(state: &AppState, user: &User, fields: &Fields, today: NaiveDate) -> Result<String> {
    let required = [("work_done", "what you worked on")];
    if let Some(question) = clarify(Action::SubmitUpdate, fields, &required) {
        return Ok(question);
    }

    let work_done = fields.get("work_done").unwrap_or_default();
    let title = fields
        .get("title")
        .map(str::to_string)
        .unwrap_or_else(|| title_from(work_done));
    let date = parse_day(fields.get("date"), today)?;

    let update = state.tasks.submit_update(
        user,
        &NewDailyUpdate {
            title,
            date: date.to_string(),
            work_done: work_done.to_string(),
            reference_link: fields.get("reference_link").map(str::to_string),
            comment: None,
            task_id: None,
        },
        today,
    )?;

    let mut reply = format!(
        "Update submitted for {}.\n• Title: {}\n• Summary: {}",
        update.date, update.title, update.work_done
    );
    if let Some(link) = &update.reference_link {
        let _ = write!(reply, "\n• Reference: {}", link);
    }
    Ok(reply)
}

/// Updates by the employee called `name` on `date`, if `viewer` may see them.
fn updates_on(
    state: &AppState,
    viewer: &User,
    name: &str,
    date: NaiveDate,
) -> Result<(User, Vec<DailyUpdate>)> {
    let target = state
        .users
        .find_by_name(name)?
        .ok_or_else(|| AppError::not_found(format!("No employee found named {}", name)))?;

    let visible = match viewer.role {
        Role::Admin => true,
        Role::Manager => {
            target.id == viewer.id
                || viewer
                    .team
                    .as_deref()
                    .is_some_and(|team| target.in_team(team))
        }
        Role::Employee => target.id == viewer.id,
    };
    if !visible {
        return Err(AppError::forbidden(match viewer.role {
            Role::Employee => "You can only look up your own updates".to_string(),
            _ => format!("{} is not on your team", target.full_name),
        }));
    }

    let updates = state
        .tasks
        .history_for(target.id)?
        .into_iter()
        .filter(|u| u.date == date)
        .collect();
    Ok((target, updates))
}

fn retrieve_updates(
    state: &AppState,
    viewer: &User,
    conversation: &mut Conversation,
    fields: &Fields,
    today: NaiveDate,
) -> Result<String> {
    let name = match (fields.get("name"), viewer.role) {
        (Some(name), _) => name.to_string(),
        (None, Role::Employee) => viewer.full_name.clone(),
        (None, _) => {
            return Ok(clarify(
                Action::RetrieveUpdates,
                fields,
                &[("name", "the employee's full name")],
            )
            .unwrap_or_default());
        }
    };
    let date = parse_day(fields.get("date"), today)?;

    let (target, updates) = updates_on(state, viewer, &name, date)?;
    let Some(newest) = updates.first() else {
        return Ok(format!("No updates found for {} on {}.", target.full_name, date));
    };
    conversation.set_focus(Some(newest.id));

    let mut reply = format!("Updates from {} on {}:", target.full_name, date);
    for update in &updates {
        let _ = write!(reply, "\n• {}: {}", update.title, update.work_done);
        if let Some(link) = &update.reference_link {
            let _ = write!(reply, " ({})", link);
        }
        for feedback in &update.manager_comments {
            let _ = write!(reply, "\n  Feedback from {}: {}", feedback.author_name, feedback.text);
        }
    }
    if Action::AddComment.roles().contains(&viewer.role) {
        reply.push_str("\nTell me your feedback and I'll add it to this update.");
    }
    Ok(reply)
}

fn add_comment(
    state: &AppState,
    author: &User,
    conversation: &mut Conversation,
    fields: &Fields,
    today: NaiveDate,
) -> Result<String> {
    let required = [("comment", "the feedback to add")];
    if let Some(question) = clarify(Action::AddComment, fields, &required) {
        return Ok(question);
    }

    let target = match fields.get("name") {
        Some(name) => {
            let date = parse_day(fields.get("date"), today)?;
            let (target, updates) = updates_on(state, author, name, date)?;
            match updates.first() {
                Some(update) => Some(update.id),
                None => {
                    return Ok(format!(
                        "No updates found for {} on {}.",
                        target.full_name, date
                    ));
                }
            }
        }
        None => conversation.focus(),
    };
    let Some(update_id) = target else {
        return Ok("Which update is this feedback for? Ask me for an employee's update first, \
                   for example \"Show me Eve Stone's update for today\"."
            .to_string());
    };

    let text = fields.get("comment").unwrap_or_default();
    let update = state.comment_on_update(author, update_id, text)?;
    conversation.set_focus(Some(update.id));
    Ok(format!(
        "Comment added to \"{}\" from {}.\n• Comment: {}",
        update.title, update.date, text
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_answers_are_read_loosely() {
        assert_eq!(parse_intent("assign_task"), Some(Action::AssignTask));
        assert_eq!(parse_intent(" \"Retrieve updates\".\n"), Some(Action::RetrieveUpdates));
        assert_eq!(parse_intent("`add-comment`"), Some(Action::AddComment));
        assert_eq!(parse_intent("other"), None);
        assert_eq!(parse_intent("echo: hi"), None);
    }

    #[test]
    fn fields_skip_placeholders_and_keep_urls() {
        let fields = Fields::parse(
            "title: Fix login\n\
             - work_done: Patched the \"remember me\" box\n\
             reference_link: https://git.example.com/pr/7\n\
             date: none\n\
             garbage line",
        );
        assert_eq!(fields.get("title"), Some("Fix login"));
        assert_eq!(fields.get("work_done"), Some("Patched the \"remember me\" box"));
        assert_eq!(fields.get("reference_link"), Some("https://git.example.com/pr/7"));
        assert_eq!(fields.get("date"), None);
    }

    #[test]
    fn clarification_names_only_missing_details() {
        let fields = Fields::parse("assignee: Eve Stone\ndescription: Write the report");
        let question = clarify(
            Action::AssignTask,
            &fields,
            &[
                ("assignee", "the assignee's full name"),
                ("description", "a short task description"),
                ("due_date", "a due date"),
            ],
        )
        .unwrap();
        assert!(question.contains("a due date"));
        assert!(!question.contains("assignee"));
    }

    #[test]
    fn long_descriptions_make_short_titles() {
        assert_eq!(title_from("Update the docs"), "Update the docs");
        assert_eq!(
            title_from("Write the quarterly report for the finance team"),
            "Write the quarterly report for the..."
        );
    }

    #[test]
    fn classify_prompt_lists_every_label() {
        let prompt = classify_prompt(Role::Manager, "assign Eve a task");
        for action in Action::ALL {
            assert!(prompt.contains(action.as_str()));
        }
        assert!(prompt.contains("- other:"));
        assert!(prompt.contains("Request: assign Eve a task"));
    }
}
