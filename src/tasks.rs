//! Assigned tasks and daily work updates.
//!
//! Managers assign tasks to employees in their team; employees move them
//! through `pending -> in_progress -> completed` and file daily updates,
//! optionally linked to one of their tasks. Overdue is derived from the due
//! date and never stored.

use chrono::{DateTime, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::RwLock;

use crate::error::{AppError, Result};
use crate::storage;
use crate::users::{Role, User};

const TASKS_FILE: &str = "tasks.json";
const UPDATES_FILE: &str = "updates.json";

/// Number of tasks on the employee quick view
pub const QUICK_VIEW_LIMIT: usize = 5;

lazy_static! {
    static ref LINK_RE: Regex = Regex::new(r"^https?://[^\s/$.?#].[^\s]*$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[serde(alias = "open")]
    Pending,
    InProgress,
    Completed,
    Overdue,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Overdue => "overdue",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Completed => "Completed",
            TaskStatus::Overdue => "Overdue",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, TaskStatus::Completed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "pending" => Ok(TaskStatus::Pending),
            "in_progress" | "in progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "overdue" => Ok(TaskStatus::Overdue),
            other => Err(AppError::bad_request(format!("Invalid task status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl FromStr for Priority {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(AppError::bad_request(format!("Invalid priority: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: u32,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    pub status: TaskStatus,
    pub due_date: Option<NaiveDate>,
    pub assigned_to: u32,
    pub assigned_by: u32,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Status as seen on `today`: open work past its due date is overdue.
    pub fn effective_status(&self, today: NaiveDate) -> TaskStatus {
        match (self.status, self.due_date) {
            (TaskStatus::Completed, _) => TaskStatus::Completed,
            (_, Some(due)) if due < today => TaskStatus::Overdue,
            (status, _) => status,
        }
    }

    fn as_of(&self, today: NaiveDate) -> Task {
        let mut task = self.clone();
        task.status = self.effective_status(today);
        task
    }
}

/// Feedback left by a manager or admin on a daily update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerComment {
    pub author_id: u32,
    pub author_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyUpdate {
    pub id: u32,
    pub user_id: u32,
    pub task_id: Option<u32>,
    pub date: NaiveDate,
    pub title: String,
    pub work_done: String,
    pub reference_link: Option<String>,
    pub comment: Option<String>,
    #[serde(default)]
    pub manager_comments: Vec<ManagerComment>,
    pub created_at: DateTime<Utc>,
}

/// Task assignment request
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub assigned_to: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
}

/// Daily update submission
#[derive(Debug, Clone, Deserialize)]
pub struct NewDailyUpdate {
    pub title: String,
    pub date: String,
    pub work_done: String,
    #[serde(default)]
    pub reference_link: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub task_id: Option<u32>,
}

fn parse_date(raw: &str, field: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::bad_request(format!("{} must be a date in YYYY-MM-DD format", field)))
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Task and daily-update tables
pub struct TaskStore {
    tasks_path: PathBuf,
    updates_path: PathBuf,
    tasks: RwLock<Vec<Task>>,
    updates: RwLock<Vec<DailyUpdate>>,
}

impl TaskStore {
    pub fn open(dir: &Path) -> Result<Self> {
        let tasks_path = dir.join(TASKS_FILE);
        let updates_path = dir.join(UPDATES_FILE);
        storage::init_table(&tasks_path)?;
        storage::init_table(&updates_path)?;

        Ok(Self {
            tasks: RwLock::new(storage::load_records(&tasks_path)?),
            updates: RwLock::new(storage::load_records(&updates_path)?),
            tasks_path,
            updates_path,
        })
    }

    fn tasks_read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<Task>>> {
        self.tasks
            .read()
            .map_err(|_| AppError::internal("task store lock poisoned"))
    }

    fn tasks_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Vec<Task>>> {
        self.tasks
            .write()
            .map_err(|_| AppError::internal("task store lock poisoned"))
    }

    fn updates_read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<DailyUpdate>>> {
        self.updates
            .read()
            .map_err(|_| AppError::internal("update store lock poisoned"))
    }

    fn updates_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Vec<DailyUpdate>>> {
        self.updates
            .write()
            .map_err(|_| AppError::internal("update store lock poisoned"))
    }

    /// Assign a task to an employee
    ///
    /// # Arguments
    /// * `assigner` - Admin or manager handing out the task
    /// * `assignee` - Employee receiving it
    /// * `new_task` - Title, description, optional due date and priority
    ///
    /// # Returns
    /// * `Result<Task>` - The stored task, starting as pending
    ///
    /// # Errors
    /// * `Forbidden` for employees, or managers assigning outside their team
    /// * `BadRequest` if the assignee is not an active employee, the title is
    ///   blank, or the due date or priority does not parse
    pub fn assign(&self, assigner: &User, assignee: &User, new_task: &NewTask) -> Result<Task> {
        match assigner.role {
            Role::Admin => {}
            Role::Manager => {
                let same_team = assigner
                    .team
                    .as_deref()
                    .is_some_and(|team| assignee.in_team(team));
                if !same_team {
                    return Err(AppError::forbidden(
                        "Managers can only assign tasks within their own team",
                    ));
                }
            }
            Role::Employee => {
                return Err(AppError::forbidden("Employees cannot assign tasks"));
            }
        }
        if assignee.role != Role::Employee {
            return Err(AppError::bad_request("Tasks can only be assigned to employees"));
        }
        if !assignee.is_active() {
            return Err(AppError::bad_request(format!(
                "{} is {} and cannot receive tasks",
                assignee.full_name, assignee.status
            )));
        }

        let title = new_task.title.trim();
        if title.is_empty() {
            return Err(AppError::bad_request("Task title is required"));
        }
        let due_date = non_blank(new_task.due_date.as_deref())
            .map(|d| parse_date(&d, "Due date"))
            .transpose()?;
        let priority = match non_blank(new_task.priority.as_deref()) {
            Some(p) => p.parse()?,
            None => Priority::default(),
        };

        let mut tasks = self.tasks_write()?;
        let task = Task {
            id: storage::next_id(tasks.iter().map(|t| t.id)),
            title: title.to_string(),
            description: new_task.description.trim().to_string(),
            priority,
            status: TaskStatus::Pending,
            due_date,
            assigned_to: assignee.id,
            assigned_by: assigner.id,
            created_at: Utc::now(),
        };
        tasks.push(task.clone());
        storage::save_records(&self.tasks_path, &tasks)?;

        log::info!(
            "task {} assigned to {} by {}",
            task.id,
            assignee.id,
            assigner.id
        );
        Ok(task)
    }

    /// All tasks of an employee, newest first, with their status as of `today`.
    pub fn tasks_for(&self, user_id: u32, today: NaiveDate) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks_read()?
            .iter()
            .filter(|t| t.assigned_to == user_id)
            .map(|t| t.as_of(today))
            .collect();
        tasks.sort_by_key(|t| (Reverse(t.created_at), Reverse(t.id)));
        Ok(tasks)
    }

    /// Open work (pending, in progress, overdue), newest first, capped at `limit`.
    pub fn active_for(&self, user_id: u32, today: NaiveDate, limit: usize) -> Result<Vec<Task>> {
        Ok(self
            .tasks_for(user_id, today)?
            .into_iter()
            .filter(|t| t.status.is_active())
            .take(limit)
            .collect())
    }

    /// Tasks handed out by one manager, newest first.
    pub fn assigned_by(&self, manager_id: u32, today: NaiveDate) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks_read()?
            .iter()
            .filter(|t| t.assigned_by == manager_id)
            .map(|t| t.as_of(today))
            .collect();
        tasks.sort_by_key(|t| (Reverse(t.created_at), Reverse(t.id)));
        Ok(tasks)
    }

    pub fn all_tasks(&self, today: NaiveDate) -> Result<Vec<Task>> {
        Ok(self.tasks_read()?.iter().map(|t| t.as_of(today)).collect())
    }

    /// Move a task along
    ///
    /// # Arguments
    /// * `user_id` - Caller; must be the task's assignee
    /// * `task_id` - Task to move
    /// * `status` - New status; overdue is derived and cannot be set
    /// * `today` - Reference day for the returned status
    ///
    /// # Returns
    /// * `Result<Task>` - The task as of `today`
    pub fn set_status(
        &self,
        user_id: u32,
        task_id: u32,
        status: TaskStatus,
        today: NaiveDate,
    ) -> Result<Task> {
        if status == TaskStatus::Overdue {
            return Err(AppError::bad_request(
                "Overdue is derived from the due date and cannot be set",
            ));
        }

        let mut tasks = self.tasks_write()?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| AppError::not_found(format!("Task {} not found", task_id)))?;
        if task.assigned_to != user_id {
            return Err(AppError::forbidden("You can only update your own tasks"));
        }
        task.status = status;
        let updated = task.as_of(today);
        storage::save_records(&self.tasks_path, &tasks)?;
        Ok(updated)
    }

    /// File a daily update
    ///
    /// # Arguments
    /// * `user` - The employee filing it
    /// * `new_update` - Title, date, work done and the optional link, note and task
    /// * `today` - Updates dated after this are rejected
    ///
    /// # Returns
    /// * `Result<DailyUpdate>` - The stored update
    ///
    /// # Errors
    /// * `BadRequest` for a blank title or work description, a malformed or
    ///   future date, a non-http(s) link, or a task that is not the user's
    pub fn submit_update(
        &self,
        user: &User,
        new_update: &NewDailyUpdate,
        today: NaiveDate,
    ) -> Result<DailyUpdate> {
        let title = new_update.title.trim();
        if title.is_empty() {
            return Err(AppError::bad_request("Task title is required"));
        }
        let work_done = new_update.work_done.trim();
        if work_done.is_empty() {
            return Err(AppError::bad_request("Work done is required"));
        }

        let date = parse_date(&new_update.date, "Date")?;
        if date > today {
            return Err(AppError::bad_request("Date cannot be in the future"));
        }

        let reference_link = non_blank(new_update.reference_link.as_deref());
        if let Some(link) = &reference_link {
            if !LINK_RE.is_match(link) {
                return Err(AppError::bad_request(
                    "Reference link must be an http(s) URL",
                ));
            }
        }

        if let Some(task_id) = new_update.task_id {
            let owns_task = self
                .tasks_read()?
                .iter()
                .any(|t| t.id == task_id && t.assigned_to == user.id);
            if !owns_task {
                return Err(AppError::bad_request(format!(
                    "Task {} is not assigned to you",
                    task_id
                )));
            }
        }

        let mut updates = self.updates_write()?;
        let update = DailyUpdate {
            id: storage::next_id(updates.iter().map(|u| u.id)),
            user_id: user.id,
            task_id: new_update.task_id,
            date,
            title: title.to_string(),
            work_done: work_done.to_string(),
            reference_link,
            comment: non_blank(new_update.comment.as_deref()),
            manager_comments: Vec::new(),
            created_at: Utc::now(),
        };
        updates.push(update.clone());
        storage::save_records(&self.updates_path, &updates)?;
        Ok(update)
    }

    /// A user's own updates, newest date first.
    pub fn history_for(&self, user_id: u32) -> Result<Vec<DailyUpdate>> {
        self.updates_for(&[user_id])
    }

    /// Updates filed by any of `user_ids`, newest date first.
    pub fn updates_for(&self, user_ids: &[u32]) -> Result<Vec<DailyUpdate>> {
        let mut updates: Vec<DailyUpdate> = self
            .updates_read()?
            .iter()
            .filter(|u| user_ids.contains(&u.user_id))
            .cloned()
            .collect();
        sort_newest_first(&mut updates);
        Ok(updates)
    }

    pub fn all_updates(&self) -> Result<Vec<DailyUpdate>> {
        let mut updates = self.updates_read()?.clone();
        sort_newest_first(&mut updates);
        Ok(updates)
    }

    pub fn get_update(&self, update_id: u32) -> Result<DailyUpdate> {
        self.updates_read()?
            .iter()
            .find(|u| u.id == update_id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("Update {} not found", update_id)))
    }

    /// Attach feedback to an update. `submitter` is the update's author.
    pub fn add_comment(
        &self,
        update_id: u32,
        author: &User,
        submitter: &User,
        text: &str,
    ) -> Result<DailyUpdate> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::bad_request("Comment cannot be empty"));
        }
        match author.role {
            Role::Admin => {}
            Role::Manager => {
                let same_team = author
                    .team
                    .as_deref()
                    .is_some_and(|team| submitter.in_team(team));
                if !same_team {
                    return Err(AppError::forbidden(
                        "Managers can only comment on their team's updates",
                    ));
                }
            }
            Role::Employee => {
                return Err(AppError::forbidden("Employees cannot comment on updates"));
            }
        }

        let mut updates = self.updates_write()?;
        let update = updates
            .iter_mut()
            .find(|u| u.id == update_id)
            .ok_or_else(|| AppError::not_found(format!("Update {} not found", update_id)))?;
        if update.user_id != submitter.id {
            return Err(AppError::bad_request("Update does not belong to that user"));
        }
        update.manager_comments.push(ManagerComment {
            author_id: author.id,
            author_name: author.full_name.clone(),
            text: text.to_string(),
            created_at: Utc::now(),
        });
        let updated = update.clone();
        storage::save_records(&self.updates_path, &updates)?;
        Ok(updated)
    }
}

/// A daily update with its author's name, for listings
#[derive(Debug, Clone, Serialize)]
pub struct UpdateView {
    #[serde(flatten)]
    pub update: DailyUpdate,
    pub submitted_by_name: String,
}

impl UpdateView {
    /// Attach author names; authors missing from `users` show as "Unknown user".
    pub fn with_names(updates: Vec<DailyUpdate>, users: &[User]) -> Vec<UpdateView> {
        updates
            .into_iter()
            .map(|update| {
                let submitted_by_name = users
                    .iter()
                    .find(|u| u.id == update.user_id)
                    .map(|u| u.full_name.clone())
                    .unwrap_or_else(|| "Unknown user".to_string());
                UpdateView {
                    update,
                    submitted_by_name,
                }
            })
            .collect()
    }
}

#[cfg(test)]
impl TaskStore {
    /// Leave the update table's lock poisoned, as a writer that panicked would.
    pub(crate) fn poison_updates(&self) {
        let _ = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let _guard = self.updates.write();
                    panic!("update writer died");
                })
                .join()
        });
    }
}

fn sort_newest_first(updates: &mut [DailyUpdate]) {
    updates.sort_by_key(|u| (Reverse(u.date), Reverse(u.id)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(status: TaskStatus, due: Option<&str>) -> Task {
        Task {
            id: 1,
            title: "t".into(),
            description: String::new(),
            priority: Priority::Medium,
            status,
            due_date: due.map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").unwrap()),
            assigned_to: 2,
            assigned_by: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn past_due_open_work_is_overdue() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        assert_eq!(
            task(TaskStatus::InProgress, Some("2024-05-09")).effective_status(today),
            TaskStatus::Overdue
        );
        assert_eq!(
            task(TaskStatus::Pending, Some("2024-05-10")).effective_status(today),
            TaskStatus::Pending
        );
        assert_eq!(
            task(TaskStatus::Completed, Some("2024-01-01")).effective_status(today),
            TaskStatus::Completed
        );
    }

    #[test]
    fn legacy_open_status_reads_as_pending() {
        let status: TaskStatus = serde_json::from_str("\"open\"").unwrap();
        assert_eq!(status, TaskStatus::Pending);
        assert_eq!("open".parse::<TaskStatus>().unwrap(), TaskStatus::Pending);
    }
}
