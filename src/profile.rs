//! Profile cards shown on every role's profile page.

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::error::Result;
use crate::tasks::{TaskStatus, TaskStore};
use crate::users::{Role, User, UserStatus, UserStore};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Stat {
    pub label: &'static str,
    pub value: String,
}

impl Stat {
    fn new(label: &'static str, value: impl ToString) -> Self {
        Self {
            label,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileStats {
    pub full_name: String,
    pub email: String,
    pub role: Role,
    pub position: &'static str,
    pub team: Option<String>,
    pub joined: NaiveDate,
    pub days_in_company: i64,
    pub stats: Vec<Stat>,
}

/// Build the profile for `user` as of `today`.
pub fn build(user: &User, users: &UserStore, tasks: &TaskStore, today: NaiveDate) -> Result<ProfileStats> {
    let joined = user.created_at.date_naive();
    let stats = match user.role {
        Role::Admin => admin_stats(users, tasks)?,
        Role::Manager => manager_stats(user, users, tasks, today)?,
        Role::Employee => employee_stats(user, tasks, today)?,
    };

    Ok(ProfileStats {
        full_name: user.full_name.clone(),
        email: user.email.clone(),
        role: user.role,
        position: user.role.label(),
        team: user.team.clone(),
        joined,
        days_in_company: (today - joined).num_days().max(0),
        stats,
    })
}

fn admin_stats(users: &UserStore, tasks: &TaskStore) -> Result<Vec<Stat>> {
    let by_status = users.count_by_status()?;
    let count = |s: UserStatus| by_status.get(&s).copied().unwrap_or(0);
    let total: usize = by_status.values().sum();

    Ok(vec![
        Stat::new("Users Managed", total),
        Stat::new("Active Users", count(UserStatus::Active)),
        Stat::new(
            "Inactive Users",
            count(UserStatus::Inactive) + count(UserStatus::Suspended),
        ),
        Stat::new("Updates On Record", tasks.all_updates()?.len()),
    ])
}

fn manager_stats(
    manager: &User,
    users: &UserStore,
    tasks: &TaskStore,
    today: NaiveDate,
) -> Result<Vec<Stat>> {
    let team = match manager.team.as_deref() {
        Some(team) => users.team_members(team)?,
        None => Vec::new(),
    };
    let ids: Vec<u32> = team.iter().map(|u| u.id).collect();
    let assigned = tasks.assigned_by(manager.id, today)?;
    let open = assigned.iter().filter(|t| t.status.is_active()).count();
    let week_ago = today - Duration::days(7);
    let recent = tasks
        .updates_for(&ids)?
        .into_iter()
        .filter(|u| u.date > week_ago)
        .count();

    Ok(vec![
        Stat::new("Team Size", team.len()),
        Stat::new("Tasks Assigned", assigned.len()),
        Stat::new("Open Tasks", open),
        Stat::new("Team Updates (7 days)", recent),
    ])
}

fn employee_stats(employee: &User, tasks: &TaskStore, today: NaiveDate) -> Result<Vec<Stat>> {
    let mine = tasks.tasks_for(employee.id, today)?;
    let count = |s: TaskStatus| mine.iter().filter(|t| t.status == s).count();

    Ok(vec![
        Stat::new("Updates Submitted", tasks.history_for(employee.id)?.len()),
        Stat::new("Tasks Completed", count(TaskStatus::Completed)),
        Stat::new(
            "Active Tasks",
            count(TaskStatus::Pending) + count(TaskStatus::InProgress),
        ),
        Stat::new("Overdue Tasks", count(TaskStatus::Overdue)),
    ])
}
