#![cfg(not(tarpaulin_include))]

//! Server-rendered dashboard pages
//!
//! Every page is a row in [`PAGES`]: a path, a title, the roles allowed to
//! see it and the content component drawn inside the shared layout (header,
//! sidebar, content, footer). [`guard`] decides whether a visitor may see a
//! page. Forms post to `/actions/...` and redirect back with a [`Notice`].

use axum::{
    Form,
    extract::{Path, Query, State},
    http::{HeaderMap, Uri},
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::app::SharedState;
use crate::chat;
use crate::error::{AppError, Result};
use crate::login::{self, LoginRequest, SessionUser};
use crate::notice::{Notice, NoticeQuery, redirect_with};
use crate::profile;
use crate::tasks::{NewDailyUpdate, NewTask, QUICK_VIEW_LIMIT, Task, TaskStatus};
use crate::users::{NewUser, Role, User, UserStatus, UserView};

/// Content drawn inside the layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    AdminDashboard,
    RegisterUser,
    ManageUsers,
    ManagerDashboard,
    TeamMembers,
    AssignedTasks,
    EmployeeDashboard,
    EmployeeTasks,
    UpdateHistory,
    Profile,
}

impl Component {
    fn template(&self) -> &'static str {
        match self {
            Component::AdminDashboard => "admin_dashboard",
            Component::RegisterUser => "register_user",
            Component::ManageUsers => "manage_users",
            Component::ManagerDashboard => "manager_dashboard",
            Component::TeamMembers => "team_members",
            Component::AssignedTasks => "assigned_tasks",
            Component::EmployeeDashboard => "employee_dashboard",
            Component::EmployeeTasks => "employee_tasks",
            Component::UpdateHistory => "update_history",
            Component::Profile => "profile",
        }
    }
}

#[derive(Debug)]
pub struct Page {
    pub path: &'static str,
    pub title: &'static str,
    pub roles: &'static [Role],
    pub component: Component,
}

pub const PAGES: &[Page] = &[
    Page {
        path: "/admin",
        title: "Admin Dashboard",
        roles: &[Role::Admin],
        component: Component::AdminDashboard,
    },
    Page {
        path: "/admin/register-user",
        title: "Register User",
        roles: &[Role::Admin],
        component: Component::RegisterUser,
    },
    Page {
        path: "/admin/manage-users",
        title: "Manage Users",
        roles: &[Role::Admin],
        component: Component::ManageUsers,
    },
    Page {
        path: "/admin/profile",
        title: "Admin Profile",
        roles: &[Role::Admin],
        component: Component::Profile,
    },
    Page {
        path: "/manager",
        title: "Manager Dashboard",
        roles: &[Role::Manager],
        component: Component::ManagerDashboard,
    },
    Page {
        path: "/manager/team",
        title: "My Team",
        roles: &[Role::Manager],
        component: Component::TeamMembers,
    },
    Page {
        path: "/manager/all-tasks",
        title: "All Tasks",
        roles: &[Role::Manager],
        component: Component::AssignedTasks,
    },
    Page {
        path: "/manager/profile",
        title: "Manager Profile",
        roles: &[Role::Manager],
        component: Component::Profile,
    },
    Page {
        path: "/employee",
        title: "Employee Dashboard",
        roles: &[Role::Employee],
        component: Component::EmployeeDashboard,
    },
    Page {
        path: "/employee/tasks",
        title: "Daily Tasks",
        roles: &[Role::Employee],
        component: Component::EmployeeTasks,
    },
    Page {
        path: "/employee/history",
        title: "Task History",
        roles: &[Role::Employee],
        component: Component::UpdateHistory,
    },
    Page {
        path: "/employee/profile",
        title: "Employee Profile",
        roles: &[Role::Employee],
        component: Component::Profile,
    },
];

pub fn find_page(path: &str) -> Option<&'static Page> {
    let path = match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };
    PAGES.iter().find(|p| p.path == path)
}

/// Outcome of the role gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    /// No session: back to the login screen
    Login,
    /// Signed in with the wrong role: off to the user's own home
    Redirect(&'static str),
}

pub fn guard(page: &Page, user: Option<&User>) -> Access {
    match user {
        None => Access::Login,
        Some(user) if page.roles.contains(&user.role) => Access::Allow,
        Some(user) => Access::Redirect(user.role.home_path()),
    }
}

struct NavItem {
    href: &'static str,
    label: &'static str,
}

const ADMIN_NAV: &[NavItem] = &[
    NavItem { href: "/admin", label: "Dashboard" },
    NavItem { href: "/admin/register-user", label: "Register User" },
    NavItem { href: "/admin/manage-users", label: "Manage Users" },
    NavItem { href: "/admin/profile", label: "Profile" },
];

const MANAGER_NAV: &[NavItem] = &[
    NavItem { href: "/manager", label: "Dashboard" },
    NavItem { href: "/manager/team", label: "My Team" },
    NavItem { href: "/manager/all-tasks", label: "All Tasks" },
    NavItem { href: "/manager/profile", label: "Profile" },
];

const EMPLOYEE_NAV: &[NavItem] = &[
    NavItem { href: "/employee", label: "Dashboard" },
    NavItem { href: "/employee/tasks", label: "Daily Tasks" },
    NavItem { href: "/employee/history", label: "History" },
    NavItem { href: "/employee/profile", label: "Profile" },
];

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NavLink {
    pub href: &'static str,
    pub label: &'static str,
    pub active: bool,
}

/// Sidebar links for `role` with the current one marked.
///
/// A link is active on an exact match, or when `current` lies below it; the
/// role home only matches exactly so it does not light up on every page.
pub fn nav_for(role: Role, current: &str) -> Vec<NavLink> {
    let items = match role {
        Role::Admin => ADMIN_NAV,
        Role::Manager => MANAGER_NAV,
        Role::Employee => EMPLOYEE_NAV,
    };

    items
        .iter()
        .map(|item| {
            let below = item.href != role.home_path()
                && current.starts_with(&format!("{}/", item.href));
            NavLink {
                href: item.href,
                label: item.label,
                active: current == item.href || below,
            }
        })
        .collect()
}

// ============================================================================
// Templates
// ============================================================================

pub struct Renderer {
    registry: Handlebars<'static>,
}

impl Renderer {
    pub fn new() -> Result<Self> {
        let mut registry = Handlebars::new();

        let templates = [
            ("layout", include_str!("templates/layout.hbs")),
            ("login", include_str!("templates/login.hbs")),
            ("error_panel", include_str!("templates/error_panel.hbs")),
            ("admin_dashboard", include_str!("templates/admin_dashboard.hbs")),
            ("register_user", include_str!("templates/register_user.hbs")),
            ("manage_users", include_str!("templates/manage_users.hbs")),
            ("manager_dashboard", include_str!("templates/manager_dashboard.hbs")),
            ("team_members", include_str!("templates/team_members.hbs")),
            ("assigned_tasks", include_str!("templates/assigned_tasks.hbs")),
            ("employee_dashboard", include_str!("templates/employee_dashboard.hbs")),
            ("employee_tasks", include_str!("templates/employee_tasks.hbs")),
            ("update_history", include_str!("templates/update_history.hbs")),
            ("profile", include_str!("templates/profile.hbs")),
        ];
        for (name, source) in templates {
            registry.register_template_string(name, source)?;
        }
        registry.register_partial("notice", include_str!("templates/notice.hbs"))?;
        registry.register_partial("chat", include_str!("templates/chat.hbs"))?;
        registry.register_partial("updates_table", include_str!("templates/updates_table.hbs"))?;

        Ok(Self { registry })
    }

    pub fn render(&self, name: &str, data: &Value) -> Result<String> {
        Ok(self.registry.render(name, data)?)
    }

    /// Content component inside the layout.
    fn page(
        &self,
        page: &Page,
        user: &User,
        content: std::result::Result<String, AppError>,
        notice: Option<Notice>,
    ) -> Result<String> {
        let content = match content {
            Ok(html) => html,
            Err(err) => {
                log::warn!("loading {} failed: {}", page.path, err);
                self.render(
                    "error_panel",
                    &json!({ "message": err.public_message(), "retry": page.path }),
                )?
            }
        };

        self.render(
            "layout",
            &json!({
                "title": page.title,
                "user": UserView::from(user),
                "role_label": user.role.label(),
                "nav": nav_for(user.role, page.path),
                "content": content,
                "notice": notice,
            }),
        )
    }
}

fn render_response(html: Result<String>) -> Response {
    match html {
        Ok(html) => Html(html).into_response(),
        Err(err) => err.into_response(),
    }
}

// ============================================================================
// Content components
// ============================================================================

fn task_rows(tasks: &[Task], users: &[User]) -> Vec<Value> {
    tasks
        .iter()
        .map(|task| {
            let assignee = users
                .iter()
                .find(|u| u.id == task.assigned_to)
                .map(|u| u.full_name.as_str())
                .unwrap_or("Unknown user");
            json!({
                "task": task,
                "status_label": task.status.label(),
                "assignee": assignee,
                "editable": task.status != TaskStatus::Completed,
            })
        })
        .collect()
}

async fn chat_panel(state: &SharedState, session: &SessionUser, return_to: &str) -> Value {
    let prompts: Vec<Value> = chat::suggested_prompts(session.user.role)
        .iter()
        .map(|text| json!({ "text": text, "return_to": return_to }))
        .collect();
    json!({
        "history": state.chat.history(&session.token).await,
        "prompts": prompts,
        "return_to": return_to,
    })
}

async fn load_component(
    state: &SharedState,
    page: &Page,
    session: &SessionUser,
) -> Result<Value> {
    let user = &session.user;
    let today = state.today();

    let data = match page.component {
        Component::AdminDashboard => {
            let by_role = state.users.count_by_role()?;
            let by_status = state.users.count_by_status()?;
            let count = |n: Option<&usize>| n.copied().unwrap_or(0);
            let mut updates = state.visible_updates(user)?;
            updates.truncate(10);
            json!({
                "admins": count(by_role.get(&Role::Admin)),
                "managers": count(by_role.get(&Role::Manager)),
                "employees": count(by_role.get(&Role::Employee)),
                "active": count(by_status.get(&UserStatus::Active)),
                "inactive": count(by_status.get(&UserStatus::Inactive)),
                "suspended": count(by_status.get(&UserStatus::Suspended)),
                "can_comment": true,
                "updates": updates,
                "chat": chat_panel(state, session, page.path).await,
            })
        }
        Component::RegisterUser => json!({
            "roles": Role::ALL.iter().map(|r| json!({ "value": r.as_str(), "label": r.label() })).collect::<Vec<_>>(),
        }),
        Component::ManageUsers => {
            let users: Vec<Value> = state
                .users
                .all()?
                .iter()
                .map(|u| {
                    json!({
                        "user": UserView::from(u),
                        "is_active": u.is_active(),
                        "is_self": u.id == user.id,
                    })
                })
                .collect();
            json!({ "users": users })
        }
        Component::ManagerDashboard => json!({
            "team": user.team,
            "can_comment": true,
            "updates": state.visible_updates(user)?,
            "chat": chat_panel(state, session, page.path).await,
        }),
        Component::TeamMembers => {
            let members: Vec<UserView> = state.team_of(user)?.iter().map(UserView::from).collect();
            json!({ "team": user.team, "members": members })
        }
        Component::AssignedTasks => {
            let team = state.team_of(user)?;
            let assignable: Vec<UserView> = team
                .iter()
                .filter(|u| u.is_active())
                .map(UserView::from)
                .collect();
            let tasks = state.tasks.assigned_by(user.id, today)?;
            json!({
                "employees": assignable,
                "tasks": task_rows(&tasks, &team),
                "today": today,
            })
        }
        Component::EmployeeDashboard => {
            let tasks = state.tasks.active_for(user.id, today, QUICK_VIEW_LIMIT)?;
            json!({
                "tasks": task_rows(&tasks, std::slice::from_ref(user)),
                "chat": chat_panel(state, session, page.path).await,
            })
        }
        Component::EmployeeTasks => {
            let tasks = state.tasks.tasks_for(user.id, today)?;
            json!({
                "today": today,
                "tasks": task_rows(&tasks, std::slice::from_ref(user)),
            })
        }
        Component::UpdateHistory => json!({
            "updates": state.visible_updates(user)?,
        }),
        Component::Profile => json!({
            "profile": profile::build(user, &state.users, &state.tasks, today)?,
        }),
    };
    Ok(data)
}

// ============================================================================
// Handlers
// ============================================================================

/// `GET /`: the login screen, or the home page for a live session.
pub async fn login_page(
    State(state): State<SharedState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<NoticeQuery>,
) -> Response {
    if let Some(session) = login::resolve_session(&state, &headers, &jar) {
        return Redirect::to(session.user.role.home_path()).into_response();
    }
    render_response(state.pages.render(
        "login",
        &json!({ "notice": query.into_notice() }),
    ))
}

/// `GET` for every row of [`PAGES`].
pub async fn show_page(
    State(state): State<SharedState>,
    uri: Uri,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<NoticeQuery>,
) -> Response {
    let Some(page) = find_page(uri.path()) else {
        return AppError::not_found("Page not found").into_response();
    };

    let session = login::resolve_session(&state, &headers, &jar);
    match guard(page, session.as_ref().map(|s| &s.user)) {
        Access::Login => return Redirect::to("/").into_response(),
        Access::Redirect(home) => return Redirect::to(home).into_response(),
        Access::Allow => {}
    }
    let Some(session) = session else {
        return Redirect::to("/").into_response();
    };

    let content = match load_component(&state, page, &session).await {
        Ok(data) => state.pages.render(page.component.template(), &data),
        Err(err) => Err(err),
    };
    render_response(state.pages.page(page, &session.user, content, query.into_notice()))
}

/// `POST /login`
pub async fn login_form(
    State(state): State<SharedState>,
    jar: CookieJar,
    Form(credentials): Form<LoginRequest>,
) -> Response {
    match login::authenticate(&state.users, &credentials.email, &credentials.password) {
        Ok(user) => {
            let token = state.sessions.create(user.id);
            let notice = Notice::success(format!("Welcome back, {}!", user.full_name));
            (
                jar.add(login::session_cookie(token)),
                redirect_with(user.role.home_path(), notice),
            )
                .into_response()
        }
        Err(err) => redirect_with("/", Notice::from(&err)).into_response(),
    }
}

/// `GET /logout`
pub async fn logout(
    State(state): State<SharedState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    if let Some(token) = login::session_token(&headers, &jar) {
        state.end_session(&token);
    }
    (
        login::clear_session_cookie(jar),
        redirect_with("/", Notice::info("You have been logged out.")),
    )
        .into_response()
}

/// Caller of a form post, if their role is one of `roles`.
fn page_session(
    state: &SharedState,
    headers: &HeaderMap,
    jar: &CookieJar,
    roles: &[Role],
) -> std::result::Result<SessionUser, Redirect> {
    let Some(session) = login::resolve_session(state, headers, jar) else {
        return Err(redirect_with("/", Notice::error("Please log in to continue.")));
    };
    if !roles.contains(&session.user.role) {
        return Err(redirect_with(
            session.user.role.home_path(),
            Notice::error("You are not allowed to do that."),
        ));
    }
    Ok(session)
}

/// Redirect to `back` with the success text or the error.
fn finish(back: &str, outcome: Result<String>) -> Response {
    let notice = match outcome {
        Ok(text) => Notice::success(text),
        Err(err) => Notice::from(&err),
    };
    redirect_with(back, notice).into_response()
}

/// `POST /actions/register-user`
pub async fn register_user_form(
    State(state): State<SharedState>,
    headers: HeaderMap,
    jar: CookieJar,
    Form(new_user): Form<NewUser>,
) -> Response {
    if let Err(redirect) = page_session(&state, &headers, &jar, &[Role::Admin]) {
        return redirect.into_response();
    }
    let outcome = state
        .users
        .register(&new_user)
        .map(|user| format!("User {} registered successfully!", user.full_name));
    finish("/admin/register-user", outcome)
}

/// `POST /actions/users/:id/toggle`
pub async fn toggle_user_form(
    State(state): State<SharedState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<u32>,
) -> Response {
    let session = match page_session(&state, &headers, &jar, &[Role::Admin]) {
        Ok(session) => session,
        Err(redirect) => return redirect.into_response(),
    };
    if session.user.id == id {
        return finish(
            "/admin/manage-users",
            Err(AppError::bad_request("You cannot change your own status")),
        );
    }
    let outcome = state
        .toggle_user_status(id)
        .map(|user| format!("{} is now {}", user.full_name, user.status));
    finish("/admin/manage-users", outcome)
}

#[derive(Debug, Deserialize)]
pub struct TaskForm {
    #[serde(default)]
    pub assigned_to: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
}

impl TaskForm {
    fn into_new_task(self) -> Result<NewTask> {
        let assigned_to = self
            .assigned_to
            .trim()
            .parse()
            .map_err(|_| AppError::bad_request("Choose an employee for the task"))?;
        Ok(NewTask {
            assigned_to,
            title: self.title,
            description: self.description,
            due_date: self.due_date,
            priority: self.priority,
        })
    }
}

/// `POST /actions/tasks`
pub async fn assign_task_form(
    State(state): State<SharedState>,
    headers: HeaderMap,
    jar: CookieJar,
    Form(form): Form<TaskForm>,
) -> Response {
    let session = match page_session(&state, &headers, &jar, &[Role::Manager]) {
        Ok(session) => session,
        Err(redirect) => return redirect.into_response(),
    };
    let outcome = form
        .into_new_task()
        .and_then(|new_task| state.assign_task(&session.user, &new_task))
        .map(|task| format!("Task \"{}\" assigned", task.title));
    finish("/manager/all-tasks", outcome)
}

#[derive(Debug, Deserialize)]
pub struct CommentForm {
    pub text: String,
}

/// `POST /actions/updates/:id/comment`
pub async fn comment_form(
    State(state): State<SharedState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<u32>,
    Form(form): Form<CommentForm>,
) -> Response {
    let session = match page_session(&state, &headers, &jar, &[Role::Admin, Role::Manager]) {
        Ok(session) => session,
        Err(redirect) => return redirect.into_response(),
    };
    let outcome = state
        .comment_on_update(&session.user, id, &form.text)
        .map(|_| "Comment added".to_string());
    finish(session.user.role.home_path(), outcome)
}

/// Daily update form; the task picker posts an empty string for "no task".
#[derive(Debug, Deserialize)]
pub struct DailyUpdateForm {
    pub title: String,
    pub date: String,
    pub work_done: String,
    #[serde(default)]
    pub reference_link: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub task_id: String,
}

impl DailyUpdateForm {
    fn into_new_update(self) -> Result<NewDailyUpdate> {
        let task_id = match self.task_id.trim() {
            "" => None,
            raw => Some(
                raw.parse()
                    .map_err(|_| AppError::bad_request("Unknown task selected"))?,
            ),
        };
        Ok(NewDailyUpdate {
            title: self.title,
            date: self.date,
            work_done: self.work_done,
            reference_link: self.reference_link,
            comment: self.comment,
            task_id,
        })
    }
}

/// `POST /actions/daily-update`
pub async fn daily_update_form(
    State(state): State<SharedState>,
    headers: HeaderMap,
    jar: CookieJar,
    Form(form): Form<DailyUpdateForm>,
) -> Response {
    let session = match page_session(&state, &headers, &jar, &[Role::Employee]) {
        Ok(session) => session,
        Err(redirect) => return redirect.into_response(),
    };
    let today = state.today();
    let outcome = form
        .into_new_update()
        .and_then(|update| state.tasks.submit_update(&session.user, &update, today))
        .map(|_| "Task submitted successfully!".to_string());
    finish("/employee/tasks", outcome)
}

#[derive(Debug, Deserialize)]
pub struct StatusForm {
    pub status: String,
    #[serde(default)]
    pub return_to: Option<String>,
}

/// `POST /actions/tasks/:id/status`
pub async fn task_status_form(
    State(state): State<SharedState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<u32>,
    Form(form): Form<StatusForm>,
) -> Response {
    let session = match page_session(&state, &headers, &jar, &[Role::Employee]) {
        Ok(session) => session,
        Err(redirect) => return redirect.into_response(),
    };
    let back = return_path(&session.user, form.return_to.as_deref());
    let today = state.today();
    let outcome = form
        .status
        .parse::<TaskStatus>()
        .and_then(|status| state.tasks.set_status(session.user.id, id, status, today))
        .map(|task| format!("\"{}\" marked {}", task.title, task.status.label()));
    finish(back, outcome)
}

/// A page of the user's own to go back to; anything else falls back to home.
fn return_path(user: &User, requested: Option<&str>) -> &'static str {
    requested
        .and_then(find_page)
        .filter(|page| guard(page, Some(user)) == Access::Allow)
        .map(|page| page.path)
        .unwrap_or_else(|| user.role.home_path())
}

#[derive(Debug, Deserialize)]
pub struct ChatForm {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub return_to: Option<String>,
}

/// `POST /actions/chat`
pub async fn chat_form(
    State(state): State<SharedState>,
    headers: HeaderMap,
    jar: CookieJar,
    Form(form): Form<ChatForm>,
) -> Response {
    let session = match page_session(&state, &headers, &jar, &Role::ALL) {
        Ok(session) => session,
        Err(redirect) => return redirect.into_response(),
    };
    let back = return_path(&session.user, form.return_to.as_deref());

    match state.chat(&session, &form.message).await {
        Ok(reply) if reply.delivered => Redirect::to(back).into_response(),
        Ok(reply) => {
            let text = reply.error.unwrap_or_else(|| chat::FALLBACK_REPLY.to_string());
            redirect_with(back, Notice::error(text)).into_response()
        }
        Err(err) => redirect_with(back, Notice::from(&err)).into_response(),
    }
}

/// `POST /actions/chat/clear`
pub async fn clear_chat_form(
    State(state): State<SharedState>,
    headers: HeaderMap,
    jar: CookieJar,
    Form(form): Form<ChatForm>,
) -> Response {
    let session = match page_session(&state, &headers, &jar, &Role::ALL) {
        Ok(session) => session,
        Err(redirect) => return redirect.into_response(),
    };
    state.chat.clear(&session.token);
    Redirect::to(return_path(&session.user, form.return_to.as_deref())).into_response()
}
