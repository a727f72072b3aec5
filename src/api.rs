#![cfg(not(tarpaulin_include))]

//! JSON endpoints under `/api`
//!
//! Role checks happen in the route layers (see [`crate::app::router`]); the
//! handlers here receive the caller as an `Extension<SessionUser>`.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::app::SharedState;
use crate::chat;
use crate::downloader;
use crate::error::{AppError, Result};
use crate::login::SessionUser;
use crate::profile;
use crate::tasks::{NewDailyUpdate, NewTask, QUICK_VIEW_LIMIT, TaskStatus};
use crate::users::{NewUser, UserStatus, UserView};

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct CommentBody {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
}

fn views<'a>(users: impl IntoIterator<Item = &'a crate::users::User>) -> Vec<UserView> {
    users.into_iter().map(UserView::from).collect()
}

/// `GET /api/profile`
pub async fn profile(
    State(state): State<SharedState>,
    Extension(session): Extension<SessionUser>,
) -> Result<Json<Value>> {
    let profile = profile::build(&session.user, &state.users, &state.tasks, state.today())?;
    Ok(Json(json!({ "success": true, "profile": profile })))
}

// ============================================================================
// Admin
// ============================================================================

/// `GET /api/admin/users`
pub async fn list_users(State(state): State<SharedState>) -> Result<Json<Value>> {
    let users = state.users.all()?;
    Ok(Json(json!({ "success": true, "users": views(&users) })))
}

/// `POST /api/admin/users`
pub async fn create_user(
    State(state): State<SharedState>,
    Json(new_user): Json<NewUser>,
) -> Result<impl IntoResponse> {
    let user = state.users.register(&new_user)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": format!("User {} registered successfully!", user.full_name),
            "user": UserView::from(&user),
        })),
    ))
}

fn ensure_not_self(session: &SessionUser, id: u32) -> Result<()> {
    if session.user.id == id {
        return Err(AppError::bad_request("You cannot change your own status"));
    }
    Ok(())
}

/// `PUT /api/admin/users/:id/status`
pub async fn update_user_status(
    State(state): State<SharedState>,
    Extension(session): Extension<SessionUser>,
    Path(id): Path<u32>,
    Json(body): Json<StatusBody>,
) -> Result<Json<Value>> {
    ensure_not_self(&session, id)?;
    let status: UserStatus = body.status.parse()?;
    let user = state.set_user_status(id, status)?;
    Ok(Json(json!({ "success": true, "user": UserView::from(&user) })))
}

/// `POST /api/admin/users/:id/toggle-status`
pub async fn toggle_user_status(
    State(state): State<SharedState>,
    Extension(session): Extension<SessionUser>,
    Path(id): Path<u32>,
) -> Result<Json<Value>> {
    ensure_not_self(&session, id)?;
    let user = state.toggle_user_status(id)?;
    Ok(Json(json!({ "success": true, "user": UserView::from(&user) })))
}

/// `GET /api/admin/reports/activity.csv`
pub async fn activity_csv(State(state): State<SharedState>) -> Result<impl IntoResponse> {
    let rows = downloader::activity_rows(&state.users, &state.tasks, state.today())?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"activity.csv\"",
            ),
        ],
        downloader::to_csv(&rows),
    ))
}

/// `GET /api/admin/reports/activity.xlsx`
pub async fn activity_xlsx(State(state): State<SharedState>) -> Result<impl IntoResponse> {
    let rows = downloader::activity_rows(&state.users, &state.tasks, state.today())?;
    let bytes = downloader::to_xlsx(&rows)?;
    Ok((
        [
            (
                header::CONTENT_TYPE,
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            ),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"activity.xlsx\"",
            ),
        ],
        bytes,
    ))
}

// ============================================================================
// Shared by all roles
// ============================================================================

/// `GET /api/{admin|manager|employee}/updates`
pub async fn list_updates(
    State(state): State<SharedState>,
    Extension(session): Extension<SessionUser>,
) -> Result<Json<Value>> {
    let updates = state.visible_updates(&session.user)?;
    Ok(Json(json!({ "success": true, "updates": updates })))
}

/// `POST /api/{admin|manager|employee}/chat`
///
/// A failed model call still answers 200 with the fallback reply and
/// `success: false`, so the widget can show it in the transcript.
pub async fn chat(
    State(state): State<SharedState>,
    Extension(session): Extension<SessionUser>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<Value>> {
    let reply = state.chat(&session, &request.message).await?;
    let mut body = json!({
        "success": reply.delivered,
        "response": reply.entry.text,
    });
    if let Some(error) = reply.error {
        body["message"] = Value::String(error);
    }
    Ok(Json(body))
}

/// `GET /api/chat/history`
pub async fn chat_history(
    State(state): State<SharedState>,
    Extension(session): Extension<SessionUser>,
) -> Json<Value> {
    let history = state.chat.history(&session.token).await;
    Json(json!({ "success": true, "history": history }))
}

/// `DELETE /api/chat/history`
pub async fn clear_chat_history(
    State(state): State<SharedState>,
    Extension(session): Extension<SessionUser>,
) -> Json<Value> {
    state.chat.clear(&session.token);
    Json(json!({ "success": true, "message": "Conversation cleared." }))
}

/// `GET /api/chat/prompts`
pub async fn chat_prompts(Extension(session): Extension<SessionUser>) -> Json<Value> {
    Json(json!({
        "success": true,
        "prompts": chat::suggested_prompts(session.user.role),
    }))
}

// ============================================================================
// Manager
// ============================================================================

/// `GET /api/manager/team`
pub async fn team_members(
    State(state): State<SharedState>,
    Extension(session): Extension<SessionUser>,
) -> Result<Json<Value>> {
    let team = state.team_of(&session.user)?;
    Ok(Json(json!({ "success": true, "employees": views(&team) })))
}

/// `POST /api/{admin|manager}/updates/:id/comment`
pub async fn comment_on_update(
    State(state): State<SharedState>,
    Extension(session): Extension<SessionUser>,
    Path(id): Path<u32>,
    Json(body): Json<CommentBody>,
) -> Result<Json<Value>> {
    let update = state.comment_on_update(&session.user, id, &body.text)?;
    Ok(Json(json!({ "success": true, "update": update })))
}

/// `GET /api/manager/tasks`
pub async fn assigned_tasks(
    State(state): State<SharedState>,
    Extension(session): Extension<SessionUser>,
) -> Result<Json<Value>> {
    let tasks = state.tasks.assigned_by(session.user.id, state.today())?;
    Ok(Json(json!({ "success": true, "tasks": tasks })))
}

/// `POST /api/manager/tasks`
pub async fn assign_task(
    State(state): State<SharedState>,
    Extension(session): Extension<SessionUser>,
    Json(new_task): Json<NewTask>,
) -> Result<impl IntoResponse> {
    let task = state.assign_task(&session.user, &new_task)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": format!("Task \"{}\" assigned", task.title),
            "task": task,
        })),
    ))
}

// ============================================================================
// Employee
// ============================================================================

/// `GET /api/employee/tasks`
pub async fn employee_tasks(
    State(state): State<SharedState>,
    Extension(session): Extension<SessionUser>,
) -> Result<Json<Value>> {
    let tasks = state.tasks.tasks_for(session.user.id, state.today())?;
    Ok(Json(json!({ "success": true, "tasks": tasks })))
}

/// `GET /api/employee/tasks/active`
pub async fn active_tasks(
    State(state): State<SharedState>,
    Extension(session): Extension<SessionUser>,
) -> Result<Json<Value>> {
    let tasks = state
        .tasks
        .active_for(session.user.id, state.today(), QUICK_VIEW_LIMIT)?;
    Ok(Json(json!({ "success": true, "tasks": tasks })))
}

/// `PUT /api/employee/tasks/:id/status`
pub async fn update_task_status(
    State(state): State<SharedState>,
    Extension(session): Extension<SessionUser>,
    Path(id): Path<u32>,
    Json(body): Json<StatusBody>,
) -> Result<Json<Value>> {
    let status: TaskStatus = body.status.parse()?;
    let task = state
        .tasks
        .set_status(session.user.id, id, status, state.today())?;
    Ok(Json(json!({ "success": true, "task": task })))
}

/// `POST /api/employee/updates`
pub async fn submit_update(
    State(state): State<SharedState>,
    Extension(session): Extension<SessionUser>,
    Json(new_update): Json<NewDailyUpdate>,
) -> Result<impl IntoResponse> {
    let update = state
        .tasks
        .submit_update(&session.user, &new_update, state.today())?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Task submitted successfully!",
            "update": update,
        })),
    ))
}
