use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post, put},
};
use chrono::{Local, NaiveDate};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;

use crate::api;
use crate::assistant;
use crate::chat::{ChatModel, ChatReply, ChatService, GeminiClient};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::login::{self, SessionStore, SessionUser};
use crate::pages::{self, Renderer};
use crate::tasks::{DailyUpdate, NewTask, Task, TaskStore, UpdateView};
use crate::users::{NewUser, Role, User, UserStatus, UserStore};

/// Everything a request handler needs
pub struct AppState {
    pub config: Config,
    pub users: UserStore,
    pub tasks: TaskStore,
    pub sessions: SessionStore,
    pub chat: ChatService,
    pub pages: Renderer,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Open the stores under `config.database_dir` and wire the chat backend.
    pub fn new(config: Config, model: Arc<dyn ChatModel>) -> Result<Self> {
        let users = UserStore::open(&config.database_dir)?;
        let tasks = TaskStore::open(&config.database_dir)?;
        let sessions = SessionStore::new(config.session_ttl()?);
        let chat = ChatService::new(model, config.chat.history_limit);
        let pages = Renderer::new()?;

        let state = Self {
            config,
            users,
            tasks,
            sessions,
            chat,
            pages,
        };
        state.seed_admin()?;
        Ok(state)
    }

    /// Same as [`AppState::new`] with the generateContent client from the config.
    pub fn from_config(config: Config) -> Result<Self> {
        let model = Arc::new(GeminiClient::from_config(&config.chat)?);
        if config.chat.api_key.is_none() {
            log::warn!("GEMINI_API_KEY not set; chat replies will fall back");
        }
        Self::new(config, model)
    }

    fn seed_admin(&self) -> Result<()> {
        let Some(admin) = &self.config.bootstrap_admin else {
            return Ok(());
        };
        if !self.users.is_empty()? {
            return Ok(());
        }

        let user = self.users.register(&NewUser {
            full_name: admin.full_name.clone(),
            email: admin.email.clone(),
            password: admin.password.clone(),
            role: Role::Admin.to_string(),
            team: None,
            status: None,
        })?;
        log::info!("seeded bootstrap admin {}", user.email);
        Ok(())
    }

    pub fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    /// Change a user's status. Leaving `active` ends their sessions.
    pub fn set_user_status(&self, id: u32, status: UserStatus) -> Result<User> {
        let user = self.users.set_status(id, status)?;
        self.after_status_change(&user);
        Ok(user)
    }

    pub fn toggle_user_status(&self, id: u32) -> Result<User> {
        let user = self.users.toggle_status(id)?;
        self.after_status_change(&user);
        Ok(user)
    }

    fn after_status_change(&self, user: &User) {
        if user.is_active() {
            return;
        }
        let dropped = self.sessions.revoke_user(user.id);
        for token in &dropped {
            self.chat.clear(token);
        }
        if !dropped.is_empty() {
            log::info!("ended {} session(s) of user {}", dropped.len(), user.id);
        }
    }

    /// Revoke a token and forget the chat transcript tied to it.
    pub fn end_session(&self, token: &str) {
        self.sessions.revoke(token);
        self.chat.clear(token);
    }

    /// Drop expired sessions along with their transcripts; returns how many went.
    pub fn sweep_expired_sessions(&self) -> usize {
        let expired = self.sessions.purge_expired();
        for token in &expired {
            self.chat.clear(token);
        }
        expired.len()
    }

    /// Employees in a manager's team.
    pub fn team_of(&self, manager: &User) -> Result<Vec<User>> {
        match manager.team.as_deref() {
            Some(team) => self.users.team_members(team),
            None => Ok(Vec::new()),
        }
    }

    pub fn assign_task(&self, assigner: &User, new_task: &NewTask) -> Result<Task> {
        let assignee = self.users.get(new_task.assigned_to)?;
        self.tasks.assign(assigner, &assignee, new_task)
    }

    pub fn comment_on_update(&self, author: &User, update_id: u32, text: &str) -> Result<DailyUpdate> {
        let update = self.tasks.get_update(update_id)?;
        let submitter = self.users.get(update.user_id)?;
        self.tasks.add_comment(update_id, author, &submitter, text)
    }

    /// Updates visible to `viewer`: everything for admins, the team's for managers,
    /// their own for employees.
    pub fn visible_updates(&self, viewer: &User) -> Result<Vec<UpdateView>> {
        let updates = match viewer.role {
            Role::Admin => self.tasks.all_updates()?,
            Role::Manager => {
                let ids: Vec<u32> = self.team_of(viewer)?.iter().map(|u| u.id).collect();
                self.tasks.updates_for(&ids)?
            }
            Role::Employee => self.tasks.history_for(viewer.id)?,
        };
        Ok(UpdateView::with_names(updates, &self.users.all()?))
    }

    /// One chat turn: the assistant either acts on the message or answers it.
    pub async fn chat(&self, session: &SessionUser, message: &str) -> Result<ChatReply> {
        assistant::respond(self, session, message).await
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

fn api_router(state: &SharedState) -> Router<SharedState> {
    let admin = Router::new()
        .route("/users", get(api::list_users).post(api::create_user))
        .route("/users/:id/status", put(api::update_user_status))
        .route("/users/:id/toggle-status", post(api::toggle_user_status))
        .route("/updates", get(api::list_updates))
        .route("/updates/:id/comment", post(api::comment_on_update))
        .route("/reports/activity.csv", get(api::activity_csv))
        .route("/reports/activity.xlsx", get(api::activity_xlsx))
        .route("/chat", post(api::chat))
        .route_layer(middleware::from_fn_with_state(state.clone(), login::require_admin));

    let manager = Router::new()
        .route("/team", get(api::team_members))
        .route("/updates", get(api::list_updates))
        .route("/updates/:id/comment", post(api::comment_on_update))
        .route("/tasks", get(api::assigned_tasks).post(api::assign_task))
        .route("/chat", post(api::chat))
        .route_layer(middleware::from_fn_with_state(state.clone(), login::require_manager));

    let employee = Router::new()
        .route("/tasks", get(api::employee_tasks))
        .route("/tasks/active", get(api::active_tasks))
        .route("/tasks/:id/status", put(api::update_task_status))
        .route("/updates", get(api::list_updates).post(api::submit_update))
        .route("/chat", post(api::chat))
        .route_layer(middleware::from_fn_with_state(state.clone(), login::require_employee));

    let common = Router::new()
        .route("/logout", post(login::api_logout))
        .route("/me", get(login::api_me))
        .route("/profile", get(api::profile))
        .route(
            "/chat/history",
            get(api::chat_history).delete(api::clear_chat_history),
        )
        .route("/chat/prompts", get(api::chat_prompts))
        .route_layer(middleware::from_fn_with_state(state.clone(), login::require_session));

    Router::new()
        .route("/login", post(login::api_login))
        .merge(common)
        .nest("/admin", admin)
        .nest("/manager", manager)
        .nest("/employee", employee)
}

fn page_router() -> Router<SharedState> {
    let mut router = Router::new()
        .route("/", get(pages::login_page))
        .route("/login", post(pages::login_form))
        .route("/logout", get(pages::logout))
        .route("/actions/register-user", post(pages::register_user_form))
        .route("/actions/users/:id/toggle", post(pages::toggle_user_form))
        .route("/actions/tasks", post(pages::assign_task_form))
        .route("/actions/updates/:id/comment", post(pages::comment_form))
        .route("/actions/daily-update", post(pages::daily_update_form))
        .route("/actions/tasks/:id/status", post(pages::task_status_form))
        .route("/actions/chat", post(pages::chat_form))
        .route("/actions/chat/clear", post(pages::clear_chat_form));

    for page in pages::PAGES {
        router = router.route(page.path, get(pages::show_page));
    }
    router
}

/// The full application: pages, JSON API, static files and CORS.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .merge(page_router())
        .nest("/api", api_router(&state))
        .nest_service("/static", ServeDir::new("static"))
        .layer(cors_layer(&state.config))
        .with_state(state)
}

pub async fn run(config: Config) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let addr = config.socket_addr()?;
    let state = Arc::new(AppState::from_config(config)?);
    let app = router(state);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Config(format!("cannot bind {}: {}", addr, e)))?;
    log::info!("Listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
