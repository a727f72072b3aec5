/*!
# StaffDesk

A role-based employee management dashboard, built in Rust.

## Overview

Administrators register users and manage their status, managers hand out
tasks to their team and review the team's daily updates, and employees
track their tasks and file daily work updates. Every role gets a profile
page and a chat assistant backed by a generative-language API, which can
also register users, assign tasks, file updates and leave feedback when asked.

## Architecture

### Pages
- Server-rendered with handlebars templates: header, sidebar, content, footer
- A static page table with a role allow-list per page
- Forms post to `/actions/...` and redirect back with a message box

### JSON API
- `/api/login`, `/api/logout`, `/api/me`, `/api/profile`
- `/api/admin/...`, `/api/manager/...`, `/api/employee/...`, each behind a role layer
- `/api/chat/...` for the assistant transcript

### Data Persistence Layer
- One JSON file per table under the database directory
- Writes go to a temporary file that is renamed over the table

## Modules

- **users**: Roles, statuses and the user store
- **login**: Password hashing, sessions and the role middleware
- **tasks**: Assigned tasks and daily updates
- **profile**: Role-specific profile statistics
- **chat**: Chat assistant transcripts and the model client
- **assistant**: Actions the chat assistant carries out for the caller
- **pages**: Page table, role gate, navigation and form handlers
- **notice**: Message box carried through redirects
- **downloader**: Activity report export (CSV, XLSX)
- **api**: JSON endpoints
- **app**: Shared state, routing and the server
- **config**, **error**, **storage**: Ambient plumbing
*/

pub mod api;
pub mod app;
pub mod assistant;
pub mod chat;
pub mod config;
pub mod downloader;
pub mod error;
pub mod login;
pub mod notice;
pub mod pages;
pub mod profile;
pub mod storage;
pub mod tasks;
pub mod users;

pub use app::{AppState, SharedState, router};
pub use config::Config;
pub use error::{AppError, Result};
