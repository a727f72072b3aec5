//! Message box shown after a form round-trip.
//!
//! Form handlers redirect with `?notice=...&kind=...`; the page layout renders
//! the notice as a full-screen overlay with an OK button that dismisses it.

use axum::response::Redirect;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Success,
    Error,
    #[default]
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

impl Notice {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            text: text.into(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            text: text.into(),
        }
    }

    /// `path?notice=...&kind=...`, appending to an existing query if any.
    pub fn url_for(&self, path: &str) -> String {
        let sep = if path.contains('?') { '&' } else { '?' };
        let kind = match self.kind {
            NoticeKind::Success => "success",
            NoticeKind::Error => "error",
            NoticeKind::Info => "info",
        };
        format!(
            "{}{}notice={}&kind={}",
            path,
            sep,
            urlencoding::encode(&self.text),
            kind
        )
    }
}

impl From<&AppError> for Notice {
    fn from(err: &AppError) -> Self {
        Notice::error(err.public_message())
    }
}

/// Query parameters carrying a notice
#[derive(Debug, Default, Deserialize)]
pub struct NoticeQuery {
    pub notice: Option<String>,
    #[serde(default)]
    pub kind: NoticeKind,
}

impl NoticeQuery {
    pub fn into_notice(self) -> Option<Notice> {
        let text = self.notice?.trim().to_string();
        if text.is_empty() {
            return None;
        }
        Some(Notice {
            kind: self.kind,
            text,
        })
    }
}

/// Redirect to `path` with a message box.
pub fn redirect_with(path: &str, notice: Notice) -> Redirect {
    Redirect::to(&notice.url_for(path))
}
