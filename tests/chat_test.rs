use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use staffdesk::Result;
use staffdesk::chat::{self, ChatModel, ChatService, GeminiClient, Sender};
use staffdesk::config::ChatConfig;
use staffdesk::tasks::TaskStore;
use staffdesk::users::{NewUser, Role, UserStore};

/// Slow on "slow", quick otherwise; replies "re: <message>".
struct Delayed;

#[async_trait]
impl ChatModel for Delayed {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let message = prompt
            .lines()
            .rev()
            .find_map(|l| l.strip_prefix("User: "))
            .unwrap_or_default()
            .to_string();
        if message == "slow" {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok(format!("re: {}", message))
    }
}

#[tokio::test]
async fn replies_follow_their_message_under_concurrent_sends() {
    let service = Arc::new(ChatService::new(Arc::new(Delayed), 20));

    let a = {
        let service = service.clone();
        tokio::spawn(async move { service.send("s1", Role::Employee, "", "slow").await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    let b = service.send("s1", Role::Employee, "", "fast").await.unwrap();
    a.await.unwrap().unwrap();
    assert_eq!(b.entry.text, "re: fast");

    let history = service.history("s1").await;
    assert_eq!(history.len(), 4);
    for pair in history.chunks(2) {
        assert_eq!(pair[0].sender, Sender::User);
        assert_eq!(pair[1].sender, Sender::Bot);
        assert_eq!(pair[1].text, format!("re: {}", pair[0].text));
    }
}

#[tokio::test]
async fn sessions_keep_separate_transcripts() {
    let service = ChatService::new(Arc::new(Delayed), 20);
    service.send("a", Role::Admin, "", "one").await.unwrap();
    service.send("b", Role::Admin, "", "two").await.unwrap();

    assert_eq!(service.history("a").await.len(), 2);
    service.clear("a");
    assert!(service.history("a").await.is_empty());
    assert_eq!(service.history("b").await.len(), 2);
}

#[tokio::test]
async fn unconfigured_client_fails_with_upstream_error() {
    let client = GeminiClient::from_config(&ChatConfig::default()).unwrap();
    let err = client.generate("hello").await.unwrap_err();
    assert_eq!(err.status().as_u16(), 502);
}

#[test]
fn manager_context_lists_the_team() {
    let dir = TempDir::new().unwrap();
    let users = UserStore::open(dir.path()).unwrap();
    let tasks = TaskStore::open(dir.path()).unwrap();
    let add = |name: &str, email: &str, role: &str| {
        users
            .register(&NewUser {
                full_name: name.into(),
                email: email.into(),
                password: "secret123".into(),
                role: role.into(),
                team: Some("Ops".into()),
                status: None,
            })
            .unwrap()
    };
    let manager = add("Max", "max@b.co", "manager");
    add("Eve", "eve@b.co", "employee");

    let today = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
    let context = chat::context_for(&manager, &users, &tasks, today).unwrap();
    assert!(context.contains("Today is 2024-06-10."));
    assert!(context.contains("- Eve (active)"));
}

#[test]
fn every_role_has_suggested_prompts() {
    for role in Role::ALL {
        assert!(!chat::suggested_prompts(role).is_empty());
    }
}

#[test]
fn admin_context_names_inactive_users_without_emails() {
    let dir = TempDir::new().unwrap();
    let users = UserStore::open(dir.path()).unwrap();
    let tasks = TaskStore::open(dir.path()).unwrap();
    let admin = users
        .register(&NewUser {
            full_name: "Ada".into(),
            email: "ada@b.co".into(),
            password: "secret123".into(),
            role: "admin".into(),
            team: None,
            status: None,
        })
        .unwrap();
    users
        .register(&NewUser {
            full_name: "Ivy Idle".into(),
            email: "ivy@b.co".into(),
            password: "secret123".into(),
            role: "employee".into(),
            team: Some("Ops".into()),
            status: Some("inactive".into()),
        })
        .unwrap();

    let today = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
    let context = chat::context_for(&admin, &users, &tasks, today).unwrap();
    assert!(context.contains("- Ivy Idle is inactive."));
    assert!(!context.contains("ivy@b.co"));
}
