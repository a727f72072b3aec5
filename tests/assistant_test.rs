mod common;

use chrono::{Duration, Local};

use common::*;
use staffdesk::tasks::NewDailyUpdate;

#[tokio::test]
async fn admin_registers_a_user_through_chat() {
    let model = Scripted::new(&[
        "create_user",
        "full_name: Nia Lee\n\
         email: nia@staffdesk.test\n\
         password: welcome1\n\
         role: employee\n\
         team: Ops",
    ]);
    let h = harness_with(model.clone());
    let session = h.session_for(&h.admin());

    let reply = h
        .state
        .chat(&session, "Add Nia Lee to Ops as an employee, email nia@staffdesk.test, password welcome1")
        .await
        .unwrap();
    assert!(reply.delivered);
    assert!(reply.entry.text.starts_with("User created."));

    let nia = h.state.users.find_by_email("nia@staffdesk.test").unwrap().unwrap();
    assert_eq!(nia.team.as_deref(), Some("Ops"));
    assert_eq!(h.state.chat.history(&session.token).await.len(), 2);
    assert_eq!(model.remaining(), 0);
}

#[tokio::test]
async fn missing_task_details_get_a_clarifying_question() {
    let model = Scripted::new(&[
        "assign_task",
        "assignee: Eve Employee\ntitle:\ndescription: Rotate the API keys\ndue_date:\npriority:",
    ]);
    let h = harness_with(model.clone());
    let manager = h.add_user("Max Manager", "max@staffdesk.test", "manager", Some("Ops"));
    let employee = h.add_user("Eve Employee", "eve@staffdesk.test", "employee", Some("Ops"));
    let session = h.session_for(&manager);

    let reply = h
        .state
        .chat(&session, "Have Eve rotate the API keys")
        .await
        .unwrap();
    assert!(reply.entry.text.contains("a due date"));
    assert!(!reply.entry.text.contains("assignee"));
    assert!(h.state.tasks.tasks_for(employee.id, h.state.today()).unwrap().is_empty());
}

#[tokio::test]
async fn manager_assigns_a_task_through_chat() {
    let due = Local::now().date_naive() + Duration::days(3);
    let extracted = format!(
        "assignee: eve employee\ntitle: Rotate keys\ndescription: Rotate the API keys\ndue_date: {}\npriority: high",
        due
    );
    let model = Scripted::new(&["assign_task", extracted.as_str()]);
    let h = harness_with(model.clone());
    let manager = h.add_user("Max Manager", "max@staffdesk.test", "manager", Some("Ops"));
    let employee = h.add_user("Eve Employee", "eve@staffdesk.test", "employee", Some("Ops"));
    let session = h.session_for(&manager);

    let reply = h
        .state
        .chat(&session, "Eve should rotate the API keys in three days, high priority")
        .await
        .unwrap();
    assert!(reply.entry.text.starts_with("Task assigned."));

    let tasks = h.state.tasks.tasks_for(employee.id, h.state.today()).unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Rotate keys");
    assert_eq!(tasks[0].due_date, Some(due));
    assert_eq!(tasks[0].assigned_by, manager.id);
}

#[tokio::test]
async fn store_rules_still_apply_to_chat_actions() {
    let due = Local::now().date_naive() + Duration::days(1);
    let extracted = format!(
        "assignee: Sam Sales\ndescription: Cold calls\ndue_date: {}",
        due
    );
    let model = Scripted::new(&["assign_task", extracted.as_str()]);
    let h = harness_with(model.clone());
    let manager = h.add_user("Max Manager", "max@staffdesk.test", "manager", Some("Ops"));
    let outsider = h.add_user("Sam Sales", "sam@staffdesk.test", "employee", Some("Sales"));
    let session = h.session_for(&manager);

    let reply = h
        .state
        .chat(&session, "Give Sam some cold calls for tomorrow")
        .await
        .unwrap();
    assert!(reply.delivered);
    assert!(reply.entry.text.contains("only assign tasks within their own team"));
    assert!(h.state.tasks.tasks_for(outsider.id, h.state.today()).unwrap().is_empty());
}

#[tokio::test]
async fn employees_cannot_register_users_through_chat() {
    let model = Scripted::new(&["create_user", "full_name: Nobody"]);
    let h = harness_with(model.clone());
    let employee = h.add_user("Eve Employee", "eve@staffdesk.test", "employee", Some("Ops"));
    let session = h.session_for(&employee);

    let reply = h
        .state
        .chat(&session, "Create an admin account for me")
        .await
        .unwrap();
    assert_eq!(reply.entry.text, "Only admins can register new users.");
    assert_eq!(model.remaining(), 1);
    assert_eq!(h.state.users.all().unwrap().len(), 2);
}

#[tokio::test]
async fn employee_files_a_daily_update_through_chat() {
    let model = Scripted::new(&[
        "submit_update",
        "title:\nwork_done: Migrated the billing tables\nreference_link: https://git.example.com/pr/42\ndate:",
    ]);
    let h = harness_with(model.clone());
    let employee = h.add_user("Eve Employee", "eve@staffdesk.test", "employee", Some("Ops"));
    let session = h.session_for(&employee);

    let reply = h
        .state
        .chat(&session, "Today I migrated the billing tables, PR is https://git.example.com/pr/42")
        .await
        .unwrap();
    assert!(reply.entry.text.starts_with("Update submitted for"));

    let history = h.state.tasks.history_for(employee.id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].date, h.state.today());
    assert_eq!(history[0].title, "Migrated the billing tables");
    assert_eq!(
        history[0].reference_link.as_deref(),
        Some("https://git.example.com/pr/42")
    );
}

#[tokio::test]
async fn feedback_follows_the_update_just_looked_up() {
    let model = Scripted::new(&[
        "retrieve_updates",
        "name: Eve Employee\ndate:",
        "add_comment",
        "comment: Nice work on the runbook\nname:\ndate:",
    ]);
    let h = harness_with(model.clone());
    let manager = h.add_user("Max Manager", "max@staffdesk.test", "manager", Some("Ops"));
    let employee = h.add_user("Eve Employee", "eve@staffdesk.test", "employee", Some("Ops"));
    let today = h.state.today();
    let update = h
        .state
        .tasks
        .submit_update(
            &employee,
            &NewDailyUpdate {
                title: "Docs".into(),
                date: today.to_string(),
                work_done: "Updated the runbook".into(),
                reference_link: None,
                comment: None,
                task_id: None,
            },
            today,
        )
        .unwrap();
    let session = h.session_for(&manager);

    let found = h
        .state
        .chat(&session, "What did Eve Employee do today?")
        .await
        .unwrap();
    assert!(found.entry.text.contains("Docs: Updated the runbook"));

    let commented = h
        .state
        .chat(&session, "Tell her: nice work on the runbook")
        .await
        .unwrap();
    assert!(commented.entry.text.starts_with("Comment added to \"Docs\""));

    let stored = h.state.tasks.get_update(update.id).unwrap();
    assert_eq!(stored.manager_comments.len(), 1);
    assert_eq!(stored.manager_comments[0].text, "Nice work on the runbook");
    assert_eq!(stored.manager_comments[0].author_id, manager.id);

    // The follow-up extraction saw the earlier turn.
    let prompts = model.prompts.lock().unwrap();
    assert!(prompts[3].contains("Docs: Updated the runbook"));
}

#[tokio::test]
async fn feedback_without_a_target_asks_which_update() {
    let model = Scripted::new(&["add_comment", "comment: Good job"]);
    let h = harness_with(model.clone());
    let session = h.session_for(&h.admin());

    let reply = h.state.chat(&session, "Say good job").await.unwrap();
    assert!(reply.entry.text.starts_with("Which update is this feedback for?"));
}

#[tokio::test]
async fn managers_only_see_their_own_team_through_chat() {
    let model = Scripted::new(&["retrieve_updates", "name: Sam Sales\ndate:"]);
    let h = harness_with(model.clone());
    let manager = h.add_user("Max Manager", "max@staffdesk.test", "manager", Some("Ops"));
    h.add_user("Sam Sales", "sam@staffdesk.test", "employee", Some("Sales"));
    let session = h.session_for(&manager);

    let reply = h
        .state
        .chat(&session, "What did Sam Sales do today?")
        .await
        .unwrap();
    assert_eq!(reply.entry.text, "I couldn't do that: Sam Sales is not on your team");
}

#[tokio::test]
async fn unmatched_requests_are_answered_in_conversation() {
    let model = Scripted::new(&["other", "You have no tasks due today."]);
    let h = harness_with(model.clone());
    let employee = h.add_user("Eve Employee", "eve@staffdesk.test", "employee", Some("Ops"));
    let session = h.session_for(&employee);

    let reply = h
        .state
        .chat(&session, "How can I improve my productivity?")
        .await
        .unwrap();
    assert_eq!(reply.entry.text, "You have no tasks due today.");

    let prompts = model.prompts.lock().unwrap();
    assert!(prompts[1].contains("employee assistant"));
    assert!(prompts[1].ends_with("User: How can I improve my productivity?\nAssistant:"));
}

#[tokio::test]
async fn model_failure_mid_action_falls_back() {
    let model = Scripted::new(&["submit_update"]);
    let h = harness_with(model.clone());
    let employee = h.add_user("Eve Employee", "eve@staffdesk.test", "employee", Some("Ops"));
    let session = h.session_for(&employee);

    let reply = h
        .state
        .chat(&session, "Log my work for today")
        .await
        .unwrap();
    assert!(!reply.delivered);
    assert_eq!(reply.entry.text, staffdesk::chat::FALLBACK_REPLY);
    assert!(h.state.tasks.history_for(employee.id).unwrap().is_empty());
}
