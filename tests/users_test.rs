use staffdesk::users::{NewUser, Role, UserStatus, UserStore};
use tempfile::TempDir;

fn new_user(name: &str, email: &str, role: &str, team: Option<&str>) -> NewUser {
    NewUser {
        full_name: name.into(),
        email: email.into(),
        password: "secret123".into(),
        role: role.into(),
        team: team.map(str::to_string),
        status: None,
    }
}

#[test]
fn register_validates_and_normalises() {
    let dir = TempDir::new().unwrap();
    let store = UserStore::open(dir.path()).unwrap();

    let user = store
        .register(&new_user("  Jane Doe ", "Jane@Example.COM", "Employee", Some(" Ops ")))
        .unwrap();
    assert_eq!(user.id, 1);
    assert_eq!(user.full_name, "Jane Doe");
    assert_eq!(user.email, "jane@example.com");
    assert_eq!(user.role, Role::Employee);
    assert_eq!(user.team.as_deref(), Some("Ops"));
    assert_eq!(user.status, UserStatus::Active);
    assert_ne!(user.password_hash, "secret123");

    let cases = [
        new_user("", "a@b.co", "employee", Some("Ops")),
        new_user("A", "not-an-email", "employee", Some("Ops")),
        new_user("A", "a@b.co", "intern", Some("Ops")),
        new_user("A", "a@b.co", "employee", None),
        NewUser {
            password: "123".into(),
            ..new_user("A", "a@b.co", "admin", None)
        },
    ];
    for case in &cases {
        let err = store.register(case).unwrap_err();
        assert_eq!(err.status().as_u16(), 400, "{:?}", case);
    }
}

#[test]
fn duplicate_email_is_a_conflict_regardless_of_case() {
    let dir = TempDir::new().unwrap();
    let store = UserStore::open(dir.path()).unwrap();
    store.register(&new_user("A", "a@b.co", "admin", None)).unwrap();

    let err = store
        .register(&new_user("B", "A@B.CO", "admin", None))
        .unwrap_err();
    assert_eq!(err.status().as_u16(), 409);
}

#[test]
fn records_survive_reopening() {
    let dir = TempDir::new().unwrap();
    {
        let store = UserStore::open(dir.path()).unwrap();
        let user = store.register(&new_user("A", "a@b.co", "manager", Some("Ops"))).unwrap();
        store.set_status(user.id, UserStatus::Suspended).unwrap();
    }

    let store = UserStore::open(dir.path()).unwrap();
    let user = store.find_by_email("A@b.co").unwrap().unwrap();
    assert_eq!(user.status, UserStatus::Suspended);
    assert!(!user.is_active());
}

#[test]
fn toggle_reactivates_suspended_users() {
    let dir = TempDir::new().unwrap();
    let store = UserStore::open(dir.path()).unwrap();
    let user = store.register(&new_user("A", "a@b.co", "employee", Some("Ops"))).unwrap();

    assert_eq!(store.toggle_status(user.id).unwrap().status, UserStatus::Inactive);
    assert_eq!(store.toggle_status(user.id).unwrap().status, UserStatus::Active);
    store.set_status(user.id, UserStatus::Suspended).unwrap();
    assert_eq!(store.toggle_status(user.id).unwrap().status, UserStatus::Active);

    assert_eq!(store.toggle_status(99).unwrap_err().status().as_u16(), 404);
}

#[test]
fn team_members_are_employees_sorted_by_name() {
    let dir = TempDir::new().unwrap();
    let store = UserStore::open(dir.path()).unwrap();
    store.register(&new_user("Zed", "z@b.co", "employee", Some("ops"))).unwrap();
    store.register(&new_user("Amy", "a@b.co", "employee", Some("Ops"))).unwrap();
    store.register(&new_user("Max", "m@b.co", "manager", Some("Ops"))).unwrap();
    store.register(&new_user("Sam", "s@b.co", "employee", Some("Sales"))).unwrap();

    let names: Vec<String> = store
        .team_members("OPS")
        .unwrap()
        .into_iter()
        .map(|u| u.full_name)
        .collect();
    assert_eq!(names, vec!["Amy", "Zed"]);

    let by_role = store.count_by_role().unwrap();
    assert_eq!(by_role.get(&Role::Employee), Some(&3));
    assert_eq!(by_role.get(&Role::Manager), Some(&1));
    assert_eq!(by_role.get(&Role::Admin), None);
}
