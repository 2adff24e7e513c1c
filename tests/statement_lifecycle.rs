use anyhow::Result;
use sqlite_access::{Connection, ErrorCode, Params, Statement, StepState, Value};
use tempfile::NamedTempFile;

#[derive(Debug, PartialEq)]
struct User {
    id: i64,
    name: String,
    email: String,
    age: Option<i32>,
}

// Helper function to create an in-memory database for testing
fn create_test_db() -> Connection {
    let conn = Connection::open_in_memory();
    assert!(conn.is_open());
    initialize_schema(&conn);
    conn
}

// Helper function to create a temporary file-based database
fn create_temp_db() -> (Connection, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let conn = Connection::open(temp_file.path().to_str().unwrap());
    assert!(conn.is_open());
    initialize_schema(&conn);
    (conn, temp_file)
}

fn initialize_schema(conn: &Connection) {
    let code = conn.execute_batch(
        r#"
        CREATE TABLE users (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT UNIQUE NOT NULL,
            age INTEGER
        );
        CREATE INDEX idx_users_email ON users(email);
        "#,
    );
    assert_eq!(code, ErrorCode::Ok);
}

fn insert_user(conn: &Connection, name: &str, email: &str, age: Option<i32>) -> ErrorCode {
    conn.prepare("INSERT INTO users (name, email, age) VALUES (?, ?, ?)")
        .bind(name)
        .bind(email)
        .bind(age)
        .execute()
}

fn find_user(conn: &Connection, id: i64) -> Result<Option<User>> {
    let mut stmt = conn.prepare("SELECT id, name, email, age FROM users WHERE id = ?");
    stmt.bind(id).check()?;
    let Some(row) = stmt.step() else {
        stmt.check()?;
        return Ok(None);
    };
    Ok(Some(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        age: row.get(3)?,
    }))
}

#[test]
fn test_basic_operations() -> Result<()> {
    let conn = create_test_db();

    assert_eq!(
        insert_user(&conn, "John Doe", "john@example.com", Some(30)),
        ErrorCode::Ok
    );
    let id = conn.last_insert_rowid();

    let user = find_user(&conn, id)?.expect("inserted user");
    assert_eq!(
        user,
        User {
            id,
            name: "John Doe".into(),
            email: "john@example.com".into(),
            age: Some(30),
        }
    );

    let mut update = conn.prepare("UPDATE users SET age = ? WHERE id = ?");
    assert_eq!(update.bind(31).bind(id).execute(), ErrorCode::Ok);
    assert_eq!(conn.changes(), 1);
    assert_eq!(find_user(&conn, id)?.and_then(|u| u.age), Some(31));

    let mut delete = conn.prepare("DELETE FROM users WHERE id = ?");
    assert_eq!(delete.bind(id).execute(), ErrorCode::Ok);
    assert!(find_user(&conn, id)?.is_none());
    Ok(())
}

#[test]
fn test_file_backed_database_persists() -> Result<()> {
    let (conn, temp_file) = create_temp_db();
    assert_eq!(
        insert_user(&conn, "Jane", "jane@example.com", None),
        ErrorCode::Ok
    );
    drop(conn);

    let reopened = Connection::open(temp_file.path().to_str().unwrap());
    let user = find_user(&reopened, 1)?.expect("persisted user");
    assert_eq!(user.name, "Jane");
    assert_eq!(user.age, None);
    Ok(())
}

#[test]
fn test_step_without_rows_ends_ok() {
    let conn = create_test_db();
    let mut stmt = conn.prepare("SELECT id FROM users");
    assert!(stmt.step().is_none());
    assert_eq!(stmt.state(), StepState::Exhausted);
    assert_eq!(stmt.error_code(), ErrorCode::Ok);

    let mut stmt = conn.prepare("SELECT 1");
    let row = stmt.step().expect("constant select yields a row");
    assert_eq!(row.get::<i32>(0).unwrap(), 1);
}

#[test]
fn test_execute_resets_positional_counter() {
    let conn = create_test_db();
    let mut stmt = conn.prepare("INSERT INTO users (name, email, age) VALUES (?, ?, ?)");
    for i in 0..3 {
        stmt.bind(format!("user{i}")).bind(format!("user{i}@example.com")).bind(i);
        assert_eq!(stmt.next_index(), 4);
        assert_eq!(stmt.execute(), ErrorCode::Ok);
        assert_eq!(stmt.next_index(), 1);
        assert_eq!(stmt.state(), StepState::Fresh);
    }

    // A failing step rewinds too.
    stmt.bind("dup").bind("user0@example.com").bind(1);
    assert_eq!(stmt.execute(), ErrorCode::Constraint);
    assert_eq!(stmt.next_index(), 1);

    let mut count = conn.prepare("SELECT COUNT(*) FROM users");
    assert_eq!(count.step().unwrap().get::<i64>(0).unwrap(), 3);
}

fn collect(stmt: &mut Statement<'_>) -> Vec<String> {
    let mut names = Vec::new();
    while let Some(row) = stmt.step() {
        names.push(row.get::<String>(0).unwrap());
    }
    names
}

#[test]
fn test_exhausted_select_restarts_with_current_bindings() {
    let conn = create_test_db();
    for (name, age) in [("a", 20), ("b", 30), ("c", 40)] {
        insert_user(&conn, name, &format!("{name}@example.com"), Some(age));
    }

    let mut stmt = conn.prepare("SELECT name FROM users WHERE age > ? ORDER BY name");
    stmt.bind(25);

    assert_eq!(collect(&mut stmt), vec!["b", "c"]);
    // No rebind: the same parameter is reused.
    assert_eq!(collect(&mut stmt), vec!["b", "c"]);
    assert_eq!(stmt.error_code(), ErrorCode::Ok);

    // Rebinding after exhaustion starts from the first slot again.
    stmt.bind(35);
    assert_eq!(stmt.next_index(), 2);
    assert_eq!(collect(&mut stmt), vec!["c"]);
}

#[test]
fn test_unknown_named_parameter_is_not_found() {
    let conn = create_test_db();
    let mut stmt = conn.prepare("SELECT :a, :b");
    stmt.bind_named(":a", 1).bind_named(":b", 2);
    assert!(stmt.is_ok());

    stmt.bind_named(":missing", 99);
    assert_eq!(stmt.error_code(), ErrorCode::NotFound);
    assert_eq!(stmt.next_index(), 1);

    let row = stmt.step().unwrap();
    assert_eq!(row.get::<i32>(0).unwrap(), 1);
    assert_eq!(row.get::<i32>(1).unwrap(), 2);
}

#[test]
fn test_named_markers_of_every_prefix() {
    let conn = create_test_db();
    let mut stmt = conn.prepare("SELECT :colon, @at, $dollar");
    assert_eq!(stmt.parameter_index("@at"), Some(2));
    stmt.bind_named("$dollar", "d")
        .bind_named("@at", 2.5)
        .bind_named(":colon", Value::Null);
    let row = stmt.step().unwrap();
    assert_eq!(row.get::<Option<String>>(0).unwrap(), None);
    assert_eq!(row.get::<f64>(1).unwrap(), 2.5);
    assert_eq!(row.get::<String>(2).unwrap(), "d");
}

#[test]
fn test_bind_params_by_name() -> Result<()> {
    let conn = create_test_db();
    let params = Params::new()
        .with_value(":name", "Grace")
        .with_value(":email", "grace@example.com")
        .with_value(":age", 85);
    let mut stmt = conn.prepare("INSERT INTO users (name, email, age) VALUES (:name, :email, :age)");
    assert_eq!(stmt.bind_params(&params).execute(), ErrorCode::Ok);

    let user = find_user(&conn, conn.last_insert_rowid())?.unwrap();
    assert_eq!(user.name, "Grace");
    assert_eq!(user.age, Some(85));

    let mut stmt = conn.prepare("SELECT :name");
    stmt.bind_params(&Params::new().with_value(":nope", 1));
    assert_eq!(stmt.error_code(), ErrorCode::NotFound);
    Ok(())
}

#[test]
fn test_int64_round_trip() -> Result<()> {
    let conn = Connection::open_in_memory();
    assert_eq!(conn.execute("CREATE TABLE big (v INTEGER)"), ErrorCode::Ok);

    for value in [i64::MIN, -1, 0, 1 << 40, i64::MAX] {
        let mut insert = conn.prepare("INSERT INTO big (v) VALUES (?1)");
        assert_eq!(insert.bind_at(1, value).execute(), ErrorCode::Ok);
        let rowid = conn.last_insert_rowid();

        let mut select = conn.prepare("SELECT v FROM big WHERE rowid = ?");
        select.bind(rowid).check()?;
        let row = select.step().expect("row");
        assert_eq!(row.get::<i64>(0)?, value);
    }
    Ok(())
}

#[test]
fn test_evaluate_visits_every_row() {
    let conn = create_test_db();
    for i in 0..5 {
        insert_user(&conn, "u", &format!("u{i}@example.com"), Some(i));
    }
    let mut stmt = conn.prepare("SELECT age FROM users ORDER BY age");
    let mut ages = Vec::new();
    let code = stmt.evaluate(|row| {
        ages.push(row.get::<i32>(0).unwrap());
        true
    });
    assert_eq!(code, ErrorCode::Ok);
    assert_eq!(ages, vec![0, 1, 2, 3, 4]);
    assert_eq!(stmt.state(), StepState::Exhausted);
}

#[test]
fn test_bind_while_evaluating_is_misuse() {
    let conn = create_test_db();
    insert_user(&conn, "a", "a@example.com", None);
    insert_user(&conn, "b", "b@example.com", None);
    let mut stmt = conn.prepare("SELECT name FROM users WHERE id > ?");
    stmt.bind(0);
    assert!(stmt.step().is_some());
    stmt.bind_at(1, 5);
    assert_eq!(stmt.error_code(), ErrorCode::Misuse);

    // An explicit reset makes the statement bindable again.
    stmt.reset().bind_at(1, 1);
    assert!(stmt.is_ok());
    let row = stmt.step().unwrap();
    assert_eq!(row.get::<String>(0).unwrap(), "b");
}

#[test]
fn test_early_stop_releases_the_table() {
    let conn = create_test_db();
    insert_user(&conn, "a", "a@example.com", None);
    insert_user(&conn, "b", "b@example.com", None);

    let mut stmt = conn.prepare("SELECT name FROM users");
    assert_eq!(stmt.evaluate(|_| false), ErrorCode::Ok);
    assert_eq!(stmt.state(), StepState::Exhausted);

    // The pending scan no longer holds the table.
    assert_eq!(conn.drop_table("users"), ErrorCode::Ok);
    assert!(conn.list_tables().is_empty());
}
