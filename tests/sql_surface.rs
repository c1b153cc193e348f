use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use bookhub::credentials::{Argon2JwtCredentials, CredentialService};
use bookhub::engine::Engine;
use bookhub::model::Role;
use bookhub::{seed, timefmt, wire};

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("bookhub_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let credentials = Argon2JwtCredentials::with_cost("integration-secret", 15, 8, 1, 1).unwrap();
    let engine = Arc::new(
        Engine::new(dir.join("bookhub.wal"), Arc::new(credentials), timefmt::utc()).unwrap(),
    );

    let served = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = served.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, "bookhub".to_string(), None).await;
            });
        }
    });

    (addr, engine)
}

async fn connect(addr: SocketAddr) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("bookhub")
        .user("bookhub")
        .password("bookhub");
    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

fn rows(messages: Vec<SimpleQueryMessage>) -> Vec<SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn query_rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    rows(client.simple_query(sql).await.unwrap())
}

/// Runs an INSERT that answers with the new entity's id.
async fn insert_id(client: &Client, sql: &str) -> String {
    let rows = query_rows(client, sql).await;
    assert_eq!(rows.len(), 1, "expected one id row for {sql}");
    rows[0].get("id").unwrap().to_string()
}

async fn sqlstate(client: &Client, sql: &str) -> String {
    let err = client.simple_query(sql).await.unwrap_err();
    err.code().map(|c| c.code().to_string()).unwrap_or_default()
}

struct World {
    owner: String,
    booker: String,
    resource: String,
    admin_token: String,
    owner_token: String,
    booker_token: String,
}

async fn login(client: &Client, email: &str, password: &str) -> String {
    let rows = query_rows(
        client,
        &format!("SELECT * FROM login WHERE email = '{email}' AND password = '{password}'"),
    )
    .await;
    rows[0].get("token").unwrap().to_string()
}

async fn populate(client: &Client, engine: &Engine) -> World {
    seed::bootstrap_admin(engine, "admin@example.com", "changeme")
        .await
        .unwrap()
        .unwrap();
    let owner = insert_id(
        client,
        "INSERT INTO users (email, name, role, password) VALUES ('hall@example.com', 'Hall Co', 'COMPANY', 'secret1')",
    )
    .await;
    let booker = insert_id(
        client,
        "INSERT INTO users (email, name, role, password) VALUES ('bea@example.com', 'Bea', 'INDIVIDUAL', 'secret1')",
    )
    .await;
    let admin_token = login(client, "admin@example.com", "changeme").await;
    let owner_token = login(client, "hall@example.com", "secret1").await;
    let booker_token = login(client, "bea@example.com", "secret1").await;
    let category = insert_id(
        client,
        &format!("INSERT INTO categories (token, name) VALUES ('{admin_token}', 'Rooms')"),
    )
    .await;
    let resource = insert_id(
        client,
        &format!(
            "INSERT INTO resources (token, category_id, title, description, location, price_per_hour) \
             VALUES ('{owner_token}', '{category}', 'Room A', NULL, 'Floor 2', 40)"
        ),
    )
    .await;
    World {
        owner,
        booker,
        resource,
        admin_token,
        owner_token,
        booker_token,
    }
}

fn booking_sql(token: &str, resource: &str, start: &str, end: &str) -> String {
    format!(
        "INSERT INTO bookings (token, resource_id, start_at, end_at) VALUES ('{token}', '{resource}', '{start}', '{end}')"
    )
}

fn decision_sql(token: &str, booking: &str, status: &str) -> String {
    format!("INSERT INTO decisions (token, booking_id, status) VALUES ('{token}', '{booking}', '{status}')")
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn booking_lifecycle_over_the_wire() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;
    let w = populate(&client, &engine).await;

    let booking = insert_id(
        &client,
        &booking_sql(&w.booker_token, &w.resource, "2030-03-01T10:00:00Z", "2030-03-01T11:00:00Z"),
    )
    .await;

    assert_eq!(
        sqlstate(
            &client,
            &booking_sql(&w.booker_token, &w.resource, "2030-03-01T10:30:00Z", "2030-03-01T11:30:00Z")
        )
        .await,
        "23P01"
    );
    insert_id(
        &client,
        &booking_sql(&w.booker_token, &w.resource, "2030-03-01T11:00:00Z", "2030-03-01T12:00:00Z"),
    )
    .await;

    let pending = query_rows(
        &client,
        &format!("SELECT * FROM bookings WHERE status = 'PENDING' AND owner_id = '{}'", w.owner),
    )
    .await;
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].get("id"), Some(booking.as_str()));
    assert_eq!(pending[0].get("user_id"), Some(w.booker.as_str()));
    assert_eq!(pending[0].get("start_at"), Some("2030-03-01T10:00:00Z"));

    client
        .simple_query(&format!(
            "INSERT INTO decisions (token, booking_id, status, comment) VALUES ('{}', '{booking}', 'APPROVED', 'see you there')",
            w.owner_token
        ))
        .await
        .unwrap();
    let decided = query_rows(&client, &format!("SELECT * FROM bookings WHERE id = '{booking}'")).await;
    assert_eq!(decided[0].get("status"), Some("APPROVED"));
    assert_eq!(decided[0].get("comment"), Some("see you there"));

    // Only the requester may cancel.
    assert_eq!(
        sqlstate(
            &client,
            &format!("DELETE FROM bookings WHERE id = '{booking}' AND token = '{}'", w.admin_token)
        )
        .await,
        "42501"
    );
    client
        .simple_query(&format!(
            "DELETE FROM bookings WHERE id = '{booking}' AND token = '{}'",
            w.booker_token
        ))
        .await
        .unwrap();

    let day = query_rows(
        &client,
        &format!(
            "SELECT * FROM bookings WHERE resource_id = '{}' AND start_date >= '2030-03-01' AND start_date <= '2030-03-01'",
            w.resource
        ),
    )
    .await;
    assert_eq!(day.len(), 1);
    assert_eq!(day[0].get("start_at"), Some("2030-03-01T11:00:00Z"));
}

#[tokio::test]
async fn validation_errors_carry_sqlstates() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;
    let w = populate(&client, &engine).await;

    // Shorter than 30 minutes.
    assert_eq!(
        sqlstate(
            &client,
            &booking_sql(&w.booker_token, &w.resource, "2030-03-01T10:00:00Z", "2030-03-01T10:20:00Z")
        )
        .await,
        "22023"
    );
    assert_eq!(
        sqlstate(
            &client,
            &booking_sql(&w.booker_token, &Ulid::new().to_string(), "2030-03-01T10:00:00Z", "2030-03-01T11:00:00Z")
        )
        .await,
        "P0002"
    );
    assert_eq!(
        sqlstate(
            &client,
            "INSERT INTO users (email, name, role, password) VALUES ('BEA@example.com', 'B', 'INDIVIDUAL', 'secret1')"
        )
        .await,
        "23505"
    );
    assert_eq!(
        sqlstate(
            &client,
            "INSERT INTO users (email, name, role, password) VALUES ('x@example.com', 'X', 'SUPERUSER', 'secret1')"
        )
        .await,
        "22023"
    );
    assert_eq!(sqlstate(&client, "UPDATE bookings SET status = 'APPROVED'").await, "42601");
    assert_eq!(
        sqlstate(&client, "SELECT * FROM login WHERE email = 'bea@example.com' AND password = 'nope'").await,
        "28P01"
    );
}

#[tokio::test]
async fn login_and_session_round_trip() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;
    let w = populate(&client, &engine).await;

    let login = query_rows(
        &client,
        "SELECT * FROM login WHERE email = 'bea@example.com' AND password = 'secret1'",
    )
    .await;
    assert_eq!(login[0].get("user_id"), Some(w.booker.as_str()));
    let token = login[0].get("token").unwrap().to_string();

    let session = query_rows(&client, &format!("SELECT * FROM sessions WHERE token = '{token}'")).await;
    assert_eq!(session[0].get("user_id"), Some(w.booker.as_str()));
    assert_eq!(session[0].get("role"), Some("INDIVIDUAL"));
}

#[tokio::test]
async fn account_deletion_over_the_wire() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;
    let w = populate(&client, &engine).await;
    insert_id(
        &client,
        &booking_sql(&w.booker_token, &w.resource, "2030-03-01T10:00:00Z", "2030-03-01T11:00:00Z"),
    )
    .await;

    client
        .simple_query(&format!("DELETE FROM users WHERE token = '{}'", w.owner_token))
        .await
        .unwrap();

    let mine = query_rows(&client, &format!("SELECT * FROM bookings WHERE user_id = '{}'", w.booker)).await;
    assert!(mine.is_empty());
    assert!(query_rows(&client, "SELECT * FROM resources").await.is_empty());
    assert_eq!(
        sqlstate(&client, &format!("SELECT * FROM users WHERE id = '{}'", w.owner)).await,
        "P0002"
    );
    // The deleted account's token no longer acts for anyone.
    assert_eq!(
        sqlstate(&client, &format!("DELETE FROM users WHERE token = '{}'", w.owner_token)).await,
        "28P01"
    );
}

#[tokio::test]
async fn acting_identity_comes_only_from_a_valid_token() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;
    let w = populate(&client, &engine).await;
    let booking = insert_id(
        &client,
        &booking_sql(&w.booker_token, &w.resource, "2030-03-01T10:00:00Z", "2030-03-01T11:00:00Z"),
    )
    .await;

    // A token signed with another secret, claiming to be the owner.
    let forged = Argon2JwtCredentials::with_cost("some-other-secret", 15, 8, 1, 1)
        .unwrap()
        .issue_token(Ulid::from_string(&w.owner).unwrap(), Role::Company)
        .unwrap();
    for token in [forged.as_str(), "not-a-token", ""] {
        assert_eq!(
            sqlstate(&client, &decision_sql(token, &booking, "APPROVED")).await,
            "28P01"
        );
        assert_eq!(
            sqlstate(&client, &format!("DELETE FROM users WHERE token = '{token}'")).await,
            "28P01"
        );
    }

    // A genuine token that does not own the resource.
    assert_eq!(
        sqlstate(&client, &decision_sql(&w.booker_token, &booking, "APPROVED")).await,
        "42501"
    );

    // Naming someone else by id is not a statement the surface accepts.
    assert_eq!(
        sqlstate(&client, &format!("DELETE FROM users WHERE id = '{}'", w.owner)).await,
        "42601"
    );
    assert_eq!(
        sqlstate(
            &client,
            &format!(
                "INSERT INTO decisions (booking_id, actor_id, status) VALUES ('{booking}', '{}', 'APPROVED')",
                w.owner
            )
        )
        .await,
        "42601"
    );

    let row = query_rows(&client, &format!("SELECT * FROM bookings WHERE id = '{booking}'")).await;
    assert_eq!(row[0].get("status"), Some("PENDING"));
    let owner = query_rows(&client, &format!("SELECT * FROM users WHERE id = '{}'", w.owner)).await;
    assert_eq!(owner.len(), 1);
}

#[tokio::test]
async fn extended_protocol_binds_parameters() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;
    let w = populate(&client, &engine).await;

    let inserted = client
        .query(
            "INSERT INTO bookings (token, resource_id, start_at, end_at) VALUES ($1, $2, $3, $4)",
            &[&w.booker_token, &w.resource, &"2030-03-02T09:00:00Z", &"2030-03-02T10:00:00Z"],
        )
        .await
        .unwrap();
    let id: String = inserted[0].get("id");

    let found = client
        .query("SELECT * FROM bookings WHERE id = $1", &[&id])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    let status: String = found[0].get("status");
    assert_eq!(status, "PENDING");
    let comment: Option<String> = found[0].get("comment");
    assert_eq!(comment, None);
}

#[tokio::test]
async fn extended_protocol_keeps_dollar_text_in_values() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;
    let w = populate(&client, &engine).await;

    let booking = insert_id(
        &client,
        &booking_sql(&w.booker_token, &w.resource, "2030-03-02T09:00:00Z", "2030-03-02T10:00:00Z"),
    )
    .await;
    client
        .execute(
            "INSERT INTO decisions (token, booking_id, status, comment) VALUES ($1, $2, $3, $4)",
            &[&w.owner_token, &booking, &"APPROVED", &"costs $1 per hour, it's $2 after six"],
        )
        .await
        .unwrap();
    let found = client
        .query("SELECT * FROM bookings WHERE id = $1", &[&booking])
        .await
        .unwrap();
    let comment: Option<String> = found[0].get("comment");
    assert_eq!(comment.as_deref(), Some("costs $1 per hour, it's $2 after six"));

    let registered = client
        .query(
            "INSERT INTO users (email, name, role, password) VALUES ($1, $2, $3, $4)",
            &[&"dollar@example.com", &"Dee", &"INDIVIDUAL", &"pa$1word"],
        )
        .await
        .unwrap();
    let user_id: String = registered[0].get("id");

    let session = client
        .query(
            "SELECT * FROM login WHERE email = $1 AND password = $2",
            &[&"dollar@example.com", &"pa$1word"],
        )
        .await
        .unwrap();
    let logged_in: String = session[0].get("user_id");
    assert_eq!(logged_in, user_id);
    // The stored password is the literal text, so the simple protocol agrees.
    assert!(!login(&client, "dollar@example.com", "pa$1word").await.is_empty());
}
