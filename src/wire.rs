use std::fmt::Debug;
use std::io;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::error;
use ulid::Ulid;

use crate::auth::BookhubAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, BookingFilter, Command, ResultShape, SqlError};
use crate::timefmt::{self, format_instant};

pub struct BookhubHandler {
    engine: Arc<Engine>,
    query_parser: Arc<BookhubQueryParser>,
}

impl BookhubHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(BookhubQueryParser),
        }
    }

    /// Run one parsed command, recording its latency and outcome.
    async fn run(&self, cmd: Command) -> PgWireResult<Response> {
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result.map_err(engine_err)
    }

    async fn execute_command(&self, cmd: Command) -> Result<Response, EngineError> {
        let engine = &self.engine;
        match cmd {
            Command::InsertUser {
                email,
                name,
                role,
                password,
            } => {
                let role = Role::parse(&role).ok_or(EngineError::InvalidRequest(
                    "account type must be INDIVIDUAL or COMPANY",
                ))?;
                let id = engine.register_user(&email, &name, role, &password).await?;
                Ok(id_response(id))
            }
            Command::InsertProfile { token, email, name } => {
                let (user_id, _) = engine.resolve_token(&token)?;
                engine.update_profile(user_id, &email, &name).await?;
                Ok(inserted())
            }
            Command::InsertPasswordChange {
                token,
                current,
                new_password,
            } => {
                let (user_id, _) = engine.resolve_token(&token)?;
                engine
                    .change_password(user_id, &current, &new_password)
                    .await?;
                Ok(inserted())
            }
            Command::InsertCategory { token, name } => {
                let (actor_id, _) = engine.resolve_token(&token)?;
                let id = engine.create_category(actor_id, &name).await?;
                Ok(id_response(id))
            }
            Command::InsertCategoryRename {
                token,
                category_id,
                name,
            } => {
                let (actor_id, _) = engine.resolve_token(&token)?;
                engine.rename_category(actor_id, category_id, &name).await?;
                Ok(inserted())
            }
            Command::InsertResource {
                token,
                category_id,
                title,
                description,
                location,
                price_per_hour,
            } => {
                let (owner_id, _) = engine.resolve_token(&token)?;
                let id = engine
                    .create_resource(
                        owner_id,
                        category_id,
                        &title,
                        description.as_deref(),
                        location.as_deref(),
                        price_per_hour,
                    )
                    .await?;
                Ok(id_response(id))
            }
            Command::InsertBooking {
                token,
                resource_id,
                start_at,
                end_at,
            } => {
                let (user_id, _) = engine.resolve_token(&token)?;
                let id = engine
                    .request_booking(user_id, resource_id, &start_at, &end_at)
                    .await?;
                Ok(id_response(id))
            }
            Command::InsertDecision {
                token,
                booking_id,
                status,
                comment,
            } => {
                let (actor_id, role) = engine.resolve_token(&token)?;
                let status = BookingStatus::parse(&status)
                    .ok_or(EngineError::InvalidRequest("status must be APPROVED or REJECTED"))?;
                engine
                    .decide_booking(booking_id, actor_id, role, status, comment)
                    .await?;
                Ok(inserted())
            }
            Command::CancelBooking { id, token } => {
                let (user_id, _) = engine.resolve_token(&token)?;
                engine.cancel_booking(id, user_id).await?;
                Ok(deleted())
            }
            Command::DeleteCategory { id, token } => {
                let (actor_id, _) = engine.resolve_token(&token)?;
                engine.delete_category(actor_id, id).await?;
                Ok(deleted())
            }
            Command::DeleteUser { token } => {
                let (user_id, _) = engine.resolve_token(&token)?;
                engine.delete_account(user_id).await?;
                Ok(deleted())
            }
            Command::SelectBookings(filter) => {
                let bookings = match filter {
                    BookingFilter::ById(id) => vec![engine.get_booking(id).await?],
                    BookingFilter::ByUser(user_id) => engine.list_user_bookings(user_id).await,
                    BookingFilter::Pending { owner_id: None } => engine.list_pending().await,
                    BookingFilter::Pending {
                        owner_id: Some(owner),
                    } => engine.list_pending_for_owner(owner).await,
                    BookingFilter::ByResource {
                        resource_id,
                        from_day,
                        to_day,
                    } => {
                        engine
                            .list_resource_bookings_by_day(resource_id, &from_day, &to_day)
                            .await?
                    }
                };
                booking_rows(&bookings)
            }
            Command::SelectConflicts {
                resource_id,
                start_at,
                end_at,
            } => {
                let start = timefmt::parse_instant(&start_at, engine.local_offset())?;
                let end = timefmt::parse_instant(&end_at, engine.local_offset())?;
                let conflict = engine.check_conflict(resource_id, start, end).await?;
                let schema = Arc::new(conflicts_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&resource_id.to_string())?;
                encoder.encode_field(&format_instant(start))?;
                encoder.encode_field(&format_instant(end))?;
                encoder.encode_field(&conflict)?;
                Ok(query_response(schema, vec![Ok(encoder.take_row())]))
            }
            Command::SelectResources { owner_id } => {
                let resources = match owner_id {
                    Some(owner) => engine.list_resources_by_owner(owner),
                    None => engine.list_resources(),
                };
                resource_rows(&resources)
            }
            Command::SelectCategories => {
                let schema = Arc::new(categories_schema());
                let rows: Vec<PgWireResult<DataRow>> = engine
                    .list_categories()
                    .into_iter()
                    .map(|c| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&c.id.to_string())?;
                        encoder.encode_field(&c.name)?;
                        encoder.encode_field(&format_instant(c.created_at))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectUser { id } => {
                let user = engine.get_user(id)?;
                let schema = Arc::new(users_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&user.id.to_string())?;
                encoder.encode_field(&user.email)?;
                encoder.encode_field(&user.name)?;
                encoder.encode_field(&user.role.as_str())?;
                encoder.encode_field(&format_instant(user.created_at))?;
                Ok(query_response(schema, vec![Ok(encoder.take_row())]))
            }
            Command::SelectLogin { email, password } => {
                let (token, user) = engine.login(&email, &password).await?;
                let schema = Arc::new(login_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&token)?;
                encoder.encode_field(&user.id.to_string())?;
                encoder.encode_field(&user.role.as_str())?;
                Ok(query_response(schema, vec![Ok(encoder.take_row())]))
            }
            Command::SelectSession { token } => {
                let (user_id, role) = engine.resolve_token(&token)?;
                let schema = Arc::new(session_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&user_id.to_string())?;
                encoder.encode_field(&role.as_str())?;
                Ok(query_response(schema, vec![Ok(encoder.take_row())]))
            }
        }
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

fn deleted() -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(1))
}

fn query_response(
    schema: Arc<Vec<FieldInfo>>,
    rows: Vec<PgWireResult<DataRow>>,
) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn id_response(id: Ulid) -> Response {
    let schema = Arc::new(id_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    let row = encoder
        .encode_field(&id.to_string())
        .map(|_| encoder.take_row());
    query_response(schema, vec![row])
}

fn booking_rows(bookings: &[Booking]) -> Result<Response, EngineError> {
    let schema = Arc::new(bookings_schema());
    let rows: Vec<PgWireResult<DataRow>> = bookings
        .iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.resource_id.to_string())?;
            encoder.encode_field(&b.user_id.to_string())?;
            encoder.encode_field(&format_instant(b.span.start))?;
            encoder.encode_field(&format_instant(b.span.end))?;
            encoder.encode_field(&b.status.as_str())?;
            encoder.encode_field(&b.comment)?;
            encoder.encode_field(&format_instant(b.created_at))?;
            encoder.encode_field(&b.updated_at.map(format_instant))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(query_response(schema, rows))
}

fn resource_rows(resources: &[ResourceInfo]) -> Result<Response, EngineError> {
    let schema = Arc::new(resources_schema());
    let rows: Vec<PgWireResult<DataRow>> = resources
        .iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.owner_id.to_string())?;
            encoder.encode_field(&r.category_id.to_string())?;
            encoder.encode_field(&r.title)?;
            encoder.encode_field(&r.description)?;
            encoder.encode_field(&r.location)?;
            encoder.encode_field(&r.price_per_hour)?;
            encoder.encode_field(&r.is_active)?;
            encoder.encode_field(&format_instant(r.created_at))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(query_response(schema, rows))
}

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn id_schema() -> Vec<FieldInfo> {
    vec![text_field("id")]
}

fn bookings_schema() -> Vec<FieldInfo> {
    [
        "id",
        "resource_id",
        "user_id",
        "start_at",
        "end_at",
        "status",
        "comment",
        "created_at",
        "updated_at",
    ]
    .into_iter()
    .map(text_field)
    .collect()
}

fn conflicts_schema() -> Vec<FieldInfo> {
    vec![
        text_field("resource_id"),
        text_field("start_at"),
        text_field("end_at"),
        FieldInfo::new("conflict".into(), None, None, Type::BOOL, FieldFormat::Text),
    ]
}

fn resources_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("owner_id"),
        text_field("category_id"),
        text_field("title"),
        text_field("description"),
        text_field("location"),
        FieldInfo::new("price_per_hour".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("is_active".into(), None, None, Type::BOOL, FieldFormat::Text),
        text_field("created_at"),
    ]
}

fn categories_schema() -> Vec<FieldInfo> {
    ["id", "name", "created_at"].into_iter().map(text_field).collect()
}

fn users_schema() -> Vec<FieldInfo> {
    ["id", "email", "name", "role", "created_at"]
        .into_iter()
        .map(text_field)
        .collect()
}

fn login_schema() -> Vec<FieldInfo> {
    ["token", "user_id", "role"].into_iter().map(text_field).collect()
}

fn session_schema() -> Vec<FieldInfo> {
    ["user_id", "role"].into_iter().map(text_field).collect()
}

fn schema_for(sql: &str) -> Vec<FieldInfo> {
    match sql::result_shape(sql) {
        ResultShape::Bookings => bookings_schema(),
        ResultShape::Conflicts => conflicts_schema(),
        ResultShape::Resources => resources_schema(),
        ResultShape::Categories => categories_schema(),
        ResultShape::Users => users_schema(),
        ResultShape::Login => login_schema(),
        ResultShape::Session => session_schema(),
        ResultShape::NewId => id_schema(),
        ResultShape::None => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for BookhubHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        Ok(vec![self.run(cmd).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct BookhubQueryParser;

#[async_trait]
impl QueryParser for BookhubQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for BookhubHandler {
    type Statement = String;
    type QueryParser = BookhubQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute(&portal.statement.statement, &portal.parameters);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.run(cmd).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for(
            &target.statement.statement,
        )))
    }
}

/// Byte ranges and 1-based indices of `$N` placeholders, skipping quoted
/// literals and identifiers.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote closes and reopens, which lands in the same state.
            Some(q) => {
                if b == q {
                    quote = None;
                }
                i += 1;
            }
            None if b == b'\'' || b == b'"' => {
                quote = Some(b);
                i += 1;
            }
            None if b == b'$' => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    found.push((start..i, n));
                }
            }
            None => i += 1,
        }
    }
    found
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Inline bound text parameters as quoted literals in a single pass over
/// the statement. Substituted text is never scanned again; placeholders
/// with no bound value are left as written.
fn substitute<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|k| params.get(k)) else {
            continue;
        };
        out.push_str(&sql[copied..range.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        copied = range.end;
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct BookhubFactory {
    handler: Arc<BookhubHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<BookhubAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl BookhubFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = BookhubAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(BookhubHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for BookhubFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection to completion.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, BookhubFactory::new(engine, password)).await
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for each engine error kind.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidRequest(_) => "22023",
        EngineError::Conflict(_) => "23P01",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::NotFound(_) => "P0002",
        EngineError::Forbidden => "42501",
        EngineError::Unauthorized => "28P01",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::StorageError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if let EngineError::StorageError(detail) = &e {
        error!("storage failure: {detail}");
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

impl From<PgWireError> for EngineError {
    fn from(e: PgWireError) -> Self {
        EngineError::StorageError(format!("row encoding: {e}"))
    }
}
