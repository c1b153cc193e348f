//! SQL surface. Every supported statement maps to exactly one engine
//! operation; anything else is rejected before it reaches the engine.

use std::collections::HashMap;

use sqlparser::ast::{
    self, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

#[derive(Debug, Clone, PartialEq)]
pub enum BookingFilter {
    ById(Ulid),
    ByUser(Ulid),
    Pending { owner_id: Option<Ulid> },
    /// Whole local days, both ends inclusive.
    ByResource {
        resource_id: Ulid,
        from_day: String,
        to_day: String,
    },
}

/// Statements that act on behalf of a user carry the session token from
/// `SELECT * FROM login`; the acting identity is never taken from an id column.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    InsertUser {
        email: String,
        name: String,
        role: String,
        password: String,
    },
    InsertProfile {
        token: String,
        email: String,
        name: String,
    },
    InsertPasswordChange {
        token: String,
        current: String,
        new_password: String,
    },
    InsertCategory {
        token: String,
        name: String,
    },
    InsertCategoryRename {
        token: String,
        category_id: Ulid,
        name: String,
    },
    InsertResource {
        token: String,
        category_id: Ulid,
        title: String,
        description: Option<String>,
        location: Option<String>,
        price_per_hour: i64,
    },
    /// Timestamps stay as text; the engine owns their interpretation.
    InsertBooking {
        token: String,
        resource_id: Ulid,
        start_at: String,
        end_at: String,
    },
    InsertDecision {
        token: String,
        booking_id: Ulid,
        status: String,
        comment: Option<String>,
    },
    CancelBooking {
        id: Ulid,
        token: String,
    },
    DeleteCategory {
        id: Ulid,
        token: String,
    },
    /// Deletes the account the token belongs to.
    DeleteUser {
        token: String,
    },
    SelectBookings(BookingFilter),
    SelectConflicts {
        resource_id: Ulid,
        start_at: String,
        end_at: String,
    },
    SelectResources {
        owner_id: Option<Ulid>,
    },
    SelectCategories,
    SelectUser {
        id: Ulid,
    },
    SelectLogin {
        email: String,
        password: String,
    },
    SelectSession {
        token: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [one] => one,
        _ => return Err(SqlError::Unsupported("multiple statements".into())),
    };
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// What a statement returns. Decided from the statement alone so that
/// extended-protocol Describe works before parameters are bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Bookings,
    Conflicts,
    Resources,
    Categories,
    Users,
    Login,
    Session,
    /// INSERTs that create an entity answer with its new `id`.
    NewId,
    None,
}

pub fn result_shape(sql: &str) -> ResultShape {
    let dialect = PostgreSqlDialect {};
    let Ok(stmts) = Parser::parse_sql(&dialect, sql) else {
        return ResultShape::None;
    };
    match stmts.first() {
        Some(Statement::Query(query)) => {
            let table = match query.body.as_ref() {
                SetExpr::Select(select) => select
                    .from
                    .first()
                    .and_then(|from| table_factor_name(&from.relation).ok()),
                _ => None,
            };
            match table.as_deref() {
                Some("bookings") => ResultShape::Bookings,
                Some("conflicts") => ResultShape::Conflicts,
                Some("resources") => ResultShape::Resources,
                Some("categories") => ResultShape::Categories,
                Some("users") => ResultShape::Users,
                Some("login") => ResultShape::Login,
                Some("sessions") => ResultShape::Session,
                _ => ResultShape::None,
            }
        }
        Some(Statement::Insert(insert)) => match insert_table_name(insert).as_deref() {
            Ok("users" | "categories" | "resources" | "bookings") => ResultShape::NewId,
            _ => ResultShape::None,
        },
        _ => ResultShape::None,
    }
}

// ── INSERT ────────────────────────────────────────────────────

const USER_COLUMNS: &[&str] = &["email", "name", "role", "password"];
const PROFILE_COLUMNS: &[&str] = &["token", "email", "name"];
const PASSWORD_CHANGE_COLUMNS: &[&str] = &["token", "current_password", "new_password"];
const CATEGORY_COLUMNS: &[&str] = &["token", "name"];
const CATEGORY_RENAME_COLUMNS: &[&str] = &["token", "category_id", "name"];
const RESOURCE_COLUMNS: &[&str] = &[
    "token",
    "category_id",
    "title",
    "description",
    "location",
    "price_per_hour",
];
const BOOKING_COLUMNS: &[&str] = &["token", "resource_id", "start_at", "end_at"];
const DECISION_COLUMNS: &[&str] = &["token", "booking_id", "status", "comment"];

/// Canonical table name and the column order assumed when an INSERT
/// names no columns.
fn insert_schema(table: &str) -> Option<(&'static str, &'static [&'static str])> {
    Some(match table {
        "users" => ("users", USER_COLUMNS),
        "profiles" => ("profiles", PROFILE_COLUMNS),
        "password_changes" => ("password_changes", PASSWORD_CHANGE_COLUMNS),
        "categories" => ("categories", CATEGORY_COLUMNS),
        "category_renames" => ("category_renames", CATEGORY_RENAME_COLUMNS),
        "resources" => ("resources", RESOURCE_COLUMNS),
        "bookings" => ("bookings", BOOKING_COLUMNS),
        "decisions" => ("decisions", DECISION_COLUMNS),
        _ => return None,
    })
}

/// One VALUES row keyed by column name.
struct Row {
    table: &'static str,
    values: HashMap<String, Expr>,
}

impl Row {
    fn get(&self, column: &'static str) -> Option<&Expr> {
        self.values.get(column)
    }

    fn required(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(self.table, column))
    }

    fn ulid(&self, column: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid(self.required(column)?)
    }

    fn text(&self, column: &'static str) -> Result<String, SqlError> {
        parse_text(self.required(column)?)
    }

    fn opt_text(&self, column: &'static str) -> Result<Option<String>, SqlError> {
        match self.get(column) {
            Some(expr) => parse_opt_text(expr),
            None => Ok(None),
        }
    }

    fn i64(&self, column: &'static str) -> Result<i64, SqlError> {
        parse_i64(self.required(column)?)
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let name = insert_table_name(insert)?;
    let (table, defaults) = insert_schema(&name).ok_or(SqlError::UnknownTable(name))?;
    let row = single_values_row(insert, table, defaults)?;

    match table {
        "users" => Ok(Command::InsertUser {
            email: row.text("email")?,
            name: row.text("name")?,
            role: row.opt_text("role")?.unwrap_or_default(),
            password: row.text("password")?,
        }),
        "profiles" => Ok(Command::InsertProfile {
            token: row.text("token")?,
            email: row.text("email")?,
            name: row.text("name")?,
        }),
        "password_changes" => Ok(Command::InsertPasswordChange {
            token: row.text("token")?,
            current: row.text("current_password")?,
            new_password: row.text("new_password")?,
        }),
        "categories" => Ok(Command::InsertCategory {
            token: row.text("token")?,
            name: row.text("name")?,
        }),
        "category_renames" => Ok(Command::InsertCategoryRename {
            token: row.text("token")?,
            category_id: row.ulid("category_id")?,
            name: row.text("name")?,
        }),
        "resources" => Ok(Command::InsertResource {
            token: row.text("token")?,
            category_id: row.ulid("category_id")?,
            title: row.text("title")?,
            description: row.opt_text("description")?,
            location: row.opt_text("location")?,
            price_per_hour: match row.get("price_per_hour") {
                Some(_) => row.i64("price_per_hour")?,
                None => 0,
            },
        }),
        "bookings" => Ok(Command::InsertBooking {
            token: row.text("token")?,
            resource_id: row.ulid("resource_id")?,
            start_at: row.text("start_at")?,
            end_at: row.text("end_at")?,
        }),
        "decisions" => Ok(Command::InsertDecision {
            token: row.text("token")?,
            booking_id: row.ulid("booking_id")?,
            status: row.text("status")?,
            comment: row.opt_text("comment")?,
        }),
        other => Err(SqlError::UnknownTable(other.to_string())),
    }
}

fn single_values_row(
    insert: &ast::Insert,
    table: &'static str,
    defaults: &'static [&'static str],
) -> Result<Row, SqlError> {
    let source = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let rows = match source.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    let exprs = match rows.as_slice() {
        [row] => row,
        [] => return Err(SqlError::Parse("empty VALUES".into())),
        _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
    };

    let columns: Vec<String> = if insert.columns.is_empty() {
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if columns.len() != exprs.len() {
        return Err(SqlError::WrongArity(table, columns.len(), exprs.len()));
    }
    if let Some(unknown) = columns.iter().find(|c| !defaults.contains(&c.as_str())) {
        return Err(SqlError::UnknownColumn(table, unknown.clone()));
    }
    Ok(Row {
        table,
        values: columns.into_iter().zip(exprs.iter().cloned()).collect(),
    })
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = collect_filters(delete.selection.as_ref())?;
    match table.as_str() {
        "bookings" => Ok(Command::CancelBooking {
            id: filters.ulid_eq("id")?,
            token: filters.text_eq("token")?,
        }),
        "categories" => Ok(Command::DeleteCategory {
            id: filters.ulid_eq("id")?,
            token: filters.text_eq("token")?,
        }),
        "users" => Ok(Command::DeleteUser {
            token: filters.text_eq("token")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let from = select
        .from
        .first()
        .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
    let table = table_factor_name(&from.relation)?;
    let filters = collect_filters(select.selection.as_ref())?;

    match table.as_str() {
        "bookings" => parse_booking_filter(&filters).map(Command::SelectBookings),
        "conflicts" => Ok(Command::SelectConflicts {
            resource_id: filters.ulid_eq("resource_id")?,
            start_at: filters.text_eq("start_at")?,
            end_at: filters.text_eq("end_at")?,
        }),
        "resources" => Ok(Command::SelectResources {
            owner_id: filters.opt_ulid_eq("owner_id")?,
        }),
        "categories" => Ok(Command::SelectCategories),
        "users" => Ok(Command::SelectUser {
            id: filters.ulid_eq("id")?,
        }),
        "login" => Ok(Command::SelectLogin {
            email: filters.text_eq("email")?,
            password: filters.text_eq("password")?,
        }),
        "sessions" => Ok(Command::SelectSession {
            token: filters.text_eq("token")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_booking_filter(filters: &Filters) -> Result<BookingFilter, SqlError> {
    if let Some(id) = filters.opt_ulid_eq("id")? {
        return Ok(BookingFilter::ById(id));
    }
    if let Some(user_id) = filters.opt_ulid_eq("user_id")? {
        return Ok(BookingFilter::ByUser(user_id));
    }
    if let Some(resource_id) = filters.opt_ulid_eq("resource_id")? {
        let from_day = filters.find("start_date", BinaryOperator::GtEq);
        let to_day = filters.find("start_date", BinaryOperator::LtEq);
        return Ok(BookingFilter::ByResource {
            resource_id,
            from_day: parse_text(from_day.ok_or(SqlError::MissingFilter("start_date >="))?)?,
            to_day: parse_text(to_day.ok_or(SqlError::MissingFilter("start_date <="))?)?,
        });
    }
    if let Some(status) = filters.find("status", BinaryOperator::Eq) {
        let status = parse_text(status)?;
        if !status.eq_ignore_ascii_case("PENDING") {
            return Err(SqlError::Unsupported(format!("bookings by status {status}")));
        }
        return Ok(BookingFilter::Pending {
            owner_id: filters.opt_ulid_eq("owner_id")?,
        });
    }
    Err(SqlError::MissingFilter("id, user_id, resource_id or status"))
}

/// Conjunctive `column <op> literal` predicates from a WHERE clause.
struct Filters(Vec<(String, BinaryOperator, Expr)>);

impl Filters {
    fn find(&self, column: &str, op: BinaryOperator) -> Option<&Expr> {
        self.0
            .iter()
            .find(|(c, o, _)| c == column && *o == op)
            .map(|(_, _, e)| e)
    }

    fn ulid_eq(&self, column: &'static str) -> Result<Ulid, SqlError> {
        self.opt_ulid_eq(column)?.ok_or(SqlError::MissingFilter(column))
    }

    fn opt_ulid_eq(&self, column: &'static str) -> Result<Option<Ulid>, SqlError> {
        self.find(column, BinaryOperator::Eq).map(parse_ulid).transpose()
    }

    fn text_eq(&self, column: &'static str) -> Result<String, SqlError> {
        let expr = self
            .find(column, BinaryOperator::Eq)
            .ok_or(SqlError::MissingFilter(column))?;
        parse_text(expr)
    }
}

fn collect_filters(selection: Option<&Expr>) -> Result<Filters, SqlError> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        collect_into(expr, &mut out)?;
    }
    Ok(Filters(out))
}

fn collect_into(expr: &Expr, out: &mut Vec<(String, BinaryOperator, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_into(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_into(left, out)?;
            collect_into(right, out)
        }
        Expr::BinaryOp { left, op, right }
            if matches!(
                op,
                BinaryOperator::Eq | BinaryOperator::GtEq | BinaryOperator::LtEq
            ) =>
        {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("predicate {expr}")))?;
            out.push((column, op.clone(), right.as_ref().clone()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("predicate {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let text = parse_text(expr)?;
    Ulid::from_string(text.trim()).map_err(|e| SqlError::Parse(format!("bad ULID {text:?}: {e}")))
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    parse_opt_text(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

fn parse_opt_text(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(Value::Boolean(b)) => Ok(Some(b.to_string())),
        Some(value) => Err(SqlError::Parse(format!("expected text, got {value}"))),
        None => Err(SqlError::Parse(format!("expected literal, got {expr}"))),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr: inner,
    } = expr
    {
        return Ok(-parse_i64(inner)?);
    }
    let text = parse_text(expr)?;
    text.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer {text:?}: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    MissingColumn(&'static str, &'static str),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const B: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";
    const TOKEN: &str = "eyJhbGciOiJIUzI1NiJ9.e30.c2ln";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn insert_booking_named_columns_any_order() {
        let sql = format!(
            "INSERT INTO bookings (resource_id, token, end_at, start_at) \
             VALUES ('{A}', '{TOKEN}', '2025-12-25T11:00:00', '2025-12-25T10:00:00Z')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertBooking {
                token: TOKEN.into(),
                resource_id: ulid(A),
                start_at: "2025-12-25T10:00:00Z".into(),
                end_at: "2025-12-25T11:00:00".into(),
            }
        );
    }

    #[test]
    fn insert_without_columns_is_positional() {
        let sql = format!("INSERT INTO categories VALUES ('{TOKEN}', 'Meeting rooms')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertCategory {
                token: TOKEN.into(),
                name: "Meeting rooms".into()
            }
        );
    }

    #[test]
    fn insert_resource_optional_fields() {
        let sql = format!(
            "INSERT INTO resources (token, category_id, title, description, price_per_hour) \
             VALUES ('{TOKEN}', '{B}', 'Loft', NULL, 1500)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertResource {
                title,
                description,
                location,
                price_per_hour,
                ..
            } => {
                assert_eq!(title, "Loft");
                assert_eq!(description, None);
                assert_eq!(location, None);
                assert_eq!(price_per_hour, 1500);
            }
            other => panic!("expected InsertResource, got {other:?}"),
        }
    }

    #[test]
    fn negative_price_parses_for_engine_to_reject() {
        let sql = format!(
            "INSERT INTO resources (token, category_id, title, price_per_hour) \
             VALUES ('{TOKEN}', '{B}', 'Loft', -5)"
        );
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::InsertResource { price_per_hour: -5, .. }
        ));
    }

    #[test]
    fn insert_user_role_defaults_empty() {
        let sql = "INSERT INTO users (email, name, password) VALUES ('a@b.c', 'Ann', 'secret1')";
        match parse_sql(sql).unwrap() {
            Command::InsertUser { role, .. } => assert_eq!(role, ""),
            other => panic!("expected InsertUser, got {other:?}"),
        }
    }

    #[test]
    fn insert_decision() {
        let sql = format!(
            "INSERT INTO decisions (token, booking_id, status, comment) \
             VALUES ('{TOKEN}', '{A}', 'APPROVED', 'see you')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertDecision {
                token: TOKEN.into(),
                booking_id: ulid(A),
                status: "APPROVED".into(),
                comment: Some("see you".into()),
            }
        );
    }

    #[test]
    fn acting_user_cannot_be_named_by_id() {
        let sql = format!(
            "INSERT INTO decisions (booking_id, actor_id, status) VALUES ('{A}', '{B}', 'APPROVED')"
        );
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::UnknownColumn("decisions", c)) if c == "actor_id"
        ));
        let sql = format!("INSERT INTO bookings (user_id, resource_id, start_at, end_at) VALUES ('{B}', '{A}', 'x', 'y')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn("bookings", _))));
        let sql = format!("DELETE FROM users WHERE id = '{A}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("token"))));
    }

    #[test]
    fn unknown_column_and_arity_errors() {
        let sql = format!("INSERT INTO categories (token, colour) VALUES ('{TOKEN}', 'red')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn("categories", _))));
        let sql = format!("INSERT INTO categories (token, name) VALUES ('{TOKEN}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity("categories", 2, 1))));
    }

    #[test]
    fn multi_row_insert_rejected() {
        let sql = format!("INSERT INTO categories VALUES ('{TOKEN}', 'x'), ('{TOKEN}', 'y')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn cancel_requires_id_and_token() {
        let sql = format!("DELETE FROM bookings WHERE id = '{A}' AND token = '{TOKEN}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::CancelBooking {
                id: ulid(A),
                token: TOKEN.into()
            }
        );
        let sql = format!("DELETE FROM bookings WHERE id = '{A}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("token"))));
    }

    #[test]
    fn delete_user_and_category() {
        let sql = format!("DELETE FROM users WHERE token = '{TOKEN}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::DeleteUser {
                token: TOKEN.into()
            }
        );
        let sql = format!("DELETE FROM categories WHERE id = '{B}' AND token = '{TOKEN}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::DeleteCategory {
                id: ulid(B),
                token: TOKEN.into()
            }
        );
    }

    #[test]
    fn select_pending_with_and_without_owner() {
        assert_eq!(
            parse_sql("SELECT * FROM bookings WHERE status = 'PENDING'").unwrap(),
            Command::SelectBookings(BookingFilter::Pending { owner_id: None })
        );
        let sql = format!("SELECT * FROM bookings WHERE status = 'pending' AND owner_id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectBookings(BookingFilter::Pending {
                owner_id: Some(ulid(A))
            })
        );
        assert!(parse_sql("SELECT * FROM bookings WHERE status = 'APPROVED'").is_err());
    }

    #[test]
    fn select_resource_window() {
        let sql = format!(
            "SELECT * FROM bookings WHERE resource_id = '{A}' \
             AND start_date >= '2025-12-01' AND start_date <= '2025-12-31'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectBookings(BookingFilter::ByResource {
                resource_id: ulid(A),
                from_day: "2025-12-01".into(),
                to_day: "2025-12-31".into(),
            })
        );
    }

    #[test]
    fn select_by_user_and_by_id() {
        let sql = format!("SELECT * FROM bookings WHERE user_id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectBookings(BookingFilter::ByUser(ulid(A)))
        );
        let sql = format!("SELECT id, status FROM bookings WHERE (id = '{B}')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectBookings(BookingFilter::ById(ulid(B)))
        );
    }

    #[test]
    fn select_conflicts_check() {
        let sql = format!(
            "SELECT * FROM conflicts WHERE resource_id = '{A}' \
             AND start_at = '2025-12-25T10:30:00Z' AND end_at = '2025-12-25T11:30:00Z'"
        );
        assert!(matches!(parse_sql(&sql).unwrap(), Command::SelectConflicts { .. }));
    }

    #[test]
    fn select_directory_tables() {
        assert_eq!(
            parse_sql("SELECT * FROM resources").unwrap(),
            Command::SelectResources { owner_id: None }
        );
        assert_eq!(parse_sql("SELECT * FROM categories").unwrap(), Command::SelectCategories);
        assert_eq!(
            parse_sql("SELECT * FROM login WHERE email = 'a@b.c' AND password = 'pw'").unwrap(),
            Command::SelectLogin {
                email: "a@b.c".into(),
                password: "pw".into()
            }
        );
        assert_eq!(
            parse_sql("SELECT * FROM sessions WHERE token = 'abc'").unwrap(),
            Command::SelectSession { token: "abc".into() }
        );
    }

    #[test]
    fn or_predicates_rejected() {
        let sql = format!("SELECT * FROM bookings WHERE user_id = '{A}' OR user_id = '{B}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn bad_ulid_and_unknown_table() {
        assert!(parse_sql("SELECT * FROM bookings WHERE id = 'nope'").is_err());
        assert!(matches!(
            parse_sql("SELECT * FROM holds"),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn shapes_from_placeholders() {
        assert_eq!(
            result_shape("SELECT * FROM bookings WHERE user_id = $1"),
            ResultShape::Bookings
        );
        assert_eq!(
            result_shape("INSERT INTO bookings (token, resource_id, start_at, end_at) VALUES ($1, $2, $3, $4)"),
            ResultShape::NewId
        );
        assert_eq!(
            result_shape("INSERT INTO decisions VALUES ($1, $2, $3, $4)"),
            ResultShape::None
        );
        assert_eq!(result_shape("DELETE FROM users WHERE token = $1"), ResultShape::None);
    }

    #[test]
    fn empty_and_multiple_statements() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
        assert!(matches!(
            parse_sql("SELECT * FROM categories; SELECT * FROM categories"),
            Err(SqlError::Unsupported(_))
        ));
    }
}
