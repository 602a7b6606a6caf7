use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::model::RoomId;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    SelectRooms {
        id: Option<RoomId>,
    },
    SelectWaitlist {
        room_id: Option<RoomId>,
        name: Option<String>,
    },
    Enter {
        room_id: RoomId,
        name: String,
    },
    Leave {
        room_id: RoomId,
    },
    JoinWaitlist {
        room_id: RoomId,
        name: String,
    },
    LeaveWaitlist {
        name: String,
    },
}

/// Parse exactly one statement.
pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let mut commands = parse_batch(sql)?;
    if commands.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }
    Ok(commands.remove(0))
}

/// Parse a `;`-separated batch, as sent by the simple query protocol.
pub fn parse_batch(sql: &str) -> Result<Vec<Command>, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    stmts.iter().map(parse_statement).collect()
}

fn parse_statement(stmt: &Statement) -> Result<Command, SqlError> {
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "occupants" => {
            let (room_id, name) = room_and_name(insert, "occupants")?;
            Ok(Command::Enter { room_id, name })
        }
        "waitlist" => {
            let (room_id, name) = room_and_name(insert, "waitlist")?;
            Ok(Command::JoinWaitlist { room_id, name })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = where_filters(delete.selection.as_ref())?;

    match table.as_str() {
        "occupants" => {
            filters.only(&["room_id"])?;
            Ok(Command::Leave {
                room_id: filters.room_id("room_id")?.ok_or(SqlError::MissingFilter("room_id"))?,
            })
        }
        "waitlist" => {
            filters.only(&["name"])?;
            Ok(Command::LeaveWaitlist {
                name: filters.text("name")?.ok_or(SqlError::MissingFilter("name"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = where_filters(select.selection.as_ref())?;

    match table.as_str() {
        "rooms" => {
            filters.only(&["id"])?;
            Ok(Command::SelectRooms {
                id: filters.room_id("id")?,
            })
        }
        "waitlist" => {
            filters.only(&["room_id", "name"])?;
            Ok(Command::SelectWaitlist {
                room_id: filters.room_id("room_id")?,
                name: filters.text("name")?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `(room_id, name)` from a single-row VALUES. An explicit column list may
/// name them in either order; without one the order is `room_id, name`.
fn room_and_name(insert: &ast::Insert, table: &'static str) -> Result<(RoomId, String), SqlError> {
    let values = extract_insert_values(insert)?;
    if values.len() != 2 {
        return Err(SqlError::WrongArity(table, 2, values.len()));
    }

    let columns: Vec<String> = insert
        .columns
        .iter()
        .map(|c| c.value.to_lowercase())
        .collect();
    let (room_idx, name_idx) = if columns.is_empty() {
        (0, 1)
    } else {
        let position = |col: &'static str| {
            columns
                .iter()
                .position(|c| c == col)
                .ok_or(SqlError::MissingColumn(col))
        };
        if let Some(other) = columns.iter().find(|c| *c != "room_id" && *c != "name") {
            return Err(SqlError::UnknownColumn(other.clone()));
        }
        (position("room_id")?, position("name")?)
    };

    Ok((parse_room_id(&values[room_idx])?, parse_text(&values[name_idx])?))
}

// ── WHERE clauses ─────────────────────────────────────────────

/// Column equality filters joined by AND.
#[derive(Debug, Default)]
struct Filters<'a> {
    eq: Vec<(String, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn only(&self, allowed: &[&str]) -> Result<(), SqlError> {
        match self.eq.iter().find(|(col, _)| !allowed.contains(&col.as_str())) {
            Some((col, _)) => Err(SqlError::UnknownColumn(col.clone())),
            None => Ok(()),
        }
    }

    fn get(&self, col: &str) -> Result<Option<&'a Expr>, SqlError> {
        let mut matches = self.eq.iter().filter(|(c, _)| c == col);
        let first = matches.next().map(|(_, expr)| *expr);
        if matches.next().is_some() {
            return Err(SqlError::Parse(format!("{col} filtered more than once")));
        }
        Ok(first)
    }

    fn room_id(&self, col: &str) -> Result<Option<RoomId>, SqlError> {
        self.get(col)?.map(parse_room_id).transpose()
    }

    fn text(&self, col: &str) -> Result<Option<String>, SqlError> {
        self.get(col)?.map(parse_text).transpose()
    }
}

fn where_filters(selection: Option<&Expr>) -> Result<Filters<'_>, SqlError> {
    let mut filters = Filters::default();
    if let Some(expr) = selection {
        collect_filters(expr, &mut filters)?;
    }
    Ok(filters)
}

fn collect_filters<'a>(expr: &'a Expr, filters: &mut Filters<'a>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, filters),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_filters(left, filters)?;
                collect_filters(right, filters)
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                filters.eq.push((col, right.as_ref()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other}"))),
        },
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
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
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
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

fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row VALUES".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
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

/// Room ids arrive as numbers, or as quoted text from bound parameters.
fn parse_room_id(expr: &Expr) -> Result<RoomId, SqlError> {
    let raw = match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s,
        Some(value) => return Err(SqlError::Parse(format!("expected room id, got {value}"))),
        None => return Err(SqlError::Parse(format!("expected room id, got {expr}"))),
    };
    raw.trim()
        .parse()
        .map_err(|_| SqlError::Parse(format!("bad room id: {raw}")))
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    MissingColumn(&'static str),
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
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::MissingColumn(c) => write!(f, "missing column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
