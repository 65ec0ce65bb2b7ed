use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRooms {
        rooms: Vec<(RoomId, f64)>, // (id, base_price)
    },
    SetupRooms,
    InsertBooking {
        id: Ulid,
        room_id: RoomId,
        check_in: Ms,
        check_out: Ms,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectRooms,
    SelectBookings {
        id: Option<Ulid>,
    },
    /// Summed demand over slots `[lo, hi]`; unbounded sides cover everything.
    SelectDemand {
        lo: Option<i64>,
        hi: Option<i64>,
    },
    SelectQuote {
        room_id: RoomId,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Call(func) => match object_name_last(&func.name).as_deref() {
            Some("setup_rooms") => Ok(Command::SetupRooms),
            Some(other) => Err(SqlError::Unsupported(format!("procedure {other}"))),
            None => Err(SqlError::Parse("empty procedure name".into())),
        },
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;

    match table.as_str() {
        "rooms" => {
            let mut rooms = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                if row.len() < 2 {
                    return Err(SqlError::WrongArity("rooms", 2, row.len()));
                }
                let id = parse_text(&row[0]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                let base_price =
                    parse_f64(&row[1]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                rooms.push((id, base_price));
            }
            Ok(Command::InsertRooms { rooms })
        }
        "bookings" => {
            if rows.len() != 1 {
                return Err(SqlError::Unsupported("multi-row booking insert".into()));
            }
            let values = &rows[0];
            if values.len() < 4 {
                return Err(SqlError::WrongArity("bookings", 4, values.len()));
            }
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                room_id: parse_text(&values[1])?,
                check_in: parse_i64(&values[2])?,
                check_out: parse_i64(&values[3])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    match table.as_str() {
        "bookings" => {
            let filters = Filters::collect(delete.selection.as_ref(), &[("id", Cmp::Eq)])?;
            let id = filters.get("id", Cmp::Eq).ok_or(SqlError::MissingFilter("id"))?;
            Ok(Command::DeleteBooking { id: parse_ulid(id)? })
        }
        "rooms" => Err(SqlError::Unsupported("rooms cannot be deleted".into())),
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
    let selection = select.selection.as_ref();

    match table.as_str() {
        "rooms" => {
            Filters::collect(selection, &[])?;
            Ok(Command::SelectRooms)
        }
        "bookings" => {
            let filters = Filters::collect(selection, &[("id", Cmp::Eq)])?;
            Ok(Command::SelectBookings {
                id: filters.get("id", Cmp::Eq).map(parse_ulid).transpose()?,
            })
        }
        "demand" => {
            let filters = Filters::collect(
                selection,
                &[("slot", Cmp::Ge), ("slot", Cmp::Le), ("slot", Cmp::Eq)],
            )?;
            let slot = filters.get("slot", Cmp::Eq).map(parse_i64).transpose()?;
            let ge = filters.get("slot", Cmp::Ge).map(parse_i64).transpose()?;
            let le = filters.get("slot", Cmp::Le).map(parse_i64).transpose()?;
            if slot.is_some() && (ge.is_some() || le.is_some()) {
                return Err(SqlError::Unsupported("slot = combined with a range".into()));
            }
            Ok(Command::SelectDemand {
                lo: slot.or(ge),
                hi: slot.or(le),
            })
        }
        "quotes" => {
            let filters = Filters::collect(selection, &[("room_id", Cmp::Eq)])?;
            let room_id = filters
                .get("room_id", Cmp::Eq)
                .ok_or(SqlError::MissingFilter("room_id"))?;
            Ok(Command::SelectQuote {
                room_id: parse_text(room_id)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Cmp {
    Eq,
    Ge,
    Le,
}

impl std::fmt::Display for Cmp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Cmp::Eq => "=",
            Cmp::Ge => ">=",
            Cmp::Le => "<=",
        })
    }
}

/// `col = v`, `col >= v` and `col <= v` terms of a conjunctive WHERE clause.
/// Every term must be one the command consumes, at most once each; anything
/// else is rejected rather than ignored.
struct Filters<'a> {
    terms: Vec<(String, Cmp, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn collect(selection: Option<&'a Expr>, allowed: &[(&str, Cmp)]) -> Result<Self, SqlError> {
        let mut filters = Filters { terms: Vec::new() };
        if let Some(expr) = selection {
            filters.visit(expr)?;
        }
        for (i, (col, cmp, _)) in filters.terms.iter().enumerate() {
            if !allowed.iter().any(|(c, k)| *c == col.as_str() && k == cmp) {
                return Err(SqlError::Unsupported(format!("filter {col} {cmp}")));
            }
            if filters.terms[..i].iter().any(|(c, k, _)| c == col && k == cmp) {
                return Err(SqlError::Unsupported(format!("repeated filter {col} {cmp}")));
            }
        }
        Ok(filters)
    }

    fn visit(&mut self, expr: &'a Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.visit(inner),
            Expr::BinaryOp { left, op, right } => {
                if *op == ast::BinaryOperator::And {
                    self.visit(left)?;
                    return self.visit(right);
                }
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
                let cmp = match op {
                    ast::BinaryOperator::Eq => Cmp::Eq,
                    ast::BinaryOperator::GtEq => Cmp::Ge,
                    ast::BinaryOperator::LtEq => Cmp::Le,
                    _ => return Err(SqlError::Unsupported(format!("operator {op}"))),
                };
                self.terms.push((col, cmp, right.as_ref()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("filter {other}"))),
        }
    }

    fn get(&self, col: &str, cmp: Cmp) -> Option<&'a Expr> {
        self.terms
            .iter()
            .find(|(c, k, _)| c == col && *k == cmp)
            .map(|(_, _, e)| *e)
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

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if values.rows.is_empty() => {
            Err(SqlError::Parse("empty VALUES".into()))
        }
        SetExpr::Values(values) => Ok(&values.rows),
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

/// Room ids may be written quoted (`'1'`) or bare (`1`); both are text.
fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected text, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

trait Number: std::str::FromStr {
    fn negate(self) -> Option<Self>;
}

impl Number for i64 {
    fn negate(self) -> Option<Self> {
        self.checked_neg()
    }
}

impl Number for f64 {
    fn negate(self) -> Option<Self> {
        Some(-self)
    }
}

/// Numeric literal, quoted number, or negated literal.
fn parse_number<T: Number>(expr: &Expr, what: &str) -> Result<T, SqlError>
where
    T::Err: std::fmt::Display,
{
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return parse_number::<T>(expr, what)?
            .negate()
            .ok_or_else(|| SqlError::Parse(format!("bad {what}: negation overflows")));
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .trim()
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad {what}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    parse_number(expr, "i64")
}

fn parse_f64(expr: &Expr) -> Result<f64, SqlError> {
    parse_number(expr, "f64")
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
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
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
