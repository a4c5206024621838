use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::calendar::parse_timestamp;
use crate::engine::{BookingFilter, RoomFilter};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertBooking {
        room_id: RoomId,
        start: Ms,
        end: Ms,
        purpose: String,
        is_semester: bool,
    },
    InsertSemesterBooking {
        room_id: RoomId,
        start: Ms,
        end: Ms,
        purpose: String,
    },
    CancelBooking {
        id: Ulid,
    },
    RescheduleBooking {
        id: Ulid,
        start: Option<Ms>,
        end: Option<Ms>,
        room_id: Option<RoomId>,
    },
    SelectBooking {
        id: Ulid,
    },
    SelectBookings {
        filter: BookingFilter,
    },
    SelectHistory {
        booking_id: Ulid,
    },
    SelectRooms {
        filter: RoomFilter,
    },
}

/// Positional column order when an INSERT omits its column list.
const BOOKING_COLUMNS: [&str; 5] = ["room_id", "start_time", "end_time", "purpose", "is_semester"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let columns: Vec<String> = if insert.columns.is_empty() {
        BOOKING_COLUMNS.iter().take(values.len()).map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if columns.len() != values.len() {
        return Err(SqlError::WrongArity("VALUES", columns.len(), values.len()));
    }

    let mut row = InsertRow::default();
    for (col, value) in columns.iter().zip(values.iter()) {
        match col.as_str() {
            "room_id" => row.room_id = Some(parse_i64(value)?),
            "start_time" => row.start = Some(parse_timestamp_expr(value)?),
            "end_time" => row.end = Some(parse_timestamp_expr(value)?),
            "purpose" => row.purpose = parse_string_or_null(value)?,
            "is_semester" | "is_semester_booking" => row.is_semester = parse_bool(value)?,
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }
    let room_id = row.room_id.ok_or(SqlError::MissingColumn("room_id"))?;
    let start = row.start.ok_or(SqlError::MissingColumn("start_time"))?;
    let end = row.end.ok_or(SqlError::MissingColumn("end_time"))?;
    let purpose = row.purpose.unwrap_or_default();

    match table.as_str() {
        "bookings" => Ok(Command::InsertBooking {
            room_id,
            start,
            end,
            purpose,
            is_semester: row.is_semester,
        }),
        "semester_bookings" => Ok(Command::InsertSemesterBooking {
            room_id,
            start,
            end,
            purpose,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Default)]
struct InsertRow {
    room_id: Option<RoomId>,
    start: Option<Ms>,
    end: Option<Ms>,
    purpose: Option<String>,
    is_semester: bool,
}

// ── UPDATE / DELETE ───────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(selection, "id")?;

    let mut status = None;
    let (mut start, mut end, mut room_id) = (None, None, None);
    for a in assignments {
        let col = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        match col.as_str() {
            "status" => status = Some(parse_status(&a.value)?),
            "start_time" => start = Some(parse_timestamp_expr(&a.value)?),
            "end_time" => end = Some(parse_timestamp_expr(&a.value)?),
            "room_id" => room_id = Some(parse_i64(&a.value)?),
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }

    match status {
        Some(BookingStatus::Cancelled) if start.is_none() && end.is_none() && room_id.is_none() => {
            Ok(Command::CancelBooking { id })
        }
        Some(BookingStatus::Cancelled) => Err(SqlError::Unsupported(
            "status cannot be combined with other assignments".into(),
        )),
        Some(BookingStatus::Active) => Err(SqlError::Unsupported(
            "a cancelled booking cannot be reactivated".into(),
        )),
        None if start.is_none() && end.is_none() && room_id.is_none() => {
            Err(SqlError::Parse("UPDATE without assignments".into()))
        }
        None => Ok(Command::RescheduleBooking { id, start, end, room_id }),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection, "id")?;

    match table.as_str() {
        // Bookings are never removed; DELETE is a cancellation.
        "bookings" => Ok(Command::CancelBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut preds = Vec::new();
    if let Some(selection) = &select.selection {
        collect_predicates(selection, &mut preds)?;
    }

    match table.as_str() {
        "bookings" => bookings_select(preds),
        "booking_history" => {
            let mut booking_id = None;
            for (col, op, value) in preds {
                match (col.as_str(), op) {
                    ("booking_id", Op::Eq) => booking_id = Some(parse_ulid_expr(value)?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::SelectHistory {
                booking_id: booking_id.ok_or(SqlError::MissingFilter("booking_id"))?,
            })
        }
        "rooms" => {
            let mut filter = RoomFilter::default();
            for (col, op, value) in preds {
                match (col.as_str(), op) {
                    ("capacity", Op::GtEq) => filter.min_capacity = Some(parse_u32(value)?),
                    ("has_ac", Op::Eq) => filter.has_ac = Some(parse_bool(value)?),
                    ("has_projector", Op::Eq) => filter.has_projector = Some(parse_bool(value)?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::SelectRooms { filter })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn bookings_select(preds: Vec<(String, Op, &Expr)>) -> Result<Command, SqlError> {
    let mut filter = BookingFilter::default();
    let mut id = None;
    for (col, op, value) in preds {
        match (col.as_str(), op) {
            ("id", Op::Eq) => id = Some(parse_ulid_expr(value)?),
            ("room_id", Op::Eq) => filter.room_id = Some(parse_i64(value)?),
            ("created_by", Op::Eq) => filter.created_by = Some(parse_i64(value)?),
            ("start_time", Op::GtEq) => filter.start_from = Some(parse_timestamp_expr(value)?),
            ("end_time", Op::LtEq) => filter.end_until = Some(parse_timestamp_expr(value)?),
            ("status", Op::Eq) => filter.status = Some(parse_status(value)?),
            ("slot", Op::Eq) => {
                let hour = parse_u32(value)?;
                if hour > 23 {
                    return Err(SqlError::Parse(format!("slot {hour} is not an hour of day")));
                }
                filter.slot = Some(hour);
            }
            _ => return Err(SqlError::UnknownColumn(col)),
        }
    }
    match id {
        Some(id) => Ok(Command::SelectBooking { id }),
        None => Ok(Command::SelectBookings { filter }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    GtEq,
    LtEq,
}

/// Flatten an AND-chain of `column <op> value` comparisons.
fn collect_predicates<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, Op, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_predicates(inner, out),
        Expr::BinaryOp { left, op, right } => {
            let op = match op {
                ast::BinaryOperator::And => {
                    collect_predicates(left, out)?;
                    return collect_predicates(right, out);
                }
                ast::BinaryOperator::Eq => Op::Eq,
                ast::BinaryOperator::GtEq => Op::GtEq,
                ast::BinaryOperator::LtEq => Op::LtEq,
                other => return Err(SqlError::Unsupported(format!("operator {other}"))),
            };
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            out.push((col, op, &**right));
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
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>, column: &'static str) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter(column))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some(column) => parse_ulid_expr(right),
        _ => Err(SqlError::MissingFilter(column)),
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

/// RFC 3339 string, or integer milliseconds since the epoch.
fn parse_timestamp_expr(expr: &Expr) -> Result<Ms, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => match s.parse::<i64>() {
            Ok(ms) => Ok(ms),
            Err(_) => parse_timestamp(s).map_err(|e| SqlError::Parse(e.to_string())),
        },
        _ => parse_i64(expr),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_status(expr: &Expr) -> Result<BookingStatus, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => s.parse().map_err(SqlError::Parse),
        _ => Err(SqlError::Parse(format!("expected status string, got {expr:?}"))),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
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
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_insert_booking_with_rfc3339() {
        let sql = "INSERT INTO bookings (room_id, start_time, end_time, purpose) \
                   VALUES (3, '2026-10-19T10:00:00Z', '2026-10-19T11:00:00+00:00', 'Robotics club')";
        let cmd = parse_sql(sql).unwrap();
        match cmd {
            Command::InsertBooking { room_id, start, end, purpose, is_semester } => {
                assert_eq!(room_id, 3);
                assert_eq!(end - start, 3_600_000);
                assert_eq!(purpose, "Robotics club");
                assert!(!is_semester);
            }
            _ => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_columns_any_order() {
        let sql = "INSERT INTO bookings (purpose, end_time, room_id, start_time, is_semester) \
                   VALUES ('Lab', 2000, 1, 1000, true)";
        let cmd = parse_sql(sql).unwrap();
        assert_eq!(
            cmd,
            Command::InsertBooking {
                room_id: 1,
                start: 1000,
                end: 2000,
                purpose: "Lab".into(),
                is_semester: true,
            }
        );
    }

    #[test]
    fn parse_insert_booking_positional() {
        let sql = "INSERT INTO bookings VALUES (1, 1000, 2000, 'Lab')";
        let cmd = parse_sql(sql).unwrap();
        assert!(matches!(cmd, Command::InsertBooking { room_id: 1, start: 1000, end: 2000, .. }));
    }

    #[test]
    fn parse_insert_missing_end_errors() {
        let sql = "INSERT INTO bookings (room_id, start_time) VALUES (1, 1000)";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingColumn("end_time"))));
    }

    #[test]
    fn parse_insert_semester() {
        let sql = "INSERT INTO semester_bookings (room_id, start_time, end_time, purpose) \
                   VALUES (2, '2026-10-19T10:00:00Z', '2026-10-19T12:00:00Z', 'DB lab')";
        let cmd = parse_sql(sql).unwrap();
        assert!(matches!(cmd, Command::InsertSemesterBooking { room_id: 2, .. }));
    }

    #[test]
    fn parse_bad_timestamp_errors() {
        let sql = "INSERT INTO bookings (room_id, start_time, end_time) VALUES (1, 'tomorrow', 2000)";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_cancel_via_update_and_delete() {
        let update = format!("UPDATE bookings SET status = 'CANCELLED' WHERE id = '{ID}'");
        let delete = format!("DELETE FROM bookings WHERE id = '{ID}'");
        let expected = Command::CancelBooking { id: Ulid::from_string(ID).unwrap() };
        assert_eq!(parse_sql(&update).unwrap(), expected);
        assert_eq!(parse_sql(&delete).unwrap(), expected);
    }

    #[test]
    fn parse_reschedule_partial() {
        let sql = format!("UPDATE bookings SET room_id = 4, end_time = 5000 WHERE id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        assert_eq!(
            cmd,
            Command::RescheduleBooking {
                id: Ulid::from_string(ID).unwrap(),
                start: None,
                end: Some(5000),
                room_id: Some(4),
            }
        );
    }

    #[test]
    fn parse_reactivate_rejected() {
        let sql = format!("UPDATE bookings SET status = 'ACTIVE' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_update_requires_id() {
        let sql = "UPDATE bookings SET status = 'CANCELLED' WHERE room_id = 1";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_select_bookings_filters() {
        let sql = "SELECT * FROM bookings WHERE room_id = 2 AND created_by = 7 \
                   AND start_time >= '2026-10-19T00:00:00Z' AND status = 'ACTIVE' AND slot = 9";
        let cmd = parse_sql(sql).unwrap();
        match cmd {
            Command::SelectBookings { filter } => {
                assert_eq!(filter.room_id, Some(2));
                assert_eq!(filter.created_by, Some(7));
                assert!(filter.start_from.is_some());
                assert_eq!(filter.end_until, None);
                assert_eq!(filter.status, Some(BookingStatus::Active));
                assert_eq!(filter.slot, Some(9));
            }
            _ => panic!("expected SelectBookings, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_booking_by_id() {
        let sql = format!("SELECT * FROM bookings WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::SelectBooking { .. }));
    }

    #[test]
    fn parse_select_all_bookings() {
        let cmd = parse_sql("SELECT * FROM bookings").unwrap();
        assert_eq!(cmd, Command::SelectBookings { filter: BookingFilter::default() });
    }

    #[test]
    fn parse_select_history() {
        let sql = format!("SELECT * FROM booking_history WHERE booking_id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        assert_eq!(cmd, Command::SelectHistory { booking_id: Ulid::from_string(ID).unwrap() });
        assert!(matches!(
            parse_sql("SELECT * FROM booking_history"),
            Err(SqlError::MissingFilter("booking_id"))
        ));
    }

    #[test]
    fn parse_select_rooms() {
        let sql = "SELECT * FROM rooms WHERE capacity >= 30 AND has_projector = true";
        let cmd = parse_sql(sql).unwrap();
        assert_eq!(
            cmd,
            Command::SelectRooms {
                filter: RoomFilter {
                    min_capacity: Some(30),
                    has_ac: None,
                    has_projector: Some(true),
                }
            }
        );
    }

    #[test]
    fn parse_unknown_column_errors() {
        let sql = "SELECT * FROM rooms WHERE colour = 'red'";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn(_))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = "INSERT INTO foobar (room_id, start_time, end_time) VALUES (1, 1, 2)";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
