use std::fmt::Debug;
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
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo, QueryResponse,
    Response,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::DirectoryAuthSource;
use crate::calendar::format_timestamp;
use crate::directory::Directory;
use crate::engine::{
    BookingRequest, CancelOutcome, Engine, EngineError, RescheduleRequest, SemesterRequest,
};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};

pub struct RoomBookHandler {
    engine: Arc<Engine>,
    query_parser: Arc<RoomBookQueryParser>,
}

impl RoomBookHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(RoomBookQueryParser),
        }
    }

    /// The login user name selects the principal.
    fn resolve_principal<C: ClientInfo>(&self, client: &C) -> PgWireResult<Principal> {
        let login = client.metadata().get("user").cloned().unwrap_or_default();
        self.engine.directory.principal(&login).ok_or_else(|| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "28000".into(),
                format!("unknown principal: {login}"),
            )))
        })
    }

    async fn run<C: ClientInfo>(
        &self,
        client: &C,
        query: &str,
        format: &Format,
    ) -> PgWireResult<Vec<Response>> {
        let principal = self.resolve_principal(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();

        let result = self.execute_command(&principal, cmd, format).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        principal: &Principal,
        cmd: Command,
        format: &Format,
    ) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertBooking {
                room_id,
                start,
                end,
                purpose,
                is_semester,
            } => {
                let req = BookingRequest {
                    room_id,
                    start,
                    end,
                    purpose,
                    is_semester,
                };
                let booking = engine.create_booking(principal, req).await.map_err(engine_err)?;
                Ok(vec![booking_response(&engine.directory, &[booking], format)])
            }
            Command::InsertSemesterBooking {
                room_id,
                start,
                end,
                purpose,
            } => {
                let req = SemesterRequest {
                    room_id,
                    start,
                    end,
                    purpose,
                };
                let summary = engine
                    .create_semester_booking(principal, req)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![summary_response(
                    summary.status(),
                    &summary.message(),
                    Some(i64::from(summary.weeks)),
                    format,
                )])
            }
            Command::CancelBooking { id } => {
                let message = match engine.cancel_booking(principal, id).await.map_err(engine_err)? {
                    CancelOutcome::Cancelled => "Booking cancelled",
                    CancelOutcome::AlreadyCancelled => "Booking already cancelled",
                };
                Ok(vec![summary_response("Success", message, None, format)])
            }
            Command::RescheduleBooking {
                id,
                start,
                end,
                room_id,
            } => {
                let change = RescheduleRequest { start, end, room_id };
                let booking = engine
                    .reschedule_booking(principal, id, change)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![booking_response(&engine.directory, &[booking], format)])
            }
            Command::SelectBooking { id } => {
                let booking = engine.get_booking(id).await.map_err(engine_err)?;
                Ok(vec![booking_response(&engine.directory, &[booking], format)])
            }
            Command::SelectBookings { filter } => {
                let rows = engine.list_bookings(&filter).await;
                Ok(vec![booking_response(&engine.directory, &rows, format)])
            }
            Command::SelectHistory { booking_id } => {
                let rows = engine.booking_history(booking_id).await.map_err(engine_err)?;
                Ok(vec![history_response(&rows, format)])
            }
            Command::SelectRooms { filter } => {
                let rows = engine.rooms(&filter);
                Ok(vec![room_response(&rows, format)])
            }
        }
    }
}

// ── Row schemas ──────────────────────────────────────────────────

/// Field list for `columns`, each column in the format the client asked for.
fn schema(columns: &[(&str, Type)], format: &Format) -> Vec<FieldInfo> {
    columns
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            FieldInfo::new((*name).into(), None, None, ty.clone(), format.format_for(i))
        })
        .collect()
}

fn booking_schema(format: &Format) -> Vec<FieldInfo> {
    schema(
        &[
            ("id", Type::VARCHAR),
            ("room_id", Type::INT8),
            ("room_name", Type::VARCHAR),
            ("created_by", Type::INT8),
            ("start_time", Type::VARCHAR),
            ("end_time", Type::VARCHAR),
            ("purpose", Type::VARCHAR),
            ("status", Type::VARCHAR),
            ("is_semester_booking", Type::BOOL),
            ("created_at", Type::VARCHAR),
            ("updated_at", Type::VARCHAR),
            ("cancelled_at", Type::VARCHAR),
        ],
        format,
    )
}

fn summary_schema(format: &Format) -> Vec<FieldInfo> {
    schema(
        &[
            ("status", Type::VARCHAR),
            ("message", Type::VARCHAR),
            ("weeks", Type::INT8),
        ],
        format,
    )
}

fn history_schema(format: &Format) -> Vec<FieldInfo> {
    schema(
        &[
            ("id", Type::VARCHAR),
            ("booking_id", Type::VARCHAR),
            ("previous_start_time", Type::VARCHAR),
            ("previous_end_time", Type::VARCHAR),
            ("previous_room_id", Type::INT8),
            ("modified_by", Type::INT8),
            ("change_type", Type::VARCHAR),
            ("recorded_at", Type::VARCHAR),
        ],
        format,
    )
}

fn room_schema(format: &Format) -> Vec<FieldInfo> {
    schema(
        &[
            ("id", Type::INT8),
            ("name", Type::VARCHAR),
            ("building", Type::VARCHAR),
            ("floor", Type::INT4),
            ("capacity", Type::INT8),
            ("has_ac", Type::BOOL),
            ("has_projector", Type::BOOL),
        ],
        format,
    )
}

/// Result schema for a statement, decided from its text (extended protocol
/// describes statements before any parameters are bound).
fn schema_for_sql(sql: &str, format: &Format) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    let head = upper.trim_start();
    if upper.contains("SEMESTER_BOOKINGS") {
        summary_schema(format)
    } else if upper.contains("BOOKING_HISTORY") {
        history_schema(format)
    } else if head.starts_with("SELECT") && upper.contains("FROM ROOMS") {
        room_schema(format)
    } else if head.starts_with("DELETE") || (head.starts_with("UPDATE") && upper.contains("STATUS")) {
        summary_schema(format)
    } else if upper.contains("BOOKINGS") {
        booking_schema(format)
    } else {
        vec![]
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn query_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn booking_response(directory: &Directory, bookings: &[Booking], format: &Format) -> Response {
    let schema = Arc::new(booking_schema(format));
    let rows = bookings
        .iter()
        .map(|b| -> PgWireResult<DataRow> {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.room_id)?;
            encoder.encode_field(&directory.room_name(b.room_id))?;
            encoder.encode_field(&b.created_by)?;
            encoder.encode_field(&format_timestamp(b.span.start))?;
            encoder.encode_field(&format_timestamp(b.span.end))?;
            encoder.encode_field(&b.purpose)?;
            encoder.encode_field(&b.status.as_str())?;
            encoder.encode_field(&b.is_semester_booking)?;
            encoder.encode_field(&format_timestamp(b.created_at))?;
            encoder.encode_field(&format_timestamp(b.updated_at))?;
            encoder.encode_field(&b.cancelled_at.map(format_timestamp))?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(schema, rows)
}

fn summary_response(status: &str, message: &str, weeks: Option<i64>, format: &Format) -> Response {
    let schema = Arc::new(summary_schema(format));
    let row = summary_row(schema.clone(), status, message, weeks);
    query_response(schema, vec![row])
}

fn summary_row(
    schema: Arc<Vec<FieldInfo>>,
    status: &str,
    message: &str,
    weeks: Option<i64>,
) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema);
    encoder.encode_field(&status)?;
    encoder.encode_field(&message)?;
    encoder.encode_field(&weeks)?;
    Ok(encoder.take_row())
}

fn history_response(entries: &[BookingHistory], format: &Format) -> Response {
    let schema = Arc::new(history_schema(format));
    let rows = entries
        .iter()
        .map(|h| -> PgWireResult<DataRow> {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&h.id.to_string())?;
            encoder.encode_field(&h.booking_id.to_string())?;
            encoder.encode_field(&format_timestamp(h.previous_span.start))?;
            encoder.encode_field(&format_timestamp(h.previous_span.end))?;
            encoder.encode_field(&h.previous_room_id)?;
            encoder.encode_field(&h.modified_by)?;
            encoder.encode_field(&h.change_type.as_str())?;
            encoder.encode_field(&format_timestamp(h.recorded_at))?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(schema, rows)
}

fn room_response(rooms: &[Room], format: &Format) -> Response {
    let schema = Arc::new(room_schema(format));
    let rows = rooms
        .iter()
        .map(|r| -> PgWireResult<DataRow> {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id)?;
            encoder.encode_field(&r.name)?;
            encoder.encode_field(&r.building)?;
            encoder.encode_field(&r.floor)?;
            encoder.encode_field(&i64::from(r.capacity))?;
            encoder.encode_field(&r.has_ac)?;
            encoder.encode_field(&r.has_projector)?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(schema, rows)
}

#[async_trait]
impl SimpleQueryHandler for RoomBookHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(client, query, &Format::UnifiedText).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoomBookQueryParser;

#[async_trait]
impl QueryParser for RoomBookQueryParser {
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
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for_sql(
            stmt,
            column_format.unwrap_or(&Format::UnifiedText),
        ))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoomBookHandler {
    type Statement = String;
    type QueryParser = RoomBookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        let responses = self
            .run(client, &sql, &portal.result_column_format)
            .await?;
        responses.into_iter().next().ok_or_else(|| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "XX000".into(),
                "statement produced no response".into(),
            )))
        })
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
            schema_for_sql(&target.statement, &Format::UnifiedText),
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
        Ok(DescribePortalResponse::new(schema_for_sql(
            &target.statement.statement,
            &target.result_column_format,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Inline bound parameter values into the statement in one left-to-right
/// pass. Emitted values are never rescanned, and `$N` inside a quoted literal
/// of the statement is copied as-is.
fn substitute_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    let mut in_literal = false;
    while let Some((i, c)) = chars.next() {
        if in_literal {
            out.push(c);
            in_literal = c != '\'';
            continue;
        }
        match c {
            '\'' => {
                in_literal = true;
                out.push(c);
            }
            '$' => {
                let mut end = i + 1;
                while let Some(&(j, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    end = j + 1;
                    chars.next();
                }
                let bound = sql[i + 1..end]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|idx| params.get(idx));
                match bound {
                    Some(Some(bytes)) => {
                        let text = String::from_utf8_lossy(bytes.as_ref());
                        out.push('\'');
                        out.push_str(&text.replace('\'', "''"));
                        out.push('\'');
                    }
                    Some(None) => out.push_str("NULL"),
                    None => out.push_str(&sql[i..end]),
                }
            }
            _ => out.push(c),
        }
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoomBookFactory {
    handler: Arc<RoomBookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<DirectoryAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl RoomBookFactory {
    pub fn new(engine: Arc<Engine>) -> Self {
        let auth_source = DirectoryAuthSource::new(engine.directory.clone());
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RoomBookHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoomBookFactory {
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
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = RoomBookFactory::new(engine);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// `REASON: message`, so clients can branch on the prefix.
fn engine_message(e: &EngineError) -> String {
    format!("{}: {e}", e.reason())
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.sqlstate().into(),
        engine_message(&e),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgwire::api::results::FieldFormat;
    use ulid::Ulid;

    #[test]
    fn count_params_takes_highest_index() {
        assert_eq!(count_params("SELECT * FROM bookings"), 0);
        assert_eq!(count_params("UPDATE bookings SET room_id = $2 WHERE id = $1"), 2);
        assert_eq!(count_params("SELECT $10, $3"), 10);
    }

    #[test]
    fn schema_follows_statement_kind() {
        let text = Format::UnifiedText;
        let len = |sql: &str| schema_for_sql(sql, &text).len();
        assert_eq!(len("SELECT * FROM rooms"), 7);
        assert_eq!(len("select * from booking_history where booking_id = $1"), 8);
        assert_eq!(len("INSERT INTO semester_bookings VALUES ($1, $2, $3, $4)"), 3);
        assert_eq!(len("DELETE FROM bookings WHERE id = $1"), 3);
        assert_eq!(len("UPDATE bookings SET status = 'CANCELLED' WHERE id = $1"), 3);
        assert_eq!(len("UPDATE bookings SET room_id = 2 WHERE id = $1"), 12);
        assert_eq!(len("SELECT * FROM bookings WHERE room_id = 1"), 12);
        assert_eq!(len("SHOW server_version"), 0);
    }

    #[test]
    fn schema_uses_requested_result_format() {
        let fields = schema_for_sql("SELECT * FROM rooms", &Format::UnifiedBinary);
        assert!(fields.iter().all(|f| matches!(f.format(), FieldFormat::Binary)));
    }

    fn bound(values: &[Option<&str>]) -> Vec<Option<Vec<u8>>> {
        values.iter().map(|v| v.map(|s| s.as_bytes().to_vec())).collect()
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let sql = "INSERT INTO bookings (room_id, purpose) VALUES ($1, $2)";
        let out = substitute_params(sql, &bound(&[Some("1"), Some("Fee is $1 per head")]));
        assert_eq!(out, "INSERT INTO bookings (room_id, purpose) VALUES ('1', 'Fee is $1 per head')");
    }

    #[test]
    fn substitution_quotes_and_keeps_literals() {
        let out = substitute_params(
            "SELECT '$1', $1, $2, $10 FROM x",
            &bound(&[Some("it's'); DROP"), None]),
        );
        assert_eq!(out, "SELECT '$1', 'it''s''); DROP', NULL, $10 FROM x");

        let many: Vec<Option<&str>> = (1..=10).map(|_| Some("v")).collect();
        let mut many = bound(&many);
        many[9] = Some(b"ten".to_vec());
        assert_eq!(substitute_params("$1 $10 $", &many), "'v' 'ten' $");
    }

    #[test]
    fn engine_messages_carry_reason_prefix() {
        assert_eq!(
            engine_message(&EngineError::BookingInPast),
            "BOOKING_IN_PAST: Cannot book in the past"
        );
        let missing = EngineError::BookingNotFound(Ulid::nil());
        assert!(engine_message(&missing).starts_with("BOOKING_NOT_FOUND: "));
        assert_eq!(missing.sqlstate(), "P0002");
        assert!(matches!(engine_err(missing), PgWireError::UserError(_)));
    }
}
