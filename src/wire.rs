use std::fmt::Debug;
use std::io;
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
use pgwire::api::{
    ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type, METADATA_USER,
};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::RoomRateAuthSource;
use crate::engine::Engine;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command};

pub struct RoomRateHandler {
    engine: Arc<Engine>,
    admin_user: String,
    query_parser: Arc<RoomRateQueryParser>,
}

impl RoomRateHandler {
    pub fn new(engine: Arc<Engine>, admin_user: String) -> Self {
        Self {
            engine,
            admin_user,
            query_parser: Arc::new(RoomRateQueryParser),
        }
    }

    /// The login name is the guest identity for every booking on this connection.
    fn session_user<C: ClientInfo>(&self, client: &C) -> PgWireResult<String> {
        client.metadata().get(METADATA_USER).cloned().ok_or_else(|| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                "connection has no user".into(),
            )))
        })
    }

    fn require_admin(&self, user: &str, action: &str) -> PgWireResult<()> {
        if user == self.admin_user {
            return Ok(());
        }
        Err(PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42501".into(),
            format!("permission denied: only {} may {action}", self.admin_user),
        ))))
    }

    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Vec<Response>> {
        let user = self.session_user(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(&user, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, user: &str, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertRooms { rooms } => {
                let count = engine.create_rooms(rooms).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(count))])
            }
            Command::SetupRooms => {
                let count = engine.seed_default_rooms().await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("CALL").with_rows(count))])
            }
            Command::InsertBooking {
                id,
                room_id,
                check_in,
                check_out,
            } => {
                engine
                    .book_room(id, user, &room_id, check_in, check_out)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteBooking { id } => {
                self.require_admin(user, "cancel bookings")?;
                engine.cancel_booking(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectRooms => {
                let rooms = engine.list_rooms().await;
                let schema = Arc::new(rooms_schema());
                let rows: Vec<PgWireResult<_>> = rooms
                    .into_iter()
                    .map(|room| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&room.id)?;
                        encoder.encode_field(&room.base_price)?;
                        encoder.encode_field(&(room.bookings as i64))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBookings { id } => {
                let owner = (user != self.admin_user).then_some(user);
                let bookings: Vec<_> = match id {
                    Some(id) => engine
                        .get_booking(&id)
                        .filter(|b| owner.is_none_or(|u| b.user_id == u))
                        .into_iter()
                        .collect(),
                    None => engine.list_bookings(owner),
                };
                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<_>> = bookings
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.user_id)?;
                        encoder.encode_field(&b.room_id)?;
                        encoder.encode_field(&b.stay.start)?;
                        encoder.encode_field(&b.stay.end)?;
                        encoder.encode_field(&b.price)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectDemand { lo, hi } => {
                let demand = engine.demand();
                let lo = lo.unwrap_or(0);
                let hi = hi.unwrap_or(demand.capacity() as i64 - 1);
                let total = demand.demand_in_range(lo, hi);

                let schema = Arc::new(demand_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&lo)?;
                encoder.encode_field(&hi)?;
                encoder.encode_field(&total)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectQuote { room_id } => {
                let quote = engine.quote_room(&room_id).await.map_err(engine_err)?;

                let schema = Arc::new(quotes_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&room_id)?;
                encoder.encode_field(&quote.base_price)?;
                encoder.encode_field(&quote.demand)?;
                encoder.encode_field(&quote.multiplier)?;
                encoder.encode_field(&quote.price)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
        }
    }
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn rooms_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("base_price", Type::FLOAT8),
        field("bookings", Type::INT8),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("user_id", Type::VARCHAR),
        field("room_id", Type::VARCHAR),
        field("check_in", Type::INT8),
        field("check_out", Type::INT8),
        field("price", Type::FLOAT8),
    ]
}

fn demand_schema() -> Vec<FieldInfo> {
    vec![
        field("lo", Type::INT8),
        field("hi", Type::INT8),
        field("demand", Type::INT8),
    ]
}

fn quotes_schema() -> Vec<FieldInfo> {
    vec![
        field("room_id", Type::VARCHAR),
        field("base_price", Type::FLOAT8),
        field("demand", Type::INT8),
        field("multiplier", Type::FLOAT8),
        field("price", Type::FLOAT8),
    ]
}

/// Row description for a statement before its parameters are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.trim_start().starts_with("SELECT") {
        return vec![];
    }
    let table = upper
        .split_once(" FROM ")
        .and_then(|(_, rest)| {
            rest.trim_start()
                .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .next()
        })
        .unwrap_or_default();
    match table {
        "ROOMS" => rooms_schema(),
        "BOOKINGS" => bookings_schema(),
        "DEMAND" => demand_schema(),
        "QUOTES" => quotes_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for RoomRateHandler {
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
        self.run(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoomRateQueryParser;

#[async_trait]
impl QueryParser for RoomRateQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoomRateHandler {
    type Statement = String;
    type QueryParser = RoomRateQueryParser;

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
        let sql = substitute_params(portal);
        let mut responses = self.run(client, &sql).await?;
        Ok(responses.remove(0))
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

enum Piece<'a> {
    Text(&'a str),
    /// `$N` with its index and the text as written.
    Param(usize, &'a str),
}

/// Split SQL into literal text and `$N` placeholders. A `$` inside a
/// single-quoted literal is text.
fn split_placeholders(sql: &str) -> Vec<Piece<'_>> {
    let bytes = sql.as_bytes();
    let mut pieces = Vec::new();
    let mut in_quote = false;
    let mut text_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                in_quote = !in_quote;
                i += 1;
            }
            b'$' if !in_quote => {
                let mut j = i + 1;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if let Ok(n) = sql[i + 1..j].parse::<usize>()
                    && n > 0
                {
                    pieces.push(Piece::Text(&sql[text_start..i]));
                    pieces.push(Piece::Param(n, &sql[i..j]));
                    text_start = j;
                }
                i = j;
            }
            _ => i += 1,
        }
    }
    pieces.push(Piece::Text(&sql[text_start..]));
    pieces
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    split_placeholders(sql)
        .iter()
        .filter_map(|p| match p {
            Piece::Param(n, _) => Some(*n),
            Piece::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<&[u8]>> = portal.parameters.iter().map(|p| p.as_deref()).collect();
    bind_params(&portal.statement.statement, &params)
}

/// Bound values are emitted in one pass and never rescanned. A placeholder
/// with no bound value is left as written.
fn bind_params(sql: &str, params: &[Option<&[u8]>]) -> String {
    let mut result = String::with_capacity(sql.len());
    for piece in split_placeholders(sql) {
        match piece {
            Piece::Text(text) => result.push_str(text),
            Piece::Param(n, raw) => match params.get(n - 1) {
                Some(Some(bytes)) => {
                    let text = String::from_utf8_lossy(bytes);
                    result.push('\'');
                    result.push_str(&text.replace('\'', "''"));
                    result.push('\'');
                }
                Some(None) => result.push_str("NULL"),
                None => result.push_str(raw),
            },
        }
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoomRateFactory {
    handler: Arc<RoomRateHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<RoomRateAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl RoomRateFactory {
    pub fn new(engine: Arc<Engine>, password: String, admin_user: String) -> Self {
        let auth_source = RoomRateAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RoomRateHandler::new(engine, admin_user)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoomRateFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    factory: Arc<RoomRateFactory>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
