use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{
    AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler,
};
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
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};

pub struct WaitroomHandler {
    engine: Arc<Engine>,
    query_parser: Arc<WaitroomQueryParser>,
}

impl WaitroomHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(WaitroomQueryParser),
        }
    }

    /// Execute one parsed statement and record its metrics.
    async fn run(&self, cmd: Command) -> PgWireResult<Response> {
        let label = observability::command_label(&cmd);
        let start = Instant::now();

        let result = self.execute_command(cmd).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::SelectRooms { id } => {
                let rooms = match id {
                    Some(id) => vec![engine.get(id).await.map_err(engine_err)?],
                    None => engine.list().await.map_err(engine_err)?,
                };
                let schema = Arc::new(rooms_schema());
                let now = now_ms();
                let rows = rooms
                    .iter()
                    .map(|room| encode_room(&schema, room, now))
                    .collect::<Vec<_>>();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectWaitlist { room_id, name } => {
                let positions = engine
                    .wait_positions(room_id, name.as_deref())
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(waitlist_schema());
                let rows = positions
                    .iter()
                    .map(|row| encode_wait_position(&schema, row))
                    .collect::<Vec<_>>();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::Enter { room_id, name } => {
                engine.enter(room_id, &name).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::Leave { room_id } => {
                engine.leave(room_id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::JoinWaitlist { room_id, name } => {
                engine.join_waitlist(room_id, &name).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::LeaveWaitlist { name } => {
                let changed = engine.leave_waitlist(&name).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(changed.len())))
            }
        }
    }
}

fn encode_room(
    schema: &Arc<Vec<FieldInfo>>,
    room: &Room,
    now: Ms,
) -> PgWireResult<pgwire::messages::data::DataRow> {
    let blob = room.wait_list.to_blob().map_err(|e| {
        user_error("58030", format!("room {}: cannot encode wait list: {e}", room.id))
    })?;
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&(room.id as i32))?;
    encoder.encode_field(&room.name)?;
    encoder.encode_field(&room.occupant().map(str::to_string))?;
    encoder.encode_field(&room.entered_at())?;
    encoder.encode_field(&blob)?;
    encoder.encode_field(&(room.wait_list.len() as i64))?;
    encoder.encode_field(&room.wait_list.longest_wait(now))?;
    Ok(encoder.take_row())
}

fn encode_wait_position(
    schema: &Arc<Vec<FieldInfo>>,
    row: &WaitPosition,
) -> PgWireResult<pgwire::messages::data::DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&(row.room_id as i32))?;
    encoder.encode_field(&(row.position as i64))?;
    encoder.encode_field(&row.name)?;
    encoder.encode_field(&row.time)?;
    encoder.encode_field(&row.waited_ms)?;
    Ok(encoder.take_row())
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn rooms_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::INT4),
        field("name", Type::VARCHAR),
        field("occupant", Type::VARCHAR),
        field("entered_at", Type::INT8),
        field("wait_list", Type::VARCHAR),
        field("waiting", Type::INT8),
        field("longest_wait_ms", Type::INT8),
    ]
}

fn waitlist_schema() -> Vec<FieldInfo> {
    vec![
        field("room_id", Type::INT4),
        field("position", Type::INT8),
        field("name", Type::VARCHAR),
        field("time", Type::INT8),
        field("waited_ms", Type::INT8),
    ]
}

/// Row shape a statement will produce, judged from its text before binding.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.trim_start().starts_with("SELECT") {
        vec![]
    } else if upper.contains("WAITLIST") {
        waitlist_schema()
    } else if upper.contains("ROOMS") {
        rooms_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for WaitroomHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let commands = sql::parse_batch(query).map_err(sql_err)?;
        let mut responses = Vec::with_capacity(commands.len());
        for cmd in commands {
            responses.push(self.run(cmd).await?);
        }
        Ok(responses)
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct WaitroomQueryParser;

#[async_trait]
impl QueryParser for WaitroomQueryParser {
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
impl ExtendedQueryHandler for WaitroomHandler {
    type Statement = String;
    type QueryParser = WaitroomQueryParser;

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
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
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

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Replace `$1`, `$2`, ... with bound text-format values as quoted literals.
///
/// One left-to-right pass over the statement text: a `$N` token is read with
/// all its digits, so `$1` never matches the prefix of `$10`, and inserted
/// values are never scanned again. Tokens with no bound value stay as is.
fn substitute_params(sql: &str, params: &[Option<bytes::Bytes>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(dollar) = rest.find('$') {
        result.push_str(&rest[..dollar]);
        let after = &rest[dollar + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let bound = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match bound {
            Some(param) => result.push_str(&param_literal(param.as_deref())),
            None => result.push_str(&rest[dollar..dollar + 1 + digits]),
        }
        rest = &after[digits..];
    }
    result.push_str(rest);
    result
}

fn param_literal(param: Option<&[u8]>) -> String {
    match param {
        Some(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            format!("'{}'", text.replace('\'', "''"))
        }
        None => "NULL".to_string(),
    }
}

// ── Auth ─────────────────────────────────────────────────────────

/// Every client shares one password. Occupant and waiter names travel in the
/// SQL, so the login user is only logged.
#[derive(Debug)]
pub struct SharedPassword(String);

#[async_trait]
impl AuthSource for SharedPassword {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!(user = login.user().unwrap_or("-"), "client login");
        Ok(Password::new(None, self.0.as_bytes().to_vec()))
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct WaitroomFactory {
    handler: Arc<WaitroomHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<SharedPassword, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl WaitroomFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = SharedPassword(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(WaitroomHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for WaitroomFactory {
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

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = WaitroomFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::RoomNotFound(_) => "P0002",
        EngineError::RoomOccupied { .. } => "55P03",
        EngineError::AlreadyWaiting { .. } => "23505",
        EngineError::NotNextInLine { .. } => "55000",
        EngineError::InvalidName(_) => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Storage(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if let EngineError::Storage(inner) = &e {
        tracing::error!("storage failure: {inner}");
    }
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
