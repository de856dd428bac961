//! PostgreSQL sandbox backend on a bounded sqlx pool.
//!
//! Each use runs inside `BEGIN READ ONLY` with transaction-local settings, so
//! search path and limits end with the transaction. Learner SQL runs as an
//! unnamed statement. Release rolls back, deallocates any named statement and
//! issues `RESET ALL`; a session that cannot be reset is detached and closed.

use crate::config::types::{DatabaseConfig, ExecutionLimits, QueryboxError, Result};
use crate::core::types::{CellValue, RawExecutionResult, RawRow};
use crate::exec::backend::{BackendError, SandboxBackend, SandboxSession};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use log::{debug, warn};
use sqlx::error::BoxDynError;
use sqlx::pool::PoolConnection;
use sqlx::postgres::types::{Oid, PgInterval, PgMoney, PgTimeTz};
use sqlx::postgres::{
    PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgTypeInfo, PgTypeKind, PgValueRef,
};
use sqlx::types::chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::ipnetwork::IpNetwork;
use sqlx::types::{Decimal, JsonValue, Uuid};
use sqlx::{
    Column, Connection, Decode, Executor, Postgres, Row, Statement, Type, TypeInfo, ValueRef,
};
use std::str::FromStr;
use std::time::Instant;

impl DatabaseConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        let options = match &self.url {
            Some(url) => PgConnectOptions::from_str(url)
                .map_err(|e| QueryboxError::Config(format!("Invalid database url: {}", e)))?,
            None => {
                let mut options = PgConnectOptions::new()
                    .host(&self.host)
                    .port(self.port);
                if let Some(database) = &self.database {
                    options = options.database(database);
                }
                if let Some(user) = &self.user {
                    options = options.username(user);
                }
                if let Some(password) = &self.password {
                    options = options.password(password);
                }
                options
            }
        };

        // cached statements would outlive the per-session DEALLOCATE ALL
        Ok(options
            .application_name("querybox")
            .statement_cache_capacity(0))
    }
}

/// Bounded connection pool handing out [`PgSession`]s
#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    /// Build the pool without connecting; connections open on first use
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(0)
            .acquire_timeout(config.acquire_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .test_before_acquire(true)
            .connect_lazy_with(config.connect_options()?);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Round-trip check used at startup
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .persistent(false)
            .execute(&self.pool)
            .await
            .map_err(|e| QueryboxError::Database(e.to_string()))?;
        Ok(())
    }

    /// (total, idle) connections currently held by the pool
    pub fn pool_state(&self) -> (u32, usize) {
        (self.pool.size(), self.pool.num_idle())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SandboxBackend for PgBackend {
    async fn acquire(&self) -> std::result::Result<Box<dyn SandboxSession>, BackendError> {
        let started = Instant::now();
        match self.pool.acquire().await {
            Ok(conn) => Ok(Box::new(PgSession::new(conn))),
            Err(sqlx::Error::PoolTimedOut) => Err(BackendError::PoolExhausted {
                waited_ms: started.elapsed().as_millis() as u64,
            }),
            Err(e) => Err(classify_sqlx_error(e)),
        }
    }
}

/// A checked-out connection.
///
/// `dirty` is set before anything touches session state and cleared only by a
/// successful reset. A dirty session is detached from the pool on drop, which
/// also covers a cancelled submission future.
pub struct PgSession {
    conn: Option<PoolConnection<Postgres>>,
    dirty: bool,
}

impl PgSession {
    fn new(conn: PoolConnection<Postgres>) -> Self {
        Self {
            conn: Some(conn),
            dirty: false,
        }
    }

    fn conn(&mut self) -> std::result::Result<&mut PoolConnection<Postgres>, BackendError> {
        self.conn
            .as_mut()
            .ok_or_else(|| BackendError::Connection("session already released".to_string()))
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        if self.dirty {
            if let Some(conn) = self.conn.take() {
                warn!("Dropping sandbox session without reset; detaching its connection");
                drop(conn.detach());
            }
        }
    }
}

#[async_trait]
impl SandboxSession for PgSession {
    async fn enter(
        &mut self,
        search_path: &str,
        limits: &ExecutionLimits,
    ) -> std::result::Result<(), BackendError> {
        self.dirty = true;
        let conn = self.conn()?;

        conn.execute("BEGIN READ ONLY").await.map_err(classify_sqlx_error)?;

        sqlx::query(
            "SELECT set_config('search_path', $1, true), \
                    set_config('statement_timeout', $2, true), \
                    set_config('work_mem', $3, true)",
        )
        .bind(search_path)
        .bind(limits.statement_timeout_setting())
        .bind(limits.work_mem_setting())
        .persistent(false)
        .execute(&mut **conn)
        .await
        .map_err(classify_sqlx_error)?;

        Ok(())
    }

    async fn execute(
        &mut self,
        sql: &str,
        row_limit: usize,
    ) -> std::result::Result<RawExecutionResult, BackendError> {
        let conn = self.conn()?;
        let started = Instant::now();

        let mut column_names: Option<Vec<String>> = None;
        let mut rows: Vec<RawRow> = Vec::with_capacity(row_limit.min(1024));
        let mut total = 0usize;
        {
            // read to the end so the connection is idle when reset runs
            let mut stream = sqlx::query(sql).persistent(false).fetch(&mut **conn);
            while let Some(row) = stream.try_next().await.map_err(classify_sqlx_error)? {
                let names = column_names.get_or_insert_with(|| {
                    row.columns().iter().map(|c| c.name().to_string()).collect()
                });
                total += 1;
                if rows.len() < row_limit {
                    rows.push(decode_row(&row, names));
                }
            }
        }
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let column_names = match column_names {
            Some(names) => names,
            None => describe_columns(conn, sql).await?,
        };

        Ok(RawExecutionResult {
            column_names,
            rows,
            row_count_before_truncation: total,
            elapsed_ms,
        })
    }

    async fn reset(&mut self) -> std::result::Result<(), BackendError> {
        let conn = self.conn()?;
        for statement in ["ROLLBACK", "DEALLOCATE ALL", "RESET ALL"] {
            (&mut **conn)
                .execute(statement)
                .await
                .map_err(classify_sqlx_error)?;
        }
        self.dirty = false;
        Ok(())
    }

    async fn discard(mut self: Box<Self>) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.detach().close().await {
                debug!("Closing discarded sandbox connection failed: {}", e);
            }
        }
    }
}

/// Column names of a statement that produced no rows.
///
/// sqlx prepares a named statement here; `reset` deallocates it.
async fn describe_columns(
    conn: &mut PoolConnection<Postgres>,
    sql: &str,
) -> std::result::Result<Vec<String>, BackendError> {
    let statement = (&mut **conn).prepare(sql).await.map_err(classify_sqlx_error)?;
    Ok(statement
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect())
}

pub(crate) fn classify_sqlx_error(err: sqlx::Error) -> BackendError {
    match err {
        sqlx::Error::Database(db) => BackendError::Engine {
            code: db.code().map(|c| c.into_owned()),
            message: db.message().to_string(),
        },
        sqlx::Error::PoolTimedOut => BackendError::PoolExhausted { waited_ms: 0 },
        other => BackendError::Connection(other.to_string()),
    }
}

fn decode_row(row: &PgRow, column_names: &[String]) -> RawRow {
    column_names
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let value = match row.try_get_raw(idx) {
                Ok(raw) => decode_cell(raw),
                Err(_) => CellValue::Null,
            };
            (name.clone(), value)
        })
        .collect()
}

fn decode<'r, T: Decode<'r, Postgres>>(raw: PgValueRef<'r>) -> Option<T> {
    T::decode(raw).ok()
}

/// Map one engine value onto a JSON-safe cell.
///
/// Exact numerics and temporal values stay text so no precision is lost.
/// Arrays become JSON text of their decoded elements.
fn decode_cell(raw: PgValueRef<'_>) -> CellValue {
    if raw.is_null() {
        return CellValue::Null;
    }
    let type_info = raw.type_info().into_owned();
    let type_name = type_info.name().to_string();
    let fallback = raw.clone();

    let cell = match type_name.as_str() {
        _ if matches!(type_info.kind(), PgTypeKind::Array(_)) || type_name.ends_with("[]") => {
            decode_array(raw)
        }
        "BOOL" => decode::<bool>(raw).map(CellValue::Bool),
        "INT2" => decode::<i16>(raw).map(|v| CellValue::from_i64(v.into())),
        "INT4" => decode::<i32>(raw).map(|v| CellValue::from_i64(v.into())),
        "INT8" => decode::<i64>(raw).map(CellValue::from_i64),
        "OID" => decode::<Oid>(raw).map(|v| CellValue::from_i64(v.0.into())),
        "FLOAT4" => decode::<f32>(raw).map(widen_float4),
        "FLOAT8" => decode::<f64>(raw).map(CellValue::from_f64),
        "NUMERIC" => decode_numeric(raw),
        "MONEY" => decode::<PgMoney>(raw).map(|v| CellValue::Text(format_money(v.0))),
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" | "CITEXT" | "UNKNOWN" => {
            decode::<String>(raw).map(CellValue::Text)
        }
        "DATE" => decode::<NaiveDate>(raw).map(|v| CellValue::Text(v.to_string())),
        "TIME" => decode::<NaiveTime>(raw).map(|v| CellValue::Text(v.to_string())),
        "TIMETZ" => decode::<PgTimeTz<NaiveTime, FixedOffset>>(raw)
            .map(|v| CellValue::Text(format!("{}{}", v.time, v.offset))),
        "TIMESTAMP" => decode::<NaiveDateTime>(raw)
            .map(|v| CellValue::Text(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        "TIMESTAMPTZ" => decode::<DateTime<Utc>>(raw).map(|v| CellValue::Text(v.to_rfc3339())),
        "INTERVAL" => decode::<PgInterval>(raw).map(|v| CellValue::Text(format_interval(&v))),
        "INET" | "CIDR" => decode::<IpNetwork>(raw)
            .map(|v| CellValue::Text(format_network(&v, type_name == "CIDR"))),
        "MACADDR" | "MACADDR8" => raw.as_bytes().ok().map(|bytes| {
            CellValue::Text(
                bytes
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect::<Vec<_>>()
                    .join(":"),
            )
        }),
        "BYTEA" => decode::<Vec<u8>>(raw).map(|bytes| {
            let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            CellValue::Text(format!("\\x{}", hex))
        }),
        "UUID" => decode::<Uuid>(raw).map(|v| CellValue::Text(v.to_string())),
        "JSON" | "JSONB" => decode::<JsonValue>(raw).map(|v| CellValue::Text(v.to_string())),
        _ => None,
    };

    cell.or_else(|| printable_text(fallback))
        .unwrap_or_else(|| CellValue::Text(format!("<{}>", type_name.to_lowercase())))
}

/// Array element decoded with the same rules as a top-level cell
struct ArrayElement(CellValue);

impl Type<Postgres> for ArrayElement {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("text")
    }
}

impl<'r> Decode<'r, Postgres> for ArrayElement {
    fn decode(value: PgValueRef<'r>) -> std::result::Result<Self, BoxDynError> {
        Ok(ArrayElement(decode_cell(value)))
    }
}

/// One-dimensional arrays only; others fall through to the generic path
/// Shortest `f32` rendering, so `1.1` stays `1.1` after widening
fn widen_float4(value: f32) -> CellValue {
    match value.to_string().parse::<f64>() {
        Ok(widened) => CellValue::from_f64(widened),
        Err(_) => CellValue::from_f64(value.into()),
    }
}

fn decode_array(raw: PgValueRef<'_>) -> Option<CellValue> {
    let elements = decode::<Vec<ArrayElement>>(raw)?;
    let cells: Vec<CellValue> = elements.into_iter().map(|e| e.0).collect();
    serde_json::to_string(&cells).ok().map(CellValue::Text)
}

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

fn decode_numeric(raw: PgValueRef<'_>) -> Option<CellValue> {
    if let Ok(value) = Decimal::decode(raw.clone()) {
        return Some(CellValue::Text(value.to_string()));
    }
    // wider than Decimal, NaN or infinite
    raw.as_bytes().ok().and_then(render_numeric).map(CellValue::Text)
}

/// Text form of a binary NUMERIC: base-10000 digits, weight, sign, display scale
fn render_numeric(bytes: &[u8]) -> Option<String> {
    let word = |at: usize| bytes.get(at..at + 2).map(|b| u16::from_be_bytes([b[0], b[1]]));
    let ndigits = word(0)? as usize;
    let weight = i32::from(word(2)? as i16);
    let sign = word(4)?;
    let dscale = word(6)? as usize;

    match sign {
        NUMERIC_NAN => return Some("NaN".to_string()),
        NUMERIC_PINF => return Some("Infinity".to_string()),
        NUMERIC_NINF => return Some("-Infinity".to_string()),
        NUMERIC_POS | NUMERIC_NEG => {}
        _ => return None,
    }

    let digits: Vec<u16> = (0..ndigits)
        .map(|i| word(8 + 2 * i))
        .collect::<Option<_>>()?;
    let digit = |i: i32| -> u16 {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit(0).to_string());
        for i in 1..=weight {
            out.push_str(&format!("{:04}", digit(i)));
        }
    }
    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit(i)));
            i += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Some(out)
}

/// Money in minor units, two fraction digits, no currency symbol
fn format_money(minor_units: i64) -> String {
    let sign = if minor_units < 0 { "-" } else { "" };
    let abs = minor_units.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Interval in the engine's default output style, e.g. `1 year 2 mons 3 days 04:05:06.5`
fn format_interval(interval: &PgInterval) -> String {
    fn unit(n: i32, singular: &str, plural: &str) -> String {
        format!("{} {}", n, if n == 1 { singular } else { plural })
    }

    let mut parts = Vec::new();
    let years = interval.months / 12;
    let months = interval.months % 12;
    if years != 0 {
        parts.push(unit(years, "year", "years"));
    }
    if months != 0 {
        parts.push(unit(months, "mon", "mons"));
    }
    if interval.days != 0 {
        parts.push(unit(interval.days, "day", "days"));
    }
    if interval.microseconds != 0 || parts.is_empty() {
        let sign = if interval.microseconds < 0 { "-" } else { "" };
        let micros = interval.microseconds.unsigned_abs();
        let secs = micros / 1_000_000;
        let mut clock = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        );
        let fraction = micros % 1_000_000;
        if fraction != 0 {
            clock.push('.');
            clock.push_str(format!("{:06}", fraction).trim_end_matches('0'));
        }
        parts.push(clock);
    }
    parts.join(" ")
}

/// `inet` hides a full-length prefix; `cidr` always shows it
fn format_network(network: &IpNetwork, always_prefix: bool) -> String {
    let full = match network {
        IpNetwork::V4(_) => 32,
        IpNetwork::V6(_) => 128,
    };
    if always_prefix || network.prefix() != full {
        format!("{}/{}", network.ip(), network.prefix())
    } else {
        network.ip().to_string()
    }
}

/// Binary payloads of enums and other text-like types are their label
fn printable_text(raw: PgValueRef<'_>) -> Option<CellValue> {
    let text = raw.as_str().ok()?;
    if text.chars().any(char::is_control) {
        return None;
    }
    Some(CellValue::Text(text.to_string()))
}
