//! PostgreSQL driver built on `tokio-postgres`.
//!
//! Parameters arrive as JSON values and are encoded according to the types
//! the server declares for the prepared statement. Result cells are decoded
//! back into JSON.

use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Number, Value};
use tokio::task::JoinHandle;
use tokio_postgres::types::{FromSql, IsNull, ToSql, Type, to_sql_checked};
use tokio_postgres::{Client, NoTls};

use crate::config::ConnectionConfig;
use crate::driver::{Driver, DriverConnection};
use crate::error::DriverError;
use crate::result::{Column, QueryResult, Row, command_tag};

/// Statement used as the liveness probe.
pub const HEALTH_CHECK_SQL: &str = "SELECT 1";

/// Driver that opens plain TCP sessions to PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgDriver;

impl PgDriver {
    /// Create the driver.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Driver for PgDriver {
    type Connection = PgConnection;

    async fn connect(&self, config: &ConnectionConfig) -> Result<PgConnection, DriverError> {
        let (client, connection) = config.to_pg_config().connect(NoTls).await?;

        let task = tokio::spawn(async move {
            let result = connection.await;
            if let Err(e) = &result {
                tracing::debug!(error = %e, "connection task ended with error");
            }
            result
        });

        let row = client.query_one("SELECT pg_backend_pid()", &[]).await?;
        let process_id: i32 = row.try_get(0)?;

        tracing::debug!(
            host = %config.host,
            port = config.port,
            process_id,
            "connected to PostgreSQL"
        );

        Ok(PgConnection {
            client,
            task,
            process_id,
        })
    }
}

/// An open PostgreSQL session.
pub struct PgConnection {
    client: Client,
    task: JoinHandle<Result<(), tokio_postgres::Error>>,
    process_id: i32,
}

impl PgConnection {
    /// Whether the underlying connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

impl fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConnection")
            .field("process_id", &self.process_id)
            .field("closed", &self.client.is_closed())
            .finish()
    }
}

#[async_trait]
impl DriverConnection for PgConnection {
    fn process_id(&self) -> i32 {
        self.process_id
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult, DriverError> {
        let statement = self.client.prepare(sql).await?;

        let bound: Vec<JsonParam<'_>> = params.iter().map(JsonParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        if statement.columns().is_empty() {
            let affected = self.client.execute(&statement, &refs).await?;
            return Ok(QueryResult::affected(command_tag(sql), affected));
        }

        let fields = statement
            .columns()
            .iter()
            .map(|c| Column::new(c.name(), c.type_().name(), c.type_().oid()))
            .collect();
        let rows = self
            .client
            .query(&statement, &refs)
            .await?
            .iter()
            .map(row_to_json)
            .collect();

        Ok(QueryResult::with_rows(command_tag(sql), fields, rows))
    }

    async fn ping(&mut self) -> Result<(), DriverError> {
        if self.client.is_closed() {
            return Err(DriverError::new("connection is closed"));
        }
        self.client.simple_query(HEALTH_CHECK_SQL).await?;
        Ok(())
    }

    async fn close(self) -> Result<(), DriverError> {
        let Self { client, task, .. } = self;
        // The connection future completes once every client handle is gone.
        drop(client);
        match task.await {
            Ok(result) => result.map_err(DriverError::from),
            Err(e) => Err(DriverError::new(format!("connection task failed: {e}"))),
        }
    }
}

// =============================================================================
// Parameter encoding
// =============================================================================

type BoxError = Box<dyn StdError + Sync + Send>;

/// A JSON value bound to a statement parameter.
#[derive(Debug)]
struct JsonParam<'a>(&'a Value);

impl ToSql for JsonParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        let value = self.0;
        if value.is_null() {
            return Ok(IsNull::Yes);
        }

        match *ty {
            Type::JSON | Type::JSONB => value.to_sql(ty, out),
            Type::BOOL => bool_of(value)?.to_sql(ty, out),
            Type::INT2 => i16::try_from(int_of(value)?)?.to_sql(ty, out),
            Type::INT4 => i32::try_from(int_of(value)?)?.to_sql(ty, out),
            Type::INT8 => int_of(value)?.to_sql(ty, out),
            Type::OID => u32::try_from(int_of(value)?)?.to_sql(ty, out),
            Type::FLOAT4 => (float_of(value)? as f32).to_sql(ty, out),
            Type::FLOAT8 => float_of(value)?.to_sql(ty, out),
            Type::NUMERIC => decimal_of(value)?.to_sql(ty, out),
            Type::UUID => uuid::Uuid::parse_str(str_of(value, ty)?)?.to_sql(ty, out),
            Type::TIMESTAMPTZ => DateTime::parse_from_rfc3339(str_of(value, ty)?)?.to_sql(ty, out),
            Type::TIMESTAMP => timestamp_of(str_of(value, ty)?)?.to_sql(ty, out),
            Type::DATE => NaiveDate::parse_from_str(str_of(value, ty)?, "%Y-%m-%d")?.to_sql(ty, out),
            Type::TIME => NaiveTime::from_str(str_of(value, ty)?)?.to_sql(ty, out),
            _ if <String as ToSql>::accepts(ty) => match value {
                Value::String(s) => s.as_str().to_sql(ty, out),
                other => other.to_string().to_sql(ty, out),
            },
            _ => Err(format!(
                "cannot bind a JSON {} to a parameter of type {ty}",
                json_kind(value)
            )
            .into()),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn str_of<'a>(value: &'a Value, ty: &Type) -> Result<&'a str, BoxError> {
    value.as_str().ok_or_else(|| {
        format!(
            "parameter of type {ty} expects a string, got a JSON {}",
            json_kind(value)
        )
        .into()
    })
}

fn bool_of(value: &Value) -> Result<bool, BoxError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => Ok(s.parse()?),
        other => Err(format!("expected a boolean, got a JSON {}", json_kind(other)).into()),
    }
}

fn int_of(value: &Value) -> Result<i64, BoxError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| format!("{n} is not an integer").into()),
        Value::String(s) => Ok(s.trim().parse()?),
        other => Err(format!("expected an integer, got a JSON {}", json_kind(other)).into()),
    }
}

fn float_of(value: &Value) -> Result<f64, BoxError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("{n} is not representable as a float").into()),
        Value::String(s) => Ok(s.trim().parse()?),
        other => Err(format!("expected a number, got a JSON {}", json_kind(other)).into()),
    }
}

fn decimal_of(value: &Value) -> Result<Decimal, BoxError> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        other => {
            return Err(format!("expected a number, got a JSON {}", json_kind(other)).into());
        }
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(Into::into)
}

fn timestamp_of(text: &str) -> Result<NaiveDateTime, BoxError> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(Into::into)
}

// =============================================================================
// Row decoding
// =============================================================================

fn row_to_json(row: &tokio_postgres::Row) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| (column.name().to_string(), cell_to_json(row, idx, column.type_())))
        .collect()
}

fn cell_to_json(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Value {
    match *ty {
        Type::BOOL => cell(row, idx, Value::Bool),
        Type::INT2 => cell(row, idx, |v: i16| Value::from(v)),
        Type::INT4 => cell(row, idx, |v: i32| Value::from(v)),
        Type::INT8 => cell(row, idx, |v: i64| Value::from(v)),
        Type::OID => cell(row, idx, |v: u32| Value::from(v)),
        Type::FLOAT4 => cell(row, idx, |v: f32| float_to_json(f64::from(v))),
        Type::FLOAT8 => cell(row, idx, float_to_json),
        // Rendered as text so no precision is lost.
        Type::NUMERIC => cell(row, idx, |v: Decimal| Value::String(v.to_string())),
        Type::JSON | Type::JSONB => cell(row, idx, |v: Value| v),
        Type::UUID => cell(row, idx, |v: uuid::Uuid| Value::String(v.to_string())),
        Type::BYTEA => cell(row, idx, |v: Vec<u8>| Value::String(hex_bytea(&v))),
        Type::TIMESTAMP => cell(row, idx, |v: NaiveDateTime| {
            Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }),
        Type::TIMESTAMPTZ => cell(row, idx, |v: DateTime<Utc>| Value::String(v.to_rfc3339())),
        Type::DATE => cell(row, idx, |v: NaiveDate| Value::String(v.to_string())),
        Type::TIME => cell(row, idx, |v: NaiveTime| Value::String(v.to_string())),
        Type::BOOL_ARRAY => cell(row, idx, |v: Vec<Option<bool>>| array(v)),
        Type::INT2_ARRAY => cell(row, idx, |v: Vec<Option<i16>>| array(v)),
        Type::INT4_ARRAY => cell(row, idx, |v: Vec<Option<i32>>| array(v)),
        Type::INT8_ARRAY => cell(row, idx, |v: Vec<Option<i64>>| array(v)),
        Type::FLOAT8_ARRAY => cell(row, idx, |v: Vec<Option<f64>>| array(v)),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => {
            cell(row, idx, |v: Vec<Option<String>>| array(v))
        }
        Type::JSONB_ARRAY | Type::JSON_ARRAY => cell(row, idx, |v: Vec<Option<Value>>| array(v)),
        _ => text_cell(row, idx),
    }
}

fn cell<'a, T, F>(row: &'a tokio_postgres::Row, idx: usize, convert: F) -> Value
where
    T: FromSql<'a>,
    F: FnOnce(T) -> Value,
{
    match row.try_get::<_, Option<T>>(idx) {
        Ok(Some(v)) => convert(v),
        Ok(None) => Value::Null,
        Err(_) => text_cell(row, idx),
    }
}

fn text_cell(row: &tokio_postgres::Row, idx: usize) -> Value {
    match row.try_get::<_, Option<String>>(idx) {
        Ok(Some(v)) => Value::String(v),
        Ok(None) => Value::Null,
        Err(_) => {
            let type_name = row.columns().get(idx).map_or("unknown", |c| c.type_().name());
            tracing::trace!(column = idx, type_name, "no JSON mapping for column type");
            Value::String(format!("<unable to display: {type_name}>"))
        }
    }
}

fn array<T: Into<Value>>(items: Vec<Option<T>>) -> Value {
    Value::Array(
        items
            .into_iter()
            .map(|item| item.map_or(Value::Null, Into::into))
            .collect(),
    )
}

fn float_to_json(v: f64) -> Value {
    // JSON has no NaN or infinity; keep PostgreSQL's spelling of them.
    Number::from_f64(v).map_or_else(|| Value::String(v.to_string()), Value::Number)
}

fn hex_bytea(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}
