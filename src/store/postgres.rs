//! PostgreSQL backend built on tokio-postgres

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, NoTls, Row, Statement};
use tracing::{debug, warn};
use uuid::Uuid;

use super::sql;
use crate::config::DatabaseConfig;
use crate::connection::{Connection, ConnectionFactory, PageRequest};
use crate::error::{ConnectionError, FetchError, Result};
use crate::query::{QuerySpec, TimeRange};
use crate::record::{FieldValue, Record};

const APPLICATION_NAME: &str = "tsfetch";

/// Opens plain (non-TLS) PostgreSQL connections.
#[derive(Clone)]
pub struct PgConnectionFactory {
    config: tokio_postgres::Config,
}

impl PgConnectionFactory {
    pub fn new(config: tokio_postgres::Config) -> Self {
        Self { config }
    }

    /// Parse a `postgres://` URL or a `key=value` connection string.
    pub fn from_url(url: &str) -> Result<Self> {
        let config = tokio_postgres::Config::from_str(url).map_err(|e| {
            FetchError::invalid_config(format!("Invalid PostgreSQL connection URL: {e}"))
        })?;
        Ok(Self::new(config))
    }

    /// Build from the `[database]` config section. A URL wins over the
    /// individual fields.
    pub fn from_database_config(db: &DatabaseConfig) -> Result<Self> {
        let mut config = match &db.url {
            Some(url) => Self::from_url(url)?.config,
            None => {
                let mut config = tokio_postgres::Config::new();
                config
                    .host(&db.host)
                    .port(db.port)
                    .dbname(&db.dbname)
                    .user(&db.user);
                if let Some(password) = &db.password {
                    config.password(password);
                }
                config
            }
        };
        if db.connect_timeout > 0 && config.get_connect_timeout().is_none() {
            config.connect_timeout(Duration::from_secs(db.connect_timeout));
        }
        if config.get_application_name().is_none() {
            config.application_name(APPLICATION_NAME);
        }
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &tokio_postgres::Config {
        &self.config
    }
}

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    type Connection = PgConnection;

    async fn connect(&self) -> Result<PgConnection> {
        let (client, connection) = self
            .config
            .connect(NoTls)
            .await
            .map_err(|e| ConnectionError::ConnectFailed(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "PostgreSQL connection terminated");
            }
        });

        // Naive timestamps are reported as UTC
        client.batch_execute("SET TIME ZONE 'UTC'").await?;
        Ok(PgConnection { client })
    }
}

/// One PostgreSQL session.
pub struct PgConnection {
    client: Client,
}

impl PgConnection {
    /// Run `statement` with the range bounds bound to `$1` and `$2`, typed
    /// to match the time column.
    async fn query_range(&self, statement: &Statement, range: &TimeRange) -> Result<Vec<Row>> {
        let rows = if statement.params().first() == Some(&Type::TIMESTAMP) {
            let (start, end) = (range.start().naive_utc(), range.end().naive_utc());
            self.client.query(statement, &[&start, &end]).await?
        } else {
            let (start, end) = (range.start(), range.end());
            self.client.query(statement, &[&start, &end]).await?
        };
        Ok(rows)
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn fetch_page(&mut self, request: &PageRequest<'_>) -> Result<Vec<Record>> {
        let sql = sql::page_query(request.spec, request.limit, request.offset);
        debug!(sql = %sql, "Executing page query");

        let statement = self.client.prepare(&sql).await?;
        let columns: Arc<[String]> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let rows = self.query_range(&statement, &request.range).await?;
        rows.iter().map(|row| decode_row(row, &columns)).collect()
    }

    async fn fetch_count(&mut self, spec: &QuerySpec, range: &TimeRange) -> Result<u64> {
        let sql = sql::count_query(spec);
        debug!(sql = %sql, "Executing count query");

        let statement = self.client.prepare(&sql).await?;
        let rows = self.query_range(&statement, range).await?;
        let count: i64 = match rows.first() {
            Some(row) => row
                .try_get(0)
                .map_err(|e| FetchError::SchemaMismatch(format!("count: {e}")))?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }

    async fn is_valid(&mut self) -> bool {
        !self.client.is_closed() && self.client.simple_query("SELECT 1").await.is_ok()
    }
}

fn decode_row(row: &Row, columns: &Arc<[String]>) -> Result<Record> {
    let mut values = Vec::with_capacity(columns.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_value(row, idx, column.type_()).map_err(|e| {
            FetchError::SchemaMismatch(format!(
                "cannot decode column '{}' ({}): {e}",
                column.name(),
                column.type_()
            ))
        })?;
        values.push(value);
    }
    Ok(Record::new(Arc::clone(columns), values))
}

fn decode_value(
    row: &Row,
    idx: usize,
    ty: &Type,
) -> std::result::Result<FieldValue, tokio_postgres::Error> {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.into(),
        Type::INT2 => opt(row.try_get::<_, Option<i16>>(idx)?, |v| FieldValue::Int(v.into())),
        Type::INT4 => opt(row.try_get::<_, Option<i32>>(idx)?, |v| FieldValue::Int(v.into())),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.into(),
        Type::OID => opt(row.try_get::<_, Option<u32>>(idx)?, |v| FieldValue::Int(v.into())),
        Type::FLOAT4 => opt(row.try_get::<_, Option<f32>>(idx)?, |v| {
            FieldValue::Float(v.into())
        }),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.into(),
        Type::NUMERIC => opt(row.try_get::<_, Option<NumericText>>(idx)?, |v| {
            FieldValue::Numeric(v.0)
        }),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            row.try_get::<_, Option<String>>(idx)?.into()
        }
        Type::TIMESTAMPTZ => row.try_get::<_, Option<DateTime<Utc>>>(idx)?.into(),
        Type::TIMESTAMP => opt(row.try_get::<_, Option<NaiveDateTime>>(idx)?, |v| {
            FieldValue::Timestamp(v.and_utc())
        }),
        Type::DATE => opt(row.try_get::<_, Option<NaiveDate>>(idx)?, FieldValue::Date),
        Type::JSON | Type::JSONB => opt(
            row.try_get::<_, Option<serde_json::Value>>(idx)?,
            FieldValue::Json,
        ),
        Type::BYTEA => opt(row.try_get::<_, Option<Vec<u8>>>(idx)?, FieldValue::Bytes),
        Type::UUID => opt(row.try_get::<_, Option<Uuid>>(idx)?, FieldValue::Uuid),
        _ => opt(row.try_get::<_, Option<RawText>>(idx)?, |v| {
            FieldValue::Text(v.0)
        }),
    };
    Ok(value)
}

fn opt<T>(value: Option<T>, f: impl FnOnce(T) -> FieldValue) -> FieldValue {
    value.map(f).unwrap_or(FieldValue::Null)
}

type DecodeError = Box<dyn std::error::Error + Sync + Send>;

/// NUMERIC in its exact decimal text form.
struct NumericText(String);

impl<'a> FromSql<'a> for NumericText {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, DecodeError> {
        numeric_to_string(raw).map(NumericText)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Fallback for types without a dedicated mapping: UTF-8 payloads as text,
/// anything else hex encoded.
struct RawText(String);

impl<'a> FromSql<'a> for RawText {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, DecodeError> {
        Ok(RawText(match std::str::from_utf8(raw) {
            Ok(s) => s.to_string(),
            Err(_) => hex::encode(raw),
        }))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Decode the binary NUMERIC wire format: a header of four big-endian
/// 16-bit words (digit count, weight, sign, display scale) followed by
/// base-10000 digits.
fn numeric_to_string(raw: &[u8]) -> std::result::Result<String, DecodeError> {
    if raw.len() < 8 {
        return Err("numeric value too short".into());
    }
    let word = |i: usize| u16::from_be_bytes([raw[i], raw[i + 1]]);
    let ndigits = word(0) as usize;
    let weight = word(2) as i16 as i32;
    let sign = word(4);
    let dscale = word(6) as usize;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }
    if raw.len() < 8 + ndigits * 2 {
        return Err("numeric value truncated".into());
    }
    let digit = |i: i32| -> u16 {
        if i < 0 || i as usize >= ndigits {
            0
        } else {
            word(8 + i as usize * 2)
        }
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG && ndigits > 0 {
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
        let mut frac = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit(i)));
            i += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(ndigits: u16, weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        for w in [ndigits, weight as u16, sign, dscale] {
            raw.extend_from_slice(&w.to_be_bytes());
        }
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    #[test]
    fn test_numeric_decoding() {
        // 12345.678
        let raw = numeric(3, 1, 0, 3, &[1, 2345, 6780]);
        assert_eq!(numeric_to_string(&raw).unwrap(), "12345.678");

        // -0.0042
        let raw = numeric(1, -1, NUMERIC_NEG, 4, &[42]);
        assert_eq!(numeric_to_string(&raw).unwrap(), "-0.0042");

        // 10000 (trailing zero group omitted on the wire)
        let raw = numeric(1, 1, 0, 0, &[1]);
        assert_eq!(numeric_to_string(&raw).unwrap(), "10000");

        // 0.00
        let raw = numeric(0, 0, 0, 2, &[]);
        assert_eq!(numeric_to_string(&raw).unwrap(), "0.00");

        let raw = numeric(0, 0, NUMERIC_NAN, 0, &[]);
        assert_eq!(numeric_to_string(&raw).unwrap(), "NaN");
    }

    #[test]
    fn test_numeric_rejects_short_input() {
        assert!(numeric_to_string(&[0, 1]).is_err());
        assert!(numeric_to_string(&numeric(2, 0, 0, 0, &[1])).is_err());
    }

    #[test]
    fn test_factory_from_url() {
        let factory = PgConnectionFactory::from_url("postgres://reader:pw@db.internal:5433/feeds")
            .unwrap();
        assert_eq!(factory.config().get_user(), Some("reader"));
        assert_eq!(factory.config().get_dbname(), Some("feeds"));
        assert_eq!(factory.config().get_ports(), &[5433]);

        assert!(matches!(
            PgConnectionFactory::from_url("postgres://host:notaport/db"),
            Err(FetchError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_factory_from_fields() {
        let db = DatabaseConfig {
            host: "replica".to_string(),
            password: Some("secret".to_string()),
            ..DatabaseConfig::default()
        };
        let factory = PgConnectionFactory::from_database_config(&db).unwrap();
        let config = factory.config();
        assert_eq!(config.get_user(), Some("postgres"));
        assert_eq!(config.get_password(), Some(&b"secret"[..]));
        assert_eq!(config.get_connect_timeout(), Some(&Duration::from_secs(30)));
        assert_eq!(config.get_application_name(), Some(APPLICATION_NAME));
    }
}
