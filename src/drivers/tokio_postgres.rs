use std::collections::HashMap;
use std::error::Error;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row};
use uuid::Uuid;

use crate::config::ConnectionConfig;
use crate::error::{QuarryError, Result};
use crate::traits::{DatabaseDriver, ExecuteOutcome};
use crate::types::{RawQueryResult, SqlValue};

type BoxError = Box<dyn Error + Sync + Send>;

/// Column fed by a sequence (serial or identity) of the table with the given
/// OID, if it has one.
const SEQUENCE_COLUMN_SQL: &str = "SELECT a.attname::text FROM pg_depend d \
     JOIN pg_class s ON s.oid = d.objid AND s.relkind = 'S' \
     JOIN pg_attribute a ON a.attrelid = d.refobjid AND a.attnum = d.refobjsubid \
     WHERE d.classid = 'pg_class'::regclass AND d.refobjid = $1 \
     AND d.deptype IN ('a', 'i') LIMIT 1";

/// PostgreSQL driver implementation using tokio-postgres.
///
/// Statements use `?` placeholders and backtick-quoted identifiers; both are
/// translated to PostgreSQL syntax before preparing.
///
/// Parameters bind by the type the server expects for them: text converts to
/// dates, numerics, UUIDs and JSON. Columns of types with no native mapping
/// read back as text.
pub struct TokioPostgresDriver {
    client: Client,
    /// Sequence-fed column per table OID.
    sequence_columns: Mutex<HashMap<u32, Option<String>>>,
}

impl TokioPostgresDriver {
    /// Connect using a [`ConnectionConfig`].
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let mut pg = Config::new();
        pg.host(&config.host)
            .dbname(&config.database)
            .user(&config.username);
        if let Some(port) = config.port {
            pg.port(port);
        }
        if !config.password.is_empty() {
            pg.password(&config.password);
        }
        let options = config.server_options();
        if !options.is_empty() {
            pg.options(&options);
        }
        let (client, connection) = pg
            .connect(NoTls)
            .await
            .map_err(|e| QuarryError::ConnectionFailed(e.to_string()))?;
        Self::spawn_connection(connection);
        Ok(Self {
            client,
            sequence_columns: Mutex::new(HashMap::new()),
        })
    }

    fn spawn_connection<F>(connection: F)
    where
        F: std::future::Future<Output = std::result::Result<(), tokio_postgres::Error>>
            + Send
            + 'static,
    {
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "postgres connection error");
            }
        });
    }

    async fn control(&self, statement: &str) -> Result<()> {
        self.client
            .batch_execute(statement)
            .await
            .map_err(|e| QuarryError::QueryFailed(e.to_string()))
    }

    async fn sequence_column(&self, table: u32) -> Result<Option<String>> {
        let cached = self
            .sequence_columns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&table)
            .cloned();
        if let Some(cached) = cached {
            return Ok(cached);
        }
        let column = self
            .client
            .query_opt(SEQUENCE_COLUMN_SQL, &[&table])
            .await
            .map_err(|e| QuarryError::QueryFailed(e.to_string()))?
            .map(|row| row.try_get::<_, String>(0))
            .transpose()
            .map_err(|e| QuarryError::QueryFailed(e.to_string()))?;
        self.sequence_columns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table, column.clone());
        Ok(column)
    }
}

#[async_trait]
impl DatabaseDriver for TokioPostgresDriver {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<RawQueryResult> {
        let sql = to_positional(sql);
        let converted_params: Vec<Box<dyn ToSql + Sync + Send>> =
            params.iter().map(sql_value_to_tosql).collect();
        let param_refs: Vec<&(dyn ToSql + Sync)> = converted_params
            .iter()
            .map(|b| b.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let statement = self
            .client
            .prepare(&sql)
            .await
            .map_err(|e| QuarryError::QueryFailed(e.to_string()))?;
        let rows = self
            .client
            .query(&statement, &param_refs)
            .await
            .map_err(|e| QuarryError::QueryFailed(e.to_string()))?;

        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let result_rows = rows
            .iter()
            .map(|row| {
                row.columns()
                    .iter()
                    .enumerate()
                    .map(|(i, col)| row_value(row, i, col.type_()))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RawQueryResult::new(columns, result_rows))
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<ExecuteOutcome> {
        let sql = to_positional(sql);
        let converted_params: Vec<Box<dyn ToSql + Sync + Send>> =
            params.iter().map(sql_value_to_tosql).collect();
        let param_refs: Vec<&(dyn ToSql + Sync)> = converted_params
            .iter()
            .map(|b| b.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let affected = self
            .client
            .execute(sql.as_str(), &param_refs)
            .await
            .map_err(|e| QuarryError::QueryFailed(e.to_string()))?;
        Ok(ExecuteOutcome::affected(affected))
    }

    /// Runs the INSERT with `RETURNING tableoid, *` and reads the generated
    /// identifier from the sequence-fed column of the inserted row.
    async fn insert(&self, sql: &str, params: &[SqlValue]) -> Result<ExecuteOutcome> {
        let inserted = self.query(&with_returning(sql), params).await?;
        let rows_affected = inserted.rows.len() as u64;
        let Some(first) = inserted.rows.first() else {
            return Ok(ExecuteOutcome::affected(rows_affected));
        };
        let table = match first.first() {
            Some(SqlValue::Int64(oid)) => u32::try_from(*oid).ok(),
            _ => None,
        };
        let last_insert_id = match table {
            Some(table) => self
                .sequence_column(table)
                .await?
                .and_then(|column| generated_id(&inserted.columns, first, &column)),
            None => None,
        };
        Ok(ExecuteOutcome {
            rows_affected,
            last_insert_id,
        })
    }

    async fn begin(&self) -> Result<()> {
        self.control("BEGIN").await
    }

    async fn commit(&self) -> Result<()> {
        self.control("COMMIT").await
    }

    async fn rollback(&self) -> Result<()> {
        self.control("ROLLBACK").await
    }
}

/// Rewrites `?` placeholders to `$1, $2, ...` and backtick-quoted identifiers
/// to double quotes. String literals are copied untouched.
pub(crate) fn to_positional(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut in_literal = false;
    let mut index = 0;
    for c in sql.chars() {
        match c {
            '\'' => {
                in_literal = !in_literal;
                out.push(c);
            }
            '?' if !in_literal => {
                index += 1;
                out.push('$');
                out.push_str(&index.to_string());
            }
            '`' if !in_literal => out.push('"'),
            _ => out.push(c),
        }
    }
    out
}

/// `sql` with `RETURNING tableoid, *` appended.
fn with_returning(sql: &str) -> String {
    format!(
        "{} RETURNING tableoid, *",
        sql.trim_end().trim_end_matches(';').trim_end()
    )
}

/// Integer value of `column` in a `RETURNING tableoid, *` row. The leading
/// `tableoid` is skipped so that a user column of that name still matches.
fn generated_id(columns: &[String], row: &[SqlValue], column: &str) -> Option<i64> {
    columns
        .iter()
        .zip(row)
        .skip(1)
        .find(|(name, _)| name.as_str() == column)
        .and_then(|(_, value)| value.as_i64())
}

/// Integer parameter that adapts to the width of the target column.
#[derive(Debug)]
struct IntParam(i64);

impl ToSql for IntParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        if *ty == Type::INT2 {
            i16::try_from(self.0)?.to_sql(ty, out)
        } else if *ty == Type::INT4 {
            i32::try_from(self.0)?.to_sql(ty, out)
        } else if *ty == Type::NUMERIC {
            Decimal::from(self.0).to_sql(ty, out)
        } else {
            self.0.to_sql(ty, out)
        }
    }

    fn accepts(ty: &Type) -> bool {
        [Type::INT2, Type::INT4, Type::INT8, Type::NUMERIC].contains(ty)
    }

    to_sql_checked!();
}

/// Float parameter for FLOAT4, FLOAT8 and NUMERIC columns.
#[derive(Debug)]
struct FloatParam(f64);

impl ToSql for FloatParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        if *ty == Type::FLOAT4 {
            (self.0 as f32).to_sql(ty, out)
        } else if *ty == Type::NUMERIC {
            Decimal::try_from(self.0)?.to_sql(ty, out)
        } else {
            self.0.to_sql(ty, out)
        }
    }

    fn accepts(ty: &Type) -> bool {
        [Type::FLOAT4, Type::FLOAT8, Type::NUMERIC].contains(ty)
    }

    to_sql_checked!();
}

/// Text parameter, parsed into the column's type when the server expects
/// something other than a string.
#[derive(Debug)]
struct TextParam(String);

const TEXT_CONVERTIBLE: [Type; 8] = [
    Type::DATE,
    Type::TIMESTAMP,
    Type::TIMESTAMPTZ,
    Type::TIME,
    Type::NUMERIC,
    Type::UUID,
    Type::JSON,
    Type::JSONB,
];

impl ToSql for TextParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        let text = self.0.trim();
        if *ty == Type::DATE {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")?.to_sql(ty, out)
        } else if *ty == Type::TIMESTAMP {
            parse_timestamp(text)?.to_sql(ty, out)
        } else if *ty == Type::TIMESTAMPTZ {
            parse_timestamptz(text)?.to_sql(ty, out)
        } else if *ty == Type::TIME {
            NaiveTime::from_str(text)?.to_sql(ty, out)
        } else if *ty == Type::NUMERIC {
            Decimal::from_str(text)?.to_sql(ty, out)
        } else if *ty == Type::UUID {
            Uuid::parse_str(text)?.to_sql(ty, out)
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            serde_json::from_str::<serde_json::Value>(&self.0)?.to_sql(ty, out)
        } else {
            self.0.as_str().to_sql(ty, out)
        }
    }

    fn accepts(ty: &Type) -> bool {
        <&str as ToSql>::accepts(ty)
            || matches!(ty.kind(), Kind::Enum(_))
            || TEXT_CONVERTIBLE.contains(ty)
    }

    to_sql_checked!();
}

fn parse_timestamp(text: &str) -> std::result::Result<NaiveDateTime, BoxError> {
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(stamp) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(stamp);
        }
    }
    Ok(NaiveDate::parse_from_str(text, "%Y-%m-%d")?.and_time(NaiveTime::MIN))
}

/// RFC 3339 with an offset, or a naive timestamp taken as UTC.
fn parse_timestamptz(text: &str) -> std::result::Result<DateTime<Utc>, BoxError> {
    match DateTime::parse_from_rfc3339(text) {
        Ok(stamp) => Ok(stamp.with_timezone(&Utc)),
        Err(_) => Ok(parse_timestamp(text)?.and_utc()),
    }
}

/// NULL of whatever type the server expects.
#[derive(Debug)]
struct NullParam;

impl ToSql for NullParam {
    fn to_sql(&self, _ty: &Type, _out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Raw column bytes read as UTF-8, for types with no native mapping (enums,
/// domains over text, extension types).
struct LossyText(String);

impl<'a> FromSql<'a> for LossyText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        Ok(LossyText(String::from_utf8_lossy(raw).into_owned()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Convert a SqlValue to a boxed ToSql trait object.
fn sql_value_to_tosql(value: &SqlValue) -> Box<dyn ToSql + Sync + Send> {
    match value {
        SqlValue::Null => Box::new(NullParam),
        SqlValue::Text(s) => Box::new(TextParam(s.clone())),
        SqlValue::Int32(i) => Box::new(IntParam(i64::from(*i))),
        SqlValue::Int64(i) => Box::new(IntParam(*i)),
        SqlValue::Float(f) => Box::new(FloatParam(*f)),
        SqlValue::Bool(b) => Box::new(*b),
    }
}

/// Decode a column by its declared type.
fn row_value(row: &Row, index: usize, ty: &Type) -> Result<SqlValue> {
    let decoded = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(index).map(SqlValue::from)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(index)
            .map(|v| SqlValue::from(v.map(i32::from)))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(index).map(SqlValue::from)
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(index).map(SqlValue::from)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(index)
            .map(|v| SqlValue::from(v.map(f64::from)))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(index).map(SqlValue::from)
    } else if *ty == Type::DATE {
        row.try_get::<_, Option<NaiveDate>>(index).map(SqlValue::from)
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(index).map(SqlValue::from)
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(index)
            .map(|v| SqlValue::from(v.map(|dt| dt.naive_utc())))
    } else if *ty == Type::TIME {
        row.try_get::<_, Option<NaiveTime>>(index)
            .map(|v| SqlValue::from(v.map(|t| t.to_string())))
    } else if *ty == Type::NUMERIC {
        row.try_get::<_, Option<Decimal>>(index)
            .map(|v| SqlValue::from(v.map(|d| d.to_string())))
    } else if *ty == Type::UUID {
        row.try_get::<_, Option<Uuid>>(index)
            .map(|v| SqlValue::from(v.map(|u| u.to_string())))
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        row.try_get::<_, Option<serde_json::Value>>(index)
            .map(|v| SqlValue::from(v.map(|json| json.to_string())))
    } else if *ty == Type::OID {
        row.try_get::<_, Option<u32>>(index).map(SqlValue::from)
    } else if <String as FromSql>::accepts(ty) {
        row.try_get::<_, Option<String>>(index).map(SqlValue::from)
    } else {
        row.try_get::<_, Option<LossyText>>(index)
            .map(|v| SqlValue::from(v.map(|text| text.0)))
    };
    decoded.map_err(|e| {
        QuarryError::QueryFailed(format!(
            "cannot decode column {} of type {}: {}",
            index, ty, e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_become_positional() {
        assert_eq!(
            to_positional("INSERT INTO users (`name`, `age`) VALUES (?, ?)"),
            "INSERT INTO users (\"name\", \"age\") VALUES ($1, $2)"
        );
    }

    #[test]
    fn test_literals_are_untouched() {
        assert_eq!(
            to_positional("SELECT * FROM t WHERE a = '?`' AND b = ?"),
            "SELECT * FROM t WHERE a = '?`' AND b = $1"
        );
    }

    #[test]
    fn test_int_param_accepts_integer_columns() {
        assert!(<IntParam as ToSql>::accepts(&Type::INT4));
        assert!(<IntParam as ToSql>::accepts(&Type::INT8));
        assert!(<IntParam as ToSql>::accepts(&Type::NUMERIC));
        assert!(!<IntParam as ToSql>::accepts(&Type::TEXT));
    }

    #[test]
    fn test_text_param_binds_typed_columns() {
        for ty in [
            Type::TEXT,
            Type::VARCHAR,
            Type::DATE,
            Type::TIMESTAMP,
            Type::TIMESTAMPTZ,
            Type::NUMERIC,
            Type::UUID,
            Type::JSONB,
        ] {
            assert!(<TextParam as ToSql>::accepts(&ty), "{} rejected", ty);
        }
        assert!(!<TextParam as ToSql>::accepts(&Type::INT4));

        let mut out = BytesMut::new();
        let written = TextParam("2024-03-09".to_string()).to_sql(&Type::DATE, &mut out);
        assert!(matches!(written, Ok(IsNull::No)));
        // DATE is days since 2000-01-01 as a big-endian i32.
        assert_eq!(out.len(), 4);

        let mut out = BytesMut::new();
        let written =
            TextParam("2024-03-09 14:05:00".to_string()).to_sql(&Type::TIMESTAMP, &mut out);
        assert!(matches!(written, Ok(IsNull::No)));
        assert_eq!(out.len(), 8);

        let mut out = BytesMut::new();
        assert!(TextParam("12.50".to_string())
            .to_sql(&Type::NUMERIC, &mut out)
            .is_ok());

        let mut out = BytesMut::new();
        assert!(TextParam("not a date".to_string())
            .to_sql(&Type::DATE, &mut out)
            .is_err());
    }

    #[test]
    fn test_stringified_dates_parse_back() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let stamp = date.and_hms_opt(14, 5, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-09 14:05:00").unwrap(), stamp);
        assert_eq!(parse_timestamp("2024-03-09T14:05:00").unwrap(), stamp);
        assert_eq!(
            parse_timestamp("2024-03-09").unwrap(),
            date.and_hms_opt(0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_timestamptz("2024-03-09T16:05:00+02:00").unwrap(),
            stamp.and_utc()
        );
    }

    #[test]
    fn test_float_param_accepts_numeric() {
        assert!(<FloatParam as ToSql>::accepts(&Type::NUMERIC));
        assert!(<FloatParam as ToSql>::accepts(&Type::FLOAT4));
        let mut out = BytesMut::new();
        assert!(FloatParam(19.99).to_sql(&Type::NUMERIC, &mut out).is_ok());
    }

    #[test]
    fn test_unknown_types_read_as_text() {
        let text = LossyText::from_sql(&Type::TEXT, b"pending").unwrap();
        assert_eq!(text.0, "pending");
        assert!(<LossyText as FromSql>::accepts(&Type::INTERVAL));
    }

    #[test]
    fn test_insert_returns_table_and_row() {
        assert_eq!(
            with_returning("INSERT INTO users (`name`) VALUES (?);"),
            "INSERT INTO users (`name`) VALUES (?) RETURNING tableoid, *"
        );
    }

    #[test]
    fn test_generated_id_comes_from_sequence_column() {
        let columns = vec![
            "tableoid".to_string(),
            "user_id".to_string(),
            "name".to_string(),
        ];
        let row = vec![
            SqlValue::Int64(16384),
            SqlValue::Int32(7),
            SqlValue::from("Bob"),
        ];
        assert_eq!(generated_id(&columns, &row, "user_id"), Some(7));
        assert_eq!(generated_id(&columns, &row, "missing"), None);
        // The leading table OID is never taken for the identifier.
        assert_eq!(generated_id(&columns, &row, "tableoid"), None);
    }
}
