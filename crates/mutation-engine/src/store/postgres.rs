//! PostgreSQL 存储（sqlx）
//!
//! 更新语句带 `RETURNING`，写入后的实际值从返回行解码。列类型从 `pg_attribute` 读取。

use super::{RecordStore, StoreSession};
use crate::error::{EngineError, Result};
use crate::statement::{ColumnTypes, SelectStatement, UpdateStatement, quote_table};
use crate::value::{FieldValue, Record};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use mutation_shared::config::{DatabaseConfig, IsolationLevel};
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row, Transaction, TypeInfo};
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// 列的解码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    SmallInt,
    Int,
    BigInt,
    Real,
    Double,
    Numeric,
    Bool,
    Text,
    Uuid,
    TimestampTz,
    Timestamp,
    Date,
    Json,
    Other,
}

impl ColumnKind {
    fn from_type_name(name: &str) -> Self {
        match name {
            "INT2" => Self::SmallInt,
            "INT4" => Self::Int,
            "INT8" => Self::BigInt,
            "FLOAT4" => Self::Real,
            "FLOAT8" => Self::Double,
            "NUMERIC" => Self::Numeric,
            "BOOL" => Self::Bool,
            "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" | "CITEXT" => Self::Text,
            "UUID" => Self::Uuid,
            "TIMESTAMPTZ" => Self::TimestampTz,
            "TIMESTAMP" => Self::Timestamp,
            "DATE" => Self::Date,
            "JSON" | "JSONB" => Self::Json,
            _ => Self::Other,
        }
    }
}

fn decode_column(row: &PgRow, index: usize, kind: ColumnKind) -> sqlx::Result<FieldValue> {
    let value = match kind {
        ColumnKind::SmallInt => row.try_get::<Option<i16>, _>(index)?.map(|v| FieldValue::Int(v as i64)),
        ColumnKind::Int => row.try_get::<Option<i32>, _>(index)?.map(|v| FieldValue::Int(v as i64)),
        ColumnKind::BigInt => row.try_get::<Option<i64>, _>(index)?.map(FieldValue::Int),
        ColumnKind::Real => row.try_get::<Option<f32>, _>(index)?.map(|v| FieldValue::Float(v as f64)),
        ColumnKind::Double => row.try_get::<Option<f64>, _>(index)?.map(FieldValue::Float),
        ColumnKind::Numeric => row.try_get::<Option<Decimal>, _>(index)?.map(FieldValue::Decimal),
        ColumnKind::Bool => row.try_get::<Option<bool>, _>(index)?.map(FieldValue::Bool),
        ColumnKind::Text | ColumnKind::Other => {
            row.try_get::<Option<String>, _>(index)?.map(FieldValue::Text)
        }
        ColumnKind::Uuid => row.try_get::<Option<Uuid>, _>(index)?.map(FieldValue::Uuid),
        ColumnKind::TimestampTz => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(FieldValue::Timestamp),
        ColumnKind::Timestamp => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(|v| FieldValue::Timestamp(v.and_utc())),
        ColumnKind::Date => row
            .try_get::<Option<NaiveDate>, _>(index)?
            .map(|v| FieldValue::Text(v.to_string())),
        ColumnKind::Json => row
            .try_get::<Option<serde_json::Value>, _>(index)?
            .map(|v| FieldValue::Text(v.to_string())),
    };
    Ok(value.unwrap_or_default())
}

/// 将一行解码为记录；无法解码的列跳过
fn decode_row(row: &PgRow) -> Record {
    let mut record = Record::new();
    for (index, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name();
        match decode_column(row, index, ColumnKind::from_type_name(type_name)) {
            Ok(value) => {
                record.insert(column.name().to_string(), value);
            }
            Err(e) => {
                debug!(column = column.name(), type_name, error = %e, "Skipping undecodable column");
            }
        }
    }
    record
}

fn bind_value(
    query: Query<'_, Postgres, PgArguments>,
    value: FieldValue,
) -> Query<'_, Postgres, PgArguments> {
    match value {
        FieldValue::Null => query.bind(None::<String>),
        FieldValue::Bool(v) => query.bind(v),
        FieldValue::Int(v) => query.bind(v),
        FieldValue::Float(v) => query.bind(v),
        FieldValue::Decimal(v) => query.bind(v),
        FieldValue::Text(v) => query.bind(v),
        FieldValue::Uuid(v) => query.bind(v),
        FieldValue::Timestamp(v) => query.bind(v),
    }
}

fn bind_all(sql: &str, params: Vec<FieldValue>) -> Query<'_, Postgres, PgArguments> {
    params
        .into_iter()
        .fold(sqlx::query(sql), bind_value)
}

/// 基于连接池的 PostgreSQL 记录存储
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 按配置创建连接池
    #[instrument(skip(config))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!("Database connection pool created");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection pool closed");
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    #[instrument(skip(self))]
    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn StoreSession>> {
        let mut tx = self.pool.begin().await?;

        // 必须是事务中的第一条语句
        sqlx::query(&format!("SET TRANSACTION ISOLATION LEVEL {}", isolation.as_sql()))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgSession { tx: Some(tx) }))
    }
}

/// 一个 PostgreSQL 事务
struct PgSession {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgSession {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| EngineError::Datastore("事务已结束".to_string()))
    }
}

#[async_trait]
impl StoreSession for PgSession {
    async fn query(&mut self, statement: &SelectStatement) -> Result<Vec<Record>> {
        let (sql, params) = statement.to_sql()?;
        debug!(sql = %sql, params = params.len(), "Querying rows");

        let tx = self.tx()?;
        let rows = bind_all(&sql, params).fetch_all(&mut **tx).await?;
        Ok(rows.iter().map(decode_row).collect())
    }

    async fn execute(&mut self, statement: &UpdateStatement) -> Result<Vec<Record>> {
        let (sql, params) = statement.to_sql()?;
        debug!(sql = %sql, params = params.len(), "Executing update");

        let tx = self.tx()?;
        let rows = bind_all(&sql, params).fetch_all(&mut **tx).await?;
        Ok(rows.iter().map(decode_row).collect())
    }

    async fn primary_key(&mut self, table: &str) -> Result<Vec<String>> {
        let (schema, name) = match table.split_once('.') {
            Some((schema, name)) => (Some(schema.to_string()), name.to_string()),
            None => (None, table.to_string()),
        };

        let tx = self.tx()?;
        let columns: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT kcu.column_name::text
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.table_schema = kcu.table_schema
             AND tc.table_name = kcu.table_name
            WHERE tc.constraint_type = 'PRIMARY KEY'
              AND tc.table_name = $1
              AND tc.table_schema = COALESCE($2, current_schema())
            ORDER BY kcu.ordinal_position
            "#,
        )
        .bind(name)
        .bind(schema)
        .fetch_all(&mut **tx)
        .await?;

        Ok(columns.into_iter().map(|(c,)| c).collect())
    }

    async fn column_types(&mut self, table: &str) -> Result<ColumnTypes> {
        let relation = quote_table(table)?;

        let tx = self.tx()?;
        let columns: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT a.attname::text, format_type(a.atttypid, a.atttypmod)
            FROM pg_attribute a
            WHERE a.attrelid = $1::regclass
              AND a.attnum > 0
              AND NOT a.attisdropped
            ORDER BY a.attnum
            "#,
        )
        .bind(relation)
        .fetch_all(&mut **tx)
        .await?;

        Ok(columns.into_iter().collect())
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| EngineError::Datastore("事务已结束".to_string()))?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}
