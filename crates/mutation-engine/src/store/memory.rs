//! 内存存储
//!
//! 会话在开启时复制一份快照，读写都作用于快照；提交时把记录下的更新语句
//! 在加写锁的共享数据上重放，守卫条件不满足则整体放弃并返回并发修改错误。
//!
//! 表可以声明列类型。`numeric(p,s)` 与 `real` 列写入时按类型舍入，与数据库的存储行为一致。

use super::{RecordStore, StoreSession};
use crate::error::{EngineError, Result};
use crate::predicate::{SelectionMatcher, compare_values};
use crate::statement::{ColumnTypes, SelectStatement, UpdateStatement};
use crate::value::{FieldValue, Record};
use async_trait::async_trait;
use mutation_shared::config::IsolationLevel;
use parking_lot::RwLock;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    primary_key: Vec<String>,
    column_types: ColumnTypes,
    rows: Vec<Record>,
}

impl MemoryTable {
    /// 对满足主键与守卫条件的行应用赋值，返回各行被赋值列的存储值
    fn apply(&mut self, statement: &UpdateStatement) -> Vec<Record> {
        let mut updated = Vec::new();
        for row in self.rows.iter_mut().filter(|row| matches_update(row, statement)) {
            let mut stored = Record::new();
            for (column, value) in &statement.assignments {
                let value = match self.column_types.get(column) {
                    Some(declared) => coerce(declared, value.clone()),
                    None => value.clone(),
                };
                row.insert(column.clone(), value.clone());
                stored.insert(column.clone(), value);
            }
            updated.push(stored);
        }
        updated
    }
}

/// `numeric(p,s)` / `decimal(p,s)` 的小数位数；只写精度时为 0
fn numeric_scale(declared: &str) -> Option<u32> {
    let declared = declared.trim().to_ascii_lowercase();
    let args = declared
        .strip_prefix("numeric")
        .or_else(|| declared.strip_prefix("decimal"))?
        .trim()
        .strip_prefix('(')?
        .strip_suffix(')')?;

    match args.split_once(',') {
        Some((_, scale)) => scale.trim().parse().ok(),
        None => Some(0),
    }
}

/// 按声明的列类型转换写入值
fn coerce(declared: &str, value: FieldValue) -> FieldValue {
    if let Some(scale) = numeric_scale(declared) {
        let decimal = match &value {
            FieldValue::Int(v) => Some(Decimal::from(*v)),
            FieldValue::Float(v) => Decimal::from_f64(*v),
            FieldValue::Decimal(v) => Some(*v),
            _ => None,
        };
        return match decimal {
            Some(d) => {
                let mut rounded = d.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
                rounded.rescale(scale);
                FieldValue::Decimal(rounded)
            }
            None => value,
        };
    }

    match (declared.trim().to_ascii_lowercase().as_str(), &value) {
        ("real" | "float4", FieldValue::Float(v)) => FieldValue::Float(*v as f32 as f64),
        ("real" | "float4", FieldValue::Int(v)) => FieldValue::Float(*v as f32 as f64),
        _ => value,
    }
}

type Tables = HashMap<String, MemoryTable>;

fn column_equals(row: &Record, column: &str, expected: &FieldValue) -> bool {
    let actual = row.get(column).unwrap_or(&FieldValue::Null);
    if expected.is_null() {
        actual.is_null()
    } else {
        compare_values(actual, expected) == Some(Ordering::Equal)
    }
}

fn matches_update(row: &Record, statement: &UpdateStatement) -> bool {
    column_equals(row, &statement.key_column, &statement.key_value)
        && statement
            .guards
            .iter()
            .all(|(column, value)| column_equals(row, column, value))
}

fn missing_table(table: &str) -> EngineError {
    EngineError::Datastore(format!("表 '{}' 不存在", table))
}

/// 进程内的事务性记录存储
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建（或清空）一张表
    pub fn create_table(&self, table: &str, primary_key: Option<&str>) {
        self.tables.write().insert(
            table.to_string(),
            MemoryTable {
                primary_key: primary_key.map(|k| vec![k.to_string()]).unwrap_or_default(),
                ..Default::default()
            },
        );
    }

    /// 创建带复合主键的表
    pub fn create_table_with_key(&self, table: &str, primary_key: &[&str]) {
        self.tables.write().insert(
            table.to_string(),
            MemoryTable {
                primary_key: primary_key.iter().map(|k| k.to_string()).collect(),
                ..Default::default()
            },
        );
    }

    /// 声明列的 SQL 类型（如 `numeric(10,0)`），表不存在时自动创建
    pub fn declare_column(&self, table: &str, column: &str, sql_type: &str) {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .column_types
            .insert(column.to_string(), sql_type.to_string());
    }

    /// 插入记录，表不存在时自动创建（无主键声明）
    pub fn insert(&self, table: &str, record: Record) {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .rows
            .push(record);
    }

    pub fn insert_many(&self, table: &str, records: impl IntoIterator<Item = Record>) {
        let mut tables = self.tables.write();
        let entry = tables.entry(table.to_string()).or_default();
        entry.rows.extend(records);
    }

    /// 直接修改共享数据（不经过事务），用于模拟外部写入
    pub fn update_where<F>(&self, table: &str, mut update: F) -> usize
    where
        F: FnMut(&mut Record) -> bool,
    {
        let mut tables = self.tables.write();
        match tables.get_mut(table) {
            Some(t) => t.rows.iter_mut().map(&mut update).filter(|changed| *changed).count(),
            None => 0,
        }
    }

    /// 表中全部记录的副本
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// 按列值查找单条记录
    pub fn find(&self, table: &str, column: &str, value: &FieldValue) -> Option<Record> {
        self.tables
            .read()
            .get(table)?
            .rows
            .iter()
            .find(|row| column_equals(row, column, value))
            .cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn StoreSession>> {
        debug!(isolation = %isolation, "Opening in-memory session");
        Ok(Box::new(MemorySession {
            shared: Arc::clone(&self.tables),
            snapshot: self.tables.read().clone(),
            writes: Vec::new(),
            finished: false,
        }))
    }
}

struct MemorySession {
    shared: Arc<RwLock<Tables>>,
    snapshot: Tables,
    /// 已执行的更新及其在快照上影响的行数
    writes: Vec<(UpdateStatement, usize)>,
    finished: bool,
}

impl MemorySession {
    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            Err(EngineError::Datastore("会话已结束".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn query(&mut self, statement: &SelectStatement) -> Result<Vec<Record>> {
        self.ensure_open()?;
        // 与 SQL 渲染走同一套标识符校验
        statement.to_sql()?;

        let table = self
            .snapshot
            .get(&statement.table)
            .ok_or_else(|| missing_table(&statement.table))?;

        let mut rows = Vec::new();
        for row in &table.rows {
            if SelectionMatcher::matches(statement.selection.as_ref(), row)? {
                rows.push(row.clone());
            }
        }

        if let Some(column) = &statement.order_by {
            rows.sort_by(|a, b| {
                let a = a.get(column).unwrap_or(&FieldValue::Null);
                let b = b.get(column).unwrap_or(&FieldValue::Null);
                compare_values(a, b).unwrap_or(Ordering::Equal)
            });
        }

        Ok(rows)
    }

    async fn execute(&mut self, statement: &UpdateStatement) -> Result<Vec<Record>> {
        self.ensure_open()?;
        statement.to_sql()?;

        let table = self
            .snapshot
            .get_mut(&statement.table)
            .ok_or_else(|| missing_table(&statement.table))?;

        let updated = table.apply(statement);
        self.writes.push((statement.clone(), updated.len()));
        Ok(updated)
    }

    async fn primary_key(&mut self, table: &str) -> Result<Vec<String>> {
        self.ensure_open()?;
        self.snapshot
            .get(table)
            .map(|t| t.primary_key.clone())
            .ok_or_else(|| missing_table(table))
    }

    async fn column_types(&mut self, table: &str) -> Result<ColumnTypes> {
        self.ensure_open()?;
        self.snapshot
            .get(table)
            .map(|t| t.column_types.clone())
            .ok_or_else(|| missing_table(table))
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.finished = true;

        let mut shared = self.shared.write();
        let mut staged = shared.clone();

        for (statement, affected) in &self.writes {
            let table = staged
                .get_mut(&statement.table)
                .ok_or_else(|| missing_table(&statement.table))?;

            // 重放命中的行数与快照中不同，说明期间被其他会话修改
            if table.apply(statement).len() != *affected {
                return Err(EngineError::ConcurrentModification {
                    table: statement.table.clone(),
                    key: statement.key_display(),
                });
            }
        }

        *shared = staged;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.finished = true;
        self.writes.clear();
        Ok(())
    }
}
