//! 主键识别策略

use crate::error::{EngineError, Result};
use crate::store::StoreSession;
use crate::validator::is_identifier;
use mutation_shared::config::PrimaryKeyConfig;
use std::collections::HashMap;
use tracing::debug;

/// 主键识别策略
#[derive(Debug, Clone, PartialEq)]
pub enum KeyStrategy {
    /// 所有表使用同一列
    Fixed(String),
    /// 按表配置，未配置时使用 fallback
    Configured {
        tables: HashMap<String, String>,
        fallback: Option<String>,
    },
    /// 从存储读取主键定义
    Introspect { fallback: Option<String> },
}

impl Default for KeyStrategy {
    fn default() -> Self {
        Self::Fixed("id".to_string())
    }
}

impl From<&PrimaryKeyConfig> for KeyStrategy {
    fn from(config: &PrimaryKeyConfig) -> Self {
        match config {
            PrimaryKeyConfig::Fixed { column } => Self::Fixed(column.clone()),
            PrimaryKeyConfig::Configured { tables, fallback } => Self::Configured {
                tables: tables.clone(),
                fallback: fallback.clone(),
            },
            PrimaryKeyConfig::Introspect { fallback } => Self::Introspect {
                fallback: fallback.clone(),
            },
        }
    }
}

impl KeyStrategy {
    /// 解析表的主键列
    pub async fn resolve(&self, table: &str, session: &mut dyn StoreSession) -> Result<String> {
        let column = match self {
            Self::Fixed(column) => column.clone(),
            Self::Configured { tables, fallback } => tables
                .get(table)
                .or(fallback.as_ref())
                .cloned()
                .ok_or_else(|| {
                    EngineError::TableResolution(format!("表 '{}' 未配置主键列", table))
                })?,
            Self::Introspect { fallback } => {
                let columns = session.primary_key(table).await?;
                match columns.as_slice() {
                    [column] => column.clone(),
                    [] => fallback.clone().ok_or_else(|| {
                        EngineError::TableResolution(format!("表 '{}' 没有主键", table))
                    })?,
                    _ => {
                        return Err(EngineError::TableResolution(format!(
                            "表 '{}' 使用复合主键 ({}), 不支持",
                            table,
                            columns.join(", ")
                        )));
                    }
                }
            }
        };

        if !is_identifier(&column) {
            return Err(EngineError::InvalidIdentifier(column));
        }

        debug!(table, key_column = %column, "Resolved primary key");
        Ok(column)
    }
}
