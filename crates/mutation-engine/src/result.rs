//! 预览与执行结果模型

use crate::error::EngineError;
use crate::statement::UpdateStatement;
use crate::value::{FieldValue, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// 单条记录的变更
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordChange {
    /// 主键值
    pub record_id: FieldValue,
    /// 可读标签
    pub label: String,
    /// 变更前的完整记录快照
    pub original: Record,
    /// 仅包含发生变化的字段
    pub original_values: BTreeMap<String, FieldValue>,
    pub new_values: BTreeMap<String, FieldValue>,
}

impl RecordChange {
    /// 变更的字段名
    pub fn changed_fields(&self) -> impl Iterator<Item = &str> {
        self.new_values.keys().map(String::as_str)
    }
}

/// 单个字段的变更统计（仅数值）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChangeStats {
    pub field: String,
    /// 参与统计的记录数
    pub count: usize,
    pub before_min: f64,
    pub before_max: f64,
    pub before_avg: f64,
    pub after_min: f64,
    pub after_max: f64,
    pub after_avg: f64,
    /// after_avg - before_avg
    pub avg_change: f64,
    /// 变更前平均值为 0 时为 None
    pub avg_change_percent: Option<f64>,
}

/// 预览警告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreviewWarning {
    NoMatchingRecords,
    LargeBlastRadius {
        matched: usize,
        threshold: usize,
    },
    LargeAverageChange {
        field: String,
        percent: f64,
        threshold: f64,
    },
}

impl fmt::Display for PreviewWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMatchingRecords => write!(f, "没有匹配的记录"),
            Self::LargeBlastRadius { matched, threshold } => write!(
                f,
                "匹配 {} 条记录, 超过 {} 条的批量阈值, 请确认影响范围",
                matched, threshold
            ),
            Self::LargeAverageChange {
                field,
                percent,
                threshold,
            } => write!(
                f,
                "字段 '{}' 的平均变化为 {:.1}%, 超过 {}% 的阈值",
                field, percent, threshold
            ),
        }
    }
}

/// 预览结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewResult {
    pub rule_id: String,
    pub rule_name: String,
    pub table: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub matched_count: usize,
    pub changes: Vec<RecordChange>,
    pub field_stats: BTreeMap<String, FieldChangeStats>,
    pub warnings: Vec<PreviewWarning>,
}

impl PreviewResult {
    pub fn new(rule_id: impl Into<String>, rule_name: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            rule_name: rule_name.into(),
            table: None,
            success: true,
            error: None,
            error_code: None,
            matched_count: 0,
            changes: Vec::new(),
            field_stats: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    /// 失败结果：清空变更与统计，只保留错误信息
    pub fn failed(mut self, error: &EngineError) -> Self {
        self.success = false;
        self.error = Some(error.to_string());
        self.error_code = Some(error.code().to_string());
        self.matched_count = 0;
        self.changes.clear();
        self.field_stats.clear();
        self.warnings.clear();
        self
    }

    /// 会被修改的记录数
    pub fn changed_count(&self) -> usize {
        self.changes.len()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// 执行类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    Apply,
    Rollback,
}

/// 执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Complete,
    Failed,
    /// 回滚进行中，防止同一执行被并发回滚
    RollingBack,
    RolledBack,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
            Self::RollingBack => "ROLLING_BACK",
            Self::RolledBack => "ROLLED_BACK",
        };
        f.write_str(s)
    }
}

/// 执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub kind: ExecutionKind,
    pub rule_id: String,
    pub rule_name: String,
    pub table: Option<String>,
    /// 已执行的语句
    pub applied_statements: Vec<UpdateStatement>,
    /// 逆向语句，与 applied_statements 一一对应
    pub inverse_statements: Vec<UpdateStatement>,
    pub changes: Vec<RecordChange>,
    pub affected_count: u64,
    pub state: ExecutionState,
    pub error: Option<String>,
    pub error_code: Option<String>,
    /// 回滚结果指向被回滚的执行
    pub rollback_of: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionResult {
    pub fn new(
        kind: ExecutionKind,
        rule_id: impl Into<String>,
        rule_name: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: Uuid::now_v7().to_string(),
            kind,
            rule_id: rule_id.into(),
            rule_name: rule_name.into(),
            table: None,
            applied_statements: Vec::new(),
            inverse_statements: Vec::new(),
            changes: Vec::new(),
            affected_count: 0,
            state: ExecutionState::Complete,
            error: None,
            error_code: None,
            rollback_of: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state != ExecutionState::Failed
    }

    /// 只有成功完成的正向执行可以回滚
    pub fn can_rollback(&self) -> bool {
        self.kind == ExecutionKind::Apply && self.state == ExecutionState::Complete
    }

    pub(crate) fn complete(mut self) -> Self {
        self.state = ExecutionState::Complete;
        self.finished_at = Some(Utc::now());
        self
    }

    /// 失败结果：事务已回滚，清空语句与影响行数
    pub(crate) fn failed(mut self, error: &EngineError) -> Self {
        self.state = ExecutionState::Failed;
        self.error = Some(error.to_string());
        self.error_code = Some(error.code().to_string());
        self.applied_statements.clear();
        self.inverse_statements.clear();
        self.changes.clear();
        self.affected_count = 0;
        self.finished_at = Some(Utc::now());
        self
    }

    /// 已执行语句的可读 SQL
    pub fn applied_sql(&self) -> Vec<String> {
        render_all(&self.applied_statements)
    }

    /// 逆向语句的可读 SQL
    pub fn inverse_sql(&self) -> Vec<String> {
        render_all(&self.inverse_statements)
    }
}

fn render_all(statements: &[UpdateStatement]) -> Vec<String> {
    statements
        .iter()
        .map(|s| {
            s.to_display_sql()
                .unwrap_or_else(|e| format!("-- {}", e))
        })
        .collect()
}
