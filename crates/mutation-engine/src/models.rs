//! 批量变更规则领域模型

use crate::error::Result;
use crate::operators::{LogicalOperator, Operator};
use crate::validator::RuleValidator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// 规则状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatus {
    #[default]
    Draft,
    Valid,
    Completed,
    Failed,
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "DRAFT",
            Self::Valid => "VALID",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// 目标选择器：显式表名或通过类别映射解析的符号类别
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum TargetSelector {
    Table(String),
    Category(String),
}

impl TargetSelector {
    pub fn table(name: impl Into<String>) -> Self {
        Self::Table(name.into())
    }

    pub fn category(name: impl Into<String>) -> Self {
        Self::Category(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Table(name) | Self::Category(name) => name,
        }
    }
}

/// 字段修改：字段名 + 表达式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldModification {
    pub field: String,
    pub expression: String,
}

impl FieldModification {
    pub fn new(field: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            expression: expression.into(),
        }
    }
}

/// 批量变更规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub target: TargetSelector,
    /// 行选择条件，为空时选择全部记录
    #[serde(default)]
    pub selection: Option<Selection>,
    #[serde(default)]
    pub modifications: Vec<FieldModification>,
    #[serde(default)]
    pub status: RuleStatus,
    #[serde(default)]
    pub last_executed_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    pub fn new(name: impl Into<String>, target: TargetSelector) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            target,
            selection: None,
            modifications: Vec::new(),
            status: RuleStatus::Draft,
            last_executed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// 从 JSON 字符串解析
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn with_modification(
        mut self,
        field: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        self.modifications
            .push(FieldModification::new(field, expression));
        self
    }

    /// 校验规则结构并将状态置为 VALID
    pub fn mark_valid(&mut self) -> Result<()> {
        RuleValidator::validate(self)?;
        self.status = RuleStatus::Valid;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// 执行成功后更新状态与执行时间（选择器保持不变）
    pub(crate) fn mark_completed(&mut self, at: DateTime<Utc>) {
        self.status = RuleStatus::Completed;
        self.last_executed_at = Some(at);
        self.updated_at = at;
    }
}

/// 选择条件节点（条件或逻辑组）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Selection {
    Condition(Condition),
    Group(LogicalGroup),
}

impl Selection {
    pub fn condition(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self::Condition(Condition::new(field, operator, value))
    }

    pub fn and(children: Vec<Selection>) -> Self {
        Self::Group(LogicalGroup::and(children))
    }

    pub fn or(children: Vec<Selection>) -> Self {
        Self::Group(LogicalGroup::or(children))
    }
}

/// 条件节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

/// 逻辑组节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalGroup {
    pub operator: LogicalOperator,
    pub children: Vec<Selection>,
}

impl LogicalGroup {
    pub fn new(operator: LogicalOperator, children: Vec<Selection>) -> Self {
        Self { operator, children }
    }

    pub fn and(children: Vec<Selection>) -> Self {
        Self::new(LogicalOperator::And, children)
    }

    pub fn or(children: Vec<Selection>) -> Self {
        Self::new(LogicalOperator::Or, children)
    }
}
