//! 规则校验器
//!
//! 校验规则结构：目标、字段修改列表、选择条件树。收集全部错误后一次性返回。

use crate::error::{EngineError, Result};
use crate::models::{Condition, Rule, Selection, TargetSelector};
use crate::operators::Operator;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;

/// 列名允许字母、数字、下划线与连字符（SQL 中统一加双引号）
static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]{0,62}$").expect("identifier pattern is valid")
});

/// 判断是否为合法的列名
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// 判断是否为合法的表名（允许 schema.table）
pub fn is_table_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2 && parts.iter().all(|p| is_identifier(p))
}

/// 规则校验器
pub struct RuleValidator;

impl RuleValidator {
    /// 校验规则，失败时返回包含所有错误的 `RuleValidation`
    pub fn validate(rule: &Rule) -> Result<()> {
        let errors = Self::collect_errors(rule);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::RuleValidation(errors))
        }
    }

    /// 收集规则的全部校验错误
    pub fn collect_errors(rule: &Rule) -> Vec<String> {
        let mut errors = Vec::new();

        if rule.id.trim().is_empty() {
            errors.push("规则 ID 不能为空".to_string());
        }

        if rule.name.trim().is_empty() {
            errors.push("规则名称不能为空".to_string());
        }

        match &rule.target {
            TargetSelector::Table(name) if !is_table_name(name) => {
                errors.push(format!("目标表名无效: '{}'", name));
            }
            TargetSelector::Category(name) if name.trim().is_empty() => {
                errors.push("目标类别不能为空".to_string());
            }
            _ => {}
        }

        Self::validate_modifications(rule, &mut errors);

        if let Some(selection) = &rule.selection {
            Self::validate_node(selection, "selection", &mut errors);
        }

        errors
    }

    fn validate_modifications(rule: &Rule, errors: &mut Vec<String>) {
        if rule.modifications.is_empty() {
            errors.push("至少需要一个字段修改".to_string());
            return;
        }

        let mut seen = HashSet::new();
        for (i, modification) in rule.modifications.iter().enumerate() {
            if !is_identifier(&modification.field) {
                errors.push(format!(
                    "modifications[{}] 的字段名无效: '{}'",
                    i, modification.field
                ));
            } else if !seen.insert(modification.field.as_str()) {
                errors.push(format!("字段 '{}' 被重复修改", modification.field));
            }

            if modification.expression.trim().is_empty() {
                errors.push(format!(
                    "modifications[{}] 字段 '{}' 的表达式不能为空",
                    i, modification.field
                ));
            }
        }
    }

    fn validate_node(node: &Selection, path: &str, errors: &mut Vec<String>) {
        match node {
            Selection::Condition(cond) => Self::validate_condition(cond, path, errors),
            Selection::Group(group) => {
                if group.children.is_empty() {
                    errors.push(format!("逻辑组 '{}' 不能为空", path));
                }

                for (i, child) in group.children.iter().enumerate() {
                    let child_path = format!("{}.children[{}]", path, i);
                    Self::validate_node(child, &child_path, errors);
                }
            }
        }
    }

    fn validate_condition(cond: &Condition, path: &str, errors: &mut Vec<String>) {
        if !is_identifier(&cond.field) {
            errors.push(format!("条件 '{}' 的字段名无效: '{}'", path, cond.field));
        }

        match cond.operator {
            Operator::Between => match &cond.value {
                Value::Array(arr) if arr.len() == 2 && arr.iter().all(is_scalar) => {}
                _ => errors.push(format!(
                    "条件 '{}' 的 between 操作符需要 [min, max] 数组",
                    path
                )),
            },
            Operator::In | Operator::NotIn => match &cond.value {
                Value::Array(arr) if arr.iter().all(is_scalar) => {}
                _ => errors.push(format!(
                    "条件 '{}' 的 {} 操作符需要标量数组",
                    path, cond.operator
                )),
            },
            Operator::Contains | Operator::StartsWith | Operator::EndsWith => {
                if !cond.value.is_string() {
                    errors.push(format!(
                        "条件 '{}' 的 {} 操作符需要字符串值",
                        path, cond.operator
                    ));
                }
            }
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                if !is_scalar(&cond.value) || cond.value.is_null() {
                    errors.push(format!(
                        "条件 '{}' 的 {} 操作符需要非空标量值",
                        path, cond.operator
                    ));
                }
            }
            Operator::Eq | Operator::Neq => {
                if !is_scalar(&cond.value) {
                    errors.push(format!("条件 '{}' 的比较值必须是标量", path));
                }
            }
            Operator::IsNull | Operator::IsNotNull => {
                // 这些操作符不需要值
            }
        }
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}
