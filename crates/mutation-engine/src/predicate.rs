//! 选择条件的内存求值
//!
//! 语义与生成的 SQL `WHERE` 子句保持一致：
//! - 空值字段只匹配 `is_null`，其他比较一律不匹配；
//! - `eq null` / `neq null` 等价于 `is_null` / `is_not_null`；
//! - 逻辑组短路求值。

use crate::error::{EngineError, Result};
use crate::models::{Condition, LogicalGroup, Selection};
use crate::operators::{LogicalOperator, Operator};
use crate::value::{FieldValue, Record};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use uuid::Uuid;

/// 将条件中的 JSON 值转换为字段值
///
/// 字符串始终保持为文本，由列的实际类型决定如何比较：
/// SQL 中按列类型转换参数，内存中由 `compare_values` 解析。
pub fn condition_value(value: &Value) -> FieldValue {
    FieldValue::from_json(value)
}

/// 条件数组值（between / in / not_in）
pub(crate) fn condition_values(cond: &Condition) -> Result<Vec<FieldValue>> {
    cond.value
        .as_array()
        .map(|arr| arr.iter().map(condition_value).collect())
        .ok_or_else(|| EngineError::TypeMismatch {
            expected: "array".to_string(),
            actual: json_type_name(&cond.value).to_string(),
        })
}

/// 比较两个字段值，类型不可比较时返回 None
pub fn compare_values(a: &FieldValue, b: &FieldValue) -> Option<Ordering> {
    use FieldValue::*;

    match (a, b) {
        (Decimal(x), Decimal(y)) => Some(x.cmp(y)),
        (Int(x), Int(y)) => Some(x.cmp(y)),
        (x, y) if x.is_numeric() && y.is_numeric() => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Text(x), Text(y)) => Some(x.cmp(y)),
        (Bool(x), Bool(y)) => Some(x.cmp(y)),
        (Timestamp(x), Timestamp(y)) => Some(x.cmp(y)),
        (Timestamp(x), Text(y)) => parse_timestamp(y).map(|y| x.cmp(&y)),
        (Text(x), Timestamp(y)) => parse_timestamp(x).map(|x| x.cmp(y)),
        (Uuid(x), Uuid(y)) => Some(x.cmp(y)),
        (Uuid(x), Text(y)) => match uuid::Uuid::parse_str(y) {
            Ok(y) => Some(x.cmp(&y)),
            Err(_) => Some(x.to_string().as_str().cmp(y.as_str())),
        },
        (Text(_), Uuid(_)) => compare_values(b, a).map(Ordering::reverse),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// 选择条件匹配器
pub struct SelectionMatcher;

impl SelectionMatcher {
    /// 判断记录是否满足选择条件；未指定条件时匹配全部记录
    pub fn matches(selection: Option<&Selection>, record: &Record) -> Result<bool> {
        match selection {
            Some(node) => Self::evaluate_node(node, record),
            None => Ok(true),
        }
    }

    fn evaluate_node(node: &Selection, record: &Record) -> Result<bool> {
        match node {
            Selection::Condition(cond) => Self::evaluate_condition(cond, record),
            Selection::Group(group) => Self::evaluate_group(group, record),
        }
    }

    fn evaluate_group(group: &LogicalGroup, record: &Record) -> Result<bool> {
        match group.operator {
            LogicalOperator::And => {
                for child in &group.children {
                    if !Self::evaluate_node(child, record)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            LogicalOperator::Or => {
                for child in &group.children {
                    if Self::evaluate_node(child, record)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    fn evaluate_condition(cond: &Condition, record: &Record) -> Result<bool> {
        let field = record.get(&cond.field).unwrap_or(&FieldValue::Null);

        match cond.operator {
            Operator::IsNull => return Ok(field.is_null()),
            Operator::IsNotNull => return Ok(!field.is_null()),
            Operator::Eq if cond.value.is_null() => return Ok(field.is_null()),
            Operator::Neq if cond.value.is_null() => return Ok(!field.is_null()),
            Operator::NotIn if cond.value.as_array().is_some_and(|a| a.is_empty()) => {
                return Ok(true);
            }
            _ => {}
        }

        if field.is_null() {
            return Ok(false);
        }

        match cond.operator {
            Operator::Eq => Ok(Self::eq(field, &condition_value(&cond.value))),
            Operator::Neq => Ok(!Self::eq(field, &condition_value(&cond.value))),
            Operator::Gt => Self::ordered(field, &cond.value, |o| o == Ordering::Greater),
            Operator::Gte => Self::ordered(field, &cond.value, |o| o != Ordering::Less),
            Operator::Lt => Self::ordered(field, &cond.value, |o| o == Ordering::Less),
            Operator::Lte => Self::ordered(field, &cond.value, |o| o != Ordering::Greater),
            Operator::Between => Self::between(field, cond),
            Operator::In => Self::in_list(field, cond),
            Operator::NotIn => Self::in_list(field, cond).map(|r| !r),
            Operator::Contains => Self::text_match(field, &cond.value, |s, p| s.contains(p)),
            Operator::StartsWith => Self::text_match(field, &cond.value, |s, p| s.starts_with(p)),
            Operator::EndsWith => Self::text_match(field, &cond.value, |s, p| s.ends_with(p)),
            Operator::IsNull | Operator::IsNotNull => unreachable!(),
        }
    }

    fn eq(field: &FieldValue, expected: &FieldValue) -> bool {
        compare_values(field, expected) == Some(Ordering::Equal)
    }

    fn ordered<F>(field: &FieldValue, expected: &Value, accept: F) -> Result<bool>
    where
        F: Fn(Ordering) -> bool,
    {
        let expected = condition_value(expected);
        Self::order(field, &expected).map(accept)
    }

    fn order(field: &FieldValue, expected: &FieldValue) -> Result<Ordering> {
        compare_values(field, expected).ok_or_else(|| EngineError::TypeMismatch {
            expected: field.type_name().to_string(),
            actual: expected.type_name().to_string(),
        })
    }

    /// 闭区间 [min, max]
    fn between(field: &FieldValue, cond: &Condition) -> Result<bool> {
        let bounds = condition_values(cond)?;
        let [min, max] = bounds.as_slice() else {
            return Err(EngineError::TypeMismatch {
                expected: "array [min, max]".to_string(),
                actual: format!("array of {}", bounds.len()),
            });
        };

        Ok(Self::order(field, min)? != Ordering::Less
            && Self::order(field, max)? != Ordering::Greater)
    }

    fn in_list(field: &FieldValue, cond: &Condition) -> Result<bool> {
        Ok(condition_values(cond)?
            .iter()
            .any(|item| Self::eq(field, item)))
    }

    fn text_match<F>(field: &FieldValue, expected: &Value, matcher: F) -> Result<bool>
    where
        F: Fn(&str, &str) -> bool,
    {
        let text = field.as_str().ok_or_else(|| EngineError::TypeMismatch {
            expected: "text".to_string(),
            actual: field.type_name().to_string(),
        })?;

        let pattern = expected.as_str().ok_or_else(|| EngineError::TypeMismatch {
            expected: "string".to_string(),
            actual: json_type_name(expected).to_string(),
        })?;

        Ok(matcher(text, pattern))
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
