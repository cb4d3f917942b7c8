//! 差异计算：逐条记录求新值、统计字段变化、生成警告

use crate::error::{EngineError, Result};
use crate::expression::CompiledExpression;
use crate::models::FieldModification;
use crate::result::{FieldChangeStats, PreviewWarning, RecordChange};
use crate::value::{FieldValue, Record};
use std::collections::BTreeMap;
use tracing::debug;

/// 标签候选列（按优先级）
const LABEL_COLUMNS: [&str; 5] = ["name", "title", "label", "display_name", "description"];

/// 标签列名关键字
const LABEL_HINTS: [&str; 3] = ["name", "title", "desc"];

/// 预编译的字段修改
#[derive(Debug, Clone)]
pub struct CompiledModification {
    pub field: String,
    pub expression: CompiledExpression,
}

/// 编译规则中的全部字段修改
pub fn compile_modifications(
    modifications: &[FieldModification],
) -> Result<Vec<CompiledModification>> {
    modifications
        .iter()
        .map(|m| {
            Ok(CompiledModification {
                field: m.field.clone(),
                expression: CompiledExpression::compile(&m.expression)?,
            })
        })
        .collect()
}

/// 警告阈值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarningThresholds {
    /// 匹配记录数上限
    pub large_batch: usize,
    /// 字段平均变化百分比（绝对值）上限
    pub change_percent: f64,
}

impl Default for WarningThresholds {
    fn default() -> Self {
        Self {
            large_batch: 1000,
            change_percent: 50.0,
        }
    }
}

/// 一次差异计算的结果
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub matched_count: usize,
    pub changes: Vec<RecordChange>,
    pub field_stats: BTreeMap<String, FieldChangeStats>,
    pub warnings: Vec<PreviewWarning>,
}

impl ChangeSet {
    /// 对匹配的记录计算差异
    pub fn build(
        rows: &[Record],
        key_column: &str,
        modifications: &[CompiledModification],
        thresholds: WarningThresholds,
    ) -> Result<Self> {
        let mut changes = Vec::new();
        for row in rows {
            if let Some(change) = build_change(row, key_column, modifications)? {
                changes.push(change);
            }
        }

        let field_stats = compute_stats(&changes);
        let warnings = collect_warnings(rows.len(), &field_stats, thresholds);

        Ok(Self {
            matched_count: rows.len(),
            changes,
            field_stats,
            warnings,
        })
    }
}

/// 计算单条记录的变更；所有字段都未变化时返回 None
///
/// 每个表达式都基于原始快照求值，字段修改之间互不可见。
pub fn build_change(
    row: &Record,
    key_column: &str,
    modifications: &[CompiledModification],
) -> Result<Option<RecordChange>> {
    let record_id = match row.get(key_column) {
        Some(value) if !value.is_null() => value.clone(),
        _ => {
            return Err(EngineError::Datastore(format!(
                "记录缺少主键列 '{}' 的值",
                key_column
            )));
        }
    };

    let mut original_values = BTreeMap::new();
    let mut new_values = BTreeMap::new();

    for modification in modifications {
        let before = row.get(&modification.field).cloned().unwrap_or_default();
        let after = modification.expression.evaluate(&modification.field, row)?;

        if after != before {
            original_values.insert(modification.field.clone(), before);
            new_values.insert(modification.field.clone(), after);
        }
    }

    if new_values.is_empty() {
        debug!(record_id = %record_id, "Record unchanged, skipping");
        return Ok(None);
    }

    Ok(Some(RecordChange {
        label: record_label(row, &record_id),
        record_id,
        original: row.clone(),
        original_values,
        new_values,
    }))
}

/// 记录的可读标签
pub fn record_label(row: &Record, record_id: &FieldValue) -> String {
    let preferred = LABEL_COLUMNS
        .iter()
        .filter_map(|column| row.get(*column))
        .find(|value| value.is_populated());

    let hinted = || {
        row.iter()
            .filter(|(column, _)| {
                let lower = column.to_lowercase();
                LABEL_HINTS.iter().any(|hint| lower.contains(hint))
            })
            .map(|(_, value)| value)
            .find(|value| value.is_populated())
    };

    match preferred.or_else(hinted) {
        Some(value) => value.to_string(),
        None => format!("#{}", record_id),
    }
}

#[derive(Default)]
struct Accumulator {
    before: Vec<f64>,
    after: Vec<f64>,
}

/// 按字段汇总数值变化
pub fn compute_stats(changes: &[RecordChange]) -> BTreeMap<String, FieldChangeStats> {
    let mut accumulators: BTreeMap<&str, Accumulator> = BTreeMap::new();

    for change in changes {
        for (field, after) in &change.new_values {
            let before = change.original_values.get(field).and_then(FieldValue::as_f64);
            if let (Some(before), Some(after)) = (before, after.as_f64()) {
                let acc = accumulators.entry(field.as_str()).or_default();
                acc.before.push(before);
                acc.after.push(after);
            }
        }
    }

    accumulators
        .into_iter()
        .map(|(field, acc)| {
            let (before_min, before_max, before_avg) = summarize(&acc.before);
            let (after_min, after_max, after_avg) = summarize(&acc.after);
            let avg_change = after_avg - before_avg;
            let avg_change_percent =
                (before_avg != 0.0).then(|| avg_change / before_avg.abs() * 100.0);

            let stats = FieldChangeStats {
                field: field.to_string(),
                count: acc.before.len(),
                before_min,
                before_max,
                before_avg,
                after_min,
                after_max,
                after_avg,
                avg_change,
                avg_change_percent,
            };
            (field.to_string(), stats)
        })
        .collect()
}

/// (min, max, avg)，调用方保证非空
fn summarize(values: &[f64]) -> (f64, f64, f64) {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    (min, max, avg)
}

/// 生成预览警告
pub fn collect_warnings(
    matched_count: usize,
    field_stats: &BTreeMap<String, FieldChangeStats>,
    thresholds: WarningThresholds,
) -> Vec<PreviewWarning> {
    let mut warnings = Vec::new();

    if matched_count == 0 {
        warnings.push(PreviewWarning::NoMatchingRecords);
    }

    if matched_count > thresholds.large_batch {
        warnings.push(PreviewWarning::LargeBlastRadius {
            matched: matched_count,
            threshold: thresholds.large_batch,
        });
    }

    for stats in field_stats.values() {
        if let Some(percent) = stats.avg_change_percent
            && percent.abs() > thresholds.change_percent
        {
            warnings.push(PreviewWarning::LargeAverageChange {
                field: stats.field.clone(),
                percent,
                threshold: thresholds.change_percent,
            });
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    fn compiled(pairs: &[(&str, &str)]) -> Vec<CompiledModification> {
        let modifications: Vec<FieldModification> = pairs
            .iter()
            .map(|(f, e)| FieldModification::new(*f, *e))
            .collect();
        compile_modifications(&modifications).unwrap()
    }

    #[test]
    fn test_only_changed_fields_recorded() {
        let row = record! { "id" => 1, "name" => "hammer", "price" => 100, "stock" => 5 };
        let mods = compiled(&[("price", "current * 2"), ("stock", "current")]);

        let change = build_change(&row, "id", &mods).unwrap().unwrap();
        assert_eq!(change.record_id, FieldValue::Int(1));
        assert_eq!(change.label, "hammer");
        assert_eq!(change.original_values, BTreeMap::from([("price".to_string(), FieldValue::Int(100))]));
        assert_eq!(change.new_values, BTreeMap::from([("price".to_string(), FieldValue::Int(200))]));
        assert_eq!(change.original, row);
    }

    #[test]
    fn test_unchanged_record_discarded() {
        let row = record! { "id" => 1, "price" => 10 };
        let mods = compiled(&[("price", "CLAMP(current, 0, 100)")]);
        assert!(build_change(&row, "id", &mods).unwrap().is_none());
    }

    #[test]
    fn test_modifications_see_original_snapshot() {
        let row = record! { "id" => 1, "a" => 1, "b" => 10 };
        let mods = compiled(&[("a", "b + 1"), ("b", "a + 100")]);
        let change = build_change(&row, "id", &mods).unwrap().unwrap();
        assert_eq!(change.new_values["a"], FieldValue::Int(11));
        assert_eq!(change.new_values["b"], FieldValue::Int(101));
    }

    #[test]
    fn test_missing_key_is_error() {
        let row = record! { "sku" => "A", "price" => 1 };
        let mods = compiled(&[("price", "2")]);
        assert!(build_change(&row, "id", &mods).is_err());
    }

    #[test]
    fn test_record_label_fallbacks() {
        let id = FieldValue::Int(9);
        assert_eq!(record_label(&record! { "title" => "Boss", "name" => "  " }, &id), "Boss");
        assert_eq!(record_label(&record! { "product_name" => "Drill" }, &id), "Drill");
        assert_eq!(record_label(&record! { "long_desc" => "A thing" }, &id), "A thing");
        assert_eq!(record_label(&record! { "price" => 1 }, &id), "#9");
    }

    #[test]
    fn test_stats_and_warnings() {
        let rows: Vec<Record> = (1..=4)
            .map(|i| record! { "id" => i, "price" => i * 10, "note" => "x" })
            .collect();
        let mods = compiled(&[("price", "current * 2"), ("note", "'y'")]);
        let set = ChangeSet::build(&rows, "id", &mods, WarningThresholds::default()).unwrap();

        assert_eq!(set.matched_count, 4);
        assert_eq!(set.changes.len(), 4);
        // 非数值字段不参与统计
        assert_eq!(set.field_stats.len(), 1);

        let stats = &set.field_stats["price"];
        assert_eq!(stats.before_min, 10.0);
        assert_eq!(stats.before_max, 40.0);
        assert_eq!(stats.before_avg, 25.0);
        assert_eq!(stats.after_avg, 50.0);
        assert_eq!(stats.avg_change, 25.0);
        assert_eq!(stats.avg_change_percent, Some(100.0));

        assert_eq!(
            set.warnings,
            vec![PreviewWarning::LargeAverageChange {
                field: "price".into(),
                percent: 100.0,
                threshold: 50.0,
            }]
        );
    }

    #[test]
    fn test_zero_before_average_has_no_percent() {
        let rows = vec![record! { "id" => 1, "stock" => 0 }];
        let set = ChangeSet::build(&rows, "id", &compiled(&[("stock", "10")]), WarningThresholds::default())
            .unwrap();
        assert_eq!(set.field_stats["stock"].avg_change_percent, None);
        assert!(set.warnings.is_empty());
    }

    #[test]
    fn test_blast_radius_and_empty_warnings() {
        let stats = BTreeMap::new();
        let thresholds = WarningThresholds::default();
        assert_eq!(
            collect_warnings(1001, &stats, thresholds),
            vec![PreviewWarning::LargeBlastRadius { matched: 1001, threshold: 1000 }]
        );
        assert!(collect_warnings(1000, &stats, thresholds).is_empty());
        assert_eq!(collect_warnings(0, &stats, thresholds), vec![PreviewWarning::NoMatchingRecords]);
    }
}
