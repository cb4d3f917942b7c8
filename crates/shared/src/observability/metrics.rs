//! 指标模块
//!
//! 基于 metrics 门面记录批量变更引擎的业务指标。
//! 库本身不安装导出器，宿主进程安装 recorder 后指标才会被采集。

/// 注册引擎指标描述
pub fn register_engine_metrics() {
    metrics::describe_counter!("mutation_previews_total", "Total number of rule previews");
    metrics::describe_counter!("mutation_executions_total", "Total number of rule executions");
    metrics::describe_counter!("mutation_rollbacks_total", "Total number of execution rollbacks");
    metrics::describe_histogram!("mutation_matched_rows", "Rows matched by a rule preview");
    metrics::describe_histogram!(
        "mutation_affected_rows",
        "Rows affected by a single execution or rollback"
    );
    metrics::describe_histogram!(
        "mutation_operation_duration_seconds",
        "Duration of preview/execute/rollback operations in seconds"
    );
}

/// 记录预览
#[inline]
pub fn record_preview(outcome: &str, matched: usize, duration_secs: f64) {
    metrics::counter!("mutation_previews_total", "outcome" => outcome.to_string()).increment(1);
    metrics::histogram!(
        "mutation_operation_duration_seconds",
        "operation" => "preview"
    )
    .record(duration_secs);
    metrics::histogram!("mutation_matched_rows").record(matched as f64);
}

/// 记录执行
#[inline]
pub fn record_execution(outcome: &str, affected: u64, duration_secs: f64) {
    metrics::counter!("mutation_executions_total", "outcome" => outcome.to_string())
        .increment(1);
    metrics::histogram!("mutation_affected_rows", "operation" => "execute").record(affected as f64);
    metrics::histogram!(
        "mutation_operation_duration_seconds",
        "operation" => "execute"
    )
    .record(duration_secs);
}

/// 记录回滚
#[inline]
pub fn record_rollback(outcome: &str, affected: u64, duration_secs: f64) {
    metrics::counter!("mutation_rollbacks_total", "outcome" => outcome.to_string()).increment(1);
    metrics::histogram!("mutation_affected_rows", "operation" => "rollback")
        .record(affected as f64);
    metrics::histogram!(
        "mutation_operation_duration_seconds",
        "operation" => "rollback"
    )
    .record(duration_secs);
}
