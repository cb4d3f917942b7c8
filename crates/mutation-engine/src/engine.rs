//! 批量变更引擎
//!
//! ## 流程
//!
//! 1. `preview`：校验规则 -> 解析目标表 -> 只读会话中查询匹配记录 -> 计算差异、统计与警告
//! 2. `execute`：在单个事务中加行锁重新计算差异 -> 逐条执行带守卫的更新 -> 以存储值生成逆向语句 -> 提交 -> 写入历史
//! 3. `rollback`：认领历史记录 -> 单个事务中倒序执行逆向语句 -> 提交 -> 标记为已回滚
//!
//! 三个操作都不会返回 `Err`，所有错误都转换为带错误信息与错误码的失败结果。

use crate::diff::{ChangeSet, CompiledModification, WarningThresholds, compile_modifications};
use crate::error::{EngineError, Result};
use crate::history::{BoundedHistory, ExecutionHistory};
use crate::key::KeyStrategy;
use crate::models::{Rule, Selection};
use crate::registry::TableRegistry;
use crate::result::{ExecutionKind, ExecutionResult, PreviewResult, RecordChange};
use crate::statement::{ColumnTypes, SelectStatement, UpdateStatement};
use crate::store::{RecordStore, StoreSession};
use crate::validator::RuleValidator;
use mutation_shared::config::{EngineConfig, IsolationLevel};
use mutation_shared::observability::metrics;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// 校验并编译后的规则
struct PreparedRule {
    table: String,
    modifications: Vec<CompiledModification>,
}

/// 在会话中计算出的差异
struct DerivedChanges {
    key_column: String,
    column_types: ColumnTypes,
    change_set: ChangeSet,
}

/// 规则批量变更引擎
pub struct RuleEngine {
    store: Arc<dyn RecordStore>,
    history: Arc<dyn ExecutionHistory>,
    registry: TableRegistry,
    key_strategy: KeyStrategy,
    thresholds: WarningThresholds,
    isolation: IsolationLevel,
}

impl RuleEngine {
    /// 使用默认配置创建引擎
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::builder(store).build()
    }

    pub fn builder(store: Arc<dyn RecordStore>) -> RuleEngineBuilder {
        RuleEngineBuilder::new(store)
    }

    /// 按引擎配置创建
    pub fn from_config(store: Arc<dyn RecordStore>, config: &EngineConfig) -> Self {
        Self::builder(store).config(config).build()
    }

    /// 执行历史（可在多个组件间共享）
    pub fn history(&self) -> Arc<dyn ExecutionHistory> {
        Arc::clone(&self.history)
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    /// 预览规则的执行效果，不写入任何数据
    #[instrument(skip(self, rule), fields(rule_id = %rule.id, rule_name = %rule.name))]
    pub async fn preview(&self, rule: &Rule) -> PreviewResult {
        let start = Instant::now();
        let mut result = PreviewResult::new(&rule.id, &rule.name);

        match self.try_preview(rule, &mut result).await {
            Ok(()) => {
                info!(
                    table = result.table.as_deref().unwrap_or_default(),
                    matched = result.matched_count,
                    changed = result.changes.len(),
                    warnings = result.warnings.len(),
                    "Rule preview completed"
                );
                metrics::record_preview("success", result.matched_count, start.elapsed().as_secs_f64());
                result
            }
            Err(e) => {
                warn!(error = %e, code = e.code(), "Rule preview failed");
                metrics::record_preview("failure", 0, start.elapsed().as_secs_f64());
                result.failed(&e)
            }
        }
    }

    async fn try_preview(&self, rule: &Rule, result: &mut PreviewResult) -> Result<()> {
        let prepared = self.prepare(rule)?;
        result.table = Some(prepared.table.clone());

        let mut session = self.store.begin(self.isolation).await?;
        let derived = self
            .derive(session.as_mut(), &prepared, rule.selection.as_ref(), false)
            .await;

        // 预览只读，会话总是回滚
        if let Err(e) = session.rollback().await {
            warn!(error = %e, "Failed to release preview session");
        }

        let change_set = derived?.change_set;
        result.matched_count = change_set.matched_count;
        result.changes = change_set.changes;
        result.field_stats = change_set.field_stats;
        result.warnings = change_set.warnings;
        Ok(())
    }

    /// 执行规则
    ///
    /// 成功后规则状态置为 `Completed` 并记录执行时间；有实际更新时结果写入历史。
    /// 失败时事务回滚，规则保持不变。
    #[instrument(skip(self, rule), fields(rule_id = %rule.id, rule_name = %rule.name))]
    pub async fn execute(&self, rule: &mut Rule) -> ExecutionResult {
        let start = Instant::now();
        let mut result = ExecutionResult::new(ExecutionKind::Apply, &rule.id, &rule.name);

        match self.try_execute(rule, &mut result).await {
            Ok(()) => {
                let result = result.complete();
                rule.mark_completed(result.finished_at.unwrap_or(result.started_at));

                if result.applied_statements.is_empty() {
                    debug!("No rows changed, execution not recorded in history");
                } else {
                    self.history.push(result.clone());
                }

                info!(
                    execution_id = %result.execution_id,
                    table = result.table.as_deref().unwrap_or_default(),
                    affected = result.affected_count,
                    statements = result.applied_statements.len(),
                    "Rule executed"
                );
                metrics::record_execution("success", result.affected_count, start.elapsed().as_secs_f64());
                result
            }
            Err(e) => {
                warn!(error = %e, code = e.code(), "Rule execution failed, transaction rolled back");
                metrics::record_execution("failure", 0, start.elapsed().as_secs_f64());
                result.failed(&e)
            }
        }
    }

    async fn try_execute(&self, rule: &Rule, result: &mut ExecutionResult) -> Result<()> {
        let prepared = self.prepare(rule)?;
        result.table = Some(prepared.table.clone());

        let mut session = self.store.begin(self.isolation).await?;
        match self.apply_changes(session.as_mut(), &prepared, rule, result).await {
            Ok(()) => session.commit().await,
            Err(e) => {
                if let Err(rollback_err) = session.rollback().await {
                    warn!(error = %rollback_err, "Failed to roll back execution transaction");
                }
                Err(e)
            }
        }
    }

    async fn apply_changes(
        &self,
        session: &mut dyn StoreSession,
        prepared: &PreparedRule,
        rule: &Rule,
        result: &mut ExecutionResult,
    ) -> Result<()> {
        let DerivedChanges {
            key_column,
            column_types,
            change_set,
        } = self
            .derive(session, prepared, rule.selection.as_ref(), true)
            .await?;

        if change_set.matched_count == 0 {
            info!(table = %prepared.table, "No matching records");
        }

        let mut changes = Vec::with_capacity(change_set.changes.len());
        for mut change in change_set.changes {
            let apply = apply_statement(&prepared.table, &key_column, &change).with_column_types(&column_types);

            let stored = session.execute(&apply).await?;
            let Some(stored_values) = stored.first() else {
                return Err(EngineError::ConcurrentModification {
                    table: prepared.table.clone(),
                    key: change.record_id.to_string(),
                });
            };

            // 列类型可能对写入值舍入，逆向守卫以存储值为准
            for (field, value) in stored_values {
                if let Some(new_value) = change.new_values.get_mut(field)
                    && new_value != value
                {
                    debug!(field = %field, computed = %new_value, stored = %value, "Stored value differs from computed value");
                    *new_value = value.clone();
                }
            }

            let inverse = inverse_statement(&prepared.table, &key_column, &change).with_column_types(&column_types);
            let affected = stored.len() as u64;

            debug!(record_id = %change.record_id, affected, "Applied record change");
            result.affected_count += affected;
            result.applied_statements.push(apply);
            result.inverse_statements.push(inverse);
            changes.push(change);
        }

        result.changes = changes;
        Ok(())
    }

    /// 回滚一次执行
    ///
    /// 只有状态为 `Complete` 的正向执行可以回滚；回滚失败时原执行恢复为可回滚状态。
    #[instrument(skip(self))]
    pub async fn rollback(&self, execution_id: &str) -> ExecutionResult {
        let start = Instant::now();

        let original = match self.history.claim_for_rollback(execution_id) {
            Ok(original) => original,
            Err(e) => {
                warn!(error = %e, code = e.code(), "Rollback rejected");
                metrics::record_rollback("rejected", 0, start.elapsed().as_secs_f64());
                let mut result = match self.history.get(execution_id) {
                    Some(existing) => ExecutionResult::new(
                        ExecutionKind::Rollback,
                        existing.rule_id,
                        existing.rule_name,
                    ),
                    None => ExecutionResult::new(ExecutionKind::Rollback, "", ""),
                };
                result.rollback_of = Some(execution_id.to_string());
                return result.failed(&e);
            }
        };

        let mut result =
            ExecutionResult::new(ExecutionKind::Rollback, &original.rule_id, &original.rule_name);
        result.table = original.table.clone();
        result.rollback_of = Some(original.execution_id.clone());

        match self.try_rollback(&original, &mut result).await {
            Ok(()) => {
                self.history.mark_rolled_back(execution_id);
                info!(
                    rollback_id = %result.execution_id,
                    affected = result.affected_count,
                    "Execution rolled back"
                );
                metrics::record_rollback("success", result.affected_count, start.elapsed().as_secs_f64());
                result.complete()
            }
            Err(e) => {
                self.history.release_claim(execution_id);
                warn!(error = %e, code = e.code(), "Rollback failed, execution remains rollback-able");
                metrics::record_rollback("failure", 0, start.elapsed().as_secs_f64());
                result.failed(&e)
            }
        }
    }

    async fn try_rollback(&self, original: &ExecutionResult, result: &mut ExecutionResult) -> Result<()> {
        let mut session = self.store.begin(self.isolation).await?;

        match self.revert(session.as_mut(), original, result).await {
            Ok(()) => session.commit().await,
            Err(e) => {
                if let Err(rollback_err) = session.rollback().await {
                    warn!(error = %rollback_err, "Failed to roll back rollback transaction");
                }
                Err(e)
            }
        }
    }

    async fn revert(
        &self,
        session: &mut dyn StoreSession,
        original: &ExecutionResult,
        result: &mut ExecutionResult,
    ) -> Result<()> {
        // 逆向语句倒序执行
        let pairs = original
            .inverse_statements
            .iter()
            .zip(original.applied_statements.iter())
            .rev();

        for (inverse, applied) in pairs {
            let restored = session.execute(inverse).await?;
            if restored.is_empty() {
                return Err(EngineError::ConcurrentModification {
                    table: inverse.table.clone(),
                    key: inverse.key_display(),
                });
            }
            result.affected_count += restored.len() as u64;
            result.applied_statements.push(inverse.clone());
            result.inverse_statements.push(applied.clone());
        }

        result.changes = original.changes.iter().rev().map(reverse_change).collect();
        Ok(())
    }

    fn prepare(&self, rule: &Rule) -> Result<PreparedRule> {
        RuleValidator::validate(rule)?;
        let table = self.registry.resolve(&rule.target)?;
        let modifications = compile_modifications(&rule.modifications)?;
        Ok(PreparedRule {
            table,
            modifications,
        })
    }

    async fn derive(
        &self,
        session: &mut dyn StoreSession,
        prepared: &PreparedRule,
        selection: Option<&Selection>,
        lock_rows: bool,
    ) -> Result<DerivedChanges> {
        let key_column = self.key_strategy.resolve(&prepared.table, session).await?;
        let column_types = session.column_types(&prepared.table).await?;

        let mut select = SelectStatement::new(&prepared.table)
            .with_selection(selection.cloned())
            .with_column_types(&column_types)
            .order_by(&key_column);
        if lock_rows {
            select = select.for_update();
        }

        let rows = session.query(&select).await?;
        debug!(table = %prepared.table, rows = rows.len(), "Fetched matching rows");

        let change_set = ChangeSet::build(&rows, &key_column, &prepared.modifications, self.thresholds)?;
        Ok(DerivedChanges {
            key_column,
            column_types,
            change_set,
        })
    }
}

/// 写入新值，守卫为原值
fn apply_statement(table: &str, key_column: &str, change: &RecordChange) -> UpdateStatement {
    let mut statement = UpdateStatement::new(table, key_column, change.record_id.clone());
    for (field, value) in &change.new_values {
        statement = statement.set(field, value.clone());
    }
    for (field, value) in &change.original_values {
        statement = statement.guard(field, value.clone());
    }
    statement
}

/// 写回原值，守卫为存储后的新值；主键列本身被修改时按新主键定位
fn inverse_statement(table: &str, key_column: &str, change: &RecordChange) -> UpdateStatement {
    let key_value = change
        .new_values
        .get(key_column)
        .cloned()
        .unwrap_or_else(|| change.record_id.clone());

    let mut statement = UpdateStatement::new(table, key_column, key_value);
    for (field, value) in &change.original_values {
        statement = statement.set(field, value.clone());
    }
    for (field, value) in &change.new_values {
        statement = statement.guard(field, value.clone());
    }
    statement
}

/// 回滚结果中的变更：新旧值互换
fn reverse_change(change: &RecordChange) -> RecordChange {
    let mut original = change.original.clone();
    original.extend(change.new_values.clone());

    RecordChange {
        record_id: change.record_id.clone(),
        label: change.label.clone(),
        original,
        original_values: change.new_values.clone(),
        new_values: change.original_values.clone(),
    }
}

/// 引擎构建器
pub struct RuleEngineBuilder {
    store: Arc<dyn RecordStore>,
    history: Option<Arc<dyn ExecutionHistory>>,
    history_capacity: usize,
    registry: TableRegistry,
    key_strategy: KeyStrategy,
    thresholds: WarningThresholds,
    isolation: IsolationLevel,
}

impl RuleEngineBuilder {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let defaults = EngineConfig::default();
        Self {
            store,
            history: None,
            history_capacity: defaults.history_capacity,
            registry: TableRegistry::new(),
            key_strategy: KeyStrategy::default(),
            thresholds: WarningThresholds::default(),
            isolation: defaults.isolation_level,
        }
    }

    /// 应用引擎配置（类别映射、主键策略、阈值、历史容量、隔离级别）
    pub fn config(mut self, config: &EngineConfig) -> Self {
        self.history_capacity = config.history_capacity;
        self.registry = TableRegistry::from(&config.categories);
        self.key_strategy = KeyStrategy::from(&config.primary_key);
        self.thresholds = WarningThresholds {
            large_batch: config.large_batch_threshold,
            change_percent: config.change_warning_percent,
        };
        self.isolation = config.isolation_level;
        self
    }

    /// 注入共享的执行历史
    pub fn history(mut self, history: Arc<dyn ExecutionHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn category(mut self, category: &str, table: impl Into<String>) -> Self {
        self.registry.register(category, table);
        self
    }

    pub fn key_strategy(mut self, strategy: KeyStrategy) -> Self {
        self.key_strategy = strategy;
        self
    }

    pub fn thresholds(mut self, thresholds: WarningThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn build(self) -> RuleEngine {
        let history = self
            .history
            .unwrap_or_else(|| Arc::new(BoundedHistory::new(self.history_capacity)));

        RuleEngine {
            store: self.store,
            history,
            registry: self.registry,
            key_strategy: self.key_strategy,
            thresholds: self.thresholds,
            isolation: self.isolation,
        }
    }
}
