//! 基于规则的批量数据变更引擎
//!
//! 规则描述目标记录集（表或类别 + 选择条件）与逐字段的取值表达式。引擎提供：
//! - `preview`：只读预演，给出逐条差异、字段统计与警告；
//! - `execute`：在单个事务中应用变更，生成一一对应的逆向语句；
//! - `rollback`：倒序执行逆向语句，精确恢复变更前的值。
//!
//! ## 示例
//!
//! ```no_run
//! use std::sync::Arc;
//! use mutation_engine::{MemoryStore, Rule, RuleEngine, TargetSelector, record};
//!
//! # async fn run() {
//! let store = MemoryStore::new();
//! store.create_table("products", Some("id"));
//! store.insert("products", record! { "id" => 1, "name" => "hammer", "price" => 100 });
//!
//! let engine = RuleEngine::new(Arc::new(store));
//! let mut rule = Rule::new("raise", TargetSelector::table("products"))
//!     .with_modification("price", "PERCENT_CHANGE(current, 20)");
//!
//! let preview = engine.preview(&rule).await;
//! assert_eq!(preview.changes.len(), 1);
//!
//! let executed = engine.execute(&mut rule).await;
//! engine.rollback(&executed.execution_id).await;
//! # }
//! ```

pub mod diff;
pub mod engine;
pub mod error;
pub mod expression;
pub mod history;
pub mod key;
pub mod models;
pub mod operators;
pub mod predicate;
pub mod registry;
pub mod result;
pub mod statement;
pub mod store;
pub mod validator;
pub mod value;

pub use engine::{RuleEngine, RuleEngineBuilder};
pub use error::{EngineError, Result};
pub use expression::{CompiledExpression, ExpressionEvaluator};
pub use history::{BoundedHistory, ExecutionHistory};
pub use key::KeyStrategy;
pub use models::{
    Condition, FieldModification, LogicalGroup, Rule, RuleStatus, Selection, TargetSelector,
};
pub use operators::{LogicalOperator, Operator};
pub use result::{
    ExecutionKind, ExecutionResult, ExecutionState, FieldChangeStats, PreviewResult,
    PreviewWarning, RecordChange,
};
pub use statement::{ColumnTypes, SelectStatement, UpdateStatement, format_literal};
pub use store::{MemoryStore, PgRecordStore, RecordStore, StoreSession};
pub use validator::RuleValidator;
pub use value::{FieldValue, Record};
