//! 数据存储接口
//!
//! 引擎只依赖两个 trait：`RecordStore` 负责开启会话，`StoreSession` 在一个事务内
//! 完成查询、更新与表结构查询，最后提交或回滚。

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgRecordStore;

use crate::error::Result;
use crate::statement::{ColumnTypes, SelectStatement, UpdateStatement};
use crate::value::Record;
use async_trait::async_trait;
use mutation_shared::config::IsolationLevel;

/// 记录存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 以指定隔离级别开启一个事务会话
    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn StoreSession>>;
}

/// 事务会话
///
/// 会话在 `commit` 之前的所有写入对其他会话不可见；未提交即丢弃等同于回滚。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoreSession: Send {
    /// 查询满足条件的记录
    async fn query(&mut self, statement: &SelectStatement) -> Result<Vec<Record>>;

    /// 执行更新，每个被更新的行返回一条记录，包含被赋值列写入后的实际值
    ///
    /// 守卫条件不满足时返回空列表。
    async fn execute(&mut self, statement: &UpdateStatement) -> Result<Vec<Record>>;

    /// 表的主键列（无主键时为空）
    async fn primary_key(&mut self, table: &str) -> Result<Vec<String>>;

    /// 表的列类型；存储不提供类型信息时为空
    async fn column_types(&mut self, table: &str) -> Result<ColumnTypes>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}
