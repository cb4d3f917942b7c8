//! 执行历史
//!
//! 按时间倒序保存最近的正向执行结果，超出容量时淘汰最旧的记录。
//! 回滚前先原子地把记录置为 `RollingBack`，保证同一次执行只会被回滚一次。

use crate::error::{EngineError, Result};
use crate::result::{ExecutionResult, ExecutionState};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// 默认历史容量
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// 执行历史
#[cfg_attr(test, mockall::automock)]
pub trait ExecutionHistory: Send + Sync {
    /// 记录一次执行（最新的在最前）
    fn push(&self, result: ExecutionResult);

    fn get(&self, execution_id: &str) -> Option<ExecutionResult>;

    /// 将可回滚的执行置为 `RollingBack` 并返回其副本
    fn claim_for_rollback(&self, execution_id: &str) -> Result<ExecutionResult>;

    /// 回滚失败时恢复为 `Complete`
    fn release_claim(&self, execution_id: &str);

    /// 回滚成功后置为 `RolledBack`
    fn mark_rolled_back(&self, execution_id: &str);

    /// 全部记录，最新的在最前
    fn list(&self) -> Vec<ExecutionResult>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 有界的内存执行历史
#[derive(Debug)]
pub struct BoundedHistory {
    capacity: usize,
    entries: Mutex<VecDeque<ExecutionResult>>,
}

impl Default for BoundedHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl BoundedHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn transition(&self, execution_id: &str, from: ExecutionState, to: ExecutionState) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries
            .iter_mut()
            .find(|e| e.execution_id == execution_id && e.state == from)
        {
            entry.state = to;
        }
    }
}

impl ExecutionHistory for BoundedHistory {
    fn push(&self, result: ExecutionResult) {
        let mut entries = self.entries.lock();
        entries.push_front(result);
        entries.truncate(self.capacity);
    }

    fn get(&self, execution_id: &str) -> Option<ExecutionResult> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.execution_id == execution_id)
            .cloned()
    }

    fn claim_for_rollback(&self, execution_id: &str) -> Result<ExecutionResult> {
        let mut entries = self.entries.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.execution_id == execution_id)
            .ok_or_else(|| EngineError::RollbackNotFound(execution_id.to_string()))?;

        if !entry.can_rollback() {
            return Err(EngineError::RollbackNotAllowed {
                execution_id: execution_id.to_string(),
                state: entry.state.to_string(),
            });
        }

        entry.state = ExecutionState::RollingBack;
        Ok(entry.clone())
    }

    fn release_claim(&self, execution_id: &str) {
        self.transition(execution_id, ExecutionState::RollingBack, ExecutionState::Complete);
    }

    fn mark_rolled_back(&self, execution_id: &str) {
        self.transition(execution_id, ExecutionState::RollingBack, ExecutionState::RolledBack);
    }

    fn list(&self) -> Vec<ExecutionResult> {
        self.entries.lock().iter().cloned().collect()
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ExecutionKind;
    use std::sync::Arc;
    use std::thread;

    fn apply(name: &str) -> ExecutionResult {
        ExecutionResult::new(ExecutionKind::Apply, "rule", name)
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let history = BoundedHistory::new(3);
        let ids: Vec<String> = (0..5)
            .map(|i| {
                let result = apply(&format!("run-{}", i));
                let id = result.execution_id.clone();
                history.push(result);
                id
            })
            .collect();

        assert_eq!(history.len(), 3);
        let listed: Vec<String> = history.list().into_iter().map(|r| r.execution_id).collect();
        assert_eq!(listed, vec![ids[4].clone(), ids[3].clone(), ids[2].clone()]);
        assert!(history.get(&ids[0]).is_none());
    }

    #[test]
    fn test_default_capacity() {
        let history = BoundedHistory::default();
        for i in 0..60 {
            history.push(apply(&i.to_string()));
        }
        assert_eq!(history.capacity(), DEFAULT_HISTORY_CAPACITY);
        assert_eq!(history.len(), DEFAULT_HISTORY_CAPACITY);
    }

    #[test]
    fn test_claim_lifecycle() {
        let history = BoundedHistory::default();
        let result = apply("run");
        let id = result.execution_id.clone();
        history.push(result);

        let claimed = history.claim_for_rollback(&id).unwrap();
        assert_eq!(claimed.execution_id, id);
        assert_eq!(history.get(&id).unwrap().state, ExecutionState::RollingBack);

        // 进行中的回滚不能再次认领
        let err = history.claim_for_rollback(&id).unwrap_err();
        assert_eq!(err.code(), "ROLLBACK_NOT_ALLOWED");

        history.release_claim(&id);
        assert_eq!(history.get(&id).unwrap().state, ExecutionState::Complete);

        history.claim_for_rollback(&id).unwrap();
        history.mark_rolled_back(&id);
        assert_eq!(history.get(&id).unwrap().state, ExecutionState::RolledBack);
        assert!(matches!(
            history.claim_for_rollback(&id),
            Err(EngineError::RollbackNotAllowed { .. })
        ));
    }

    #[test]
    fn test_claim_unknown() {
        let history = BoundedHistory::default();
        assert!(matches!(
            history.claim_for_rollback("missing"),
            Err(EngineError::RollbackNotFound(_))
        ));
    }

    #[test]
    fn test_concurrent_claims_single_winner() {
        let history = Arc::new(BoundedHistory::default());
        let result = apply("run");
        let id = result.execution_id.clone();
        history.push(result);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let history = Arc::clone(&history);
                let id = id.clone();
                thread::spawn(move || history.claim_for_rollback(&id).is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
