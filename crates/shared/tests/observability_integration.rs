//! 可观测性模块集成测试
//!
//! 测试 metrics 与 tracing 模块的核心功能。

// ============================================================================
// 指标记录测试
// ============================================================================

mod metrics_tests {
    use mutation_shared::observability::metrics::{
        record_execution, record_preview, record_rollback, register_engine_metrics,
    };

    #[test]
    fn test_register_engine_metrics() {
        // 未安装 recorder 时描述指标应为空操作
        register_engine_metrics();
        register_engine_metrics();
    }

    #[test]
    fn test_record_preview() {
        record_preview("success", 12, 0.01);
        record_preview("no_match", 0, 0.002);
        record_preview("failed", 0, 0.001);
    }

    #[test]
    fn test_record_execution() {
        record_execution("success", 12, 0.2);
        record_execution("failed", 0, 0.05);
    }

    #[test]
    fn test_record_rollback() {
        record_rollback("success", 12, 0.1);
        record_rollback("not_allowed", 0, 0.0);
    }
}

// ============================================================================
// Tracing 初始化测试
// ============================================================================

mod tracing_tests {
    use mutation_shared::config::ObservabilityConfig;
    use mutation_shared::observability;

    #[test]
    fn test_init_only_once() {
        let config = ObservabilityConfig::default().with_service_name("observability-test");

        let first = observability::init(&config);
        assert!(first.is_ok());

        // 全局订阅者已设置，再次初始化应返回错误而不是 panic
        let second = observability::init(&config);
        assert!(second.is_err());
    }

    #[test]
    fn test_empty_guard() {
        let _guard = observability::ObservabilityGuard::empty();
    }
}
