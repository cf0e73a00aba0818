//! 日志与追踪系统
//! 初始化结构化日志和指标收集

use crate::config::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 同步器使用的指标名称
pub mod metric_names {
    pub const REALTIME_EVENTS_APPLIED: &str = "realtime_events_applied_total";
    pub const OPTIMISTIC_ROLLBACKS: &str = "optimistic_rollbacks_total";
    pub const REFETCH_FAILURES: &str = "refetch_failures_total";
}

/// 初始化日志与追踪系统
pub fn init_telemetry(config: &AppConfig) {
    // 从环境变量构建过滤器
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    // 根据配置选择日志格式
    let log_layer = match config.logging.format.to_lowercase().as_str() {
        "json" => {
            // JSON 格式（生产环境）
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(false)
                .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
                .boxed()
        }
        "pretty" => {
            // 美化格式（开发环境）
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(false)
                .boxed()
        }
        _ => tracing_subscriber::fmt::layer().with_target(false).boxed(),
    };

    // 初始化 subscriber
    tracing_subscriber::registry()
        .with(env_filter)
        .with(log_layer)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = %config.logging.level,
        format = %config.logging.format,
        "Telemetry initialized"
    );
}

/// 初始化指标收集器
pub fn init_metrics() {
    // metrics 0.24 指标在首次使用时自动创建
    metrics::describe_counter!(
        metric_names::REALTIME_EVENTS_APPLIED,
        "Realtime events applied to the cache"
    );
    metrics::describe_counter!(
        metric_names::OPTIMISTIC_ROLLBACKS,
        "Optimistic mutations rolled back after a rejected request"
    );
    metrics::describe_counter!(
        metric_names::REFETCH_FAILURES,
        "Background refetches that failed"
    );
    tracing::debug!("Metrics initialized");
}
