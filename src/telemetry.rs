//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了同步引擎的日志和链路追踪初始化。

use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::trace::TracerProvider as SdkTracerProvider;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

/// 初始化日志和 OpenTelemetry Tracing
///
/// 此函数应该在应用程序启动时调用一次；重复调用时保留第一次安装的 subscriber。
///
/// # 参数
///
/// * `service_name` - 服务名称，用作 tracer 名称
/// * `filter` - 默认过滤表达式，设置了 `RUST_LOG` 时以环境变量为准
///
/// # 返回值
///
/// 是否成功安装了全局 subscriber
pub fn init_tracing(service_name: &str, filter: &str) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // 未配置导出器时 provider 不输出 span，只为 span 分配 trace 上下文
    let provider = SdkTracerProvider::builder().build();
    global::set_tracer_provider(provider.clone());
    let tracer = provider.tracer(service_name.to_string());

    let subscriber = Registry::default()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(tracing_opentelemetry::layer().with_tracer(tracer));

    tracing::subscriber::set_global_default(subscriber).is_ok()
}
