//! TaskMaster 核心服务入口

use std::sync::Arc;
use std::time::Duration;
use taskmaster_core::{
    cache::CacheStore,
    config::AppConfig,
    middleware::AppState,
    models::role::RoleRegistry,
    notify::{LogNotifier, Notifier},
    realtime::{EventBus, RealtimeSynchronizer},
    remote::{Fetcher, RestFetcher},
    routes,
    services::{CacheLoader, PermissionService, RefetchWorker},
    telemetry,
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ===== CLI 参数处理 =====
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("taskmaster-core {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("未知参数: {}", args[1]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    // 加载 .env 文件（开发环境）
    // 按优先级加载：.env.local > .env
    if let Ok(env) = std::env::var("TASKMASTER_ENV") {
        dotenv::from_filename(format!(".env.{}", env)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();
    }

    // 1. 加载配置
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志与指标
    telemetry::init_telemetry(&config);
    telemetry::init_metrics();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "TaskMaster core starting...");

    // 3. 角色注册表
    let registry = match &config.access.registry_path {
        Some(path) => {
            tracing::info!(path = %path, "Loading role registry");
            RoleRegistry::from_file(path)?
        }
        None => RoleRegistry::default(),
    };
    let permission_service = Arc::new(PermissionService::new(Arc::new(registry)));

    // 4. 缓存、事件总线与同步器
    let cache = Arc::new(CacheStore::new());
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let event_bus = Arc::new(EventBus::new(config.realtime.bus_capacity));

    let synchronizer = Arc::new(RealtimeSynchronizer::new(cache.clone(), notifier.clone()));
    let receiver = event_bus.subscribe();
    tokio::spawn(async move { synchronizer.run(receiver).await });

    let mut app_state = AppState::new(config.clone(), permission_service, cache.clone(), event_bus);

    // 5. 首次拉取与后台重新拉取（需要后端地址）
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let refetch_handle = match &config.api.base_url {
        Some(base_url) => {
            let fetcher: Arc<dyn Fetcher> = Arc::new(RestFetcher::new(base_url, &config.api)?);
            let loader = Arc::new(CacheLoader::new(cache.clone(), fetcher.clone()));
            app_state = app_state.with_loader(loader);

            let worker = RefetchWorker::new(cache, fetcher, notifier, config.refetch.clone());
            Some(tokio::spawn(async move { worker.run(shutdown_rx).await }))
        }
        None => {
            tracing::warn!(
                "No API base URL configured, cache misses and stale entries will not be fetched"
            );
            None
        }
    };
    let app_state = Arc::new(app_state);

    // 6. 构建路由并启动服务器
    let app = routes::create_router(app_state);
    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(addr = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 7. 停止后台任务，超时后直接退出
    let _ = shutdown_tx.send(true);
    if let Some(handle) = refetch_handle {
        let timeout = Duration::from_secs(config.server.graceful_shutdown_timeout_secs);
        if tokio::time::timeout(timeout, handle).await.is_err() {
            tracing::warn!("Graceful shutdown timeout reached, forcing exit");
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }
}

/// 打印帮助信息
fn print_help() {
    println!("taskmaster-core {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: taskmaster-core [选项]");
    println!();
    println!("选项:");
    println!("  --version     打印版本信息并退出");
    println!("  --help        打印此帮助信息并退出");
    println!();
    println!("环境变量:");
    println!("  所有配置通过 TASKMASTER_ 前缀的环境变量完成，层级用 __ 分隔");
    println!("  例如 TASKMASTER_API__BASE_URL=https://api.example.com");
}
