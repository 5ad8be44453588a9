use joule_core::config::LogConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// # Summary
/// 安装全局日志订阅器。
///
/// # Logic
/// 1. `RUST_LOG` 优先，否则使用配置中的 `log.level`。
/// 2. 始终输出到标准输出。
/// 3. 配置了 `log.dir` 时额外按天滚动写入文件 (非阻塞)。
///
/// # Returns
/// 文件输出的后台写线程守卫，调用方必须持有到进程退出，否则尾部日志会丢失。
pub fn init(config: &LogConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer());

    match &config.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "joule.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}
