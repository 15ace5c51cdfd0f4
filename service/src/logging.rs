use tracing_subscriber::EnvFilter;

/// 安装日志订阅器
///
/// `RUST_LOG` 优先，否则使用配置中的级别。`log` 宏产生的记录同样会被输出。
/// 重复调用不会报错。
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok();

    if installed {
        log::debug!("[Redact] 日志已初始化: {}", default_level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_logging("debug");
        init_logging("not a level ===");
        log::info!("[Redact] logging smoke test");
    }
}
