use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use mt5_client::Mt5Client;
use mt5_core::config::AppConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 配置文件路径（不含扩展名），可选，环境变量优先
const CONFIG_PATH: &str = "config/gateway";

/// 覆盖 `CONFIG_PATH` 的环境变量
const CONFIG_PATH_VAR: &str = "MT5_CONFIG";

/// 环境变量前缀，`MT5__GATEWAY__BASE_URL` 对应 `gateway.base_url`
const ENV_PREFIX: &str = "MT5";

/// # Summary
/// 应用启动入口，组装配置、日志与网关客户端，检查一次连通性后等待退出信号。
///
/// # Logic
/// 1. 初始化全局日志（`RUST_LOG`，默认 `info`）。
/// 2. 从可选配置文件与环境变量加载 `AppConfig`。
/// 3. 构造客户端并检查网关：握手并查询账户总数。
/// 4. 等待 Ctrl-C，退出前丢弃会话。
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. 初始化日志
    let (writer, _log_guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(writer)
        .init();
    info!("MT5 manager client starting...");

    // 2. 加载配置
    let app_config = load_config()?;
    let gateway = &app_config.gateway;
    info!(id = %gateway.id, base_url = %gateway.base_url, login = %gateway.login, "gateway configured");

    // 3. 构造客户端并检查连通性
    let client = Mt5Client::from_config(gateway)?;
    client.ensure_authenticated().await?;
    let total = client.get_user_total().await?;
    info!(total, "gateway reachable");

    // 4. 等待退出信号
    tokio::signal::ctrl_c().await?;
    client.invalidate_session().await;
    info!("Shutdown signal received. Exiting...");

    Ok(())
}

/// # Summary
/// 加载应用配置。
///
/// # Logic
/// 1. 配置文件路径取 `MT5_CONFIG`，缺省为 `config/gateway`。
/// 2. 文件可选，再叠加环境变量。
///
/// # Returns
/// 反序列化后的 `AppConfig`。
fn load_config() -> Result<AppConfig, ConfigError> {
    let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| CONFIG_PATH.to_string());
    with_environment(Config::builder().add_source(File::with_name(&path).required(false)))
}

/// 在已有配置源之上叠加 `MT5__*` 环境变量并反序列化
fn with_environment(builder: ConfigBuilder<DefaultState>) -> Result<AppConfig, ConfigError> {
    builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}
