use anyhow::Context;
use codenav::{LspConfig, LspManager, LspTool, ToolResult};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

const CONFIG_ENV: &str = "CODENAV_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use std::fs::OpenOptions;
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    // stdout carries tool results, so logs go to a file.
    let log_path = std::env::temp_dir().join(format!("codenav-{}.log", std::process::id()));
    let log_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(log_file).with_ansi(false))
        .init();

    let root = match std::env::args().nth(1) {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    let root = std::path::absolute(&root)
        .with_context(|| format!("invalid workspace root {}", root.display()))?;

    let config = match std::env::var_os(CONFIG_ENV) {
        Some(path) => LspConfig::from_file(&PathBuf::from(path))?,
        None => LspConfig::default(),
    };

    info!(
        "codenav starting in {} (log: {})",
        root.display(),
        log_path.display()
    );

    let tool = LspTool::new(LspManager::new(config, root));
    let available = tool.manager().available_servers();
    info!("available servers: {:?}", available);

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("failed to read from stdin: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let result = match serde_json::from_str::<serde_json::Value>(&line) {
            Ok(args) => tool.execute(&args).await,
            Err(e) => {
                warn!("unparseable request: {}", e);
                ToolResult::failure(format!("invalid request: {}", e))
            }
        };

        let mut response = serde_json::to_vec(&result)?;
        response.push(b'\n');
        stdout.write_all(&response).await?;
        stdout.flush().await?;
    }

    info!("stdin closed, shutting down language servers");
    if let Err(e) = tool.shutdown().await {
        error!("{}", e);
    }
    Ok(())
}
