//! TagMesh CLI - 标签注册表交互终端

mod command;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use tm_durable::{RegistryConfig, RegistryManager, SqliteSnapshotStore, SqliteStoreConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::command::{Command, Session};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tagmesh=info,tm_durable=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 数据库路径: 命令行参数 > TAGMESH_DB > 默认值
    let mut store_config = SqliteStoreConfig::default();
    if let Some(path) = std::env::args().nth(1).or_else(|| std::env::var("TAGMESH_DB").ok()) {
        store_config.database_path = path;
    }

    let store = SqliteSnapshotStore::connect(store_config).await?;
    let manager = RegistryManager::new(Arc::new(store), RegistryConfig::default());
    let mut session = Session::new(manager, "default");

    println!("TagMesh CLI v{}", env!("CARGO_PKG_VERSION"));
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("tagmesh[{}]> ", session.owner());
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }
        if input.trim().is_empty() {
            continue;
        }

        let command = match command::parse(&input) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                println!("Type 'help' for available commands.");
                continue;
            }
        };
        let quit = command == Command::Quit;

        match session.execute(command).await {
            Ok(output) => println!("{}", output),
            Err(e) => {
                tracing::error!("Command failed: {:#}", e);
                println!("Error: {:#}", e);
            }
        }

        if quit {
            break;
        }
    }

    Ok(())
}
