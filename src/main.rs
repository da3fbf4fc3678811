use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use tidelog::config::{self, Config};
use tidelog::{Level, Manager};

const USAGE: &str = "usage: tidelog <clean | tail | log <name> <level> <message...>>";

#[tokio::main]
async fn main() -> Result<()> {
    let manager = match std::env::var_os("TIDELOG_CONFIG") {
        Some(path) => Manager::with_config(Config::load(&PathBuf::from(path))?),
        None => Manager::default(),
    };
    let log_dir = manager.config().log_dir;
    std::fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Route tracing output BEFORE any tracing calls
    manager.install_system_log(&log_dir.join("tidelog_system.log"))?;

    let report = manager.clean();
    if !report.is_empty() {
        tracing::info!("Cleaned up {} old log files", report.files.len());
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("clean") => {
            for path in report.files.iter().chain(&report.aliases) {
                println!("removed {}", path.display());
            }
        }
        Some("tail") => {
            let mut stream = manager.watch_err().await?;
            tracing::info!(dir = %log_dir.display(), "Tailing error log");
            loop {
                tokio::select! {
                    line = stream.recv() => match line {
                        Some(line) => println!("{}", line),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            stream.stop().await;
        }
        Some("log") if args.len() >= 4 => {
            let level: Level = args[2].parse()?;
            let logger = manager.logger(&args[1]);
            logger.log(level, &args[3..].join(" "));
            manager.sync(logger.name())?;
        }
        _ => bail!(
            "{}\n(set {} or {} to choose the stream and directory)",
            USAGE,
            config::NAME_ENV_VAR,
            config::DIR_ENV_VAR
        ),
    }

    Ok(())
}
