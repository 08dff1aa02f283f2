// Logging module
use colored::*;
use log::{Level, LevelFilter};
use std::fs::{self, OpenOptions};
use std::path::Path;

/// Format log level with color for console
fn format_level_colored(level: Level) -> ColoredString {
    match level {
        Level::Error => format!("[{:5}]", level).bright_red().bold(),
        Level::Warn => format!("[{:5}]", level).bright_yellow().bold(),
        Level::Info => format!("[{:5}]", level).bright_green().bold(),
        Level::Debug => format!("[{:5}]", level).bright_blue().bold(),
        Level::Trace => format!("[{:5}]", level).bright_magenta().bold(),
    }
}

/// Initialize logging based on configuration
/// Console pattern (colored): [timestamp] [LEVEL] - thread - module:line - message
/// File pattern (plain): [timestamp] [LEVEL] [thread - module:line] - message
pub fn init_logging(level: &str, file_path: &str, log_to_console: bool) -> anyhow::Result<()> {
    let level_filter = parse_log_level(level)?;

    // Create logs directory if it doesn't exist
    if let Some(parent) = Path::new(file_path).parent() {
        fs::create_dir_all(parent)?;
    }

    // Open log file in append mode
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(file_path)?;

    // Filter out noisy transport-layer debug logs
    let base_config = fern::Dispatch::new()
        .level(level_filter)
        .level_for("h2", LevelFilter::Info)
        .level_for("hyper", LevelFilter::Info)
        .level_for("tower", LevelFilter::Info);

    // File output without colors
    let file_config = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] [{:5}] [{} - {}:{}] - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                std::thread::current().name().unwrap_or("main"),
                record.target(),
                record.line().unwrap_or(0),
                message
            ))
        })
        .chain(log_file);

    if log_to_console {
        // Console output with colors
        let console_config = fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{} {} - {} - {}",
                    format!("[{}]", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
                        .bright_green()
                        .bold(),
                    format_level_colored(record.level()),
                    format!(
                        "{} - {}:{}",
                        std::thread::current().name().unwrap_or("main"),
                        record.target(),
                        record.line().unwrap_or(0)
                    )
                    .bright_magenta(),
                    message
                ))
            })
            .chain(std::io::stdout());

        base_config
            .chain(console_config)
            .chain(file_config)
            .apply()?;
    } else {
        base_config.chain(file_config).apply()?;
    }

    Ok(())
}

fn parse_log_level(level: &str) -> anyhow::Result<LevelFilter> {
    match level.to_lowercase().as_str() {
        "off" => Ok(LevelFilter::Off),
        "error" => Ok(LevelFilter::Error),
        "warn" => Ok(LevelFilter::Warn),
        "info" => Ok(LevelFilter::Info),
        "debug" => Ok(LevelFilter::Debug),
        "trace" => Ok(LevelFilter::Trace),
        other => Err(anyhow::anyhow!("unknown log level: {}", other)),
    }
}
