use std::io::{self, BufReader, BufWriter};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use termite_common::{ExecMode, TermiteConfig};
use termite_driver::{Connection, PacketTransport};
use termite_term::read_packet;

#[derive(Parser, Debug)]
#[command(name = "termite", about = "SQLite port driver speaking Erlang terms over {packet, 4}")]
struct Cli {
    /// Config file path.
    #[arg(short, long, default_value = "termite.toml")]
    config: String,

    /// Database file (overrides config). `:memory:` for a private database.
    #[arg(long)]
    database: Option<String>,

    /// Execution mode: sync or deferred (overrides config).
    #[arg(long, value_parser = parse_exec_mode)]
    mode: Option<ExecMode>,

    /// Print the default configuration as TOML and exit.
    #[arg(long)]
    print_default_config: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_default_config {
        let toml_str = toml::to_string_pretty(&TermiteConfig::default())
            .unwrap_or_else(|e| format!("# failed to serialize default config: {}", e));
        println!("{}", toml_str);
        return Ok(());
    }

    termite_observability::init_tracing();
    tracing::info!("Starting termite...");

    let mut config = load_config(&cli.config)?;
    if let Some(ref path) = cli.database {
        config.database.path = path.clone();
    }
    if let Some(mode) = cli.mode {
        config.driver.exec_mode = mode;
    }
    config.validate()?;
    tracing::info!("Config: {:?}", config);

    if let Some(ref addr) = config.metrics_addr {
        if let Err(e) = termite_observability::init_metrics(addr) {
            tracing::warn!("Failed to initialize metrics: {}", e);
        }
    }

    let transport = Arc::new(PacketTransport::new(BufWriter::new(io::stdout())));
    let conn = Connection::open(&config, transport).map_err(|e| {
        tracing::error!("Failed to open database {}: {}", config.database.path, e);
        e
    })?;

    let mut stdin = BufReader::new(io::stdin().lock());
    let mut commands = 0u64;
    loop {
        let packet = match read_packet(&mut stdin) {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                tracing::info!("stdin closed after {} commands", commands);
                break;
            }
            Err(e) => {
                tracing::warn!("Failed to read command frame: {}", e);
                break;
            }
        };
        commands += 1;
        if let Err(e) = conn.dispatch(&packet) {
            tracing::warn!("Command {} failed: {}", commands, e);
        }
    }

    conn.shutdown().context("shutdown")?;
    tracing::info!("termite stopped");
    Ok(())
}

fn parse_exec_mode(s: &str) -> Result<ExecMode, String> {
    s.parse()
}

fn load_config(path: &str) -> Result<TermiteConfig> {
    match TermiteConfig::load(path) {
        Ok(config) => {
            tracing::info!("Loaded config from {}", path);
            Ok(config)
        }
        Err(e) if e.is_not_found() => {
            tracing::info!("Config file {} not found, using defaults", path);
            Ok(TermiteConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_parse() {
        let cli = Cli::parse_from(["termite", "--database", ":memory:", "--mode", "Deferred"]);
        assert_eq!(cli.database.as_deref(), Some(":memory:"));
        assert_eq!(cli.mode, Some(ExecMode::Deferred));
        assert_eq!(cli.config, "termite.toml");
    }

    #[test]
    fn test_cli_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["termite", "--mode", "async"]).is_err());
    }

    #[test]
    fn test_missing_config_falls_back_to_defaults() {
        let config = load_config("/nonexistent/termite.toml").unwrap();
        assert_eq!(config.database.path, "termite.db");
    }
}
