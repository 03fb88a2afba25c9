pub mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// AgentFleet: multi-tenant agent execution orchestrator.
#[derive(Debug, Parser)]
#[command(name = "agentfleet", version, about)]
pub struct Cli {
    /// Config file (overrides `AF_CONFIG`; default `config.toml`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the orchestrator and its HTTP API (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Resolve the config path: `--config`, then `AF_CONFIG`, then
/// `config.toml`.
pub fn config_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var_os("AF_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

/// Load the configuration. A missing file yields the defaults; a file that
/// exists but does not parse is an error.
pub fn load_config(
    flag: Option<PathBuf>,
) -> anyhow::Result<(af_domain::config::Config, PathBuf)> {
    let path = config_path(flag);

    let config = if path.exists() {
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?
    } else {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        af_domain::config::Config::default()
    };

    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_wins_over_default() {
        assert_eq!(
            config_path(Some(PathBuf::from("/etc/af.toml"))),
            PathBuf::from("/etc/af.toml")
        );
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (config, path) = load_config(Some(dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.server.port, 3310);
        assert!(path.ends_with("absent.toml"));
    }

    #[test]
    fn malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(load_config(Some(path)).is_err());
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::parse_from(["agentfleet", "--config", "x.toml", "config", "validate"]);
        assert!(matches!(
            cli.command,
            Some(Command::Config(ConfigCommand::Validate))
        ));
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(Cli::parse_from(["agentfleet"]).command.is_none());
    }
}
