use clap::{Args, Parser, Subcommand};
use drover_core::ConfigPatch;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "drover",
    version,
    about = "Run batches of JSON requests with bounded concurrency"
)]
pub struct Cli {
    /// Pool configuration file (YAML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute every request in a JSON-lines file
    Run(RunArgs),

    /// Print the effective pool configuration
    Config,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON-lines file of requests, or "-" for stdin
    pub input: PathBuf,

    /// Workers driving the batch
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Pause each worker takes between requests (e.g. "250ms")
    #[arg(long, value_parser = humantime::parse_duration)]
    pub throttle: Option<Duration>,

    /// Per-attempt timeout (e.g. "10s")
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Maximum attempts per request
    #[arg(long)]
    pub max_retry: Option<u32>,

    /// Keep going past failures and report each one in place
    #[arg(long)]
    pub settled: bool,

    /// Environment variable holding an anti-forgery token
    #[arg(long)]
    pub token_env: Option<String>,

    /// Header the token is sent under (repeatable)
    #[arg(long = "token-header")]
    pub token_headers: Vec<String>,

    /// Write the report here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl RunArgs {
    /// Overrides given on the command line.
    pub fn patch(&self) -> ConfigPatch {
        ConfigPatch {
            concurrency: self.concurrency,
            throttle: self.throttle,
            timeout: self.timeout,
            max_retry: self.max_retry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_parse_humantime() {
        let cli = Cli::parse_from([
            "drover",
            "run",
            "requests.jsonl",
            "--concurrency",
            "3",
            "--throttle",
            "250ms",
            "--timeout",
            "10s",
        ]);

        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        let patch = args.patch();
        assert_eq!(patch.concurrency, Some(3));
        assert_eq!(patch.throttle, Some(Duration::from_millis(250)));
        assert_eq!(patch.timeout, Some(Duration::from_secs(10)));
        assert_eq!(patch.max_retry, None);
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::parse_from(["drover", "config", "--config", "pool.yaml"]);
        assert_eq!(cli.config, Some(PathBuf::from("pool.yaml")));
        assert!(matches!(cli.command, Commands::Config));
    }

    #[test]
    fn test_repeatable_token_headers() {
        let cli = Cli::parse_from([
            "drover",
            "run",
            "-",
            "--token-env",
            "CSRF",
            "--token-header",
            "x-csrf-token",
            "--token-header",
            "x-xsrf-token",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.token_headers, vec!["x-csrf-token", "x-xsrf-token"]);
        assert_eq!(args.token_env.as_deref(), Some("CSRF"));
    }
}
