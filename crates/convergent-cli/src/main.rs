use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand};
use convergent_config::{HarnessConfig, HumanDuration, TransportKind};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "convergent",
    version,
    about = "Chaos harness for eventually consistent replicated stores"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run writers against the cluster under injected faults, then verify convergence
    Run {
        #[command(flatten)]
        overrides: Overrides,
        /// Print the run report and final state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check that every node reports the same state
    Verify {
        #[command(flatten)]
        overrides: Overrides,
        /// Print per-node states as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show effective configuration
    Config {
        #[command(flatten)]
        overrides: Overrides,
    },
}

/// Flags that override values from the configuration file.
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Chaos cycles, and writes per runner
    #[arg(short, long)]
    iterations: Option<usize>,
    /// Seconds between a runner's writes
    #[arg(long)]
    interval: Option<f64>,
    /// Number of generated locations
    #[arg(short, long)]
    locations: Option<usize>,
    /// Seconds between chaos cycles
    #[arg(short, long)]
    delay: Option<u64>,
    /// Number of concurrent runners
    #[arg(short, long)]
    runners: Option<usize>,
    /// Seconds to wait after the chaos phase before verifying
    #[arg(long)]
    settle: Option<u64>,
    /// Percentage of writes abandoned, split across runners
    #[arg(long)]
    crash: Option<f64>,
    /// Percentage chance of a node restart per chaos cycle
    #[arg(long)]
    restarts: Option<f64>,
    /// Host of generated locations
    #[arg(long)]
    host: Option<String>,
    /// Port base; location N listens on base + N
    #[arg(long)]
    base_port: Option<u16>,
    /// Node protocol (tcp, http)
    #[arg(long)]
    transport: Option<TransportKind>,
    /// Per-request timeout (e.g. 500ms, 5s)
    #[arg(long)]
    request_timeout: Option<HumanDuration>,
    /// Seed for every random decision
    #[arg(long)]
    seed: Option<u64>,
}

impl Overrides {
    fn apply(self, config: &mut HarnessConfig) {
        if let Some(v) = self.iterations {
            config.iterations = v;
        }
        if let Some(v) = self.interval {
            config.interval = v;
        }
        if let Some(v) = self.locations {
            config.locations = v;
        }
        if let Some(v) = self.delay {
            config.delay = v;
        }
        if let Some(v) = self.runners {
            config.runners = v;
        }
        if let Some(v) = self.settle {
            config.settle = v;
        }
        if let Some(v) = self.crash {
            config.crash = v;
        }
        if let Some(v) = self.restarts {
            config.restarts = v;
        }
        if let Some(v) = self.host {
            config.host = v;
        }
        if let Some(v) = self.base_port {
            config.base_port = v;
        }
        if let Some(v) = self.transport {
            config.transport = v;
        }
        if let Some(v) = self.request_timeout {
            config.request_timeout = v;
        }
        if let Some(v) = self.seed {
            config.seed = Some(v);
        }
    }
}

fn find_config() -> Option<PathBuf> {
    // 1. CONVERGENT_CONFIG environment variable
    if let Ok(path) = std::env::var("CONVERGENT_CONFIG") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. convergent.yaml in current directory
    let cwd_config = PathBuf::from("convergent.yaml");
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. ~/.config/convergent/config.yaml
    if let Some(home) = dirs_next::home_dir() {
        let home_config = home.join(".config/convergent/config.yaml");
        if home_config.exists() {
            return Some(home_config);
        }
    }

    None
}

fn load_config(
    explicit: Option<PathBuf>,
    overrides: Overrides,
) -> Result<HarnessConfig, Box<dyn std::error::Error>> {
    let mut config = match explicit.or_else(find_config) {
        Some(path) => {
            debug!(path = %path.display(), "loading configuration");
            HarnessConfig::from_file(&path)
                .map_err(|e| format!("{}: {}", path.display(), e))?
        }
        None => {
            debug!("no configuration file found; using defaults");
            HarnessConfig::default()
        }
    };
    overrides.apply(&mut config);
    Ok(config)
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run { overrides, json } => {
            let config = load_config(cli.config, overrides)?;
            commands::run::run(&config, json).await?;
        }
        Commands::Verify { overrides, json } => {
            let config = load_config(cli.config, overrides)?;
            commands::verify::run(&config, json).await?;
        }
        Commands::Config { overrides } => {
            let config = load_config(cli.config, overrides)?;
            commands::config::run(&config)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
