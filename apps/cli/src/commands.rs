//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use clashbuilder_core::pipeline::{BuildOverrides, BuildReport, BuildSpec, ProgressReporter};
use clashbuilder_shared::{
    AppConfig, PatternList, RuleMode, init_config, load_config, load_config_from, load_profile,
};
use clashbuilder_source::SourceOptions;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// clashbuilder: assemble Clash configs from a subscription and rule fragments.
#[derive(Parser)]
#[command(
    name = "clashbuilder",
    version,
    about = "Build Clash proxy configurations from a subscription, region keywords and rule fragments.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Build a configuration from a profile document.
    Build {
        /// Profile file (JSON, or YAML with a .yaml/.yml extension).
        profile: PathBuf,

        /// Directory templates, rules and outputs resolve against.
        #[arg(long)]
        base_dir: Option<PathBuf>,

        /// Rule mode: whitelist, blacklist, or none.
        #[arg(long)]
        mode: Option<RuleMode>,

        /// User-defined rule glob (repeatable). Replaces the profile's patterns.
        #[arg(long = "rules", value_name = "PATTERN")]
        rules: Vec<String>,

        /// Skip user-defined rule fragments entirely.
        #[arg(long, conflicts_with = "rules")]
        no_user_rules: bool,

        /// Use this config file instead of the default location.
        #[arg(long, env = "CLASHBUILDER_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "clashbuilder=info",
        1 => "clashbuilder=debug",
        _ => "clashbuilder=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Build {
            profile,
            base_dir,
            mode,
            rules,
            no_user_rules,
            config,
        } => {
            let overrides = BuildOverrides {
                base_dir,
                mode,
                user_defined: user_rule_override(rules, no_user_rules),
            };
            cmd_build(&profile, overrides, config.as_deref()).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// `--no-user-rules` empties the pattern list; `--rules` replaces it.
fn user_rule_override(rules: Vec<String>, no_user_rules: bool) -> Option<PatternList> {
    if no_user_rules {
        Some(PatternList::default())
    } else if rules.is_empty() {
        None
    } else {
        Some(PatternList(rules))
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_build(
    profile_path: &std::path::Path,
    overrides: BuildOverrides,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let config = match config_path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let profile = load_profile(profile_path)
        .wrap_err_with(|| format!("cannot load profile {}", profile_path.display()))?;

    let spec = BuildSpec::resolve(profile, &config, overrides);
    let opts = SourceOptions::from(config.source.clone());

    info!(
        profile = %spec.profile,
        mode = %spec.mode,
        base_dir = %spec.base_dir.display(),
        "building configuration"
    );

    // Set up progress reporting
    let reporter = CliProgress::new();

    let report = clashbuilder_core::pipeline::build(&spec, &opts, &reporter).await?;

    print_summary(&spec, &report);
    Ok(())
}

fn print_summary(spec: &BuildSpec, report: &BuildReport) {
    println!();
    println!("  Configuration built successfully!");
    println!("  Profile: {}", spec.profile);
    println!("  Nodes:   {}", report.node_count);
    for bucket in &report.buckets {
        println!("    {:<8} {}", bucket.region, bucket.node_count);
    }
    println!(
        "  Rules:   {} ({} user, {} {})",
        report.rule_count, report.user_rule_count, report.mode_rule_count, spec.mode
    );
    println!("  Output:  {}", report.output_path.display());
    println!("  SHA-256: {}", report.sha256);
    println!("  Time:    {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, _report: &BuildReport) {
        self.spinner.finish_and_clear();
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
