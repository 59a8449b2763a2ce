use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use kadrovik::config::KadrovikConfig;
use kadrovik::telemetry::init_telemetry;

#[derive(Parser)]
#[command(name = "kadrovik")]
#[command(about = "Discord bot for personnel requests and audit records")]
#[command(long_about = "Kadrovik runs the resignation, promotion and uprank request workflows \
                       of a Discord guild and posts personnel audit records. Run without a \
                       subcommand to connect to Discord.")]
struct Cli {
    /// Directory holding kadrovik.toml / config.json
    #[arg(long, global = true, default_value = ".")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to Discord and serve interactions (default)
    Run,
    /// Load the configuration and report whether the bot could start
    CheckConfig,
    /// Print the effective configuration as TOML, token masked
    PrintConfig {
        /// Write to this file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    KadrovikConfig::load_env_file()?;
    let config = KadrovikConfig::load_from(&cli.config_dir)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            init_telemetry(&config.observability)?;
            tokio::runtime::Runtime::new()?.block_on(async { run(config).await })
        }
        Commands::CheckConfig => check_config(&config),
        Commands::PrintConfig { output } => {
            let redacted = config.redacted();
            match output {
                Some(path) => {
                    redacted.save_to_file(&path)?;
                    println!("✅ Configuration written to {}", path.display());
                }
                None => print!("{}", redacted.to_toml()?),
            }
            Ok(())
        }
    }
}

#[cfg(feature = "discord")]
async fn run(config: KadrovikConfig) -> Result<()> {
    kadrovik::gateway::run(config).await
}

#[cfg(not(feature = "discord"))]
async fn run(_config: KadrovikConfig) -> Result<()> {
    anyhow::bail!("kadrovik was built without the `discord` feature; rebuild with --features discord")
}

fn check_config(config: &KadrovikConfig) -> Result<()> {
    config.validate_for_run()?;
    println!("✅ Configuration OK");
    println!("   Resignation channel: {}", config.channels.resign());
    println!("   Promotion channel:   {}", config.channels.promotion());
    println!("   Uprank channel:      {}", config.channels.uprank_request());
    match config.discord.guild_id {
        Some(guild) => println!("   Commands scope:      guild {guild}"),
        None => println!("   Commands scope:      global"),
    }
    let audit = [
        ("invite", config.channels.invite),
        ("uninvite", config.channels.uninvite),
        ("uprank", config.channels.uprank),
        ("downrank", config.channels.downrank),
        ("transfer", config.channels.transfer),
    ];
    for (name, channel) in audit {
        match channel {
            Some(id) => println!("   Audit {name:<9} {id}"),
            None => println!("   ⚠️  Audit channel for {name} is not configured"),
        }
    }
    Ok(())
}
