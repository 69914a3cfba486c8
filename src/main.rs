use clap::{Parser, Subcommand};
use rat::config::{self, TableSettings};
use rat::medium::TunDevice;
use rat::service::NatService;
use rat::telemetry::init_logging;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "rat")]
#[command(about = "A userspace NAT on a TUN device")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run the NAT daemon
    Run {
        /// Path to rat.toml
        #[arg(short, long, default_value = "rat.toml")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate rat.toml
    Validate {
        /// Path to rat.toml
        #[arg(short, long, default_value = "rat.toml")]
        config: PathBuf,
    },
    /// Print the table settings with every default filled in
    Show {
        /// Path to rat.toml
        #[arg(short, long, default_value = "rat.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Config { action } => {
            init_logging(None);
            match action {
                ConfigAction::Validate { config } => cmd_config_validate(&config),
                ConfigAction::Show { config } => cmd_config_show(&config),
            }
        }
        Commands::Run { config } => cmd_run(&config),
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn cmd_run(config_path: &PathBuf) -> Result<(), String> {
    use tokio::runtime::Runtime;

    let cfg = config::load(config_path).map_err(|e| format!("Failed to load config: {}", e))?;
    init_logging(Some(&cfg.log));
    info!("Loaded {}", config_path.display());

    let validation = config::validate(&cfg);
    if validation.has_errors() {
        validation.print_diagnostics();
        return Err("Validation failed".to_string());
    }
    for warning in &validation.warnings {
        info!("{}", warning);
    }

    let rt = Runtime::new().map_err(|e| format!("Failed to create runtime: {}", e))?;

    rt.block_on(async move {
        let tun = TunDevice::open(&cfg.tun.name, cfg.tun.mtu).map_err(|e| {
            format!(
                "Failed to open TUN device {}: {}. Run with root privileges.",
                cfg.tun.name, e
            )
        })?;

        for table in cfg.tables.resolved() {
            info!(
                "  {} table: variant={}, idle_timeout={}s, ports={}",
                table.name,
                table.variant,
                table.idle_timeout,
                table.ports.port_set().len()
            );
        }

        let (service, _status) = NatService::from_config(&cfg, tun);
        service
            .run(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
            .map_err(|e| e.to_string())
    })
}

fn cmd_config_validate(config_path: &PathBuf) -> Result<(), String> {
    println!("[INFO] Validating {}...", config_path.display());

    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        Err("Validation failed".to_string())
    } else {
        println!("[INFO] Configuration is valid");
        Ok(())
    }
}

#[derive(Serialize)]
struct ResolvedTables {
    tables: Vec<TableSettings>,
}

fn cmd_config_show(config_path: &PathBuf) -> Result<(), String> {
    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;

    let resolved = ResolvedTables {
        tables: cfg.tables.resolved().into(),
    };
    let text =
        toml::to_string_pretty(&resolved).map_err(|e| format!("Failed to serialize: {}", e))?;

    println!("global_addr = \"{}\"\n", cfg.global_addr);
    print!("{}", text);
    Ok(())
}
