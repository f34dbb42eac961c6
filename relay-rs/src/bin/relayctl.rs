//! Command line administration for the Postfix relay
//!
//! # Usage
//!
//! ```bash
//! # Install Postfix and relay through Gmail
//! RELAY_PASSWORD=app-password relayctl install --provider gmail --username me@gmail.com
//!
//! # Point an existing installation at another relay
//! relayctl relay configure --provider custom --host mx.example.com --port 2525 \
//!     --username relay --password secret
//!
//! # Day to day
//! relayctl status
//! relayctl queue show
//! relayctl log --lines 100
//! relayctl backup list
//! ```

use clap::{Args, Parser, Subcommand};
use relay_rs::config::Config;
use relay_rs::context::RelayContext;
use relay_rs::install::WizardRequest;
use relay_rs::postfix::{Provider, TestEmail};
use relay_rs::store::Sender;
use relay_rs::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relayctl")]
#[command(about = "Install and manage a Postfix SMTP relay", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Relay, queue and sender overview
    Status,
    /// Show what was detected about this host
    Detect,
    /// List provider presets
    Providers,
    /// Install Postfix and configure the relay
    Install(RelayArgs),
    /// Restore the newest backup and remove relay files
    Uninstall,
    /// Run the installation checks
    Verify,
    /// Relay credentials
    #[command(subcommand)]
    Relay(RelayCommands),
    /// Allowed sender addresses
    #[command(subcommand)]
    Senders(SenderCommands),
    /// Postfix mail queue
    #[command(subcommand)]
    Queue(QueueCommands),
    /// Tail the mail log
    Log {
        /// Number of lines (1-1000)
        #[arg(short = 'n', long, default_value_t = 30)]
        lines: usize,
    },
    /// Send a test message through the relay
    TestEmail {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        from_name: Option<String>,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        body: Option<String>,
    },
    /// Configuration backups
    #[command(subcommand)]
    Backup(BackupCommands),
    /// Postfix service lifecycle
    #[command(subcommand)]
    Service(ServiceCommands),
}

#[derive(Args)]
struct RelayArgs {
    /// gmail, outlook, sendgrid, aws_ses or custom
    #[arg(long, default_value = "custom")]
    provider: Provider,
    /// Relay host (required for custom)
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(short, long)]
    username: String,
    #[arg(short, long, env = "RELAY_PASSWORD", hide_env_values = true)]
    password: String,
}

impl RelayArgs {
    fn into_request(self) -> WizardRequest {
        WizardRequest {
            provider: self.provider,
            relay_host: self.host,
            relay_port: self.port,
            username: self.username,
            password: self.password,
        }
    }
}

#[derive(Subcommand)]
enum RelayCommands {
    /// Write the SASL map and relay settings, then reload Postfix
    Configure(RelayArgs),
    /// Remove relay credentials and relay settings
    Reset,
    /// Show the configured relay
    Show,
}

#[derive(Subcommand)]
enum SenderCommands {
    List,
    Add {
        name: String,
        email: String,
    },
    Update {
        id: usize,
        name: String,
        email: String,
    },
    Delete {
        id: usize,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    Show,
    /// Attempt delivery of every queued message
    Flush,
}

#[derive(Subcommand)]
enum BackupCommands {
    Create {
        /// Defaults to a timestamped name
        name: Option<String>,
    },
    List,
    Restore {
        name: String,
    },
    Delete {
        name: String,
    },
    /// Delete all but the newest backups
    Cleanup {
        #[arg(long)]
        keep: Option<usize>,
    },
}

#[derive(Subcommand)]
enum ServiceCommands {
    Start,
    Stop,
    Restart,
    Enable,
    Disable,
    Status,
}

fn mark(ok: bool) -> &'static str {
    if ok {
        "✓"
    } else {
        "✗"
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let config = Config::load(cli.config.as_deref())?;
    let relay = RelayContext::system(config);
    relay.prepare().await?;

    match cli.command {
        Commands::Status => {
            let senders = relay.senders.list().await?;
            let running = relay
                .services
                .is_service_active(relay.services.service_name())
                .await;
            println!("{} Postfix running", mark(running));

            match relay.relay_store.summary().await? {
                Some(summary) => println!(
                    "✓ Relay: [{}]:{} as {} ({})",
                    summary.relay_host, summary.relay_port, summary.username, summary.provider
                ),
                None => println!("✗ No relay configured"),
            }
            match relay.queue.list().await {
                Ok(queue) if queue.is_empty() => println!("✓ Mail queue is empty"),
                Ok(queue) => println!("✓ {} message(s) in queue", queue.len()),
                Err(e) => println!("✗ Mail queue: {}", e),
            }
            println!("  {} sender(s)", senders.len());
        }
        Commands::Detect => {
            let profile = relay.detector.get_system_info().await;
            println!(
                "OS:              {} {} ({})",
                profile.os.name.as_deref().unwrap_or(&profile.os.distro),
                profile.os.version,
                profile.os.family
            );
            println!(
                "Package manager: {}",
                profile
                    .package_manager
                    .map(|kind| kind.to_string())
                    .unwrap_or_else(|| "none".to_string())
            );
            println!("{} Sudo access", mark(profile.has_sudo));
            println!("{} Network connected", mark(profile.network_connected));
            println!("{} Postfix installed", mark(profile.postfix_status.installed));
            println!("{} Postfix running", mark(profile.postfix_status.running));
            println!("{} Postfix enabled", mark(profile.postfix_status.enabled));
        }
        Commands::Providers => {
            println!("{:<10} {:<18} {:<40} {}", "Key", "Name", "Host", "Port");
            println!("{:-<75}", "");
            for preset in relay.wizard.provider_presets() {
                println!(
                    "{:<10} {:<18} {:<40} {}",
                    preset.key.as_str(),
                    preset.name,
                    preset.relay_host,
                    preset.relay_port
                );
            }
        }
        Commands::Install(args) => {
            println!("Installing SMTP relay...");
            let report = relay.wizard.install_with_data(&args.into_request()).await?;
            for action in &report.outcome.compensations {
                println!("  rolled back: {:?}", action);
            }
            if let Some(error) = &report.outcome.error {
                println!("  {}", error);
            }
            println!("{} {}", mark(report.success), report.message);
            return Ok(report.success);
        }
        Commands::Uninstall => {
            let response = relay.wizard.uninstall().await?;
            if let Some(name) = &response.report.restored_backup {
                println!("✓ Restored backup {}", name);
            }
            for path in &response.report.removed_files {
                println!("✓ Removed {}", path.display());
            }
            for warning in &response.report.warnings {
                println!("✗ {}", warning);
            }
            println!("{} {}", mark(response.success), response.message);
        }
        Commands::Verify => {
            let report = relay.installer.verify_installation().await;
            println!("{} Postfix running", mark(report.postfix_running));
            println!("{} Postfix enabled", mark(report.postfix_enabled));
            println!("{} Configuration valid", mark(report.config_valid));
            println!("{} SASL configured", mark(report.sasl_configured));
            return Ok(report.all_checks_passed);
        }
        Commands::Relay(RelayCommands::Configure(args)) => {
            let config = relay.wizard.relay_config(&args.into_request())?;
            let outcome = relay.configurator.configure_relay(&config).await?;
            relay.relay_store.save(&config).await?;
            println!("✓ Relay set to {} ({:?})", config.relayhost(), outcome);
        }
        Commands::Relay(RelayCommands::Reset) => {
            relay.configurator.clear_relay().await?;
            relay.relay_store.clear().await?;
            println!("✓ SASL configuration has been reset");
        }
        Commands::Relay(RelayCommands::Show) => {
            let relayhost = relay.configurator.current_relayhost().await?;
            println!("main.cf relayhost: {}", relayhost.as_deref().unwrap_or("(none)"));
            match relay.relay_store.summary().await? {
                Some(summary) => {
                    println!("Provider:   {}", summary.provider);
                    println!("Host:       {}:{}", summary.relay_host, summary.relay_port);
                    println!("Username:   {}", summary.username);
                    println!("Updated at: {}", summary.updated_at.format("%Y-%m-%d %H:%M:%S"));
                }
                None => println!("No stored relay credentials"),
            }
        }
        Commands::Senders(SenderCommands::List) => {
            let senders = relay.senders.list().await?;
            if senders.is_empty() {
                println!("No senders configured.");
            } else {
                println!("{:<4} {:<25} {}", "ID", "Name", "Email");
                println!("{:-<60}", "");
                for (id, sender) in senders.iter().enumerate() {
                    println!("{:<4} {:<25} {}", id, sender.name, sender.email);
                }
                println!("\nTotal: {} sender(s)", senders.len());
            }
        }
        Commands::Senders(SenderCommands::Add { name, email }) => {
            let id = relay.senders.add(Sender::new(name, email.clone())).await?;
            println!("✓ Sender {} added with id {}", email, id);
        }
        Commands::Senders(SenderCommands::Update { id, name, email }) => {
            relay.senders.update(id, Sender::new(name, email)).await?;
            println!("✓ Sender {} updated", id);
        }
        Commands::Senders(SenderCommands::Delete { id }) => {
            let removed = relay.senders.delete(id).await?;
            println!("✓ Sender {} deleted", removed.email);
        }
        Commands::Queue(QueueCommands::Show) => {
            let queue = relay.queue.list().await?;
            if queue.is_empty() {
                println!("Mail queue is empty");
            }
            for entry in &queue {
                println!(
                    "{:<14} {:<9} {:>8} {}  {} -> {}",
                    entry.queue_id,
                    format!("{:?}", entry.state),
                    entry.size,
                    entry.arrival,
                    entry.sender,
                    entry.recipients.join(", ")
                );
                if let Some(reason) = &entry.reason {
                    println!("{:<14} {}", "", reason);
                }
            }
        }
        Commands::Queue(QueueCommands::Flush) => {
            relay.queue.flush().await?;
            println!("✓ Mail queue has been flushed");
        }
        Commands::Log { lines } => {
            let tail = relay.mail_log.tail(Some(lines)).await?;
            print!("{}", tail.log);
        }
        Commands::TestEmail {
            from,
            to,
            from_name,
            subject,
            body,
        } => {
            let mut email = TestEmail::new(from, to);
            email.from_name = from_name;
            email.subject = subject;
            email.body = body;
            let report = relay.queue.send_test_email(&email).await?;
            println!("✓ {}", report.message);
        }
        Commands::Backup(BackupCommands::Create { name }) => {
            let metadata = relay.backups.create_backup(name.as_deref()).await?;
            println!(
                "✓ Backup {} created ({} file(s))",
                metadata.name,
                metadata.config_files.len()
            );
        }
        Commands::Backup(BackupCommands::List) => {
            let backups = relay.backups.list_backups().await?;
            if backups.is_empty() {
                println!("No backups found.");
            } else {
                println!("{:<45} {:<20} {}", "Name", "Created At", "Files");
                println!("{:-<75}", "");
                for backup in &backups {
                    println!(
                        "{:<45} {:<20} {}",
                        backup.name,
                        backup.created_at.format("%Y-%m-%d %H:%M:%S"),
                        backup.config_files.len()
                    );
                }
                println!(
                    "\nTotal: {} backup(s), {} bytes",
                    backups.len(),
                    relay.backups.total_size().await?
                );
            }
        }
        Commands::Backup(BackupCommands::Restore { name }) => {
            let metadata = relay.backups.restore_backup(&name).await?;
            for path in &metadata.config_files {
                println!("✓ Restored {}", path.display());
            }
            println!("✓ Backup {} restored", name);
        }
        Commands::Backup(BackupCommands::Delete { name }) => {
            relay.backups.delete_backup(&name).await?;
            println!("✓ Backup {} deleted", name);
        }
        Commands::Backup(BackupCommands::Cleanup { keep }) => {
            let removed = relay.backups.cleanup_old_backups(keep).await?;
            for name in &removed {
                println!("✓ Deleted {}", name);
            }
            println!("{} old backup(s) removed", removed.len());
        }
        Commands::Service(action) => {
            let services = &relay.services;
            match action {
                ServiceCommands::Start => services.start_postfix().await?,
                ServiceCommands::Stop => services.stop_postfix().await?,
                ServiceCommands::Restart => services.restart_postfix().await?,
                ServiceCommands::Enable => services.enable_postfix().await?,
                ServiceCommands::Disable => services.disable_postfix().await?,
                ServiceCommands::Status => {
                    let status = services.get_postfix_status().await;
                    println!("{} Active", mark(status.active));
                    println!("{} Enabled", mark(status.enabled));
                    println!("{} Configuration valid", mark(status.config_valid));
                    return Ok(status.active);
                }
            }
            println!("✓ Done");
        }
    }

    Ok(true)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("✗ {}", e);
            std::process::exit(1);
        }
    }
}
