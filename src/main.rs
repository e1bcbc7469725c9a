// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use dlrouter::bridge::stdio::{self, StdioHost};
use dlrouter::bridge::{LocalHelper, UiHub};
use dlrouter::config::{self, AppConfig};
use dlrouter::error::ErrorBuilder;
use dlrouter::{
    plan_route, Collaborators, ConflictPolicy, Controller, DownloadInfo, Group, JsonFileStore, Resolution, Rule,
    RuleKind, RuleStore,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long buffered bridge output may take to drain on exit.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// How often `watch` checks the store file for edits from other processes.
const STORE_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "dlrouter")]
#[command(version = VERSION)]
#[command(about = "Route browser downloads into folders by rule.")]
#[command(long_about = "dlrouter - rule-based download routing\n\n\
    Add a rule:          dlrouter rules add --kind domain --value github.com --folder Code\n\
    Try a download:      dlrouter route https://github.com/x/a.png a.png\n\
    Change countdown:    dlrouter settings set --timeout-ms 8000\n\
    Run the bridge:      dlrouter watch\n\n\
    Rules and settings live in ~/.dlrouter/store.json.")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Rule store file (overrides the config file)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Verbose mode: debug logging on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage routing rules
    #[command(subcommand)]
    Rules(RuleCommands),

    /// Manage file-type groups
    #[command(subcommand)]
    Groups(GroupCommands),

    /// Show or change routing settings
    #[command(subcommand)]
    Settings(SettingsCommands),

    /// Show where a download would be routed
    ///
    /// Example:
    ///   dlrouter route https://github.com/org/repo/a.png a.png
    Route {
        /// Download URL
        url: String,
        /// Filename the browser proposed
        filename: String,
        /// Referring page
        #[arg(long)]
        referrer: Option<String>,
    },

    /// Show or change machine configuration (~/.dlrouter/config.json)
    ///
    /// Examples:
    ///   dlrouter config show
    ///   dlrouter config set --download-root ~/Downloads
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },

    /// Run the JSON-lines bridge on stdin/stdout for a browser extension
    ///
    /// Example:
    ///   dlrouter watch
    Watch,
}

#[derive(Subcommand)]
enum RuleCommands {
    /// List rules
    ///
    /// Example:
    ///   dlrouter rules list
    List,

    /// Add a rule, replacing one with the same kind and value
    ///
    /// Example:
    ///   dlrouter rules add --kind extension --value "pdf,epub" --folder Books
    Add {
        /// domain, contains or extension
        #[arg(long)]
        kind: RuleKind,
        /// Domain (optionally with a path), filename substrings or extensions
        #[arg(long)]
        value: String,
        /// Relative folder, or an absolute path to move the file to
        #[arg(long)]
        folder: String,
        #[arg(long)]
        priority: Option<f64>,
        #[arg(long)]
        disabled: bool,
    },

    /// Remove a rule
    ///
    /// Example:
    ///   dlrouter rules remove --kind domain --value github.com
    Remove {
        #[arg(long)]
        kind: RuleKind,
        #[arg(long)]
        value: String,
    },
}

#[derive(Subcommand)]
enum GroupCommands {
    /// List file-type groups
    ///
    /// Example:
    ///   dlrouter groups list
    List,

    /// Add or replace a group
    ///
    /// Example:
    ///   dlrouter groups add images --extensions png,jpg,gif --folder Images
    Add {
        name: String,
        /// Comma-separated extensions
        #[arg(long, value_delimiter = ',')]
        extensions: Vec<String>,
        #[arg(long)]
        folder: String,
        #[arg(long)]
        priority: Option<f64>,
        /// Let this group win over every matching domain rule
        #[arg(long)]
        override_domain_rules: bool,
        #[arg(long)]
        disabled: bool,
    },

    /// Remove a group
    ///
    /// Example:
    ///   dlrouter groups remove images
    Remove { name: String },
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Show current settings
    ///
    /// Example:
    ///   dlrouter settings show
    Show,

    /// Change one or more settings
    ///
    /// Example:
    ///   dlrouter settings set --timeout-ms 8000 --policy ask
    Set {
        /// Countdown before auto-confirm, in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Show the confirmation countdown (on/off)
        #[arg(long, value_parser = parse_switch)]
        confirmation: Option<bool>,
        /// Folder used when no rule matches
        #[arg(long)]
        default_folder: Option<String>,
        /// auto or ask
        #[arg(long)]
        policy: Option<ConflictPolicy>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    ///
    /// Example:
    ///   dlrouter config show
    Show,

    /// Change one or more config values
    ///
    /// Example:
    ///   dlrouter config set --log-filter dlrouter=debug --editor-timeout-ms 400
    Set {
        /// Rule store file
        #[arg(long)]
        store_path: Option<PathBuf>,
        /// The browser's download root
        #[arg(long)]
        download_root: Option<PathBuf>,
        /// tracing filter, e.g. dlrouter=debug
        #[arg(long)]
        log_filter: Option<String>,
        /// How long a countdown expiry waits for the UI's editor state
        #[arg(long)]
        editor_timeout_ms: Option<u64>,
    },
}

fn parse_switch(value: &str) -> std::result::Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        other => Err(format!("expected on or off, got '{}'", other)),
    }
}

fn init_tracing(app_config: &AppConfig, verbose: bool) {
    let fallback = if verbose { "dlrouter=debug" } else { app_config.log_filter() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    // stdout carries the bridge protocol
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn open_store(app_config: &AppConfig, override_path: Option<PathBuf>) -> Result<JsonFileStore> {
    let path = match override_path {
        Some(path) => path,
        None => app_config.store_path()?,
    };
    JsonFileStore::open(&path).map_err(|e| {
        anyhow::anyhow!(ErrorBuilder::new("Failed to load the rule store")
            .cause(e.to_string())
            .fix(format!("Check or remove the file: {}", path.display()))
            .build())
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let app_config = config::load_config()?;
    init_tracing(&app_config, cli.verbose);

    if let Commands::Config { command } = cli.command {
        return handle_config(app_config, command);
    }

    let store = open_store(&app_config, cli.store)?;

    match cli.command {
        Commands::Rules(command) => handle_rules(&store, command).await,
        Commands::Groups(command) => handle_groups(&store, command).await,
        Commands::Settings(command) => handle_settings(&store, command).await,
        Commands::Route {
            url,
            filename,
            referrer,
        } => show_route(&store, &url, &filename, referrer).await,
        Commands::Watch => watch(store, &app_config).await,
        Commands::Config { .. } => Ok(()),
    }
}

async fn handle_rules(store: &JsonFileStore, command: RuleCommands) -> Result<()> {
    match command {
        RuleCommands::List => {
            let rules = store.get_rules().await?;
            if rules.is_empty() {
                println!("{}", "No rules yet. Add one with: dlrouter rules add".yellow());
                return Ok(());
            }
            println!("{}", "Rules".bold());
            for rule in rules {
                let state = if rule.enabled { "".normal() } else { " (disabled)".dimmed() };
                println!(
                    "  {:<10} {:<30} -> {}  [priority {}]{}",
                    rule.kind.as_str().cyan(),
                    rule.value,
                    rule.folder.green(),
                    rule.priority,
                    state
                );
            }
        }
        RuleCommands::Add {
            kind,
            value,
            folder,
            priority,
            disabled,
        } => {
            let mut rule = Rule::new(kind, value, folder);
            if let Some(priority) = priority {
                rule = rule.with_priority(priority);
            }
            if disabled {
                rule = rule.disabled();
            }
            let replaced = store.add_rule(rule.clone()).await?;
            let verb = if replaced.is_some() { "Updated" } else { "Added" };
            println!("{} {} rule '{}' -> {}", "[✓]".green(), verb, rule.value, rule.folder);
        }
        RuleCommands::Remove { kind, value } => match store.remove_rule(kind, &value).await? {
            Some(_) => println!("{} Removed {} rule '{}'", "[✓]".green(), kind, value),
            None => println!("{} No {} rule '{}'", "[!]".yellow(), kind, value),
        },
    }
    Ok(())
}

async fn handle_groups(store: &JsonFileStore, command: GroupCommands) -> Result<()> {
    match command {
        GroupCommands::List => {
            let groups = store.get_groups().await?;
            if groups.is_empty() {
                println!("{}", "No file-type groups yet. Add one with: dlrouter groups add".yellow());
                return Ok(());
            }
            println!("{}", "File-type groups".bold());
            for group in groups.values() {
                let extensions: Vec<&str> = group.extensions.iter().map(String::as_str).collect();
                let mut flags = Vec::new();
                if group.override_domain_rules {
                    flags.push("overrides domain rules");
                }
                if !group.enabled {
                    flags.push("disabled");
                }
                println!(
                    "  {:<12} {:<30} -> {}  [priority {}] {}",
                    group.name.cyan(),
                    extensions.join(","),
                    group.folder.green(),
                    group.priority,
                    flags.join(", ").dimmed()
                );
            }
        }
        GroupCommands::Add {
            name,
            extensions,
            folder,
            priority,
            override_domain_rules,
            disabled,
        } => {
            let mut group = Group::new(name, extensions, folder);
            if group.extensions.is_empty() {
                anyhow::bail!("group '{}' needs at least one extension", group.name);
            }
            if let Some(priority) = priority {
                group = group.with_priority(priority);
            }
            if override_domain_rules {
                group = group.overriding_domain_rules();
            }
            if disabled {
                group = group.disabled();
            }
            let name = group.name.clone();
            let replaced = store.add_group(group).await?;
            let verb = if replaced.is_some() { "Updated" } else { "Added" };
            println!("{} {} group '{}'", "[✓]".green(), verb, name);
        }
        GroupCommands::Remove { name } => match store.remove_group(&name).await? {
            Some(_) => println!("{} Removed group '{}'", "[✓]".green(), name),
            None => println!("{} No group '{}'", "[!]".yellow(), name),
        },
    }
    Ok(())
}

fn handle_config(mut app_config: AppConfig, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!("{}", "Configuration".bold());
            println!("  Store file:      {}", app_config.store_path()?.display());
            println!("  Download root:   {}", app_config.download_root().display());
            println!("  Log filter:      {}", app_config.log_filter());
            println!("  Editor timeout:  {} ms", app_config.editor_query_timeout_ms);
            println!(
                "  Config file:     {}",
                config::config_file_path()?.display().to_string().dimmed()
            );
        }
        Some(ConfigCommands::Set {
            store_path,
            download_root,
            log_filter,
            editor_timeout_ms,
        }) => {
            if let Some(path) = store_path {
                app_config.store_path = Some(path);
            }
            if let Some(root) = download_root {
                app_config.download_root = Some(root);
            }
            if let Some(filter) = log_filter {
                app_config.log_filter = Some(filter);
            }
            if let Some(ms) = editor_timeout_ms {
                app_config.editor_query_timeout_ms = ms;
            }
            config::save_config(&app_config)?;
            println!("{} Configuration saved", "[✓]".green());
        }
    }
    Ok(())
}

async fn handle_settings(store: &JsonFileStore, command: SettingsCommands) -> Result<()> {
    match command {
        SettingsCommands::Show => {
            let settings = store.get_settings().await?;
            println!("{}", "Settings".bold());
            println!(
                "  Confirmation:    {}",
                if settings.confirmation_enabled { "on".green() } else { "off".yellow() }
            );
            println!("  Countdown:       {} ms", settings.confirmation_timeout_ms);
            println!("  Default folder:  {}", settings.default_folder);
            println!("  Conflict policy: {}", settings.conflict_policy);
            println!("  Store file:      {}", store.path().display().to_string().dimmed());
        }
        SettingsCommands::Set {
            timeout_ms,
            confirmation,
            default_folder,
            policy,
        } => {
            let mut settings = store.get_settings().await?;
            if let Some(timeout_ms) = timeout_ms {
                settings.confirmation_timeout_ms = timeout_ms;
            }
            if let Some(enabled) = confirmation {
                settings.confirmation_enabled = enabled;
            }
            if let Some(folder) = default_folder {
                settings.default_folder = folder;
            }
            if let Some(policy) = policy {
                settings.conflict_policy = policy;
            }
            store.set_settings(settings).await?;
            println!("{} Settings saved", "[✓]".green());
        }
    }
    Ok(())
}

async fn show_route(store: &JsonFileStore, url: &str, filename: &str, referrer: Option<String>) -> Result<()> {
    let rules = store.snapshot().await?;
    let settings = store.get_settings().await?;
    let info = DownloadInfo::new(0, url, referrer, filename);
    let plan = plan_route(&info, &rules, &settings);

    println!("{} {}", "Domain:".bold(), if info.domain.is_empty() { "-" } else { info.domain.as_str() });
    println!("{}", "Matching rules:".bold());
    for (i, candidate) in plan.decision.ranked.iter().enumerate() {
        println!(
            "  {}. {:<9} {:<30} -> {}  [priority {}]",
            i,
            candidate.source.as_str().cyan(),
            candidate.label,
            candidate.folder,
            candidate.priority
        );
    }

    match &plan.decision.resolution {
        Resolution::Final(rule) => println!("{} {}", "Winner:".bold(), rule.label.green()),
        Resolution::Conflict(tied) => {
            println!(
                "{} {} rules tie, the confirmation UI will ask",
                "Conflict:".yellow().bold(),
                tied.len()
            );
        }
    }

    println!("{} {}", "Browser path:".bold(), plan.destination.relative_path.green());
    if let Some(folder) = &plan.destination.absolute_folder {
        println!("{} {}", "Moved to:".bold(), folder.display().to_string().green());
    }
    Ok(())
}

async fn watch(store: JsonFileStore, app_config: &AppConfig) -> Result<()> {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(stdio::write_outbound(out_rx, tokio::io::stdout()));

    let store = Arc::new(store);
    let poller = store.spawn_watcher(STORE_POLL_INTERVAL);

    let hub = UiHub::new();
    let handle = Controller::start(
        Collaborators {
            store: store.clone(),
            ui: Arc::new(hub.clone()),
            host: Arc::new(StdioHost::new(out_tx.clone())),
            helper: Arc::new(LocalHelper::new()),
        },
        app_config.controller_config(),
    )
    .await
    .context("Failed to start the download controller")?;

    tracing::info!("Bridge ready on stdin/stdout");
    stdio::serve(BufReader::new(tokio::io::stdin()), &handle, &hub, out_tx).await?;

    poller.abort();
    let _ = handle.shutdown();
    if tokio::time::timeout(DRAIN_TIMEOUT, writer).await.is_err() {
        tracing::debug!("Bridge output not drained before exit");
    }
    Ok(())
}
