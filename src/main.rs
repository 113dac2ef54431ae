// src/main.rs

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use zenit::repository::{
    self, MetadataCache, PackageVerifier, Repository, RepositoryClient, SourcesList,
};
use zenit::resolver::{Job, SolverOptions};
use zenit::session::{self, InstalledSource, Paths, Session};
use zenit::transaction::Transaction;

#[derive(Parser)]
#[command(name = "zenit")]
#[command(author, version, about = "Package manager for RPM-based distributions", long_about = None)]
struct Cli {
    /// Repository list
    #[arg(long, global = true, default_value = repository::config::DEFAULT_SOURCES_PATH)]
    config: PathBuf,

    /// Metadata and package cache directory
    #[arg(long, global = true, default_value = session::DEFAULT_CACHE_DIR)]
    cache_dir: PathBuf,

    /// Installed-state database
    #[arg(long, global = true, default_value = session::DEFAULT_DB_PATH)]
    db_path: PathBuf,

    /// Directory holding repository signing keys (<repo>.asc)
    #[arg(long, global = true, default_value = session::DEFAULT_KEYRING_DIR)]
    keyring_dir: PathBuf,

    /// Answer yes to confirmation prompts
    #[arg(short = 'y', long, global = true)]
    assume_yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh repository metadata
    Update,
    /// Install a package (optionally `name>=version`)
    Install {
        package: String,
    },
    /// Remove an installed package
    Remove {
        package: String,
        /// Also remove installed packages that depend on it
        #[arg(long)]
        cascade: bool,
    },
    /// Search available packages by name or summary
    Search {
        /// Substring, or a glob such as 'lib*'
        pattern: String,
    },
    /// List packages
    List {
        #[command(subcommand)]
        what: ListCommands,
    },
    /// Upgrade installed packages to their newest versions
    Upgrade {
        /// Only this package
        package: Option<String>,
    },
    /// Synchronize installed packages with the preferred repositories
    DistUpgrade {
        /// Only this package
        package: Option<String>,
    },
    /// Manage repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },
    /// Show transaction history
    History,
    /// Generate shell completions
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ListCommands {
    /// Installed packages
    Installed,
}

#[derive(Subcommand)]
enum RepoCommands {
    /// Add a repository
    Add {
        name: String,
        url: String,
        /// Metadata format
        #[arg(long = "type", default_value = repository::config::RPM_MD)]
        repo_type: String,
        #[arg(long, default_value_t = 100)]
        priority: i32,
        /// Skip signature checks for this repository
        #[arg(long)]
        no_gpgcheck: bool,
        /// Add the repository disabled
        #[arg(long)]
        disabled: bool,
        /// URL of a list of mirror base URLs
        #[arg(long)]
        mirrorlist: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
        /// Signing key to import: a file path or a URL
        #[arg(long)]
        gpgkey: Option<String>,
    },
    /// Remove a repository
    Remove { name: String },
    /// List repositories
    List,
    /// Enable a repository
    Enable { name: String },
    /// Disable a repository
    Disable { name: String },
}

impl Cli {
    fn paths(&self) -> Paths {
        Paths {
            sources: self.config.clone(),
            cache_dir: self.cache_dir.clone(),
            db_path: self.db_path.clone(),
            keyring_dir: self.keyring_dir.clone(),
        }
    }
}

fn confirm(prompt: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes" | "Yes"))
}

/// Resolve, show and execute a job
fn run_job(cli: &Cli, job: Job, options: SolverOptions, ask: bool) -> Result<()> {
    let mut session = if job.refreshes_metadata() {
        let (session, report) = Session::open_refreshed(cli.paths(), InstalledSource::default())?;
        info!("{} repositories refreshed", report.refreshed.len());
        session
    } else {
        Session::open(cli.paths())?
    };
    for warning in session.pool().warnings() {
        warn!("{}", warning);
    }

    let transaction: Transaction = session.plan(&job, options)?;
    if transaction.is_empty() {
        println!("Nothing to do.");
        return Ok(());
    }

    println!("Transaction:");
    println!("{}", transaction);
    println!(
        "\n{} to install, {} to remove",
        transaction.installs().count(),
        transaction.erasures().count()
    );

    if ask
        && !confirm(
            "Are you sure you want to proceed? This may change system versions.",
            cli.assume_yes,
        )?
    {
        println!("Aborted.");
        return Ok(());
    }

    let report = session.apply(&transaction, &job.to_string())?;
    print!("{}", report);
    if let Some(failed) = report.failed {
        return Err(anyhow::anyhow!("{} failed: {}", failed.step, failed.error));
    }
    Ok(())
}

/// URLs pass through; local paths become absolute `file://` URLs
fn key_location(key: &str) -> Result<String> {
    if key.contains("://") {
        return Ok(key.to_string());
    }
    let path = std::fs::canonicalize(key).with_context(|| format!("Key file {} not found", key))?;
    Ok(format!("file://{}", path.display()))
}

fn edit_sources<F>(cli: &Cli, edit: F) -> Result<()>
where
    F: FnOnce(&mut SourcesList) -> zenit::Result<()>,
{
    let mut sources = SourcesList::load(&cli.config)?;
    edit(&mut sources)?;
    sources
        .save()
        .with_context(|| format!("Failed to save {}", cli.config.display()))?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Update => {
            let report = session::refresh_metadata(&cli.paths())?;

            for name in &report.refreshed {
                println!("  refreshed  {}", name);
            }
            for (name, error) in &report.failed {
                println!("  FAILED     {}: {}", name, error);
            }
            println!(
                "{} repositories refreshed, {} failed",
                report.refreshed.len(),
                report.failed.len()
            );
            Ok(())
        }
        Commands::Install { package } => {
            run_job(&cli, Job::Install(package.clone()), SolverOptions::default(), false)
        }
        Commands::Remove { package, cascade } => {
            let options = SolverOptions {
                cascade_removals: *cascade,
            };
            run_job(&cli, Job::Remove(package.clone()), options, false)
        }
        Commands::Search { pattern } => {
            let session = Session::open(cli.paths())?;
            let pool = session.pool();
            let matches = pool.search(pattern);
            if matches.is_empty() {
                println!("No packages found.");
                return Ok(());
            }
            for id in &matches {
                let pkg = pool.get(*id);
                println!("{:<50} {:<12} {}", pkg.nevra.to_string(), pkg.repo, pkg.summary);
            }
            println!("\nTotal: {} package(s)", matches.len());
            Ok(())
        }
        Commands::List {
            what: ListCommands::Installed,
        } => {
            let session = Session::open(cli.paths())?;
            let installed = session.installed()?;
            if installed.is_empty() {
                println!("No packages installed.");
                return Ok(());
            }
            println!("Installed packages:");
            for pkg in &installed {
                println!(
                    "  {:<50} {}",
                    pkg.nevra.to_string(),
                    pkg.repo_origin.as_deref().unwrap_or("-")
                );
            }
            println!("\nTotal: {} package(s)", installed.len());
            Ok(())
        }
        Commands::Upgrade { package } => {
            run_job(&cli, Job::Upgrade(package.clone()), SolverOptions::default(), false)
        }
        Commands::DistUpgrade { package } => {
            run_job(&cli, Job::DistUpgrade(package.clone()), SolverOptions::default(), true)
        }
        Commands::Repo { command } => match command {
            RepoCommands::Add {
                name,
                url,
                repo_type,
                priority,
                no_gpgcheck,
                disabled,
                mirrorlist,
                description,
                gpgkey,
            } => {
                let mut repo = Repository::new(name.clone(), url.clone()).with_priority(*priority);
                repo.repo_type = repo_type.clone();
                repo.gpgcheck = !no_gpgcheck;
                repo.enabled = !disabled;
                repo.mirrorlist = mirrorlist.clone();
                repo.description = description.clone();
                repo.gpgkey = gpgkey.as_deref().map(key_location).transpose()?;
                edit_sources(&cli, |sources| sources.add(repo.clone()))?;
                println!("Added repository {}", name);

                if repo.gpgkey.is_some() {
                    let client = RepositoryClient::new()?;
                    let verifier = PackageVerifier::new(&cli.keyring_dir);
                    if let Some(fingerprint) = repository::fetch_key(&client, &repo, &verifier)
                        .with_context(|| format!("Failed to import signing key for {}", name))?
                    {
                        println!("Imported key {}", fingerprint);
                    }
                }
                Ok(())
            }
            RepoCommands::Remove { name } => {
                edit_sources(&cli, |sources| sources.remove(name).map(|_| ()))?;
                let cache = MetadataCache::new(&cli.cache_dir);
                if let Err(e) = cache.lock().and_then(|lock| cache.forget(&lock, name)) {
                    warn!("Cached metadata for {} not removed: {}", name, e);
                }
                println!("Removed repository {}", name);
                Ok(())
            }
            RepoCommands::List => {
                let sources = SourcesList::load(&cli.config)?;
                let cache = MetadataCache::new(&cli.cache_dir);
                if sources.repos().is_empty() {
                    println!("No repositories configured.");
                    return Ok(());
                }
                println!(
                    "{:<16} {:<8} {:<8} {:<26} URL",
                    "NAME", "ENABLED", "PRIORITY", "REFRESHED"
                );
                for repo in sources.repos() {
                    let refreshed = cache
                        .entry(&repo.name)
                        .map(|e| e.refreshed_at.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string());
                    println!(
                        "{:<16} {:<8} {:<8} {:<26} {}",
                        repo.name,
                        if repo.enabled { "yes" } else { "no" },
                        repo.priority,
                        refreshed,
                        repo.url
                    );
                }
                Ok(())
            }
            RepoCommands::Enable { name } => {
                edit_sources(&cli, |sources| sources.set_enabled(name, true))?;
                info!("Repository '{}' enabled", name);
                println!("Enabled repository {}", name);
                Ok(())
            }
            RepoCommands::Disable { name } => {
                edit_sources(&cli, |sources| sources.set_enabled(name, false))?;
                info!("Repository '{}' disabled", name);
                println!("Disabled repository {}", name);
                Ok(())
            }
        },
        Commands::History => {
            let session = Session::open(cli.paths())?;
            let history = session.history()?;
            if history.is_empty() {
                println!("No transactions recorded.");
                return Ok(());
            }
            for (changeset, steps) in &history {
                println!(
                    "#{} [{}] {} ({})",
                    changeset.id.unwrap_or_default(),
                    changeset.status.as_str(),
                    changeset.description,
                    changeset.created_at.as_deref().unwrap_or("unknown time")
                );
                for step in steps {
                    print!("    {:<8} {:<8} {}", step.status.as_str(), step.action, step.nevra);
                    if let Some(error) = &step.error {
                        print!(": {}", error);
                    }
                    println!();
                }
            }
            Ok(())
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "zenit", &mut io::stdout());
            Ok(())
        }
    }
}
