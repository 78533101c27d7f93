//! AnyVcs command line client
//!
//! Drives the repository facade against the built-in local backend. Status
//! output uses one-letter codes in the svn tradition (A/D/R/M/C/I/L/?).

use anyhow::{Context, Result, bail};
use anyvcs_core::{
    ChangeSet, LocalVcs, NullProgressMonitor, QueryFlags, Repository, Revision, VcsConfig,
    VersionInfo, VersionStatus, detect,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "anyvcs")]
#[command(author = "AnyVcs Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Unified version control client with an asynchronous status cache")]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize a new repository
    Init {
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Schedule paths for addition
    Add {
        paths: Vec<PathBuf>,
        #[arg(short, long)]
        recursive: bool,
    },

    /// Commit scheduled changes
    Commit {
        /// Commit message
        #[arg(short, long)]
        message: String,
        /// Paths to commit; defaults to everything pending
        paths: Vec<PathBuf>,
    },

    /// Show working copy status
    Status {
        #[arg(default_value = ".")]
        path: PathBuf,
        #[arg(short, long)]
        recursive: bool,
        /// Query the backend directly instead of the cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Show revision history, newest first
    Log {
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Print file content at a revision (head by default)
    Cat {
        path: PathBuf,
        /// Revision id or unique prefix
        #[arg(short, long)]
        rev: Option<String>,
    },

    /// Show per-line attribution
    Blame { path: PathBuf },

    /// Diff the working copy against the base text
    Diff { path: PathBuf },

    /// Restore paths to their last committed state
    Revert {
        paths: Vec<PathBuf>,
        #[arg(short, long)]
        recursive: bool,
    },

    /// Move a file or directory
    Mv {
        src: PathBuf,
        dst: PathBuf,
        #[arg(short, long)]
        force: bool,
    },

    /// Schedule paths for deletion
    Rm {
        paths: Vec<PathBuf>,
        /// Keep the working copy file on disk
        #[arg(long)]
        keep_local: bool,
        #[arg(short, long)]
        force: bool,
    },

    /// Add paths to the ignore list
    Ignore { paths: Vec<PathBuf> },

    /// Remove paths from the ignore list
    Unignore { paths: Vec<PathBuf> },

    /// Lock paths
    Lock { paths: Vec<PathBuf> },

    /// Unlock paths
    Unlock { paths: Vec<PathBuf> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Init { path } => {
            let vcs = LocalVcs::init(&path, VcsConfig::default())
                .with_context(|| format!("failed to initialize {}", path.display()))?;
            println!("Initialized repository at {} (UUID: {})", path.display(), vcs.uuid());
            Ok(())
        }
        command => {
            let anchor = command_anchor(&command);
            let repo = open_repository(&anchor)?;
            run(repo, command).await
        }
    }
}

/// Path used to locate the enclosing repository for a command.
fn command_anchor(command: &Commands) -> PathBuf {
    let path = match command {
        Commands::Add { paths, .. }
        | Commands::Commit { paths, .. }
        | Commands::Revert { paths, .. }
        | Commands::Rm { paths, .. }
        | Commands::Ignore { paths }
        | Commands::Unignore { paths }
        | Commands::Lock { paths }
        | Commands::Unlock { paths } => paths.first().cloned(),
        Commands::Status { path, .. } | Commands::Log { path } => Some(path.clone()),
        Commands::Cat { path, .. } | Commands::Blame { path } | Commands::Diff { path } => {
            Some(path.clone())
        }
        Commands::Mv { src, .. } => Some(src.clone()),
        Commands::Init { .. } => None,
    };
    path.unwrap_or_else(|| PathBuf::from("."))
}

fn open_repository(anchor: &Path) -> Result<Repository> {
    let (root, kind) =
        detect(anchor).with_context(|| format!("no repository found for {}", anchor.display()))?;
    if kind != "local" {
        bail!("backend '{}' has no client in this build", kind);
    }
    let backend = LocalVcs::open(&root)?;
    Ok(Repository::open(Arc::new(backend)))
}

async fn run(repo: Repository, command: Commands) -> Result<()> {
    let monitor = NullProgressMonitor;
    match command {
        Commands::Init { .. } => unreachable!("handled in main"),

        Commands::Add { paths, recursive } => {
            for path in paths {
                repo.add(&path, recursive, &monitor).await?;
                println!("A  {}", path.display());
            }
        }

        Commands::Commit { message, paths } => {
            let changes = build_change_set(&repo, &paths, &message).await?;
            let revision = repo.commit(&changes, &monitor).await?;
            println!(
                "Committed revision {} ({} item(s))",
                short_id(&revision.id),
                changes.items().len()
            );
        }

        Commands::Status {
            path,
            recursive,
            no_cache,
        } => {
            // Remote inclusion forces a direct backend query, which is
            // exactly what --no-cache asks for.
            let infos = repo
                .get_directory_version_info(&path, recursive, no_cache)
                .await?;
            for info in infos {
                let rel = info
                    .path
                    .strip_prefix(repo.root_path())
                    .unwrap_or(&info.path);
                println!("{}  {}", status_code(info.status), rel.display());
            }
        }

        Commands::Log { path } => {
            for revision in repo.get_history(&path, None).await? {
                print_revision(&revision);
            }
        }

        Commands::Cat { path, rev } => {
            let revision = resolve_revision(&repo, &path, rev.as_deref()).await?;
            print!("{}", repo.get_text_at_revision(&path, &revision).await?);
        }

        Commands::Blame { path } => {
            let annotations = repo.get_annotations(&path).await?;
            let contents = tokio::fs::read_to_string(&path).await?;
            for (annotation, line) in annotations.iter().zip(contents.lines()) {
                println!(
                    "{:>10} {:>14}: {}",
                    short_id(&annotation.revision),
                    annotation.author,
                    line
                );
            }
        }

        Commands::Diff { path } => {
            print!("{}", repo.generate_diff(&path).await?);
        }

        Commands::Revert { paths, recursive } => {
            for path in paths {
                repo.revert(&path, recursive, &monitor).await?;
                println!("Reverted {}", path.display());
            }
        }

        Commands::Mv { src, dst, force } => {
            repo.move_file(&src, &dst, force, &monitor).await?;
            println!("{} -> {}", src.display(), dst.display());
        }

        Commands::Rm {
            paths,
            keep_local,
            force,
        } => {
            for path in paths {
                repo.delete_file(&path, force, &monitor, keep_local).await?;
                println!("D  {}", path.display());
            }
        }

        Commands::Ignore { paths } => repo.ignore(&paths).await?,
        Commands::Unignore { paths } => repo.unignore(&paths).await?,

        Commands::Lock { paths } => {
            repo.lock(&monitor, &paths).await?;
            for path in &paths {
                println!("Locked {}", path.display());
            }
        }

        Commands::Unlock { paths } => {
            repo.unlock(&monitor, &paths).await?;
            for path in &paths {
                println!("Unlocked {}", path.display());
            }
        }
    }
    Ok(())
}

/// Collect the changeset for a commit: the given paths, or everything
/// pending under the root when none are named.
async fn build_change_set(repo: &Repository, paths: &[PathBuf], message: &str) -> Result<ChangeSet> {
    let mut changes = repo.create_change_set(repo.root_path());
    changes.set_global_comment(message);

    let config = VcsConfig::load(repo.root_path())?;
    changes.set_property(anyvcs_core::PROP_AUTHOR, config.author);
    if let Some(email) = config.email {
        changes.set_property(anyvcs_core::PROP_EMAIL, email);
    }

    if paths.is_empty() {
        let root = repo.root_path().to_path_buf();
        let infos = repo.get_directory_version_info(&root, true, true).await?;
        for info in infos.into_iter().filter(|i| is_pending(i)) {
            changes.add_file(info);
        }
    } else {
        for path in paths {
            let info = repo.get_version_info(path, QueryFlags::IGNORE_CACHE).await?;
            changes.add_file(info);
        }
    }

    if changes.is_empty() {
        bail!("nothing to commit");
    }
    Ok(changes)
}

fn is_pending(info: &VersionInfo) -> bool {
    info.status.intersects(
        VersionStatus::SCHEDULED_ADD
            | VersionStatus::SCHEDULED_DELETE
            | VersionStatus::SCHEDULED_REPLACE
            | VersionStatus::MODIFIED,
    )
}

async fn resolve_revision(
    repo: &Repository,
    path: &Path,
    rev: Option<&str>,
) -> Result<Revision> {
    let history = repo.get_history(path, None).await?;
    match rev {
        None => history
            .into_iter()
            .next()
            .context("path has no committed history"),
        Some(prefix) => history
            .into_iter()
            .find(|r| r.id.starts_with(prefix))
            .with_context(|| format!("no revision matching '{}'", prefix)),
    }
}

fn print_revision(revision: &Revision) {
    println!(
        "revision {}\nAuthor: {}{}\nDate:   {}\n\n    {}\n",
        short_id(&revision.id),
        revision.author,
        revision
            .email
            .as_ref()
            .map(|e| format!(" <{}>", e))
            .unwrap_or_default(),
        revision
            .timestamp
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S %z"),
        revision.message
    );
}

fn short_id(id: &str) -> &str {
    if id.len() > 10 && id.chars().all(|c| c.is_ascii_hexdigit()) {
        &id[..10]
    } else {
        id
    }
}

fn status_code(status: VersionStatus) -> char {
    if status.contains(VersionStatus::CONFLICTED) {
        'C'
    } else if status.contains(VersionStatus::SCHEDULED_ADD) {
        'A'
    } else if status.contains(VersionStatus::SCHEDULED_DELETE) {
        'D'
    } else if status.contains(VersionStatus::SCHEDULED_REPLACE) {
        'R'
    } else if status.contains(VersionStatus::MODIFIED) {
        'M'
    } else if status.contains(VersionStatus::IGNORED) {
        'I'
    } else if status.contains(VersionStatus::LOCKED) {
        'L'
    } else if status.contains(VersionStatus::UNVERSIONED) {
        '?'
    } else {
        ' '
    }
}
