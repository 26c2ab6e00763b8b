mod cli;

use crate::cli::{Cli, Command};
use clap::Parser;
use miette::{IntoDiagnostic, Result, miette};
use pkgrepo_cache::{Database, Repository};
use pkgrepo_config::{Config, RepoConfig};
use pkgrepo_extract::source::PkgInfo;
use pkgrepo_library::{Mirror, PackageRepository, SummaryFormat};
use pkgrepo_storage::RepoDir;
use std::io::Write;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const CRATES: &[&str] = &[
    "pkgrepo",
    "pkgrepo_cache",
    "pkgrepo_config",
    "pkgrepo_extract",
    "pkgrepo_library",
    "pkgrepo_storage",
];

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = Config::load(cli.config.as_deref()).map_err(|err| miette!("{err:?}"))?;
    run(&cli, &config).await
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    // RUST_LOG wins when set.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(CRATES.iter().map(|krate| format!("{krate}={level}")).collect::<Vec<_>>().join(","))
    });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

async fn open(config: &Config, id: &str, repo: &RepoConfig, dry_run: bool) -> Result<(Database, PackageRepository)> {
    let dir = RepoDir::new(&repo.path).map_err(|err| miette!("{err:?}"))?.with_extensions(&config.extensions);
    let db = Database::connect_for_repo(&config.cache_dir, id).await.map_err(|err| miette!("{err:?}"))?;
    let cache = Repository::new(db.pool().clone(), dry_run);
    let source = match PkgInfo::from_config(config.extractor.command.as_deref(), Some(&config.extractor.args)) {
        Ok(source) => source,
        Err(err) => {
            // Reading the index doesn't need the extractor; extraction will
            // fail per batch and leave files pending.
            tracing::warn!(repo = id, error = ?err, "Metadata extractor not found");
            PkgInfo::new("pkg_info", config.extractor.args.iter().cloned())
        },
    };
    let repository = PackageRepository::new(id, dir, cache, Arc::new(source))
        .with_auth_token(config.auth_token.clone())
        .with_retention(repo.retention);
    Ok((db, repository))
}

/// Exactly one repository: the selected one, or the only one configured.
fn single<'a>(config: &'a Config, id: Option<&str>) -> Result<(&'a str, &'a RepoConfig)> {
    let mut selected = config.select_repos(id).map_err(|err| miette!("{err:?}"))?;
    if selected.len() != 1 {
        return Err(miette!("several repositories are configured; choose one with --repo"));
    }
    selected.pop().ok_or_else(|| miette!("no repository configured"))
}

async fn run(cli: &Cli, config: &Config) -> Result<()> {
    match &cli.command {
        Command::Remove { filenames } => {
            let (id, repo) = single(config, cli.repo.as_deref())?;
            let (db, repository) = open(config, id, repo, cli.dry_run).await?;
            for filename in filenames {
                let removed = repository.remove_file(filename).await.map_err(|err| miette!("{err:?}"))?;
                if !removed {
                    tracing::warn!(repo = id, filename, "Not in the index");
                }
            }
            db.close().await;
            return Ok(());
        },
        Command::Upload { file, name, token } => {
            let (id, repo) = single(config, cli.repo.as_deref())?;
            let filename = match name {
                Some(name) => name.clone(),
                None => file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .ok_or_else(|| miette!("cannot determine a filename for {}", file.display()))?,
            };
            let (db, repository) = open(config, id, repo, cli.dry_run).await?;
            // Stage a copy; accepting an upload moves the staged file.
            let staged = config.tmp_dir.join(format!(".pkgrepo-upload-{}", std::process::id()));
            std::fs::copy(file, &staged).into_diagnostic()?;
            let result = repository.accept_upload(token.as_deref(), &staged, &filename).await;
            if staged.exists() {
                let _ = std::fs::remove_file(&staged);
            }
            let outcome = result.map_err(|err| miette!("{err:?}"))?;
            println!("{id}: {filename} ({} bytes) {:?}", outcome.registration.size, outcome.registration.outcome);
            db.close().await;
            return Ok(());
        },
        _ => {},
    }

    let repos = config.select_repos(cli.repo.as_deref()).map_err(|err| miette!("{err:?}"))?;
    let labelled = repos.len() > 1;
    for (id, repo) in repos {
        let (db, repository) = open(config, id, repo, cli.dry_run).await?;
        let result = run_one(cli, config, &repository, repo, labelled).await;
        db.close().await;
        result?;
    }
    Ok(())
}

async fn run_one(
    cli: &Cli,
    config: &Config,
    repository: &PackageRepository,
    repo: &RepoConfig,
    labelled: bool,
) -> Result<()> {
    let id = repository.id();
    let prefix = if labelled { format!("{id}: ") } else { String::new() };
    match &cli.command {
        Command::Resync => {
            let stats = repository.resync().await.map_err(|err| miette!("{err:?}"))?;
            println!(
                "{prefix}{} files, {} new, {} changed, {} extracted, {} failed batches",
                stats.scan.discovered,
                stats.scan.registered,
                stats.scan.invalidated,
                stats.extract.extracted,
                stats.extract.failed_batches
            );
        },
        Command::Mirror => {
            let mirror = Mirror::new(&config.mirror.command, &config.mirror.args);
            let stats = mirror.run(repository, repo.upstream.as_deref()).await.map_err(|err| miette!("{err:?}"))?;
            println!(
                "{prefix}transfer {}, {} new, {} extracted",
                if stats.transferred { "ok" } else { "skipped or failed" },
                stats.resync.scan.registered,
                stats.resync.extract.extracted
            );
        },
        Command::Prune { keep } => {
            let Some(retention) = keep.or(repository.retention()) else {
                tracing::warn!(repo = id, "No retention configured; nothing to prune");
                return Ok(());
            };
            let stats = repository.prune(retention).await.map_err(|err| miette!("{err:?}"))?;
            println!("{prefix}{} pruned, {} failed", stats.removed, stats.failed);
        },
        Command::Categories => {
            for category in repository.list_categories().await.map_err(|err| miette!("{err:?}"))? {
                println!("{prefix}{category}");
            }
        },
        Command::List { category } => {
            for filename in repository.list_artifacts(category.as_deref()).await.map_err(|err| miette!("{err:?}"))? {
                println!("{prefix}{filename}");
            }
        },
        Command::Summary { format, output } => {
            let bytes = match format {
                Some(format) => {
                    let format: SummaryFormat = format.parse().map_err(|err| miette!("{err:?}"))?;
                    repository.compressed_summary(format).await.map_err(|err| miette!("{err:?}"))?.bytes
                },
                None => repository.summary().await.map_err(|err| miette!("{err:?}"))?.into_bytes(),
            };
            match output {
                Some(path) => std::fs::write(path, &bytes).into_diagnostic()?,
                None => std::io::stdout().lock().write_all(&bytes).into_diagnostic()?,
            }
        },
        Command::Stats => {
            let stats = repository.stats().await.map_err(|err| miette!("{err:?}"))?;
            println!(
                "{prefix}{} total, {} fresh, {} pending, {} categories",
                stats.total, stats.fresh, stats.pending, stats.categories
            );
        },
        Command::Remove { .. } | Command::Upload { .. } => {},
    }
    Ok(())
}
