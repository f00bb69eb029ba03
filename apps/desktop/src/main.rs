use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use client_core::{InstallationManager, Simulator};
use futures::StreamExt;
use shared::{
    domain::{is_older_version, AppId, InstalledApp, Platform},
    progress::{OperationSnapshot, OperationState, ProgressEvent},
};
use storage::{FileStore, KeyValueStore, LibraryStore, MemoryStore, SqliteStore};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod catalog;
mod config;

use catalog::Catalog;
use config::{Backend, Settings};

type Library = LibraryStore<Arc<dyn KeyValueStore>>;

const BAR_WIDTH: usize = 20;

#[derive(Parser, Debug)]
#[command(name = "stars", about = "Browse, install and update applications")]
struct Cli {
    /// Directory holding the library (defaults to ~/.stars).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_enum)]
    backend: Option<Backend>,
    #[arg(long, global = true)]
    database_url: Option<String>,
    /// JSON catalog to use instead of the built-in one.
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List apps published in the catalog.
    Catalog,
    /// List installed apps.
    List,
    /// Print one installed app as JSON.
    Show { id: String },
    Install { id: String },
    Update { id: String },
    /// List installed apps that lag the catalog.
    Updates,
    /// Update every app that lags the catalog.
    UpdateAll,
    Remove { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = resolve_settings(&cli);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let catalog = match &settings.catalog_path {
        Some(path) => Catalog::load(path)?,
        None => Catalog::builtin()?,
    };
    let library = Arc::new(open_library(&settings).await?);
    let simulator = Simulator::new(library.clone());

    match cli.command {
        Command::Catalog => {
            for app in catalog.iter() {
                let marker = if library.is_installed(&app.id).await {
                    "installed"
                } else {
                    ""
                };
                println!(
                    "{:<12} {:<22} {:<10} {:<18} {marker}",
                    app.id, app.name, app.version, app.category
                );
            }
        }
        Command::List => {
            let apps = library.list().await;
            if apps.is_empty() {
                println!("No apps installed.");
            }
            for app in apps {
                print_installed(&app);
            }
        }
        Command::Show { id } => {
            let app = library
                .get(&AppId::new(id.clone()))
                .await
                .ok_or_else(|| anyhow!("{id} is not installed"))?;
            println!("{}", serde_json::to_string_pretty(&app)?);
        }
        Command::Install { id } => {
            let app = catalog
                .get(&AppId::new(id.clone()))
                .cloned()
                .ok_or_else(|| anyhow!("{id} is not in the catalog"))?;
            if let Some(platform) = Platform::current() {
                if !app.supports(platform) {
                    warn!(
                        "{} does not list {} as a supported platform",
                        app.name,
                        platform.display_name()
                    );
                }
            }
            if library.is_installed(&app.id).await {
                println!("{} is already installed.", app.name);
                return Ok(());
            }

            let mut handle = simulator.spawn_install(app);
            while let Some(event) = handle.events.next().await {
                render_progress(&event);
            }
            let installed = handle.finish().await?;
            println!("Installed {} {}", installed.name, installed.installed_version);
        }
        Command::Update { id } => {
            let mut handle = simulator.spawn_update(AppId::new(id.clone()));
            while let Some(event) = handle.events.next().await {
                render_progress(&event);
            }
            match handle.finish().await? {
                Some(updated) => {
                    println!("Updated {} to {}", updated.name, updated.installed_version)
                }
                None => println!("{id} is not installed."),
            }
        }
        Command::Updates => {
            let lagging = lagging_apps(&library, &catalog).await;
            if lagging.is_empty() {
                println!("Everything is up to date.");
            }
            for (app, latest) in lagging {
                println!("{:<12} {} -> {latest}", app.id, app.installed_version);
            }
        }
        Command::UpdateAll => {
            let lagging = lagging_apps(&library, &catalog).await;
            if lagging.is_empty() {
                println!("Everything is up to date.");
                return Ok(());
            }
            update_all(simulator, lagging.into_iter().map(|(app, _)| app.id)).await?;
        }
        Command::Remove { id } => {
            if library.remove(&AppId::new(id.clone())).await? {
                println!("Removed {id}.");
            } else {
                println!("{id} is not installed.");
            }
        }
    }

    Ok(())
}

fn resolve_settings(cli: &Cli) -> Settings {
    let mut settings = config::load_settings();
    if let Some(dir) = &cli.data_dir {
        settings.data_dir = dir.clone();
    }
    if let Some(backend) = cli.backend {
        settings.backend = backend;
    }
    if let Some(url) = &cli.database_url {
        settings.database_url = Some(url.clone());
    }
    if let Some(path) = &cli.catalog {
        settings.catalog_path = Some(path.clone());
    }
    settings
}

async fn open_library(settings: &Settings) -> Result<Library> {
    let backend: Arc<dyn KeyValueStore> = match settings.backend {
        Backend::File => {
            config::ensure_data_dir(&settings.data_dir)?;
            Arc::new(FileStore::new(&settings.data_dir))
        }
        Backend::Sqlite => {
            let database_url = settings.resolved_database_url();
            info!("opening sqlite library at {database_url}");
            Arc::new(SqliteStore::new(&database_url).await?)
        }
        Backend::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(LibraryStore::new(backend))
}

/// Installed apps whose installed version is older than the catalog's.
async fn lagging_apps(library: &Library, catalog: &Catalog) -> Vec<(InstalledApp, String)> {
    library
        .list()
        .await
        .into_iter()
        .filter_map(|app| {
            let latest = catalog.get(&app.id)?.version.clone();
            is_older_version(&app.installed_version, &latest).then_some((app, latest))
        })
        .collect()
}

async fn update_all(
    simulator: Simulator<Arc<dyn KeyValueStore>>,
    ids: impl Iterator<Item = AppId>,
) -> Result<()> {
    let manager = InstallationManager::new(simulator);
    let mut events = manager.subscribe();

    let tasks: Vec<_> = ids
        .map(|id| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.update(id).await })
        })
        .collect();
    let pending = tasks.len();

    let mut finished = 0;
    while finished < pending {
        let Some(snapshot) = next_snapshot(&mut events).await else {
            break;
        };
        match snapshot.state {
            OperationState::Running { percent, status } => {
                println!("{:<12} {}", snapshot.app_id, progress_line(percent, &status))
            }
            OperationState::Completed => {
                finished += 1;
                println!("{:<12} done", snapshot.app_id);
            }
            OperationState::Failed { error } => {
                finished += 1;
                println!("{:<12} failed: {}", snapshot.app_id, error.message);
            }
        }
    }

    for task in tasks {
        if let Err(err) = task.await? {
            warn!("update failed: {err:#}");
        }
    }
    Ok(())
}

/// Next state change, skipping past any the receiver fell behind on. `None`
/// once the manager is gone.
async fn next_snapshot(
    events: &mut broadcast::Receiver<OperationSnapshot>,
) -> Option<OperationSnapshot> {
    loop {
        match events.recv().await {
            Ok(snapshot) => return Some(snapshot),
            Err(RecvError::Lagged(skipped)) => {
                warn!("progress output skipped {skipped} updates");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

fn render_progress(event: &ProgressEvent) {
    println!("{}", progress_line(event.percent, &event.status));
}

fn progress_line(percent: u8, status: &str) -> String {
    let filled = usize::from(percent.min(100)) * BAR_WIDTH / 100;
    format!(
        "[{}{}] {percent:>3}%  {status}",
        "#".repeat(filled),
        " ".repeat(BAR_WIDTH - filled)
    )
}

fn print_installed(app: &InstalledApp) {
    let platforms: Vec<&str> = app.platforms.iter().map(|p| p.display_name()).collect();
    let marker = if app.has_update() { " *" } else { "" };
    println!(
        "{:<12} {:<22} {:<10}{marker} {:<10} {}",
        app.id,
        app.name,
        app.installed_version,
        app.size,
        platforms.join(", ")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::progress::OperationKind;

    #[test]
    fn progress_line_scales_bar_to_percent() {
        assert_eq!(
            progress_line(0, "Downloading… 0%"),
            format!("[{}]   0%  Downloading… 0%", " ".repeat(BAR_WIDTH))
        );
        assert_eq!(
            progress_line(50, "Installing…"),
            format!("[{}{}]  50%  Installing…", "#".repeat(10), " ".repeat(10))
        );
        assert_eq!(
            progress_line(100, "Finishing up…"),
            format!("[{}] 100%  Finishing up…", "#".repeat(BAR_WIDTH))
        );
    }

    #[tokio::test]
    async fn lagging_apps_lists_only_installs_behind_the_catalog() {
        let catalog = Catalog::builtin().expect("catalog");
        let backend: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let library = LibraryStore::new(backend);

        let mut gimp = catalog.get(&AppId::new("gimp")).expect("gimp").clone();
        let vscode = catalog.get(&AppId::new("vscode")).expect("vscode").clone();
        library.install(&vscode).await.expect("install");
        assert!(lagging_apps(&library, &catalog).await.is_empty());

        gimp.version = "2.9".into();
        library.install(&gimp).await.expect("install older gimp");
        let lagging = lagging_apps(&library, &catalog).await;
        assert_eq!(lagging.len(), 1);
        assert_eq!(lagging[0].0.id, gimp.id);
        assert_eq!(lagging[0].1, "2.10");

        library.update(&gimp.id).await.expect("update");
        assert!(lagging_apps(&library, &catalog).await.is_empty());

        library.update(&vscode.id).await.expect("update");
        library.update(&vscode.id).await.expect("update");
        assert!(lagging_apps(&library, &catalog).await.is_empty());
    }

    #[tokio::test]
    async fn next_snapshot_skips_past_lag_and_stops_on_close() {
        let (tx, mut rx) = broadcast::channel(2);
        for percent in [0, 20, 40, 60] {
            tx.send(OperationSnapshot {
                app_id: AppId::new("gimp"),
                kind: OperationKind::Update,
                state: OperationState::Running {
                    percent,
                    status: "Updating…".into(),
                },
            })
            .expect("send");
        }
        drop(tx);

        let first = next_snapshot(&mut rx).await.expect("snapshot after lag");
        assert!(matches!(first.state, OperationState::Running { percent: 40, .. }));
        let second = next_snapshot(&mut rx).await.expect("snapshot");
        assert!(matches!(second.state, OperationState::Running { percent: 60, .. }));
        assert!(next_snapshot(&mut rx).await.is_none());
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "stars",
            "install",
            "vscode",
            "--backend",
            "memory",
            "--data-dir",
            "/tmp/stars",
        ])
        .expect("parse");
        assert!(matches!(cli.command, Command::Install { ref id } if id == "vscode"));
        assert_eq!(cli.backend, Some(Backend::Memory));
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/stars")));
    }
}
