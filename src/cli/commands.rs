use crate::adapter::{Adapter, Build, StaticAdapter};
use crate::app::{App, AppBuilder};
use crate::config::KitConfig;
use crate::hot_reload::watch_routes;
use crate::manifest::Manifest;
use crate::prerender::prerender;
use crate::runtime_config::RuntimeConfig;
use crate::server::{HttpServer, KitService};
use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use url::Url;

/// Command-line interface for kitrouter
#[derive(Parser, Debug)]
#[command(name = "kitrouter")]
#[command(about = "Route, render and prerender a kitrouter app", long_about = None)]
pub struct Cli {
    /// Config file (`kit.yaml`, `kit.yml` or `kit.toml`); defaults apply when absent
    #[arg(short, long, global = true, env = "KIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Show unexpected error messages to clients
    #[arg(long, global = true, default_value_t = false)]
    pub dev: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the route table and list routes in match order
    Routes {
        /// Print the manifest as JSON instead of a table
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Prerender reachable pages into the output directory
    Prerender {
        /// Output directory (overrides `prerender.out_dir`)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Fail on warnings
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// Prerender, then run the static adapter and write `manifest.json`
    Build {
        #[arg(short, long)]
        out: Option<PathBuf>,

        #[arg(long, default_value_t = false)]
        strict: bool,

        /// SPA fallback page for routes that were not prerendered (e.g. `200.html`)
        #[arg(long)]
        fallback: Option<String>,
    },
    /// Serve the app over HTTP
    Serve {
        /// Listen address (overrides `server.addr`)
        #[arg(short, long)]
        addr: Option<String>,

        /// Rebuild the route table when the route description changes
        #[arg(long, default_value_t = false)]
        watch: bool,
    },
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<KitConfig> {
        let mut config = KitConfig::load_or_default(self.config.as_deref())?;
        config.app.dev |= self.dev;
        Ok(config)
    }
}

/// Run the CLI with routes and handlers from the config only.
pub fn run_cli(cli: Cli) -> anyhow::Result<()> {
    run_cli_with(cli, |builder| builder)
}

/// Run the CLI; `configure` registers the app's handlers and matchers before
/// the route table is built.
pub fn run_cli_with<F>(cli: Cli, configure: F) -> anyhow::Result<()>
where
    F: FnOnce(AppBuilder) -> AppBuilder,
{
    let mut config = cli.load_config()?;
    match &cli.command {
        Commands::Prerender { out, strict } | Commands::Build { out, strict, .. } => {
            if let Some(out) = out {
                config.prerender.out_dir.clone_from(out);
            }
            config.prerender.strict |= *strict;
        }
        Commands::Serve { addr: Some(addr), .. } => config.server.addr.clone_from(addr),
        Commands::Routes { .. } | Commands::Serve { .. } => {}
    }

    let runtime = RuntimeConfig::from_env();
    runtime.apply();
    let app = build_app(config, runtime, configure)?;

    match cli.command {
        Commands::Routes { json } => print_routes(&app, json),
        Commands::Prerender { .. } => {
            let report = prerender(&app)?;
            println!(
                "prerendered {} paths ({} files) into {}",
                report.pages.len(),
                report.files_written,
                report.out_dir.display()
            );
            for warning in &report.warnings {
                println!("  warning: {warning}");
            }
            Ok(())
        }
        Commands::Build { fallback, .. } => {
            let report = prerender(&app)?;
            let router = app.router();
            let manifest = Manifest::from_table(router.table()).with_prerendered(&report);
            let adapter = fallback.map_or_else(StaticAdapter::new, StaticAdapter::with_fallback);
            adapter.adapt(&Build {
                app: &app,
                manifest: &manifest,
                report: &report,
                out_dir: &report.out_dir,
            })?;
            println!(
                "built {} prerendered paths into {} with the {} adapter",
                manifest.prerendered.len(),
                report.out_dir.display(),
                adapter.name()
            );
            Ok(())
        }
        Commands::Serve { watch, .. } => serve(app, watch),
    }
}

fn build_app<F>(config: KitConfig, runtime: RuntimeConfig, configure: F) -> anyhow::Result<App>
where
    F: FnOnce(AppBuilder) -> AppBuilder,
{
    let description = config.routes.description.clone();
    let mut builder = configure(App::builder(config).runtime(runtime));
    if description.exists() {
        builder = builder.load_from_config()?;
    } else {
        warn!(
            description = %description.display(),
            "Route description not found; using routes registered in code only"
        );
    }
    builder.build().map_err(|errors| anyhow!("{errors}"))
}

fn print_routes(app: &App, json: bool) -> anyhow::Result<()> {
    let router = app.router();
    if json {
        let manifest = Manifest::from_table(router.table());
        let out = serde_json::to_string_pretty(&manifest).context("Failed to serialize routes")?;
        println!("{out}");
        return Ok(());
    }
    router.dump_routes();
    Ok(())
}

fn serve(app: App, watch: bool) -> anyhow::Result<()> {
    let addr = app.config().server.addr.clone();
    let origin = Url::parse(&format!("http://{addr}"))
        .with_context(|| format!("server.addr '{addr}' is not a host:port"))?;

    let _watcher = if watch {
        Some(watch_routes(app.clone(), None).context("Failed to watch routes")?)
    } else {
        None
    };

    let handle = HttpServer(KitService::new(app, origin))
        .start(addr.as_str())
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %handle.addr(), watch, "kitrouter serving");
    wait_for_shutdown()?;
    handle.stop();
    Ok(())
}

#[cfg(unix)]
fn wait_for_shutdown() -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handlers")?;
    if let Some(signal) = signals.forever().next() {
        info!(signal, "Shutdown signal received");
    }
    Ok(())
}

#[cfg(not(unix))]
fn wait_for_shutdown() -> anyhow::Result<()> {
    loop {
        std::thread::park();
    }
}
