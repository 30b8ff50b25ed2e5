//! # Hot Reload Module
//!
//! Rebuilds the route table when the route description changes, without
//! restarting the server.
//!
//! ## Overview
//!
//! [`watch_routes`] watches `routes.description` (a file, or a routes
//! directory recursively) and calls [`App::reload_from_config`] on every
//! create, modify or remove event. The new table (and, for a discovered
//! directory, the new templates) is swapped in atomically; requests already in
//! flight finish on the snapshot they started with.
//!
//! ## Error Handling
//!
//! A description that fails to parse or build is logged and the previous
//! table keeps serving, so saving a half-edited file never takes the server
//! down.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let watcher = kitrouter::hot_reload::watch_routes(app.clone(), None)?;
//! // keep `watcher` alive for as long as reloading should happen
//! ```
//!
//! Development only. Handlers are compiled in, so only the description and
//! templates can change.

use crate::app::App;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Called after every successful reload with the new route count.
pub type ReloadHook = Arc<dyn Fn(usize) + Send + Sync>;

fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    )
}

/// Watch the app's route description and reload on change.
///
/// The returned watcher stops watching when dropped.
pub fn watch_routes(app: App, on_reload: Option<ReloadHook>) -> notify::Result<RecommendedWatcher> {
    let path: PathBuf = app.config().routes.description.clone();
    watch_path(app, &path, on_reload)
}

/// Watch an explicit path and reload `app` from its configuration on change.
pub fn watch_path(
    app: App,
    path: &Path,
    on_reload: Option<ReloadHook>,
) -> notify::Result<RecommendedWatcher> {
    let mode = if path.is_dir() {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) if is_relevant(&event) => match app.reload_from_config() {
                Ok(()) => {
                    let routes = app.router().table().len();
                    info!(routes, paths = ?event.paths, "hot-reload: route table rebuilt");
                    if let Some(hook) = &on_reload {
                        hook(routes);
                    }
                }
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "hot-reload: rebuild failed, keeping previous routes");
                }
            },
            Ok(_) => {}
            Err(e) => error!(error = %e, "hot-reload: watch error"),
        },
        Config::default(),
    )?;

    watcher.watch(path, mode)?;
    info!(path = %path.display(), recursive = matches!(mode, RecursiveMode::Recursive), "Watching routes");
    Ok(watcher)
}
