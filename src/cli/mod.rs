//! # CLI Module
//!
//! Command-line entry points for a kitrouter app.
//!
//! ## Commands
//!
//! ### `routes`
//!
//! Build the route table (reporting every configuration error) and list the
//! routes in match order:
//!
//! ```bash
//! kitrouter --config kit.yaml routes
//! kitrouter routes --json
//! ```
//!
//! ### `prerender`
//!
//! Render every reachable prerenderable page:
//!
//! ```bash
//! kitrouter prerender --out build --strict
//! ```
//!
//! ### `build`
//!
//! Prerender, then hand the result to the static adapter, which writes
//! `manifest.json` and fails if a route still needs a server:
//!
//! ```bash
//! kitrouter build --fallback 200.html
//! ```
//!
//! ### `serve`
//!
//! Serve live requests; `--watch` rebuilds the route table when the route
//! description changes:
//!
//! ```bash
//! kitrouter serve --addr 0.0.0.0:8080 --watch
//! ```
//!
//! ## Usage from Code
//!
//! Load functions and endpoints are Rust code, so an app embeds the CLI and
//! registers them before the table is built:
//!
//! ```rust,ignore
//! use kitrouter::cli::{run_cli_with, Cli};
//! use clap::Parser;
//!
//! run_cli_with(Cli::parse(), |builder| builder.handlers(my_handlers()))?;
//! ```
//!
//! A non-zero exit code means a configuration error, a failed prerender
//! (including warnings under `--strict`) or an adapter failure.

mod commands;

#[cfg(test)]
mod tests;

pub use commands::{run_cli, run_cli_with, Cli, Commands};
