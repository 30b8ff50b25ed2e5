//! # Routes Module
//!
//! Route descriptions and the compiled, immutable route table.
//!
//! ## Overview
//!
//! A route description is an ordered list of [`RouteNode`]s, one per route id
//! (`/blog/(public)/[slug=slug]`). Nodes come from three sources:
//!
//! - a `routes.yaml` / `routes.json` file ([`load_description`])
//! - a directory tree with `+page` / `+layout` / `+server` / `+error` markers ([`discover`])
//! - code, through [`RouteTableBuilder::node`]
//!
//! [`RouteTableBuilder::build`] parses every id into [`SegmentSpec`]s, resolves
//! matcher names and handler slots once, computes each route's layout chain and
//! error boundaries, and inserts the pattern into the segment trie used by the
//! [`Router`](crate::router::Router). Every configuration problem is reported
//! together as [`ConfigErrors`](crate::error::ConfigErrors).
//!
//! ## Pattern syntax
//!
//! | segment | meaning |
//! |---|---|
//! | `about` | literal |
//! | `[slug]` | one non-empty segment |
//! | `[id=integer]` | one segment accepted by the `integer` matcher |
//! | `[[lang]]` | optional segment |
//! | `[...path]` | one or more segments, must be last |
//! | `[[...path]]` | zero or more segments, must be last |
//! | `(group)` | no URL segment; scopes layouts and error boundaries |
//!
//! ## Layout chains
//!
//! A route's layouts are the layouts of every node whose id is a segment prefix
//! of the route id, root first. Groups take part in the prefix test, so a
//! layout in `/(app)` only wraps routes below `/(app)`.

mod build;
pub mod discover;
mod load;
pub mod pattern;
mod types;

pub use build::{RouteTable, RouteTableBuilder};
pub use discover::{discover, Discovered};
pub use load::{load_description, RouteDescription};
pub use types::{
    ErrorBoundary, Level, LevelSlots, MatchedRoute, NodeOptions, ParamSpec, ParamVec, Prerender,
    ResolveError, RouteDefinition, RouteNode, RouteOptions, SegmentSpec, TrailingSlash,
    MAX_INLINE_PARAMS,
};
