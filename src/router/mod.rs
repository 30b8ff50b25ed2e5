//! # Router Module
//!
//! Resolves a request path to the most specific route of the current
//! [`RouteTable`](crate::routes::RouteTable).
//!
//! ## Overview
//!
//! - Paths are split on `/` before percent-decoding, so an encoded `%2F` stays
//!   inside its segment
//! - A single trailing slash is insignificant; `//` is an empty segment that
//!   only rest params can absorb
//! - Literals compare against the decoded segment and matchers see decoded values
//!
//! ## Architecture
//!
//! Matching walks a segment trie built once by the route table builder.
//! Siblings are ordered literal > matched param > param > optional > rest, then
//! by declaration order; a depth-first search with backtracking therefore
//! returns the first route in specificity order that aligns with every segment.
//!
//! ## Example
//!
//! ```rust,ignore
//! let router = Router::new(table);
//! if let Some(m) = router.match_path("/blog/hello-world") {
//!     println!("{} slug={:?}", m.route.id, m.param("slug"));
//! }
//! ```

mod core;
pub(crate) mod trie;

pub use core::{split_path, Router};
