//! # Load Pipeline Module
//!
//! Runs the load functions of a matched page route and produces a
//! [`LoadOutcome`] for the response builder.
//!
//! ## Overview
//!
//! For a page route the pipeline walks the route's levels (layouts outer to
//! inner, then the page). Each level may have a server load and a universal
//! load:
//!
//! ```text
//! root layout:   server load -> universal load(data = server output)
//! blog layout:   server load -> universal load
//! page:          server load -> universal load
//! ```
//!
//! Every load receives a [`LoadEvent`] whose `parent()` returns the merged data
//! of the levels above it. Merging is shallow: deeper keys override.
//!
//! ## Control flow
//!
//! A load returns `Err(LoadSignal::Redirect{..})` or `Err(LoadSignal::Error(..))`
//! to stop the remaining levels. Headers and cookies set before that point are
//! kept. Panics are caught and turned into unexpected 500 errors.
//!
//! ## Data requests
//!
//! `__data.json` requests run server loads only ([`LoadMode::Data`]). The
//! `x-kit-invalidated` mask (`"1001"`) names the levels to rerun; skipped levels
//! are sent as `{"type":"skip"}`. A skipped level's server load still runs if a
//! deeper load calls `parent()`, so parent data never depends on the mask.

mod core;
mod data;
mod event;
mod fetch;

pub(crate) use core::panic_message;
pub use core::{
    run_endpoint, run_load_pipeline, EncodedLevel, ErrorOrigin, LevelKind, LoadMode, LoadOutcome,
    PageData, PipelineState, INVALIDATED_PARAM,
};
pub use data::{CustomValue, DataValue, LoadData, Transport, Uses, TRANSPORT_TYPE_KEY};
pub use event::{EndpointEvent, EndpointReply, LoadEvent, LoadSignal};
pub use fetch::{ExternalFetch, FetchRequest, ReqwestFetch};
