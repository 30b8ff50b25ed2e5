//! Pipeline core - runs the loads of one matched page route.

use super::data::{LoadData, Uses};
use super::event::{EndpointEvent, EndpointReply, LoadEvent, LoadSignal};
use crate::app::App;
use crate::context::RequestContext;
use crate::error::{HttpError, SerializationError};
use crate::handlers::{EndpointFn, LoadFn};
use crate::response::KitResponse;
use crate::routes::{Level, MatchedRoute};
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Query parameter carrying the invalidation mask of a data request.
pub const INVALIDATED_PARAM: &str = "x-kit-invalidated";

/// Which loads run for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadMode {
    /// Full document: server then universal load at every level
    Html,
    /// `__data.json`: server loads only. `invalidated[i] == false` skips level
    /// `i`; missing entries rerun.
    Data { invalidated: Option<Vec<bool>> },
}

impl LoadMode {
    /// Parse a mask such as `"1001"`. Any character other than `0` reruns.
    #[must_use]
    pub fn data_with_mask(mask: Option<&str>) -> Self {
        LoadMode::Data {
            invalidated: mask.map(|m| m.chars().map(|c| c != '0').collect()),
        }
    }

    fn skips(&self, index: usize) -> bool {
        match self {
            LoadMode::Data {
                invalidated: Some(mask),
            } => mask.get(index) == Some(&false),
            _ => false,
        }
    }

    fn runs_universal(&self) -> bool {
        matches!(self, LoadMode::Html)
    }
}

/// Pipeline states, traced on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Pending,
    RunningLayouts,
    RunningLeaf,
    Merging,
    Done,
    Redirected,
    Errored,
    Aborted,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Pending => "pending",
            PipelineState::RunningLayouts => "running_layouts",
            PipelineState::RunningLeaf => "running_leaf",
            PipelineState::Merging => "merging",
            PipelineState::Done => "done",
            PipelineState::Redirected => "redirected",
            PipelineState::Errored => "errored",
            PipelineState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// How a level appears in a data response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelKind {
    /// The level ran and produced data
    Data,
    /// Skipped by the invalidation mask; the client keeps its copy
    Skip,
    /// Nothing to send (no server load in a data request)
    Null,
}

/// A completed level with its JSON-encoded data.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedLevel {
    pub node_id: String,
    pub depth: usize,
    pub template: Option<String>,
    pub kind: LevelKind,
    /// Data produced by this level alone
    pub own: Map<String, Value>,
    /// Data of this level merged over every level above it
    pub merged: Map<String, Value>,
    /// Server load output, embedded for hydration
    pub server: Option<Map<String, Value>>,
    pub uses: Uses,
}

/// Successful pipeline result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageData {
    /// Layouts outer to inner, then the page
    pub levels: Vec<EncodedLevel>,
    /// Final merged data handed to the page
    pub data: Map<String, Value>,
}

/// Where a pipeline error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// Layout at this index of the route's layout chain
    Layout(usize),
    Leaf,
}

/// Result of running the loads of a page route.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Data(PageData),
    Redirect { status: u16, location: String },
    Error {
        error: HttpError,
        origin: ErrorOrigin,
        /// Levels that completed before the error
        levels: Vec<EncodedLevel>,
    },
    Aborted,
}

/// Data of the levels above the running load. Levels skipped by the
/// invalidation mask are loaded the first time a deeper load asks for
/// `parent()`, so a child sees the same parent data on every request.
#[derive(Default)]
pub(crate) struct ParentChain {
    levels: Vec<ParentLevel>,
    merged: LoadData,
    /// Redirect or error raised by a deferred load; surfaces from the load
    /// that called `parent()`.
    failure: Option<LoadSignal>,
}

enum ParentLevel {
    Ready(LoadData),
    /// Index into the route's levels
    Deferred(usize),
}

impl ParentChain {
    fn from_data(data: LoadData) -> Self {
        Self {
            levels: Vec::new(),
            merged: data,
            failure: None,
        }
    }

    fn push_ready(&mut self, data: &LoadData) {
        self.merged.merge(data);
        self.levels.push(ParentLevel::Ready(data.clone()));
    }

    fn push_deferred(&mut self, index: usize) {
        self.levels.push(ParentLevel::Deferred(index));
    }

    pub(crate) fn take_failure(&mut self) -> Option<LoadSignal> {
        self.failure.take()
    }

    pub(crate) fn resolve(&mut self, app: &App, ctx: &mut RequestContext, matched: &MatchedRoute) -> &LoadData {
        let deferred = self.levels.iter().any(|l| matches!(l, ParentLevel::Deferred(_)));
        if deferred && self.failure.is_none() {
            if let Err(signal) = self.run_deferred(app, ctx, matched) {
                self.failure = Some(signal);
            }
        }
        &self.merged
    }

    fn run_deferred(&mut self, app: &App, ctx: &mut RequestContext, matched: &MatchedRoute) -> Result<(), LoadSignal> {
        let levels = route_levels(matched);
        let mut above = LoadData::new();
        for slot in &mut self.levels {
            if let ParentLevel::Deferred(index) = *slot {
                let Some(level) = levels.get(index).copied() else {
                    continue;
                };
                let data = match &level.server_load {
                    Some(load) => {
                        let mut chain = ParentChain::from_data(above.clone());
                        let mut event = LoadEvent {
                            app,
                            ctx: &mut *ctx,
                            matched,
                            parent: &mut chain,
                            server_data: None,
                            node_id: &level.node_id,
                            server: true,
                            uses: Uses::default(),
                        };
                        invoke_load(load, &mut event)?
                    }
                    None => LoadData::new(),
                };
                debug!(request_id = %ctx.id, node_id = %level.node_id, "Skipped level loaded for parent()");
                *slot = ParentLevel::Ready(data);
            }
            if let ParentLevel::Ready(data) = slot {
                above.merge(data);
            }
        }
        self.merged = above;
        Ok(())
    }
}

fn route_levels(matched: &MatchedRoute) -> Vec<&Level> {
    let route = &matched.route;
    route.layouts.iter().chain(route.page.as_ref()).collect()
}

struct RawLevel<'a> {
    level: &'a Level,
    kind: LevelKind,
    own: LoadData,
    server: Option<LoadData>,
    uses: Uses,
}

struct Pipeline<'a> {
    app: &'a App,
    matched: &'a MatchedRoute,
    state: PipelineState,
}

impl Pipeline<'_> {
    fn transition(&mut self, ctx: &RequestContext, to: PipelineState) {
        debug!(
            request_id = %ctx.id,
            route_id = %self.matched.route.id,
            from = %self.state,
            to = %to,
            "Pipeline state transition"
        );
        self.state = to;
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

fn invoke_load(load: &LoadFn, event: &mut LoadEvent<'_>) -> Result<LoadData, LoadSignal> {
    let result = match panic::catch_unwind(AssertUnwindSafe(|| load(event))) {
        Ok(result) => result,
        Err(payload) => Err(LoadSignal::Error(HttpError::internal(format!(
            "load in '{}' panicked: {}",
            event.node_id,
            panic_message(payload.as_ref())
        )))),
    };
    match event.parent.take_failure() {
        Some(signal) => Err(signal),
        None => result,
    }
}

/// Reject redirects outside 300..=308 and errors outside 400..=599.
fn checked(signal: LoadSignal) -> LoadSignal {
    match signal {
        LoadSignal::Redirect { status, location } if !(300..=308).contains(&status) => {
            LoadSignal::Error(HttpError::internal(format!(
                "invalid redirect status {status} (to {location}); expected 300-308"
            )))
        }
        LoadSignal::Error(error) if !(400..=599).contains(&error.status) => {
            LoadSignal::Error(HttpError::internal(format!(
                "invalid error status {} ({}); expected 400-599",
                error.status, error.message
            )))
        }
        other => other,
    }
}

/// Encode completed levels, accumulating the merged data.
fn encode_levels(
    app: &App,
    raw: &[RawLevel<'_>],
) -> Result<(Vec<EncodedLevel>, Map<String, Value>), SerializationError> {
    let transport = app.transport();
    let mut merged = Map::new();
    let mut out = Vec::with_capacity(raw.len());
    for r in raw {
        let own = r.own.encode(&r.level.node_id, transport)?;
        let server = r
            .server
            .as_ref()
            .map(|s| s.encode(&r.level.node_id, transport))
            .transpose()?;
        for (k, v) in &own {
            merged.insert(k.clone(), v.clone());
        }
        out.push(EncodedLevel {
            node_id: r.level.node_id.to_string(),
            depth: r.level.depth,
            template: r.level.template.clone(),
            kind: r.kind,
            own,
            merged: merged.clone(),
            server,
            uses: r.uses.clone(),
        });
    }
    Ok((out, merged))
}

/// Encoded levels for an error page. Levels that cannot be encoded are dropped.
fn levels_for_error(app: &App, raw: &[RawLevel<'_>]) -> Vec<EncodedLevel> {
    match encode_levels(app, raw) {
        Ok((levels, _)) => levels,
        Err(e) => {
            warn!(error = %e, "Dropping layout data from error page");
            Vec::new()
        }
    }
}

/// Run the layout chain and page load of `matched`.
///
/// Levels run outer to inner; at each level the server load runs before the
/// universal load, which sees the server output through `data()` and replaces
/// it as the level's data. A redirect or error stops the remaining levels.
/// Response headers and cookies set so far stay on `ctx`.
pub fn run_load_pipeline(
    app: &App,
    ctx: &mut RequestContext,
    matched: &MatchedRoute,
    mode: &LoadMode,
) -> LoadOutcome {
    let route = &matched.route;
    let mut pipeline = Pipeline {
        app,
        matched,
        state: PipelineState::Pending,
    };
    let levels = route_levels(matched);
    let leaf_index = route.page.as_ref().map(|_| levels.len() - 1);

    let mut chain = ParentChain::default();
    let mut raw: Vec<RawLevel<'_>> = Vec::with_capacity(levels.len());
    pipeline.transition(ctx, PipelineState::RunningLayouts);

    for (index, level) in levels.iter().copied().enumerate() {
        let is_leaf = Some(index) == leaf_index;
        if is_leaf {
            pipeline.transition(ctx, PipelineState::RunningLeaf);
        }
        if ctx.signal.is_aborted() {
            pipeline.transition(ctx, PipelineState::Aborted);
            info!(request_id = %ctx.id, route_id = %route.id, "Request aborted");
            return LoadOutcome::Aborted;
        }
        if mode.skips(index) {
            debug!(request_id = %ctx.id, node_id = %level.node_id, "Level skipped");
            chain.push_deferred(index);
            raw.push(RawLevel {
                level,
                kind: LevelKind::Skip,
                own: LoadData::new(),
                server: None,
                uses: Uses::default(),
            });
            continue;
        }

        let started = Instant::now();
        match run_level(&pipeline, ctx, level, &mut chain, mode) {
            Ok(done) => {
                debug!(
                    request_id = %ctx.id,
                    node_id = %level.node_id,
                    keys = done.own.len(),
                    duration_us = started.elapsed().as_micros(),
                    "Level complete"
                );
                chain.push_ready(&done.own);
                raw.push(done);
            }
            Err(signal) => {
                return match checked(signal) {
                    LoadSignal::Redirect { status, location } => {
                        pipeline.transition(ctx, PipelineState::Redirected);
                        info!(
                            request_id = %ctx.id,
                            node_id = %level.node_id,
                            status,
                            location = %location,
                            "Load redirected"
                        );
                        LoadOutcome::Redirect { status, location }
                    }
                    LoadSignal::Error(error) => {
                        pipeline.transition(ctx, PipelineState::Errored);
                        warn!(
                            request_id = %ctx.id,
                            node_id = %level.node_id,
                            status = error.status,
                            error = %error.message,
                            "Load failed"
                        );
                        LoadOutcome::Error {
                            error,
                            origin: if is_leaf {
                                ErrorOrigin::Leaf
                            } else {
                                ErrorOrigin::Layout(index)
                            },
                            levels: levels_for_error(app, &raw),
                        }
                    }
                };
            }
        }
    }

    pipeline.transition(ctx, PipelineState::Merging);
    match encode_levels(app, &raw) {
        Ok((levels, data)) => {
            pipeline.transition(ctx, PipelineState::Done);
            LoadOutcome::Data(PageData { levels, data })
        }
        Err(e) => {
            pipeline.transition(ctx, PipelineState::Errored);
            warn!(request_id = %ctx.id, error = %e, "Load data is not serializable");
            LoadOutcome::Error {
                error: HttpError::internal(e.to_string()),
                origin: ErrorOrigin::Leaf,
                levels: Vec::new(),
            }
        }
    }
}

fn run_level<'l>(
    pipeline: &Pipeline<'_>,
    ctx: &mut RequestContext,
    level: &'l Level,
    parent: &mut ParentChain,
    mode: &LoadMode,
) -> Result<RawLevel<'l>, LoadSignal> {
    let mut uses = Uses::default();

    let server = match &level.server_load {
        Some(load) => {
            let mut event = LoadEvent {
                app: pipeline.app,
                ctx: &mut *ctx,
                matched: pipeline.matched,
                parent: &mut *parent,
                server_data: None,
                node_id: &level.node_id,
                server: true,
                uses: Uses::default(),
            };
            let data = invoke_load(load, &mut event)?;
            uses.absorb(event.uses);
            Some(data)
        }
        None => None,
    };

    let universal = match (&level.load, mode.runs_universal()) {
        (Some(load), true) => {
            let mut event = LoadEvent {
                app: pipeline.app,
                ctx: &mut *ctx,
                matched: pipeline.matched,
                parent: &mut *parent,
                server_data: server.as_ref(),
                node_id: &level.node_id,
                server: false,
                uses: Uses::default(),
            };
            let data = invoke_load(load, &mut event)?;
            uses.absorb(event.uses);
            Some(data)
        }
        _ => None,
    };

    let kind = match mode {
        LoadMode::Data { .. } if server.is_none() => LevelKind::Null,
        _ => LevelKind::Data,
    };
    let own = universal.or_else(|| server.clone()).unwrap_or_default();
    Ok(RawLevel {
        level,
        kind,
        own,
        server,
        uses,
    })
}

/// Run an endpoint handler, turning panics into 500s.
pub fn run_endpoint(
    app: &App,
    ctx: &mut RequestContext,
    matched: &MatchedRoute,
    handler: &EndpointFn,
) -> Result<KitResponse, LoadSignal> {
    if ctx.signal.is_aborted() {
        return Err(LoadSignal::Error(HttpError::new(499, "request aborted")));
    }
    let started = Instant::now();
    let mut event = EndpointEvent {
        app,
        ctx: &mut *ctx,
        matched,
    };
    let result = match panic::catch_unwind(AssertUnwindSafe(|| handler(&mut event))) {
        Ok(result) => result,
        Err(payload) => Err(LoadSignal::Error(HttpError::internal(format!(
            "endpoint '{}' panicked: {}",
            matched.route.id,
            panic_message(payload.as_ref())
        )))),
    };
    debug!(
        request_id = %ctx.id,
        route_id = %matched.route.id,
        ok = result.is_ok(),
        duration_us = started.elapsed().as_micros(),
        "Endpoint complete"
    );
    result.map(EndpointReply::into_response).map_err(checked)
}
