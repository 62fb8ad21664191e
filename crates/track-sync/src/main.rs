mod engine;
mod logging;
mod settings;

use engine::{LoggingEngine, Renderer};
use settings::{Settings, StdinCommand, parse_command};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use track_sync_lib::source::HttpGeometrySource;
use track_sync_lib::storage::FileStorage;
use track_sync_lib::{
    FetchSnapshot, FetchStatus, GeometryCache, NoopGeometryCache, SelectionSource, SelectionState,
    Track, TrackId, TrackSyncError, ViewportBounds, ViewportSession, ViewportStore,
    open_geometry_cache,
};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Sync(#[from] TrackSyncError),

    #[error("Geometry fetch failed after {attempts} attempts: {message}")]
    FetchFailed { attempts: u32, message: String },

    #[error("No viewport given, none saved and no track has bounds")]
    NoViewport,

    #[error("Sync session stopped unexpectedly")]
    SessionClosed,
}

fn main() -> ExitCode {
    logging::setup_logging();
    let settings = Settings::from_cli();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(settings)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings) -> Result<(), CliError> {
    let source = Arc::new(
        HttpGeometrySource::new(settings.source_config()).map_err(TrackSyncError::from)?,
    );
    let tracks = source.list_tracks().await.map_err(TrackSyncError::from)?;
    tracing::info!(map_id = settings.map_id, tracks = tracks.len(), "Loaded track list");

    let store = open_viewport_store(&settings);
    let saved = match &store {
        Some(store) if settings.ignore_persisted => {
            store.clear();
            None
        }
        Some(store) => store.load(),
        None => None,
    };
    let viewport = settings
        .viewport
        .or(saved)
        .or_else(|| collection_bounds(&tracks))
        .ok_or(CliError::NoViewport)?;

    let cache: Arc<dyn GeometryCache> = if settings.no_cache {
        Arc::new(NoopGeometryCache)
    } else {
        open_geometry_cache(Some(settings.cache_path()))
    };
    if settings.ignore_persisted {
        cache.clear();
    }

    let session = ViewportSession::new(source, cache, settings.sync_config());
    session.set_tracks(tracks);

    let selection =
        SelectionState::from_ids(settings.select.iter().copied(), SelectionSource::Programmatic);
    let mut renderer = Renderer::new(
        LoggingEngine::default(),
        selection,
        settings.speed_coloring,
        settings.speed_scale.into(),
    );

    let mut last = sync_viewport(&session, &mut renderer, viewport, settings.retries).await?;
    if settings.follow_stdin {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_command(line) {
                Ok(StdinCommand::Viewport(next)) => {
                    last = sync_viewport(&session, &mut renderer, next, settings.retries).await?
                }
                Ok(StdinCommand::Select(ids)) => select_tracks(&mut renderer, ids),
                Err(e) => tracing::warn!("Ignoring command {:?}: {}", line, e),
            }
        }
    }

    if let Some(store) = &store {
        store.save(&last);
    }
    session.shutdown();
    Ok(())
}

fn open_viewport_store(settings: &Settings) -> Option<ViewportStore<FileStorage>> {
    match FileStorage::new_with_path(Some(settings.state_path())) {
        Ok(storage) => Some(ViewportStore::new(storage)),
        Err(e) => {
            tracing::warn!("Viewport will not be saved: {}", e);
            None
        }
    }
}

/// Smallest viewport holding every shown track with known bounds
fn collection_bounds(tracks: &[Track]) -> Option<ViewportBounds> {
    tracks
        .iter()
        .filter(|t| t.visible)
        .filter_map(|t| t.bounds.to_rect())
        .map(|r| (r.min(), r.max()))
        .reduce(|(min_a, max_a), (min_b, max_b)| {
            (
                geo::coord! { x: min_a.x.min(min_b.x), y: min_a.y.min(min_b.y) },
                geo::coord! { x: max_a.x.max(max_b.x), y: max_a.y.max(max_b.y) },
            )
        })
        .map(|(min, max)| ViewportBounds::new(min.y, max.y, min.x, max.x))
}

/// Restyle the drawn tracks for a new selection
fn select_tracks(renderer: &mut Renderer<LoggingEngine>, ids: Vec<TrackId>) {
    renderer.select(SelectionState::from_ids(ids, SelectionSource::List));
    let stats = renderer.engine_mut().take_stats();
    tracing::info!(
        selected = renderer.selection().len(),
        ops = stats.total(),
        "Applied selection"
    );
    println!(
        "selection of {} tracks: {} layers, {} primitive ops",
        renderer.selection().len(),
        renderer.engine().layer_count(),
        stats.total(),
    );
}

/// Settle `viewport`, wait for its geometry and render it. Returns the viewport.
async fn sync_viewport(
    session: &ViewportSession,
    renderer: &mut Renderer<LoggingEngine>,
    viewport: ViewportBounds,
    retries: u32,
) -> Result<ViewportBounds, CliError> {
    session.on_viewport_change(viewport);
    let snapshot = wait_for_geometry(session, viewport, retries).await?;

    renderer.apply(&snapshot.geometries);
    let stats = renderer.engine_mut().take_stats();
    let engine = renderer.engine();
    tracing::info!(
        tracks = renderer.render_set().len(),
        ops = stats.total(),
        "Rendered viewport"
    );
    println!(
        "viewport {:.5},{:.5},{:.5},{:.5}: {} tracks drawn, {} points, {} layers, {} primitive ops",
        viewport.min_lat,
        viewport.max_lat,
        viewport.min_lon,
        viewport.max_lon,
        renderer.render_set().len(),
        engine.point_count(),
        engine.layer_count(),
        stats.total(),
    );
    Ok(viewport)
}

/// Wait until the session publishes geometry for `viewport`, retrying failed fetches
async fn wait_for_geometry(
    session: &ViewportSession,
    viewport: ViewportBounds,
    retries: u32,
) -> Result<FetchSnapshot, CliError> {
    let mut rx = session.subscribe();
    let mut attempts = 1;
    loop {
        rx.changed().await.map_err(|_| CliError::SessionClosed)?;
        let snapshot = rx.borrow_and_update().clone();
        match &snapshot.status {
            FetchStatus::Idle if snapshot.viewport == Some(viewport) => return Ok(snapshot),
            FetchStatus::Loading { count } => {
                tracing::info!(count, "Fetching geometries");
            }
            FetchStatus::Error { message } => {
                if attempts > retries {
                    return Err(CliError::FetchFailed {
                        attempts,
                        message: message.clone(),
                    });
                }
                tracing::warn!(attempt = attempts, "Retrying failed fetch: {}", message);
                attempts += 1;
                session.retry_fetch();
            }
            FetchStatus::Idle => {}
        }
    }
}
