use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use track_sync_lib::source::HttpSourceConfig;
use track_sync_lib::storage::FileStorage;
use track_sync_lib::viewport::DEFAULT_BUFFER_FACTOR;
use track_sync_lib::{SpeedScaleMode, SyncConfig, TrackId, ViewportBounds, default_cache_path};

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Track Sync - Load the geometry of the tracks around a map viewport and mirror it into map primitives
pub struct Settings {
    /// Track server base URL
    #[clap(short, long, env = "TRACK_SYNC_SERVER", default_value = "http://localhost:8000")]
    pub server: String,

    /// Map whose tracks are synced
    #[clap(short, long)]
    pub map_id: u64,

    /// Bearer token for the track server
    #[clap(long, env = "TRACK_SYNC_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Viewport as `min_lat,max_lat,min_lon,max_lon`. Defaults to the saved viewport,
    /// then to the bounds of every track.
    #[clap(short, long, value_parser = parse_viewport, allow_hyphen_values = true)]
    pub viewport: Option<ViewportBounds>,

    /// Read further commands from stdin until EOF, one per line: a viewport, or
    /// `select <id>,<id>` to change the selection (bare `select` clears it)
    #[clap(long, default_value = "false")]
    pub follow_stdin: bool,

    /// Track ids drawn with the selected style
    #[clap(long, value_delimiter = ',')]
    pub select: Vec<TrackId>,

    /// Paint per-segment speed gradients
    #[clap(long, default_value = "false")]
    pub speed_coloring: bool,

    /// How speed gradients are scaled
    #[clap(long, value_enum, default_value = "per-track")]
    pub speed_scale: SpeedScale,

    /// Quiet period in milliseconds before a viewport counts as settled
    #[clap(long, default_value = "300")]
    pub debounce_ms: u64,

    /// Fraction of the viewport size added on each side when selecting tracks
    #[clap(long, default_value_t = DEFAULT_BUFFER_FACTOR)]
    pub buffer_factor: f64,

    /// HTTP request timeout in seconds (0 disables it)
    #[clap(long, default_value = "30")]
    pub timeout_secs: u64,

    /// Retries of a failed geometry fetch before giving up
    #[clap(long, default_value = "2")]
    pub retries: u32,

    /// Geometry cache database (SQLite)
    #[clap(long, value_name = "FILE")]
    pub cache_path: Option<PathBuf>,

    /// Do not cache geometries on disk
    #[clap(long, default_value = "false")]
    pub no_cache: bool,

    /// File holding the last viewport
    #[clap(long, value_name = "FILE")]
    pub state_path: Option<PathBuf>,

    /// Ignore previously persisted state and start fresh
    #[clap(long, default_value = "false")]
    pub ignore_persisted: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedScale {
    PerTrack,
    Global,
}

impl From<SpeedScale> for SpeedScaleMode {
    fn from(scale: SpeedScale) -> Self {
        match scale {
            SpeedScale::PerTrack => SpeedScaleMode::PerTrack,
            SpeedScale::Global => SpeedScaleMode::Global,
        }
    }
}

/// Parse `min_lat,max_lat,min_lon,max_lon`
pub fn parse_viewport(s: &str) -> Result<ViewportBounds, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid coordinate: {e}"))?;
    match values.as_slice() {
        &[min_lat, max_lat, min_lon, max_lon] => {
            if values.iter().any(|v| !v.is_finite()) {
                return Err("coordinates must be finite".to_string());
            }
            Ok(ViewportBounds::new(min_lat, max_lat, min_lon, max_lon))
        }
        _ => Err(format!(
            "expected 4 comma-separated values, got {}",
            values.len()
        )),
    }
}

/// One line of the stdin command stream
#[derive(Debug, Clone, PartialEq)]
pub enum StdinCommand {
    Viewport(ViewportBounds),
    Select(Vec<TrackId>),
}

pub fn parse_command(line: &str) -> Result<StdinCommand, String> {
    let line = line.trim();
    let Some(ids) = line.strip_prefix("select") else {
        return parse_viewport(line).map(StdinCommand::Viewport);
    };
    let ids = ids.trim();
    if ids.is_empty() {
        return Ok(StdinCommand::Select(Vec::new()));
    }
    ids.split(',')
        .map(|v| {
            v.trim()
                .parse::<TrackId>()
                .map_err(|e| format!("invalid track id {:?}: {e}", v.trim()))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(StdinCommand::Select)
}

impl Settings {
    pub fn from_cli() -> Self {
        match Settings::try_parse() {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }

    pub fn source_config(&self) -> HttpSourceConfig {
        let mut config = HttpSourceConfig::new(self.server.clone(), self.map_id);
        config.token = self.token.clone();
        config.timeout = (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs));
        config
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            debounce_delay: Duration::from_millis(self.debounce_ms),
            buffer_factor: self.buffer_factor.max(0.0),
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache_path.clone().unwrap_or_else(default_cache_path)
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(FileStorage::default_storage_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::try_parse_from(["track-sync", "--map-id", "3"]).unwrap();
        assert_eq!(settings.map_id, 3);
        assert_eq!(settings.sync_config(), SyncConfig::default());
        assert_eq!(settings.speed_scale, SpeedScale::PerTrack);
        assert!(settings.viewport.is_none());
        assert_ne!(settings.cache_path(), settings.state_path());
    }

    #[test]
    fn test_viewport_and_selection() {
        let settings = Settings::try_parse_from([
            "track-sync",
            "-m",
            "1",
            "--viewport",
            "-33.9,-33.8,151.1,151.3",
            "--select",
            "4,9",
            "--speed-scale",
            "global",
        ])
        .unwrap();
        assert_eq!(
            settings.viewport,
            Some(ViewportBounds::new(-33.9, -33.8, 151.1, 151.3))
        );
        assert_eq!(settings.select, vec![4, 9]);
        assert_eq!(
            SpeedScaleMode::from(settings.speed_scale),
            SpeedScaleMode::Global
        );
    }

    #[test]
    fn test_parse_viewport_rejects_bad_input() {
        assert!(parse_viewport("1,2,3").is_err());
        assert!(parse_viewport("1,2,3,x").is_err());
        assert!(parse_viewport("1,2,3,inf").is_err());
        // Inverted axes are normalised
        assert_eq!(
            parse_viewport("2, 1, 4, 3"),
            Ok(ViewportBounds::new(1.0, 2.0, 3.0, 4.0))
        );
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(
            parse_command("1,2,3,4"),
            Ok(StdinCommand::Viewport(ViewportBounds::new(1.0, 2.0, 3.0, 4.0)))
        );
        assert_eq!(
            parse_command(" select 4, 9 "),
            Ok(StdinCommand::Select(vec![4, 9]))
        );
        assert_eq!(parse_command("select"), Ok(StdinCommand::Select(Vec::new())));
        assert!(parse_command("select 4,x").is_err());
        assert!(parse_command("selected").is_err());
        assert!(parse_command("zoom 3").is_err());
    }

    #[test]
    fn test_timeout_zero_disables() {
        let settings =
            Settings::try_parse_from(["track-sync", "-m", "1", "--timeout-secs", "0"]).unwrap();
        assert_eq!(settings.source_config().timeout, None);
    }
}
