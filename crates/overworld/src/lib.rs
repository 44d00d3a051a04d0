use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

mod atomic_io;
pub mod map;
pub mod session;
pub mod tileset;
pub mod world;

pub use map::{
    Action, CellOverride, Condition, Connection, ConnectionKind, ConnectionSource,
    ConnectionTarget, DialogText, Direction, EntityDef, ExplicitKeys, GridPos, KnownMaps, MapData,
    MapError, MapLayer, MapStore, TileBehavior, TriggerArea, TriggerDef, TriggerKind,
    ValidationReport, OVERLAY_LAYER,
};
pub use session::{
    AudioController, BattleLauncher, BattlePayload, MapSource, NullAudio, OverworldSession,
    Player,
};
pub use tileset::{NpcSprite, TileDefinition, TileSet, TileSetError};
pub use world::{
    is_map_definition, list_map_ids, load_layout, save_layout, AdjacencySummary,
    AutoConnectReport, ConnectedMapRequest, LayoutError, LayoutPos, MapLink, PortalError,
    PortalOutcome, PortalRequest, PromptSource, StatusKind, StatusLine, WorldLayout, WorldView,
};

pub const ROOT_ENV_VAR: &str = "OVERWORLD_ROOT";

/// Tunables shared by the runtime and the authoring tools.
pub mod config {
    pub const DEFAULT_TILE_SIZE: u32 = 32;
    pub const DEFAULT_TILESET_ID: &str = "basic_overworld";
    pub const LAYOUT_FILE_NAME: &str = "world_layout.json";
    /// Maps whose edges are closer than this (in tiles) count as touching.
    pub const ADJACENCY_EPSILON: f64 = 0.5;
    pub const LAYOUT_SNAP_STEP: i32 = 1;
    pub const DEFAULT_PLACEMENT_GAP: i32 = 4;
}

/// Failure taxonomy surfaced to operators: broken file, broken disk, or bad numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Parse,
    Validation,
    Io,
}

impl ErrorClass {
    pub fn label(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Validation => "validation",
            Self::Io => "I/O",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub root: PathBuf,
    pub maps_dir: PathBuf,
    pub tilesets_dir: PathBuf,
    pub layout_path: PathBuf,
}

impl AppPaths {
    pub fn from_root(root: &Path) -> Self {
        let maps_dir = root.join("assets").join("maps");
        let tilesets_dir = root.join("assets").join("tilesets");
        let layout_path = maps_dir.join(config::LAYOUT_FILE_NAME);
        Self {
            root: root.to_path_buf(),
            maps_dir,
            tilesets_dir,
            layout_path,
        }
    }

    pub fn map_store(&self) -> MapStore {
        MapStore::new(&self.maps_dir, &self.tilesets_dir)
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to read environment variable {var}: {source}")]
    EnvVar {
        var: &'static str,
        #[source]
        source: env::VarError,
    },
    #[error("failed to resolve current executable path: {0}")]
    CurrentExe(#[source] std::io::Error),
    #[error("current executable path has no parent directory: {0}")]
    ExeHasNoParent(PathBuf),
    #[error("failed to create maps directory at {path}: {source}")]
    CreateMapsDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "OVERWORLD_ROOT is set but does not point to a valid project root: {path}\n\
A valid root must contain Cargo.toml and either crates/ or assets/."
    )]
    InvalidEnvRoot { path: PathBuf },
    #[error(
        "Could not detect project root by walking upward from executable directory: {start_dir}\n\
Expected a directory containing Cargo.toml and either crates/ or assets/.\n\
Set {env_var} explicitly, for example:\n\
Bash/zsh: export {env_var}=\"/path/to/overworld\""
    )]
    RootNotFound {
        start_dir: PathBuf,
        env_var: &'static str,
    },
}

pub fn resolve_app_paths() -> Result<AppPaths, StartupError> {
    let root = resolve_root()?;
    let paths = AppPaths::from_root(&root);

    fs::create_dir_all(&paths.maps_dir).map_err(|source| StartupError::CreateMapsDir {
        path: paths.maps_dir.clone(),
        source,
    })?;

    Ok(paths)
}

fn resolve_root() -> Result<PathBuf, StartupError> {
    match env::var(ROOT_ENV_VAR) {
        Ok(value) => {
            let raw = PathBuf::from(value);
            let normalized = normalize_path(&raw);
            if is_repo_marker(&normalized) {
                Ok(normalized)
            } else {
                Err(StartupError::InvalidEnvRoot { path: normalized })
            }
        }
        Err(env::VarError::NotPresent) => {
            let exe = env::current_exe().map_err(StartupError::CurrentExe)?;
            let exe_dir = exe
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| StartupError::ExeHasNoParent(exe.clone()))?;

            for candidate in exe_dir.ancestors() {
                if is_repo_marker(candidate) {
                    return Ok(normalize_path(candidate));
                }
            }

            Err(StartupError::RootNotFound {
                start_dir: normalize_path(&exe_dir),
                env_var: ROOT_ENV_VAR,
            })
        }
        Err(source) => Err(StartupError::EnvVar {
            var: ROOT_ENV_VAR,
            source,
        }),
    }
}

fn is_repo_marker(path: &Path) -> bool {
    let cargo_toml = path.join("Cargo.toml").is_file();
    let has_crates = path.join("crates").is_dir();
    let has_assets = path.join("assets").is_dir();

    cargo_toml && (has_crates || has_assets)
}

fn normalize_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
