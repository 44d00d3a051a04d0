//! Authoring view over every map in the maps directory.

mod adjacency;
mod discovery;
mod layout;
mod portal;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

pub use adjacency::AdjacencySummary;
pub use discovery::{is_map_definition, list_map_ids};
pub use layout::{load_layout, save_layout, LayoutError, LayoutPos, WorldLayout};
pub use portal::{
    ConnectedMapRequest, MapLink, PortalError, PortalOutcome, PortalRequest, PromptSource,
};

use crate::config::DEFAULT_PLACEMENT_GAP;
use crate::map::{MapData, MapStore};
use crate::tileset::TileSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub kind: StatusKind,
    pub message: String,
}

#[derive(Debug, Default)]
struct ManualDraft {
    active: bool,
    source: Option<String>,
    target: Option<String>,
}

/// What a full auto-connect pass did. Per-map save failures are collected
/// rather than aborting the pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoConnectReport {
    pub summary: AdjacencySummary,
    pub saved: Vec<PathBuf>,
    pub errors: Vec<String>,
}

pub struct WorldView {
    store: MapStore,
    layout_path: PathBuf,
    layout: WorldLayout,
    maps: BTreeMap<String, MapData>,
    tilesets: BTreeMap<String, TileSet>,
    load_errors: Vec<String>,
    status: Option<StatusLine>,
    manual: ManualDraft,
}

impl WorldView {
    /// Reads the layout and every map in the store. Problems are reported
    /// through the status line and `load_errors`; the view always opens.
    pub fn open(store: MapStore, layout_path: &Path) -> Self {
        let mut view = Self {
            store,
            layout_path: layout_path.to_path_buf(),
            layout: WorldLayout::default(),
            maps: BTreeMap::new(),
            tilesets: BTreeMap::new(),
            load_errors: Vec::new(),
            status: None,
            manual: ManualDraft::default(),
        };
        view.load_layout_with_feedback();
        view.load_maps();
        view
    }

    pub fn load_maps(&mut self) {
        self.maps.clear();
        self.tilesets.clear();
        self.load_errors.clear();

        let ids = match list_map_ids(self.store.maps_dir()) {
            Ok(ids) => ids,
            Err(err) => {
                error!(path = %self.store.maps_dir().display(), error = %err, "map_discovery_failed");
                self.load_errors
                    .push(format!("{}: {err}", self.store.maps_dir().display()));
                return;
            }
        };

        for id in ids {
            let map = match self.store.load(&id) {
                Ok(map) => map,
                Err(err) => {
                    warn!(map_id = %id, error = %err, "world_map_skipped");
                    self.load_errors.push(err.to_string());
                    continue;
                }
            };
            if !self.tilesets.contains_key(&map.tileset_id) {
                match self.store.load_tileset(&map.tileset_id) {
                    Ok(Some(tileset)) => {
                        self.tilesets.insert(map.tileset_id.clone(), tileset);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(tileset_id = %map.tileset_id, error = %err, "tileset_load_failed");
                        self.load_errors.push(err.to_string());
                    }
                }
            }
            self.maps.insert(id, map);
        }
        self.place_unplaced_maps();
        info!(
            maps = self.maps.len(),
            tilesets = self.tilesets.len(),
            errors = self.load_errors.len(),
            "world_loaded"
        );
    }

    /// Maps missing from the layout are lined up along y = 0 to the right of
    /// everything already placed. A placed map whose far corner leaves the
    /// i32 range is reported as a layout validation error.
    fn place_unplaced_maps(&mut self) {
        let gap = i64::from(DEFAULT_PLACEMENT_GAP);
        let mut next_x = self
            .layout
            .maps
            .iter()
            .filter_map(|(id, pos)| {
                self.maps
                    .get(id)
                    .map(|map| i64::from(pos.x) + i64::from(map.width) + gap)
            })
            .max()
            .unwrap_or(0);
        let mut problems = Vec::new();
        for (id, map) in &self.maps {
            if self.layout.maps.contains_key(id) {
                continue;
            }
            let Ok(x) = i32::try_from(next_x) else {
                problems.push(format!("no room to place '{id}' right of x = {}", i32::MAX));
                continue;
            };
            self.layout.maps.insert(id.clone(), LayoutPos { x, y: 0 });
            next_x += i64::from(map.width) + gap;
        }
        problems.extend(self.layout_extent_problems());
        if !problems.is_empty() {
            let err = LayoutError::Validation {
                path: self.layout_path.clone(),
                problems,
            };
            self.layout_failed(&err);
        }
    }

    fn layout_extent_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (id, pos) in &self.layout.maps {
            let Some(map) = self.maps.get(id) else {
                continue;
            };
            let right = i64::from(pos.x) + i64::from(map.width);
            let bottom = i64::from(pos.y) + i64::from(map.height);
            if i32::try_from(right).is_err() || i32::try_from(bottom).is_err() {
                problems.push(format!(
                    "'{id}' at ({}, {}) with size {}x{} extends past the coordinate range",
                    pos.x, pos.y, map.width, map.height
                ));
            }
        }
        problems
    }

    pub fn store(&self) -> &MapStore {
        &self.store
    }

    pub fn layout_path(&self) -> &Path {
        &self.layout_path
    }

    pub fn layout(&self) -> &WorldLayout {
        &self.layout
    }

    pub fn map(&self, map_id: &str) -> Option<&MapData> {
        self.maps.get(map_id)
    }

    pub fn map_ids(&self) -> impl Iterator<Item = &str> {
        self.maps.keys().map(String::as_str)
    }

    pub fn tileset(&self, tileset_id: &str) -> Option<&TileSet> {
        self.tilesets.get(tileset_id)
    }

    pub fn load_errors(&self) -> &[String] {
        &self.load_errors
    }

    pub fn status(&self) -> Option<&StatusLine> {
        self.status.as_ref()
    }

    fn set_info(&mut self, message: &str) {
        self.status = Some(StatusLine {
            kind: StatusKind::Info,
            message: message.to_string(),
        });
    }

    fn set_error(&mut self, message: &str) {
        self.status = Some(StatusLine {
            kind: StatusKind::Error,
            message: message.to_string(),
        });
    }

    fn layout_failed(&mut self, err: &LayoutError) {
        error!(path = %self.layout_path.display(), class = err.class().label(), error = %err, "layout_failed");
        self.set_error(&format!("Layout {} error: {err}", err.class().label()));
    }

    /// Replaces the in-memory layout. On failure the current layout is kept.
    pub fn load_layout_with_feedback(&mut self) -> bool {
        match load_layout(&self.layout_path) {
            Ok(layout) => {
                self.layout = layout;
                self.set_info(&format!("Loaded layout ({} maps).", self.layout.maps.len()));
                true
            }
            Err(err) => {
                self.layout_failed(&err);
                false
            }
        }
    }

    pub fn save_layout_with_feedback(&mut self) -> bool {
        match save_layout(&self.layout_path, &self.layout) {
            Ok(()) => {
                self.set_info("Saved layout.");
                true
            }
            Err(err) => {
                self.layout_failed(&err);
                false
            }
        }
    }

    /// Snaps to the layout grid. Unknown ids are ignored.
    pub fn move_map(&mut self, map_id: &str, x: f64, y: f64) -> Option<LayoutPos> {
        if !self.maps.contains_key(map_id) {
            return None;
        }
        let pos = LayoutPos::snapped(x, y);
        self.layout.maps.insert(map_id.to_string(), pos);
        Some(pos)
    }

    /// Regenerates every auto connection, then saves each map and the layout.
    pub fn auto_connect(&mut self) -> AutoConnectReport {
        let summary = adjacency::regenerate_auto_connections(&mut self.maps, &self.tilesets, &self.layout);
        let mut report = AutoConnectReport {
            summary,
            ..AutoConnectReport::default()
        };
        for map in self.maps.values() {
            match self.store.save(map, None) {
                Ok(path) => report.saved.push(path),
                Err(err) => {
                    error!(map_id = %map.id, error = %err, "map_save_failed");
                    report.errors.push(err.to_string());
                }
            }
        }
        let layout_saved = self.save_layout_with_feedback();
        info!(
            removed = summary.removed,
            added = summary.added,
            saved = report.saved.len(),
            errors = report.errors.len(),
            "auto_connect_summary"
        );
        if !report.errors.is_empty() {
            let message = format!("Auto-connect I/O error: {}", report.errors.join("; "));
            self.set_error(&message);
        } else if layout_saved {
            self.set_info(&format!(
                "Auto-connect: removed {}, added {} connections.",
                summary.removed, summary.added
            ));
        }
        report
    }

    pub fn manual_mode(&self) -> bool {
        self.manual.active
    }

    /// Entering or leaving manual mode drops any half-made selection.
    pub fn toggle_manual_mode(&mut self) -> bool {
        let active = !self.manual.active;
        self.manual = ManualDraft {
            active,
            ..ManualDraft::default()
        };
        if active {
            self.set_info("Manual portal: select source map, then target map.");
        }
        active
    }

    pub fn manual_selection(&self) -> (Option<&str>, Option<&str>) {
        (self.manual.source.as_deref(), self.manual.target.as_deref())
    }
}
