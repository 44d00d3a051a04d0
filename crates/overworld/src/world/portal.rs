//! Hand-authored links between maps, saved as a two-file transaction.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{error, info, warn};

use super::layout::LayoutPos;
use super::WorldView;
use crate::config::DEFAULT_PLACEMENT_GAP;
use crate::map::{
    Connection, ConnectionTarget, Direction, GridPos, MapData, MapError, MapStore,
};
use crate::ErrorClass;

/// Destination of transaction saves. [`MapStore`] writes into its maps directory.
pub(crate) trait MapWriter {
    fn write_map(&mut self, map: &MapData) -> Result<PathBuf, MapError>;
}

impl MapWriter for MapStore {
    fn write_map(&mut self, map: &MapData) -> Result<PathBuf, MapError> {
        self.save(map, None)
    }
}

/// The modal input loop used while authoring. `None` means the user cancelled.
pub trait PromptSource {
    fn prompt(&mut self, message: &str, default: &str) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalRequest {
    pub source_map: String,
    pub source_cell: GridPos,
    pub target_map: String,
    pub target_spawn: GridPos,
    pub reverse: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalOutcome {
    pub forward_id: String,
    pub reverse_id: Option<String>,
    pub saved: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapLink {
    /// Leave the existing map through `direction`; arrive facing `facing`.
    Edge { direction: Direction, facing: Direction },
    /// A portal at `cell` on the existing map; the way back sits at the new map's origin.
    Portal { cell: GridPos },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedMapRequest {
    pub existing_map: String,
    pub new_map: String,
    pub width: i32,
    pub height: i32,
    pub spawn: GridPos,
    pub link: MapLink,
}

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("{}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("failed to save map '{map_id}': {source}")]
    Io {
        map_id: String,
        #[source]
        source: MapError,
    },
    #[error("failed to save map '{map_id}' ({original}) and could not restore it: {rollback}")]
    RollbackFailed {
        map_id: String,
        original: MapError,
        #[source]
        rollback: MapError,
    },
}

impl PortalError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) => ErrorClass::Validation,
            Self::Io { .. } | Self::RollbackFailed { .. } => ErrorClass::Io,
        }
    }

    /// Operator-facing text with the prefix the status line uses.
    pub fn status_text(&self) -> String {
        match self {
            Self::Validation(_) => format!("Manual portal validation error: {self}"),
            Self::Io { .. } => format!("Manual portal I/O error: {self}"),
            Self::RollbackFailed { .. } => format!("Manual portal rollback error: {self}"),
        }
    }
}

fn portal(id: String, cell: GridPos, target: &str, spawn: GridPos) -> Connection {
    let mut connection = Connection::portal(&id, cell, ConnectionTarget::new(target, spawn, None));
    connection.mark_manual();
    connection
}

/// Adds `connection`, replacing one with the same id.
fn upsert(map: &mut MapData, connection: Connection) {
    map.connections.retain(|existing| existing.id != connection.id);
    map.connections.push(connection);
}

/// A map id names one file in the maps directory.
fn is_plain_map_id(map_id: &str) -> bool {
    !map_id.contains(['/', '\\']) && !map_id.contains("..")
}

fn parse_coord(label: &str, raw: &str, problems: &mut Vec<String>) -> i32 {
    let raw = raw.trim();
    if raw.is_empty() {
        return 0;
    }
    raw.parse().unwrap_or_else(|_| {
        problems.push(format!("{label} must be an integer, got '{raw}'"));
        0
    })
}

impl WorldView {
    /// Validates both cells, adds the portal (and its reverse when asked),
    /// then saves the source map followed by the target map. If the second
    /// save fails the source file is restored from its pre-edit copy.
    pub fn create_portal(&mut self, request: &PortalRequest) -> Result<PortalOutcome, PortalError> {
        let mut problems = Vec::new();
        let source = self.maps.get(&request.source_map);
        let target = self.maps.get(&request.target_map);
        match source {
            None => problems.push(format!("unknown source map '{}'", request.source_map)),
            Some(map) if !map.in_bounds(request.source_cell.x, request.source_cell.y) => {
                problems.push(format!(
                    "portal cell {} is outside '{}' ({}x{})",
                    request.source_cell, map.id, map.width, map.height
                ))
            }
            Some(_) => {}
        }
        match target {
            None => problems.push(format!("unknown target map '{}'", request.target_map)),
            Some(map) if !map.in_bounds(request.target_spawn.x, request.target_spawn.y) => {
                problems.push(format!(
                    "spawn {} is outside '{}' ({}x{})",
                    request.target_spawn, map.id, map.width, map.height
                ))
            }
            Some(_) => {}
        }
        let (Some(source_before), Some(target_before)) = (source.cloned(), target.cloned()) else {
            return Err(PortalError::Validation(problems));
        };
        if !problems.is_empty() {
            return Err(PortalError::Validation(problems));
        }

        let src = request.source_map.as_str();
        let dst = request.target_map.as_str();
        let forward_id = format!(
            "portal_{src}_to_{dst}_{}_{}",
            request.source_cell.x, request.source_cell.y
        );
        let reverse_id = request.reverse.then(|| {
            format!(
                "portal_{dst}_to_{src}_{}_{}",
                request.target_spawn.x, request.target_spawn.y
            )
        });

        if let Some(map) = self.maps.get_mut(src) {
            upsert(
                map,
                portal(forward_id.clone(), request.source_cell, dst, request.target_spawn),
            );
        }
        if let Some(reverse_id) = &reverse_id {
            if let Some(map) = self.maps.get_mut(dst) {
                upsert(
                    map,
                    portal(reverse_id.clone(), request.target_spawn, src, request.source_cell),
                );
            }
        }

        let second = (request.reverse && dst != src).then_some((dst, Some(target_before)));
        let saved = self.save_transaction(src, source_before, second)?;
        info!(
            source = src,
            target = dst,
            forward_id = %forward_id,
            reverse = reverse_id.is_some(),
            "manual_portal_created"
        );
        Ok(PortalOutcome {
            forward_id,
            reverse_id,
            saved,
        })
    }

    /// Saves `first` then `second`. `second`'s previous state is `None` when it
    /// is a brand-new map. Any failure restores the in-memory maps; a failure
    /// on `second` also re-saves `first_before`.
    pub(crate) fn save_transaction(
        &mut self,
        first: &str,
        first_before: MapData,
        second: Option<(&str, Option<MapData>)>,
    ) -> Result<Vec<PathBuf>, PortalError> {
        let mut store = self.store.clone();
        self.save_transaction_with(&mut store, first, first_before, second)
    }

    fn save_transaction_with(
        &mut self,
        writer: &mut dyn MapWriter,
        first: &str,
        first_before: MapData,
        second: Option<(&str, Option<MapData>)>,
    ) -> Result<Vec<PathBuf>, PortalError> {
        let first_path = match self.save_map(writer, first) {
            Ok(path) => path,
            Err(source) => {
                error!(map_id = first, error = %source, "map_save_failed");
                self.restore(first, Some(first_before));
                if let Some((second_id, second_before)) = second {
                    self.restore(second_id, second_before);
                }
                return Err(PortalError::Io {
                    map_id: first.to_string(),
                    source,
                });
            }
        };

        let mut saved = vec![first_path];
        let Some((second_id, second_before)) = second else {
            return Ok(saved);
        };
        match self.save_map(writer, second_id) {
            Ok(path) => {
                saved.push(path);
                Ok(saved)
            }
            Err(original) => {
                error!(map_id = second_id, error = %original, "map_save_failed");
                self.restore(second_id, second_before);
                let rollback = writer.write_map(&first_before);
                self.restore(first, Some(first_before));
                match rollback {
                    Ok(_) => {
                        warn!(map_id = first, failed = second_id, "manual_portal_rolled_back");
                        Err(PortalError::Io {
                            map_id: second_id.to_string(),
                            source: original,
                        })
                    }
                    Err(rollback) => {
                        error!(map_id = first, error = %rollback, "manual_portal_rollback_failed");
                        Err(PortalError::RollbackFailed {
                            map_id: first.to_string(),
                            original,
                            rollback,
                        })
                    }
                }
            }
        }
    }

    fn save_map(&self, writer: &mut dyn MapWriter, map_id: &str) -> Result<PathBuf, MapError> {
        match self.maps.get(map_id) {
            Some(map) => writer.write_map(map),
            None => Err(MapError::NotFound {
                map_id: map_id.to_string(),
                path: self.store.map_path(map_id),
            }),
        }
    }

    fn restore(&mut self, map_id: &str, before: Option<MapData>) {
        match before {
            Some(map) => {
                self.maps.insert(map_id.to_string(), map);
            }
            None => {
                self.maps.remove(map_id);
                self.layout.maps.remove(map_id);
            }
        }
    }

    /// Picks the source map on the first click and the target on the second.
    /// Ignored outside manual mode.
    pub fn select_portal_map(&mut self, map_id: &str) {
        if !self.manual.active || !self.maps.contains_key(map_id) {
            return;
        }
        if self.manual.source.is_none() {
            self.manual.source = Some(map_id.to_string());
        } else if self.manual.target.is_none() {
            self.manual.target = Some(map_id.to_string());
        }
    }

    /// Prompts for the portal cell, the arrival cell and whether to add the
    /// way back, then creates the portal. Returns `None` when no source and
    /// target are selected or the user cancels. Manual mode ends either way.
    pub fn create_manual_portal(
        &mut self,
        prompts: &mut dyn PromptSource,
    ) -> Option<Result<PortalOutcome, PortalError>> {
        let (Some(src), Some(dst)) = (self.manual.source.clone(), self.manual.target.clone()) else {
            return None;
        };
        self.manual = Default::default();

        let questions = [
            (format!("{src} portal X:"), "portal X"),
            (format!("{src} portal Y:"), "portal Y"),
            (format!("{dst} spawn X:"), "spawn X"),
            (format!("{dst} spawn Y:"), "spawn Y"),
        ];
        let mut problems = Vec::new();
        let mut coords = [0; 4];
        for (slot, (message, label)) in coords.iter_mut().zip(questions.iter()) {
            let Some(answer) = prompts.prompt(message, "0") else {
                self.set_info("Manual portal cancelled.");
                return None;
            };
            *slot = parse_coord(label, &answer, &mut problems);
        }

        let result = if problems.is_empty() {
            let reverse = prompts
                .prompt("Add reverse portal? (y/n):", "y")
                .is_some_and(|answer| answer.trim().to_ascii_lowercase().starts_with('y'));
            self.create_portal(&PortalRequest {
                source_map: src,
                source_cell: GridPos::new(coords[0], coords[1]),
                target_map: dst,
                target_spawn: GridPos::new(coords[2], coords[3]),
                reverse,
            })
        } else {
            Err(PortalError::Validation(problems))
        };

        match &result {
            Ok(outcome) => {
                let message = match &outcome.reverse_id {
                    Some(reverse_id) => {
                        format!("Created portals {} and {}.", outcome.forward_id, reverse_id)
                    }
                    None => format!("Created portal {}.", outcome.forward_id),
                };
                self.set_info(&message);
            }
            Err(err) => self.set_error(&err.status_text()),
        }
        Some(result)
    }

    /// Creates a blank map linked to an existing one in both directions. The
    /// existing map is saved first, the new map second.
    pub fn create_connected_map(&mut self, request: &ConnectedMapRequest) -> Result<PathBuf, PortalError> {
        let mut problems = Vec::new();
        let new_id = request.new_map.trim();
        if new_id.is_empty() {
            problems.push("new map id must not be empty".to_string());
        } else if !is_plain_map_id(new_id) {
            problems.push(format!("map id '{new_id}' must not contain path separators or '..'"));
        } else if self.maps.contains_key(new_id) || self.store.map_path(new_id).exists() {
            problems.push(format!("map '{new_id}' already exists"));
        }
        let (width, height) = (request.width, request.height);
        if width <= 0 || height <= 0 {
            problems.push(format!("new map size {width}x{height} must be at least 1x1"));
        } else if request.spawn.x < 0 || request.spawn.y < 0 || request.spawn.x >= width || request.spawn.y >= height {
            problems.push(format!("spawn {} is outside the new {width}x{height} map", request.spawn));
        }
        let Some(existing) = self.maps.get(&request.existing_map).cloned() else {
            problems.push(format!("unknown map '{}'", request.existing_map));
            return Err(PortalError::Validation(problems));
        };
        if let MapLink::Portal { cell } = request.link {
            if !existing.in_bounds(cell.x, cell.y) {
                problems.push(format!("portal cell {cell} is outside '{}'", existing.id));
            }
        }
        if !problems.is_empty() {
            return Err(PortalError::Validation(problems));
        }

        let mut created = MapData::blank(new_id, width, height, existing.tile_size, &existing.tileset_id);
        created.spawn = Some(request.spawn);
        let home = existing.spawn_point();
        let mut updated = existing.clone();
        match request.link {
            MapLink::Edge { direction, facing } => {
                upsert(
                    &mut updated,
                    Connection::edge(
                        &format!("{}_to_{new_id}", direction.as_str()),
                        direction,
                        ConnectionTarget::new(new_id, request.spawn, Some(facing)),
                    ),
                );
                let back = direction.opposite();
                created.connections.push(Connection::edge(
                    &format!("{}_to_{}", back.as_str(), existing.id),
                    back,
                    ConnectionTarget::new(&existing.id, home, Some(back)),
                ));
            }
            MapLink::Portal { cell } => {
                upsert(
                    &mut updated,
                    Connection::portal(
                        &format!("portal_to_{new_id}"),
                        cell,
                        ConnectionTarget::new(new_id, request.spawn, None),
                    ),
                );
                created.connections.push(Connection::portal(
                    &format!("portal_to_{}", existing.id),
                    GridPos::new(0, 0),
                    ConnectionTarget::new(&existing.id, home, None),
                ));
            }
        }

        let anchor = self.layout.position(&existing.id).unwrap_or_default();
        let placement = match request.link {
            MapLink::Edge { direction: Direction::Right, .. } => LayoutPos {
                x: anchor.x.saturating_add(existing.width),
                y: anchor.y,
            },
            MapLink::Edge { direction: Direction::Left, .. } => LayoutPos {
                x: anchor.x.saturating_sub(width),
                y: anchor.y,
            },
            MapLink::Edge { direction: Direction::Down, .. } => LayoutPos {
                x: anchor.x,
                y: anchor.y.saturating_add(existing.height),
            },
            MapLink::Edge { direction: Direction::Up, .. } => LayoutPos {
                x: anchor.x,
                y: anchor.y.saturating_sub(height),
            },
            MapLink::Portal { .. } => LayoutPos {
                x: anchor.x.saturating_add(existing.width).saturating_add(DEFAULT_PLACEMENT_GAP),
                y: anchor.y,
            },
        };

        self.maps.insert(existing.id.clone(), updated);
        self.maps.insert(new_id.to_string(), created);
        self.layout.maps.insert(new_id.to_string(), placement);
        let saved = self.save_transaction(&existing.id, existing.clone(), Some((new_id, None)))?;
        info!(existing = %existing.id, new_map = new_id, "connected_map_created");
        self.set_info(&format!("Created map '{new_id}' linked to '{}'.", existing.id));
        Ok(saved.last().cloned().unwrap_or_default())
    }
}
