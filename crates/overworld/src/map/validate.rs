use std::collections::{BTreeSet, HashMap, HashSet};

use super::actions::Action;
use super::data::MapData;
use super::records::{ConnectionKind, ConnectionSource, GridPos, TriggerArea};
use crate::tileset::TileSet;

/// Map id to `(width, height)` for every map a connection may point at.
pub type KnownMaps = HashMap<String, (i32, i32)>;

/// Findings from [`MapData::validate`]. Errors should block a save or launch;
/// warnings are informational.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, message: String) {
        self.errors.push(message);
    }

    fn warning(&mut self, message: String) {
        self.warnings.push(message);
    }
}

impl MapData {
    /// Reports every structural problem in one pass.
    ///
    /// Tile ids are only checked when a tileset is supplied and connection
    /// targets only when the known maps are supplied.
    pub fn validate(
        &self,
        tileset: Option<&TileSet>,
        known_maps: Option<&KnownMaps>,
    ) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.width <= 0 || self.height <= 0 {
            report.error(format!(
                "map dimensions must be positive, got {}x{}",
                self.width, self.height
            ));
        }
        if self.tile_size == 0 {
            report.error("tile size must be positive".to_string());
        }

        self.check_layers(tileset, &mut report);
        self.check_overrides(&mut report);
        self.check_spawn(&mut report);
        self.check_connections(known_maps, &mut report);
        self.check_entities(&mut report);
        self.check_triggers(&mut report);

        report
    }

    fn check_layers(&self, tileset: Option<&TileSet>, report: &mut ValidationReport) {
        let expected_height = self.height.max(0) as usize;
        let expected_width = self.width.max(0) as usize;
        for layer in &self.layers {
            if layer.tiles.len() != expected_height {
                report.error(format!(
                    "layer '{}' has {} rows, expected {}",
                    layer.name,
                    layer.tiles.len(),
                    expected_height
                ));
            }
            for (row_index, row) in layer.tiles.iter().enumerate() {
                if row.len() != expected_width {
                    report.error(format!(
                        "layer '{}' row {} has {} cells, expected {}",
                        layer.name,
                        row_index,
                        row.len(),
                        expected_width
                    ));
                }
            }

            let Some(tileset) = tileset else {
                continue;
            };
            let unknown: BTreeSet<&str> = layer
                .tiles
                .iter()
                .flatten()
                .filter_map(|cell| cell.as_deref())
                .filter(|tile_id| !tileset.contains_tile(tile_id))
                .collect();
            for tile_id in unknown {
                report.error(format!(
                    "layer '{}' uses tile '{}' which is not in tileset '{}'",
                    layer.name, tile_id, tileset.id
                ));
            }
        }
    }

    fn check_overrides(&self, report: &mut ValidationReport) {
        for pos in self.overrides.keys() {
            if !self.in_bounds(pos.x, pos.y) {
                report.error(format!("override at {pos} is out of bounds"));
            }
        }
    }

    fn check_spawn(&self, report: &mut ValidationReport) {
        let Some(spawn) = self.spawn else {
            return;
        };
        if spawn.x < 0 || spawn.y < 0 {
            report.error(format!("spawn {spawn} must not be negative"));
        } else if !self.in_bounds(spawn.x, spawn.y) {
            report.error(format!(
                "spawn {spawn} lies outside the {}x{} map",
                self.width, self.height
            ));
        }
    }

    fn check_connections(
        &self,
        known_maps: Option<&KnownMaps>,
        report: &mut ValidationReport,
    ) {
        for connection in &self.connections {
            match (connection.kind, &connection.source) {
                (ConnectionKind::Edge, ConnectionSource::Direction(_)) => {
                    if connection.edge_direction().is_none() {
                        report.error(format!(
                            "edge connection '{}' has an unknown direction",
                            connection.id
                        ));
                    }
                }
                (ConnectionKind::Portal, ConnectionSource::Cell(cell)) => {
                    if !self.in_bounds(cell.x, cell.y) {
                        report.error(format!(
                            "portal '{}' source {} is out of bounds",
                            connection.id, cell
                        ));
                    }
                }
                (ConnectionKind::Edge, ConnectionSource::Cell(_)) => {
                    report.error(format!(
                        "edge connection '{}' must name a direction, not a cell",
                        connection.id
                    ));
                }
                (ConnectionKind::Portal, ConnectionSource::Direction(_)) => {
                    report.error(format!(
                        "portal '{}' must name a cell, not a direction",
                        connection.id
                    ));
                }
            }

            let spawn = connection.target.spawn;
            let negative = spawn.is_some_and(|spawn| spawn.x < 0 || spawn.y < 0);
            if let Some(spawn) = spawn.filter(|_| negative) {
                report.error(format!(
                    "connection '{}' target spawn {} must not be negative",
                    connection.id, spawn
                ));
            }

            if connection.target.map_id.is_empty() {
                report.error(format!("connection '{}' has no target map", connection.id));
            } else if let Some(known) = known_maps {
                match known.get(&connection.target.map_id) {
                    None => report.warning(format!(
                        "connection '{}' targets unknown map '{}'",
                        connection.id, connection.target.map_id
                    )),
                    Some(&(width, height)) => {
                        let beyond = |spawn: &GridPos| spawn.x >= width || spawn.y >= height;
                        if let Some(spawn) = spawn.filter(|spawn| !negative && beyond(spawn)) {
                            report.error(format!(
                                "connection '{}' target spawn {} is outside '{}' ({width}x{height})",
                                connection.id, spawn, connection.target.map_id
                            ));
                        }
                    }
                }
            }
        }
    }

    fn check_entities(&self, report: &mut ValidationReport) {
        let mut seen = HashSet::new();
        for entity in &self.entities {
            if !seen.insert(entity.id.as_str()) {
                report.warning(format!("duplicate entity id '{}'", entity.id));
            }
            if !self.in_bounds(entity.position.x, entity.position.y) {
                report.error(format!(
                    "entity '{}' at {} is out of bounds",
                    entity.id, entity.position
                ));
            }
            warn_unknown_actions(&format!("entity '{}'", entity.id), &entity.actions, report);
        }
    }

    fn check_triggers(&self, report: &mut ValidationReport) {
        for trigger in &self.triggers {
            let inside = match trigger.position {
                TriggerArea::Point(pos) => self.in_bounds(pos.x, pos.y),
                TriggerArea::Rect { x, y, .. } => trigger
                    .position
                    .far_corner()
                    .is_some_and(|far| self.in_bounds(x, y) && self.in_bounds(far.x, far.y)),
            };
            if !inside {
                report.error(format!(
                    "trigger '{}' at {} is out of bounds",
                    trigger.id,
                    trigger.position.origin()
                ));
            }
            warn_unknown_actions(&format!("trigger '{}'", trigger.id), &trigger.actions, report);
        }
    }
}

fn warn_unknown_actions(owner: &str, actions: &[Action], report: &mut ValidationReport) {
    for action in actions {
        if let Action::Unknown(_) = action {
            report.warning(format!(
                "{owner} has unsupported action '{}' which will be skipped",
                action.kind()
            ));
        }
    }
}
