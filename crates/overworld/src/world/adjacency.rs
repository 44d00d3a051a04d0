//! Edge connections synthesized from where maps sit in the world layout.

use std::collections::BTreeMap;

use tracing::debug;

use super::layout::{LayoutPos, WorldLayout};
use crate::config::ADJACENCY_EPSILON;
use crate::map::{Connection, ConnectionTarget, Direction, GridPos, MapData};
use crate::tileset::TileSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdjacencySummary {
    pub removed: usize,
    pub added: usize,
}

/// Drops every auto connection from every map, then rebuilds them from the
/// layout. Connections without the auto tag are left alone.
pub(crate) fn regenerate_auto_connections(
    maps: &mut BTreeMap<String, MapData>,
    tilesets: &BTreeMap<String, TileSet>,
    layout: &WorldLayout,
) -> AdjacencySummary {
    let mut summary = AdjacencySummary::default();
    for map in maps.values_mut() {
        let before = map.connections.len();
        map.connections.retain(|connection| !connection.is_auto());
        summary.removed += before - map.connections.len();
    }

    let ids: Vec<String> = maps.keys().cloned().collect();
    let mut generated: Vec<(String, Connection)> = Vec::new();
    for (index, a_id) in ids.iter().enumerate() {
        for b_id in &ids[index + 1..] {
            let (Some(a), Some(b)) = (maps.get(a_id), maps.get(b_id)) else {
                continue;
            };
            let a = Placed::new(a, tilesets, layout);
            let b = Placed::new(b, tilesets, layout);
            connect_horizontal(&a, &b, &mut generated);
            connect_horizontal(&b, &a, &mut generated);
            connect_vertical(&a, &b, &mut generated);
            connect_vertical(&b, &a, &mut generated);
        }
    }

    summary.added = generated.len();
    for (map_id, connection) in generated {
        if let Some(map) = maps.get_mut(&map_id) {
            map.connections.push(connection);
        }
    }
    debug!(
        removed = summary.removed,
        added = summary.added,
        "auto_connections_regenerated"
    );
    summary
}

struct Placed<'a> {
    map: &'a MapData,
    tileset: Option<&'a TileSet>,
    pos: LayoutPos,
}

impl<'a> Placed<'a> {
    fn new(
        map: &'a MapData,
        tilesets: &'a BTreeMap<String, TileSet>,
        layout: &WorldLayout,
    ) -> Self {
        Self {
            map,
            tileset: tilesets.get(&map.tileset_id),
            pos: layout.position(&map.id).unwrap_or_default(),
        }
    }

    /// Tile behavior only; overrides are runtime exceptions and do not shape the graph.
    fn walkable(&self, x: i32, y: i32) -> bool {
        if !self.map.in_bounds(x, y) {
            return false;
        }
        let Some(tileset) = self.tileset else {
            return true;
        };
        self.map.tiles_at(x, y).into_iter().all(|tile_id| {
            tileset
                .behavior(tile_id)
                .map_or(true, |behavior| behavior.walkable)
        })
    }
}

/// Edge positions are compared in i64 so a map placed near `i32::MAX`
/// cannot overflow.
fn touching(edge: i64, other_edge: i64) -> bool {
    ((edge - other_edge) as f64).abs() < ADJACENCY_EPSILON
}

/// World span `[start, start + len)` of one side of a placed map.
fn span(start: i32, len: i32) -> (i64, i64) {
    (i64::from(start), i64::from(start) + i64::from(len))
}

/// Offset of a world coordinate inside a map; `None` when it does not fit a cell index.
fn local(world: i64, origin: i32) -> Option<i32> {
    i32::try_from(world - i64::from(origin)).ok()
}

fn auto_edge(
    direction: Direction,
    target: &str,
    spawn: GridPos,
    edge_coord: i32,
) -> Connection {
    let mut connection = Connection::edge(
        &format!("auto_{}_{}_{}", direction.as_str(), target, edge_coord),
        direction,
        ConnectionTarget::new(target, spawn, Some(direction)),
    );
    connection.mark_auto(edge_coord);
    connection
}

/// `left`'s right edge against `right`'s left edge.
fn connect_horizontal(left: &Placed, right: &Placed, out: &mut Vec<(String, Connection)>) {
    let (_, left_edge) = span(left.pos.x, left.map.width);
    if !touching(left_edge, i64::from(right.pos.x)) {
        return;
    }
    let (left_top, left_bottom) = span(left.pos.y, left.map.height);
    let (right_top, right_bottom) = span(right.pos.y, right.map.height);
    let left_x = left.map.width.saturating_sub(1);
    for world_y in left_top.max(right_top)..left_bottom.min(right_bottom) {
        let (Some(left_y), Some(right_y)) = (local(world_y, left.pos.y), local(world_y, right.pos.y)) else {
            continue;
        };
        if !(left.walkable(left_x, left_y) && right.walkable(0, right_y)) {
            continue;
        }
        out.push((
            left.map.id.clone(),
            auto_edge(Direction::Right, &right.map.id, GridPos::new(0, right_y), left_y),
        ));
        out.push((
            right.map.id.clone(),
            auto_edge(Direction::Left, &left.map.id, GridPos::new(left_x, left_y), right_y),
        ));
    }
}

/// `top`'s bottom edge against `bottom`'s top edge.
fn connect_vertical(top: &Placed, bottom: &Placed, out: &mut Vec<(String, Connection)>) {
    let (_, top_edge) = span(top.pos.y, top.map.height);
    if !touching(top_edge, i64::from(bottom.pos.y)) {
        return;
    }
    let (top_left, top_right) = span(top.pos.x, top.map.width);
    let (bottom_left, bottom_right) = span(bottom.pos.x, bottom.map.width);
    let top_y = top.map.height.saturating_sub(1);
    for world_x in top_left.max(bottom_left)..top_right.min(bottom_right) {
        let (Some(top_x), Some(bottom_x)) = (local(world_x, top.pos.x), local(world_x, bottom.pos.x)) else {
            continue;
        };
        if !(top.walkable(top_x, top_y) && bottom.walkable(bottom_x, 0)) {
            continue;
        }
        out.push((
            top.map.id.clone(),
            auto_edge(Direction::Down, &bottom.map.id, GridPos::new(bottom_x, 0), top_x),
        ));
        out.push((
            bottom.map.id.clone(),
            auto_edge(Direction::Up, &top.map.id, GridPos::new(top_x, top_y), bottom_x),
        ));
    }
}
