use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::actions::Action;

/// Unmodeled JSON keys carried through load/save untouched.
pub type ExtraFields = serde_json::Map<String, Value>;

pub const GROUND_LAYER: &str = "ground";
pub const OVERLAY_LAYER: &str = "overlay";

pub const AUTO_PROVENANCE_KEY: &str = "auto";
pub const AUTO_PROVENANCE_TAG: &str = "world";
pub const MANUAL_PROVENANCE_KEY: &str = "manual";
pub const SOURCE_EDGE_COORD_KEY: &str = "sourceEdgeCoord";

pub const SPAWN_FLAG: &str = "spawn";

/// Defaultable keys a record carried when it was read. A key is written back
/// when it was present or when its value moved off the default, so a
/// load/save cycle neither drops explicit defaults nor adds keys.
#[derive(Debug, Clone, Default)]
pub struct ExplicitKeys(BTreeSet<&'static str>);

impl ExplicitKeys {
    pub fn of(keys: &[&'static str]) -> Self {
        Self(keys.iter().copied().collect())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    pub fn mark(&mut self, key: &'static str) {
        self.0.insert(key);
    }

    pub(crate) fn read<T>(&mut self, key: &'static str, value: Option<T>, default: impl FnOnce() -> T) -> T {
        match value {
            Some(value) => {
                self.mark(key);
                value
            }
            None => default(),
        }
    }

    pub(crate) fn write<T>(&self, key: &'static str, value: T, is_default: impl FnOnce(&T) -> bool) -> Option<T> {
        (self.contains(key) || !is_default(&value)).then_some(value)
    }
}

/// Key bookkeeping is formatting, not content.
impl PartialEq for ExplicitKeys {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct GridPos {
    pub x: i32,
    pub y: i32,
}

impl GridPos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn step(self, direction: Direction) -> Self {
        let (dx, dy) = direction.delta();
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
        }
    }
}

impl fmt::Display for GridPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Self::Up, Self::Down, Self::Left, Self::Right];

    /// Accepts screen names and the compass aliases the map editor writes.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "up" | "north" => Some(Self::Up),
            "down" | "south" => Some(Self::Down),
            "left" | "west" => Some(Self::Left),
            "right" | "east" => Some(Self::Right),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    pub fn delta(self) -> (i32, i32) {
        match self {
            Self::Up => (0, -1),
            Self::Down => (0, 1),
            Self::Left => (-1, 0),
            Self::Right => (1, 0),
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a tileset says about one tile id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileBehavior {
    pub walkable: bool,
    pub interaction: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "CellOverrideFile", into = "CellOverrideFile")]
pub struct CellOverride {
    pub walkable: Option<bool>,
    pub flags: Vec<String>,
    pub extra: ExtraFields,
    pub explicit: ExplicitKeys,
}

#[derive(Serialize, Deserialize)]
struct CellOverrideFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    walkable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    flags: Option<Vec<String>>,
    #[serde(flatten)]
    extra: ExtraFields,
}

impl From<CellOverrideFile> for CellOverride {
    fn from(file: CellOverrideFile) -> Self {
        let mut explicit = ExplicitKeys::default();
        Self {
            walkable: file.walkable,
            flags: explicit.read("flags", file.flags, Vec::new),
            extra: file.extra,
            explicit,
        }
    }
}

impl From<CellOverride> for CellOverrideFile {
    fn from(cell: CellOverride) -> Self {
        Self {
            walkable: cell.walkable,
            flags: cell.explicit.write("flags", cell.flags, Vec::is_empty),
            extra: cell.extra,
        }
    }
}

impl CellOverride {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|existing| existing == flag)
    }

    pub fn add_flag(&mut self, flag: &str) {
        if !self.has_flag(flag) {
            self.flags.push(flag.to_string());
        }
    }

    pub fn remove_flag(&mut self, flag: &str) {
        self.flags.retain(|existing| existing != flag);
    }

    pub fn is_empty(&self) -> bool {
        self.walkable.is_none() && self.flags.is_empty() && self.extra.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ConditionFile", into = "ConditionFile")]
pub struct Condition {
    pub flags_all: Vec<String>,
    pub flags_any: Vec<String>,
    pub not_flags: Vec<String>,
    pub extra: ExtraFields,
    pub explicit: ExplicitKeys,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConditionFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    flags_all: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    flags_any: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    not_flags: Option<Vec<String>>,
    #[serde(flatten)]
    extra: ExtraFields,
}

impl From<ConditionFile> for Condition {
    fn from(file: ConditionFile) -> Self {
        let mut explicit = ExplicitKeys::default();
        Self {
            flags_all: explicit.read("flagsAll", file.flags_all, Vec::new),
            flags_any: explicit.read("flagsAny", file.flags_any, Vec::new),
            not_flags: explicit.read("notFlags", file.not_flags, Vec::new),
            extra: file.extra,
            explicit,
        }
    }
}

impl From<Condition> for ConditionFile {
    fn from(condition: Condition) -> Self {
        let explicit = &condition.explicit;
        Self {
            flags_all: explicit.write("flagsAll", condition.flags_all, Vec::is_empty),
            flags_any: explicit.write("flagsAny", condition.flags_any, Vec::is_empty),
            not_flags: explicit.write("notFlags", condition.not_flags, Vec::is_empty),
            extra: condition.extra,
        }
    }
}

impl Condition {
    pub fn is_met(&self, flags: &HashSet<String>) -> bool {
        let all = self.flags_all.iter().all(|flag| flags.contains(flag));
        let any = self.flags_any.is_empty() || self.flags_any.iter().any(|flag| flags.contains(flag));
        let none = !self.not_flags.iter().any(|flag| flags.contains(flag));
        all && any && none
    }
}

/// A missing condition record always passes.
pub fn condition_met(condition: Option<&Condition>, flags: &HashSet<String>) -> bool {
    condition.map_or(true, |condition| condition.is_met(flags))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Edge,
    Portal,
}

/// Edge connections name a direction; portals name a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConnectionSource {
    Direction(String),
    Cell(GridPos),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTarget {
    pub map_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn: Option<GridPos>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facing: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl ConnectionTarget {
    pub fn new(map_id: &str, spawn: GridPos, facing: Option<Direction>) -> Self {
        Self {
            map_id: map_id.to_string(),
            spawn: Some(spawn),
            facing: facing.map(|direction| direction.as_str().to_string()),
            extra: ExtraFields::new(),
        }
    }

    pub fn facing_direction(&self) -> Option<Direction> {
        self.facing.as_deref().and_then(Direction::parse)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ConnectionKind,
    #[serde(rename = "from")]
    pub source: ConnectionSource,
    #[serde(rename = "to")]
    pub target: ConnectionTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Connection {
    pub fn edge(id: &str, direction: Direction, target: ConnectionTarget) -> Self {
        Self {
            id: id.to_string(),
            kind: ConnectionKind::Edge,
            source: ConnectionSource::Direction(direction.as_str().to_string()),
            target,
            condition: None,
            extra: ExtraFields::new(),
        }
    }

    pub fn portal(id: &str, cell: GridPos, target: ConnectionTarget) -> Self {
        Self {
            id: id.to_string(),
            kind: ConnectionKind::Portal,
            source: ConnectionSource::Cell(cell),
            target,
            condition: None,
            extra: ExtraFields::new(),
        }
    }

    pub fn edge_direction(&self) -> Option<Direction> {
        match (&self.kind, &self.source) {
            (ConnectionKind::Edge, ConnectionSource::Direction(raw)) => Direction::parse(raw),
            _ => None,
        }
    }

    pub fn portal_cell(&self) -> Option<GridPos> {
        match (&self.kind, &self.source) {
            (ConnectionKind::Portal, ConnectionSource::Cell(cell)) => Some(*cell),
            _ => None,
        }
    }

    pub fn is_auto(&self) -> bool {
        matches!(
            self.extra.get(AUTO_PROVENANCE_KEY),
            Some(Value::String(tag)) if tag == AUTO_PROVENANCE_TAG
        )
    }

    pub fn is_manual(&self) -> bool {
        matches!(self.extra.get(MANUAL_PROVENANCE_KEY), Some(Value::Bool(true)))
    }

    pub fn mark_auto(&mut self, edge_coord: i32) {
        self.extra.insert(
            AUTO_PROVENANCE_KEY.to_string(),
            Value::String(AUTO_PROVENANCE_TAG.to_string()),
        );
        self.extra
            .insert(SOURCE_EDGE_COORD_KEY.to_string(), Value::from(edge_coord));
    }

    pub fn mark_manual(&mut self) {
        self.extra
            .insert(MANUAL_PROVENANCE_KEY.to_string(), Value::Bool(true));
    }

    pub fn source_edge_coord(&self) -> Option<i64> {
        self.extra.get(SOURCE_EDGE_COORD_KEY).and_then(Value::as_i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DialogText {
    Line(String),
    Lines(Vec<String>),
}

impl DialogText {
    pub fn lines(&self) -> Vec<String> {
        match self {
            Self::Line(line) => vec![line.clone()],
            Self::Lines(lines) => lines.clone(),
        }
    }
}

fn default_entity_kind() -> String {
    "npc".to_string()
}

fn default_facing() -> String {
    Direction::Down.as_str().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "EntityFile", into = "EntityFile")]
pub struct EntityDef {
    pub id: String,
    pub kind: String,
    pub name: String,
    pub sprite_id: Option<String>,
    pub position: GridPos,
    pub facing: String,
    pub collision: bool,
    pub dialog: Option<DialogText>,
    pub dialog_id: Option<String>,
    pub actions: Vec<Action>,
    pub conditions: Option<Condition>,
    pub properties: ExtraFields,
    pub hidden: bool,
    pub extra: ExtraFields,
    pub explicit: ExplicitKeys,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityFile {
    id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sprite_id: Option<String>,
    position: GridPos,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    facing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    collision: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dialog: Option<DialogText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dialog_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    actions: Option<Vec<Action>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conditions: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    properties: Option<ExtraFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hidden: Option<bool>,
    #[serde(flatten)]
    extra: ExtraFields,
}

impl From<EntityFile> for EntityDef {
    fn from(file: EntityFile) -> Self {
        let mut explicit = ExplicitKeys::default();
        Self {
            id: file.id,
            kind: explicit.read("type", file.kind, default_entity_kind),
            name: explicit.read("name", file.name, String::new),
            sprite_id: file.sprite_id,
            position: file.position,
            facing: explicit.read("facing", file.facing, default_facing),
            collision: explicit.read("collision", file.collision, || false),
            dialog: file.dialog,
            dialog_id: file.dialog_id,
            actions: explicit.read("actions", file.actions, Vec::new),
            conditions: file.conditions,
            properties: explicit.read("properties", file.properties, ExtraFields::new),
            hidden: explicit.read("hidden", file.hidden, || false),
            extra: file.extra,
            explicit,
        }
    }
}

impl From<EntityDef> for EntityFile {
    fn from(entity: EntityDef) -> Self {
        let explicit = &entity.explicit;
        Self {
            id: entity.id,
            kind: explicit.write("type", entity.kind, |kind| *kind == default_entity_kind()),
            name: explicit.write("name", entity.name, String::is_empty),
            sprite_id: entity.sprite_id,
            position: entity.position,
            facing: explicit.write("facing", entity.facing, |facing| *facing == default_facing()),
            collision: explicit.write("collision", entity.collision, |collision| !collision),
            dialog: entity.dialog,
            dialog_id: entity.dialog_id,
            actions: explicit.write("actions", entity.actions, Vec::is_empty),
            conditions: entity.conditions,
            properties: explicit.write("properties", entity.properties, ExtraFields::is_empty),
            hidden: explicit.write("hidden", entity.hidden, |hidden| !hidden),
            extra: entity.extra,
        }
    }
}

impl EntityDef {
    pub fn npc(id: &str, position: GridPos) -> Self {
        Self {
            id: id.to_string(),
            kind: default_entity_kind(),
            name: id.to_string(),
            sprite_id: None,
            position,
            facing: default_facing(),
            collision: true,
            dialog: None,
            dialog_id: None,
            actions: Vec::new(),
            conditions: None,
            properties: ExtraFields::new(),
            hidden: false,
            extra: ExtraFields::new(),
            explicit: ExplicitKeys::of(&["type", "name", "facing", "collision"]),
        }
    }

    /// Hidden entities and entities whose conditions fail are not in the world.
    pub fn is_present(&self, flags: &HashSet<String>) -> bool {
        !self.hidden && condition_met(self.conditions.as_ref(), flags)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerKind {
    OnEnter,
    OnInteract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TriggerArea {
    Rect {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },
    Point(GridPos),
}

impl TriggerArea {
    pub fn contains(&self, x: i32, y: i32) -> bool {
        match *self {
            Self::Point(pos) => pos.x == x && pos.y == y,
            Self::Rect {
                x: left,
                y: top,
                width,
                height,
            } => within(x, left, width) && within(y, top, height),
        }
    }

    /// Last covered cell of a rectangle, or `None` when it is empty or its
    /// far corner does not fit in i32.
    pub fn far_corner(&self) -> Option<GridPos> {
        match *self {
            Self::Point(pos) => Some(pos),
            Self::Rect {
                x,
                y,
                width,
                height,
            } if width > 0 && height > 0 => Some(GridPos {
                x: x.checked_add(width - 1)?,
                y: y.checked_add(height - 1)?,
            }),
            Self::Rect { .. } => None,
        }
    }

    pub fn origin(&self) -> GridPos {
        match *self {
            Self::Point(pos) => pos,
            Self::Rect { x, y, .. } => GridPos { x, y },
        }
    }
}

fn within(value: i32, start: i32, len: i32) -> bool {
    let offset = i64::from(value) - i64::from(start);
    offset >= 0 && offset < i64::from(len)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TriggerFile", into = "TriggerFile")]
pub struct TriggerDef {
    pub id: String,
    pub kind: TriggerKind,
    pub position: TriggerArea,
    pub actions: Vec<Action>,
    pub repeatable: bool,
    pub conditions: Option<Condition>,
    pub extra: ExtraFields,
    pub explicit: ExplicitKeys,
}

#[derive(Serialize, Deserialize)]
struct TriggerFile {
    id: String,
    #[serde(rename = "type")]
    kind: TriggerKind,
    position: TriggerArea,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    actions: Option<Vec<Action>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    repeatable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conditions: Option<Condition>,
    #[serde(flatten)]
    extra: ExtraFields,
}

impl From<TriggerFile> for TriggerDef {
    fn from(file: TriggerFile) -> Self {
        let mut explicit = ExplicitKeys::default();
        Self {
            id: file.id,
            kind: file.kind,
            position: file.position,
            actions: explicit.read("actions", file.actions, Vec::new),
            repeatable: explicit.read("repeatable", file.repeatable, || false),
            conditions: file.conditions,
            extra: file.extra,
            explicit,
        }
    }
}

impl From<TriggerDef> for TriggerFile {
    fn from(trigger: TriggerDef) -> Self {
        let explicit = &trigger.explicit;
        Self {
            id: trigger.id,
            kind: trigger.kind,
            position: trigger.position,
            actions: explicit.write("actions", trigger.actions, Vec::is_empty),
            repeatable: explicit.write("repeatable", trigger.repeatable, |repeatable| !repeatable),
            conditions: trigger.conditions,
            extra: trigger.extra,
        }
    }
}
