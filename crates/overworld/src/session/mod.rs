//! Runtime state for one player walking around one map at a time.
//!
//! The session has no explicit state id. It is "reading" while the message
//! queue is non-empty, "waiting to fight" while a battle is pending, and
//! otherwise free to move. `move_player` and `interact` branch on those fields.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::map::{
    condition_met, Action, CellOverride, Connection, DialogText, Direction, GridPos, MapData,
    TriggerKind,
};
use crate::tileset::TileSet;

mod collaborators;

pub use collaborators::{AudioController, BattleLauncher, BattlePayload, MapSource, NullAudio};

const DEFAULT_BATTLE_LABEL: &str = "A wild opponent";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Player {
    pub x: i32,
    pub y: i32,
    pub facing: Direction,
}

impl Player {
    pub fn pos(&self) -> GridPos {
        GridPos::new(self.x, self.y)
    }
}

pub struct OverworldSession {
    map: MapData,
    tileset: Option<TileSet>,
    player: Player,
    messages: VecDeque<String>,
    flags: HashSet<String>,
    /// `(map id, trigger id)` of non-repeatable triggers that already fired.
    consumed_triggers: HashSet<(String, String)>,
    pending_battle: Option<BattlePayload>,
    current_music: Option<String>,
    dialogs: HashMap<String, DialogText>,
    audio: Box<dyn AudioController>,
    battles: Option<Box<dyn BattleLauncher>>,
    maps: Option<Box<dyn MapSource>>,
}

impl OverworldSession {
    /// Places the player on the map's spawn point facing down. Nothing plays
    /// or fires until [`OverworldSession::start`].
    pub fn new(map: MapData, tileset: Option<TileSet>) -> Self {
        let spawn = clamp_to_map(&map, map.spawn_point());
        Self {
            map,
            tileset,
            player: Player {
                x: spawn.x,
                y: spawn.y,
                facing: Direction::Down,
            },
            messages: VecDeque::new(),
            flags: HashSet::new(),
            consumed_triggers: HashSet::new(),
            pending_battle: None,
            current_music: None,
            dialogs: HashMap::new(),
            audio: Box::new(NullAudio),
            battles: None,
            maps: None,
        }
    }

    pub fn with_audio(mut self, audio: Box<dyn AudioController>) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_battle_launcher(mut self, launcher: Box<dyn BattleLauncher>) -> Self {
        self.battles = Some(launcher);
        self
    }

    pub fn with_map_source(mut self, maps: Box<dyn MapSource>) -> Self {
        self.maps = Some(maps);
        self
    }

    /// Text for entities that reference a `dialogId` instead of inline dialog.
    pub fn with_dialogs(mut self, dialogs: HashMap<String, DialogText>) -> Self {
        self.dialogs = dialogs;
        self
    }

    /// Starts the map's music and fires enter triggers under the player.
    pub fn start(&mut self) {
        let music = self.map.music_id.clone();
        self.apply_music(music);
        self.fire_triggers(TriggerKind::OnEnter, self.player.pos());
        info!(
            map_id = %self.map.id,
            x = self.player.x,
            y = self.player.y,
            "session_started"
        );
    }

    pub fn map(&self) -> &MapData {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut MapData {
        &mut self.map
    }

    pub fn tileset(&self) -> Option<&TileSet> {
        self.tileset.as_ref()
    }

    pub fn player(&self) -> Player {
        self.player
    }

    pub fn flags(&self) -> &HashSet<String> {
        &self.flags
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    pub fn active_message(&self) -> Option<&str> {
        self.messages.front().map(String::as_str)
    }

    pub fn queued_messages(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(String::as_str)
    }

    pub fn pending_battle(&self) -> Option<&BattlePayload> {
        self.pending_battle.as_ref()
    }

    pub fn current_music(&self) -> Option<&str> {
        self.current_music.as_deref()
    }

    pub fn is_trigger_consumed(&self, map_id: &str, trigger_id: &str) -> bool {
        self.consumed_triggers
            .contains(&(map_id.to_string(), trigger_id.to_string()))
    }

    pub fn queue_message(&mut self, text: &str) {
        self.messages.push_back(text.to_string());
    }

    /// Clears flags, consumed triggers, queued messages and any pending battle.
    pub fn reset(&mut self) {
        self.flags.clear();
        self.consumed_triggers.clear();
        self.messages.clear();
        self.pending_battle = None;
        debug!(map_id = %self.map.id, "session_reset");
    }

    /// Tile behavior first, then the override, then blocking entities.
    pub fn is_walkable(&self, x: i32, y: i32) -> bool {
        if !self.map.in_bounds(x, y) {
            return false;
        }
        let mut walkable = match &self.tileset {
            Some(tileset) => self.map.tiles_at(x, y).into_iter().all(|tile_id| {
                tileset
                    .behavior(tile_id)
                    .map_or(true, |behavior| behavior.walkable)
            }),
            None => true,
        };
        if let Some(forced) = self.map.get_override(x, y).and_then(|cell| cell.walkable) {
            walkable = forced;
        }
        walkable && !self.blocked_by_entity(x, y)
    }

    fn blocked_by_entity(&self, x: i32, y: i32) -> bool {
        self.map
            .find_entities_at(x, y)
            .into_iter()
            .any(|entity| entity.collision && entity.is_present(&self.flags))
    }

    /// Returns true when the player moved or changed maps. Facing always
    /// follows the requested direction, so a blocked step still turns the
    /// player toward whatever is in the way.
    pub fn move_player(&mut self, direction: Direction) -> bool {
        if self.active_message().is_some() {
            return false;
        }
        self.player.facing = direction;
        let target = self.player.pos().step(direction);

        if !self.map.in_bounds(target.x, target.y) {
            let along = match direction {
                Direction::Left | Direction::Right => self.player.y,
                Direction::Up | Direction::Down => self.player.x,
            };
            let connection = self
                .map
                .connection_for_edge(direction, Some(along))
                .filter(|connection| condition_met(connection.condition.as_ref(), &self.flags))
                .cloned();
            return match connection {
                Some(connection) => self.follow_connection(&connection),
                None => {
                    debug!(map_id = %self.map.id, direction = %direction, "move_blocked_edge");
                    false
                }
            };
        }

        if !self.is_walkable(target.x, target.y) {
            return false;
        }
        self.player.x = target.x;
        self.player.y = target.y;

        let portal = self
            .map
            .portal_at(target.x, target.y)
            .filter(|connection| condition_met(connection.condition.as_ref(), &self.flags))
            .cloned();
        match portal {
            Some(portal) => {
                self.follow_connection(&portal);
            }
            None => self.fire_triggers(TriggerKind::OnEnter, target),
        }
        true
    }

    /// Acknowledges the active message if there is one; otherwise interacts
    /// with whatever is in front of the player. Returns the active message.
    pub fn interact(&mut self) -> Option<String> {
        if !self.messages.is_empty() {
            self.messages.pop_front();
            if self.messages.is_empty() {
                if let Some(payload) = self.pending_battle.take() {
                    self.launch_battle(payload);
                }
            }
            return self.active_message().map(str::to_string);
        }

        let map_id = self.map.id.clone();
        let target = self.player.pos().step(self.player.facing);

        let entity = self
            .map
            .find_entities_at(target.x, target.y)
            .into_iter()
            .find(|entity| entity.is_present(&self.flags))
            .cloned();
        if let Some(entity) = entity {
            if let Some(occupant) = self.map.entity_mut(&entity.id) {
                occupant.facing = self.player.facing.opposite().as_str().to_string();
            }
            debug!(map_id = %map_id, entity_id = %entity.id, "entity_interacted");
            if !entity.actions.is_empty() {
                self.run_actions(&entity.actions, Some(&entity.id));
            } else if let Some(dialog) = &entity.dialog {
                self.queue_lines(dialog);
            } else if let Some(dialog_id) = &entity.dialog_id {
                match self.dialogs.get(dialog_id).cloned() {
                    Some(dialog) => self.queue_lines(&dialog),
                    None => warn!(entity_id = %entity.id, dialog_id = %dialog_id, "dialog_missing"),
                }
            }
        }

        if self.map.id == map_id {
            self.fire_triggers(TriggerKind::OnInteract, target);
        }

        if self.messages.is_empty() && self.map.id == map_id {
            if let Some(text) = self.tile_interaction(target.x, target.y) {
                self.messages.push_back(text);
            }
        }

        self.active_message().map(str::to_string)
    }

    /// Interaction text of the topmost tile at the cell that has one.
    fn tile_interaction(&self, x: i32, y: i32) -> Option<String> {
        let tileset = self.tileset.as_ref()?;
        self.map
            .tiles_at(x, y)
            .into_iter()
            .rev()
            .find_map(|tile_id| tileset.behavior(tile_id)?.interaction)
    }

    /// Makes `map` the active map. A `None` tileset keeps the current one;
    /// facing only changes when given; music only restarts when its id changes.
    pub fn set_map(
        &mut self,
        map: MapData,
        tileset: Option<TileSet>,
        spawn: Option<GridPos>,
        facing: Option<Direction>,
    ) {
        let spawn = clamp_to_map(&map, spawn.unwrap_or_else(|| map.spawn_point()));
        let music = map.music_id.clone();
        info!(
            from = %self.map.id,
            to = %map.id,
            x = spawn.x,
            y = spawn.y,
            "map_switched"
        );
        self.map = map;
        if tileset.is_some() {
            self.tileset = tileset;
        }
        self.player.x = spawn.x;
        self.player.y = spawn.y;
        if let Some(facing) = facing {
            self.player.facing = facing;
        }
        self.apply_music(music);
    }

    fn apply_music(&mut self, music: Option<String>) {
        if music == self.current_music {
            return;
        }
        match &music {
            Some(music_id) => self.audio.play_music(music_id),
            None => self.audio.stop_music(),
        }
        self.current_music = music;
    }

    fn follow_connection(&mut self, connection: &Connection) -> bool {
        debug!(
            map_id = %self.map.id,
            connection_id = %connection.id,
            target = %connection.target.map_id,
            "connection_followed"
        );
        self.travel(
            &connection.target.map_id,
            connection.target.spawn,
            connection.target.facing_direction(),
        )
    }

    /// Moves to `map_id` (loading it unless it is the active map), then fires
    /// enter triggers at the arrival cell. Portals at the arrival cell do not fire.
    fn travel(&mut self, map_id: &str, spawn: Option<GridPos>, facing: Option<Direction>) -> bool {
        if map_id == self.map.id {
            let spawn = clamp_to_map(&self.map, spawn.unwrap_or_else(|| self.map.spawn_point()));
            self.player.x = spawn.x;
            self.player.y = spawn.y;
            if let Some(facing) = facing {
                self.player.facing = facing;
            }
        } else {
            let Some(maps) = self.maps.as_ref() else {
                warn!(map_id, "map_source_missing");
                return false;
            };
            match maps.load_bundle(map_id) {
                Ok((map, tileset)) => self.set_map(map, tileset, spawn, facing),
                Err(err) => {
                    error!(map_id, error = %err, "map_transition_failed");
                    return false;
                }
            }
        }
        self.fire_triggers(TriggerKind::OnEnter, self.player.pos());
        true
    }

    fn fire_triggers(&mut self, kind: TriggerKind, at: GridPos) {
        let map_id = self.map.id.clone();
        let candidates: Vec<_> = self
            .map
            .find_triggers_at(at.x, at.y, Some(kind))
            .into_iter()
            .cloned()
            .collect();
        for trigger in candidates {
            // An earlier trigger may have warped the player away.
            if self.map.id != map_id {
                break;
            }
            let key = (map_id.clone(), trigger.id.clone());
            if !trigger.repeatable && self.consumed_triggers.contains(&key) {
                continue;
            }
            if !condition_met(trigger.conditions.as_ref(), &self.flags) {
                continue;
            }
            if !trigger.repeatable {
                self.consumed_triggers.insert(key);
            }
            debug!(map_id = %map_id, trigger_id = %trigger.id, "trigger_fired");
            self.run_actions(&trigger.actions, None);
        }
    }

    fn queue_lines(&mut self, text: &DialogText) {
        self.messages.extend(text.lines());
    }

    /// Interprets actions in order. `entity_id` is the entity that owns the
    /// list, if any; battles use it to find a team and an opponent.
    pub fn run_actions(&mut self, actions: &[Action], entity_id: Option<&str>) {
        for action in actions {
            match action {
                Action::ShowText(body) => self.queue_lines(&body.text),
                Action::SetFlag(body) => {
                    self.flags.insert(body.flag.clone());
                }
                Action::ClearFlag(body) => {
                    self.flags.remove(&body.flag);
                }
                Action::PlaySound(body) => self.audio.play_sound(&body.sound_id),
                Action::PlayMusic(body) => {
                    self.audio.play_music(&body.music_id);
                    self.current_music = Some(body.music_id.clone());
                }
                Action::StopMusic(_) => {
                    self.audio.stop_music();
                    self.current_music = None;
                }
                Action::Warp(body) => {
                    let facing = body.facing.as_deref().and_then(Direction::parse);
                    self.travel(&body.map_id, body.spawn, facing);
                }
                Action::RunConnection(body) => {
                    let connection = self.map.connection(&body.connection_id).cloned();
                    match connection {
                        Some(connection) => {
                            self.follow_connection(&connection);
                        }
                        None => warn!(
                            map_id = %self.map.id,
                            connection_id = %body.connection_id,
                            "connection_missing"
                        ),
                    }
                }
                Action::SetEntity(body) => match self.map.entity_mut(&body.entity_id) {
                    Some(entity) => {
                        if body.hidden.is_none() && body.collision.is_none() {
                            entity.hidden = !entity.hidden;
                        }
                        if let Some(hidden) = body.hidden {
                            entity.hidden = hidden;
                        }
                        if let Some(collision) = body.collision {
                            entity.collision = collision;
                        }
                    }
                    None => warn!(entity_id = %body.entity_id, "entity_missing"),
                },
                Action::SetOverride(body) => {
                    if !self.map.in_bounds(body.x, body.y) {
                        warn!(x = body.x, y = body.y, "override_out_of_bounds");
                        continue;
                    }
                    let mut cell: CellOverride =
                        self.map.remove_override(body.x, body.y).unwrap_or_default();
                    if body.clear_walkable == Some(true) {
                        cell.walkable = None;
                    }
                    if body.walkable.is_some() {
                        cell.walkable = body.walkable;
                    }
                    for flag in body.add_flags.iter().flatten() {
                        cell.add_flag(flag);
                    }
                    for flag in body.remove_flags.iter().flatten() {
                        cell.remove_flag(flag);
                    }
                    if !cell.is_empty() {
                        self.map.set_override(body.x, body.y, cell);
                    }
                }
                Action::StartBattle(body) => {
                    let owner = body.entity_id.as_deref().or(entity_id);
                    let payload = self.battle_payload(
                        body.team.clone(),
                        body.opponent_id.clone(),
                        body.label.clone(),
                        owner,
                    );
                    if self.messages.is_empty() {
                        self.launch_battle(payload);
                    } else {
                        debug!(label = %payload.label, "battle_deferred");
                        self.pending_battle = Some(payload);
                    }
                }
                Action::Unknown(raw) => {
                    debug!(kind = %action.kind(), raw = %raw, "action_skipped");
                }
            }
        }
    }

    fn battle_payload(
        &self,
        team: Option<Vec<Value>>,
        opponent_id: Option<String>,
        label: Option<String>,
        owner: Option<&str>,
    ) -> BattlePayload {
        let owner = owner.and_then(|id| self.map.entity(id));
        let team = team
            .or_else(|| {
                owner
                    .and_then(|entity| entity.properties.get("team"))
                    .and_then(Value::as_array)
                    .cloned()
            })
            .unwrap_or_default();
        BattlePayload {
            team,
            opponent_id: opponent_id.or_else(|| owner.map(|entity| entity.id.clone())),
            label: label
                .or_else(|| {
                    owner
                        .map(|entity| entity.name.clone())
                        .filter(|name| !name.is_empty())
                })
                .unwrap_or_else(|| DEFAULT_BATTLE_LABEL.to_string()),
        }
    }

    fn launch_battle(&mut self, payload: BattlePayload) {
        info!(
            label = %payload.label,
            team_size = payload.team.len(),
            "battle_started"
        );
        match self.battles.as_mut() {
            Some(launcher) => launcher.launch(payload),
            None => self
                .messages
                .push_back(format!("{} wants to battle!", payload.label)),
        }
    }
}

/// The nearest in-bounds cell to `pos`, so a bad spawn never strands the
/// player outside the map.
fn clamp_to_map(map: &MapData, pos: GridPos) -> GridPos {
    if map.in_bounds(pos.x, pos.y) {
        return pos;
    }
    let clamped = GridPos::new(
        pos.x.min(map.width.saturating_sub(1)).max(0),
        pos.y.min(map.height.saturating_sub(1)).max(0),
    );
    warn!(
        map_id = %map.id,
        x = pos.x,
        y = pos.y,
        clamped_x = clamped.x,
        clamped_y = clamped.y,
        "spawn_out_of_bounds"
    );
    clamped
}
