//! Outside services the session talks to: audio, battles and map loading.

use serde_json::Value;

use crate::map::{MapData, MapError, MapStore};
use crate::tileset::TileSet;

pub trait AudioController {
    fn play_music(&mut self, music_id: &str);
    fn stop_music(&mut self);
    fn play_sound(&mut self, sound_id: &str);
}

/// Silent audio for headless runs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAudio;

impl AudioController for NullAudio {
    fn play_music(&mut self, _music_id: &str) {}

    fn stop_music(&mut self) {}

    fn play_sound(&mut self, _sound_id: &str) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct BattlePayload {
    pub team: Vec<Value>,
    pub opponent_id: Option<String>,
    pub label: String,
}

pub trait BattleLauncher {
    fn launch(&mut self, payload: BattlePayload);
}

/// Loads the map (and its tileset) a warp or connection points at.
pub trait MapSource {
    fn load_bundle(&self, map_id: &str) -> Result<(MapData, Option<TileSet>), MapError>;
}

impl MapSource for MapStore {
    fn load_bundle(&self, map_id: &str) -> Result<(MapData, Option<TileSet>), MapError> {
        MapStore::load_bundle(self, map_id)
    }
}
