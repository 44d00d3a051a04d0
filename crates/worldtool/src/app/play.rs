//! Line-driven play loop: one command letter per input line, a text frame after each.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

use overworld::{
    AudioController, BattleLauncher, BattlePayload, DialogText, Direction, MapStore,
    OverworldSession,
};
use tracing::{info, warn};

/// Logs what a speaker would play.
pub(crate) struct LogAudio;

impl AudioController for LogAudio {
    fn play_music(&mut self, music_id: &str) {
        info!(music_id, "music_started");
    }

    fn stop_music(&mut self) {
        info!("music_stopped");
    }

    fn play_sound(&mut self, sound_id: &str) {
        info!(sound_id, "sound_played");
    }
}

/// There is no battle scene in the terminal; requests are logged and dropped.
pub(crate) struct LogBattles;

impl BattleLauncher for LogBattles {
    fn launch(&mut self, payload: BattlePayload) {
        info!(
            label = %payload.label,
            opponent_id = payload.opponent_id.as_deref().unwrap_or("-"),
            team_size = payload.team.len(),
            "battle_requested"
        );
    }
}

/// Optional `id -> text` table; a missing file is an empty table.
pub(crate) fn load_dialogs(path: &Path) -> HashMap<String, DialogText> {
    let Ok(raw) = fs::read_to_string(path) else {
        return HashMap::new();
    };
    match serde_json::from_str(&raw) {
        Ok(dialogs) => dialogs,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "dialogs_parse_failed");
            HashMap::new()
        }
    }
}

pub(crate) fn open_session(
    store: &MapStore,
    map: &str,
    dialogs: HashMap<String, DialogText>,
) -> Result<OverworldSession, String> {
    let (map, tileset) = store.load_bundle(map).map_err(|err| err.to_string())?;
    let mut session = OverworldSession::new(map, tileset)
        .with_audio(Box::new(LogAudio))
        .with_battle_launcher(Box::new(LogBattles))
        .with_map_source(Box::new(store.clone()))
        .with_dialogs(dialogs);
    session.start();
    Ok(session)
}

pub(crate) fn run_play<R: BufRead, W: Write>(
    session: &mut OverworldSession,
    input: R,
    output: &mut W,
) -> io::Result<()> {
    render(session, output)?;
    for line in input.lines() {
        let line = line?;
        match line.trim() {
            "q" | "quit" => break,
            "w" => {
                session.move_player(Direction::Up);
            }
            "s" => {
                session.move_player(Direction::Down);
            }
            "a" => {
                session.move_player(Direction::Left);
            }
            "d" => {
                session.move_player(Direction::Right);
            }
            "e" => {
                session.interact();
            }
            "r" => session.reset(),
            "" => continue,
            other => writeln!(output, "unknown input '{other}' (w/a/s/d move, e interact, r reset, q quit)")?,
        }
        render(session, output)?;
    }
    Ok(())
}

/// `@` player, `N` entity, `O` portal, `#` blocked, `.` open.
fn render<W: Write>(session: &OverworldSession, output: &mut W) -> io::Result<()> {
    let map = session.map();
    let player = session.player();
    writeln!(output, "[{}] ({}, {}) facing {}", map.id, player.x, player.y, player.facing)?;
    for y in 0..map.height {
        let row: String = (0..map.width)
            .map(|x| {
                if player.x == x && player.y == y {
                    '@'
                } else if map
                    .find_entities_at(x, y)
                    .iter()
                    .any(|entity| entity.is_present(session.flags()))
                {
                    'N'
                } else if map.portal_at(x, y).is_some() {
                    'O'
                } else if session.is_walkable(x, y) {
                    '.'
                } else {
                    '#'
                }
            })
            .collect();
        writeln!(output, "{row}")?;
    }
    if let Some(message) = session.active_message() {
        writeln!(output, "> {message}")?;
    }
    Ok(())
}
