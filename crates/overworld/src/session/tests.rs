    use std::cell::RefCell;
    use std::path::Path;
    use std::rc::Rc;

    use serde_json::json;

    use super::*;
    use crate::map::{
        Condition, ConnectionTarget, EntityDef, MapError, TriggerArea, TriggerDef, GROUND_LAYER,
        OVERLAY_LAYER,
    };

    #[derive(Default, Clone)]
    struct RecordingAudio {
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl AudioController for RecordingAudio {
        fn play_music(&mut self, music_id: &str) {
            self.calls.borrow_mut().push(format!("music:{music_id}"));
        }

        fn stop_music(&mut self) {
            self.calls.borrow_mut().push("stop".to_string());
        }

        fn play_sound(&mut self, sound_id: &str) {
            self.calls.borrow_mut().push(format!("sound:{sound_id}"));
        }
    }

    #[derive(Default, Clone)]
    struct RecordingLauncher {
        launched: Rc<RefCell<Vec<BattlePayload>>>,
    }

    impl BattleLauncher for RecordingLauncher {
        fn launch(&mut self, payload: BattlePayload) {
            self.launched.borrow_mut().push(payload);
        }
    }

    struct FixedMaps {
        maps: Vec<MapData>,
    }

    impl MapSource for FixedMaps {
        fn load_bundle(&self, map_id: &str) -> Result<(MapData, Option<TileSet>), MapError> {
            self.maps
                .iter()
                .find(|map| map.id == map_id)
                .cloned()
                .map(|map| (map, None))
                .ok_or_else(|| MapError::NotFound {
                    map_id: map_id.to_string(),
                    path: Path::new(map_id).to_path_buf(),
                })
        }
    }

    fn tileset() -> TileSet {
        TileSet::from_json_str(
            &json!({
                "id": "basic",
                "tiles": [
                    {"id": "grass"},
                    {"id": "rock", "properties": {"walkable": false}},
                    {"id": "sign", "properties": {"interaction": "Welcome to Route 1."}}
                ]
            })
            .to_string(),
            Path::new("basic.json"),
        )
        .expect("tileset")
    }

    fn grass_map(id: &str, width: i32, height: i32) -> MapData {
        let mut map = MapData::blank(id, width, height, 16, "basic");
        for y in 0..height {
            for x in 0..width {
                map.set_tile(GROUND_LAYER, x, y, Some("grass".to_string()));
            }
        }
        map
    }

    fn session_at(map: MapData, x: i32, y: i32) -> OverworldSession {
        let mut session = OverworldSession::new(map, Some(tileset()));
        session.player.x = x;
        session.player.y = y;
        session
    }

    fn trigger(id: &str, kind: TriggerKind, pos: GridPos, actions: Vec<Action>) -> TriggerDef {
        TriggerDef {
            id: id.to_string(),
            kind,
            position: TriggerArea::Point(pos),
            actions,
            repeatable: false,
            conditions: None,
            extra: Default::default(),
            explicit: Default::default(),
        }
    }

    fn action(value: serde_json::Value) -> Action {
        Action::from_value(value)
    }

    #[test]
    fn move_steps_onto_walkable_tile() {
        let mut session = session_at(grass_map("field", 4, 4), 1, 1);
        assert!(session.move_player(Direction::Right));
        assert_eq!(session.player(), Player { x: 2, y: 1, facing: Direction::Right });
    }

    #[test]
    fn blocked_move_still_turns_player() {
        let mut map = grass_map("field", 4, 4);
        map.set_tile(GROUND_LAYER, 1, 0, Some("rock".to_string()));
        let mut session = session_at(map, 1, 1);
        assert!(!session.move_player(Direction::Up));
        assert_eq!(session.player(), Player { x: 1, y: 1, facing: Direction::Up });
    }

    #[test]
    fn unwalkable_overlay_tile_blocks() {
        let mut map = grass_map("field", 4, 4);
        map.set_tile(OVERLAY_LAYER, 2, 1, Some("rock".to_string()));
        let session = session_at(map, 1, 1);
        assert!(!session.is_walkable(2, 1));
    }

    #[test]
    fn override_beats_tile_and_entity_beats_override() {
        let mut map = grass_map("field", 4, 4);
        map.set_tile(GROUND_LAYER, 2, 1, Some("rock".to_string()));
        map.set_override(
            2,
            1,
            CellOverride { walkable: Some(true), ..CellOverride::default() },
        );
        map.set_override(
            0,
            1,
            CellOverride { walkable: Some(false), ..CellOverride::default() },
        );
        let session = session_at(map.clone(), 1, 1);
        assert!(session.is_walkable(2, 1), "override opens a rock tile");
        assert!(!session.is_walkable(0, 1), "override closes a grass tile");

        map.entities.push(EntityDef::npc("guard", GridPos::new(2, 1)));
        let mut session = session_at(map, 1, 1);
        assert!(!session.move_player(Direction::Right));
        assert_eq!(session.player().pos(), GridPos::new(1, 1));
    }

    #[test]
    fn hidden_or_conditional_entities_do_not_block() {
        let mut map = grass_map("field", 4, 4);
        let mut ghost = EntityDef::npc("ghost", GridPos::new(2, 1));
        ghost.hidden = true;
        map.entities.push(ghost);
        let mut gated = EntityDef::npc("gated", GridPos::new(1, 2));
        gated.conditions = Some(Condition {
            flags_all: vec!["gate_open".to_string()],
            ..Condition::default()
        });
        map.entities.push(gated);
        let session = session_at(map, 1, 1);
        assert!(session.is_walkable(2, 1));
        assert!(session.is_walkable(1, 2));
    }

    #[test]
    fn move_off_edge_without_connection_fails() {
        let mut session = session_at(grass_map("field", 2, 2), 0, 0);
        assert!(!session.move_player(Direction::Left));
        assert_eq!(session.player().pos(), GridPos::new(0, 0));
    }

    #[test]
    fn edge_connection_switches_maps_and_runs_enter_triggers() {
        let mut field = grass_map("field", 3, 3);
        field.connections.push(Connection::edge(
            "east",
            Direction::Right,
            ConnectionTarget::new("town", GridPos::new(0, 1), Some(Direction::Right)),
        ));
        let mut town = grass_map("town", 3, 3);
        town.music_id = Some("town_theme".to_string());
        town.triggers.push(trigger(
            "arrive",
            TriggerKind::OnEnter,
            GridPos::new(0, 1),
            vec![Action::show_text("Welcome to town.")],
        ));

        let audio = RecordingAudio::default();
        let mut session = session_at(field, 2, 1)
            .with_audio(Box::new(audio.clone()))
            .with_map_source(Box::new(FixedMaps { maps: vec![town] }));

        assert!(session.move_player(Direction::Right));
        assert_eq!(session.map().id, "town");
        assert_eq!(session.player(), Player { x: 0, y: 1, facing: Direction::Right });
        assert_eq!(session.active_message(), Some("Welcome to town."));
        assert_eq!(*audio.calls.borrow(), vec!["music:town_theme".to_string()]);
    }

    #[test]
    fn edge_connection_honors_source_edge_coordinate() {
        let mut field = grass_map("field", 3, 3);
        for row in 0..3 {
            let mut connection = Connection::edge(
                &format!("auto_right_town_{row}"),
                Direction::Right,
                ConnectionTarget::new("town", GridPos::new(0, row + 3), Some(Direction::Right)),
            );
            connection.mark_auto(row);
            field.connections.push(connection);
        }
        let town = grass_map("town", 3, 6);
        let mut session = session_at(field, 2, 2)
            .with_map_source(Box::new(FixedMaps { maps: vec![town] }));
        assert!(session.move_player(Direction::Right));
        assert_eq!(session.player().pos(), GridPos::new(0, 5));
    }

    #[test]
    fn failed_map_load_keeps_current_map() {
        let mut field = grass_map("field", 2, 2);
        field.connections.push(Connection::edge(
            "north",
            Direction::Up,
            ConnectionTarget::new("missing", GridPos::new(0, 0), None),
        ));
        let mut session = session_at(field, 0, 0)
            .with_map_source(Box::new(FixedMaps { maps: Vec::new() }));
        assert!(!session.move_player(Direction::Up));
        assert_eq!(session.map().id, "field");
        assert_eq!(session.player().pos(), GridPos::new(0, 0));
    }

    #[test]
    fn portal_fires_on_arrival_instead_of_enter_triggers() {
        let mut field = grass_map("field", 4, 4);
        field.connections.push(Connection::portal(
            "door",
            GridPos::new(2, 1),
            ConnectionTarget::new("house", GridPos::new(1, 1), Some(Direction::Up)),
        ));
        field.triggers.push(trigger(
            "doormat",
            TriggerKind::OnEnter,
            GridPos::new(2, 1),
            vec![Action::show_text("never shown")],
        ));
        let mut house = grass_map("house", 3, 3);
        house.connections.push(Connection::portal(
            "exit",
            GridPos::new(1, 1),
            ConnectionTarget::new("field", GridPos::new(2, 2), None),
        ));

        let mut session = session_at(field, 1, 1)
            .with_map_source(Box::new(FixedMaps { maps: vec![house] }));
        assert!(session.move_player(Direction::Right));
        assert_eq!(session.map().id, "house");
        assert_eq!(session.player(), Player { x: 1, y: 1, facing: Direction::Up });
        assert_eq!(session.active_message(), None);
    }

    #[test]
    fn non_repeatable_trigger_fires_once_per_session() {
        let mut map = grass_map("field", 4, 4);
        map.triggers.push(trigger(
            "once",
            TriggerKind::OnEnter,
            GridPos::new(2, 1),
            vec![action(json!({"kind": "setFlag", "flag": "seen"})), Action::show_text("Hi")],
        ));
        let mut repeat = trigger(
            "always",
            TriggerKind::OnEnter,
            GridPos::new(1, 1),
            vec![action(json!({"kind": "playSound", "soundId": "step"}))],
        );
        repeat.repeatable = true;
        map.triggers.push(repeat);

        let audio = RecordingAudio::default();
        let mut session = session_at(map, 1, 1).with_audio(Box::new(audio.clone()));

        assert!(session.move_player(Direction::Right));
        assert_eq!(session.interact(), None, "acknowledges the greeting");
        assert!(session.move_player(Direction::Left));
        assert!(session.move_player(Direction::Right));
        assert!(session.move_player(Direction::Left));

        assert!(session.has_flag("seen"));
        assert!(session.is_trigger_consumed("field", "once"));
        assert_eq!(session.active_message(), None);
        assert_eq!(
            *audio.calls.borrow(),
            vec!["sound:step".to_string(), "sound:step".to_string()]
        );
    }

    #[test]
    fn consumed_triggers_survive_map_switch_until_reset() {
        let mut field = grass_map("field", 3, 3);
        field.triggers.push(trigger(
            "intro",
            TriggerKind::OnEnter,
            GridPos::new(1, 1),
            vec![action(json!({"kind": "setFlag", "flag": "intro_done"}))],
        ));
        let mut session = session_at(field.clone(), 0, 1);
        assert!(session.move_player(Direction::Right));
        assert!(session.is_trigger_consumed("field", "intro"));

        session.set_map(grass_map("cave", 2, 2), None, None, None);
        session.set_map(field, None, Some(GridPos::new(0, 1)), None);
        assert!(session.is_trigger_consumed("field", "intro"));
        session.reset();
        assert!(!session.is_trigger_consumed("field", "intro"));
        assert!(session.flags().is_empty());
        assert!(session.move_player(Direction::Right));
        assert!(session.has_flag("intro_done"));
    }

    #[test]
    fn trigger_conditions_gate_firing() {
        let mut map = grass_map("field", 4, 4);
        let mut gated = trigger(
            "gated",
            TriggerKind::OnEnter,
            GridPos::new(2, 1),
            vec![Action::show_text("The gate creaks open.")],
        );
        gated.conditions = Some(Condition {
            flags_any: vec!["key".to_string()],
            not_flags: vec!["opened".to_string()],
            ..Condition::default()
        });
        map.triggers.push(gated);
        let mut session = session_at(map, 1, 1);
        assert!(session.move_player(Direction::Right));
        assert_eq!(session.active_message(), None);
        assert!(!session.is_trigger_consumed("field", "gated"));

        session.run_actions(&[action(json!({"kind": "setFlag", "flag": "key"}))], None);
        assert!(session.move_player(Direction::Left));
        assert!(session.move_player(Direction::Right));
        assert_eq!(session.active_message(), Some("The gate creaks open."));
    }

    #[test]
    fn move_is_ignored_while_message_active() {
        let mut session = session_at(grass_map("field", 4, 4), 1, 1);
        session.queue_message("Hold on.");
        assert!(!session.move_player(Direction::Right));
        assert_eq!(session.player(), Player { x: 1, y: 1, facing: Direction::Down });
    }

    #[test]
    fn interact_with_entity_dialog_and_turns_it() {
        let mut map = grass_map("field", 4, 4);
        let mut sage = EntityDef::npc("sage", GridPos::new(1, 0));
        sage.dialog = Some(DialogText::Lines(vec![
            "Hello.".to_string(),
            "Be careful.".to_string(),
        ]));
        map.entities.push(sage);
        let mut session = session_at(map, 1, 1);
        session.move_player(Direction::Up);

        assert_eq!(session.interact().as_deref(), Some("Hello."));
        assert_eq!(session.map().entity("sage").expect("sage").facing, "down");
        assert_eq!(session.interact().as_deref(), Some("Be careful."));
        assert_eq!(session.interact(), None);
    }

    #[test]
    fn dialog_id_resolves_through_dialog_table() {
        let mut map = grass_map("field", 4, 4);
        let mut clerk = EntityDef::npc("clerk", GridPos::new(1, 2));
        clerk.dialog_id = Some("shop_greeting".to_string());
        map.entities.push(clerk);
        let mut dialogs = HashMap::new();
        dialogs.insert(
            "shop_greeting".to_string(),
            DialogText::Line("Welcome!".to_string()),
        );
        let mut session = session_at(map, 1, 1).with_dialogs(dialogs);
        assert_eq!(session.interact().as_deref(), Some("Welcome!"));
    }

    #[test]
    fn interact_triggers_fire_alongside_entity() {
        let mut map = grass_map("field", 4, 4);
        let mut sage = EntityDef::npc("sage", GridPos::new(1, 2));
        sage.dialog = Some(DialogText::Line("Hm?".to_string()));
        map.entities.push(sage);
        map.triggers.push(trigger(
            "poke",
            TriggerKind::OnInteract,
            GridPos::new(1, 2),
            vec![action(json!({"kind": "setFlag", "flag": "poked"}))],
        ));
        let mut session = session_at(map, 1, 1);
        assert_eq!(session.interact().as_deref(), Some("Hm?"));
        assert!(session.has_flag("poked"));
    }

    #[test]
    fn tile_interaction_is_fallback() {
        let mut map = grass_map("field", 4, 4);
        map.set_tile(OVERLAY_LAYER, 1, 2, Some("sign".to_string()));
        let mut session = session_at(map, 1, 1);
        assert_eq!(session.interact().as_deref(), Some("Welcome to Route 1."));
        assert_eq!(session.interact(), None);

        session.player.facing = Direction::Right;
        assert_eq!(session.interact(), None);
    }

    #[test]
    fn battle_waits_for_queued_messages() {
        let mut map = grass_map("field", 4, 4);
        let mut trainer = EntityDef::npc("trainer", GridPos::new(1, 2));
        trainer.name = "Youngster Joey".to_string();
        trainer
            .properties
            .insert("team".to_string(), json!([{"species": "rattata", "level": 4}]));
        trainer.actions = vec![
            Action::show_text("My rattata is in the top percentage!"),
            action(json!({"kind": "startBattle"})),
        ];
        map.entities.push(trainer);

        let launcher = RecordingLauncher::default();
        let mut session = session_at(map, 1, 1).with_battle_launcher(Box::new(launcher.clone()));

        assert_eq!(
            session.interact().as_deref(),
            Some("My rattata is in the top percentage!")
        );
        assert!(session.pending_battle().is_some());
        assert!(launcher.launched.borrow().is_empty());

        assert_eq!(session.interact(), None);
        let launched = launcher.launched.borrow();
        assert_eq!(launched.len(), 1);
        assert_eq!(launched[0].label, "Youngster Joey");
        assert_eq!(launched[0].opponent_id.as_deref(), Some("trainer"));
        assert_eq!(launched[0].team, vec![json!({"species": "rattata", "level": 4})]);
        assert!(session.pending_battle().is_none());
    }

    #[test]
    fn battle_without_launcher_queues_announcement() {
        let mut session = session_at(grass_map("field", 4, 4), 1, 1);
        session.run_actions(
            &[action(json!({"kind": "startBattle", "label": "Wild Pidgey", "team": []}))],
            None,
        );
        assert_eq!(session.active_message(), Some("Wild Pidgey wants to battle!"));
    }

    #[test]
    fn set_entity_and_set_override_mutate_map() {
        let mut map = grass_map("field", 4, 4);
        map.entities.push(EntityDef::npc("boulder", GridPos::new(2, 1)));
        let mut session = session_at(map, 1, 1);
        assert!(!session.is_walkable(2, 1));

        session.run_actions(&[action(json!({"kind": "setEntity", "entityId": "boulder"}))], None);
        assert!(session.map().entity("boulder").expect("boulder").hidden);
        assert!(session.is_walkable(2, 1));

        session.run_actions(
            &[action(json!({
                "kind": "setEntity",
                "entityId": "boulder",
                "hidden": false,
                "collision": false
            }))],
            None,
        );
        assert!(session.is_walkable(2, 1));

        session.run_actions(
            &[action(json!({
                "kind": "setOverride",
                "x": 3,
                "y": 3,
                "walkable": false,
                "addFlags": ["ice"]
            }))],
            None,
        );
        let cell = session.map().get_override(3, 3).expect("override");
        assert_eq!(cell.walkable, Some(false));
        assert!(cell.has_flag("ice"));

        session.run_actions(
            &[action(json!({
                "kind": "setOverride",
                "x": 3,
                "y": 3,
                "clearWalkable": true,
                "removeFlags": ["ice"]
            }))],
            None,
        );
        assert!(session.map().get_override(3, 3).is_none());
    }

    #[test]
    fn unknown_actions_are_skipped() {
        let mut session = session_at(grass_map("field", 4, 4), 1, 1);
        session.run_actions(
            &[
                action(json!({"kind": "fireworks", "count": 3})),
                action(json!({"kind": "setFlag", "flag": "after"})),
            ],
            None,
        );
        assert!(session.has_flag("after"));
    }

    #[test]
    fn warp_action_loads_map_and_runs_enter_triggers() {
        let mut cave = grass_map("cave", 3, 3);
        cave.triggers.push(trigger(
            "dark",
            TriggerKind::OnEnter,
            GridPos::new(2, 2),
            vec![Action::show_text("It is dark.")],
        ));
        let mut session = session_at(grass_map("field", 3, 3), 0, 0)
            .with_map_source(Box::new(FixedMaps { maps: vec![cave] }));
        session.run_actions(
            &[action(json!({
                "kind": "warp",
                "mapId": "cave",
                "spawn": {"x": 2, "y": 2},
                "facing": "left"
            }))],
            None,
        );
        assert_eq!(session.map().id, "cave");
        assert_eq!(session.player(), Player { x: 2, y: 2, facing: Direction::Left });
        assert_eq!(session.active_message(), Some("It is dark."));
    }

    #[test]
    fn run_connection_uses_named_connection() {
        let mut field = grass_map("field", 3, 3);
        field.connections.push(Connection::portal(
            "hatch",
            GridPos::new(0, 0),
            ConnectionTarget::new("field", GridPos::new(2, 2), None),
        ));
        let mut session = session_at(field, 1, 1);
        session.run_actions(
            &[action(json!({"kind": "runConnection", "connectionId": "hatch"}))],
            None,
        );
        assert_eq!(session.player().pos(), GridPos::new(2, 2));
    }

    #[test]
    fn set_map_restarts_music_only_on_change() {
        let mut field = grass_map("field", 3, 3);
        field.music_id = Some("field_theme".to_string());
        let audio = RecordingAudio::default();
        let mut session =
            OverworldSession::new(field.clone(), None).with_audio(Box::new(audio.clone()));
        session.start();
        session.set_map(field.clone(), None, None, Some(Direction::Left));
        assert_eq!(session.player().facing, Direction::Left);
        session.set_map(field, None, None, None);
        assert_eq!(session.player().facing, Direction::Left);

        let mut quiet = grass_map("quiet", 2, 2);
        quiet.spawn = Some(GridPos::new(1, 1));
        session.set_map(quiet, None, None, None);
        assert_eq!(session.player().pos(), GridPos::new(1, 1));
        assert_eq!(session.current_music(), None);
        assert_eq!(
            *audio.calls.borrow(),
            vec!["music:field_theme".to_string(), "stop".to_string()]
        );
    
    #[test]
    fn out_of_bounds_spawn_is_clamped_into_the_map() {
        let mut map = grass_map("ledge", 2, 2);
        map.spawn = Some(GridPos::new(5, -3));
        let mut session = OverworldSession::new(map, Some(tileset()));
        assert_eq!(session.player().pos(), GridPos::new(1, 0));

        session.set_map(grass_map("pit", 3, 3), Some(tileset()), Some(GridPos::new(-1, 9)), None);
        assert_eq!(session.player().pos(), GridPos::new(0, 2));
        assert!(session.map().in_bounds(session.player.x, session.player.y));
    }

    #[test]
    fn oversized_rect_trigger_fires_without_overflow() {
        let mut map = grass_map("strip", 3, 1);
        let mut sprawl = trigger(
            "sprawl",
            TriggerKind::OnEnter,
            GridPos::new(1, 0),
            vec![action(json!({"kind": "setFlag", "flag": "inside"}))],
        );
        sprawl.position = TriggerArea::Rect {
            x: 1,
            y: 0,
            width: i32::MAX,
            height: 1,
        };
        map.triggers.push(sprawl);
        let mut session = session_at(map, 0, 0);

        assert!(session.move_player(Direction::Right));
        assert!(session.has_flag("inside"));
    }
}
