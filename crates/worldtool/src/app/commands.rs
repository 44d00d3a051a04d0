//! Authoring commands over [`WorldView`] and map validation.

use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};

use overworld::{
    list_map_ids, AppPaths, ConnectedMapRequest, KnownMaps, MapLink, StatusKind, WorldView,
};
use tracing::{info, warn};

use super::bootstrap::LayoutCommand;
use super::prompts::LinePrompts;

fn io_text(err: io::Error) -> String {
    format!("failed to write output: {err}")
}

fn open_world(paths: &AppPaths) -> WorldView {
    let world = WorldView::open(paths.map_store(), &paths.layout_path);
    for problem in world.load_errors() {
        warn!(problem = %problem, "world_load_problem");
    }
    world
}

/// Fails when the last status is an error, after printing it.
fn report_status(world: &WorldView, out: &mut dyn Write) -> Result<(), String> {
    let Some(status) = world.status() else {
        return Ok(());
    };
    match status.kind {
        StatusKind::Info => writeln!(out, "{}", status.message).map_err(io_text),
        StatusKind::Error => Err(status.message.clone()),
    }
}

/// Checks the named maps, or every map when none are named. Connection
/// targets are checked against every map in the maps directory.
pub(crate) fn validate(paths: &AppPaths, maps: &[String], out: &mut dyn Write) -> Result<(), String> {
    let ids = list_map_ids(&paths.maps_dir)
        .map_err(|err| format!("{}: {err}", paths.maps_dir.display()))?;
    let store = paths.map_store();
    let mut bundles = BTreeMap::new();
    for id in &ids {
        if let Ok(bundle) = store.load_bundle(id) {
            bundles.insert(id.clone(), bundle);
        }
    }
    let known: KnownMaps = bundles
        .iter()
        .map(|(id, (map, _))| (id.clone(), (map.width, map.height)))
        .collect();

    let mut targets: Vec<String> = if maps.is_empty() {
        ids
    } else {
        maps.to_vec()
    };
    targets.sort();

    let mut failed = 0usize;
    for target in &targets {
        let loaded = match bundles.remove(target) {
            Some(bundle) => Ok(bundle),
            None => store.load_bundle(target),
        };
        let (map, tileset) = match loaded {
            Ok(bundle) => bundle,
            Err(err) => {
                writeln!(out, "{target}: {} error: {err}", err.class().label()).map_err(io_text)?;
                failed += 1;
                continue;
            }
        };
        let report = map.validate(tileset.as_ref(), Some(&known));
        let verdict = if report.is_ok() { "ok" } else { "FAILED" };
        writeln!(
            out,
            "{}: {verdict} ({} errors, {} warnings)",
            map.id,
            report.errors.len(),
            report.warnings.len()
        )
        .map_err(io_text)?;
        for error in &report.errors {
            writeln!(out, "  error: {error}").map_err(io_text)?;
        }
        for warning in &report.warnings {
            writeln!(out, "  warning: {warning}").map_err(io_text)?;
        }
        if !report.is_ok() {
            failed += 1;
        }
    }

    info!(maps = targets.len(), failed, "validation_finished");
    if failed > 0 {
        return Err(format!("{failed} of {} maps failed validation", targets.len()));
    }
    Ok(())
}

pub(crate) fn auto_connect(paths: &AppPaths, out: &mut dyn Write) -> Result<(), String> {
    let mut world = open_world(paths);
    let report = world.auto_connect();
    for path in &report.saved {
        writeln!(out, "saved {}", path.display()).map_err(io_text)?;
    }
    report_status(&world, out)
}

pub(crate) fn portal<R: BufRead, W: Write>(
    paths: &AppPaths,
    source: &str,
    target: &str,
    input: R,
    prompt_output: W,
    out: &mut dyn Write,
) -> Result<(), String> {
    let mut world = open_world(paths);
    for map_id in [source, target] {
        if world.map(map_id).is_none() {
            return Err(format!("unknown map '{map_id}'"));
        }
    }
    world.toggle_manual_mode();
    world.select_portal_map(source);
    world.select_portal_map(target);

    let mut prompts = LinePrompts::new(input, prompt_output);
    match world.create_manual_portal(&mut prompts) {
        None => writeln!(out, "Manual portal cancelled.").map_err(io_text),
        Some(Ok(outcome)) => {
            for path in &outcome.saved {
                writeln!(out, "saved {}", path.display()).map_err(io_text)?;
            }
            report_status(&world, out)
        }
        Some(Err(_)) => report_status(&world, out),
    }
}

pub(crate) fn layout(paths: &AppPaths, command: &LayoutCommand, out: &mut dyn Write) -> Result<(), String> {
    let mut world = open_world(paths);
    match command {
        LayoutCommand::Show => {
            report_status(&world, &mut io::sink())?;
            for (map_id, pos) in &world.layout().maps {
                let size = world
                    .map(map_id)
                    .map(|map| format!("{}x{}", map.width, map.height))
                    .unwrap_or_else(|| "missing".to_string());
                writeln!(out, "{map_id}: ({}, {}) {size}", pos.x, pos.y).map_err(io_text)?;
            }
            Ok(())
        }
        LayoutCommand::Move { map_id, x, y } => {
            let pos = world
                .move_map(map_id, *x, *y)
                .ok_or_else(|| format!("unknown map '{map_id}'"))?;
            world.save_layout_with_feedback();
            writeln!(out, "{map_id} -> ({}, {})", pos.x, pos.y).map_err(io_text)?;
            report_status(&world, out)
        }
    }
}

pub(crate) fn new_map(
    paths: &AppPaths,
    request: &ConnectedMapRequest,
    out: &mut dyn Write,
) -> Result<(), String> {
    let mut world = open_world(paths);
    let path = world
        .create_connected_map(request)
        .map_err(|err| err.status_text())?;
    if !world.save_layout_with_feedback() {
        return report_status(&world, out);
    }
    let link = match request.link {
        MapLink::Edge { direction, .. } => format!("{direction} edge"),
        MapLink::Portal { cell } => format!("portal at {cell}"),
    };
    writeln!(out, "created {} via {link}", path.display()).map_err(io_text)
}
