use std::io::{self, Write};
use std::process::ExitCode;

use overworld::{resolve_app_paths, AppPaths, ConnectedMapRequest};
use tracing::error;

use super::bootstrap::{usage_text, AppWiring, Command};
use super::{commands, play};

const DIALOGS_FILE_NAME: &str = "dialogs.json";

pub(crate) fn run(app: AppWiring) -> ExitCode {
    if app.command == Command::Help {
        println!("{}", usage_text());
        return ExitCode::SUCCESS;
    }

    let paths = match resolve_app_paths() {
        Ok(paths) => paths,
        Err(err) => {
            error!(error = %err, "startup_failed");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = dispatch(&app.command, &paths) {
        error!(error = %err, "command_failed");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn dispatch(command: &Command, paths: &AppPaths) -> Result<(), String> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match command {
        Command::Help => Ok(()),
        Command::Play { map } => {
            let dialogs = play::load_dialogs(&paths.root.join("assets").join(DIALOGS_FILE_NAME));
            let mut session = play::open_session(&paths.map_store(), map, dialogs)?;
            play::run_play(&mut session, io::stdin().lock(), &mut out)
                .map_err(|err| format!("play loop failed: {err}"))
        }
        Command::Validate { maps } => commands::validate(paths, maps, &mut out),
        Command::AutoConnect => commands::auto_connect(paths, &mut out),
        Command::Portal { source, target } => {
            let mut report = Vec::new();
            let result = commands::portal(
                paths,
                source,
                target,
                io::stdin().lock(),
                &mut out,
                &mut report,
            );
            out.write_all(&report)
                .map_err(|err| format!("failed to write output: {err}"))?;
            result
        }
        Command::Layout(layout) => commands::layout(paths, layout, &mut out),
        Command::NewMap {
            existing,
            new_map,
            width,
            height,
            spawn,
            link,
        } => commands::new_map(
            paths,
            &ConnectedMapRequest {
                existing_map: existing.clone(),
                new_map: new_map.clone(),
                width: *width,
                height: *height,
                spawn: *spawn,
                link: *link,
            },
            &mut out,
        ),
    }
}
