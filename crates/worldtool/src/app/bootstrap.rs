use std::env;

use overworld::{Direction, GridPos, MapLink};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LayoutCommand {
    Show,
    Move { map_id: String, x: f64, y: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    Help,
    Play { map: String },
    Validate { maps: Vec<String> },
    AutoConnect,
    Portal { source: String, target: String },
    Layout(LayoutCommand),
    NewMap {
        existing: String,
        new_map: String,
        width: i32,
        height: i32,
        spawn: GridPos,
        link: MapLink,
    },
}

pub(crate) struct AppWiring {
    pub(crate) command: Command,
}

pub(crate) fn build_app() -> Result<AppWiring, String> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    let command = parse_args(&args)?;
    if command != Command::Help {
        init_tracing();
        info!(command = ?command, "=== worldtool startup ===");
    }
    Ok(AppWiring { command })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

pub(crate) fn parse_args(args: &[String]) -> Result<Command, String> {
    let Some(command) = args.first() else {
        return Err(usage_text());
    };
    let rest = &args[1..];

    match command.as_str() {
        "-h" | "--help" | "help" => Ok(Command::Help),
        "play" => match rest {
            [map] => Ok(Command::Play { map: map.clone() }),
            _ => Err("play requires exactly one map id or path".to_string()),
        },
        "validate" => Ok(Command::Validate {
            maps: rest.to_vec(),
        }),
        "auto-connect" => {
            if !rest.is_empty() {
                return Err("auto-connect takes no arguments".to_string());
            }
            Ok(Command::AutoConnect)
        }
        "portal" => match rest {
            [source, target] => Ok(Command::Portal {
                source: source.clone(),
                target: target.clone(),
            }),
            _ => Err("portal requires <source-map> <target-map>".to_string()),
        },
        "layout" => match rest {
            [] => Ok(Command::Layout(LayoutCommand::Show)),
            [sub] if sub == "show" => Ok(Command::Layout(LayoutCommand::Show)),
            [sub, map_id, x, y] if sub == "move" => Ok(Command::Layout(LayoutCommand::Move {
                map_id: map_id.clone(),
                x: parse_number::<f64>("x", x)?,
                y: parse_number::<f64>("y", y)?,
            })),
            _ => Err("layout expects 'show' or 'move <map> <x> <y>'".to_string()),
        },
        "new-map" => parse_new_map(rest),
        other => Err(format!("unknown subcommand '{other}'\n\n{}", usage_text())),
    }
}

fn parse_new_map(args: &[String]) -> Result<Command, String> {
    let [existing, new_map, width, height, options @ ..] = args else {
        return Err("new-map requires <existing> <new> <width> <height>".to_string());
    };
    let mut spawn = GridPos::default();
    let mut link = None;
    let mut index = 0usize;
    while index < options.len() {
        match options[index].as_str() {
            "--edge" => {
                let value = options
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --edge".to_string())?;
                let direction = Direction::parse(value)
                    .ok_or_else(|| format!("invalid --edge value '{value}' (expected up/down/left/right)"))?;
                link = Some(MapLink::Edge {
                    direction,
                    facing: direction,
                });
                index += 2;
            }
            "--portal" => {
                let (x, y) = pair(options, index, "--portal")?;
                link = Some(MapLink::Portal {
                    cell: GridPos::new(x, y),
                });
                index += 3;
            }
            "--spawn" => {
                let (x, y) = pair(options, index, "--spawn")?;
                spawn = GridPos::new(x, y);
                index += 3;
            }
            other => return Err(format!("unknown new-map argument '{other}'")),
        }
    }

    Ok(Command::NewMap {
        existing: existing.clone(),
        new_map: new_map.clone(),
        width: parse_number("width", width)?,
        height: parse_number("height", height)?,
        spawn,
        link: link.ok_or_else(|| "new-map requires --edge <dir> or --portal <x> <y>".to_string())?,
    })
}

fn pair(options: &[String], index: usize, flag: &str) -> Result<(i32, i32), String> {
    match (options.get(index + 1), options.get(index + 2)) {
        (Some(x), Some(y)) => Ok((parse_number(flag, x)?, parse_number(flag, y)?)),
        _ => Err(format!("{flag} requires <x> <y>")),
    }
}

fn parse_number<T: std::str::FromStr>(label: &str, raw: &str) -> Result<T, String> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| format!("invalid {label} value '{raw}'"))
}

pub(crate) fn usage_text() -> String {
    [
        "Usage: worldtool <command> [args]",
        "",
        "Commands:",
        "  play <map>                         walk a map (w/a/s/d move, e interact, q quit)",
        "  validate [map...]                  check maps against their tilesets",
        "  auto-connect                       rebuild edge connections from the layout",
        "  portal <source> <target>           create a manual portal interactively",
        "  layout [show | move <map> <x> <y>] print or edit the world layout",
        "  new-map <existing> <new> <w> <h> (--edge <dir> | --portal <x> <y>) [--spawn <x> <y>]",
        "",
        "Environment:",
        "  OVERWORLD_ROOT   project root (defaults to the nearest ancestor with Cargo.toml)",
        "  RUST_LOG         tracing filter (default: info)",
    ]
    .join("\n")
}
