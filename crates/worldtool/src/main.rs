mod app;

use std::process::ExitCode;

fn main() -> ExitCode {
    match app::bootstrap::build_app() {
        Ok(app) => app::loop_runner::run(app),
        Err(message) => {
            eprintln!("{message}");
            ExitCode::from(2)
        }
    }
}
