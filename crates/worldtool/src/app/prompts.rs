use std::io::{BufRead, Write};

use overworld::PromptSource;
use tracing::warn;

/// Line prompts on a terminal. End of input or `cancel` aborts; an empty
/// answer takes the default.
pub(crate) struct LinePrompts<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LinePrompts<R, W> {
    pub(crate) fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> PromptSource for LinePrompts<R, W> {
    fn prompt(&mut self, message: &str, default: &str) -> Option<String> {
        if write!(self.output, "{message} [{default}] ").and_then(|()| self.output.flush()).is_err() {
            return None;
        }
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => {
                let answer = line.trim();
                if answer.eq_ignore_ascii_case("cancel") {
                    None
                } else if answer.is_empty() {
                    Some(default.to_string())
                } else {
                    Some(answer.to_string())
                }
            }
            Err(err) => {
                warn!(error = %err, "prompt_read_failed");
                None
            }
        }
    }
}
