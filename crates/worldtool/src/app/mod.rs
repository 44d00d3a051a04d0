pub(crate) mod bootstrap;
mod commands;
pub(crate) mod loop_runner;
mod play;
mod prompts;
