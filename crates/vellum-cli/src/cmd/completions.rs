use anyhow::Result;
use clap::Args;
use clap_complete::{Shell, generate};
use std::io::Write;

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Target shell.
    #[arg(value_enum)]
    pub shell: Shell,
}

fn write_completions(shell: Shell, command: &mut clap::Command, out: &mut dyn Write) {
    let bin = command.get_name().to_string();
    generate(shell, command, bin, out);
}

/// Print the completion script for `shell` to stdout.
pub fn run_completions(shell: Shell, command: &mut clap::Command) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write_completions(shell, command, &mut out);
    out.flush()?;
    Ok(())
}
