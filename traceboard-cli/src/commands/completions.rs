//! Shell completion generation.

use {
    clap::CommandFactory,
    clap_complete::{Shell, generate},
    std::io::{self, Write},
};

use crate::Cli;

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    write_completions(shell, &mut io::stdout());
}

/// Generate shell completions into `out`.
fn write_completions(shell: Shell, out: &mut impl Write) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, out);
}
