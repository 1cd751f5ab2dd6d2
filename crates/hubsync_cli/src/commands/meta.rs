//! Shell completions and man pages generated from the clap definition.

use std::io::Write;
use std::path::Path;

use clap::CommandFactory;

use crate::Cli;

const BIN_NAME: &str = "hubsync";

fn completion_script(shell: clap_complete::Shell) -> Vec<u8> {
    let mut out = Vec::new();
    clap_complete::generate(shell, &mut Cli::command(), BIN_NAME, &mut out);
    out
}

fn man_page() -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    clap_mangen::Man::new(Cli::command()).render(&mut out)?;
    Ok(out)
}

pub(crate) fn handle_completions(shell: clap_complete::Shell) -> std::io::Result<()> {
    std::io::stdout().write_all(&completion_script(shell))
}

/// Print the main man page, or write one page per subcommand into `output`.
pub(crate) fn handle_man(output: Option<&Path>) -> std::io::Result<()> {
    let Some(dir) = output else {
        return std::io::stdout().write_all(&man_page()?);
    };
    std::fs::create_dir_all(dir)?;
    clap_mangen::generate_to(Cli::command(), dir)?;
    println!("Generated man pages in: {}", dir.display());
    Ok(())
}
