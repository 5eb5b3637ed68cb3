//! Build script for generating the `blimp` man pages.
//!
//! Renders `blimp.1` for the top-level command plus one `blimp-<sub>.1` page
//! per subcommand into the build output directory.

use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn render(
    command: clap::Command,
    title: &str,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut buffer = Vec::new();
    Man::new(command).title(title).render(&mut buffer)?;
    fs::write(path, buffer)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = PathBuf::from(env::var_os("OUT_DIR").ok_or("OUT_DIR was not set")?);

    let command = Cli::command();
    for sub in command.get_subcommands() {
        let name = format!("blimp-{}", sub.get_name());
        render(sub.clone(), &name, &out_dir.join(format!("{name}.1")))?;
    }
    render(command, "blimp", &out_dir.join("blimp.1"))?;

    Ok(())
}
