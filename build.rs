//! Build script rendering the `vstorage-provisioner` manual pages.
//!
//! One page is written for the binary and one per subcommand, all into
//! `OUT_DIR` where packaging picks them up.

use std::env;
use std::io::{self, Write};

use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};
use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

fn render(command: clap::Command) -> io::Result<Vec<u8>> {
    let mut page = Vec::new();
    Man::new(command).render(&mut page)?;
    Ok(page)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout();
    for watched in ["build.rs", "src/cli/mod.rs"] {
        writeln!(stdout, "cargo:rerun-if-changed={watched}")?;
    }

    let out_path = env::var("OUT_DIR").map(Utf8PathBuf::from)?;
    let out_dir = Dir::open_ambient_dir(&out_path, ambient_authority())?;

    let command = cli::Cli::command();
    let binary = command.get_name().to_owned();
    for subcommand in command.get_subcommands() {
        let page = render(subcommand.clone())?;
        out_dir.write(format!("{binary}-{}.1", subcommand.get_name()), page)?;
    }
    out_dir.write(format!("{binary}.1"), render(command)?)?;

    Ok(())
}
