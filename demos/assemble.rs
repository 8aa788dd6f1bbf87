use std::env;
use std::fs;

use color_eyre::eyre::{eyre, Result, WrapErr};

use chip8::{Assembler, Chip8, Options};
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;

/// Assembled when no file is given on the command line.
const DEFAULT_SOURCE: &str = include_str!("programs/digits.asm");

/// Upper bound on executed instructions, in case the program never exits.
const MAX_STEPS: usize = 10_000;

fn main() -> Result<()> {
    color_eyre::install()?; // rust error handling
    SimpleLogger::new().with_level(LevelFilter::Info).init()?; // logging

    let source = match env::args().nth(1) {
        Some(path) => fs::read_to_string(&path).wrap_err_with(|| format!("failed to read `{}`", path))?,
        None => DEFAULT_SOURCE.to_owned(),
    };

    let program = Assembler::assemble(&source)
        .map_err(|errors| eyre!("assembly failed with {} error(s)", errors.len()))?;
    info!("Program is {} bytes long", program.len());

    let mut chip = Chip8::new(Options::testing())?;
    chip.load_bytes(program.as_bytes())?;

    for _ in 0..MAX_STEPS {
        if chip.is_halted() {
            break;
        }
        chip.step()?;
    }

    print!("{}", chip.display);

    Ok(())
}
