use color_eyre::eyre::Result;

use chip8::processor::{Chip8, Options};
use chip8::write_opcodes;
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;

fn main() -> Result<()> {
    color_eyre::install()?; // rust error handling
    SimpleLogger::new().with_level(LevelFilter::Info).init()?; // logging

    let mut chip = Chip8::new(Options::testing())?;

    let mem = &mut chip.memory;
    write_opcodes!(mem : 0x200 =>
        0x600A, // LD V0, 10
        0x3000, // SE V0, 0
        0x1208, // JP #208
        0x00FD, // EXIT
        0x70FF, // ADD V0, -1
        0x1202  // JP #202
    );

    while !chip.is_halted() {
        chip.step()?;
        if chip.pc == 0x202 {
            info!("V0 = {}", chip.regs[0]);
        }
    }

    Ok(())
}
