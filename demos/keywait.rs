use std::thread;
use std::time::Duration;

use color_eyre::eyre::Result;

use chip8::{Chip8, Options, Program};
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;

const SOURCE: &str = "
        LD V0, K        ; wait for a key
        LD F, V0
        DRW V1, V1, 5
        EXIT
";

fn main() -> Result<()> {
    color_eyre::install()?; // rust error handling
    SimpleLogger::new().with_level(LevelFilter::Debug).init()?; // logging

    let program: Program = SOURCE
        .parse()
        .map_err(|errors: Vec<_>| color_eyre::eyre::eyre!("{} assembly error(s)", errors.len()))?;

    let mut chip = Chip8::new(Options::default())?;
    chip.load_bytes(program.as_bytes())?;

    // Pretend to be an input backend on another thread
    let keypad = chip.keypad();
    let input = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        keypad.press(0xA);
        thread::sleep(Duration::from_millis(100));
        keypad.release(0xA);
    });

    while !chip.is_halted() {
        chip.step()?;
        if chip.take_refresh() {
            info!("Refresh requested");
        }
        thread::sleep(Duration::from_millis(1));
    }
    let _ = input.join();

    info!("Got key {:X}", chip.regs[0]);
    print!("{}", chip.display);

    Ok(())
}
