use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use color_eyre::eyre::{bail, Result, WrapErr};
use log::*;

/// Registers written by the timer thread and read by the interpreter.
#[derive(Debug, Default)]
pub struct TimerRegisters {
    delay: AtomicU8,
    sound: AtomicU8,
    /// Set on every tick, cleared by whoever waits for one
    latch: AtomicBool,
}

impl TimerRegisters {
    pub fn delay(&self) -> u8 {
        self.delay.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, value: u8) {
        self.delay.store(value, Ordering::SeqCst);
    }

    pub fn sound(&self) -> u8 {
        self.sound.load(Ordering::SeqCst)
    }

    pub fn set_sound(&self, value: u8) {
        self.sound.store(value, Ordering::SeqCst);
    }

    /// Raises the sound timer to at least `value`, leaving a longer tone alone.
    pub fn hold_sound(&self, value: u8) {
        self.sound.fetch_max(value, Ordering::SeqCst);
    }

    /// One clock cycle: counts both timers down towards zero and sets the latch.
    pub fn tick(&self) {
        decrement(&self.delay);
        decrement(&self.sound);
        self.latch.store(true, Ordering::SeqCst);
    }

    /// Returns whether a tick happened since the latch was last taken.
    pub fn take_latch(&self) -> bool {
        self.latch.swap(false, Ordering::SeqCst)
    }
}

fn decrement(counter: &AtomicU8) {
    // Err just means the counter already sits at zero
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |value| value.checked_sub(1));
}

/// Background thread ticking a set of [`TimerRegisters`] at a fixed rate.
///
/// Dropping the timer stops the thread and waits for it to finish.
#[derive(Debug)]
pub struct Timer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Timer {
    /// Spawns the timer thread.
    ///
    /// # Errors
    ///
    /// Fails if `freq` is zero or the thread cannot be spawned.
    pub fn start(registers: Arc<TimerRegisters>, freq: u32) -> Result<Self> {
        if freq == 0 {
            bail!("timer frequency must be at least 1 Hz");
        }
        let period = Duration::from_secs(1) / freq;
        let stop = Arc::new(AtomicBool::new(false));

        let handle = thread::Builder::new()
            .name("chip8-timer".into())
            .spawn({
                let stop = Arc::clone(&stop);
                move || loop {
                    thread::sleep(period);
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    registers.tick();
                    trace!("Timer tick (DT = {}, ST = {})", registers.delay(), registers.sound());
                }
            })
            .wrap_err("failed to spawn timer thread")?;

        info!("Timer started at {} Hz", freq);

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Asks the thread to stop and joins it. Calling this twice is harmless.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Timer thread panicked");
            } else {
                info!("Timer stopped");
            }
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}
