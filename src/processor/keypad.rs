use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

/// Handle to the pressed-key bitmask. Bit `k` is set while key `k` is down.
///
/// The input side keeps a clone and writes to it; the interpreter only reads.
#[derive(Debug, Clone, Default)]
pub struct Keypad(Arc<AtomicU16>);

impl Keypad {
    pub fn press(&self, key: u8) {
        self.0.fetch_or(1 << (key & 0xF), Ordering::SeqCst);
    }

    pub fn release(&self, key: u8) {
        self.0.fetch_and(!(1 << (key & 0xF)), Ordering::SeqCst);
    }

    /// Replaces the whole bitmask at once.
    pub fn set_state(&self, keys: u16) {
        self.0.store(keys, Ordering::SeqCst);
    }

    pub fn state(&self) -> u16 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn is_pressed(&self, key: u8) -> bool {
        self.state() & 1 << (key & 0xF) != 0
    }

    /// The lowest-numbered key currently down.
    pub fn lowest_pressed(&self) -> Option<u8> {
        match self.state() {
            0 => None,
            keys => Some(keys.trailing_zeros() as u8),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::Result;

    #[test]
    fn test_clones_share_state() -> Result<()> {
        let keypad = Keypad::default();
        let input = keypad.clone();

        input.press(0xA);
        input.press(0x3);
        assert!(keypad.is_pressed(0xA));
        assert_eq!(keypad.lowest_pressed(), Some(0x3));

        input.release(0x3);
        assert_eq!(keypad.lowest_pressed(), Some(0xA));
        assert_eq!(keypad.state(), 1 << 0xA);

        input.set_state(0);
        assert_eq!(keypad.lowest_pressed(), None);

        Ok(())
    }
}
