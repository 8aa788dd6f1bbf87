use std::fmt;

/// Physical width of the framebuffer.
pub const WIDTH: usize = 128;
/// Physical height of the framebuffer.
pub const HEIGHT: usize = 64;

/// Pixel grid shared with whatever renders it.
///
/// The grid is always 128x64; in low resolution mode only the top-left 64x32
/// pixels are addressed and every coordinate wraps within that region.
#[derive(Clone, PartialEq, Eq)]
pub struct Display {
    pixels: [[bool; HEIGHT]; WIDTH],
    hires: bool,
}

impl Default for Display {
    fn default() -> Self {
        Display {
            pixels: [[false; HEIGHT]; WIDTH],
            hires: false,
        }
    }
}

impl Display {
    /// Logical width in the current resolution.
    pub fn width(&self) -> usize {
        if self.hires {
            WIDTH
        } else {
            WIDTH / 2
        }
    }

    /// Logical height in the current resolution.
    pub fn height(&self) -> usize {
        if self.hires {
            HEIGHT
        } else {
            HEIGHT / 2
        }
    }

    pub fn is_hires(&self) -> bool {
        self.hires
    }

    /// Switches resolution. The framebuffer is left as it is.
    pub fn set_hires(&mut self, hires: bool) {
        self.hires = hires;
    }

    /// Whether the pixel at `(x, y)` is on. Coordinates wrap.
    pub fn pixel(&self, x: usize, y: usize) -> bool {
        self.pixels[x % self.width()][y % self.height()]
    }

    pub fn clear(&mut self) {
        self.pixels = [[false; HEIGHT]; WIDTH];
    }

    /// XORs a sprite onto the screen with its top-left corner at `(x, y)`.
    /// Each entry of `rows` holds one row in its lowest `width` bits, most
    /// significant bit leftmost.
    ///
    /// Returns `true` if any pixel was turned off.
    pub fn draw_sprite(&mut self, x: usize, y: usize, rows: &[u16], width: usize) -> bool {
        let (w, h) = (self.width(), self.height());
        let mut collision = false;

        for (dy, row) in rows.iter().enumerate() {
            for dx in 0..width {
                if row >> (width - 1 - dx) & 1 == 0 {
                    continue;
                }
                let pixel = &mut self.pixels[(x + dx) % w][(y + dy) % h];
                collision |= *pixel;
                *pixel = !*pixel;
            }
        }

        collision
    }

    /// Moves every row `n` pixels down; the top `n` rows are cleared.
    pub fn scroll_down(&mut self, n: usize) {
        let (w, h) = (self.width(), self.height());
        for y in (0..h).rev() {
            for x in 0..w {
                self.pixels[x][y] = y >= n && self.pixels[x][y - n];
            }
        }
    }

    /// Moves every column `n` pixels right; the leftmost `n` columns are cleared.
    pub fn scroll_right(&mut self, n: usize) {
        let (w, h) = (self.width(), self.height());
        for x in (0..w).rev() {
            for y in 0..h {
                self.pixels[x][y] = x >= n && self.pixels[x - n][y];
            }
        }
    }

    /// Moves every column `n` pixels left; the rightmost `n` columns are cleared.
    pub fn scroll_left(&mut self, n: usize) {
        let (w, h) = (self.width(), self.height());
        for x in 0..w {
            for y in 0..h {
                self.pixels[x][y] = x + n < w && self.pixels[x + n][y];
            }
        }
    }
}

impl fmt::Debug for Display {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Display")
            .field("hires", &self.hires)
            .field("lit", &self.pixels.iter().flatten().filter(|&&on| on).count())
            .finish()
    }
}

impl fmt::Display for Display {
    /// Renders the logical screen as text, `#` for lit pixels.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for y in 0..self.height() {
            for x in 0..self.width() {
                f.write_str(if self.pixels[x][y] { "#" } else { "." })?;
            }
            f.write_str("\n")?;
        }
        Ok(())
    }
}
