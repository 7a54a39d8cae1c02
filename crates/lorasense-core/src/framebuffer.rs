//! Packed monochrome framebuffer with change tracking.
//!
//! Screens are drawn here first. Only the rectangle holding changed pixels is
//! pushed to the real target on [`Framebuffer::flush`], which keeps I2C
//! traffic to the OLED short on a redraw that only changes a few digits.

use core::convert::Infallible;

use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::Rectangle;
use log::debug;

use crate::display::{DISPLAY_HEIGHT_PX, DISPLAY_WIDTH_PX};

const WIDTH: usize = DISPLAY_WIDTH_PX as usize;
const HEIGHT: usize = DISPLAY_HEIGHT_PX as usize;

/// One bit per pixel, row-major.
const BUFFER_LEN: usize = WIDTH * HEIGHT / 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DirtyRect {
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
}

impl DirtyRect {
    fn from_point(x: usize, y: usize) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    fn expand(&mut self, x: usize, y: usize) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }
}

/// 128x64 `DrawTarget<Color = BinaryColor>` backed by a 1 KiB array.
pub struct Framebuffer {
    bits: [u8; BUFFER_LEN],
    dirty: Option<DirtyRect>,
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framebuffer {
    /// A blank (all off) buffer with nothing pending.
    pub const fn new() -> Self {
        Self {
            bits: [0; BUFFER_LEN],
            dirty: None,
        }
    }

    #[inline]
    fn index(x: usize, y: usize) -> (usize, u8) {
        let bit = y * WIDTH + x;
        (bit / 8, 1 << (bit % 8))
    }

    #[inline]
    fn get(&self, x: usize, y: usize) -> bool {
        let (byte, mask) = Self::index(x, y);
        self.bits[byte] & mask != 0
    }

    #[inline]
    fn set_pixel(&mut self, x: usize, y: usize, color: BinaryColor) {
        let on = color.is_on();
        if self.get(x, y) == on {
            return;
        }

        let (byte, mask) = Self::index(x, y);
        if on {
            self.bits[byte] |= mask;
        } else {
            self.bits[byte] &= !mask;
        }
        match &mut self.dirty {
            Some(rect) => rect.expand(x, y),
            None => self.dirty = Some(DirtyRect::from_point(x, y)),
        }
    }

    /// Whether a pixel is lit. Points outside the panel are off.
    pub fn is_on(&self, x: i32, y: i32) -> bool {
        if x < 0 || y < 0 || x as usize >= WIDTH || y as usize >= HEIGHT {
            return false;
        }
        self.get(x as usize, y as usize)
    }

    pub fn lit_pixels(&self) -> u32 {
        self.bits.iter().map(|b| b.count_ones()).sum()
    }

    /// Whether anything changed since the last flush.
    pub fn is_dirty(&self) -> bool {
        self.dirty.is_some()
    }

    /// Copy the changed region into `target` and reset change tracking.
    ///
    /// Does nothing when no pixel changed.
    pub fn flush<D>(&mut self, target: &mut D) -> Result<(), D::Error>
    where
        D: DrawTarget<Color = BinaryColor>,
    {
        let Some(rect) = self.dirty.take() else {
            return Ok(());
        };

        let width = rect.max_x - rect.min_x + 1;
        let height = rect.max_y - rect.min_y + 1;
        debug!(
            "Flushing {}x{} region at ({}, {})",
            width, height, rect.min_x, rect.min_y
        );

        let area = Rectangle::new(
            Point::new(rect.min_x as i32, rect.min_y as i32),
            Size::new(width as u32, height as u32),
        );
        let this = &*self;
        let colors = (rect.min_y..=rect.max_y).flat_map(move |y| {
            (rect.min_x..=rect.max_x).map(move |x| BinaryColor::from(this.get(x, y)))
        });

        target.fill_contiguous(&area, colors)
    }

    /// Write the buffer as text art, two pixel rows per character row.
    pub fn write_ascii<W: core::fmt::Write>(&self, out: &mut W) -> core::fmt::Result {
        for y in (0..HEIGHT).step_by(2) {
            for x in 0..WIDTH {
                let glyph = match (self.get(x, y), self.get(x, y + 1)) {
                    (false, false) => ' ',
                    (true, false) => '▀',
                    (false, true) => '▄',
                    (true, true) => '█',
                };
                out.write_char(glyph)?;
            }
            out.write_char('\n')?;
        }
        Ok(())
    }
}

impl OriginDimensions for Framebuffer {
    fn size(&self) -> Size {
        Size::new(DISPLAY_WIDTH_PX, DISPLAY_HEIGHT_PX)
    }
}

impl DrawTarget for Framebuffer {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(coord, color) in pixels {
            if coord.x >= 0
                && coord.y >= 0
                && (coord.x as usize) < WIDTH
                && (coord.y as usize) < HEIGHT
            {
                self.set_pixel(coord.x as usize, coord.y as usize, color);
            }
        }
        Ok(())
    }

    fn fill_solid(&mut self, area: &Rectangle, color: Self::Color) -> Result<(), Self::Error> {
        let area = area.intersection(&self.bounding_box());
        let Some(bottom_right) = area.bottom_right() else {
            return Ok(());
        };

        for y in area.top_left.y..=bottom_right.y {
            for x in area.top_left.x..=bottom_right.x {
                self.set_pixel(x as usize, y as usize, color);
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        for y in 0..HEIGHT {
            for x in 0..WIDTH {
                self.set_pixel(x, y, color);
            }
        }
        Ok(())
    }
}
