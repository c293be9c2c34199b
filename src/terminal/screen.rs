//! Screen cell grid.
//!
//! Rows form a ring: layout advances a cursor downward and wraps, and
//! `first_line_y` tells the renderer which buffer row sits at the bottom of
//! the window (the prompt row).

use super::cell::{Point, RendererCell};

pub struct ScreenBuffer {
    pub cells: Vec<RendererCell>,
    pub dim_x: u32,
    pub dim_y: u32,
    pub first_line_y: u32,
}

impl ScreenBuffer {
    pub fn new(dim_x: u32, dim_y: u32, background: u32) -> Self {
        let dim_x = dim_x.max(1);
        let dim_y = dim_y.max(1);
        Self {
            cells: vec![RendererCell::blank(background); (dim_x * dim_y) as usize],
            dim_x,
            dim_y,
            first_line_y: 0,
        }
    }

    pub fn in_bounds(&self, point: Point) -> bool {
        point.x >= 0 && (point.x as u32) < self.dim_x && point.y >= 0 && (point.y as u32) < self.dim_y
    }

    pub fn cell_mut(&mut self, point: Point) -> Option<&mut RendererCell> {
        if self.in_bounds(point) {
            let index = point.y as usize * self.dim_x as usize + point.x as usize;
            Some(&mut self.cells[index])
        } else {
            None
        }
    }

    pub fn cell(&self, x: u32, y: u32) -> RendererCell {
        self.cells[(y * self.dim_x + x) as usize]
    }

    pub fn clear(&mut self, background: u32) {
        self.cells.fill(RendererCell::blank(background));
    }

    pub fn clear_row(&mut self, y: i32, background: u32) {
        if y >= 0 && (y as u32) < self.dim_y {
            let start = y as usize * self.dim_x as usize;
            self.cells[start..start + self.dim_x as usize].fill(RendererCell::blank(background));
        }
    }

    pub fn advance_row_no_clear(&self, point: &mut Point) {
        point.x = 0;
        point.y += 1;
        if point.y >= self.dim_y as i32 {
            point.y = 0;
        }
    }

    /// Move to the next row, wrapping within the ring, and blank the
    /// newly exposed row.
    pub fn advance_row(&mut self, point: &mut Point, background: u32) {
        self.advance_row_no_clear(point);
        self.clear_row(point.y, background);
    }

    pub fn advance_column(&mut self, point: &mut Point, line_wrap: bool, background: u32) {
        point.x += 1;
        if line_wrap && point.x >= self.dim_x as i32 {
            self.advance_row(point, background);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::cell::{GlyphProps, RendererCell};

    #[test]
    fn out_of_bounds_writes_are_dropped() {
        let mut screen = ScreenBuffer::new(4, 3, 0);
        assert!(screen.cell_mut(Point { x: -1, y: 0 }).is_none());
        assert!(screen.cell_mut(Point { x: 4, y: 0 }).is_none());
        assert!(screen.cell_mut(Point { x: 0, y: 3 }).is_none());
        assert!(screen.cell_mut(Point { x: 3, y: 2 }).is_some());
    }

    #[test]
    fn column_advance_wraps_when_enabled() {
        let mut screen = ScreenBuffer::new(3, 2, 0);
        let mut point = Point { x: 2, y: 0 };
        screen.advance_column(&mut point, true, 0);
        assert_eq!(point, Point { x: 0, y: 1 });

        let mut point = Point { x: 2, y: 0 };
        screen.advance_column(&mut point, false, 0);
        assert_eq!(point, Point { x: 3, y: 0 });
    }

    #[test]
    fn row_advance_wraps_and_clears() {
        let mut screen = ScreenBuffer::new(2, 2, 0x0C0C0C);
        *screen.cell_mut(Point { x: 0, y: 0 }).unwrap() =
            RendererCell::compose(5, GlyphProps::new(1, 2));

        let mut point = Point { x: 1, y: 1 };
        screen.advance_row(&mut point, 0x0C0C0C);
        assert_eq!(point, Point { x: 0, y: 0 });
        assert_eq!(screen.cell(0, 0), RendererCell::blank(0x0C0C0C));
    }
}
