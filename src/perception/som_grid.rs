/// Labeled coordinate grid for screenshots.
///
/// The screenshot is split into `columns × rows` cells. A cell is named by
/// spreadsheet-style column letters plus a 1-based row number ("A1", "E10",
/// "AB7"), and every label drawn on the image comes from [`column_label`],
/// the same function [`parse_cell_label`] inverts. The model reads a label
/// off the picture and we turn it back into the cell's center pixel.
///
/// Cell boundaries are proportional: column `c` (0-based) spans
/// `[floor(c·W/C), floor((c+1)·W/C))`. The partition of a downscaled image
/// and of the full-resolution device frame therefore name the same cells,
/// so resolving against device dimensions needs no second scaling step.
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{DroidClawError, DroidClawResult};

/// Wire form of a cell reference: uppercase letters, then a row with no leading zero.
static CELL_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Z]+)([1-9][0-9]*)$").unwrap_or_else(|e| panic!("cell label regex: {e}"))
});

// ── Grid shape ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSpec {
    pub columns: u32,
    pub rows: u32,
}

impl GridSpec {
    pub fn new(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }

    /// Grid of roughly square `cell_size` cells covering a `width × height` image.
    pub fn for_image(width: u32, height: u32, cell_size: u32) -> Self {
        let cell_size = cell_size.max(1);
        Self::new(width / cell_size, height / cell_size)
    }

    /// Label of the bottom-right cell, e.g. "T26".
    pub fn last_label(&self) -> String {
        cell_label(self.columns, self.rows)
    }

    pub fn contains(&self, cell: &CellRef) -> bool {
        (1..=self.columns).contains(&cell.column) && (1..=self.rows).contains(&cell.row)
    }
}

// ── Cell labels ───────────────────────────────────────────────────────────────

/// A parsed cell reference. Both fields are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRef {
    pub column: u32,
    pub row: u32,
}

impl CellRef {
    pub fn new(column: u32, row: u32) -> Self {
        Self { column, row }
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_label(self.column), self.row)
    }
}

impl FromStr for CellRef {
    type Err = DroidClawError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_cell_label(s)
    }
}

impl Serialize for CellRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CellRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_cell_label(&s).map_err(serde::de::Error::custom)
    }
}

/// Bijective base-26 column letters: 1→A, 26→Z, 27→AA, 702→ZZ, 703→AAA.
///
/// This is the only place column numbers become letters. Returns an empty
/// string for 0, which is not a valid column.
pub fn column_label(column: u32) -> String {
    let mut n = column;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Inverse of [`column_label`]. `None` for empty input, non-uppercase
/// characters, or values that overflow `u32`.
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    letters.bytes().try_fold(0u32, |acc, b| {
        if !b.is_ascii_uppercase() {
            return None;
        }
        acc.checked_mul(26)?.checked_add(u32::from(b - b'A') + 1)
    })
}

/// Full label for a 1-based cell: (3, 4) → "C4".
pub fn cell_label(column: u32, row: u32) -> String {
    format!("{}{}", column_label(column), row)
}

/// Parse a wire-form label ("E10") into a [`CellRef`] without bounds checks.
pub fn parse_cell_label(label: &str) -> DroidClawResult<CellRef> {
    let caps = CELL_LABEL_RE
        .captures(label)
        .ok_or_else(|| DroidClawError::InvalidCell(format!("'{label}' is not of the form A1, E10, AB7")))?;
    let column = column_index(&caps[1])
        .ok_or_else(|| DroidClawError::InvalidCell(format!("column of '{label}' is out of range")))?;
    let row = caps[2]
        .parse::<u32>()
        .map_err(|_| DroidClawError::InvalidCell(format!("row of '{label}' is out of range")))?;
    Ok(CellRef { column, row })
}

// ── Label ↔ pixel mapping ─────────────────────────────────────────────────────

/// Start of 0-based cell `index` along an axis of `extent` pixels split into `count` cells.
fn cell_start(index: u32, extent: u32, count: u32) -> u32 {
    ((u64::from(index) * u64::from(extent)) / u64::from(count)) as u32
}

/// Center of 0-based cell `index`: floor((2i+1)·extent / 2·count).
fn cell_center(index: u32, extent: u32, count: u32) -> u32 {
    ((u64::from(2 * index + 1) * u64::from(extent)) / (2 * u64::from(count))) as u32
}

fn check_grid_fits(dims: (u32, u32), grid: GridSpec) -> DroidClawResult<()> {
    if grid.columns > dims.0 || grid.rows > dims.1 {
        return Err(DroidClawError::Perception(format!(
            "{}x{} grid does not fit a {}x{} image",
            grid.columns, grid.rows, dims.0, dims.1
        )));
    }
    Ok(())
}

/// Pixel rectangle `(x0, y0, x1, y1)` of a cell, end-exclusive.
pub fn cell_bounds(cell: &CellRef, dims: (u32, u32), grid: GridSpec) -> DroidClawResult<(u32, u32, u32, u32)> {
    if !grid.contains(cell) {
        return Err(out_of_bounds(cell, grid));
    }
    let (c, r) = (cell.column - 1, cell.row - 1);
    Ok((
        cell_start(c, dims.0, grid.columns),
        cell_start(r, dims.1, grid.rows),
        cell_start(c + 1, dims.0, grid.columns),
        cell_start(r + 1, dims.1, grid.rows),
    ))
}

fn out_of_bounds(cell: &CellRef, grid: GridSpec) -> DroidClawError {
    DroidClawError::InvalidCell(format!(
        "{cell} is outside the {}x{} grid (A1..{})",
        grid.columns,
        grid.rows,
        grid.last_label()
    ))
}

/// Center pixel of a parsed cell in an image of `dims`.
pub fn resolve_cell(cell: &CellRef, dims: (u32, u32), grid: GridSpec) -> DroidClawResult<(u32, u32)> {
    if !grid.contains(cell) {
        return Err(out_of_bounds(cell, grid));
    }
    check_grid_fits(dims, grid)?;
    Ok((
        cell_center(cell.column - 1, dims.0, grid.columns),
        cell_center(cell.row - 1, dims.1, grid.rows),
    ))
}

/// Convert a label such as "E10" to the center pixel of that cell.
pub fn resolve(label: &str, dims: (u32, u32), grid: GridSpec) -> DroidClawResult<(u32, u32)> {
    let cell = parse_cell_label(label)?;
    resolve_cell(&cell, dims, grid)
}

/// The cell containing pixel `(x, y)`, or `None` outside the image.
pub fn cell_at(x: u32, y: u32, dims: (u32, u32), grid: GridSpec) -> Option<CellRef> {
    if x >= dims.0 || y >= dims.1 {
        return None;
    }
    let column = (u64::from(x) * u64::from(grid.columns) / u64::from(dims.0)) as u32;
    let row = (u64::from(y) * u64::from(grid.rows) / u64::from(dims.1)) as u32;
    Some(CellRef::new(column + 1, row + 1))
}

// ── Minimal 5×5 bitmap font ───────────────────────────────────────────────────
// Each row is a u8 where bit4 is the leftmost pixel.

fn glyph(c: char) -> Option<[u8; 5]> {
    let rows = match c {
        '0' => [0b01110, 0b10001, 0b10001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00110, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00110, 0b00001, 0b11110],
        '4' => [0b00110, 0b01010, 0b10010, 0b11111, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b11110],
        '6' => [0b01110, 0b10000, 0b11110, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b00100],
        '8' => [0b01110, 0b10001, 0b01110, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b01111, 0b00001, 0b01110],
        'A' => [0b01110, 0b10001, 0b11111, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b11110, 0b10001, 0b11110],
        'C' => [0b01110, 0b10000, 0b10000, 0b10000, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000],
        'G' => [0b01110, 0b10000, 0b10011, 0b10001, 0b01110],
        'H' => [0b10001, 0b10001, 0b11111, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b11100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10011, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b11110, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b11110, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b01110, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10101, 0b11011, 0b10001],
        'X' => [0b10001, 0b01010, 0b00100, 0b01010, 0b10001],
        'Y' => [0b10001, 0b01010, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00010, 0b00100, 0b01000, 0b11111],
        _ => return None,
    };
    Some(rows)
}

const LABEL_FG: [u8; 3] = [255, 230, 0];
const LINE_RGBA: [u8; 4] = [255, 40, 40, 150];

/// Draw one glyph at (px, py): yellow strokes over a darkened 1px-padded box.
fn draw_glyph(canvas: &mut image::RgbaImage, c: char, px: u32, py: u32, scale: u32) {
    let Some(rows) = glyph(c) else { return };
    let (w, h) = canvas.dimensions();

    let bg_x = px.saturating_sub(1);
    let bg_y = py.saturating_sub(1);
    for y in bg_y..(py + 5 * scale + 1).min(h) {
        for x in bg_x..(px + 5 * scale + 1).min(w) {
            let p = canvas.get_pixel_mut(x, y);
            for ch in 0..3 {
                p[ch] /= 4;
            }
            p[3] = 255;
        }
    }

    for (row, bits) in rows.iter().enumerate() {
        for col in 0..5u32 {
            if (bits >> (4 - col)) & 1 == 0 {
                continue;
            }
            for sy in 0..scale {
                for sx in 0..scale {
                    let x = px + col * scale + sx;
                    let y = py + row as u32 * scale + sy;
                    if x < w && y < h {
                        let p = canvas.get_pixel_mut(x, y);
                        p[0] = LABEL_FG[0];
                        p[1] = LABEL_FG[1];
                        p[2] = LABEL_FG[2];
                        p[3] = 255;
                    }
                }
            }
        }
    }
}

fn draw_label(canvas: &mut image::RgbaImage, label: &str, px: u32, py: u32, scale: u32) {
    let step = 5 * scale + 1;
    for (i, c) in label.chars().enumerate() {
        draw_glyph(canvas, c, px + i as u32 * step, py, scale);
    }
}

fn blend_pixel(pixel: &mut image::Rgba<u8>, rgba: [u8; 4]) {
    let alpha = f32::from(rgba[3]) / 255.0;
    for ch in 0..3 {
        pixel[ch] = (f32::from(pixel[ch]) * (1.0 - alpha) + f32::from(rgba[ch]) * alpha).round() as u8;
    }
}

/// Draw the grid onto a copy of `src`; the input image is left untouched.
///
/// Lines sit on the first pixel of every column/row except the first, and
/// every cell gets its full label in the top-left corner so the model reads
/// coordinates instead of counting lines.
pub fn overlay(src: &image::RgbaImage, grid: GridSpec) -> image::RgbaImage {
    let mut canvas = src.clone();
    let (w, h) = canvas.dimensions();
    if w == 0 || h == 0 {
        return canvas;
    }

    for c in 1..grid.columns {
        let x = cell_start(c, w, grid.columns);
        if x >= w {
            break;
        }
        for y in 0..h {
            blend_pixel(canvas.get_pixel_mut(x, y), LINE_RGBA);
        }
    }
    for r in 1..grid.rows {
        let y = cell_start(r, h, grid.rows);
        if y >= h {
            break;
        }
        for x in 0..w {
            blend_pixel(canvas.get_pixel_mut(x, y), LINE_RGBA);
        }
    }

    let cell_w = w / grid.columns;
    let scale = if cell_w >= 80 { 2 } else { 1 };
    let pad = 2u32;
    for row in 1..=grid.rows {
        for column in 1..=grid.columns {
            let lx = cell_start(column - 1, w, grid.columns) + pad;
            let ly = cell_start(row - 1, h, grid.rows) + pad;
            if lx < w && ly < h {
                draw_label(&mut canvas, &cell_label(column, row), lx, ly, scale);
            }
        }
    }

    canvas
}

/// Prompt fragment describing the grid that accompanies every screenshot.
pub fn describe_grid(grid: GridSpec) -> String {
    format!(
        "Current screen with a {c}x{r} grid (columns A-{last_col} left to right, rows 1-{r} top to bottom). \
         Every cell has its label printed in its top-left corner; A1 is the top-left cell and {last} the bottom-right one.",
        c = grid.columns,
        r = grid.rows,
        last_col = column_label(grid.columns),
        last = grid.last_label(),
    )
}
