// THEORY:
// Shared, read-only inputs loaded once per run: the list of images, the filter
// bank used by encoding and the application mask used by matching. All three are
// plain whitespace-separated text files. They are owned values; once the
// configuration that holds them is dropped they are gone, on every path.

use std::path::Path;
use std::str::FromStr;

use image::{GrayImage, Luma};
use nalgebra::DMatrix;

use crate::errors::{PipelineError, Result};

/// Mask value for a cell that participates in matching.
pub const VALID: u8 = 255;
/// Mask value for a cell that is ignored.
pub const INVALID: u8 = 0;

pub(crate) fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| PipelineError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Typed reader over the whitespace-separated tokens of a resource file.
pub(crate) struct Tokens<'a> {
    inner: std::str::SplitWhitespace<'a>,
    path: &'a Path,
    what: &'static str,
}

impl<'a> Tokens<'a> {
    pub(crate) fn new(text: &'a str, path: &'a Path, what: &'static str) -> Self {
        Self {
            inner: text.split_whitespace(),
            path,
            what,
        }
    }

    pub(crate) fn next<T: FromStr>(&mut self, field: &str) -> Result<T> {
        let token = self
            .inner
            .next()
            .ok_or_else(|| self.malformed(format!("missing {field}")))?;
        token
            .parse::<T>()
            .map_err(|_| self.malformed(format!("`{token}` is not a valid {field}")))
    }

    fn malformed(&self, detail: String) -> PipelineError {
        PipelineError::Malformed {
            what: self.what,
            path: self.path.to_path_buf(),
            detail,
        }
    }
}

/// Reads the ordered list of image identifiers.
pub fn load_image_list(path: &Path) -> Result<Vec<String>> {
    let text = read_text(path)?;
    Ok(text.split_whitespace().map(str::to_owned).collect())
}

/// The kernels applied by encoding, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterBank {
    filters: Vec<DMatrix<f32>>,
}

impl FilterBank {
    pub fn new(filters: Vec<DMatrix<f32>>) -> Self {
        Self { filters }
    }

    /// Format: `<count>` then, per filter, `<rows> <cols>` and `rows*cols`
    /// row-major values.
    pub fn load(path: &Path) -> Result<Self> {
        let text = read_text(path)?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self> {
        let mut tokens = Tokens::new(text, path, "filter bank");
        let count: usize = tokens.next("filter count")?;
        // Counts come from the file; nothing is reserved up front.
        let mut filters = Vec::new();
        for index in 0..count {
            let rows: usize = tokens.next("row count")?;
            let cols: usize = tokens.next("column count")?;
            if rows == 0 || cols == 0 {
                return Err(
                    tokens.malformed(format!("filter {index} has an empty {rows}x{cols} shape"))
                );
            }
            let size = rows.checked_mul(cols).ok_or_else(|| {
                tokens.malformed(format!("filter {index} has an oversized {rows}x{cols} shape"))
            })?;
            let mut values = Vec::new();
            for _ in 0..size {
                values.push(tokens.next::<f32>("filter coefficient")?);
            }
            filters.push(DMatrix::from_row_slice(rows, cols, &values));
        }
        Ok(Self { filters })
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DMatrix<f32>> {
        self.filters.iter()
    }

    pub fn get(&self, index: usize) -> Option<&DMatrix<f32>> {
        self.filters.get(index)
    }

    /// `(rows, cols)` of every filter.
    pub fn shapes(&self) -> Vec<(usize, usize)> {
        self.filters.iter().map(|f| (f.nrows(), f.ncols())).collect()
    }
}

/// Which cells of the normalized strip are trusted for matching.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationMask {
    mask: GrayImage,
    skipped: Vec<(i64, i64)>,
}

impl ApplicationMask {
    /// A mask where every cell is valid.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            mask: GrayImage::from_pixel(width, height, Luma([VALID])),
            skipped: Vec::new(),
        }
    }

    /// Format: `<count>` then `count` pairs of `<row> <col>`.
    pub fn load(path: &Path, width: u32, height: u32) -> Result<Self> {
        let text = read_text(path)?;
        Self::parse(&text, path, width, height)
    }

    fn parse(text: &str, path: &Path, width: u32, height: u32) -> Result<Self> {
        let mut tokens = Tokens::new(text, path, "application points");
        let count: usize = tokens.next("point count")?;
        let mut points = Vec::new();
        for _ in 0..count {
            let row: i64 = tokens.next("row")?;
            let col: i64 = tokens.next("column")?;
            points.push((row, col));
        }
        Ok(Self::from_points(width, height, &points))
    }

    /// Marks the listed `(row, col)` cells valid. Points outside the
    /// `width x height` strip are reported and skipped.
    pub fn from_points(width: u32, height: u32, points: &[(i64, i64)]) -> Self {
        let mut mask = GrayImage::from_pixel(width, height, Luma([INVALID]));
        let mut skipped = Vec::new();

        for &(row, col) in points {
            if row < 0 || col < 0 || row >= height as i64 || col >= width as i64 {
                tracing::warn!(
                    "point ({row},{col}) exceeds size of normalized image {height}x{width}, skipped"
                );
                skipped.push((row, col));
                continue;
            }
            mask.put_pixel(col as u32, row as u32, Luma([VALID]));
        }

        Self { mask, skipped }
    }

    pub fn width(&self) -> u32 {
        self.mask.width()
    }

    pub fn height(&self) -> u32 {
        self.mask.height()
    }

    pub fn is_valid(&self, row: u32, col: u32) -> bool {
        self.mask
            .get_pixel_checked(col, row)
            .is_some_and(|p| p.0[0] != INVALID)
    }

    pub fn valid_count(&self) -> usize {
        self.mask.pixels().filter(|p| p.0[0] != INVALID).count()
    }

    /// Points of the source file that fell outside the strip.
    pub fn skipped_points(&self) -> &[(i64, i64)] {
        &self.skipped
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn filter_bank_keeps_shapes_and_row_major_order() {
        let file = write_temp(
            "2\n\
             3 3\n\
             1 2 3\n4 5 6\n7 8 9\n\
             5 1\n\
             -1.5 -0.5 0 0.5 1.5\n",
        );
        let bank = FilterBank::load(file.path()).unwrap();
        assert_eq!(bank.len(), 2);
        assert_eq!(bank.shapes(), vec![(3, 3), (5, 1)]);

        let first = bank.get(0).unwrap();
        assert_eq!(first[(0, 2)], 3.0);
        assert_eq!(first[(1, 0)], 4.0);
        assert_eq!(first[(2, 1)], 8.0);

        let second = bank.get(1).unwrap();
        assert_eq!(second[(0, 0)], -1.5);
        assert_eq!(second[(4, 0)], 1.5);
    }

    #[test]
    fn truncated_filter_bank_is_malformed() {
        let file = write_temp("1\n2 2\n1 2 3\n");
        let err = FilterBank::load(file.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Malformed { .. }));
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn oversized_counts_are_malformed_not_allocated() {
        let file = write_temp("99999999999999999\n1 1\n0.5\n");
        let err = FilterBank::load(file.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Malformed { .. }));

        let file = write_temp("1\n18446744073709551615 2\n0.5\n");
        let err = FilterBank::load(file.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Malformed { .. }));
        assert!(err.to_string().contains("oversized"));

        let file = write_temp("18446744073709551615\n0 0\n");
        let err = ApplicationMask::load(file.path(), 8, 4).unwrap_err();
        assert!(matches!(err, PipelineError::Malformed { .. }));
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn missing_filter_file_is_an_io_error() {
        let err = FilterBank::load(Path::new("/definitely/not/here/filters.txt")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("filters.txt"));
    }

    #[test]
    fn out_of_bounds_application_points_are_skipped() {
        let file = write_temp("5\n0 0\n3 7\n4 0\n0 8\n-1 2\n");
        let mask = ApplicationMask::load(file.path(), 8, 4).unwrap();
        assert_eq!(mask.valid_count(), 2);
        assert!(mask.is_valid(0, 0));
        assert!(mask.is_valid(3, 7));
        assert!(!mask.is_valid(1, 1));
        assert_eq!(mask.skipped_points().to_vec(), vec![(4_i64, 0_i64), (0, 8), (-1, 2)]);
    }

    #[test]
    fn image_list_reads_whole_tokens_in_order() {
        let file = write_temp("eye_a.bmp eye_b.bmp\n\n  eye_c.bmp\n");
        let list = load_image_list(file.path()).unwrap();
        assert_eq!(list, vec!["eye_a.bmp", "eye_b.bmp", "eye_c.bmp"]);
    }
}
