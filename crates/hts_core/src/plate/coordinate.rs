//! Well coordinates and human-readable labels
//!
//! Coordinates are zero-based `(row, column)` pairs. Labels use a bijective
//! base-26 row block (A..Z, AA..AZ, BA..) followed by the 1-based column
//! number, zero-padded to two digits: `(0, 0)` is `"A01"`, `(15, 23)` is
//! `"P24"`, `(31, 47)` is `"AF48"`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{HtsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub row: usize,
    pub column: usize,
}

impl Coordinate {
    pub const fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }

    /// Build a coordinate from signed indices, rejecting negatives.
    pub fn from_signed(row: i64, column: i64, height: usize, width: usize) -> Result<Self> {
        if row < 0 || column < 0 {
            return Err(HtsError::OutOfRange { row, column, height, width });
        }
        let coordinate = Self::new(row as usize, column as usize);
        coordinate.check_bounds(height, width)?;
        Ok(coordinate)
    }

    pub fn is_within(&self, height: usize, width: usize) -> bool {
        self.row < height && self.column < width
    }

    pub fn check_bounds(&self, height: usize, width: usize) -> Result<()> {
        if self.is_within(height, width) {
            Ok(())
        } else {
            Err(HtsError::out_of_range(*self, height, width))
        }
    }

    /// Row-major position on a plate of the given width.
    #[inline]
    pub fn linear_index(&self, width: usize) -> usize {
        self.row * width + self.column
    }

    pub fn label(&self) -> String {
        format!("{}{:02}", row_letters(self.row), self.column + 1)
    }

    pub fn to_label(&self) -> Result<String> {
        Ok(self.label())
    }

    /// Parse a label such as `"B07"`, `"b7"` or `"AA013"`.
    pub fn from_label(label: &str, height: usize, width: usize) -> Result<Self> {
        let trimmed = label.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(trimmed.len());
        let (letters, digits) = trimmed.split_at(split);

        if letters.is_empty() {
            return Err(invalid(label, "missing row letters"));
        }
        if digits.is_empty() {
            return Err(invalid(label, "missing column number"));
        }
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid(label, "column must be numeric"));
        }

        let row = parse_row_letters(letters).ok_or_else(|| invalid(label, "row letters overflow"))?;
        let column_number: usize =
            digits.parse().map_err(|_| invalid(label, "column number overflow"))?;
        if column_number == 0 {
            return Err(invalid(label, "columns are numbered from 1"));
        }

        let coordinate = Self::new(row, column_number - 1);
        coordinate.check_bounds(height, width)?;
        Ok(coordinate)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.label())
    }
}

fn invalid(label: &str, reason: &str) -> HtsError {
    HtsError::InvalidLabel { label: label.to_string(), reason: reason.to_string() }
}

/// Bijective base-26 letters for a zero-based row.
pub fn row_letters(row: usize) -> String {
    let mut n = row + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    // Only ASCII uppercase bytes are pushed
    String::from_utf8(letters).unwrap_or_default()
}

/// Inverse of [`row_letters`]; case-insensitive. `None` on non-letters or overflow.
pub fn parse_row_letters(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    let mut n: usize = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        n = n.checked_mul(26)?.checked_add(digit)?;
    }
    Some(n - 1)
}

/// All coordinates of a plate in row-major order.
pub fn all_coordinates(height: usize, width: usize) -> impl Iterator<Item = Coordinate> + Clone {
    (0..height).flat_map(move |row| (0..width).map(move |column| Coordinate::new(row, column)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_label_examples() {
        assert_eq!(Coordinate::new(0, 0).label(), "A01");
        assert_eq!(Coordinate::new(7, 11).label(), "H12");
        assert_eq!(Coordinate::new(15, 23).label(), "P24");
        assert_eq!(Coordinate::new(26, 0).label(), "AA01");
        assert_eq!(Coordinate::new(31, 47).label(), "AF48");
    }

    #[test]
    fn test_row_letters_boundaries() {
        assert_eq!(row_letters(25), "Z");
        assert_eq!(row_letters(26), "AA");
        assert_eq!(row_letters(51), "AZ");
        assert_eq!(row_letters(52), "BA");
        assert_eq!(row_letters(701), "ZZ");
        assert_eq!(row_letters(702), "AAA");
        assert_eq!(parse_row_letters("aaa"), Some(702));
    }

    #[test]
    fn test_from_label_accepts_variants() {
        assert_eq!(Coordinate::from_label("b7", 8, 12).unwrap(), Coordinate::new(1, 6));
        assert_eq!(Coordinate::from_label("B007", 8, 12).unwrap(), Coordinate::new(1, 6));
        assert_eq!(Coordinate::from_label(" H12 ", 8, 12).unwrap(), Coordinate::new(7, 11));
    }

    #[test]
    fn test_from_label_errors() {
        assert!(matches!(Coordinate::from_label("12", 8, 12), Err(HtsError::InvalidLabel { .. })));
        assert!(matches!(Coordinate::from_label("A", 8, 12), Err(HtsError::InvalidLabel { .. })));
        assert!(matches!(Coordinate::from_label("A1x", 8, 12), Err(HtsError::InvalidLabel { .. })));
        assert!(matches!(Coordinate::from_label("A00", 8, 12), Err(HtsError::InvalidLabel { .. })));
        assert!(matches!(Coordinate::from_label("I01", 8, 12), Err(HtsError::OutOfRange { .. })));
        assert!(matches!(Coordinate::from_label("A13", 8, 12), Err(HtsError::OutOfRange { .. })));
    }

    #[test]
    fn test_negative_coordinate_rejected() {
        let err = Coordinate::from_signed(-1, 0, 8, 12).unwrap_err();
        assert!(matches!(err, HtsError::OutOfRange { row: -1, .. }));
        assert!(Coordinate::from_signed(2, 3, 8, 12).is_ok());
    }

    #[test]
    fn test_all_coordinates_row_major() {
        let coords: Vec<_> = all_coordinates(2, 3).collect();
        assert_eq!(coords.len(), 6);
        assert_eq!(coords[0], Coordinate::new(0, 0));
        assert_eq!(coords[3], Coordinate::new(1, 0));
        assert!(coords.windows(2).all(|w| w[0] < w[1]));
    }

    proptest! {
        #[test]
        fn prop_label_round_trip(height in 1usize..800, width in 1usize..200, r in 0usize..800, c in 0usize..200) {
            let coordinate = Coordinate::new(r % height, c % width);
            let label = coordinate.to_label().unwrap();
            prop_assert_eq!(Coordinate::from_label(&label, height, width).unwrap(), coordinate);
        }
    }
}
