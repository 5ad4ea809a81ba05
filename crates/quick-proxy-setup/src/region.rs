//! Location of a marker-delimited block inside a line buffer.
//!
//! A managed region is the fixed-length run of lines strictly between a start
//! and an end marker. [`locate`] is pure: it never touches the filesystem, so
//! callers decide what to do with the buffer once the region is known.

use std::ops::Range;

use crate::error::{Error, ErrorKind, Result};

pub const START_LINE: &str =
    "##### [START] https://github.com/z0gSh1u/quick-proxy-setup [DO NOT MODIFY] #####";
pub const END_LINE: &str =
    "##### [END] https://github.com/z0gSh1u/quick-proxy-setup [DO NOT MODIFY] #####";

/// Interior placeholder written by `init` and `clear`.
pub const PLACEHOLDER_LINE: &str = "#";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    pub start: String,
    pub end: String,
}

impl Markers {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

impl Default for Markers {
    fn default() -> Self {
        Self::new(START_LINE, END_LINE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Index of the start marker line.
    pub start: usize,
    /// Number of interior lines.
    pub len: usize,
}

impl Region {
    /// Index of the end marker line.
    pub fn end(&self) -> usize {
        self.start + self.len + 1
    }

    pub fn interior(&self) -> Range<usize> {
        self.start + 1..self.end()
    }
}

/// Finds the first start marker and checks that the end marker sits exactly
/// `len + 1` lines below it.
///
/// Returns `Ok(None)` when no start marker exists. A start marker without a
/// matching end marker at the expected offset is a `StructuralCorruption`
/// error; scanning does not continue past it.
pub fn locate<S: AsRef<str>>(lines: &[S], markers: &Markers, len: usize) -> Result<Option<Region>> {
    let Some(start) = lines
        .iter()
        .position(|l| l.as_ref().trim() == markers.start)
    else {
        return Ok(None);
    };

    let region = Region { start, len };
    let end_ok = lines
        .get(region.end())
        .is_some_and(|l| l.as_ref().trim() == markers.end);
    if !end_ok {
        return Err(Error::new(
            ErrorKind::StructuralCorruption,
            format!(
                "start marker found at line {} but end marker is not at line {}",
                start + 1,
                region.end() + 1
            ),
        ));
    }
    Ok(Some(region))
}
