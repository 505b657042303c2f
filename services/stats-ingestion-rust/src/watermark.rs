//! Watermark persistence and the incremental fetch window.
//!
//! The watermark file holds a single `YYYY-MM-DD` date. Everything strictly
//! before it is considered durable; a run covers `[watermark, today + 1)`.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Days, NaiveDate};
use thiserror::Error;
use tracing::info;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("failed to read watermark {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("watermark {path} holds '{value}', expected YYYY-MM-DD: {source}")]
    Parse {
        path: PathBuf,
        value: String,
        source: chrono::ParseError,
    },

    #[error("failed to write watermark {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("date {0} has no following day")]
    OutOfRange(NaiveDate),
}

/// Half-open day range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FetchWindow {
    /// `[watermark, today + 1)`, so today is always re-covered.
    pub fn from_watermark(watermark: NaiveDate, today: NaiveDate) -> Result<Self, WatermarkError> {
        let end = today
            .checked_add_days(Days::new(1))
            .ok_or(WatermarkError::OutOfRange(today))?;
        Ok(Self {
            start: watermark,
            end,
        })
    }

    /// Inclusive `(startDate, endDate)` for the schedule query. The end day
    /// is requested too, so the next run's first day has already been fetched
    /// once and is fetched again to replace it. `None` once the watermark is
    /// past `end`.
    pub fn schedule_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        (self.start <= self.end).then_some((self.start, self.end))
    }

    /// The watermark a successful run leaves behind. Never moves backwards.
    pub fn next_watermark(&self) -> NaiveDate {
        self.end.max(self.start)
    }
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

/// Watermark stored as a plain text file, replaced wholesale on every advance.
#[derive(Debug, Clone)]
pub struct FileWatermarkStore {
    path: PathBuf,
}

impl FileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fails when the file is missing or does not hold a date; there is no
    /// default watermark.
    pub fn read_watermark(&self) -> Result<NaiveDate, WatermarkError> {
        let contents = fs::read_to_string(&self.path).map_err(|source| WatermarkError::Read {
            path: self.path.clone(),
            source,
        })?;

        let value = contents.trim();
        NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|source| WatermarkError::Parse {
            path: self.path.clone(),
            value: value.to_string(),
            source,
        })
    }

    /// Writes to a sibling temp file then renames over the watermark, so a
    /// crash mid-write leaves the previous date intact.
    pub fn advance_watermark(&self, next: NaiveDate) -> Result<(), WatermarkError> {
        let write_err = |source| WatermarkError::Write {
            path: self.path.clone(),
            source,
        };

        let mut tmp_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);

        fs::write(&tmp_path, next.format(DATE_FORMAT).to_string()).map_err(write_err)?;
        fs::rename(&tmp_path, &self.path).map_err(write_err)?;

        info!("Watermark advanced to {} ({})", next, self.path.display());
        Ok(())
    }
}
