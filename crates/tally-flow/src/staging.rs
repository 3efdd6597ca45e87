//! Naming of the staged file for a window.
//!
//! For window date `D` and index `I` the staged object lives at
//! `{prefix_base}/{D}/00-00/{I}_{D}T00-00-00.json`. The warehouse records
//! that key in its `filename` column, so the stem
//! `{prefix_base}/{D}/00-00/{I}_{D}T00-00-00` selects exactly this window's
//! rows. The stem runs past the index name, so an index `I` never reaches the
//! rows of an index named `I_other` sharing the same directory.
//!
//! The key is fixed per window. Every attempt overwrites the same object and
//! cleanup deletes exactly that key.

use tally_core::{ObjectLocation, Window};

use crate::error::{Error, Result};
use crate::warehouse::FilenamePattern;

/// Time-of-day path segment. Windows are whole days.
const TIME_SEGMENT: &str = "00-00";

/// Staged object and matching warehouse filename pattern for one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedWindow {
    object: ObjectLocation,
    filename_pattern: FilenamePattern,
}

impl StagedWindow {
    /// Derives the staged names for `index_name` in `window`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the bucket or index name is empty.
    pub fn new(bucket: &str, prefix_base: &str, index_name: &str, window: &Window) -> Result<Self> {
        if bucket.is_empty() {
            return Err(Error::InvalidArgument {
                message: "staging bucket must not be empty".into(),
            });
        }
        if index_name.is_empty() {
            return Err(Error::InvalidArgument {
                message: "index name must not be empty".into(),
            });
        }

        let date = window.date().format("%Y-%m-%d").to_string();
        let prefix_base = prefix_base.trim_matches('/');
        let directory = if prefix_base.is_empty() {
            format!("{date}/{TIME_SEGMENT}")
        } else {
            format!("{prefix_base}/{date}/{TIME_SEGMENT}")
        };

        let stem = format!("{directory}/{index_name}_{date}T00-00-00");
        let key = format!("{stem}.json");

        Ok(Self {
            object: ObjectLocation::new(bucket, key),
            filename_pattern: FilenamePattern::new(stem)?,
        })
    }

    /// Returns the staged object location.
    #[must_use]
    pub fn object(&self) -> &ObjectLocation {
        &self.object
    }

    /// Returns the warehouse filename pattern covering the staged file.
    #[must_use]
    pub fn filename_pattern(&self) -> &FilenamePattern {
        &self.filename_pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tally_core::WindowCalculator;

    fn window(tz: &str, y: i32, m: u32, d: u32) -> Window {
        WindowCalculator::new(tz)
            .unwrap()
            .window_for_date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
            .unwrap()
    }

    #[test]
    fn key_and_pattern_follow_layout() {
        let staged = StagedWindow::new("raw-bucket", "lsf/usergroups/", "usergroups", &window("UTC", 2025, 6, 9)).unwrap();

        assert_eq!(staged.object().bucket, "raw-bucket");
        assert_eq!(
            staged.object().key,
            "lsf/usergroups/2025-06-09/00-00/usergroups_2025-06-09T00-00-00.json"
        );
        assert_eq!(
            staged.filename_pattern().prefix(),
            "lsf/usergroups/2025-06-09/00-00/usergroups_2025-06-09T00-00-00"
        );
        assert!(staged.filename_pattern().matches(&staged.object().key));
    }

    #[test]
    fn uses_local_date_of_window() {
        let staged = StagedWindow::new("b", "p", "jobs", &window("Asia/Tokyo", 2025, 1, 1)).unwrap();
        assert!(staged.object().key.starts_with("p/2025-01-01/00-00/jobs_"));
    }

    #[test]
    fn neighbouring_windows_do_not_overlap() {
        let today = StagedWindow::new("b", "p", "jobs", &window("UTC", 2025, 6, 9)).unwrap();
        let tomorrow = StagedWindow::new("b", "p", "jobs", &window("UTC", 2025, 6, 10)).unwrap();
        assert!(!today.filename_pattern().matches(&tomorrow.object().key));
    }

    #[test]
    fn index_sharing_a_name_prefix_does_not_overlap() {
        let w = window("UTC", 2025, 6, 9);
        let short = StagedWindow::new("b", "", "usergroup", &w).unwrap();
        let long = StagedWindow::new("b", "", "usergroup_simple", &w).unwrap();

        assert!(!short.filename_pattern().matches(&long.object().key));
        assert!(!long.filename_pattern().matches(&short.object().key));
        assert!(short.filename_pattern().matches(&short.object().key));
    }

    #[test]
    fn empty_prefix_base_is_allowed() {
        let staged = StagedWindow::new("b", "", "jobs", &window("UTC", 2025, 6, 9)).unwrap();
        assert_eq!(staged.object().key, "2025-06-09/00-00/jobs_2025-06-09T00-00-00.json");
    }

    #[test]
    fn empty_bucket_or_index_is_rejected() {
        let w = window("UTC", 2025, 6, 9);
        assert!(StagedWindow::new("", "p", "jobs", &w).is_err());
        assert!(StagedWindow::new("b", "p", "", &w).is_err());
    }
}
