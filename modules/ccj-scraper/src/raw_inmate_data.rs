//! Daily raw inmate data snapshots.
//!
//! Rows for a run are staged in `<build>/<YYYY-MM-DD>.csv` and, on
//! `finish`, moved to `<release>/<YYYY>/<YYYY-MM-DD>.csv`. Readers of the
//! release directory only ever see complete files: the staged file is
//! synced before it is renamed into place.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use tempfile::NamedTempFile;

use ccj_common::config::RawDataSettings;
use ccj_common::{FeatureControls, InmateRecord, ScraperError, RAW_INMATE_DATA_HEADER};

use crate::monitor::{Monitor, Role};

pub struct RawInmateData {
    date: NaiveDate,
    /// `None` when the feature controls are absent or incomplete.
    settings: Option<RawDataSettings>,
    monitor: Arc<Monitor>,
    build_file: Option<BufWriter<File>>,
    staged_rows: usize,
    finished: bool,
}

impl RawInmateData {
    pub fn new(date: NaiveDate, feature_controls: Option<&FeatureControls>, monitor: Arc<Monitor>) -> Self {
        let settings = match feature_controls {
            None => {
                monitor.debug(Role::RawInmateData, "No feature controls, raw inmate data disabled");
                None
            }
            Some(controls) => {
                let settings = controls.settings();
                if settings.is_none() {
                    monitor.debug(
                        Role::RawInmateData,
                        &format!(
                            "Feature controls missing {:?}, raw inmate data disabled",
                            controls.missing_keys()
                        ),
                    );
                }
                settings
            }
        };

        Self {
            date,
            settings,
            monitor,
            build_file: None,
            staged_rows: 0,
            finished: false,
        }
    }

    /// True when rows added to this run will be published.
    pub fn is_enabled(&self) -> bool {
        self.settings.as_ref().is_some_and(|s| s.store)
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn staged_rows(&self) -> usize {
        self.staged_rows
    }

    fn file_name(&self) -> String {
        format!("{}.csv", self.date.format("%Y-%m-%d"))
    }

    /// Where this run's rows are staged, if snapshots are configured.
    pub fn build_path(&self) -> Option<PathBuf> {
        self.settings
            .as_ref()
            .map(|s| s.build_dir.join(self.file_name()))
    }

    /// Where this run's snapshot is published, if snapshots are configured.
    pub fn release_path(&self) -> Option<PathBuf> {
        self.settings.as_ref().map(|s| {
            s.release_dir
                .join(self.date.format("%Y").to_string())
                .join(self.file_name())
        })
    }

    /// Stage one inmate. A no-op when snapshots are disabled.
    pub fn add(&mut self, record: &InmateRecord) -> Result<(), ScraperError> {
        if !self.is_enabled() || self.finished {
            return Ok(());
        }
        let Some(path) = self.build_path() else {
            return Ok(());
        };

        let staging_error = |source| ScraperError::Staging {
            path: path.clone(),
            source,
        };
        if self.build_file.is_none() {
            let mut writer = BufWriter::new(File::create(&path).map_err(staging_error)?);
            write_row(&mut writer, &RAW_INMATE_DATA_HEADER).map_err(staging_error)?;
            self.monitor.debug(
                Role::RawInmateData,
                &format!("Staging raw inmate data in {}", path.display()),
            );
            self.build_file = Some(writer);
        }
        let Some(writer) = self.build_file.as_mut() else {
            return Ok(());
        };
        write_row(writer, &record.fields()).map_err(staging_error)?;
        self.staged_rows += 1;
        Ok(())
    }

    /// Write buffered rows through to the staging file.
    pub fn flush(&mut self) -> Result<(), ScraperError> {
        let Some(path) = self.build_path() else {
            return Ok(());
        };
        if let Some(writer) = self.build_file.as_mut() {
            writer
                .flush()
                .map_err(|source| ScraperError::Staging { path, source })?;
        }
        Ok(())
    }

    /// Publish the staged rows, or discard them when the store flag is off.
    /// Calling this again after it succeeded does nothing.
    pub fn finish(&mut self) -> Result<(), ScraperError> {
        if self.finished {
            return Ok(());
        }
        match (self.build_path(), self.release_path(), self.is_enabled()) {
            (Some(build), Some(release), true) => self.publish(&build, &release)?,
            (Some(build), _, false) => self.discard(&build)?,
            _ => {}
        }
        self.finished = true;
        Ok(())
    }

    fn discard(&mut self, build: &Path) -> Result<(), ScraperError> {
        self.build_file = None;
        match fs::remove_file(build) {
            Ok(()) => {
                self.monitor.debug(
                    Role::RawInmateData,
                    &format!("Discarded staged raw inmate data {}", build.display()),
                );
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ScraperError::Staging {
                path: build.to_path_buf(),
                source,
            }),
        }
    }

    fn publish(&mut self, build: &Path, release: &Path) -> Result<(), ScraperError> {
        if let Some(writer) = self.build_file.take() {
            let file = writer.into_inner().map_err(|e| ScraperError::Staging {
                path: build.to_path_buf(),
                source: e.into_error(),
            })?;
            file.sync_all().map_err(|source| ScraperError::Staging {
                path: build.to_path_buf(),
                source,
            })?;
        }
        if self.staged_rows == 0 {
            self.monitor
                .debug(Role::RawInmateData, "No raw inmate data staged, nothing to publish");
            return Ok(());
        }

        let publish_error = |source| ScraperError::Publish {
            path: release.to_path_buf(),
            source,
        };
        if let Some(year_dir) = release.parent() {
            fs::create_dir_all(year_dir).map_err(publish_error)?;
        }

        if let Err(e) = fs::rename(build, release) {
            // Most likely the archive lives on another filesystem.
            self.monitor.debug(
                Role::RawInmateData,
                &format!("Rename into archive failed ({e}), copying instead"),
            );
            copy_into_place(build, release).map_err(publish_error)?;
            fs::remove_file(build).map_err(|source| ScraperError::Staging {
                path: build.to_path_buf(),
                source,
            })?;
        }

        self.monitor.debug(
            Role::RawInmateData,
            &format!(
                "Published {} raw inmate records to {}",
                self.staged_rows,
                release.display()
            ),
        );
        Ok(())
    }
}

/// Copy `from` next to `to` and rename it over `to`, so the destination
/// appears complete or not at all.
fn copy_into_place(from: &Path, to: &Path) -> io::Result<()> {
    let dir = to.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    io::copy(&mut File::open(from)?, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(to).map_err(|e| e.error)?;
    Ok(())
}

fn write_row<W: Write>(out: &mut W, fields: &[&str]) -> io::Result<()> {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.write_all(b",")?;
        }
        write_field(out, field)?;
    }
    out.write_all(b"\n")
}

/// RFC 4180 quoting: only fields with separators, quotes or line breaks.
fn write_field<W: Write>(out: &mut W, field: &str) -> io::Result<()> {
    if field.contains([',', '"', '\n', '\r']) {
        write!(out, "\"{}\"", field.replace('"', "\"\""))
    } else {
        out.write_all(field.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[&str]) -> String {
        let mut out = Vec::new();
        write_row(&mut out, fields).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn plain_fields_are_written_bare() {
        assert_eq!(row(&["2014-0101001", "M", "506(23)"]), "2014-0101001,M,506(23)\n");
    }

    #[test]
    fn fields_with_separators_or_quotes_are_quoted() {
        assert_eq!(
            row(&["a,b", "say \"hi\"", "two\nlines"]),
            "\"a,b\",\"say \"\"hi\"\"\",\"two\nlines\"\n"
        );
    }

    #[test]
    fn paths_follow_date_and_year() {
        let controls = FeatureControls::new("/build", "/release", true);
        let date = NaiveDate::from_ymd_opt(2014, 2, 3).unwrap();
        let data = RawInmateData::new(date, Some(&controls), Arc::new(Monitor::new()));
        assert_eq!(data.build_path().unwrap(), PathBuf::from("/build/2014-02-03.csv"));
        assert_eq!(
            data.release_path().unwrap(),
            PathBuf::from("/release/2014/2014-02-03.csv")
        );
    }
}
