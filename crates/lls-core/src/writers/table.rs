//! CSV output for tabular workflow results.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;

use csv::WriterBuilder;

use crate::error::LatticeError;
use crate::results::ProcessedSlice;
use crate::workflow::Table;

struct LeafFile {
    path: PathBuf,
    columns: Vec<String>,
    writer: csv::Writer<File>,
}

/// Appends every table produced by a workflow leaf to `{name}_{leaf}.csv`.
///
/// Each row is prefixed with the `time`, `channel` and `roi` it came from
/// (`roi` is empty outside the crop path).
pub struct TableWriter {
    save_dir: PathBuf,
    save_name: String,
    files: BTreeMap<String, LeafFile>,
}

impl std::fmt::Debug for TableWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableWriter")
            .field("save_dir", &self.save_dir)
            .field("save_name", &self.save_name)
            .field("leafs", &self.files.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TableWriter {
    /// New writer; the directory must already exist.
    #[must_use]
    pub fn new(save_dir: PathBuf, save_name: impl Into<String>) -> Self {
        Self {
            save_dir,
            save_name: save_name.into(),
            files: BTreeMap::new(),
        }
    }

    /// Append the rows of one slice's table for `leaf`.
    ///
    /// # Errors
    ///
    /// Fails if the table's columns differ from earlier tables of the same
    /// leaf, or on I/O errors.
    pub fn write(&mut self, leaf: &str, slice: &ProcessedSlice<Table>) -> Result<(), LatticeError> {
        if !self.files.contains_key(leaf) {
            let path = self.save_dir.join(format!("{}_{leaf}.csv", self.save_name));
            let mut writer = WriterBuilder::new().has_headers(false).from_path(&path)?;
            let mut header = vec!["time".to_owned(), "channel".to_owned(), "roi".to_owned()];
            header.extend(slice.data.columns.iter().cloned());
            writer.write_record(&header)?;
            self.files.insert(
                leaf.to_owned(),
                LeafFile {
                    path,
                    columns: slice.data.columns.clone(),
                    writer,
                },
            );
        }
        let Some(file) = self.files.get_mut(leaf) else {
            return Ok(());
        };
        if file.columns != slice.data.columns {
            return Err(LatticeError::Configuration(format!(
                "workflow output `{leaf}` changed columns from {:?} to {:?}",
                file.columns, slice.data.columns
            )));
        }
        let roi = slice.roi_index.map(|r| r.to_string()).unwrap_or_default();
        for row in &slice.data.rows {
            let mut record = vec![slice.time.to_string(), slice.channel.to_string(), roi.clone()];
            record.extend(row.iter().map(ToString::to_string));
            file.writer.write_record(&record)?;
        }
        Ok(())
    }

    /// Flush every file and return their paths.
    ///
    /// # Errors
    ///
    /// Propagates flush failures.
    pub fn finish(&mut self) -> Result<Vec<PathBuf>, LatticeError> {
        let mut written = Vec::new();
        for (_, mut file) in std::mem::take(&mut self.files) {
            file.writer.flush()?;
            log::info!("Wrote {}", file.path.display());
            written.push(file.path);
        }
        Ok(written)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn slice(time: usize, columns: &[&str], rows: Vec<Vec<f64>>) -> ProcessedSlice<Table> {
        ProcessedSlice {
            data: Table {
                columns: columns.iter().map(|c| (*c).to_owned()).collect(),
                rows,
            },
            time_index: time,
            time,
            channel_index: 0,
            channel: 0,
            roi_index: None,
        }
    }

    #[test]
    fn rows_are_tagged_with_their_slice() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = TableWriter::new(dir.path().to_path_buf(), "run");
        writer.write("stats", &slice(0, &["mean"], vec![vec![1.5]])).unwrap();
        writer.write("stats", &slice(1, &["mean"], vec![vec![2.0]])).unwrap();
        let paths = writer.finish().unwrap();
        assert_eq!(paths, vec![dir.path().join("run_stats.csv")]);

        let text = std::fs::read_to_string(&paths[0]).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["time,channel,roi,mean", "0,0,,1.5", "1,0,,2"]);
    }

    #[test]
    fn changing_columns_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = TableWriter::new(dir.path().to_path_buf(), "run");
        writer.write("stats", &slice(0, &["a"], vec![vec![1.0]])).unwrap();
        assert!(matches!(
            writer.write("stats", &slice(1, &["b"], vec![vec![1.0]])),
            Err(LatticeError::Configuration(_))
        ));
    }
}
