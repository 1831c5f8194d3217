//! # Result Emission
//!
//! One CSV line per (tree, thread-count, input-file, key-offset)
//! combination, appended to the configured results file. Phase columns
//! are elided when the phase had zero work, so the driver assembles each
//! row incrementally and hands the finished line over here.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use eyre::{Result, WrapErr};

pub struct ResultsWriter {
    out: BufWriter<File>,
}

impl ResultsWriter {
    /// Opens the results file for appending, creating it if needed.
    pub fn append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .wrap_err_with(|| format!("cannot open results file {}", path.display()))?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    pub fn write_row(&mut self, row: &str) -> Result<()> {
        writeln!(self.out, "{row}").wrap_err("cannot write results row")?;
        self.out.flush().wrap_err("cannot flush results file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_appended_across_writers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");

        ResultsWriter::append(&path)
            .unwrap()
            .write_row("quit, 4, keys.bin, 0, 123")
            .unwrap();
        ResultsWriter::append(&path)
            .unwrap()
            .write_row("quit, 8, keys.bin, 0, 456")
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("quit, 4"));
        assert!(lines[1].starts_with("quit, 8"));
    }

    #[test]
    fn unwritable_path_is_an_error() {
        assert!(ResultsWriter::append(Path::new("/no/such/dir/results.csv")).is_err());
    }
}
