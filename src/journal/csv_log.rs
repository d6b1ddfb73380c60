use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::common::error::Result;

/// Append-only semicolon-separated log with a header written on first use.
#[derive(Debug, Clone)]
pub struct CsvLog {
    path: PathBuf,
    header: &'static [&'static str],
}

/// Field separators and line breaks inside a value would corrupt the row.
pub fn sanitize(field: &str) -> String {
    field
        .chars()
        .map(|c| match c {
            ';' => ',',
            '\n' | '\r' => ' ',
            other => other,
        })
        .collect()
}

impl CsvLog {
    pub fn new(path: impl Into<PathBuf>, header: &'static [&'static str]) -> Self {
        Self { path: path.into(), header }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, fields: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;

        let mut out = String::new();
        if file.metadata()?.len() == 0 {
            out.push_str(&self.header.join(";"));
            out.push('\n');
        }
        let row: Vec<String> = fields.iter().map(|f| sanitize(f)).collect();
        out.push_str(&row.join(";"));
        out.push('\n');

        file.write_all(out.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}
