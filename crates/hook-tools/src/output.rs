//! Rendering of hook tool results.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, ValueEnum};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Output encodings a tool can print.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum Format {
    /// Booleans as `True`/`False`, scalars raw, collections as YAML.
    #[default]
    Smart,
    /// YAML.
    Yaml,
    /// Compact JSON.
    Json,
}

impl Format {
    /// Renders `value`, newline-terminated. In the smart and YAML formats a
    /// null renders as nothing at all.
    ///
    /// # Errors
    ///
    /// Fails if the value cannot be encoded.
    pub fn render(self, value: &Value) -> Result<Vec<u8>> {
        let text = match (self, value) {
            (Self::Smart | Self::Yaml, Value::Null) => String::new(),
            (Self::Smart, Value::Bool(true)) => "True\n".to_string(),
            (Self::Smart, Value::Bool(false)) => "False\n".to_string(),
            (Self::Smart, Value::String(s)) => format!("{s}\n"),
            (Self::Smart, Value::Number(n)) => format!("{n}\n"),
            (Self::Smart | Self::Yaml, value) => {
                serde_yaml::to_string(value).map_err(|e| Error::Format(e.to_string()))?
            }
            (Self::Json, value) => {
                let mut json =
                    serde_json::to_string(value).map_err(|e| Error::Format(e.to_string()))?;
                json.push('\n');
                json
            }
        };
        Ok(text.into_bytes())
    }
}

/// The `--format` and `--output` options shared by every reading tool.
#[derive(Args, Clone, Debug, Default)]
pub struct OutputArgs {
    /// Specify output format
    #[arg(long, value_enum, default_value_t = Format::Smart)]
    pub format: Format,

    /// Specify an output file
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,
}

impl OutputArgs {
    /// Renders `value` to the selected destination.
    ///
    /// # Errors
    ///
    /// Fails if the value cannot be encoded.
    pub fn print<T: Serialize + ?Sized>(&self, out: &mut Output, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| Error::Format(e.to_string()))?;
        let rendered = self.format.render(&value)?;
        match &self.output {
            Some(path) => out.files.push((path.clone(), rendered)),
            None => out.stdout.extend(rendered),
        }
        Ok(())
    }
}

/// What a tool produced: standard output and files to write.
#[derive(Debug, Default)]
pub struct Output {
    stdout: Vec<u8>,
    files: Vec<(PathBuf, Vec<u8>)>,
}

impl Output {
    /// Bytes for standard output.
    #[must_use]
    pub fn stdout(&self) -> &[u8] {
        &self.stdout
    }

    /// Writes `-o` files; relative paths resolve against `dir`. Returns the
    /// standard output.
    ///
    /// # Errors
    ///
    /// Fails if a file cannot be written.
    pub fn finish(self, dir: &Path) -> Result<Vec<u8>> {
        for (path, content) in self.files {
            fs::write(dir.join(path), content)
                .map_err(|e| Error::Io("cannot write output file", e))?;
        }
        Ok(self.stdout)
    }
}
