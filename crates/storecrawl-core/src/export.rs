//! Full dump of every product fetched in a run.
//!
//! The dump is a single JSON array. Each element is the product payload
//! exactly as the storefront served it, plus a `"domain"` key naming the
//! origin it came from.
//!
//! # Example
//!
//! ```no_run
//! use storecrawl_core::export::ProductDump;
//! # fn demo(report: &storecrawl_core::RunReport) -> Result<(), storecrawl_core::AppError> {
//! let written = ProductDump::write_json("products.json", &report.products)?;
//! println!("Wrote {} products", written);
//! # Ok(())
//! # }
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::AppError;
use crate::stats::CollectedProduct;

/// Writer for the run's product dump.
pub struct ProductDump;

impl ProductDump {
    /// Writes the dump to `path`, replacing any previous file atomically.
    ///
    /// The array is first written to a sibling temporary file which is then
    /// renamed over `path`, so an interrupted write never leaves a truncated
    /// dump behind.
    ///
    /// # Returns
    ///
    /// The number of products written.
    pub fn write_json(
        path: impl AsRef<Path>,
        products: &[CollectedProduct],
    ) -> Result<usize, AppError> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .ok_or_else(|| AppError::ConfigError(format!("Invalid dump path: {}", path.display())))?;
        let tmp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

        let written = {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            let written = Self::write_to(&mut writer, products)?;
            writer.flush()?;
            written
        };

        if let Err(e) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(written)
    }

    /// Streams the dump as a pretty-printed JSON array with 2-space indentation.
    pub fn write_to<W: Write>(
        writer: &mut W,
        products: &[CollectedProduct],
    ) -> Result<usize, AppError> {
        if products.is_empty() {
            writeln!(writer, "[]")?;
            return Ok(0);
        }

        writeln!(writer, "[")?;
        for (i, product) in products.iter().enumerate() {
            if i > 0 {
                writeln!(writer, ",")?;
            }
            let json = serde_json::to_string_pretty(&product.annotated())?;
            let mut lines = json.lines().peekable();
            while let Some(line) = lines.next() {
                if lines.peek().is_some() {
                    writeln!(writer, "  {}", line)?;
                } else {
                    write!(writer, "  {}", line)?;
                }
            }
        }
        writeln!(writer, "\n]")?;

        Ok(products.len())
    }
}
