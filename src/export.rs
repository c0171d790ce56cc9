use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use csv::{QuoteStyle, WriterBuilder};

use crate::product::ProductRecord;

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// Serialize newly discovered records: semicolon-delimited, every field
/// quoted, UTF-8 with BOM, fixed column order. Overwrites `path`; callers
/// skip the call entirely when there is nothing new.
pub fn write_csv(path: &Path, records: &[ProductRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }

    let mut file =
        File::create(path).with_context(|| format!("creating {}", path.display()))?;
    file.write_all(UTF8_BOM)?;

    let mut writer = WriterBuilder::new()
        .delimiter(b';')
        .quote_style(QuoteStyle::Always)
        .from_writer(file);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

// ── Tests ──
