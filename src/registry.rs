use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::warn;

use crate::product::normalize_registro;

/// Column names accepted for the registration number, first match wins.
const REGISTRO_COLUMNS: [&str; 4] = ["numero_registro", "numeroRegistro", "numero", "registro"];

/// Read prior export files and collect the registration numbers they hold.
/// Missing files are silently ignored and unreadable ones are logged and
/// skipped; an empty set is a perfectly valid starting point.
pub fn load_known_registros(files: &[PathBuf]) -> HashSet<String> {
    let mut registros = HashSet::new();
    for path in files {
        if !path.exists() {
            continue;
        }
        if let Err(e) = load_file(path, &mut registros) {
            warn!("Could not read {}: {}", path.display(), e);
        }
    }
    registros
}

fn load_file(path: &Path, registros: &mut HashSet<String>) -> Result<()> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_path(path)?;
    let headers = reader.headers()?.clone();

    // Exports carry a UTF-8 BOM, which can stick to the first header name.
    let column = REGISTRO_COLUMNS.iter().find_map(|name| {
        headers
            .iter()
            .position(|h| h.trim_start_matches('\u{feff}') == *name)
    });
    let Some(column) = column else {
        return Ok(());
    };

    for row in reader.records() {
        let row = row?;
        if let Some(value) = row.get(column) {
            let registro = normalize_registro(value);
            if !registro.is_empty() {
                registros.insert(registro);
            }
        }
    }
    Ok(())
}

// ── Tests ──
