use serde::Serialize;

/// Normalize a registration number for use as a dedup key.
/// Blank results must never enter the known set.
pub fn normalize_registro(value: &str) -> String {
    value.trim().to_string()
}

/// One row of the listing table, as rendered. Immutable once collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSummary {
    pub numero_registro: String,
    pub marca: String,
    pub activos: String,
    pub banda_tox: String,
}

/// Exportable unit: listing summary plus the two detail-view fields.
/// Either detail field may be empty (partial or failed extraction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductRecord {
    pub numero_registro: String,
    pub marca: String,
    pub activos: String,
    pub banda_tox: String,
    pub aptitudes: String,
    pub presentacion: String,
}

impl ProductRecord {
    pub fn new(summary: &ProductSummary, aptitudes: String, presentacion: String) -> Self {
        Self {
            numero_registro: summary.numero_registro.clone(),
            marca: summary.marca.clone(),
            activos: summary.activos.clone(),
            banda_tox: summary.banda_tox.clone(),
            aptitudes,
            presentacion,
        }
    }

    /// Failure fallback: summary carried over, both detail fields empty.
    pub fn empty_detail(summary: &ProductSummary) -> Self {
        Self::new(summary, String::new(), String::new())
    }
}

/// Outcome classification of one product's detail extraction.
/// Feeds run statistics only, never control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    Complete,
    Partial,
    Failed,
}

impl Extraction {
    /// Purely field-emptiness based. Does not distinguish "field absent on
    /// this product" from "pattern didn't match an existing field".
    pub fn classify(aptitudes: &str, presentacion: &str) -> Self {
        match (aptitudes.is_empty(), presentacion.is_empty()) {
            (false, false) => Extraction::Complete,
            (true, true) => Extraction::Failed,
            _ => Extraction::Partial,
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_whitespace() {
        assert_eq!(normalize_registro("  12345 \n"), "12345");
        assert_eq!(normalize_registro("\t"), "");
    }

    #[test]
    fn classify_both_fields() {
        assert_eq!(Extraction::classify("Insecticida", "SC"), Extraction::Complete);
        assert_eq!(Extraction::classify("Insecticida", ""), Extraction::Partial);
        assert_eq!(Extraction::classify("", "Polvo mojable"), Extraction::Partial);
        assert_eq!(Extraction::classify("", ""), Extraction::Failed);
    }

    #[test]
    fn empty_detail_keeps_summary_fields() {
        let summary = ProductSummary {
            numero_registro: "39104".into(),
            marca: "GLIFOMAX".into(),
            activos: "glifosato 48%".into(),
            banda_tox: "IV".into(),
        };
        let record = ProductRecord::empty_detail(&summary);
        assert_eq!(record.numero_registro, "39104");
        assert_eq!(record.marca, "GLIFOMAX");
        assert!(record.aptitudes.is_empty());
        assert!(record.presentacion.is_empty());
    }
}
