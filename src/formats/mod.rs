//! Format adapters: one module per on-disk text grammar.
//!
//! Architecture:
//! ```text
//!  .edi / .j / .zmm / .xml / .avg
//!        │
//!        ▼
//!   ┌──────────┐  sniff: extension, then content signature (linear scan)
//!   │  Format   │  parse: text → Record
//!   └──────────┘  serialize: Record → text, idiomatic per format
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  Record   │  canonical tensors + Survey/Station/Run metadata
//!   └──────────┘
//! ```
//! Adapters hard-fail (`FormatError`) only on mandatory structure; optional
//! content that cannot be understood is skipped with a `log::warn!`.
use std::path::Path;

use crate::error::FormatError;
use crate::record::Record;

pub mod avg;
pub mod edi;
pub mod emtfxml;
pub mod jfile;
pub mod zmm;

// ---------------------------------------------------------------------------
// Format – the closed set of supported grammars
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Edi,
    Jfile,
    Zmm,
    EmtfXml,
    ZongeAvg,
}

impl Format {
    /// Content-signature scan order: strongest signatures first, the
    /// weak `#`-comment J-file check last.
    pub const ALL: [Format; 5] = [
        Format::Edi,
        Format::EmtfXml,
        Format::Zmm,
        Format::ZongeAvg,
        Format::Jfile,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Format::Edi => "edi",
            Format::Jfile => "jfile",
            Format::Zmm => "zmm",
            Format::EmtfXml => "emtfxml",
            Format::ZongeAvg => "avg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Format::Edi => "edi",
            Format::Jfile => "j",
            Format::Zmm => "zmm",
            Format::EmtfXml => "xml",
            Format::ZongeAvg => "avg",
        }
    }

    pub fn from_extension(path: &Path) -> Option<Format> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())?
            .to_ascii_lowercase();
        match ext.as_str() {
            "edi" => Some(Format::Edi),
            "j" => Some(Format::Jfile),
            "zmm" | "zrr" | "zss" => Some(Format::Zmm),
            "xml" => Some(Format::EmtfXml),
            "avg" => Some(Format::ZongeAvg),
            _ => None,
        }
    }

    /// Pick the adapter for a file: extension first, then each adapter's
    /// cheap content signature in `ALL` order.
    pub fn detect(path: &Path, content: &str) -> Option<Format> {
        if let Some(format) = Format::from_extension(path) {
            return Some(format);
        }
        Format::ALL
            .into_iter()
            .find(|format| format.sniff(path, content))
    }

    pub fn sniff(&self, path: &Path, content: &str) -> bool {
        match self {
            Format::Edi => edi::sniff(path, content),
            Format::Jfile => jfile::sniff(path, content),
            Format::Zmm => zmm::sniff(path, content),
            Format::EmtfXml => emtfxml::sniff(path, content),
            Format::ZongeAvg => avg::sniff(path, content),
        }
    }

    pub fn parse(&self, content: &str) -> Result<Record, FormatError> {
        match self {
            Format::Edi => edi::parse(content),
            Format::Jfile => jfile::parse(content),
            Format::Zmm => zmm::parse(content),
            Format::EmtfXml => emtfxml::parse(content),
            Format::ZongeAvg => avg::parse(content),
        }
    }

    pub fn serialize(&self, record: &Record) -> Result<String, FormatError> {
        match self {
            Format::Edi => edi::serialize(record),
            Format::Jfile => jfile::serialize(record),
            Format::Zmm => zmm::serialize(record),
            Format::EmtfXml => emtfxml::serialize(record),
            Format::ZongeAvg => avg::serialize(record),
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Shared numeric-text helpers
// ---------------------------------------------------------------------------

/// Fortran-style scientific notation: fixed precision, two-digit signed
/// exponent (`2.4980E-01`), the layout the EDI/ZMM/J ecosystems emit.
pub(crate) fn fortran_e(value: f64, precision: usize) -> String {
    if !value.is_finite() {
        return "NaN".to_string();
    }
    let formatted = format!("{:.*e}", precision, value);
    // Rust renders `2.498e-1`; rebuild the exponent as E+dd.
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exponent),
            };
            format!("{mantissa}E{sign}{digits:0>2}")
        }
        None => formatted,
    }
}

/// Whitespace-tolerant float parse accepting Fortran `E`/`D` exponents.
pub(crate) fn parse_float(token: &str) -> Option<f64> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    if let Ok(v) = token.parse::<f64>() {
        return Some(v);
    }
    // Old Fortran writers emit D exponents; fold them into E.
    let folded = token.replace(['D', 'd'], "E");
    folded.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fortran_e_pads_exponent() {
        assert_eq!(fortran_e(0.2498, 4), "2.4980E-01");
        assert_eq!(fortran_e(-1234.5, 6), "-1.234500E+03");
        assert_eq!(fortran_e(0.0, 4), "0.0000E+00");
        assert_eq!(fortran_e(1.0e32, 6), "1.000000E+32");
    }

    #[test]
    fn parse_float_accepts_fortran_exponents() {
        assert_eq!(parse_float(" 2.4980E-01 "), Some(0.2498));
        assert_eq!(parse_float("1.5D+02"), Some(150.0));
        assert_eq!(parse_float("bad"), None);
        assert_eq!(parse_float(""), None);
    }

    #[test]
    fn detect_prefers_extension() {
        let text = ">HEAD\nDATAID=x\n";
        assert_eq!(
            Format::detect(Path::new("site.avg"), text),
            Some(Format::ZongeAvg)
        );
        assert_eq!(
            Format::detect(Path::new("site.unknown"), text),
            Some(Format::Edi)
        );
    }
}
