//! BIRRP J-file adapter.
//!
//! `#`-prefixed header lines carry `key=value` pairs (whitespace around `=`
//! tolerated); the `nfil` counter groups repeated `filnam/nskip/nread/ncomp/
//! indices` keys into ordered per-file data blocks. `>KEY = value` lines hold
//! site geometry, a bare line names the station, then per-component blocks
//! (`ZXX` … `TZY`) list `period real imag error` rows. A negative period is a
//! frequency (`p = -1/v`); `-999` is the missing sentinel.

use std::collections::HashMap;
use std::path::Path;

use num_complex::Complex64;

use crate::error::FormatError;
use crate::metadata::channel::{Channel, MagneticChannel};
use crate::record::Record;
use crate::tensor::{nan_c64, ImpedanceMatrix, TipperRow};

use super::{fortran_e, parse_float};

const FORMAT: &str = "jfile";
const MISSING: f64 = -999.0;

pub fn sniff(path: &Path, content: &str) -> bool {
    if super::Format::from_extension(path) == Some(super::Format::Jfile) {
        return true;
    }
    // Weak signature, checked last in the scan order.
    content
        .lines()
        .find(|line| !line.trim().is_empty())
        .map_or(false, |line| line.trim_start().starts_with('#'))
}

// ---------------------------------------------------------------------------
// Header – `#` lines and the nfil block grouping
// ---------------------------------------------------------------------------

/// One input-file group announced in the header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileBlock {
    pub filnam: String,
    pub nskip: Option<f64>,
    pub nread: Option<f64>,
    pub ncomp: Option<String>,
    pub indices: Option<String>,
}

/// Everything the `#` header carries: scalar keys in file order, free-form
/// comment lines, and the ordered per-file data blocks.
#[derive(Debug, Default)]
pub struct Header {
    pub keys: Vec<(String, String)>,
    pub comments: Vec<String>,
    pub blocks: Vec<FileBlock>,
    /// Running block index, driven by the `nfil` key.
    nfil: usize,
}

impl Header {
    /// Consume one `#` line (without its `#`).
    ///
    /// The grouping mechanism: `nfil` sets the current block index; when one
    /// of the block keys arrives, a new block is appended only when
    /// `blocks.len() != index + 1`, otherwise the block already at that index
    /// is updated in place. This is what folds multi-file, multi-channel
    /// recordings into one entry per input file.
    pub fn push_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let pairs = key_value_pairs(line);
        if pairs.is_empty() {
            self.comments.push(line.to_string());
            return;
        }
        for (key, value) in pairs {
            match key.as_str() {
                "nfil" => match value.parse::<usize>() {
                    Ok(index) => self.nfil = index,
                    Err(_) => log::warn!("jfile: bad nfil value '{value}'"),
                },
                "filnam" | "nskip" | "nread" | "ncomp" | "indices" => {
                    if self.blocks.len() != self.nfil + 1 {
                        self.blocks.push(FileBlock::default());
                    }
                    let Some(block) = self.blocks.get_mut(self.nfil) else {
                        log::warn!("jfile: block key '{key}' with nfil={} out of sequence", self.nfil);
                        continue;
                    };
                    match key.as_str() {
                        "filnam" => block.filnam = value,
                        "nskip" => block.nskip = parse_float(&value),
                        "nread" => block.nread = parse_float(&value),
                        "ncomp" => block.ncomp = Some(value),
                        "indices" => block.indices = Some(value),
                        _ => unreachable!(),
                    }
                }
                _ => self.keys.push((key, value)),
            }
        }
    }
}

/// `key=value` pairs from one header line, whitespace around `=` tolerated.
/// Keys are lowercased; a line without `=` yields no pairs.
fn key_value_pairs(line: &str) -> Vec<(String, String)> {
    if !line.contains('=') {
        return Vec::new();
    }
    let mut pairs = Vec::new();
    // Fold `key = value` into `key=value` so whitespace splitting works.
    let mut normalized = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_whitespace() {
            while chars.peek().map_or(false, |n| n.is_whitespace()) {
                chars.next();
            }
            if chars.peek() == Some(&'=') {
                continue;
            }
            normalized.push(' ');
        } else if c == '=' {
            normalized.push('=');
            while chars.peek().map_or(false, |n| n.is_whitespace()) {
                chars.next();
            }
        } else {
            normalized.push(c);
        }
    }
    for token in normalized.split_whitespace() {
        if let Some((key, value)) = token.split_once('=') {
            pairs.push((key.to_ascii_lowercase(), value.to_string()));
        }
    }
    pairs
}

// ---------------------------------------------------------------------------
// Parse
// ---------------------------------------------------------------------------

const Z_COMPONENTS: [&str; 4] = ["ZXX", "ZXY", "ZYX", "ZYY"];
const T_COMPONENTS: [&str; 2] = ["TZX", "TZY"];

fn component_name(line: &str) -> Option<String> {
    let first = line.split_whitespace().next()?.to_ascii_uppercase();
    if Z_COMPONENTS.contains(&first.as_str()) || T_COMPONENTS.contains(&first.as_str()) {
        Some(first)
    } else {
        None
    }
}

/// `period real imag [error]` row. Negative period means frequency, `-999`
/// means missing; standard errors are outside the data model and dropped.
fn parse_row(line: &str, line_no: usize) -> Result<(f64, Complex64), FormatError> {
    let values: Vec<f64> = line.split_whitespace().filter_map(parse_float).collect();
    if values.len() < 3 {
        return Err(FormatError::Malformed {
            format: FORMAT,
            line: line_no,
            reason: format!("data row needs period, real, imag: '{}'", line.trim()),
        });
    }
    let period = if values[0] < 0.0 { -1.0 / values[0] } else { values[0] };
    let decode = |v: f64| if (v - MISSING).abs() < 1e-6 { f64::NAN } else { v };
    Ok((period, Complex64::new(decode(values[1]), decode(values[2]))))
}

pub fn parse(content: &str) -> Result<Record, FormatError> {
    let mut record = Record::new();
    let mut header = Header::default();
    let mut azimuth: Option<f64> = None;
    let mut station: Option<String> = None;
    let mut components: Vec<(String, Vec<(f64, Complex64)>)> = Vec::new();

    let mut lines = content.lines().enumerate().peekable();
    while let Some((i, raw)) = lines.next() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix('#') {
            header.push_line(rest);
        } else if let Some(rest) = line.strip_prefix('>') {
            let (key, value) = match rest.split_once('=') {
                Some((k, v)) => (k.trim().to_ascii_uppercase(), v.trim()),
                None => continue,
            };
            let Some(v) = parse_float(value) else {
                log::warn!("jfile: unreadable site value in '{line}'");
                continue;
            };
            match key.as_str() {
                "AZIMUTH" => azimuth = Some(v),
                "LATITUDE" => record.station.latitude = v,
                "LONGITUDE" => record.station.longitude = v,
                "ELEVATION" => record.station.elevation = v,
                "DECLINATION" => record.station.declination = v,
                other => log::warn!("jfile: ignoring site key {other}"),
            }
        } else if let Some(name) = component_name(line) {
            // Count line, then that many data rows.
            let Some((count_no, count_line)) = lines.next() else {
                return Err(FormatError::Malformed {
                    format: FORMAT,
                    line: i + 1,
                    reason: format!("{name} block has no count line"),
                });
            };
            let count: usize = count_line
                .split_whitespace()
                .next()
                .and_then(|t| t.parse().ok())
                .ok_or_else(|| FormatError::Malformed {
                    format: FORMAT,
                    line: count_no + 1,
                    reason: format!("bad row count for {name}: '{}'", count_line.trim()),
                })?;
            let mut rows = Vec::with_capacity(count);
            for _ in 0..count {
                let Some((row_no, row)) = lines.next() else {
                    return Err(FormatError::Malformed {
                        format: FORMAT,
                        line: count_no + 1,
                        reason: format!("{name} block announces {count} rows, file ended early"),
                    });
                };
                rows.push(parse_row(row, row_no + 1)?);
            }
            components.push((name, rows));
        } else if station.is_none() {
            station = Some(line.to_string());
        } else {
            log::warn!("jfile: skipping unrecognized line {}: '{line}'", i + 1);
        }
    }

    if components.is_empty() || components.iter().all(|(_, rows)| rows.is_empty()) {
        return Err(FormatError::MissingSection {
            format: FORMAT,
            section: "component data blocks",
        });
    }

    record.station.id = station.unwrap_or_default();
    if let Some(line) = header.comments.iter().find(|c| c.to_ascii_uppercase().contains("BIRRP")) {
        record.station.provenance = line.clone();
    }
    record.station.comments.extend(header.comments.iter().cloned());
    for (key, value) in &header.keys {
        record.station.comments.push(format!("{key} = {value}"));
    }
    for block in &header.blocks {
        log::debug!("jfile: input file group {block:?}");
    }
    if let Some(az) = azimuth {
        let mut hx = MagneticChannel::new("hx");
        hx.measurement_azimuth = az;
        let mut hy = MagneticChannel::new("hy");
        hy.measurement_azimuth = az + 90.0;
        let run = record.primary_run_mut();
        run.add_channel(Channel::Magnetic(hx));
        run.add_channel(Channel::Magnetic(hy));
    }

    assemble(&mut record, &components)?;
    Ok(record)
}

/// Union of the block period axes in first-appearance order; components
/// missing a period hold NaN there.
fn assemble(
    record: &mut Record,
    components: &[(String, Vec<(f64, Complex64)>)],
) -> Result<(), FormatError> {
    let mut periods: Vec<f64> = Vec::new();
    let index_of = |p: f64, periods: &mut Vec<f64>| -> usize {
        match periods
            .iter()
            .position(|&q| (q - p).abs() <= 1e-9 * p.abs().max(1e-300))
        {
            Some(i) => i,
            None => {
                periods.push(p);
                periods.len() - 1
            }
        }
    };
    let mut placed: Vec<(usize, usize, Complex64)> = Vec::new(); // (component, period index, value)
    for (ci, (_, rows)) in components.iter().enumerate() {
        for &(p, v) in rows {
            let pi = index_of(p, &mut periods);
            placed.push((ci, pi, v));
        }
    }
    let n = periods.len();
    record
        .data
        .set_periods(periods)
        .map_err(|e| FormatError::Malformed {
            format: FORMAT,
            line: 0,
            reason: e.to_string(),
        })?;

    let mut by_name: HashMap<&str, Vec<Complex64>> = HashMap::new();
    for (ci, pi, v) in placed {
        let name = components[ci].0.as_str();
        let slot = by_name.entry(name).or_insert_with(|| vec![nan_c64(); n]);
        slot[pi] = v;
    }

    if Z_COMPONENTS.iter().any(|c| by_name.contains_key(c)) {
        let mut stack: Vec<ImpedanceMatrix> = vec![[[nan_c64(); 2]; 2]; n];
        let layout = [("ZXX", 0, 0), ("ZXY", 0, 1), ("ZYX", 1, 0), ("ZYY", 1, 1)];
        for (name, row, col) in layout {
            if let Some(values) = by_name.get(name) {
                for (entry, &v) in stack.iter_mut().zip(values) {
                    entry[row][col] = v;
                }
            }
        }
        record.data.set_impedance(stack).map_err(|e| FormatError::Malformed {
            format: FORMAT,
            line: 0,
            reason: e.to_string(),
        })?;
    }
    if T_COMPONENTS.iter().any(|c| by_name.contains_key(c)) {
        let mut stack: Vec<TipperRow> = vec![[nan_c64(); 2]; n];
        for (name, col) in [("TZX", 0), ("TZY", 1)] {
            if let Some(values) = by_name.get(name) {
                for (entry, &v) in stack.iter_mut().zip(values) {
                    entry[col] = v;
                }
            }
        }
        record.data.set_tipper(stack).map_err(|e| FormatError::Malformed {
            format: FORMAT,
            line: 0,
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Serialize
// ---------------------------------------------------------------------------

pub fn serialize(record: &Record) -> Result<String, FormatError> {
    let mut out = String::new();
    out.push_str(&format!(
        "# transfer functions written by mt-transfer {}\n",
        env!("CARGO_PKG_VERSION")
    ));
    for comment in &record.station.comments {
        out.push_str("# ");
        out.push_str(comment);
        out.push('\n');
    }

    let azimuth = record
        .runs
        .first()
        .and_then(|run| run.channel("hx"))
        .map_or(0.0, |ch| ch.orientation());
    out.push_str(&format!(">AZIMUTH   = {:>12.6}\n", azimuth));
    out.push_str(&format!(">LATITUDE  = {:>12.6}\n", record.station.latitude));
    out.push_str(&format!(">LONGITUDE = {:>12.6}\n", record.station.longitude));
    out.push_str(&format!(">ELEVATION = {:>12.3}\n", record.station.elevation));
    out.push_str(&format!(">DECLINATION = {:>10.3}\n", record.station.declination));

    let station = if record.station.id.is_empty() {
        "unknown"
    } else {
        &record.station.id
    };
    out.push_str(station);
    out.push('\n');

    let periods = record.data.periods();
    let encode = |v: f64| if v.is_nan() { MISSING } else { v };
    let mut push_block = |out: &mut String, name: &str, values: Vec<Complex64>| {
        out.push_str(name);
        out.push('\n');
        out.push_str(&format!(" {}\n", periods.len()));
        for (p, v) in periods.iter().zip(values) {
            out.push_str(&format!(
                " {:>14} {:>14} {:>14} {:>14}\n",
                fortran_e(*p, 6),
                fortran_e(encode(v.re), 6),
                fortran_e(encode(v.im), 6),
                fortran_e(0.0, 6)
            ));
        }
    };

    if let Some(z) = record.data.impedance() {
        let layout = [("ZXX", 0, 0), ("ZXY", 0, 1), ("ZYX", 1, 0), ("ZYY", 1, 1)];
        for (name, row, col) in layout {
            push_block(&mut out, name, z.iter().map(|m| m[row][col]).collect());
        }
    }
    if let Some(t) = record.data.tipper() {
        for (name, col) in [("TZX", 0), ("TZY", 1)] {
            push_block(&mut out, name, t.iter().map(|r| r[col]).collect());
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"# BIRRP Version 5 advanced mode output
# nout = 3 ninp = 2
# nfil = 0
# filnam = site1_ex.bin
# nskip = 0 nread = 86400
# nfil = 1
# filnam = site1_ey.bin
# nskip = 0 nread = 86400
>AZIMUTH   =    12.0
>LATITUDE  =   40.500000
>LONGITUDE = -116.500000
>ELEVATION =   1200.000
mt01
ZXX S.E.(Z)
 2
 1.000000E+00 2.498000E-01 -2.049000E-02 1.000000E-03
 1.000000E+01 1.584000E-01 -2.203000E-02 2.000000E-03
ZXY S.E.(Z)
 2
 1.000000E+00 1.100000E+00 1.200000E-01 1.000000E-03
 1.000000E+01 -999.000000 -999.000000 0.000000E+00
TZX S.E.(T)
 2
 -1.000000E+00 5.000000E-02 -3.000000E-02 1.000000E-03
 1.000000E+01 6.000000E-02 -4.000000E-02 1.000000E-03
"#;

    #[test]
    fn nfil_grouping_appends_then_updates_in_place() {
        let mut header = Header::default();
        header.push_line("nfil = 0");
        header.push_line("filnam = a.bin");
        header.push_line("nfil = 0");
        header.push_line("nskip = 1");
        header.push_line("nfil = 1");
        header.push_line("filnam = b.bin");
        header.push_line("nfil = 1");
        header.push_line("nskip = 2");

        assert_eq!(header.blocks.len(), 2);
        assert_eq!(header.blocks[0].filnam, "a.bin");
        assert_eq!(header.blocks[0].nskip, Some(1.0));
        assert_eq!(header.blocks[1].filnam, "b.bin");
        assert_eq!(header.blocks[1].nskip, Some(2.0));
    }

    #[test]
    fn header_keys_and_comments_are_kept_apart() {
        let mut header = Header::default();
        header.push_line("BIRRP Version 5 advanced mode output");
        header.push_line("nout = 3 ninp = 2");
        assert_eq!(header.comments, ["BIRRP Version 5 advanced mode output"]);
        assert_eq!(
            header.keys,
            [
                ("nout".to_string(), "3".to_string()),
                ("ninp".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn parses_station_site_and_blocks() {
        let record = parse(SAMPLE).unwrap();
        assert_eq!(record.station.id, "mt01");
        assert_eq!(record.station.latitude, 40.5);
        assert_eq!(record.station.longitude, -116.5);
        assert!(record.station.provenance.contains("BIRRP"));
        assert_eq!(record.runs[0].channel("hx").unwrap().orientation(), 12.0);
        assert_eq!(record.runs[0].channel("hy").unwrap().orientation(), 102.0);
    }

    #[test]
    fn negative_period_is_a_frequency() {
        let record = parse(SAMPLE).unwrap();
        // TZX's first row used period -1.0, i.e. 1 Hz; it lands on the
        // existing 1 s axis entry.
        assert_eq!(record.data.periods(), &[1.0, 10.0]);
        let t = record.data.tipper().unwrap();
        assert_eq!(t[0][0], Complex64::new(0.05, -0.03));
    }

    #[test]
    fn missing_sentinel_becomes_nan() {
        let record = parse(SAMPLE).unwrap();
        let z = record.data.impedance().unwrap();
        assert!(z[1][0][1].re.is_nan());
        assert!(z[1][0][1].im.is_nan());
        // Components never reported stay NaN.
        assert!(z[0][1][0].re.is_nan());
    }

    #[test]
    fn no_data_blocks_is_a_format_error() {
        let err = parse("# BIRRP output\nmt01\n").unwrap_err();
        assert!(matches!(err, FormatError::MissingSection { .. }));
    }

    #[test]
    fn truncated_block_is_malformed() {
        let text = "mt01\nZXX S.E.(Z)\n 3\n 1.0 0.1 0.2 0.0\n";
        let err = parse(text).unwrap_err();
        assert!(matches!(err, FormatError::Malformed { .. }));
    }

    #[test]
    fn serialize_is_idempotent() {
        let record = parse(SAMPLE).unwrap();
        assert_eq!(serialize(&record).unwrap(), serialize(&record).unwrap());
    }

    #[test]
    fn round_trip_preserves_values() {
        let record = parse(SAMPLE).unwrap();
        let back = parse(&serialize(&record).unwrap()).unwrap();
        assert_eq!(back.station.id, record.station.id);
        assert_eq!(back.data.periods(), record.data.periods());
        let (a, b) = (
            record.data.impedance().unwrap(),
            back.data.impedance().unwrap(),
        );
        for (x, y) in a.iter().zip(b.iter()) {
            for row in 0..2 {
                for col in 0..2 {
                    if x[row][col].re.is_nan() {
                        assert!(y[row][col].re.is_nan());
                    } else {
                        assert!((x[row][col].re - y[row][col].re).abs() < 1e-9);
                    }
                }
            }
        }
    }
}
