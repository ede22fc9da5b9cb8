//! Zonge AVG adapter.
//!
//! `$Group.Key=value` lines populate a fixed set of known sub-records
//! (survey, tx, rx, gps, gdp, unit, job, ch); unknown keys are skipped with
//! a diagnostic. `$Rx.Cmp` switches the active component for the CSV data
//! rows that follow a `skp,Freq,…` header row. Several properties (station
//! id, instrument id, firmware, UTM coordinates) are derived from
//! combinations of sub-record fields and recomputed on every access, never
//! cached, since the fields can change independently afterward.

use std::collections::BTreeMap;
use std::path::Path;

use num_complex::Complex64;

use crate::error::FormatError;
use crate::record::Record;
use crate::tensor::{nan_c64, ImpedanceMatrix, TipperRow};

const FORMAT: &str = "avg";
const GROUPS: [&str; 8] = ["survey", "tx", "rx", "gps", "gdp", "unit", "job", "ch"];

pub fn sniff(path: &Path, content: &str) -> bool {
    if super::Format::from_extension(path) == Some(super::Format::ZongeAvg) {
        return true;
    }
    content
        .lines()
        .find(|line| !line.trim().is_empty())
        .map_or(false, |line| line.trim_start().starts_with('$'))
}

// ---------------------------------------------------------------------------
// Sub-records and derived properties
// ---------------------------------------------------------------------------

/// The `$Group.Key` fields of one AVG file, keyed by lowercased group and
/// key names. Only the fixed set of known groups is stored.
#[derive(Debug, Default, Clone)]
pub struct SubRecords {
    groups: BTreeMap<String, BTreeMap<String, String>>,
}

impl SubRecords {
    /// Store a field; returns false (and stores nothing) for an unknown
    /// group.
    pub fn set(&mut self, group: &str, key: &str, value: &str) -> bool {
        let group = group.to_ascii_lowercase();
        if !GROUPS.contains(&group.as_str()) {
            return false;
        }
        self.groups
            .entry(group)
            .or_default()
            .insert(key.to_ascii_lowercase(), value.to_string());
        true
    }

    pub fn get(&self, group: &str, key: &str) -> Option<&str> {
        self.groups.get(group)?.get(key).map(String::as_str)
    }

    fn float(&self, group: &str, key: &str) -> Option<f64> {
        self.get(group, key)?.parse().ok()
    }

    // Derived properties, recomputed on every access. The underlying
    // sub-record fields can change independently, so nothing is cached.

    /// Station id: `rx.gdpstn`, falling back to `job.stn`.
    pub fn station(&self) -> Option<&str> {
        self.get("rx", "gdpstn").or_else(|| self.get("job", "stn"))
    }

    /// Instrument id: `gdp.boxser`, falling back to `gdp.box`.
    pub fn instrument_id(&self) -> Option<&str> {
        self.get("gdp", "boxser").or_else(|| self.get("gdp", "box"))
    }

    /// GDP firmware version string.
    pub fn firmware(&self) -> Option<&str> {
        self.get("gdp", "progver")
    }

    pub fn utm_zone(&self) -> Option<&str> {
        self.get("gps", "utmzone")
    }

    /// UTM easting, meaningful together with [`SubRecords::utm_zone`].
    pub fn utm_easting(&self) -> Option<f64> {
        self.utm_zone()?;
        self.float("gps", "easting")
    }

    pub fn utm_northing(&self) -> Option<f64> {
        self.utm_zone()?;
        self.float("gps", "northing")
    }
}

// ---------------------------------------------------------------------------
// Parse
// ---------------------------------------------------------------------------

const COMPONENTS: [&str; 6] = ["ZXX", "ZXY", "ZYX", "ZYY", "TZX", "TZY"];

/// One run of CSV lines under a single active component and header row.
struct Chunk {
    component: String,
    text: String,
    line: usize,
}

fn is_header_row(line: &str) -> bool {
    line.split(',')
        .next()
        .map_or(false, |first| first.trim().eq_ignore_ascii_case("skp"))
        || line.to_ascii_lowercase().contains("freq")
            && line.contains(',')
            && line
                .split(',')
                .all(|t| t.trim().parse::<f64>().is_err())
}

pub fn parse(content: &str) -> Result<Record, FormatError> {
    let mut subs = SubRecords::default();
    let mut component = String::new();
    let mut header: Option<String> = None;
    let mut chunks: Vec<Chunk> = Vec::new();

    for (i, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix('$') {
            let Some((lhs, value)) = rest.split_once('=') else {
                log::debug!("avg: skipping $ line without '=': '{line}'");
                continue;
            };
            let (lhs, value) = (lhs.trim(), value.trim());
            let Some((group, key)) = lhs.split_once('.') else {
                log::debug!("avg: ignoring ungrouped key '{lhs}'");
                continue;
            };
            let (group, key) = (group.trim(), key.trim());
            if group.eq_ignore_ascii_case("rx") && key.eq_ignore_ascii_case("cmp") {
                component = value.to_ascii_uppercase();
                continue;
            }
            if !subs.set(group, key, value) {
                log::warn!("avg: ignoring unknown sub-record '{group}.{key}'");
            }
        } else if is_header_row(line) {
            header = Some(line.to_string());
        } else {
            // Data row for the active component.
            if !COMPONENTS.contains(&component.as_str()) {
                log::warn!("avg: data row at line {} without a known component, skipped", i + 1);
                continue;
            }
            let Some(header) = header.as_ref() else {
                log::warn!("avg: data row at line {} before any header row, skipped", i + 1);
                continue;
            };
            let matching = chunks
                .last_mut()
                .filter(|c| c.component == component && c.text.starts_with(header.as_str()));
            match matching {
                Some(chunk) => {
                    chunk.text.push_str(line);
                    chunk.text.push('\n');
                }
                None => chunks.push(Chunk {
                    component: component.clone(),
                    text: format!("{header}\n{line}\n"),
                    line: i + 1,
                }),
            }
        }
    }

    if chunks.is_empty() {
        return Err(FormatError::MissingSection {
            format: FORMAT,
            section: "data rows",
        });
    }

    let mut record = Record::new();
    apply_metadata(&mut record, &subs);

    let mut rows: Vec<(String, f64, Complex64)> = Vec::new();
    for chunk in &chunks {
        read_chunk(chunk, &mut rows)?;
    }
    assemble(&mut record, &rows)?;
    Ok(record)
}

/// Parse one CSV chunk into `(component, frequency, value)` rows. The
/// complex value is recovered from magnitude and milliradian phase.
fn read_chunk(chunk: &Chunk, rows: &mut Vec<(String, f64, Complex64)>) -> Result<(), FormatError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(chunk.text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| FormatError::Malformed {
            format: FORMAT,
            line: chunk.line,
            reason: e.to_string(),
        })?
        .clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
    };
    let (Some(freq_col), Some(mag_col), Some(phz_col)) =
        (column("freq"), column("z.mag"), column("z.phz"))
    else {
        return Err(FormatError::Malformed {
            format: FORMAT,
            line: chunk.line,
            reason: format!("header row lacks Freq/Z.mag/Z.phz: '{}'", headers.iter().collect::<Vec<_>>().join(",")),
        });
    };
    for result in reader.records() {
        let row = result.map_err(|e| FormatError::Malformed {
            format: FORMAT,
            line: chunk.line,
            reason: e.to_string(),
        })?;
        let field = |col: usize| row.get(col).and_then(|t| t.parse::<f64>().ok());
        let Some(freq) = field(freq_col) else {
            log::warn!("avg: row without a readable frequency skipped");
            continue;
        };
        let value = match (field(mag_col), field(phz_col)) {
            (Some(mag), Some(phz)) => Complex64::from_polar(mag, phz / 1000.0),
            _ => nan_c64(),
        };
        rows.push((chunk.component.clone(), freq, value));
    }
    Ok(())
}

fn apply_metadata(record: &mut Record, subs: &SubRecords) {
    if let Some(station) = subs.station() {
        record.station.id = station.to_string();
    }
    if let Some(lat) = subs.float("gps", "lat") {
        record.station.latitude = lat;
    }
    if let Some(lon) = subs.float("gps", "lon") {
        record.station.longitude = lon;
    }
    if let Some(alt) = subs.float("gps", "alt") {
        record.station.elevation = alt;
    }
    if let Some(firmware) = subs.firmware() {
        record.station.provenance = firmware.to_string();
    }
    if let Some(instrument) = subs.instrument_id() {
        record.primary_run_mut().data_logger = instrument.to_string();
    }
    if let (Some(zone), Some(easting), Some(northing)) =
        (subs.utm_zone(), subs.utm_easting(), subs.utm_northing())
    {
        record
            .station
            .comments
            .push(format!("utm: {zone} {easting} {northing}"));
    }
}

/// Union of row frequencies in first-appearance order; `p = 1/f`.
fn assemble(record: &mut Record, rows: &[(String, f64, Complex64)]) -> Result<(), FormatError> {
    let mut frequencies: Vec<f64> = Vec::new();
    let mut placed: Vec<(usize, usize, Complex64)> = Vec::new();
    for (component, freq, value) in rows {
        let fi = match frequencies
            .iter()
            .position(|&f| (f - freq).abs() <= 1e-9 * freq.abs().max(1e-300))
        {
            Some(i) => i,
            None => {
                frequencies.push(*freq);
                frequencies.len() - 1
            }
        };
        let ci = COMPONENTS
            .iter()
            .position(|c| c == component)
            .unwrap_or_default();
        placed.push((ci, fi, *value));
    }
    let n = frequencies.len();
    record
        .data
        .set_periods(frequencies.iter().map(|f| 1.0 / f).collect())
        .map_err(|e| FormatError::Malformed {
            format: FORMAT,
            line: 0,
            reason: e.to_string(),
        })?;

    let shape_err = |e: crate::error::ShapeError| FormatError::Malformed {
        format: FORMAT,
        line: 0,
        reason: e.to_string(),
    };
    let has_z = placed.iter().any(|&(ci, _, _)| ci < 4);
    let has_t = placed.iter().any(|&(ci, _, _)| ci >= 4);
    if has_z {
        let mut stack: Vec<ImpedanceMatrix> = vec![[[nan_c64(); 2]; 2]; n];
        for &(ci, fi, v) in placed.iter().filter(|&&(ci, _, _)| ci < 4) {
            let (row, col) = (ci / 2, ci % 2);
            stack[fi][row][col] = v;
        }
        record.data.set_impedance(stack).map_err(shape_err)?;
    }
    if has_t {
        let mut stack: Vec<TipperRow> = vec![[nan_c64(); 2]; n];
        for &(ci, fi, v) in placed.iter().filter(|&&(ci, _, _)| ci >= 4) {
            stack[fi][ci - 4] = v;
        }
        record.data.set_tipper(stack).map_err(shape_err)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Serialize
// ---------------------------------------------------------------------------

fn csv_err(e: impl std::fmt::Display) -> FormatError {
    FormatError::Malformed {
        format: FORMAT,
        line: 0,
        reason: e.to_string(),
    }
}

pub fn serialize(record: &Record) -> Result<String, FormatError> {
    let mut out = String::new();
    out.push_str("$Survey.Type = MT\n");
    if !record.station.id.is_empty() {
        out.push_str(&format!("$Rx.GdpStn = {}\n", record.station.id));
    }
    out.push_str(&format!("$GPS.Lat = {:.6}\n", record.station.latitude));
    out.push_str(&format!("$GPS.Lon = {:.6}\n", record.station.longitude));
    out.push_str(&format!("$GPS.Alt = {:.3}\n", record.station.elevation));
    if let Some(instrument) = record
        .runs
        .first()
        .filter(|run| !run.data_logger.is_empty())
        .map(|run| run.data_logger.as_str())
    {
        out.push_str(&format!("$GDP.Box = {instrument}\n"));
    }
    if !record.station.provenance.is_empty() {
        out.push_str(&format!("$GDP.ProgVer = {}\n", record.station.provenance));
    }
    out.push_str("$Unit.Length = m\n");

    let frequencies: Vec<f64> = record.data.periods().iter().map(|p| 1.0 / p).collect();
    let mut push_component = |name: &str, values: Vec<Complex64>| -> Result<(), FormatError> {
        let defined: Vec<(f64, Complex64)> = frequencies
            .iter()
            .copied()
            .zip(values)
            .filter(|(_, v)| !v.re.is_nan() && !v.im.is_nan())
            .collect();
        if defined.is_empty() {
            return Ok(());
        }
        out.push_str(&format!("$Rx.Cmp = {name}\n"));
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(["skp", "Freq", "Z.mag", "Z.phz"])
            .map_err(csv_err)?;
        for (freq, v) in defined {
            writer
                .write_record([
                    "1".to_string(),
                    format!("{freq:.6e}"),
                    format!("{:.6e}", v.norm()),
                    format!("{:.1}", v.arg() * 1000.0),
                ])
                .map_err(csv_err)?;
        }
        let bytes = writer.into_inner().map_err(csv_err)?;
        out.push_str(&String::from_utf8_lossy(&bytes));
        Ok(())
    };

    if let Some(z) = record.data.impedance() {
        let layout = [("Zxx", 0, 0), ("Zxy", 0, 1), ("Zyx", 1, 0), ("Zyy", 1, 1)];
        for (name, row, col) in layout {
            push_component(name, z.iter().map(|m| m[row][col]).collect())?;
        }
    }
    if let Some(t) = record.data.tipper() {
        for (name, col) in [("Tzx", 0), ("Tzy", 1)] {
            push_component(name, t.iter().map(|r| r[col]).collect())?;
        }
    }
    Ok(out)
}
