//! EDI (Electrical Data Interchange) adapter.
//!
//! `>`-sectioned key=value text: `>HEAD`, `>INFO` (loosely structured
//! vendor prose), `>=DEFINEMEAS` with `>HMEAS`/`>EMEAS` channel geometry,
//! `>=MTSECT`, then wrapped numeric blocks (`>FREQ`, `>ZXXR`…, tipper
//! `>TXR.EXP`…) and `>END`. Data use the HEAD `EMPTY` sentinel (1.0E+32 by
//! default) for missing values.

use std::collections::HashMap;
use std::path::Path;

use num_complex::Complex64;

use crate::error::FormatError;
use crate::metadata::channel::Channel;
use crate::metadata::mapper::{
    self, ComponentCase, DipoleGeometry, PointGeometry,
};
use crate::record::Record;
use crate::tensor::{nan_c64, ImpedanceMatrix, TipperRow};

use super::{fortran_e, parse_float};

const FORMAT: &str = "edi";
const DEFAULT_EMPTY: f64 = 1.0e32;

pub fn sniff(path: &Path, content: &str) -> bool {
    if super::Format::from_extension(path) == Some(super::Format::Edi) {
        return true;
    }
    content
        .lines()
        .take(10)
        .any(|line| line.trim_start().starts_with(">HEAD"))
}

// ---------------------------------------------------------------------------
// Section walker
// ---------------------------------------------------------------------------

/// One `>`-introduced section: its name (without `>`/`>=`), the remainder
/// of the header line, and the body lines up to the next section.
struct Section {
    name: String,
    header_rest: String,
    body: Vec<String>,
    line: usize,
}

fn split_sections(content: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    for (i, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if let Some(rest) = line.strip_prefix('>') {
            let rest = rest.strip_prefix('=').unwrap_or(rest);
            let (name, header_rest) = match rest.split_once(char::is_whitespace) {
                Some((n, r)) => (n, r.trim()),
                None => (rest, ""),
            };
            sections.push(Section {
                name: name.to_ascii_uppercase(),
                header_rest: header_rest.to_string(),
                body: Vec::new(),
                line: i + 1,
            });
        } else if let Some(section) = sections.last_mut() {
            section.body.push(raw.to_string());
        }
        // Text before the first `>` section is not EDI content; ignore it.
    }
    sections
}

/// Tokenize `KEY=VALUE` pairs from a line, tolerant of whitespace around
/// `=` and of quoted values.
fn key_values(line: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    // Normalize ` = ` so that splitting on whitespace keeps pairs intact.
    let mut normalized = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_whitespace() {
            // Collapse whitespace that surrounds a `=`.
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
            let value = value.trim_matches('"').trim_matches('\'');
            pairs.push((key.to_ascii_uppercase(), value.to_string()));
        }
    }
    pairs
}

fn body_key_values(body: &[String]) -> Vec<(String, String)> {
    body.iter().flat_map(|line| key_values(line)).collect()
}

/// Decimal degrees or `DD:MM:SS` colon notation.
fn parse_angle(text: &str) -> Option<f64> {
    let text = text.trim();
    if !text.contains(':') {
        return parse_float(text);
    }
    let mut parts = text.split(':');
    let degrees: f64 = parts.next()?.trim().parse().ok()?;
    let minutes: f64 = parts.next()?.trim().parse().ok()?;
    let seconds: f64 = match parts.next() {
        Some(s) => s.trim().parse().ok()?,
        None => 0.0,
    };
    let sign = if text.trim_start().starts_with('-') { -1.0 } else { 1.0 };
    Some(sign * (degrees.abs() + minutes / 60.0 + seconds / 3600.0))
}

// ---------------------------------------------------------------------------
// INFO vendor heuristics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InfoVendor {
    Phoenix,
    Metronix,
    Generic,
}

fn detect_vendor(body: &[String]) -> InfoVendor {
    for line in body {
        let upper = line.to_ascii_uppercase();
        if upper.contains("PHOENIX") {
            return InfoVendor::Phoenix;
        }
        if upper.contains("METRONIX") || upper.contains("ADU") {
            return InfoVendor::Metronix;
        }
    }
    InfoVendor::Generic
}

/// Apply one dotted metadata key. Returns false when the key is not one we
/// structure, so the caller can preserve the line verbatim instead.
fn apply_dotted(record: &mut Record, key: &str, value: &str) -> bool {
    let value = value.trim();
    match key {
        "run.ex.dipole_length" => match parse_length(value) {
            Some(length) => {
                set_dipole_length(record, "ex", length);
                true
            }
            None => false,
        },
        "run.ey.dipole_length" => match parse_length(value) {
            Some(length) => {
                set_dipole_length(record, "ey", length);
                true
            }
            None => false,
        },
        "run.sample_rate" => match parse_float(value) {
            Some(rate) => {
                record.primary_run_mut().sample_rate = Some(rate);
                true
            }
            None => false,
        },
        "station.id" => {
            if record.station.id.is_empty() {
                record.station.id = value.to_string();
            }
            true
        }
        "station.acquired_by" => {
            record.station.acquired_by = value.to_string();
            true
        }
        "survey.id" => {
            record.survey.id = value.to_string();
            true
        }
        "survey.name" => {
            record.survey.name = value.to_string();
            true
        }
        "survey.country" => {
            record.survey.country = value.to_string();
            true
        }
        "survey.acquired_by" => {
            record.survey.acquired_by = value.to_string();
            true
        }
        _ => false,
    }
}

/// `"100.0 M"` → 100.0
fn parse_length(value: &str) -> Option<f64> {
    let token = value
        .trim()
        .trim_end_matches(|c: char| c.is_alphabetic())
        .trim();
    parse_float(token)
}

/// Lay the dipole along its nominal axis so the derived length matches the
/// vendor-reported one: negative terminal at the origin, positive terminal
/// `length` out.
fn set_dipole_length(record: &mut Record, component: &str, length: f64) {
    let run = record.primary_run_mut();
    let mut ch = match run.channel(component) {
        Some(Channel::Electric(e)) => e.clone(),
        _ => crate::metadata::ElectricChannel::new(component),
    };
    ch.x = Some(0.0);
    ch.y = Some(0.0);
    if component == "ey" {
        ch.x2 = Some(0.0);
        ch.y2 = Some(length);
    } else {
        ch.x2 = Some(length);
        ch.y2 = Some(0.0);
    }
    run.add_channel(Channel::Electric(ch));
}

fn phoenix_dotted(key: &str) -> Option<&'static str> {
    match key {
        "EX LEN" | "EXLEN" => Some("run.ex.dipole_length"),
        "EY LEN" | "EYLEN" => Some("run.ey.dipole_length"),
        "STN NUMBER" | "STATION" => Some("station.id"),
        "COMPANY" => Some("survey.acquired_by"),
        "SURVEY ID" => Some("survey.id"),
        _ => None,
    }
}

fn generic_dotted(key: &str) -> Option<&'static str> {
    match key {
        "operator" | "acquired by" => Some("station.acquired_by"),
        "country" => Some("survey.country"),
        "survey" => Some("survey.name"),
        _ => None,
    }
}

fn parse_info(record: &mut Record, body: &[String]) {
    let vendor = detect_vendor(body);
    for raw in body {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        // MAXINFO is INFO-section bookkeeping, not prose.
        if line.to_ascii_uppercase().starts_with("MAXINFO") {
            continue;
        }
        let consumed = match vendor {
            InfoVendor::Phoenix => line
                .split_once(':')
                .and_then(|(key, value)| {
                    phoenix_dotted(key.trim().to_ascii_uppercase().as_str())
                        .map(|dotted| (dotted, value))
                })
                .map_or(false, |(dotted, value)| {
                    apply_dotted(record, dotted, value)
                }),
            InfoVendor::Metronix => line
                .split_once('=')
                .map_or(false, |(key, value)| {
                    let key = key.trim().to_ascii_lowercase();
                    key.contains('.') && apply_dotted(record, &key, value)
                }),
            InfoVendor::Generic => line
                .split_once(':')
                .and_then(|(key, value)| {
                    generic_dotted(key.trim().to_ascii_lowercase().as_str())
                        .map(|dotted| (dotted, value))
                })
                .map_or(false, |(dotted, value)| {
                    apply_dotted(record, dotted, value)
                }),
        };
        if !consumed {
            record.station.comments.push(line.to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Parse
// ---------------------------------------------------------------------------

pub fn parse(content: &str) -> Result<Record, FormatError> {
    let sections = split_sections(content);
    if !sections.iter().any(|s| s.name == "HEAD") {
        return Err(FormatError::MissingSection {
            format: FORMAT,
            section: "HEAD",
        });
    }

    let mut record = Record::new();
    let mut empty_sentinel = DEFAULT_EMPTY;
    let mut frequencies: Vec<f64> = Vec::new();
    let mut data_blocks: HashMap<String, Vec<f64>> = HashMap::new();

    for section in &sections {
        match section.name.as_str() {
            "HEAD" => {
                parse_head(&mut record, &section.body, &mut empty_sentinel)?;
            }
            "INFO" => parse_info(&mut record, &section.body),
            "DEFINEMEAS" => parse_definemeas(&mut record, &section.body),
            "HMEAS" => parse_hmeas(&mut record, &section.header_rest),
            "EMEAS" => parse_emeas(&mut record, &section.header_rest),
            "MTSECT" => {
                // Channel-id cross references; geometry already came from
                // DEFINEMEAS, so only the section id is of interest.
                for (key, value) in body_key_values(&section.body) {
                    if key == "SECTID" && record.station.id.is_empty() {
                        record.station.id = value;
                    }
                }
            }
            "FREQ" => {
                frequencies = parse_data_block(section)?;
            }
            "END" => break,
            name if is_data_block(name) => {
                let values = parse_data_block(section)?;
                data_blocks.insert(name.to_string(), values);
            }
            name if name.contains("VAR") || name.contains("ROT") => {
                log::warn!(
                    "edi: skipping {} block at line {} (variance/rotation data not carried)",
                    name,
                    section.line
                );
            }
            name => {
                log::warn!("edi: skipping unrecognized section {} at line {}", name, section.line);
            }
        }
    }

    if frequencies.is_empty() {
        return Err(FormatError::MissingSection {
            format: FORMAT,
            section: "FREQ",
        });
    }
    let n = frequencies.len();
    let periods: Vec<f64> = frequencies.iter().map(|f| 1.0 / f).collect();
    record.data.set_periods(periods).map_err(|e| FormatError::Malformed {
        format: FORMAT,
        line: 0,
        reason: e.to_string(),
    })?;

    let impedance = assemble_impedance(&data_blocks, n, empty_sentinel)?;
    let tipper = assemble_tipper(&data_blocks, n, empty_sentinel)?;
    if impedance.is_none() && tipper.is_none() {
        return Err(FormatError::MissingSection {
            format: FORMAT,
            section: "Z/T data blocks",
        });
    }
    if let Some(z) = impedance {
        record.data.set_impedance(z).map_err(shape_to_format)?;
    }
    if let Some(t) = tipper {
        record.data.set_tipper(t).map_err(shape_to_format)?;
    }
    Ok(record)
}

fn shape_to_format(e: crate::error::ShapeError) -> FormatError {
    FormatError::Malformed {
        format: FORMAT,
        line: 0,
        reason: e.to_string(),
    }
}

fn parse_head(
    record: &mut Record,
    body: &[String],
    empty_sentinel: &mut f64,
) -> Result<(), FormatError> {
    let pairs = body_key_values(body);
    let mut saw_dataid = false;
    for (key, value) in pairs {
        match key.as_str() {
            "DATAID" => {
                record.station.id = value;
                saw_dataid = true;
            }
            "ACQBY" => record.station.acquired_by = value,
            "FILEBY" => record.station.provenance = value,
            "ACQDATE" => record.primary_run_mut().time_period.start = value,
            "ENDDATE" => record.primary_run_mut().time_period.end = value,
            "LAT" => {
                if let Some(v) = parse_angle(&value) {
                    record.station.latitude = v;
                }
            }
            "LONG" | "LON" => {
                if let Some(v) = parse_angle(&value) {
                    record.station.longitude = v;
                }
            }
            "ELEV" => {
                if let Some(v) = parse_float(&value) {
                    record.station.elevation = v;
                }
            }
            "DECL" => {
                if let Some(v) = parse_float(&value) {
                    record.station.declination = v;
                }
            }
            "COUNTRY" => record.survey.country = value,
            "EMPTY" => {
                if let Some(v) = parse_float(&value) {
                    *empty_sentinel = v;
                }
            }
            "PROGNAME" | "PROGVERS" | "PROGDATE" | "FILEDATE" | "STDVERS" => {}
            other => {
                log::debug!("edi: ignoring HEAD key {other}");
            }
        }
    }
    if !saw_dataid {
        return Err(FormatError::MissingSection {
            format: FORMAT,
            section: "DATAID",
        });
    }
    Ok(())
}

fn parse_definemeas(record: &mut Record, body: &[String]) {
    for (key, value) in body_key_values(body) {
        match key.as_str() {
            // Reference coordinates back the HEAD values up.
            "REFLAT" => {
                if record.station.latitude == 0.0 {
                    if let Some(v) = parse_angle(&value) {
                        record.station.latitude = v;
                    }
                }
            }
            "REFLONG" | "REFLON" => {
                if record.station.longitude == 0.0 {
                    if let Some(v) = parse_angle(&value) {
                        record.station.longitude = v;
                    }
                }
            }
            "REFELEV" => {
                if record.station.elevation == 0.0 {
                    if let Some(v) = parse_float(&value) {
                        record.station.elevation = v;
                    }
                }
            }
            "UNITS" => {
                if !value.eq_ignore_ascii_case("m") {
                    log::warn!("edi: DEFINEMEAS UNITS={value}, positions kept as-is");
                }
            }
            "MAXCHAN" | "MAXRUN" | "MAXMEAS" | "REFTYPE" => {}
            other => log::debug!("edi: ignoring DEFINEMEAS key {other}"),
        }
    }
}

fn acqchan_number(value: &str) -> Option<u32> {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn parse_hmeas(record: &mut Record, header_rest: &str) {
    let mut geometry = PointGeometry::default();
    for (key, value) in key_values(header_rest) {
        match key.as_str() {
            "CHTYPE" => geometry.component = value.to_ascii_lowercase(),
            "X" => geometry.x = parse_float(&value).unwrap_or(0.0),
            "Y" => geometry.y = parse_float(&value).unwrap_or(0.0),
            "Z" => geometry.z = parse_float(&value).unwrap_or(0.0),
            "AZM" => geometry.azimuth = parse_float(&value).unwrap_or(0.0),
            "ACQCHAN" => geometry.channel_number = acqchan_number(&value),
            "ID" | "DIP" | "SENSOR" | "GAIN" | "FILTER" => {}
            other => log::debug!("edi: ignoring HMEAS attribute {other}"),
        }
    }
    if geometry.component.is_empty() {
        log::warn!("edi: HMEAS line without CHTYPE skipped");
        return;
    }
    let channel = mapper::magnetic_from_point(&geometry);
    record.primary_run_mut().add_channel(Channel::Magnetic(channel));
}

fn parse_emeas(record: &mut Record, header_rest: &str) {
    let mut geometry = DipoleGeometry::default();
    let mut azimuth: Option<f64> = None;
    for (key, value) in key_values(header_rest) {
        match key.as_str() {
            "CHTYPE" => geometry.component = value.to_ascii_lowercase(),
            "X" => geometry.x = parse_float(&value).unwrap_or(0.0),
            "Y" => geometry.y = parse_float(&value).unwrap_or(0.0),
            "Z" => geometry.z = parse_float(&value).unwrap_or(0.0),
            "X2" => geometry.x2 = parse_float(&value).unwrap_or(0.0),
            "Y2" => geometry.y2 = parse_float(&value).unwrap_or(0.0),
            "Z2" => geometry.z2 = parse_float(&value).unwrap_or(0.0),
            "AZM" => azimuth = parse_float(&value),
            "ACQCHAN" => geometry.channel_number = acqchan_number(&value),
            "ID" | "GAIN" | "FILTER" => {}
            other => log::debug!("edi: ignoring EMEAS attribute {other}"),
        }
    }
    if geometry.component.is_empty() {
        log::warn!("edi: EMEAS line without CHTYPE skipped");
        return;
    }
    geometry.azimuth = azimuth.unwrap_or_else(|| {
        let dx = geometry.x2 - geometry.x;
        let dy = geometry.y2 - geometry.y;
        if dx == 0.0 && dy == 0.0 {
            0.0
        } else {
            dy.atan2(dx).to_degrees()
        }
    });
    let channel = mapper::electric_from_dipole(&geometry);
    record.primary_run_mut().add_channel(Channel::Electric(channel));
}

const Z_BLOCKS: [&str; 8] = [
    "ZXXR", "ZXXI", "ZXYR", "ZXYI", "ZYXR", "ZYXI", "ZYYR", "ZYYI",
];
const T_BLOCKS: [&str; 4] = ["TXR.EXP", "TXI.EXP", "TYR.EXP", "TYI.EXP"];

fn is_data_block(name: &str) -> bool {
    Z_BLOCKS.contains(&name)
        || T_BLOCKS.contains(&name)
        || matches!(name, "TXR" | "TXI" | "TYR" | "TYI")
}

fn parse_data_block(section: &Section) -> Result<Vec<f64>, FormatError> {
    let mut values = Vec::new();
    for line in &section.body {
        for token in line.split_whitespace() {
            match parse_float(token) {
                Some(v) => values.push(v),
                None => {
                    return Err(FormatError::Malformed {
                        format: FORMAT,
                        line: section.line,
                        reason: format!("bad number '{token}' in {} block", section.name),
                    })
                }
            }
        }
    }
    // The `// n` count on the header line is advisory.
    if let Some(expected) = section
        .header_rest
        .split("//")
        .nth(1)
        .and_then(|s| s.trim().parse::<usize>().ok())
    {
        if expected != values.len() {
            log::warn!(
                "edi: {} header announces {} values, found {}",
                section.name,
                expected,
                values.len()
            );
        }
    }
    Ok(values)
}

fn decode(value: f64, sentinel: f64) -> f64 {
    if value.abs() >= sentinel.abs() * 0.999 {
        f64::NAN
    } else {
        value
    }
}

fn component_block<'a>(
    blocks: &'a HashMap<String, Vec<f64>>,
    names: &[&str],
) -> Option<&'a Vec<f64>> {
    names.iter().find_map(|n| blocks.get(*n))
}

fn assemble_impedance(
    blocks: &HashMap<String, Vec<f64>>,
    n: usize,
    sentinel: f64,
) -> Result<Option<Vec<ImpedanceMatrix>>, FormatError> {
    if !Z_BLOCKS.iter().any(|name| blocks.contains_key(*name)) {
        return Ok(None);
    }
    let mut stack = vec![[[nan_c64(); 2]; 2]; n];
    let layout: [(&str, &str, usize, usize); 4] = [
        ("ZXXR", "ZXXI", 0, 0),
        ("ZXYR", "ZXYI", 0, 1),
        ("ZYXR", "ZYXI", 1, 0),
        ("ZYYR", "ZYYI", 1, 1),
    ];
    for (re_name, im_name, row, col) in layout {
        let (Some(re), Some(im)) = (blocks.get(re_name), blocks.get(im_name)) else {
            continue;
        };
        check_block_len(re_name, re.len(), n)?;
        check_block_len(im_name, im.len(), n)?;
        for (i, entry) in stack.iter_mut().enumerate() {
            entry[row][col] =
                Complex64::new(decode(re[i], sentinel), decode(im[i], sentinel));
        }
    }
    Ok(Some(stack))
}

fn assemble_tipper(
    blocks: &HashMap<String, Vec<f64>>,
    n: usize,
    sentinel: f64,
) -> Result<Option<Vec<TipperRow>>, FormatError> {
    let tx_re = component_block(blocks, &["TXR.EXP", "TXR"]);
    let tx_im = component_block(blocks, &["TXI.EXP", "TXI"]);
    let ty_re = component_block(blocks, &["TYR.EXP", "TYR"]);
    let ty_im = component_block(blocks, &["TYI.EXP", "TYI"]);
    if tx_re.is_none() && ty_re.is_none() {
        return Ok(None);
    }
    let mut stack = vec![[nan_c64(); 2]; n];
    if let (Some(re), Some(im)) = (tx_re, tx_im) {
        check_block_len("TXR", re.len(), n)?;
        check_block_len("TXI", im.len(), n)?;
        for (i, entry) in stack.iter_mut().enumerate() {
            entry[0] = Complex64::new(decode(re[i], sentinel), decode(im[i], sentinel));
        }
    }
    if let (Some(re), Some(im)) = (ty_re, ty_im) {
        check_block_len("TYR", re.len(), n)?;
        check_block_len("TYI", im.len(), n)?;
        for (i, entry) in stack.iter_mut().enumerate() {
            entry[1] = Complex64::new(decode(re[i], sentinel), decode(im[i], sentinel));
        }
    }
    Ok(Some(stack))
}

fn check_block_len(name: &str, got: usize, expected: usize) -> Result<(), FormatError> {
    if got != expected {
        return Err(FormatError::Malformed {
            format: FORMAT,
            line: 0,
            reason: format!("{name} block has {got} values, FREQ has {expected}"),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Serialize
// ---------------------------------------------------------------------------

/// Canonical channel order for measurement tables and ids.
const CHANNEL_ORDER: [&str; 5] = ["hx", "hy", "hz", "ex", "ey"];

fn measurement_id(index: usize) -> String {
    format!("{}.001", 1001 + index)
}

pub fn serialize(record: &Record) -> Result<String, FormatError> {
    let mut out = String::new();

    // ---- HEAD ----
    out.push_str(">HEAD\n");
    push_kv(&mut out, "DATAID", &record.station.id);
    push_kv(&mut out, "ACQBY", &record.station.acquired_by);
    let fileby = if record.station.provenance.is_empty() {
        "mt-transfer"
    } else {
        &record.station.provenance
    };
    push_kv(&mut out, "FILEBY", fileby);
    if let Some(run) = record.runs.first() {
        if !run.time_period.start.is_empty() {
            push_kv(&mut out, "ACQDATE", &run.time_period.start);
        }
        if !run.time_period.end.is_empty() {
            push_kv(&mut out, "ENDDATE", &run.time_period.end);
        }
    }
    push_kv(&mut out, "LAT", &format!("{:.6}", record.station.latitude));
    push_kv(&mut out, "LONG", &format!("{:.6}", record.station.longitude));
    push_kv(&mut out, "ELEV", &format!("{:.3}", record.station.elevation));
    push_kv(&mut out, "DECL", &format!("{:.3}", record.station.declination));
    if !record.survey.country.is_empty() {
        push_kv(&mut out, "COUNTRY", &record.survey.country);
    }
    push_kv(&mut out, "EMPTY", &fortran_e(DEFAULT_EMPTY, 1));
    push_kv(&mut out, "PROGNAME", "mt-transfer");
    push_kv(&mut out, "PROGVERS", env!("CARGO_PKG_VERSION"));

    // ---- INFO ----
    out.push_str("\n>INFO\n");
    push_kv(&mut out, "MAXINFO", "999");
    for comment in &record.station.comments {
        out.push_str("    ");
        out.push_str(comment);
        out.push('\n');
    }

    // ---- DEFINEMEAS ----
    let channels: Vec<&Channel> = record
        .runs
        .first()
        .map(|run| {
            CHANNEL_ORDER
                .iter()
                .filter_map(|c| run.channel(c))
                .collect()
        })
        .unwrap_or_default();
    out.push_str("\n>=DEFINEMEAS\n");
    push_kv(&mut out, "MAXCHAN", &channels.len().max(1).to_string());
    push_kv(&mut out, "MAXRUN", "999");
    push_kv(&mut out, "MAXMEAS", &channels.len().max(1).to_string());
    push_kv(&mut out, "UNITS", "M");
    push_kv(&mut out, "REFTYPE", "CART");
    push_kv(&mut out, "REFLAT", &format!("{:.6}", record.station.latitude));
    push_kv(&mut out, "REFLONG", &format!("{:.6}", record.station.longitude));
    push_kv(&mut out, "REFELEV", &format!("{:.3}", record.station.elevation));
    out.push('\n');
    for (i, channel) in channels.iter().enumerate() {
        let id = measurement_id(i);
        let chtype = mapper::format_component(channel.component(), ComponentCase::Upper);
        let acqchan = channel
            .channel_number()
            .map_or_else(|| format!("CH{}", i + 1), |n| format!("CH{n}"));
        match channel {
            Channel::Magnetic(m) => {
                let g = mapper::point_geometry(m);
                out.push_str(&format!(
                    ">HMEAS ID={id} CHTYPE={chtype} X={:.3} Y={:.3} Z={:.3} AZM={:.3} ACQCHAN={acqchan}\n",
                    g.x, g.y, g.z, g.azimuth
                ));
            }
            Channel::Electric(e) => {
                let g = mapper::dipole_geometry(e);
                out.push_str(&format!(
                    ">EMEAS ID={id} CHTYPE={chtype} X={:.3} Y={:.3} Z={:.3} X2={:.3} Y2={:.3} Z2={:.3} ACQCHAN={acqchan}\n",
                    g.x, g.y, g.z, g.x2, g.y2, g.z2
                ));
            }
        }
    }

    // ---- MTSECT ----
    out.push_str("\n>=MTSECT\n");
    let sectid = if record.station.id.is_empty() {
        "0"
    } else {
        &record.station.id
    };
    push_kv(&mut out, "SECTID", sectid);
    push_kv(&mut out, "NFREQ", &record.data.n_periods().to_string());
    for (i, channel) in channels.iter().enumerate() {
        let key = mapper::format_component(channel.component(), ComponentCase::Upper);
        push_kv(&mut out, &key, &measurement_id(i));
    }

    // ---- Data blocks ----
    let n = record.data.n_periods();
    let frequencies: Vec<f64> = record.data.periods().iter().map(|p| 1.0 / p).collect();
    push_data_block(&mut out, "FREQ", &frequencies, n);

    if let Some(z) = record.data.impedance() {
        let layout: [(&str, &str, usize, usize); 4] = [
            ("ZXXR", "ZXXI", 0, 0),
            ("ZXYR", "ZXYI", 0, 1),
            ("ZYXR", "ZYXI", 1, 0),
            ("ZYYR", "ZYYI", 1, 1),
        ];
        for (re_name, im_name, row, col) in layout {
            let re: Vec<f64> = z.iter().map(|m| encode(m[row][col].re)).collect();
            let im: Vec<f64> = z.iter().map(|m| encode(m[row][col].im)).collect();
            push_data_block(&mut out, re_name, &re, n);
            push_data_block(&mut out, im_name, &im, n);
        }
    }
    if let Some(t) = record.data.tipper() {
        let layout: [(&str, &str, usize); 2] =
            [("TXR.EXP", "TXI.EXP", 0), ("TYR.EXP", "TYI.EXP", 1)];
        for (re_name, im_name, col) in layout {
            let re: Vec<f64> = t.iter().map(|row| encode(row[col].re)).collect();
            let im: Vec<f64> = t.iter().map(|row| encode(row[col].im)).collect();
            push_data_block(&mut out, re_name, &re, n);
            push_data_block(&mut out, im_name, &im, n);
        }
    }

    out.push_str("\n>END\n");
    Ok(out)
}

fn encode(value: f64) -> f64 {
    if value.is_nan() {
        DEFAULT_EMPTY
    } else {
        value
    }
}

fn push_kv(out: &mut String, key: &str, value: &str) {
    out.push_str("    ");
    out.push_str(key);
    out.push('=');
    out.push_str(value);
    out.push('\n');
}

fn push_data_block(out: &mut String, name: &str, values: &[f64], count: usize) {
    out.push_str(&format!("\n>{name} // {count}\n"));
    for chunk in values.chunks(5) {
        for value in chunk {
            out.push_str(&format!("{:>15}", fortran_e(*value, 6)));
        }
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#">HEAD
    DATAID=mt01
    ACQBY=ACME
    FILEBY=processing-lab
    ACQDATE=2020-06-01
    LAT=40:30:00
    LONG=-116.500000
    ELEV=1200.000
    EMPTY=1.0E+32

>INFO
    MAXINFO=999
    PHOENIX GEOPHYSICS
    EX LEN: 100.0 M
    EY LEN: 96.0 M
    SITE PICKED BY FIELD CREW

>=DEFINEMEAS
    MAXCHAN=5
    UNITS=M
    REFLAT=40:30:00
    REFLONG=-116:30:00
    REFELEV=1200.000

>HMEAS ID=1001.001 CHTYPE=HX X=0.0 Y=0.0 Z=0.0 AZM=0.0 ACQCHAN=CH1
>HMEAS ID=1002.001 CHTYPE=HY X=0.0 Y=0.0 Z=0.0 AZM=90.0 ACQCHAN=CH2
>EMEAS ID=1004.001 CHTYPE=EX X=-50.0 Y=0.0 Z=0.0 X2=50.0 Y2=0.0 Z2=0.0 ACQCHAN=CH4

>=MTSECT
    SECTID=mt01
    NFREQ=2
    HX=1001.001
    HY=1002.001
    EX=1004.001

>FREQ // 2
   1.000000E+00   1.000000E-01

>ZXXR // 2
   1.000000E-01   2.000000E-01
>ZXXI // 2
  -1.000000E-02  -2.000000E-02
>ZXYR // 2
   1.100000E+00   2.100000E+00
>ZXYI // 2
   1.200000E-01   1.000000E+32
>ZYXR // 2
  -1.300000E+00  -2.300000E+00
>ZYXI // 2
  -1.400000E-01  -2.400000E-01
>ZYYR // 2
   5.000000E-02   6.000000E-02
>ZYYI // 2
   7.000000E-03   8.000000E-03

>END
"#;

    #[test]
    fn parses_head_and_geometry() {
        let record = parse(SAMPLE).unwrap();
        assert_eq!(record.station.id, "mt01");
        assert_eq!(record.station.acquired_by, "ACME");
        assert_eq!(record.station.latitude, 40.5);
        assert_eq!(record.station.longitude, -116.5);

        let run = &record.runs[0];
        assert_eq!(run.channel("hy").unwrap().orientation(), 90.0);
        match run.channel("ex").unwrap() {
            Channel::Electric(e) => {
                assert_eq!(e.x, Some(-50.0));
                assert_eq!(e.x2, Some(50.0));
                assert_eq!(e.dipole_length(), 100.0);
            }
            other => panic!("expected electric ex, got {other:?}"),
        }
    }

    #[test]
    fn info_vendor_lines_become_metadata_and_comments() {
        let record = parse(SAMPLE).unwrap();
        // EY LEN had no EMEAS line, so the info-derived terminals survive.
        match record.runs[0].channel("ey").unwrap() {
            Channel::Electric(e) => assert_eq!(e.dipole_length(), 96.0),
            other => panic!("expected electric ey, got {other:?}"),
        }
        // Unrecognized prose is preserved verbatim.
        assert!(record
            .station
            .comments
            .iter()
            .any(|c| c == "SITE PICKED BY FIELD CREW"));
        assert!(record
            .station
            .comments
            .iter()
            .any(|c| c == "PHOENIX GEOPHYSICS"));
    }

    #[test]
    fn frequencies_become_periods_and_sentinel_becomes_nan() {
        let record = parse(SAMPLE).unwrap();
        assert_eq!(record.data.periods(), &[1.0, 10.0]);
        let z = record.data.impedance().unwrap();
        assert_eq!(z[0][0][0].re, 0.1);
        assert!(z[1][0][1].im.is_nan());
    }

    #[test]
    fn missing_head_is_a_format_error() {
        let err = parse(">FREQ // 1\n 1.0\n").unwrap_err();
        assert!(matches!(
            err,
            FormatError::MissingSection { section: "HEAD", .. }
        ));
    }

    #[test]
    fn missing_freq_is_a_format_error() {
        let err = parse(">HEAD\n DATAID=x\n>END\n").unwrap_err();
        assert!(matches!(
            err,
            FormatError::MissingSection { section: "FREQ", .. }
        ));
    }

    #[test]
    fn serialize_is_idempotent() {
        let record = parse(SAMPLE).unwrap();
        let once = serialize(&record).unwrap();
        let twice = serialize(&record).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn round_trip_preserves_values() {
        let record = parse(SAMPLE).unwrap();
        let text = serialize(&record).unwrap();
        let back = parse(&text).unwrap();
        assert_eq!(back.station.id, record.station.id);
        assert_eq!(back.data.periods(), record.data.periods());
        let (z0, z1) = (
            record.data.impedance().unwrap(),
            back.data.impedance().unwrap(),
        );
        for (a, b) in z0.iter().zip(z1.iter()) {
            for row in 0..2 {
                for col in 0..2 {
                    let (x, y) = (a[row][col], b[row][col]);
                    // Each scalar part independently: the EMPTY sentinel can
                    // blank one part while the other stays finite.
                    if x.re.is_nan() {
                        assert!(y.re.is_nan());
                    } else {
                        assert!((x.re - y.re).abs() < 1e-9);
                    }
                    if x.im.is_nan() {
                        assert!(y.im.is_nan());
                    } else {
                        assert!((x.im - y.im).abs() < 1e-9);
                    }
                }
            }
        }
        // Vendor prose survives the trip.
        assert!(back
            .station
            .comments
            .iter()
            .any(|c| c == "SITE PICKED BY FIELD CREW"));
    }

    #[test]
    fn key_values_tolerates_spaces_around_equals() {
        let pairs = key_values("ID = 1001.001  CHTYPE =HX X= 0.0");
        assert_eq!(pairs[0], ("ID".to_string(), "1001.001".to_string()));
        assert_eq!(pairs[1], ("CHTYPE".to_string(), "HX".to_string()));
        assert_eq!(pairs[2], ("X".to_string(), "0.0".to_string()));
    }

    #[test]
    fn colon_angles() {
        assert_eq!(parse_angle("40:30:00"), Some(40.5));
        assert_eq!(parse_angle("-116:30:00"), Some(-116.5));
        assert_eq!(parse_angle("12.25"), Some(12.25));
    }
}
