//! ZMM (EMTF Z-file) adapter.
//!
//! Text header (description, `station`, `coordinate`, channel counts), a
//! channel table (`n  azimuth  tilt  station  component`), then one record
//! per period: a `period :` line followed by three titled fixed-width
//! blocks — transfer functions, inverse coherent signal power and residual
//! covariance — whose row/column counts are known a priori from the channel
//! table. The covariance-family blocks pack the Hermitian lower triangle.

use std::path::Path;

use num_complex::Complex64;

use crate::error::FormatError;
use crate::metadata::channel::{Channel, ElectricChannel, MagneticChannel};
use crate::record::Record;
use crate::tensor::{nan_c64, ImpedanceMatrix, SquareMatrix, TipperRow};

use super::{fortran_e, parse_float};

const FORMAT: &str = "zmm";

pub fn sniff(path: &Path, content: &str) -> bool {
    if super::Format::from_extension(path) == Some(super::Format::Zmm) {
        return true;
    }
    content
        .lines()
        .take(12)
        .any(|line| line.to_ascii_lowercase().contains("number of channels"))
}

// ---------------------------------------------------------------------------
// Parse
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PeriodRecord {
    period: f64,
    sample_rate: Option<f64>,
    /// nout rows × 2 inputs, row order = output-channel table order.
    transfer: Vec<[Complex64; 2]>,
    inverse_signal_power: Option<SquareMatrix>,
    residual_covariance: Option<SquareMatrix>,
}

fn malformed(line: usize, reason: String) -> FormatError {
    FormatError::Malformed {
        format: FORMAT,
        line,
        reason,
    }
}

/// Read `need` reals, consuming whole lines from the iterator.
fn read_reals<'a, I>(lines: &mut I, need: usize, at: usize) -> Result<Vec<f64>, FormatError>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    let mut values = Vec::with_capacity(need);
    while values.len() < need {
        let Some((i, line)) = lines.next() else {
            return Err(malformed(at, format!("expected {need} values, file ended early")));
        };
        for token in line.split_whitespace() {
            match parse_float(token) {
                Some(v) => values.push(v),
                None => return Err(malformed(i + 1, format!("bad number '{token}'"))),
            }
        }
    }
    if values.len() > need {
        return Err(malformed(at, format!("expected {need} values, found {}", values.len())));
    }
    Ok(values)
}

fn to_complex(reals: &[f64]) -> Vec<Complex64> {
    reals
        .chunks(2)
        .map(|pair| Complex64::new(pair[0], pair[1]))
        .collect()
}

/// Unpack a Hermitian lower triangle (row i holds i+1 complex values) into
/// a full matrix, mirroring with conjugation.
fn unpack_hermitian(values: &[Complex64], dim: usize) -> SquareMatrix {
    let mut matrix = SquareMatrix::filled(dim, nan_c64());
    let mut k = 0;
    for i in 0..dim {
        for j in 0..=i {
            matrix.set(i, j, values[k]);
            matrix.set(j, i, values[k].conj());
            k += 1;
        }
    }
    matrix
}

/// First float after the `:` of a `period :` line.
fn period_value(line: &str) -> Option<f64> {
    let rest = line.split_once(':')?.1;
    rest.split_whitespace().find_map(parse_float)
}

pub fn parse(content: &str) -> Result<Record, FormatError> {
    let mut record = Record::new();
    let mut nch = 0usize;
    let mut channels: Vec<(usize, f64, String)> = Vec::new(); // (number, azimuth, component)
    let mut lines = content.lines().enumerate().peekable();

    // ---- Header up to and including the channel table ----
    while let Some(&(i, raw)) = lines.peek() {
        let line = raw.trim();
        let lower = line.to_ascii_lowercase();
        if lower.starts_with("period") && lower.contains(':') {
            break;
        }
        lines.next();
        if line.is_empty() || line.contains("****") {
            continue;
        }
        if lower.starts_with("station") && line.contains(':') {
            record.station.id = line.split_once(':').map_or("", |(_, v)| v.trim()).to_string();
        } else if lower.starts_with("coordinate") {
            let values: Vec<f64> = line.split_whitespace().filter_map(parse_float).collect();
            if values.len() >= 2 {
                record.station.latitude = values[0];
                record.station.longitude = values[1];
            }
            if let Some(&decl) = values.get(2) {
                record.station.declination = decl;
            }
        } else if lower.contains("number of channels") {
            let counts: Vec<usize> = line
                .split_whitespace()
                .filter_map(|t| t.parse().ok())
                .collect();
            nch = *counts.first().ok_or_else(|| {
                malformed(i + 1, "unreadable channel count".to_string())
            })?;
        } else if lower.contains("orientations") {
            // Channel table follows, one line per channel.
            for _ in 0..nch {
                let Some((j, row)) = lines.next() else {
                    return Err(malformed(i + 1, format!("channel table needs {nch} rows")));
                };
                let tokens: Vec<&str> = row.split_whitespace().collect();
                if tokens.len() < 4 {
                    return Err(malformed(j + 1, format!("bad channel table row '{}'", row.trim())));
                }
                let number: usize = tokens[0].parse().map_err(|_| {
                    malformed(j + 1, format!("bad channel number '{}'", tokens[0]))
                })?;
                let azimuth = parse_float(tokens[1]).unwrap_or(0.0);
                let component = tokens[tokens.len() - 1].to_ascii_lowercase();
                channels.push((number, azimuth, component));
            }
        } else if nch == 0 {
            if record.station.id.is_empty() && line.split_whitespace().count() == 1 {
                record.station.id = line.to_string();
            } else if record.station.provenance.is_empty() {
                record.station.provenance = line.to_string();
            } else {
                record.station.comments.push(line.to_string());
            }
        } else {
            log::warn!("zmm: skipping header line {}: '{line}'", i + 1);
        }
    }

    if channels.is_empty() {
        return Err(FormatError::MissingSection {
            format: FORMAT,
            section: "channel table",
        });
    }
    let outputs: Vec<String> = channels.iter().skip(2).map(|(_, _, c)| c.clone()).collect();
    let nout = outputs.len();
    for &(number, azimuth, ref component) in &channels {
        let channel = if component.starts_with('e') {
            let mut e = ElectricChannel::new(component);
            e.channel_number = Some(number as u32);
            e.measurement_azimuth = azimuth;
            Channel::Electric(e)
        } else {
            let mut m = MagneticChannel::new(component);
            m.channel_number = Some(number as u32);
            m.measurement_azimuth = azimuth;
            Channel::Magnetic(m)
        };
        record.primary_run_mut().add_channel(channel);
    }

    // ---- Period records ----
    let mut records: Vec<PeriodRecord> = Vec::new();
    while let Some((i, raw)) = lines.next() {
        let line = raw.trim();
        let lower = line.to_ascii_lowercase();
        if line.is_empty() {
            continue;
        }
        if lower.starts_with("period") && lower.contains(':') {
            let period = period_value(line)
                .ok_or_else(|| malformed(i + 1, format!("unreadable period line '{line}'")))?;
            records.push(PeriodRecord {
                period,
                ..Default::default()
            });
        } else if lower.contains("number of data point") || lower.contains("sampling freq") {
            let Some(current) = records.last_mut() else { continue };
            let values: Vec<f64> = line.split_whitespace().filter_map(parse_float).collect();
            if let Some(&rate) = values.get(1) {
                current.sample_rate = Some(rate);
            }
        } else if lower.contains("transfer functions") {
            if records.is_empty() {
                return Err(malformed(i + 1, "data block before any period line".to_string()));
            }
            let reals = read_reals(&mut lines, nout * 4, i + 1)?;
            let complex = to_complex(&reals);
            if let Some(current) = records.last_mut() {
                current.transfer = complex.chunks(2).map(|pair| [pair[0], pair[1]]).collect();
            }
        } else if lower.contains("inverse coherent signal power") {
            let reals = read_reals(&mut lines, 6, i + 1)?;
            if let Some(current) = records.last_mut() {
                current.inverse_signal_power = Some(unpack_hermitian(&to_complex(&reals), 2));
            }
        } else if lower.contains("residual covariance") {
            let reals = read_reals(&mut lines, nout * (nout + 1), i + 1)?;
            if let Some(current) = records.last_mut() {
                current.residual_covariance = Some(unpack_hermitian(&to_complex(&reals), nout));
            }
        } else {
            log::warn!("zmm: skipping line {}: '{line}'", i + 1);
        }
    }

    records.retain(|r| {
        if r.transfer.len() == nout {
            true
        } else {
            log::warn!(
                "zmm: dropping incomplete record at period {} ({} of {nout} rows)",
                r.period,
                r.transfer.len()
            );
            false
        }
    });
    if records.is_empty() {
        return Err(FormatError::MissingSection {
            format: FORMAT,
            section: "period records",
        });
    }

    if let Some(rate) = records.iter().find_map(|r| r.sample_rate) {
        record.primary_run_mut().sample_rate = Some(rate);
    }
    assemble(&mut record, &outputs, &records)?;
    Ok(record)
}

fn assemble(
    record: &mut Record,
    outputs: &[String],
    records: &[PeriodRecord],
) -> Result<(), FormatError> {
    let n = records.len();
    let shape_err = |e: crate::error::ShapeError| malformed(0, e.to_string());
    record
        .data
        .set_periods(records.iter().map(|r| r.period).collect())
        .map_err(shape_err)?;

    let has_z = outputs.iter().any(|c| c == "ex" || c == "ey");
    let has_t = outputs.iter().any(|c| c == "hz");
    if has_z {
        let mut stack: Vec<ImpedanceMatrix> = vec![[[nan_c64(); 2]; 2]; n];
        for (entry, rec) in stack.iter_mut().zip(records) {
            for (row, component) in outputs.iter().enumerate() {
                let target = match component.as_str() {
                    "ex" => 0,
                    "ey" => 1,
                    _ => continue,
                };
                entry[target] = rec.transfer[row];
            }
        }
        record.data.set_impedance(stack).map_err(shape_err)?;
    }
    if has_t {
        let mut stack: Vec<TipperRow> = vec![[nan_c64(); 2]; n];
        for (entry, rec) in stack.iter_mut().zip(records) {
            for (row, component) in outputs.iter().enumerate() {
                if component == "hz" {
                    *entry = rec.transfer[row];
                }
            }
        }
        record.data.set_tipper(stack).map_err(shape_err)?;
    }
    let isp: Vec<SquareMatrix> = records
        .iter()
        .filter_map(|r| r.inverse_signal_power.clone())
        .collect();
    if isp.len() == n {
        record.data.set_inverse_signal_power(isp).map_err(shape_err)?;
    } else if !isp.is_empty() {
        log::warn!("zmm: inverse signal power missing for some periods, dropped");
    }
    let cov: Vec<SquareMatrix> = records
        .iter()
        .filter_map(|r| r.residual_covariance.clone())
        .collect();
    if cov.len() == n {
        record.data.set_residual_covariance(cov).map_err(shape_err)?;
    } else if !cov.is_empty() {
        log::warn!("zmm: residual covariance missing for some periods, dropped");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Serialize
// ---------------------------------------------------------------------------

/// Channel order on write: inputs, then hz / ex / ey as present.
fn output_components(record: &Record) -> Vec<&'static str> {
    let mut outputs = Vec::new();
    if record.data.has_tipper() {
        outputs.push("hz");
    }
    if record.data.has_impedance() {
        outputs.push("ex");
        outputs.push("ey");
    }
    outputs
}

fn channel_azimuth(record: &Record, component: &str, default: f64) -> f64 {
    record
        .runs
        .first()
        .and_then(|run| run.channel(component))
        .map_or(default, |ch| ch.orientation())
}

fn push_complex_row(out: &mut String, values: &[Complex64]) {
    for v in values {
        out.push_str(&format!(" {:>12} {:>12}", fortran_e(v.re, 4), fortran_e(v.im, 4)));
    }
    out.push('\n');
}

pub fn serialize(record: &Record) -> Result<String, FormatError> {
    let outputs = output_components(record);
    let mut out = String::new();
    out.push_str(" **** IMPEDANCE IN MEASUREMENT COORDINATES ****\n");
    out.push_str(" ********** WITH FULL ERROR COVARIANCE **********\n");
    if record.station.provenance.is_empty() {
        out.push_str(&format!("written by mt-transfer {}\n", env!("CARGO_PKG_VERSION")));
    } else {
        out.push_str(&record.station.provenance);
        out.push('\n');
    }
    let station = if record.station.id.is_empty() {
        "unkn"
    } else {
        &record.station.id
    };
    out.push_str(&format!("station    :{station}\n"));
    out.push_str(&format!(
        "coordinate {:>9.3} {:>9.3} declination {:>8.2}\n",
        record.station.latitude, record.station.longitude, record.station.declination
    ));
    let n = record.data.n_periods();
    out.push_str(&format!(
        "number of channels {:>3}   number of frequencies {:>4}\n",
        outputs.len() + 2,
        n
    ));
    out.push_str(" orientations and tilts of each channel\n");
    let defaults = [("hx", 0.0), ("hy", 90.0), ("hz", 0.0), ("ex", 0.0), ("ey", 90.0)];
    let mut table: Vec<&str> = vec!["hx", "hy"];
    table.extend(&outputs);
    for (i, component) in table.iter().enumerate() {
        let default = defaults
            .iter()
            .find(|(c, _)| c == component)
            .map_or(0.0, |(_, a)| *a);
        let azimuth = channel_azimuth(record, component, default);
        out.push_str(&format!(
            "{:>5} {:>8.2} {:>8.2} {:<8} {}\n",
            i + 1,
            azimuth,
            0.0,
            station,
            component
        ));
    }
    out.push('\n');

    let sample_rate = record.runs.first().and_then(|run| run.sample_rate);
    for (i, &period) in record.data.periods().iter().enumerate() {
        out.push_str(&format!(
            "period : {:>12}    decimation level {:>3}    freq. band from {:>4} to {:>4}\n",
            fortran_e(period, 6),
            1,
            i + 1,
            i + 1
        ));
        if let Some(rate) = sample_rate {
            out.push_str(&format!(
                "number of data point {:>6} sampling freq. {:>8.3} Hz\n",
                0, rate
            ));
        }
        out.push_str(" Transfer Functions\n");
        for component in &outputs {
            let row: [Complex64; 2] = match *component {
                "hz" => record.data.tipper().map_or([nan_c64(); 2], |t| t[i]),
                "ex" => record.data.impedance().map_or([nan_c64(); 2], |z| z[i][0]),
                "ey" => record.data.impedance().map_or([nan_c64(); 2], |z| z[i][1]),
                _ => [nan_c64(); 2],
            };
            push_complex_row(&mut out, &row);
        }
        if let Some(isp) = record.data.inverse_signal_power() {
            if isp[i].dim() == 2 {
                out.push_str(" Inverse Coherent Signal Power Matrix\n");
                for row in 0..isp[i].dim() {
                    let values: Vec<Complex64> =
                        (0..=row).map(|col| isp[i].get(row, col)).collect();
                    push_complex_row(&mut out, &values);
                }
            } else {
                log::warn!(
                    "zmm: inverse signal power dimension {} does not match 2 input channels, block omitted",
                    isp[i].dim()
                );
            }
        }
        if let Some(rc) = record.data.residual_covariance() {
            if rc[i].dim() == outputs.len() {
                out.push_str(" Residual Covariance\n");
                for row in 0..rc[i].dim() {
                    let values: Vec<Complex64> =
                        (0..=row).map(|col| rc[i].get(row, col)).collect();
                    push_complex_row(&mut out, &values);
                }
            } else {
                log::warn!(
                    "zmm: residual covariance dimension {} does not match {} output channels, block omitted",
                    rc[i].dim(),
                    outputs.len()
                );
            }
        }
    }
    Ok(out)
}
