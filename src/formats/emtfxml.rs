//! EMTFXML adapter.
//!
//! Nested XML (`EM_TF` root) carrying site identity and location, per-run
//! field notes, processing and remote-reference info, statistical-estimate
//! descriptors, the channel layout (`SiteLayout`, the one required element)
//! and per-period complex data (`Z`, `T`, `INVSIGCOV`, `RESIDCOV`). Absent
//! optional elements yield empty defaults, never errors. Serialization
//! emits positions and orientations with fixed 3-decimal formatting.
//!
//! `StatisticalEstimates` and `DataTypes` descriptors have no canonical
//! slot: parse skips them and serialization always emits the standard
//! boilerplate lists, so custom descriptors do not round-trip.

use std::path::Path;

use num_complex::Complex64;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::FormatError;
use crate::metadata::channel::Channel;
use crate::metadata::mapper::{self, ComponentCase, DipoleGeometry, PointGeometry};
use crate::metadata::Run;
use crate::record::Record;
use crate::tensor::{nan_c64, ImpedanceMatrix, SquareMatrix, TipperRow};

const FORMAT: &str = "emtfxml";

pub fn sniff(path: &Path, content: &str) -> bool {
    if super::Format::from_extension(path) == Some(super::Format::EmtfXml) {
        return true;
    }
    content
        .lines()
        .take(5)
        .any(|line| line.contains("<EM_TF"))
}

// ---------------------------------------------------------------------------
// Event-built element tree
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children
            .iter()
            .filter(move |c| c.name.eq_ignore_ascii_case(name))
    }

    fn text_of(&self, name: &str) -> &str {
        self.child(name).map_or("", |c| c.text.trim())
    }

    fn float_of(&self, name: &str) -> Option<f64> {
        self.text_of(name).parse().ok()
    }
}

fn xml_err(reason: String) -> FormatError {
    FormatError::Malformed {
        format: FORMAT,
        line: 0,
        reason,
    }
}

/// Build the whole document tree; returns the root element.
fn build_tree(content: &str) -> Result<Element, FormatError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    loop {
        match reader.read_event().map_err(|e| xml_err(e.to_string()))? {
            Event::Start(start) => {
                let mut element = Element {
                    name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
                    ..Default::default()
                };
                for attr in start.attributes() {
                    let attr = attr.map_err(|e| xml_err(e.to_string()))?;
                    let value = attr.unescape_value().map_err(|e| xml_err(e.to_string()))?;
                    element.attrs.push((
                        String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                        value.into_owned(),
                    ));
                }
                stack.push(element);
            }
            Event::Empty(start) => {
                let mut element = Element {
                    name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
                    ..Default::default()
                };
                for attr in start.attributes() {
                    let attr = attr.map_err(|e| xml_err(e.to_string()))?;
                    let value = attr.unescape_value().map_err(|e| xml_err(e.to_string()))?;
                    element.attrs.push((
                        String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                        value.into_owned(),
                    ));
                }
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(|e| xml_err(e.to_string()))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(_) => {
                let Some(done) = stack.pop() else {
                    return Err(xml_err("unbalanced closing tag".to_string()));
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(done),
                    None => root = Some(done),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    root.ok_or_else(|| xml_err("no root element".to_string()))
}

// ---------------------------------------------------------------------------
// Parse
// ---------------------------------------------------------------------------

/// Input-channel column for a data value's `input` attribute.
fn input_index(name: &str) -> Option<usize> {
    match name.to_ascii_lowercase().as_str() {
        "hx" => Some(0),
        "hy" => Some(1),
        _ => None,
    }
}

pub fn parse(content: &str) -> Result<Record, FormatError> {
    let root = build_tree(content)?;
    let mut record = Record::new();

    record.survey.summary = root.text_of("Description").to_string();
    record.survey.id = root.text_of("ProductId").to_string();
    let notes = root.text_of("Notes");
    if !notes.is_empty() {
        record.station.comments.push(notes.to_string());
    }

    if let Some(site) = root.child("Site") {
        record.station.id = site.text_of("Id").to_string();
        record.survey.name = site.text_of("Name").to_string();
        record.station.acquired_by = site.text_of("AcquiredBy").to_string();
        if let Some(location) = site.child("Location") {
            record.station.latitude = location.float_of("Latitude").unwrap_or(0.0);
            record.station.longitude = location.float_of("Longitude").unwrap_or(0.0);
            record.station.elevation = location.float_of("Elevation").unwrap_or(0.0);
            record.station.declination = location.float_of("Declination").unwrap_or(0.0);
        }
        for id in site.text_of("RunList").split_whitespace() {
            record.runs.push(Run::new(id));
        }
    }

    for notes in root.children_named("FieldNotes") {
        let id = notes.attr("run").unwrap_or("").to_string();
        let index = match record.runs.iter().position(|r| r.id == id) {
            Some(i) => i,
            None => {
                record.runs.push(Run::new(&id));
                record.runs.len() - 1
            }
        };
        let run = &mut record.runs[index];
        run.sample_rate = notes.float_of("SamplingRate");
        run.time_period.start = notes.text_of("Start").to_string();
        run.time_period.end = notes.text_of("End").to_string();
        if let Some(instrument) = notes.child("Instrument") {
            let id = instrument.text_of("Id");
            run.data_logger = if id.is_empty() {
                instrument.text.trim().to_string()
            } else {
                id.to_string()
            };
        }
    }

    if let Some(info) = root.child("ProcessingInfo") {
        if let Some(software) = info.child("ProcessingSoftware") {
            record.station.provenance = software.text_of("Name").to_string();
        }
        let processed_by = info.text_of("ProcessedBy");
        if !processed_by.is_empty() {
            record.station.comments.push(format!("processed_by: {processed_by}"));
        }
        if let Some(remote) = info.child("RemoteRef") {
            if let Some(kind) = remote.attr("type") {
                record.station.comments.push(format!("remote_ref: {kind}"));
            }
        }
        if let Some(remote_site) = info.child("RemoteInfo").and_then(|r| r.child("Site")) {
            let id = remote_site.text_of("Id");
            if !id.is_empty() {
                record.station.comments.push(format!("remote_site: {id}"));
            }
        }
    }

    // Descriptor lists are declarative boilerplate; the canonical model
    // derives them from which tensors are present.
    if root.child("StatisticalEstimates").is_some() {
        log::debug!("emtfxml: statistical estimate descriptors not carried");
    }
    if root.child("DataTypes").is_some() {
        log::debug!("emtfxml: data type descriptors not carried");
    }

    // ---- SiteLayout (required) ----
    let layout = root.child("SiteLayout").ok_or(FormatError::MissingSection {
        format: FORMAT,
        section: "SiteLayout",
    })?;
    let mut outputs: Vec<String> = Vec::new();
    for (group, is_output) in [("InputChannels", false), ("OutputChannels", true)] {
        let Some(group) = layout.child(group) else { continue };
        for channel in &group.children {
            let name = channel.attr("name").unwrap_or("").to_ascii_lowercase();
            if name.is_empty() {
                log::warn!("emtfxml: channel element without a name skipped");
                continue;
            }
            if is_output {
                outputs.push(name.clone());
            }
            let get = |attr: &str| {
                channel
                    .attr(attr)
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(0.0)
            };
            let mapped = if channel.name.eq_ignore_ascii_case("Electric") {
                let geometry = DipoleGeometry {
                    component: name,
                    azimuth: get("orientation"),
                    x: get("x"),
                    y: get("y"),
                    z: get("z"),
                    x2: get("x2"),
                    y2: get("y2"),
                    z2: get("z2"),
                    channel_number: None,
                };
                Channel::Electric(mapper::electric_from_dipole(&geometry))
            } else {
                let geometry = PointGeometry {
                    component: name,
                    azimuth: get("orientation"),
                    x: get("x"),
                    y: get("y"),
                    z: get("z"),
                    channel_number: None,
                };
                Channel::Magnetic(mapper::magnetic_from_point(&geometry))
            };
            record.primary_run_mut().add_channel(mapped);
        }
    }
    if record.runs.first().map_or(true, |run| run.channels().is_empty()) {
        return Err(FormatError::MissingSection {
            format: FORMAT,
            section: "SiteLayout",
        });
    }

    // ---- Data ----
    if let Some(data) = root.child("Data") {
        parse_data(&mut record, data, &outputs)?;
    }
    Ok(record)
}

/// `re im` pair inside one `<value>` element.
fn complex_text(text: &str) -> Option<Complex64> {
    let mut parts = text.split_whitespace();
    let re: f64 = parts.next()?.parse().ok()?;
    let im: f64 = parts.next()?.parse().ok()?;
    Some(Complex64::new(re, im))
}

fn parse_data(
    record: &mut Record,
    data: &Element,
    outputs: &[String],
) -> Result<(), FormatError> {
    let out_index = |name: &str| -> Option<usize> {
        let lower = name.to_ascii_lowercase();
        outputs.iter().position(|o| *o == lower)
    };
    let nout = outputs.len().max(1);

    let periods: Vec<&Element> = data.children_named("Period").collect();
    let values: Result<Vec<f64>, FormatError> = periods
        .iter()
        .map(|p| {
            p.attr("value")
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| xml_err("Period element without a numeric value".to_string()))
        })
        .collect();
    let n = periods.len();
    record
        .data
        .set_periods(values?)
        .map_err(|e| xml_err(e.to_string()))?;

    let mut impedance: Option<Vec<ImpedanceMatrix>> = None;
    let mut tipper: Option<Vec<TipperRow>> = None;
    let mut isp: Option<Vec<SquareMatrix>> = None;
    let mut rc: Option<Vec<SquareMatrix>> = None;

    for (i, period) in periods.iter().enumerate() {
        if let Some(z) = period.child("Z") {
            let stack = impedance.get_or_insert_with(|| vec![[[nan_c64(); 2]; 2]; n]);
            for value in z.children_named("value") {
                let (Some(row), Some(col)) = (
                    value.attr("output").map(|o| match o.to_ascii_lowercase().as_str() {
                        "ex" => Some(0),
                        "ey" => Some(1),
                        _ => None,
                    }).unwrap_or(None),
                    value.attr("input").and_then(input_index),
                ) else {
                    log::warn!("emtfxml: Z value with unknown channel pair skipped");
                    continue;
                };
                if let Some(v) = complex_text(&value.text) {
                    stack[i][row][col] = v;
                }
            }
        }
        if let Some(t) = period.child("T") {
            let stack = tipper.get_or_insert_with(|| vec![[nan_c64(); 2]; n]);
            for value in t.children_named("value") {
                let Some(col) = value.attr("input").and_then(input_index) else {
                    log::warn!("emtfxml: T value with unknown input channel skipped");
                    continue;
                };
                if let Some(v) = complex_text(&value.text) {
                    stack[i][col] = v;
                }
            }
        }
        if let Some(cov) = period.child("INVSIGCOV") {
            let stack =
                isp.get_or_insert_with(|| vec![SquareMatrix::filled(2, nan_c64()); n]);
            for value in cov.children_named("value") {
                let (Some(row), Some(col)) = (
                    value.attr("output").and_then(input_index),
                    value.attr("input").and_then(input_index),
                ) else {
                    log::warn!("emtfxml: INVSIGCOV value with unknown channel pair skipped");
                    continue;
                };
                if let Some(v) = complex_text(&value.text) {
                    stack[i].set(row, col, v);
                }
            }
        }
        if let Some(cov) = period.child("RESIDCOV") {
            let stack =
                rc.get_or_insert_with(|| vec![SquareMatrix::filled(nout, nan_c64()); n]);
            for value in cov.children_named("value") {
                let (Some(row), Some(col)) = (
                    value.attr("output").and_then(&out_index),
                    value.attr("input").and_then(&out_index),
                ) else {
                    log::warn!("emtfxml: RESIDCOV value with unknown channel pair skipped");
                    continue;
                };
                if let Some(v) = complex_text(&value.text) {
                    stack[i].set(row, col, v);
                }
            }
        }
    }

    let shape_err = |e: crate::error::ShapeError| xml_err(e.to_string());
    if let Some(stack) = impedance {
        record.data.set_impedance(stack).map_err(shape_err)?;
    }
    if let Some(stack) = tipper {
        record.data.set_tipper(stack).map_err(shape_err)?;
    }
    if let Some(stack) = isp {
        record.data.set_inverse_signal_power(stack).map_err(shape_err)?;
    }
    if let Some(stack) = rc {
        record.data.set_residual_covariance(stack).map_err(shape_err)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Serialize
// ---------------------------------------------------------------------------

fn esc(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn push_text_element(out: &mut String, indent: usize, name: &str, text: &str) {
    if text.is_empty() {
        return;
    }
    out.push_str(&format!(
        "{:indent$}<{name}>{}</{name}>\n",
        "",
        esc(text),
        indent = indent
    ));
}

struct Descriptor {
    name: &'static str,
    description: &'static str,
    tag: &'static str,
}

const ESTIMATES: [Descriptor; 2] = [
    Descriptor {
        name: "INVSIGCOV",
        description: "Inverse Coherent Signal Power Matrix",
        tag: "inverse_signal_covariance",
    },
    Descriptor {
        name: "RESIDCOV",
        description: "Residual Covariance (N x N)",
        tag: "residual_covariance",
    },
];

/// Output-channel components on write, tipper first.
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

fn push_channel(out: &mut String, record: &Record, component: &str, default_azimuth: f64) {
    let name = mapper::format_component(component, ComponentCase::Pascal);
    let channel = record.runs.first().and_then(|run| run.channel(component));
    match channel {
        Some(Channel::Electric(e)) => {
            let g = mapper::dipole_geometry(e);
            out.push_str(&format!(
                "      <Electric name=\"{name}\" orientation=\"{:.3}\" x=\"{:.3}\" y=\"{:.3}\" z=\"{:.3}\" x2=\"{:.3}\" y2=\"{:.3}\" z2=\"{:.3}\"/>\n",
                g.azimuth, g.x, g.y, g.z, g.x2, g.y2, g.z2
            ));
        }
        Some(Channel::Magnetic(m)) => {
            let g = mapper::point_geometry(m);
            out.push_str(&format!(
                "      <Magnetic name=\"{name}\" orientation=\"{:.3}\" x=\"{:.3}\" y=\"{:.3}\" z=\"{:.3}\"/>\n",
                g.azimuth, g.x, g.y, g.z
            ));
        }
        None if component.starts_with('e') => {
            out.push_str(&format!(
                "      <Electric name=\"{name}\" orientation=\"{default_azimuth:.3}\" x=\"0.000\" y=\"0.000\" z=\"0.000\" x2=\"0.000\" y2=\"0.000\" z2=\"0.000\"/>\n",
            ));
        }
        None => {
            out.push_str(&format!(
                "      <Magnetic name=\"{name}\" orientation=\"{default_azimuth:.3}\" x=\"0.000\" y=\"0.000\" z=\"0.000\"/>\n",
            ));
        }
    }
}

fn push_value(out: &mut String, input: &str, output: &str, v: Complex64) {
    out.push_str(&format!(
        "        <value input=\"{input}\" output=\"{output}\">{:.6e} {:.6e}</value>\n",
        v.re, v.im
    ));
}

pub fn serialize(record: &Record) -> Result<String, FormatError> {
    let outputs = output_components(record);
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<EM_TF>\n");
    push_text_element(&mut out, 2, "Description", &record.survey.summary);
    push_text_element(&mut out, 2, "ProductId", &record.survey.id);
    push_text_element(&mut out, 2, "SubType", "MT_TF");
    let mut tags: Vec<&str> = Vec::new();
    if record.data.has_impedance() {
        tags.push("impedance");
    }
    if record.data.has_tipper() {
        tags.push("tipper");
    }
    push_text_element(&mut out, 2, "Tags", &tags.join(","));

    // ---- Site ----
    out.push_str("  <Site>\n");
    push_text_element(&mut out, 4, "Id", &record.station.id);
    push_text_element(&mut out, 4, "Name", &record.survey.name);
    out.push_str("    <Location>\n");
    push_text_element(&mut out, 6, "Latitude", &format!("{:.3}", record.station.latitude));
    push_text_element(&mut out, 6, "Longitude", &format!("{:.3}", record.station.longitude));
    push_text_element(&mut out, 6, "Elevation", &format!("{:.3}", record.station.elevation));
    push_text_element(&mut out, 6, "Declination", &format!("{:.3}", record.station.declination));
    out.push_str("    </Location>\n");
    push_text_element(&mut out, 4, "AcquiredBy", &record.station.acquired_by);
    if let Some(run) = record.runs.first() {
        push_text_element(&mut out, 4, "Start", &run.time_period.start);
        push_text_element(&mut out, 4, "End", &run.time_period.end);
    }
    let run_list: Vec<&str> = record.runs.iter().map(|r| r.id.as_str()).collect();
    push_text_element(&mut out, 4, "RunList", &run_list.join(" "));
    out.push_str("  </Site>\n");

    // ---- FieldNotes, one element per run ----
    for run in &record.runs {
        out.push_str(&format!("  <FieldNotes run=\"{}\">\n", esc(&run.id)));
        if !run.data_logger.is_empty() {
            out.push_str("    <Instrument>\n");
            push_text_element(&mut out, 6, "Id", &run.data_logger);
            out.push_str("    </Instrument>\n");
        }
        if let Some(rate) = run.sample_rate {
            push_text_element(&mut out, 4, "SamplingRate", &format!("{rate}"));
        }
        push_text_element(&mut out, 4, "Start", &run.time_period.start);
        push_text_element(&mut out, 4, "End", &run.time_period.end);
        out.push_str("  </FieldNotes>\n");
    }

    // ---- ProcessingInfo ----
    let remote_ref = comment_value(record, "remote_ref");
    let remote_site = comment_value(record, "remote_site");
    let processed_by = comment_value(record, "processed_by");
    out.push_str("  <ProcessingInfo>\n");
    push_text_element(&mut out, 4, "ProcessedBy", processed_by.unwrap_or(""));
    if !record.station.provenance.is_empty() {
        out.push_str("    <ProcessingSoftware>\n");
        push_text_element(&mut out, 6, "Name", &record.station.provenance);
        out.push_str("    </ProcessingSoftware>\n");
    }
    if let Some(kind) = remote_ref {
        out.push_str(&format!("    <RemoteRef type=\"{}\"/>\n", esc(kind)));
    }
    if let Some(site) = remote_site {
        out.push_str("    <RemoteInfo>\n      <Site>\n");
        push_text_element(&mut out, 8, "Id", site);
        out.push_str("      </Site>\n    </RemoteInfo>\n");
    }
    out.push_str("  </ProcessingInfo>\n");

    // ---- Descriptor boilerplate ----
    out.push_str("  <StatisticalEstimates>\n");
    for estimate in &ESTIMATES {
        out.push_str(&format!(
            "    <Estimate name=\"{}\" type=\"complex\">\n",
            estimate.name
        ));
        push_text_element(&mut out, 6, "Description", estimate.description);
        push_text_element(&mut out, 6, "Tag", estimate.tag);
        out.push_str("    </Estimate>\n");
    }
    out.push_str("  </StatisticalEstimates>\n");
    out.push_str("  <DataTypes>\n");
    if record.data.has_impedance() {
        out.push_str("    <DataType name=\"Z\" type=\"complex\" output=\"E\" input=\"H\" units=\"[mV/km]/[nT]\">\n");
        push_text_element(&mut out, 6, "Description", "MT impedance");
        push_text_element(&mut out, 6, "Tag", "impedance");
        out.push_str("    </DataType>\n");
    }
    if record.data.has_tipper() {
        out.push_str("    <DataType name=\"T\" type=\"complex\" output=\"H\" input=\"H\" units=\"[]\">\n");
        push_text_element(&mut out, 6, "Description", "Vertical field transfer functions (tipper)");
        push_text_element(&mut out, 6, "Tag", "tipper");
        out.push_str("    </DataType>\n");
    }
    out.push_str("  </DataTypes>\n");

    // ---- SiteLayout ----
    out.push_str("  <SiteLayout>\n    <InputChannels ref=\"site\" units=\"m\">\n");
    push_channel(&mut out, record, "hx", 0.0);
    push_channel(&mut out, record, "hy", 90.0);
    out.push_str("    </InputChannels>\n    <OutputChannels ref=\"site\" units=\"m\">\n");
    for component in &outputs {
        let default = if *component == "ey" { 90.0 } else { 0.0 };
        push_channel(&mut out, record, component, default);
    }
    out.push_str("    </OutputChannels>\n  </SiteLayout>\n");

    // ---- Data ----
    let periods = record.data.periods();
    out.push_str(&format!("  <Data count=\"{}\">\n", periods.len()));
    let inputs = ["Hx", "Hy"];
    for (i, period) in periods.iter().enumerate() {
        out.push_str(&format!(
            "    <Period value=\"{:.6e}\" units=\"secs\">\n",
            period
        ));
        if let Some(z) = record.data.impedance() {
            out.push_str("      <Z type=\"complex\" size=\"[2 2]\" units=\"[mV/km]/[nT]\">\n");
            for (row, output) in ["Ex", "Ey"].iter().enumerate() {
                for (col, input) in inputs.iter().enumerate() {
                    push_value(&mut out, input, output, z[i][row][col]);
                }
            }
            out.push_str("      </Z>\n");
        }
        if let Some(t) = record.data.tipper() {
            out.push_str("      <T type=\"complex\" size=\"[1 2]\" units=\"[]\">\n");
            for (col, input) in inputs.iter().enumerate() {
                push_value(&mut out, input, "Hz", t[i][col]);
            }
            out.push_str("      </T>\n");
        }
        if let Some(isp) = record.data.inverse_signal_power() {
            if isp[i].dim() == inputs.len() {
                out.push_str("      <INVSIGCOV type=\"complex\" size=\"[2 2]\" units=\"[]\">\n");
                for (row, output) in inputs.iter().enumerate() {
                    for (col, input) in inputs.iter().enumerate() {
                        push_value(&mut out, input, output, isp[i].get(row, col));
                    }
                }
                out.push_str("      </INVSIGCOV>\n");
            } else {
                log::warn!(
                    "emtfxml: inverse signal power dimension {} does not match {} input channels, element omitted",
                    isp[i].dim(),
                    inputs.len()
                );
            }
        }
        if let Some(rc) = record.data.residual_covariance() {
            if rc[i].dim() == outputs.len() {
                out.push_str(&format!(
                    "      <RESIDCOV type=\"complex\" size=\"[{n} {n}]\" units=\"[]\">\n",
                    n = rc[i].dim()
                ));
                for (row, output) in outputs.iter().enumerate() {
                    for (col, input) in outputs.iter().enumerate() {
                        push_value(
                            &mut out,
                            &mapper::format_component(input, ComponentCase::Pascal),
                            &mapper::format_component(output, ComponentCase::Pascal),
                            rc[i].get(row, col),
                        );
                    }
                }
                out.push_str("      </RESIDCOV>\n");
            } else {
                log::warn!(
                    "emtfxml: residual covariance dimension {} does not match {} output channels, element omitted",
                    rc[i].dim(),
                    outputs.len()
                );
            }
        }
        out.push_str("    </Period>\n");
    }
    out.push_str("  </Data>\n");

    if let (Some(min), Some(max)) = (
        periods.iter().cloned().reduce(f64::min),
        periods.iter().cloned().reduce(f64::max),
    ) {
        out.push_str(&format!(
            "  <PeriodRange min=\"{min:.6e}\" max=\"{max:.6e}\"/>\n"
        ));
    }
    out.push_str("</EM_TF>\n");
    Ok(out)
}

fn comment_value<'a>(record: &'a Record, key: &str) -> Option<&'a str> {
    let prefix = format!("{key}: ");
    record
        .station
        .comments
        .iter()
        .find_map(|c| c.strip_prefix(&prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<EM_TF>
  <Description>Magnetotelluric Transfer Functions</Description>
  <ProductId>USGS.mt01.2020</ProductId>
  <Site>
    <Id>mt01</Id>
    <Name>Basin and Range</Name>
    <Location>
      <Latitude>40.500</Latitude>
      <Longitude>-116.500</Longitude>
      <Elevation>1200.000</Elevation>
      <Declination>12.000</Declination>
    </Location>
    <AcquiredBy>ACME</AcquiredBy>
    <RunList>mt01a mt01b</RunList>
  </Site>
  <FieldNotes run="mt01a">
    <Instrument><Id>ZEN-046</Id></Instrument>
    <SamplingRate>256</SamplingRate>
    <Start>2020-06-01T00:00:00</Start>
    <End>2020-06-02T00:00:00</End>
  </FieldNotes>
  <ProcessingInfo>
    <ProcessedBy>processing lab</ProcessedBy>
    <ProcessingSoftware><Name>EMTF</Name></ProcessingSoftware>
    <RemoteRef type="Robust Remote Reference"/>
    <RemoteInfo><Site><Id>rr02</Id></Site></RemoteInfo>
  </ProcessingInfo>
  <SiteLayout>
    <InputChannels ref="site" units="m">
      <Magnetic name="Hx" orientation="0.000" x="0.000" y="0.000" z="0.000"/>
      <Magnetic name="Hy" orientation="90.000" x="0.000" y="0.000" z="0.000"/>
    </InputChannels>
    <OutputChannels ref="site" units="m">
      <Magnetic name="Hz" orientation="0.000" x="0.000" y="0.000" z="0.000"/>
      <Electric name="Ex" orientation="0.000" x="-50.000" y="0.000" z="0.000" x2="50.000" y2="0.000" z2="0.000"/>
      <Electric name="Ey" orientation="90.000" x="0.000" y="-40.000" z="0.000" x2="0.000" y2="40.000" z2="0.000"/>
    </OutputChannels>
  </SiteLayout>
  <Data count="2">
    <Period value="1.024000e0" units="secs">
      <Z type="complex" size="[2 2]" units="[mV/km]/[nT]">
        <value input="Hx" output="Ex">2.498000e-1 -2.049000e-2</value>
        <value input="Hy" output="Ex">1.100000e0 1.200000e-1</value>
        <value input="Hx" output="Ey">-1.300000e0 -1.400000e-1</value>
        <value input="Hy" output="Ey">5.000000e-2 7.000000e-3</value>
      </Z>
      <T type="complex" size="[1 2]" units="[]">
        <value input="Hx" output="Hz">5.000000e-2 -3.000000e-2</value>
        <value input="Hy" output="Hz">6.000000e-2 -4.000000e-2</value>
      </T>
      <INVSIGCOV type="complex" size="[2 2]" units="[]">
        <value input="Hx" output="Hx">3.575000e-2 0.000000e0</value>
        <value input="Hx" output="Hy">-1.946000e-2 1.001000e-2</value>
        <value input="Hy" output="Hx">-1.946000e-2 -1.001000e-2</value>
        <value input="Hy" output="Hy">5.729000e-2 0.000000e0</value>
      </INVSIGCOV>
    </Period>
    <Period value="8.192000e0" units="secs">
      <Z type="complex" size="[2 2]" units="[mV/km]/[nT]">
        <value input="Hx" output="Ex">2.000000e-1 -1.000000e-2</value>
        <value input="Hy" output="Ex">9.000000e-1 1.000000e-1</value>
        <value input="Hx" output="Ey">-1.100000e0 -1.200000e-1</value>
        <value input="Hy" output="Ey">4.000000e-2 6.000000e-3</value>
      </Z>
      <T type="complex" size="[1 2]" units="[]">
        <value input="Hx" output="Hz">4.000000e-2 -2.000000e-2</value>
        <value input="Hy" output="Hz">5.000000e-2 -3.000000e-2</value>
      </T>
      <INVSIGCOV type="complex" size="[2 2]" units="[]">
        <value input="Hx" output="Hx">3.000000e-2 0.000000e0</value>
        <value input="Hx" output="Hy">-1.000000e-2 1.000000e-2</value>
        <value input="Hy" output="Hx">-1.000000e-2 -1.000000e-2</value>
        <value input="Hy" output="Hy">5.000000e-2 0.000000e0</value>
      </INVSIGCOV>
    </Period>
  </Data>
</EM_TF>
"#;

    #[test]
    fn parses_site_and_field_notes() {
        let record = parse(SAMPLE).unwrap();
        assert_eq!(record.station.id, "mt01");
        assert_eq!(record.survey.id, "USGS.mt01.2020");
        assert_eq!(record.station.latitude, 40.5);
        assert_eq!(record.station.provenance, "EMTF");
        assert_eq!(record.runs.len(), 2);
        assert_eq!(record.runs[0].sample_rate, Some(256.0));
        assert_eq!(record.runs[0].data_logger, "ZEN-046");
        // mt01b came from RunList with no field notes: empty defaults.
        assert_eq!(record.runs[1].id, "mt01b");
        assert_eq!(record.runs[1].sample_rate, None);
    }

    #[test]
    fn channel_layout_maps_to_canonical_channels() {
        let record = parse(SAMPLE).unwrap();
        let run = &record.runs[0];
        match run.channel("ex").unwrap() {
            Channel::Electric(e) => {
                assert_eq!(e.x, Some(-50.0));
                assert_eq!(e.x2, Some(50.0));
                assert_eq!(e.dipole_length(), 100.0);
            }
            other => panic!("expected electric ex, got {other:?}"),
        }
        assert_eq!(run.channel("hy").unwrap().orientation(), 90.0);
    }

    #[test]
    fn data_periods_and_tensors() {
        let record = parse(SAMPLE).unwrap();
        assert_eq!(record.data.periods(), &[1.024, 8.192]);
        let z = record.data.impedance().unwrap();
        assert_eq!(z[0][0][0], Complex64::new(0.2498, -0.02049));
        assert_eq!(z[1][1][1], Complex64::new(0.04, 0.006));
        let t = record.data.tipper().unwrap();
        assert_eq!(t[1][0], Complex64::new(0.04, -0.02));
        let isp = record.data.inverse_signal_power().unwrap();
        assert_eq!(isp[0].get(1, 0), Complex64::new(-0.01946, 0.01001));
        assert!(!record.data.has_residual_covariance());
    }

    #[test]
    fn missing_site_layout_is_a_format_error() {
        let text = "<EM_TF><Site><Id>x</Id></Site></EM_TF>";
        let err = parse(text).unwrap_err();
        assert!(matches!(
            err,
            FormatError::MissingSection { section: "SiteLayout", .. }
        ));
    }

    #[test]
    fn absent_optional_elements_yield_empty_defaults() {
        let text = r#"<EM_TF>
  <SiteLayout>
    <InputChannels>
      <Magnetic name="Hx" orientation="0.0" x="0.0" y="0.0" z="0.0"/>
    </InputChannels>
  </SiteLayout>
</EM_TF>"#;
        let record = parse(text).unwrap();
        assert_eq!(record.station.id, "");
        assert_eq!(record.survey.summary, "");
        assert_eq!(record.data.n_periods(), 0);
        assert!(!record.data.has_impedance());
    }

    #[test]
    fn serialize_is_idempotent() {
        let record = parse(SAMPLE).unwrap();
        assert_eq!(serialize(&record).unwrap(), serialize(&record).unwrap());
    }

    #[test]
    fn off_size_signal_power_element_is_omitted() {
        let mut record = Record::default();
        record.data.set_periods(vec![1.0]).unwrap();
        record
            .data
            .set_impedance(vec![[[Complex64::new(1.0, 0.0); 2]; 2]])
            .unwrap();
        record
            .data
            .set_inverse_signal_power(vec![SquareMatrix::filled(1, Complex64::new(0.5, 0.0))])
            .unwrap();
        let text = serialize(&record).unwrap();
        assert!(!text.contains("INVSIGCOV"));
        assert!(text.contains("<Z type="));
    }

    #[test]
    fn round_trip_holds_to_three_decimals_for_positions() {
        let record = parse(SAMPLE).unwrap();
        let back = parse(&serialize(&record).unwrap()).unwrap();
        assert_eq!(back.station.id, record.station.id);
        assert_eq!(back.station.latitude, record.station.latitude);
        match back.runs[0].channel("ey").unwrap() {
            Channel::Electric(e) => assert!((e.dipole_length() - 80.0).abs() < 1e-3),
            other => panic!("expected electric ey, got {other:?}"),
        }
        assert_eq!(back.data.periods(), record.data.periods());
        let (a, b) = (
            record.data.impedance().unwrap(),
            back.data.impedance().unwrap(),
        );
        for (x, y) in a.iter().zip(b.iter()) {
            for row in 0..2 {
                for col in 0..2 {
                    assert!((x[row][col].re - y[row][col].re).abs() < 1e-9);
                    assert!((x[row][col].im - y[row][col].im).abs() < 1e-9);
                }
            }
        }
        // Remote reference survives through the comment mapping.
        assert!(back
            .station
            .comments
            .iter()
            .any(|c| c == "remote_ref: Robust Remote Reference"));
    }
}
