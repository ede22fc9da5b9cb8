//! Convert one transfer-function file into another format.
//!
//! Usage: `tfconvert <input> <output> [format]`
//!
//! The input format is sniffed; the output format comes from the third
//! argument or, when omitted, from the output file's extension.

use std::path::Path;

use anyhow::{bail, Context, Result};

use mt_transfer::{Format, TF};

fn format_by_name(name: &str) -> Option<Format> {
    Format::ALL
        .into_iter()
        .find(|f| f.name().eq_ignore_ascii_case(name) || f.extension().eq_ignore_ascii_case(name))
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (input, output) = match (args.first(), args.get(1)) {
        (Some(input), Some(output)) => (Path::new(input), Path::new(output)),
        _ => bail!("usage: tfconvert <input> <output> [format]"),
    };
    let format = match args.get(2) {
        Some(name) => {
            format_by_name(name).with_context(|| format!("unknown format '{name}'"))?
        }
        None => Format::from_extension(output).with_context(|| {
            format!(
                "cannot tell the output format from '{}'; pass it explicitly",
                output.display()
            )
        })?,
    };

    let tf = TF::read(input).with_context(|| format!("reading {}", input.display()))?;
    log::info!(
        "{}: {} periods, impedance: {}, tipper: {}",
        tf.station().id,
        tf.n_periods(),
        tf.has_impedance(),
        tf.has_tipper()
    );
    tf.write(output, format)
        .with_context(|| format!("writing {}", output.display()))?;
    Ok(())
}
