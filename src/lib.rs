//! Magnetotelluric transfer-function exchange.
//!
//! Five on-disk text formats — EDI, BIRRP J-files, ZMM, EMTFXML and Zonge
//! AVG — are parsed into one canonical period-indexed record (impedance,
//! tipper, inverse signal power and residual covariance tensors plus
//! Survey/Station/Run/Channel metadata) and written back out in any of
//! them. Two records covering different period ranges can be merged into
//! one continuous record.
//!
//! ```no_run
//! use std::path::Path;
//! use mt_transfer::{Format, TF};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tf = TF::read(Path::new("site.edi"))?;
//! println!("{} periods", tf.n_periods());
//! tf.write(Path::new("site.xml"), Format::EmtfXml)?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod formats;
pub mod metadata;
pub mod record;
pub mod tensor;
pub mod tf;

pub use error::{FormatError, ShapeError, TfError};
pub use formats::Format;
pub use record::Record;
pub use tensor::{ImpedanceMatrix, SquareMatrix, TensorStore, TipperRow};
pub use tf::{MergeOperand, PeriodBounds, TF};
