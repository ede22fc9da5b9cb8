use crate::metadata::{Run, Station, Survey};
use crate::tensor::TensorStore;

// ---------------------------------------------------------------------------
// Record – one complete canonical transfer-function record
// ---------------------------------------------------------------------------

/// Everything one station's transfer-function file unifies to: the
/// period-indexed tensors plus the Survey/Station/Run metadata tree.
///
/// A record is created empty, populated wholesale by one format adapter's
/// `parse`, then mutated field-by-field through the [`crate::tf::TF`]
/// facade.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub survey: Survey,
    pub station: Station,
    pub runs: Vec<Run>,
    pub data: TensorStore,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// The run a single-run format's channels belong to, created on first
    /// use with `<station id>a` naming.
    pub fn primary_run_mut(&mut self) -> &mut Run {
        if self.runs.is_empty() {
            let id = if self.station.id.is_empty() {
                "a".to_string()
            } else {
                format!("{}a", self.station.id)
            };
            self.runs.push(Run::new(&id));
        }
        &mut self.runs[0]
    }
}
