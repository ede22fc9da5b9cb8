use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Station – identity and location of one measurement site
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    /// Decimal degrees, north positive.
    pub latitude: f64,
    /// Decimal degrees, east positive.
    pub longitude: f64,
    /// Meters above sea level.
    pub elevation: f64,
    /// Magnetic declination at the site, degrees.
    pub declination: f64,
    pub acquired_by: String,
    /// Free text identifying the producing software / processing chain.
    pub provenance: String,
    /// Verbatim vendor prose and other non-structured notes, in file order.
    pub comments: Vec<String>,
}

impl Station {
    pub fn new(id: &str) -> Self {
        Station {
            id: id.to_string(),
            ..Default::default()
        }
    }
}
