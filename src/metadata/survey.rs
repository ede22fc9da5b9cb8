use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Survey – the campaign a station belongs to
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Survey {
    pub id: String,
    pub name: String,
    pub country: String,
    pub acquired_by: String,
    pub summary: String,
}

impl Survey {
    pub fn new(id: &str) -> Self {
        Survey {
            id: id.to_string(),
            ..Default::default()
        }
    }
}
