use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Channel – one measured field component
// ---------------------------------------------------------------------------

/// A magnetic field channel measured at a single point.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MagneticChannel {
    /// Canonical lowercase component name: `hx`, `hy` or `hz`.
    pub component: String,
    pub channel_number: Option<u32>,
    /// Azimuth as laid out in the field, degrees east of north.
    pub measurement_azimuth: f64,
    /// Azimuth after any coordinate rotation applied in processing.
    /// When present it is the authoritative orientation.
    pub translated_azimuth: Option<f64>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl MagneticChannel {
    pub fn new(component: &str) -> Self {
        MagneticChannel {
            component: component.to_ascii_lowercase(),
            ..Default::default()
        }
    }

    /// The single authoritative azimuth: `translated_azimuth` if present,
    /// else `measurement_azimuth`.
    pub fn orientation(&self) -> f64 {
        self.translated_azimuth.unwrap_or(self.measurement_azimuth)
    }
}

/// An electric field channel: a grounded dipole defined by its negative
/// terminal (x, y, z) and positive terminal (x2, y2, z2).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ElectricChannel {
    /// Canonical lowercase component name: `ex` or `ey`.
    pub component: String,
    pub channel_number: Option<u32>,
    pub measurement_azimuth: f64,
    pub translated_azimuth: Option<f64>,
    /// Negative terminal.
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    /// Positive terminal.
    pub x2: Option<f64>,
    pub y2: Option<f64>,
    pub z2: Option<f64>,
}

impl ElectricChannel {
    pub fn new(component: &str) -> Self {
        ElectricChannel {
            component: component.to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn orientation(&self) -> f64 {
        self.translated_azimuth.unwrap_or(self.measurement_azimuth)
    }

    /// Distance between the two terminals, recomputed on every call.
    /// There is deliberately no way to set this independently of the
    /// terminal positions.
    pub fn dipole_length(&self) -> f64 {
        let dx = self.x2.unwrap_or(0.0) - self.x.unwrap_or(0.0);
        let dy = self.y2.unwrap_or(0.0) - self.y.unwrap_or(0.0);
        let dz = self.z2.unwrap_or(0.0) - self.z.unwrap_or(0.0);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Either kind of measured channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Channel {
    Magnetic(MagneticChannel),
    Electric(ElectricChannel),
}

impl Channel {
    pub fn component(&self) -> &str {
        match self {
            Channel::Magnetic(m) => &m.component,
            Channel::Electric(e) => &e.component,
        }
    }

    pub fn channel_number(&self) -> Option<u32> {
        match self {
            Channel::Magnetic(m) => m.channel_number,
            Channel::Electric(e) => e.channel_number,
        }
    }

    pub fn orientation(&self) -> f64 {
        match self {
            Channel::Magnetic(m) => m.orientation(),
            Channel::Electric(e) => e.orientation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orientation_prefers_translated_azimuth() {
        let mut ch = MagneticChannel::new("hx");
        ch.measurement_azimuth = 3.0;
        assert_eq!(ch.orientation(), 3.0);
        ch.translated_azimuth = Some(0.0);
        assert_eq!(ch.orientation(), 0.0);
    }

    #[test]
    fn dipole_length_tracks_terminal_mutation() {
        let mut ex = ElectricChannel::new("ex");
        ex.x = Some(-50.0);
        ex.x2 = Some(50.0);
        assert_eq!(ex.dipole_length(), 100.0);

        ex.x2 = Some(-50.0);
        ex.y2 = Some(30.0);
        ex.z2 = Some(40.0);
        assert_eq!(ex.dipole_length(), 50.0);
    }

    #[test]
    fn dipole_length_defaults_missing_coordinates_to_zero() {
        let mut ex = ElectricChannel::new("ex");
        ex.x2 = Some(3.0);
        ex.y2 = Some(4.0);
        assert_eq!(ex.dipole_length(), 5.0);
    }

    #[test]
    fn component_names_are_lowercased() {
        assert_eq!(MagneticChannel::new("HX").component, "hx");
        assert_eq!(ElectricChannel::new("Ex").component, "ex");
    }

    #[test]
    fn channel_serializes_to_json() {
        let ch = Channel::Magnetic(MagneticChannel::new("hz"));
        let json = serde_json::to_string(&ch).unwrap();
        let back: Channel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ch);
    }
}
