//! Conversion between canonical channels and the geometry shapes the file
//! formats speak: a single point for magnetic sensors, two terminals for
//! electric dipoles. Coordinates crossing this boundary are always written
//! out in full, with missing values normalized to 0.0.

use super::channel::{ElectricChannel, MagneticChannel};

// ---------------------------------------------------------------------------
// Adapter-native geometry
// ---------------------------------------------------------------------------

/// Single-point sensor position as formats carry it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointGeometry {
    pub component: String,
    pub azimuth: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub channel_number: Option<u32>,
}

/// Dipole terminal pair as formats carry it: primary fields hold the
/// negative terminal, secondary fields the positive one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DipoleGeometry {
    pub component: String,
    pub azimuth: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub x2: f64,
    pub y2: f64,
    pub z2: f64,
    pub channel_number: Option<u32>,
}

impl DipoleGeometry {
    pub fn length(&self) -> f64 {
        let dx = self.x2 - self.x;
        let dy = self.y2 - self.y;
        let dz = self.z2 - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

// ---------------------------------------------------------------------------
// Canonical → adapter
// ---------------------------------------------------------------------------

pub fn point_geometry(ch: &MagneticChannel) -> PointGeometry {
    PointGeometry {
        component: ch.component.clone(),
        azimuth: ch.orientation(),
        x: ch.x.unwrap_or(0.0),
        y: ch.y.unwrap_or(0.0),
        z: ch.z.unwrap_or(0.0),
        channel_number: ch.channel_number,
    }
}

pub fn dipole_geometry(ch: &ElectricChannel) -> DipoleGeometry {
    DipoleGeometry {
        component: ch.component.clone(),
        azimuth: ch.orientation(),
        x: ch.x.unwrap_or(0.0),
        y: ch.y.unwrap_or(0.0),
        z: ch.z.unwrap_or(0.0),
        x2: ch.x2.unwrap_or(0.0),
        y2: ch.y2.unwrap_or(0.0),
        z2: ch.z2.unwrap_or(0.0),
        channel_number: ch.channel_number,
    }
}

// ---------------------------------------------------------------------------
// Adapter → canonical
// ---------------------------------------------------------------------------

/// Every coordinate comes back `Some`; anything a format left out arrives
/// here already defaulted to 0.0 and stays explicit in the channel.
pub fn magnetic_from_point(g: &PointGeometry) -> MagneticChannel {
    let mut ch = MagneticChannel::new(&g.component);
    ch.measurement_azimuth = g.azimuth;
    ch.x = Some(g.x);
    ch.y = Some(g.y);
    ch.z = Some(g.z);
    ch.channel_number = g.channel_number;
    ch
}

pub fn electric_from_dipole(g: &DipoleGeometry) -> ElectricChannel {
    let mut ch = ElectricChannel::new(&g.component);
    ch.measurement_azimuth = g.azimuth;
    ch.x = Some(g.x);
    ch.y = Some(g.y);
    ch.z = Some(g.z);
    ch.x2 = Some(g.x2);
    ch.y2 = Some(g.y2);
    ch.z2 = Some(g.z2);
    ch.channel_number = g.channel_number;
    ch
}

// ---------------------------------------------------------------------------
// Component name casing per target format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentCase {
    /// `EX`, `HZ` — EDI measurement tables.
    Upper,
    /// `Ex`, `Hz` — EMTFXML channel names.
    Pascal,
    /// `ex`, `hz` — ZMM channel tables and the canonical form.
    Lower,
}

pub fn format_component(component: &str, case: ComponentCase) -> String {
    match case {
        ComponentCase::Upper => component.to_ascii_uppercase(),
        ComponentCase::Lower => component.to_ascii_lowercase(),
        ComponentCase::Pascal => {
            let lower = component.to_ascii_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magnetic_missing_coordinates_default_to_zero() {
        let ch = MagneticChannel::new("hx");
        let g = point_geometry(&ch);
        assert_eq!((g.x, g.y, g.z), (0.0, 0.0, 0.0));
    }

    #[test]
    fn electric_terminals_default_independently() {
        let mut ch = ElectricChannel::new("ex");
        ch.x = Some(-25.0);
        ch.y2 = Some(75.0);
        let g = dipole_geometry(&ch);
        assert_eq!((g.x, g.y, g.z), (-25.0, 0.0, 0.0));
        assert_eq!((g.x2, g.y2, g.z2), (0.0, 75.0, 0.0));
    }

    #[test]
    fn orientation_preference_survives_mapping() {
        let mut ch = MagneticChannel::new("hy");
        ch.measurement_azimuth = 88.0;
        ch.translated_azimuth = Some(90.0);
        assert_eq!(point_geometry(&ch).azimuth, 90.0);
    }

    #[test]
    fn round_trip_keeps_coordinates_explicit() {
        let mut ch = ElectricChannel::new("ey");
        ch.y = Some(-40.0);
        ch.y2 = Some(40.0);
        let back = electric_from_dipole(&dipole_geometry(&ch));
        assert_eq!(back.x, Some(0.0));
        assert_eq!(back.y, Some(-40.0));
        assert_eq!(back.y2, Some(40.0));
        assert_eq!(back.dipole_length(), 80.0);
    }

    #[test]
    fn component_casing() {
        assert_eq!(format_component("ex", ComponentCase::Upper), "EX");
        assert_eq!(format_component("EX", ComponentCase::Pascal), "Ex");
        assert_eq!(format_component("Hz", ComponentCase::Lower), "hz");
    }
}
