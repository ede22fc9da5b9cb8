//! Metadata layer: canonical Survey/Station/Run/Channel entities and the
//! mapper between them and adapter-native channel geometry.
//!
//! Architecture:
//! ```text
//!   Survey ── owns ──▶ Station ── owns ──▶ Run ── owns ──▶ Channel
//!                                                            │
//!                                                            ▼
//!   ┌────────┐   point / dipole geometry   ┌───────────────────┐
//!   │ mapper  │ ◀───────────────────────▶ │ format adapters    │
//!   └────────┘   (0.0-defaulted coords)    └───────────────────┘
//! ```
pub mod channel;
pub mod mapper;
pub mod run;
pub mod station;
pub mod survey;

pub use channel::{Channel, ElectricChannel, MagneticChannel};
pub use run::{Run, TimePeriod};
pub use station::Station;
pub use survey::Survey;
