//! funkraum-audio – Capture-seitige Audio-Verarbeitung
//!
//! - [`dsp`] – Frame-Analyse (RMS, Nulldurchgangsrate) und das
//!   Attack/Release-geglaettete Noise Gate vor dem Encoder
//! - [`schleife`] – Aufnahme-Schleife: Quelle -> Gate -> Encoder -> Netz
//!
//! Die OS-Geraetebindung (Mikrofon/Lautsprecher) liegt ausserhalb dieses
//! Workspaces; sie implementiert die Traits [`schleife::CaptureQuelle`]
//! bzw. [`schleife::WiedergabeSenke`].

pub mod dsp;
pub mod schleife;

pub use dsp::{AudioAnalyse, DspConfig, DspGate};
pub use schleife::{AufnahmeSchleife, CaptureQuelle, WiedergabeSenke};
