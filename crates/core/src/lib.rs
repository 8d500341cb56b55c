//! funkraum-core – Gemeinsame Typen, Konstanten und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Funkraum-Crates gemeinsam genutzt werden.

pub mod error;
pub mod konstanten;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{FunkraumError, Result};
pub use types::{ClientId, ServerId, Ssrc};
