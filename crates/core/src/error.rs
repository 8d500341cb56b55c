//! Fehlertypen fuer Funkraum
//!
//! Zentraler Fehler-Enum der alle moeglichen Fehlerzustaende abdeckt.
//! Untermodule koennen eigene Fehler definieren und via `#[from]` konvertieren.

use thiserror::Error;

/// Globaler Result-Alias fuer Funkraum
pub type Result<T> = std::result::Result<T, FunkraumError>;

/// Alle moeglichen Fehler im Funkraum-System
#[derive(Debug, Error)]
pub enum FunkraumError {
    // --- Verbindung & Netzwerk ---
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Verbindung getrennt: {0}")]
    Getrennt(String),

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    // --- Protokoll ---
    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    #[error("Protokollversion nicht unterstuetzt: erwartet={erwartet:#06x}, erhalten={erhalten:#06x}")]
    ProtokollVersion { erwartet: u16, erhalten: u16 },

    // --- Sitzung ---
    #[error("Server voll: maximale Teilnehmerzahl erreicht")]
    ServerVoll,

    #[error("Ungueltiger Sitzungszustand: {0}")]
    Sitzungszustand(String),

    #[error("Teilnehmer nicht gefunden: {0}")]
    TeilnehmerNichtGefunden(String),

    // --- Audio ---
    #[error("Audiofehler: {0}")]
    Audio(String),

    #[error("Codec-Fehler: {0}")]
    Codec(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl FunkraumError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler wiederholbar sein koennte
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(
            self,
            Self::Zeitlimit(_) | Self::Verbindung(_) | Self::Getrennt(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = FunkraumError::Verbindung("Server nicht erreichbar".into());
        assert_eq!(
            e.to_string(),
            "Verbindung fehlgeschlagen: Server nicht erreichbar"
        );
    }

    #[test]
    fn wiederholbar_erkennung() {
        assert!(FunkraumError::Zeitlimit("test".into()).ist_wiederholbar());
        assert!(!FunkraumError::ServerVoll.ist_wiederholbar());
    }

    #[test]
    fn protokoll_version_fehler() {
        let e = FunkraumError::ProtokollVersion {
            erwartet: 0x0200,
            erhalten: 0x0100,
        };
        assert!(e.to_string().contains("0x0200"));
        assert!(e.to_string().contains("0x0100"));
    }
}
