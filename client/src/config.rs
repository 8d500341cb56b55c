//! Client-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen; alle Felder haben
//! Standardwerte. Die Jitter-Parameter gehoeren hierher, weil die
//! jitter-absorbierende Empfangs-Pipeline im Client lebt – aus ihnen
//! wird beim Verbinden die Mixer-Konfiguration gebaut.

use serde::{Deserialize, Serialize};

use funkraum_core::konstanten;
use funkraum_voice::jitter_buffer::JitterConfig;

/// Vollstaendige Client-Konfiguration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Allgemeine Einstellungen
    pub client: ClientEinstellungen,
    /// Jitter-Parameter der Empfangs-Pipeline
    pub jitter: JitterEinstellungen,
}

/// Allgemeine Client-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientEinstellungen {
    /// Anzeigename
    pub name: String,
}

impl Default for ClientEinstellungen {
    fn default() -> Self {
        Self {
            name: "Gast".into(),
        }
    }
}

/// Jitter-Parameter (Ziel/Min/Max-Verzoegerung, Slot-Anzahl)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterEinstellungen {
    /// Ziel-Verzoegerung in Millisekunden (Aufwaerm-Schranke)
    pub ziel_ms: u32,
    /// Minimale Verzoegerung in Millisekunden
    pub min_ms: u32,
    /// Maximale Verzoegerung in Millisekunden
    pub max_ms: u32,
    /// Anzahl der Slots pro Stream
    pub slots: usize,
}

impl Default for JitterEinstellungen {
    fn default() -> Self {
        Self {
            ziel_ms: konstanten::JITTER_ZIEL_MS,
            min_ms: konstanten::JITTER_MIN_MS,
            max_ms: konstanten::JITTER_MAX_MS,
            slots: konstanten::JITTER_SLOTS,
        }
    }
}

impl JitterEinstellungen {
    /// Baut die Konfiguration der per-Stream Jitter Buffer
    pub fn als_jitter_config(&self) -> JitterConfig {
        JitterConfig {
            ziel_ms: self.ziel_ms,
            min_ms: self.min_ms,
            max_ms: self.max_ms,
            slots: self.slots,
        }
    }
}

impl ClientConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }
}
