//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use serde::{Deserialize, Serialize};

use funkraum_core::konstanten;
use funkraum_protocol::control::ParamUpdate;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Audio/Jitter-Einstellungen
    pub audio: AudioEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers
    pub name: String,
    /// Maximale Anzahl gleichzeitiger Teilnehmer
    pub max_peers: usize,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Funkraum Server".into(),
            max_peers: konstanten::MAX_PEERS,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer alle drei Sockets
    pub bind_adresse: String,
    /// UDP-Port fuer die LAN-Discovery
    pub discovery_port: u16,
    /// TCP-Port fuer den Control-Kanal
    pub control_port: u16,
    /// UDP-Port fuer den Media-Kanal
    pub media_port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            discovery_port: konstanten::DISCOVERY_PORT,
            control_port: konstanten::CONTROL_PORT,
            media_port: konstanten::MEDIA_PORT,
        }
    }
}

/// Audio/Codec-Einstellungen
///
/// Die Werte werden jedem Beitretenden nach der Teilnehmerliste als
/// PARAM_UPDATE mitgeteilt (siehe [`AudioEinstellungen::als_param_update`]).
/// Die Jitter-Parameter der Empfangs-Pipeline liegen in der
/// Client-Konfiguration, nicht hier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    /// Ziel-Bitrate des Codecs in kbit/s
    pub bitrate_kbps: u32,
    /// Frame-Laenge in Millisekunden
    pub frame_ms: u32,
    /// Encoder-Komplexitaet (0-10)
    pub complexity: u8,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            bitrate_kbps: konstanten::CODEC_BITRATE / 1000,
            frame_ms: konstanten::FRAME_MS,
            complexity: konstanten::CODEC_KOMPLEXITAET,
        }
    }
}

impl AudioEinstellungen {
    /// Baut die Parameter-Nachricht fuer Beitretende
    pub fn als_param_update(&self) -> ParamUpdate {
        ParamUpdate {
            bitrate: self.bitrate_kbps * 1000,
            frame_ms: self.frame_ms.min(u8::MAX as u32) as u8,
            complexity: self.complexity.min(10),
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ServerConfig {
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

    /// Gibt die Bind-Adresse fuer die Discovery zurueck
    pub fn discovery_bind_adresse(&self) -> String {
        format!(
            "{}:{}",
            self.netzwerk.bind_adresse, self.netzwerk.discovery_port
        )
    }

    /// Gibt die Bind-Adresse fuer den Control-Kanal zurueck
    pub fn control_bind_adresse(&self) -> String {
        format!(
            "{}:{}",
            self.netzwerk.bind_adresse, self.netzwerk.control_port
        )
    }

    /// Gibt die Bind-Adresse fuer den Media-Kanal zurueck
    pub fn media_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.media_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.server.max_peers, 16);
        assert_eq!(cfg.netzwerk.discovery_port, 37020);
        assert_eq!(cfg.netzwerk.control_port, 5000);
        assert_eq!(cfg.netzwerk.media_port, 6000);
        assert_eq!(cfg.audio.bitrate_kbps, 32);
        assert_eq!(cfg.audio.frame_ms, 20);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn audio_einstellungen_als_param_update() {
        let mut audio = AudioEinstellungen::default();
        audio.bitrate_kbps = 48;
        audio.frame_ms = 40;
        audio.complexity = 12; // wird auf 10 gekappt

        let update = audio.als_param_update();
        assert_eq!(update.bitrate, 48_000);
        assert_eq!(update.frame_ms, 40);
        assert_eq!(update.complexity, 10);
    }

    #[test]
    fn bind_adressen() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.control_bind_adresse(), "0.0.0.0:5000");
        assert_eq!(cfg.media_bind_adresse(), "0.0.0.0:6000");
        assert_eq!(cfg.discovery_bind_adresse(), "0.0.0.0:37020");
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [server]
            name = "Bastelkeller"
            max_peers = 8

            [netzwerk]
            control_port = 15000

            [audio]
            bitrate_kbps = 64
        "#;
        let cfg: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.server.name, "Bastelkeller");
        assert_eq!(cfg.server.max_peers, 8);
        assert_eq!(cfg.netzwerk.control_port, 15000);
        assert_eq!(cfg.audio.bitrate_kbps, 64);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.netzwerk.media_port, 6000);
        assert_eq!(cfg.audio.frame_ms, 20);
    }
}
