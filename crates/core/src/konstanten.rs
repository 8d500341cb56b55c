//! Protokoll- und Audio-Konstanten
//!
//! Die Werte sind Teil des Wire-Formats bzw. der Echtzeit-Auslegung und
//! duerfen nicht ohne Protokollversion-Erhoehung geaendert werden.

// ---------------------------------------------------------------------------
// Netzwerk
// ---------------------------------------------------------------------------

/// UDP-Port fuer die LAN-Discovery (Broadcast)
pub const DISCOVERY_PORT: u16 = 37020;

/// TCP-Port fuer den Control-Kanal
pub const CONTROL_PORT: u16 = 5000;

/// UDP-Port fuer den Media-Kanal
pub const MEDIA_PORT: u16 = 6000;

/// Maximale Groesse eines Control-Frames inkl. Header (Bytes)
pub const MAX_FRAME_GROESSE: usize = 4096;

/// Maximale Nutzdaten-Laenge eines Media-Pakets (Bytes)
pub const MAX_MEDIA_NUTZDATEN: usize = 512;

/// Maximale Anzahl gleichzeitiger Sitzungsmitglieder
pub const MAX_PEERS: usize = 16;

/// Maximale Anzahl gemerkter Discovery-Server
pub const MAX_SERVERS: usize = 32;

/// Maximale Laenge eines Anzeigenamens (Bytes, inkl. NUL-Padding)
pub const MAX_NAME_LAENGE: usize = 32;

// ---------------------------------------------------------------------------
// Zeitverhalten
// ---------------------------------------------------------------------------

/// Heartbeat-Sendeintervall des Clients (Millisekunden)
pub const HEARTBEAT_INTERVALL_MS: u64 = 3000;

/// Heartbeat-Timeout des Servers (Millisekunden)
pub const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;

/// Discovery-Broadcast-Intervall (Millisekunden)
pub const DISCOVERY_INTERVALL_MS: u64 = 3000;

/// Discovery-Empfangs-Deadline (Millisekunden)
pub const DISCOVERY_TIMEOUT_MS: u64 = 2000;

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

/// Abtastrate in Hz (RTP-Zeitstempel-Basis)
pub const ABTASTRATE: u32 = 48_000;

/// Anzahl Audio-Kanaele (Mono)
pub const KANAELE: u8 = 1;

/// Frame-Laenge in Millisekunden
pub const FRAME_MS: u32 = 20;

/// Samples pro Frame (20 ms bei 48 kHz)
pub const FRAME_SAMPLES: usize = (ABTASTRATE as usize * FRAME_MS as usize) / 1000;

/// Ziel-Bitrate des Codecs (bit/s)
pub const CODEC_BITRATE: u32 = 32_000;

/// Encoder-Komplexitaet (0-10)
pub const CODEC_KOMPLEXITAET: u8 = 5;

// ---------------------------------------------------------------------------
// Jitter Buffer
// ---------------------------------------------------------------------------

/// Ziel-Verzoegerung des Jitter Buffers (Millisekunden)
pub const JITTER_ZIEL_MS: u32 = 20;

/// Minimale Verzoegerung (Millisekunden)
pub const JITTER_MIN_MS: u32 = 10;

/// Maximale Verzoegerung (Millisekunden)
pub const JITTER_MAX_MS: u32 = 60;

/// Anzahl der Slots im Jitter Buffer
pub const JITTER_SLOTS: usize = 16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_samples_960() {
        // 20 ms bei 48 kHz Mono
        assert_eq!(FRAME_SAMPLES, 960);
    }

    #[test]
    fn jitter_fenster_konsistent() {
        assert!(JITTER_MIN_MS <= JITTER_ZIEL_MS);
        assert!(JITTER_ZIEL_MS <= JITTER_MAX_MS);
        // Das Slot-Fenster muss die maximale Verzoegerung abdecken koennen
        assert!(JITTER_SLOTS as u32 * FRAME_MS >= JITTER_MAX_MS);
    }
}
