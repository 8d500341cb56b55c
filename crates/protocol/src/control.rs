//! Control-Protokoll (TCP + Discovery)
//!
//! Definiert alle Steuerungsnachrichten die ueber die TCP-Verbindung bzw.
//! den Discovery-Broadcast ausgetauscht werden.
//!
//! ## Header-Format (20 Bytes, little-endian)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       4   Magic (0x53565043, "SVPC")
//!  4       2   Protokollversion (0x0200)
//!  6       2   Nachrichtentyp
//!  8       4   Nutzdaten-Laenge
//! 12       4   Sequenznummer
//! 16       4   Zeitstempel (Millisekunden)
//! ```
//!
//! Die Nutzdaten jeder Nachricht sind flache little-endian-Strukturen mit
//! fester Laenge; Namen sind NUL-gepolsterte Byte-Felder. Die numerischen
//! Typ-Codes sind Teil des ausgelieferten Protokolls und duerfen nicht
//! veraendert werden.

use std::io;

use funkraum_core::konstanten::MAX_NAME_LAENGE;

/// Protokoll-Magic ("SVPC")
pub const PROTOKOLL_MAGIC: u32 = 0x5356_5043;

/// Aktuelle Protokollversion (v2.0)
pub const PROTOKOLL_VERSION: u16 = 0x0200;

/// Laenge des IP-String-Felds in `PeerInfo` (Bytes)
pub const IP_FELD_LAENGE: usize = 16;

/// Laenge des Versions-String-Felds in `DiscoveryResponse` (Bytes)
pub const VERSION_FELD_LAENGE: usize = 16;

// ---------------------------------------------------------------------------
// Capability-Flags
// ---------------------------------------------------------------------------

/// Faehigkeits-Bits in Discovery und HELLO
pub struct Capability;

impl Capability {
    /// Kodierte Sprach-Nutzdaten werden unterstuetzt
    pub const CODEC: u32 = 0x0001;
    /// Sprachaktivitaets-Erkennung
    pub const VAD: u32 = 0x0002;
    /// Jitter Buffer auf Empfangsseite
    pub const JITTER: u32 = 0x0004;

    /// Alle Faehigkeiten dieses Builds
    pub const ALLE: u32 = Self::CODEC | Self::VAD | Self::JITTER;
}

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// Nachrichtentyp im Control-Header
///
/// Das Original vergibt 0x0104 doppelt (LEAVE und die Join-Bestaetigung);
/// JoinAck belegt hier den freien Slot 0x0106, alle uebrigen Codes sind
/// unveraendert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    // Discovery (UDP Broadcast)
    DiscoveryRequest = 0x0001,
    DiscoveryResponse = 0x0002,

    // Sitzungskontrolle (TCP)
    Hello = 0x0101,
    HelloAck = 0x0102,
    Join = 0x0103,
    Leave = 0x0104,
    Heartbeat = 0x0105,
    JoinAck = 0x0106,

    // Audio-Kontrolle (TCP)
    AudioStart = 0x0201,
    AudioStop = 0x0202,
    AudioMute = 0x0203,
    AudioUnmute = 0x0204,
    ParamUpdate = 0x0205,
    TimeSync = 0x0206,

    // Statusbenachrichtigungen (TCP)
    PeerList = 0x0301,
    PeerJoin = 0x0302,
    PeerLeave = 0x0303,
    PeerState = 0x0304,
}

impl MessageType {
    /// Konvertiert einen Wire-Code in einen `MessageType`
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            0x0001 => Some(Self::DiscoveryRequest),
            0x0002 => Some(Self::DiscoveryResponse),
            0x0101 => Some(Self::Hello),
            0x0102 => Some(Self::HelloAck),
            0x0103 => Some(Self::Join),
            0x0104 => Some(Self::Leave),
            0x0105 => Some(Self::Heartbeat),
            0x0106 => Some(Self::JoinAck),
            0x0201 => Some(Self::AudioStart),
            0x0202 => Some(Self::AudioStop),
            0x0203 => Some(Self::AudioMute),
            0x0204 => Some(Self::AudioUnmute),
            0x0205 => Some(Self::ParamUpdate),
            0x0206 => Some(Self::TimeSync),
            0x0301 => Some(Self::PeerList),
            0x0302 => Some(Self::PeerJoin),
            0x0303 => Some(Self::PeerLeave),
            0x0304 => Some(Self::PeerState),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// PacketHeader
// ---------------------------------------------------------------------------

/// 20-Byte Header jeder Control-Nachricht
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Magic (muss == `PROTOKOLL_MAGIC` sein)
    pub magic: u32,
    /// Protokollversion
    pub version: u16,
    /// Nachrichtentyp (Wire-Code)
    pub msg_type: u16,
    /// Laenge der Nutzdaten in Bytes
    pub payload_len: u32,
    /// Sequenznummer des Senders
    pub sequence: u32,
    /// Sendezeitpunkt in Millisekunden
    pub timestamp_ms: u32,
}

impl PacketHeader {
    /// Header-Groesse in Bytes
    pub const GROESSE: usize = 20;

    /// Erstellt einen neuen Header fuer den gegebenen Typ
    pub fn neu(typ: MessageType, payload_len: u32, sequence: u32, timestamp_ms: u32) -> Self {
        Self {
            magic: PROTOKOLL_MAGIC,
            version: PROTOKOLL_VERSION,
            msg_type: typ as u16,
            payload_len,
            sequence,
            timestamp_ms,
        }
    }

    /// Serialisiert den Header in ein 20-Byte-Array (little-endian)
    pub fn encode(&self) -> [u8; Self::GROESSE] {
        let mut buf = [0u8; Self::GROESSE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..8].copy_from_slice(&self.msg_type.to_le_bytes());
        buf[8..12].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[12..16].copy_from_slice(&self.sequence.to_le_bytes());
        buf[16..20].copy_from_slice(&self.timestamp_ms.to_le_bytes());
        buf
    }

    /// Deserialisiert einen Header aus einem Byte-Slice
    ///
    /// # Fehler
    /// - `InvalidData` wenn das Slice kuerzer als 20 Bytes ist
    /// - `InvalidData` bei falschem Magic
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < Self::GROESSE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Control-Header zu kurz: {} Bytes (erwartet {})",
                    buf.len(),
                    Self::GROESSE
                ),
            ));
        }

        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != PROTOKOLL_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Ungueltiges Magic: {magic:#010x}"),
            ));
        }

        Ok(Self {
            magic,
            version: u16::from_le_bytes([buf[4], buf[5]]),
            msg_type: u16::from_le_bytes([buf[6], buf[7]]),
            payload_len: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            sequence: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            timestamp_ms: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
        })
    }

    /// Gibt den dekodierten Nachrichtentyp zurueck
    pub fn typ(&self) -> Option<MessageType> {
        MessageType::from_u16(self.msg_type)
    }
}

// ---------------------------------------------------------------------------
// Feste String-Felder
// ---------------------------------------------------------------------------

/// Schreibt `text` NUL-gepolstert in ein Feld fester Laenge.
/// Der letzte Byte bleibt immer NUL (Truncation bei Ueberlaenge).
fn string_feld_kodieren(text: &str, feld: &mut [u8]) {
    let bytes = text.as_bytes();
    let n = bytes.len().min(feld.len().saturating_sub(1));
    feld[..n].copy_from_slice(&bytes[..n]);
    for b in feld[n..].iter_mut() {
        *b = 0;
    }
}

/// Liest ein NUL-gepolstertes Feld als String (bis zum ersten NUL, lossy UTF-8)
fn string_feld_dekodieren(feld: &[u8]) -> String {
    let ende = feld.iter().position(|&b| b == 0).unwrap_or(feld.len());
    String::from_utf8_lossy(&feld[..ende]).into_owned()
}

/// Prueft ob die Nutzdaten mindestens `erwartet` Bytes lang sind
fn nutzdaten_pruefen(buf: &[u8], erwartet: usize, nachricht: &str) -> io::Result<()> {
    if buf.len() < erwartet {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "{nachricht}: Nutzdaten zu kurz ({} Bytes, erwartet {erwartet})",
                buf.len()
            ),
        ));
    }
    Ok(())
}

fn u16_le(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn u32_le(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn u64_le(buf: &[u8], offset: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(b)
}

// ---------------------------------------------------------------------------
// Nachrichten-Nutzdaten
// ---------------------------------------------------------------------------

/// Discovery-Anfrage (UDP Broadcast)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    pub client_id: u32,
    /// Dienst-Maske (unbenutzt, 0)
    pub service_mask: u32,
    pub name: String,
}

impl DiscoveryRequest {
    pub const NUTZDATEN_GROESSE: usize = 8 + MAX_NAME_LAENGE;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::NUTZDATEN_GROESSE];
        buf[0..4].copy_from_slice(&self.client_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.service_mask.to_le_bytes());
        string_feld_kodieren(&self.name, &mut buf[8..8 + MAX_NAME_LAENGE]);
        buf
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        nutzdaten_pruefen(buf, Self::NUTZDATEN_GROESSE, "DiscoveryRequest")?;
        Ok(Self {
            client_id: u32_le(buf, 0),
            service_mask: u32_le(buf, 4),
            name: string_feld_dekodieren(&buf[8..8 + MAX_NAME_LAENGE]),
        })
    }
}

/// Discovery-Antwort (UDP Unicast an den Anfrager)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryResponse {
    pub server_id: u32,
    pub tcp_port: u16,
    pub media_port: u16,
    pub capability_flags: u32,
    pub current_peers: u8,
    pub max_peers: u8,
    pub server_name: String,
    pub version: String,
}

impl DiscoveryResponse {
    pub const NUTZDATEN_GROESSE: usize = 12 + 2 + MAX_NAME_LAENGE + VERSION_FELD_LAENGE;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::NUTZDATEN_GROESSE];
        buf[0..4].copy_from_slice(&self.server_id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.tcp_port.to_le_bytes());
        buf[6..8].copy_from_slice(&self.media_port.to_le_bytes());
        buf[8..12].copy_from_slice(&self.capability_flags.to_le_bytes());
        buf[12] = self.current_peers;
        buf[13] = self.max_peers;
        // buf[14..16] reserviert
        string_feld_kodieren(&self.server_name, &mut buf[16..16 + MAX_NAME_LAENGE]);
        string_feld_kodieren(
            &self.version,
            &mut buf[16 + MAX_NAME_LAENGE..16 + MAX_NAME_LAENGE + VERSION_FELD_LAENGE],
        );
        buf
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        nutzdaten_pruefen(buf, Self::NUTZDATEN_GROESSE, "DiscoveryResponse")?;
        Ok(Self {
            server_id: u32_le(buf, 0),
            tcp_port: u16_le(buf, 4),
            media_port: u16_le(buf, 6),
            capability_flags: u32_le(buf, 8),
            current_peers: buf[12],
            max_peers: buf[13],
            server_name: string_feld_dekodieren(&buf[16..16 + MAX_NAME_LAENGE]),
            version: string_feld_dekodieren(
                &buf[16 + MAX_NAME_LAENGE..16 + MAX_NAME_LAENGE + VERSION_FELD_LAENGE],
            ),
        })
    }
}

/// HELLO-Handschlag des Clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Vorgeschlagene Client-ID (0 = Server weist zu)
    pub client_id: u32,
    pub capability_flags: u32,
    pub name: String,
}

impl Hello {
    pub const NUTZDATEN_GROESSE: usize = 8 + MAX_NAME_LAENGE;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::NUTZDATEN_GROESSE];
        buf[0..4].copy_from_slice(&self.client_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.capability_flags.to_le_bytes());
        string_feld_kodieren(&self.name, &mut buf[8..8 + MAX_NAME_LAENGE]);
        buf
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        nutzdaten_pruefen(buf, Self::NUTZDATEN_GROESSE, "Hello")?;
        Ok(Self {
            client_id: u32_le(buf, 0),
            capability_flags: u32_le(buf, 4),
            name: string_feld_dekodieren(&buf[8..8 + MAX_NAME_LAENGE]),
        })
    }
}

/// HELLO-Bestaetigung des Servers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloAck {
    /// 0 = Erfolg
    pub result: u32,
    /// Zugewiesene Client-ID
    pub assigned_id: u32,
    /// UDP-Media-Port des Servers
    pub media_port: u16,
    /// Serverzeit in Millisekunden
    pub server_time: u64,
}

impl HelloAck {
    pub const NUTZDATEN_GROESSE: usize = 20;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::NUTZDATEN_GROESSE];
        buf[0..4].copy_from_slice(&self.result.to_le_bytes());
        buf[4..8].copy_from_slice(&self.assigned_id.to_le_bytes());
        buf[8..10].copy_from_slice(&self.media_port.to_le_bytes());
        // buf[10..12] reserviert
        buf[12..20].copy_from_slice(&self.server_time.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        nutzdaten_pruefen(buf, Self::NUTZDATEN_GROESSE, "HelloAck")?;
        Ok(Self {
            result: u32_le(buf, 0),
            assigned_id: u32_le(buf, 4),
            media_port: u16_le(buf, 8),
            server_time: u64_le(buf, 12),
        })
    }
}

/// Sitzungsbeitritt des Clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Join {
    pub client_id: u32,
    /// Lokaler UDP-Media-Port des Clients
    pub local_media_port: u16,
}

impl Join {
    pub const NUTZDATEN_GROESSE: usize = 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::NUTZDATEN_GROESSE];
        buf[0..4].copy_from_slice(&self.client_id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.local_media_port.to_le_bytes());
        // buf[6..8] reserviert
        buf
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        nutzdaten_pruefen(buf, Self::NUTZDATEN_GROESSE, "Join")?;
        Ok(Self {
            client_id: u32_le(buf, 0),
            local_media_port: u16_le(buf, 4),
        })
    }
}

/// Beitrittsbestaetigung des Servers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinAck {
    /// 0 = Erfolg
    pub result: u32,
    /// Zugewiesene SSRC (== Client-ID)
    pub ssrc: u32,
    /// Basis-Zeitstempel: wall_ms * (Abtastrate / 1000)
    pub base_timestamp: u64,
}

impl JoinAck {
    pub const NUTZDATEN_GROESSE: usize = 16;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::NUTZDATEN_GROESSE];
        buf[0..4].copy_from_slice(&self.result.to_le_bytes());
        buf[4..8].copy_from_slice(&self.ssrc.to_le_bytes());
        buf[8..16].copy_from_slice(&self.base_timestamp.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        nutzdaten_pruefen(buf, Self::NUTZDATEN_GROESSE, "JoinAck")?;
        Ok(Self {
            result: u32_le(buf, 0),
            ssrc: u32_le(buf, 4),
            base_timestamp: u64_le(buf, 8),
        })
    }
}

/// Heartbeat (beide Richtungen; der Server antwortet mit seiner Zeit)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub client_id: u32,
    pub local_time: u64,
}

impl Heartbeat {
    pub const NUTZDATEN_GROESSE: usize = 12;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::NUTZDATEN_GROESSE];
        buf[0..4].copy_from_slice(&self.client_id.to_le_bytes());
        buf[4..12].copy_from_slice(&self.local_time.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        nutzdaten_pruefen(buf, Self::NUTZDATEN_GROESSE, "Heartbeat")?;
        Ok(Self {
            client_id: u32_le(buf, 0),
            local_time: u64_le(buf, 4),
        })
    }
}

/// Audio-Kontrollnachricht (Start/Stop/Mute/Unmute)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioControl {
    pub client_id: u32,
    /// 0 = stop, 1 = start
    pub action: u8,
    /// Stummschaltung
    pub muted: u8,
}

impl AudioControl {
    pub const NUTZDATEN_GROESSE: usize = 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::NUTZDATEN_GROESSE];
        buf[0..4].copy_from_slice(&self.client_id.to_le_bytes());
        buf[4] = self.action;
        buf[5] = self.muted;
        // buf[6..8] reserviert
        buf
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        nutzdaten_pruefen(buf, Self::NUTZDATEN_GROESSE, "AudioControl")?;
        Ok(Self {
            client_id: u32_le(buf, 0),
            action: buf[4],
            muted: buf[5],
        })
    }
}

/// Encoder-Parameter-Update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamUpdate {
    /// Ziel-Bitrate in bit/s
    pub bitrate: u32,
    /// Frame-Laenge in Millisekunden
    pub frame_ms: u8,
    /// Encoder-Komplexitaet
    pub complexity: u8,
}

impl ParamUpdate {
    pub const NUTZDATEN_GROESSE: usize = 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::NUTZDATEN_GROESSE];
        buf[0..4].copy_from_slice(&self.bitrate.to_le_bytes());
        buf[4] = self.frame_ms;
        buf[5] = self.complexity;
        buf
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        nutzdaten_pruefen(buf, Self::NUTZDATEN_GROESSE, "ParamUpdate")?;
        Ok(Self {
            bitrate: u32_le(buf, 0),
            frame_ms: buf[4],
            complexity: buf[5],
        })
    }
}

/// Zeitsynchronisation des Servers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSync {
    pub server_time: u64,
    pub base_timestamp: u64,
}

impl TimeSync {
    pub const NUTZDATEN_GROESSE: usize = 16;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::NUTZDATEN_GROESSE];
        buf[0..8].copy_from_slice(&self.server_time.to_le_bytes());
        buf[8..16].copy_from_slice(&self.base_timestamp.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        nutzdaten_pruefen(buf, Self::NUTZDATEN_GROESSE, "TimeSync")?;
        Ok(Self {
            server_time: u64_le(buf, 0),
            base_timestamp: u64_le(buf, 8),
        })
    }
}

// ---------------------------------------------------------------------------
// PeerInfo und Listen
// ---------------------------------------------------------------------------

/// Art eines Teilnehmers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PeerType {
    /// Gewoehnlicher Client
    Client = 0,
    /// Der Server selbst
    Server = 1,
    /// Der lokale Teilnehmer
    Selbst = 2,
}

impl PeerType {
    pub fn from_u8(byte: u8) -> Self {
        match byte {
            1 => Self::Server,
            2 => Self::Selbst,
            _ => Self::Client,
        }
    }
}

/// Teilnehmer-Datensatz (62 Bytes auf dem Draht)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub client_id: u32,
    pub ssrc: u32,
    pub name: String,
    /// IP-Adresse als String (z.B. "192.168.0.7")
    pub ip: String,
    pub udp_port: u16,
    pub is_talking: bool,
    pub is_muted: bool,
    pub audio_active: bool,
    pub peer_type: PeerType,
}

impl PeerInfo {
    pub const GROESSE: usize = 8 + MAX_NAME_LAENGE + IP_FELD_LAENGE + 2 + 4;

    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.client_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.ssrc.to_le_bytes());
        string_feld_kodieren(&self.name, &mut buf[8..8 + MAX_NAME_LAENGE]);
        let ip_start = 8 + MAX_NAME_LAENGE;
        string_feld_kodieren(&self.ip, &mut buf[ip_start..ip_start + IP_FELD_LAENGE]);
        let rest = ip_start + IP_FELD_LAENGE;
        buf[rest..rest + 2].copy_from_slice(&self.udp_port.to_le_bytes());
        buf[rest + 2] = self.is_talking as u8;
        buf[rest + 3] = self.is_muted as u8;
        buf[rest + 4] = self.audio_active as u8;
        buf[rest + 5] = self.peer_type as u8;
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        nutzdaten_pruefen(buf, Self::GROESSE, "PeerInfo")?;
        let ip_start = 8 + MAX_NAME_LAENGE;
        let rest = ip_start + IP_FELD_LAENGE;
        Ok(Self {
            client_id: u32_le(buf, 0),
            ssrc: u32_le(buf, 4),
            name: string_feld_dekodieren(&buf[8..8 + MAX_NAME_LAENGE]),
            ip: string_feld_dekodieren(&buf[ip_start..ip_start + IP_FELD_LAENGE]),
            udp_port: u16_le(buf, rest),
            is_talking: buf[rest + 2] != 0,
            is_muted: buf[rest + 3] != 0,
            audio_active: buf[rest + 4] != 0,
            peer_type: PeerType::from_u8(buf[rest + 5]),
        })
    }
}

/// Teilnehmerliste: ein Zaehl-Byte, direkt gefolgt von den Datensaetzen
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PeerList {
    pub peers: Vec<PeerInfo>,
}

impl PeerList {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; 1 + self.peers.len() * PeerInfo::GROESSE];
        buf[0] = self.peers.len() as u8;
        for (i, peer) in self.peers.iter().enumerate() {
            let start = 1 + i * PeerInfo::GROESSE;
            peer.encode_into(&mut buf[start..start + PeerInfo::GROESSE]);
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        nutzdaten_pruefen(buf, 1, "PeerList")?;
        let count = buf[0] as usize;
        nutzdaten_pruefen(buf, 1 + count * PeerInfo::GROESSE, "PeerList")?;
        let mut peers = Vec::with_capacity(count);
        for i in 0..count {
            let start = 1 + i * PeerInfo::GROESSE;
            peers.push(PeerInfo::decode(&buf[start..start + PeerInfo::GROESSE])?);
        }
        Ok(Self { peers })
    }
}

/// Einzelne Teilnehmer-Benachrichtigung (PEER_JOIN / PEER_LEAVE / PEER_STATE)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerNotify {
    pub peer: PeerInfo,
}

impl PeerNotify {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; PeerInfo::GROESSE];
        self.peer.encode_into(&mut buf);
        buf
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        Ok(Self {
            peer: PeerInfo::decode(buf)?,
        })
    }
}

// ---------------------------------------------------------------------------
// ControlNachricht – vereinheitlichter Nachrichtentyp
// ---------------------------------------------------------------------------

/// Eine vollstaendig dekodierte Control-Nachricht
#[derive(Debug, Clone, PartialEq)]
pub enum ControlNachricht {
    DiscoveryRequest(DiscoveryRequest),
    DiscoveryResponse(DiscoveryResponse),
    Hello(Hello),
    HelloAck(HelloAck),
    Join(Join),
    JoinAck(JoinAck),
    Leave,
    Heartbeat(Heartbeat),
    AudioStart(AudioControl),
    AudioStop(AudioControl),
    AudioMute(AudioControl),
    AudioUnmute(AudioControl),
    ParamUpdate(ParamUpdate),
    TimeSync(TimeSync),
    PeerList(PeerList),
    PeerJoin(PeerNotify),
    PeerLeave(PeerNotify),
    PeerState(PeerNotify),
}

impl ControlNachricht {
    /// Gibt den Wire-Typ der Nachricht zurueck
    pub fn typ(&self) -> MessageType {
        match self {
            Self::DiscoveryRequest(_) => MessageType::DiscoveryRequest,
            Self::DiscoveryResponse(_) => MessageType::DiscoveryResponse,
            Self::Hello(_) => MessageType::Hello,
            Self::HelloAck(_) => MessageType::HelloAck,
            Self::Join(_) => MessageType::Join,
            Self::JoinAck(_) => MessageType::JoinAck,
            Self::Leave => MessageType::Leave,
            Self::Heartbeat(_) => MessageType::Heartbeat,
            Self::AudioStart(_) => MessageType::AudioStart,
            Self::AudioStop(_) => MessageType::AudioStop,
            Self::AudioMute(_) => MessageType::AudioMute,
            Self::AudioUnmute(_) => MessageType::AudioUnmute,
            Self::ParamUpdate(_) => MessageType::ParamUpdate,
            Self::TimeSync(_) => MessageType::TimeSync,
            Self::PeerList(_) => MessageType::PeerList,
            Self::PeerJoin(_) => MessageType::PeerJoin,
            Self::PeerLeave(_) => MessageType::PeerLeave,
            Self::PeerState(_) => MessageType::PeerState,
        }
    }

    /// Kodiert die Nutzdaten der Nachricht
    pub fn nutzdaten_kodieren(&self) -> Vec<u8> {
        match self {
            Self::DiscoveryRequest(m) => m.encode(),
            Self::DiscoveryResponse(m) => m.encode(),
            Self::Hello(m) => m.encode(),
            Self::HelloAck(m) => m.encode(),
            Self::Join(m) => m.encode(),
            Self::JoinAck(m) => m.encode(),
            Self::Leave => Vec::new(),
            Self::Heartbeat(m) => m.encode(),
            Self::AudioStart(m)
            | Self::AudioStop(m)
            | Self::AudioMute(m)
            | Self::AudioUnmute(m) => m.encode(),
            Self::ParamUpdate(m) => m.encode(),
            Self::TimeSync(m) => m.encode(),
            Self::PeerList(m) => m.encode(),
            Self::PeerJoin(m) | Self::PeerLeave(m) | Self::PeerState(m) => m.encode(),
        }
    }

    /// Dekodiert die Nutzdaten zum gegebenen Nachrichtentyp
    pub fn dekodieren(typ: MessageType, nutzdaten: &[u8]) -> io::Result<Self> {
        Ok(match typ {
            MessageType::DiscoveryRequest => {
                Self::DiscoveryRequest(DiscoveryRequest::decode(nutzdaten)?)
            }
            MessageType::DiscoveryResponse => {
                Self::DiscoveryResponse(DiscoveryResponse::decode(nutzdaten)?)
            }
            MessageType::Hello => Self::Hello(Hello::decode(nutzdaten)?),
            MessageType::HelloAck => Self::HelloAck(HelloAck::decode(nutzdaten)?),
            MessageType::Join => Self::Join(Join::decode(nutzdaten)?),
            MessageType::JoinAck => Self::JoinAck(JoinAck::decode(nutzdaten)?),
            MessageType::Leave => Self::Leave,
            MessageType::Heartbeat => Self::Heartbeat(Heartbeat::decode(nutzdaten)?),
            MessageType::AudioStart => Self::AudioStart(AudioControl::decode(nutzdaten)?),
            MessageType::AudioStop => Self::AudioStop(AudioControl::decode(nutzdaten)?),
            MessageType::AudioMute => Self::AudioMute(AudioControl::decode(nutzdaten)?),
            MessageType::AudioUnmute => Self::AudioUnmute(AudioControl::decode(nutzdaten)?),
            MessageType::ParamUpdate => Self::ParamUpdate(ParamUpdate::decode(nutzdaten)?),
            MessageType::TimeSync => Self::TimeSync(TimeSync::decode(nutzdaten)?),
            MessageType::PeerList => Self::PeerList(PeerList::decode(nutzdaten)?),
            MessageType::PeerJoin => Self::PeerJoin(PeerNotify::decode(nutzdaten)?),
            MessageType::PeerLeave => Self::PeerLeave(PeerNotify::decode(nutzdaten)?),
            MessageType::PeerState => Self::PeerState(PeerNotify::decode(nutzdaten)?),
        })
    }

    /// Kodiert die Nachricht als komplettes Datagramm (Header + Nutzdaten)
    ///
    /// Fuer Discovery-Pakete, die ohne Stream-Codec versendet werden.
    pub fn als_datagramm(&self, sequence: u32, timestamp_ms: u32) -> Vec<u8> {
        let nutzdaten = self.nutzdaten_kodieren();
        let header = PacketHeader::neu(self.typ(), nutzdaten.len() as u32, sequence, timestamp_ms);
        let mut buf = Vec::with_capacity(PacketHeader::GROESSE + nutzdaten.len());
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(&nutzdaten);
        buf
    }

    /// Dekodiert eine Nachricht aus einem kompletten Datagramm
    pub fn aus_datagramm(buf: &[u8]) -> io::Result<(PacketHeader, Self)> {
        let header = PacketHeader::decode(buf)?;
        let typ = header.typ().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unbekannter Nachrichtentyp: {:#06x}", header.msg_type),
            )
        })?;
        let ende = PacketHeader::GROESSE + header.payload_len as usize;
        if buf.len() < ende {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Datagramm kuerzer als Header + Nutzdaten",
            ));
        }
        let nachricht = Self::dekodieren(typ, &buf[PacketHeader::GROESSE..ende])?;
        Ok((header, nachricht))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encode_decode_round_trip() {
        let header = PacketHeader::neu(MessageType::Hello, 40, 7, 123_456);
        let encoded = header.encode();
        assert_eq!(encoded.len(), PacketHeader::GROESSE);
        let decoded = PacketHeader::decode(&encoded).expect("Decode muss erfolgreich sein");
        assert_eq!(header, decoded);
    }

    #[test]
    fn header_little_endian_byte_reihenfolge() {
        let header = PacketHeader::neu(MessageType::Hello, 0x0A0B_0C0D, 0, 0);
        let bytes = header.encode();
        // Magic bei Offset 0-3, little-endian: 0x43 0x50 0x56 0x53 ("CPVS")
        assert_eq!(bytes[0], 0x43);
        assert_eq!(bytes[3], 0x53);
        // payload_len bei Offset 8-11
        assert_eq!(bytes[8], 0x0D);
        assert_eq!(bytes[11], 0x0A);
    }

    #[test]
    fn header_decode_falsches_magic() {
        let mut bytes = PacketHeader::neu(MessageType::Hello, 0, 0, 0).encode();
        bytes[0] = 0xFF;
        assert!(PacketHeader::decode(&bytes).is_err());
    }

    #[test]
    fn header_decode_zu_kurz() {
        let bytes = [0u8; 10];
        assert!(PacketHeader::decode(&bytes).is_err());
    }

    #[test]
    fn message_type_codes_stabil() {
        // Die Codes sind Teil des ausgelieferten Protokolls
        assert_eq!(MessageType::DiscoveryRequest as u16, 0x0001);
        assert_eq!(MessageType::Hello as u16, 0x0101);
        assert_eq!(MessageType::HelloAck as u16, 0x0102);
        assert_eq!(MessageType::Join as u16, 0x0103);
        assert_eq!(MessageType::Leave as u16, 0x0104);
        assert_eq!(MessageType::Heartbeat as u16, 0x0105);
        assert_eq!(MessageType::AudioMute as u16, 0x0203);
        assert_eq!(MessageType::TimeSync as u16, 0x0206);
        assert_eq!(MessageType::PeerList as u16, 0x0301);
        assert_eq!(MessageType::PeerState as u16, 0x0304);
    }

    #[test]
    fn message_type_round_trip_alle() {
        let alle = [
            MessageType::DiscoveryRequest,
            MessageType::DiscoveryResponse,
            MessageType::Hello,
            MessageType::HelloAck,
            MessageType::Join,
            MessageType::JoinAck,
            MessageType::Leave,
            MessageType::Heartbeat,
            MessageType::AudioStart,
            MessageType::AudioStop,
            MessageType::AudioMute,
            MessageType::AudioUnmute,
            MessageType::ParamUpdate,
            MessageType::TimeSync,
            MessageType::PeerList,
            MessageType::PeerJoin,
            MessageType::PeerLeave,
            MessageType::PeerState,
        ];
        for typ in alle {
            assert_eq!(MessageType::from_u16(typ as u16), Some(typ));
        }
        assert_eq!(MessageType::from_u16(0x9999), None);
    }

    #[test]
    fn hello_round_trip() {
        let hello = Hello {
            client_id: 0xDEAD_BEEF,
            capability_flags: Capability::ALLE,
            name: "Anna".into(),
        };
        let decoded = Hello::decode(&hello.encode()).unwrap();
        assert_eq!(decoded, hello);
    }

    #[test]
    fn hello_ack_round_trip() {
        let ack = HelloAck {
            result: 0,
            assigned_id: 42,
            media_port: 6000,
            server_time: 1_700_000_000_123,
        };
        assert_eq!(HelloAck::decode(&ack.encode()).unwrap(), ack);
    }

    #[test]
    fn join_und_ack_round_trip() {
        let join = Join {
            client_id: 7,
            local_media_port: 51234,
        };
        assert_eq!(Join::decode(&join.encode()).unwrap(), join);

        let ack = JoinAck {
            result: 0,
            ssrc: 7,
            base_timestamp: 81_600_000_000,
        };
        assert_eq!(JoinAck::decode(&ack.encode()).unwrap(), ack);
    }

    #[test]
    fn discovery_round_trip() {
        let req = DiscoveryRequest {
            client_id: 99,
            service_mask: 0,
            name: "Suchender".into(),
        };
        assert_eq!(DiscoveryRequest::decode(&req.encode()).unwrap(), req);

        let resp = DiscoveryResponse {
            server_id: 0x1111_2222,
            tcp_port: 5000,
            media_port: 6000,
            capability_flags: Capability::ALLE,
            current_peers: 3,
            max_peers: 16,
            server_name: "Wohnzimmer".into(),
            version: "1.0.0".into(),
        };
        assert_eq!(DiscoveryResponse::decode(&resp.encode()).unwrap(), resp);
    }

    #[test]
    fn peer_info_round_trip() {
        let peer = PeerInfo {
            client_id: 12,
            ssrc: 12,
            name: "Bernd".into(),
            ip: "192.168.0.42".into(),
            udp_port: 50000,
            is_talking: true,
            is_muted: false,
            audio_active: true,
            peer_type: PeerType::Client,
        };
        let mut buf = vec![0u8; PeerInfo::GROESSE];
        peer.encode_into(&mut buf);
        assert_eq!(PeerInfo::decode(&buf).unwrap(), peer);
    }

    #[test]
    fn peer_list_round_trip() {
        let list = PeerList {
            peers: (0..3)
                .map(|i| PeerInfo {
                    client_id: i,
                    ssrc: i,
                    name: format!("peer{i}"),
                    ip: "10.0.0.1".into(),
                    udp_port: 6000 + i as u16,
                    is_talking: false,
                    is_muted: i == 1,
                    audio_active: true,
                    peer_type: PeerType::Client,
                })
                .collect(),
        };
        let encoded = list.encode();
        // Ein Zaehl-Byte, direkt gefolgt von den Datensaetzen
        assert_eq!(encoded[0], 3);
        assert_eq!(encoded.len(), 1 + 3 * PeerInfo::GROESSE);
        assert_eq!(PeerList::decode(&encoded).unwrap(), list);
    }

    #[test]
    fn peer_list_leer() {
        let list = PeerList { peers: vec![] };
        let encoded = list.encode();
        assert_eq!(encoded.len(), 1);
        assert!(PeerList::decode(&encoded).unwrap().peers.is_empty());
    }

    #[test]
    fn name_wird_bei_ueberlaenge_gekappt() {
        let hello = Hello {
            client_id: 1,
            capability_flags: 0,
            name: "x".repeat(100),
        };
        let decoded = Hello::decode(&hello.encode()).unwrap();
        // Letztes Byte bleibt NUL
        assert_eq!(decoded.name.len(), MAX_NAME_LAENGE - 1);
    }

    #[test]
    fn alle_nachrichten_als_datagramm_round_trip() {
        let nachrichten = vec![
            ControlNachricht::Hello(Hello {
                client_id: 1,
                capability_flags: Capability::ALLE,
                name: "t".into(),
            }),
            ControlNachricht::Leave,
            ControlNachricht::Heartbeat(Heartbeat {
                client_id: 1,
                local_time: 999,
            }),
            ControlNachricht::AudioMute(AudioControl {
                client_id: 1,
                action: 0,
                muted: 1,
            }),
            ControlNachricht::ParamUpdate(ParamUpdate {
                bitrate: 32_000,
                frame_ms: 20,
                complexity: 5,
            }),
            ControlNachricht::TimeSync(TimeSync {
                server_time: 1,
                base_timestamp: 2,
            }),
        ];

        for original in nachrichten {
            let datagramm = original.als_datagramm(5, 1000);
            let (header, decoded) = ControlNachricht::aus_datagramm(&datagramm).unwrap();
            assert_eq!(header.typ(), Some(original.typ()));
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn datagramm_mit_unbekanntem_typ_abgelehnt() {
        let mut datagramm = ControlNachricht::Leave.als_datagramm(0, 0);
        datagramm[6] = 0xFF;
        datagramm[7] = 0xFF;
        assert!(ControlNachricht::aus_datagramm(&datagramm).is_err());
    }
}
