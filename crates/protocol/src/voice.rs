//! Media-Protokoll (UDP)
//!
//! Definiert die binaere Paketstruktur fuer die Audio-Uebertragung via UDP.
//! Das Encoding erfolgt im Client; der Server leitet Pakete unveraendert
//! weiter (Fan-out, kein Transcoding).
//!
//! ## Paketformat (Header = 16 Bytes, little-endian, kein serde)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   Version (2)
//!  1       1   Payload-Typ (0 = PCM, 111 = kodierte Sprache)
//!  2       2   Sequenznummer (u16, Wrap-around)
//!  4       4   Zeitstempel (48 kHz Sample-Takt)
//!  8       4   SSRC – Synchronisation Source (Senderkennung)
//! 12       2   Nutzdaten-Laenge
//! 14       2   Flags (bit0 = Marker, bit1 = Sprachaktivitaet)
//! 16+      N   Nutzdaten (max. 512 Bytes)
//! ```

use std::io;

use funkraum_core::konstanten::MAX_MEDIA_NUTZDATEN;

/// RTP-Version dieses Formats
pub const RTP_VERSION: u8 = 2;

/// Payload-Typ: unkomprimiertes lineares PCM (reserviert)
pub const PAYLOAD_PCM: u8 = 0;

/// Payload-Typ: kodierte Sprach-Nutzdaten
pub const PAYLOAD_VOICE: u8 = 111;

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

/// Bit-Masken fuer das Flags-Feld im Media-Header
pub struct RtpFlags;

impl RtpFlags {
    /// RTP-Marker-Bit (vom Kern nicht ausgewertet)
    pub const MARKER: u16 = 0x0001;
    /// Frame enthaelt Sprachenergie (vom Capture-Gate gesetzt)
    pub const VAD_AKTIV: u16 = 0x0002;
}

// ---------------------------------------------------------------------------
// RtpHeader
// ---------------------------------------------------------------------------

/// 16-Byte Header eines Media-UDP-Pakets
///
/// Direkte Byte-Serialisierung, kein serde (Hot Path).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Version (muss == `RTP_VERSION` sein)
    pub version: u8,
    /// Payload-Typ
    pub payload_type: u8,
    /// Monoton steigende Sequenznummer (modulo 2^16)
    pub sequence: u16,
    /// Sample-Index bei fester 48-kHz-Basis
    pub timestamp: u32,
    /// Senderkennung (== Client-ID)
    pub ssrc: u32,
    /// Nutzdaten-Laenge in Bytes
    pub payload_len: u16,
    /// Flag-Bits (siehe `RtpFlags`)
    pub flags: u16,
}

impl RtpHeader {
    /// Header-Groesse in Bytes
    pub const GROESSE: usize = 16;

    /// Erstellt einen neuen Header
    pub fn neu(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version: RTP_VERSION,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            payload_len: 0,
            flags: 0,
        }
    }

    /// Serialisiert den Header in ein 16-Byte-Array (little-endian)
    pub fn encode(&self) -> [u8; Self::GROESSE] {
        let mut buf = [0u8; Self::GROESSE];
        buf[0] = self.version;
        buf[1] = self.payload_type;
        buf[2..4].copy_from_slice(&self.sequence.to_le_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_le_bytes());
        buf[12..14].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[14..16].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }

    /// Deserialisiert einen Header aus einem Byte-Slice
    ///
    /// # Fehler
    /// - `InvalidData` wenn das Slice kuerzer als 16 Bytes ist
    /// - `InvalidData` bei Version != 2
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < Self::GROESSE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Media-Header zu kurz: {} Bytes (erwartet {})",
                    buf.len(),
                    Self::GROESSE
                ),
            ));
        }

        let version = buf[0];
        if version != RTP_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Ungueltige RTP-Version: {version} (erwartet {RTP_VERSION})"),
            ));
        }

        Ok(Self {
            version,
            payload_type: buf[1],
            sequence: u16::from_le_bytes([buf[2], buf[3]]),
            timestamp: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            payload_len: u16::from_le_bytes([buf[12], buf[13]]),
            flags: u16::from_le_bytes([buf[14], buf[15]]),
        })
    }

    /// Prueft ob ein bestimmtes Flag gesetzt ist
    pub fn hat_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    /// Setzt oder loescht das Marker-Bit
    pub fn marker_setzen(&mut self, marker: bool) {
        if marker {
            self.flags |= RtpFlags::MARKER;
        } else {
            self.flags &= !RtpFlags::MARKER;
        }
    }

    /// Setzt oder loescht das Sprachaktivitaets-Bit
    pub fn vad_setzen(&mut self, aktiv: bool) {
        if aktiv {
            self.flags |= RtpFlags::VAD_AKTIV;
        } else {
            self.flags &= !RtpFlags::VAD_AKTIV;
        }
    }

    /// Gibt das Sprachaktivitaets-Bit zurueck
    pub fn vad_aktiv(&self) -> bool {
        self.hat_flag(RtpFlags::VAD_AKTIV)
    }
}

// ---------------------------------------------------------------------------
// RtpPacket
// ---------------------------------------------------------------------------

/// Vollstaendiges Media-UDP-Paket (Header + Nutzdaten)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// 16-Byte Header
    pub header: RtpHeader,
    /// Kodierte Nutzdaten (max. `MAX_MEDIA_NUTZDATEN` Bytes)
    pub payload: Vec<u8>,
}

impl RtpPacket {
    /// Erstellt ein Sprach-Paket mit kodierten Nutzdaten
    pub fn neu_voice(sequence: u16, timestamp: u32, ssrc: u32, payload: Vec<u8>) -> Self {
        let mut header = RtpHeader::neu(PAYLOAD_VOICE, sequence, timestamp, ssrc);
        header.payload_len = payload.len() as u16;
        Self { header, payload }
    }

    /// Serialisiert das gesamte Paket in einen Byte-Vec
    pub fn encode(&self) -> Vec<u8> {
        let mut header = self.header;
        header.payload_len = self.payload.len() as u16;
        let mut buf = Vec::with_capacity(RtpHeader::GROESSE + self.payload.len());
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Deserialisiert ein Paket aus einem Byte-Slice und validiert es
    ///
    /// # Fehler
    /// - Header-Validierungsfehler (Laenge, Version)
    /// - Nutzdaten ueberschreiten `MAX_MEDIA_NUTZDATEN`
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        let header = RtpHeader::decode(buf)?;
        let payload_bytes = &buf[RtpHeader::GROESSE..];

        if payload_bytes.len() > MAX_MEDIA_NUTZDATEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Nutzdaten zu lang: {} Bytes (Maximum {})",
                    payload_bytes.len(),
                    MAX_MEDIA_NUTZDATEN
                ),
            ));
        }

        Ok(Self {
            header,
            payload: payload_bytes.to_vec(),
        })
    }

    /// Gesamtgroesse des Paketes in Bytes
    pub fn groesse(&self) -> usize {
        RtpHeader::GROESSE + self.payload.len()
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
        let mut header = RtpHeader::neu(PAYLOAD_VOICE, 42, 6720, 0xDEAD_BEEF);
        header.payload_len = 80;
        header.vad_setzen(true);
        let encoded = header.encode();
        assert_eq!(encoded.len(), RtpHeader::GROESSE);
        let decoded = RtpHeader::decode(&encoded).expect("Decode muss erfolgreich sein");
        assert_eq!(header, decoded);
    }

    #[test]
    fn header_groesse_ist_16_bytes() {
        let header = RtpHeader::neu(PAYLOAD_VOICE, 0, 0, 0);
        assert_eq!(header.encode().len(), 16);
    }

    #[test]
    fn header_little_endian_byte_reihenfolge() {
        let mut header = RtpHeader::neu(PAYLOAD_VOICE, 0x0102, 0x0304_0506, 0x0708_090A);
        header.payload_len = 0x0B0C;
        let bytes = header.encode();
        // Sequence bei Offset 2-3 (LE)
        assert_eq!(bytes[2], 0x02);
        assert_eq!(bytes[3], 0x01);
        // Timestamp bei Offset 4-7 (LE)
        assert_eq!(bytes[4], 0x06);
        assert_eq!(bytes[7], 0x03);
        // SSRC bei Offset 8-11 (LE)
        assert_eq!(bytes[8], 0x0A);
        assert_eq!(bytes[11], 0x07);
        // payload_len bei Offset 12-13 (LE)
        assert_eq!(bytes[12], 0x0C);
        assert_eq!(bytes[13], 0x0B);
    }

    #[test]
    fn header_decode_falsche_version() {
        let mut bytes = RtpHeader::neu(PAYLOAD_VOICE, 1, 0, 0).encode();
        bytes[0] = 1;
        assert!(RtpHeader::decode(&bytes).is_err());
    }

    #[test]
    fn header_decode_zu_kurz() {
        let bytes = [0u8; 8];
        assert!(RtpHeader::decode(&bytes).is_err());
    }

    #[test]
    fn paket_encode_decode_round_trip() {
        let payload = vec![0xAB; 120];
        let paket = RtpPacket::neu_voice(100, 4800, 0xCAFE, payload.clone());
        let encoded = paket.encode();
        assert_eq!(encoded.len(), RtpHeader::GROESSE + 120);

        let decoded = RtpPacket::decode(&encoded).expect("Decode muss erfolgreich sein");
        assert_eq!(decoded.header, paket.header);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn paket_zu_grosse_nutzdaten() {
        let header = RtpHeader::neu(PAYLOAD_VOICE, 0, 0, 0);
        let mut buf = header.encode().to_vec();
        buf.extend(vec![0u8; MAX_MEDIA_NUTZDATEN + 1]);
        assert!(RtpPacket::decode(&buf).is_err());
    }

    #[test]
    fn paket_leere_nutzdaten_ok() {
        let paket = RtpPacket::neu_voice(0, 0, 0, vec![]);
        let encoded = paket.encode();
        assert_eq!(encoded.len(), RtpHeader::GROESSE);
        assert!(RtpPacket::decode(&encoded).unwrap().payload.is_empty());
    }

    #[test]
    fn vad_flag_setzen_und_loeschen() {
        let mut header = RtpHeader::neu(PAYLOAD_VOICE, 0, 0, 0);
        assert!(!header.vad_aktiv());
        header.vad_setzen(true);
        assert!(header.vad_aktiv());
        header.marker_setzen(true);
        assert!(header.hat_flag(RtpFlags::MARKER));
        header.vad_setzen(false);
        assert!(!header.vad_aktiv());
        assert!(header.hat_flag(RtpFlags::MARKER));
    }

    #[test]
    fn sequenz_wrap_im_header() {
        let paket = RtpPacket::neu_voice(65535, 0, 1, vec![1]);
        let decoded = RtpPacket::decode(&paket.encode()).unwrap();
        assert_eq!(decoded.header.sequence, 65535);
    }
}
