//! Wire-Format fuer TCP-Verbindungen
//!
//! Frame-basiertes Protokoll: 20-Byte-Control-Header + Nutzdaten fester
//! Laenge, Integration in `tokio_util::codec::Framed`.
//!
//! ## Resynchronisation
//!
//! Ein Empfaenger sammelt Bytes bis mindestens ein Header vorliegt,
//! validiert das Magic und wartet dann auf Header + Nutzdaten. Bei
//! falschem Magic wird der gesamte Akkumulator verworfen und ein Fehler
//! gemeldet; die Verbindung wird daraufhin getrennt (Resync durch
//! Disconnect). Nachrichten mit bekanntem Header aber nicht dekodierbaren
//! Nutzdaten werden uebersprungen statt die Verbindung zu beenden.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use funkraum_core::konstanten::MAX_FRAME_GROESSE;

use crate::control::{ControlNachricht, PacketHeader, PROTOKOLL_MAGIC};

// ---------------------------------------------------------------------------
// ControlFrame
// ---------------------------------------------------------------------------

/// Ein vollstaendig empfangener Control-Frame
#[derive(Debug, Clone, PartialEq)]
pub struct ControlFrame {
    /// Der rohe Header (Sequenz und Zeitstempel des Senders)
    pub header: PacketHeader,
    /// Die dekodierte Nachricht
    pub nachricht: ControlNachricht,
}

// ---------------------------------------------------------------------------
// ControlCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer das binaere Control-Protokoll
///
/// Implementiert `Encoder<ControlNachricht>` und `Decoder` fuer die
/// Integration mit `tokio_util::codec::Framed`. Der Encoder stempelt
/// Sequenznummer und Zeitstempel selbststaendig.
#[derive(Debug)]
pub struct ControlCodec {
    /// Naechste ausgehende Sequenznummer
    sende_sequenz: u32,
}

impl ControlCodec {
    /// Erstellt einen neuen Codec
    pub fn new() -> Self {
        Self { sende_sequenz: 0 }
    }

    /// Millisekunden seit UNIX-Epoche, auf u32 gekappt (Wire-Feld)
    fn jetzt_ms() -> u32 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u32)
            .unwrap_or(0)
    }
}

impl Default for ControlCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ControlCodec {
    type Item = ControlFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Auf einen vollstaendigen Header warten
            if src.len() < PacketHeader::GROESSE {
                return Ok(None);
            }

            // Magic pruefen ohne den Buffer zu veraendern
            let magic = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
            if magic != PROTOKOLL_MAGIC {
                // Akkumulator verwerfen – Resync durch Disconnect
                src.clear();
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Ungueltiges Magic im Control-Stream: {magic:#010x}"),
                ));
            }

            let header = PacketHeader::decode(&src[..PacketHeader::GROESSE])?;
            let frame_groesse = PacketHeader::GROESSE + header.payload_len as usize;

            if frame_groesse > MAX_FRAME_GROESSE {
                src.clear();
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "Control-Frame zu gross: {frame_groesse} Bytes (Maximum {MAX_FRAME_GROESSE})"
                    ),
                ));
            }

            // Pruefen ob der vollstaendige Frame bereits im Buffer ist
            if src.len() < frame_groesse {
                src.reserve(frame_groesse - src.len());
                return Ok(None);
            }

            // Frame verbrauchen
            src.advance(PacketHeader::GROESSE);
            let nutzdaten = src.split_to(header.payload_len as usize);

            let typ = match header.typ() {
                Some(t) => t,
                None => {
                    // Unbekannter Typ: Frame ueberspringen, naechsten versuchen
                    tracing::debug!(
                        msg_type = format_args!("{:#06x}", header.msg_type),
                        "Unbekannter Nachrichtentyp uebersprungen"
                    );
                    continue;
                }
            };

            match ControlNachricht::dekodieren(typ, &nutzdaten) {
                Ok(nachricht) => return Ok(Some(ControlFrame { header, nachricht })),
                Err(e) => {
                    tracing::debug!(
                        typ = ?typ,
                        fehler = %e,
                        "Nicht dekodierbare Nutzdaten uebersprungen"
                    );
                    continue;
                }
            }
        }
    }
}

impl Encoder<ControlNachricht> for ControlCodec {
    type Error = io::Error;

    fn encode(&mut self, item: ControlNachricht, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let nutzdaten = item.nutzdaten_kodieren();
        let frame_groesse = PacketHeader::GROESSE + nutzdaten.len();

        if frame_groesse > MAX_FRAME_GROESSE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Nachricht zu gross: {frame_groesse} Bytes (Maximum {MAX_FRAME_GROESSE})"
                ),
            ));
        }

        let header = PacketHeader::neu(
            item.typ(),
            nutzdaten.len() as u32,
            self.sende_sequenz,
            Self::jetzt_ms(),
        );
        self.sende_sequenz = self.sende_sequenz.wrapping_add(1);

        dst.reserve(frame_groesse);
        dst.put_slice(&header.encode());
        dst.put_slice(&nutzdaten);

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{Heartbeat, Hello, MessageType};

    fn test_hello() -> ControlNachricht {
        ControlNachricht::Hello(Hello {
            client_id: 77,
            capability_flags: 7,
            name: "codec-test".into(),
        })
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut codec = ControlCodec::new();
        let original = test_hello();

        let mut buf = BytesMut::new();
        codec.encode(original.clone(), &mut buf).unwrap();

        let frame = codec
            .decode(&mut buf)
            .unwrap()
            .expect("Muss eine Nachricht enthalten");
        assert_eq!(frame.nachricht, original);
        assert_eq!(frame.header.typ(), Some(MessageType::Hello));
        assert!(buf.is_empty());
    }

    #[test]
    fn unvollstaendiger_frame_wartet() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(test_hello(), &mut buf).unwrap();

        // Nur die Haelfte der Bytes anliefern
        let half = buf.len() / 2;
        let mut partial = buf.split_to(half);

        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Rest nachliefern -> Nachricht vollstaendig
        partial.unsplit(buf);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn zu_wenig_bytes_fuer_header() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::from(&[0x43u8, 0x50][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn falsches_magic_leert_akkumulator() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::new();
        buf.put_slice(&[0xFFu8; 64]);

        let result = codec.decode(&mut buf);
        assert!(result.is_err());
        assert!(buf.is_empty(), "Akkumulator muss geleert sein");
    }

    #[test]
    fn zu_grosser_frame_abgelehnt() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::new();

        // Header mit absurder Nutzdaten-Laenge von Hand bauen
        let header = PacketHeader {
            magic: PROTOKOLL_MAGIC,
            version: crate::control::PROTOKOLL_VERSION,
            msg_type: MessageType::Hello as u16,
            payload_len: (MAX_FRAME_GROESSE + 1) as u32,
            sequence: 0,
            timestamp_ms: 0,
        };
        buf.put_slice(&header.encode());

        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn mehrere_nachrichten_im_buffer() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::new();

        for i in 0..3u32 {
            codec
                .encode(
                    ControlNachricht::Heartbeat(Heartbeat {
                        client_id: i,
                        local_time: i as u64,
                    }),
                    &mut buf,
                )
                .unwrap();
        }

        for i in 0..3u32 {
            let frame = codec.decode(&mut buf).unwrap().expect("Nachricht erwartet");
            match frame.nachricht {
                ControlNachricht::Heartbeat(hb) => assert_eq!(hb.client_id, i),
                andere => panic!("Heartbeat erwartet, bekam {andere:?}"),
            }
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn encoder_sequenz_steigt() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(ControlNachricht::Leave, &mut buf).unwrap();
        codec.encode(ControlNachricht::Leave, &mut buf).unwrap();

        let f1 = codec.decode(&mut buf).unwrap().unwrap();
        let f2 = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(f1.header.sequence + 1, f2.header.sequence);
    }

    #[test]
    fn unbekannter_typ_wird_uebersprungen() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::new();

        // Frame mit unbekanntem Typ, gefolgt von einem gueltigen Leave
        let fremd = PacketHeader {
            magic: PROTOKOLL_MAGIC,
            version: crate::control::PROTOKOLL_VERSION,
            msg_type: 0x7777,
            payload_len: 4,
            sequence: 0,
            timestamp_ms: 0,
        };
        buf.put_slice(&fremd.encode());
        buf.put_slice(&[1, 2, 3, 4]);
        codec.encode(ControlNachricht::Leave, &mut buf).unwrap();

        let frame = codec.decode(&mut buf).unwrap().expect("Leave erwartet");
        assert_eq!(frame.nachricht, ControlNachricht::Leave);
    }
}
