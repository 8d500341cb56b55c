//! Multi-Stream-Mixer
//!
//! Haelt pro Quelle (SSRC) einen eigenen Jitter Buffer samt Decoder in
//! einer festen Tabelle und mischt pro Tick hoechstens einen Frame jeder
//! aktiven Quelle in einen gemeinsamen Ausgabe-Frame.
//!
//! ## Sperrmodell
//!
//! Ein einzelner Mutex deckt die Eintragstabelle und die inneren Jitter
//! Buffer ab; Einfuegen, Mischen und Aufraeumen serialisieren sich
//! gegenseitig. Innerhalb der Sperre findet kein I/O statt.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use funkraum_core::konstanten::MAX_PEERS;
use funkraum_protocol::voice::RtpHeader;

use crate::codec::{AudioDecoder, DecoderFabrik};
use crate::jitter_buffer::{JitterBuffer, JitterConfig, JitterStatistik};

/// Inaktivitaets-Timeout: Eintraege ohne Pakete werden nach dieser Zeit
/// abgeraeumt (Buffer und Decoder zerstoert).
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// StreamEintrag
// ---------------------------------------------------------------------------

/// Ein aktiver Stream in der Mixer-Tabelle
struct StreamEintrag {
    ssrc: u32,
    buffer: JitterBuffer,
    decoder: Box<dyn AudioDecoder>,
    zuletzt_aktiv: Instant,
}

// ---------------------------------------------------------------------------
// MultiStreamMixer
// ---------------------------------------------------------------------------

struct MixerInner {
    /// Feste Tabelle; `None` = freier Slot
    eintraege: Vec<Option<StreamEintrag>>,
    /// Eigene SSRC – Pakete dieser Quelle werden uebersprungen
    eigene_ssrc: u32,
}

/// Multi-Stream-Mixer mit per-SSRC Jitter Buffern
///
/// Thread-safe und `Clone`-faehig (innerer Arc + Mutex).
#[derive(Clone)]
pub struct MultiStreamMixer {
    inner: Arc<Mutex<MixerInner>>,
    fabrik: Arc<dyn DecoderFabrik>,
    jitter_config: JitterConfig,
}

impl MultiStreamMixer {
    /// Erstellt einen Mixer mit `kapazitaet` Stream-Slots
    pub fn neu(
        kapazitaet: usize,
        jitter_config: JitterConfig,
        fabrik: Arc<dyn DecoderFabrik>,
    ) -> Self {
        let eintraege = (0..kapazitaet).map(|_| None).collect();
        Self {
            inner: Arc::new(Mutex::new(MixerInner {
                eintraege,
                eigene_ssrc: 0,
            })),
            fabrik,
            jitter_config,
        }
    }

    /// Erstellt einen Mixer in Standardgroesse (MAX_PEERS Slots)
    pub fn standard(fabrik: Arc<dyn DecoderFabrik>) -> Self {
        Self::neu(MAX_PEERS, JitterConfig::default(), fabrik)
    }

    /// Setzt die eigene SSRC (nach HELLO_ACK bekannt)
    pub fn eigene_ssrc_setzen(&self, ssrc: u32) {
        self.inner.lock().eigene_ssrc = ssrc;
    }

    /// Fuegt ein empfangenes Paket in den Buffer seiner Quelle ein
    ///
    /// Legt bei Bedarf einen neuen Stream-Eintrag an; ist die Tabelle voll,
    /// wird der am laengsten inaktive Eintrag verdraengt (Buffer und
    /// Decoder werden dabei zerstoert, bevor die neuen entstehen).
    pub fn einfuegen(&self, header: &RtpHeader, nutzdaten: &[u8]) {
        let mut inner = self.inner.lock();

        if header.ssrc == inner.eigene_ssrc {
            return;
        }

        let jetzt = Instant::now();

        // Bestehenden Eintrag suchen
        if let Some(eintrag) = inner
            .eintraege
            .iter_mut()
            .flatten()
            .find(|e| e.ssrc == header.ssrc)
        {
            eintrag.zuletzt_aktiv = jetzt;
            eintrag.buffer.einfuegen(header, nutzdaten);
            return;
        }

        // Freien Slot suchen, sonst aeltesten verdraengen
        let idx = match inner.eintraege.iter().position(|e| e.is_none()) {
            Some(frei) => frei,
            None => {
                let aeltester = inner
                    .eintraege
                    .iter()
                    .enumerate()
                    .filter_map(|(i, e)| e.as_ref().map(|e| (i, e.zuletzt_aktiv)))
                    .min_by_key(|(_, aktiv)| *aktiv)
                    .map(|(i, _)| i)
                    .expect("volle Tabelle hat mindestens einen Eintrag");
                let alt = inner.eintraege[aeltester].take();
                if let Some(alt) = alt {
                    tracing::debug!(
                        ssrc = format_args!("{:#010x}", alt.ssrc),
                        "Mixer: aeltesten Stream verdraengt"
                    );
                }
                // alt (Buffer + Decoder) ist hier bereits zerstoert
                aeltester
            }
        };

        let mut eintrag = StreamEintrag {
            ssrc: header.ssrc,
            buffer: JitterBuffer::neu(self.jitter_config.clone()),
            decoder: self.fabrik.decoder_erstellen(),
            zuletzt_aktiv: jetzt,
        };
        eintrag.buffer.einfuegen(header, nutzdaten);
        tracing::debug!(
            ssrc = format_args!("{:#010x}", header.ssrc),
            slot = idx,
            "Mixer: neuer Stream"
        );
        inner.eintraege[idx] = Some(eintrag);
    }

    /// Mischt einen Frame aus allen aktiven Quellen
    ///
    /// Zieht pro Quelle hoechstens einen Frame, summiert in einem
    /// 32-Bit-Akkumulator und saettigt auf den 16-Bit-Bereich.
    /// Gibt die Anzahl geschriebener Samples zurueck (0 = nichts anliegend).
    pub fn gemischt_entnehmen(&self, ausgabe: &mut [i16]) -> usize {
        let mut inner = self.inner.lock();

        let mut akkumulator = vec![0i32; ausgabe.len()];
        let mut max_laenge = 0usize;

        for eintrag in inner.eintraege.iter_mut().flatten() {
            let StreamEintrag {
                buffer, decoder, ..
            } = eintrag;
            if let Some(frame) = buffer.entnehmen(decoder.as_mut()) {
                let n = frame.samples.len().min(akkumulator.len());
                for (ziel, &sample) in akkumulator[..n].iter_mut().zip(frame.samples.iter()) {
                    *ziel += sample as i32;
                }
                max_laenge = max_laenge.max(n);
            }
        }

        for (ziel, &summe) in ausgabe[..max_laenge].iter_mut().zip(akkumulator.iter()) {
            *ziel = summe.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        }

        max_laenge
    }

    /// Raeumt Eintraege ab, die laenger als `timeout` kein Paket gesehen haben
    ///
    /// Gibt die Anzahl entfernter Streams zurueck.
    pub fn inaktive_bereinigen(&self, timeout: Duration) -> usize {
        let mut inner = self.inner.lock();
        let jetzt = Instant::now();
        let mut entfernt = 0;

        for slot in inner.eintraege.iter_mut() {
            let abgelaufen = slot
                .as_ref()
                .map(|e| jetzt.duration_since(e.zuletzt_aktiv) > timeout)
                .unwrap_or(false);
            if abgelaufen {
                if let Some(alt) = slot.take() {
                    tracing::debug!(
                        ssrc = format_args!("{:#010x}", alt.ssrc),
                        "Mixer: inaktiven Stream entfernt"
                    );
                }
                entfernt += 1;
            }
        }

        entfernt
    }

    /// Setzt alle Streams zurueck (Buffer und Decoder werden zerstoert)
    pub fn zuruecksetzen(&self) {
        let mut inner = self.inner.lock();
        for slot in inner.eintraege.iter_mut() {
            *slot = None;
        }
        tracing::debug!("Mixer zurueckgesetzt");
    }

    /// Anzahl aktiver Streams
    pub fn aktive_streams(&self) -> usize {
        self.inner.lock().eintraege.iter().flatten().count()
    }

    /// Aggregierte Statistik ueber alle aktiven Streams
    pub fn statistik(&self) -> JitterStatistik {
        let inner = self.inner.lock();
        let mut gesamt = JitterStatistik::default();
        for eintrag in inner.eintraege.iter().flatten() {
            gesamt.addieren(&eintrag.buffer.statistik());
        }
        gesamt
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{PcmCodec, PcmFabrik};
    use crate::codec::AudioEncoder;
    use funkraum_protocol::voice::{RtpHeader, PAYLOAD_VOICE};

    fn mixer_ohne_aufwaermen() -> MultiStreamMixer {
        let config = JitterConfig {
            ziel_ms: 0,
            ..JitterConfig::default()
        };
        MultiStreamMixer::neu(4, config, Arc::new(PcmFabrik))
    }

    fn header(ssrc: u32, seq: u16) -> RtpHeader {
        RtpHeader::neu(PAYLOAD_VOICE, seq, seq as u32 * 960, ssrc)
    }

    fn pcm_nutzdaten(wert: i16, anzahl: usize) -> Vec<u8> {
        let mut codec = PcmCodec::neu();
        let pcm = vec![wert; anzahl];
        let mut buf = vec![0u8; anzahl * 2];
        codec.kodieren(&pcm, &mut buf).unwrap();
        buf
    }

    #[test]
    fn zwei_quellen_werden_summiert() {
        let mixer = mixer_ohne_aufwaermen();

        mixer.einfuegen(&header(0x1111, 0), &pcm_nutzdaten(100, 4));
        mixer.einfuegen(&header(0x2222, 0), &pcm_nutzdaten(25, 4));

        let mut ausgabe = vec![0i16; 8];
        let n = mixer.gemischt_entnehmen(&mut ausgabe);
        assert_eq!(n, 4);
        assert_eq!(&ausgabe[..4], &[125i16; 4][..]);
    }

    #[test]
    fn saettigung_auf_16_bit() {
        let mixer = mixer_ohne_aufwaermen();

        mixer.einfuegen(&header(0x1111, 0), &pcm_nutzdaten(i16::MAX, 4));
        mixer.einfuegen(&header(0x2222, 0), &pcm_nutzdaten(i16::MAX, 4));
        mixer.einfuegen(&header(0x3333, 0), &pcm_nutzdaten(1000, 4));

        let mut ausgabe = vec![0i16; 4];
        let n = mixer.gemischt_entnehmen(&mut ausgabe);
        assert_eq!(n, 4);
        assert!(ausgabe.iter().all(|&s| s == i16::MAX), "Summe muss saettigen");

        // Negative Richtung
        mixer.einfuegen(&header(0x1111, 1), &pcm_nutzdaten(i16::MIN, 4));
        mixer.einfuegen(&header(0x2222, 1), &pcm_nutzdaten(i16::MIN, 4));
        let n = mixer.gemischt_entnehmen(&mut ausgabe);
        assert_eq!(n, 4);
        assert!(ausgabe.iter().all(|&s| s == i16::MIN));
    }

    #[test]
    fn eigene_ssrc_wird_uebersprungen() {
        let mixer = mixer_ohne_aufwaermen();
        mixer.eigene_ssrc_setzen(0xAAAA);

        mixer.einfuegen(&header(0xAAAA, 0), &pcm_nutzdaten(100, 4));
        assert_eq!(mixer.aktive_streams(), 0);

        mixer.einfuegen(&header(0xBBBB, 0), &pcm_nutzdaten(100, 4));
        assert_eq!(mixer.aktive_streams(), 1);
    }

    #[test]
    fn pro_quelle_genau_ein_eintrag() {
        let mixer = mixer_ohne_aufwaermen();

        for seq in 0..5u16 {
            mixer.einfuegen(&header(0x1234, seq), &pcm_nutzdaten(1, 4));
        }
        assert_eq!(mixer.aktive_streams(), 1);
    }

    #[test]
    fn volle_tabelle_verdraengt_aeltesten() {
        let mixer = mixer_ohne_aufwaermen(); // Kapazitaet 4

        for i in 0..4u32 {
            mixer.einfuegen(&header(0x1000 + i, 0), &pcm_nutzdaten(1, 4));
            // Ankunftszeiten unterscheidbar machen
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(mixer.aktive_streams(), 4);

        // Fuenfte Quelle verdraengt die aelteste (0x1000)
        mixer.einfuegen(&header(0x2000, 0), &pcm_nutzdaten(1, 4));
        assert_eq!(mixer.aktive_streams(), 4);

        // 0x1000 bekommt nach Verdraengung einen frischen Eintrag
        mixer.einfuegen(&header(0x1000, 7), &pcm_nutzdaten(1, 4));
        assert_eq!(mixer.aktive_streams(), 4);
    }

    #[test]
    fn cleanup_entfernt_nur_inaktive() {
        let mixer = mixer_ohne_aufwaermen();

        mixer.einfuegen(&header(0x1111, 0), &pcm_nutzdaten(1, 4));
        mixer.einfuegen(&header(0x2222, 0), &pcm_nutzdaten(1, 4));

        // Nichts ist aelter als 10 Sekunden
        assert_eq!(mixer.inaktive_bereinigen(STREAM_TIMEOUT), 0);
        assert_eq!(mixer.aktive_streams(), 2);

        // Mit Null-Timeout fliegt alles raus
        assert_eq!(mixer.inaktive_bereinigen(Duration::ZERO), 2);
        assert_eq!(mixer.aktive_streams(), 0);
    }

    #[test]
    fn zuruecksetzen_entfernt_alle_streams() {
        let mixer = mixer_ohne_aufwaermen();
        mixer.einfuegen(&header(0x1111, 0), &pcm_nutzdaten(1, 4));
        mixer.zuruecksetzen();
        assert_eq!(mixer.aktive_streams(), 0);

        let mut ausgabe = vec![0i16; 4];
        assert_eq!(mixer.gemischt_entnehmen(&mut ausgabe), 0);
    }

    #[test]
    fn statistik_aggregiert_quellen() {
        let mixer = mixer_ohne_aufwaermen();
        mixer.einfuegen(&header(0x1111, 0), &pcm_nutzdaten(1, 4));
        mixer.einfuegen(&header(0x2222, 0), &pcm_nutzdaten(1, 4));
        mixer.einfuegen(&header(0x2222, 1), &pcm_nutzdaten(1, 4));

        let stats = mixer.statistik();
        assert_eq!(stats.empfangen, 3);
    }

    #[test]
    fn leerer_mixer_liefert_null_samples() {
        let mixer = mixer_ohne_aufwaermen();
        let mut ausgabe = vec![0i16; 960];
        assert_eq!(mixer.gemischt_entnehmen(&mut ausgabe), 0);
    }
}
