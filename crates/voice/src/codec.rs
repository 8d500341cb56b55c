//! Codec-Faehigkeitsschnittstelle
//!
//! Der konkrete Sprach-Codec (samt dynamischem Lader) liegt ausserhalb
//! dieses Workspaces und wird beim Sitzungsstart eingesteckt. Der Jitter
//! Buffer und der Mixer halten nur die abstrakten Handles.
//!
//! Payload-Typ 0 (lineares PCM) ist als Fallback eingebaut und dient
//! gleichzeitig als Test-Codec.

use funkraum_core::{FunkraumError, Result};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Dekoder-Seite eines Sprach-Codecs
///
/// Eine Instanz gehoert genau einem Stream (ein Sender); der Zustand
/// zwischen den Frames (Praediktor, PLC-Historie) lebt in der Instanz.
pub trait AudioDecoder: Send {
    /// Dekodiert kodierte Nutzdaten in PCM.
    ///
    /// Gibt die Anzahl geschriebener Samples zurueck.
    fn dekodieren(&mut self, nutzdaten: &[u8], ausgabe: &mut [i16]) -> Result<usize>;

    /// Synthetisiert einen Frame Verdeckungs-Audio (PLC) fuer ein
    /// verlorenes Paket. Gibt die Anzahl geschriebener Samples zurueck.
    fn verdecken(&mut self, ausgabe: &mut [i16]) -> Result<usize>;
}

/// Encoder-Seite eines Sprach-Codecs
pub trait AudioEncoder: Send {
    /// Kodiert einen PCM-Frame. Gibt die Anzahl geschriebener Bytes zurueck.
    fn kodieren(&mut self, pcm: &[i16], ausgabe: &mut [u8]) -> Result<usize>;
}

/// Fabrik fuer per-Stream-Decoder
///
/// Der Mixer erstellt ueber die Fabrik fuer jede neue Quelle einen
/// eigenen Decoder und zerstoert ihn beim Entfernen des Eintrags.
pub trait DecoderFabrik: Send + Sync {
    fn decoder_erstellen(&self) -> Box<dyn AudioDecoder>;
}

// ---------------------------------------------------------------------------
// PCM-Fallback
// ---------------------------------------------------------------------------

/// Linearer 16-Bit-PCM-"Codec" (Payload-Typ 0)
///
/// Kein eigentliches Encoding: Samples werden little-endian kopiert.
/// PLC fuellt mit Stille.
#[derive(Debug, Default)]
pub struct PcmCodec;

impl PcmCodec {
    pub fn neu() -> Self {
        Self
    }
}

impl AudioDecoder for PcmCodec {
    fn dekodieren(&mut self, nutzdaten: &[u8], ausgabe: &mut [i16]) -> Result<usize> {
        if nutzdaten.len() % 2 != 0 {
            return Err(FunkraumError::Codec(
                "PCM-Nutzdaten mit ungerader Byte-Anzahl".into(),
            ));
        }
        let samples = nutzdaten.len() / 2;
        if samples > ausgabe.len() {
            return Err(FunkraumError::Codec(format!(
                "PCM-Frame zu gross: {samples} Samples (Puffer {})",
                ausgabe.len()
            )));
        }
        for (i, chunk) in nutzdaten.chunks_exact(2).enumerate() {
            ausgabe[i] = i16::from_le_bytes([chunk[0], chunk[1]]);
        }
        Ok(samples)
    }

    fn verdecken(&mut self, ausgabe: &mut [i16]) -> Result<usize> {
        ausgabe.fill(0);
        Ok(ausgabe.len())
    }
}

impl AudioEncoder for PcmCodec {
    fn kodieren(&mut self, pcm: &[i16], ausgabe: &mut [u8]) -> Result<usize> {
        let benoetigt = pcm.len() * 2;
        if benoetigt > ausgabe.len() {
            return Err(FunkraumError::Codec(format!(
                "PCM-Ausgabepuffer zu klein: {benoetigt} Bytes benoetigt"
            )));
        }
        for (i, sample) in pcm.iter().enumerate() {
            ausgabe[i * 2..i * 2 + 2].copy_from_slice(&sample.to_le_bytes());
        }
        Ok(benoetigt)
    }
}

/// Fabrik fuer den PCM-Fallback
#[derive(Debug, Default)]
pub struct PcmFabrik;

impl DecoderFabrik for PcmFabrik {
    fn decoder_erstellen(&self) -> Box<dyn AudioDecoder> {
        Box::new(PcmCodec::neu())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_encode_decode_round_trip() {
        let mut codec = PcmCodec::neu();
        let pcm: Vec<i16> = vec![-32768, -1, 0, 1, 32767];
        let mut bytes = vec![0u8; 10];
        let n = codec.kodieren(&pcm, &mut bytes).unwrap();
        assert_eq!(n, 10);

        let mut zurueck = vec![0i16; 5];
        let samples = codec.dekodieren(&bytes, &mut zurueck).unwrap();
        assert_eq!(samples, 5);
        assert_eq!(zurueck, pcm);
    }

    #[test]
    fn pcm_ungerade_laenge_abgelehnt() {
        let mut codec = PcmCodec::neu();
        let mut out = vec![0i16; 4];
        assert!(codec.dekodieren(&[1, 2, 3], &mut out).is_err());
    }

    #[test]
    fn pcm_verdecken_fuellt_stille() {
        let mut codec = PcmCodec::neu();
        let mut out = vec![99i16; 960];
        let n = codec.verdecken(&mut out).unwrap();
        assert_eq!(n, 960);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn fabrik_liefert_unabhaengige_decoder() {
        let fabrik = PcmFabrik;
        let mut d1 = fabrik.decoder_erstellen();
        let mut d2 = fabrik.decoder_erstellen();
        let mut out = vec![0i16; 4];
        assert!(d1.dekodieren(&[0, 0], &mut out).is_ok());
        assert!(d2.verdecken(&mut out).is_ok());
    }
}
