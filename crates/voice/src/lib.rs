//! funkraum-voice – Empfangsseitige Sprachverarbeitung
//!
//! Implementiert die jitter-absorbierende Empfangs-Pipeline:
//!
//! ## Module
//! - [`codec`] – Codec-Faehigkeitsschnittstelle (Decode/PLC/Encode) + PCM-Fallback
//! - [`jitter_buffer`] – Fester Slot-Ring fuer einen einzelnen Stream
//! - [`mixer`] – Multi-Stream-Mixer mit per-SSRC Jitter Buffern

pub mod codec;
pub mod jitter_buffer;
pub mod mixer;

pub use codec::{AudioDecoder, AudioEncoder, DecoderFabrik, PcmCodec, PcmFabrik};
pub use jitter_buffer::{JitterBuffer, JitterConfig, JitterFrame, JitterStatistik};
pub use mixer::MultiStreamMixer;
