//! Aufnahme-Schleife: Quelle -> DSP-Gate -> Encoder -> Netz
//!
//! Die Schleife laeuft als eigener Betriebssystem-Thread im Takt des
//! Aufnahmegeraets (ein 20-ms-Frame pro Durchlauf) und haelt selbst keine
//! Sockets: fertige Media-Pakete werden ueber einen crossbeam-Kanal an
//! den Netzwerk-Teil uebergeben.
//!
//! Die Geraetebindung implementiert [`CaptureQuelle`] (blockierendes Lesen
//! mit interner Deadline) bzw. [`WiedergabeSenke`] fuer die Gegenrichtung.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use funkraum_core::konstanten::{FRAME_SAMPLES, MAX_MEDIA_NUTZDATEN};
use funkraum_protocol::voice::RtpPacket;
use funkraum_voice::codec::AudioEncoder;

use crate::dsp::DspGate;

// ---------------------------------------------------------------------------
// Traits zur Geraetebindung
// ---------------------------------------------------------------------------

/// Liefert rohe Capture-Frames vom Eingabegeraet
pub trait CaptureQuelle: Send {
    /// Blockiert bis ein voller Frame vorliegt und schreibt ihn nach `ziel`.
    ///
    /// Muss mit interner Deadline arbeiten (<= 500 ms) und `false`
    /// zurueckgeben wenn die Quelle geschlossen ist.
    fn frame_lesen(&mut self, ziel: &mut [i16]) -> bool;
}

/// Nimmt gemischte Frames fuer das Ausgabegeraet entgegen
pub trait WiedergabeSenke: Send {
    /// Reiht einen Frame in die Geraete-Warteschlange ein.
    fn frame_abspielen(&mut self, samples: &[i16]);
}

// ---------------------------------------------------------------------------
// Statistik
// ---------------------------------------------------------------------------

/// Zaehler der Aufnahme-Schleife (Snapshot)
#[derive(Debug, Clone, Default)]
pub struct AufnahmeStatistik {
    /// Verarbeitete Capture-Frames
    pub frames_verarbeitet: u64,
    /// Kodierte und versendete Pakete
    pub pakete_gesendet: u64,
    /// Wegen Stummschaltung uebersprungene Frames
    pub stumm_uebersprungen: u64,
    /// Encoder-Fehler
    pub encoder_fehler: u64,
    /// Voller Sende-Kanal (Paket verworfen)
    pub kanal_voll: u64,
}

// ---------------------------------------------------------------------------
// AufnahmeSchleife
// ---------------------------------------------------------------------------

/// Handle auf den laufenden Aufnahme-Thread
pub struct AufnahmeSchleife {
    laeuft: Arc<AtomicBool>,
    stumm: Arc<AtomicBool>,
    statistik: Arc<Mutex<AufnahmeStatistik>>,
    handle: Option<JoinHandle<()>>,
}

impl AufnahmeSchleife {
    /// Startet den Aufnahme-Thread
    ///
    /// `basis_timestamp` ist der Startwert des RTP-Zeitstempels (aus dem
    /// JOIN_ACK); die Sequenz beginnt bei 0 und laeuft modulo 2^16.
    pub fn starten(
        mut quelle: Box<dyn CaptureQuelle>,
        mut encoder: Box<dyn AudioEncoder>,
        mut gate: DspGate,
        ssrc: u32,
        basis_timestamp: u32,
        ausgang: Sender<RtpPacket>,
    ) -> std::io::Result<Self> {
        let laeuft = Arc::new(AtomicBool::new(true));
        let stumm = Arc::new(AtomicBool::new(false));
        let statistik = Arc::new(Mutex::new(AufnahmeStatistik::default()));

        let laeuft_thread = Arc::clone(&laeuft);
        let stumm_thread = Arc::clone(&stumm);
        let statistik_thread = Arc::clone(&statistik);

        let handle = std::thread::Builder::new()
            .name("funkraum-aufnahme".to_string())
            .spawn(move || {
                let mut frame = vec![0i16; FRAME_SAMPLES];
                let mut kodiert = vec![0u8; MAX_MEDIA_NUTZDATEN];
                let mut sequenz: u16 = 0;
                let mut timestamp: u32 = basis_timestamp;

                tracing::info!(ssrc = format_args!("{ssrc:#010x}"), "Aufnahme-Schleife gestartet");

                while laeuft_thread.load(Ordering::Relaxed) {
                    if !quelle.frame_lesen(&mut frame) {
                        tracing::info!("Capture-Quelle geschlossen");
                        break;
                    }

                    let (_, analyse) = gate.verarbeiten(&mut frame);
                    timestamp = timestamp.wrapping_add(FRAME_SAMPLES as u32);

                    {
                        let mut stats = statistik_thread.lock();
                        stats.frames_verarbeitet += 1;
                        if stumm_thread.load(Ordering::Relaxed) {
                            stats.stumm_uebersprungen += 1;
                            continue;
                        }
                    }

                    let laenge = match encoder.kodieren(&frame, &mut kodiert) {
                        Ok(n) if n > 0 => n,
                        Ok(_) => continue,
                        Err(e) => {
                            statistik_thread.lock().encoder_fehler += 1;
                            tracing::warn!(fehler = %e, "Encoder-Fehler, Frame verworfen");
                            continue;
                        }
                    };

                    let mut paket =
                        RtpPacket::neu_voice(sequenz, timestamp, ssrc, kodiert[..laenge].to_vec());
                    paket.header.vad_setzen(!analyse.ist_stille);
                    sequenz = sequenz.wrapping_add(1);

                    match ausgang.try_send(paket) {
                        Ok(()) => statistik_thread.lock().pakete_gesendet += 1,
                        Err(_) => {
                            statistik_thread.lock().kanal_voll += 1;
                            tracing::warn!("Sende-Kanal voll, Paket verworfen");
                        }
                    }
                }

                tracing::info!("Aufnahme-Schleife beendet");
            })?;

        Ok(Self {
            laeuft,
            stumm,
            statistik,
            handle: Some(handle),
        })
    }

    /// Schaltet die Aufnahme stumm (Frames werden verworfen, Gate laeuft weiter)
    pub fn stumm_setzen(&self, stumm: bool) {
        self.stumm.store(stumm, Ordering::Relaxed);
    }

    /// Gibt den Stumm-Zustand zurueck
    pub fn ist_stumm(&self) -> bool {
        self.stumm.load(Ordering::Relaxed)
    }

    /// Gibt einen Statistik-Snapshot zurueck
    pub fn statistik(&self) -> AufnahmeStatistik {
        self.statistik.lock().clone()
    }

    /// Stoppt die Schleife und wartet auf das Thread-Ende
    pub fn stoppen(mut self) {
        self.laeuft.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AufnahmeSchleife {
    fn drop(&mut self) {
        self.laeuft.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
