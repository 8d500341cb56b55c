//! Media-Relay: UDP-Empfang und Fan-out
//!
//! Eine einzelne Empfangs-Schleife nimmt Datagramme an, identifiziert den
//! Sender ueber die SSRC und reicht die **unveraenderten Original-Bytes**
//! an alle uebrigen Sitzungsmitglieder weiter. Kein Puffer, kein Mixing,
//! kein Transcoding auf diesem Pfad.
//!
//! Gesendet wird nicht-blockierend (`try_send_to`); ein Fehler bei einem
//! Empfaenger beruehrt die anderen nicht. Da nur dieser eine Task sendet,
//! bleibt die relative Reihenfolge pro Quelle erhalten.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::watch;

use funkraum_core::konstanten::MAX_MEDIA_NUTZDATEN;
use funkraum_core::Ssrc;
use funkraum_protocol::voice::{RtpHeader, RtpPacket, PAYLOAD_VOICE};

use crate::session::SitzungsTabelle;

/// Empfangspuffer: Header + maximale Nutzdaten, mit etwas Reserve, damit
/// uebergrosse Datagramme erkannt (und verworfen) statt abgeschnitten werden
const EMPFANGSPUFFER: usize = RtpHeader::GROESSE + MAX_MEDIA_NUTZDATEN + 64;

/// Maximal zulaessige Datagramm-Groesse
const MAX_DATAGRAMM: usize = RtpHeader::GROESSE + MAX_MEDIA_NUTZDATEN;

// ---------------------------------------------------------------------------
// Statistik
// ---------------------------------------------------------------------------

/// Zaehler des Media-Relays (Snapshot)
#[derive(Debug, Clone, Default)]
pub struct RelayStatistik {
    /// Angenommene Datagramme
    pub empfangen: u64,
    /// Weitergeleitete Datagramme (Summe ueber alle Empfaenger)
    pub weitergeleitet: u64,
    /// Verworfene Datagramme (zu gross, ungueltig, unbekannte Quelle)
    pub verworfen: u64,
    /// Fehlgeschlagene Einzel-Sendungen
    pub sendefehler: u64,
}

// ---------------------------------------------------------------------------
// MediaRelay
// ---------------------------------------------------------------------------

/// Media-Relay auf dem gebundenen UDP-Socket
pub struct MediaRelay {
    socket: Arc<UdpSocket>,
    tabelle: SitzungsTabelle,
    statistik: Arc<Mutex<RelayStatistik>>,
    /// Sequenzzaehler fuer server-eigenes Audio
    eigene_sequenz: Mutex<u16>,
    /// SSRC des Servers
    eigene_ssrc: Ssrc,
}

impl MediaRelay {
    /// Erstellt das Relay auf einem bereits gebundenen Socket
    pub fn neu(socket: Arc<UdpSocket>, tabelle: SitzungsTabelle, eigene_ssrc: Ssrc) -> Self {
        Self {
            socket,
            tabelle,
            statistik: Arc::new(Mutex::new(RelayStatistik::default())),
            eigene_sequenz: Mutex::new(0),
            eigene_ssrc,
        }
    }

    /// Empfangs- und Fan-out-Schleife (laeuft bis zum Shutdown-Signal)
    pub async fn schleife(&self, mut shutdown: watch::Receiver<bool>) {
        let mut puffer = [0u8; EMPFANGSPUFFER];
        tracing::info!("Media-Relay gestartet");

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut puffer) => {
                    match result {
                        Ok((laenge, absender)) => {
                            self.datagramm_verarbeiten(&puffer[..laenge], absender);
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "Media-Empfangsfehler");
                            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                        }
                    }
                }

                Ok(()) = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Media-Relay beendet");
    }

    /// Gibt einen Statistik-Snapshot zurueck
    pub fn statistik(&self) -> RelayStatistik {
        self.statistik.lock().clone()
    }

    /// Sendet server-eigenes Audio an alle Sitzungsmitglieder
    ///
    /// Im reinen Relay-Betrieb ungenutzt; der Sequenzzaehler ist dafuer
    /// reserviert.
    pub fn audio_senden(&self, nutzdaten: &[u8], timestamp: u32) {
        let sequenz = {
            let mut zaehler = self.eigene_sequenz.lock();
            let s = *zaehler;
            *zaehler = zaehler.wrapping_add(1);
            s
        };

        let mut paket = RtpPacket::neu_voice(
            sequenz,
            timestamp,
            self.eigene_ssrc.inner(),
            nutzdaten.to_vec(),
        );
        paket.header.payload_type = PAYLOAD_VOICE;
        paket.header.vad_setzen(true);
        let bytes = paket.encode();

        let ziele = self.tabelle.media_ziele_ausser(self.eigene_ssrc);
        let mut stats = self.statistik.lock();
        for ziel in ziele {
            match self.socket.try_send_to(&bytes, ziel) {
                Ok(_) => stats.weitergeleitet += 1,
                Err(_) => stats.sendefehler += 1,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Interner Fan-out-Pfad
    // -----------------------------------------------------------------------

    /// Verarbeitet ein eingehendes Datagramm (Hot Path)
    fn datagramm_verarbeiten(&self, daten: &[u8], absender: std::net::SocketAddr) {
        if daten.len() > MAX_DATAGRAMM {
            self.statistik.lock().verworfen += 1;
            tracing::debug!(
                bytes = daten.len(),
                absender = %absender,
                "Uebergrosses Media-Datagramm verworfen"
            );
            return;
        }

        let header = match RtpHeader::decode(daten) {
            Ok(h) => h,
            Err(e) => {
                self.statistik.lock().verworfen += 1;
                tracing::debug!(fehler = %e, absender = %absender, "Ungueltiges Media-Datagramm");
                return;
            }
        };

        let quelle = Ssrc(header.ssrc);

        // Unbekannte Quelle: kann einem Join-Rennen vorauslaufen – still verwerfen
        if !self.tabelle.kennt_ssrc(quelle) {
            self.statistik.lock().verworfen += 1;
            tracing::trace!(ssrc = %quelle, absender = %absender, "Unbekannte Quelle");
            return;
        }

        // Sprechen-Flag aus dem VAD-Bit uebernehmen
        self.tabelle.spricht_setzen(quelle, header.vad_aktiv());

        self.statistik.lock().empfangen += 1;

        // Unveraenderte Original-Bytes an alle anderen Sitzungsmitglieder
        let ziele = self.tabelle.media_ziele_ausser(quelle);
        let mut weitergeleitet = 0usize;
        {
            let mut stats = self.statistik.lock();
            for ziel in &ziele {
                match self.socket.try_send_to(daten, *ziel) {
                    Ok(_) => {
                        stats.weitergeleitet += 1;
                        weitergeleitet += 1;
                    }
                    Err(_) => {
                        // WouldBlock oder Netzfehler: ein verlorenes Datagramm
                        stats.sendefehler += 1;
                    }
                }
            }
        }

        tracing::trace!(
            ssrc = %quelle,
            sequenz = header.sequence,
            bytes = daten.len(),
            empfaenger = weitergeleitet,
            "Media-Datagramm weitergeleitet"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
