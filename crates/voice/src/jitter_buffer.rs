//! Jitter Buffer fuer einen einzelnen Media-Stream
//!
//! Fester Ring aus N Slots, indiziert ueber die niederwertigen Bits der
//! Sequenznummer. Nimmt Pakete in beliebiger Reihenfolge an und gibt pro
//! Wiedergabe-Tick genau einen Frame aus; fuer fehlende Pakete wird ein
//! Verdeckungs-Frame (PLC) synthetisiert.
//!
//! ## Zeitachse
//!
//! Der Slot fuer eine Sequenznummer ergibt sich aus
//! `(head + (seq - naechste_seq)) mod N` mit vorzeichenbehafteter
//! 16-Bit-Differenz. Pakete mit Differenz < -N/2 gelten als verspaetet,
//! Pakete mit Differenz >= N als Ueberlauf; beide werden verworfen und
//! gezaehlt.
//!
//! ## Aufwaerm-Politik
//!
//! Ziel-Verzoegerungs-Schranke: vor der ersten Ausgabe (und nach einem
//! Leerlauf) wird gewartet bis `fuellstand * 20 ms >= ziel_ms` oder
//! mindestens 3 Pakete anliegen. Ein leerer Buffer gibt nichts aus.

use std::time::Instant;

use funkraum_core::konstanten::{FRAME_MS, FRAME_SAMPLES, JITTER_MAX_MS, JITTER_MIN_MS,
    JITTER_SLOTS, JITTER_ZIEL_MS, MAX_MEDIA_NUTZDATEN};
use funkraum_protocol::voice::RtpHeader;

use crate::codec::AudioDecoder;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration des Jitter Buffers
#[derive(Debug, Clone)]
pub struct JitterConfig {
    /// Ziel-Verzoegerung in Millisekunden (Aufwaerm-Schranke)
    pub ziel_ms: u32,
    /// Minimale Verzoegerung in Millisekunden
    pub min_ms: u32,
    /// Maximale Verzoegerung in Millisekunden
    pub max_ms: u32,
    /// Anzahl der Slots im Ring
    pub slots: usize,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            ziel_ms: JITTER_ZIEL_MS,
            min_ms: JITTER_MIN_MS,
            max_ms: JITTER_MAX_MS,
            slots: JITTER_SLOTS,
        }
    }
}

// ---------------------------------------------------------------------------
// Statistiken
// ---------------------------------------------------------------------------

/// Statistiken des Jitter Buffers (Snapshot)
#[derive(Debug, Clone, Default)]
pub struct JitterStatistik {
    /// Angenommene Pakete
    pub empfangen: u64,
    /// Verlorene Pakete (PLC ausgegeben)
    pub verloren: u64,
    /// Verspaetete Pakete (hinter dem Wiedergabepunkt, verworfen)
    pub verspaetet: u64,
    /// Umsortiert angekommene Pakete
    pub umsortiert: u64,
    /// Leerlaeufe (faelliger Slot war leer)
    pub leerlaeufe: u64,
    /// Ueberlaeufe (Paket zu weit in der Zukunft, verworfen)
    pub ueberlaeufe: u64,
    /// Geschaetzter Jitter in Millisekunden (EMA)
    pub jitter_ms: f32,
    /// Verlustrate: verloren / (empfangen + verloren)
    pub verlust_rate: f32,
}

impl JitterStatistik {
    /// Addiert eine andere Statistik auf (fuer Mixer-Aggregation)
    pub fn addieren(&mut self, andere: &JitterStatistik) {
        self.empfangen += andere.empfangen;
        self.verloren += andere.verloren;
        self.verspaetet += andere.verspaetet;
        self.umsortiert += andere.umsortiert;
        self.leerlaeufe += andere.leerlaeufe;
        self.ueberlaeufe += andere.ueberlaeufe;
        self.jitter_ms = self.jitter_ms.max(andere.jitter_ms);
        let gesamt = self.empfangen + self.verloren;
        self.verlust_rate = if gesamt > 0 {
            self.verloren as f32 / gesamt as f32
        } else {
            0.0
        };
    }
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// Zustand eines Slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotZustand {
    Leer,
    Gefuellt,
    Dekodiert,
}

/// Ein Slot der Zeitachse
struct JitterSlot {
    zustand: SlotZustand,
    sequence: u16,
    timestamp: u32,
    ssrc: u32,
    nutzdaten: Vec<u8>,
    dekodiert: Vec<i16>,
    empfangen_um: Option<Instant>,
}

impl JitterSlot {
    fn leer() -> Self {
        Self {
            zustand: SlotZustand::Leer,
            sequence: 0,
            timestamp: 0,
            ssrc: 0,
            nutzdaten: Vec::new(),
            dekodiert: Vec::new(),
            empfangen_um: None,
        }
    }

    fn leeren(&mut self) {
        self.zustand = SlotZustand::Leer;
        self.nutzdaten.clear();
        self.dekodiert.clear();
        self.empfangen_um = None;
    }
}

// ---------------------------------------------------------------------------
// Ausgabe-Frame
// ---------------------------------------------------------------------------

/// Ein vom Jitter Buffer ausgegebener Audio-Frame
#[derive(Debug, Clone)]
pub struct JitterFrame {
    /// PCM-Samples (ein 20-ms-Frame)
    pub samples: Vec<i16>,
    /// Sequenznummer auf der Zeitachse
    pub sequence: u16,
    /// true wenn der Frame per PLC synthetisiert wurde
    pub verdeckt: bool,
}

// ---------------------------------------------------------------------------
// Ergebnis des Einfuegens
// ---------------------------------------------------------------------------

/// Klassifikation eines eingehenden Pakets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EinfuegeErgebnis {
    /// Paket angenommen
    Angenommen,
    /// Duplikat, still verworfen
    Duplikat,
    /// Hinter dem Wiedergabepunkt, verworfen
    Verspaetet,
    /// Zu weit in der Zukunft, verworfen
    Ueberlauf,
}

// ---------------------------------------------------------------------------
// JitterBuffer
// ---------------------------------------------------------------------------

/// Jitter Buffer – feste Slot-Zeitachse fuer einen Stream
///
/// Nicht thread-safe; der Besitzer (Mixer-Eintrag oder Test) serialisiert
/// die Zugriffe.
pub struct JitterBuffer {
    config: JitterConfig,
    slots: Vec<JitterSlot>,
    /// Index des naechsten auszugebenden Slots
    head: usize,
    /// Anzahl gefuellter Slots
    fuellstand: usize,
    /// Erwartete naechste Sequenznummer
    naechste_seq: u16,
    /// Gesetzt sobald das erste Paket angenommen wurde
    initialisiert: bool,
    /// Jitter-Schaetzung (EMA ueber |d_ankunft - d_timestamp|)
    jitter: f32,
    letzte_ankunft: Option<Instant>,
    letzter_timestamp: u32,
    statistik: JitterStatistik,
}

impl JitterBuffer {
    /// Erstellt einen neuen Jitter Buffer
    pub fn neu(config: JitterConfig) -> Self {
        let slots = (0..config.slots).map(|_| JitterSlot::leer()).collect();
        Self {
            config,
            slots,
            head: 0,
            fuellstand: 0,
            naechste_seq: 0,
            initialisiert: false,
            jitter: 0.0,
            letzte_ankunft: None,
            letzter_timestamp: 0,
            statistik: JitterStatistik::default(),
        }
    }

    /// Erstellt einen Buffer mit Standardkonfiguration
    pub fn standard() -> Self {
        Self::neu(JitterConfig::default())
    }

    /// Setzt den Buffer vollstaendig zurueck
    pub fn zuruecksetzen(&mut self) {
        for slot in &mut self.slots {
            slot.leeren();
        }
        self.head = 0;
        self.fuellstand = 0;
        self.naechste_seq = 0;
        self.initialisiert = false;
        self.jitter = 0.0;
        self.letzte_ankunft = None;
        self.letzter_timestamp = 0;
        self.statistik = JitterStatistik::default();
        tracing::debug!("Jitter Buffer zurueckgesetzt");
    }

    /// Fuegt ein Paket auf der Zeitachse ein
    pub fn einfuegen(&mut self, header: &RtpHeader, nutzdaten: &[u8]) -> EinfuegeErgebnis {
        let jetzt = Instant::now();
        self.jitter_messen(header.timestamp, jetzt);

        if !self.initialisiert {
            self.naechste_seq = header.sequence;
            self.initialisiert = true;
            tracing::debug!(seq = header.sequence, "Jitter Buffer: Sequenz initialisiert");
        }

        let delta = (header.sequence.wrapping_sub(self.naechste_seq)) as i16 as i32;
        let n = self.config.slots as i32;

        // Hinter dem Wiedergabepunkt
        if delta < -(n / 2) {
            self.statistik.verspaetet += 1;
            return EinfuegeErgebnis::Verspaetet;
        }

        // Zu weit in der Zukunft
        if delta >= n {
            self.statistik.ueberlaeufe += 1;
            return EinfuegeErgebnis::Ueberlauf;
        }

        let idx = (self.head as i32 + delta).rem_euclid(n) as usize;
        let slot = &mut self.slots[idx];

        // Duplikat: Slot bereits mit derselben Sequenz belegt
        if slot.zustand != SlotZustand::Leer && slot.sequence == header.sequence {
            return EinfuegeErgebnis::Duplikat;
        }

        if delta != 0 && self.fuellstand > 0 {
            self.statistik.umsortiert += 1;
        }

        slot.zustand = SlotZustand::Gefuellt;
        slot.sequence = header.sequence;
        slot.timestamp = header.timestamp;
        slot.ssrc = header.ssrc;
        slot.nutzdaten.clear();
        let laenge = nutzdaten.len().min(MAX_MEDIA_NUTZDATEN);
        slot.nutzdaten.extend_from_slice(&nutzdaten[..laenge]);
        slot.dekodiert.clear();
        slot.empfangen_um = Some(jetzt);

        self.fuellstand += 1;
        self.statistik.empfangen += 1;
        EinfuegeErgebnis::Angenommen
    }

    /// Gibt genau einen Frame aus (einmal pro 20-ms-Tick aufzurufen)
    ///
    /// `None` solange noch kein Paket angekommen ist oder die
    /// Aufwaerm-Schranke nicht erreicht ist.
    pub fn entnehmen(&mut self, decoder: &mut dyn AudioDecoder) -> Option<JitterFrame> {
        if !self.initialisiert {
            return None;
        }

        // Leerer Buffer: kompletter Strom-Leerlauf, oben als Stille behandelt
        if self.fuellstand == 0 {
            return None;
        }

        // Aufwaerm-/Nachfuell-Schranke: auf Ziel-Verzoegerung warten
        let fuellstand_ms = self.fuellstand as u32 * FRAME_MS;
        if fuellstand_ms < self.config.ziel_ms && self.fuellstand < 3 {
            return None;
        }

        let sequence = self.naechste_seq;
        let head = self.head;

        if self.slots[head].zustand == SlotZustand::Leer {
            // Erwartetes Paket ist nicht angekommen – PLC
            self.statistik.verloren += 1;
            self.statistik.leerlaeufe += 1;
            let samples = Self::plc_frame(decoder);
            self.weiterschalten(false);
            self.verlust_rate_aktualisieren();
            return Some(JitterFrame {
                samples,
                sequence,
                verdeckt: true,
            });
        }

        if self.slots[head].zustand == SlotZustand::Gefuellt {
            let mut pcm = vec![0i16; FRAME_SAMPLES];
            let nutzdaten = std::mem::take(&mut self.slots[head].nutzdaten);
            match decoder.dekodieren(&nutzdaten, &mut pcm) {
                Ok(anzahl) if anzahl > 0 => {
                    pcm.truncate(anzahl);
                    self.slots[head].dekodiert = pcm;
                    self.slots[head].zustand = SlotZustand::Dekodiert;
                }
                _ => {
                    // Dekodierfehler zaehlt als Verlust
                    self.statistik.verloren += 1;
                    let samples = Self::plc_frame(decoder);
                    self.slots[head].leeren();
                    self.weiterschalten(true);
                    self.verlust_rate_aktualisieren();
                    return Some(JitterFrame {
                        samples,
                        sequence,
                        verdeckt: true,
                    });
                }
            }
        }

        let samples = std::mem::take(&mut self.slots[head].dekodiert);
        self.slots[head].leeren();
        self.weiterschalten(true);
        self.verlust_rate_aktualisieren();

        Some(JitterFrame {
            samples,
            sequence,
            verdeckt: false,
        })
    }

    /// Aktueller Fuellstand in Millisekunden
    pub fn fuellstand_ms(&self) -> u32 {
        self.fuellstand as u32 * FRAME_MS
    }

    /// Anzahl gefuellter Slots
    pub fn fuellstand(&self) -> usize {
        self.fuellstand
    }

    /// Gibt eine Kopie der aktuellen Statistiken zurueck
    pub fn statistik(&self) -> JitterStatistik {
        self.statistik.clone()
    }

    /// true sobald das erste Paket angenommen wurde
    pub fn ist_initialisiert(&self) -> bool {
        self.initialisiert
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsfunktionen
    // -----------------------------------------------------------------------

    /// Schaltet head und naechste_seq im Gleichschritt weiter
    fn weiterschalten(&mut self, slot_war_gefuellt: bool) {
        self.head = (self.head + 1) % self.config.slots;
        self.naechste_seq = self.naechste_seq.wrapping_add(1);
        if slot_war_gefuellt {
            self.fuellstand -= 1;
        }
    }

    fn verlust_rate_aktualisieren(&mut self) {
        let gesamt = self.statistik.empfangen + self.statistik.verloren;
        if gesamt > 0 {
            self.statistik.verlust_rate = self.statistik.verloren as f32 / gesamt as f32;
        }
    }

    /// Synthetisiert einen PLC-Frame; Stille falls der Decoder versagt
    fn plc_frame(decoder: &mut dyn AudioDecoder) -> Vec<i16> {
        let mut pcm = vec![0i16; FRAME_SAMPLES];
        match decoder.verdecken(&mut pcm) {
            Ok(anzahl) if anzahl > 0 => pcm.truncate(anzahl),
            _ => {} // Stille in voller Frame-Laenge
        }
        pcm
    }

    /// Jitter-Schaetzung nach RFC 3550: EMA ueber |d_ankunft - d_timestamp|
    fn jitter_messen(&mut self, timestamp: u32, jetzt: Instant) {
        if let Some(letzte) = self.letzte_ankunft {
            let d_ankunft_ms = jetzt.duration_since(letzte).as_secs_f32() * 1000.0;
            let d_ts_ms = (timestamp.wrapping_sub(self.letzter_timestamp)) as f32 * 1000.0
                / funkraum_core::konstanten::ABTASTRATE as f32;
            let diff = (d_ankunft_ms - d_ts_ms).abs();
            self.jitter += (diff - self.jitter) / 16.0;
            self.statistik.jitter_ms = self.jitter;
        }
        self.letzte_ankunft = Some(jetzt);
        self.letzter_timestamp = timestamp;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
