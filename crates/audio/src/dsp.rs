//! Capture-DSP: Frame-Analyse und Noise Gate
//!
//! Leichtgewichtige Verarbeitung vor dem Encoder:
//! 1. RMS-Energie und Nulldurchgangsrate pro Frame
//! 2. Klassifikation Stille / Hochenergie / Rauschen / Stimme
//! 3. Attack/Release-geglaettete Verstaerkung, die Stille stumm schaltet
//!    und hochenergetisches Nicht-Sprach-Signal daempft
//!
//! Rauschen und Stimme werden ueber die Nulldurchgangsrate getrennt:
//! tieffrequentes Brummen/Pfeifen hat eine sehr niedrige ZCR, Sprache
//! liegt typisch im Bereich 0.1 bis 0.4.

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Stille-Schwelle in dB
pub const GATE_SCHWELLE_DB: f32 = -40.0;

/// Hochenergie-Schwelle in dB (darueber wird klassifiziert)
pub const HOCHENERGIE_SCHWELLE_DB: f32 = -6.0;

/// Untere Nulldurchgangsraten-Schwelle (darunter: Nicht-Sprache)
pub const ZCR_NIEDRIG: f32 = 0.05;

/// Obere Nulldurchgangsraten-Schwelle (darueber: Zischen/Rauschen)
pub const ZCR_HOCH: f32 = 0.40;

/// Daempfungsfaktor bei erkanntem Rauschen
pub const DAEMPFUNGSFAKTOR: f32 = 0.1;

/// Attack-Zeitkonstante in Millisekunden (Verstaerkung faellt)
pub const ATTACK_ZEIT_MS: f32 = 5.0;

/// Release-Zeitkonstante in Millisekunden (Verstaerkung steigt)
pub const RELEASE_ZEIT_MS: f32 = 50.0;

use funkraum_core::konstanten::FRAME_MS;

// ---------------------------------------------------------------------------
// Werkzeugfunktionen
// ---------------------------------------------------------------------------

/// Berechnet die auf [0,1] normierte RMS-Energie eines i16-Frames
pub fn rms_berechnen(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let summe: i64 = samples.iter().map(|&s| s as i64 * s as i64).sum();
    let rms = ((summe as f64 / samples.len() as f64) as f32).sqrt();
    rms / 32768.0
}

/// Berechnet den Spitzenwert eines Frames
pub fn peak_berechnen(samples: &[i16]) -> i16 {
    samples
        .iter()
        .map(|&s| (s as i32).unsigned_abs().min(32767) as i16)
        .max()
        .unwrap_or(0)
}

/// Normierte Nulldurchgangsrate: Vorzeichenwechsel / (n - 1)
pub fn nulldurchgangsrate(samples: &[i16]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let wechsel = samples
        .windows(2)
        .filter(|w| (w[0] >= 0) != (w[1] >= 0))
        .count();
    wechsel as f32 / (samples.len() - 1) as f32
}

/// Linearwert (0..1) nach dB; Untergrenze -100 dB
pub fn linear_zu_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        return -100.0;
    }
    20.0 * linear.log10()
}

/// dB nach Linearwert
pub fn db_zu_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Wendet eine Verstaerkung mit Saettigung auf den i16-Bereich an
pub fn verstaerkung_anwenden(samples: &mut [i16], verstaerkung: f32) {
    if (verstaerkung - 1.0).abs() < f32::EPSILON {
        return;
    }
    if verstaerkung <= 0.0 {
        samples.fill(0);
        return;
    }
    for s in samples.iter_mut() {
        let wert = *s as f32 * verstaerkung;
        *s = wert.clamp(-32768.0, 32767.0) as i16;
    }
}

// ---------------------------------------------------------------------------
// Analyse
// ---------------------------------------------------------------------------

/// Analyse-Ergebnis eines Frames (veraendert die Samples nicht)
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioAnalyse {
    /// RMS-Energie in dB
    pub rms_db: f32,
    /// Spitzenwert in dB
    pub peak_db: f32,
    /// Nulldurchgangsrate (0..1)
    pub zcr: f32,
    /// Frame liegt unter der Stille-Schwelle
    pub ist_stille: bool,
    /// Frame liegt ueber der Hochenergie-Schwelle
    pub ist_hochenergie: bool,
    /// Hochenergie + niedrige ZCR: vermutlich Brummen/Pfeifen
    pub ist_rauschen: bool,
    /// Nicht still, ZCR im Sprachbereich
    pub ist_stimme: bool,
}

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration des Capture-Gates
#[derive(Debug, Clone)]
pub struct DspConfig {
    /// Stille-Schwelle in dB
    pub gate_schwelle_db: f32,
    /// Hochenergie-Schwelle in dB
    pub hochenergie_schwelle_db: f32,
    /// Untere ZCR-Schwelle
    pub zcr_niedrig: f32,
    /// Obere ZCR-Schwelle
    pub zcr_hoch: f32,
    /// Daempfungsfaktor bei Rauschen
    pub daempfungsfaktor: f32,
    /// Noise Gate aktiv (Stille wird stummgeschaltet)
    pub gate_aktiv: bool,
    /// Rauscherkennung aktiv (Hochenergie-Rauschen wird gedaempft)
    pub rauscherkennung_aktiv: bool,
}

impl Default for DspConfig {
    fn default() -> Self {
        Self {
            gate_schwelle_db: GATE_SCHWELLE_DB,
            hochenergie_schwelle_db: HOCHENERGIE_SCHWELLE_DB,
            zcr_niedrig: ZCR_NIEDRIG,
            zcr_hoch: ZCR_HOCH,
            daempfungsfaktor: DAEMPFUNGSFAKTOR,
            gate_aktiv: true,
            rauscherkennung_aktiv: true,
        }
    }
}

// ---------------------------------------------------------------------------
// DspGate
// ---------------------------------------------------------------------------

/// Attack/Release-geglaettetes Capture-Gate
///
/// Nicht thread-safe; lebt im Aufnahme-Thread.
pub struct DspGate {
    config: DspConfig,
    aktuelle_verstaerkung: f32,
    ziel_verstaerkung: f32,
    attack_koeff: f32,
    release_koeff: f32,
}

impl DspGate {
    /// Erstellt ein Gate mit der gegebenen Konfiguration
    pub fn neu(config: DspConfig) -> Self {
        let frame_s = FRAME_MS as f32 / 1000.0;
        Self {
            config,
            aktuelle_verstaerkung: 1.0,
            ziel_verstaerkung: 1.0,
            attack_koeff: 1.0 - (-frame_s / (ATTACK_ZEIT_MS / 1000.0)).exp(),
            release_koeff: 1.0 - (-frame_s / (RELEASE_ZEIT_MS / 1000.0)).exp(),
        }
    }

    /// Erstellt ein Gate mit Standardkonfiguration
    pub fn standard() -> Self {
        Self::neu(DspConfig::default())
    }

    /// Setzt den Gate-Zustand zurueck (Verstaerkung offen)
    pub fn zuruecksetzen(&mut self) {
        self.aktuelle_verstaerkung = 1.0;
        self.ziel_verstaerkung = 1.0;
    }

    /// Analysiert einen Frame ohne ihn zu veraendern
    pub fn analysieren(&self, samples: &[i16]) -> AudioAnalyse {
        let rms = rms_berechnen(samples);
        let peak = peak_berechnen(samples);
        let zcr = nulldurchgangsrate(samples);

        let rms_db = linear_zu_db(rms);
        let ist_stille = rms_db < self.config.gate_schwelle_db;
        let ist_hochenergie = rms_db > self.config.hochenergie_schwelle_db;

        let (ist_rauschen, ist_stimme) = if ist_hochenergie && zcr < self.config.zcr_niedrig {
            (true, false)
        } else if !ist_stille && zcr >= self.config.zcr_niedrig && zcr <= self.config.zcr_hoch {
            (false, true)
        } else {
            (false, false)
        };

        AudioAnalyse {
            rms_db,
            peak_db: linear_zu_db(peak as f32 / 32768.0),
            zcr,
            ist_stille,
            ist_hochenergie,
            ist_rauschen,
            ist_stimme,
        }
    }

    /// Verarbeitet einen Frame in place
    ///
    /// Gibt die angewendete Verstaerkung und die Analyse zurueck.
    pub fn verarbeiten(&mut self, samples: &mut [i16]) -> (f32, AudioAnalyse) {
        let analyse = self.analysieren(samples);

        let mut ziel = 1.0f32;
        if self.config.gate_aktiv && analyse.ist_stille {
            ziel = 0.0;
        }
        if self.config.rauscherkennung_aktiv && analyse.ist_rauschen {
            ziel = self.config.daempfungsfaktor;
            tracing::debug!(
                rms_db = analyse.rms_db,
                zcr = analyse.zcr,
                daempfung = ziel,
                "Rauschen erkannt"
            );
        }
        self.ziel_verstaerkung = ziel;

        // Ein-Pol-Glaettung: Attack beim Fallen, Release beim Steigen
        let koeff = if ziel < self.aktuelle_verstaerkung {
            self.attack_koeff
        } else {
            self.release_koeff
        };
        self.aktuelle_verstaerkung += koeff * (ziel - self.aktuelle_verstaerkung);

        if self.aktuelle_verstaerkung < 0.99 {
            verstaerkung_anwenden(samples, self.aktuelle_verstaerkung);
        }

        (self.aktuelle_verstaerkung, analyse)
    }

    /// Aktuelle (geglaettete) Verstaerkung
    pub fn aktuelle_verstaerkung(&self) -> f32 {
        self.aktuelle_verstaerkung
    }

    /// Aktuelles Verstaerkungsziel
    pub fn ziel_verstaerkung(&self) -> f32 {
        self.ziel_verstaerkung
    }
}

/// Schnelle Rausch-Abschaetzung mit Unterabtastung
///
/// Fuer den Relay-Monitor gedacht: liefert eine Verstaerkungs-Empfehlung
/// ohne den vollen Gate-Zustand. Hoechstens ~120 Samples werden angefasst.
pub fn schnellpruefung(samples: &[i16], hochenergie_schwelle_db: f32) -> f32 {
    if samples.is_empty() {
        return 1.0;
    }

    let schritt = if samples.len() > 240 {
        samples.len() / 120
    } else {
        1
    };

    let mut summe: i64 = 0;
    let mut anzahl = 0usize;
    let mut i = 0;
    while i < samples.len() {
        let s = samples[i] as i64;
        summe += s * s;
        anzahl += 1;
        i += schritt;
    }

    let rms = ((summe as f64 / anzahl as f64) as f32).sqrt() / 32768.0;
    let rms_db = linear_zu_db(rms);

    if rms_db < GATE_SCHWELLE_DB {
        return 0.0;
    }

    if rms_db > hochenergie_schwelle_db {
        let mut wechsel = 0usize;
        let mut i = schritt;
        while i < samples.len() {
            if (samples[i - schritt] >= 0) != (samples[i] >= 0) {
                wechsel += 1;
            }
            i += schritt;
        }
        let zcr = wechsel as f32 / (anzahl.saturating_sub(1).max(1)) as f32;
        if zcr < ZCR_NIEDRIG {
            return DAEMPFUNGSFAKTOR;
        }
    }

    1.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
