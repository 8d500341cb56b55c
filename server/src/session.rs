//! Sitzungs-Tabelle: Mitgliederverwaltung des Servers
//!
//! Feste Slot-Tabelle (ein Slot pro Verbindung) hinter einem einzelnen
//! Mutex. Alle mitgliedschaftsveraendernden Uebergaenge serialisieren
//! sich hier; Schnappschuss und Rundruf laufen unter derselben
//! Sperrnahme und sehen damit dieselbe Version der Tabelle.
//!
//! Mitglieder werden ueber ihren Slot-Index angesprochen (stabil fuer
//! die Lebensdauer der Verbindung), nie ueber Zeiger.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use funkraum_core::{ClientId, FunkraumError, Result, Ssrc};
use funkraum_protocol::control::{ControlNachricht, PeerInfo, PeerType};

/// Kapazitaet der Sende-Queue pro Mitglied (Nachrichten)
pub const SENDE_QUEUE_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// Mitglied
// ---------------------------------------------------------------------------

/// Ein verbundener Teilnehmer
pub struct Mitglied {
    /// Zugewiesene ID (0 bis zum HELLO)
    pub id: ClientId,
    /// Senderkennung (== id)
    pub ssrc: Ssrc,
    /// Anzeigename (gesetzt beim HELLO)
    pub name: String,
    /// Adresse der Control-Verbindung
    pub control_addr: SocketAddr,
    /// Media-Adresse: IP der Control-Verbindung + Port aus dem JOIN
    pub media_addr: Option<SocketAddr>,
    /// Zeitpunkt des letzten empfangenen Frames
    pub letzter_heartbeat: Instant,
    /// In der Sprachsitzung (JOIN ohne LEAVE)
    pub audio_aktiv: bool,
    /// Sprachaktivitaet laut VAD-Bit der Media-Pakete
    pub spricht: bool,
    /// Stummgeschaltet
    pub stumm: bool,
    /// Laufende Nummer der Verbindung (gegen Slot-Wiederverwendung)
    generation: u64,
    /// Sende-Queue zur Control-Verbindung (Writer-Seite der Verbindung)
    sende_queue: mpsc::Sender<ControlNachricht>,
}

impl Mitglied {
    fn neu(
        control_addr: SocketAddr,
        generation: u64,
        sende_queue: mpsc::Sender<ControlNachricht>,
    ) -> Self {
        Self {
            id: ClientId(0),
            ssrc: Ssrc(0),
            name: String::new(),
            control_addr,
            media_addr: None,
            letzter_heartbeat: Instant::now(),
            audio_aktiv: false,
            spricht: false,
            stumm: false,
            generation,
            sende_queue,
        }
    }

    /// true sobald das Mitglied per HELLO identifiziert ist
    pub fn ist_identifiziert(&self) -> bool {
        !self.id.ist_null()
    }

    /// Baut den Wire-Datensatz dieses Mitglieds
    pub fn als_peer_info(&self) -> PeerInfo {
        PeerInfo {
            client_id: self.id.inner(),
            ssrc: self.ssrc.inner(),
            name: self.name.clone(),
            ip: self.control_addr.ip().to_string(),
            udp_port: self.media_addr.map(|a| a.port()).unwrap_or(0),
            is_talking: self.spricht,
            is_muted: self.stumm,
            audio_active: self.audio_aktiv,
            peer_type: PeerType::Client,
        }
    }
}

// ---------------------------------------------------------------------------
// SitzungsTabelle
// ---------------------------------------------------------------------------

/// Mitglieder-Tabelle mit fester Slot-Anzahl
///
/// `Clone`-faehig (innerer Arc); alle Klone teilen denselben Zustand.
#[derive(Clone)]
pub struct SitzungsTabelle {
    inner: Arc<Mutex<TabellenInner>>,
}

struct TabellenInner {
    slots: Vec<Option<Mitglied>>,
    naechste_generation: u64,
}

impl SitzungsTabelle {
    /// Erstellt eine leere Tabelle mit `kapazitaet` Slots
    pub fn neu(kapazitaet: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TabellenInner {
                slots: (0..kapazitaet).map(|_| None).collect(),
                naechste_generation: 0,
            })),
        }
    }

    /// Nimmt eine neue Verbindung auf
    ///
    /// Gibt Slot-Index und Verbindungs-Generation zurueck;
    /// `ServerVoll` wenn kein Slot frei ist.
    pub fn aufnehmen(
        &self,
        control_addr: SocketAddr,
        sende_queue: mpsc::Sender<ControlNachricht>,
    ) -> Result<(usize, u64)> {
        let mut inner = self.inner.lock();
        let slot = inner
            .slots
            .iter()
            .position(|m| m.is_none())
            .ok_or(FunkraumError::ServerVoll)?;
        let generation = inner.naechste_generation;
        inner.naechste_generation += 1;
        inner.slots[slot] = Some(Mitglied::neu(control_addr, generation, sende_queue));
        tracing::info!(peer = %control_addr, slot, "Verbindung aufgenommen");
        Ok((slot, generation))
    }

    /// HELLO: identifiziert das Mitglied und weist ggf. eine ID zu
    ///
    /// Eine vorgeschlagene ID von 0 oder eine bereits vergebene ID wird
    /// durch eine frische zufaellige ID ersetzt (Eindeutigkeits-Invariante).
    pub fn identifizieren(
        &self,
        slot: usize,
        vorgeschlagen: ClientId,
        name: &str,
    ) -> Result<ClientId> {
        let mut inner = self.inner.lock();

        let vergeben = |slots: &[Option<Mitglied>], id: ClientId| {
            slots
                .iter()
                .flatten()
                .any(|m| m.ist_identifiziert() && m.id == id)
        };

        let mut id = vorgeschlagen;
        while id.ist_null() || vergeben(&inner.slots, id) {
            id = ClientId::zufaellig();
        }

        let mitglied = slot_mut(&mut inner, slot)?;
        mitglied.id = id;
        mitglied.ssrc = Ssrc::from(id);
        mitglied.name = name.to_string();
        mitglied.letzter_heartbeat = Instant::now();
        tracing::info!(id = %id, name = name, slot, "Mitglied identifiziert");
        Ok(id)
    }

    /// JOIN: lernt die Media-Adresse (Control-IP + gemeldeter Port)
    pub fn beitreten(&self, slot: usize, media_port: u16) -> Result<SocketAddr> {
        let mut inner = self.inner.lock();
        let mitglied = slot_mut(&mut inner, slot)?;
        let media_addr = SocketAddr::new(mitglied.control_addr.ip(), media_port);
        mitglied.media_addr = Some(media_addr);
        mitglied.audio_aktiv = true;
        tracing::info!(
            id = %mitglied.id,
            media = %media_addr,
            "Mitglied in Sprachsitzung"
        );
        Ok(media_addr)
    }

    /// LEAVE: verlaesst die Sprachsitzung (Verbindung bleibt)
    pub fn sitzung_verlassen(&self, slot: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        let mitglied = slot_mut(&mut inner, slot)?;
        mitglied.audio_aktiv = false;
        mitglied.spricht = false;
        tracing::info!(id = %mitglied.id, "Mitglied hat Sprachsitzung verlassen");
        Ok(())
    }

    /// Entfernt ein Mitglied vollstaendig (Timeout-Sweep)
    pub fn entfernen(&self, slot: usize) -> Option<Mitglied> {
        let mut inner = self.inner.lock();
        let mitglied = inner.slots.get_mut(slot)?.take();
        if let Some(m) = &mitglied {
            tracing::info!(id = %m.id, name = %m.name, slot, "Mitglied entfernt");
        }
        mitglied
    }

    /// Entfernt ein Mitglied nur wenn der Slot noch zur selben Verbindung
    /// gehoert (Schutz gegen Slot-Wiederverwendung nach einem Sweep)
    pub fn entfernen_verbindung(&self, slot: usize, generation: u64) -> Option<Mitglied> {
        let mut inner = self.inner.lock();
        let eintrag = inner.slots.get_mut(slot)?;
        if eintrag.as_ref().map(|m| m.generation) != Some(generation) {
            return None;
        }
        let mitglied = eintrag.take();
        if let Some(m) = &mitglied {
            tracing::info!(id = %m.id, name = %m.name, slot, "Mitglied entfernt");
        }
        mitglied
    }

    /// Frischt den Heartbeat-Zeitstempel eines Mitglieds auf
    pub fn heartbeat(&self, slot: usize) {
        let mut inner = self.inner.lock();
        if let Ok(mitglied) = slot_mut(&mut inner, slot) {
            mitglied.letzter_heartbeat = Instant::now();
        }
    }

    /// Aktualisiert ein Mitglied ueber eine Closure
    pub fn aktualisieren<F>(&self, slot: usize, f: F) -> bool
    where
        F: FnOnce(&mut Mitglied),
    {
        let mut inner = self.inner.lock();
        match slot_mut(&mut inner, slot) {
            Ok(mitglied) => {
                f(mitglied);
                true
            }
            Err(_) => false,
        }
    }

    /// Setzt das Sprechen-Flag anhand der SSRC (Media-Pfad)
    ///
    /// Gibt `Some(neuer_wert)` zurueck wenn sich das Flag geaendert hat.
    pub fn spricht_setzen(&self, ssrc: Ssrc, spricht: bool) -> Option<bool> {
        let mut inner = self.inner.lock();
        let mitglied = inner
            .slots
            .iter_mut()
            .flatten()
            .find(|m| m.ist_identifiziert() && m.ssrc == ssrc)?;
        if mitglied.spricht != spricht {
            mitglied.spricht = spricht;
            Some(spricht)
        } else {
            None
        }
    }

    /// Prueft ob eine SSRC zu einem Mitglied gehoert
    pub fn kennt_ssrc(&self, ssrc: Ssrc) -> bool {
        self.inner
            .lock()
            .slots
            .iter()
            .flatten()
            .any(|m| m.ist_identifiziert() && m.ssrc == ssrc)
    }

    /// Schnappschuss aller identifizierten Mitglieder ausser `ausser`
    pub fn schnappschuss_ohne(&self, ausser: ClientId) -> Vec<PeerInfo> {
        self.inner
            .lock()
            .slots
            .iter()
            .flatten()
            .filter(|m| m.ist_identifiziert() && m.id != ausser)
            .map(|m| m.als_peer_info())
            .collect()
    }

    /// Rundruf an alle identifizierten Mitglieder ausser `ausser`
    ///
    /// Nicht-blockierend: eine volle Queue verwirft die Nachricht fuer
    /// dieses Mitglied. Gibt die Anzahl erreichter Mitglieder zurueck.
    pub fn rundruf_ausser(&self, ausser: ClientId, nachricht: &ControlNachricht) -> usize {
        let inner = self.inner.lock();
        rundruf_intern(&inner, ausser, nachricht)
    }

    /// Schnappschuss und Rundruf unter einer einzigen Sperrnahme
    ///
    /// Beim JOIN muessen die an den Beitretenden geschickte Liste und die
    /// an die uebrigen verteilte Benachrichtigung dieselbe Version der
    /// Tabelle sehen.
    pub fn schnappschuss_und_rundruf(
        &self,
        ausser: ClientId,
        nachricht: &ControlNachricht,
    ) -> Vec<PeerInfo> {
        let inner = self.inner.lock();
        let schnappschuss = inner
            .slots
            .iter()
            .flatten()
            .filter(|m| m.ist_identifiziert() && m.id != ausser)
            .map(|m| m.als_peer_info())
            .collect();
        rundruf_intern(&inner, ausser, nachricht);
        schnappschuss
    }

    /// Media-Adressen aller Sitzungsmitglieder ausser dem Sender
    ///
    /// Der Media-Pfad sammelt die Ziele unter der Sperre und sendet
    /// ausserhalb davon (Einzel-Task, Reihenfolge pro Quelle bleibt).
    pub fn media_ziele_ausser(&self, ausser: Ssrc) -> Vec<SocketAddr> {
        self.inner
            .lock()
            .slots
            .iter()
            .flatten()
            .filter(|m| m.audio_aktiv && m.ssrc != ausser)
            .filter_map(|m| m.media_addr)
            .collect()
    }

    /// Slots deren Heartbeat aelter als `timeout` ist
    pub fn abgelaufene(&self, timeout: Duration) -> Vec<usize> {
        let inner = self.inner.lock();
        let jetzt = Instant::now();
        inner
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, m)| {
                m.as_ref().and_then(|m| {
                    (jetzt.duration_since(m.letzter_heartbeat) > timeout).then_some(slot)
                })
            })
            .collect()
    }

    /// Anzahl belegter Slots
    pub fn anzahl(&self) -> usize {
        self.inner.lock().slots.iter().flatten().count()
    }

    /// Gibt den Wire-Datensatz eines Slots zurueck
    pub fn peer_info(&self, slot: usize) -> Option<PeerInfo> {
        self.inner
            .lock()
            .slots
            .get(slot)
            .and_then(|m| m.as_ref())
            .map(|m| m.als_peer_info())
    }

    /// Gibt die ID eines Slots zurueck
    pub fn id_von_slot(&self, slot: usize) -> Option<ClientId> {
        self.inner
            .lock()
            .slots
            .get(slot)
            .and_then(|m| m.as_ref())
            .map(|m| m.id)
    }
}

/// Rundruf innerhalb einer bereits gehaltenen Sperre
fn rundruf_intern(inner: &TabellenInner, ausser: ClientId, nachricht: &ControlNachricht) -> usize {
    let mut erreicht = 0;

    for mitglied in inner.slots.iter().flatten() {
        if !mitglied.ist_identifiziert() || mitglied.id == ausser {
            continue;
        }
        match mitglied.sende_queue.try_send(nachricht.clone()) {
            Ok(()) => erreicht += 1,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    id = %mitglied.id,
                    "Sende-Queue voll – Control-Nachricht verworfen"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(id = %mitglied.id, "Sende-Queue geschlossen");
            }
        }
    }

    erreicht
}

fn slot_mut<'a>(inner: &'a mut TabellenInner, slot: usize) -> Result<&'a mut Mitglied> {
    inner
        .slots
        .get_mut(slot)
        .and_then(|m| m.as_mut())
        .ok_or_else(|| FunkraumError::TeilnehmerNichtGefunden(format!("Slot {slot}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 7)), port)
    }

    fn queue() -> (
        mpsc::Sender<ControlNachricht>,
        mpsc::Receiver<ControlNachricht>,
    ) {
        mpsc::channel(SENDE_QUEUE_GROESSE)
    }

    #[test]
    fn aufnehmen_und_identifizieren() {
        let tabelle = SitzungsTabelle::neu(4);
        let (tx, _rx) = queue();

        let (slot, _) = tabelle.aufnehmen(addr(40000), tx).unwrap();
        assert_eq!(tabelle.anzahl(), 1);

        let id = tabelle
            .identifizieren(slot, ClientId(1234), "Anna")
            .unwrap();
        assert_eq!(id, ClientId(1234));

        let info = tabelle.peer_info(slot).unwrap();
        assert_eq!(info.client_id, 1234);
        assert_eq!(info.ssrc, 1234, "SSRC muss gleich der ID sein");
        assert_eq!(info.name, "Anna");
    }

    #[test]
    fn null_id_bekommt_zuweisung() {
        let tabelle = SitzungsTabelle::neu(4);
        let (tx, _rx) = queue();
        let (slot, _) = tabelle.aufnehmen(addr(40001), tx).unwrap();

        let id = tabelle.identifizieren(slot, ClientId(0), "Ben").unwrap();
        assert!(!id.ist_null());
    }

    #[test]
    fn doppelte_id_wird_ersetzt() {
        let tabelle = SitzungsTabelle::neu(4);
        let (tx1, _rx1) = queue();
        let (tx2, _rx2) = queue();

        let (s1, _) = tabelle.aufnehmen(addr(40002), tx1).unwrap();
        let (s2, _) = tabelle.aufnehmen(addr(40003), tx2).unwrap();

        let id1 = tabelle.identifizieren(s1, ClientId(42), "Erste").unwrap();
        let id2 = tabelle.identifizieren(s2, ClientId(42), "Zweite").unwrap();

        assert_eq!(id1, ClientId(42));
        assert_ne!(id1, id2, "Eine ID darf nur einmal vorkommen");
    }

    #[test]
    fn voller_server_lehnt_ab() {
        let tabelle = SitzungsTabelle::neu(2);
        let (tx1, _r1) = queue();
        let (tx2, _r2) = queue();
        let (tx3, _r3) = queue();

        tabelle.aufnehmen(addr(1), tx1).unwrap();
        tabelle.aufnehmen(addr(2), tx2).unwrap();
        assert!(matches!(
            tabelle.aufnehmen(addr(3), tx3),
            Err(FunkraumError::ServerVoll)
        ));
    }

    #[test]
    fn beitreten_lernt_media_adresse() {
        let tabelle = SitzungsTabelle::neu(4);
        let (tx, _rx) = queue();
        let (slot, _) = tabelle.aufnehmen(addr(40005), tx).unwrap();
        tabelle.identifizieren(slot, ClientId(7), "Carla").unwrap();

        let media = tabelle.beitreten(slot, 51000).unwrap();
        // IP kommt von der Control-Verbindung, Port aus dem JOIN
        assert_eq!(media.ip().to_string(), "192.168.0.7");
        assert_eq!(media.port(), 51000);

        let info = tabelle.peer_info(slot).unwrap();
        assert!(info.audio_active);
        assert_eq!(info.udp_port, 51000);
    }

    #[test]
    fn schnappschuss_schliesst_beitretenden_aus() {
        let tabelle = SitzungsTabelle::neu(4);
        for (i, port) in [40010u16, 40011, 40012].iter().enumerate() {
            let (tx, _rx) = queue();
            let (slot, _) = tabelle.aufnehmen(addr(*port), tx).unwrap();
            tabelle
                .identifizieren(slot, ClientId(i as u32 + 1), &format!("peer{i}"))
                .unwrap();
        }

        let schnappschuss = tabelle.schnappschuss_ohne(ClientId(2));
        assert_eq!(schnappschuss.len(), 2);
        assert!(schnappschuss.iter().all(|p| p.client_id != 2));
    }

    #[tokio::test]
    async fn rundruf_erreicht_alle_ausser_subjekt() {
        let tabelle = SitzungsTabelle::neu(4);
        let mut empfaenger = Vec::new();

        for i in 0..3u32 {
            let (tx, rx) = queue();
            let (slot, _) = tabelle.aufnehmen(addr(41000 + i as u16), tx).unwrap();
            tabelle
                .identifizieren(slot, ClientId(i + 1), &format!("peer{i}"))
                .unwrap();
            empfaenger.push(rx);
        }

        let erreicht = tabelle.rundruf_ausser(ClientId(1), &ControlNachricht::Leave);
        assert_eq!(erreicht, 2);

        // Subjekt (Slot 0) bekommt nichts
        assert!(empfaenger[0].try_recv().is_err());
        assert!(empfaenger[1].try_recv().is_ok());
        assert!(empfaenger[2].try_recv().is_ok());
    }

    #[test]
    fn media_ziele_nur_sitzungsmitglieder() {
        let tabelle = SitzungsTabelle::neu(4);

        let (tx1, _r1) = queue();
        let (s1, _) = tabelle.aufnehmen(addr(42000), tx1).unwrap();
        tabelle.identifizieren(s1, ClientId(1), "a").unwrap();
        tabelle.beitreten(s1, 50001).unwrap();

        let (tx2, _r2) = queue();
        let (s2, _) = tabelle.aufnehmen(addr(42001), tx2).unwrap();
        tabelle.identifizieren(s2, ClientId(2), "b").unwrap();
        tabelle.beitreten(s2, 50002).unwrap();

        // Drittes Mitglied ohne JOIN
        let (tx3, _r3) = queue();
        let (s3, _) = tabelle.aufnehmen(addr(42002), tx3).unwrap();
        tabelle.identifizieren(s3, ClientId(3), "c").unwrap();

        let ziele = tabelle.media_ziele_ausser(Ssrc(1));
        assert_eq!(ziele.len(), 1);
        assert_eq!(ziele[0].port(), 50002);
    }

    #[test]
    fn spricht_setzen_meldet_nur_aenderungen() {
        let tabelle = SitzungsTabelle::neu(4);
        let (tx, _rx) = queue();
        let (slot, _) = tabelle.aufnehmen(addr(43000), tx).unwrap();
        tabelle.identifizieren(slot, ClientId(9), "d").unwrap();

        assert_eq!(tabelle.spricht_setzen(Ssrc(9), true), Some(true));
        assert_eq!(tabelle.spricht_setzen(Ssrc(9), true), None);
        assert_eq!(tabelle.spricht_setzen(Ssrc(9), false), Some(false));
        assert_eq!(tabelle.spricht_setzen(Ssrc(404), true), None);
    }

    #[test]
    fn heartbeat_timeout_erkennung() {
        let tabelle = SitzungsTabelle::neu(4);
        let (tx, _rx) = queue();
        let (slot, _) = tabelle.aufnehmen(addr(44000), tx).unwrap();

        assert!(tabelle.abgelaufene(Duration::from_secs(10)).is_empty());
        // Mit Null-Timeout ist jeder Heartbeat abgelaufen
        assert_eq!(tabelle.abgelaufene(Duration::ZERO), vec![slot]);

        tabelle.heartbeat(slot);
        assert!(tabelle.abgelaufene(Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn entfernen_gibt_slot_frei() {
        let tabelle = SitzungsTabelle::neu(1);
        let (tx, _rx) = queue();
        let (slot, _) = tabelle.aufnehmen(addr(45000), tx).unwrap();
        assert_eq!(tabelle.anzahl(), 1);

        let mitglied = tabelle.entfernen(slot);
        assert!(mitglied.is_some());
        assert_eq!(tabelle.anzahl(), 0);

        // Slot ist wieder belegbar
        let (tx2, _rx2) = queue();
        assert!(tabelle.aufnehmen(addr(45001), tx2).is_ok());
    }
}
