//! Control-Plane: TCP-Listener, Verbindungs-Tasks, Heartbeat-Ueberwachung
//!
//! Pro akzeptierter Verbindung laeuft genau ein Task, der Lesen und
//! Schreiben in einer select-Schleife buendelt: eingehende Frames werden
//! ueber den [`ControlCodec`] aus dem Akkumulator gezogen, ausgehende
//! Nachrichten kommen aus der Sende-Queue des Mitglieds. Ein getrennter
//! Sweep-Task entfernt Mitglieder deren Heartbeat aelter als 10 s ist.
//!
//! Zustandsuebergaenge pro Mitglied:
//! aufgenommen -> identifiziert (HELLO) -> in Sitzung (JOIN) -> entfernt
//! (LEAVE-Broadcast an die uebrigen bei Disconnect und Timeout).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{Decoder, Encoder};

use funkraum_core::konstanten::{ABTASTRATE, HEARTBEAT_TIMEOUT_MS, MAX_FRAME_GROESSE};
use funkraum_core::{ClientId, ServerId};
use funkraum_protocol::control::{
    ControlNachricht, Heartbeat, HelloAck, JoinAck, PeerList, PeerNotify,
};
use funkraum_protocol::wire::ControlCodec;

use crate::config::AudioEinstellungen;
use crate::session::{SitzungsTabelle, SENDE_QUEUE_GROESSE};

/// Abtast-Intervall der Heartbeat-Ueberwachung
const SWEEP_INTERVALL: Duration = Duration::from_secs(1);

/// Gemeinsamer Kontext der Control-Plane
pub struct ControlKontext {
    pub tabelle: SitzungsTabelle,
    pub server_id: ServerId,
    /// Tatsaechlich gebundener Media-Port (fuer HELLO_ACK)
    pub media_port: u16,
    /// Codec-Parameter aus der Konfiguration (PARAM_UPDATE an Beitretende)
    pub audio: AudioEinstellungen,
}

/// Millisekunden seit UNIX-Epoche
pub(crate) fn jetzt_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Accept-Schleife
// ---------------------------------------------------------------------------

/// Akzeptiert Verbindungen bis zum Shutdown-Signal
pub async fn accept_schleife(
    listener: TcpListener,
    kontext: Arc<ControlKontext>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("Control-Accept-Schleife gestartet");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        let kontext = Arc::clone(&kontext);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            verbindung_verarbeiten(stream, peer_addr, kontext, shutdown).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                        tokio::time::sleep(Duration::from_millis(10)).await;
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

    tracing::info!("Control-Accept-Schleife beendet");
}

// ---------------------------------------------------------------------------
// Verbindungs-Task
// ---------------------------------------------------------------------------

/// Verarbeitet eine Control-Verbindung bis Disconnect oder Shutdown
async fn verbindung_verarbeiten(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    kontext: Arc<ControlKontext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let _ = stream.set_nodelay(true);

    let (antwort_tx, mut antwort_rx) =
        mpsc::channel::<ControlNachricht>(SENDE_QUEUE_GROESSE);

    // Der Task haelt nur eine schwache Referenz auf seine eigene Queue:
    // entfernt der Sweep das Mitglied, schliesst sich die Queue und die
    // Schleife unten endet ueber den None-Zweig.
    let antwort_schwach = antwort_tx.downgrade();

    let (slot, generation) = match kontext.tabelle.aufnehmen(peer_addr, antwort_tx) {
        Ok(platz) => platz,
        Err(e) => {
            tracing::warn!(peer = %peer_addr, fehler = %e, "Verbindung abgelehnt");
            return;
        }
    };

    let mut codec = ControlCodec::new();
    let mut lese_puffer = BytesMut::with_capacity(MAX_FRAME_GROESSE);
    let mut schreib_puffer = BytesMut::new();

    'verbindung: loop {
        tokio::select! {
            // Eingehende Bytes
            result = stream.read_buf(&mut lese_puffer) => {
                match result {
                    Ok(0) => {
                        tracing::debug!(peer = %peer_addr, "Control-Verbindung geschlossen (EOF)");
                        break 'verbindung;
                    }
                    Ok(_) => loop {
                        match codec.decode(&mut lese_puffer) {
                            Ok(Some(frame)) => {
                                frame_verarbeiten(slot, frame.nachricht, &kontext, &antwort_schwach);
                            }
                            Ok(None) => break,
                            Err(e) => {
                                tracing::warn!(
                                    peer = %peer_addr,
                                    fehler = %e,
                                    "Control-Stream nicht dekodierbar – Verbindung wird getrennt"
                                );
                                break 'verbindung;
                            }
                        }
                    },
                    Err(e) => {
                        tracing::debug!(peer = %peer_addr, fehler = %e, "Control-Lesefehler");
                        break 'verbindung;
                    }
                }
            }

            // Ausgehende Nachrichten (Antworten + Rundrufe)
            nachricht = antwort_rx.recv() => {
                match nachricht {
                    Some(nachricht) => {
                        schreib_puffer.clear();
                        if codec.encode(nachricht, &mut schreib_puffer).is_ok() {
                            if let Err(e) = stream.write_all(&schreib_puffer).await {
                                tracing::debug!(peer = %peer_addr, fehler = %e, "Control-Schreibfehler");
                                break 'verbindung;
                            }
                        }
                    }
                    // Queue geschlossen: Mitglied wurde extern entfernt (Timeout-Sweep)
                    None => break 'verbindung,
                }
            }

            Ok(()) = shutdown.changed() => {
                if *shutdown.borrow() {
                    break 'verbindung;
                }
            }
        }
    }

    // Abbau: Mitglied entfernen und die anderen benachrichtigen.
    // Hat der Sweep das Mitglied bereits entfernt (oder den Slot neu
    // vergeben), ist hier nichts zu tun.
    if let Some(mitglied) = kontext.tabelle.entfernen_verbindung(slot, generation) {
        if mitglied.ist_identifiziert() {
            let nachricht = ControlNachricht::PeerLeave(PeerNotify {
                peer: mitglied.als_peer_info(),
            });
            kontext.tabelle.rundruf_ausser(mitglied.id, &nachricht);
        }
    }
}

// ---------------------------------------------------------------------------
// Frame-Dispatch
// ---------------------------------------------------------------------------

/// Verarbeitet einen eingegangenen Control-Frame
///
/// Antworten an das Mitglied selbst laufen ueber seine Sende-Queue, damit
/// sie sich mit Rundrufen nicht ueberholen.
fn frame_verarbeiten(
    slot: usize,
    nachricht: ControlNachricht,
    kontext: &ControlKontext,
    antwort_tx: &mpsc::WeakSender<ControlNachricht>,
) {
    // Jeder eingehende Frame zaehlt als Lebenszeichen
    kontext.tabelle.heartbeat(slot);

    match nachricht {
        ControlNachricht::Hello(hello) => {
            let id = match kontext.tabelle.identifizieren(
                slot,
                ClientId(hello.client_id),
                &hello.name,
            ) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(slot, fehler = %e, "HELLO fehlgeschlagen");
                    return;
                }
            };

            antwort_senden(
                antwort_tx,
                ControlNachricht::HelloAck(HelloAck {
                    result: 0,
                    assigned_id: id.inner(),
                    media_port: kontext.media_port,
                    server_time: jetzt_ms(),
                }),
            );
        }

        ControlNachricht::Join(join) => {
            if kontext.tabelle.beitreten(slot, join.local_media_port).is_err() {
                tracing::warn!(slot, "JOIN ohne gueltiges Mitglied");
                return;
            }
            let Some(eigene_info) = kontext.tabelle.peer_info(slot) else {
                return;
            };
            let id = ClientId(eigene_info.client_id);

            // 1. Bestaetigung
            antwort_senden(
                antwort_tx,
                ControlNachricht::JoinAck(JoinAck {
                    result: 0,
                    ssrc: eigene_info.ssrc,
                    base_timestamp: jetzt_ms() * (ABTASTRATE as u64 / 1000),
                }),
            );

            // 2.+3. Teilnehmerliste fuer den Beitretenden und PEER_JOIN fuer
            //    die uebrigen: beide sehen dieselbe Version der Tabelle
            let beitritt = ControlNachricht::PeerJoin(PeerNotify { peer: eigene_info });
            let schnappschuss = kontext.tabelle.schnappschuss_und_rundruf(id, &beitritt);
            antwort_senden(
                antwort_tx,
                ControlNachricht::PeerList(PeerList {
                    peers: schnappschuss,
                }),
            );

            // 4. Codec-Parameter des Servers mitteilen
            antwort_senden(
                antwort_tx,
                ControlNachricht::ParamUpdate(kontext.audio.als_param_update()),
            );
        }

        ControlNachricht::Leave => {
            if kontext.tabelle.sitzung_verlassen(slot).is_ok() {
                if let Some(info) = kontext.tabelle.peer_info(slot) {
                    let id = ClientId(info.client_id);
                    let nachricht = ControlNachricht::PeerLeave(PeerNotify { peer: info });
                    kontext.tabelle.rundruf_ausser(id, &nachricht);
                }
            }
        }

        ControlNachricht::Heartbeat(hb) => {
            antwort_senden(
                antwort_tx,
                ControlNachricht::Heartbeat(Heartbeat {
                    client_id: hb.client_id,
                    local_time: jetzt_ms(),
                }),
            );
        }

        ControlNachricht::AudioStart(_) => {
            kontext.tabelle.aktualisieren(slot, |m| m.audio_aktiv = true);
            zustand_verbreiten(slot, kontext);
        }

        ControlNachricht::AudioStop(_) => {
            kontext.tabelle.aktualisieren(slot, |m| {
                m.audio_aktiv = false;
                m.spricht = false;
            });
            zustand_verbreiten(slot, kontext);
        }

        ControlNachricht::AudioMute(_) => {
            kontext.tabelle.aktualisieren(slot, |m| m.stumm = true);
            zustand_verbreiten(slot, kontext);
        }

        ControlNachricht::AudioUnmute(_) => {
            kontext.tabelle.aktualisieren(slot, |m| m.stumm = false);
            zustand_verbreiten(slot, kontext);
        }

        ControlNachricht::ParamUpdate(update) => {
            tracing::info!(
                bitrate = update.bitrate,
                frame_ms = update.frame_ms,
                komplexitaet = update.complexity,
                "Parameter-Update vom Client"
            );
        }

        andere => {
            tracing::debug!(typ = ?andere.typ(), slot, "Unerwartete Control-Nachricht");
        }
    }
}

/// Verbreitet den aktuellen Zustand eines Mitglieds als PEER_STATE
fn zustand_verbreiten(slot: usize, kontext: &ControlKontext) {
    if let Some(info) = kontext.tabelle.peer_info(slot) {
        let id = ClientId(info.client_id);
        if !id.ist_null() {
            let nachricht = ControlNachricht::PeerState(PeerNotify { peer: info });
            kontext.tabelle.rundruf_ausser(id, &nachricht);
        }
    }
}

/// Nicht-blockierendes Senden in die eigene Antwort-Queue
fn antwort_senden(tx: &mpsc::WeakSender<ControlNachricht>, nachricht: ControlNachricht) {
    let Some(tx) = tx.upgrade() else {
        // Mitglied bereits entfernt
        return;
    };
    if tx.try_send(nachricht).is_err() {
        tracing::warn!("Antwort-Queue voll oder geschlossen – Nachricht verworfen");
    }
}

// ---------------------------------------------------------------------------
// Heartbeat-Sweep
// ---------------------------------------------------------------------------

/// Entfernt Mitglieder deren Heartbeat abgelaufen ist
pub async fn heartbeat_sweep(kontext: Arc<ControlKontext>, mut shutdown: watch::Receiver<bool>) {
    let timeout = Duration::from_millis(HEARTBEAT_TIMEOUT_MS);
    let mut intervall = tokio::time::interval(SWEEP_INTERVALL);

    loop {
        tokio::select! {
            _ = intervall.tick() => {
                for slot in kontext.tabelle.abgelaufene(timeout) {
                    if let Some(mitglied) = kontext.tabelle.entfernen(slot) {
                        tracing::warn!(
                            id = %mitglied.id,
                            name = %mitglied.name,
                            "Heartbeat-Timeout – Mitglied entfernt"
                        );
                        if mitglied.ist_identifiziert() {
                            let nachricht = ControlNachricht::PeerLeave(PeerNotify {
                                peer: mitglied.als_peer_info(),
                            });
                            kontext.tabelle.rundruf_ausser(mitglied.id, &nachricht);
                        }
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
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use funkraum_protocol::control::{AudioControl, Hello, Join};
    use std::net::{IpAddr, Ipv4Addr};

    fn kontext() -> (Arc<ControlKontext>, SitzungsTabelle) {
        let tabelle = SitzungsTabelle::neu(8);
        let kontext = Arc::new(ControlKontext {
            tabelle: tabelle.clone(),
            server_id: ServerId(0x5555),
            media_port: 6000,
            audio: AudioEinstellungen::default(),
        });
        (kontext, tabelle)
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    fn mitglied_anlegen(
        tabelle: &SitzungsTabelle,
        port: u16,
    ) -> (usize, mpsc::Receiver<ControlNachricht>) {
        let (tx, rx) = mpsc::channel(SENDE_QUEUE_GROESSE);
        let (slot, _) = tabelle.aufnehmen(addr(port), tx).unwrap();
        (slot, rx)
    }

    #[tokio::test]
    async fn hello_liefert_ack_mit_zuweisung() {
        let (kontext, tabelle) = kontext();
        let (slot, mut rx) = mitglied_anlegen(&tabelle, 50000);
        let (antwort_tx, mut antwort_rx) = mpsc::channel(8);
        let antwort_schwach = antwort_tx.downgrade();

        frame_verarbeiten(
            slot,
            ControlNachricht::Hello(Hello {
                client_id: 0,
                capability_flags: 7,
                name: "Tester".into(),
            }),
            &kontext,
            &antwort_schwach,
        );

        match antwort_rx.try_recv().expect("HELLO_ACK erwartet") {
            ControlNachricht::HelloAck(ack) => {
                assert_eq!(ack.result, 0);
                assert_ne!(ack.assigned_id, 0, "ID 0 muss ersetzt werden");
                assert_eq!(ack.media_port, 6000);
            }
            andere => panic!("HELLO_ACK erwartet, bekam {andere:?}"),
        }
        assert!(rx.try_recv().is_err(), "Kein Rundruf bei HELLO");
    }

    #[tokio::test]
    async fn join_liefert_ack_liste_und_rundruf() {
        let (kontext, tabelle) = kontext();

        // Bestehendes Mitglied in der Sitzung
        let (slot_a, mut rx_a) = mitglied_anlegen(&tabelle, 50001);
        tabelle.identifizieren(slot_a, ClientId(1), "Alt").unwrap();
        tabelle.beitreten(slot_a, 61001).unwrap();

        // Neues Mitglied tritt bei
        let (slot_b, _rx_b) = mitglied_anlegen(&tabelle, 50002);
        tabelle.identifizieren(slot_b, ClientId(2), "Neu").unwrap();
        let (antwort_tx, mut antwort_rx) = mpsc::channel(8);
        let antwort_schwach = antwort_tx.downgrade();

        frame_verarbeiten(
            slot_b,
            ControlNachricht::Join(Join {
                client_id: 2,
                local_media_port: 61002,
            }),
            &kontext,
            &antwort_schwach,
        );

        // 1. JOIN_ACK
        match antwort_rx.try_recv().expect("JOIN_ACK erwartet") {
            ControlNachricht::JoinAck(ack) => {
                assert_eq!(ack.result, 0);
                assert_eq!(ack.ssrc, 2);
                assert!(ack.base_timestamp > 0);
            }
            andere => panic!("JOIN_ACK erwartet, bekam {andere:?}"),
        }

        // 2. PEER_LIST ohne den Beitretenden
        match antwort_rx.try_recv().expect("PEER_LIST erwartet") {
            ControlNachricht::PeerList(liste) => {
                assert_eq!(liste.peers.len(), 1);
                assert_eq!(liste.peers[0].client_id, 1);
            }
            andere => panic!("PEER_LIST erwartet, bekam {andere:?}"),
        }

        // 3. PARAM_UPDATE mit den Codec-Parametern der Konfiguration
        match antwort_rx.try_recv().expect("PARAM_UPDATE erwartet") {
            ControlNachricht::ParamUpdate(update) => {
                assert_eq!(update.bitrate, 32_000);
                assert_eq!(update.frame_ms, 20);
            }
            andere => panic!("PARAM_UPDATE erwartet, bekam {andere:?}"),
        }

        // 4. PEER_JOIN beim Altmitglied
        match rx_a.try_recv().expect("PEER_JOIN erwartet") {
            ControlNachricht::PeerJoin(notify) => {
                assert_eq!(notify.peer.client_id, 2);
                assert_eq!(notify.peer.udp_port, 61002);
            }
            andere => panic!("PEER_JOIN erwartet, bekam {andere:?}"),
        }
    }

    #[tokio::test]
    async fn heartbeat_idempotent() {
        let (kontext, tabelle) = kontext();
        let (slot, _rx) = mitglied_anlegen(&tabelle, 50003);
        tabelle.identifizieren(slot, ClientId(5), "HB").unwrap();
        let (antwort_tx, mut antwort_rx) = mpsc::channel(8);
        let antwort_schwach = antwort_tx.downgrade();

        let vorher = tabelle.anzahl();
        for _ in 0..3 {
            frame_verarbeiten(
                slot,
                ControlNachricht::Heartbeat(Heartbeat {
                    client_id: 5,
                    local_time: 1,
                }),
                &kontext,
                &antwort_schwach,
            );
        }

        // Mitgliedschaft unveraendert, drei Echos
        assert_eq!(tabelle.anzahl(), vorher);
        for _ in 0..3 {
            assert!(matches!(
                antwort_rx.try_recv().unwrap(),
                ControlNachricht::Heartbeat(_)
            ));
        }
    }

    #[tokio::test]
    async fn mute_aendert_flag_und_verbreitet_zustand() {
        let (kontext, tabelle) = kontext();

        let (slot_a, mut rx_a) = mitglied_anlegen(&tabelle, 50004);
        tabelle.identifizieren(slot_a, ClientId(1), "a").unwrap();
        let (slot_b, _rx_b) = mitglied_anlegen(&tabelle, 50005);
        tabelle.identifizieren(slot_b, ClientId(2), "b").unwrap();
        let (antwort_tx, mut antwort_rx) = mpsc::channel(8);
        let antwort_schwach = antwort_tx.downgrade();

        frame_verarbeiten(
            slot_b,
            ControlNachricht::AudioMute(AudioControl {
                client_id: 2,
                action: 0,
                muted: 1,
            }),
            &kontext,
            &antwort_schwach,
        );

        // Keine direkte Antwort noetig
        assert!(antwort_rx.try_recv().is_err());

        // Flag gesetzt, Zustand an die anderen verbreitet
        assert!(tabelle.peer_info(slot_b).unwrap().is_muted);
        match rx_a.try_recv().expect("PEER_STATE erwartet") {
            ControlNachricht::PeerState(notify) => {
                assert_eq!(notify.peer.client_id, 2);
                assert!(notify.peer.is_muted);
            }
            andere => panic!("PEER_STATE erwartet, bekam {andere:?}"),
        }
    }

    #[tokio::test]
    async fn leave_verbreitet_peer_leave() {
        let (kontext, tabelle) = kontext();

        let (slot_a, mut rx_a) = mitglied_anlegen(&tabelle, 50006);
        tabelle.identifizieren(slot_a, ClientId(1), "a").unwrap();
        let (slot_b, _rx_b) = mitglied_anlegen(&tabelle, 50007);
        tabelle.identifizieren(slot_b, ClientId(2), "b").unwrap();
        tabelle.beitreten(slot_b, 61007).unwrap();
        let (antwort_tx, _antwort_rx) = mpsc::channel(8);
        let antwort_schwach = antwort_tx.downgrade();

        frame_verarbeiten(slot_b, ControlNachricht::Leave, &kontext, &antwort_schwach);

        assert!(!tabelle.peer_info(slot_b).unwrap().audio_active);
        match rx_a.try_recv().expect("PEER_LEAVE erwartet") {
            ControlNachricht::PeerLeave(notify) => assert_eq!(notify.peer.client_id, 2),
            andere => panic!("PEER_LEAVE erwartet, bekam {andere:?}"),
        }
    }
}
