//! Discovery-Sucher (Client-Seite)
//!
//! Sendet alle 3 s einen Broadcast und sammelt Antworten in einer
//! begrenzten Server-Tabelle (Schluessel: Server-ID, Aktualisierung in
//! place). Vor jeder Broadcast-Runde wird die Tabelle geleert, damit
//! verschwundene Server nicht haengenbleiben. Das Subsystem ist von der
//! Sitzungsverwaltung vollstaendig unabhaengig.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use funkraum_core::konstanten::{
    DISCOVERY_INTERVALL_MS, DISCOVERY_PORT, MAX_FRAME_GROESSE, MAX_SERVERS,
};
use funkraum_core::{ClientId, Result, FunkraumError};
use funkraum_protocol::control::{ControlNachricht, DiscoveryRequest};

// ---------------------------------------------------------------------------
// ServerEintrag
// ---------------------------------------------------------------------------

/// Ein entdeckter Server
#[derive(Debug, Clone)]
pub struct ServerEintrag {
    pub server_id: u32,
    pub name: String,
    pub adresse: IpAddr,
    pub tcp_port: u16,
    pub media_port: u16,
    pub capability_flags: u32,
    pub aktuelle_peers: u8,
    pub max_peers: u8,
    pub version: String,
    pub zuletzt_gesehen: Instant,
}

impl ServerEintrag {
    /// Control-Adresse des Servers
    pub fn control_adresse(&self) -> SocketAddr {
        SocketAddr::new(self.adresse, self.tcp_port)
    }
}

// ---------------------------------------------------------------------------
// DiscoverySucher
// ---------------------------------------------------------------------------

/// Laufende LAN-Suche nach Funkraum-Servern
pub struct DiscoverySucher {
    tabelle: Arc<DashMap<u32, ServerEintrag>>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl DiscoverySucher {
    /// Startet die Suche auf dem Standard-Broadcast-Ziel
    pub async fn starten(client_id: ClientId, name: &str) -> Result<Self> {
        let ziel = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DISCOVERY_PORT);
        Self::starten_mit_ziel(client_id, name, ziel).await
    }

    /// Startet die Suche mit explizitem Ziel (Unicast fuer Tests)
    pub async fn starten_mit_ziel(
        client_id: ClientId,
        name: &str,
        ziel: SocketAddr,
    ) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| FunkraumError::Verbindung(format!("Discovery-Socket: {e}")))?;
        socket
            .set_broadcast(true)
            .map_err(FunkraumError::Io)?;

        let tabelle: Arc<DashMap<u32, ServerEintrag>> = Arc::new(DashMap::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(such_schleife(
            socket,
            client_id,
            name.to_string(),
            ziel,
            Arc::clone(&tabelle),
            shutdown_rx,
        ));

        tracing::info!(ziel = %ziel, "Discovery-Suche gestartet");
        Ok(Self {
            tabelle,
            shutdown_tx,
            task: Some(task),
        })
    }

    /// Schnappschuss der aktuell bekannten Server
    pub fn server_liste(&self) -> Vec<ServerEintrag> {
        self.tabelle.iter().map(|e| e.value().clone()).collect()
    }

    /// Stoppt die Suche
    pub async fn stoppen(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        tracing::info!("Discovery-Suche beendet");
    }
}

// ---------------------------------------------------------------------------
// Such-Schleife
// ---------------------------------------------------------------------------

async fn such_schleife(
    socket: UdpSocket,
    client_id: ClientId,
    name: String,
    ziel: SocketAddr,
    tabelle: Arc<DashMap<u32, ServerEintrag>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut puffer = [0u8; MAX_FRAME_GROESSE];
    let mut intervall = tokio::time::interval(Duration::from_millis(DISCOVERY_INTERVALL_MS));

    loop {
        tokio::select! {
            _ = intervall.tick() => {
                // Jede Runde beginnt mit leerer Tabelle und frischer Anfrage
                tabelle.clear();

                let anfrage = ControlNachricht::DiscoveryRequest(DiscoveryRequest {
                    client_id: client_id.inner(),
                    service_mask: 0,
                    name: name.clone(),
                });
                if let Err(e) = socket.send_to(&anfrage.als_datagramm(0, 0), ziel).await {
                    tracing::warn!(fehler = %e, ziel = %ziel, "Discovery-Broadcast fehlgeschlagen");
                }
            }

            result = socket.recv_from(&mut puffer) => {
                let Ok((laenge, absender)) = result else { continue };

                let antwort = match ControlNachricht::aus_datagramm(&puffer[..laenge]) {
                    Ok((_, ControlNachricht::DiscoveryResponse(antwort))) => antwort,
                    _ => continue,
                };

                // Begrenzte Tabelle: bekannte IDs aktualisieren in place,
                // neue nur solange Platz ist
                let neu = !tabelle.contains_key(&antwort.server_id);
                if neu && tabelle.len() >= MAX_SERVERS {
                    continue;
                }

                let eintrag = ServerEintrag {
                    server_id: antwort.server_id,
                    name: antwort.server_name,
                    adresse: absender.ip(),
                    tcp_port: antwort.tcp_port,
                    media_port: antwort.media_port,
                    capability_flags: antwort.capability_flags,
                    aktuelle_peers: antwort.current_peers,
                    max_peers: antwort.max_peers,
                    version: antwort.version,
                    zuletzt_gesehen: Instant::now(),
                };

                if neu {
                    tracing::info!(
                        server = %eintrag.name,
                        adresse = %eintrag.adresse,
                        tcp = eintrag.tcp_port,
                        "Server gefunden"
                    );
                }
                tabelle.insert(antwort.server_id, eintrag);
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
