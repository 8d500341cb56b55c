//! Discovery-Responder (UDP Broadcast)
//!
//! Beantwortet LAN-Discovery-Anfragen mit einem Unicast an den Anfrager.
//! Das Subsystem ist zustandslos und unabhaengig von der Sitzungsverwaltung;
//! lediglich die aktuelle Teilnehmerzahl wird fuer die Antwort abgefragt.

use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;

use funkraum_core::konstanten::{MAX_FRAME_GROESSE, MAX_PEERS};
use funkraum_core::ServerId;
use funkraum_protocol::control::{Capability, ControlNachricht, DiscoveryResponse};

use crate::session::SitzungsTabelle;

/// Angaben des Servers fuer die Discovery-Antwort
pub struct DiscoveryInfo {
    pub server_id: ServerId,
    pub name: String,
    pub tcp_port: u16,
    pub media_port: u16,
    pub max_peers: usize,
}

/// Beantwortet Discovery-Anfragen bis zum Shutdown-Signal
pub async fn discovery_schleife(
    socket: Arc<UdpSocket>,
    info: DiscoveryInfo,
    tabelle: SitzungsTabelle,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut puffer = [0u8; MAX_FRAME_GROESSE];
    tracing::info!("Discovery-Responder gestartet");

    loop {
        tokio::select! {
            result = socket.recv_from(&mut puffer) => {
                match result {
                    Ok((laenge, absender)) => {
                        let anfrage = match ControlNachricht::aus_datagramm(&puffer[..laenge]) {
                            Ok((_, ControlNachricht::DiscoveryRequest(anfrage))) => anfrage,
                            Ok(_) => continue,
                            Err(e) => {
                                tracing::trace!(fehler = %e, absender = %absender, "Ungueltige Discovery-Anfrage");
                                continue;
                            }
                        };

                        tracing::debug!(
                            absender = %absender,
                            client = %anfrage.name,
                            "Discovery-Anfrage"
                        );

                        let antwort = ControlNachricht::DiscoveryResponse(DiscoveryResponse {
                            server_id: info.server_id.inner(),
                            tcp_port: info.tcp_port,
                            media_port: info.media_port,
                            capability_flags: Capability::ALLE,
                            current_peers: tabelle.anzahl().min(u8::MAX as usize) as u8,
                            max_peers: info.max_peers.min(MAX_PEERS) as u8,
                            server_name: info.name.clone(),
                            version: env!("CARGO_PKG_VERSION").to_string(),
                        });

                        let datagramm = antwort.als_datagramm(0, super::control::jetzt_ms() as u32);
                        if let Err(e) = socket.try_send_to(&datagramm, absender) {
                            tracing::debug!(fehler = %e, ziel = %absender, "Discovery-Antwort fehlgeschlagen");
                        }
                    }
                    Err(e) => {
                        tracing::error!(fehler = %e, "Discovery-Empfangsfehler");
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

    tracing::info!("Discovery-Responder beendet");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
