//! funkraum-server – Bibliotheks-Root
//!
//! Deklariert alle Server-Module und stellt die Start/Stopp-Orchestrierung
//! fuer das Binary und die Integrationstests bereit.

pub mod config;
pub mod control;
pub mod discovery;
pub mod relay;
pub mod session;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use funkraum_core::{ServerId, Ssrc};

use config::ServerConfig;
use control::ControlKontext;
use discovery::DiscoveryInfo;
use relay::MediaRelay;
use session::SitzungsTabelle;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    config: ServerConfig,
    server_id: ServerId,
    tabelle: SitzungsTabelle,
    shutdown_tx: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
    /// Tatsaechlich gebundene Ports (bei Port 0 vom OS vergeben)
    gebundene_ports: Option<GebundenePorts>,
}

/// Die drei tatsaechlich gebundenen Ports
#[derive(Debug, Clone, Copy)]
pub struct GebundenePorts {
    pub discovery: u16,
    pub control: u16,
    pub media: u16,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        let tabelle = SitzungsTabelle::neu(config.server.max_peers);
        Self {
            config,
            server_id: ServerId::zufaellig(),
            tabelle,
            shutdown_tx: None,
            tasks: Vec::new(),
            gebundene_ports: None,
        }
    }

    /// Startet alle Server-Subsysteme
    ///
    /// Reihenfolge:
    /// 1. Drei Sockets binden (Discovery-UDP, Control-TCP, Media-UDP) –
    ///    schlaegt ein Bind fehl, bricht der Start ab und bereits
    ///    gebundene Sockets werden wieder freigegeben (Drop)
    /// 2. Vier Tasks starten: Discovery, Accept-Schleife, Media-Relay,
    ///    Heartbeat-Sweep
    pub async fn starten(&mut self) -> Result<GebundenePorts> {
        if self.shutdown_tx.is_some() {
            anyhow::bail!("Server laeuft bereits");
        }

        // --- 1. Sockets binden ---
        let discovery_socket = Arc::new(
            UdpSocket::bind(self.config.discovery_bind_adresse())
                .await
                .with_context(|| {
                    format!(
                        "Discovery-Socket {} nicht bindbar",
                        self.config.discovery_bind_adresse()
                    )
                })?,
        );

        let control_listener = TcpListener::bind(self.config.control_bind_adresse())
            .await
            .with_context(|| {
                format!(
                    "Control-Socket {} nicht bindbar",
                    self.config.control_bind_adresse()
                )
            })?;

        let media_socket = Arc::new(
            UdpSocket::bind(self.config.media_bind_adresse())
                .await
                .with_context(|| {
                    format!(
                        "Media-Socket {} nicht bindbar",
                        self.config.media_bind_adresse()
                    )
                })?,
        );

        let ports = GebundenePorts {
            discovery: discovery_socket.local_addr()?.port(),
            control: control_listener.local_addr()?.port(),
            media: media_socket.local_addr()?.port(),
        };

        tracing::info!(
            server_name = %self.config.server.name,
            server_id = %self.server_id,
            discovery = ports.discovery,
            control = ports.control,
            media = ports.media,
            "Server startet"
        );

        // --- 2. Tasks starten ---
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let kontext = Arc::new(ControlKontext {
            tabelle: self.tabelle.clone(),
            server_id: self.server_id,
            media_port: ports.media,
            audio: self.config.audio.clone(),
        });

        let discovery_info = DiscoveryInfo {
            server_id: self.server_id,
            name: self.config.server.name.clone(),
            tcp_port: ports.control,
            media_port: ports.media,
            max_peers: self.config.server.max_peers,
        };

        self.tasks.push(tokio::spawn(discovery::discovery_schleife(
            discovery_socket,
            discovery_info,
            self.tabelle.clone(),
            shutdown_rx.clone(),
        )));

        self.tasks.push(tokio::spawn(control::accept_schleife(
            control_listener,
            Arc::clone(&kontext),
            shutdown_rx.clone(),
        )));

        let media_relay = MediaRelay::neu(
            media_socket,
            self.tabelle.clone(),
            Ssrc(self.server_id.inner()),
        );
        self.tasks.push(tokio::spawn(async move {
            media_relay.schleife(shutdown_rx).await;
        }));

        let sweep_rx = shutdown_tx.subscribe();
        self.tasks.push(tokio::spawn(control::heartbeat_sweep(
            kontext,
            sweep_rx,
        )));

        self.shutdown_tx = Some(shutdown_tx);
        self.gebundene_ports = Some(ports);

        tracing::info!("Server laeuft");
        Ok(ports)
    }

    /// Stoppt den Server: Shutdown-Signal, dann alle Tasks einsammeln
    pub async fn stoppen(&mut self) {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            return;
        };

        tracing::info!("Server wird beendet");
        let _ = shutdown_tx.send(true);

        for task in self.tasks.drain(..) {
            let _ = task.await;
        }

        self.gebundene_ports = None;
        tracing::info!("Server beendet");
    }

    /// Startet den Server und laeuft bis Ctrl-C
    pub async fn lauf_bis_signal(mut self) -> Result<()> {
        self.starten().await?;
        tokio::signal::ctrl_c()
            .await
            .context("Warten auf Ctrl-C fehlgeschlagen")?;
        self.stoppen().await;
        Ok(())
    }

    /// Die aktuell gebundenen Ports (None solange der Server nicht laeuft)
    pub fn ports(&self) -> Option<GebundenePorts> {
        self.gebundene_ports
    }

    /// Anzahl der aktuell verbundenen Mitglieder
    pub fn mitglieder_anzahl(&self) -> usize {
        self.tabelle.anzahl()
    }

    /// Server-ID
    pub fn server_id(&self) -> ServerId {
        self.server_id
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
