//! funkraum-client – Verbindungs- und Empfangslogik
//!
//! Zustandsmaschine der Client-Seite:
//!
//! ```text
//! Getrennt --verbinden()--> Verbunden --beitreten()--> InSitzung
//!     ^                        |  ^                        |
//!     +------- trennen() ------+  +------ verlassen() -----+
//! ```
//!
//! Tasks im Zustand Verbunden: Control-Verbindung (Lesen + Schreiben in
//! einer select-Schleife), Heartbeat-Sender (3 s). Zusaetzlich in der
//! Sitzung: Media-Empfang (UDP -> Mixer), Sende-Brucke (Aufnahme-Kanal ->
//! UDP) und der Wiedergabe-Treiber (Mixer -> Senke, 5 ms Schlafpause bei
//! leerem Mixer). Ein Verbindungsabriss setzt alles nach Getrennt zurueck
//! und zerstoert saemtliche Jitter-Zustaende.

pub mod config;
pub mod discovery;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};

use funkraum_core::konstanten::{
    FRAME_SAMPLES, HEARTBEAT_INTERVALL_MS, MAX_FRAME_GROESSE, MAX_MEDIA_NUTZDATEN, MAX_PEERS,
};
use funkraum_core::{ClientId, FunkraumError, Result, Ssrc};
use funkraum_protocol::control::{
    Capability, ControlNachricht, Heartbeat, Hello, HelloAck, Join, JoinAck, ParamUpdate,
    PeerInfo,
};
use funkraum_protocol::voice::{RtpHeader, RtpPacket};
use funkraum_protocol::wire::ControlCodec;
use funkraum_audio::WiedergabeSenke;
use funkraum_voice::codec::DecoderFabrik;
use funkraum_voice::jitter_buffer::JitterStatistik;
use funkraum_voice::mixer::{MultiStreamMixer, STREAM_TIMEOUT};

pub use config::ClientConfig;

/// Verbindungs-Timeout fuer den TCP-Aufbau
const VERBINDUNGS_TIMEOUT: Duration = Duration::from_secs(2);

/// Wartezeit auf HELLO_ACK / JOIN_ACK
const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Schlafpause des Wiedergabe-Treibers bei leerem Mixer
const WIEDERGABE_PAUSE: Duration = Duration::from_millis(5);

/// Kapazitaet des Aufnahme-Sende-Kanals (Pakete)
const SENDE_KANAL_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// Zustand
// ---------------------------------------------------------------------------

/// Verbindungszustand des Clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zustand {
    Getrennt,
    Verbunden,
    InSitzung,
}

/// Sitzungsdaten nach dem Handschlag
#[derive(Debug, Clone, Copy)]
struct SitzungsDaten {
    id: ClientId,
    ssrc: Ssrc,
    /// Media-Adresse des Servers (IP der Control-Verbindung + Port aus HELLO_ACK)
    server_media: SocketAddr,
}

// ---------------------------------------------------------------------------
// Geteilter innerer Zustand
// ---------------------------------------------------------------------------

struct ClientInner {
    zustand: Mutex<Zustand>,
    sitzung: Mutex<Option<SitzungsDaten>>,
    peers: Mutex<Vec<PeerInfo>>,
    mixer: MultiStreamMixer,
    /// Vom Server per PARAM_UPDATE mitgeteilte Codec-Parameter
    encoder_parameter: Mutex<Option<ParamUpdate>>,
    /// Wartende Handschlag-Antworten
    hello_ack: Mutex<Option<oneshot::Sender<HelloAck>>>,
    join_ack: Mutex<Option<oneshot::Sender<JoinAck>>>,
}

impl ClientInner {
    fn peer_aufnehmen(&self, peer: PeerInfo) {
        let mut peers = self.peers.lock();
        if let Some(vorhanden) = peers.iter_mut().find(|p| p.client_id == peer.client_id) {
            *vorhanden = peer;
        } else {
            peers.push(peer);
        }
    }

    fn peer_entfernen(&self, client_id: u32) {
        self.peers.lock().retain(|p| p.client_id != client_id);
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Ein verbundener Funkraum-Client
pub struct Client {
    inner: Arc<ClientInner>,
    name: String,
    media_socket: Arc<UdpSocket>,
    lokaler_media_port: u16,
    control_tx: mpsc::Sender<ControlNachricht>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    verbindungs_tasks: Vec<JoinHandle<()>>,
    // Sitzungs-Ressourcen (nur in InSitzung belegt)
    sitzungs_tasks: Vec<JoinHandle<()>>,
    sitzungs_shutdown: Option<watch::Sender<bool>>,
    wiedergabe_laeuft: Option<Arc<AtomicBool>>,
    wiedergabe_thread: Option<std::thread::JoinHandle<()>>,
    sende_tx: Option<crossbeam_channel::Sender<RtpPacket>>,
    sende_laeuft: Option<Arc<AtomicBool>>,
    sende_thread: Option<std::thread::JoinHandle<()>>,
}

impl Client {
    /// Verbindet zum Server und fuehrt den HELLO-Handschlag durch
    ///
    /// Die Empfangs-Pipeline (Mixer samt Jitter Buffern) wird aus den
    /// Jitter-Parametern der Konfiguration gebaut. Bei Erfolg ist der
    /// Client im Zustand `Verbunden`: ID und SSRC sind zugewiesen, die
    /// Media-Adresse des Servers ist bekannt und der Heartbeat laeuft.
    pub async fn verbinden(
        control_addr: SocketAddr,
        config: &ClientConfig,
        fabrik: Arc<dyn DecoderFabrik>,
    ) -> Result<Self> {
        let name = config.client.name.as_str();
        // TCP-Verbindung mit kurzem Timeout
        let stream = tokio::time::timeout(VERBINDUNGS_TIMEOUT, TcpStream::connect(control_addr))
            .await
            .map_err(|_| {
                FunkraumError::Zeitlimit(format!("Server {control_addr} nicht erreichbar"))
            })?
            .map_err(|e| FunkraumError::Verbindung(format!("{control_addr}: {e}")))?;
        let _ = stream.set_nodelay(true);

        // Lokaler Media-Socket (Port vom OS)
        let media_socket = Arc::new(
            UdpSocket::bind("0.0.0.0:0")
                .await
                .map_err(|e| FunkraumError::Verbindung(format!("Media-Socket: {e}")))?,
        );
        let lokaler_media_port = media_socket
            .local_addr()
            .map_err(FunkraumError::Io)?
            .port();

        let inner = Arc::new(ClientInner {
            zustand: Mutex::new(Zustand::Getrennt),
            sitzung: Mutex::new(None),
            peers: Mutex::new(Vec::new()),
            mixer: MultiStreamMixer::neu(
                MAX_PEERS,
                config.jitter.als_jitter_config(),
                fabrik,
            ),
            encoder_parameter: Mutex::new(None),
            hello_ack: Mutex::new(None),
            join_ack: Mutex::new(None),
        });

        let (control_tx, control_rx) = mpsc::channel::<ControlNachricht>(SENDE_KANAL_GROESSE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        let mut verbindungs_tasks = Vec::new();

        // Control-Task: Lesen + Schreiben
        verbindungs_tasks.push(tokio::spawn(control_task(
            stream,
            control_rx,
            Arc::clone(&inner),
            Arc::clone(&shutdown_tx),
            shutdown_rx.clone(),
        )));

        // HELLO senden und auf die Bestaetigung warten
        let (ack_tx, ack_rx) = oneshot::channel();
        *inner.hello_ack.lock() = Some(ack_tx);

        let vorgeschlagene_id = ClientId::zufaellig();
        control_tx
            .send(ControlNachricht::Hello(Hello {
                client_id: vorgeschlagene_id.inner(),
                capability_flags: Capability::ALLE,
                name: name.to_string(),
            }))
            .await
            .map_err(|_| FunkraumError::Getrennt("Control-Task beendet".into()))?;

        // Bei fehlgeschlagenem Handschlag die Tasks wieder einsammeln
        let ack = match tokio::time::timeout(ACK_TIMEOUT, ack_rx).await {
            Ok(Ok(ack)) if ack.result == 0 => ack,
            Ok(Ok(ack)) => {
                let _ = shutdown_tx.send(true);
                return Err(FunkraumError::Verbindung(format!(
                    "HELLO abgelehnt: result={}",
                    ack.result
                )));
            }
            Ok(Err(_)) => {
                let _ = shutdown_tx.send(true);
                return Err(FunkraumError::Getrennt(
                    "Verbindung beim Handschlag verloren".into(),
                ));
            }
            Err(_) => {
                let _ = shutdown_tx.send(true);
                return Err(FunkraumError::Zeitlimit("HELLO_ACK ausgeblieben".into()));
            }
        };

        let daten = SitzungsDaten {
            id: ClientId(ack.assigned_id),
            ssrc: Ssrc(ack.assigned_id),
            server_media: SocketAddr::new(control_addr.ip(), ack.media_port),
        };
        inner.mixer.eigene_ssrc_setzen(daten.ssrc.inner());
        *inner.sitzung.lock() = Some(daten);
        *inner.zustand.lock() = Zustand::Verbunden;

        tracing::info!(
            id = %daten.id,
            server_media = %daten.server_media,
            lokaler_port = lokaler_media_port,
            "Mit Server verbunden"
        );

        // Heartbeat-Task
        let hb_tx = control_tx.clone();
        let hb_id = daten.id;
        let mut hb_shutdown = shutdown_rx.clone();
        verbindungs_tasks.push(tokio::spawn(async move {
            let mut intervall =
                tokio::time::interval(Duration::from_millis(HEARTBEAT_INTERVALL_MS));
            intervall.tick().await; // erster Tick feuert sofort
            loop {
                tokio::select! {
                    _ = intervall.tick() => {
                        let hb = ControlNachricht::Heartbeat(Heartbeat {
                            client_id: hb_id.inner(),
                            local_time: jetzt_ms(),
                        });
                        if hb_tx.send(hb).await.is_err() {
                            break;
                        }
                    }
                    Ok(()) = hb_shutdown.changed() => {
                        if *hb_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }));

        Ok(Self {
            inner,
            name: name.to_string(),
            media_socket,
            lokaler_media_port,
            control_tx,
            shutdown_tx,
            verbindungs_tasks,
            sitzungs_tasks: Vec::new(),
            sitzungs_shutdown: None,
            wiedergabe_laeuft: None,
            wiedergabe_thread: None,
            sende_tx: None,
            sende_laeuft: None,
            sende_thread: None,
        })
    }

    /// Tritt der Sprachsitzung bei
    ///
    /// Startet Media-Empfang, Sende-Brucke und den Wiedergabe-Treiber.
    /// `senke` nimmt die gemischten Frames fuer das Ausgabegeraet entgegen.
    pub async fn beitreten(&mut self, senke: Box<dyn WiedergabeSenke>) -> Result<()> {
        if self.zustand() != Zustand::Verbunden {
            return Err(FunkraumError::Sitzungszustand(
                "beitreten() erfordert Zustand Verbunden".into(),
            ));
        }
        let daten = (*self.inner.sitzung.lock())
            .ok_or_else(|| FunkraumError::Sitzungszustand("Keine Sitzungsdaten".into()))?;

        // Frischer Jitter-Zustand fuer die neue Sitzung
        self.inner.mixer.zuruecksetzen();

        // JOIN senden und auf die Bestaetigung warten
        let (ack_tx, ack_rx) = oneshot::channel();
        *self.inner.join_ack.lock() = Some(ack_tx);

        self.control_tx
            .send(ControlNachricht::Join(Join {
                client_id: daten.id.inner(),
                local_media_port: self.lokaler_media_port,
            }))
            .await
            .map_err(|_| FunkraumError::Getrennt("Control-Task beendet".into()))?;

        let ack = tokio::time::timeout(ACK_TIMEOUT, ack_rx)
            .await
            .map_err(|_| FunkraumError::Zeitlimit("JOIN_ACK ausgeblieben".into()))?
            .map_err(|_| FunkraumError::Getrennt("Verbindung beim Beitritt verloren".into()))?;

        if ack.result != 0 {
            return Err(FunkraumError::Verbindung(format!(
                "JOIN abgelehnt: result={}",
                ack.result
            )));
        }

        let (sitzung_tx, sitzung_rx) = watch::channel(false);

        // Media-Empfang: UDP -> Mixer, mit periodischem Aufraeumen.
        // Endet sowohl beim Sitzungs- als auch beim Verbindungs-Shutdown.
        self.sitzungs_tasks.push(tokio::spawn(media_empfang_task(
            Arc::clone(&self.media_socket),
            Arc::clone(&self.inner),
            sitzung_rx.clone(),
            self.shutdown_tx.subscribe(),
        )));

        // Sende-Brucke: Aufnahme-Kanal -> UDP (nicht-blockierend).
        // Die Empfangs-Deadline haelt den Thread stoppbar, auch wenn die
        // Aufnahme-Schleife ihren Sender noch haelt.
        let (sende_tx, sende_rx) = crossbeam_channel::bounded::<RtpPacket>(SENDE_KANAL_GROESSE);
        let sende_socket = Arc::clone(&self.media_socket);
        let sende_laeuft = Arc::new(AtomicBool::new(true));
        let sende_laeuft_thread = Arc::clone(&sende_laeuft);
        let ziel = daten.server_media;
        self.sende_thread = Some(
            std::thread::Builder::new()
                .name("funkraum-sende".to_string())
                .spawn(move || {
                    while sende_laeuft_thread.load(Ordering::Relaxed) {
                        match sende_rx.recv_timeout(Duration::from_millis(100)) {
                            Ok(paket) => {
                                let bytes = paket.encode();
                                if let Err(e) = sende_socket.try_send_to(&bytes, ziel) {
                                    tracing::trace!(fehler = %e, "Media-Sendung verworfen");
                                }
                            }
                            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                        }
                    }
                })
                .map_err(|e| FunkraumError::Intern(e.to_string()))?,
        );
        self.sende_tx = Some(sende_tx);
        self.sende_laeuft = Some(sende_laeuft);

        // Wiedergabe-Treiber: Mixer -> Senke
        let laeuft = Arc::new(AtomicBool::new(true));
        let mixer = self.inner.mixer.clone();
        let laeuft_thread = Arc::clone(&laeuft);
        self.wiedergabe_thread = Some(
            std::thread::Builder::new()
                .name("funkraum-wiedergabe".to_string())
                .spawn(move || wiedergabe_treiber(mixer, senke, laeuft_thread))
                .map_err(|e| FunkraumError::Intern(e.to_string()))?,
        );
        self.wiedergabe_laeuft = Some(laeuft);
        self.sitzungs_shutdown = Some(sitzung_tx);

        *self.inner.zustand.lock() = Zustand::InSitzung;
        tracing::info!(base_timestamp = ack.base_timestamp, "Sprachsitzung beigetreten");
        Ok(())
    }

    /// Verlaesst die Sprachsitzung (Verbindung bleibt bestehen)
    pub async fn verlassen(&mut self) {
        if self.zustand() != Zustand::InSitzung {
            return;
        }

        let _ = self.control_tx.send(ControlNachricht::Leave).await;
        self.sitzung_abbauen().await;
        *self.inner.zustand.lock() = Zustand::Verbunden;
        tracing::info!("Sprachsitzung verlassen");
    }

    /// Trennt die Verbindung vollstaendig
    ///
    /// Alle Tasks enden, saemtliche Jitter-Buffer und Decoder werden
    /// zerstoert.
    pub async fn trennen(mut self) {
        self.sitzung_abbauen().await;

        let _ = self.shutdown_tx.send(true);
        for task in self.verbindungs_tasks.drain(..) {
            let _ = task.await;
        }

        self.inner.mixer.zuruecksetzen();
        self.inner.peers.lock().clear();
        *self.inner.sitzung.lock() = None;
        *self.inner.zustand.lock() = Zustand::Getrennt;
        tracing::info!("Verbindung getrennt");
    }

    /// Aktueller Verbindungszustand
    pub fn zustand(&self) -> Zustand {
        *self.inner.zustand.lock()
    }

    /// Zugewiesene Client-ID (nach dem Handschlag)
    pub fn id(&self) -> Option<ClientId> {
        (*self.inner.sitzung.lock()).map(|d| d.id)
    }

    /// Eigene SSRC
    pub fn ssrc(&self) -> Option<Ssrc> {
        (*self.inner.sitzung.lock()).map(|d| d.ssrc)
    }

    /// Lokaler UDP-Media-Port
    pub fn lokaler_media_port(&self) -> u16 {
        self.lokaler_media_port
    }

    /// Anzeigename
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Aktueller Schnappschuss der bekannten Teilnehmer
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.inner.peers.lock().clone()
    }

    /// Aggregierte Jitter-Statistik ueber alle Empfangs-Streams
    pub fn jitter_statistik(&self) -> JitterStatistik {
        self.inner.mixer.statistik()
    }

    /// Vom Server mitgeteilte Codec-Parameter (nach dem Beitritt)
    ///
    /// Die Einbettung konfiguriert damit ihren Encoder, bevor sie die
    /// Aufnahme-Schleife startet.
    pub fn encoder_parameter(&self) -> Option<ParamUpdate> {
        *self.inner.encoder_parameter.lock()
    }

    /// Anzahl aktiver Empfangs-Streams
    pub fn aktive_streams(&self) -> usize {
        self.inner.mixer.aktive_streams()
    }

    /// Sende-Kanal fuer die Aufnahme-Schleife (nur in der Sitzung)
    pub fn sende_kanal(&self) -> Option<crossbeam_channel::Sender<RtpPacket>> {
        self.sende_tx.clone()
    }

    /// Schaltet die eigene Stummschaltung um und meldet sie dem Server
    pub async fn stumm_setzen(&self, stumm: bool) {
        let Some(daten) = *self.inner.sitzung.lock() else {
            return;
        };
        let nachricht = if stumm {
            ControlNachricht::AudioMute(funkraum_protocol::control::AudioControl {
                client_id: daten.id.inner(),
                action: 0,
                muted: 1,
            })
        } else {
            ControlNachricht::AudioUnmute(funkraum_protocol::control::AudioControl {
                client_id: daten.id.inner(),
                action: 0,
                muted: 0,
            })
        };
        let _ = self.control_tx.send(nachricht).await;
    }

    // -----------------------------------------------------------------------
    // Interner Abbau
    // -----------------------------------------------------------------------

    async fn sitzung_abbauen(&mut self) {
        if let Some(tx) = self.sitzungs_shutdown.take() {
            let _ = tx.send(true);
        }
        for task in self.sitzungs_tasks.drain(..) {
            let _ = task.await;
        }
        // Sende-Brucke: Flag loeschen und Kanal schliessen
        if let Some(laeuft) = self.sende_laeuft.take() {
            laeuft.store(false, Ordering::Relaxed);
        }
        self.sende_tx = None;
        if let Some(thread) = self.sende_thread.take() {
            let _ = thread.join();
        }
        if let Some(laeuft) = self.wiedergabe_laeuft.take() {
            laeuft.store(false, Ordering::Relaxed);
        }
        if let Some(thread) = self.wiedergabe_thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Threads duerfen den Prozess nicht ueberleben; Tasks enden ueber
        // die Shutdown-Signale von selbst.
        let _ = self.shutdown_tx.send(true);
        if let Some(tx) = self.sitzungs_shutdown.take() {
            let _ = tx.send(true);
        }
        self.sende_tx = None;
        if let Some(laeuft) = self.sende_laeuft.take() {
            laeuft.store(false, Ordering::Relaxed);
        }
        if let Some(laeuft) = self.wiedergabe_laeuft.take() {
            laeuft.store(false, Ordering::Relaxed);
        }
        if let Some(thread) = self.sende_thread.take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.wiedergabe_thread.take() {
            let _ = thread.join();
        }
    }
}

/// Millisekunden seit UNIX-Epoche
fn jetzt_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Control-Task
// ---------------------------------------------------------------------------

/// Lese-/Schreib-Schleife der Control-Verbindung
async fn control_task(
    mut stream: TcpStream,
    mut ausgang: mpsc::Receiver<ControlNachricht>,
    inner: Arc<ClientInner>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut codec = ControlCodec::new();
    let mut lese_puffer = BytesMut::with_capacity(MAX_FRAME_GROESSE);
    let mut schreib_puffer = BytesMut::new();

    'verbindung: loop {
        tokio::select! {
            result = stream.read_buf(&mut lese_puffer) => {
                match result {
                    Ok(0) => {
                        tracing::warn!("Control-Verbindung vom Server geschlossen");
                        break 'verbindung;
                    }
                    Ok(_) => loop {
                        match codec.decode(&mut lese_puffer) {
                            Ok(Some(frame)) => nachricht_verarbeiten(frame.nachricht, &inner),
                            Ok(None) => break,
                            Err(e) => {
                                tracing::warn!(fehler = %e, "Control-Stream nicht dekodierbar");
                                break 'verbindung;
                            }
                        }
                    },
                    Err(e) => {
                        tracing::warn!(fehler = %e, "Control-Lesefehler");
                        break 'verbindung;
                    }
                }
            }

            nachricht = ausgang.recv() => {
                match nachricht {
                    Some(nachricht) => {
                        schreib_puffer.clear();
                        if codec.encode(nachricht, &mut schreib_puffer).is_ok() {
                            if let Err(e) = stream.write_all(&schreib_puffer).await {
                                tracing::warn!(fehler = %e, "Control-Schreibfehler");
                                break 'verbindung;
                            }
                        }
                    }
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

    // Verbindungsabriss: den Rest des Clients mitnehmen
    *inner.zustand.lock() = Zustand::Getrennt;
    let _ = shutdown_tx.send(true);
    tracing::info!("Control-Task beendet");
}

/// Dispatch der eingehenden Control-Nachrichten
fn nachricht_verarbeiten(nachricht: ControlNachricht, inner: &ClientInner) {
    match nachricht {
        ControlNachricht::HelloAck(ack) => {
            if let Some(tx) = inner.hello_ack.lock().take() {
                let _ = tx.send(ack);
            }
        }

        ControlNachricht::JoinAck(ack) => {
            if let Some(tx) = inner.join_ack.lock().take() {
                let _ = tx.send(ack);
            }
        }

        ControlNachricht::PeerList(liste) => {
            tracing::info!(anzahl = liste.peers.len(), "Teilnehmerliste empfangen");
            *inner.peers.lock() = liste.peers;
        }

        ControlNachricht::PeerJoin(notify) => {
            tracing::info!(
                id = notify.peer.client_id,
                name = %notify.peer.name,
                "Teilnehmer beigetreten"
            );
            inner.peer_aufnehmen(notify.peer);
        }

        ControlNachricht::PeerLeave(notify) => {
            tracing::info!(id = notify.peer.client_id, "Teilnehmer gegangen");
            inner.peer_entfernen(notify.peer.client_id);
        }

        ControlNachricht::PeerState(notify) => {
            inner.peer_aufnehmen(notify.peer);
        }

        ControlNachricht::ParamUpdate(update) => {
            tracing::info!(
                bitrate = update.bitrate,
                frame_ms = update.frame_ms,
                komplexitaet = update.complexity,
                "Codec-Parameter vom Server"
            );
            *inner.encoder_parameter.lock() = Some(update);
        }

        ControlNachricht::Heartbeat(_) => {
            // Server-Echo; der Empfang selbst genuegt
        }

        ControlNachricht::TimeSync(sync) => {
            tracing::debug!(
                server_time = sync.server_time,
                base = sync.base_timestamp,
                "Zeitsynchronisation"
            );
        }

        andere => {
            tracing::debug!(typ = ?andere.typ(), "Unerwartete Control-Nachricht");
        }
    }
}

// ---------------------------------------------------------------------------
// Media-Empfang
// ---------------------------------------------------------------------------

/// UDP-Empfangsschleife: Pakete in den Mixer einsortieren
///
/// Eigene Pakete (gleiche SSRC) werden uebersprungen; alle 5 s werden
/// inaktive Streams (> 10 s ohne Paket) abgeraeumt.
async fn media_empfang_task(
    socket: Arc<UdpSocket>,
    inner: Arc<ClientInner>,
    mut shutdown: watch::Receiver<bool>,
    mut verbindungs_shutdown: watch::Receiver<bool>,
) {
    let mut puffer = [0u8; RtpHeader::GROESSE + MAX_MEDIA_NUTZDATEN + 64];
    let mut aufraeum_intervall = tokio::time::interval(Duration::from_secs(5));

    tracing::info!("Media-Empfang gestartet");

    loop {
        tokio::select! {
            result = socket.recv_from(&mut puffer) => {
                match result {
                    Ok((laenge, _absender)) => {
                        match RtpHeader::decode(&puffer[..laenge]) {
                            Ok(header) => {
                                let nutzdaten = &puffer[RtpHeader::GROESSE..laenge];
                                inner.mixer.einfuegen(&header, nutzdaten);
                            }
                            Err(e) => {
                                tracing::trace!(fehler = %e, "Ungueltiges Media-Paket");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::debug!(fehler = %e, "Media-Empfangsfehler");
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                }
            }

            _ = aufraeum_intervall.tick() => {
                let entfernt = inner.mixer.inaktive_bereinigen(STREAM_TIMEOUT);
                if entfernt > 0 {
                    tracing::debug!(entfernt, "Inaktive Streams abgeraeumt");
                }
            }

            Ok(()) = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }

            Ok(()) = verbindungs_shutdown.changed() => {
                if *verbindungs_shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("Media-Empfang beendet");
}

// ---------------------------------------------------------------------------
// Wiedergabe-Treiber
// ---------------------------------------------------------------------------

/// Zieht pro Takt einen gemischten Frame und reicht ihn an die Senke
///
/// Das Timing haengt am Ausgabegeraet: die Senke blockiert bis ihre
/// Warteschlange Platz hat; bei leerem Mixer wird kurz geschlafen.
fn wiedergabe_treiber(
    mixer: MultiStreamMixer,
    mut senke: Box<dyn WiedergabeSenke>,
    laeuft: Arc<AtomicBool>,
) {
    let mut frame = vec![0i16; FRAME_SAMPLES];
    tracing::info!("Wiedergabe-Treiber gestartet");

    while laeuft.load(Ordering::Relaxed) {
        let samples = mixer.gemischt_entnehmen(&mut frame);
        if samples > 0 {
            senke.frame_abspielen(&frame[..samples]);
        } else {
            std::thread::sleep(WIEDERGABE_PAUSE);
        }
    }

    tracing::info!("Wiedergabe-Treiber beendet");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
