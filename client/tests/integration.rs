//! Integrationstest: Server und Clients ueber Loopback
//!
//! Startet einen vollstaendigen Server auf OS-vergebenen Ports, verbindet
//! zwei Clients, laesst einen davon Media-Pakete senden und prueft, dass
//! der andere sie ueber den Fan-out-Pfad in seinen Mixer bekommt.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use funkraum_audio::WiedergabeSenke;
use funkraum_client::{Client, ClientConfig, Zustand};
use funkraum_protocol::voice::RtpPacket;
use funkraum_server::config::ServerConfig;
use funkraum_server::Server;
use funkraum_voice::codec::{AudioEncoder, PcmCodec, PcmFabrik};

struct VerwerfendeSenke;

impl WiedergabeSenke for VerwerfendeSenke {
    fn frame_abspielen(&mut self, _samples: &[i16]) {}
}

fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.netzwerk.bind_adresse = "127.0.0.1".into();
    config.netzwerk.discovery_port = 0;
    config.netzwerk.control_port = 0;
    config.netzwerk.media_port = 0;
    config
}

async fn client_verbinden(control_port: u16, name: &str) -> Client {
    let adresse: SocketAddr = format!("127.0.0.1:{control_port}").parse().unwrap();
    let mut config = ClientConfig::default();
    config.client.name = name.into();
    Client::verbinden(adresse, &config, Arc::new(PcmFabrik))
        .await
        .expect("Client muss verbinden koennen")
}

#[tokio::test]
async fn handshake_und_beitritt() {
    let mut server = Server::neu(test_config());
    let ports = server.starten().await.unwrap();

    let mut client = client_verbinden(ports.control, "Anna").await;
    assert_eq!(client.zustand(), Zustand::Verbunden);
    assert!(client.id().is_some());
    // SSRC muss gleich der zugewiesenen ID sein
    assert_eq!(
        client.id().unwrap().inner(),
        client.ssrc().unwrap().inner()
    );

    client.beitreten(Box::new(VerwerfendeSenke)).await.unwrap();
    assert_eq!(client.zustand(), Zustand::InSitzung);

    // Der Server teilt nach dem Beitritt seine Codec-Parameter mit
    let mut parameter = None;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        parameter = client.encoder_parameter();
        if parameter.is_some() {
            break;
        }
    }
    let parameter = parameter.expect("PARAM_UPDATE muss ankommen");
    assert_eq!(parameter.bitrate, 32_000);
    assert_eq!(parameter.frame_ms, 20);

    client.verlassen().await;
    assert_eq!(client.zustand(), Zustand::Verbunden);

    client.trennen().await;
    server.stoppen().await;
}

#[tokio::test]
async fn peer_liste_und_benachrichtigungen() {
    let mut server = Server::neu(test_config());
    let ports = server.starten().await.unwrap();

    let mut anna = client_verbinden(ports.control, "Anna").await;
    anna.beitreten(Box::new(VerwerfendeSenke)).await.unwrap();

    let mut ben = client_verbinden(ports.control, "Ben").await;
    ben.beitreten(Box::new(VerwerfendeSenke)).await.unwrap();

    // Ben sieht Anna in seiner PEER_LIST, Anna bekommt das PEER_JOIN
    let mut ben_sieht_anna = false;
    let mut anna_sieht_ben = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        ben_sieht_anna = ben.peers().iter().any(|p| p.name == "Anna");
        anna_sieht_ben = anna.peers().iter().any(|p| p.name == "Ben");
        if ben_sieht_anna && anna_sieht_ben {
            break;
        }
    }
    assert!(ben_sieht_anna, "Ben muss Anna in der Teilnehmerliste sehen");
    assert!(anna_sieht_ben, "Anna muss Bens Beitritt mitbekommen");

    // Ben trennt sich; Anna muss das PEER_LEAVE verarbeiten
    ben.verlassen().await;
    ben.trennen().await;

    let mut ben_weg = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if !anna.peers().iter().any(|p| p.name == "Ben") {
            ben_weg = true;
            break;
        }
    }
    assert!(ben_weg, "Anna muss Bens Abgang mitbekommen");

    anna.trennen().await;
    server.stoppen().await;
}

#[tokio::test]
async fn media_fanout_erreicht_anderen_client() {
    let mut server = Server::neu(test_config());
    let ports = server.starten().await.unwrap();

    let mut sender = client_verbinden(ports.control, "Sender").await;
    sender.beitreten(Box::new(VerwerfendeSenke)).await.unwrap();

    let mut hoerer = client_verbinden(ports.control, "Hoerer").await;
    hoerer.beitreten(Box::new(VerwerfendeSenke)).await.unwrap();

    // Der Sender schickt kodierte Frames ueber seine Sende-Brucke
    let kanal = sender.sende_kanal().expect("Sende-Kanal in der Sitzung");
    let ssrc = sender.ssrc().unwrap().inner();
    let mut codec = PcmCodec::neu();

    for seq in 0..10u16 {
        let pcm = vec![seq as i16 * 100; 16];
        let mut nutzdaten = vec![0u8; 32];
        let laenge = codec.kodieren(&pcm, &mut nutzdaten).unwrap();
        nutzdaten.truncate(laenge);

        let paket = RtpPacket::neu_voice(seq, seq as u32 * 960, ssrc, nutzdaten);
        kanal.send(paket).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Der Hoerer muss den Stream des Senders in seinem Mixer haben
    let mut stream_da = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if hoerer.aktive_streams() > 0 {
            stream_da = true;
            break;
        }
    }
    assert!(stream_da, "Fan-out muss den Hoerer erreichen");

    let stats = hoerer.jitter_statistik();
    assert!(stats.empfangen > 0, "Pakete muessen angenommen worden sein");

    // Der Sender selbst darf seinen eigenen Stream nicht empfangen
    assert_eq!(sender.aktive_streams(), 0, "Kein Echo des eigenen Streams");

    sender.trennen().await;
    hoerer.trennen().await;
    server.stoppen().await;
}

#[tokio::test]
async fn konfigurierte_codec_parameter_erreichen_den_client() {
    let mut config = test_config();
    config.audio.bitrate_kbps = 64;
    config.audio.frame_ms = 40;
    let mut server = Server::neu(config);
    let ports = server.starten().await.unwrap();

    let mut client = client_verbinden(ports.control, "Para").await;
    client.beitreten(Box::new(VerwerfendeSenke)).await.unwrap();

    let mut parameter = None;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        parameter = client.encoder_parameter();
        if parameter.is_some() {
            break;
        }
    }
    let parameter = parameter.expect("PARAM_UPDATE muss ankommen");
    assert_eq!(parameter.bitrate, 64_000, "Konfigurierte Bitrate muss ankommen");
    assert_eq!(parameter.frame_ms, 40);

    client.trennen().await;
    server.stoppen().await;
}

#[tokio::test]
async fn server_voll_lehnt_weitere_clients_ab() {
    let mut config = test_config();
    config.server.max_peers = 1;
    let mut server = Server::neu(config);
    let ports = server.starten().await.unwrap();

    let erster = client_verbinden(ports.control, "Erster").await;

    // Der zweite Client scheitert am Handschlag (Verbindung wird verworfen)
    let adresse: SocketAddr = format!("127.0.0.1:{}", ports.control).parse().unwrap();
    let mut config = ClientConfig::default();
    config.client.name = "Zweiter".into();
    let zweiter = Client::verbinden(adresse, &config, Arc::new(PcmFabrik)).await;
    assert!(zweiter.is_err(), "Voller Server darf nicht annehmen");

    erster.trennen().await;
    server.stoppen().await;
}
