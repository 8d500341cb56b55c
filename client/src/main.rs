//! Funkraum Client – Kommandozeilen-Einstiegspunkt
//!
//! Laedt die Konfiguration, verbindet sich zu einem Server (Adresse als
//! Argument oder per LAN-Discovery), tritt der Sprachsitzung bei und
//! laeuft bis Ctrl-C. Die Geraetebindung liegt ausserhalb; dieses Binary
//! lauscht nur und verwirft die gemischten Frames.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use funkraum_audio::WiedergabeSenke;
use funkraum_client::discovery::DiscoverySucher;
use funkraum_client::{Client, ClientConfig};
use funkraum_core::ClientId;
use funkraum_voice::codec::PcmFabrik;

/// Senke ohne Geraet: verwirft die Frames (reiner Mithoer-Betrieb)
struct VerwerfendeSenke;

impl WiedergabeSenke for VerwerfendeSenke {
    fn frame_abspielen(&mut self, _samples: &[i16]) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    logging_initialisieren();

    // Konfiguration laden (Standardwerte falls Datei fehlt);
    // FUNKRAUM_NAME ueberschreibt den konfigurierten Anzeigenamen
    let config_pfad = std::env::var("FUNKRAUM_CLIENT_CONFIG")
        .unwrap_or_else(|_| "funkraum-client.toml".into());
    let mut config = ClientConfig::laden(&config_pfad)?;
    if let Ok(name) = std::env::var("FUNKRAUM_NAME") {
        config.client.name = name;
    }

    // Server-Adresse: erstes Argument oder LAN-Discovery
    let adresse = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<SocketAddr>()
            .with_context(|| format!("Ungueltige Server-Adresse: {arg}"))?,
        None => server_suchen(&config.client.name).await?,
    };

    tracing::info!(server = %adresse, name = %config.client.name, "Verbinde...");
    let mut client = Client::verbinden(adresse, &config, Arc::new(PcmFabrik)).await?;
    client.beitreten(Box::new(VerwerfendeSenke)).await?;

    tracing::info!(
        id = ?client.id(),
        parameter = ?client.encoder_parameter(),
        "In der Sprachsitzung. Beenden mit Ctrl-C."
    );

    tokio::signal::ctrl_c()
        .await
        .context("Warten auf Ctrl-C fehlgeschlagen")?;

    client.verlassen().await;
    client.trennen().await;
    Ok(())
}

/// Sucht per LAN-Discovery den ersten antwortenden Server
async fn server_suchen(name: &str) -> Result<SocketAddr> {
    tracing::info!("Keine Adresse angegeben – LAN-Discovery laeuft...");
    let sucher = DiscoverySucher::starten(ClientId::zufaellig(), name).await?;

    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        if let Some(server) = sucher.server_liste().into_iter().next() {
            tracing::info!(
                server = %server.name,
                adresse = %server.adresse,
                peers = server.aktuelle_peers,
                "Server gefunden"
            );
            let adresse = server.control_adresse();
            sucher.stoppen().await;
            return Ok(adresse);
        }
    }

    sucher.stoppen().await;
    anyhow::bail!("Kein Server im LAN gefunden")
}

/// Initialisiert tracing-subscriber (Level via FUNKRAUM_LOG, Standard info)
fn logging_initialisieren() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_env("FUNKRAUM_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).init();
}
