//! Gemeinsame Identifikationstypen fuer Funkraum
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen. Die IDs sind
//! 32-Bit-Werte, weil sie in genau dieser Breite auf dem Draht stehen
//! (Control-Header und RTP-SSRC).

use rand::Rng;

/// Eindeutige Client-ID (32 Bit, Wire-Format)
///
/// Die ID 0 ist reserviert: ein Client der mit ID 0 anklopft bekommt
/// vom Server eine neue ID zugewiesen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClientId(pub u32);

impl ClientId {
    /// Erstellt eine zufaellige ClientId (garantiert != 0)
    pub fn zufaellig() -> Self {
        let mut rng = rand::rng();
        loop {
            let id: u32 = rng.random();
            if id != 0 {
                return Self(id);
            }
        }
    }

    /// Gibt den inneren Wert zurueck
    pub fn inner(&self) -> u32 {
        self.0
    }

    /// Prueft ob die ID die reservierte Null-ID ist
    pub fn ist_null(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client:{:08x}", self.0)
    }
}

/// Synchronisation Source – Senderkennung im Media-Header
///
/// In diesem System gilt die Invariante `ssrc == client_id`; die SSRC wird
/// beim HELLO-Handshake aus der zugewiesenen ID uebernommen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ssrc(pub u32);

impl Ssrc {
    /// Gibt den inneren Wert zurueck
    pub fn inner(&self) -> u32 {
        self.0
    }
}

impl From<ClientId> for Ssrc {
    fn from(id: ClientId) -> Self {
        Self(id.0)
    }
}

impl std::fmt::Display for Ssrc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ssrc:{:08x}", self.0)
    }
}

/// Eindeutige Server-ID (32 Bit, Wire-Format)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ServerId(pub u32);

impl ServerId {
    /// Erstellt eine zufaellige ServerId (garantiert != 0)
    pub fn zufaellig() -> Self {
        Self(ClientId::zufaellig().0)
    }

    /// Gibt den inneren Wert zurueck
    pub fn inner(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "server:{:08x}", self.0)
    }
}
