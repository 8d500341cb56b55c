//! funkraum-protocol – Netzwerkprotokoll-Definitionen
//!
//! Dieses Crate definiert die beiden Wire-Formate des Systems:
//! - [`control`] – binaere Steuerungsnachrichten (TCP, 20-Byte-Header)
//! - [`voice`] – RTP-artige Media-Pakete (UDP, 16-Byte-Header)
//! - [`wire`] – tokio-util Codec fuer das TCP-Framing
//!
//! Alle Integer stehen little-endian auf dem Draht.

pub mod control;
pub mod voice;
pub mod wire;

pub use control::{ControlNachricht, MessageType, PacketHeader, PeerInfo};
pub use voice::{RtpHeader, RtpPacket};
pub use wire::{ControlCodec, ControlFrame};
