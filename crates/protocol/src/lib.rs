//! Funkraum Protokoll – Wire-Formate des Voice-Clients
//!
//! Zwei Ebenen auf demselben Duplex-Kanal:
//! - **Signaling** (Text-Frames): JSON-Nachrichten `{ op, d }` fuer
//!   Handshake, Heartbeat und Teilnehmer-Ereignisse.
//! - **Media** (Binaer-Frames): RTP-gerahmte, symmetrisch
//!   verschluesselte Opus-Pakete.

pub mod crypto;
pub mod error;
pub mod rtp;
pub mod signaling;

pub use crypto::{oeffnen, versiegeln, SessionSchluessel};
pub use error::{ProtokollFehler, ProtokollResult};
pub use rtp::{seq_diff, AusgangsZaehler, RtpHeader};
pub use signaling::{eingehende_deuten, SignalEreignis};
