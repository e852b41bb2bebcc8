//! Funkraum Voice – der Echtzeit-Voice-Client
//!
//! Kern des Clients ist die [`session::VoiceSession`]: ein Aktor der den
//! Signaling-Kanal zum SFU besitzt, den Handshake fuehrt (Identify ->
//! Ready -> SelectProtocol -> SessionDescribe), Heartbeats ueberwacht,
//! Mikrofon-Pakete versiegelt und sendet, empfangene Pakete pro SSRC
//! puffert, dekodiert und an die Audio-Senke verteilt – und bei
//! Verbindungsverlust mit exponentiellem Backoff und stabiler
//! `session_id` automatisch wieder aufbaut.

pub mod empfang;
pub mod herzschlag;
pub mod jitter;
pub mod planer;
pub mod session;
pub mod statistik;
pub mod teilnehmer;
pub mod transport;

pub use jitter::{JitterBuffer, JitterBufferConfig};
pub use session::{VoiceSession, VoiceSessionConfig, VoiceSessionHandle};
pub use statistik::VoiceStatistik;
pub use transport::{TransportFabrik, TransportPaar, WireFrame, WsTransportFabrik};
