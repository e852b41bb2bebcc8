//! Funkraum Core – gemeinsame Grundlagen
//!
//! Enthaelt die Typen die von allen Funkraum-Crates geteilt werden:
//! ID-Newtypes, der zentrale Fehler-Enum, die Observer-Events des
//! Voice-Clients und das Logging-Setup.

pub mod error;
pub mod event;
pub mod logging;
pub mod types;

pub use error::{FunkraumError, Result};
pub use event::{ConnectionState, VoiceEvent};
pub use types::{RoomId, SprechFlags, UserId};
