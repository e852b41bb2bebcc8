//! Observer-Events des Voice-Clients
//!
//! Die VoiceSession meldet ihren Lebenszyklus ueber einen einzigen
//! Event-Strom nach aussen. Die umgebende Anwendung konsumiert nur
//! diese Events und greift nie direkt in Pipeline oder Jitter-Buffer.

use crate::types::{SprechFlags, UserId};
use serde::{Deserialize, Serialize};

/// Verbindungszustand der VoiceSession
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Nicht verbunden (Ausgangs- und Endzustand)
    #[default]
    Disconnected,
    /// Handshake laeuft (Identify -> Ready -> SessionDescribe)
    Connecting,
    /// Vollstaendig verbunden, Audio-Pfad aktiv
    Connected,
    /// Verbindung verloren, automatischer Wiederaufbau laeuft
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Alle Ereignisse die die VoiceSession nach aussen meldet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VoiceEvent {
    /// Der Verbindungszustand hat sich geaendert
    ZustandGeaendert(ConnectionState),
    /// Handshake abgeschlossen, Session ist voll verbunden
    Verbunden,
    /// Session endgueltig getrennt (absichtlich oder Versuche erschoepft)
    Getrennt,
    /// Automatischer Wiederaufbau laeuft
    Reconnecting {
        /// Laufender Versuch (1-basiert)
        versuch: u32,
        /// Maximale Anzahl Versuche
        max_versuche: u32,
    },
    /// Ein Teilnehmer ist dem Raum beigetreten
    BenutzerBeigetreten { user_id: UserId, ssrc: u32 },
    /// Ein Teilnehmer hat den Raum verlassen
    BenutzerGegangen { user_id: UserId },
    /// Der Speaking-Zustand eines Teilnehmers hat sich geaendert
    BenutzerSpricht {
        user_id: UserId,
        ssrc: u32,
        flags: SprechFlags,
    },
    /// Ressourcen-Fehler (z.B. Mikrofon nicht verfuegbar); die Session
    /// bleibt verbunden
    Fehler { ursache: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zustand_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }

    #[test]
    fn zustand_default_ist_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn event_ist_serde_kompatibel() {
        let event = VoiceEvent::Reconnecting {
            versuch: 2,
            max_versuche: 5,
        };
        let json = serde_json::to_string(&event).unwrap();
        let wieder: VoiceEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            wieder,
            VoiceEvent::Reconnecting {
                versuch: 2,
                max_versuche: 5
            }
        ));
    }

    #[test]
    fn benutzer_event_traegt_ssrc() {
        let event = VoiceEvent::BenutzerBeigetreten {
            user_id: UserId::neu("a"),
            ssrc: 111,
        };
        if let VoiceEvent::BenutzerBeigetreten { ssrc, .. } = event {
            assert_eq!(ssrc, 111);
        } else {
            panic!("Falscher Typ");
        }
    }
}
