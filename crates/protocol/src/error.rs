//! Fehlertypen der Protokoll-Ebene

use thiserror::Error;

/// Result-Alias fuer Protokoll-Operationen
pub type ProtokollResult<T> = Result<T, ProtokollFehler>;

/// Alle moeglichen Fehler beim Parsen und Verschluesseln von Nachrichten
#[derive(Debug, Error)]
pub enum ProtokollFehler {
    // --- Signaling ---
    #[error("Ungueltiger Nachrichten-Rahmen: {0}")]
    Rahmen(#[source] serde_json::Error),

    #[error("Schema-Fehler in Opcode {op}: {quelle}")]
    Schema {
        op: u8,
        #[source]
        quelle: serde_json::Error,
    },

    #[error("Serialisierung fehlgeschlagen: {0}")]
    Serialisierung(#[source] serde_json::Error),

    // --- RTP ---
    #[error("RTP-Header zu kurz: {laenge} Bytes (erwartet {erwartet})")]
    HeaderZuKurz { laenge: usize, erwartet: usize },

    #[error("Ungueltiger RTP-Header: {0}")]
    HeaderUngueltig(String),

    // --- Kryptografie ---
    #[error("Authentifizierung des Pakets fehlgeschlagen")]
    AuthFehler,

    #[error("Ungueltige Schluessel-Laenge: {erhalten} Bytes (erwartet {erwartet})")]
    SchluesselLaenge { erwartet: usize, erhalten: usize },

    #[error("Unbekannter Verschluesselungsmodus: '{0}'")]
    UnbekannterModus(String),

    #[error("Base64-Dekodierung des Schluessels fehlgeschlagen: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Verschluesselung fehlgeschlagen")]
    Verschluesselung,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_fehler_anzeige() {
        let e = ProtokollFehler::AuthFehler;
        assert_eq!(e.to_string(), "Authentifizierung des Pakets fehlgeschlagen");
    }

    #[test]
    fn schluessel_laenge_anzeige() {
        let e = ProtokollFehler::SchluesselLaenge {
            erwartet: 32,
            erhalten: 16,
        };
        assert!(e.to_string().contains("16"));
        assert!(e.to_string().contains("32"));
    }
}
