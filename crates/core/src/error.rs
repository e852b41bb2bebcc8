//! Fehlertypen fuer Funkraum
//!
//! Zentraler Fehler-Enum der alle moeglichen Fehlerzustaende abdeckt.
//! Untermodule definieren eigene Fehler und konvertieren via `#[from]`.

use thiserror::Error;

/// Globaler Result-Alias fuer Funkraum
pub type Result<T> = std::result::Result<T, FunkraumError>;

/// Alle moeglichen Fehler im Funkraum-System
#[derive(Debug, Error)]
pub enum FunkraumError {
    // --- Verbindung & Netzwerk ---
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Verbindung getrennt: {0}")]
    Getrennt(String),

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    #[error("Maximale Reconnect-Versuche erreicht ({0})")]
    ReconnectErschoepft(u32),

    // --- Protokoll ---
    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    #[error("Handshake fehlgeschlagen: {0}")]
    Handshake(String),

    // --- Kryptografie ---
    #[error("Authentifizierung des Pakets fehlgeschlagen")]
    AuthFehler,

    #[error("Ungueltiger Sitzungsschluessel: {0}")]
    Schluessel(String),

    // --- Audio ---
    #[error("Audiofehler: {0}")]
    Audio(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl FunkraumError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler einen Reconnect rechtfertigt
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(
            self,
            Self::Zeitlimit(_) | Self::Verbindung(_) | Self::Getrennt(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = FunkraumError::Verbindung("DNS-Aufloesung fehlgeschlagen".into());
        assert_eq!(
            e.to_string(),
            "Verbindung fehlgeschlagen: DNS-Aufloesung fehlgeschlagen"
        );
    }

    #[test]
    fn wiederholbar_erkennung() {
        assert!(FunkraumError::Zeitlimit("test".into()).ist_wiederholbar());
        assert!(FunkraumError::Getrennt("test".into()).ist_wiederholbar());
        assert!(!FunkraumError::AuthFehler.ist_wiederholbar());
        assert!(!FunkraumError::Konfiguration("test".into()).ist_wiederholbar());
    }

    #[test]
    fn reconnect_erschoepft_anzeige() {
        let e = FunkraumError::ReconnectErschoepft(5);
        assert!(e.to_string().contains('5'));
    }
}
