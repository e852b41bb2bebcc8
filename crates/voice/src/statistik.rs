//! Laufzeit-Zaehler der VoiceSession
//!
//! Paket-Fehler sind nie fatal – sie werden gezaehlt und geloggt.
//! Die Zaehler sind atomar, damit das Handle sie jederzeit lesen kann
//! ohne den Session-Aktor zu beruehren.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomare Zaehler der Session
#[derive(Debug, Default)]
pub struct VoiceStatistik {
    /// Pakete deren Authentifizierung fehlschlug
    auth_fehler: AtomicU64,
    /// Binaer-Frames mit ungueltigem RTP-Header
    header_fehler: AtomicU64,
    /// Nachrichten mit unbekanntem oder unerwartetem Opcode
    unbekannte_opcodes: AtomicU64,
    /// Nachrichten deren Payload nicht zum Opcode passte
    schema_fehler: AtomicU64,
    /// Pakete fuer eine SSRC ohne bekannten Teilnehmer
    unbekannte_ssrc: AtomicU64,
    /// Erfolgreich gesendete Media-Pakete
    gesendet: AtomicU64,
    /// Erfolgreich geoeffnete Media-Pakete
    empfangen: AtomicU64,
    /// Im Sendepuffer verworfene Pakete (Netz-Rueckstau)
    sende_verworfen: AtomicU64,
}

/// Schnappschuss aller Zaehler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatistikWerte {
    pub auth_fehler: u64,
    pub header_fehler: u64,
    pub unbekannte_opcodes: u64,
    pub schema_fehler: u64,
    pub unbekannte_ssrc: u64,
    pub gesendet: u64,
    pub empfangen: u64,
    pub sende_verworfen: u64,
}

impl VoiceStatistik {
    pub fn neu() -> Self {
        Self::default()
    }

    pub fn auth_fehler_zaehlen(&self) {
        self.auth_fehler.fetch_add(1, Ordering::Relaxed);
    }

    pub fn header_fehler_zaehlen(&self) {
        self.header_fehler.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unbekannten_opcode_zaehlen(&self) {
        self.unbekannte_opcodes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn schema_fehler_zaehlen(&self) {
        self.schema_fehler.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unbekannte_ssrc_zaehlen(&self) {
        self.unbekannte_ssrc.fetch_add(1, Ordering::Relaxed);
    }

    pub fn gesendet_zaehlen(&self) {
        self.gesendet.fetch_add(1, Ordering::Relaxed);
    }

    pub fn empfangen_zaehlen(&self) {
        self.empfangen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sende_verworfen_zaehlen(&self) {
        self.sende_verworfen.fetch_add(1, Ordering::Relaxed);
    }

    /// Liest alle Zaehler als Schnappschuss
    pub fn werte(&self) -> StatistikWerte {
        StatistikWerte {
            auth_fehler: self.auth_fehler.load(Ordering::Relaxed),
            header_fehler: self.header_fehler.load(Ordering::Relaxed),
            unbekannte_opcodes: self.unbekannte_opcodes.load(Ordering::Relaxed),
            schema_fehler: self.schema_fehler.load(Ordering::Relaxed),
            unbekannte_ssrc: self.unbekannte_ssrc.load(Ordering::Relaxed),
            gesendet: self.gesendet.load(Ordering::Relaxed),
            empfangen: self.empfangen.load(Ordering::Relaxed),
            sende_verworfen: self.sende_verworfen.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zaehler_starten_bei_null() {
        let statistik = VoiceStatistik::neu();
        assert_eq!(statistik.werte(), StatistikWerte::default());
    }

    #[test]
    fn zaehler_erhoehen() {
        let statistik = VoiceStatistik::neu();
        statistik.auth_fehler_zaehlen();
        statistik.auth_fehler_zaehlen();
        statistik.gesendet_zaehlen();

        let werte = statistik.werte();
        assert_eq!(werte.auth_fehler, 2);
        assert_eq!(werte.gesendet, 1);
        assert_eq!(werte.empfangen, 0);
    }
}
