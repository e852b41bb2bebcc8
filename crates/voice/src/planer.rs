//! Wiedergabe-Planung pro Quelle
//!
//! Der Session-Tick laeuft alle 20 ms; pro Quelle wird eine geplante
//! Startzeit mitgefuehrt, damit die Frames trotz Scheduler-Schwankungen
//! nicht driften. Liegt die geplante Startzeit bereits in der
//! Vergangenheit, wird sie um 50 ms nach vorn geschnappt.

use std::collections::HashMap;

use tokio::time::{Duration, Instant};

/// Abstand zweier Frames
pub const FRAME_DAUER: Duration = Duration::from_millis(20);

/// Aufhol-Sprung wenn die Uhr hinter der Echtzeit liegt
const AUFHOL_SPRUNG: Duration = Duration::from_millis(50);

/// Plant die Startzeiten der Frames aller Quellen
#[derive(Debug, Default)]
pub struct WiedergabePlaner {
    uhren: HashMap<u32, Instant>,
}

impl WiedergabePlaner {
    /// Erstellt einen leeren Planer
    pub fn neu() -> Self {
        Self::default()
    }

    /// Liefert die geplante Startzeit des naechsten Frames einer Quelle
    /// und rueckt die Uhr um eine Frame-Dauer vor
    pub fn frame_einplanen(&mut self, ssrc: u32, jetzt: Instant) -> Instant {
        let uhr = self.uhren.entry(ssrc).or_insert(jetzt);
        if *uhr < jetzt {
            *uhr = jetzt + AUFHOL_SPRUNG;
        }
        let geplant = *uhr;
        *uhr += FRAME_DAUER;
        geplant
    }

    /// Entfernt die Uhr einer Quelle
    pub fn entfernen(&mut self, ssrc: u32) {
        self.uhren.remove(&ssrc);
    }

    /// Entfernt alle Uhren
    pub fn reset(&mut self) {
        self.uhren.clear();
    }
}
