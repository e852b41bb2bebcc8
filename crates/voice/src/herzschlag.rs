//! Heartbeat-Ueberwachung
//!
//! Ab Ready sendet die Session alle `heartbeat_interval` Millisekunden
//! einen Heartbeat mit frischer Client-Nonce. Jede HeartbeatAck setzt
//! den Verpasst-Zaehler zurueck. Liegt die letzte Ack laenger als das
//! 1,5-fache Intervall zurueck, zaehlt das als Verpasser; beim zweiten
//! Verpasser gilt die Verbindung als tot und der Transport wird
//! geschlossen (was in den Reconnect-Zweig faellt).

use tokio::time::{Duration, Instant};
use tracing::warn;

/// Verpasser ab denen die Verbindung als tot gilt
const MAX_VERPASST: u32 = 2;

/// Zustand vor dem naechsten Heartbeat-Schlag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HerzschlagZustand {
    /// Acks kommen rechtzeitig – weiter senden
    Gesund,
    /// Ack ueberfaellig, aber noch unter der Abbruchgrenze
    Verspaetet(u32),
    /// Zwei Verpasser – Transport schliessen
    Tot,
}

/// Ueberwachungs-Uhr des Heartbeats
#[derive(Debug)]
pub struct HerzschlagUhr {
    intervall: Duration,
    letzte_ack: Instant,
    verpasst: u32,
}

impl HerzschlagUhr {
    /// Erstellt eine neue Uhr; `jetzt` zaehlt als erste Ack
    pub fn neu(intervall: Duration, jetzt: Instant) -> Self {
        Self {
            intervall,
            letzte_ack: jetzt,
            verpasst: 0,
        }
    }

    /// Registriert eine empfangene HeartbeatAck
    pub fn ack_empfangen(&mut self, jetzt: Instant) {
        self.letzte_ack = jetzt;
        self.verpasst = 0;
    }

    /// Prueft vor dem naechsten Schlag ob die Verbindung noch lebt
    pub fn vor_schlag(&mut self, jetzt: Instant) -> HerzschlagZustand {
        let toleranz = self.intervall + self.intervall / 2;
        if jetzt.duration_since(self.letzte_ack) > toleranz {
            self.verpasst += 1;
            warn!(verpasst = self.verpasst, "Heartbeat-Ack ueberfaellig");
        }

        if self.verpasst >= MAX_VERPASST {
            HerzschlagZustand::Tot
        } else if self.verpasst > 0 {
            HerzschlagZustand::Verspaetet(self.verpasst)
        } else {
            HerzschlagZustand::Gesund
        }
    }

    /// Erzeugt eine frische Client-Nonce
    pub fn nonce(&self) -> u64 {
        rand::random()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVALL: Duration = Duration::from_millis(5000);

    #[test]
    fn rechtzeitige_acks_bleiben_gesund() {
        let start = Instant::now();
        let mut uhr = HerzschlagUhr::neu(INTERVALL, start);

        for schlag in 1..=5u32 {
            let jetzt = start + INTERVALL * schlag;
            // Ack kurz vor dem Schlag
            uhr.ack_empfangen(jetzt - Duration::from_millis(100));
            assert_eq!(uhr.vor_schlag(jetzt), HerzschlagZustand::Gesund);
        }
    }

    #[test]
    fn ausbleibende_acks_toeten_nach_zwei_verpassern() {
        let start = Instant::now();
        let mut uhr = HerzschlagUhr::neu(INTERVALL, start);

        // Schlag 1 (5 s): 5 s seit Ack, Toleranz 7,5 s -> gesund
        assert_eq!(uhr.vor_schlag(start + INTERVALL), HerzschlagZustand::Gesund);
        // Schlag 2 (10 s): ueber der Toleranz -> erster Verpasser
        assert_eq!(
            uhr.vor_schlag(start + INTERVALL * 2),
            HerzschlagZustand::Verspaetet(1)
        );
        // Schlag 3 (15 s): zweiter Verpasser -> tot
        assert_eq!(uhr.vor_schlag(start + INTERVALL * 3), HerzschlagZustand::Tot);
    }

    #[test]
    fn ack_setzt_verpasser_zurueck() {
        let start = Instant::now();
        let mut uhr = HerzschlagUhr::neu(INTERVALL, start);

        assert_eq!(
            uhr.vor_schlag(start + INTERVALL * 2),
            HerzschlagZustand::Verspaetet(1)
        );
        uhr.ack_empfangen(start + INTERVALL * 2);
        assert_eq!(
            uhr.vor_schlag(start + INTERVALL * 3),
            HerzschlagZustand::Gesund
        );
    }

    #[test]
    fn nonces_variieren() {
        let uhr = HerzschlagUhr::neu(INTERVALL, Instant::now());
        let a = uhr.nonce();
        let b = uhr.nonce();
        let c = uhr.nonce();
        // Drei identische 64-Bit-Nonces waeren ein kaputter RNG
        assert!(a != b || b != c);
    }
}
