//! Teilnehmer-Verwaltung des Voice-Raums
//!
//! Teilnehmer entstehen ausschliesslich durch UserJoin vom SFU und
//! verschwinden durch UserLeave oder Session-Teardown. Die Liste wird
//! doppelt indiziert: nach `user_id` und nach SSRC. Invariante: jede
//! SSRC im Index gehoert zu genau einem Teilnehmer.

use std::collections::HashMap;

use funkraum_core::types::{SprechFlags, UserId};
use tracing::debug;

/// Ein entfernter Teilnehmer im Raum
#[derive(Debug, Clone)]
pub struct Teilnehmer {
    pub user_id: UserId,
    pub ssrc: u32,
    pub flags: SprechFlags,
}

/// Doppelt indizierte Teilnehmer-Liste
#[derive(Debug, Default)]
pub struct TeilnehmerListe {
    nach_user: HashMap<UserId, Teilnehmer>,
    nach_ssrc: HashMap<u32, UserId>,
}

impl TeilnehmerListe {
    /// Erstellt eine leere Liste
    pub fn neu() -> Self {
        Self::default()
    }

    /// Registriert einen Teilnehmer aus einem UserJoin
    ///
    /// Ein erneutes Join desselben Benutzers (z.B. nach dessen
    /// Reconnect) ersetzt den alten Eintrag samt SSRC-Zuordnung.
    pub fn beitreten(&mut self, user_id: UserId, ssrc: u32) {
        if let Some(alter) = self.nach_user.remove(&user_id) {
            self.nach_ssrc.remove(&alter.ssrc);
            debug!(%user_id, alte_ssrc = alter.ssrc, "Teilnehmer erneut beigetreten");
        }
        // Eine wiederverwendete SSRC darf nie auf zwei Benutzer zeigen
        if let Some(vorheriger) = self.nach_ssrc.remove(&ssrc) {
            self.nach_user.remove(&vorheriger);
        }

        self.nach_ssrc.insert(ssrc, user_id.clone());
        self.nach_user.insert(
            user_id.clone(),
            Teilnehmer {
                user_id,
                ssrc,
                flags: SprechFlags::leer(),
            },
        );
    }

    /// Entfernt einen Teilnehmer; gibt den Eintrag zurueck
    pub fn verlassen(&mut self, user_id: &UserId) -> Option<Teilnehmer> {
        let teilnehmer = self.nach_user.remove(user_id)?;
        self.nach_ssrc.remove(&teilnehmer.ssrc);
        Some(teilnehmer)
    }

    /// Aktualisiert die Speaking-Flags eines Teilnehmers
    pub fn flags_setzen(&mut self, user_id: &UserId, flags: SprechFlags) -> bool {
        match self.nach_user.get_mut(user_id) {
            Some(teilnehmer) => {
                teilnehmer.flags = flags;
                true
            }
            None => false,
        }
    }

    /// Prueft ob eine SSRC zu einem bekannten Teilnehmer gehoert
    pub fn ssrc_bekannt(&self, ssrc: u32) -> bool {
        self.nach_ssrc.contains_key(&ssrc)
    }

    /// Liefert den Teilnehmer zu einer SSRC
    pub fn fuer_ssrc(&self, ssrc: u32) -> Option<&Teilnehmer> {
        self.nach_ssrc
            .get(&ssrc)
            .and_then(|user_id| self.nach_user.get(user_id))
    }

    /// Anzahl der Teilnehmer
    pub fn anzahl(&self) -> usize {
        self.nach_user.len()
    }

    /// Leert die Liste; gibt die freigewordenen SSRCs zurueck
    pub fn leeren(&mut self) -> Vec<u32> {
        let ssrcs: Vec<u32> = self.nach_ssrc.keys().copied().collect();
        self.nach_user.clear();
        self.nach_ssrc.clear();
        ssrcs
    }
}
