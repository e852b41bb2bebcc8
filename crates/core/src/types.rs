//! Gemeinsame Identifikationstypen fuer Funkraum
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen. User- und
//! Raum-IDs sind opake Strings – sie werden von der Kontrollebene
//! vergeben und hier nie interpretiert.

use serde::{Deserialize, Serialize};

/// Eindeutige Benutzer-ID (opak, von der Kontrollebene vergeben)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Erstellt eine UserId aus einem beliebigen String
    pub fn neu(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Gibt die innere String-Darstellung zurueck
    pub fn inner(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

/// Eindeutige Raum-ID des Voice-Raums
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    /// Erstellt eine RoomId aus einem beliebigen String
    pub fn neu(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Gibt die innere String-Darstellung zurueck
    pub fn inner(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "room:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Speaking-Flags
// ---------------------------------------------------------------------------

/// Bitset des Speaking-Zustands eines Teilnehmers
///
/// Wird im Speaking-Opcode uebertragen und pro Teilnehmer gehalten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SprechFlags(pub u8);

impl SprechFlags {
    /// Mikrofon aktiv
    pub const MIKROFON: u8 = 0x01;
    /// Soundshare aktiv (reserviert)
    pub const SOUNDSHARE: u8 = 0x02;
    /// Prioritaets-Sprecher (reserviert)
    pub const PRIORITAET: u8 = 0x04;

    /// Keine Flags gesetzt
    pub fn leer() -> Self {
        Self(0)
    }

    /// Nur das Mikrofon-Flag gesetzt
    pub fn mikrofon() -> Self {
        Self(Self::MIKROFON)
    }

    /// Prueft ob ein bestimmtes Flag gesetzt ist
    pub fn hat(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    /// Prueft ob irgendein Flag gesetzt ist
    pub fn spricht(&self) -> bool {
        self.0 != 0
    }
}
