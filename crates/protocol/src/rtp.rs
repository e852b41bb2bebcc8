//! RTP-Framing fuer Media-Pakete
//!
//! Jedes Binaer-Frame auf dem Signaling-Kanal traegt ein RTP-Paket:
//! 12 Byte Header im Klartext, gefolgt vom authentifizierten
//! Ciphertext des Opus-Payloads.
//!
//! ## Header-Format (12 Bytes, kein serde)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   Version/Flags (fest 0x80)
//!  1       1   Payload-Typ (fest 0x78)
//!  2       2   Sequenznummer (big-endian, wrap mod 2^16)
//!  4       4   Zeitstempel (big-endian, 48 kHz-Ticks, wrap mod 2^32)
//!  8       4   SSRC – Synchronisation Source (big-endian)
//! ```

use crate::error::ProtokollFehler;

/// Fester Wert des Version/Flags-Bytes (RTP Version 2)
pub const RTP_VERSION: u8 = 0x80;

/// Fester Wert des Payload-Typ-Bytes (dynamischer Typ fuer Opus)
pub const RTP_PAYLOAD_TYP: u8 = 0x78;

/// Ticks pro Opus-Frame (20 ms bei 48 kHz)
pub const TICKS_PRO_FRAME: u32 = 960;

// ---------------------------------------------------------------------------
// RtpHeader
// ---------------------------------------------------------------------------

/// 12-Byte Header eines Media-Pakets
///
/// Direkte Byte-Serialisierung, kein serde (Hot Path). Der Header wird
/// im Klartext uebertragen und dient gleichzeitig als Nonce-Praefix der
/// Payload-Verschluesselung – jede Manipulation laesst `oeffnen`
/// fehlschlagen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Monoton steigende Sequenznummer (fuer den Jitter-Buffer)
    pub sequence: u16,
    /// Zeitstempel in 48 kHz-Ticks (+960 pro Frame)
    pub timestamp: u32,
    /// Synchronisation Source – eindeutige Senderkennung
    pub ssrc: u32,
}

impl RtpHeader {
    /// Header-Groesse in Bytes
    pub const SIZE: usize = 12;

    /// Erstellt einen neuen Header
    pub fn neu(sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// Serialisiert den Header in ein 12-Byte-Array (big-endian)
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = RTP_VERSION;
        buf[1] = RTP_PAYLOAD_TYP;
        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        buf
    }

    /// Deserialisiert einen Header aus einem Byte-Slice
    ///
    /// # Fehler
    /// - `HeaderZuKurz` wenn das Slice kuerzer als 12 Bytes ist
    /// - `HeaderUngueltig` bei falschem Version- oder Payload-Typ-Byte
    pub fn decode(buf: &[u8]) -> Result<Self, ProtokollFehler> {
        if buf.len() < Self::SIZE {
            return Err(ProtokollFehler::HeaderZuKurz {
                laenge: buf.len(),
                erwartet: Self::SIZE,
            });
        }

        if buf[0] != RTP_VERSION {
            return Err(ProtokollFehler::HeaderUngueltig(format!(
                "Version-Byte 0x{:02X} (erwartet 0x{:02X})",
                buf[0], RTP_VERSION
            )));
        }
        if buf[1] != RTP_PAYLOAD_TYP {
            return Err(ProtokollFehler::HeaderUngueltig(format!(
                "Payload-Typ 0x{:02X} (erwartet 0x{:02X})",
                buf[1], RTP_PAYLOAD_TYP
            )));
        }

        Ok(Self {
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

// ---------------------------------------------------------------------------
// Sequenz-Arithmetik
// ---------------------------------------------------------------------------

/// Wrap-bewusste Differenz zweier Sequenznummern
///
/// `diff(a, b) = ((a - b + 32768) mod 65536) - 32768`; positiv wenn `a`
/// nach `b` kommt, negativ wenn `a` aelter ist.
pub fn seq_diff(a: u16, b: u16) -> i32 {
    a.wrapping_sub(b) as i16 as i32
}

/// Zaehler fuer ausgehende Pakete
///
/// Sequenz steigt um 1 pro Paket (mod 2^16), Zeitstempel um 960 Ticks
/// (mod 2^32, ein Opus-Frame bei 48 kHz).
#[derive(Debug, Default)]
pub struct AusgangsZaehler {
    sequence: u16,
    timestamp: u32,
}

impl AusgangsZaehler {
    /// Erstellt einen Zaehler bei Sequenz 0 / Zeitstempel 0
    pub fn neu() -> Self {
        Self::default()
    }

    /// Gibt den Header des naechsten Pakets zurueck und rueckt vor
    pub fn naechster(&mut self, ssrc: u32) -> RtpHeader {
        let header = RtpHeader::neu(self.sequence, self.timestamp, ssrc);
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(TICKS_PRO_FRAME);
        header
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
