//! Symmetrische Paket-Verschluesselung (XSalsa20-Poly1305)
//!
//! Der SFU verteilt in SessionDescribe einen 32-Byte Sitzungsschluessel.
//! Jeder Payload wird mit diesem Schluessel versiegelt; die 24-Byte Nonce
//! besteht aus dem 12-Byte RTP-Header gefolgt von 12 Null-Bytes. Damit
//! sind Sequenz, Zeitstempel und SSRC implizit authentifiziert: jede
//! Manipulation am Klartext-Header kippt die Nonce und `oeffnen` liefert
//! `AuthFehler`.
//!
//! Auth-Fehler sind nie fatal fuer die Session – der Aufrufer zaehlt und
//! verwirft das Paket.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use crypto_secretbox::{
    aead::{Aead, KeyInit},
    Key, Nonce, XSalsa20Poly1305,
};

use crate::error::ProtokollFehler;
use crate::rtp::RtpHeader;

/// Laenge des Sitzungsschluessels in Bytes
pub const SCHLUESSEL_LAENGE: usize = 32;

/// Laenge der Nonce in Bytes (Header + Null-Padding)
pub const NONCE_LAENGE: usize = 24;

/// Einziger derzeit unterstuetzter Verschluesselungsmodus
pub const MODUS_XSALSA20_POLY1305: &str = "xsalsa20_poly1305";

// ---------------------------------------------------------------------------
// SessionSchluessel
// ---------------------------------------------------------------------------

/// Sitzungsschluessel aus SessionDescribe
///
/// Lebensdauer: erstellt bei SessionDescribe, ersetzt bei jedem weiteren
/// SessionDescribe (auch nach Reconnect), zerstoert beim Teardown.
/// Solange kein Schluessel vorliegt duerfen keine Pakete gesendet werden.
#[derive(Clone)]
pub struct SessionSchluessel {
    schluessel: [u8; SCHLUESSEL_LAENGE],
    modus: String,
}

impl SessionSchluessel {
    /// Erstellt einen Schluessel aus rohen Bytes
    ///
    /// # Fehler
    /// - `UnbekannterModus` wenn der Modus nicht unterstuetzt wird
    pub fn neu(schluessel: [u8; SCHLUESSEL_LAENGE], modus: &str) -> Result<Self, ProtokollFehler> {
        if modus != MODUS_XSALSA20_POLY1305 {
            return Err(ProtokollFehler::UnbekannterModus(modus.to_string()));
        }
        Ok(Self {
            schluessel,
            modus: modus.to_string(),
        })
    }

    /// Dekodiert den base64-kodierten Schluessel aus SessionDescribe
    pub fn aus_base64(b64: &str, modus: &str) -> Result<Self, ProtokollFehler> {
        let bytes = BASE64.decode(b64)?;
        if bytes.len() != SCHLUESSEL_LAENGE {
            return Err(ProtokollFehler::SchluesselLaenge {
                erwartet: SCHLUESSEL_LAENGE,
                erhalten: bytes.len(),
            });
        }
        let mut schluessel = [0u8; SCHLUESSEL_LAENGE];
        schluessel.copy_from_slice(&bytes);
        Self::neu(schluessel, modus)
    }

    /// Gibt den Modus-Bezeichner zurueck
    pub fn modus(&self) -> &str {
        &self.modus
    }
}

impl std::fmt::Debug for SessionSchluessel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Schluessel-Material nie in Logs
        f.debug_struct("SessionSchluessel")
            .field("modus", &self.modus)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Versiegeln / Oeffnen
// ---------------------------------------------------------------------------

/// Leitet die 24-Byte Nonce aus den Klartext-Header-Bytes ab
fn nonce_aus_header(kopf: &[u8; RtpHeader::SIZE]) -> [u8; NONCE_LAENGE] {
    let mut nonce = [0u8; NONCE_LAENGE];
    nonce[..RtpHeader::SIZE].copy_from_slice(kopf);
    nonce
}

/// Versiegelt einen Opus-Payload zu einem vollstaendigen Wire-Paket
///
/// Ergebnis: `[header(12)] [ciphertext + auth_tag(16)]`
pub fn versiegeln(
    header: &RtpHeader,
    klartext: &[u8],
    schluessel: &SessionSchluessel,
) -> Result<Vec<u8>, ProtokollFehler> {
    let kopf = header.encode();
    let nonce = nonce_aus_header(&kopf);

    let cipher = XSalsa20Poly1305::new(Key::from_slice(&schluessel.schluessel));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), klartext)
        .map_err(|_| ProtokollFehler::Verschluesselung)?;

    let mut draht = Vec::with_capacity(RtpHeader::SIZE + ciphertext.len());
    draht.extend_from_slice(&kopf);
    draht.extend_from_slice(&ciphertext);
    Ok(draht)
}

/// Oeffnet ein empfangenes Wire-Paket
///
/// # Fehler
/// - Header-Fehler wenn die ersten 12 Bytes kein gueltiger RTP-Header sind
/// - `AuthFehler` wenn Payload oder Header manipuliert wurden
pub fn oeffnen(
    draht: &[u8],
    schluessel: &SessionSchluessel,
) -> Result<(RtpHeader, Vec<u8>), ProtokollFehler> {
    let header = RtpHeader::decode(draht)?;

    let mut kopf = [0u8; RtpHeader::SIZE];
    kopf.copy_from_slice(&draht[..RtpHeader::SIZE]);
    let nonce = nonce_aus_header(&kopf);

    let cipher = XSalsa20Poly1305::new(Key::from_slice(&schluessel.schluessel));
    let klartext = cipher
        .decrypt(Nonce::from_slice(&nonce), &draht[RtpHeader::SIZE..])
        .map_err(|_| ProtokollFehler::AuthFehler)?;

    Ok((header, klartext))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
