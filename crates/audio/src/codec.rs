//! Opus Encoder/Decoder Wrapper
//!
//! Kapselt audiopus und stellt die feste Voice-Konfiguration des Clients
//! bereit: 48 kHz, Mono, 48 kbit/s, VoIP-Profil, 20 ms-Frames. Der
//! Encoder nimmt f32-PCM, der Decoder liefert i16-PCM mit exakt 960
//! Samples pro Paket.

use audiopus::{
    coder::{Decoder, Encoder},
    Application, Bitrate, Channels, SampleRate,
};
use tracing::{debug, trace};

use crate::error::{AudioError, AudioResult};
use crate::OPUS_FRAME;

/// Ziel-Bitrate des Encoders in bit/s
pub const BITRATE_BPS: i32 = 48_000;

/// Maximale Groesse eines kodierten Opus-Pakets in Bytes
const MAX_PAKET_BYTES: usize = 1275;

// ---------------------------------------------------------------------------
// OpusEncoder
// ---------------------------------------------------------------------------

/// Opus-Encoder: kodiert 20 ms f32-PCM-Frames zu Opus-Bytes
pub struct OpusEncoder {
    encoder: Encoder,
}

impl OpusEncoder {
    /// Erstellt einen neuen Encoder mit der Voice-Konfiguration
    pub fn neu() -> AudioResult<Self> {
        let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Mono, Application::Voip)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        encoder
            .set_bitrate(Bitrate::BitsPerSecond(BITRATE_BPS))
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        debug!(bitrate = BITRATE_BPS, frame = OPUS_FRAME, "OpusEncoder erstellt");

        Ok(Self { encoder })
    }

    /// Kodiert einen PCM-Frame (f32, normalisiert -1.0..1.0) zu Opus-Bytes
    ///
    /// Die Eingabe muss exakt [`OPUS_FRAME`] Samples lang sein.
    pub fn encode(&mut self, pcm: &[f32]) -> AudioResult<Vec<u8>> {
        if pcm.len() != OPUS_FRAME {
            return Err(AudioError::Konfiguration(format!(
                "PCM-Frame muss {} Samples lang sein, war {}",
                OPUS_FRAME,
                pcm.len()
            )));
        }

        let mut ausgabe = vec![0u8; MAX_PAKET_BYTES];
        let geschrieben = self
            .encoder
            .encode_float(pcm, &mut ausgabe)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        ausgabe.truncate(geschrieben);
        Ok(ausgabe)
    }
}

// ---------------------------------------------------------------------------
// OpusDecoder
// ---------------------------------------------------------------------------

/// Opus-Decoder: dekodiert Opus-Bytes zu i16-PCM (exakt 960 Samples)
pub struct OpusDecoder {
    decoder: Decoder,
}

impl OpusDecoder {
    /// Erstellt einen neuen Decoder (48 kHz Mono)
    pub fn neu() -> AudioResult<Self> {
        let decoder = Decoder::new(SampleRate::Hz48000, Channels::Mono)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
        Ok(Self { decoder })
    }

    /// Dekodiert ein Opus-Paket zu exakt 960 Samples i16-PCM
    pub fn decode(&mut self, paket: &[u8]) -> AudioResult<Vec<i16>> {
        let mut ausgabe = vec![0i16; OPUS_FRAME];
        let dekodiert = self
            .decoder
            .decode(Some(paket), &mut ausgabe, false)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        if dekodiert != OPUS_FRAME {
            return Err(AudioError::CodecFehler(format!(
                "Paket dekodierte zu {} Samples (erwartet {})",
                dekodiert, OPUS_FRAME
            )));
        }
        Ok(ausgabe)
    }

    /// Erzeugt einen 960-Sample Ersatz-Frame fuer ein verlorenes Paket
    ///
    /// Nutzt die Packet-Loss-Concealment-Schaetzung des Decoders; faellt
    /// auf Stille zurueck wenn der Decoder keine liefern kann.
    pub fn decode_missing(&mut self) -> Vec<i16> {
        let mut ausgabe = vec![0i16; OPUS_FRAME];
        match self.decoder.decode(None::<&[u8]>, &mut ausgabe, false) {
            Ok(dekodiert) if dekodiert == OPUS_FRAME => ausgabe,
            Ok(dekodiert) => {
                trace!(dekodiert, "PLC lieferte falsche Frame-Groesse, Stille");
                vec![0i16; OPUS_FRAME]
            }
            Err(e) => {
                trace!("PLC fehlgeschlagen ({}), Stille", e);
                vec![0i16; OPUS_FRAME]
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sinus_frame() -> Vec<f32> {
        (0..OPUS_FRAME)
            .map(|i| (i as f32 * 0.05).sin() * 0.4)
            .collect()
    }

    #[test]
    fn encoder_decoder_roundtrip() {
        let mut enc = OpusEncoder::neu().unwrap();
        let mut dec = OpusDecoder::neu().unwrap();

        let kodiert = enc.encode(&sinus_frame()).expect("Encoding muss klappen");
        assert!(!kodiert.is_empty());
        // 48 kbit/s * 20 ms = 120 Bytes, plus etwas Toleranz
        assert!(kodiert.len() <= 200, "Paket zu gross: {}", kodiert.len());

        let dekodiert = dec.decode(&kodiert).expect("Decoding muss klappen");
        assert_eq!(dekodiert.len(), OPUS_FRAME);
    }

    #[test]
    fn encoder_falsche_frame_groesse() {
        let mut enc = OpusEncoder::neu().unwrap();
        assert!(enc.encode(&vec![0.0f32; 480]).is_err());
        assert!(enc.encode(&vec![0.0f32; 961]).is_err());
    }

    #[test]
    fn decode_missing_liefert_immer_960() {
        let mut dec = OpusDecoder::neu().unwrap();
        let frame = dec.decode_missing();
        assert_eq!(frame.len(), OPUS_FRAME);
    }

    #[test]
    fn decode_missing_nach_echtem_paket() {
        let mut enc = OpusEncoder::neu().unwrap();
        let mut dec = OpusDecoder::neu().unwrap();

        let kodiert = enc.encode(&sinus_frame()).unwrap();
        dec.decode(&kodiert).unwrap();

        // PLC direkt nach einem echten Paket
        let plc = dec.decode_missing();
        assert_eq!(plc.len(), OPUS_FRAME);
    }

    #[test]
    fn decoder_muell_bytes_fehler_oder_frame() {
        let mut dec = OpusDecoder::neu().unwrap();
        // Muell kann je nach Byte-Folge als TOC durchgehen; entscheidend
        // ist dass kein Panik auftritt und die Laenge stimmt falls Ok
        if let Ok(frame) = dec.decode(&[0xFF, 0xFE, 0xFD]) {
            assert_eq!(frame.len(), OPUS_FRAME);
        }
    }

    #[test]
    fn stille_kodiert_klein() {
        let mut enc = OpusEncoder::neu().unwrap();
        let kodiert = enc.encode(&vec![0.0f32; OPUS_FRAME]).unwrap();
        // Stille komprimiert deutlich unter die Nutzlast-Obergrenze
        assert!(kodiert.len() < 120);
    }
}
