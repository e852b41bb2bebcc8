//! Empfangs-Strom einer entfernten Quelle
//!
//! Kombiniert Jitter Buffer und Opus-Decoder zu einem Strom dekodierter
//! 20 ms-Frames. Die Wiedergabe-Schleife ruft `pop` im 20 ms-Takt; der
//! Strom entscheidet zwischen Dekodieren, PLC und Stille.

use funkraum_audio::{AudioResult, OpusDecoder, OPUS_FRAME};
use tracing::trace;

use crate::jitter::{JitterBuffer, JitterBufferConfig, JitterStatistik, PopErgebnis};

/// Empfangs-Strom: Jitter Buffer + Decoder einer SSRC
pub struct EmpfangsStrom {
    puffer: JitterBuffer,
    decoder: OpusDecoder,
    /// Decoder-Fehler auf einzelnen Frames (nie fatal)
    decoder_fehler: u64,
}

impl EmpfangsStrom {
    /// Erstellt einen neuen Strom
    pub fn neu(config: JitterBufferConfig) -> AudioResult<Self> {
        Ok(Self {
            puffer: JitterBuffer::neu(config),
            decoder: OpusDecoder::neu()?,
            decoder_fehler: 0,
        })
    }

    /// Reicht ein empfangenes Paket in den Jitter Buffer
    pub fn push(&mut self, sequence: u16, timestamp: u32, payload: Vec<u8>) {
        self.puffer.push(sequence, timestamp, payload);
    }

    /// Liefert den naechsten 20 ms-Frame, falls faellig
    ///
    /// Dekodier-Fehler auf einem einzelnen Paket werden gezaehlt und
    /// durch einen PLC-Frame ersetzt; sie beruehren den Strom nicht.
    pub fn pop(&mut self) -> Option<Vec<i16>> {
        match self.puffer.pop()? {
            PopErgebnis::Paket(paket) => match self.decoder.decode(&paket.payload) {
                Ok(pcm) => Some(pcm),
                Err(e) => {
                    self.decoder_fehler += 1;
                    trace!(sequence = paket.sequence, "Decoder-Fehler: {}", e);
                    Some(self.decoder.decode_missing())
                }
            },
            PopErgebnis::Verloren => Some(self.decoder.decode_missing()),
            PopErgebnis::Stille => Some(vec![0i16; OPUS_FRAME]),
        }
    }

    /// Setzt den Jitter Buffer zurueck (Decoder-Zustand bleibt)
    pub fn reset(&mut self) {
        self.puffer.reset();
    }

    /// Statistiken des unterliegenden Jitter Buffers
    pub fn statistik(&self) -> &JitterStatistik {
        self.puffer.statistik()
    }

    /// Anzahl der Decoder-Fehler auf einzelnen Frames
    pub fn decoder_fehler(&self) -> u64 {
        self.decoder_fehler
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use funkraum_audio::OpusEncoder;

    fn sofort_config() -> JitterBufferConfig {
        JitterBufferConfig {
            min_puffer_ms: 0,
            max_puffer_ms: 200,
            max_plc_frames: 5,
        }
    }

    fn opus_frame(encoder: &mut OpusEncoder) -> Vec<u8> {
        let pcm: Vec<f32> = (0..OPUS_FRAME)
            .map(|i| (i as f32 * 0.04).sin() * 0.3)
            .collect();
        encoder.encode(&pcm).expect("Encoding muss klappen")
    }

    #[test]
    fn dekodiert_in_reihenfolge() {
        let mut encoder = OpusEncoder::neu().unwrap();
        let mut strom = EmpfangsStrom::neu(sofort_config()).unwrap();

        for seq in 0..4u16 {
            strom.push(seq, u32::from(seq) * 960, opus_frame(&mut encoder));
        }

        for _ in 0..4 {
            let frame = strom.pop().expect("Frame erwartet");
            assert_eq!(frame.len(), OPUS_FRAME);
        }
        assert!(strom.pop().is_none());
    }

    #[test]
    fn luecke_liefert_plc_frame() {
        let mut encoder = OpusEncoder::neu().unwrap();
        let mut strom = EmpfangsStrom::neu(sofort_config()).unwrap();

        strom.push(0, 0, opus_frame(&mut encoder));
        strom.push(2, 1920, opus_frame(&mut encoder));

        assert_eq!(strom.pop().unwrap().len(), OPUS_FRAME);
        // Sequenz 1 fehlt: PLC-Frame mit voller Laenge
        assert_eq!(strom.pop().unwrap().len(), OPUS_FRAME);
        assert_eq!(strom.statistik().plc_frames, 1);
        assert_eq!(strom.pop().unwrap().len(), OPUS_FRAME);
    }

    #[test]
    fn kaputtes_paket_zaehlt_decoder_fehler() {
        let mut strom = EmpfangsStrom::neu(sofort_config()).unwrap();
        // Leeres Payload ist kein gueltiges Opus-Paket
        strom.push(0, 0, Vec::new());
        let frame = strom.pop().expect("Ersatz-Frame erwartet");
        assert_eq!(frame.len(), OPUS_FRAME);
        assert_eq!(strom.decoder_fehler(), 1);
    }

    #[test]
    fn stille_nach_langer_luecke() {
        let mut encoder = OpusEncoder::neu().unwrap();
        let mut strom = EmpfangsStrom::neu(sofort_config()).unwrap();

        strom.push(0, 0, opus_frame(&mut encoder));
        strom.pop();
        strom.push(30, 30 * 960, opus_frame(&mut encoder));

        // 5 PLC, danach Stille (alle Frames voll lang)
        for _ in 0..8 {
            assert_eq!(strom.pop().unwrap().len(), OPUS_FRAME);
        }
        assert!(strom.statistik().stille_frames > 0);
    }
}
