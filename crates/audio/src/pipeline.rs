//! Aufnahme-Pipeline: Capture-Bloecke -> Entrauscher -> Opus-Pakete
//!
//! Reiner Daten-Transformer ohne I/O und ohne Zeitbezug. Nimmt
//! Capture-Bloecke beliebiger Laenge (typisch 1024 Samples), schleust
//! sie durch den optionalen Entrauscher (10 ms-Frames) und sammelt die
//! Ausgabe bis zur Opus-Frame-Grenze (20 ms), dann wird kodiert.
//!
//! Der Entrauscher ist zur Laufzeit zu- und abschaltbar ohne die
//! Pipeline neu zu bauen.

use tracing::trace;

use crate::codec::OpusEncoder;
use crate::denoise::Entrauscher;
use crate::error::AudioResult;
use crate::OPUS_FRAME;

/// Aufnahme-Pipeline des lokalen Mikrofons
pub struct AufnahmePipeline {
    entrauscher: Entrauscher,
    encoder: OpusEncoder,
    /// Zwischenpuffer zwischen Entrauscher und Encoder
    mitte: Vec<f32>,
}

impl AufnahmePipeline {
    /// Erstellt eine neue Pipeline
    pub fn neu(entrauscher_aktiv: bool) -> AudioResult<Self> {
        let mut entrauscher = Entrauscher::neu();
        entrauscher.set_aktiv(entrauscher_aktiv);
        Ok(Self {
            entrauscher,
            encoder: OpusEncoder::neu()?,
            mitte: Vec::with_capacity(OPUS_FRAME * 2),
        })
    }

    /// Schaltet die Entrauscher-Stufe zu oder ab
    pub fn entrauscher_setzen(&mut self, aktiv: bool) {
        self.entrauscher.set_aktiv(aktiv);
    }

    /// Gibt zurueck ob der Entrauscher aktiv ist
    pub fn entrauscher_aktiv(&self) -> bool {
        self.entrauscher.ist_aktiv()
    }

    /// Verarbeitet einen Capture-Block und liefert 0..n Opus-Pakete
    pub fn process(&mut self, block: &[f32]) -> AudioResult<Vec<Vec<u8>>> {
        self.mitte.extend(self.entrauscher.process(block));

        let mut pakete = Vec::new();
        while self.mitte.len() >= OPUS_FRAME {
            let frame: Vec<f32> = self.mitte.drain(..OPUS_FRAME).collect();
            pakete.push(self.encoder.encode(&frame)?);
        }
        if !pakete.is_empty() {
            trace!(anzahl = pakete.len(), "Opus-Pakete erzeugt");
        }
        Ok(pakete)
    }

    /// Draint beide Stufen: fuellt Reste mit Nullen auf und kodiert sie
    pub fn flush(&mut self) -> AudioResult<Vec<Vec<u8>>> {
        self.mitte.extend(self.entrauscher.flush());
        if self.mitte.is_empty() {
            return Ok(Vec::new());
        }

        let ziel = self.mitte.len().div_ceil(OPUS_FRAME) * OPUS_FRAME;
        self.mitte.resize(ziel, 0.0);

        let mut pakete = Vec::new();
        while self.mitte.len() >= OPUS_FRAME {
            let frame: Vec<f32> = self.mitte.drain(..OPUS_FRAME).collect();
            pakete.push(self.encoder.encode(&frame)?);
        }
        Ok(pakete)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
