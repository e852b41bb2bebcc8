//! Rauschunterdrueckung auf 10 ms-Frames
//!
//! Spektrale Subtraktion als Band-Energie-Naeherung im Zeitbereich: der
//! Rauschpegel wird waehrend Stille per exponentieller Glaettung
//! geschaetzt und als Gain-Reduktion vom Signal abgezogen. Zustand
//! bleibt ueber Frames erhalten.
//!
//! Der Entrauscher sammelt Eingabe intern auf [`ENTRAUSCHER_FRAME`]
//! Samples; unterhalb eines vollen Frames liefert `process` nichts.
//! `flush` fuellt den Rest mit Nullen auf und draint.

use crate::ENTRAUSCHER_FRAME;

/// Subtraktions-Faktor (alpha)
const ALPHA: f32 = 2.5;

/// Minimaler Gain nach Subtraktion (verhindert musical noise)
const SPECTRAL_FLOOR: f32 = 0.1;

/// Glaettungsfaktor der Rauschschaetzung
const RAUSCH_GLAETTUNG: f32 = 0.95;

/// RMS-Schwelle unterhalb derer ein Frame als Rauschen gilt
const STILLE_SCHWELLE: f32 = 0.02;

/// Stateful Entrauscher fuer mono 48 kHz f32-Samples
pub struct Entrauscher {
    /// Angesammelte Eingabe (unter einem vollen Frame)
    eingang: Vec<f32>,
    /// Geschaetzter Rauschpegel (RMS)
    rausch_schaetzung: f32,
    aktiv: bool,
}

impl Entrauscher {
    /// Erstellt einen neuen, aktiven Entrauscher
    pub fn neu() -> Self {
        Self {
            eingang: Vec::with_capacity(ENTRAUSCHER_FRAME * 2),
            rausch_schaetzung: 0.0,
            aktiv: true,
        }
    }

    /// Aktiviert oder deaktiviert die Unterdrueckung
    ///
    /// Deaktiviert reicht `process` die Samples unveraendert durch.
    pub fn set_aktiv(&mut self, aktiv: bool) {
        self.aktiv = aktiv;
    }

    /// Gibt zurueck ob die Unterdrueckung aktiv ist
    pub fn ist_aktiv(&self) -> bool {
        self.aktiv
    }

    /// Gibt die aktuelle Rauschschaetzung zurueck
    pub fn rausch_schaetzung(&self) -> f32 {
        self.rausch_schaetzung
    }

    /// Verarbeitet einen Block beliebiger Laenge
    ///
    /// Liefert alle vollstaendig entrauschten 480-Sample-Frames; der
    /// Rest bleibt intern liegen. Bei deaktivierter Unterdrueckung wird
    /// die Eingabe unveraendert durchgereicht.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        if !self.aktiv {
            return samples.to_vec();
        }

        self.eingang.extend_from_slice(samples);

        let ganze_frames = self.eingang.len() / ENTRAUSCHER_FRAME;
        if ganze_frames == 0 {
            return Vec::new();
        }

        let mut ausgabe: Vec<f32> = self
            .eingang
            .drain(..ganze_frames * ENTRAUSCHER_FRAME)
            .collect();
        for frame in ausgabe.chunks_mut(ENTRAUSCHER_FRAME) {
            self.frame_entrauschen(frame);
        }
        ausgabe
    }

    /// Fuellt den internen Rest mit Nullen auf und draint ihn
    pub fn flush(&mut self) -> Vec<f32> {
        if self.eingang.is_empty() {
            return Vec::new();
        }
        self.eingang.resize(ENTRAUSCHER_FRAME, 0.0);
        let mut rest: Vec<f32> = self.eingang.drain(..).collect();
        if self.aktiv {
            self.frame_entrauschen(&mut rest);
        }
        rest
    }

    /// Setzt Rauschschaetzung und Eingabe-Puffer zurueck
    pub fn reset(&mut self) {
        self.eingang.clear();
        self.rausch_schaetzung = 0.0;
    }

    // -----------------------------------------------------------------------
    // Interne DSP-Schritte
    // -----------------------------------------------------------------------

    fn frame_entrauschen(&mut self, frame: &mut [f32]) {
        let frame_rms = rms(frame);

        // Rauschschaetzung nur aktualisieren wenn das Signal leise ist
        if frame_rms < STILLE_SCHWELLE {
            self.rausch_schaetzung = RAUSCH_GLAETTUNG * self.rausch_schaetzung
                + (1.0 - RAUSCH_GLAETTUNG) * frame_rms;
        }

        if self.rausch_schaetzung < 1e-7 {
            return;
        }

        // Gain = max(floor, 1 - alpha * (rauschen / signal))
        let gain = if frame_rms > 1e-7 {
            (1.0 - ALPHA * (self.rausch_schaetzung / frame_rms)).max(SPECTRAL_FLOOR)
        } else {
            SPECTRAL_FLOOR
        };

        for sample in frame.iter_mut() {
            *sample *= gain;
        }
    }
}

impl Default for Entrauscher {
    fn default() -> Self {
        Self::neu()
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let quadratsumme: f32 = samples.iter().map(|s| s * s).sum();
    (quadratsumme / samples.len() as f32).sqrt()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unter_einem_frame_keine_ausgabe() {
        let mut ent = Entrauscher::neu();
        assert!(ent.process(&vec![0.1f32; 100]).is_empty());
        assert!(ent.process(&vec![0.1f32; 300]).is_empty());
        // 100 + 300 + 100 = 500 >= 480 -> ein Frame
        let ausgabe = ent.process(&vec![0.1f32; 100]);
        assert_eq!(ausgabe.len(), ENTRAUSCHER_FRAME);
    }

    #[test]
    fn grosse_bloecke_mehrere_frames() {
        let mut ent = Entrauscher::neu();
        let ausgabe = ent.process(&vec![0.1f32; 1024]);
        // 1024 / 480 = 2 ganze Frames, 64 Rest
        assert_eq!(ausgabe.len(), 2 * ENTRAUSCHER_FRAME);
        let flush = ent.flush();
        assert_eq!(flush.len(), ENTRAUSCHER_FRAME);
    }

    #[test]
    fn flush_leer_ohne_rest() {
        let mut ent = Entrauscher::neu();
        ent.process(&vec![0.1f32; ENTRAUSCHER_FRAME]);
        assert!(ent.flush().is_empty());
    }

    #[test]
    fn deaktiviert_unveraendert_durchgereicht() {
        let mut ent = Entrauscher::neu();
        ent.set_aktiv(false);
        let eingabe = vec![0.25f32; 333];
        let ausgabe = ent.process(&eingabe);
        assert_eq!(ausgabe, eingabe);
    }

    #[test]
    fn daempft_rauschen_nach_lernphase() {
        let mut ent = Entrauscher::neu();
        // Rauschpegel lernen lassen
        for _ in 0..20 {
            ent.process(&vec![0.005f32; ENTRAUSCHER_FRAME]);
        }
        let ausgabe = ent.process(&vec![0.005f32; ENTRAUSCHER_FRAME]);
        let rms_nach = rms(&ausgabe);
        assert!(
            rms_nach < 0.005,
            "Rauschen sollte reduziert sein, RMS={}",
            rms_nach
        );
    }

    #[test]
    fn lautes_signal_kaum_gedaempft() {
        let mut ent = Entrauscher::neu();
        for _ in 0..20 {
            ent.process(&vec![0.005f32; ENTRAUSCHER_FRAME]);
        }
        let signal: Vec<f32> = (0..ENTRAUSCHER_FRAME)
            .map(|i| (i as f32 * 0.1).sin() * 0.5)
            .collect();
        let ausgabe = ent.process(&signal);
        let verhaeltnis = rms(&ausgabe) / rms(&signal);
        assert!(
            verhaeltnis > 0.8,
            "Sprachsignal zu stark gedaempft: {}",
            verhaeltnis
        );
    }

    #[test]
    fn reset_loescht_zustand() {
        let mut ent = Entrauscher::neu();
        ent.process(&vec![0.005f32; ENTRAUSCHER_FRAME * 4]);
        ent.process(&vec![0.1f32; 100]);
        ent.reset();
        assert_eq!(ent.rausch_schaetzung(), 0.0);
        assert!(ent.flush().is_empty());
    }

    #[test]
    fn werte_bleiben_im_bereich() {
        let mut ent = Entrauscher::neu();
        let laut = vec![1.0f32; ENTRAUSCHER_FRAME * 2];
        for sample in ent.process(&laut) {
            assert!((-1.0..=1.0).contains(&sample));
        }
    }
}
