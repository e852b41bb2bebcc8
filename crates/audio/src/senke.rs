//! Audio-Ausgabe: Mischpult und cpal-Senke
//!
//! Die Session liefert pro SSRC dekodierte 20 ms-Frames (i16) an eine
//! [`AudioSenke`]. Das [`Mischpult`] haelt pro SSRC eine Warteschlange
//! und eine Verstaerkung und summiert alle Quellen mit Saettigung in
//! den Ausgabe-Puffer. [`CpalSenke`] haelt den cpal-OutputStream in
//! einem dedizierten Thread (cpal::Stream ist !Send) und mischt direkt
//! im Ausgabe-Callback.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::{AudioError, AudioResult};
use crate::SAMPLE_RATE;

/// Obergrenze pro Quellen-Warteschlange (1 s Audio); darueber wird das
/// aelteste Material verworfen
const MAX_WARTESCHLANGE: usize = SAMPLE_RATE as usize;

/// Abstrakte Senke fuer dekodierte Teilnehmer-Frames
pub trait AudioSenke: Send {
    /// Spielt einen 20 ms-Frame (960 Samples i16) eines Teilnehmers ab
    fn abspielen(&mut self, ssrc: u32, pcm: &[i16]);

    /// Gibt die Ressourcen einer Quelle frei (Teilnehmer gegangen)
    fn quelle_entfernen(&mut self, ssrc: u32);
}

// ---------------------------------------------------------------------------
// Mischpult
// ---------------------------------------------------------------------------

struct Quelle {
    warteschlange: VecDeque<f32>,
    verstaerkung: f32,
}

impl Quelle {
    fn neu() -> Self {
        Self {
            warteschlange: VecDeque::new(),
            verstaerkung: 1.0,
        }
    }
}

/// Mischt die Frame-Stroeme aller Teilnehmer mit per-SSRC Verstaerkung
pub struct Mischpult {
    quellen: HashMap<u32, Quelle>,
}

impl Mischpult {
    /// Erstellt ein leeres Mischpult
    pub fn neu() -> Self {
        Self {
            quellen: HashMap::new(),
        }
    }

    /// Speist einen dekodierten Frame einer Quelle ein
    pub fn einspeisen(&mut self, ssrc: u32, pcm: &[i16]) {
        let quelle = self.quellen.entry(ssrc).or_insert_with(Quelle::neu);
        quelle
            .warteschlange
            .extend(pcm.iter().map(|&s| s as f32 / 32768.0));

        // Eine abgehaengte Quelle darf nicht unbegrenzt anwachsen
        while quelle.warteschlange.len() > MAX_WARTESCHLANGE {
            quelle.warteschlange.pop_front();
        }
    }

    /// Setzt die Verstaerkung einer Quelle (0.0 bis 2.0)
    pub fn lautstaerke_setzen(&mut self, ssrc: u32, faktor: f32) {
        let quelle = self.quellen.entry(ssrc).or_insert_with(Quelle::neu);
        quelle.verstaerkung = faktor.clamp(0.0, 2.0);
    }

    /// Entfernt eine Quelle samt Warteschlange
    pub fn entfernen(&mut self, ssrc: u32) {
        self.quellen.remove(&ssrc);
    }

    /// Anzahl der bekannten Quellen
    pub fn anzahl_quellen(&self) -> usize {
        self.quellen.len()
    }

    /// Summiert alle Quellen in `ziel` (Saettigung auf [-1, 1])
    ///
    /// Fehlt einer Quelle Material, traegt sie Stille bei. Gibt zurueck
    /// ob mindestens ein Sample aus einer Warteschlange kam.
    pub fn mischen(&mut self, ziel: &mut [f32]) -> bool {
        ziel.fill(0.0);
        let mut beigetragen = false;

        for quelle in self.quellen.values_mut() {
            let gain = quelle.verstaerkung;
            for slot in ziel.iter_mut() {
                match quelle.warteschlange.pop_front() {
                    Some(sample) => {
                        *slot = (*slot + sample * gain).clamp(-1.0, 1.0);
                        beigetragen = true;
                    }
                    None => break,
                }
            }
        }

        beigetragen
    }
}

impl Default for Mischpult {
    fn default() -> Self {
        Self::neu()
    }
}

impl AudioSenke for Mischpult {
    fn abspielen(&mut self, ssrc: u32, pcm: &[i16]) {
        self.einspeisen(ssrc, pcm);
    }

    fn quelle_entfernen(&mut self, ssrc: u32) {
        self.entfernen(ssrc);
    }
}

// ---------------------------------------------------------------------------
// CpalSenke
// ---------------------------------------------------------------------------

/// Geraete-Senke: Mischpult -> cpal-OutputStream
pub struct CpalSenke {
    mischpult: Arc<Mutex<Mischpult>>,
    laeuft: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CpalSenke {
    /// Oeffnet das Standard-Ausgabegeraet und startet den Ausgabe-Thread
    pub fn starten() -> AudioResult<Self> {
        let mischpult = Arc::new(Mutex::new(Mischpult::neu()));
        let laeuft = Arc::new(AtomicBool::new(true));
        let (bereit_tx, bereit_rx) = std::sync::mpsc::sync_channel::<AudioResult<()>>(1);

        let thread_mischpult = Arc::clone(&mischpult);
        let thread_laeuft = Arc::clone(&laeuft);
        let thread = std::thread::Builder::new()
            .name("funk-playback".to_string())
            .spawn(move || {
                ausgabe_thread(thread_mischpult, thread_laeuft, bereit_tx);
            })
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

        match bereit_rx.recv() {
            Ok(Ok(())) => {
                debug!("Playback gestartet");
                Ok(Self {
                    mischpult,
                    laeuft,
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::StreamFehler(
                    "Playback-Thread ohne Rueckmeldung beendet".to_string(),
                ))
            }
        }
    }

    /// Setzt die Wiedergabe-Lautstaerke eines Teilnehmers
    pub fn lautstaerke_setzen(&self, ssrc: u32, faktor: f32) {
        self.mischpult.lock().lautstaerke_setzen(ssrc, faktor);
    }
}

impl AudioSenke for CpalSenke {
    fn abspielen(&mut self, ssrc: u32, pcm: &[i16]) {
        self.mischpult.lock().einspeisen(ssrc, pcm);
    }

    fn quelle_entfernen(&mut self, ssrc: u32) {
        self.mischpult.lock().entfernen(ssrc);
    }
}

impl Drop for CpalSenke {
    fn drop(&mut self) {
        self.laeuft.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Haelt den OutputStream am Leben; der Callback mischt direkt
fn ausgabe_thread(
    mischpult: Arc<Mutex<Mischpult>>,
    laeuft: Arc<AtomicBool>,
    bereit_tx: std::sync::mpsc::SyncSender<AudioResult<()>>,
) {
    let stream = match ausgabe_stream_oeffnen(mischpult) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = bereit_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = bereit_tx.send(Err(AudioError::StreamFehler(e.to_string())));
        return;
    }
    let _ = bereit_tx.send(Ok(()));

    while laeuft.load(Ordering::Relaxed) {
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    debug!("Playback-Thread beendet, cpal-Stream wird gedroppt");
}

fn ausgabe_stream_oeffnen(mischpult: Arc<Mutex<Mischpult>>) -> AudioResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::KeinStandardAusgabegeraet)?;

    let stream_config = StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let sample_format = device
        .supported_output_configs()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        .find(|c| {
            c.min_sample_rate().0 <= SAMPLE_RATE
                && c.max_sample_rate().0 >= SAMPLE_RATE
                && c.channels() >= 1
        })
        .map(|c| c.sample_format())
        .unwrap_or(SampleFormat::F32);

    let err_fn = |err| error!("Playback-Fehler: {}", err);

    let stream = match sample_format {
        SampleFormat::F32 => device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _| {
                    mischpult.lock().mischen(data);
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
        SampleFormat::I16 => device
            .build_output_stream(
                &stream_config,
                move |data: &mut [i16], _| {
                    let mut float_buf = vec![0.0f32; data.len()];
                    mischpult.lock().mischen(&mut float_buf);
                    for (ziel, quelle) in data.iter_mut().zip(float_buf.iter()) {
                        *ziel = (quelle * i16::MAX as f32)
                            .clamp(i16::MIN as f32, i16::MAX as f32)
                            as i16;
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
        andere => {
            return Err(AudioError::StreamFehler(format!(
                "Nicht unterstuetztes Sample-Format: {:?}",
                andere
            )))
        }
    };

    Ok(stream)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mischpult_einzelne_quelle() {
        let mut pult = Mischpult::neu();
        pult.einspeisen(111, &[16384i16; 960]);

        let mut ziel = vec![0.0f32; 960];
        assert!(pult.mischen(&mut ziel));
        // 16384 / 32768 = 0.5
        assert!((ziel[0] - 0.5).abs() < 0.001);
    }

    #[test]
    fn mischpult_zwei_quellen_summiert() {
        let mut pult = Mischpult::neu();
        pult.einspeisen(111, &[8192i16; 960]);
        pult.einspeisen(222, &[8192i16; 960]);

        let mut ziel = vec![0.0f32; 960];
        pult.mischen(&mut ziel);
        // 0.25 + 0.25 = 0.5
        assert!((ziel[0] - 0.5).abs() < 0.001);
    }

    #[test]
    fn mischpult_saettigung() {
        let mut pult = Mischpult::neu();
        pult.einspeisen(1, &[i16::MAX; 960]);
        pult.einspeisen(2, &[i16::MAX; 960]);

        let mut ziel = vec![0.0f32; 960];
        pult.mischen(&mut ziel);
        assert!(ziel.iter().all(|s| *s <= 1.0));
    }

    #[test]
    fn mischpult_leer_liefert_stille() {
        let mut pult = Mischpult::neu();
        let mut ziel = vec![0.7f32; 960];
        assert!(!pult.mischen(&mut ziel));
        assert!(ziel.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn mischpult_lautstaerke_wirkt() {
        let mut pult = Mischpult::neu();
        pult.lautstaerke_setzen(111, 0.5);
        pult.einspeisen(111, &[16384i16; 960]);

        let mut ziel = vec![0.0f32; 960];
        pult.mischen(&mut ziel);
        // 0.5 * 0.5 = 0.25
        assert!((ziel[0] - 0.25).abs() < 0.001);
    }

    #[test]
    fn mischpult_lautstaerke_geklemmt() {
        let mut pult = Mischpult::neu();
        pult.lautstaerke_setzen(1, 99.0);
        pult.einspeisen(1, &[1000i16; 10]);
        let mut ziel = vec![0.0f32; 10];
        pult.mischen(&mut ziel);
        // Gain maximal 2.0
        let erwartet = 1000.0 / 32768.0 * 2.0;
        assert!((ziel[0] - erwartet).abs() < 0.001);
    }

    #[test]
    fn mischpult_entfernen() {
        let mut pult = Mischpult::neu();
        pult.einspeisen(111, &[100i16; 960]);
        assert_eq!(pult.anzahl_quellen(), 1);
        pult.entfernen(111);
        assert_eq!(pult.anzahl_quellen(), 0);
    }

    #[test]
    fn mischpult_warteschlange_begrenzt() {
        let mut pult = Mischpult::neu();
        // Deutlich mehr als eine Sekunde einspeisen
        for _ in 0..100 {
            pult.einspeisen(1, &[100i16; 960]);
        }
        let quelle = pult.quellen.get(&1).unwrap();
        assert!(quelle.warteschlange.len() <= MAX_WARTESCHLANGE);
    }

    #[test]
    fn mischpult_teilweise_gefuellte_quelle() {
        let mut pult = Mischpult::neu();
        pult.einspeisen(1, &[16384i16; 100]);
        let mut ziel = vec![0.0f32; 960];
        assert!(pult.mischen(&mut ziel));
        assert!((ziel[99] - 0.5).abs() < 0.001);
        // Rest ist Stille
        assert_eq!(ziel[100], 0.0);
    }
}
