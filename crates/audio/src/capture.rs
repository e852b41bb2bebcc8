//! Mikrofon-Capture
//!
//! Die Session kennt nur das [`CaptureQuelle`]-Trait: eine gestartete
//! Quelle liefert Bloecke von mono 48 kHz f32-Samples ueber einen
//! Kanal. [`CpalQuelle`] ist die Geraete-Implementierung: der
//! cpal-Callback schreibt in einen lock-free Ring-Buffer, ein
//! dedizierter Thread sammelt daraus Bloecke und reicht sie weiter
//! (cpal::Stream ist !Send und muss in seinem Thread bleiben).
//!
//! Der Capture-Pfad blockiert nie auf dem Netzwerk: ist der Kanal voll,
//! wird der Block verworfen.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::HeapRb;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::{AudioError, AudioResult};
use crate::SAMPLE_RATE;

/// Blockgroesse die eine Quelle pro Nachricht liefert
pub const CAPTURE_BLOCK: usize = 1024;

/// Kapazitaet des Block-Kanals (etwa 0,7 s Audio)
const KANAL_KAPAZITAET: usize = 32;

/// Abstrakte Quelle fuer Mikrofon-Samples
///
/// Implementierungen liefern mono 48 kHz f32-Bloecke. Echo-Unterdrueckung
/// und Geraete-Auswahl sind Sache der Implementierung.
pub trait CaptureQuelle: Send {
    /// Startet die Aufnahme und gibt den Block-Kanal zurueck
    fn starten(&mut self) -> AudioResult<mpsc::Receiver<Vec<f32>>>;

    /// Stoppt die Aufnahme und gibt das Geraet frei
    fn stoppen(&mut self);
}

// ---------------------------------------------------------------------------
// CpalQuelle
// ---------------------------------------------------------------------------

/// Mikrofon-Quelle auf Basis des Standard-Eingabegeraets
pub struct CpalQuelle {
    laeuft: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CpalQuelle {
    /// Erstellt eine neue, noch nicht gestartete Quelle
    pub fn neu() -> Self {
        Self {
            laeuft: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl Default for CpalQuelle {
    fn default() -> Self {
        Self::neu()
    }
}

impl CaptureQuelle for CpalQuelle {
    fn starten(&mut self) -> AudioResult<mpsc::Receiver<Vec<f32>>> {
        if self.laeuft.load(Ordering::Relaxed) {
            return Err(AudioError::CaptureLaeuftBereits);
        }

        let (block_tx, block_rx) = mpsc::channel::<Vec<f32>>(KANAL_KAPAZITAET);
        // Meldet Erfolg oder Fehler der Stream-Oeffnung aus dem Thread
        let (bereit_tx, bereit_rx) = std::sync::mpsc::sync_channel::<AudioResult<()>>(1);

        let laeuft = Arc::clone(&self.laeuft);
        laeuft.store(true, Ordering::Relaxed);

        let thread_laeuft = Arc::clone(&laeuft);
        let thread = std::thread::Builder::new()
            .name("funk-capture".to_string())
            .spawn(move || {
                capture_thread(thread_laeuft, block_tx, bereit_tx);
            })
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

        match bereit_rx.recv() {
            Ok(Ok(())) => {
                self.thread = Some(thread);
                debug!("Capture gestartet");
                Ok(block_rx)
            }
            Ok(Err(e)) => {
                laeuft.store(false, Ordering::Relaxed);
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                laeuft.store(false, Ordering::Relaxed);
                let _ = thread.join();
                Err(AudioError::StreamFehler(
                    "Capture-Thread ohne Rueckmeldung beendet".to_string(),
                ))
            }
        }
    }

    fn stoppen(&mut self) {
        self.laeuft.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        debug!("Capture gestoppt");
    }
}

impl Drop for CpalQuelle {
    fn drop(&mut self) {
        self.stoppen();
    }
}

/// Haelt den cpal-Stream am Leben und sammelt Bloecke aus dem Ring
fn capture_thread(
    laeuft: Arc<AtomicBool>,
    block_tx: mpsc::Sender<Vec<f32>>,
    bereit_tx: std::sync::mpsc::SyncSender<AudioResult<()>>,
) {
    let rb = HeapRb::<f32>::new(SAMPLE_RATE as usize * 2);
    let (mut producer, mut consumer) = rb.split();

    let stream = match eingabe_stream_oeffnen(move |samples| {
        let geschrieben = producer.push_slice(samples);
        if geschrieben < samples.len() {
            warn!(
                "Capture Ring-Buffer voll, {} Samples verworfen",
                samples.len() - geschrieben
            );
        }
    }) {
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

    let mut block = Vec::with_capacity(CAPTURE_BLOCK);
    let mut temp = vec![0.0f32; CAPTURE_BLOCK];

    while laeuft.load(Ordering::Relaxed) {
        let gelesen = consumer.pop_slice(&mut temp);
        if gelesen == 0 {
            // 5 ms = ein Viertel-Frame warten
            std::thread::sleep(std::time::Duration::from_millis(5));
            continue;
        }

        block.extend_from_slice(&temp[..gelesen]);
        while block.len() >= CAPTURE_BLOCK {
            let voll: Vec<f32> = block.drain(..CAPTURE_BLOCK).collect();
            // try_send: Netzwerk-Stau darf den Audio-Pfad nicht blockieren
            if block_tx.try_send(voll).is_err() {
                warn!("Capture-Kanal voll, Block verworfen");
            }
        }
    }

    debug!("Capture-Thread beendet, cpal-Stream wird gedroppt");
}

/// Oeffnet den Eingabe-Stream auf dem Standard-Geraet (mono 48 kHz)
fn eingabe_stream_oeffnen(
    mut einspeisen: impl FnMut(&[f32]) + Send + 'static,
) -> AudioResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AudioError::KeinStandardEingabegeraet)?;

    let stream_config = StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let sample_format = device
        .supported_input_configs()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        .find(|c| {
            c.min_sample_rate().0 <= SAMPLE_RATE
                && c.max_sample_rate().0 >= SAMPLE_RATE
                && c.channels() >= 1
        })
        .map(|c| c.sample_format())
        .unwrap_or(SampleFormat::F32);

    let err_fn = |err| error!("Capture-Fehler: {}", err);

    let stream = match sample_format {
        SampleFormat::F32 => device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _| einspeisen(data),
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
        SampleFormat::I16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _| {
                    let floats: Vec<f32> =
                        data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                    einspeisen(&floats);
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
