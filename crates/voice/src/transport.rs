//! Transport-Abstraktion des Signaling-Kanals
//!
//! Die Session spricht nicht direkt WebSocket, sondern ein Paar von
//! Kanaelen ueber [`WireFrame`]s: Text-Frames tragen Signaling-JSON,
//! Binaer-Frames rohe RTP-Pakete. [`WsTransportFabrik`] verbindet das
//! Paar mit einem echten WebSocket (zwei Pump-Tasks); Tests haengen
//! stattdessen einen geskripteten Gegenpart an die Kanaele.
//!
//! Schliessen des Kanals in beide Richtungen bedeutet Transport-Ende:
//! liefert der Empfaenger `None`, ist die Verbindung weg.

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, trace, warn};

use funkraum_core::error::FunkraumError;

/// Kapazitaet der Frame-Kanaele in beide Richtungen
const KANAL_KAPAZITAET: usize = 64;

/// Ein Frame auf dem Duplex-Kanal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// Signaling-JSON
    Text(String),
    /// Rohes RTP-Paket
    Binaer(Vec<u8>),
}

/// Kanal-Paar einer aufgebauten Verbindung
pub struct TransportPaar {
    /// Ausgehende Frames (Session -> Server)
    pub sender: mpsc::Sender<WireFrame>,
    /// Eingehende Frames (Server -> Session); `None` = Verbindung zu
    pub empfaenger: mpsc::Receiver<WireFrame>,
}

/// Fabrik fuer Signaling-Verbindungen
///
/// Pro Verbindungsversuch wird `verbinden` einmal gerufen; die Session
/// besitzt danach das Kanal-Paar bis zum Verbindungsende.
pub trait TransportFabrik: Send + Sync {
    fn verbinden(&self, url: &str) -> BoxFuture<'static, Result<TransportPaar, FunkraumError>>;
}

// ---------------------------------------------------------------------------
// WebSocket-Implementierung
// ---------------------------------------------------------------------------

/// Verbindet das Kanal-Paar mit einem tokio-tungstenite WebSocket
#[derive(Debug, Default)]
pub struct WsTransportFabrik;

impl WsTransportFabrik {
    pub fn neu() -> Self {
        Self
    }
}

impl TransportFabrik for WsTransportFabrik {
    fn verbinden(&self, url: &str) -> BoxFuture<'static, Result<TransportPaar, FunkraumError>> {
        let url = url.to_string();
        Box::pin(async move {
            debug!(%url, "Verbinde mit Signaling-Server");
            let (ws, _antwort) = tokio_tungstenite::connect_async(&url)
                .await
                .map_err(|e| FunkraumError::Verbindung(e.to_string()))?;
            let (mut schreiben, mut lesen) = ws.split();

            let (ein_tx, ein_rx) = mpsc::channel::<WireFrame>(KANAL_KAPAZITAET);
            let (aus_tx, mut aus_rx) = mpsc::channel::<WireFrame>(KANAL_KAPAZITAET);

            // Schreib-Pumpe: Session -> WebSocket. Endet wenn die
            // Session ihren Sender droppt oder der Socket stirbt.
            tokio::spawn(async move {
                while let Some(frame) = aus_rx.recv().await {
                    let nachricht = match frame {
                        WireFrame::Text(text) => Message::Text(text),
                        WireFrame::Binaer(daten) => Message::Binary(daten),
                    };
                    if let Err(e) = schreiben.send(nachricht).await {
                        warn!("WebSocket-Schreibfehler: {}", e);
                        break;
                    }
                }
                let _ = schreiben.close().await;
                debug!("Schreib-Pumpe beendet");
            });

            // Lese-Pumpe: WebSocket -> Session. Droppt ein_tx am Ende,
            // womit die Session den Verbindungsverlust sieht.
            tokio::spawn(async move {
                while let Some(ergebnis) = lesen.next().await {
                    let frame = match ergebnis {
                        Ok(Message::Text(text)) => WireFrame::Text(text),
                        Ok(Message::Binary(daten)) => WireFrame::Binaer(daten),
                        Ok(Message::Close(grund)) => {
                            debug!(?grund, "WebSocket vom Server geschlossen");
                            break;
                        }
                        Ok(andere) => {
                            trace!(?andere, "Kontroll-Frame ignoriert");
                            continue;
                        }
                        Err(e) => {
                            warn!("WebSocket-Lesefehler: {}", e);
                            break;
                        }
                    };
                    if ein_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                debug!("Lese-Pumpe beendet");
            });

            Ok(TransportPaar {
                sender: aus_tx,
                empfaenger: ein_rx,
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
