//! VoiceSession – der Session-Aktor des Voice-Clients
//!
//! Zustandsmaschine: Disconnected -> Connecting -> Connected, bei
//! Verbindungsverlust Reconnecting mit exponentiellem Backoff und
//! unveraenderter `session_id`. Alle Zustaende werden ausschliesslich
//! im Aktor mutiert; drei Zeitquellen (Signaling-Frames, Capture-Bloecke,
//! 20 ms Wiedergabe-Tick) laufen in einer einzigen select!-Schleife.
//!
//! Handshake pro Verbindungsversuch (Budget 10 s):
//! Transport auf -> Identify -> Ready (SSRC, Heartbeat-Intervall) ->
//! SelectProtocol -> SessionDescribe (Schluessel) -> Connected.
//!
//! Vor Ready und SessionDescribe gehen keine Binaer-Frames raus; bei
//! Verbindungsverlust wird der Schluessel sofort verworfen.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep_until, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use funkraum_audio::{AudioSenke, AufnahmePipeline, CaptureQuelle};
use funkraum_core::error::{FunkraumError, Result};
use funkraum_core::event::{ConnectionState, VoiceEvent};
use funkraum_core::types::{RoomId, SprechFlags, UserId};
use funkraum_protocol::crypto::{self, SessionSchluessel, MODUS_XSALSA20_POLY1305};
use funkraum_protocol::rtp::AusgangsZaehler;
use funkraum_protocol::signaling::{self, SignalEreignis};
use funkraum_protocol::ProtokollFehler;

use crate::empfang::EmpfangsStrom;
use crate::herzschlag::{HerzschlagUhr, HerzschlagZustand};
use crate::jitter::JitterBufferConfig;
use crate::planer::{WiedergabePlaner, FRAME_DAUER};
use crate::statistik::VoiceStatistik;
use crate::teilnehmer::TeilnehmerListe;
use crate::transport::{TransportFabrik, TransportPaar, WireFrame};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration einer VoiceSession
#[derive(Debug, Clone)]
pub struct VoiceSessionConfig {
    /// Signaling-URL (von der Kontrollebene geliefert)
    pub ws_url: String,
    /// Raum dem beigetreten wird
    pub room_id: RoomId,
    /// Eigene Benutzer-ID
    pub user_id: UserId,
    /// Opakes Voice-Token der Kontrollebene
    pub token: String,
    /// Maximale automatische Reconnect-Versuche
    pub max_reconnect_versuche: u32,
    /// Budget pro Verbindungsversuch (Transport + Handshake)
    pub verbindungs_timeout: Duration,
    /// Entrauscher-Stufe der Aufnahme-Pipeline
    pub entrauscher_aktiv: bool,
    /// Jitter-Buffer-Konstanten der Empfangs-Stroeme
    pub jitter: JitterBufferConfig,
}

impl VoiceSessionConfig {
    /// Erstellt eine Konfiguration mit Standardwerten
    pub fn neu(
        ws_url: impl Into<String>,
        room_id: RoomId,
        user_id: UserId,
        token: impl Into<String>,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            room_id,
            user_id,
            token: token.into(),
            max_reconnect_versuche: 5,
            verbindungs_timeout: Duration::from_secs(10),
            entrauscher_aktiv: true,
            jitter: JitterBufferConfig::default(),
        }
    }

    /// Validiert die Konfiguration
    pub fn validieren(&self) -> std::result::Result<(), String> {
        if self.ws_url.is_empty() {
            return Err("ws_url darf nicht leer sein".to_string());
        }
        if self.token.is_empty() {
            return Err("token darf nicht leer sein".to_string());
        }
        if self.max_reconnect_versuche == 0 {
            return Err("max_reconnect_versuche muss mindestens 1 sein".to_string());
        }
        if self.verbindungs_timeout.is_zero() {
            return Err("verbindungs_timeout darf nicht 0 sein".to_string());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Befehle vom Handle an den Aktor
#[derive(Debug)]
enum Befehl {
    Trennen,
    SprechenStarten,
    SprechenStoppen,
    EntrauscherSetzen(bool),
}

/// Handle auf eine laufende VoiceSession
///
/// Die Session lebt als eigener Task; das Handle ist die einzige
/// Steuerflaeche. `trennen` ist idempotent und endgueltig.
#[derive(Clone)]
pub struct VoiceSessionHandle {
    befehle: mpsc::Sender<Befehl>,
    zustand: watch::Receiver<ConnectionState>,
    statistik: Arc<VoiceStatistik>,
}

impl VoiceSessionHandle {
    /// Trennt die Session endgueltig (kein Reconnect mehr)
    pub async fn trennen(&self) {
        let _ = self.befehle.send(Befehl::Trennen).await;
    }

    /// Startet Capture und meldet Speaking mit Mikrofon-Flag
    pub async fn sprechen_starten(&self) {
        let _ = self.befehle.send(Befehl::SprechenStarten).await;
    }

    /// Stoppt Capture (erst Audio abklemmen, dann Speaking(0) melden)
    pub async fn sprechen_stoppen(&self) {
        let _ = self.befehle.send(Befehl::SprechenStoppen).await;
    }

    /// Schaltet den Entrauscher zur Laufzeit um
    pub async fn entrauscher_setzen(&self, aktiv: bool) {
        let _ = self.befehle.send(Befehl::EntrauscherSetzen(aktiv)).await;
    }

    /// Aktueller Verbindungszustand
    pub fn zustand(&self) -> ConnectionState {
        *self.zustand.borrow()
    }

    /// Laufzeit-Zaehler der Session
    pub fn statistik(&self) -> Arc<VoiceStatistik> {
        Arc::clone(&self.statistik)
    }
}

// ---------------------------------------------------------------------------
// VoiceSession
// ---------------------------------------------------------------------------

/// Einstiegspunkt: startet den Session-Aktor
pub struct VoiceSession;

impl VoiceSession {
    /// Startet eine VoiceSession als Hintergrund-Task
    ///
    /// Gibt das Steuer-Handle und den Observer-Event-Strom zurueck.
    /// Die Session verbindet sofort; `session_id` wird hier einmal
    /// erzeugt und ueber alle Reconnects wiederverwendet.
    pub fn starten(
        config: VoiceSessionConfig,
        transport: Arc<dyn TransportFabrik>,
        capture: Box<dyn CaptureQuelle>,
        senke: Box<dyn AudioSenke>,
    ) -> Result<(VoiceSessionHandle, mpsc::UnboundedReceiver<VoiceEvent>)> {
        config.validieren().map_err(FunkraumError::Konfiguration)?;

        let (befehl_tx, befehl_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (zustand_tx, zustand_rx) = watch::channel(ConnectionState::Disconnected);
        let statistik = Arc::new(VoiceStatistik::neu());
        let session_id = Uuid::new_v4().to_string();

        info!(%session_id, raum = %config.room_id, "VoiceSession startet");

        let laeufer = Laeufer {
            config,
            session_id,
            transport,
            capture,
            senke,
            events: event_tx,
            zustand_tx,
            statistik: Arc::clone(&statistik),
            absichtlich_getrennt: false,
            spricht: false,
            pipeline: None,
            teilnehmer: TeilnehmerListe::neu(),
            stroeme: HashMap::new(),
            planer: WiedergabePlaner::neu(),
            zaehler: AusgangsZaehler::neu(),
            schluessel: None,
            ssrc: None,
        };
        tokio::spawn(laeufer.ausfuehren(befehl_rx));

        Ok((
            VoiceSessionHandle {
                befehle: befehl_tx,
                zustand: zustand_rx,
                statistik,
            },
            event_rx,
        ))
    }
}

/// Backoff vor Reconnect-Versuch `n`: min(1 s * 2^(n-1), 16 s)
pub(crate) fn backoff_dauer(versuch: u32) -> Duration {
    let exponent = versuch.saturating_sub(1).min(4);
    Duration::from_secs(1u64 << exponent)
}

// ---------------------------------------------------------------------------
// Aktor
// ---------------------------------------------------------------------------

/// Handshake-Phase innerhalb eines Verbindungsversuchs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    WartetReady,
    WartetDescribe,
    Verbunden,
}

/// Ausgang eines einzelnen Verbindungsversuchs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SitzungsAusgang {
    /// `trennen()` oder Handle-Drop – endgueltig
    Absichtlich,
    /// Handshake nie abgeschlossen (Timeout, Transport-Fehler)
    NieVerbunden,
    /// Nach Connected verloren – Reconnect-Zyklus beginnt neu
    Verloren,
    /// Protokoll-Verletzung im Handshake – endgueltig
    Fatal,
}

/// Wirkung eines angewandten Befehls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BefehlsWirkung {
    Weiter,
    Trennen,
    SprechenAn,
    SprechenAus,
}

struct Laeufer {
    config: VoiceSessionConfig,
    session_id: String,
    transport: Arc<dyn TransportFabrik>,
    capture: Box<dyn CaptureQuelle>,
    senke: Box<dyn AudioSenke>,
    events: mpsc::UnboundedSender<VoiceEvent>,
    zustand_tx: watch::Sender<ConnectionState>,
    statistik: Arc<VoiceStatistik>,

    absichtlich_getrennt: bool,
    /// Speaking-Zustand; ueberlebt Reconnects und steuert das
    /// Wieder-Melden nach dem naechsten SessionDescribe
    spricht: bool,
    pipeline: Option<AufnahmePipeline>,
    teilnehmer: TeilnehmerListe,
    stroeme: HashMap<u32, EmpfangsStrom>,
    planer: WiedergabePlaner,
    zaehler: AusgangsZaehler,
    schluessel: Option<SessionSchluessel>,
    ssrc: Option<u32>,
}

impl Laeufer {
    async fn ausfuehren(mut self, mut befehle: mpsc::Receiver<Befehl>) {
        let mut capture_rx: Option<mpsc::Receiver<Vec<f32>>> = None;
        let mut versuch: u32 = 0;

        loop {
            if versuch > 0 {
                self.zustand_setzen(ConnectionState::Reconnecting);
                self.event(VoiceEvent::Reconnecting {
                    versuch,
                    max_versuche: self.config.max_reconnect_versuche,
                });
                let warten = backoff_dauer(versuch);
                debug!(versuch, ?warten, "Backoff vor Reconnect");
                if !self.backoff_warten(warten, &mut befehle, &mut capture_rx).await {
                    break;
                }
            }

            self.zustand_setzen(ConnectionState::Connecting);
            match self.sitzung_fahren(&mut befehle, &mut capture_rx).await {
                SitzungsAusgang::Absichtlich | SitzungsAusgang::Fatal => break,
                SitzungsAusgang::Verloren => {
                    // Frischer Reconnect-Zyklus
                    versuch = 1;
                }
                SitzungsAusgang::NieVerbunden => {
                    if versuch == 0 {
                        // Erstverbindung scheitert ohne Reconnect
                        warn!("Erstverbindung fehlgeschlagen");
                        break;
                    }
                    versuch += 1;
                    if versuch > self.config.max_reconnect_versuche {
                        warn!(
                            max = self.config.max_reconnect_versuche,
                            "Reconnect-Versuche erschoepft"
                        );
                        break;
                    }
                }
            }
        }

        self.abbauen();
    }

    /// Wartet den Backoff ab; `false` wenn waehrenddessen getrennt wurde
    async fn backoff_warten(
        &mut self,
        dauer: Duration,
        befehle: &mut mpsc::Receiver<Befehl>,
        capture_rx: &mut Option<mpsc::Receiver<Vec<f32>>>,
    ) -> bool {
        let frist = sleep_until(Instant::now() + dauer);
        tokio::pin!(frist);

        loop {
            tokio::select! {
                _ = &mut frist => return true,
                befehl = befehle.recv() => {
                    let befehl = match befehl {
                        Some(befehl) => befehl,
                        None => Befehl::Trennen,
                    };
                    match self.befehl_anwenden(befehl, capture_rx) {
                        BefehlsWirkung::Trennen => return false,
                        // Nicht verbunden: Pipeline-Rest verwerfen
                        BefehlsWirkung::SprechenAus => self.pipeline = None,
                        _ => {}
                    }
                }
            }
        }
    }

    /// Ein Verbindungsversuch: Transport, Handshake, Betriebs-Schleife
    async fn sitzung_fahren(
        &mut self,
        befehle: &mut mpsc::Receiver<Befehl>,
        capture_rx: &mut Option<mpsc::Receiver<Vec<f32>>>,
    ) -> SitzungsAusgang {
        let frist = sleep_until(Instant::now() + self.config.verbindungs_timeout);
        tokio::pin!(frist);

        // 1. Transport aufbauen (zaehlt gegen das Versuchs-Budget)
        let verbinden = self.transport.verbinden(&self.config.ws_url);
        tokio::pin!(verbinden);
        let paar: TransportPaar = loop {
            tokio::select! {
                ergebnis = &mut verbinden => match ergebnis {
                    Ok(paar) => break paar,
                    Err(e) => {
                        debug!("Transport-Aufbau fehlgeschlagen: {}", e);
                        return SitzungsAusgang::NieVerbunden;
                    }
                },
                _ = &mut frist => {
                    warn!("Zeitlimit beim Transport-Aufbau");
                    return SitzungsAusgang::NieVerbunden;
                }
                befehl = befehle.recv() => {
                    let befehl = befehl.unwrap_or(Befehl::Trennen);
                    match self.befehl_anwenden(befehl, capture_rx) {
                        BefehlsWirkung::Trennen => return SitzungsAusgang::Absichtlich,
                        BefehlsWirkung::SprechenAus => self.pipeline = None,
                        _ => {}
                    }
                }
            }
        };

        let TransportPaar {
            sender,
            mut empfaenger,
        } = paar;

        // 2. Identify – byte-identische session_id bei jedem Versuch
        let identify = match signaling::identify(
            &self.config.room_id,
            &self.config.user_id,
            &self.session_id,
            &self.config.token,
        ) {
            Ok(text) => text,
            Err(e) => {
                warn!("Identify nicht serialisierbar: {}", e);
                return SitzungsAusgang::Fatal;
            }
        };
        if sender.send(WireFrame::Text(identify)).await.is_err() {
            return SitzungsAusgang::NieVerbunden;
        }
        debug!(session_id = %self.session_id, "Identify gesendet");

        // 3. Betriebs-Schleife
        let mut phase = Phase::WartetReady;
        let mut herzschlag: Option<(tokio::time::Interval, HerzschlagUhr)> = None;
        let mut wiedergabe = interval_at(Instant::now() + FRAME_DAUER, FRAME_DAUER);
        wiedergabe.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                frame = empfaenger.recv() => match frame {
                    None => {
                        debug!("Transport geschlossen");
                        return self.verbindungs_verlust(phase);
                    }
                    Some(WireFrame::Text(text)) => {
                        if !self.text_behandeln(&text, &sender, &mut phase, &mut herzschlag).await {
                            return SitzungsAusgang::Fatal;
                        }
                    }
                    Some(WireFrame::Binaer(daten)) => self.binaer_behandeln(&daten),
                },

                _ = &mut frist, if phase != Phase::Verbunden => {
                    warn!("Zeitlimit im Handshake");
                    return self.verbindungs_verlust(phase);
                }

                _ = async {
                    match herzschlag.as_mut() {
                        Some((intervall, _)) => { intervall.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    if let Some((_, uhr)) = herzschlag.as_mut() {
                        if uhr.vor_schlag(Instant::now()) == HerzschlagZustand::Tot {
                            warn!("Heartbeat verloren, schliesse Transport");
                            return self.verbindungs_verlust(phase);
                        }
                        match signaling::heartbeat(uhr.nonce()) {
                            Ok(text) => {
                                if sender.send(WireFrame::Text(text)).await.is_err() {
                                    return self.verbindungs_verlust(phase);
                                }
                                trace!("Heartbeat gesendet");
                            }
                            Err(e) => warn!("Heartbeat nicht serialisierbar: {}", e),
                        }
                    }
                }

                _ = wiedergabe.tick(), if phase == Phase::Verbunden => {
                    self.wiedergabe_tick();
                }

                block = async {
                    match capture_rx.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => match block {
                    Some(block) => self.capture_block(block, &sender, phase == Phase::Verbunden),
                    None => {
                        debug!("Capture-Quelle beendet");
                        *capture_rx = None;
                    }
                },

                befehl = befehle.recv() => {
                    let befehl = befehl.unwrap_or(Befehl::Trennen);
                    match self.befehl_anwenden(befehl, capture_rx) {
                        BefehlsWirkung::Trennen => {
                            if let Ok(text) = signaling::client_disconnect() {
                                let _ = sender.send(WireFrame::Text(text)).await;
                            }
                            return SitzungsAusgang::Absichtlich;
                        }
                        BefehlsWirkung::SprechenAn => {
                            if phase == Phase::Verbunden {
                                self.speaking_senden(&sender, SprechFlags::mikrofon()).await;
                            }
                        }
                        BefehlsWirkung::SprechenAus => {
                            self.pipeline_flushen(&sender, phase == Phase::Verbunden);
                            if phase == Phase::Verbunden {
                                self.speaking_senden(&sender, SprechFlags::leer()).await;
                            }
                        }
                        BefehlsWirkung::Weiter => {}
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Signaling
    // -----------------------------------------------------------------------

    /// Behandelt eine Text-Nachricht; `false` bei fatalem Handshake-Fehler
    async fn text_behandeln(
        &mut self,
        text: &str,
        sender: &mpsc::Sender<WireFrame>,
        phase: &mut Phase,
        herzschlag: &mut Option<(tokio::time::Interval, HerzschlagUhr)>,
    ) -> bool {
        let ereignis = match signaling::eingehende_deuten(text) {
            Ok(ereignis) => ereignis,
            Err(ProtokollFehler::Schema { op, quelle }) => {
                self.statistik.schema_fehler_zaehlen();
                warn!(op, "Schema-Fehler, Nachricht verworfen: {}", quelle);
                return true;
            }
            Err(e) => {
                self.statistik.schema_fehler_zaehlen();
                warn!("Ungueltige Signaling-Nachricht verworfen: {}", e);
                return true;
            }
        };

        match ereignis {
            SignalEreignis::Ready(ready) => {
                if *phase != Phase::WartetReady {
                    debug!("Ready ausserhalb des Handshakes ignoriert");
                    return true;
                }
                if !ready
                    .modes
                    .iter()
                    .any(|modus| modus == MODUS_XSALSA20_POLY1305)
                {
                    warn!(modes = ?ready.modes, "Kein gemeinsamer Verschluesselungsmodus");
                    return false;
                }

                self.ssrc = Some(ready.ssrc);
                let periode = Duration::from_millis(ready.heartbeat_interval.max(1));
                let mut intervall = interval_at(Instant::now() + periode, periode);
                intervall.set_missed_tick_behavior(MissedTickBehavior::Delay);
                *herzschlag = Some((intervall, HerzschlagUhr::neu(periode, Instant::now())));
                info!(
                    ssrc = ready.ssrc,
                    intervall_ms = ready.heartbeat_interval,
                    "Ready empfangen"
                );

                match signaling::select_protocol(MODUS_XSALSA20_POLY1305) {
                    Ok(text) => {
                        let _ = sender.send(WireFrame::Text(text)).await;
                    }
                    Err(e) => {
                        warn!("SelectProtocol nicht serialisierbar: {}", e);
                        return false;
                    }
                }
                *phase = Phase::WartetDescribe;
            }

            SignalEreignis::SessionDescribe(beschreibung) => {
                match SessionSchluessel::aus_base64(&beschreibung.secret_key, &beschreibung.mode) {
                    Ok(schluessel) => self.schluessel = Some(schluessel),
                    Err(e) => {
                        warn!("Unbrauchbarer Sitzungsschluessel: {}", e);
                        return false;
                    }
                }
                let war_verbunden = *phase == Phase::Verbunden;
                *phase = Phase::Verbunden;
                info!(codec = %beschreibung.audio_codec, "SessionDescribe, Session verbunden");

                if !war_verbunden {
                    self.zustand_setzen(ConnectionState::Connected);
                    self.event(VoiceEvent::Verbunden);
                    // Speaking-Zustand aus der Zeit vor dem Reconnect
                    // (oder ein frueher sprechen_starten) wieder melden
                    if self.spricht {
                        self.speaking_senden(sender, SprechFlags::mikrofon()).await;
                    }
                }
            }

            SignalEreignis::HeartbeatAck => {
                if let Some((_, uhr)) = herzschlag.as_mut() {
                    uhr.ack_empfangen(Instant::now());
                    trace!("HeartbeatAck empfangen");
                }
            }

            SignalEreignis::UserJoin(beitritt) => {
                self.teilnehmer
                    .beitreten(beitritt.user_id.clone(), beitritt.ssrc);
                match EmpfangsStrom::neu(self.config.jitter.clone()) {
                    Ok(strom) => {
                        self.stroeme.insert(beitritt.ssrc, strom);
                    }
                    Err(e) => self.event(VoiceEvent::Fehler {
                        ursache: format!(
                            "Decoder fuer SSRC {} nicht erstellbar: {}",
                            beitritt.ssrc, e
                        ),
                    }),
                }
                info!(user = %beitritt.user_id, ssrc = beitritt.ssrc, "Teilnehmer beigetreten");
                self.event(VoiceEvent::BenutzerBeigetreten {
                    user_id: beitritt.user_id,
                    ssrc: beitritt.ssrc,
                });
            }

            SignalEreignis::UserLeave(abschied) => {
                if let Some(teilnehmer) = self.teilnehmer.verlassen(&abschied.user_id) {
                    self.stroeme.remove(&teilnehmer.ssrc);
                    self.planer.entfernen(teilnehmer.ssrc);
                    self.senke.quelle_entfernen(teilnehmer.ssrc);
                    info!(user = %abschied.user_id, "Teilnehmer gegangen");
                    self.event(VoiceEvent::BenutzerGegangen {
                        user_id: abschied.user_id,
                    });
                }
            }

            SignalEreignis::UserSpeaking(sprechend) => {
                self.teilnehmer
                    .flags_setzen(&sprechend.user_id, sprechend.speaking);
                self.event(VoiceEvent::BenutzerSpricht {
                    user_id: sprechend.user_id,
                    ssrc: sprechend.ssrc,
                    flags: sprechend.speaking,
                });
            }

            SignalEreignis::Resumed => {
                // Reserviert; Connected gibt es nur ueber SessionDescribe
                debug!("Resumed (Op 11) empfangen, keine Wirkung");
            }

            SignalEreignis::Unbekannt(op) => {
                self.statistik.unbekannten_opcode_zaehlen();
                debug!(op, "Unbekannter Opcode ignoriert");
            }
        }

        true
    }

    // -----------------------------------------------------------------------
    // Media
    // -----------------------------------------------------------------------

    /// Oeffnet ein Binaer-Frame und reiht es in den Jitter Buffer ein
    fn binaer_behandeln(&mut self, daten: &[u8]) {
        let Some(schluessel) = self.schluessel.as_ref() else {
            trace!("Media-Paket ohne Sitzungsschluessel verworfen");
            return;
        };

        match crypto::oeffnen(daten, schluessel) {
            Ok((header, payload)) => {
                if let Some(strom) = self.stroeme.get_mut(&header.ssrc) {
                    strom.push(header.sequence, header.timestamp, payload);
                    self.statistik.empfangen_zaehlen();
                } else {
                    self.statistik.unbekannte_ssrc_zaehlen();
                    trace!(ssrc = header.ssrc, "Paket fuer unbekannte SSRC verworfen");
                }
            }
            Err(ProtokollFehler::AuthFehler) => {
                self.statistik.auth_fehler_zaehlen();
                debug!("Paket-Authentifizierung fehlgeschlagen, verworfen");
            }
            Err(e) => {
                self.statistik.header_fehler_zaehlen();
                trace!("Ungueltiges Media-Paket verworfen: {}", e);
            }
        }
    }

    /// 20 ms-Tick: pro Strom einen Frame entnehmen und ausliefern
    fn wiedergabe_tick(&mut self) {
        let jetzt = Instant::now();
        for (ssrc, strom) in self.stroeme.iter_mut() {
            if let Some(pcm) = strom.pop() {
                let geplant = self.planer.frame_einplanen(*ssrc, jetzt);
                trace!(
                    ssrc,
                    vorlauf_ms = geplant.saturating_duration_since(jetzt).as_millis() as u64,
                    "Frame ausgeliefert"
                );
                self.senke.abspielen(*ssrc, &pcm);
            }
        }
    }

    /// Verarbeitet einen Capture-Block und sendet entstehende Pakete
    fn capture_block(&mut self, block: Vec<f32>, sender: &mpsc::Sender<WireFrame>, verbunden: bool) {
        let pakete = match self.pipeline.as_mut() {
            Some(pipeline) => match pipeline.process(&block) {
                Ok(pakete) => pakete,
                Err(e) => {
                    warn!("Aufnahme-Pipeline-Fehler: {}", e);
                    return;
                }
            },
            None => return,
        };

        // Ohne Connected (und damit ohne Schluessel) wird still verworfen
        if !verbunden {
            return;
        }
        for paket in pakete {
            self.paket_senden(sender, paket);
        }
    }

    /// Draint die Pipeline und sendet die Rest-Pakete
    fn pipeline_flushen(&mut self, sender: &mpsc::Sender<WireFrame>, verbunden: bool) {
        if let Some(mut pipeline) = self.pipeline.take() {
            match pipeline.flush() {
                Ok(pakete) if verbunden => {
                    for paket in pakete {
                        self.paket_senden(sender, paket);
                    }
                }
                Ok(_) => {}
                Err(e) => debug!("Pipeline-Flush fehlgeschlagen: {}", e),
            }
        }
    }

    /// Versiegelt ein Opus-Paket und reiht es in den Sende-Kanal ein
    fn paket_senden(&mut self, sender: &mpsc::Sender<WireFrame>, opus: Vec<u8>) {
        if self.schluessel.is_none() {
            trace!("Kein Sitzungsschluessel, Paket verworfen");
            return;
        }
        let Some(ssrc) = self.ssrc else {
            trace!("Keine SSRC, Paket verworfen");
            return;
        };

        let header = self.zaehler.naechster(ssrc);
        let Some(schluessel) = self.schluessel.as_ref() else {
            return;
        };
        match crypto::versiegeln(&header, &opus, schluessel) {
            Ok(draht) => {
                // try_send: der Audio-Pfad wartet nie auf das Netz
                if sender.try_send(WireFrame::Binaer(draht)).is_ok() {
                    self.statistik.gesendet_zaehlen();
                } else {
                    self.statistik.sende_verworfen_zaehlen();
                    trace!("Sende-Kanal voll, Paket verworfen");
                }
            }
            Err(e) => warn!("Versiegeln fehlgeschlagen: {}", e),
        }
    }

    /// Meldet den Speaking-Zustand an den SFU
    async fn speaking_senden(&mut self, sender: &mpsc::Sender<WireFrame>, flags: SprechFlags) {
        let Some(ssrc) = self.ssrc else {
            return;
        };
        match signaling::speaking(flags, ssrc) {
            Ok(text) => {
                let _ = sender.send(WireFrame::Text(text)).await;
                debug!(flags = flags.0, "Speaking gemeldet");
            }
            Err(e) => warn!("Speaking nicht serialisierbar: {}", e),
        }
    }

    // -----------------------------------------------------------------------
    // Befehle & Lebenszyklus
    // -----------------------------------------------------------------------

    fn befehl_anwenden(
        &mut self,
        befehl: Befehl,
        capture_rx: &mut Option<mpsc::Receiver<Vec<f32>>>,
    ) -> BefehlsWirkung {
        match befehl {
            Befehl::Trennen => {
                self.absichtlich_getrennt = true;
                info!("Trennen angefordert");
                BefehlsWirkung::Trennen
            }

            Befehl::SprechenStarten => {
                if self.spricht {
                    warn!("sprechen_starten: Capture laeuft bereits");
                    return BefehlsWirkung::Weiter;
                }
                let pipeline = match AufnahmePipeline::neu(self.config.entrauscher_aktiv) {
                    Ok(pipeline) => pipeline,
                    Err(e) => {
                        self.event(VoiceEvent::Fehler {
                            ursache: format!("Encoder-Initialisierung fehlgeschlagen: {}", e),
                        });
                        return BefehlsWirkung::Weiter;
                    }
                };
                match self.capture.starten() {
                    Ok(rx) => {
                        *capture_rx = Some(rx);
                        self.pipeline = Some(pipeline);
                        self.spricht = true;
                        info!("Capture gestartet");
                        BefehlsWirkung::SprechenAn
                    }
                    Err(e) => {
                        // Ressourcen-Fehler: Session bleibt verbunden,
                        // der Aufrufer darf es erneut versuchen
                        self.event(VoiceEvent::Fehler {
                            ursache: format!("Mikrofon nicht verfuegbar: {}", e),
                        });
                        BefehlsWirkung::Weiter
                    }
                }
            }

            Befehl::SprechenStoppen => {
                if !self.spricht {
                    warn!("sprechen_stoppen: Capture laeuft nicht");
                    return BefehlsWirkung::Weiter;
                }
                // Erst das Audio abklemmen, dann signalisiert der
                // Aufrufer Speaking(0) – dazwischen fliesst nichts mehr
                self.capture.stoppen();
                *capture_rx = None;
                self.spricht = false;
                info!("Capture gestoppt");
                BefehlsWirkung::SprechenAus
            }

            Befehl::EntrauscherSetzen(aktiv) => {
                self.config.entrauscher_aktiv = aktiv;
                if let Some(pipeline) = self.pipeline.as_mut() {
                    pipeline.entrauscher_setzen(aktiv);
                }
                debug!(aktiv, "Entrauscher umgeschaltet");
                BefehlsWirkung::Weiter
            }
        }
    }

    /// Raeumt verbindungsgebundenen Zustand nach Transport-Verlust
    fn verbindungs_verlust(&mut self, phase: Phase) -> SitzungsAusgang {
        let war_verbunden = phase == Phase::Verbunden;

        // Ohne Schluessel keine Sends; Index und Buffer gehoeren zur
        // alten Verbindung (neue SSRCs kommen per frischem UserJoin)
        self.schluessel = None;
        self.ssrc = None;
        for ssrc in self.teilnehmer.leeren() {
            self.stroeme.remove(&ssrc);
            self.planer.entfernen(ssrc);
            self.senke.quelle_entfernen(ssrc);
        }
        self.stroeme.clear();
        self.planer.reset();

        if self.absichtlich_getrennt {
            SitzungsAusgang::Absichtlich
        } else if war_verbunden {
            SitzungsAusgang::Verloren
        } else {
            SitzungsAusgang::NieVerbunden
        }
    }

    /// Endgueltiger Abbau in definierter Reihenfolge:
    /// Capture -> Encoder -> Transport -> Planer -> Buffer -> Schluessel
    fn abbauen(&mut self) {
        self.capture.stoppen();
        self.pipeline = None;
        // Der Transport fiel bereits mit dem Ende des Versuchs
        self.planer.reset();
        for ssrc in self.teilnehmer.leeren() {
            self.stroeme.remove(&ssrc);
            self.senke.quelle_entfernen(ssrc);
        }
        self.stroeme.clear();
        self.schluessel = None;
        self.ssrc = None;

        self.zustand_setzen(ConnectionState::Disconnected);
        self.event(VoiceEvent::Getrennt);
        info!(session_id = %self.session_id, "VoiceSession beendet");
    }

    fn zustand_setzen(&self, zustand: ConnectionState) {
        if *self.zustand_tx.borrow() != zustand {
            let _ = self.zustand_tx.send(zustand);
            self.event(VoiceEvent::ZustandGeaendert(zustand));
        }
    }

    fn event(&self, event: VoiceEvent) {
        let _ = self.events.send(event);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_verdoppelt_mit_deckel() {
        assert_eq!(backoff_dauer(1), Duration::from_secs(1));
        assert_eq!(backoff_dauer(2), Duration::from_secs(2));
        assert_eq!(backoff_dauer(3), Duration::from_secs(4));
        assert_eq!(backoff_dauer(4), Duration::from_secs(8));
        assert_eq!(backoff_dauer(5), Duration::from_secs(16));
        // Deckel bei 16 s
        assert_eq!(backoff_dauer(6), Duration::from_secs(16));
        assert_eq!(backoff_dauer(100), Duration::from_secs(16));
    }

    #[test]
    fn config_validierung() {
        let gut = VoiceSessionConfig::neu(
            "wss://sfu.example/voice",
            RoomId::neu("raum"),
            UserId::neu("ich"),
            "token",
        );
        assert!(gut.validieren().is_ok());

        let mut leer_url = gut.clone();
        leer_url.ws_url.clear();
        assert!(leer_url.validieren().is_err());

        let mut leer_token = gut.clone();
        leer_token.token.clear();
        assert!(leer_token.validieren().is_err());

        let mut keine_versuche = gut.clone();
        keine_versuche.max_reconnect_versuche = 0;
        assert!(keine_versuche.validieren().is_err());

        let mut kein_timeout = gut;
        kein_timeout.verbindungs_timeout = Duration::ZERO;
        assert!(kein_timeout.validieren().is_err());
    }

    #[test]
    fn config_standardwerte() {
        let config = VoiceSessionConfig::neu(
            "wss://sfu.example/voice",
            RoomId::neu("raum"),
            UserId::neu("ich"),
            "token",
        );
        assert_eq!(config.max_reconnect_versuche, 5);
        assert_eq!(config.verbindungs_timeout, Duration::from_secs(10));
        assert!(config.entrauscher_aktiv);
        assert_eq!(config.jitter.min_puffer_ms, 60);
    }
}
