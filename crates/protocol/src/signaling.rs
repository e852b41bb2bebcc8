//! Signaling-Protokoll des SFU-Kanals
//!
//! Jede Text-Nachricht ist ein JSON-Objekt `{ op: <u8>, d: <payload> }`.
//! Binaer-Frames auf demselben Kanal sind rohe RTP-Pakete und laufen an
//! dieser Ebene vorbei.
//!
//! Eingehende Nachrichten werden genau einmal an der Transport-Grenze in
//! das typsichere [`SignalEreignis`]-Enum geparst; untypisierte Payloads
//! wandern nie weiter nach innen. Unbekannte Opcodes werden geloggt und
//! ignoriert; Schema-Fehler innerhalb eines bekannten Opcodes verwerfen
//! nur die betroffene Nachricht.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtokollFehler;
use funkraum_core::types::{RoomId, SprechFlags, UserId};

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

/// Opcode-Tabelle des Signaling-Kanals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// C→S: Erste Nachricht nach Kanal-Aufbau
    Identify = 0,
    /// C→S: Antwort auf Ready, waehlt den Verschluesselungsmodus
    SelectProtocol = 1,
    /// S→C: SSRC-Zuweisung und Heartbeat-Intervall
    Ready = 2,
    /// C→S: Heartbeat mit Client-Nonce
    Heartbeat = 3,
    /// S→C: Sitzungsschluessel und Codec
    SessionDescribe = 4,
    /// C→S: Speaking-Flags des lokalen Benutzers
    Speaking = 5,
    /// S→C: Heartbeat-Bestaetigung
    HeartbeatAck = 6,
    /// S→C: Teilnehmer beigetreten
    UserJoin = 7,
    /// S→C: Teilnehmer gegangen
    UserLeave = 8,
    /// S→C: Speaking-Zustand eines Teilnehmers
    UserSpeaking = 9,
    /// S→C: Session wiederaufgenommen (reserviert)
    Resumed = 11,
    /// C→S: Sauberer Abschied vor dem Trennen
    ClientDisconnect = 13,
}

impl Opcode {
    /// Konvertiert ein Byte in einen Opcode
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Identify),
            1 => Some(Self::SelectProtocol),
            2 => Some(Self::Ready),
            3 => Some(Self::Heartbeat),
            4 => Some(Self::SessionDescribe),
            5 => Some(Self::Speaking),
            6 => Some(Self::HeartbeatAck),
            7 => Some(Self::UserJoin),
            8 => Some(Self::UserLeave),
            9 => Some(Self::UserSpeaking),
            11 => Some(Self::Resumed),
            13 => Some(Self::ClientDisconnect),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Nachrichten-Rahmen
// ---------------------------------------------------------------------------

/// Aeusserer Rahmen jeder Signaling-Nachricht
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalNachricht {
    /// Opcode (siehe [`Opcode`])
    pub op: u8,
    /// Opcode-spezifischer Payload
    pub d: Value,
}

// ---------------------------------------------------------------------------
// Payload-Typen
// ---------------------------------------------------------------------------

/// Payload von Identify (Op 0)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub room_id: RoomId,
    pub user_id: UserId,
    /// Pro VoiceSession einmal erzeugt und ueber alle Reconnects
    /// byte-identisch wiederverwendet
    pub session_id: String,
    pub token: String,
}

/// Innere Daten von SelectProtocol (Op 1)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectProtocolDaten {
    pub address: String,
    pub port: u16,
    pub mode: String,
}

/// Payload von SelectProtocol (Op 1)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectProtocolPayload {
    pub protocol: String,
    pub data: SelectProtocolDaten,
}

/// Payload von Ready (Op 2)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyPayload {
    /// Dem Client zugewiesene SSRC (nach Reconnect frisch vergeben)
    pub ssrc: u32,
    pub ip: String,
    pub port: u16,
    /// Vom Server unterstuetzte Verschluesselungsmodi
    pub modes: Vec<String>,
    /// Heartbeat-Intervall in Millisekunden
    pub heartbeat_interval: u64,
}

/// Payload von Heartbeat (Op 3)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub nonce: u64,
}

/// Payload von SessionDescribe (Op 4)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescribePayload {
    pub mode: String,
    /// 32-Byte Sitzungsschluessel, base64-kodiert
    pub secret_key: String,
    pub audio_codec: String,
}

/// Payload von Speaking (Op 5)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakingPayload {
    pub speaking: SprechFlags,
    pub delay: u32,
    pub ssrc: u32,
}

/// Payload von UserJoin (Op 7)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserJoinPayload {
    pub user_id: UserId,
    pub ssrc: u32,
}

/// Payload von UserLeave (Op 8)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserLeavePayload {
    pub user_id: UserId,
}

/// Payload von UserSpeaking (Op 9)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSpeakingPayload {
    pub user_id: UserId,
    pub ssrc: u32,
    pub speaking: SprechFlags,
}

// ---------------------------------------------------------------------------
// Eingehende Ereignisse (Server -> Client)
// ---------------------------------------------------------------------------

/// Typsicheres Ergebnis des Parsens einer eingehenden Nachricht
#[derive(Debug, Clone)]
pub enum SignalEreignis {
    Ready(ReadyPayload),
    SessionDescribe(SessionDescribePayload),
    HeartbeatAck,
    UserJoin(UserJoinPayload),
    UserLeave(UserLeavePayload),
    UserSpeaking(UserSpeakingPayload),
    Resumed,
    /// Unbekannter oder nicht erwarteter Opcode – loggen und ignorieren
    Unbekannt(u8),
}

/// Parst eine eingehende Text-Nachricht in ein [`SignalEreignis`]
///
/// # Fehler
/// - `Rahmen` wenn der aeussere `{op, d}`-Rahmen kein gueltiges JSON ist
/// - `Schema` wenn der Payload eines bekannten Opcodes nicht passt
///   (nicht fatal – der Aufrufer verwirft nur diese Nachricht)
pub fn eingehende_deuten(text: &str) -> Result<SignalEreignis, ProtokollFehler> {
    let rahmen: SignalNachricht =
        serde_json::from_str(text).map_err(ProtokollFehler::Rahmen)?;

    let op = rahmen.op;
    let schema = move |quelle| ProtokollFehler::Schema { op, quelle };

    let ereignis = match Opcode::from_u8(op) {
        Some(Opcode::Ready) => {
            SignalEreignis::Ready(serde_json::from_value(rahmen.d).map_err(schema)?)
        }
        Some(Opcode::SessionDescribe) => {
            SignalEreignis::SessionDescribe(serde_json::from_value(rahmen.d).map_err(schema)?)
        }
        Some(Opcode::HeartbeatAck) => SignalEreignis::HeartbeatAck,
        Some(Opcode::UserJoin) => {
            SignalEreignis::UserJoin(serde_json::from_value(rahmen.d).map_err(schema)?)
        }
        Some(Opcode::UserLeave) => {
            SignalEreignis::UserLeave(serde_json::from_value(rahmen.d).map_err(schema)?)
        }
        Some(Opcode::UserSpeaking) => {
            SignalEreignis::UserSpeaking(serde_json::from_value(rahmen.d).map_err(schema)?)
        }
        Some(Opcode::Resumed) => SignalEreignis::Resumed,
        // Client->Server-Opcodes vom Server sind genauso unerwartet wie
        // voellig unbekannte Nummern
        _ => SignalEreignis::Unbekannt(op),
    };

    Ok(ereignis)
}

// ---------------------------------------------------------------------------
// Ausgehende Nachrichten (Client -> Server)
// ---------------------------------------------------------------------------

fn ausgehend<T: Serialize>(op: Opcode, payload: &T) -> Result<String, ProtokollFehler> {
    let d = serde_json::to_value(payload).map_err(ProtokollFehler::Serialisierung)?;
    serde_json::to_string(&SignalNachricht { op: op as u8, d })
        .map_err(ProtokollFehler::Serialisierung)
}

/// Baut die Identify-Nachricht (Op 0)
pub fn identify(
    room_id: &RoomId,
    user_id: &UserId,
    session_id: &str,
    token: &str,
) -> Result<String, ProtokollFehler> {
    ausgehend(
        Opcode::Identify,
        &IdentifyPayload {
            room_id: room_id.clone(),
            user_id: user_id.clone(),
            session_id: session_id.to_string(),
            token: token.to_string(),
        },
    )
}

/// Baut die SelectProtocol-Nachricht (Op 1)
///
/// Adresse und Port sind auf dem Stream-Transport rein informativ und
/// werden wie im urspruenglichen Client als `0.0.0.0:0` gesendet.
pub fn select_protocol(mode: &str) -> Result<String, ProtokollFehler> {
    ausgehend(
        Opcode::SelectProtocol,
        &SelectProtocolPayload {
            protocol: "udp".to_string(),
            data: SelectProtocolDaten {
                address: "0.0.0.0".to_string(),
                port: 0,
                mode: mode.to_string(),
            },
        },
    )
}

/// Baut die Heartbeat-Nachricht (Op 3)
pub fn heartbeat(nonce: u64) -> Result<String, ProtokollFehler> {
    ausgehend(Opcode::Heartbeat, &HeartbeatPayload { nonce })
}

/// Baut die Speaking-Nachricht (Op 5)
pub fn speaking(flags: SprechFlags, ssrc: u32) -> Result<String, ProtokollFehler> {
    ausgehend(
        Opcode::Speaking,
        &SpeakingPayload {
            speaking: flags,
            delay: 0,
            ssrc,
        },
    )
}

/// Baut die ClientDisconnect-Nachricht (Op 13)
pub fn client_disconnect() -> Result<String, ProtokollFehler> {
    ausgehend(Opcode::ClientDisconnect, &serde_json::json!({}))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_round_trip() {
        for op in [0u8, 1, 2, 3, 4, 5, 6, 7, 8, 9, 11, 13] {
            let opcode = Opcode::from_u8(op).expect("Opcode muss bekannt sein");
            assert_eq!(opcode as u8, op);
        }
        assert!(Opcode::from_u8(10).is_none());
        assert!(Opcode::from_u8(200).is_none());
    }

    #[test]
    fn identify_enthaelt_session_id() {
        let json = identify(
            &RoomId::neu("raum"),
            &UserId::neu("benutzer"),
            "sitzung-123",
            "geheim",
        )
        .unwrap();
        let rahmen: SignalNachricht = serde_json::from_str(&json).unwrap();
        assert_eq!(rahmen.op, 0);
        assert_eq!(rahmen.d["session_id"], "sitzung-123");
        assert_eq!(rahmen.d["token"], "geheim");
    }

    #[test]
    fn select_protocol_form() {
        let json = select_protocol("xsalsa20_poly1305").unwrap();
        let rahmen: SignalNachricht = serde_json::from_str(&json).unwrap();
        assert_eq!(rahmen.op, 1);
        assert_eq!(rahmen.d["protocol"], "udp");
        assert_eq!(rahmen.d["data"]["address"], "0.0.0.0");
        assert_eq!(rahmen.d["data"]["port"], 0);
        assert_eq!(rahmen.d["data"]["mode"], "xsalsa20_poly1305");
    }

    #[test]
    fn heartbeat_traegt_nonce() {
        let json = heartbeat(0xDEAD_BEEF_u64).unwrap();
        let rahmen: SignalNachricht = serde_json::from_str(&json).unwrap();
        assert_eq!(rahmen.op, 3);
        assert_eq!(rahmen.d["nonce"], 0xDEAD_BEEF_u64);
    }

    #[test]
    fn speaking_mit_mikrofon_flag() {
        let json = speaking(SprechFlags::mikrofon(), 12345).unwrap();
        let rahmen: SignalNachricht = serde_json::from_str(&json).unwrap();
        assert_eq!(rahmen.op, 5);
        assert_eq!(rahmen.d["speaking"], 1);
        assert_eq!(rahmen.d["ssrc"], 12345);
        assert_eq!(rahmen.d["delay"], 0);
    }

    #[test]
    fn ready_deuten() {
        let text = r#"{"op":2,"d":{"ssrc":12345,"ip":"10.0.0.1","port":443,"modes":["xsalsa20_poly1305"],"heartbeat_interval":5000}}"#;
        match eingehende_deuten(text).unwrap() {
            SignalEreignis::Ready(ready) => {
                assert_eq!(ready.ssrc, 12345);
                assert_eq!(ready.heartbeat_interval, 5000);
                assert_eq!(ready.modes, vec!["xsalsa20_poly1305"]);
            }
            andere => panic!("Erwartet Ready, erhalten: {:?}", andere),
        }
    }

    #[test]
    fn session_describe_deuten() {
        let text = r#"{"op":4,"d":{"mode":"xsalsa20_poly1305","secret_key":"QUJD","audio_codec":"opus"}}"#;
        match eingehende_deuten(text).unwrap() {
            SignalEreignis::SessionDescribe(sd) => {
                assert_eq!(sd.mode, "xsalsa20_poly1305");
                assert_eq!(sd.audio_codec, "opus");
            }
            andere => panic!("Erwartet SessionDescribe, erhalten: {:?}", andere),
        }
    }

    #[test]
    fn user_join_und_leave_deuten() {
        let join = eingehende_deuten(r#"{"op":7,"d":{"user_id":"a","ssrc":111}}"#).unwrap();
        assert!(matches!(join, SignalEreignis::UserJoin(ref p) if p.ssrc == 111));

        let leave = eingehende_deuten(r#"{"op":8,"d":{"user_id":"a"}}"#).unwrap();
        assert!(matches!(leave, SignalEreignis::UserLeave(_)));
    }

    #[test]
    fn user_speaking_deuten() {
        let text = r#"{"op":9,"d":{"user_id":"b","ssrc":222,"speaking":1}}"#;
        match eingehende_deuten(text).unwrap() {
            SignalEreignis::UserSpeaking(p) => {
                assert!(p.speaking.hat(SprechFlags::MIKROFON));
                assert_eq!(p.ssrc, 222);
            }
            andere => panic!("Erwartet UserSpeaking, erhalten: {:?}", andere),
        }
    }

    #[test]
    fn heartbeat_ack_ohne_payload() {
        let ereignis = eingehende_deuten(r#"{"op":6,"d":{}}"#).unwrap();
        assert!(matches!(ereignis, SignalEreignis::HeartbeatAck));
    }

    #[test]
    fn unbekannter_opcode_ignoriert() {
        let ereignis = eingehende_deuten(r#"{"op":99,"d":{"x":1}}"#).unwrap();
        assert!(matches!(ereignis, SignalEreignis::Unbekannt(99)));
    }

    #[test]
    fn client_opcode_vom_server_ignoriert() {
        // Op 3 (Heartbeat) ist Client->Server; vom Server ist er unerwartet
        let ereignis = eingehende_deuten(r#"{"op":3,"d":{"nonce":1}}"#).unwrap();
        assert!(matches!(ereignis, SignalEreignis::Unbekannt(3)));
    }

    #[test]
    fn schema_fehler_ist_nicht_fatal_typ() {
        // Ready ohne Pflichtfelder -> Schema-Fehler mit Opcode
        let result = eingehende_deuten(r#"{"op":2,"d":{"ssrc":"keine-zahl"}}"#);
        assert!(matches!(
            result,
            Err(ProtokollFehler::Schema { op: 2, .. })
        ));
    }

    #[test]
    fn kaputter_rahmen_ist_rahmen_fehler() {
        let result = eingehende_deuten("kein json");
        assert!(matches!(result, Err(ProtokollFehler::Rahmen(_))));
    }

    #[test]
    fn resumed_wird_erkannt() {
        let ereignis = eingehende_deuten(r#"{"op":11,"d":{}}"#).unwrap();
        assert!(matches!(ereignis, SignalEreignis::Resumed));
    }
}
