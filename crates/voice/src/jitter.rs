//! Jitter Buffer fuer Voice-Pakete
//!
//! Ordnet eingehende Pakete einer Quelle nach Sequenznummer und haelt
//! eine Ziel-Fuelltiefe, um Netzwerk-Jitter auszugleichen. Die
//! Entscheidung pro 20 ms-Tick: Paket abspielen, Verlust verdecken
//! (PLC) oder nach zu vielen Verlusten in Folge Stille einfuegen.
//!
//! Ein Buffer pro entfernter SSRC, single-threaded verwendet
//! (Synchronisation erfolgt im Session-Aktor).

use std::collections::HashMap;
use std::time::Instant;

use funkraum_protocol::rtp::seq_diff;
use tracing::{debug, trace};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Dauer eines Frames in Millisekunden
pub const FRAME_MS: u64 = 20;

/// Konfiguration des Jitter Buffers
#[derive(Debug, Clone)]
pub struct JitterBufferConfig {
    /// Mindest-Fuellung bevor die Wiedergabe startet (Millisekunden)
    pub min_puffer_ms: u64,
    /// Maximale Fuellung; darueber wird das aelteste Paket verdraengt
    pub max_puffer_ms: u64,
    /// Maximale PLC-Frames in Folge bevor Stille eingefuegt wird
    pub max_plc_frames: u32,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        Self {
            min_puffer_ms: 60,
            max_puffer_ms: 200,
            max_plc_frames: 5,
        }
    }
}

impl JitterBufferConfig {
    fn min_pakete(&self) -> usize {
        (self.min_puffer_ms / FRAME_MS) as usize
    }

    fn max_pakete(&self) -> usize {
        (self.max_puffer_ms / FRAME_MS) as usize
    }
}

// ---------------------------------------------------------------------------
// Statistiken
// ---------------------------------------------------------------------------

/// Statistiken des Jitter Buffers (Snapshot)
#[derive(Debug, Clone, Default)]
pub struct JitterStatistik {
    /// Anzahl empfangener Pakete gesamt
    pub empfangen: u64,
    /// Anzahl regulaer abgespielter Pakete
    pub abgespielt: u64,
    /// Zu spaet eingetroffene Pakete (Reordering ueber die Abspielkante)
    pub zu_spaet: u64,
    /// Verworfene Duplikate
    pub duplikate: u64,
    /// Durch Ueberlauf verdraengte Pakete
    pub verdraengt: u64,
    /// Erzeugte PLC-Frames
    pub plc_frames: u64,
    /// Erzeugte Stille-Frames (nach zu vielen PLC in Folge)
    pub stille_frames: u64,
}

// ---------------------------------------------------------------------------
// JitterBuffer
// ---------------------------------------------------------------------------

/// Gepuffertes, noch komprimiertes Paket
#[derive(Debug, Clone)]
pub struct GepuffertesPaket {
    pub sequence: u16,
    pub timestamp: u32,
    pub payload: Vec<u8>,
    /// Monotoner Empfangszeitpunkt
    pub empfangen_um: Instant,
}

/// Ergebnis eines `pop`-Aufrufs
#[derive(Debug)]
pub enum PopErgebnis {
    /// Paket liegt vor – dekodieren und abspielen
    Paket(GepuffertesPaket),
    /// Echte Luecke – der Decoder soll einen PLC-Frame erzeugen
    Verloren,
    /// Zu viele Verluste in Folge – Stille einfuegen, Buffer fuellt
    /// sich natuerlich wieder
    Stille,
}

/// Jitter Buffer einer entfernten Quelle
pub struct JitterBuffer {
    config: JitterBufferConfig,
    /// Gepufferte Pakete nach Sequenznummer
    pakete: HashMap<u16, GepuffertesPaket>,
    /// Naechste abzuspielende Sequenznummer
    naechste_seq: Option<u16>,
    /// Zuletzt abgespielte (oder per PLC uebersprungene) Sequenznummer
    letzte_abgespielt: Option<u16>,
    /// PLC-Frames in Folge
    plc_in_folge: u32,
    /// Startgate: erst abspielen wenn die Mindest-Fuellung erreicht war
    bereit: bool,
    /// Monotone Empfangsnummer fuer deterministische Verdraengung
    naechste_empfangs_nr: u64,
    empfangs_nr: HashMap<u16, u64>,
    statistik: JitterStatistik,
}

impl JitterBuffer {
    /// Erstellt einen neuen Buffer mit gegebener Konfiguration
    pub fn neu(config: JitterBufferConfig) -> Self {
        Self {
            config,
            pakete: HashMap::new(),
            naechste_seq: None,
            letzte_abgespielt: None,
            plc_in_folge: 0,
            bereit: false,
            naechste_empfangs_nr: 0,
            empfangs_nr: HashMap::new(),
            statistik: JitterStatistik::default(),
        }
    }

    /// Erstellt einen Buffer mit Standardkonfiguration
    pub fn standard() -> Self {
        Self::neu(JitterBufferConfig::default())
    }

    /// Fuegt ein Paket ein
    ///
    /// Pakete aelter als die Abspielkante werden verworfen; beim ersten
    /// Push wird die Abspielkante auf die Paket-Sequenz gesetzt. Laeuft
    /// der Buffer ueber, wird das am laengsten gepufferte Paket
    /// verdraengt.
    pub fn push(&mut self, sequence: u16, timestamp: u32, payload: Vec<u8>) {
        self.statistik.empfangen += 1;

        match self.naechste_seq {
            None => self.naechste_seq = Some(sequence),
            // Vor dem ersten Pop ist die Kante nur vorlaeufig: kommt in
            // der Anlaufphase eine aeltere Sequenz nach, rutscht die
            // Kante nach unten statt das Paket zu verwaisen
            Some(naechste) if self.letzte_abgespielt.is_none()
                && seq_diff(sequence, naechste) < 0 =>
            {
                self.naechste_seq = Some(sequence);
            }
            _ => {}
        }

        // Hinter der Abspielkante: zu spaet
        if let Some(letzte) = self.letzte_abgespielt {
            if seq_diff(sequence, letzte.wrapping_add(1)) < 0 {
                self.statistik.zu_spaet += 1;
                trace!(sequence, "Zu spaetes Paket verworfen");
                return;
            }
        }

        if self.pakete.contains_key(&sequence) {
            self.statistik.duplikate += 1;
            return;
        }

        // Ueberlauf: am laengsten gepuffertes Paket verdraengen, damit
        // die Fuellung das Maximum nie ueberschreitet
        if self.pakete.len() >= self.config.max_pakete() {
            if let Some((&aelteste, _)) = self.empfangs_nr.iter().min_by_key(|&(_, &nr)| nr) {
                self.pakete.remove(&aelteste);
                self.empfangs_nr.remove(&aelteste);
                self.statistik.verdraengt += 1;
                debug!(sequence = aelteste, "Buffer-Ueberlauf: Paket verdraengt");
            }
        }

        self.empfangs_nr.insert(sequence, self.naechste_empfangs_nr);
        self.naechste_empfangs_nr += 1;
        self.pakete.insert(
            sequence,
            GepuffertesPaket {
                sequence,
                timestamp,
                payload,
                empfangen_um: Instant::now(),
            },
        );
    }

    /// Gibt zurueck ob die Anlauf-Fuellung erreicht ist
    pub fn is_ready(&self) -> bool {
        self.bereit || self.pakete.len() >= self.config.min_pakete()
    }

    /// Entnimmt die Entscheidung fuer den naechsten 20 ms-Tick
    ///
    /// - `None`: noch in der Anlaufphase, oder keine Luecke erkennbar
    ///   (kein spaeteres Paket gepuffert – warten statt verdecken)
    /// - `Paket`: regulaeres Abspielen, PLC-Zaehler zurueckgesetzt
    /// - `Verloren`: echte Luecke, Abspielkante rueckt vor
    /// - `Stille`: mehr als `max_plc_frames` Verluste in Folge
    pub fn pop(&mut self) -> Option<PopErgebnis> {
        if !self.bereit {
            if self.pakete.len() < self.config.min_pakete() {
                return None;
            }
            self.bereit = true;
        }

        let naechste = self.naechste_seq?;

        if let Some(paket) = self.pakete.remove(&naechste) {
            self.empfangs_nr.remove(&naechste);
            self.plc_in_folge = 0;
            self.letzte_abgespielt = Some(naechste);
            self.naechste_seq = Some(naechste.wrapping_add(1));
            self.statistik.abgespielt += 1;
            return Some(PopErgebnis::Paket(paket));
        }

        // Keine spaetere Sequenz gepuffert: kein Beleg fuer Verlust,
        // dieser Tick bleibt leer
        if !self.pakete.keys().any(|&s| seq_diff(s, naechste) > 0) {
            return None;
        }

        // Echte Luecke – Kante vorruecken und verdecken
        self.plc_in_folge += 1;
        self.letzte_abgespielt = Some(naechste);
        self.naechste_seq = Some(naechste.wrapping_add(1));

        if self.plc_in_folge > self.config.max_plc_frames {
            self.statistik.stille_frames += 1;
            trace!(sequence = naechste, "Stille statt PLC");
            Some(PopErgebnis::Stille)
        } else {
            self.statistik.plc_frames += 1;
            trace!(sequence = naechste, "PLC-Frame fuer Luecke");
            Some(PopErgebnis::Verloren)
        }
    }

    /// Setzt den Buffer vollstaendig zurueck (z.B. nach langer Stille)
    pub fn reset(&mut self) {
        self.pakete.clear();
        self.empfangs_nr.clear();
        self.naechste_seq = None;
        self.letzte_abgespielt = None;
        self.plc_in_folge = 0;
        self.bereit = false;
    }

    /// Aktuelle Fuellung in Paketen
    pub fn fuellstand(&self) -> usize {
        self.pakete.len()
    }

    /// PLC-Frames in Folge seit dem letzten regulaeren Paket
    pub fn plc_in_folge(&self) -> u32 {
        self.plc_in_folge
    }

    /// Gibt die aktuellen Statistiken zurueck
    pub fn statistik(&self) -> &JitterStatistik {
        &self.statistik
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Kleine Konfiguration ohne Anlauf-Gate fuer direkte Pop-Tests
    fn sofort_config() -> JitterBufferConfig {
        JitterBufferConfig {
            min_puffer_ms: 0,
            max_puffer_ms: 200,
            max_plc_frames: 5,
        }
    }

    fn nutzdaten(n: u8) -> Vec<u8> {
        vec![n; 40]
    }

    #[test]
    fn in_reihenfolge_abgespielt() {
        let mut buf = JitterBuffer::neu(sofort_config());
        for i in 0..5u16 {
            buf.push(i, u32::from(i) * 960, nutzdaten(i as u8));
        }
        for i in 0..5u16 {
            match buf.pop() {
                Some(PopErgebnis::Paket(p)) => assert_eq!(p.sequence, i),
                andere => panic!("Erwartet Paket {}, erhalten {:?}", i, andere),
            }
        }
        assert!(buf.pop().is_none());
        assert_eq!(buf.statistik().abgespielt, 5);
    }

    #[test]
    fn vertauschte_reihenfolge_sortiert() {
        let mut buf = JitterBuffer::neu(sofort_config());
        for seq in [1u16, 2, 4, 3, 5] {
            buf.push(seq, u32::from(seq) * 960, nutzdaten(seq as u8));
        }
        let mut reihenfolge = Vec::new();
        while let Some(PopErgebnis::Paket(p)) = buf.pop() {
            reihenfolge.push(p.sequence);
        }
        assert_eq!(reihenfolge, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn erste_sequenz_seedet_abspielkante() {
        let mut buf = JitterBuffer::neu(sofort_config());
        buf.push(1000, 0, nutzdaten(1));
        match buf.pop() {
            Some(PopErgebnis::Paket(p)) => assert_eq!(p.sequence, 1000),
            andere => panic!("Erwartet Paket 1000, erhalten {:?}", andere),
        }
    }

    #[test]
    fn anlauf_gate_haelt_zurueck() {
        // 60 ms / 20 ms = 3 Pakete Mindest-Fuellung
        let mut buf = JitterBuffer::standard();
        buf.push(0, 0, nutzdaten(0));
        assert!(!buf.is_ready());
        assert!(buf.pop().is_none());
        buf.push(1, 960, nutzdaten(1));
        assert!(buf.pop().is_none());
        buf.push(2, 1920, nutzdaten(2));
        assert!(buf.is_ready());
        assert!(matches!(buf.pop(), Some(PopErgebnis::Paket(_))));
        // Einmal angelaufen bleibt das Gate offen
        assert!(matches!(buf.pop(), Some(PopErgebnis::Paket(_))));
        assert!(matches!(buf.pop(), Some(PopErgebnis::Paket(_))));
    }

    #[test]
    fn luecke_liefert_genau_einen_plc() {
        let mut buf = JitterBuffer::neu(sofort_config());
        // Sequenz 2 fehlt
        for seq in [0u16, 1, 3, 4] {
            buf.push(seq, u32::from(seq) * 960, nutzdaten(seq as u8));
        }
        assert!(matches!(buf.pop(), Some(PopErgebnis::Paket(_))));
        assert!(matches!(buf.pop(), Some(PopErgebnis::Paket(_))));
        // Luecke bei 2
        assert!(matches!(buf.pop(), Some(PopErgebnis::Verloren)));
        assert_eq!(buf.plc_in_folge(), 1);
        // Naechstes regulaeres Paket setzt den Zaehler zurueck
        assert!(matches!(buf.pop(), Some(PopErgebnis::Paket(_))));
        assert_eq!(buf.plc_in_folge(), 0);
        assert_eq!(buf.statistik().plc_frames, 1);
    }

    #[test]
    fn keine_spaetere_sequenz_heisst_warten() {
        let mut buf = JitterBuffer::neu(sofort_config());
        buf.push(0, 0, nutzdaten(0));
        assert!(matches!(buf.pop(), Some(PopErgebnis::Paket(_))));
        // Buffer leer: kein Beleg fuer Verlust -> None statt PLC
        assert!(buf.pop().is_none());
        assert_eq!(buf.statistik().plc_frames, 0);
    }

    #[test]
    fn stille_nach_zu_vielen_plc() {
        let mut buf = JitterBuffer::neu(sofort_config());
        buf.push(0, 0, nutzdaten(0));
        assert!(matches!(buf.pop(), Some(PopErgebnis::Paket(_))));
        // Grosse Luecke: nur Sequenz 20 kommt noch an
        buf.push(20, 20 * 960, nutzdaten(1));
        // 5 PLC-Frames, danach Stille
        for _ in 0..5 {
            assert!(matches!(buf.pop(), Some(PopErgebnis::Verloren)));
        }
        assert!(matches!(buf.pop(), Some(PopErgebnis::Stille)));
        assert!(matches!(buf.pop(), Some(PopErgebnis::Stille)));
        assert_eq!(buf.statistik().stille_frames, 2);
    }

    #[test]
    fn zu_spaetes_paket_verworfen() {
        let mut buf = JitterBuffer::neu(sofort_config());
        buf.push(5, 0, nutzdaten(5));
        assert!(matches!(buf.pop(), Some(PopErgebnis::Paket(_))));
        // Sequenz 3 liegt hinter der Abspielkante
        buf.push(3, 0, nutzdaten(3));
        assert_eq!(buf.fuellstand(), 0);
        assert_eq!(buf.statistik().zu_spaet, 1);
    }

    #[test]
    fn duplikate_verworfen() {
        let mut buf = JitterBuffer::neu(sofort_config());
        buf.push(1, 960, nutzdaten(1));
        buf.push(1, 960, nutzdaten(1));
        buf.push(1, 960, nutzdaten(1));
        assert_eq!(buf.fuellstand(), 1);
        assert_eq!(buf.statistik().duplikate, 2);
    }

    #[test]
    fn ueberlauf_verdraengt_am_laengsten_gepuffertes() {
        // max 200 ms / 20 ms = 10 Pakete
        let mut buf = JitterBuffer::neu(sofort_config());
        for seq in 0..=10u16 {
            buf.push(seq, u32::from(seq) * 960, nutzdaten(seq as u8));
        }
        // Sequenz 0 wurde als aeltester Eintrag verdraengt; die
        // Fuellung bleibt auf dem Maximum
        assert_eq!(buf.statistik().verdraengt, 1);
        assert_eq!(buf.fuellstand(), 10);
        match buf.pop() {
            // Luecke bei 0 -> PLC, danach geht es bei 1 weiter
            Some(PopErgebnis::Verloren) => {}
            andere => panic!("Erwartet Verloren fuer Seq 0, erhalten {:?}", andere),
        }
        match buf.pop() {
            Some(PopErgebnis::Paket(p)) => assert_eq!(p.sequence, 1),
            andere => panic!("Erwartet Paket 1, erhalten {:?}", andere),
        }
    }

    #[test]
    fn anlauf_reordering_rutscht_kante_nach_unten() {
        let mut buf = JitterBuffer::neu(sofort_config());
        // Vertauschter Stream-Anfang: 5 kommt vor 3 und 4 an
        buf.push(5, 5 * 960, nutzdaten(5));
        buf.push(3, 3 * 960, nutzdaten(3));
        buf.push(4, 4 * 960, nutzdaten(4));

        let mut reihenfolge = Vec::new();
        while let Some(ergebnis) = buf.pop() {
            match ergebnis {
                PopErgebnis::Paket(p) => reihenfolge.push(p.sequence),
                andere => panic!("Kein PLC erwartet, erhalten {:?}", andere),
            }
        }
        assert_eq!(reihenfolge, vec![3, 4, 5]);
        assert_eq!(buf.statistik().zu_spaet, 0);
    }

    #[test]
    fn nach_dem_letzten_paket_wird_gewartet() {
        let mut buf = JitterBuffer::neu(sofort_config());
        buf.push(0, 0, nutzdaten(0));
        assert!(matches!(buf.pop(), Some(PopErgebnis::Paket(_))));

        // Grosse Luecke vor dem letzten Paket des Sprechers
        buf.push(10, 10 * 960, nutzdaten(1));
        for _ in 1..10u16 {
            assert!(matches!(
                buf.pop(),
                Some(PopErgebnis::Verloren) | Some(PopErgebnis::Stille)
            ));
        }
        match buf.pop() {
            Some(PopErgebnis::Paket(p)) => assert_eq!(p.sequence, 10),
            andere => panic!("Erwartet Paket 10, erhalten {:?}", andere),
        }
        // Danach ist der Buffer leer: warten statt endlos Stille
        assert!(buf.pop().is_none());
        assert!(buf.pop().is_none());
    }

    #[test]
    fn wrap_around_der_sequenznummern() {
        let mut buf = JitterBuffer::neu(sofort_config());
        buf.push(65534, 0, nutzdaten(1));
        buf.push(65535, 960, nutzdaten(2));
        buf.push(0, 1920, nutzdaten(3));
        buf.push(1, 2880, nutzdaten(4));

        let mut reihenfolge = Vec::new();
        while let Some(PopErgebnis::Paket(p)) = buf.pop() {
            reihenfolge.push(p.sequence);
        }
        assert_eq!(reihenfolge, vec![65534, 65535, 0, 1]);
    }

    #[test]
    fn reset_loescht_alles() {
        let mut buf = JitterBuffer::neu(sofort_config());
        for seq in 0..4u16 {
            buf.push(seq, u32::from(seq) * 960, nutzdaten(seq as u8));
        }
        buf.pop();
        buf.reset();
        assert_eq!(buf.fuellstand(), 0);
        assert_eq!(buf.plc_in_folge(), 0);
        // Neue Erstsequenz seedet wieder
        buf.push(500, 0, nutzdaten(9));
        match buf.pop() {
            Some(PopErgebnis::Paket(p)) => assert_eq!(p.sequence, 500),
            andere => panic!("Erwartet Paket 500, erhalten {:?}", andere),
        }
    }

    #[test]
    fn permutation_innerhalb_der_tiefe_vollstaendig_geordnet() {
        let mut buf = JitterBuffer::neu(sofort_config());
        // Vollstaendige, aber permutierte Folge mit Spreizung < max
        for seq in [2u16, 0, 1, 5, 3, 4, 7, 6] {
            buf.push(seq, u32::from(seq) * 960, nutzdaten(seq as u8));
        }
        let mut reihenfolge = Vec::new();
        while let Some(ergebnis) = buf.pop() {
            match ergebnis {
                PopErgebnis::Paket(p) => reihenfolge.push(p.sequence),
                andere => panic!("Kein PLC erwartet, erhalten {:?}", andere),
            }
        }
        assert_eq!(reihenfolge, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }
}
