//! Module `atr` decodes an ISO 7816-3 Answer To Reset.
//!
//! The decoder is a state machine that is fed one byte at a time and can
//! always say how many more bytes the structure demands, so that a caller
//! reading from a card never asks for more than the card will send:
//!
//! ```rust,ignore
//! let mut parser = AtrParser::new(AtrOptions::default());
//! while parser.needed() > 0 {
//!     let mut buf = [0u8; 15];
//!     let buf = &mut buf[..parser.needed()];
//!     card.read(buf)?;
//!     for b in buf.iter() {
//!         parser.push(*b);
//!     }
//! }
//! let atr = parser.finish();
//! ```
//!
//! For an ATR that was captured beforehand, `Atr::parse` runs the same
//! machine over a buffer.
//!
//! Nothing here fails: malformed input is described by the `Anomaly`
//! values recorded in the resulting `Atr`.

use arrayvec::ArrayVec;
use core::fmt;

/// An ATR never has more than this many bytes, TS and TCK included.
pub const MAX_ATR_LEN: usize = 33;

/// K, the low nibble of T0, is at most 15.
pub const MAX_HISTORICAL: usize = 15;

const MAX_GROUPS: usize = 32;
const MAX_ANOMALIES: usize = 8;

/// `Convention` is the bit encoding announced by TS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    /// Bytes are used as received.
    Direct,
    /// Every bit is inverted and the bit order is reversed.
    Inverse,
}

impl Default for Convention {
    fn default() -> Self {
        Convention::Direct
    }
}

impl Convention {
    /// `from_ts` recognizes the standard TS values. `0x03` is how an
    /// inverse-convention `0x3F` looks to a direct-convention receiver.
    pub fn from_ts(ts: u8) -> Option<Convention> {
        match ts {
            0x3b => Some(Convention::Direct),
            0x3f | 0x03 => Some(Convention::Inverse),
            _ => None,
        }
    }

    /// `apply` converts a byte between the wire encoding and its value.
    /// Applying it twice gives back the original byte.
    pub fn apply(self, b: u8) -> u8 {
        match self {
            Convention::Direct => b,
            Convention::Inverse => (!b).reverse_bits(),
        }
    }
}

/// An entry of the Fi, Di and f(max) tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableEntry {
    Value(u16),
    /// Reserved for future use: the index is not a valid parameter.
    Rfu,
}

impl TableEntry {
    pub fn value(self) -> Option<u16> {
        match self {
            TableEntry::Value(v) => Some(v),
            TableEntry::Rfu => None,
        }
    }
}

impl fmt::Display for TableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableEntry::Value(v) => write!(f, "{}", v),
            TableEntry::Rfu => write!(f, "RFU"),
        }
    }
}

use TableEntry::{Rfu, Value};

/// Clock rate conversion integer, indexed by the high nibble of TA1.
pub const FI_TABLE: [TableEntry; 16] = [
    Value(372),
    Value(372),
    Value(558),
    Value(744),
    Value(1116),
    Value(1488),
    Value(1860),
    Rfu,
    Rfu,
    Value(512),
    Value(768),
    Value(1024),
    Value(1536),
    Value(2048),
    Rfu,
    Rfu,
];

/// Baud rate adjustment integer, indexed by the low nibble of TA1.
pub const DI_TABLE: [TableEntry; 16] = [
    Rfu,
    Value(1),
    Value(2),
    Value(4),
    Value(8),
    Value(16),
    Value(32),
    Value(64),
    Value(12),
    Value(20),
    Rfu,
    Rfu,
    Rfu,
    Rfu,
    Rfu,
    Rfu,
];

/// Maximum clock frequency in kHz, indexed like `FI_TABLE`.
pub const FMAX_KHZ_TABLE: [TableEntry; 16] = [
    Value(4000),
    Value(5000),
    Value(6000),
    Value(8000),
    Value(12000),
    Value(16000),
    Value(20000),
    Rfu,
    Rfu,
    Value(5000),
    Value(7500),
    Value(10000),
    Value(15000),
    Value(20000),
    Rfu,
    Rfu,
];

/// `fi_index` finds the first index of `FI_TABLE` holding `fi`.
pub fn fi_index(fi: u16) -> Option<u8> {
    FI_TABLE
        .iter()
        .position(|e| *e == Value(fi))
        .map(|i| i as u8)
}

/// `di_index` finds the index of `DI_TABLE` holding `di`.
pub fn di_index(di: u16) -> Option<u8> {
    DI_TABLE
        .iter()
        .position(|e| *e == Value(di))
        .map(|i| i as u8)
}

/// `ClockRate` is the content of TA1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockRate {
    pub fi_index: u8,
    pub di_index: u8,
}

/// The values that apply when TA1 is absent: Fi = 372, Di = 1.
pub const DEFAULT_CLOCK_RATE: ClockRate = ClockRate {
    fi_index: 1,
    di_index: 1,
};

impl From<u8> for ClockRate {
    fn from(ta1: u8) -> Self {
        ClockRate {
            fi_index: ta1 >> 4,
            di_index: ta1 & 0x0f,
        }
    }
}

impl ClockRate {
    pub fn fi(&self) -> TableEntry {
        FI_TABLE[(self.fi_index & 0x0f) as usize]
    }

    pub fn di(&self) -> TableEntry {
        DI_TABLE[(self.di_index & 0x0f) as usize]
    }

    /// Clock cycles per elementary time unit, Fi / Di. `None` when either
    /// index is reserved.
    pub fn cycles_per_etu(&self) -> Option<u16> {
        match (self.fi(), self.di()) {
            (Value(fi), Value(di)) => Some(fi / di),
            _ => None,
        }
    }

    pub fn max_clock_khz(&self) -> TableEntry {
        FMAX_KHZ_TABLE[(self.fi_index & 0x0f) as usize]
    }
}

/// One group of interface bytes. Group `i` holds TAi, TBi, TCi and TDi.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterfaceGroup {
    pub index: u8,
    pub ta: Option<u8>,
    pub tb: Option<u8>,
    pub tc: Option<u8>,
    pub td: Option<u8>,
}

impl InterfaceGroup {
    /// The protocol announced by TDi, for the bytes of group `i + 1`.
    pub fn protocol(&self) -> Option<u8> {
        self.td.map(|td| td & 0x0f)
    }

    fn set(&mut self, bit: u8, value: u8) {
        match bit {
            0 => self.ta = Some(value),
            1 => self.tb = Some(value),
            2 => self.tc = Some(value),
            _ => self.td = Some(value),
        }
    }
}

/// `Anomaly` is a recoverable problem found while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    /// TS is neither `0x3B` nor `0x3F` (nor the raw `0x03`).
    NonStandardTs(u8),
    /// The byte after TS repeated TS and was dropped.
    EchoedTs,
    /// TA1 selects a reserved Fi.
    ReservedFi(u8),
    /// TA1 selects a reserved Di.
    ReservedDi(u8),
    /// The input ended while the structure demanded at least `missing`
    /// more bytes.
    Truncated { missing: usize },
    /// The structure demanded more than 33 bytes.
    Overlong,
    /// Bytes were left over after a complete ATR.
    TrailingBytes(usize),
    /// TCK does not match the XOR of T0 through the last historical byte.
    TckMismatch { expected: u8, found: u8 },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::NonStandardTs(ts) => write!(f, "non-standard TS {:#04x}", ts),
            Anomaly::EchoedTs => write!(f, "TS echoed before T0, dropped"),
            Anomaly::ReservedFi(i) => write!(f, "TA1 selects reserved Fi index {}", i),
            Anomaly::ReservedDi(i) => write!(f, "TA1 selects reserved Di index {}", i),
            Anomaly::Truncated { missing } => {
                write!(f, "truncated, at least {} more byte(s) expected", missing)
            }
            Anomaly::Overlong => write!(f, "longer than {} bytes", MAX_ATR_LEN),
            Anomaly::TrailingBytes(n) => write!(f, "{} trailing byte(s) after the ATR", n),
            Anomaly::TckMismatch { expected, found } => {
                write!(f, "TCK is {:#04x}, expected {:#04x}", found, expected)
            }
        }
    }
}

/// What to do with a TS that is not one of the standard values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownTs {
    /// Record `Anomaly::NonStandardTs` and keep decoding as direct
    /// convention.
    AssumeDirect,
    /// Record `Anomaly::NonStandardTs` and stop.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtrOptions {
    pub unknown_ts: UnknownTs,
    /// Drop a copy of TS received right after TS. Some readers see the
    /// first byte twice.
    pub skip_echoed_ts: bool,
}

impl Default for AtrOptions {
    fn default() -> Self {
        AtrOptions {
            unknown_ts: UnknownTs::AssumeDirect,
            skip_echoed_ts: false,
        }
    }
}

/// `CardMode` is what the presence of TA2 says about the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardMode {
    /// No TA2: the card accepts a PPS exchange.
    Negotiable,
    /// TA2 present: the card works only with `protocol`.
    Specific { protocol: u8, can_change: bool },
}

/// `ClockStop` is the first TAi (i >= 3) after T=15 was announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockStop {
    /// Clock stop indicator X, bits 8 and 7.
    pub x: u8,
    /// Class indicator Y, bits 6 to 1.
    pub y: u8,
}

/// `Atr` is a decoded Answer To Reset. It does not change once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atr {
    raw: ArrayVec<u8, MAX_ATR_LEN>,
    ts: Option<u8>,
    convention: Convention,
    t0: Option<u8>,
    groups: ArrayVec<InterfaceGroup, MAX_GROUPS>,
    historical: ArrayVec<u8, MAX_HISTORICAL>,
    tck: Option<u8>,
    tck_required: bool,
    anomalies: ArrayVec<Anomaly, MAX_ANOMALIES>,
}

impl Atr {
    fn empty() -> Self {
        Atr {
            raw: ArrayVec::new(),
            ts: None,
            convention: Convention::Direct,
            t0: None,
            groups: ArrayVec::new(),
            historical: ArrayVec::new(),
            tck: None,
            tck_required: false,
            anomalies: ArrayVec::new(),
        }
    }

    /// `parse` decodes a captured ATR. Bytes after TS must already be
    /// converted to their values, as `Smartcard::read_atr` does.
    pub fn parse(bytes: &[u8], options: AtrOptions) -> Atr {
        let mut parser = AtrParser::new(options);
        let mut rest = bytes;
        while let Some((b, tail)) = rest.split_first() {
            if parser.is_done() {
                break;
            }
            parser.push(*b);
            rest = tail;
        }

        let stopped = parser.atr.has_anomaly(|a| {
            matches!(a, Anomaly::Overlong) || matches!(a, Anomaly::NonStandardTs(_))
        });
        if parser.is_done() && !rest.is_empty() && !stopped {
            parser.atr.note(Anomaly::TrailingBytes(rest.len()));
        }
        parser.finish()
    }

    fn note(&mut self, anomaly: Anomaly) {
        log::warn!("ATR: {}", anomaly);
        let _ = self.anomalies.try_push(anomaly);
    }

    fn has_anomaly<F: Fn(&Anomaly) -> bool>(&self, f: F) -> bool {
        self.anomalies.iter().any(f)
    }

    /// The bytes that make up the ATR: TS as received, the rest decoded.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn ts(&self) -> Option<u8> {
        self.ts
    }

    pub fn convention(&self) -> Convention {
        self.convention
    }

    pub fn t0(&self) -> Option<u8> {
        self.t0
    }

    /// K, the number of historical bytes announced by T0.
    pub fn historical_len(&self) -> usize {
        self.t0.map_or(0, |t0| (t0 & 0x0f) as usize)
    }

    pub fn groups(&self) -> &[InterfaceGroup] {
        &self.groups
    }

    /// `group` returns interface group `index`, counting from 1.
    pub fn group(&self, index: u8) -> Option<&InterfaceGroup> {
        self.groups.iter().find(|g| g.index == index)
    }

    pub fn historical(&self) -> &[u8] {
        &self.historical
    }

    pub fn tck(&self) -> Option<u8> {
        self.tck
    }

    /// Whether some TD byte announced a protocol other than T=0, which
    /// makes TCK mandatory.
    pub fn tck_required(&self) -> bool {
        self.tck_required
    }

    /// `Some(true)` when TCK is present and matches.
    pub fn tck_valid(&self) -> Option<bool> {
        self.tck.map(|_| {
            !self.has_anomaly(|a| matches!(a, Anomaly::TckMismatch { .. }))
        })
    }

    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    /// Whether every byte demanded by the structure was received.
    pub fn is_complete(&self) -> bool {
        self.t0.is_some()
            && !self.has_anomaly(|a| {
                matches!(a, Anomaly::Truncated { .. }) || matches!(a, Anomaly::Overlong)
            })
    }

    /// The protocols announced by the TD bytes, in order.
    pub fn protocols(&self) -> impl Iterator<Item = u8> + '_ {
        self.groups.iter().filter_map(|g| g.protocol())
    }

    /// The first protocol offered, T=0 when no TD byte is present.
    pub fn first_protocol(&self) -> u8 {
        self.protocols().next().unwrap_or(0)
    }

    pub fn clock_rate(&self) -> ClockRate {
        self.group(1)
            .and_then(|g| g.ta)
            .map(ClockRate::from)
            .unwrap_or(DEFAULT_CLOCK_RATE)
    }

    /// Extra guard time integer N from TC1.
    pub fn extra_guard_time(&self) -> u8 {
        self.group(1).and_then(|g| g.tc).unwrap_or(0)
    }

    pub fn card_mode(&self) -> CardMode {
        match self.group(2).and_then(|g| g.ta) {
            Some(ta2) => CardMode::Specific {
                protocol: ta2 & 0x0f,
                can_change: ta2 & 0x80 == 0,
            },
            None => CardMode::Negotiable,
        }
    }

    pub fn clock_stop(&self) -> Option<ClockStop> {
        self.groups
            .windows(2)
            .filter(|w| w[1].index >= 3 && w[0].protocol() == Some(15))
            .find_map(|w| w[1].ta)
            .map(|ta| ClockStop {
                x: ta >> 6,
                y: ta & 0x3f,
            })
    }
}

fn group_label(bit: u8) -> char {
    match bit {
        0 => 'A',
        1 => 'B',
        2 => 'C',
        _ => 'D',
    }
}

impl fmt::Display for Atr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ts {
            Some(ts) => {
                let conv = match self.convention {
                    Convention::Direct => "direct",
                    Convention::Inverse => "inverse",
                };
                writeln!(f, "TS:  {:#04x}, convention {}", ts, conv)?;
            }
            None => writeln!(f, "TS:  absent")?,
        }
        if let Some(t0) = self.t0 {
            writeln!(f, "T0:  {:#04x}, K={}", t0, t0 & 0x0f)?;
        }

        let mut protocol = 0;
        for g in self.groups.iter() {
            let bytes = [g.ta, g.tb, g.tc, g.td];
            for (bit, b) in bytes.iter().enumerate() {
                let b = match b {
                    Some(b) => *b,
                    None => {
                        if g.index == 2 && bit == 0 {
                            writeln!(f, "TA2: absent, card in negotiable mode")?;
                        }
                        continue;
                    }
                };
                write!(f, "T{}{}: {:#04x}", group_label(bit as u8), g.index, b)?;
                match (g.index, bit) {
                    (1, 0) => {
                        let cr = ClockRate::from(b);
                        write!(f, ", Fi={}, Di={}", cr.fi(), cr.di())?;
                        if let Some(e) = cr.cycles_per_etu() {
                            write!(f, ", {} cycles/ETU", e)?;
                        }
                        write!(f, ", f(max)={} kHz", cr.max_clock_khz())?;
                    }
                    (1, 2) => write!(f, ", extra guard time N={}", b)?,
                    (2, 0) => write!(f, ", card in specific mode, T={}", b & 0x0f)?,
                    (i, 0) if i >= 3 && protocol == 15 => {
                        write!(f, ", X={}, Y={}", b >> 6, b & 0x3f)?
                    }
                    (_, 3) => {
                        protocol = b & 0x0f;
                        write!(f, ", protocol T={}", protocol)?;
                    }
                    _ => (),
                }
                writeln!(f)?;
            }
        }
        if self.t0.is_some() && self.group(2).is_none() {
            writeln!(f, "TA2: absent, card in negotiable mode")?;
        }

        if !self.historical.is_empty() {
            write!(f, "Historical bytes:")?;
            for b in self.historical.iter() {
                write!(f, " {:02x}", b)?;
            }
            writeln!(f)?;
        }
        if let Some(tck) = self.tck {
            let state = if self.tck_valid() == Some(true) {
                "valid"
            } else {
                "invalid"
            };
            writeln!(f, "TCK: {:#04x} ({})", tck, state)?;
        }
        for a in self.anomalies.iter() {
            writeln!(f, "Anomaly: {}", a)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ts,
    T0,
    /// Reading group `index`; `pending` holds the presence bits (TA, TB,
    /// TC, TD from bit 0) of the bytes not yet received.
    Group { index: u8, pending: u8 },
    Historical { remaining: u8 },
    Tck,
    Done,
}

/// `AtrParser` decodes an ATR one byte at a time.
#[derive(Debug, Clone)]
pub struct AtrParser {
    options: AtrOptions,
    state: State,
    atr: Atr,
    checksum: u8,
    echo_checked: bool,
}

impl AtrParser {
    pub fn new(options: AtrOptions) -> Self {
        AtrParser {
            options,
            state: State::Ts,
            atr: Atr::empty(),
            checksum: 0,
            echo_checked: false,
        }
    }

    /// `needed` is the number of bytes the current field takes: K for the
    /// historical bytes, 1 for every other field, 0 once the ATR is
    /// complete.
    pub fn needed(&self) -> usize {
        match self.state {
            State::Historical { remaining } => remaining as usize,
            State::Done => 0,
            _ => 1,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// The convention announced by TS, direct until TS was seen.
    pub fn convention(&self) -> Convention {
        self.atr.convention
    }

    /// A lower bound of the bytes still expected.
    fn missing(&self) -> usize {
        let k = self.atr.historical_len();
        let tck = self.atr.tck_required as usize;
        match self.state {
            State::Ts => 2,
            State::T0 => 1,
            State::Group { pending, .. } => pending.count_ones() as usize + k + tck,
            State::Historical { remaining } => remaining as usize + tck,
            State::Tck => 1,
            State::Done => 0,
        }
    }

    /// `push` consumes the next byte. TS is expected as received, later
    /// bytes already converted with `convention()`. Bytes pushed after the
    /// ATR is complete are ignored.
    pub fn push(&mut self, byte: u8) {
        if self.state == State::Done {
            log::debug!("ATR: ignoring {:#04x} after the end", byte);
            return;
        }
        if self.atr.raw.is_full() {
            self.atr.note(Anomaly::Overlong);
            self.state = State::Done;
            return;
        }

        match self.state {
            State::Ts => self.push_ts(byte),
            State::T0 => self.push_t0(byte),
            State::Group { index, pending } => self.push_interface(index, pending, byte),
            State::Historical { remaining } => {
                self.record(byte);
                let _ = self.atr.historical.try_push(byte);
                if remaining > 1 {
                    self.state = State::Historical {
                        remaining: remaining - 1,
                    };
                } else {
                    self.after_historical();
                }
            }
            State::Tck => {
                let _ = self.atr.raw.try_push(byte);
                self.atr.tck = Some(byte);
                if byte != self.checksum {
                    self.atr.note(Anomaly::TckMismatch {
                        expected: self.checksum,
                        found: byte,
                    });
                }
                self.set_state(State::Done);
            }
            State::Done => (),
        }
    }

    fn record(&mut self, byte: u8) {
        let _ = self.atr.raw.try_push(byte);
        self.checksum ^= byte;
    }

    fn set_state(&mut self, state: State) {
        log::debug!("ATR: {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn push_ts(&mut self, ts: u8) {
        let _ = self.atr.raw.try_push(ts);
        self.atr.ts = Some(ts);
        match Convention::from_ts(ts) {
            Some(conv) => self.atr.convention = conv,
            None => {
                self.atr.note(Anomaly::NonStandardTs(ts));
                if self.options.unknown_ts == UnknownTs::Reject {
                    self.set_state(State::Done);
                    return;
                }
            }
        }
        self.set_state(State::T0);
    }

    fn push_t0(&mut self, t0: u8) {
        // T0 arrives converted while TS is kept raw.
        let echoed = self.atr.ts.map(|ts| self.atr.convention.apply(ts));
        if self.options.skip_echoed_ts && !self.echo_checked && Some(t0) == echoed {
            self.echo_checked = true;
            self.atr.note(Anomaly::EchoedTs);
            return;
        }

        self.record(t0);
        self.atr.t0 = Some(t0);
        let y1 = t0 >> 4;
        if y1 != 0 {
            self.start_group(1, y1);
        } else {
            self.after_groups();
        }
    }

    fn start_group(&mut self, index: u8, mask: u8) {
        let _ = self.atr.groups.try_push(InterfaceGroup {
            index,
            ..InterfaceGroup::default()
        });
        self.set_state(State::Group {
            index,
            pending: mask,
        });
    }

    fn push_interface(&mut self, index: u8, pending: u8, byte: u8) {
        self.record(byte);
        let bit = pending.trailing_zeros() as u8;
        if let Some(g) = self.atr.groups.last_mut() {
            g.set(bit, byte);
        }

        if index == 1 && bit == 0 {
            let cr = ClockRate::from(byte);
            if cr.fi() == Rfu {
                self.atr.note(Anomaly::ReservedFi(cr.fi_index));
            }
            if cr.di() == Rfu {
                self.atr.note(Anomaly::ReservedDi(cr.di_index));
            }
        }

        if bit == 3 {
            if byte & 0x0f != 0 {
                self.atr.tck_required = true;
            }
            let next = byte >> 4;
            if next != 0 {
                self.start_group(index + 1, next);
            } else {
                self.after_groups();
            }
            return;
        }

        let pending = pending & !(1 << bit);
        if pending != 0 {
            self.state = State::Group { index, pending };
        } else {
            self.after_groups();
        }
    }

    fn after_groups(&mut self) {
        let k = self.atr.historical_len() as u8;
        if k > 0 {
            self.set_state(State::Historical { remaining: k });
        } else {
            self.after_historical();
        }
    }

    fn after_historical(&mut self) {
        if self.atr.tck_required {
            self.set_state(State::Tck);
        } else {
            self.set_state(State::Done);
        }
    }

    /// `finish` ends decoding and returns the report, recording
    /// `Anomaly::Truncated` when the ATR is incomplete.
    pub fn finish(mut self) -> Atr {
        let missing = self.missing();
        if missing > 0 {
            self.atr.note(Anomaly::Truncated { missing });
        }
        self.atr
    }
}
