//! Debug register file and its change events.
//!
//! Every register has an eight-character ASCII name packed big-endian into a
//! `u64`, the form debug hooks exchange across the ABI. After each tick the core
//! diffs the file against what it last published and reports the changes.

use std::fmt;

use log::info;
use smallvec::SmallVec;
use thiserror::Error;

/// Eight ASCII bytes packed big-endian, padded with NUL or spaces.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterName(u64);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegisterNameError {
    #[error("register name {0:#018x} is not printable ASCII")]
    NotAscii(u64),
}

impl RegisterName {
    pub const fn from_ascii(name: &[u8; 8]) -> Self {
        Self(u64::from_be_bytes(*name))
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    /// The name with trailing padding removed.
    pub fn as_str(&self) -> Result<String, RegisterNameError> {
        let bytes = self.0.to_be_bytes();
        let end = bytes
            .iter()
            .rposition(|b| *b != 0 && *b != b' ')
            .map_or(0, |i| i + 1);
        let trimmed = &bytes[..end];
        if !trimmed.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            return Err(RegisterNameError::NotAscii(self.0));
        }
        Ok(trimmed.iter().map(|b| char::from(*b)).collect())
    }
}

impl fmt::Debug for RegisterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Ok(name) => write!(f, "RegisterName({name})"),
            Err(_) => write!(f, "RegisterName({:#018x})", self.0),
        }
    }
}

macro_rules! registers {
    ($($variant:ident => $name:literal,)*) => {
        /// Registers the endpoint maintains.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum Register {
            $($variant,)*
        }

        impl Register {
            pub const ALL: &'static [Register] = &[$(Register::$variant,)*];

            pub const fn name(self) -> RegisterName {
                match self {
                    $(Register::$variant => RegisterName::from_ascii($name),)*
                }
            }
        }
    };
}

registers! {
    Ticks => b"TICKS\0\0\0",
    ConnectionState => b"CONSTATE",
    TxSeq => b"TXSEQ\0\0\0",
    RxSeq => b"RXSEQ\0\0\0",
    TheyAcked => b"THEYACK\0",
    FramesTx => b"FRAMESTX",
    FramesRx => b"FRAMESRX",
    RxMalformed => b"RXMALF\0\0",
    RxForeign => b"RXFORGN\0",
    RxOutOfOrder => b"RXOOO\0\0\0",
    RxDuplicate => b"RXDUP\0\0\0",
    RxIgnored => b"RXIGN\0\0\0",
    NaksTx => b"NAKSTX\0\0",
    NaksRx => b"NAKSRX\0\0",
    Resends => b"RESENDS\0",
    OpsCompleted => b"OPSDONE\0",
    TlUnsupported => b"TLUNSUP\0",
    EventsDropped => b"EVTDROP\0",
}

const COUNT: usize = Register::ALL.len();

impl Register {
    fn index(self) -> usize {
        self as usize
    }

    /// Registers that change on their own every tick or as a side effect of
    /// publishing are not reported as events.
    pub fn is_reported(self) -> bool {
        !matches!(self, Register::Ticks | Register::EventsDropped)
    }
}

/// A register change published after a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterEvent {
    pub name: RegisterName,
    pub register: Register,
    pub value: u64,
    pub tick: u64,
}

/// Immutable copy of the whole file, published once per tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterSnapshot {
    pub tick: u64,
    values: [u64; COUNT],
}

impl RegisterSnapshot {
    pub fn get(&self, register: Register) -> u64 {
        self.values[register.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Register, u64)> + '_ {
        Register::ALL.iter().map(|r| (*r, self.values[r.index()]))
    }
}

impl Default for RegisterSnapshot {
    fn default() -> Self {
        Self {
            tick: 0,
            values: [0; COUNT],
        }
    }
}

#[derive(Debug, Default)]
pub struct RegisterFile {
    values: [u64; COUNT],
    published: [u64; COUNT],
}

impl RegisterFile {
    pub fn get(&self, register: Register) -> u64 {
        self.values[register.index()]
    }

    pub fn set(&mut self, register: Register, value: u64) {
        self.values[register.index()] = value;
    }

    pub fn add(&mut self, register: Register, amount: u64) {
        let slot = &mut self.values[register.index()];
        *slot = slot.wrapping_add(amount);
    }

    pub fn incr(&mut self, register: Register) {
        self.add(register, 1);
    }

    /// Reported registers that changed since the previous call.
    pub fn take_changes(&mut self, tick: u64) -> SmallVec<[RegisterEvent; 8]> {
        let mut events = SmallVec::new();
        for register in Register::ALL.iter().copied() {
            let i = register.index();
            if self.values[i] == self.published[i] {
                continue;
            }
            self.published[i] = self.values[i];
            if register.is_reported() {
                events.push(RegisterEvent {
                    name: register.name(),
                    register,
                    value: self.values[i],
                    tick,
                });
            }
        }
        events
    }

    pub fn snapshot(&self, tick: u64) -> RegisterSnapshot {
        RegisterSnapshot {
            tick,
            values: self.values,
        }
    }
}

/// Renders `Reg NAME: value`.
pub fn format_register(name: RegisterName, value: u64) -> Result<String, RegisterNameError> {
    Ok(format!("Reg {}: {}", name.as_str()?, value))
}

/// Debug hook: logs and prints one register value.
pub fn print_register(name: RegisterName, value: u64) -> Result<(), RegisterNameError> {
    let line = format_register(name, value)?;
    info!("{line}");
    println!("{line}");
    Ok(())
}
