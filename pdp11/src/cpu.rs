use std::fmt;

use num_derive::{FromPrimitive, ToPrimitive};
use thiserror::Error;

use crate::flt::Fps;
use crate::mem::{ArrayMem, MemFault, Memory};

/// R6 is the stack pointer.
pub const SP: usize = 6;
/// R7 is the program counter.
pub const PC: usize = 7;

/// A general register number, as written in assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum Reg {
    R0 = 0,
    R1,
    R2,
    R3,
    R4,
    R5,
    SP,
    PC,
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reg::SP => write!(f, "sp"),
            Reg::PC => write!(f, "pc"),
            _ => write!(f, "r{}", *self as u16),
        }
    }
}

/// Hardware-level error signalled by a CPU step.
///
/// `Trap`, `Bpt`, `Iot` and `Emt` are the programmed traps; the rest are
/// faults. The CPU registers are rolled back to their pre-instruction
/// values before any of these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("invalid memory access")]
    Mem,
    #[error("invalid instruction")]
    Inst,
    #[error("trap")]
    Trap,
    #[error("bpt")]
    Bpt,
    #[error("iot")]
    Iot,
    #[error("emt")]
    Emt,
    #[error("floating point trap")]
    Fpt,
}

impl From<MemFault> for CpuError {
    fn from(_: MemFault) -> CpuError {
        CpuError::Mem
    }
}

/// The processor status word. Only the condition codes are used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ps(pub u16);

impl Ps {
    pub const C: u16 = 1 << 0; // C = 1 if result generated carry
    pub const V: u16 = 1 << 1; // V = 1 if result overflowed
    pub const Z: u16 = 1 << 2; // Z = 1 if result was zero
    pub const N: u16 = 1 << 3; // N = 1 if result was negative

    /// Returns the carry bit as a u16 that is 0 or 1.
    pub fn c(self) -> u16 {
        self.0 & 1
    }

    /// Returns the overflow bit as a u16 that is 0 or 1.
    pub fn v(self) -> u16 {
        (self.0 >> 1) & 1
    }

    /// Returns the zero bit as a u16 that is 0 or 1.
    pub fn z(self) -> u16 {
        (self.0 >> 2) & 1
    }

    /// Returns the sign (negative) bit as a u16 that is 0 or 1.
    pub fn n(self) -> u16 {
        (self.0 >> 3) & 1
    }

    fn set(&mut self, b: bool, bit: u16) {
        if b {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    pub fn set_c(&mut self, b: bool) {
        self.set(b, Ps::C)
    }

    pub fn set_v(&mut self, b: bool) {
        self.set(b, Ps::V)
    }

    pub fn set_z(&mut self, b: bool) {
        self.set(b, Ps::Z)
    }

    pub fn set_n(&mut self, b: bool) {
        self.set(b, Ps::N)
    }

    /// Sets the sign and zero bits according to the value.
    pub(crate) fn set_nz(&mut self, v: u16) {
        self.set(v == 0, Ps::Z);
        self.set(v >> 15 != 0, Ps::N);
    }

    /// Sets the sign and zero bits according to the (byte) value.
    pub(crate) fn set_nzb(&mut self, v: u8) {
        self.set(v == 0, Ps::Z);
        self.set(v >> 7 != 0, Ps::N);
    }
}

/// PS is visible in the address space at 0o177776.
pub const PS_ADDR: u16 = 0o177776;

/// A single PDP-11 CPU and its attached memory.
pub struct Cpu {
    pub r: [u16; 8],  // general registers; r[7] is the PC
    pub ps: Ps,       // processor status word
    pub fps: Fps,     // floating-point status word
    pub f: [f64; 6],  // floating-point accumulators
    pub inst: u16,    // instruction being executed (actual instruction bits)
    pub mem: ArrayMem,
}

impl Cpu {
    pub fn new(mem: ArrayMem) -> Cpu {
        Cpu {
            r: [0; 8],
            ps: Ps::default(),
            fps: Fps::default(),
            f: [0.0; 6],
            inst: 0,
            mem,
        }
    }

    /// Reads the byte at addr, honoring the PS alias.
    pub fn read_b(&self, addr: u16) -> Result<u8, CpuError> {
        if addr == PS_ADDR {
            return Ok(self.ps.0 as u8);
        }
        Ok(self.mem.read_b(addr)?)
    }

    /// Reads the word at addr, honoring the PS alias.
    pub fn read_w(&self, addr: u16) -> Result<u16, CpuError> {
        if addr == PS_ADDR {
            return Ok(self.ps.0);
        }
        Ok(self.mem.read_w(addr)?)
    }

    /// Writes the byte val to addr, honoring the PS alias.
    pub fn write_b(&mut self, addr: u16, val: u8) -> Result<(), CpuError> {
        if addr == PS_ADDR {
            self.ps = Ps(val as u16);
            return Ok(());
        }
        Ok(self.mem.write_b(addr, val)?)
    }

    /// Writes the word val to addr, honoring the PS alias.
    pub fn write_w(&mut self, addr: u16, val: u16) -> Result<(), CpuError> {
        if addr == PS_ADDR {
            self.ps = Ps(val);
            return Ok(());
        }
        Ok(self.mem.write_w(addr, val)?)
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot {
            r: self.r,
            ps: self.ps,
            fps: self.fps,
            f: self.f,
            inst: self.inst,
        }
    }

    pub(crate) fn restore(&mut self, s: Snapshot) {
        self.r = s.r;
        self.ps = s.ps;
        self.fps = s.fps;
        self.f = s.f;
        self.inst = s.inst;
    }
}

impl Default for Cpu {
    fn default() -> Cpu {
        Cpu::new(ArrayMem::new())
    }
}

/// Register-file snapshot taken at the top of each step so a failed
/// instruction can be rolled back. Memory writes are not rolled back.
#[derive(Clone, Copy)]
pub(crate) struct Snapshot {
    r: [u16; 8],
    ps: Ps,
    fps: Fps,
    f: [f64; 6],
    inst: u16,
}
