use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::errno::Errno;
use crate::param::{NPROC, SLOAD};
use crate::proc::{Suspend, System};
use crate::tty::TtyDev;

/// Device majors. Unknown majors route to the error device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum Major {
    Err = 0,
    Null = 1,
    Mem = 2,
    Swap = 3, // inert, served by the null device
    Tty = 4,
}

/// A character device driver: open/read/write/close plus the stty
/// exchange. Buffers are passed as (addr, count) into the calling
/// process's memory.
pub(crate) trait Device: Sync {
    fn open(&self, sys: &mut System, pi: usize, minor: u8, rw: u16);
    fn read(
        &self,
        sys: &mut System,
        pi: usize,
        minor: u8,
        addr: u16,
        count: u16,
        off: i32,
    ) -> Result<u16, Suspend>;
    fn write(
        &self,
        sys: &mut System,
        pi: usize,
        minor: u8,
        addr: u16,
        count: u16,
        off: i32,
    ) -> Result<u16, Suspend>;
    fn close(&self, sys: &mut System, pi: usize, minor: u8);
    fn sgtty(
        &self,
        sys: &mut System,
        pi: usize,
        minor: u8,
        set: Option<[u16; 3]>,
    ) -> Option<[u16; 3]>;
}

static DEVTAB: [&dyn Device; 5] = [&ErrDev, &NullDev, &MemDev, &NullDev, &TtyDev];

pub(crate) fn devtab(major: u8) -> &'static dyn Device {
    match Major::from_u8(major) {
        Some(m) => DEVTAB[m as usize],
        None => DEVTAB[Major::Err as usize],
    }
}

/// Major 0: every operation fails.
struct ErrDev;

impl Device for ErrDev {
    fn open(&self, sys: &mut System, pi: usize, _minor: u8, _rw: u16) {
        sys.procs[pi].error = Some(Errno::ENXIO);
    }

    fn read(
        &self,
        sys: &mut System,
        pi: usize,
        _minor: u8,
        _addr: u16,
        _count: u16,
        _off: i32,
    ) -> Result<u16, Suspend> {
        sys.procs[pi].error = Some(Errno::ENXIO);
        Ok(0)
    }

    fn write(
        &self,
        sys: &mut System,
        pi: usize,
        _minor: u8,
        _addr: u16,
        _count: u16,
        _off: i32,
    ) -> Result<u16, Suspend> {
        sys.procs[pi].error = Some(Errno::ENXIO);
        Ok(0)
    }

    fn close(&self, sys: &mut System, pi: usize, _minor: u8) {
        sys.procs[pi].error = Some(Errno::ENXIO);
    }

    fn sgtty(
        &self,
        sys: &mut System,
        pi: usize,
        _minor: u8,
        _set: Option<[u16; 3]>,
    ) -> Option<[u16; 3]> {
        sys.procs[pi].error = Some(Errno::ENOTTY);
        None
    }
}

/// Major 1 (and the inert swap major): the bit bucket.
struct NullDev;

impl Device for NullDev {
    fn open(&self, _sys: &mut System, _pi: usize, _minor: u8, _rw: u16) {}

    fn read(
        &self,
        _sys: &mut System,
        _pi: usize,
        _minor: u8,
        _addr: u16,
        _count: u16,
        _off: i32,
    ) -> Result<u16, Suspend> {
        Ok(0)
    }

    fn write(
        &self,
        _sys: &mut System,
        _pi: usize,
        _minor: u8,
        _addr: u16,
        count: u16,
        _off: i32,
    ) -> Result<u16, Suspend> {
        Ok(count)
    }

    fn close(&self, _sys: &mut System, _pi: usize, _minor: u8) {}

    fn sgtty(
        &self,
        sys: &mut System,
        pi: usize,
        _minor: u8,
        _set: Option<[u16; 3]>,
    ) -> Option<[u16; 3]> {
        sys.procs[pi].error = Some(Errno::ENOTTY);
        None
    }
}

// Addresses served by /dev/mem and /dev/kmem, chosen so the unmodified
// V6 ps works against synthesized kernel structures.
pub(crate) const MEM_SWAP_DEV: i32 = 0o001414; // as listed in the unix kernel
pub(crate) const MEM_PROCS: i32 = 0o005206; // to 0o007322

// arbitrary choices
pub(crate) const MEM_TTY: i32 = 0o002000; // to 0o002440
pub(crate) const MEM_TTY_SIZE: i32 = 32;
pub(crate) const MEM_TEXT: i32 = 0o010000;

/// Major 2: simulated kernel memory.
struct MemDev;

impl Device for MemDev {
    fn open(&self, _sys: &mut System, _pi: usize, _minor: u8, _rw: u16) {}

    fn read(
        &self,
        sys: &mut System,
        pi: usize,
        _minor: u8,
        addr: u16,
        count: u16,
        off: i32,
    ) -> Result<u16, Suspend> {
        if off == MEM_SWAP_DEV && count == 2 {
            // The swap device's major and minor. As long as the proc
            // table always shows SLOAD this is never actually used,
            // but it must be readable for the open to succeed.
            let a = addr as usize;
            sys.procs[pi].cpu.mem[a] = 1;
            sys.procs[pi].cpu.mem[a + 1] = 3;
            return Ok(2);
        }

        if off == MEM_PROCS {
            // The proc table. ps computes (addr+size-8)<<6 as the core
            // address of each entry's u-area; setting size=8 leaves
            // addr, and spacing entries 64 bytes apart packs every
            // process into the synthetic text window.
            for (k, p) in sys.procs.iter_mut().enumerate() {
                p.flag |= SLOAD;
                p.addr = (MEM_TEXT / 64) as u16 + k as u16;
                p.size = 8;
            }
            let mut pb = Vec::with_capacity(22 * sys.procs.len());
            for p in &sys.procs {
                pb.extend_from_slice(&p.proc_state_bytes());
            }
            let a = addr as usize;
            let n = count as usize;
            let copy = pb.len().min(n);
            let mem = &mut sys.procs[pi].cpu.mem;
            for b in &mut mem[a..a + n] {
                *b = 0;
            }
            mem[a..a + copy].copy_from_slice(&pb[..copy]);
            return Ok(pb.len() as u16);
        }

        let nprocs = sys.procs.len().min(NPROC) as i32;
        if (MEM_TEXT..MEM_TEXT + 64 * nprocs).contains(&off) && off & 63 == 0 && count == 512 {
            // A per-process 512-byte u-area view: the top of that
            // process's memory.
            let k = ((off - MEM_TEXT) / 64) as usize;
            let top: Vec<u8> = sys.procs[k].cpu.mem[(1 << 16) - 512..].to_vec();
            let a = addr as usize;
            sys.procs[pi].cpu.mem[a..a + 512].copy_from_slice(&top);
            return Ok(512);
        }

        let ttys = sys.ttys.len() as i32;
        if (MEM_TTY..MEM_TTY + ttys * MEM_TTY_SIZE).contains(&off)
            && (off - MEM_TTY) % MEM_TTY_SIZE == 0
            && count as i32 == MEM_TTY_SIZE
        {
            let k = ((off - MEM_TTY) / MEM_TTY_SIZE) as usize;
            let tb = sys.ttys[k].tdev.to_bytes();
            let a = addr as usize;
            sys.procs[pi].cpu.mem[a..a + tb.len()].copy_from_slice(&tb);
            return Ok(tb.len() as u16);
        }

        Ok(0)
    }

    fn write(
        &self,
        sys: &mut System,
        pi: usize,
        _minor: u8,
        _addr: u16,
        _count: u16,
        _off: i32,
    ) -> Result<u16, Suspend> {
        sys.procs[pi].error = Some(Errno::EPERM);
        Ok(0)
    }

    fn close(&self, _sys: &mut System, _pi: usize, _minor: u8) {}

    fn sgtty(
        &self,
        sys: &mut System,
        pi: usize,
        _minor: u8,
        _set: Option<[u16; 3]>,
    ) -> Option<[u16; 3]> {
        sys.procs[pi].error = Some(Errno::ENOTTY);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::ROOTINO;
    use crate::proc::PStat;

    fn sys_with_proc() -> System {
        let mut sys = System::new(b"").unwrap();
        let mut p = sys.new_proc();
        p.status = PStat::Run;
        sys.disk.inode_mut(ROOTINO).count += 1;
        sys.procs.push(p);
        sys
    }

    #[test]
    fn unknown_majors_route_to_the_error_device() {
        let mut sys = sys_with_proc();
        let n = devtab(77).read(&mut sys, 0, 0, 0o1000, 4, 0).unwrap();
        assert_eq!(n, 0);
        assert_eq!(sys.procs[0].error, Some(Errno::ENXIO));
    }

    #[test]
    fn null_device_swallows_writes() {
        let mut sys = sys_with_proc();
        assert_eq!(devtab(1).read(&mut sys, 0, 1, 0o1000, 16, 0).unwrap(), 0);
        assert_eq!(devtab(1).write(&mut sys, 0, 1, 0o1000, 16, 0).unwrap(), 16);
        assert!(sys.procs[0].error.is_none());
    }

    #[test]
    fn mem_reports_the_swap_device() {
        let mut sys = sys_with_proc();
        let n = devtab(2)
            .read(&mut sys, 0, 1, 0o1000, 2, MEM_SWAP_DEV)
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(&sys.procs[0].cpu.mem[0o1000..0o1002], &[1, 3]);
    }

    #[test]
    fn mem_synthesizes_the_proc_table() {
        let mut sys = sys_with_proc();
        sys.procs[0].pid = 42;
        let n = devtab(2)
            .read(&mut sys, 0, 1, 0o1000, 22, MEM_PROCS)
            .unwrap();
        assert_eq!(n, 22);
        let b = &sys.procs[0].cpu.mem[0o1000..0o1000 + 22];
        assert_eq!(b[0], PStat::Run as u8); // status
        assert_eq!(b[1] & SLOAD, SLOAD); // flag
        assert_eq!(u16::from_le_bytes([b[10], b[11]]), 42); // pid
        assert_eq!(u16::from_le_bytes([b[14], b[15]]), (MEM_TEXT / 64) as u16);
        assert_eq!(i16::from_le_bytes([b[16], b[17]]), 8); // size
    }

    #[test]
    fn mem_serves_per_process_core_windows() {
        let mut sys = sys_with_proc();
        sys.procs[0].cpu.mem[(1 << 16) - 512] = 0o77;
        let n = devtab(2)
            .read(&mut sys, 0, 1, 0o1000, 512, MEM_TEXT)
            .unwrap();
        assert_eq!(n, 512);
        assert_eq!(sys.procs[0].cpu.mem[0o1000], 0o77);
    }

    #[test]
    fn mem_rejects_writes() {
        let mut sys = sys_with_proc();
        assert_eq!(devtab(2).write(&mut sys, 0, 1, 0o1000, 2, 0).unwrap(), 0);
        assert_eq!(sys.procs[0].error, Some(Errno::EPERM));
    }
}
