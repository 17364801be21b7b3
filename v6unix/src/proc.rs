use std::io;
use std::time::Instant;

use pdp11::{ArrayMem, Cpu};
use thiserror::Error;

use crate::disk::{new_disk, DiskError};
use crate::errno::Errno;
use crate::file::FileRef;
use crate::fs::{Cred, Disk, NameiOp};
use crate::param::{NOFILE, NPROC, NSIG, NTTY, ROOTINO};
use crate::tty::Tty;

/// Process states, with the V6 numeric codes (visible through
/// /dev/kmem).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PStat {
    Sleep = 1, // sleeping at negative priority; signals do not disturb
    Wait = 2,  // sleeping at non-negative priority
    Run = 3,
    Idl = 4, // intermediate state in process creation
    Zomb = 5,
    Stop = 6, // process being traced
}

/// An opaque wait token. wakeup(key) makes every sleeper holding the
/// same key runnable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKey {
    Proc(i16),      // exit/stop rendezvous with a given pid
    TtyIn(u8),      // canonicalized input on a tty
    Timer,          // the global sleep(2) deadline
    PipeRead(u32),  // bytes arrived in a pipe
    PipeWrite(u32), // room appeared in a pipe
}

/// A syscall's request to give up the processor. The wait-reason byte
/// shows up in ps listings; pri >= 0 lets signals interrupt the sleep.
#[derive(Debug, Clone, Copy)]
pub struct Suspend {
    pub key: WaitKey,
    pub chan: i16,
    pub pri: i8,
}

pub type SysResult = Result<(), Suspend>;

/// A suspended syscall, re-entered when the process is woken.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Resume {
    pub trap: u16,
    pub pri: i8,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Times {
    pub utime: i16,
    pub stime: i16,
    pub cutime: [i16; 2],
    pub cstime: [i16; 2],
}

/// One process: scheduler bookkeeping, credentials, the fd table,
/// signal state, and a private CPU with its own 64 KiB memory.
pub struct Proc {
    // proc-table fields, packed into /dev/kmem reads in this order
    pub status: PStat,
    pub flag: u8,
    pub pri: i8, // negative is high
    pub sig: i8, // pending signal number
    pub uid: i8, // effective user id, used to direct tty signals
    pub time: i8,
    pub cputime: i8,
    pub ttyp: i16, // controlling tty address for ps
    pub pid: i16,
    pub ppid: i16,
    pub addr: u16, // synthesized core address for ps
    pub size: i16,
    pub wchan: i16, // wait reason byte
    pub textp: u16,

    pub cpu: Cpu,
    pub args: [u16; 4], // syscall arguments, also the wait status
    pub error: Option<Errno>,
    pub gid: i8,
    pub ruid: i8,
    pub rgid: i8,
    pub dir: u16, // current directory inode
    pub files: [Option<FileRef>; NOFILE],
    pub signals: [u16; NSIG], // handler PCs; 1 means ignore
    pub prof: [u16; 4],
    pub times: Times,
    pub nice: i16,
    pub text_size: u16,
    pub data_start: u16,
    pub data_size: u16,
    pub tty: Option<u8>, // controlling tty minor

    pub(crate) wkey: Option<WaitKey>,
    pub(crate) resume: Option<Resume>,
    pub(crate) progress: usize, // bytes moved by an interrupted pipe write
    pub(crate) deadline: Option<Instant>, // sleep(2) wakeup time
}

impl Proc {
    fn new(pid: i16) -> Proc {
        Proc {
            status: PStat::Idl,
            flag: 0,
            pri: 0,
            sig: 0,
            uid: 0,
            time: 0,
            cputime: 0,
            ttyp: 0,
            pid,
            ppid: 0,
            addr: 0,
            size: 0,
            wchan: 0,
            textp: 0,
            cpu: Cpu::new(ArrayMem::new()),
            args: [0; 4],
            error: None,
            gid: 0,
            ruid: 0,
            rgid: 0,
            dir: ROOTINO,
            files: Default::default(),
            signals: [0; NSIG],
            prof: [0; 4],
            times: Times::default(),
            nice: 0,
            text_size: 0,
            data_start: 0,
            data_size: 0,
            tty: None,
            wkey: None,
            resume: None,
            progress: 0,
            deadline: None,
        }
    }

    pub(crate) fn cred(&self) -> Cred {
        Cred {
            uid: self.uid,
            gid: self.gid,
        }
    }

    /// Reads a NUL-terminated string out of process memory.
    pub(crate) fn str_at(&mut self, addr: u16) -> String {
        let b = &self.cpu.mem[addr as usize..];
        match b.iter().position(|&c| c == 0) {
            Some(i) => String::from_utf8_lossy(&b[..i]).into_owned(),
            None => {
                self.error = Some(Errno::EFAULT);
                String::new()
            }
        }
    }

    /// Validates a user buffer, faulting anything that runs off the
    /// top of the address space.
    pub(crate) fn mem_range(&mut self, addr: u16, count: u16) -> Option<(usize, usize)> {
        if addr as usize + count as usize >= 1 << 16 {
            self.error = Some(Errno::EFAULT);
            return None;
        }
        Some((addr as usize, addr as usize + count as usize))
    }

    /// The 22-byte proc-table entry V6's ps reads through /dev/kmem.
    pub(crate) fn proc_state_bytes(&self) -> [u8; 22] {
        let mut b = [0u8; 22];
        b[0] = self.status as i8 as u8;
        b[1] = self.flag;
        b[2] = self.pri as u8;
        b[3] = self.sig as u8;
        b[4] = self.uid as u8;
        b[5] = self.time as u8;
        b[6] = self.cputime as u8;
        b[7] = self.nice as i8 as u8;
        b[8..10].copy_from_slice(&self.ttyp.to_le_bytes());
        b[10..12].copy_from_slice(&self.pid.to_le_bytes());
        b[12..14].copy_from_slice(&self.ppid.to_le_bytes());
        b[14..16].copy_from_slice(&self.addr.to_le_bytes());
        b[16..18].copy_from_slice(&self.size.to_le_bytes());
        b[18..20].copy_from_slice(&self.wchan.to_le_bytes());
        b[20..22].copy_from_slice(&self.textp.to_le_bytes());
        b
    }
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("exec: {0}")]
    Exec(Errno),
}

/// The whole simulated machine: disk, process table, terminals, and
/// the cooperative scheduler's bookkeeping. One System per host.
pub struct System {
    pub disk: Disk,
    pub procs: Vec<Proc>,
    pub ttys: [Tty; NTTY + 1], // ttys[1..=8] are /dev/tty1../dev/tty8
    pub tty_read: u16,         // 1<<X set while ttyX has a sleeping reader
    pub timer: Option<Instant>, // sleep(2) deadline for the frontend
    pub(crate) next_pid: i16,
    pub(crate) next_pipe: u32,
    pub(crate) swtchpos: usize,
    pub(crate) curpri: i8,
    pub(crate) runrun: i8,
}

impl System {
    pub fn new(archive: &[u8]) -> Result<System, DiskError> {
        Ok(System {
            disk: new_disk(archive)?,
            procs: Vec::new(),
            ttys: std::array::from_fn(|_| Tty::default()),
            tty_read: 0,
            timer: None,
            next_pid: 1,
            next_pipe: 0,
            swtchpos: 0,
            curpri: 0,
            runrun: 0,
        })
    }

    pub(crate) fn lookpid_index(&self, pid: i16) -> Option<usize> {
        self.procs.iter().position(|p| p.pid == pid)
    }

    /// Allocates a process with a fresh unique pid. The caller fills
    /// it in and pushes it onto the table.
    pub(crate) fn new_proc(&mut self) -> Proc {
        loop {
            if self.next_pid <= 0 {
                self.next_pid = 1;
            }
            let pid = self.next_pid;
            self.next_pid += 1;
            if self.lookpid_index(pid).is_none() {
                return Proc::new(pid);
            }
        }
    }

    /// Fetches a file's bytes by path, with root identity. Used by the
    /// frontend to load /etc/init before any process exists.
    pub fn read_file(&mut self, name: &str) -> Result<Vec<u8>, Errno> {
        let cred = Cred { uid: 0, gid: 0 };
        let res = self.disk.namei(cred, ROOTINO, name, NameiOp::Find)?;
        let ino = res.ip.expect("namei find returned no inode");
        let data = self.disk.inode(ino).data.clone();
        self.disk.iput(ino);
        Ok(data)
    }

    /// Boots the first process (pid 1) from an executable image,
    /// wiring tty8's output to the given writer.
    pub fn start<W: io::Write + 'static>(
        &mut self,
        exe: &[u8],
        argv: &[&str],
        stdout: W,
    ) -> Result<i16, StartError> {
        let mut p = self.new_proc();
        p.pid = 1;
        p.ppid = 0;
        p.dir = ROOTINO;
        self.disk.inode_mut(ROOTINO).count += 1;

        let mut stdout = stdout;
        self.ttys[8].print = Some(Box::new(move |b, _echo| match stdout.write(b) {
            Ok(n) => (n, None),
            Err(_) => (0, Some(Errno::EIO)),
        }));
        for (i, tty) in self.ttys.iter_mut().enumerate() {
            tty.tdev.major = 4;
            tty.tdev.minor = i as u8;
        }

        crate::sysproc::exec_image(&mut p, exe, argv, None);
        if let Some(e) = p.error {
            return Err(StartError::Exec(e));
        }
        p.status = PStat::Run;
        let pid = p.pid;
        self.procs.push(p);
        Ok(pid)
    }

    /// Duplicates a process for fork: same registers, a copy of the
    /// memory, shared file handles, same signals and directory.
    pub(crate) fn fork_proc(&mut self, parent: usize) -> Result<usize, Errno> {
        if self.procs.len() >= NPROC {
            return Err(Errno::EIO);
        }
        let mut c = self.new_proc();
        {
            let p = &self.procs[parent];
            c.cpu.r = p.cpu.r;
            c.cpu.ps = p.cpu.ps;
            c.cpu.fps = p.cpu.fps;
            c.cpu.f = p.cpu.f;
            c.cpu.mem = p.cpu.mem.clone();
            c.ppid = p.pid;
            c.uid = p.uid;
            c.ruid = p.uid;
            c.gid = p.gid;
            c.rgid = p.gid;
            c.dir = p.dir;
            c.signals = p.signals;
            c.tty = p.tty;
            c.ttyp = p.ttyp;
            c.text_size = p.text_size;
            c.data_start = p.data_start;
            c.data_size = p.data_size;
            for (slot, f) in c.files.iter_mut().zip(p.files.iter()) {
                if let Some(f) = f {
                    f.borrow_mut().count += 1;
                    *slot = Some(f.clone());
                }
            }
        }
        self.disk.inode_mut(c.dir).count += 1;
        self.procs.push(c);
        Ok(self.procs.len() - 1)
    }
}
