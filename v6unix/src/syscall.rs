use std::fmt::Write as _;

use log::{log_enabled, trace, Level};
use pdp11::PC;

use crate::errno::Errno;
use crate::proc::{PStat, Resume, SysResult, System};

pub(crate) struct Sysent {
    pub args: u16,
    pub name: &'static str,
    pub imp: fn(&mut System, usize) -> SysResult,
}

macro_rules! s {
    ($args:expr, $name:expr, $imp:path) => {
        Sysent {
            args: $args,
            name: $name,
            imp: $imp,
        }
    };
}

/// The 64-entry system call table. The name templates drive trace
/// formatting: %r consumes a register, %s a string argument, %p/%S an
/// octal argument, %d a signed argument, %q an argument pair naming a
/// buffer.
pub(crate) static SYSENT: [Sysent; 64] = [
    s!(0, "null", System::sys_null),                   /*  0 = indir */
    s!(0, "exit(%r)", System::sys_exit),               /*  1 = exit */
    s!(0, "fork() = %d", System::sys_fork),            /*  2 = fork */
    s!(2, "read(%r, %p, %d) = %q", System::sys_read),  /*  3 = read */
    s!(2, "write(%r, %q) = %d", System::sys_write),    /*  4 = write */
    s!(2, "open(%s, %d) = %d", System::sys_open),      /*  5 = open */
    s!(0, "close(%r)", System::sys_close),             /*  6 = close */
    s!(0, "wait() = %d, %p", System::sys_wait),        /*  7 = wait */
    s!(2, "create(%s, %p) = %d", System::sys_create),  /*  8 = create */
    s!(2, "link(%s, %s)", System::sys_link),           /*  9 = link */
    s!(1, "unlink(%s)", System::sys_unlink),           /* 10 = unlink */
    s!(2, "exec(%s, %S)", System::sys_exec),           /* 11 = exec */
    s!(1, "chdir(%s)", System::sys_chdir),             /* 12 = chdir */
    s!(0, "time() = %d, %d", System::sys_time),        /* 13 = time */
    s!(3, "mknod(%s, %p, %p)", System::sys_mknod),     /* 14 = mknod */
    s!(2, "chmod(%s, %p)", System::sys_chmod),         /* 15 = chmod */
    s!(2, "chown(%s, %p)", System::sys_chown),         /* 16 = chown */
    s!(1, "break(%p)", System::sys_break),             /* 17 = break */
    s!(2, "stat(%s, %p)", System::sys_stat),           /* 18 = stat */
    s!(2, "seek(%r, %d, %d) = %d", System::sys_seek),  /* 19 = seek */
    s!(0, "getpid() = %d", System::sys_getpid),        /* 20 = getpid */
    s!(3, "mount()", System::sys_mount),               /* 21 = mount */
    s!(1, "umount()", System::sys_umount),             /* 22 = umount */
    s!(0, "setuid(%r)", System::sys_setuid),           /* 23 = setuid */
    s!(0, "getuid() = %d", System::sys_getuid),        /* 24 = getuid */
    s!(0, "stime(%r, %r)", System::sys_stime),         /* 25 = stime */
    s!(3, "ptrace()", System::sys_ptrace),             /* 26 = ptrace */
    s!(0, "none", System::sys_none),                   /* 27 = x */
    s!(1, "fstat(%d, %p)", System::sys_fstat),         /* 28 = fstat */
    s!(0, "29", System::sys_none),                     /* 29 = x */
    s!(1, "smdate", System::sys_null),                 /* 30 = smdate; inoperative */
    s!(1, "stty(%r, %p)", System::sys_stty),           /* 31 = stty */
    s!(1, "gtty(%r, %p)", System::sys_gtty),           /* 32 = gtty */
    s!(0, "33", System::sys_none),                     /* 33 = x */
    s!(0, "nice(%r)", System::sys_nice),               /* 34 = nice */
    s!(0, "sleep(%r)", System::sys_sleep),             /* 35 = sleep */
    s!(0, "sync()", System::sys_sync),                 /* 36 = sync */
    s!(1, "kill(%r, %d)", System::sys_kill),           /* 37 = kill */
    s!(0, "csw()", System::sys_csw),                   /* 38 = csw (switch) */
    s!(0, "39", System::sys_none),                     /* 39 = x */
    s!(0, "40", System::sys_none),                     /* 40 = x */
    s!(0, "dup(%r) = %d", System::sys_dup),            /* 41 = dup */
    s!(0, "pipe() = %d, %d", System::sys_pipe),        /* 42 = pipe */
    s!(1, "times", System::sys_times),                 /* 43 = times */
    s!(4, "prof", System::sys_prof),                   /* 44 = prof */
    s!(0, "45", System::sys_none),                     /* 45 = tiu */
    s!(0, "setgid(%r)", System::sys_setgid),           /* 46 = setgid */
    s!(0, "getgid(%r)", System::sys_getgid),           /* 47 = getgid */
    s!(2, "sig(%d, %p)", System::sys_sig),             /* 48 = sig */
    s!(0, "49", System::sys_none),                     /* 49 = x */
    s!(0, "50", System::sys_none),                     /* 50 = x */
    s!(0, "51", System::sys_none),                     /* 51 = x */
    s!(0, "52", System::sys_none),                     /* 52 = x */
    s!(0, "53", System::sys_none),                     /* 53 = x */
    s!(0, "54", System::sys_none),                     /* 54 = x */
    s!(0, "55", System::sys_none),                     /* 55 = x */
    s!(0, "56", System::sys_none),                     /* 56 = x */
    s!(0, "57", System::sys_none),                     /* 57 = x */
    s!(0, "58", System::sys_none),                     /* 58 = x */
    s!(0, "59", System::sys_none),                     /* 59 = x */
    s!(0, "60", System::sys_none),                     /* 60 = x */
    s!(0, "61", System::sys_none),                     /* 61 = x */
    s!(0, "62", System::sys_none),                     /* 62 = x */
    s!(0, "63", System::sys_none),                     /* 63 = x */
];

impl System {
    /// Dispatches a trap instruction. Direct form: the syscall number
    /// is in the low bits and arguments follow in the instruction
    /// stream, which the PC then skips. Indirect form (number 0): the
    /// next word points at a block whose first word is a trap
    /// instruction holding the real number, followed by the arguments.
    pub(crate) fn trap(&mut self, i: usize) -> Result<(), String> {
        let p = &mut self.procs[i];
        let mut trap = p.cpu.inst & 0o77;
        p.cpu.r[PC] = p.cpu.r[PC].wrapping_add(2);
        let mut argp = p.cpu.r[PC];
        let otrap = trap;
        if trap == 0 {
            p.cpu.r[PC] = p.cpu.r[PC].wrapping_add(2); // consume the pointer
            argp = p.cpu.read_w(argp).map_err(|e| e.to_string())?;
            let tw = p.cpu.read_w(argp).map_err(|e| e.to_string())?;
            if tw & !0o77 != 0o104400 {
                return Err(format!("invalid indirect trap {tw:06o}"));
            }
            trap = tw & 0o77;
            argp = argp.wrapping_add(2);
        }
        let ent = &SYSENT[trap as usize];
        for k in 0..ent.args as usize {
            p.args[k] = p.cpu.read_w(argp).map_err(|e| e.to_string())?;
            argp = argp.wrapping_add(2);
        }
        if otrap != 0 {
            p.cpu.r[PC] = argp;
        }

        if log_enabled!(Level::Trace) {
            let desc = self.trace_call(i, ent);
            trace!("[pid {}] {}", self.procs[i].pid, desc);
        }

        self.procs[i].error = None;
        let res = (ent.imp)(self, i);
        self.finish_syscall(i, trap, res);
        Ok(())
    }

    /// Commits the outcome of a handler invocation: either the C-flag
    /// return convention, or parking the process on its wait key.
    pub(crate) fn finish_syscall(&mut self, i: usize, trap: u16, res: SysResult) {
        match res {
            Ok(()) => self.complete_syscall(i),
            Err(sus) => {
                // a signal arriving before an interruptible sleep
                // commits converts it to EINTR
                if sus.pri >= 0 && self.issig(i) {
                    self.procs[i].error = Some(Errno::EINTR);
                    self.complete_syscall(i);
                    return;
                }
                let p = &mut self.procs[i];
                p.wkey = Some(sus.key);
                p.wchan = sus.chan;
                p.status = if sus.pri < 0 {
                    PStat::Sleep
                } else {
                    PStat::Wait
                };
                p.resume = Some(Resume { trap, pri: sus.pri });
            }
        }
    }

    fn complete_syscall(&mut self, i: usize) {
        let p = &mut self.procs[i];
        p.resume = None;
        p.progress = 0;
        p.deadline = None;
        if p.status == PStat::Zomb {
            // exit and fatal signals skip the return convention
            return;
        }
        p.cpu.ps.set_c(false);
        if let Some(e) = p.error {
            p.cpu.ps.set_c(true);
            p.cpu.r[0] = e as u16;
            trace!("[pid {}] errno {}", p.pid, e);
        }
    }

    /// Re-enters a suspended syscall after wakeup. A pending signal
    /// cancels an interruptible sleep with EINTR instead.
    pub(crate) fn resume_syscall(&mut self, i: usize) {
        let r = self.procs[i].resume.expect("resume without suspended syscall");
        if r.pri >= 0 && self.issig(i) {
            self.procs[i].error = Some(Errno::EINTR);
            self.complete_syscall(i);
            return;
        }
        let res = (SYSENT[r.trap as usize].imp)(self, i);
        self.finish_syscall(i, r.trap, res);
    }

    pub(crate) fn sys_null(&mut self, _i: usize) -> SysResult {
        Ok(())
    }

    pub(crate) fn sys_none(&mut self, i: usize) -> SysResult {
        self.procs[i].error = Some(Errno::ENOSYS);
        Ok(())
    }

    /// Renders the entry template for tracing.
    fn trace_call(&mut self, i: usize, ent: &Sysent) -> String {
        let mut desc = String::new();
        let name = ent.name.as_bytes();
        let mut reg = 0usize;
        let mut arg = 0usize;
        let mut k = 0;
        while k < name.len() {
            let c = name[k];
            if c != b'%' {
                desc.push(c as char);
                if c == b')' {
                    break;
                }
                k += 1;
                continue;
            }
            k += 1;
            let args = self.procs[i].args;
            match name[k] {
                b'r' => {
                    let _ = write!(desc, "{}", self.procs[i].cpu.r[reg] as i16);
                    reg += 1;
                }
                b's' => {
                    let s = self.procs[i].str_at(args[arg]);
                    let _ = write!(desc, "{s:?}");
                    arg += 1;
                }
                b'p' | b'S' => {
                    let _ = write!(desc, "{:06o}", args[arg]);
                    arg += 1;
                }
                b'd' => {
                    let _ = write!(desc, "{}", args[arg] as i16);
                    arg += 1;
                }
                b'q' => {
                    let a = args[arg] as usize;
                    let n = (args[arg + 1] as usize).min(32);
                    let b = &self.procs[i].cpu.mem[a..(a + n).min(1 << 16)];
                    let _ = write!(desc, "{:?}", String::from_utf8_lossy(b));
                    arg += 2;
                }
                c => {
                    desc.push('%');
                    desc.push(c as char);
                }
            }
            k += 1;
        }
        desc
    }
}
