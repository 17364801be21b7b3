use std::time::Instant;

use log::{log_enabled, trace, Level};
use pdp11::{CpuError, PC, SP};

use crate::param::*;
use crate::proc::{PStat, System, WaitKey};

impl System {
    /// Runs the machine until every process is parked: the frontend's
    /// pump. Fires the sleep(2) timer first if its deadline passed.
    ///
    /// Exactly one process executes at a time; the loop picks the
    /// runnable process with the smallest pri (round-robin among
    /// equals) and runs it until it blocks, exits, or yields to a
    /// higher-priority process it woke.
    pub fn wait(&mut self) {
        if let Some(t) = self.timer {
            if Instant::now() >= t {
                self.timer = None;
                self.wakeup(WaitKey::Timer);
            }
        }
        while let Some(i) = self.pick_next() {
            let pid = self.procs[i].pid;
            self.curpri = self.procs[i].pri;
            self.runrun = 0;
            self.run_proc(pid);
        }
    }

    /// Highest-priority runnable process, scanning from just past the
    /// previous pick for fairness among equals.
    fn pick_next(&mut self) -> Option<usize> {
        let n = self.procs.len();
        if n == 0 {
            return None;
        }
        let start = self.swtchpos % n;
        let mut next: Option<usize> = None;
        for j in 0..n {
            let i = (start + j) % n;
            let p = &self.procs[i];
            if p.status == PStat::Run && next.map_or(true, |k| p.pri < self.procs[k].pri) {
                next = Some(i);
            }
        }
        if let Some(i) = next {
            self.swtchpos = i + 1;
        }
        next
    }

    /// Interprets one process until it gives up the CPU.
    fn run_proc(&mut self, pid: i16) {
        loop {
            let Some(i) = self.lookpid_index(pid) else {
                return;
            };
            if self.procs[i].status != PStat::Run {
                return;
            }

            if self.procs[i].resume.is_some() {
                self.resume_syscall(i);
                if self.yielded(pid) {
                    return;
                }
                continue;
            }

            if self.issig(i) {
                self.psig(i);
                if self.yielded(pid) {
                    return;
                }
                continue;
            }

            let err = if log_enabled!(Level::Trace) {
                let p = &self.procs[i];
                let pc = p.cpu.r[PC];
                if let Ok((text, _)) = p.cpu.disasm(pc) {
                    trace!(
                        "[pid {pid}] {pc:06o} {text}  r0={:06o} sp={:06o} nzvc={:04b}",
                        p.cpu.r[0],
                        p.cpu.r[SP],
                        p.cpu.ps.0 & 0o17
                    );
                }
                self.procs[i].cpu.step(1)
            } else {
                self.procs[i].cpu.step(100)
            };
            let mut sig = 0u8;
            match err {
                Ok(()) => {}
                Err(CpuError::Trap) => {
                    if let Err(msg) = self.trap(i) {
                        panic!("pid {pid}: {msg}");
                    }
                    let Some(j) = self.lookpid_index(pid) else {
                        return;
                    };
                    match self.procs[j].error {
                        Some(e) if e.is_fatal() => sig = SIGSYS,
                        _ => {
                            if self.yielded(pid) {
                                return;
                            }
                            continue;
                        }
                    }
                }
                Err(CpuError::Inst) => sig = SIGINS,
                Err(CpuError::Bpt) => sig = SIGTRC,
                Err(CpuError::Iot) => sig = SIGIOT,
                Err(CpuError::Emt) => sig = SIGEMT,
                Err(CpuError::Fpt) => sig = SIGFPT,
                Err(CpuError::Mem) => sig = SIGSEG,
            }
            if sig != 0 {
                if let Some(j) = self.lookpid_index(pid) {
                    self.psignal(j, sig);
                }
            }
            if self.yielded(pid) {
                return;
            }
        }
    }

    /// True when the process should hand the CPU back to the picker:
    /// no longer runnable, suspended in a syscall, or a higher-priority
    /// process became runnable this quantum.
    fn yielded(&self, pid: i16) -> bool {
        let Some(i) = self.lookpid_index(pid) else {
            return true;
        };
        let p = &self.procs[i];
        p.status != PStat::Run || p.resume.is_some() || self.runrun > 0
    }

    /// Makes all sleepers on key runnable.
    pub(crate) fn wakeup(&mut self, key: WaitKey) {
        for i in 0..self.procs.len() {
            if self.procs[i].wkey == Some(key) {
                self.setrun(i);
            }
        }
    }

    pub(crate) fn setrun(&mut self, i: usize) {
        let curpri = self.curpri;
        let p = &mut self.procs[i];
        if p.status == PStat::Zomb {
            panic!("setrun: zombie");
        }
        p.wkey = None;
        p.wchan = 0;
        p.status = PStat::Run;
        if p.pri < curpri {
            self.runrun += 1;
        }
    }

    /// Sends sig to every process controlled by the given tty. Called
    /// by the line discipline for interrupts and quits.
    pub(crate) fn tty_signal(&mut self, minor: u8, sig: u8) {
        for i in 0..self.procs.len() {
            if self.procs[i].tty == Some(minor) {
                self.psignal(i, sig);
            }
        }
    }

    /// Posts a signal. KILL is sticky; an interruptible sleeper is
    /// made runnable so it can field the signal.
    pub(crate) fn psignal(&mut self, i: usize, sig: u8) {
        if sig as usize >= NSIG {
            return;
        }
        let p = &mut self.procs[i];
        if p.sig != SIGKIL as i8 {
            p.sig = sig as i8;
        }
        if p.status == PStat::Wait {
            self.setrun(i);
        }
    }

    /// True when the process has a pending signal that is not ignored.
    pub(crate) fn issig(&self, i: usize) -> bool {
        let p = &self.procs[i];
        let n = p.sig;
        n != 0 && p.signals[n as usize] & 1 == 0
    }

    /// Fields the pending signal: either push PC and PS and enter the
    /// handler, or exit with the signal in the wait status.
    pub(crate) fn psig(&mut self, i: usize) {
        let sig = self.procs[i].sig;
        self.procs[i].sig = 0;
        let pc = self.procs[i].signals[sig as usize];
        if pc != 0 {
            let p = &mut self.procs[i];
            p.error = None;
            if sig as u8 != SIGINS && sig as u8 != SIGTRC {
                p.signals[sig as usize] = 0;
            }
            let sp = p.cpu.r[SP].wrapping_sub(4);
            // stack growth always succeeds in this memory model
            p.cpu.mem.set_word(sp.wrapping_add(2), p.cpu.ps.0);
            p.cpu.mem.set_word(sp, p.cpu.r[PC]);
            p.cpu.r[SP] = sp;
            p.cpu.r[PC] = pc;
            trace!("pid {} signal {} -> handler {:06o}", p.pid, sig, pc);
            return;
        }

        match sig as u8 {
            SIGQIT | SIGINS | SIGTRC | SIGIOT | SIGEMT | SIGFPT | SIGBUS | SIGSEG | SIGSYS => {
                self.procs[i].args[0] = sig as u8 as u16;
                if self.core(i) {
                    self.procs[i].args[0] |= 0o200;
                }
            }
            _ => {}
        }
        // V6 recomputes the wait status here, clobbering the core-dump
        // form built above.
        let p = &mut self.procs[i];
        p.args[0] = p.cpu.r[0] << 8 | sig as u8 as u16;
        self.do_exit(i);
    }

    /// Core images are not written in this system.
    fn core(&mut self, _i: usize) -> bool {
        false
    }
}
