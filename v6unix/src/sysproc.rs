use std::time::{Duration, Instant};

use log::trace;
use pdp11::{ArrayMem, PC, SP};

use crate::aout::{Aout, Magic};
use crate::errno::Errno;
use crate::fs::{NameiOp, IEXEC, IFMT, ISGID, ISUID};
use crate::param::*;
use crate::proc::{PStat, Proc, Suspend, SysResult, System, WaitKey};

impl System {
    /// fork(2): the child is an exact copy; the parent resumes one
    /// word later than the child, with the other's pid in R0.
    pub(crate) fn sys_fork(&mut self, i: usize) -> SysResult {
        let child = match self.fork_proc(i) {
            Ok(c) => c,
            Err(e) => {
                self.procs[i].error = Some(e);
                return Ok(());
            }
        };
        let cpid = self.procs[child].pid;
        let ppid = self.procs[i].pid;
        self.procs[i].cpu.r[0] = cpid as u16;
        self.procs[child].cpu.r[0] = ppid as u16;
        self.procs[i].cpu.r[PC] = self.procs[i].cpu.r[PC].wrapping_add(2);
        trace!("[pid {ppid}] fork -> {cpid}");
        self.setrun(child);
        Ok(())
    }

    /// exec(2): picks up the file and argument strings, then replaces
    /// the image.
    pub(crate) fn sys_exec(&mut self, i: usize) -> SysResult {
        let addr = self.procs[i].args[0];
        let name = self.procs[i].str_at(addr);
        let Some(res) = self.namei_p(i, &name, NameiOp::Find) else {
            return Ok(());
        };
        let ino = res.ip.expect("find without inode");
        if !self.access_p(i, ino, IEXEC) {
            self.disk.iput(ino);
            return Ok(());
        }
        {
            let ip = self.disk.inode(ino);
            if ip.stat.mode & IFMT != 0 || ip.data.len() < 4 * 2 {
                self.procs[i].error = Some(Errno::ENOEXEC);
                self.disk.iput(ino);
                return Ok(());
            }
        }

        // load the argument vector
        const MAX_ARGV: usize = 256;
        let mut argv: Vec<String> = Vec::new();
        let mut addr = self.procs[i].args[1];
        loop {
            let ap = match self.procs[i].cpu.read_w(addr) {
                Ok(w) => w,
                Err(_) => {
                    self.procs[i].error = Some(Errno::EFAULT);
                    self.disk.iput(ino);
                    return Ok(());
                }
            };
            if ap == 0 {
                break;
            }
            let s = self.procs[i].str_at(ap);
            if self.procs[i].error.is_some() {
                self.disk.iput(ino);
                return Ok(());
            }
            argv.push(s);
            if argv.len() > MAX_ARGV {
                self.procs[i].error = Some(Errno::E2BIG);
                self.disk.iput(ino);
                return Ok(());
            }
            addr = addr.wrapping_add(2);
        }

        let image = self.disk.inode(ino).data.clone();
        let st = self.disk.inode(ino).stat;
        let argv_refs: Vec<&str> = argv.iter().map(|s| s.as_str()).collect();
        exec_image(
            &mut self.procs[i],
            &image,
            &argv_refs,
            Some((st.mode, st.uid, st.gid)),
        );
        self.disk.iput(ino);
        Ok(())
    }

    pub(crate) fn sys_exit(&mut self, i: usize) -> SysResult {
        self.procs[i].args[0] = self.procs[i].cpu.r[0] << 8;
        self.do_exit(i);
        Ok(())
    }

    /// Releases resources, reparents children to init, and enters the
    /// zombie state for the parent to reap.
    pub(crate) fn do_exit(&mut self, i: usize) {
        for s in &mut self.procs[i].signals {
            *s = 1;
        }
        let files: Vec<_> = self.procs[i]
            .files
            .iter_mut()
            .filter_map(|f| f.take())
            .collect();
        for f in &files {
            self.closef(i, f);
        }
        let dir = self.procs[i].dir;
        self.disk.iput(dir);
        self.procs[i].status = PStat::Zomb;

        let pid = self.procs[i].pid;
        let mut ppid = self.procs[i].ppid;
        if self.lookpid_index(ppid).is_none() {
            self.procs[i].ppid = 1;
            ppid = 1;
            if self.lookpid_index(1).is_none() {
                panic!("exit: no init");
            }
        }
        trace!("[pid {pid}] exit {:06o}", self.procs[i].args[0]);
        if let Some(first) = self.procs.first().map(|p| p.pid) {
            self.wakeup(WaitKey::Proc(first));
        }
        self.wakeup(WaitKey::Proc(ppid));
        let mut stopped = Vec::new();
        for (j, q) in self.procs.iter_mut().enumerate() {
            if q.ppid == pid {
                q.ppid = 1;
                if q.status == PStat::Stop {
                    stopped.push(j);
                }
            }
        }
        for j in stopped {
            self.setrun(j);
        }
    }

    /// wait(2): reap a zombie child (pid in R0, status in R1), report
    /// a fresh stop, or sleep until one of those happens.
    pub(crate) fn sys_wait(&mut self, i: usize) -> SysResult {
        let pid = self.procs[i].pid;
        let mut found = 0;
        let mut j = 0;
        while j < self.procs.len() {
            if self.procs[j].ppid != pid {
                j += 1;
                continue;
            }
            found += 1;
            match self.procs[j].status {
                PStat::Zomb => {
                    let child = self.procs.remove(j);
                    let me = self.lookpid_index(pid).expect("waiting proc vanished");
                    let p = &mut self.procs[me];
                    p.times.cstime[0] += child.times.cstime[0];
                    p.times.cstime[1] += child.times.cstime[1];
                    p.times.cutime[0] += child.times.cutime[0];
                    p.times.cutime[1] += child.times.cutime[1];
                    p.cpu.r[0] = child.pid as u16;
                    p.cpu.r[1] = child.args[0]; // wait status
                    return Ok(());
                }
                PStat::Stop => {
                    if self.procs[j].flag & SWTED == 0 {
                        self.procs[j].flag |= SWTED;
                        let sig = self.procs[j].sig;
                        let cpid = self.procs[j].pid;
                        let p = &mut self.procs[i];
                        p.cpu.r[0] = cpid as u16;
                        p.cpu.r[1] = (sig as u8 as u16) << 8 | 0o177;
                        return Ok(());
                    }
                    self.procs[j].flag &= !(STRC | SWTED);
                    self.setrun(j);
                }
                _ => {}
            }
            j += 1;
        }
        if found == 0 {
            self.procs[i].error = Some(Errno::ECHILD);
            return Ok(());
        }
        Err(Suspend {
            key: WaitKey::Proc(pid),
            chan: b'w' as i16,
            pri: PWAIT,
        })
    }

    pub(crate) fn sys_break(&mut self, _i: usize) -> SysResult {
        // the data segment always reaches the stack in this memory
        // model, so break has nothing to adjust
        Ok(())
    }

    pub(crate) fn sys_time(&mut self, i: usize) -> SysResult {
        let t = self.disk.now();
        let p = &mut self.procs[i];
        p.cpu.r[0] = t[0];
        p.cpu.r[1] = t[1];
        Ok(())
    }

    pub(crate) fn sys_stime(&mut self, i: usize) -> SysResult {
        self.suser(i);
        // the clock is derived from the host; setting it is a no-op
        Ok(())
    }

    pub(crate) fn sys_setuid(&mut self, i: usize) -> SysResult {
        let uid = self.procs[i].cpu.r[0] as u8 as i8;
        if self.procs[i].ruid == uid || self.suser(i) {
            let p = &mut self.procs[i];
            p.uid = uid;
            p.ruid = uid;
        }
        Ok(())
    }

    pub(crate) fn sys_getuid(&mut self, i: usize) -> SysResult {
        let p = &mut self.procs[i];
        p.cpu.r[0] = (p.uid as u8 as u16) << 8 | p.ruid as u8 as u16;
        Ok(())
    }

    pub(crate) fn sys_setgid(&mut self, i: usize) -> SysResult {
        let gid = self.procs[i].cpu.r[0] as u8 as i8;
        if self.procs[i].rgid == gid || self.suser(i) {
            let p = &mut self.procs[i];
            p.gid = gid;
            p.rgid = gid;
        }
        Ok(())
    }

    pub(crate) fn sys_getgid(&mut self, i: usize) -> SysResult {
        let p = &mut self.procs[i];
        p.cpu.r[0] = (p.gid as u8 as u16) << 8 | p.rgid as u8 as u16;
        Ok(())
    }

    pub(crate) fn sys_getpid(&mut self, i: usize) -> SysResult {
        self.procs[i].cpu.r[0] = self.procs[i].pid as u16;
        Ok(())
    }

    pub(crate) fn sys_nice(&mut self, i: usize) -> SysResult {
        let mut n = self.procs[i].cpu.r[0] as i16;
        if n > 20 {
            n = 20;
        }
        if n < 0 && !self.suser(i) {
            n = 0;
        }
        self.procs[i].nice = n;
        Ok(())
    }

    /// sleep(2): parks the process until the global timer deadline,
    /// which the frontend fires from real time.
    pub(crate) fn sys_sleep(&mut self, i: usize) -> SysResult {
        let end = match self.procs[i].deadline {
            Some(end) => end,
            None => {
                let secs = self.procs[i].cpu.r[0] as u64;
                let end = Instant::now() + Duration::from_secs(secs);
                self.procs[i].deadline = Some(end);
                end
            }
        };
        if Instant::now() < end {
            if self.timer.map_or(true, |t| t > end) {
                self.timer = Some(end);
            }
            return Err(Suspend {
                key: WaitKey::Timer,
                chan: b't' as i16,
                pri: PSLEP,
            });
        }
        Ok(())
    }

    /// kill(2): pid 0 targets everything on the caller's tty except
    /// init.
    pub(crate) fn sys_kill(&mut self, i: usize) -> SysResult {
        let pid = self.procs[i].cpu.r[0] as i16;
        let sig = self.procs[i].args[0] as u8;
        let uid = self.procs[i].uid;
        let tty = self.procs[i].tty;
        let mut found = 0;
        for j in 0..self.procs.len() {
            if j == i {
                continue;
            }
            let q = &self.procs[j];
            if pid != 0 && q.pid != pid {
                continue;
            }
            if pid == 0 && (q.tty != tty || q.pid == 1) {
                continue;
            }
            if uid != 0 && q.uid != uid {
                continue;
            }
            found += 1;
            self.psignal(j, sig);
        }
        if found == 0 {
            self.procs[i].error = Some(Errno::ESRCH);
        }
        Ok(())
    }

    pub(crate) fn sys_csw(&mut self, i: usize) -> SysResult {
        self.procs[i].cpu.r[0] = 0; // no console switch register
        Ok(())
    }

    /// sig(2): installs a handler PC, returning the old one. KILL
    /// cannot be caught.
    pub(crate) fn sys_sig(&mut self, i: usize) -> SysResult {
        let a = self.procs[i].args[0];
        if a as usize >= NSIG || a == SIGKIL as u16 {
            self.procs[i].error = Some(Errno::EINVAL);
            return Ok(());
        }
        let p = &mut self.procs[i];
        p.cpu.r[0] = p.signals[a as usize];
        p.signals[a as usize] = p.args[1];
        if p.sig == a as i8 {
            p.sig = 0;
        }
        Ok(())
    }

    pub(crate) fn sys_times(&mut self, i: usize) -> SysResult {
        let addr = self.procs[i].args[0];
        let t = self.procs[i].times;
        let words = [
            t.utime as u16,
            t.stime as u16,
            t.cutime[0] as u16,
            t.cutime[1] as u16,
            t.cstime[0] as u16,
            t.cstime[1] as u16,
        ];
        if self.procs[i].mem_range(addr, 12).is_none() {
            return Ok(());
        }
        for (k, w) in words.iter().enumerate() {
            self.procs[i].cpu.mem.set_word(addr + 2 * k as u16, *w);
        }
        Ok(())
    }

    pub(crate) fn sys_prof(&mut self, i: usize) -> SysResult {
        let p = &mut self.procs[i];
        p.prof[0] = p.args[0] & !1; // base of sample buf
        p.prof[1] = p.args[1]; // size of same
        p.prof[2] = p.args[2]; // pc offset
        p.prof[3] = p.args[3] >> 1; // pc scale
        Ok(())
    }

    pub(crate) fn sys_ptrace(&mut self, _i: usize) -> SysResult {
        // tracing is not supported; the call quietly does nothing
        Ok(())
    }
}

/// Builds a fresh memory image from an executable: text and data laid
/// out by magic number, the argument strings and vector pushed at the
/// top, registers cleared, and catchable signal handlers reset.
pub(crate) fn exec_image(p: &mut Proc, exe: &[u8], argv: &[&str], ids: Option<(u16, i8, i8)>) {
    let af = match Aout::parse(exe) {
        Ok(af) => af,
        Err(e) => {
            p.error = Some(e);
            return;
        }
    };

    const ROUND: u32 = 0o20000;
    let tsr = ((af.text_size() as u32 + ROUND - 1) & !(ROUND - 1)) as usize;

    let mut mem = ArrayMem::new();
    mem[..af.text.len()].copy_from_slice(&af.text);
    mem[tsr..tsr + af.data.len()].copy_from_slice(&af.data);

    // argument strings at the very top of memory, then the 0177777
    // sentinel, the argv pointers, and argc; SP ends up on argc
    let mut cp: u16 = 0;
    for s in argv.iter().rev() {
        cp = cp.wrapping_sub(s.len() as u16 + 1);
    }
    if cp.wrapping_neg() > 510 {
        p.error = Some(Errno::E2BIG);
        return;
    }
    let mut ap = cp & !1;
    ap = ap.wrapping_sub(2);
    mem.set_word(ap, 0o177777);

    cp = 0;
    for s in argv.iter().rev() {
        cp = cp.wrapping_sub(s.len() as u16 + 1);
        mem[cp as usize..cp as usize + s.len()].copy_from_slice(s.as_bytes());
        ap = ap.wrapping_sub(2);
        mem.set_word(ap, cp);
    }
    ap = ap.wrapping_sub(2);
    mem.set_word(ap, argv.len() as u16);
    let sp = ap;

    p.cpu.mem = mem;
    if af.hdr.magic == Magic::Plain {
        p.text_size = af.hdr.text_size;
        p.data_start = af.hdr.text_size;
        p.data_size = af.hdr.data_size;
    } else {
        p.text_size = af.text_size();
        p.data_start = tsr as u16;
        p.data_size = af.data_size();
    }

    if let Some((mode, uid, gid)) = ids {
        if mode & ISUID != 0 && p.uid != 0 {
            p.uid = uid;
        }
        if mode & ISGID != 0 {
            p.gid = gid;
        }
    }

    // clear catchable handlers, registers, and return
    for s in &mut p.signals {
        if *s != 1 {
            *s = 0;
        }
    }
    p.cpu.r = [0; 8];
    p.cpu.r[SP] = sp;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::Proc;

    fn image(magic: u16, text: &[u8], data: &[u8]) -> Vec<u8> {
        let mut b = Vec::new();
        for w in [magic, text.len() as u16, data.len() as u16, 0, 0, 0, 0, 1] {
            b.extend_from_slice(&w.to_le_bytes());
        }
        b.extend_from_slice(text);
        b.extend_from_slice(data);
        b
    }

    fn fresh_proc() -> Proc {
        let mut sys = System::new(b"").unwrap();
        let p = sys.new_proc();
        p
    }

    #[test]
    fn argv_layout() {
        let mut p = fresh_proc();
        let exe = image(0o407, &[0o240, 0, 0, 0, 0, 0, 0, 0], &[]);
        exec_image(&mut p, &exe, &["echo", "hi"], None);
        assert!(p.error.is_none());

        let sp = p.cpu.r[SP];
        let mem = &p.cpu.mem;
        assert_eq!(mem.word(sp), 2); // argc
        let a0 = mem.word(sp.wrapping_add(2));
        let a1 = mem.word(sp.wrapping_add(4));
        assert_eq!(mem.word(sp.wrapping_add(6)), 0o177777); // sentinel
        let str_at = |a: u16| {
            let b = &mem[a as usize..];
            let end = b.iter().position(|&c| c == 0).unwrap();
            std::str::from_utf8(&b[..end]).unwrap().to_string()
        };
        assert_eq!(str_at(a0), "echo");
        assert_eq!(str_at(a1), "hi");
        // registers cleared except SP
        assert_eq!(p.cpu.r[0], 0);
        assert_eq!(p.cpu.r[PC], 0);
    }

    #[test]
    fn plain_magic_loads_at_zero() {
        let mut p = fresh_proc();
        let exe = image(0o407, &[1, 2, 3, 4, 5, 6, 7, 8], &[]);
        exec_image(&mut p, &exe, &[], None);
        assert_eq!(&p.cpu.mem[0..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(p.text_size, 8);
        assert_eq!(p.data_start, 8);
        assert_eq!(p.data_size, 0);
    }

    #[test]
    fn split_magic_places_data_at_8k() {
        let mut p = fresh_proc();
        let exe = image(0o410, &[1, 2], &[9, 8]);
        exec_image(&mut p, &exe, &[], None);
        assert_eq!(&p.cpu.mem[0..2], &[1, 2]);
        assert_eq!(&p.cpu.mem[0o20000..0o20002], &[9, 8]);
        assert_eq!(p.text_size, 2);
        assert_eq!(p.data_start, 0o20000);
        assert_eq!(p.data_size, 2);
    }

    #[test]
    fn oversized_argv_is_e2big() {
        let mut p = fresh_proc();
        let exe = image(0o407, &[0, 0], &[]);
        let big = "x".repeat(600);
        exec_image(&mut p, &exe, &[&big], None);
        assert_eq!(p.error, Some(Errno::E2BIG));
    }

    #[test]
    fn handlers_reset_except_ignored() {
        let mut p = fresh_proc();
        p.signals[2] = 0o1000;
        p.signals[3] = 1; // ignored stays ignored
        let exe = image(0o407, &[0, 0], &[]);
        exec_image(&mut p, &exe, &[], None);
        assert_eq!(p.signals[2], 0);
        assert_eq!(p.signals[3], 1);
    }
}
