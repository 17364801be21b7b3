use crate::errno::Errno;
use crate::file::{FileRef, FPIPE, FREAD, FWRITE};
use crate::fs::IALLOC;
use crate::param::PPIPE;
use crate::proc::{Suspend, SysResult, System, WaitKey};

pub const PIPSIZ: usize = 4096;

/// A bounded FIFO shared by the two ends of a pipe. Reader/writer
/// disconnects are detected through the backing inode's reference
/// count: it drops below 2 when either end is fully closed.
pub struct Pipe {
    pub(crate) id: u32,
    pub n: usize,
    pub buf: [u8; PIPSIZ],
}

impl std::fmt::Debug for Pipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipe")
            .field("id", &self.id)
            .field("n", &self.n)
            .finish()
    }
}

impl System {
    /// pipe(2): allocates an anonymous inode plus a shared buffer and
    /// returns the read fd in R0, the write fd in R1.
    pub(crate) fn sys_pipe(&mut self, i: usize) -> SysResult {
        let ino = match self.disk.ialloc() {
            Ok(ino) => ino,
            Err(e) => {
                self.procs[i].error = Some(e);
                return Ok(());
            }
        };
        let Some((rfd, rf)) = self.falloc(i) else {
            self.disk.iput(ino);
            return Ok(());
        };
        let Some((_, wf)) = self.falloc(i) else {
            self.procs[i].files[rfd as usize] = None;
            self.disk.iput(ino);
            return Ok(());
        };
        let p = &mut self.procs[i];
        p.cpu.r[1] = p.cpu.r[0];
        p.cpu.r[0] = rfd;

        self.next_pipe += 1;
        let pip = std::rc::Rc::new(std::cell::RefCell::new(Pipe {
            id: self.next_pipe,
            n: 0,
            buf: [0; PIPSIZ],
        }));

        {
            let mut w = wf.borrow_mut();
            w.flag = FWRITE | FPIPE;
            w.ino = ino;
            w.pipe = Some(pip.clone());
        }
        {
            let mut r = rf.borrow_mut();
            r.flag = FREAD | FPIPE;
            r.ino = ino;
            r.pipe = Some(pip);
        }

        let now = self.disk.now();
        let ip = self.disk.inode_mut(ino);
        ip.count = 2;
        ip.stat.atime = now;
        ip.stat.mtime = now;
        ip.stat.mode = IALLOC;
        Ok(())
    }

    /// Pipe read: blocks while the buffer is empty and a writer still
    /// exists; a missing writer reads as end of file.
    pub(crate) fn readp(
        &mut self,
        i: usize,
        f: &FileRef,
        addr: u16,
        count: u16,
    ) -> Result<u16, Suspend> {
        let pipe = f.borrow().pipe.clone().expect("pipe file without pipe");
        let (avail, id) = {
            let p = pipe.borrow();
            (p.n, p.id)
        };
        let ino_count = self.disk.inode(f.borrow().ino).count;
        if avail == 0 && ino_count >= 2 {
            return Err(Suspend {
                key: WaitKey::PipeRead(id),
                chan: b'p' as i16,
                pri: PPIPE,
            });
        }
        let mut pb = pipe.borrow_mut();
        let n = (count as usize).min(pb.n);
        let a = addr as usize;
        self.procs[i].cpu.mem[a..a + n].copy_from_slice(&pb.buf[..n]);
        pb.buf.copy_within(n.., 0);
        pb.n -= n;
        drop(pb);
        f.borrow_mut().offset += n as i32;
        self.wakeup(WaitKey::PipeWrite(id));
        Ok(n as u16)
    }

    /// Pipe write: transfers in chunks, blocking while the buffer is
    /// full. Progress across a block is kept on the process so the
    /// re-entered syscall continues instead of restarting.
    pub(crate) fn writep(
        &mut self,
        i: usize,
        f: &FileRef,
        addr: u16,
        count: u16,
    ) -> Result<u16, Suspend> {
        let pipe = f.borrow().pipe.clone().expect("pipe file without pipe");
        let id = pipe.borrow().id;
        let total = count as usize;
        loop {
            let done = self.procs[i].progress;
            if done >= total {
                return Ok(total as u16);
            }
            let ino_count = self.disk.inode(f.borrow().ino).count;
            if pipe.borrow().n == PIPSIZ && ino_count >= 2 {
                return Err(Suspend {
                    key: WaitKey::PipeWrite(id),
                    chan: b'p' as i16,
                    pri: PPIPE,
                });
            }
            if ino_count < 2 {
                self.procs[i].error = Some(Errno::EPIPE);
                return Ok(0);
            }
            let mut pb = pipe.borrow_mut();
            let n = (total - done).min(PIPSIZ - pb.n);
            let start = pb.n;
            let a = addr as usize + done;
            let src = &self.procs[i].cpu.mem[a..a + n];
            pb.buf[start..start + n].copy_from_slice(src);
            pb.n += n;
            drop(pb);
            self.procs[i].progress += n;
            f.borrow_mut().offset += n as i32;
            self.wakeup(WaitKey::PipeRead(id));
        }
    }

    /// Called on every close of a pipe end so a blocked peer rechecks
    /// the inode count.
    pub(crate) fn closep(&mut self, f: &FileRef) {
        if let Some(pipe) = f.borrow().pipe.clone() {
            let id = pipe.borrow().id;
            self.wakeup(WaitKey::PipeRead(id));
            self.wakeup(WaitKey::PipeWrite(id));
        }
    }
}
