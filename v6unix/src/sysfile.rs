use std::cell::RefCell;
use std::rc::Rc;

use crate::dev::devtab;
use crate::errno::Errno;
use crate::file::{File, FileRef, FPIPE, FREAD, FWRITE};
use crate::fs::{
    base_name, Inode, NameiOp, NameiRes, IEXEC, IFDIR, IFMT, IREAD, ISVTX, IWRITE, MAX_FILE_SIZE,
};
use crate::param::DIRSIZ;
use crate::proc::{Suspend, SysResult, System};

impl System {
    /// Converts an fd into the open file handle, checking range.
    pub(crate) fn getf(&mut self, i: usize, fd: u16) -> Option<FileRef> {
        let p = &mut self.procs[i];
        match p.files.get(fd as usize).and_then(|f| f.clone()) {
            Some(f) => Some(f),
            None => {
                p.error = Some(Errno::EBADF);
                None
            }
        }
    }

    /// Allocates the lowest free descriptor, reporting it in R0.
    pub(crate) fn ufalloc(&mut self, i: usize) -> Option<u16> {
        let p = &mut self.procs[i];
        for (fd, f) in p.files.iter().enumerate() {
            if f.is_none() {
                p.cpu.r[0] = fd as u16;
                return Some(fd as u16);
            }
        }
        p.error = Some(Errno::EMFILE);
        None
    }

    /// Allocates a descriptor plus a fresh file structure.
    pub(crate) fn falloc(&mut self, i: usize) -> Option<(u16, FileRef)> {
        let fd = self.ufalloc(i)?;
        let f = Rc::new(RefCell::new(File {
            count: 1,
            ..File::default()
        }));
        self.procs[i].files[fd as usize] = Some(f.clone());
        Some((fd, f))
    }

    /// Internal close: drop one reference, releasing the inode (and
    /// poking the pipe) as needed.
    pub(crate) fn closef(&mut self, i: usize, f: &FileRef) {
        let (flag, count, ino) = {
            let fb = f.borrow();
            (fb.flag, fb.count, fb.ino)
        };
        if flag & FPIPE != 0 {
            self.closep(f);
        }
        if count <= 1 {
            self.closei(i, ino, flag & FWRITE);
        }
        f.borrow_mut().count -= 1;
    }

    /// The device close hook runs only on the last reference.
    pub(crate) fn closei(&mut self, i: usize, ino: u16, rw: u16) {
        let (count, major, minor) = {
            let ip = self.disk.inode(ino);
            (ip.count, ip.stat.major, ip.stat.minor)
        };
        let _ = rw;
        if count <= 1 && major != 0 {
            devtab(major).close(self, i, minor);
        }
        self.disk.iput(ino);
    }

    /// The device open hook runs on every open.
    pub(crate) fn openi(&mut self, i: usize, ino: u16, rw: u16) {
        let (major, minor) = {
            let st = &self.disk.inode(ino).stat;
            (st.major, st.minor)
        };
        if major != 0 {
            devtab(major).open(self, i, minor, rw);
        }
    }

    /// Permission check that records EACCES on the process, V6 style.
    pub(crate) fn access_p(&mut self, i: usize, ino: u16, mode: u16) -> bool {
        let cred = self.procs[i].cred();
        match self.disk.access(cred, ino, mode) {
            Ok(()) => true,
            Err(e) => {
                self.procs[i].error = Some(e);
                false
            }
        }
    }

    /// True for root; otherwise records EPERM.
    pub(crate) fn suser(&mut self, i: usize) -> bool {
        if self.procs[i].uid == 0 {
            return true;
        }
        self.procs[i].error = Some(Errno::EPERM);
        false
    }

    /// Path walk in the context of process i, recording the error.
    pub(crate) fn namei_p(&mut self, i: usize, name: &str, op: NameiOp) -> Option<NameiRes> {
        let cred = self.procs[i].cred();
        let cwd = self.procs[i].dir;
        match self.disk.namei(cred, cwd, name, op) {
            Ok(res) => Some(res),
            Err(e) => {
                self.procs[i].error = Some(e);
                None
            }
        }
    }

    /// Looks up a path and checks ownership (or superuser).
    pub(crate) fn owner(&mut self, i: usize, addr: u16) -> Option<u16> {
        let name = self.procs[i].str_at(addr);
        let res = self.namei_p(i, &name, NameiOp::Find)?;
        let ino = res.ip?;
        if self.procs[i].uid != self.disk.inode(ino).stat.uid && !self.suser(i) {
            self.disk.iput(ino);
            return None;
        }
        Some(ino)
    }

    /// Reads from an inode into user memory. Character devices
    /// delegate to their driver; regular files copy from the data
    /// vector.
    pub(crate) fn readi(
        &mut self,
        i: usize,
        ino: u16,
        addr: u16,
        count: u16,
        off: i32,
    ) -> Result<u16, Suspend> {
        let (major, minor) = {
            let now = self.disk.now();
            let ip = self.disk.inode_mut(ino);
            ip.stat.atime = now;
            (ip.stat.major, ip.stat.minor)
        };
        if major != 0 {
            return devtab(major).read(self, i, minor, addr, count, off);
        }
        let disk = &self.disk;
        let procs = &mut self.procs;
        let data = &disk.inodes[ino as usize].as_ref().unwrap().data;
        if off < 0 || off as usize >= data.len() {
            return Ok(0);
        }
        let off = off as usize;
        let n = (count as usize).min(data.len() - off);
        let a = addr as usize;
        procs[i].cpu.mem[a..a + n].copy_from_slice(&data[off..off + n]);
        Ok(n as u16)
    }

    /// Writes user memory into an inode, growing it up to the 24-bit
    /// limit and zero-filling any seek gap.
    pub(crate) fn writei(
        &mut self,
        i: usize,
        ino: u16,
        addr: u16,
        count: u16,
        off: i32,
    ) -> Result<u16, Suspend> {
        let now = self.disk.now();
        let (major, minor) = {
            let ip = self.disk.inode_mut(ino);
            ip.stat.atime = now;
            ip.stat.mtime = now;
            (ip.stat.major, ip.stat.minor)
        };
        if major != 0 {
            return devtab(major).write(self, i, minor, addr, count, off);
        }
        if off < 0 || off as usize + count as usize > MAX_FILE_SIZE {
            self.procs[i].error = Some(Errno::EIO);
            return Ok(0);
        }
        if count == 0 {
            return Ok(0);
        }
        let off = off as usize;
        let n = count as usize;
        let procs = &self.procs;
        let disk = &mut self.disk;
        let ip = disk.inodes[ino as usize].as_mut().unwrap();
        if off + n > ip.data.len() {
            ip.data.resize(off + n, 0);
        }
        let a = addr as usize;
        ip.data[off..off + n].copy_from_slice(&procs[i].cpu.mem[a..a + n]);
        ip.write_size();
        ip.stat.mtime = now;
        Ok(n as u16)
    }

    /// Common code for read and write: permissions, then pipe, device,
    /// or file I/O. The byte count lands in R0.
    fn rdwr(&mut self, i: usize, mode: u16) -> SysResult {
        let fd = self.procs[i].cpu.r[0];
        let Some(f) = self.getf(i, fd) else {
            return Ok(());
        };
        let (flag, ino, offset) = {
            let fb = f.borrow();
            (fb.flag, fb.ino, fb.offset)
        };
        if flag & mode == 0 {
            self.procs[i].error = Some(Errno::EBADF);
            return Ok(());
        }
        let addr = self.procs[i].args[0];
        let count = self.procs[i].args[1];
        if self.procs[i].mem_range(addr, count).is_none() {
            return Ok(());
        }
        let n;
        if flag & FPIPE != 0 {
            if mode == FREAD {
                n = self.readp(i, &f, addr, count)?;
            } else {
                n = self.writep(i, &f, addr, count)?;
            }
        } else {
            if mode == FREAD {
                n = self.readi(i, ino, addr, count, offset)?;
            } else {
                n = self.writei(i, ino, addr, count, offset)?;
            }
            f.borrow_mut().offset += n as i32;
        }
        self.procs[i].cpu.r[0] = n;
        Ok(())
    }

    pub(crate) fn sys_read(&mut self, i: usize) -> SysResult {
        self.rdwr(i, FREAD)
    }

    pub(crate) fn sys_write(&mut self, i: usize) -> SysResult {
        self.rdwr(i, FWRITE)
    }

    pub(crate) fn sys_open(&mut self, i: usize) -> SysResult {
        let addr = self.procs[i].args[0];
        let name = self.procs[i].str_at(addr);
        let omode = self.procs[i].args[1];
        let Some(res) = self.namei_p(i, &name, NameiOp::Find) else {
            return Ok(());
        };
        self.open1(i, res.ip.expect("find without inode"), omode + 1, 0);
        Ok(())
    }

    pub(crate) fn sys_create(&mut self, i: usize) -> SysResult {
        let addr = self.procs[i].args[0];
        let name = self.procs[i].str_at(addr);
        let Some(res) = self.namei_p(i, &name, NameiOp::Create) else {
            return Ok(());
        };
        if let Some(ip) = res.ip {
            if let Some(dp) = res.dp {
                self.disk.iput(dp);
            }
            self.open1(i, ip, FWRITE, 1);
            return Ok(());
        }
        let dp = res.dp.expect("create miss without parent");
        let mode = self.procs[i].args[1] & 0o7777 & !ISVTX;
        let cred = self.procs[i].cred();
        match self.disk.maknode(cred, base_name(&name), mode, dp, res.off) {
            Ok(ip) => {
                self.disk.iput(dp);
                self.open1(i, ip, FWRITE, 2);
            }
            Err(e) => {
                self.disk.iput(dp);
                self.procs[i].error = Some(e);
            }
        }
        Ok(())
    }

    /// Common code for open and creat: permissions, the file
    /// structure, and the device open hook.
    fn open1(&mut self, i: usize, ino: u16, mode: u16, trf: u16) {
        if trf != 2 {
            if mode & FREAD != 0 {
                self.access_p(i, ino, IREAD);
            }
            if mode & FWRITE != 0 {
                self.access_p(i, ino, IWRITE);
                if self.disk.inode(ino).stat.mode & IFMT == IFDIR {
                    self.procs[i].error = Some(Errno::EISDIR);
                }
            }
        }
        if self.procs[i].error.is_some() {
            self.disk.iput(ino);
            return;
        }
        if trf != 0 {
            self.disk.itrunc(ino);
        }

        let Some((fd, f)) = self.falloc(i) else {
            self.disk.iput(ino);
            return;
        };
        {
            let mut fb = f.borrow_mut();
            fb.flag = mode & (FREAD | FWRITE);
            fb.ino = ino;
        }
        self.openi(i, ino, mode & FWRITE);
        if self.procs[i].error.is_none() {
            return;
        }
        self.procs[i].files[fd as usize] = None;
        self.disk.iput(ino);
    }

    pub(crate) fn sys_close(&mut self, i: usize) -> SysResult {
        let fd = self.procs[i].cpu.r[0];
        let Some(f) = self.getf(i, fd) else {
            return Ok(());
        };
        self.procs[i].files[fd as usize] = None;
        self.closef(i, &f);
        Ok(())
    }

    /// seek(2) with the V6 whence encoding: 0..2 in bytes, 3..5 the
    /// same scaled by 512.
    pub(crate) fn sys_seek(&mut self, i: usize) -> SysResult {
        let fd = self.procs[i].cpu.r[0];
        let Some(f) = self.getf(i, fd) else {
            return Ok(());
        };
        if f.borrow().flag & FPIPE != 0 {
            self.procs[i].error = Some(Errno::ESPIPE);
            return Ok(());
        }
        let ptr = self.procs[i].args[1];
        let mut off = if ptr != 0 && ptr != 3 {
            self.procs[i].args[0] as i16 as i32
        } else {
            self.procs[i].args[0] as i32
        };
        if ptr >= 3 {
            off *= 512;
        }
        match ptr {
            0 | 3 => {}
            1 | 4 => off += f.borrow().offset,
            _ => off += self.disk.inode(f.borrow().ino).stat.size(),
        }
        f.borrow_mut().offset = off;
        Ok(())
    }

    pub(crate) fn sys_link(&mut self, i: usize) -> SysResult {
        let addr = self.procs[i].args[0];
        let name0 = self.procs[i].str_at(addr);
        let Some(res) = self.namei_p(i, &name0, NameiOp::Find) else {
            return Ok(());
        };
        let ip = res.ip.expect("find without inode");

        let done = |sys: &mut System, ip| sys.disk.iput(ip);

        if self.disk.inode(ip).stat.nlink >= 127 {
            self.procs[i].error = Some(Errno::EMLINK);
            done(self, ip);
            return Ok(());
        }
        if self.disk.inode(ip).stat.mode & IFMT == IFDIR && !self.suser(i) {
            done(self, ip);
            return Ok(());
        }

        let addr = self.procs[i].args[1];
        let name1 = self.procs[i].str_at(addr);
        let Some(res1) = self.namei_p(i, &name1, NameiOp::Create) else {
            done(self, ip);
            return Ok(());
        };
        if let Some(xp) = res1.ip {
            self.procs[i].error = Some(Errno::EEXIST);
            self.disk.iput(xp);
            if let Some(dp) = res1.dp {
                self.disk.iput(dp);
            }
            done(self, ip);
            return Ok(());
        }
        let dp = res1.dp.expect("create miss without parent");
        self.disk.wdir(ip, base_name(&name1), dp, res1.off);
        let now = self.disk.now();
        {
            let node = self.disk.inode_mut(ip);
            node.stat.nlink += 1;
            node.stat.mtime = now;
        }
        self.disk.iput(dp);
        done(self, ip);
        Ok(())
    }

    pub(crate) fn sys_unlink(&mut self, i: usize) -> SysResult {
        let addr = self.procs[i].args[0];
        let name = self.procs[i].str_at(addr);
        self.unlink(i, &name);
        Ok(())
    }

    pub(crate) fn unlink(&mut self, i: usize, name: &str) {
        let Some(res) = self.namei_p(i, name, NameiOp::Delete) else {
            return;
        };
        let ip = res.ip.expect("delete without inode");
        let dp = res.dp.expect("delete without parent");

        if self.disk.inode(ip).stat.mode & IFMT == IFDIR && !self.suser(i) {
            self.disk.iput(ip);
            self.disk.iput(dp);
            return;
        }

        let now = self.disk.now();
        for b in &mut self.disk.inode_mut(dp).data[res.off..res.off + DIRSIZ + 2] {
            *b = 0;
        }
        {
            let node = self.disk.inode_mut(ip);
            node.stat.nlink -= 1;
            node.stat.mtime = now;
        }
        self.disk.iput(ip);
        self.disk.iput(dp);
    }

    pub(crate) fn sys_chdir(&mut self, i: usize) -> SysResult {
        let addr = self.procs[i].args[0];
        let name = self.procs[i].str_at(addr);
        let Some(res) = self.namei_p(i, &name, NameiOp::Find) else {
            return Ok(());
        };
        let ip = res.ip.expect("find without inode");
        if self.disk.inode(ip).stat.mode & IFMT != IFDIR {
            self.procs[i].error = Some(Errno::ENOTDIR);
            self.disk.iput(ip);
            return Ok(());
        }
        if !self.access_p(i, ip, IEXEC) {
            self.disk.iput(ip);
            return Ok(());
        }
        let old = self.procs[i].dir;
        self.disk.iput(old);
        self.procs[i].dir = ip;
        Ok(())
    }

    pub(crate) fn sys_chmod(&mut self, i: usize) -> SysResult {
        let Some(ip) = self.owner(i, self.procs[i].args[0]) else {
            return Ok(());
        };
        let mut newmode = self.procs[i].args[1];
        if self.procs[i].uid != 0 {
            newmode &= !ISVTX;
        }
        let now = self.disk.now();
        let node = self.disk.inode_mut(ip);
        node.stat.mode &= !0o7777;
        node.stat.mode |= newmode & 0o7777;
        node.stat.mtime = now;
        self.disk.iput(ip);
        Ok(())
    }

    pub(crate) fn sys_chown(&mut self, i: usize) -> SysResult {
        if !self.suser(i) {
            return Ok(());
        }
        let Some(ip) = self.owner(i, self.procs[i].args[0]) else {
            return Ok(());
        };
        let owner = self.procs[i].args[1];
        let now = self.disk.now();
        let node = self.disk.inode_mut(ip);
        node.stat.uid = owner as i8;
        node.stat.gid = (owner >> 8) as i8;
        node.stat.mtime = now;
        self.disk.iput(ip);
        Ok(())
    }

    fn copy_stat_out(&mut self, i: usize, ino: u16, addr: u16) {
        let Some((a, b)) = self.procs[i].mem_range(addr, 36) else {
            return;
        };
        let bytes = self.disk.inode(ino).stat.to_bytes();
        self.procs[i].cpu.mem[a..b].copy_from_slice(&bytes);
    }

    pub(crate) fn sys_stat(&mut self, i: usize) -> SysResult {
        let addr = self.procs[i].args[0];
        let name = self.procs[i].str_at(addr);
        let addr = self.procs[i].args[1];
        self.stat(i, &name, addr);
        Ok(())
    }

    pub(crate) fn stat(&mut self, i: usize, name: &str, addr: u16) {
        let Some(res) = self.namei_p(i, name, NameiOp::Find) else {
            return;
        };
        let ip = res.ip.expect("find without inode");
        self.copy_stat_out(i, ip, addr);
        self.disk.iput(ip);
    }

    pub(crate) fn sys_fstat(&mut self, i: usize) -> SysResult {
        let fd = self.procs[i].cpu.r[0];
        let addr = self.procs[i].args[0];
        let Some(f) = self.getf(i, fd) else {
            return Ok(());
        };
        let ino = f.borrow().ino;
        self.copy_stat_out(i, ino, addr);
        Ok(())
    }

    pub(crate) fn sys_dup(&mut self, i: usize) -> SysResult {
        let fd = self.procs[i].cpu.r[0];
        let Some(f) = self.getf(i, fd) else {
            return Ok(());
        };
        let Some(nfd) = self.ufalloc(i) else {
            return Ok(());
        };
        f.borrow_mut().count += 1;
        self.procs[i].files[nfd as usize] = Some(f);
        Ok(())
    }

    /// mknod(2): superuser only; the third argument is the device word
    /// (major in the high byte).
    pub(crate) fn sys_mknod(&mut self, i: usize) -> SysResult {
        if !self.suser(i) {
            return Ok(());
        }
        let addr = self.procs[i].args[0];
        let name = self.procs[i].str_at(addr);
        let Some(res) = self.namei_p(i, &name, NameiOp::Create) else {
            return Ok(());
        };
        if let Some(ip) = res.ip {
            self.procs[i].error = Some(Errno::EEXIST);
            self.disk.iput(ip);
            if let Some(dp) = res.dp {
                self.disk.iput(dp);
            }
            return Ok(());
        }
        let dp = res.dp.expect("create miss without parent");
        let mode = self.procs[i].args[1];
        let dev = self.procs[i].args[2];
        let cred = self.procs[i].cred();
        match self.disk.maknode(cred, base_name(&name), mode, dp, res.off) {
            Ok(ip) => {
                let node = self.disk.inode_mut(ip);
                node.stat.minor = dev as u8;
                node.stat.major = (dev >> 8) as u8;
                self.disk.iput(ip);
            }
            Err(e) => self.procs[i].error = Some(e),
        }
        self.disk.iput(dp);
        Ok(())
    }

    pub(crate) fn sys_mount(&mut self, i: usize) -> SysResult {
        self.procs[i].error = Some(Errno::EINVAL);
        Ok(())
    }

    pub(crate) fn sys_umount(&mut self, i: usize) -> SysResult {
        self.procs[i].error = Some(Errno::EINVAL);
        Ok(())
    }

    pub(crate) fn sys_sync(&mut self, _i: usize) -> SysResult {
        // nothing to flush: the disk lives in memory
        Ok(())
    }

    /// Used by tests and the frontend to pick an inode apart without a
    /// running process.
    pub fn stat_path(&mut self, name: &str) -> Result<Inode, Errno> {
        let cred = crate::fs::Cred { uid: 0, gid: 0 };
        let res = self
            .disk
            .namei(cred, crate::param::ROOTINO, name, NameiOp::Find)?;
        let ino = res.ip.expect("find without inode");
        let st = self.disk.inode(ino).stat;
        let data = self.disk.inode(ino).data.clone();
        let count = self.disk.inode(ino).count - 1;
        self.disk.iput(ino);
        Ok(Inode {
            count,
            stat: st,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::ROOTINO;
    use crate::proc::{PStat, System};

    const ARCHIVE: &str = "\
-- /dev mode=040555 uid=0 gid=0 atime=0 mtime=0 --
-- /dev/null mode=020666 uid=0 gid=0 major=1 minor=1 atime=0 mtime=0 --
-- /etc/motd mode=0644 uid=0 gid=0 atime=0 mtime=0 --
hello
";

    fn sys_with_proc() -> System {
        let mut sys = System::new(ARCHIVE.as_bytes()).unwrap();
        let mut p = sys.new_proc();
        p.status = PStat::Run;
        sys.disk.inode_mut(ROOTINO).count += 1;
        sys.procs.push(p);
        sys
    }

    #[test]
    fn unlink_drops_the_name_and_the_inode() {
        let mut sys = sys_with_proc();
        let ino = sys.stat_path("/dev/null").unwrap().stat.inum;
        sys.unlink(0, "/dev/null");
        assert!(sys.procs[0].error.is_none());
        assert_eq!(sys.stat_path("/dev/null").unwrap_err(), Errno::ENOENT);
        // the last link is gone and nothing holds a reference
        assert!(sys.disk.inodes[ino as usize].is_none());
    }

    #[test]
    fn unlink_missing_is_enoent() {
        let mut sys = sys_with_proc();
        sys.unlink(0, "/nope");
        assert_eq!(sys.procs[0].error, Some(Errno::ENOENT));
    }

    #[test]
    fn dup_shares_the_file_handle() {
        let mut sys = sys_with_proc();
        let (fd, f) = sys.falloc(0).unwrap();
        assert_eq!(fd, 0);
        sys.procs[0].cpu.r[0] = fd;
        sys.sys_dup(0).unwrap();
        assert_eq!(sys.procs[0].cpu.r[0], 1);
        assert_eq!(f.borrow().count, 2);
        assert!(std::rc::Rc::ptr_eq(
            &f,
            sys.procs[0].files[1].as_ref().unwrap()
        ));
    }

    #[test]
    fn getf_checks_range() {
        let mut sys = sys_with_proc();
        assert!(sys.getf(0, 3).is_none());
        assert_eq!(sys.procs[0].error, Some(Errno::EBADF));
        sys.procs[0].error = None;
        assert!(sys.getf(0, 200).is_none());
        assert_eq!(sys.procs[0].error, Some(Errno::EBADF));
    }

    #[test]
    fn writei_grows_and_zero_fills() {
        let mut sys = sys_with_proc();
        let ino = {
            let cred = sys.procs[0].cred();
            let res = sys
                .disk
                .namei(cred, ROOTINO, "/etc/motd", NameiOp::Find)
                .unwrap();
            res.ip.unwrap()
        };
        // stage four bytes in process memory and write them at offset 10
        sys.procs[0].cpu.mem[0o1000..0o1004].copy_from_slice(b"tail");
        let n = sys.writei(0, ino, 0o1000, 4, 10).unwrap();
        assert_eq!(n, 4);
        let ip = sys.disk.inode(ino);
        assert_eq!(ip.data.len(), 14);
        assert_eq!(&ip.data[..6], b"hello\n");
        assert_eq!(&ip.data[6..10], &[0, 0, 0, 0]);
        assert_eq!(&ip.data[10..], b"tail");
        assert_eq!(ip.stat.size(), 14);
        sys.disk.iput(ino);
    }

    #[test]
    fn readi_copies_into_process_memory() {
        let mut sys = sys_with_proc();
        let ino = sys.stat_path("/etc/motd").unwrap().stat.inum;
        sys.disk.inode_mut(ino).count += 1;
        let n = sys.readi(0, ino, 0o2000, 100, 0).unwrap();
        assert_eq!(n, 6);
        assert_eq!(&sys.procs[0].cpu.mem[0o2000..0o2006], b"hello\n");
        // reads past the end return nothing
        assert_eq!(sys.readi(0, ino, 0o2000, 100, 99).unwrap(), 0);
        sys.disk.iput(ino);
    }
}
