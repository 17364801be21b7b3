use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

use crate::errno::Errno;
use crate::fs::{base_name, Cred, Disk, NameiOp, Stat, IALLOC, IFDIR, IFMT};
use crate::param::{DIRSIZ, ROOTINO};

/// Error from parsing a disk archive.
#[derive(Debug, Error)]
pub enum DiskError {
    #[error("invalid archive k=v: {0}")]
    InvalidMeta(String),
    #[error("{0}: decoding: {1}")]
    Base64(String, base64::DecodeError),
    #[error("{0}: {1}")]
    Path(String, Errno),
}

struct Member {
    name: String,
    meta: Vec<(String, String)>,
    data: Vec<u8>,
}

/// Parses the textual disk archive into the inode table.
///
/// Each member is introduced by a `-- /path k=v ... --` line; the body
/// runs to the next marker. A `link=` member adds a hard link to an
/// existing inode instead of allocating one. Missing parent
/// directories are created implicitly.
pub(crate) fn new_disk(archive: &[u8]) -> Result<Disk, DiskError> {
    let mut disk = Disk::empty();
    let root = Cred { uid: 0, gid: 0 };

    for m in parse_members(archive) {
        let mut st = Stat::default();
        let mut link = String::new();
        let mut b64 = false;
        for (k, v) in &m.meta {
            if k == "link" {
                link = v.clone();
                continue;
            }
            let n = parse_int(v).ok_or_else(|| DiskError::InvalidMeta(format!("{k}={v}")))?;
            match k.as_str() {
                "mode" => st.mode = n as u16,
                "uid" => st.uid = n as i8,
                "gid" => st.gid = n as i8,
                "major" => st.major = n as u8,
                "minor" => st.minor = n as u8,
                "atime" => st.atime = [(n >> 16) as u16, n as u16],
                "mtime" => st.mtime = [(n >> 16) as u16, n as u16],
                "base64" => b64 = n != 0,
                _ => return Err(DiskError::InvalidMeta(format!("{k}={v}"))),
            }
        }

        ensure_parents(&mut disk, root, &m.name)?;
        let res = disk
            .namei(root, ROOTINO, &m.name, NameiOp::Create)
            .map_err(|e| DiskError::Path(m.name.clone(), e))?;

        if !link.is_empty() {
            // hard link: point a new directory entry at an existing inode
            let dp = res.dp.ok_or_else(|| DiskError::Path(m.name.clone(), Errno::EEXIST))?;
            let lres = disk
                .namei(root, ROOTINO, &link, NameiOp::Find)
                .map_err(|e| DiskError::Path(link.clone(), e))?;
            let lp = lres.ip.unwrap();
            disk.wdir(lp, base_name(&m.name), dp, res.off);
            disk.inode_mut(lp).stat.nlink += 1;
            disk.iput(lp);
            disk.iput(dp);
            continue;
        }

        let ino = match res.ip {
            Some(ino) => {
                // already materialized (an implicitly created directory)
                ino
            }
            None => {
                let dp = res.dp.unwrap();
                let ino = disk
                    .maknode(root, base_name(&m.name), st.mode, dp, res.off)
                    .map_err(|e| DiskError::Path(m.name.clone(), e))?;
                if st.mode & IFMT == IFDIR {
                    init_dir(&mut disk, ino, dp);
                }
                disk.iput(dp);
                ino
            }
        };

        // metadata from the archive wins, identity from the table;
        // the allocated bit is implied
        {
            let ip = disk.inode_mut(ino);
            st.dev = ip.stat.dev;
            st.inum = ip.stat.inum;
            st.nlink = ip.stat.nlink;
            ip.stat = st;
            ip.stat.mode |= IALLOC;
        }
        if disk.inode(ino).stat.mode & IFMT == 0 {
            let data = if b64 {
                let text: Vec<u8> = m.data.iter().copied().filter(|c| !c.is_ascii_whitespace()).collect();
                BASE64
                    .decode(&text)
                    .map_err(|e| DiskError::Base64(m.name.clone(), e))?
            } else {
                m.data
            };
            disk.inode_mut(ino).data = data;
        }
        disk.inode_mut(ino).write_size();
        disk.iput(ino);
    }

    Ok(disk)
}

/// Creates any missing intermediate directories along path.
fn ensure_parents(disk: &mut Disk, cred: Cred, path: &str) -> Result<(), DiskError> {
    let trimmed = path.trim_start_matches('/');
    let Some(i) = trimmed.rfind('/') else {
        return Ok(());
    };
    let mut done = String::from("/");
    for elem in trimmed[..i].split('/').filter(|e| !e.is_empty()) {
        done.push_str(elem);
        let res = disk
            .namei(cred, ROOTINO, &done, NameiOp::Create)
            .map_err(|e| DiskError::Path(done.clone(), e))?;
        match res.ip {
            Some(ino) => disk.iput(ino),
            None => {
                let dp = res.dp.unwrap();
                let ino = disk
                    .maknode(cred, base_name(&done), IFDIR | 0o777, dp, res.off)
                    .map_err(|e| DiskError::Path(done.clone(), e))?;
                init_dir(disk, ino, dp);
                disk.iput(dp);
                disk.iput(ino);
            }
        }
        done.push('/');
    }
    Ok(())
}

/// Materializes "." and ".." at the conventional offsets 0 and 16.
fn init_dir(disk: &mut Disk, ino: u16, parent: u16) {
    disk.wdir(ino, ".", ino, 0);
    disk.wdir(parent, "..", ino, DIRSIZ + 2);
}

fn parse_members(archive: &[u8]) -> Vec<Member> {
    let text = String::from_utf8_lossy(archive);
    let mut members: Vec<Member> = Vec::new();
    for line in text.split_inclusive('\n') {
        let trimmed = line.strip_suffix('\n').unwrap_or(line);
        if let Some(header) = marker(trimmed) {
            let mut fields = header.split_whitespace();
            let name = fields.next().unwrap_or("").to_string();
            let meta = fields
                .filter_map(|f| {
                    let (k, v) = f.split_once('=')?;
                    Some((k.to_string(), v.to_string()))
                })
                .collect();
            members.push(Member {
                name,
                meta,
                data: Vec::new(),
            });
        } else if let Some(m) = members.last_mut() {
            m.data.extend_from_slice(line.as_bytes());
        }
    }
    members
}

fn marker(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("-- ")?;
    let header = rest.strip_suffix(" --")?;
    Some(header.trim())
}

/// Accepts decimal, 0octal, and 0x hex like the original's ParseInt
/// with base 0.
fn parse_int(s: &str) -> Option<i64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    if s.len() > 1 && s.starts_with('0') {
        return i64::from_str_radix(&s[1..], 8).ok();
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{IFCHR, IREAD};

    const ARCHIVE: &str = "\
-- /dev mode=040555 uid=0 gid=0 atime=0 mtime=0 --
-- /dev/null mode=020666 uid=0 gid=0 major=1 minor=1 atime=0 mtime=0 --
-- /dev/tty8 mode=020620 uid=0 gid=0 major=4 minor=8 atime=0 mtime=0 --
-- /etc/motd mode=0644 uid=3 gid=2 atime=177300290 mtime=177300290 --
hello, v6
-- /etc/motd2 mode=0644 uid=0 gid=0 atime=0 mtime=0 link=/etc/motd --
-- /bin/blob mode=0755 uid=0 gid=0 atime=0 mtime=0 base64=1 --
aGVsbG8sIHY2Cg==
";

    fn find(disk: &mut Disk, path: &str) -> u16 {
        let cred = Cred { uid: 0, gid: 0 };
        let res = disk.namei(cred, ROOTINO, path, NameiOp::Find).unwrap();
        let ino = res.ip.unwrap();
        disk.iput(ino);
        ino
    }

    #[test]
    fn builds_device_nodes_and_files() {
        let mut d = new_disk(ARCHIVE.as_bytes()).unwrap();
        let null = find(&mut d, "/dev/null");
        let st = d.inode(null).stat;
        assert_eq!(st.mode, IALLOC | IFCHR | 0o666);
        assert_eq!((st.major, st.minor), (1, 1));

        let motd = find(&mut d, "/etc/motd");
        assert_eq!(d.inode(motd).data, b"hello, v6\n");
        assert_eq!(d.inode(motd).stat.uid, 3);
        let t = 177300290i64;
        assert_eq!(d.inode(motd).stat.atime, [(t >> 16) as u16, t as u16]);
    }

    #[test]
    fn implicit_directories_get_dot_entries() {
        let mut d = new_disk(ARCHIVE.as_bytes()).unwrap();
        let etc = find(&mut d, "/etc");
        let ip = d.inode(etc);
        assert_eq!(ip.stat.mode & IFMT, IFDIR);
        assert_eq!(crate::fs::dirent_name(&ip.data[0..16]), b".");
        assert_eq!(crate::fs::dirent_inum(&ip.data[0..16]), etc);
        assert_eq!(crate::fs::dirent_name(&ip.data[16..32]), b"..");
        assert_eq!(crate::fs::dirent_inum(&ip.data[16..32]), ROOTINO);
    }

    #[test]
    fn hard_links_share_the_inode() {
        let mut d = new_disk(ARCHIVE.as_bytes()).unwrap();
        let a = find(&mut d, "/etc/motd");
        let b = find(&mut d, "/etc/motd2");
        assert_eq!(a, b);
        assert_eq!(d.inode(a).stat.nlink, 2);
    }

    #[test]
    fn base64_bodies_decode() {
        let mut d = new_disk(ARCHIVE.as_bytes()).unwrap();
        let blob = find(&mut d, "/bin/blob");
        assert_eq!(d.inode(blob).data, b"hello, v6\n");
        assert_eq!(d.inode(blob).stat.mode & IREAD, IREAD);
    }

    #[test]
    fn all_counts_drop_to_zero_after_build() {
        let d = new_disk(ARCHIVE.as_bytes()).unwrap();
        for ip in d.inodes.iter().flatten() {
            assert_eq!(ip.count, 0, "inode {}", ip.stat.inum);
        }
    }

    #[test]
    fn bad_metadata_is_rejected() {
        assert!(new_disk(b"-- /x mode=zebra --\n").is_err());
        assert!(new_disk(b"-- /x frobs=1 --\n").is_err());
    }
}
