use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::errno::Errno;

// https://man.cat-v.org/unix-6th/5/a.out

/// The three executable formats: 0o407 runs text and data in one
/// segment at address zero; 0o410 and 0o411 place text at zero and
/// data at the next 8 KiB boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum Magic {
    Plain = 0o407,
    ReadOnlyText = 0o410,
    SplitID = 0o411,
}

/// The eight-word a.out header.
#[derive(Debug, Clone, Copy)]
pub struct AoutHdr {
    pub magic: Magic,
    pub text_size: u16,
    pub data_size: u16,
    pub bss_size: u16,
    pub sym_size: u16,
    pub entry: u16, // always 0, ignored
    pub reloc_suppressed: u16,
}

/// A parsed executable. For 0o407, `text` is empty and `data` carries
/// the whole image, mirroring how it is laid out in memory.
#[derive(Debug)]
pub struct Aout {
    pub hdr: AoutHdr,
    pub text: Vec<u8>,
    pub data: Vec<u8>,
}

const MAX_TEXT_SIZE: u32 = 50000;

impl Aout {
    pub fn parse(b: &[u8]) -> Result<Aout, Errno> {
        if b.len() < 16 {
            return Err(Errno::ENOEXEC);
        }
        let w = |i: usize| u16::from_le_bytes([b[2 * i], b[2 * i + 1]]);
        let magic = Magic::from_u16(w(0)).ok_or(Errno::ENOEXEC)?;
        let hdr = AoutHdr {
            magic,
            text_size: w(1),
            data_size: w(2),
            bss_size: w(3),
            sym_size: w(4),
            entry: w(5),
            reloc_suppressed: w(7),
        };
        let af = Aout {
            hdr,
            text: Vec::new(),
            data: Vec::new(),
        };

        if (af.text_size() | af.data_size()) & 1 != 0 {
            return Err(Errno::ENOEXEC);
        }
        if af.text_size() as u32 + af.data_size() as u32 > MAX_TEXT_SIZE {
            return Err(Errno::E2BIG);
        }

        let body = &b[16..];
        let (tn, dn) = (af.text_size() as usize, af.data_size() as usize);
        if body.len() < tn + dn {
            return Err(Errno::ENOEXEC);
        }
        Ok(Aout {
            hdr,
            text: body[..tn].to_vec(),
            data: body[tn..tn + dn].to_vec(),
        })
    }

    /// Loaded text size: zero for 0o407, whose text is treated as data.
    pub fn text_size(&self) -> u16 {
        match self.hdr.magic {
            Magic::Plain => 0,
            _ => self.hdr.text_size,
        }
    }

    pub fn data_size(&self) -> u16 {
        match self.hdr.magic {
            Magic::Plain => self.hdr.text_size.wrapping_add(self.hdr.data_size),
            _ => self.hdr.data_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(magic: u16, text: &[u8], data: &[u8]) -> Vec<u8> {
        let mut b = Vec::new();
        for w in [
            magic,
            text.len() as u16,
            data.len() as u16,
            0,
            0,
            0,
            0,
            1,
        ] {
            b.extend_from_slice(&w.to_le_bytes());
        }
        b.extend_from_slice(text);
        b.extend_from_slice(data);
        b
    }

    #[test]
    fn plain_magic_folds_text_into_data() {
        let af = Aout::parse(&image(0o407, &[1, 2, 3, 4], &[5, 6])).unwrap();
        assert_eq!(af.text_size(), 0);
        assert_eq!(af.data_size(), 6);
        assert_eq!(af.data, [1, 2, 3, 4, 5, 6]);
        assert!(af.text.is_empty());
    }

    #[test]
    fn split_magic_keeps_segments() {
        let af = Aout::parse(&image(0o410, &[1, 2], &[3, 4])).unwrap();
        assert_eq!(af.text_size(), 2);
        assert_eq!(af.data_size(), 2);
        assert_eq!(af.text, [1, 2]);
        assert_eq!(af.data, [3, 4]);
    }

    #[test]
    fn rejects_bad_magic_and_odd_sizes() {
        assert_eq!(Aout::parse(&image(0o405, &[], &[])).unwrap_err(), Errno::ENOEXEC);
        assert_eq!(
            Aout::parse(&image(0o410, &[1], &[])).unwrap_err(),
            Errno::ENOEXEC
        );
        assert_eq!(Aout::parse(&[1, 2, 3]).unwrap_err(), Errno::ENOEXEC);
    }

    #[test]
    fn rejects_oversized_images() {
        let text = vec![0u8; 40000];
        let data = vec![0u8; 20000];
        assert_eq!(
            Aout::parse(&image(0o410, &text, &data)).unwrap_err(),
            Errno::E2BIG
        );
    }
}
