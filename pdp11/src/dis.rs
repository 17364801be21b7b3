use std::fmt::Write;

use num_traits::FromPrimitive;

use crate::asm::parse_asm;
use crate::cpu::{Cpu, CpuError, Reg};
use crate::inst;

impl Cpu {
    /// Disassembles the instruction at pc, reading any extension words
    /// from memory, and returns the text plus the address of the next
    /// instruction.
    pub fn disasm(&self, pc: u16) -> Result<(String, u16), CpuError> {
        let code = self.read_w(pc)?;
        let row = inst::lookup(code);
        if row.text.is_empty() {
            return Err(CpuError::Inst); // unknown instruction
        }
        let mut next = pc.wrapping_add(2);
        let (op, args) = parse_asm(row.text);
        let mut out = String::from(op);
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push(' ');

            match *arg {
                "%b" => {
                    // branch offset
                    let target = next.wrapping_add((code as i8 as i16 as u16).wrapping_mul(2));
                    let _ = write!(out, "{target:o}");
                }
                "%B" => {
                    // sob offset
                    let target = next.wrapping_sub(2 * (code & 0o77));
                    let _ = write!(out, "{target:o}");
                }
                "%n" => {
                    // emt/trap number
                    let _ = write!(out, "{:o}", code & 0o377);
                }
                "%N" => {
                    // spl level
                    let _ = write!(out, "{:o}", code & 0o7);
                }
                "%r" => {
                    // register number at bit 6
                    let _ = write!(out, "{}", Reg::from_u16((code >> 6) & 0o7).unwrap());
                }
                "%R" => {
                    // register number at bit 0
                    let _ = write!(out, "{}", Reg::from_u16(code & 0o7).unwrap());
                }
                "%d" | "%s" => {
                    let mut w = code;
                    if *arg == "%s" {
                        w >>= 6;
                    }
                    let (s, n) = self.fmt_arg(w, next)?;
                    next = n;
                    out += &s;
                }
                "%a" => {
                    // fp accumulator
                    let _ = write!(out, "f{}", (code >> 6) & 0o3);
                }
                "%f" => {
                    // fsrc/fdst
                    if code & 0o70 == 0 {
                        if code & 0o7 >= 6 {
                            return Err(CpuError::Inst);
                        }
                        let _ = write!(out, "f{}", code & 0o7);
                    } else {
                        let (s, n) = self.fmt_arg(code, next)?;
                        next = n;
                        out += &s;
                    }
                }
                other => out += other,
            }
        }
        Ok((out, next))
    }

    fn fmt_arg(&self, w: u16, next: u16) -> Result<(String, u16), CpuError> {
        let r = w & 0o7;
        let mode = (w >> 3) & 0o7;

        // Conveniences for PC-relative data and immediates.
        if r == 7 {
            if let Ok(imm) = self.read_w(next) {
                match mode {
                    2 => return Ok((format!("#{}", octal_i16(imm as i16)), next.wrapping_add(2))),
                    3 => return Ok((format!("@#{imm:o}"), next.wrapping_add(2))),
                    6 => {
                        let target = next.wrapping_add(2).wrapping_add(imm);
                        return Ok((format!("{target:o}"), next.wrapping_add(2)));
                    }
                    7 => {
                        let target = next.wrapping_add(2).wrapping_add(imm);
                        return Ok((format!("@{target:o}"), next.wrapping_add(2)));
                    }
                    _ => {}
                }
            }
        }

        let reg = Reg::from_u16(r).unwrap().to_string();
        if mode == 0 {
            // register
            return Ok((reg, next));
        }
        let reg = format!("({reg})");
        if mode == 1 {
            // indirect register
            return Ok((reg, next));
        }

        // General memory access.
        let indir = if mode & 1 != 0 { "@" } else { "" };
        match mode & !1 {
            2 => Ok((format!("{indir}{reg}+"), next)),
            4 => Ok((format!("{indir}-{reg}"), next)),
            6 => {
                let imm = self.read_w(next)?;
                Ok((
                    format!("{indir}{}{reg}", octal_i16(imm as i16)),
                    next.wrapping_add(2),
                ))
            }
            _ => unreachable!(),
        }
    }
}

fn octal_i16(v: i16) -> String {
    if v < 0 {
        format!("-{:o}", -(v as i32))
    } else {
        format!("{v:o}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u16 = 0o010000;

    fn dis(codes: &[u16]) -> (String, u16) {
        let mut cpu = Cpu::default();
        for (i, c) in codes.iter().enumerate() {
            cpu.mem.set_word(BASE + 2 * i as u16, *c);
        }
        cpu.disasm(BASE).unwrap()
    }

    #[test]
    fn simple_forms() {
        assert_eq!(dis(&[0o010001]), ("mov r0, r1".to_string(), BASE + 2));
        assert_eq!(dis(&[0o000240]), ("nop".to_string(), BASE + 2));
        assert_eq!(dis(&[0o000300]), ("swab r0".to_string(), BASE + 2));
        assert_eq!(dis(&[0o104431]), ("trap 31".to_string(), BASE + 2));
    }

    #[test]
    fn extension_words() {
        assert_eq!(
            dis(&[0o012700, 0o12]),
            ("mov #12, r0".to_string(), BASE + 4)
        );
        assert_eq!(
            dis(&[0o012700, 0o177777]),
            ("mov #-1, r0".to_string(), BASE + 4)
        );
        assert_eq!(
            dis(&[0o013700, 0o1000]),
            ("mov @#1000, r0".to_string(), BASE + 4)
        );
        assert_eq!(
            dis(&[0o016501, 0o177776]),
            ("mov -2(r5), r1".to_string(), BASE + 4)
        );
    }

    #[test]
    fn pc_relative_targets() {
        // mode 67: the printed operand is the absolute target address
        let (text, next) = dis(&[0o005767, 0o100]);
        assert_eq!(next, BASE + 4);
        assert_eq!(text, format!("tst {:o}", BASE + 4 + 0o100));
    }

    #[test]
    fn branch_targets() {
        assert_eq!(dis(&[0o000777]).0, format!("br {:o}", BASE));
        assert_eq!(dis(&[0o000401]).0, format!("br {:o}", BASE + 4));
        assert_eq!(dis(&[0o077101]).0, format!("sob r1, {:o}", BASE));
    }

    #[test]
    fn floating_forms() {
        assert_eq!(dis(&[0o172401]).0, "ldf f1, f0");
        assert_eq!(dis(&[0o174246]).0, "stf f2, -(sp)");
        assert_eq!(dis(&[0o170011]).0, "setd");
    }

    #[test]
    fn unknown_opcodes_error() {
        let mut cpu = Cpu::default();
        cpu.mem.set_word(BASE, 0o007000);
        assert!(cpu.disasm(BASE).is_err());
        cpu.mem.set_word(BASE, 0o170406); // clrf f6 does not exist
        assert!(cpu.disasm(BASE).is_err());
    }
}
