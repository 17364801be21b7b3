use num_traits::ToPrimitive;
use thiserror::Error;

use crate::cpu::Reg;
use crate::inst;

/// Error from assembling one instruction.
#[derive(Debug, Error)]
#[error("asm {text:?}: {msg}")]
pub struct AsmError {
    text: String,
    msg: String,
}

/// Assembles a single instruction at pc, returning the instruction word
/// followed by any extension words. All numeric literals are octal.
pub fn asm(pc: u16, text: &str) -> Result<Vec<u16>, AsmError> {
    asm1(pc, text).map_err(|msg| AsmError {
        text: text.to_string(),
        msg,
    })
}

fn asm1(pc: u16, text: &str) -> Result<Vec<u16>, String> {
    let (op, args) = parse_asm(text);
    let inst = inst::lookup_asm(op).ok_or_else(|| "unknown instruction".to_string())?;
    let (_, iargs) = parse_asm(inst.text);
    if args.len() != iargs.len() {
        return Err(format!(
            "invalid argument count {} != {}",
            args.len(),
            iargs.len()
        ));
    }

    let mut out = vec![inst.code];
    for (arg, iarg) in args.iter().zip(iargs.iter()) {
        match *iarg {
            "%b" => {
                // branch offset
                let n = parse_const(arg)?;
                let d = (n.wrapping_sub(pc.wrapping_add(2)) as i16) / 2;
                if d != d as i8 as i16 {
                    return Err("branch target out of range".to_string());
                }
                out[0] |= d as u16 & 0o377;
            }
            "%B" => {
                // sob offset
                let n = parse_const(arg)?;
                let d = (n.wrapping_sub(pc.wrapping_add(2)) as i16) / 2;
                if d > 0 || d < -2 * 0o77 {
                    return Err("branch target out of range".to_string());
                }
                out[0] |= d.wrapping_neg() as u16 & 0o77;
            }
            "%n" => {
                // emt/trap number
                let n = parse_const(arg)?;
                if n != n & 0o377 {
                    return Err("emt/trap number out of range".to_string());
                }
                out[0] |= n;
            }
            "%N" => {
                // spl level
                let n = parse_const(arg)?;
                if n != n & 0o7 {
                    return Err("spl level out of range".to_string());
                }
                out[0] |= n;
            }
            "%r" => out[0] |= parse_reg(arg)? << 6, // register number at bit 6
            "%R" => out[0] |= parse_reg(arg)?,      // register number at bit 0
            "%d" => parse_arg(pc, arg, 0, false, &mut out)?, // destination
            "%s" => parse_arg(pc, arg, 6, false, &mut out)?, // source
            "%f" => parse_arg(pc, arg, 0, true, &mut out)?, // fdst/fsrc
            "%a" => out[0] |= parse_ac(arg)?,       // accumulator index
            _ => {}
        }
    }
    Ok(out)
}

/// Splits "op arg1, arg2" into the mnemonic and trimmed argument list.
/// Used both on input lines and on instruction-table templates.
pub(crate) fn parse_asm(text: &str) -> (&str, Vec<&str>) {
    let text = text.trim();
    let (op, argstr) = match text.find([' ', '\t']) {
        Some(i) => (&text[..i], text[i..].trim()),
        None => (text, ""),
    };
    let mut args: Vec<&str> = argstr.split(',').map(str::trim).collect();
    while args.last() == Some(&"") {
        args.pop();
    }
    (op, args)
}

fn parse_ac(arg: &str) -> Result<u16, String> {
    match arg {
        "f0" | "f1" | "f2" | "f3" => Ok(((arg.as_bytes()[1] - b'0') as u16) << 6),
        _ => Err("invalid float accumulator".to_string()),
    }
}

fn parse_reg(arg: &str) -> Result<u16, String> {
    let r = match arg {
        "r0" => Reg::R0,
        "r1" => Reg::R1,
        "r2" => Reg::R2,
        "r3" => Reg::R3,
        "r4" => Reg::R4,
        "r5" => Reg::R5,
        "r6" | "sp" => Reg::SP,
        "r7" | "pc" => Reg::PC,
        _ => return Err("invalid register".to_string()),
    };
    Ok(r.to_u16().unwrap())
}

fn parse_const(arg: &str) -> Result<u16, String> {
    if let Ok(n) = u16::from_str_radix(arg, 8) {
        return Ok(n);
    }
    if let Ok(n) = i16::from_str_radix(arg, 8) {
        return Ok(n as u16);
    }
    Err(format!("invalid constant {arg:?}"))
}

fn parse_arg(
    pc: u16,
    arg: &str,
    shift: u32,
    fp: bool,
    codes: &mut Vec<u16>,
) -> Result<(), String> {
    if arg.is_empty() {
        return Err("empty arg".to_string());
    }
    let b = arg.as_bytes();
    if !fp && (b[0] == b'r' || b[0] == b'p' || b[0] == b's') {
        let r = parse_reg(arg)?;
        codes[0] |= r << shift;
        return Ok(());
    }
    if fp && b.len() == 2 && b[0] == b'f' && (b'0'..=b'5').contains(&b[1]) {
        codes[0] |= ((b[1] - b'0') as u16) << shift;
        return Ok(());
    }

    let mut mode = 0u16;
    let mut arg = arg;
    if arg.starts_with('@') {
        mode |= 0o10; // indirect bit
        arg = &arg[1..];
        if arg.is_empty() {
            return Err("invalid indirect".to_string());
        }
    }

    let first = arg.as_bytes()[0];
    if (b'0'..=b'7').contains(&first) && !arg.contains('(') {
        // pc-relative address, offset loaded from instruction stream
        let n = parse_const(arg)?;
        codes[0] |= (0o67 | mode) << shift;
        let next = pc.wrapping_add(2 * (1 + codes.len() as u16));
        codes.push(n.wrapping_sub(next));
        return Ok(());
    }
    if first == b'#' {
        // constant loaded from instruction stream
        codes[0] |= (0o27 | mode) << shift;
        let n = parse_const(&arg[1..])?;
        codes.push(n);
        return Ok(());
    }

    let mut imm = 0u16;
    let mut have_imm = false;
    if let Some(i) = arg.find('(') {
        let head = &arg[..i];
        if !head.is_empty() && head != "-" {
            // index offset, possibly negative
            imm = parse_const(head)?;
            have_imm = true;
            arg = &arg[i..];
        }
    }
    if arg.starts_with('-') {
        if have_imm {
            return Err("decrement with immediate".to_string());
        }
        mode |= 0o40; // pre-decrement
        arg = &arg[1..];
        if arg.is_empty() {
            return Err("bad argument syntax".to_string());
        }
    }
    if !arg.starts_with('(') {
        return Err("bad argument syntax".to_string());
    }
    let (reg, rest) = arg[1..]
        .split_once(')')
        .ok_or_else(|| "bad argument syntax".to_string())?;
    let r = parse_reg(reg)?;
    if rest == "+" {
        if have_imm {
            return Err("increment with immediate".to_string());
        }
        mode |= 0o20; // post-increment
    } else {
        if !rest.is_empty() {
            return Err("bad argument syntax".to_string());
        }
        if have_imm {
            mode |= 0o60;
            codes.push(imm);
        }
        if mode == 0 {
            mode = 0o10;
        }
    }
    codes[0] |= (mode | r) << shift;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PC0: u16 = 0o010000;

    fn codes(text: &str) -> Vec<u16> {
        asm(PC0, text).unwrap()
    }

    #[test]
    fn register_modes() {
        assert_eq!(codes("mov r0, r1"), vec![0o010001]);
        assert_eq!(codes("mov (r0), r1"), vec![0o011001]);
        assert_eq!(codes("mov (r0)+, r1"), vec![0o012001]);
        assert_eq!(codes("mov @(r0)+, r1"), vec![0o013001]);
        assert_eq!(codes("mov -(r0), r1"), vec![0o014001]);
        assert_eq!(codes("mov @-(r0), r1"), vec![0o015001]);
        assert_eq!(codes("mov 4(r0), r1"), vec![0o016001, 4]);
        assert_eq!(codes("mov @4(r0), r1"), vec![0o017001, 4]);
        assert_eq!(codes("mov -2(r5), r1"), vec![0o016501, -2i16 as u16]);
    }

    #[test]
    fn immediates_and_absolute() {
        assert_eq!(codes("mov #12, r0"), vec![0o012700, 0o12]);
        assert_eq!(codes("mov #-1, r0"), vec![0o012700, 0o177777]);
        assert_eq!(codes("mov @#177776, r0"), vec![0o013700, 0o177776]);
        assert_eq!(codes("clr @#1000"), vec![0o005037, 0o1000]);
    }

    #[test]
    fn pc_relative() {
        // operand address is encoded relative to the word after the
        // extension word
        assert_eq!(codes("tst 10100"), vec![0o005767, 0o10100 - (PC0 + 4)]);
        assert_eq!(codes("tst @10100"), vec![0o005777, 0o10100 - (PC0 + 4)]);
        // second operand's extension sits one word later
        assert_eq!(
            codes("mov 10100, 10200"),
            vec![
                0o016767,
                0o10100u16.wrapping_sub(PC0 + 4),
                0o10200u16.wrapping_sub(PC0 + 6)
            ]
        );
    }

    #[test]
    fn branches() {
        assert_eq!(codes("br 10000"), vec![0o000400 | 0o377]); // .-2
        assert_eq!(codes("br 10002"), vec![0o000400]);
        assert_eq!(codes("bne 10006"), vec![0o001002]);
        assert!(asm(PC0, "br 20000").is_err());
    }

    #[test]
    fn sob_is_a_backward_branch() {
        assert_eq!(codes("sob r1, 10000"), vec![0o077101]);
        assert!(asm(PC0, "sob r1, 10010").is_err());
    }

    #[test]
    fn traps_and_registers() {
        assert_eq!(codes("trap 31"), vec![0o104431]);
        assert_eq!(codes("emt 0"), vec![0o104000]);
        assert_eq!(codes("jsr pc, (r3)"), vec![0o004713]);
        assert_eq!(codes("rts r5"), vec![0o000205]);
        assert_eq!(codes("spl 7"), vec![0o000237]);
    }

    #[test]
    fn floating_point_forms() {
        assert_eq!(codes("ldf f1, f0"), vec![0o172401]);
        assert_eq!(codes("stf f2, -(sp)"), vec![0o174246]);
        assert_eq!(codes("ldcif #5, f1"), vec![0o177527, 5]);
        assert_eq!(codes("setd"), vec![0o170011]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(asm(PC0, "frob r0").is_err());
        assert!(asm(PC0, "mov r0").is_err());
        assert!(asm(PC0, "mov r9, r0").is_err());
        assert!(asm(PC0, "mov 2(r0)+, r1").is_err());
        assert!(asm(PC0, "trap 400").is_err());
    }
}
