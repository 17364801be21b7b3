use pdp11::{asm, Cpu};

const BASE: u16 = 0o010000;

// Every valid encoding must survive Asm(Disasm(w...)) bit for bit,
// including any extension words the disassembler consumed.
#[test]
fn disasm_asm_round_trip_full_space() {
    let mut cpu = Cpu::default();
    for b in cpu.mem.iter_mut() {
        *b = 0o375;
    }
    for w in 0..=0xffffu32 {
        let codes = [w as u16, 0o100, 0o200, 0o300];
        for (i, c) in codes.iter().enumerate() {
            cpu.mem.set_word(BASE + 2 * i as u16, *c);
        }
        let (text, next) = match cpu.disasm(BASE) {
            Ok(r) => r,
            Err(_) => continue, // not a valid encoding
        };
        let n = ((next - BASE) / 2) as usize;
        let acodes =
            asm(BASE, &text).unwrap_or_else(|e| panic!("disasm({:06o}) = {text:?}: {e}", w));
        assert_eq!(acodes[..], codes[..n], "disasm({w:06o}) = {text:?}");
    }
}

// Same property with negative extension words, which print as signed
// octal index offsets and immediates.
#[test]
fn disasm_asm_round_trip_negative_extensions() {
    let mut cpu = Cpu::default();
    for w in [
        0o016501u16, // mov N(r5), r1
        0o017701,    // mov @N, r1
        0o012700,    // mov #N, r0
        0o005767,    // tst N
        0o176467,    // ldexp N, f1
    ] {
        let codes = [w, 0o177776, 0o177774, 0o177772];
        for (i, c) in codes.iter().enumerate() {
            cpu.mem.set_word(BASE + 2 * i as u16, *c);
        }
        let (text, next) = cpu.disasm(BASE).unwrap();
        let n = ((next - BASE) / 2) as usize;
        let acodes = asm(BASE, &text).unwrap();
        assert_eq!(acodes[..], codes[..n], "disasm({w:06o}) = {text:?}");
    }
}
