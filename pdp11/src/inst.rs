use crate::cpu::{Cpu, CpuError};
use crate::{exec, flt};

/// One row of the instruction table: the smallest opcode the row covers,
/// the handler, and the textual form with operand placeholders used by
/// the assembler and disassembler.
pub(crate) struct Instr {
    pub code: u16,
    pub exec: fn(&mut Cpu) -> Result<(), CpuError>,
    pub text: &'static str,
}

macro_rules! i {
    ($code:expr, $exec:path, $text:expr) => {
        Instr {
            code: $code,
            exec: $exec,
            text: $text,
        }
    };
}

/// The table is sorted by opcode; lookup finds the last entry whose
/// opcode is <= the instruction word, and the handler masks out the
/// operand bits itself.
pub(crate) static ITAB: &[Instr] = &[
    i!(0o000000, exec::bad, "halt"), // halt is invalid in user mode
    i!(0o000001, exec::bad, "wait"),
    i!(0o000002, exec::bad, "rti"),
    i!(0o000003, exec::bpt, "bpt"),
    i!(0o000004, exec::iot, "iot"),
    i!(0o000005, exec::bad, "reset"),
    i!(0o000006, exec::bad, "rtt"),
    i!(0o000007, exec::bad, ""),
    i!(0o000100, exec::jmp, "jmp %d"),
    i!(0o000200, exec::rts, "rts %R"),
    i!(0o000210, exec::bad, ""),
    i!(0o000230, exec::bad, "spl %N"),
    i!(0o000240, exec::ccc, "nop"),
    i!(0o000241, exec::ccc, "clc"),
    i!(0o000242, exec::ccc, "clv"),
    i!(0o000243, exec::ccc, "clvc"),
    i!(0o000244, exec::ccc, "clz"),
    i!(0o000245, exec::ccc, "clzc"),
    i!(0o000246, exec::ccc, "clzv"),
    i!(0o000247, exec::ccc, "clzvc"),
    i!(0o000250, exec::ccc, "cln"),
    i!(0o000251, exec::ccc, "clnc"),
    i!(0o000252, exec::ccc, "clnv"),
    i!(0o000253, exec::ccc, "clnvc"),
    i!(0o000254, exec::ccc, "clnz"),
    i!(0o000255, exec::ccc, "clnzc"),
    i!(0o000256, exec::ccc, "clnzv"),
    i!(0o000257, exec::ccc, "ccc"),
    i!(0o000260, exec::scc, "snop"),
    i!(0o000261, exec::scc, "sec"),
    i!(0o000262, exec::scc, "sev"),
    i!(0o000263, exec::scc, "sevc"),
    i!(0o000264, exec::scc, "sez"),
    i!(0o000265, exec::scc, "sezc"),
    i!(0o000266, exec::scc, "sezv"),
    i!(0o000267, exec::scc, "sezvc"),
    i!(0o000270, exec::scc, "sen"),
    i!(0o000271, exec::scc, "senc"),
    i!(0o000272, exec::scc, "senv"),
    i!(0o000273, exec::scc, "senvc"),
    i!(0o000274, exec::scc, "senz"),
    i!(0o000275, exec::scc, "senzc"),
    i!(0o000276, exec::scc, "senzv"),
    i!(0o000277, exec::scc, "scc"),
    i!(0o000300, exec::swab, "swab %d"),
    i!(0o000400, exec::br, "br %b"),
    i!(0o001000, exec::bne, "bne %b"),
    i!(0o001400, exec::beq, "beq %b"),
    i!(0o002000, exec::bge, "bge %b"),
    i!(0o002400, exec::blt, "blt %b"),
    i!(0o003000, exec::bgt, "bgt %b"),
    i!(0o003400, exec::ble, "ble %b"),
    i!(0o004000, exec::jsr, "jsr %r, %d"),
    i!(0o005000, exec::clr, "clr %d"),
    i!(0o005100, exec::com, "com %d"),
    i!(0o005200, exec::inc, "inc %d"),
    i!(0o005300, exec::dec, "dec %d"),
    i!(0o005400, exec::neg, "neg %d"),
    i!(0o005500, exec::adc, "adc %d"),
    i!(0o005600, exec::sbc, "sbc %d"),
    i!(0o005700, exec::tst, "tst %d"),
    i!(0o006000, exec::ror, "ror %d"),
    i!(0o006100, exec::rol, "rol %d"),
    i!(0o006200, exec::asr, "asr %d"),
    i!(0o006300, exec::asl, "asl %d"),
    i!(0o006400, exec::bad, "mark %d"),
    i!(0o006500, exec::bad, "mfpi %d"),
    i!(0o006600, exec::bad, "mtpi %d"),
    i!(0o006700, exec::sxt, "sxt %d"),
    i!(0o007000, exec::bad, ""),
    i!(0o010000, exec::mov, "mov %s, %d"),
    i!(0o020000, exec::cmp, "cmp %s, %d"),
    i!(0o030000, exec::bit, "bit %s, %d"),
    i!(0o040000, exec::bic, "bic %s, %d"),
    i!(0o050000, exec::bis, "bis %s, %d"),
    i!(0o060000, exec::add, "add %s, %d"),
    i!(0o070000, exec::mul, "mul %d, %r"),
    i!(0o071000, exec::div, "div %d, %r"),
    i!(0o072000, exec::ash, "ash %d, %r"),
    i!(0o073000, exec::ashc, "ashc %d, %r"),
    i!(0o074000, exec::xor, "xor %r, %d"),
    i!(0o075000, exec::bad, ""),
    i!(0o077000, exec::sob, "sob %r, %B"),
    i!(0o100000, exec::bpl, "bpl %b"),
    i!(0o100400, exec::bmi, "bmi %b"),
    i!(0o101000, exec::bhi, "bhi %b"),
    i!(0o101400, exec::blos, "blos %b"),
    i!(0o102000, exec::bvc, "bvc %b"),
    i!(0o102400, exec::bvs, "bvs %b"),
    i!(0o103000, exec::bcc, "bcc %b"),
    i!(0o103400, exec::bcs, "bcs %b"),
    i!(0o104000, exec::emt, "emt %n"),
    i!(0o104400, exec::trap, "trap %n"),
    i!(0o105000, exec::clrb, "clrb %d"),
    i!(0o105100, exec::comb, "comb %d"),
    i!(0o105200, exec::incb, "incb %d"),
    i!(0o105300, exec::decb, "decb %d"),
    i!(0o105400, exec::negb, "negb %d"),
    i!(0o105500, exec::adcb, "adcb %d"),
    i!(0o105600, exec::sbcb, "sbcb %d"),
    i!(0o105700, exec::tstb, "tstb %d"),
    i!(0o106000, exec::rorb, "rorb %d"),
    i!(0o106100, exec::rolb, "rolb %d"),
    i!(0o106200, exec::asrb, "asrb %d"),
    i!(0o106300, exec::aslb, "aslb %d"),
    i!(0o106400, exec::bad, ""),
    i!(0o110000, exec::movb, "movb %s, %d"),
    i!(0o120000, exec::cmpb, "cmpb %s, %d"),
    i!(0o130000, exec::bitb, "bitb %s, %d"),
    i!(0o140000, exec::bicb, "bicb %s, %d"),
    i!(0o150000, exec::bisb, "bisb %s, %d"),
    i!(0o160000, exec::sub, "sub %s, %d"),
    i!(0o170000, flt::cfcc, "cfcc"),
    i!(0o170001, flt::setf, "setf"),
    i!(0o170002, flt::seti, "seti"),
    i!(0o170003, exec::bad, ""),
    i!(0o170011, flt::setd, "setd"),
    i!(0o170012, flt::setl, "setl"),
    i!(0o170013, exec::bad, ""),
    i!(0o170100, flt::ldfps, "ldfps %d"),
    i!(0o170200, flt::stfps, "stfps %d"),
    i!(0o170300, flt::stst, "stst %d"),
    i!(0o170400, flt::clrf, "clrf %f"),
    i!(0o170500, flt::tstf, "tstf %f"),
    i!(0o170600, flt::absf, "absf %f"),
    i!(0o170700, flt::negf, "negf %f"),
    i!(0o171000, flt::mulf, "mulf %f, %a"),
    i!(0o171400, flt::modf, "modf %f, %a"),
    i!(0o172000, flt::addf, "addf %f, %a"),
    i!(0o172400, flt::ldf, "ldf %f, %a"),
    i!(0o173000, flt::subf, "subf %f, %a"),
    i!(0o173400, flt::cmpf, "cmpf %f, %a"),
    i!(0o174000, flt::stf, "stf %a, %f"),
    i!(0o174400, flt::divf, "divf %f, %a"),
    i!(0o175000, flt::stexp, "stexp %a, %d"),
    i!(0o175400, flt::stcfi, "stcfi %a, %d"),
    i!(0o176000, flt::stcfd, "stcfd %a, %f"),
    i!(0o176400, flt::ldexp, "ldexp %d, %a"),
    i!(0o177000, flt::ldcdf, "ldcdf %f, %a"),
    i!(0o177400, flt::ldcif, "ldcif %d, %a"),
];

pub(crate) fn lookup(inst: u16) -> &'static Instr {
    let i = ITAB.partition_point(|row| row.code <= inst);
    &ITAB[i - 1]
}

pub(crate) fn lookup_asm(op: &str) -> Option<&'static Instr> {
    ITAB.iter()
        .find(|row| row.text.split(' ').next() == Some(op) && !row.text.is_empty())
}
