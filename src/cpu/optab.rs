//! The 256-entry instruction table.
//!
//! Each entry names the opcode's mnemonic, whether a ModR/M byte
//! follows, the base cycle cost, the architecture tier that introduced
//! it and the executor. Prefix bytes (segment overrides, REP/REPNE)
//! never reach the table; they are consumed by the opcode reader.

use crate::bus::Bus;

use super::execute as e;
use super::execute_ext as x;
use super::Cpu;

/// Architecture tier an opcode belongs to. Tiers above the emulated CPU
/// raise the undefined-opcode exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Invalid,
    Fpu,
    I8086,
    I80186,
    I80286,
}

pub(crate) type ExecFn = fn(&mut Cpu, &mut Bus);

pub(crate) struct Instruction {
    pub opcode: u8,
    pub name: &'static str,
    pub modregrm: bool,
    pub cycles: u32,
    pub arch: Arch,
    pub exec: ExecFn,
}

const fn op(
    opcode: u8,
    name: &'static str,
    modregrm: bool,
    cycles: u32,
    arch: Arch,
    exec: ExecFn,
) -> Instruction {
    Instruction { opcode, name, modregrm, cycles, arch, exec }
}

use Arch::{Fpu, Invalid, I80186, I80286, I8086};

#[rustfmt::skip]
pub(crate) static OPCODE_TABLE: [Instruction; 256] = [
    op(0x00, "add", true, 3, I8086, e::add_rm8_r8),
    op(0x01, "add", true, 3, I8086, e::add_rm16_r16),
    op(0x02, "add", true, 3, I8086, e::add_r8_rm8),
    op(0x03, "add", true, 3, I8086, e::add_r16_rm16),
    op(0x04, "add", false, 4, I8086, e::add_al_imm8),
    op(0x05, "add", false, 4, I8086, e::add_ax_imm16),
    op(0x06, "push", false, 10, I8086, e::push_es),
    op(0x07, "pop", false, 8, I8086, e::pop_es),
    op(0x08, "or", true, 3, I8086, e::or_rm8_r8),
    op(0x09, "or", true, 3, I8086, e::or_rm16_r16),
    op(0x0A, "or", true, 3, I8086, e::or_r8_rm8),
    op(0x0B, "or", true, 3, I8086, e::or_r16_rm16),
    op(0x0C, "or", false, 4, I8086, e::or_al_imm8),
    op(0x0D, "or", false, 4, I8086, e::or_ax_imm16),
    op(0x0E, "push", false, 10, I8086, e::push_cs),
    op(0x0F, "pop", false, 8, I8086, x::pop_cs_or_escape),
    op(0x10, "adc", true, 3, I8086, e::adc_rm8_r8),
    op(0x11, "adc", true, 3, I8086, e::adc_rm16_r16),
    op(0x12, "adc", true, 3, I8086, e::adc_r8_rm8),
    op(0x13, "adc", true, 3, I8086, e::adc_r16_rm16),
    op(0x14, "adc", false, 4, I8086, e::adc_al_imm8),
    op(0x15, "adc", false, 4, I8086, e::adc_ax_imm16),
    op(0x16, "push", false, 10, I8086, e::push_ss),
    op(0x17, "pop", false, 8, I8086, e::pop_ss),
    op(0x18, "sbb", true, 3, I8086, e::sbb_rm8_r8),
    op(0x19, "sbb", true, 3, I8086, e::sbb_rm16_r16),
    op(0x1A, "sbb", true, 3, I8086, e::sbb_r8_rm8),
    op(0x1B, "sbb", true, 3, I8086, e::sbb_r16_rm16),
    op(0x1C, "sbb", false, 4, I8086, e::sbb_al_imm8),
    op(0x1D, "sbb", false, 4, I8086, e::sbb_ax_imm16),
    op(0x1E, "push", false, 10, I8086, e::push_ds),
    op(0x1F, "pop", false, 8, I8086, e::pop_ds),
    op(0x20, "and", true, 3, I8086, e::and_rm8_r8),
    op(0x21, "and", true, 3, I8086, e::and_rm16_r16),
    op(0x22, "and", true, 3, I8086, e::and_r8_rm8),
    op(0x23, "and", true, 3, I8086, e::and_r16_rm16),
    op(0x24, "and", false, 4, I8086, e::and_al_imm8),
    op(0x25, "and", false, 4, I8086, e::and_ax_imm16),
    op(0x26, "es:", false, 2, I8086, e::nop),
    op(0x27, "daa", false, 4, I8086, e::daa),
    op(0x28, "sub", true, 3, I8086, e::sub_rm8_r8),
    op(0x29, "sub", true, 3, I8086, e::sub_rm16_r16),
    op(0x2A, "sub", true, 3, I8086, e::sub_r8_rm8),
    op(0x2B, "sub", true, 3, I8086, e::sub_r16_rm16),
    op(0x2C, "sub", false, 4, I8086, e::sub_al_imm8),
    op(0x2D, "sub", false, 4, I8086, e::sub_ax_imm16),
    op(0x2E, "cs:", false, 2, I8086, e::nop),
    op(0x2F, "das", false, 4, I8086, e::das),
    op(0x30, "xor", true, 3, I8086, e::xor_rm8_r8),
    op(0x31, "xor", true, 3, I8086, e::xor_rm16_r16),
    op(0x32, "xor", true, 3, I8086, e::xor_r8_rm8),
    op(0x33, "xor", true, 3, I8086, e::xor_r16_rm16),
    op(0x34, "xor", false, 4, I8086, e::xor_al_imm8),
    op(0x35, "xor", false, 4, I8086, e::xor_ax_imm16),
    op(0x36, "ss:", false, 2, I8086, e::nop),
    op(0x37, "aaa", false, 8, I8086, e::aaa),
    op(0x38, "cmp", true, 3, I8086, e::cmp_rm8_r8),
    op(0x39, "cmp", true, 3, I8086, e::cmp_rm16_r16),
    op(0x3A, "cmp", true, 3, I8086, e::cmp_r8_rm8),
    op(0x3B, "cmp", true, 3, I8086, e::cmp_r16_rm16),
    op(0x3C, "cmp", false, 4, I8086, e::cmp_al_imm8),
    op(0x3D, "cmp", false, 4, I8086, e::cmp_ax_imm16),
    op(0x3E, "ds:", false, 2, I8086, e::nop),
    op(0x3F, "aas", false, 8, I8086, e::aas),
    op(0x40, "inc", false, 3, I8086, e::inc_r16),
    op(0x41, "inc", false, 3, I8086, e::inc_r16),
    op(0x42, "inc", false, 3, I8086, e::inc_r16),
    op(0x43, "inc", false, 3, I8086, e::inc_r16),
    op(0x44, "inc", false, 3, I8086, e::inc_r16),
    op(0x45, "inc", false, 3, I8086, e::inc_r16),
    op(0x46, "inc", false, 3, I8086, e::inc_r16),
    op(0x47, "inc", false, 3, I8086, e::inc_r16),
    op(0x48, "dec", false, 3, I8086, e::dec_r16),
    op(0x49, "dec", false, 3, I8086, e::dec_r16),
    op(0x4A, "dec", false, 3, I8086, e::dec_r16),
    op(0x4B, "dec", false, 3, I8086, e::dec_r16),
    op(0x4C, "dec", false, 3, I8086, e::dec_r16),
    op(0x4D, "dec", false, 3, I8086, e::dec_r16),
    op(0x4E, "dec", false, 3, I8086, e::dec_r16),
    op(0x4F, "dec", false, 3, I8086, e::dec_r16),
    op(0x50, "push", false, 11, I8086, e::push_r16),
    op(0x51, "push", false, 11, I8086, e::push_r16),
    op(0x52, "push", false, 11, I8086, e::push_r16),
    op(0x53, "push", false, 11, I8086, e::push_r16),
    op(0x54, "push", false, 11, I8086, e::push_r16),
    op(0x55, "push", false, 11, I8086, e::push_r16),
    op(0x56, "push", false, 11, I8086, e::push_r16),
    op(0x57, "push", false, 11, I8086, e::push_r16),
    op(0x58, "pop", false, 8, I8086, e::pop_r16),
    op(0x59, "pop", false, 8, I8086, e::pop_r16),
    op(0x5A, "pop", false, 8, I8086, e::pop_r16),
    op(0x5B, "pop", false, 8, I8086, e::pop_r16),
    op(0x5C, "pop", false, 8, I8086, e::pop_r16),
    op(0x5D, "pop", false, 8, I8086, e::pop_r16),
    op(0x5E, "pop", false, 8, I8086, e::pop_r16),
    op(0x5F, "pop", false, 8, I8086, e::pop_r16),
    op(0x60, "pusha", false, 36, I80186, x::pusha),
    op(0x61, "popa", false, 51, I80186, x::popa),
    op(0x62, "bound", true, 13, I80186, x::bound_r16),
    op(0x63, "invalid", false, 2, Invalid, e::invalid_op),
    op(0x64, "invalid", false, 2, Invalid, e::invalid_op),
    op(0x65, "invalid", false, 2, Invalid, e::invalid_op),
    op(0x66, "invalid", false, 2, Invalid, e::invalid_op),
    op(0x67, "invalid", false, 2, Invalid, e::invalid_op),
    op(0x68, "push", false, 10, I80186, x::push_imm16),
    op(0x69, "imul", true, 22, I80186, x::imul_r16_rm16_imm16),
    op(0x6A, "push", false, 10, I80186, x::push_imm8),
    op(0x6B, "imul", true, 22, I80186, x::imul_r16_rm16_imm8),
    op(0x6C, "insb", false, 14, I80186, x::insb),
    op(0x6D, "insw", false, 14, I80186, x::insw),
    op(0x6E, "outsb", false, 14, I80186, x::outsb),
    op(0x6F, "outsw", false, 14, I80186, x::outsw),
    op(0x70, "jo", false, 4, I8086, e::jcc_short),
    op(0x71, "jno", false, 4, I8086, e::jcc_short),
    op(0x72, "jb", false, 4, I8086, e::jcc_short),
    op(0x73, "jnb", false, 4, I8086, e::jcc_short),
    op(0x74, "jz", false, 4, I8086, e::jcc_short),
    op(0x75, "jnz", false, 4, I8086, e::jcc_short),
    op(0x76, "jbe", false, 4, I8086, e::jcc_short),
    op(0x77, "ja", false, 4, I8086, e::jcc_short),
    op(0x78, "js", false, 4, I8086, e::jcc_short),
    op(0x79, "jns", false, 4, I8086, e::jcc_short),
    op(0x7A, "jp", false, 4, I8086, e::jcc_short),
    op(0x7B, "jnp", false, 4, I8086, e::jcc_short),
    op(0x7C, "jl", false, 4, I8086, e::jcc_short),
    op(0x7D, "jge", false, 4, I8086, e::jcc_short),
    op(0x7E, "jle", false, 4, I8086, e::jcc_short),
    op(0x7F, "jg", false, 4, I8086, e::jcc_short),
    op(0x80, "grp1", true, 4, I8086, e::grp1_rm8_imm8),
    op(0x81, "grp1", true, 4, I8086, e::grp1_rm16_imm16),
    op(0x82, "grp1", true, 4, I8086, e::grp1_rm8_imm8),
    op(0x83, "grp1", true, 4, I8086, e::grp1_rm16_imm8),
    op(0x84, "test", true, 3, I8086, e::test_rm8_r8),
    op(0x85, "test", true, 3, I8086, e::test_rm16_r16),
    op(0x86, "xchg", true, 4, I8086, e::xchg_rm8_r8),
    op(0x87, "xchg", true, 4, I8086, e::xchg_rm16_r16),
    op(0x88, "mov", true, 2, I8086, e::mov_rm8_r8),
    op(0x89, "mov", true, 2, I8086, e::mov_rm16_r16),
    op(0x8A, "mov", true, 2, I8086, e::mov_r8_rm8),
    op(0x8B, "mov", true, 2, I8086, e::mov_r16_rm16),
    op(0x8C, "mov", true, 2, I8086, e::mov_rm16_sreg),
    op(0x8D, "lea", true, 2, I8086, e::lea_r16),
    op(0x8E, "mov", true, 2, I8086, e::mov_sreg_rm16),
    op(0x8F, "pop", true, 17, I8086, e::pop_rm16),
    op(0x90, "nop", false, 3, I8086, e::nop),
    op(0x91, "xchg", false, 3, I8086, e::xchg_ax_r16),
    op(0x92, "xchg", false, 3, I8086, e::xchg_ax_r16),
    op(0x93, "xchg", false, 3, I8086, e::xchg_ax_r16),
    op(0x94, "xchg", false, 3, I8086, e::xchg_ax_r16),
    op(0x95, "xchg", false, 3, I8086, e::xchg_ax_r16),
    op(0x96, "xchg", false, 3, I8086, e::xchg_ax_r16),
    op(0x97, "xchg", false, 3, I8086, e::xchg_ax_r16),
    op(0x98, "cbw", false, 2, I8086, e::cbw),
    op(0x99, "cwd", false, 5, I8086, e::cwd),
    op(0x9A, "call", false, 28, I8086, e::call_far),
    op(0x9B, "wait", false, 4, I8086, e::nop),
    op(0x9C, "pushf", false, 10, I8086, e::pushf),
    op(0x9D, "popf", false, 8, I8086, e::popf),
    op(0x9E, "sahf", false, 4, I8086, e::sahf),
    op(0x9F, "lahf", false, 4, I8086, e::lahf),
    op(0xA0, "mov", false, 10, I8086, e::mov_al_moffs),
    op(0xA1, "mov", false, 10, I8086, e::mov_ax_moffs),
    op(0xA2, "mov", false, 10, I8086, e::mov_moffs_al),
    op(0xA3, "mov", false, 10, I8086, e::mov_moffs_ax),
    op(0xA4, "movsb", false, 18, I8086, e::movsb),
    op(0xA5, "movsw", false, 26, I8086, e::movsw),
    op(0xA6, "cmpsb", false, 22, I8086, e::cmpsb),
    op(0xA7, "cmpsw", false, 30, I8086, e::cmpsw),
    op(0xA8, "test", false, 4, I8086, e::test_al_imm8),
    op(0xA9, "test", false, 4, I8086, e::test_ax_imm16),
    op(0xAA, "stosb", false, 11, I8086, e::stosb),
    op(0xAB, "stosw", false, 15, I8086, e::stosw),
    op(0xAC, "lodsb", false, 12, I8086, e::lodsb),
    op(0xAD, "lodsw", false, 16, I8086, e::lodsw),
    op(0xAE, "scasb", false, 15, I8086, e::scasb),
    op(0xAF, "scasw", false, 19, I8086, e::scasw),
    op(0xB0, "mov", false, 4, I8086, e::mov_r8_imm8),
    op(0xB1, "mov", false, 4, I8086, e::mov_r8_imm8),
    op(0xB2, "mov", false, 4, I8086, e::mov_r8_imm8),
    op(0xB3, "mov", false, 4, I8086, e::mov_r8_imm8),
    op(0xB4, "mov", false, 4, I8086, e::mov_r8_imm8),
    op(0xB5, "mov", false, 4, I8086, e::mov_r8_imm8),
    op(0xB6, "mov", false, 4, I8086, e::mov_r8_imm8),
    op(0xB7, "mov", false, 4, I8086, e::mov_r8_imm8),
    op(0xB8, "mov", false, 4, I8086, e::mov_r16_imm16),
    op(0xB9, "mov", false, 4, I8086, e::mov_r16_imm16),
    op(0xBA, "mov", false, 4, I8086, e::mov_r16_imm16),
    op(0xBB, "mov", false, 4, I8086, e::mov_r16_imm16),
    op(0xBC, "mov", false, 4, I8086, e::mov_r16_imm16),
    op(0xBD, "mov", false, 4, I8086, e::mov_r16_imm16),
    op(0xBE, "mov", false, 4, I8086, e::mov_r16_imm16),
    op(0xBF, "mov", false, 4, I8086, e::mov_r16_imm16),
    op(0xC0, "shift", true, 5, I80186, x::shift_rm8_imm8),
    op(0xC1, "shift", true, 5, I80186, x::shift_rm16_imm8),
    op(0xC2, "ret", false, 20, I8086, e::ret_imm16),
    op(0xC3, "ret", false, 16, I8086, e::ret),
    op(0xC4, "les", true, 16, I8086, e::les_r16),
    op(0xC5, "lds", true, 16, I8086, e::lds_r16),
    op(0xC6, "mov", true, 10, I8086, e::mov_rm8_imm8),
    op(0xC7, "mov", true, 10, I8086, e::mov_rm16_imm16),
    op(0xC8, "enter", false, 15, I80186, x::enter),
    op(0xC9, "leave", false, 8, I80186, x::leave),
    op(0xCA, "retf", false, 25, I8086, e::retf_imm16),
    op(0xCB, "retf", false, 26, I8086, e::retf),
    op(0xCC, "int3", false, 52, I8086, e::int3),
    op(0xCD, "int", false, 51, I8086, e::int_imm8),
    op(0xCE, "into", false, 4, I8086, e::into),
    op(0xCF, "iret", false, 32, I8086, e::iret),
    op(0xD0, "shift", true, 2, I8086, e::shift_rm8_1),
    op(0xD1, "shift", true, 2, I8086, e::shift_rm16_1),
    op(0xD2, "shift", true, 8, I8086, e::shift_rm8_cl),
    op(0xD3, "shift", true, 8, I8086, e::shift_rm16_cl),
    op(0xD4, "aam", false, 83, I8086, e::aam),
    op(0xD5, "aad", false, 60, I8086, e::aad),
    op(0xD6, "salc", false, 4, I8086, e::salc),
    op(0xD7, "xlat", false, 11, I8086, e::xlat),
    op(0xD8, "esc", true, 2, Fpu, e::esc_fpu),
    op(0xD9, "esc", true, 2, Fpu, e::esc_fpu),
    op(0xDA, "esc", true, 2, Fpu, e::esc_fpu),
    op(0xDB, "esc", true, 2, Fpu, e::esc_fpu),
    op(0xDC, "esc", true, 2, Fpu, e::esc_fpu),
    op(0xDD, "esc", true, 2, Fpu, e::esc_fpu),
    op(0xDE, "esc", true, 2, Fpu, e::esc_fpu),
    op(0xDF, "esc", true, 2, Fpu, e::esc_fpu),
    op(0xE0, "loopnz", false, 5, I8086, e::loopnz),
    op(0xE1, "loopz", false, 6, I8086, e::loopz),
    op(0xE2, "loop", false, 5, I8086, e::loop_cx),
    op(0xE3, "jcxz", false, 6, I8086, e::jcxz),
    op(0xE4, "in", false, 10, I8086, e::in_al_imm8),
    op(0xE5, "in", false, 10, I8086, e::in_ax_imm8),
    op(0xE6, "out", false, 10, I8086, e::out_imm8_al),
    op(0xE7, "out", false, 10, I8086, e::out_imm8_ax),
    op(0xE8, "call", false, 19, I8086, e::call_rel16),
    op(0xE9, "jmp", false, 15, I8086, e::jmp_rel16),
    op(0xEA, "jmp", false, 15, I8086, e::jmp_far),
    op(0xEB, "jmp", false, 15, I8086, e::jmp_short),
    op(0xEC, "in", false, 8, I8086, e::in_al_dx),
    op(0xED, "in", false, 8, I8086, e::in_ax_dx),
    op(0xEE, "out", false, 8, I8086, e::out_dx_al),
    op(0xEF, "out", false, 8, I8086, e::out_dx_ax),
    op(0xF0, "lock", false, 2, I8086, e::nop),
    op(0xF1, "invalid", false, 2, Invalid, e::invalid_op),
    op(0xF2, "repne", false, 2, I8086, e::nop),
    op(0xF3, "rep", false, 2, I8086, e::nop),
    op(0xF4, "hlt", false, 2, I8086, e::hlt),
    op(0xF5, "cmc", false, 2, I8086, e::cmc),
    op(0xF6, "grp3", true, 4, I8086, e::grp3_rm8),
    op(0xF7, "grp3", true, 4, I8086, e::grp3_rm16),
    op(0xF8, "clc", false, 2, I8086, e::clc),
    op(0xF9, "stc", false, 2, I8086, e::stc),
    op(0xFA, "cli", false, 2, I8086, e::cli),
    op(0xFB, "sti", false, 2, I8086, e::sti),
    op(0xFC, "cld", false, 2, I8086, e::cld),
    op(0xFD, "std", false, 2, I8086, e::std),
    op(0xFE, "grp4", true, 3, I8086, e::grp4_rm8),
    op(0xFF, "grp5", true, 3, I8086, e::grp5_rm16),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_indexed_by_opcode() {
        for (i, inst) in OPCODE_TABLE.iter().enumerate() {
            assert_eq!(inst.opcode as usize, i);
        }
    }

    #[test]
    fn test_every_entry_costs_cycles() {
        for inst in OPCODE_TABLE.iter() {
            assert!(inst.cycles > 0, "opcode {:02X}", inst.opcode);
        }
    }
}
