//! Base 8086 instruction set.
//!
//! One function per opcode (or opcode group), dispatched through the
//! table in `optab`. Operands go through the `rm_*` and `reg_*` helpers
//! and all flag settling happens in `flags`.

use crate::bus::Bus;
use crate::regs::{self, Registers, Segment};

use super::flags::*;
use super::helpers::*;
use super::{Cpu, CpuVariant, Repeat};

// ========== ALU families ==========

fn alu_add8(r: &mut Registers, a: u8, b: u8) -> u8 {
    op_add_adc8(r, a, b, 0)
}

fn alu_add16(r: &mut Registers, a: u16, b: u16) -> u16 {
    op_add_adc16(r, a, b, 0)
}

fn alu_adc8(r: &mut Registers, a: u8, b: u8) -> u8 {
    let c = r.flag(regs::CARRY) as u8;
    op_add_adc8(r, a, b, c)
}

fn alu_adc16(r: &mut Registers, a: u16, b: u16) -> u16 {
    let c = r.flag(regs::CARRY) as u16;
    op_add_adc16(r, a, b, c)
}

fn alu_sub8(r: &mut Registers, a: u8, b: u8) -> u8 {
    op_sub_sbb8(r, a, b, 0)
}

fn alu_sub16(r: &mut Registers, a: u16, b: u16) -> u16 {
    op_sub_sbb16(r, a, b, 0)
}

fn alu_sbb8(r: &mut Registers, a: u8, b: u8) -> u8 {
    let c = r.flag(regs::CARRY) as u8;
    op_sub_sbb8(r, a, b, c)
}

fn alu_sbb16(r: &mut Registers, a: u16, b: u16) -> u16 {
    let c = r.flag(regs::CARRY) as u16;
    op_sub_sbb16(r, a, b, c)
}

macro_rules! alu_ops {
    ($rm8_r8:ident, $rm16_r16:ident, $r8_rm8:ident, $r16_rm16:ident,
     $al_imm8:ident, $ax_imm16:ident, $f8:ident, $f16:ident, $wb:expr) => {
        pub(crate) fn $rm8_r8(cpu: &mut Cpu, bus: &mut Bus) {
            let a = cpu.rm_read8(bus);
            let b = reg_read8(&cpu.regs, cpu.mode.reg);
            let d = $f8(&mut cpu.regs, a, b);
            if $wb {
                cpu.rm_write8(bus, d);
            }
        }

        pub(crate) fn $rm16_r16(cpu: &mut Cpu, bus: &mut Bus) {
            let a = cpu.rm_read16(bus);
            let b = reg_read16(&cpu.regs, cpu.mode.reg);
            let d = $f16(&mut cpu.regs, a, b);
            if $wb {
                cpu.rm_write16(bus, d);
            }
        }

        pub(crate) fn $r8_rm8(cpu: &mut Cpu, bus: &mut Bus) {
            let a = reg_read8(&cpu.regs, cpu.mode.reg);
            let b = cpu.rm_read8(bus);
            let d = $f8(&mut cpu.regs, a, b);
            if $wb {
                reg_write8(&mut cpu.regs, cpu.mode.reg, d);
            }
        }

        pub(crate) fn $r16_rm16(cpu: &mut Cpu, bus: &mut Bus) {
            let a = reg_read16(&cpu.regs, cpu.mode.reg);
            let b = cpu.rm_read16(bus);
            let d = $f16(&mut cpu.regs, a, b);
            if $wb {
                reg_write16(&mut cpu.regs, cpu.mode.reg, d);
            }
        }

        pub(crate) fn $al_imm8(cpu: &mut Cpu, bus: &mut Bus) {
            let a = cpu.regs.al();
            let b = cpu.read_opcode8(bus);
            let d = $f8(&mut cpu.regs, a, b);
            if $wb {
                cpu.regs.set_al(d);
            }
        }

        pub(crate) fn $ax_imm16(cpu: &mut Cpu, bus: &mut Bus) {
            let a = cpu.regs.ax;
            let b = cpu.read_opcode16(bus);
            let d = $f16(&mut cpu.regs, a, b);
            if $wb {
                cpu.regs.ax = d;
            }
        }
    };
}

alu_ops!(add_rm8_r8, add_rm16_r16, add_r8_rm8, add_r16_rm16, add_al_imm8, add_ax_imm16,
    alu_add8, alu_add16, true);
alu_ops!(or_rm8_r8, or_rm16_r16, or_r8_rm8, or_r16_rm16, or_al_imm8, or_ax_imm16,
    op_or8, op_or16, true);
alu_ops!(adc_rm8_r8, adc_rm16_r16, adc_r8_rm8, adc_r16_rm16, adc_al_imm8, adc_ax_imm16,
    alu_adc8, alu_adc16, true);
alu_ops!(sbb_rm8_r8, sbb_rm16_r16, sbb_r8_rm8, sbb_r16_rm16, sbb_al_imm8, sbb_ax_imm16,
    alu_sbb8, alu_sbb16, true);
alu_ops!(and_rm8_r8, and_rm16_r16, and_r8_rm8, and_r16_rm16, and_al_imm8, and_ax_imm16,
    op_and8, op_and16, true);
alu_ops!(sub_rm8_r8, sub_rm16_r16, sub_r8_rm8, sub_r16_rm16, sub_al_imm8, sub_ax_imm16,
    alu_sub8, alu_sub16, true);
alu_ops!(xor_rm8_r8, xor_rm16_r16, xor_r8_rm8, xor_r16_rm16, xor_al_imm8, xor_ax_imm16,
    op_xor8, op_xor16, true);
alu_ops!(cmp_rm8_r8, cmp_rm16_r16, cmp_r8_rm8, cmp_r16_rm16, cmp_al_imm8, cmp_ax_imm16,
    alu_sub8, alu_sub16, false);

/// Immediate group 0x80-0x83: op selected by the reg field.
fn grp1_op16(cpu: &mut Cpu, a: u16, b: u16) -> (u16, bool) {
    let r = &mut cpu.regs;
    match cpu.mode.reg {
        0 => (alu_add16(r, a, b), true),
        1 => (op_or16(r, a, b), true),
        2 => (alu_adc16(r, a, b), true),
        3 => (alu_sbb16(r, a, b), true),
        4 => (op_and16(r, a, b), true),
        5 => (alu_sub16(r, a, b), true),
        6 => (op_xor16(r, a, b), true),
        _ => (alu_sub16(r, a, b), false),
    }
}

pub(crate) fn grp1_rm8_imm8(cpu: &mut Cpu, bus: &mut Bus) {
    let b = cpu.read_opcode8(bus);
    let a = cpu.rm_read8(bus);
    let r = &mut cpu.regs;
    let (d, wb) = match cpu.mode.reg {
        0 => (alu_add8(r, a, b), true),
        1 => (op_or8(r, a, b), true),
        2 => (alu_adc8(r, a, b), true),
        3 => (alu_sbb8(r, a, b), true),
        4 => (op_and8(r, a, b), true),
        5 => (alu_sub8(r, a, b), true),
        6 => (op_xor8(r, a, b), true),
        _ => (alu_sub8(r, a, b), false),
    };
    if wb {
        cpu.rm_write8(bus, d);
    }
}

pub(crate) fn grp1_rm16_imm16(cpu: &mut Cpu, bus: &mut Bus) {
    let b = cpu.read_opcode16(bus);
    let a = cpu.rm_read16(bus);
    let (d, wb) = grp1_op16(cpu, a, b);
    if wb {
        cpu.rm_write16(bus, d);
    }
}

pub(crate) fn grp1_rm16_imm8(cpu: &mut Cpu, bus: &mut Bus) {
    let b = sign_extend16(cpu.read_opcode8(bus));
    let a = cpu.rm_read16(bus);
    let (d, wb) = grp1_op16(cpu, a, b);
    if wb {
        cpu.rm_write16(bus, d);
    }
}

// ========== Stack ==========

pub(crate) fn push_es(cpu: &mut Cpu, bus: &mut Bus) {
    let v = cpu.sregs[Segment::Es as usize].raw;
    cpu.push(bus, v);
}

pub(crate) fn push_cs(cpu: &mut Cpu, bus: &mut Bus) {
    let v = cpu.sregs[Segment::Cs as usize].raw;
    cpu.push(bus, v);
}

pub(crate) fn push_ss(cpu: &mut Cpu, bus: &mut Bus) {
    let v = cpu.sregs[Segment::Ss as usize].raw;
    cpu.push(bus, v);
}

pub(crate) fn push_ds(cpu: &mut Cpu, bus: &mut Bus) {
    let v = cpu.sregs[Segment::Ds as usize].raw;
    cpu.push(bus, v);
}

fn pop_sreg(cpu: &mut Cpu, bus: &mut Bus, seg: Segment) {
    let v = cpu.pop(bus);
    cpu.load_segment_register(bus, seg, v);
    cpu.defer_int = true;
}

pub(crate) fn pop_es(cpu: &mut Cpu, bus: &mut Bus) {
    pop_sreg(cpu, bus, Segment::Es);
}

pub(crate) fn pop_ss(cpu: &mut Cpu, bus: &mut Bus) {
    pop_sreg(cpu, bus, Segment::Ss);
}

pub(crate) fn pop_ds(cpu: &mut Cpu, bus: &mut Bus) {
    pop_sreg(cpu, bus, Segment::Ds);
}

pub(crate) fn push_r16(cpu: &mut Cpu, bus: &mut Bus) {
    let reg = cpu.opcode & 7;
    if reg == 4 && cpu.variant == CpuVariant::Intel8088 {
        // The 8088 stores SP after the decrement.
        cpu.regs.sp = cpu.regs.sp.wrapping_sub(2);
        let sp = cpu.regs.sp;
        cpu.segment_write_word(bus, Segment::Ss, sp, sp);
    } else {
        let v = reg_read16(&cpu.regs, reg);
        cpu.push(bus, v);
    }
}

pub(crate) fn pop_r16(cpu: &mut Cpu, bus: &mut Bus) {
    let v = cpu.pop(bus);
    reg_write16(&mut cpu.regs, cpu.opcode & 7, v);
}

pub(crate) fn pop_rm16(cpu: &mut Cpu, bus: &mut Bus) {
    let v = cpu.pop(bus);
    cpu.rm_write16(bus, v);
}

pub(crate) fn pushf(cpu: &mut Cpu, bus: &mut Bus) {
    let v = cpu.regs.read_flags();
    cpu.push(bus, v);
}

pub(crate) fn popf(cpu: &mut Cpu, bus: &mut Bus) {
    let v = cpu.pop(bus);
    cpu.regs.write_flags(v);
}

// ========== INC/DEC (carry preserved) ==========

pub(crate) fn inc_r16(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    let reg = cpu.opcode & 7;
    let c = cpu.regs.flag(regs::CARRY);
    let v = reg_read16(&cpu.regs, reg);
    let d = op_add_adc16(&mut cpu.regs, v, 1, 0);
    reg_write16(&mut cpu.regs, reg, d);
    cpu.regs.set_flag(regs::CARRY, c);
}

pub(crate) fn dec_r16(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    let reg = cpu.opcode & 7;
    let c = cpu.regs.flag(regs::CARRY);
    let v = reg_read16(&cpu.regs, reg);
    let d = op_sub_sbb16(&mut cpu.regs, v, 1, 0);
    reg_write16(&mut cpu.regs, reg, d);
    cpu.regs.set_flag(regs::CARRY, c);
}

// ========== Conditional and unconditional jumps ==========

fn condition(r: &Registers, cc: u8) -> bool {
    match cc & 0xF {
        0x0 => r.flag(regs::OVERFLOW),
        0x1 => !r.flag(regs::OVERFLOW),
        0x2 => r.flag(regs::CARRY),
        0x3 => !r.flag(regs::CARRY),
        0x4 => r.flag(regs::ZERO),
        0x5 => !r.flag(regs::ZERO),
        0x6 => r.flag(regs::CARRY) || r.flag(regs::ZERO),
        0x7 => !(r.flag(regs::CARRY) || r.flag(regs::ZERO)),
        0x8 => r.flag(regs::SIGN),
        0x9 => !r.flag(regs::SIGN),
        0xA => r.flag(regs::PARITY),
        0xB => !r.flag(regs::PARITY),
        0xC => r.flag(regs::SIGN) != r.flag(regs::OVERFLOW),
        0xD => r.flag(regs::SIGN) == r.flag(regs::OVERFLOW),
        0xE => r.flag(regs::ZERO) || (r.flag(regs::SIGN) != r.flag(regs::OVERFLOW)),
        _ => !r.flag(regs::ZERO) && (r.flag(regs::SIGN) == r.flag(regs::OVERFLOW)),
    }
}

fn jump_rel(cpu: &mut Cpu, disp: u16) {
    cpu.regs.ip = cpu.regs.ip.wrapping_add(disp);
    cpu.queue.dirty = true;
}

pub(crate) fn jcc_short(cpu: &mut Cpu, bus: &mut Bus) {
    let disp = sign_extend16(cpu.read_opcode8(bus));
    if condition(&cpu.regs, cpu.opcode) {
        jump_rel(cpu, disp);
        cpu.cycles += 12;
    }
}

pub(crate) fn jmp_short(cpu: &mut Cpu, bus: &mut Bus) {
    let disp = sign_extend16(cpu.read_opcode8(bus));
    jump_rel(cpu, disp);
}

pub(crate) fn jmp_rel16(cpu: &mut Cpu, bus: &mut Bus) {
    let disp = cpu.read_opcode16(bus);
    jump_rel(cpu, disp);
}

pub(crate) fn jmp_far(cpu: &mut Cpu, bus: &mut Bus) {
    let ip = cpu.read_opcode16(bus);
    let cs = cpu.read_opcode16(bus);
    if cpu.load_segment_register(bus, Segment::Cs, cs) {
        cpu.regs.ip = ip;
    }
    cpu.queue.dirty = true;
}

pub(crate) fn call_rel16(cpu: &mut Cpu, bus: &mut Bus) {
    let disp = cpu.read_opcode16(bus);
    let ip = cpu.regs.ip;
    cpu.push(bus, ip);
    jump_rel(cpu, disp);
}

pub(crate) fn call_far(cpu: &mut Cpu, bus: &mut Bus) {
    let ip = cpu.read_opcode16(bus);
    let cs = cpu.read_opcode16(bus);
    let old_cs = cpu.sregs[Segment::Cs as usize].raw;
    let old_ip = cpu.regs.ip;
    cpu.push(bus, old_cs);
    cpu.push(bus, old_ip);
    if cpu.load_segment_register(bus, Segment::Cs, cs) {
        cpu.regs.ip = ip;
    }
    cpu.queue.dirty = true;
}

pub(crate) fn ret_imm16(cpu: &mut Cpu, bus: &mut Bus) {
    let n = cpu.read_opcode16(bus);
    cpu.regs.ip = cpu.pop(bus);
    cpu.regs.sp = cpu.regs.sp.wrapping_add(n);
    cpu.queue.dirty = true;
}

pub(crate) fn ret(cpu: &mut Cpu, bus: &mut Bus) {
    cpu.regs.ip = cpu.pop(bus);
    cpu.queue.dirty = true;
}

pub(crate) fn retf_imm16(cpu: &mut Cpu, bus: &mut Bus) {
    let n = cpu.read_opcode16(bus);
    cpu.regs.ip = cpu.pop(bus);
    let cs = cpu.pop(bus);
    cpu.load_segment_register(bus, Segment::Cs, cs);
    cpu.regs.sp = cpu.regs.sp.wrapping_add(n);
    cpu.queue.dirty = true;
}

pub(crate) fn retf(cpu: &mut Cpu, bus: &mut Bus) {
    cpu.regs.ip = cpu.pop(bus);
    let cs = cpu.pop(bus);
    cpu.load_segment_register(bus, Segment::Cs, cs);
    cpu.queue.dirty = true;
}

// ========== Loops ==========

pub(crate) fn loopnz(cpu: &mut Cpu, bus: &mut Bus) {
    let disp = sign_extend16(cpu.read_opcode8(bus));
    cpu.regs.cx = cpu.regs.cx.wrapping_sub(1);
    if cpu.regs.cx != 0 && !cpu.regs.flag(regs::ZERO) {
        jump_rel(cpu, disp);
        cpu.cycles += 13;
    }
}

pub(crate) fn loopz(cpu: &mut Cpu, bus: &mut Bus) {
    let disp = sign_extend16(cpu.read_opcode8(bus));
    cpu.regs.cx = cpu.regs.cx.wrapping_sub(1);
    if cpu.regs.cx != 0 && cpu.regs.flag(regs::ZERO) {
        jump_rel(cpu, disp);
        cpu.cycles += 12;
    }
}

pub(crate) fn loop_cx(cpu: &mut Cpu, bus: &mut Bus) {
    let disp = sign_extend16(cpu.read_opcode8(bus));
    cpu.regs.cx = cpu.regs.cx.wrapping_sub(1);
    if cpu.regs.cx != 0 {
        jump_rel(cpu, disp);
        cpu.cycles += 12;
    }
}

pub(crate) fn jcxz(cpu: &mut Cpu, bus: &mut Bus) {
    let disp = sign_extend16(cpu.read_opcode8(bus));
    if cpu.regs.cx == 0 {
        jump_rel(cpu, disp);
        cpu.cycles += 12;
    }
}

// ========== Data movement ==========

pub(crate) fn mov_rm8_r8(cpu: &mut Cpu, bus: &mut Bus) {
    let v = reg_read8(&cpu.regs, cpu.mode.reg);
    cpu.rm_write8(bus, v);
}

pub(crate) fn mov_rm16_r16(cpu: &mut Cpu, bus: &mut Bus) {
    let v = reg_read16(&cpu.regs, cpu.mode.reg);
    cpu.rm_write16(bus, v);
}

pub(crate) fn mov_r8_rm8(cpu: &mut Cpu, bus: &mut Bus) {
    let v = cpu.rm_read8(bus);
    reg_write8(&mut cpu.regs, cpu.mode.reg, v);
}

pub(crate) fn mov_r16_rm16(cpu: &mut Cpu, bus: &mut Bus) {
    let v = cpu.rm_read16(bus);
    reg_write16(&mut cpu.regs, cpu.mode.reg, v);
}

pub(crate) fn mov_rm16_sreg(cpu: &mut Cpu, bus: &mut Bus) {
    let v = cpu.seg_read16();
    cpu.rm_write16(bus, v);
}

pub(crate) fn mov_sreg_rm16(cpu: &mut Cpu, bus: &mut Bus) {
    let v = cpu.rm_read16(bus);
    cpu.seg_write16(bus, v);
}

pub(crate) fn lea_r16(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    if !cpu.mode.is_memory() {
        cpu.invalid = true;
        return;
    }
    let ea = cpu.get_ea_offset();
    reg_write16(&mut cpu.regs, cpu.mode.reg, ea);
}

pub(crate) fn mov_r8_imm8(cpu: &mut Cpu, bus: &mut Bus) {
    let v = cpu.read_opcode8(bus);
    reg_write8(&mut cpu.regs, cpu.opcode & 7, v);
}

pub(crate) fn mov_r16_imm16(cpu: &mut Cpu, bus: &mut Bus) {
    let v = cpu.read_opcode16(bus);
    reg_write16(&mut cpu.regs, cpu.opcode & 7, v);
}

pub(crate) fn mov_rm8_imm8(cpu: &mut Cpu, bus: &mut Bus) {
    let v = cpu.read_opcode8(bus);
    cpu.rm_write8(bus, v);
}

pub(crate) fn mov_rm16_imm16(cpu: &mut Cpu, bus: &mut Bus) {
    let v = cpu.read_opcode16(bus);
    cpu.rm_write16(bus, v);
}

pub(crate) fn mov_al_moffs(cpu: &mut Cpu, bus: &mut Bus) {
    let offset = cpu.read_opcode16(bus);
    let seg = cpu.seg;
    let v = cpu.segment_read_byte(bus, seg, offset);
    cpu.regs.set_al(v);
}

pub(crate) fn mov_ax_moffs(cpu: &mut Cpu, bus: &mut Bus) {
    let offset = cpu.read_opcode16(bus);
    let seg = cpu.seg;
    cpu.regs.ax = cpu.segment_read_word(bus, seg, offset);
}

pub(crate) fn mov_moffs_al(cpu: &mut Cpu, bus: &mut Bus) {
    let offset = cpu.read_opcode16(bus);
    let seg = cpu.seg;
    let v = cpu.regs.al();
    cpu.segment_write_byte(bus, seg, offset, v);
}

pub(crate) fn mov_moffs_ax(cpu: &mut Cpu, bus: &mut Bus) {
    let offset = cpu.read_opcode16(bus);
    let seg = cpu.seg;
    let v = cpu.regs.ax;
    cpu.segment_write_word(bus, seg, offset, v);
}

fn load_far_pointer(cpu: &mut Cpu, bus: &mut Bus, seg: Segment) {
    if !cpu.mode.is_memory() {
        cpu.invalid = true;
        return;
    }
    let ea = cpu.get_ea_offset();
    let src = cpu.seg;
    let offset = cpu.segment_read_word(bus, src, ea);
    let selector = cpu.segment_read_word(bus, src, ea.wrapping_add(2));
    reg_write16(&mut cpu.regs, cpu.mode.reg, offset);
    cpu.load_segment_register(bus, seg, selector);
}

pub(crate) fn les_r16(cpu: &mut Cpu, bus: &mut Bus) {
    load_far_pointer(cpu, bus, Segment::Es);
}

pub(crate) fn lds_r16(cpu: &mut Cpu, bus: &mut Bus) {
    load_far_pointer(cpu, bus, Segment::Ds);
}

pub(crate) fn xchg_rm8_r8(cpu: &mut Cpu, bus: &mut Bus) {
    let a = cpu.rm_read8(bus);
    let b = reg_read8(&cpu.regs, cpu.mode.reg);
    cpu.rm_write8(bus, b);
    reg_write8(&mut cpu.regs, cpu.mode.reg, a);
}

pub(crate) fn xchg_rm16_r16(cpu: &mut Cpu, bus: &mut Bus) {
    let a = cpu.rm_read16(bus);
    let b = reg_read16(&cpu.regs, cpu.mode.reg);
    cpu.rm_write16(bus, b);
    reg_write16(&mut cpu.regs, cpu.mode.reg, a);
}

pub(crate) fn xchg_ax_r16(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    let reg = cpu.opcode & 7;
    let v = reg_read16(&cpu.regs, reg);
    let ax = cpu.regs.ax;
    reg_write16(&mut cpu.regs, reg, ax);
    cpu.regs.ax = v;
}

pub(crate) fn nop(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = (cpu, bus);
}

pub(crate) fn xlat(cpu: &mut Cpu, bus: &mut Bus) {
    let offset = cpu.regs.bx.wrapping_add(cpu.regs.al() as u16);
    let seg = cpu.seg;
    let v = cpu.segment_read_byte(bus, seg, offset);
    cpu.regs.set_al(v);
}

// ========== TEST ==========

pub(crate) fn test_rm8_r8(cpu: &mut Cpu, bus: &mut Bus) {
    let a = cpu.rm_read8(bus);
    let b = reg_read8(&cpu.regs, cpu.mode.reg);
    op_and8(&mut cpu.regs, a, b);
}

pub(crate) fn test_rm16_r16(cpu: &mut Cpu, bus: &mut Bus) {
    let a = cpu.rm_read16(bus);
    let b = reg_read16(&cpu.regs, cpu.mode.reg);
    op_and16(&mut cpu.regs, a, b);
}

pub(crate) fn test_al_imm8(cpu: &mut Cpu, bus: &mut Bus) {
    let a = cpu.regs.al();
    let b = cpu.read_opcode8(bus);
    op_and8(&mut cpu.regs, a, b);
}

pub(crate) fn test_ax_imm16(cpu: &mut Cpu, bus: &mut Bus) {
    let a = cpu.regs.ax;
    let b = cpu.read_opcode16(bus);
    op_and16(&mut cpu.regs, a, b);
}

// ========== Width conversion and flag transfers ==========

pub(crate) fn cbw(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    cpu.regs.ax = sign_extend16(cpu.regs.al());
}

pub(crate) fn cwd(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    cpu.regs.dx = if cpu.regs.ax & 0x8000 != 0 { 0xFFFF } else { 0 };
}

pub(crate) fn sahf(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    let v = (cpu.regs.flags & 0xFF00) | cpu.regs.ah() as u16;
    cpu.regs.write_flags(v);
}

pub(crate) fn lahf(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    let v = (cpu.regs.flags as u8 & 0xD5) | 0x02;
    cpu.regs.set_ah(v);
}

// ========== BCD adjustments ==========

pub(crate) fn daa(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    let r = &mut cpu.regs;
    let old_al = r.al();
    let old_cf = r.flag(regs::CARRY);

    if (old_al & 0xF) > 9 || r.flag(regs::AUXILIARY) {
        let (d, c) = old_al.overflowing_add(6);
        r.set_al(d);
        r.set_flag(regs::CARRY, old_cf || c);
        r.set_flag(regs::AUXILIARY, true);
    } else {
        r.set_flag(regs::AUXILIARY, false);
    }

    if old_al > 0x99 || old_cf {
        let d = r.al().wrapping_add(0x60);
        r.set_al(d);
        r.set_flag(regs::CARRY, true);
    } else {
        r.set_flag(regs::CARRY, false);
    }
    let al = r.al();
    flag_szp8(r, al);
}

pub(crate) fn das(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    let r = &mut cpu.regs;
    let old_al = r.al();
    let old_cf = r.flag(regs::CARRY);
    r.set_flag(regs::CARRY, false);

    if (old_al & 0xF) > 9 || r.flag(regs::AUXILIARY) {
        let (d, c) = old_al.overflowing_sub(6);
        r.set_al(d);
        r.set_flag(regs::CARRY, old_cf || c);
        r.set_flag(regs::AUXILIARY, true);
    } else {
        r.set_flag(regs::AUXILIARY, false);
    }

    if old_al > 0x99 || old_cf {
        let d = r.al().wrapping_sub(0x60);
        r.set_al(d);
        r.set_flag(regs::CARRY, true);
    }
    let al = r.al();
    flag_szp8(r, al);
}

pub(crate) fn aaa(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    let r = &mut cpu.regs;
    if (r.al() & 0xF) > 9 || r.flag(regs::AUXILIARY) {
        r.ax = r.ax.wrapping_add(0x106);
        r.set_flag(regs::AUXILIARY | regs::CARRY, true);
    } else {
        r.set_flag(regs::AUXILIARY | regs::CARRY, false);
    }
    let al = r.al() & 0xF;
    r.set_al(al);
}

pub(crate) fn aas(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    let r = &mut cpu.regs;
    if (r.al() & 0xF) > 9 || r.flag(regs::AUXILIARY) {
        r.ax = r.ax.wrapping_sub(6);
        r.set_ah(r.ah().wrapping_sub(1));
        r.set_flag(regs::AUXILIARY | regs::CARRY, true);
    } else {
        r.set_flag(regs::AUXILIARY | regs::CARRY, false);
    }
    let al = r.al() & 0xF;
    r.set_al(al);
}

pub(crate) fn aam(cpu: &mut Cpu, bus: &mut Bus) {
    let base = cpu.read_opcode8(bus);
    if base == 0 {
        cpu.divide_error(bus);
        return;
    }
    let al = cpu.regs.al();
    cpu.regs.set_ah(al / base);
    cpu.regs.set_al(al % base);
    let al = cpu.regs.al();
    flag_szp8(&mut cpu.regs, al);
}

pub(crate) fn aad(cpu: &mut Cpu, bus: &mut Bus) {
    let base = cpu.read_opcode8(bus);
    let al = (cpu.regs.al() as u16).wrapping_add((cpu.regs.ah() as u16).wrapping_mul(base as u16));
    cpu.regs.set_al(al as u8);
    cpu.regs.set_ah(0);
    let al = cpu.regs.al();
    flag_szp8(&mut cpu.regs, al);
}

pub(crate) fn salc(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    let v = if cpu.regs.flag(regs::CARRY) { 0xFF } else { 0 };
    cpu.regs.set_al(v);
}

// ========== String operations ==========

/// Run one iteration, honouring an active repeat prefix. While
/// iterations remain the instruction re-points IP at its own prefix, so
/// a pending IRQ is serviced at the next boundary with CX and the index
/// registers reflecting completed iterations.
fn string_op(cpu: &mut Cpu, bus: &mut Bus, test_zf: bool, one: fn(&mut Cpu, &mut Bus)) {
    match cpu.repeat {
        Repeat::None => one(cpu, bus),
        rep => {
            if cpu.regs.cx == 0 {
                return;
            }
            one(cpu, bus);
            cpu.regs.cx -= 1;

            let mut done = cpu.regs.cx == 0;
            if test_zf && !done {
                let zf = cpu.regs.flag(regs::ZERO);
                done = (rep == Repeat::Equal && !zf) || (rep == Repeat::NotEqual && zf);
            }
            if !done {
                cpu.regs.ip = cpu.inst_start;
                cpu.queue.dirty = true;
            }
        }
    }
}

fn movsb_once(cpu: &mut Cpu, bus: &mut Bus) {
    let seg = cpu.seg;
    let si = cpu.regs.si;
    let di = cpu.regs.di;
    let v = cpu.segment_read_byte(bus, seg, si);
    cpu.segment_write_byte(bus, Segment::Es, di, v);
    cpu.update_si_di(1);
}

fn movsw_once(cpu: &mut Cpu, bus: &mut Bus) {
    let seg = cpu.seg;
    let si = cpu.regs.si;
    let di = cpu.regs.di;
    let v = cpu.segment_read_word(bus, seg, si);
    cpu.segment_write_word(bus, Segment::Es, di, v);
    cpu.update_si_di(2);
}

fn cmpsb_once(cpu: &mut Cpu, bus: &mut Bus) {
    let seg = cpu.seg;
    let si = cpu.regs.si;
    let di = cpu.regs.di;
    let a = cpu.segment_read_byte(bus, seg, si);
    let b = cpu.segment_read_byte(bus, Segment::Es, di);
    op_sub_sbb8(&mut cpu.regs, a, b, 0);
    cpu.update_si_di(1);
}

fn cmpsw_once(cpu: &mut Cpu, bus: &mut Bus) {
    let seg = cpu.seg;
    let si = cpu.regs.si;
    let di = cpu.regs.di;
    let a = cpu.segment_read_word(bus, seg, si);
    let b = cpu.segment_read_word(bus, Segment::Es, di);
    op_sub_sbb16(&mut cpu.regs, a, b, 0);
    cpu.update_si_di(2);
}

fn stosb_once(cpu: &mut Cpu, bus: &mut Bus) {
    let di = cpu.regs.di;
    let v = cpu.regs.al();
    cpu.segment_write_byte(bus, Segment::Es, di, v);
    cpu.update_di(1);
}

fn stosw_once(cpu: &mut Cpu, bus: &mut Bus) {
    let di = cpu.regs.di;
    let v = cpu.regs.ax;
    cpu.segment_write_word(bus, Segment::Es, di, v);
    cpu.update_di(2);
}

fn lodsb_once(cpu: &mut Cpu, bus: &mut Bus) {
    let seg = cpu.seg;
    let si = cpu.regs.si;
    let v = cpu.segment_read_byte(bus, seg, si);
    cpu.regs.set_al(v);
    cpu.update_si(1);
}

fn lodsw_once(cpu: &mut Cpu, bus: &mut Bus) {
    let seg = cpu.seg;
    let si = cpu.regs.si;
    cpu.regs.ax = cpu.segment_read_word(bus, seg, si);
    cpu.update_si(2);
}

fn scasb_once(cpu: &mut Cpu, bus: &mut Bus) {
    let di = cpu.regs.di;
    let a = cpu.regs.al();
    let b = cpu.segment_read_byte(bus, Segment::Es, di);
    op_sub_sbb8(&mut cpu.regs, a, b, 0);
    cpu.update_di(1);
}

fn scasw_once(cpu: &mut Cpu, bus: &mut Bus) {
    let di = cpu.regs.di;
    let a = cpu.regs.ax;
    let b = cpu.segment_read_word(bus, Segment::Es, di);
    op_sub_sbb16(&mut cpu.regs, a, b, 0);
    cpu.update_di(2);
}

pub(crate) fn movsb(cpu: &mut Cpu, bus: &mut Bus) {
    string_op(cpu, bus, false, movsb_once);
}

pub(crate) fn movsw(cpu: &mut Cpu, bus: &mut Bus) {
    string_op(cpu, bus, false, movsw_once);
}

pub(crate) fn cmpsb(cpu: &mut Cpu, bus: &mut Bus) {
    string_op(cpu, bus, true, cmpsb_once);
}

pub(crate) fn cmpsw(cpu: &mut Cpu, bus: &mut Bus) {
    string_op(cpu, bus, true, cmpsw_once);
}

pub(crate) fn stosb(cpu: &mut Cpu, bus: &mut Bus) {
    string_op(cpu, bus, false, stosb_once);
}

pub(crate) fn stosw(cpu: &mut Cpu, bus: &mut Bus) {
    string_op(cpu, bus, false, stosw_once);
}

pub(crate) fn lodsb(cpu: &mut Cpu, bus: &mut Bus) {
    string_op(cpu, bus, false, lodsb_once);
}

pub(crate) fn lodsw(cpu: &mut Cpu, bus: &mut Bus) {
    string_op(cpu, bus, false, lodsw_once);
}

pub(crate) fn scasb(cpu: &mut Cpu, bus: &mut Bus) {
    string_op(cpu, bus, true, scasb_once);
}

pub(crate) fn scasw(cpu: &mut Cpu, bus: &mut Bus) {
    string_op(cpu, bus, true, scasw_once);
}

// ========== Shifts and rotates ==========

fn msb8(v: u8) -> bool {
    v & 0x80 != 0
}

fn msb16(v: u16) -> bool {
    v & 0x8000 != 0
}

pub(super) fn shift8(r: &mut Registers, op: u8, mut v: u8, count: u8) -> u8 {
    if count == 0 {
        return v;
    }
    match op {
        0 => {
            // rol
            for _ in 0..count {
                r.set_flag(regs::CARRY, msb8(v));
                v = v.rotate_left(1);
            }
            if count == 1 {
                r.set_flag(regs::OVERFLOW, msb8(v) != r.flag(regs::CARRY));
            }
        }
        1 => {
            // ror
            for _ in 0..count {
                r.set_flag(regs::CARRY, v & 1 != 0);
                v = v.rotate_right(1);
            }
            if count == 1 {
                r.set_flag(regs::OVERFLOW, msb8(v) != (v & 0x40 != 0));
            }
        }
        2 => {
            // rcl
            for _ in 0..count {
                let c = msb8(v);
                v = (v << 1) | r.flag(regs::CARRY) as u8;
                r.set_flag(regs::CARRY, c);
            }
            if count == 1 {
                r.set_flag(regs::OVERFLOW, msb8(v) != r.flag(regs::CARRY));
            }
        }
        3 => {
            // rcr
            for _ in 0..count {
                let c = v & 1 != 0;
                v = (v >> 1) | ((r.flag(regs::CARRY) as u8) << 7);
                r.set_flag(regs::CARRY, c);
            }
            if count == 1 {
                r.set_flag(regs::OVERFLOW, msb8(v) != (v & 0x40 != 0));
            }
        }
        4 | 6 => {
            // shl
            for _ in 0..count {
                r.set_flag(regs::CARRY, msb8(v));
                v <<= 1;
            }
            if count == 1 {
                r.set_flag(regs::OVERFLOW, msb8(v) != r.flag(regs::CARRY));
            }
            flag_szp8(r, v);
        }
        5 => {
            // shr
            if count == 1 {
                r.set_flag(regs::OVERFLOW, msb8(v));
            }
            for _ in 0..count {
                r.set_flag(regs::CARRY, v & 1 != 0);
                v >>= 1;
            }
            flag_szp8(r, v);
        }
        _ => {
            // sar
            for _ in 0..count {
                r.set_flag(regs::CARRY, v & 1 != 0);
                v = ((v as i8) >> 1) as u8;
            }
            if count == 1 {
                r.set_flag(regs::OVERFLOW, false);
            }
            flag_szp8(r, v);
        }
    }
    v
}

pub(super) fn shift16(r: &mut Registers, op: u8, mut v: u16, count: u8) -> u16 {
    if count == 0 {
        return v;
    }
    match op {
        0 => {
            for _ in 0..count {
                r.set_flag(regs::CARRY, msb16(v));
                v = v.rotate_left(1);
            }
            if count == 1 {
                r.set_flag(regs::OVERFLOW, msb16(v) != r.flag(regs::CARRY));
            }
        }
        1 => {
            for _ in 0..count {
                r.set_flag(regs::CARRY, v & 1 != 0);
                v = v.rotate_right(1);
            }
            if count == 1 {
                r.set_flag(regs::OVERFLOW, msb16(v) != (v & 0x4000 != 0));
            }
        }
        2 => {
            for _ in 0..count {
                let c = msb16(v);
                v = (v << 1) | r.flag(regs::CARRY) as u16;
                r.set_flag(regs::CARRY, c);
            }
            if count == 1 {
                r.set_flag(regs::OVERFLOW, msb16(v) != r.flag(regs::CARRY));
            }
        }
        3 => {
            for _ in 0..count {
                let c = v & 1 != 0;
                v = (v >> 1) | ((r.flag(regs::CARRY) as u16) << 15);
                r.set_flag(regs::CARRY, c);
            }
            if count == 1 {
                r.set_flag(regs::OVERFLOW, msb16(v) != (v & 0x4000 != 0));
            }
        }
        4 | 6 => {
            for _ in 0..count {
                r.set_flag(regs::CARRY, msb16(v));
                v <<= 1;
            }
            if count == 1 {
                r.set_flag(regs::OVERFLOW, msb16(v) != r.flag(regs::CARRY));
            }
            flag_szp16(r, v);
        }
        5 => {
            if count == 1 {
                r.set_flag(regs::OVERFLOW, msb16(v));
            }
            for _ in 0..count {
                r.set_flag(regs::CARRY, v & 1 != 0);
                v >>= 1;
            }
            flag_szp16(r, v);
        }
        _ => {
            for _ in 0..count {
                r.set_flag(regs::CARRY, v & 1 != 0);
                v = ((v as i16) >> 1) as u16;
            }
            if count == 1 {
                r.set_flag(regs::OVERFLOW, false);
            }
            flag_szp16(r, v);
        }
    }
    v
}

/// Shift counts from CL are architectural: unmasked on the 8086, masked
/// to five bits from the 80286 on.
pub(super) fn masked_count(cpu: &Cpu, count: u8) -> u8 {
    if cpu.variant == CpuVariant::Intel80286 {
        count & 0x1F
    } else {
        count
    }
}

pub(crate) fn shift_rm8_1(cpu: &mut Cpu, bus: &mut Bus) {
    let v = cpu.rm_read8(bus);
    let d = shift8(&mut cpu.regs, cpu.mode.reg, v, 1);
    cpu.rm_write8(bus, d);
}

pub(crate) fn shift_rm16_1(cpu: &mut Cpu, bus: &mut Bus) {
    let v = cpu.rm_read16(bus);
    let d = shift16(&mut cpu.regs, cpu.mode.reg, v, 1);
    cpu.rm_write16(bus, d);
}

pub(crate) fn shift_rm8_cl(cpu: &mut Cpu, bus: &mut Bus) {
    let count = masked_count(cpu, cpu.regs.cl());
    let v = cpu.rm_read8(bus);
    let d = shift8(&mut cpu.regs, cpu.mode.reg, v, count);
    cpu.rm_write8(bus, d);
    cpu.cycles += 4 * count as u64;
}

pub(crate) fn shift_rm16_cl(cpu: &mut Cpu, bus: &mut Bus) {
    let count = masked_count(cpu, cpu.regs.cl());
    let v = cpu.rm_read16(bus);
    let d = shift16(&mut cpu.regs, cpu.mode.reg, v, count);
    cpu.rm_write16(bus, d);
    cpu.cycles += 4 * count as u64;
}

// ========== Multiply, divide and the rest of group 3 ==========

pub(crate) fn grp3_rm8(cpu: &mut Cpu, bus: &mut Bus) {
    match cpu.mode.reg {
        0 | 1 => {
            let b = cpu.read_opcode8(bus);
            let a = cpu.rm_read8(bus);
            op_and8(&mut cpu.regs, a, b);
        }
        2 => {
            let v = cpu.rm_read8(bus);
            cpu.rm_write8(bus, !v);
        }
        3 => {
            let v = cpu.rm_read8(bus);
            let d = op_sub_sbb8(&mut cpu.regs, 0, v, 0);
            cpu.rm_write8(bus, d);
        }
        4 => {
            let v = cpu.rm_read8(bus);
            let res = cpu.regs.al() as u16 * v as u16;
            cpu.regs.ax = res;
            let high = res & 0xFF00 != 0;
            cpu.regs.set_flag(regs::CARRY | regs::OVERFLOW, high);
            let al = cpu.regs.al();
            flag_szp8(&mut cpu.regs, al);
        }
        5 => {
            let v = cpu.rm_read8(bus);
            let res = (cpu.regs.al() as i8 as i16).wrapping_mul(v as i8 as i16);
            cpu.regs.ax = res as u16;
            let fits = res == res as i8 as i16;
            cpu.regs.set_flag(regs::CARRY | regs::OVERFLOW, !fits);
            let al = cpu.regs.al();
            flag_szp8(&mut cpu.regs, al);
        }
        6 => {
            let v = cpu.rm_read8(bus);
            if v == 0 {
                cpu.divide_error(bus);
                return;
            }
            let ax = cpu.regs.ax;
            let q = ax / v as u16;
            if q > 0xFF {
                cpu.divide_error(bus);
                return;
            }
            cpu.regs.set_al(q as u8);
            cpu.regs.set_ah((ax % v as u16) as u8);
        }
        _ => {
            let v = cpu.rm_read8(bus);
            let s = v as i8 as i16;
            if s == 0 {
                cpu.divide_error(bus);
                return;
            }
            let d = cpu.regs.ax as i16;
            let q = d.wrapping_div(s);
            if q != q as i8 as i16 {
                cpu.divide_error(bus);
                return;
            }
            cpu.regs.set_al(q as u8);
            cpu.regs.set_ah(d.wrapping_rem(s) as u8);
        }
    }
}

pub(crate) fn grp3_rm16(cpu: &mut Cpu, bus: &mut Bus) {
    match cpu.mode.reg {
        0 | 1 => {
            let b = cpu.read_opcode16(bus);
            let a = cpu.rm_read16(bus);
            op_and16(&mut cpu.regs, a, b);
        }
        2 => {
            let v = cpu.rm_read16(bus);
            cpu.rm_write16(bus, !v);
        }
        3 => {
            let v = cpu.rm_read16(bus);
            let d = op_sub_sbb16(&mut cpu.regs, 0, v, 0);
            cpu.rm_write16(bus, d);
        }
        4 => {
            let v = cpu.rm_read16(bus);
            let res = cpu.regs.ax as u32 * v as u32;
            cpu.regs.ax = res as u16;
            cpu.regs.dx = (res >> 16) as u16;
            cpu.regs.set_flag(regs::CARRY | regs::OVERFLOW, cpu.regs.dx != 0);
            let ax = cpu.regs.ax;
            flag_szp16(&mut cpu.regs, ax);
        }
        5 => {
            let v = cpu.rm_read16(bus);
            let res = (cpu.regs.ax as i16 as i32).wrapping_mul(v as i16 as i32);
            cpu.regs.ax = res as u16;
            cpu.regs.dx = (res >> 16) as u16;
            let fits = res == res as i16 as i32;
            cpu.regs.set_flag(regs::CARRY | regs::OVERFLOW, !fits);
            let ax = cpu.regs.ax;
            flag_szp16(&mut cpu.regs, ax);
        }
        6 => {
            let v = cpu.rm_read16(bus);
            if v == 0 {
                cpu.divide_error(bus);
                return;
            }
            let d = ((cpu.regs.dx as u32) << 16) | cpu.regs.ax as u32;
            let q = d / v as u32;
            if q > 0xFFFF {
                cpu.divide_error(bus);
                return;
            }
            cpu.regs.ax = q as u16;
            cpu.regs.dx = (d % v as u32) as u16;
        }
        _ => {
            let v = cpu.rm_read16(bus);
            let s = v as i16 as i32;
            if s == 0 {
                cpu.divide_error(bus);
                return;
            }
            let d = (((cpu.regs.dx as u32) << 16) | cpu.regs.ax as u32) as i32;
            let q = d.wrapping_div(s);
            if q != q as i16 as i32 {
                cpu.divide_error(bus);
                return;
            }
            cpu.regs.ax = q as u16;
            cpu.regs.dx = d.wrapping_rem(s) as u16;
        }
    }
}

// ========== Groups 4 and 5 ==========

pub(crate) fn grp4_rm8(cpu: &mut Cpu, bus: &mut Bus) {
    match cpu.mode.reg {
        0 => {
            let c = cpu.regs.flag(regs::CARRY);
            let v = cpu.rm_read8(bus);
            let d = op_add_adc8(&mut cpu.regs, v, 1, 0);
            cpu.rm_write8(bus, d);
            cpu.regs.set_flag(regs::CARRY, c);
        }
        1 => {
            let c = cpu.regs.flag(regs::CARRY);
            let v = cpu.rm_read8(bus);
            let d = op_sub_sbb8(&mut cpu.regs, v, 1, 0);
            cpu.rm_write8(bus, d);
            cpu.regs.set_flag(regs::CARRY, c);
        }
        _ => cpu.invalid = true,
    }
}

pub(crate) fn grp5_rm16(cpu: &mut Cpu, bus: &mut Bus) {
    match cpu.mode.reg {
        0 => {
            let c = cpu.regs.flag(regs::CARRY);
            let v = cpu.rm_read16(bus);
            let d = op_add_adc16(&mut cpu.regs, v, 1, 0);
            cpu.rm_write16(bus, d);
            cpu.regs.set_flag(regs::CARRY, c);
        }
        1 => {
            let c = cpu.regs.flag(regs::CARRY);
            let v = cpu.rm_read16(bus);
            let d = op_sub_sbb16(&mut cpu.regs, v, 1, 0);
            cpu.rm_write16(bus, d);
            cpu.regs.set_flag(regs::CARRY, c);
        }
        2 => {
            let target = cpu.rm_read16(bus);
            let ip = cpu.regs.ip;
            cpu.push(bus, ip);
            cpu.regs.ip = target;
            cpu.queue.dirty = true;
        }
        3 => {
            if !cpu.mode.is_memory() {
                cpu.invalid = true;
                return;
            }
            let ea = cpu.get_ea_offset();
            let seg = cpu.seg;
            let target = cpu.segment_read_word(bus, seg, ea);
            let selector = cpu.segment_read_word(bus, seg, ea.wrapping_add(2));
            let old_cs = cpu.sregs[Segment::Cs as usize].raw;
            let old_ip = cpu.regs.ip;
            cpu.push(bus, old_cs);
            cpu.push(bus, old_ip);
            if cpu.load_segment_register(bus, Segment::Cs, selector) {
                cpu.regs.ip = target;
            }
            cpu.queue.dirty = true;
        }
        4 => {
            cpu.regs.ip = cpu.rm_read16(bus);
            cpu.queue.dirty = true;
        }
        5 => {
            if !cpu.mode.is_memory() {
                cpu.invalid = true;
                return;
            }
            let ea = cpu.get_ea_offset();
            let seg = cpu.seg;
            let target = cpu.segment_read_word(bus, seg, ea);
            let selector = cpu.segment_read_word(bus, seg, ea.wrapping_add(2));
            if cpu.load_segment_register(bus, Segment::Cs, selector) {
                cpu.regs.ip = target;
            }
            cpu.queue.dirty = true;
        }
        6 => {
            let v = cpu.rm_read16(bus);
            cpu.push(bus, v);
        }
        _ => cpu.invalid = true,
    }
}

// ========== Interrupts ==========

pub(crate) fn int3(cpu: &mut Cpu, bus: &mut Bus) {
    cpu.call_int(bus, 3);
}

pub(crate) fn int_imm8(cpu: &mut Cpu, bus: &mut Bus) {
    let n = cpu.read_opcode8(bus);
    cpu.call_int(bus, n);
}

pub(crate) fn into(cpu: &mut Cpu, bus: &mut Bus) {
    if cpu.regs.flag(regs::OVERFLOW) {
        cpu.call_int(bus, 4);
        cpu.cycles += 49;
    }
}

pub(crate) fn iret(cpu: &mut Cpu, bus: &mut Bus) {
    cpu.regs.ip = cpu.pop(bus);
    let cs = cpu.pop(bus);
    cpu.load_segment_register(bus, Segment::Cs, cs);
    let flags = cpu.pop(bus);
    cpu.regs.write_flags(flags);
    cpu.queue.dirty = true;
}

// ========== Port I/O ==========

pub(crate) fn in_al_imm8(cpu: &mut Cpu, bus: &mut Bus) {
    let port = cpu.read_opcode8(bus) as u16;
    let v = cpu.port_in(bus, port);
    cpu.regs.set_al(v);
}

pub(crate) fn in_ax_imm8(cpu: &mut Cpu, bus: &mut Bus) {
    let port = cpu.read_opcode8(bus) as u16;
    let lo = cpu.port_in(bus, port);
    let hi = cpu.port_in(bus, port.wrapping_add(1));
    cpu.regs.ax = lo as u16 | ((hi as u16) << 8);
}

pub(crate) fn out_imm8_al(cpu: &mut Cpu, bus: &mut Bus) {
    let port = cpu.read_opcode8(bus) as u16;
    let v = cpu.regs.al();
    cpu.port_out(bus, port, v);
}

pub(crate) fn out_imm8_ax(cpu: &mut Cpu, bus: &mut Bus) {
    let port = cpu.read_opcode8(bus) as u16;
    let ax = cpu.regs.ax;
    cpu.port_out(bus, port, ax as u8);
    cpu.port_out(bus, port.wrapping_add(1), (ax >> 8) as u8);
}

pub(crate) fn in_al_dx(cpu: &mut Cpu, bus: &mut Bus) {
    let port = cpu.regs.dx;
    let v = cpu.port_in(bus, port);
    cpu.regs.set_al(v);
}

pub(crate) fn in_ax_dx(cpu: &mut Cpu, bus: &mut Bus) {
    let port = cpu.regs.dx;
    let lo = cpu.port_in(bus, port);
    let hi = cpu.port_in(bus, port.wrapping_add(1));
    cpu.regs.ax = lo as u16 | ((hi as u16) << 8);
}

pub(crate) fn out_dx_al(cpu: &mut Cpu, bus: &mut Bus) {
    let port = cpu.regs.dx;
    let v = cpu.regs.al();
    cpu.port_out(bus, port, v);
}

pub(crate) fn out_dx_ax(cpu: &mut Cpu, bus: &mut Bus) {
    let port = cpu.regs.dx;
    let ax = cpu.regs.ax;
    cpu.port_out(bus, port, ax as u8);
    cpu.port_out(bus, port.wrapping_add(1), (ax >> 8) as u8);
}

// ========== Processor control ==========

pub(crate) fn hlt(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    cpu.halt = true;
}

pub(crate) fn cmc(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    let c = cpu.regs.flag(regs::CARRY);
    cpu.regs.set_flag(regs::CARRY, !c);
}

pub(crate) fn clc(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    cpu.regs.set_flag(regs::CARRY, false);
}

pub(crate) fn stc(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    cpu.regs.set_flag(regs::CARRY, true);
}

pub(crate) fn cli(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    cpu.regs.set_flag(regs::INTERRUPT, false);
}

pub(crate) fn sti(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    cpu.regs.set_flag(regs::INTERRUPT, true);
    // IF takes effect after the following instruction.
    cpu.defer_int = true;
}

pub(crate) fn cld(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    cpu.regs.set_flag(regs::DIRECTION, false);
}

pub(crate) fn std(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    cpu.regs.set_flag(regs::DIRECTION, true);
}

/// FPU escape: the operand decodes but execution raises the
/// coprocessor-not-available exception.
pub(crate) fn esc_fpu(cpu: &mut Cpu, bus: &mut Bus) {
    if cpu.mode.is_memory() {
        // The address calculation happens even without an NPX.
        let _ = cpu.get_ea_offset();
    }
    cpu.call_int(bus, 7);
}

pub(crate) fn invalid_op(cpu: &mut Cpu, bus: &mut Bus) {
    let _ = bus;
    cpu.invalid = true;
}
