//! 80186/V20 extensions and the 80286 escape group.
//!
//! On the 8088 and V20 opcode 0x0F is POP CS; on the 80286 it escapes
//! to the descriptor-table and machine-status-word instructions.

use crate::bus::Bus;
use crate::desc::{vector, SegmentDescriptor, SegmentSelector};
use crate::regs::{self, Segment};

use super::helpers::*;
use super::{Cpu, CpuVariant, Repeat, MSW_PE, MSW_TS};

// ========== 80186 / V20 ==========

pub(crate) fn pusha(cpu: &mut Cpu, bus: &mut Bus) {
    let r = cpu.regs;
    cpu.push(bus, r.ax);
    cpu.push(bus, r.cx);
    cpu.push(bus, r.dx);
    cpu.push(bus, r.bx);
    cpu.push(bus, r.sp);
    cpu.push(bus, r.bp);
    cpu.push(bus, r.si);
    cpu.push(bus, r.di);
}

pub(crate) fn popa(cpu: &mut Cpu, bus: &mut Bus) {
    cpu.regs.di = cpu.pop(bus);
    cpu.regs.si = cpu.pop(bus);
    cpu.regs.bp = cpu.pop(bus);
    let _ = cpu.pop(bus); // SP is discarded.
    cpu.regs.bx = cpu.pop(bus);
    cpu.regs.dx = cpu.pop(bus);
    cpu.regs.cx = cpu.pop(bus);
    cpu.regs.ax = cpu.pop(bus);
}

pub(crate) fn bound_r16(cpu: &mut Cpu, bus: &mut Bus) {
    if !cpu.mode.is_memory() {
        cpu.invalid = true;
        return;
    }
    let ea = cpu.get_ea_offset();
    let seg = cpu.seg;
    let lower = cpu.segment_read_word(bus, seg, ea) as i16;
    let upper = cpu.segment_read_word(bus, seg, ea.wrapping_add(2)) as i16;
    let index = reg_read16(&cpu.regs, cpu.mode.reg) as i16;

    if index < lower || index > upper {
        cpu.regs.ip = cpu.inst_start;
        cpu.call_int(bus, vector::BOUND_RANGE);
    }
}

pub(crate) fn push_imm16(cpu: &mut Cpu, bus: &mut Bus) {
    let v = cpu.read_opcode16(bus);
    cpu.push(bus, v);
}

pub(crate) fn push_imm8(cpu: &mut Cpu, bus: &mut Bus) {
    let v = sign_extend16(cpu.read_opcode8(bus));
    cpu.push(bus, v);
}

fn imul_imm(cpu: &mut Cpu, bus: &mut Bus, imm: u16) {
    let a = cpu.rm_read16(bus) as i16 as i32;
    let res = a.wrapping_mul(imm as i16 as i32);
    reg_write16(&mut cpu.regs, cpu.mode.reg, res as u16);
    let fits = res == res as i16 as i32;
    cpu.regs.set_flag(regs::CARRY | regs::OVERFLOW, !fits);
}

pub(crate) fn imul_r16_rm16_imm16(cpu: &mut Cpu, bus: &mut Bus) {
    let imm = cpu.read_opcode16(bus);
    imul_imm(cpu, bus, imm);
}

pub(crate) fn imul_r16_rm16_imm8(cpu: &mut Cpu, bus: &mut Bus) {
    let imm = sign_extend16(cpu.read_opcode8(bus));
    imul_imm(cpu, bus, imm);
}

pub(crate) fn shift_rm8_imm8(cpu: &mut Cpu, bus: &mut Bus) {
    let count = cpu.read_opcode8(bus);
    let count = super::execute::masked_count(cpu, count);
    let v = cpu.rm_read8(bus);
    let d = super::execute::shift8(&mut cpu.regs, cpu.mode.reg, v, count);
    cpu.rm_write8(bus, d);
}

pub(crate) fn shift_rm16_imm8(cpu: &mut Cpu, bus: &mut Bus) {
    let count = cpu.read_opcode8(bus);
    let count = super::execute::masked_count(cpu, count);
    let v = cpu.rm_read16(bus);
    let d = super::execute::shift16(&mut cpu.regs, cpu.mode.reg, v, count);
    cpu.rm_write16(bus, d);
}

pub(crate) fn enter(cpu: &mut Cpu, bus: &mut Bus) {
    let size = cpu.read_opcode16(bus);
    let level = cpu.read_opcode8(bus) & 0x1F;

    let bp = cpu.regs.bp;
    cpu.push(bus, bp);
    let frame = cpu.regs.sp;

    if level > 0 {
        for _ in 1..level {
            cpu.regs.bp = cpu.regs.bp.wrapping_sub(2);
            let bp = cpu.regs.bp;
            let v = cpu.segment_read_word(bus, Segment::Ss, bp);
            cpu.push(bus, v);
        }
        cpu.push(bus, frame);
    }

    cpu.regs.bp = frame;
    cpu.regs.sp = cpu.regs.sp.wrapping_sub(size);
}

pub(crate) fn leave(cpu: &mut Cpu, bus: &mut Bus) {
    cpu.regs.sp = cpu.regs.bp;
    cpu.regs.bp = cpu.pop(bus);
}

// String input/output, REP-able like the 8086 string family.

fn insb_once(cpu: &mut Cpu, bus: &mut Bus) {
    let port = cpu.regs.dx;
    let di = cpu.regs.di;
    let v = cpu.port_in(bus, port);
    cpu.segment_write_byte(bus, Segment::Es, di, v);
    cpu.update_di(1);
}

fn insw_once(cpu: &mut Cpu, bus: &mut Bus) {
    let port = cpu.regs.dx;
    let di = cpu.regs.di;
    let lo = cpu.port_in(bus, port);
    let hi = cpu.port_in(bus, port.wrapping_add(1));
    cpu.segment_write_word(bus, Segment::Es, di, lo as u16 | ((hi as u16) << 8));
    cpu.update_di(2);
}

fn outsb_once(cpu: &mut Cpu, bus: &mut Bus) {
    let seg = cpu.seg;
    let si = cpu.regs.si;
    let port = cpu.regs.dx;
    let v = cpu.segment_read_byte(bus, seg, si);
    cpu.port_out(bus, port, v);
    cpu.update_si(1);
}

fn outsw_once(cpu: &mut Cpu, bus: &mut Bus) {
    let seg = cpu.seg;
    let si = cpu.regs.si;
    let port = cpu.regs.dx;
    let v = cpu.segment_read_word(bus, seg, si);
    cpu.port_out(bus, port, v as u8);
    cpu.port_out(bus, port.wrapping_add(1), (v >> 8) as u8);
    cpu.update_si(2);
}

fn string_io(cpu: &mut Cpu, bus: &mut Bus, one: fn(&mut Cpu, &mut Bus)) {
    match cpu.repeat {
        Repeat::None => one(cpu, bus),
        _ => {
            if cpu.regs.cx == 0 {
                return;
            }
            one(cpu, bus);
            cpu.regs.cx -= 1;
            if cpu.regs.cx != 0 {
                cpu.regs.ip = cpu.inst_start;
                cpu.queue.dirty = true;
            }
        }
    }
}

pub(crate) fn insb(cpu: &mut Cpu, bus: &mut Bus) {
    string_io(cpu, bus, insb_once);
}

pub(crate) fn insw(cpu: &mut Cpu, bus: &mut Bus) {
    string_io(cpu, bus, insw_once);
}

pub(crate) fn outsb(cpu: &mut Cpu, bus: &mut Bus) {
    string_io(cpu, bus, outsb_once);
}

pub(crate) fn outsw(cpu: &mut Cpu, bus: &mut Bus) {
    string_io(cpu, bus, outsw_once);
}

// ========== 0x0F: POP CS or the 80286 escape ==========

pub(crate) fn pop_cs_or_escape(cpu: &mut Cpu, bus: &mut Bus) {
    if cpu.variant != CpuVariant::Intel80286 {
        let v = cpu.pop(bus);
        cpu.load_segment_register(bus, Segment::Cs, v);
        cpu.queue.dirty = true;
        cpu.defer_int = true;
        return;
    }

    let sub = cpu.read_opcode8(bus);
    match sub {
        0x00 => {
            cpu.read_modregrm(bus);
            grp6(cpu, bus);
        }
        0x01 => {
            cpu.read_modregrm(bus);
            grp7(cpu, bus);
        }
        0x02 => {
            cpu.read_modregrm(bus);
            lar_r16_rm16(cpu, bus);
        }
        0x03 => {
            cpu.read_modregrm(bus);
            lsl_r16_rm16(cpu, bus);
        }
        0x06 => {
            // CLTS
            cpu.msw &= !MSW_TS;
        }
        _ => cpu.invalid = true,
    }
}

fn grp6(cpu: &mut Cpu, bus: &mut Bus) {
    match cpu.mode.reg {
        0 => {
            // SLDT
            let v = cpu.sregs[Segment::Ldtr as usize].raw;
            cpu.rm_write16(bus, v);
        }
        1 => {
            // STR
            let v = cpu.sregs[Segment::Tr as usize].raw;
            cpu.rm_write16(bus, v);
        }
        2 => {
            // LLDT
            let v = cpu.rm_read16(bus);
            load_table_register(cpu, bus, Segment::Ldtr, v);
        }
        3 => {
            // LTR
            let v = cpu.rm_read16(bus);
            load_table_register(cpu, bus, Segment::Tr, v);
        }
        4 => verify_segment(cpu, bus, false),
        5 => verify_segment(cpu, bus, true),
        _ => cpu.invalid = true,
    }
}

fn grp7(cpu: &mut Cpu, bus: &mut Bus) {
    match cpu.mode.reg {
        0 => store_table(cpu, bus, Segment::Gdtr),
        1 => store_table(cpu, bus, Segment::Idtr),
        2 => load_table(cpu, bus, Segment::Gdtr),
        3 => load_table(cpu, bus, Segment::Idtr),
        4 => {
            // SMSW
            let v = cpu.msw;
            cpu.rm_write16(bus, v);
        }
        6 => {
            // LMSW: every bit but PE can be rewritten; PE sticks.
            let v = cpu.rm_read16(bus);
            cpu.msw = (v & 0xF) | (cpu.msw & MSW_PE);
        }
        _ => cpu.invalid = true,
    }
}

/// SGDT/SIDT: limit word followed by the 24-bit base; the 80286 writes
/// an all-ones high byte.
fn store_table(cpu: &mut Cpu, bus: &mut Bus, table: Segment) {
    if !cpu.mode.is_memory() {
        cpu.invalid = true;
        return;
    }
    let ea = cpu.get_ea_offset();
    let seg = cpu.seg;
    let desc = cpu.sregs[table as usize].desc;
    cpu.segment_write_word(bus, seg, ea, desc.limit);
    cpu.segment_write_word(bus, seg, ea.wrapping_add(2), desc.base as u16);
    cpu.segment_write_byte(bus, seg, ea.wrapping_add(4), (desc.base >> 16) as u8);
    cpu.segment_write_byte(bus, seg, ea.wrapping_add(5), 0xFF);
}

fn load_table(cpu: &mut Cpu, bus: &mut Bus, table: Segment) {
    if !cpu.mode.is_memory() {
        cpu.invalid = true;
        return;
    }
    let ea = cpu.get_ea_offset();
    let seg = cpu.seg;
    let limit = cpu.segment_read_word(bus, seg, ea);
    let base_low = cpu.segment_read_word(bus, seg, ea.wrapping_add(2));
    let base_high = cpu.segment_read_byte(bus, seg, ea.wrapping_add(4));

    let desc = &mut cpu.sregs[table as usize].desc;
    desc.limit = limit;
    desc.base = ((base_high as u32) << 16) | base_low as u32;
    desc.valid = true;
}

/// LLDT/LTR: resolve the selector in the GDT and latch the descriptor.
fn load_table_register(cpu: &mut Cpu, bus: &mut Bus, table: Segment, v: u16) {
    if !cpu.is_protected() {
        cpu.invalid = true;
        return;
    }
    let sel = SegmentSelector::from_raw(v);
    if sel.index == 0 {
        // A null selector just invalidates the register.
        cpu.sregs[table as usize] = Default::default();
        cpu.sregs[table as usize].raw = v;
        return;
    }
    let raw = match cpu.fetch_segment_descriptor(bus, sel, v, vector::GENERAL_PROTECTION) {
        Some(raw) => raw,
        None => return,
    };
    cpu.sregs[table as usize].sel = sel;
    cpu.sregs[table as usize].desc = SegmentDescriptor::unpack(raw);
    cpu.sregs[table as usize].raw = v;
}

/// Descriptor probe shared by LAR/LSL/VERR/VERW: no fault, just ZF.
fn probe_descriptor(cpu: &mut Cpu, bus: &mut Bus, v: u16) -> Option<SegmentDescriptor> {
    let sel = SegmentSelector::from_raw(v);
    let table = if sel.ti { Segment::Ldtr } else { Segment::Gdtr };
    let tdesc = cpu.sregs[table as usize].desc;

    let offset = sel.index as u32 * 8;
    if !tdesc.valid || offset + 7 > tdesc.limit as u32 {
        return None;
    }

    let mut raw = 0u64;
    for i in 0..8 {
        raw |= (cpu.read_byte(bus, tdesc.base + offset + i) as u64) << (i * 8);
    }
    let desc = SegmentDescriptor::unpack(raw);
    if desc.present {
        Some(desc)
    } else {
        None
    }
}

fn lar_r16_rm16(cpu: &mut Cpu, bus: &mut Bus) {
    if !cpu.is_protected() {
        cpu.invalid = true;
        return;
    }
    let v = cpu.rm_read16(bus);
    match probe_descriptor(cpu, bus, v) {
        Some(desc) => {
            reg_write16(&mut cpu.regs, cpu.mode.reg, (desc.access_byte() as u16) << 8);
            cpu.regs.set_flag(regs::ZERO, true);
        }
        None => cpu.regs.set_flag(regs::ZERO, false),
    }
}

fn lsl_r16_rm16(cpu: &mut Cpu, bus: &mut Bus) {
    if !cpu.is_protected() {
        cpu.invalid = true;
        return;
    }
    let v = cpu.rm_read16(bus);
    match probe_descriptor(cpu, bus, v) {
        Some(desc) if desc.segment => {
            reg_write16(&mut cpu.regs, cpu.mode.reg, desc.limit);
            cpu.regs.set_flag(regs::ZERO, true);
        }
        _ => cpu.regs.set_flag(regs::ZERO, false),
    }
}

/// VERR/VERW. For code/data descriptors the type field carries the
/// read/write enable in bit 0 and the executable bit in bit 2.
fn verify_segment(cpu: &mut Cpu, bus: &mut Bus, write: bool) {
    if !cpu.is_protected() {
        cpu.invalid = true;
        return;
    }
    let v = cpu.rm_read16(bus);
    let ok = match probe_descriptor(cpu, bus, v) {
        Some(desc) if desc.segment => {
            let executable = desc.typ & 0x4 != 0;
            if write {
                !executable && desc.typ & 0x1 != 0
            } else {
                !executable || desc.typ & 0x1 != 0
            }
        }
        _ => false,
    };
    cpu.regs.set_flag(regs::ZERO, ok);
}
