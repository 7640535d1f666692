//! CPU unit tests.
//!
//! Each test builds a minimal machine (CPU plus a megabyte of RAM on
//! the bus), pokes code and data straight into memory and steps the
//! CPU through it.

mod instructions;
mod modes;
mod strings;

use crate::bus::Bus;
use crate::memory::Memory;
use crate::regs::{self, Segment};

use super::{Cpu, CpuVariant};

/// A CPU with flat RAM, code segment at 0000:0100.
pub(super) fn machine(variant: CpuVariant) -> (Cpu, Bus) {
    let mut bus = Bus::new(1_000_000);
    let id = bus.attach(Box::new(Memory::new(0, 0x100000, false)));
    bus.install_mem(id, 0, 0xFFFFF);

    let mut cpu = Cpu::new(variant);
    cpu.load_segment_register(&mut bus, Segment::Cs, 0);
    cpu.regs.ip = 0x100;
    (cpu, bus)
}

pub(super) fn load(bus: &mut Bus, addr: u32, bytes: &[u8]) {
    for (i, &b) in bytes.iter().enumerate() {
        bus.write_byte(addr + i as u32, b);
    }
}

/// Point interrupt vector `n` at cs:ip.
pub(super) fn set_ivt(bus: &mut Bus, n: u8, cs: u16, ip: u16) {
    bus.write_word(n as u32 * 4, ip);
    bus.write_word(n as u32 * 4 + 2, cs);
}

#[test]
fn test_reset_state() {
    let mut bus = Bus::new(1_000_000);
    let cpu = Cpu::new(CpuVariant::Intel8088);
    let _ = &mut bus;

    assert_eq!(cpu.regs.cs, 0xF000);
    assert_eq!(cpu.regs.ip, 0xFFF0);
    assert_eq!(cpu.regs.flags, 0x2);
    assert!(!cpu.halt);
    // The reset code segment resolves to physical 0xF0000.
    assert_eq!(cpu.sregs[Segment::Cs as usize].desc.base, 0xF0000);
}

#[test]
fn test_reset_vector_fetch() {
    let (mut cpu, mut bus) = machine(CpuVariant::Intel8088);
    cpu.reset();
    // First code fetch must read physical 0xFFFF0.
    load(&mut bus, 0xFFFF0, &[0xF4]); // hlt
    cpu.step(&mut bus);
    assert!(cpu.halt);
}

#[test]
fn test_halted_cpu_burns_one_cycle_per_step() {
    let (mut cpu, mut bus) = machine(CpuVariant::Intel8088);
    load(&mut bus, 0x100, &[0xF4]);
    cpu.step(&mut bus);
    assert!(cpu.halt);

    let before = cpu.step(&mut bus);
    let after = cpu.step(&mut bus);
    assert_eq!(after - before, 1);
    assert!(cpu.halt);
}

#[cfg(feature = "prefetch")]
#[test]
fn test_prefetch_refill_and_reuse() {
    let (mut cpu, mut bus) = machine(CpuVariant::Intel8088);
    // push ax leaves spare cycles for the queue to top up; the
    // following instructions then execute from the queue.
    load(&mut bus, 0x100, &[0x50, 0x40, 0x40, 0xF4]); // push ax; inc ax; inc ax; hlt
    cpu.regs.sp = 0x8000;

    cpu.step(&mut bus);
    assert!(cpu.queue.count > 0);

    cpu.step(&mut bus);
    cpu.step(&mut bus);
    assert_eq!(cpu.regs.ax, 2);
}

#[cfg(feature = "prefetch")]
#[test]
fn test_prefetch_queue_invalidated_by_jump() {
    let (mut cpu, mut bus) = machine(CpuVariant::Intel8088);
    load(&mut bus, 0x100, &[0x50, 0xEB, 0x10]); // push ax; jmp +0x10
    cpu.regs.sp = 0x8000;

    cpu.step(&mut bus);
    cpu.step(&mut bus);
    assert_eq!(cpu.queue.count, 0);
    assert_eq!(cpu.regs.ip, 0x113);
}

#[test]
fn test_trap_flag_single_step() {
    let (mut cpu, mut bus) = machine(CpuVariant::Intel8088);
    set_ivt(&mut bus, 1, 0x0000, 0x800);
    load(&mut bus, 0x100, &[0x40]); // inc ax
    load(&mut bus, 0x800, &[0xF4]); // hlt
    cpu.regs.sp = 0x8000;
    cpu.regs.flags |= regs::TRAP;

    cpu.step(&mut bus);
    // The boundary delivered vector 1 and the handler's first
    // instruction ran in the same step; the pushed flags still carry
    // TF while the live TF is clear.
    assert!(cpu.halt);
    assert_eq!(cpu.regs.ip, 0x801);
    assert!(!cpu.regs.flag(regs::TRAP));
    let pushed_flags = bus.read_word(0x8000 - 2);
    assert!(pushed_flags & regs::TRAP != 0);
}

#[test]
fn test_interrupt_frame_layout() {
    let (mut cpu, mut bus) = machine(CpuVariant::Intel8088);
    set_ivt(&mut bus, 0x21, 0x2000, 0x0010);
    load(&mut bus, 0x100, &[0xCD, 0x21]); // int 0x21
    cpu.regs.sp = 0x8000;
    cpu.regs.flags |= regs::INTERRUPT;

    cpu.step(&mut bus);

    assert_eq!(cpu.regs.cs, 0x2000);
    assert_eq!(cpu.regs.ip, 0x0010);
    assert!(!cpu.regs.flag(regs::INTERRUPT));
    assert!(!cpu.regs.flag(regs::TRAP));

    // FLAGS, CS, IP pushed in that order.
    assert_eq!(bus.read_word(0x8000 - 6) & 0xF002, 0xF002);
    assert!(bus.read_word(0x8000 - 6) & regs::INTERRUPT != 0);
    assert_eq!(bus.read_word(0x8000 - 4), 0x0000);
    assert_eq!(bus.read_word(0x8000 - 2), 0x0102);
}

#[test]
fn test_iret_restores_frame() {
    let (mut cpu, mut bus) = machine(CpuVariant::Intel8088);
    set_ivt(&mut bus, 0x21, 0x0000, 0x800);
    load(&mut bus, 0x100, &[0xCD, 0x21, 0x40]); // int 0x21; inc ax
    load(&mut bus, 0x800, &[0xCF]); // iret
    cpu.regs.sp = 0x8000;
    cpu.regs.flags |= regs::INTERRUPT;

    cpu.step(&mut bus); // into the handler
    cpu.step(&mut bus); // iret
    assert_eq!(cpu.regs.ip, 0x102);
    assert_eq!(cpu.regs.cs, 0x0000);
    assert!(cpu.regs.flag(regs::INTERRUPT));

    cpu.step(&mut bus);
    assert_eq!(cpu.regs.ax, 1);
}

#[test]
fn test_invalid_opcode_raises_ud() {
    let (mut cpu, mut bus) = machine(CpuVariant::Intel8088);
    set_ivt(&mut bus, 6, 0x0000, 0x800);
    load(&mut bus, 0x100, &[0x63]); // 80286 territory on an 8088
    cpu.regs.sp = 0x8000;

    cpu.step(&mut bus);
    assert!(cpu.invalid);
    assert_eq!(cpu.regs.ip, 0x800);
}

#[test]
fn test_tier_gating_denies_v20_opcodes_on_8088() {
    let (mut cpu, mut bus) = machine(CpuVariant::Intel8088);
    set_ivt(&mut bus, 6, 0x0000, 0x800);
    load(&mut bus, 0x100, &[0x60]); // pusha
    cpu.regs.sp = 0x8000;

    cpu.step(&mut bus);
    assert!(cpu.invalid);

    // The same opcode is fine on a V20.
    let (mut cpu, mut bus) = machine(CpuVariant::NecV20);
    load(&mut bus, 0x100, &[0x60]);
    cpu.regs.sp = 0x8000;
    cpu.step(&mut bus);
    assert!(!cpu.invalid);
}

#[test]
fn test_fpu_escape_raises_vector_7() {
    let (mut cpu, mut bus) = machine(CpuVariant::Intel8088);
    set_ivt(&mut bus, 7, 0x0000, 0x800);
    load(&mut bus, 0x100, &[0xD8, 0xC0]); // fadd st(0)
    cpu.regs.sp = 0x8000;

    cpu.step(&mut bus);
    assert!(!cpu.invalid);
    assert_eq!(cpu.regs.ip, 0x800);
}

#[test]
fn test_int28_sets_idle_hint() {
    let (mut cpu, mut bus) = machine(CpuVariant::Intel8088);
    set_ivt(&mut bus, 0x28, 0x0000, 0x800);
    load(&mut bus, 0x100, &[0xCD, 0x28]);
    cpu.regs.sp = 0x8000;

    cpu.step(&mut bus);
    assert!(cpu.int28);
}
