//! String instruction and repeat prefix tests.

use crate::cpu::CpuVariant;
use crate::regs::{self, Segment};

use super::{load, machine};

#[test]
fn test_rep_movsb_copies_block() {
    let (mut cpu, mut bus) = machine(CpuVariant::Intel8088);
    load(&mut bus, 0x100, &[0xF3, 0xA4]); // rep movsb
    cpu.load_segment_register(&mut bus, Segment::Ds, 0x1000);
    cpu.load_segment_register(&mut bus, Segment::Es, 0x2000);
    cpu.regs.si = 0;
    cpu.regs.di = 0;
    cpu.regs.cx = 3;
    load(&mut bus, 0x10000, &[0x01, 0x02, 0x03]);

    // Each iteration is one boundary; run until the repeat retires.
    while cpu.regs.cx != 0 {
        cpu.step(&mut bus);
    }

    assert_eq!(bus.read_byte(0x20000), 0x01);
    assert_eq!(bus.read_byte(0x20001), 0x02);
    assert_eq!(bus.read_byte(0x20002), 0x03);
    assert_eq!(cpu.regs.si, 3);
    assert_eq!(cpu.regs.di, 3);
    assert_eq!(cpu.regs.ip, 0x102);
}

#[test]
fn test_rep_iteration_rewinds_to_prefix() {
    let (mut cpu, mut bus) = machine(CpuVariant::Intel8088);
    load(&mut bus, 0x100, &[0xF3, 0xA4]); // rep movsb
    cpu.regs.cx = 3;
    cpu.regs.si = 0x500;
    cpu.regs.di = 0x600;

    cpu.step(&mut bus);
    // Mid-repeat the instruction is resumable: IP points back at the
    // prefix and CX holds the remaining count.
    assert_eq!(cpu.regs.ip, 0x100);
    assert_eq!(cpu.regs.cx, 2);
    assert_eq!(cpu.regs.si, 0x501);
}

#[test]
fn test_rep_with_zero_count_is_a_no_op() {
    let (mut cpu, mut bus) = machine(CpuVariant::Intel8088);
    load(&mut bus, 0x100, &[0xF3, 0xAA]); // rep stosb
    cpu.regs.cx = 0;
    cpu.regs.di = 0x600;
    cpu.regs.set_al(0xEE);

    cpu.step(&mut bus);
    assert_eq!(cpu.regs.ip, 0x102);
    assert_eq!(cpu.regs.di, 0x600);
    assert_eq!(bus.read_byte(0x600), 0x00);
}

#[test]
fn test_rep_stosb_fills() {
    let (mut cpu, mut bus) = machine(CpuVariant::Intel8088);
    load(&mut bus, 0x100, &[0xF3, 0xAA]); // rep stosb
    cpu.regs.cx = 4;
    cpu.regs.di = 0x700;
    cpu.regs.set_al(0x5C);

    while cpu.regs.cx != 0 {
        cpu.step(&mut bus);
    }
    for i in 0..4 {
        assert_eq!(bus.read_byte(0x700 + i), 0x5C);
    }
    assert_eq!(cpu.regs.di, 0x704);
}

#[test]
fn test_repe_cmpsb_stops_on_mismatch() {
    let (mut cpu, mut bus) = machine(CpuVariant::Intel8088);
    load(&mut bus, 0x100, &[0xF3, 0xA6]); // repe cmpsb
    load(&mut bus, 0x500, b"abcX");
    load(&mut bus, 0x600, b"abcd");
    cpu.regs.si = 0x500;
    cpu.regs.di = 0x600;
    cpu.regs.cx = 10;

    loop {
        cpu.step(&mut bus);
        if cpu.regs.ip != 0x100 {
            break;
        }
    }

    // Three matches, then the mismatch ends the repeat early with the
    // remaining count still in CX.
    assert_eq!(cpu.regs.cx, 6);
    assert!(!cpu.regs.flag(regs::ZERO));
    assert_eq!(cpu.regs.si, 0x504);
}

#[test]
fn test_repne_scasb_finds_byte() {
    let (mut cpu, mut bus) = machine(CpuVariant::Intel8088);
    load(&mut bus, 0x100, &[0xF2, 0xAE]); // repne scasb
    load(&mut bus, 0x600, b"hello\0world");
    cpu.regs.di = 0x600;
    cpu.regs.cx = 0x20;
    cpu.regs.set_al(0);

    loop {
        cpu.step(&mut bus);
        if cpu.regs.ip != 0x100 {
            break;
        }
    }

    assert!(cpu.regs.flag(regs::ZERO));
    // DI is one past the terminator at offset 5.
    assert_eq!(cpu.regs.di, 0x606);
    assert_eq!(cpu.regs.cx, 0x20 - 6);
}

#[test]
fn test_lodsb_with_direction_flag() {
    let (mut cpu, mut bus) = machine(CpuVariant::Intel8088);
    load(&mut bus, 0x100, &[0xAC, 0xAC]); // lodsb; lodsb
    load(&mut bus, 0x500, &[0x11, 0x22]);
    cpu.regs.si = 0x501;
    cpu.regs.set_flag(regs::DIRECTION, true);

    cpu.step(&mut bus);
    assert_eq!(cpu.regs.al(), 0x22);
    assert_eq!(cpu.regs.si, 0x500);

    cpu.step(&mut bus);
    assert_eq!(cpu.regs.al(), 0x11);
    assert_eq!(cpu.regs.si, 0x4FF);
}

#[test]
fn test_movsw_moves_words() {
    let (mut cpu, mut bus) = machine(CpuVariant::Intel8088);
    load(&mut bus, 0x100, &[0xA5]); // movsw
    bus.write_word(0x500, 0xCAFE);
    cpu.regs.si = 0x500;
    cpu.regs.di = 0x600;

    cpu.step(&mut bus);
    assert_eq!(bus.read_word(0x600), 0xCAFE);
    assert_eq!(cpu.regs.si, 0x502);
    assert_eq!(cpu.regs.di, 0x602);
}

#[test]
fn test_rep_dropped_on_non_string_opcode() {
    let (mut cpu, mut bus) = machine(CpuVariant::Intel8088);
    load(&mut bus, 0x100, &[0xF3, 0x40]); // rep inc ax
    cpu.regs.cx = 5;

    cpu.step(&mut bus);
    // The prefix is silently dropped: INC runs once, CX is untouched.
    assert_eq!(cpu.regs.ax, 1);
    assert_eq!(cpu.regs.cx, 5);
    assert_eq!(cpu.regs.ip, 0x102);
}

#[test]
fn test_movsb_honours_segment_override_for_source_only() {
    let (mut cpu, mut bus) = machine(CpuVariant::Intel8088);
    load(&mut bus, 0x100, &[0x2E, 0xA4]); // cs: movsb
    cpu.load_segment_register(&mut bus, Segment::Ds, 0x1000);
    cpu.load_segment_register(&mut bus, Segment::Es, 0x2000);
    cpu.regs.si = 0x800;
    cpu.regs.di = 0x000;
    bus.write_byte(0x800, 0x7E); // cs is zero-based
    bus.write_byte(0x10800, 0xFF);

    cpu.step(&mut bus);
    // Source came from CS:SI, destination is always ES:DI.
    assert_eq!(bus.read_byte(0x20000), 0x7E);
}

#[test]
fn test_rep_insb_from_port(){
    let (mut cpu, mut bus) = machine(CpuVariant::NecV20);
    load(&mut bus, 0x100, &[0xF3, 0x6C]); // rep insb
    cpu.load_segment_register(&mut bus, Segment::Es, 0x2000);
    cpu.regs.dx = 0x3F8;
    cpu.regs.di = 0;
    cpu.regs.cx = 2;

    while cpu.regs.cx != 0 {
        cpu.step(&mut bus);
    }
    // Unmapped port reads 0xFF.
    assert_eq!(bus.read_byte(0x20000), 0xFF);
    assert_eq!(bus.read_byte(0x20001), 0xFF);
    assert_eq!(cpu.regs.di, 2);
}
