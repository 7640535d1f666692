//! Whole-machine scenarios driven through the public [`System`] API.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bus::Bus;
use crate::cpu::CpuVariant;
use crate::error::Error;
use crate::memory::Memory;
use crate::peripheral::{DeviceId, Peripheral, PeripheralClass};
use crate::regs;
use crate::system::{System, DEFAULT_FREQUENCY};
use crate::timer::TimerId;
use crate::validator::Validator;

/// Single-line interrupt controller good enough for boundary tests.
#[derive(Default)]
struct TestPic {
    pending: Rc<RefCell<Option<u8>>>,
}

impl Peripheral for TestPic {
    fn name(&self) -> &'static str {
        "test interrupt controller"
    }

    fn class(&self) -> PeripheralClass {
        PeripheralClass::Pic
    }

    fn irq(&mut self, line: u8) {
        *self.pending.borrow_mut() = Some(8 + line);
    }

    fn next(&mut self) -> Option<u8> {
        self.pending.borrow_mut().take()
    }
}

fn load(sys: &mut System, addr: u32, bytes: &[u8]) {
    for (i, &b) in bytes.iter().enumerate() {
        sys.bus().write_byte(addr + i as u32, b);
    }
}

fn set_ivt(sys: &mut System, n: u8, cs: u16, ip: u16) {
    sys.bus().write_word(n as u32 * 4, ip);
    sys.bus().write_word(n as u32 * 4 + 2, cs);
}

fn machine_with(devices: Vec<Box<dyn Peripheral>>) -> System {
    let mut all: Vec<Box<dyn Peripheral>> = vec![Box::new(Memory::new(0, 0x100000, false))];
    all.extend(devices);
    let mut sys = System::new(CpuVariant::Intel8088, DEFAULT_FREQUENCY, all);
    sys.initialize().unwrap();
    sys.reset().unwrap();
    sys
}

fn machine() -> System {
    machine_with(Vec::new())
}

#[test]
fn test_reset_vector_runs_first() {
    let mut sys = machine();
    load(&mut sys, 0xFFFF0, &[0xB8, 0x34, 0x12, 0xF4]); // mov ax, 0x1234; hlt

    let step = sys.step(1);
    assert_eq!(sys.registers().ax, 0x1234);
    assert!(step.cycles > 0);
}

#[test]
fn test_step_runs_until_budget() {
    let mut sys = machine();
    load(&mut sys, 0xFFFF0, &[0xEA, 0x00, 0x02, 0x00, 0x00]); // jmp 0000:0200
    load(&mut sys, 0x200, &[0x90; 64]); // nop sled
    load(&mut sys, 0x240, &[0xF4]);

    let step = sys.step(30);
    assert!(step.cycles >= 30);
    assert!(!step.halted);
}

#[test]
fn test_halt_parks_and_reports() {
    let mut sys = machine();
    load(&mut sys, 0xFFFF0, &[0xF4]); // hlt

    let step = sys.step(50);
    assert!(step.halted);
    assert!(step.cycles >= 50);

    // Still parked on the next call.
    let step = sys.step(10);
    assert!(step.halted);
}

#[test]
fn test_irq_serviced_at_instruction_boundary() {
    let pending = Rc::new(RefCell::new(None));
    let mut sys = machine_with(vec![Box::new(TestPic { pending: pending.clone() })]);

    set_ivt(&mut sys, 8, 0x0000, 0x2000);
    load(&mut sys, 0xFFFF0, &[0x01, 0xD8]); // add ax, bx
    load(&mut sys, 0x2000, &[0xF4]); // isr: hlt
    {
        let regs = sys.registers();
        regs.ax = 1;
        regs.bx = 2;
        regs.sp = 0x8000;
        regs.flags |= regs::INTERRUPT;
    }

    // No IRQ pending: the arithmetic retires normally.
    sys.step(1);
    assert_eq!(sys.registers().ax, 3);

    // Raise IRQ 0 (vector 8) and step again: the CPU enters the ISR
    // with an IRET-able frame and IF/TF cleared.
    sys.interrupt(0);
    sys.step(1);

    let (cs, ip, flags) = {
        let regs = sys.registers();
        (regs.cs, regs.ip, regs.flags)
    };
    assert_eq!(cs, 0x0000);
    assert_eq!(ip, 0x2001); // the ISR's hlt already ran
    assert!(flags & regs::INTERRUPT == 0);
    assert!(flags & regs::TRAP == 0);

    assert_eq!(sys.bus().read_word(0x8000 - 2), 0xFFF2); // return ip
    assert_eq!(sys.bus().read_word(0x8000 - 4), 0xF000); // return cs
    assert!(sys.bus().read_word(0x8000 - 6) & regs::INTERRUPT != 0);
}

#[test]
fn test_masked_irq_stays_pending() {
    let pending = Rc::new(RefCell::new(None));
    let mut sys = machine_with(vec![Box::new(TestPic { pending: pending.clone() })]);

    load(&mut sys, 0xFFFF0, &[0x90, 0x90, 0xF4]);
    sys.registers().flags &= !regs::INTERRUPT;

    sys.interrupt(0);
    sys.step(1);
    assert!(pending.borrow().is_some());
}

#[test]
fn test_int28_reported_as_idle_hint() {
    let mut sys = machine();
    set_ivt(&mut sys, 0x28, 0x0000, 0x2000);
    load(&mut sys, 0xFFFF0, &[0xCD, 0x28]); // int 0x28
    load(&mut sys, 0x2000, &[0xF4]);
    sys.registers().sp = 0x8000;

    let step = sys.step(1);
    assert!(step.int28);
}

#[test]
fn test_invalid_opcode_reported() {
    let mut sys = machine();
    set_ivt(&mut sys, 6, 0x0000, 0x2000);
    load(&mut sys, 0xFFFF0, &[0x63]); // not an 8088 instruction
    load(&mut sys, 0x2000, &[0xF4]);
    sys.registers().sp = 0x8000;

    let step = sys.step(1);
    assert!(step.invalid);
}

struct Terminator;

impl Peripheral for Terminator {
    fn install(&mut self, id: DeviceId, sys: &mut System) -> Result<(), Error> {
        sys.install_timer(id, 0);
        Ok(())
    }

    fn timer(&mut self, _bus: &mut Bus, _id: TimerId, _cycles: u64) -> Result<(), Error> {
        Err(Error::UserTermination)
    }
}

#[test]
fn test_timer_error_ends_step() {
    let mut sys = machine_with(vec![Box::new(Terminator)]);
    load(&mut sys, 0xFFFF0, &[0x90, 0x90, 0x90]);

    let step = sys.step(1000);
    assert_eq!(step.err, Some(Error::UserTermination));
    // Only the instruction before the failing timer ran.
    assert!(step.cycles < 1000);
}

struct WakerPic {
    pending: Rc<RefCell<Option<u8>>>,
    raised: bool,
}

impl Peripheral for WakerPic {
    fn install(&mut self, id: DeviceId, sys: &mut System) -> Result<(), Error> {
        sys.install_timer(id, 0);
        Ok(())
    }

    fn class(&self) -> PeripheralClass {
        PeripheralClass::Pic
    }

    fn timer(&mut self, bus: &mut Bus, _id: TimerId, _cycles: u64) -> Result<(), Error> {
        if !self.raised {
            self.raised = true;
            // The device is swapped out of its own slot while its timer
            // runs, so latch the vector directly and use the bus call
            // for the halt wake-up.
            *self.pending.borrow_mut() = Some(8);
            bus.interrupt(0);
        }
        Ok(())
    }

    fn irq(&mut self, line: u8) {
        *self.pending.borrow_mut() = Some(8 + line);
    }

    fn next(&mut self) -> Option<u8> {
        self.pending.borrow_mut().take()
    }
}

#[test]
fn test_timer_interrupt_wakes_halted_cpu() {
    let mut sys = machine_with(vec![Box::new(WakerPic {
        pending: Rc::new(RefCell::new(None)),
        raised: false,
    })]);
    set_ivt(&mut sys, 8, 0x0000, 0x2000);
    load(&mut sys, 0xFFFF0, &[0xF4]); // hlt
    load(&mut sys, 0x2000, &[0x40, 0xF4]); // isr: inc ax; hlt
    {
        let regs = sys.registers();
        regs.sp = 0x8000;
        regs.flags |= regs::INTERRUPT;
    }

    // The wake flag un-halts the CPU and the boundary poll picks the
    // vector up on the next instruction.
    sys.step(40);
    assert_eq!(sys.registers().ax, 1);
}

struct Configurable {
    seen: Rc<RefCell<Vec<(String, String, String)>>>,
}

impl Peripheral for Configurable {
    fn configure(&mut self, section: &str, key: &str, value: &str) -> Result<(), Error> {
        self.seen.borrow_mut().push((section.into(), key.into(), value.into()));
        Ok(())
    }
}

#[test]
fn test_configure_forwards_to_all_peripherals() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let ram = Box::new(Memory::new(0, 0x1000, false));
    let dev = Box::new(Configurable { seen: seen.clone() });
    let mut sys = System::new(CpuVariant::Intel8088, DEFAULT_FREQUENCY, vec![ram, dev]);

    sys.configure("video", "mode", "cga").unwrap();
    assert_eq!(
        *seen.borrow(),
        vec![("video".to_owned(), "mode".to_owned(), "cga".to_owned())]
    );
}

struct NeedsPic;

impl Peripheral for NeedsPic {
    fn install(&mut self, _id: DeviceId, sys: &mut System) -> Result<(), Error> {
        sys.find_class(PeripheralClass::Pic).ok_or(Error::NoPic)?;
        Ok(())
    }
}

#[test]
fn test_install_error_aborts_initialize() {
    let ram = Box::new(Memory::new(0, 0x1000, false));
    let mut sys =
        System::new(CpuVariant::Intel8088, DEFAULT_FREQUENCY, vec![ram, Box::new(NeedsPic)]);
    assert_eq!(sys.initialize(), Err(Error::NoPic));
}

#[test]
fn test_rom_shadows_ram_and_ignores_writes() {
    let ram = Box::new(Memory::new(0, 0x100000, false));
    let mut rom = Memory::new(0xF0000, 0x10000, true);
    let mut image = vec![0; 0x10000];
    image[0xFFF0] = 0xB8; // mov ax, 0xAA55
    image[0xFFF1] = 0x55;
    image[0xFFF2] = 0xAA;
    image[0xFFF3] = 0xF4; // hlt
    assert!(rom.fill(&image));

    let mut sys =
        System::new(CpuVariant::Intel8088, DEFAULT_FREQUENCY, vec![ram, Box::new(rom)]);
    sys.initialize().unwrap();
    sys.reset().unwrap();

    sys.bus().write_byte(0xFFFF0, 0x00);
    assert_eq!(sys.bus().read_byte(0xFFFF0), 0xB8);

    sys.step(1);
    assert_eq!(sys.registers().ax, 0xAA55);
}

#[test]
fn test_tracer_sees_opcode_stream() {
    let traced: Rc<RefCell<Vec<(u32, u8)>>> = Rc::new(RefCell::new(Vec::new()));
    let mut sys = machine();
    load(&mut sys, 0xFFFF0, &[0x90, 0xF4]); // nop; hlt

    let sink = traced.clone();
    sys.set_tracer(Box::new(move |addr, byte| {
        sink.borrow_mut().push((addr, byte));
    }));

    sys.step(1);
    assert_eq!(traced.borrow()[0], (0xFFFF0, 0x90));
}

#[derive(Default)]
struct CountingValidator {
    begins: Rc<RefCell<u32>>,
    ends: Rc<RefCell<u32>>,
    writes: Rc<RefCell<Vec<(u32, u8)>>>,
}

impl Validator for CountingValidator {
    fn begin(&mut self, _regs: &regs::Registers) {
        *self.begins.borrow_mut() += 1;
    }

    fn end(
        &mut self,
        _name: &str,
        _opcode: u8,
        _modregrm: bool,
        _cycles: u64,
        _regs: &regs::Registers,
    ) {
        *self.ends.borrow_mut() += 1;
    }

    fn read(&mut self, _addr: u32, _data: u8) {}

    fn write(&mut self, addr: u32, data: u8) {
        self.writes.borrow_mut().push((addr, data));
    }

    fn discard(&mut self) {}
}

#[test]
fn test_validator_frames_every_instruction() {
    let begins = Rc::new(RefCell::new(0));
    let ends = Rc::new(RefCell::new(0));
    let writes = Rc::new(RefCell::new(Vec::new()));

    let mut sys = machine();
    load(&mut sys, 0xFFFF0, &[0x50, 0xF4]); // push ax; hlt
    sys.registers().sp = 0x8000;
    sys.registers().ax = 0x1234;
    sys.set_validator(Box::new(CountingValidator {
        begins: begins.clone(),
        ends: ends.clone(),
        writes: writes.clone(),
    }));

    sys.step(20);
    assert_eq!(*begins.borrow(), *ends.borrow());
    assert!(*begins.borrow() >= 2);
    // The push write was mirrored.
    assert!(writes.borrow().contains(&(0x7FFE, 0x34)));
    assert!(writes.borrow().contains(&(0x7FFF, 0x12)));
}

/// RAM that counts writes per address, for watching descriptor
/// write-back.
struct CountingRam {
    data: Vec<u8>,
    counts: Rc<RefCell<std::collections::HashMap<u32, u32>>>,
}

impl Peripheral for CountingRam {
    fn install(&mut self, id: DeviceId, sys: &mut System) -> Result<(), Error> {
        sys.install_mem(id, 0, self.data.len() as u32 - 1);
        Ok(())
    }

    fn read(&mut self, addr: u32) -> u8 {
        self.data[addr as usize]
    }

    fn write(&mut self, addr: u32, data: u8) {
        *self.counts.borrow_mut().entry(addr).or_insert(0) += 1;
        self.data[addr as usize] = data;
    }
}

#[test]
fn test_protected_mode_sets_accessed_bit_once() {
    let counts = Rc::new(RefCell::new(std::collections::HashMap::new()));
    let ram = Box::new(CountingRam { data: vec![0; 0x100000], counts: counts.clone() });
    let mut sys = System::new(CpuVariant::Intel80286, DEFAULT_FREQUENCY, vec![ram]);
    sys.initialize().unwrap();
    sys.reset().unwrap();

    load(&mut sys, 0xFFFF0, &[0xEA, 0x00, 0x02, 0x00, 0x00]); // jmp 0000:0200
    load(&mut sys, 0x200, &[
        0x0F, 0x01, 0x16, 0x20, 0x03, // lgdt [0x320]
        0xB8, 0x01, 0x00,             // mov ax, 1
        0x0F, 0x01, 0xF0,             // lmsw ax
        0xBB, 0x08, 0x00,             // mov bx, 8
        0x8E, 0xDB,                   // mov ds, bx
        0x8E, 0xDB,                   // mov ds, bx (reload)
        0xF4,                         // hlt
    ]);
    // GDTR pseudo-descriptor: limit 0x17, base 0x000340.
    load(&mut sys, 0x320, &[0x17, 0x00, 0x40, 0x03, 0x00]);
    // GDT entry 1: base 0x010000, limit 0xFFFF, data segment, present,
    // not yet accessed.
    load(&mut sys, 0x348, &[0xFF, 0xFF, 0x00, 0x00, 0x01, 0x92, 0x00, 0x00]);
    counts.borrow_mut().clear(); // drop the setup writes

    let mut guard = 0;
    loop {
        let step = sys.step(100);
        guard += 1;
        if step.halted || guard > 100 {
            break;
        }
    }

    assert!(sys.cpu_protected());
    // The accessed bit was written back, and only for the first load.
    assert_eq!(sys.bus().read_byte(0x34D), 0x93);
    assert_eq!(counts.borrow().get(&0x34D), Some(&1));
}

#[test]
fn test_protected_mode_limit_violation_raises_gp() {
    let mut sys = {
        let ram = Box::new(Memory::new(0, 0x100000, false));
        let mut sys = System::new(CpuVariant::Intel80286, DEFAULT_FREQUENCY, vec![ram]);
        sys.initialize().unwrap();
        sys.reset().unwrap();
        sys
    };

    load(&mut sys, 0xFFFF0, &[0xEA, 0x00, 0x02, 0x00, 0x00]); // jmp 0000:0200
    load(&mut sys, 0x200, &[
        0x0F, 0x01, 0x16, 0x20, 0x03, // lgdt [0x320] (limit covers one entry)
        0x0F, 0x01, 0x1E, 0x28, 0x03, // lidt [0x328]
        0xB8, 0x01, 0x00,             // mov ax, 1
        0x0F, 0x01, 0xF0,             // lmsw ax
        0xBB, 0x40, 0x00,             // mov bx, 0x40 (index 8, past the GDT limit)
        0x8E, 0xDB,                   // mov ds, bx
    ]);
    // GDTR: limit 0x17, base 0x000340. IDTR: limit 0x6F, base 0x000400.
    load(&mut sys, 0x320, &[0x17, 0x00, 0x40, 0x03, 0x00]);
    load(&mut sys, 0x328, &[0x6F, 0x00, 0x00, 0x04, 0x00]);
    // GDT entry 1: flat code segment for the fault handler.
    load(&mut sys, 0x348, &[0xFF, 0xFF, 0x00, 0x00, 0x00, 0x9A, 0x00, 0x00]);
    // IDT entry 13: interrupt gate, selector 0x08, offset 0x2000.
    load(&mut sys, 0x468, &[0x00, 0x20, 0x08, 0x00, 0x00, 0x8C, 0x00, 0x00]);
    load(&mut sys, 0x2000, &[0xF4]); // #GP handler: hlt
    sys.registers().sp = 0x8000;

    let mut guard = 0;
    loop {
        let step = sys.step(100);
        guard += 1;
        if step.halted || guard > 100 {
            break;
        }
    }

    assert_eq!(sys.registers().ip, 0x2001); // parked in the #GP handler
    assert_eq!(sys.registers().cs, 0x0008);
    // The error code (selector with RPL stripped) was pushed last.
    let sp = sys.registers().sp;
    assert_eq!(sys.bus().read_word(sp as u32), 0x0040);
}

#[test]
fn test_a20_and_extended_memory_roundtrip() {
    let mut sys = machine();
    sys.bus().set_extended_memory(1);

    // With A20 off, the extended range wraps to low RAM.
    sys.bus().write_byte(0x00400, 0x11);
    assert_eq!(sys.bus().read_byte(0x100400), 0x11);

    sys.set_a20(true);
    sys.bus().write_byte(0x100400, 0x22);
    assert_eq!(sys.bus().read_byte(0x100400), 0x22);
    assert_eq!(sys.bus().read_byte(0x00400), 0x11);
}

#[test]
fn test_wait_stalls_the_cpu() {
    let mut sys = machine();
    load(&mut sys, 0xFFFF0, &[0x90, 0xF4]);

    sys.wait(500);
    let step = sys.step(1);
    assert!(step.cycles >= 500);
}
