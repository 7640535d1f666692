//! Intel 8088 / NEC V20 CPU core.
//!
//! The CPU is advanced one instruction at a time by [`Cpu::step`], with
//! the bus passed in by the caller. Each step services any pending trap
//! or maskable interrupt at the instruction boundary, consumes prefix
//! bytes, dispatches through the 256-entry opcode table and settles the
//! cycle count.
//!
//! # Module Organization
//!
//! - `flags`: parity table and arithmetic flag computation
//! - `helpers`: register/ModR/M/stack access and the opcode stream
//! - `optab`: the instruction table
//! - `execute`: base 8086 instruction set
//! - `execute_ext`: 80186/V20 extensions and the 80286 escape group

use crate::bus::Bus;
use crate::desc::{vector, SegmentDescriptor, SegmentSelector, DESC_TYPE_INTR_GATE,
                  DESC_TYPE_TRAP_GATE, SELECTOR_RPL_MASK};
use crate::peripheral::DeviceId;
use crate::regs::{self, Registers, Segment};
use crate::validator::{Tracer, Validator};

mod execute;
mod execute_ext;
pub mod flags;
mod helpers;
mod optab;

#[cfg(test)]
mod tests;

pub use optab::Arch;

/// Machine-status-word bit: protected mode enable.
pub const MSW_PE: u16 = 0x1;
/// Machine-status-word bit: monitor processor extension.
pub const MSW_MP: u16 = 0x2;
/// Machine-status-word bit: emulate processor extension.
pub const MSW_EM: u16 = 0x4;
/// Machine-status-word bit: task switched.
pub const MSW_TS: u16 = 0x8;

/// Which chip the core models. Gates instruction tiers and the handful
/// of behaviours that differ between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuVariant {
    Intel8088,
    NecV20,
    Intel80286,
}

impl CpuVariant {
    pub(crate) fn supports(self, arch: Arch) -> bool {
        match arch {
            Arch::Invalid => false,
            Arch::Fpu | Arch::I8086 => true,
            Arch::I80186 => self != CpuVariant::Intel8088,
            Arch::I80286 => self == CpuVariant::Intel80286,
        }
    }
}

/// Active repeat prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Repeat {
    None,
    /// REP / REPE / REPZ (0xF3)
    Equal,
    /// REPNE / REPNZ (0xF2)
    NotEqual,
}

/// Decoded ModR/M state.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct AddressMode {
    pub md: u8,
    pub reg: u8,
    pub rm: u8,
    pub disp: u16,
}

/// A segment register with its resolved descriptor.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SegReg {
    pub raw: u16,
    pub sel: SegmentSelector,
    pub desc: SegmentDescriptor,
}

const QUEUE_SIZE: usize = 6;

/// The code prefetch queue. Invalidated, never drained, by control
/// transfers; the dirty flag is consumed at the end of the instruction.
#[derive(Debug, Default)]
pub(crate) struct PrefetchQueue {
    pub data: [u8; QUEUE_SIZE],
    pub count: usize,
    pub dirty: bool,
    /// Linear address each queued byte was fetched from; used to catch
    /// stale-queue bugs in debug builds.
    #[cfg(debug_assertions)]
    pub trace: [u32; QUEUE_SIZE],
}

/// CPU state bundle.
pub struct Cpu {
    pub regs: Registers,
    pub(crate) variant: CpuVariant,
    pub(crate) sregs: [SegReg; 8],
    pub(crate) msw: u16,

    pub(crate) trap: bool,
    pub(crate) halt: bool,
    pub(crate) int28: bool,
    pub(crate) invalid: bool,
    pub(crate) cycles: u64,
    /// IP at the start of the current instruction, prefixes included.
    pub(crate) inst_start: u16,

    pub(crate) opcode: u8,
    pub(crate) repeat: Repeat,
    pub(crate) mode: AddressMode,

    /// Effective segment for the current instruction's memory operand.
    pub(crate) seg: Segment,
    pub(crate) seg_override: Option<Segment>,

    pub(crate) bus_transfers: u32,
    /// Interrupt shadow: set by segment loads (and STI) to defer the
    /// PIC poll past the following instruction.
    pub(crate) defer_int: bool,

    pub(crate) queue: PrefetchQueue,

    pub(crate) tracer: Option<Tracer>,
    pub(crate) validator: Option<Box<dyn Validator>>,
    /// PIC peripheral index, cached at initialize.
    pub(crate) pic: Option<DeviceId>,
}

impl Cpu {
    pub(crate) fn new(variant: CpuVariant) -> Self {
        let mut cpu = Self {
            regs: Registers::default(),
            variant,
            sregs: Default::default(),
            msw: 0,
            trap: false,
            halt: false,
            int28: false,
            invalid: false,
            cycles: 0,
            inst_start: 0,
            opcode: 0,
            repeat: Repeat::None,
            mode: AddressMode::default(),
            seg: Segment::Ds,
            seg_override: None,
            bus_transfers: 0,
            defer_int: false,
            queue: PrefetchQueue::default(),
            tracer: None,
            validator: None,
            pic: None,
        };
        cpu.reset();
        cpu
    }

    /// Power-on state: flags cleared apart from the stuck bit, CS:IP at
    /// the reset vector 0xF000:0xFFF0 (physical 0xFFFF0).
    pub(crate) fn reset(&mut self) {
        self.trap = false;
        self.halt = false;
        self.defer_int = false;
        self.msw = 0;
        self.regs = Registers::default();
        self.regs.flags = 0x2;
        self.regs.cs = 0xF000;
        self.regs.ip = 0xFFF0;

        for seg in [Segment::Es, Segment::Cs, Segment::Ss, Segment::Ds] {
            let raw = match seg {
                Segment::Cs => 0xF000,
                _ => 0,
            };
            self.sregs[seg as usize] = SegReg {
                raw,
                sel: SegmentSelector::from_raw(raw),
                desc: SegmentDescriptor::real_mode(raw),
            };
        }
        self.sregs[Segment::Tr as usize] = SegReg::default();
        self.sregs[Segment::Idtr as usize] = SegReg::default();
        self.sregs[Segment::Ldtr as usize] = SegReg::default();
        self.sregs[Segment::Gdtr as usize] = SegReg::default();
        // Real-mode IVT: 256 vectors at physical zero.
        self.sregs[Segment::Idtr as usize].desc.limit = 0x3FF;
        self.sregs[Segment::Idtr as usize].desc.valid = true;

        self.queue = PrefetchQueue::default();
        self.reset_cycle_count();
    }

    pub(crate) fn reset_cycle_count(&mut self) {
        self.cycles = 0;
        self.int28 = false;
        self.invalid = false;
    }

    /// True when the machine status word has the PE bit set.
    pub(crate) fn is_protected(&self) -> bool {
        self.msw & MSW_PE != 0
    }

    /// Copy the cached selectors back into the register file so the
    /// front-end sees consistent segment values.
    pub(crate) fn reflect_segment_registers(&mut self) {
        self.regs.es = self.sregs[Segment::Es as usize].raw;
        self.regs.cs = self.sregs[Segment::Cs as usize].raw;
        self.regs.ss = self.sregs[Segment::Ss as usize].raw;
        self.regs.ds = self.sregs[Segment::Ds as usize].raw;
    }

    // ========== Segment loading ==========

    /// Load a segment register from a selector. In real mode this is the
    /// shift-by-four rule; in protected mode the descriptor is fetched
    /// from the GDT/LDT and the accessed bit written back. Returns false
    /// if a fault was raised instead.
    pub(crate) fn load_segment_register(&mut self, bus: &mut Bus, seg: Segment, v: u16) -> bool {
        if self.is_protected() && (seg as usize) < 4 {
            let sel = SegmentSelector::from_raw(v);
            let raw = match self.fetch_segment_descriptor(bus, sel, v, vector::GENERAL_PROTECTION)
            {
                Some(raw) => raw,
                None => return false,
            };
            self.sregs[seg as usize].sel = sel;
            self.sregs[seg as usize].desc = SegmentDescriptor::unpack(raw);
            self.sregs[seg as usize].raw = v;
            self.update_segment_descriptor(bus, seg);
        } else {
            self.sregs[seg as usize] = SegReg {
                raw: v,
                sel: SegmentSelector { rpl: 0, ti: false, index: v >> 3 },
                desc: SegmentDescriptor::real_mode(v),
            };
        }

        match seg {
            Segment::Es => self.regs.es = v,
            Segment::Cs => self.regs.cs = v,
            Segment::Ss => self.regs.ss = v,
            Segment::Ds => self.regs.ds = v,
            _ => {}
        }
        true
    }

    /// Read the eight descriptor bytes a selector points at, checking
    /// the table limit. `exvec` is the fault vector on violation.
    pub(crate) fn fetch_segment_descriptor(
        &mut self,
        bus: &mut Bus,
        sel: SegmentSelector,
        raw: u16,
        exvec: u8,
    ) -> Option<u64> {
        let table = if sel.ti {
            if !self.sregs[Segment::Ldtr as usize].desc.valid {
                self.throw_exception(bus, exvec, raw & SELECTOR_RPL_MASK);
                return None;
            }
            Segment::Ldtr
        } else {
            Segment::Gdtr
        };

        let offset = sel.index as u32 * 8;
        let tdesc = self.sregs[table as usize].desc;
        if offset + 7 > tdesc.limit as u32 {
            self.throw_exception(bus, exvec, raw & SELECTOR_RPL_MASK);
            return None;
        }

        let addr = tdesc.base + offset;
        let mut v = 0u64;
        for i in 0..8 {
            v |= (bus.read_byte(addr + i) as u64) << (i * 8);
        }
        Some(v)
    }

    /// Set the accessed bit in the source table on first use of a
    /// descriptor.
    fn update_segment_descriptor(&mut self, bus: &mut Bus, seg: Segment) {
        let sel = self.sregs[seg as usize].sel;
        if !self.sregs[seg as usize].desc.accessed {
            self.sregs[seg as usize].desc.accessed = true;
            let ar = self.sregs[seg as usize].desc.access_byte();
            let table = if sel.ti { Segment::Ldtr } else { Segment::Gdtr };
            let base = self.sregs[table as usize].desc.base;
            bus.write_byte(base + sel.index as u32 * 8 + 5, ar);
        }
    }

    /// Raise a fault with an error code: the instruction is re-pointed
    /// to, the interrupt frame pushed, and the error word last.
    pub(crate) fn throw_exception(&mut self, bus: &mut Bus, n: u8, error: u16) {
        self.regs.ip = self.inst_start;
        self.call_int(bus, n);
        self.push(bus, error);
    }

    // ========== Interrupt entry ==========

    /// Transfer control through vector `n`: push FLAGS/CS/IP, clear IF
    /// and TF, load the handler address from the IVT or the IDT gate.
    pub(crate) fn call_int(&mut self, bus: &mut Bus, n: u8) {
        if let Some(v) = self.validator.as_mut() {
            v.discard();
        }

        if self.is_protected() {
            self.call_int_gate(bus, n);
        } else {
            self.push(bus, self.regs.read_flags());
            self.push(bus, self.sregs[Segment::Cs as usize].raw);
            self.push(bus, self.regs.ip);

            self.regs.ip = bus.read_word(n as u32 * 4);
            let cs = bus.read_word(n as u32 * 4 + 2);
            self.load_segment_register(bus, Segment::Cs, cs);
            self.regs.flags &= !(regs::INTERRUPT | regs::TRAP);
        }

        self.queue.dirty = true;
        if n == 0x28 {
            self.int28 = true;
        }
    }

    fn call_int_gate(&mut self, bus: &mut Bus, n: u8) {
        let idtr = self.sregs[Segment::Idtr as usize].desc;
        let offset = n as u32 * 8;
        if offset + 7 > idtr.limit as u32 {
            if n == vector::DOUBLE_FAULT {
                // A fault inside the double-fault delivery has nowhere
                // to go; park the CPU instead of recursing.
                log::error!("interrupt table too small for double fault");
                self.halt = true;
                return;
            }
            self.call_int(bus, vector::DOUBLE_FAULT);
            return;
        }

        let mut raw = 0u64;
        for i in 0..8 {
            raw |= (bus.read_byte(idtr.base + offset + i) as u64) << (i * 8);
        }
        let gate = SegmentDescriptor::unpack(raw);

        if !gate.present
            || gate.segment
            || (gate.typ != DESC_TYPE_INTR_GATE && gate.typ != DESC_TYPE_TRAP_GATE)
        {
            // Escalate so a bad #GP gate cannot recurse forever.
            match n {
                vector::DOUBLE_FAULT => {
                    log::error!("unusable double-fault gate");
                    self.halt = true;
                }
                vector::GENERAL_PROTECTION => self.call_int(bus, vector::DOUBLE_FAULT),
                _ => self.throw_exception(bus, vector::GENERAL_PROTECTION, (n as u16) * 8 + 2),
            }
            return;
        }

        self.push(bus, self.regs.read_flags());
        self.push(bus, self.sregs[Segment::Cs as usize].raw);
        self.push(bus, self.regs.ip);

        if !self.load_segment_register(bus, Segment::Cs, gate.selector) {
            return;
        }
        self.regs.ip = gate.offset;

        self.regs.flags &= !regs::TRAP;
        if gate.typ == DESC_TYPE_INTR_GATE {
            self.regs.flags &= !regs::INTERRUPT;
        }
    }

    /// Divide faults restart the instruction: CS:IP is rewound to the
    /// first prefix before the frame is pushed.
    pub(crate) fn divide_error(&mut self, bus: &mut Bus) {
        self.regs.ip = self.inst_start;
        self.call_int(bus, vector::DIVIDE_ERROR);
    }

    // ========== Prefetch queue ==========

    #[cfg(feature = "prefetch")]
    fn prefetch(&mut self, bus: &mut Bus, num: u32) {
        for _ in 0..num {
            if self.queue.count >= QUEUE_SIZE {
                return;
            }
            let offset = self.regs.ip.wrapping_add(self.queue.count as u16);
            let addr = self.linear(Segment::Cs, offset);
            #[cfg(debug_assertions)]
            {
                self.queue.trace[self.queue.count] = addr;
            }
            self.queue.data[self.queue.count] = bus.read_byte(addr);
            self.queue.count += 1;
            self.bus_transfers += 1;
        }
    }

    // ========== Instruction stepping ==========

    fn prep_exec(&mut self, bus: &mut Bus) {
        self.queue.dirty = false;
        self.bus_transfers = 0;

        let trap = self.regs.flag(regs::TRAP);
        let interrupt = self.regs.flag(regs::INTERRUPT);

        if trap && !self.trap {
            self.trap = interrupt;
            self.call_int(bus, vector::DEBUG);
        } else if interrupt {
            if self.defer_int {
                // A segment load (or STI) shadows exactly one boundary.
                self.defer_int = false;
            } else if self.pic.is_some() {
                if let Some(n) = bus.pic_next() {
                    self.halt = false;
                    self.trap = false;
                    self.call_int(bus, n);
                }
            }
        }

        // Direct reset in case an interrupt was dispatched above.
        if self.queue.dirty {
            self.queue.count = 0;
            self.queue.dirty = false;
        }

        self.seg = Segment::Ds;
        self.seg_override = None;
        self.repeat = Repeat::None;
        self.inst_start = self.regs.ip;
    }

    /// Consume prefix bytes until a real opcode is reached.
    fn read_opcode(&mut self, bus: &mut Bus) {
        loop {
            self.opcode = self.read_opcode8(bus);
            match self.opcode {
                0x26 => {
                    self.seg = Segment::Es;
                    self.seg_override = Some(Segment::Es);
                    self.cycles += 2;
                }
                0x2E => {
                    self.seg = Segment::Cs;
                    self.seg_override = Some(Segment::Cs);
                    self.cycles += 2;
                }
                0x36 => {
                    self.seg = Segment::Ss;
                    self.seg_override = Some(Segment::Ss);
                    self.cycles += 2;
                }
                0x3E => {
                    self.seg = Segment::Ds;
                    self.seg_override = Some(Segment::Ds);
                    self.cycles += 2;
                }
                0xF2 => {
                    self.repeat = Repeat::NotEqual;
                    self.cycles += 2;
                }
                0xF3 => {
                    self.repeat = Repeat::Equal;
                    self.cycles += 2;
                }
                _ => {
                    if self.repeat != Repeat::None && !valid_repeat(self.opcode) {
                        self.repeat = Repeat::None;
                    }
                    return;
                }
            }
        }
    }

    fn do_exec(&mut self, bus: &mut Bus) {
        let cycles_before = self.cycles;
        let inst = &optab::OPCODE_TABLE[self.opcode as usize];
        debug_assert_eq!(inst.opcode, self.opcode);

        self.invalid = !self.variant.supports(inst.arch);
        if self.invalid {
            self.call_int(bus, vector::UNDEFINED_OPCODE);
        } else {
            if inst.modregrm {
                self.read_modregrm(bus);
            }
            (inst.exec)(self, bus);
            if self.invalid {
                self.call_int(bus, vector::UNDEFINED_OPCODE);
            }
        }

        self.cycles += inst.cycles as u64;

        if self.queue.dirty {
            self.queue.count = 0;
        } else {
            #[cfg(feature = "prefetch")]
            {
                let spent = (self.cycles - cycles_before) as u32;
                self.prefetch(bus, (spent / 2).saturating_sub(self.bus_transfers));
            }
            #[cfg(not(feature = "prefetch"))]
            let _ = cycles_before;
        }
    }

    /// Execute one instruction (or park for one cycle when halted) and
    /// return the cumulative cycle count for the current step call.
    pub(crate) fn step(&mut self, bus: &mut Bus) -> u64 {
        if let Some(v) = self.validator.as_mut() {
            v.begin(&self.regs);
        }

        self.prep_exec(bus);
        if !self.halt {
            self.read_opcode(bus);
            self.do_exec(bus);
        } else {
            self.cycles += 1;
        }

        if let Some(v) = self.validator.as_mut() {
            let inst = &optab::OPCODE_TABLE[self.opcode as usize];
            v.end(inst.name, self.opcode, inst.modregrm, self.cycles, &self.regs);
        }

        debug_assert!(self.cycles > 0);
        self.cycles
    }
}

/// REP applies to the string family only; MOVS/CMPS/STOS/LODS/SCAS plus
/// the 80186 INS/OUTS block.
fn valid_repeat(opcode: u8) -> bool {
    matches!(opcode, 0xA4..=0xA7 | 0xAA..=0xAF | 0x6C..=0x6F)
}
