//! The machine: CPU, bus and lifecycle.
//!
//! The front-end assembles peripherals, creates a [`System`], optionally
//! feeds configuration keys, initializes, resets and then drives the
//! machine with [`System::step`] using a cycle budget per call.
//! Wall-clock pacing is entirely the front-end's job.

use std::mem;

use crate::bus::Bus;
use crate::cpu::{Cpu, CpuVariant};
use crate::error::Error;
use crate::monitor::{
    Monitor, MonitorFlags, MonitorSource, MonitoredReg, MAX_MONITORS,
};
use crate::peripheral::{DeviceId, Peripheral, PeripheralClass};
use crate::regs::Registers;
use crate::timer::TimerId;
use crate::validator::{Tracer, Validator};

/// Default CPU frequency: 4.77 MHz, the PC/XT crystal.
pub const DEFAULT_FREQUENCY: u32 = 4_772_726;

/// Outcome of one step call, aggregated over all instructions executed
/// within it.
#[derive(Debug, Default)]
pub struct Step {
    /// Cycles spent during this call.
    pub cycles: u64,
    /// CPU is halted after the final instruction.
    pub halted: bool,
    /// Interrupt 0x28 was raised; the guest looks idle.
    pub int28: bool,
    /// At least one undefined opcode was hit.
    pub invalid: bool,
    /// First timer error, if any.
    pub err: Option<Error>,
}

/// A complete PC/XT-class machine.
pub struct System {
    cpu: Cpu,
    bus: Bus,
    monitors: Vec<Monitor>,
}

impl System {
    /// Assemble a machine. Peripherals get table indices in order,
    /// starting at 1; index 0 is the core's own dummy device.
    pub fn new(
        variant: CpuVariant,
        frequency: u32,
        devices: Vec<Box<dyn Peripheral>>,
    ) -> Self {
        let mut bus = Bus::new(frequency);
        for dev in devices {
            bus.attach(dev);
        }
        Self { cpu: Cpu::new(variant), bus, monitors: Vec::new() }
    }

    /// Forward one configuration triple to every peripheral.
    pub fn configure(&mut self, section: &str, key: &str, value: &str) -> Result<(), Error> {
        for i in 1..self.bus.device_count() {
            self.bus.peripheral_mut(i as DeviceId).configure(section, key, value)?;
        }
        Ok(())
    }

    /// Run every peripheral's install hook, pre-register the CPU
    /// monitors, resolve the interrupt and DMA controllers and hand the
    /// validator its initialize call.
    pub fn initialize(&mut self) -> Result<(), Error> {
        self.initialize_with_version(crate::VERSION_MAJOR, crate::VERSION_MINOR)
    }

    /// Like [`System::initialize`] but validating the front-end was
    /// built against a compatible core.
    pub fn initialize_with_version(&mut self, major: u32, minor: u32) -> Result<(), Error> {
        if major != crate::VERSION_MAJOR || minor != crate::VERSION_MINOR {
            return Err(Error::InvalidVersion);
        }
        if mem::size_of::<Registers>() != crate::REGISTERS_SIZE {
            return Err(Error::InvalidRegisterPacking);
        }

        for (label, reg) in [
            ("AX", MonitoredReg::Ax),
            ("BX", MonitoredReg::Bx),
            ("CX", MonitoredReg::Cx),
            ("DX", MonitoredReg::Dx),
            ("CS", MonitoredReg::Cs),
            ("SS", MonitoredReg::Ss),
            ("DS", MonitoredReg::Ds),
            ("ES", MonitoredReg::Es),
            ("SP", MonitoredReg::Sp),
            ("BP", MonitoredReg::Bp),
            ("SI", MonitoredReg::Si),
            ("DI", MonitoredReg::Di),
            ("IP", MonitoredReg::Ip),
        ] {
            self.install_monitor(None, label, MonitorSource::Register(reg),
                MonitorFlags::SIZE_WORD | MonitorFlags::FORMAT_HEX);
        }
        self.install_monitor(None, "Flags", MonitorSource::Register(MonitoredReg::Flags),
            MonitorFlags::SIZE_WORD | MonitorFlags::FORMAT_BINARY);

        for i in 1..self.bus.device_count() {
            let id = i as DeviceId;
            let mut dev = self.bus.take(id);
            let result = dev.install(id, self);
            self.bus.put(id, dev);
            result?;
        }

        self.bus.resolve_controllers();
        self.cpu.pic = self.bus.pic();

        if let Some(mut validator) = self.cpu.validator.take() {
            validator.initialize()?;
            self.cpu.validator = Some(validator);
        }
        Ok(())
    }

    /// Return the CPU and every peripheral to power-on state. Idempotent
    /// and callable before the first step.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.cpu.reset();
        for i in 1..self.bus.device_count() {
            self.bus.peripheral_mut(i as DeviceId).reset()?;
        }
        Ok(())
    }

    /// Execute instructions until at least `cycles` cycles have been
    /// spent (always at least one instruction), draining timers after
    /// each one. A timer error ends the call early.
    pub fn step(&mut self, cycles: u64) -> Step {
        let mut step = Step::default();
        let mut oldc = 0;
        self.cpu.reset_cycle_count();

        loop {
            let mut newc = self.cpu.step(&mut self.bus);
            let stall = self.bus.take_stall();
            if stall > 0 {
                self.cpu.cycles += stall;
                newc += stall;
            }
            let c = newc - oldc;
            oldc = newc;

            step.cycles += c;
            step.halted = self.cpu.halt;
            step.int28 = self.cpu.int28;
            step.invalid |= self.cpu.invalid;

            if let Err(err) = self.bus.update_timers(c) {
                step.err = Some(err);
                return step;
            }
            if self.bus.take_wake() {
                self.cpu.halt = false;
            }

            if newc >= cycles {
                return step;
            }
        }
    }

    /// Raise IRQ line `n` on the installed PIC, waking a halted CPU.
    pub fn interrupt(&mut self, n: u8) {
        self.cpu.halt = false;
        self.bus.interrupt(n);
        self.bus.take_wake();
    }

    /// Stall the CPU for `cycles` extra cycles.
    pub fn wait(&mut self, cycles: u64) {
        self.bus.wait(cycles);
    }

    // ========== Register and mode access ==========

    /// The live register file.
    pub fn registers(&mut self) -> &mut Registers {
        self.cpu.reflect_segment_registers();
        &mut self.cpu.regs
    }

    /// Re-resolve every segment register from the register file, after
    /// the front-end has written segment values directly.
    pub fn reload_segments(&mut self) {
        let (cs, ds, es, ss) =
            (self.cpu.regs.cs, self.cpu.regs.ds, self.cpu.regs.es, self.cpu.regs.ss);
        self.cpu.load_segment_register(&mut self.bus, crate::regs::Segment::Cs, cs);
        self.cpu.load_segment_register(&mut self.bus, crate::regs::Segment::Ds, ds);
        self.cpu.load_segment_register(&mut self.bus, crate::regs::Segment::Es, es);
        self.cpu.load_segment_register(&mut self.bus, crate::regs::Segment::Ss, ss);
    }

    /// True when the CPU runs with protected-mode segmentation.
    pub fn cpu_protected(&self) -> bool {
        self.cpu.is_protected()
    }

    /// Route every opcode byte to `tracer`.
    pub fn set_tracer(&mut self, tracer: Tracer) {
        self.cpu.tracer = Some(tracer);
    }

    /// Attach a lock-step validator.
    pub fn set_validator(&mut self, validator: Box<dyn Validator>) {
        self.cpu.validator = Some(validator);
    }

    // ========== Bus passthrough ==========

    /// The bus, for direct memory/port access and A20 or frequency
    /// control.
    pub fn bus(&mut self) -> &mut Bus {
        &mut self.bus
    }

    pub fn frequency(&self) -> u32 {
        self.bus.frequency()
    }

    pub fn set_frequency(&mut self, frequency: u32) {
        self.bus.set_frequency(frequency);
    }

    pub fn set_a20(&mut self, enable: bool) {
        self.bus.set_a20(enable);
    }

    /// Find a peripheral index by class tag.
    pub fn find_class(&self, class: PeripheralClass) -> Option<DeviceId> {
        self.bus.find_class(class)
    }

    // ========== Installation (called from install hooks) ==========

    pub fn install_io_at(&mut self, dev: DeviceId, port: u16) {
        self.bus.install_io_at(dev, port);
    }

    pub fn install_io(&mut self, dev: DeviceId, from: u16, to: u16) {
        self.bus.install_io(dev, from, to);
    }

    pub fn install_mem(&mut self, dev: DeviceId, from: u32, to: u32) {
        self.bus.install_mem(dev, from, to);
    }

    pub fn install_timer(&mut self, dev: DeviceId, interval_us: u32) -> TimerId {
        self.bus.install_timer(dev, interval_us)
    }

    pub fn set_timer_interval(&mut self, id: TimerId, interval_us: u32) -> bool {
        self.bus.set_timer_interval(id, interval_us)
    }

    /// Add a monitor record. The table is bounded; overflow is dropped
    /// with a log line rather than treated as fatal.
    pub fn install_monitor(
        &mut self,
        dev: Option<DeviceId>,
        label: &str,
        source: MonitorSource,
        flags: MonitorFlags,
    ) {
        if self.monitors.len() >= MAX_MONITORS {
            log::warn!("monitor table full, dropping {}", label);
            return;
        }
        self.monitors.push(Monitor { device: dev, label: label.to_owned(), source, flags });
    }

    /// Monitor record by index.
    pub fn monitor(&self, idx: usize) -> Option<&Monitor> {
        self.monitors.get(idx)
    }

    pub fn monitor_count(&self) -> usize {
        self.monitors.len()
    }

    /// Resolve a monitor's current value.
    pub fn monitor_value(&self, idx: usize) -> Option<u64> {
        let monitor = self.monitors.get(idx)?;
        let r = &self.cpu.regs;
        Some(match monitor.source {
            MonitorSource::Register(reg) => match reg {
                MonitoredReg::Ax => r.ax as u64,
                MonitoredReg::Bx => r.bx as u64,
                MonitoredReg::Cx => r.cx as u64,
                MonitoredReg::Dx => r.dx as u64,
                MonitoredReg::Cs => r.cs as u64,
                MonitoredReg::Ss => r.ss as u64,
                MonitoredReg::Ds => r.ds as u64,
                MonitoredReg::Es => r.es as u64,
                MonitoredReg::Sp => r.sp as u64,
                MonitoredReg::Bp => r.bp as u64,
                MonitoredReg::Si => r.si as u64,
                MonitoredReg::Di => r.di as u64,
                MonitoredReg::Ip => r.ip as u64,
                MonitoredReg::Flags => r.flags as u64,
            },
            MonitorSource::Device { id, tag } => self.bus.peripheral(id).monitor_value(tag),
        })
    }
}

impl Drop for System {
    fn drop(&mut self) {
        if let Some(mut validator) = self.cpu.validator.take() {
            let _ = validator.quit();
        }
        // Peripherals release their resources through Drop; the bus
        // drops them in reverse install order.
    }
}
