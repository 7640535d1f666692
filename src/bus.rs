//! System bus for the PC/XT machine.
//!
//! The bus routes 20-bit memory addresses and 16-bit port numbers to
//! peripherals and owns the peripheral table itself.
//!
//! Address pipeline:
//! ```text
//! A20 off   : bit 20 masked to zero
//! >= 1 MiB  : extended memory buffer (0xFF / dropped when out of range)
//! <  1 MiB  : paragraph map (64K entries of 16 bytes) -> peripheral
//! ```
//!
//! Port pipeline: the 16-bit port indexes the I/O map directly. Unmapped
//! paragraphs and ports resolve to the dummy device at index 0.

use std::mem;

use crate::error::Error;
use crate::peripheral::{DeviceId, Dummy, Peripheral, PeripheralClass};
use crate::timer::{TimerId, TimerWheel};

/// Number of I/O map entries.
pub const IO_MAP_SIZE: usize = 0x10000;
/// Number of memory map paragraphs.
pub const MEM_MAP_SIZE: usize = 0x10000;
/// Upper bound on attached peripherals, dummy excluded.
pub const MAX_PERIPHERALS: usize = 0xFF;
/// Upper bound on extended memory, in bytes.
pub const MAX_EXT_MEMORY: usize = 16 << 20;

/// The system bus and peripheral table.
pub struct Bus {
    io_map: Box<[DeviceId]>,
    mem_map: Box<[DeviceId]>,
    devices: Vec<Box<dyn Peripheral>>,

    timers: TimerWheel,
    frequency: u32,

    ext_mem: Vec<u8>,
    a20: bool,

    pic: Option<DeviceId>,
    dma: Option<DeviceId>,
    /// Set when a peripheral raises an IRQ; the stepper consumes it to
    /// wake a halted CPU.
    irq_wake: bool,
    /// Extra wait-state cycles requested by peripherals, drained by the
    /// stepper after the current instruction.
    stall: u64,
}

impl Bus {
    pub(crate) fn new(frequency: u32) -> Self {
        Self {
            io_map: vec![0; IO_MAP_SIZE].into_boxed_slice(),
            mem_map: vec![0; MEM_MAP_SIZE].into_boxed_slice(),
            devices: vec![Box::new(Dummy)],
            timers: TimerWheel::new(),
            frequency,
            ext_mem: Vec::new(),
            a20: false,
            pic: None,
            dma: None,
            irq_wake: false,
            stall: 0,
        }
    }

    /// Add a peripheral to the table and return its index. Overflowing
    /// the table is a programming error.
    pub(crate) fn attach(&mut self, dev: Box<dyn Peripheral>) -> DeviceId {
        assert!(self.devices.len() <= MAX_PERIPHERALS, "peripheral table overflow");
        self.devices.push(dev);
        (self.devices.len() - 1) as DeviceId
    }

    /// Number of table entries, dummy included.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn peripheral(&self, id: DeviceId) -> &dyn Peripheral {
        &*self.devices[id as usize]
    }

    pub fn peripheral_mut(&mut self, id: DeviceId) -> &mut dyn Peripheral {
        &mut *self.devices[id as usize]
    }

    /// First peripheral of the given class, if any is attached.
    pub fn find_class(&self, class: PeripheralClass) -> Option<DeviceId> {
        (1..self.devices.len()).find(|&i| self.devices[i].class() == class).map(|i| i as DeviceId)
    }

    /// Swap a peripheral out of the table for the duration of a callback
    /// that also needs the bus. The slot answers as the dummy meanwhile.
    pub(crate) fn take(&mut self, id: DeviceId) -> Box<dyn Peripheral> {
        mem::replace(&mut self.devices[id as usize], Box::new(Dummy))
    }

    pub(crate) fn put(&mut self, id: DeviceId, dev: Box<dyn Peripheral>) {
        self.devices[id as usize] = dev;
    }

    pub(crate) fn resolve_controllers(&mut self) {
        self.pic = self.find_class(PeripheralClass::Pic);
        self.dma = self.find_class(PeripheralClass::Dma);
    }

    pub(crate) fn pic(&self) -> Option<DeviceId> {
        self.pic
    }

    // ========== Memory and port access ==========

    fn physical(&self, addr: u32) -> u32 {
        if self.a20 {
            addr
        } else {
            addr & 0xEFFFFF
        }
    }

    /// Read a byte from the bus.
    pub fn read_byte(&mut self, addr: u32) -> u8 {
        let addr = self.physical(addr);

        if addr >= 0x100000 {
            let offset = (addr - 0x100000) as usize;
            return self.ext_mem.get(offset).copied().unwrap_or(0xFF);
        }

        let dev = self.mem_map[(addr >> 4) as usize];
        self.devices[dev as usize].read(addr)
    }

    /// Write a byte to the bus.
    pub fn write_byte(&mut self, addr: u32, data: u8) {
        let addr = self.physical(addr);

        if addr >= 0x100000 {
            let offset = (addr - 0x100000) as usize;
            if let Some(cell) = self.ext_mem.get_mut(offset) {
                *cell = data;
            }
            return;
        }

        let dev = self.mem_map[(addr >> 4) as usize];
        self.devices[dev as usize].write(addr, data);
    }

    /// Read a 16-bit word, low byte first.
    pub fn read_word(&mut self, addr: u32) -> u16 {
        let lo = self.read_byte(addr) as u16;
        let hi = self.read_byte(addr.wrapping_add(1)) as u16;
        lo | (hi << 8)
    }

    /// Write a 16-bit word, low byte first.
    pub fn write_word(&mut self, addr: u32, data: u16) {
        self.write_byte(addr, data as u8);
        self.write_byte(addr.wrapping_add(1), (data >> 8) as u8);
    }

    /// Port input.
    pub fn io_in(&mut self, port: u16) -> u8 {
        let dev = self.io_map[port as usize];
        self.devices[dev as usize].io_in(port)
    }

    /// Port output.
    pub fn io_out(&mut self, port: u16, data: u8) {
        let dev = self.io_map[port as usize];
        self.devices[dev as usize].io_out(port, data);
    }

    // ========== Installation ==========

    /// Claim a single I/O port. The last installer wins.
    pub fn install_io_at(&mut self, dev: DeviceId, port: u16) {
        self.io_map[port as usize] = dev;
    }

    /// Claim a contiguous I/O range, both ends inclusive.
    pub fn install_io(&mut self, dev: DeviceId, from: u16, to: u16) {
        for port in from..=to {
            self.io_map[port as usize] = dev;
        }
    }

    /// Claim a contiguous memory range, both ends inclusive. The range
    /// must cover whole paragraphs; misalignment is a programming error.
    pub fn install_mem(&mut self, dev: DeviceId, from: u32, to: u32) {
        assert!(
            (from | to.wrapping_add(1)) & 0xF == 0,
            "unaligned memory install: {:05X}-{:05X}",
            from,
            to
        );
        let from = (from >> 4) & 0xFFFF;
        let to = (to >> 4) & 0xFFFF;
        for paragraph in from..=to {
            self.mem_map[paragraph as usize] = dev;
        }
    }

    /// The raw port map, one peripheral index per port.
    pub fn io_map(&self) -> &[DeviceId] {
        &self.io_map
    }

    /// The raw paragraph map, one peripheral index per 16 bytes.
    pub fn mem_map(&self) -> &[DeviceId] {
        &self.mem_map
    }

    // ========== Timers ==========

    /// Register a periodic callback for `dev`.
    pub fn install_timer(&mut self, dev: DeviceId, interval_us: u32) -> TimerId {
        self.timers.install(dev, interval_us)
    }

    /// Change a timer's interval and restart its accumulator.
    pub fn set_timer_interval(&mut self, id: TimerId, interval_us: u32) -> bool {
        self.timers.set_interval(id, interval_us)
    }

    /// Feed executed cycles to every timer and fire the expired ones in
    /// installation order. The first callback error aborts the batch.
    pub(crate) fn update_timers(&mut self, ticks: u64) -> Result<(), Error> {
        for i in 0..self.timers.len() {
            self.timers.accumulate(i, ticks);
            if self.timers.expired(i, self.frequency) {
                let owner = self.timers.device(i);
                let consumed = self.timers.ticks(i);

                let mut dev = self.take(owner);
                let result = dev.timer(self, i, consumed);
                self.put(owner, dev);

                result?;
                self.timers.rearm(i);
            }
        }
        Ok(())
    }

    // ========== Interrupt plumbing ==========

    /// Raise IRQ line `n` on the installed PIC and wake a halted CPU.
    pub fn interrupt(&mut self, n: u8) {
        self.irq_wake = true;
        if let Some(pic) = self.pic {
            self.devices[pic as usize].irq(n);
        }
    }

    /// Ask the PIC for the next pending vector.
    pub(crate) fn pic_next(&mut self) -> Option<u8> {
        let pic = self.pic?;
        self.devices[pic as usize].next()
    }

    pub(crate) fn take_wake(&mut self) -> bool {
        mem::take(&mut self.irq_wake)
    }

    /// Stall the CPU for `cycles` extra cycles, e.g. to model a slow
    /// device holding the bus.
    pub fn wait(&mut self, cycles: u64) {
        self.stall += cycles;
    }

    pub(crate) fn take_stall(&mut self) -> u64 {
        mem::take(&mut self.stall)
    }

    /// Read from a DMA controller channel.
    pub fn dma_read(&mut self, channel: u8) -> u8 {
        match self.dma {
            Some(dma) => self.devices[dma as usize].dma_read(channel),
            None => 0xFF,
        }
    }

    /// Write to a DMA controller channel.
    pub fn dma_write(&mut self, channel: u8, data: u8) {
        if let Some(dma) = self.dma {
            self.devices[dma as usize].dma_write(channel, data);
        }
    }

    // ========== Extended memory and A20 ==========

    /// Size the extended-memory buffer in whole MiB, up to 16.
    pub fn set_extended_memory(&mut self, mib: usize) {
        assert!(mib <= 16, "invalid extended memory size");
        self.ext_mem = vec![0; mib << 20];
    }

    pub fn set_a20(&mut self, enable: bool) {
        self.a20 = enable;
    }

    pub fn a20(&self) -> bool {
        self.a20
    }

    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    pub fn set_frequency(&mut self, frequency: u32) {
        self.frequency = frequency;
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        // Tear peripherals down in reverse install order.
        while self.devices.pop().is_some() {}
    }
}
