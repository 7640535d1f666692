//! The contract every bus-attached device implements.
//!
//! Peripherals are trait objects owned by the bus and addressed by index.
//! All methods have defaults so a device only spells out the part of the
//! contract it supports; the bus never calls anything a device did not
//! opt into beyond the safe defaults below.

use crate::bus::Bus;
use crate::error::Error;
use crate::system::System;
use crate::timer::TimerId;

/// Index of a peripheral in the bus table. Index 0 is the dummy device.
pub type DeviceId = u8;

/// Role a peripheral plays on the bus. The CPU and other peripherals use
/// this to discover each other without hardcoding names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralClass {
    Generic,
    Debugger,
    Pic,
    Dma,
    Ppi,
    Pit,
    Uart,
    Video,
}

/// Interface for ISA bus devices.
pub trait Peripheral {
    /// Register into the I/O map, memory map, timers and monitors.
    /// Called once, during system initialize. `id` is the device's
    /// assigned index in the peripheral table.
    fn install(&mut self, id: DeviceId, sys: &mut System) -> Result<(), Error> {
        let _ = (id, sys);
        Ok(())
    }

    /// Receive one key/value from the front-end's configuration.
    /// Unrecognised keys are ignored.
    fn configure(&mut self, section: &str, key: &str, value: &str) -> Result<(), Error> {
        let _ = (section, key, value);
        Ok(())
    }

    /// Return to power-on state. Invoked on system reset, after install.
    fn reset(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Advance device-local time. Called by the timer wheel with the
    /// timer's id and the cycles consumed since the last firing.
    fn timer(&mut self, bus: &mut Bus, id: TimerId, cycles: u64) -> Result<(), Error> {
        let _ = (bus, id, cycles);
        Ok(())
    }

    /// Display name.
    fn name(&self) -> &'static str {
        "unknown device"
    }

    /// Class tag.
    fn class(&self) -> PeripheralClass {
        PeripheralClass::Generic
    }

    /// Port input. Only reached for ports the device installed.
    fn io_in(&mut self, port: u16) -> u8 {
        let _ = port;
        0xFF
    }

    /// Port output.
    fn io_out(&mut self, port: u16, data: u8) {
        let _ = (port, data);
    }

    /// Memory-mapped read. `addr` is the full 20-bit address.
    fn read(&mut self, addr: u32) -> u8 {
        let _ = addr;
        0xFF
    }

    /// Memory-mapped write.
    fn write(&mut self, addr: u32, data: u8) {
        let _ = (addr, data);
    }

    /// Raise an interrupt line. Only meaningful for class Pic.
    fn irq(&mut self, line: u8) {
        let _ = line;
    }

    /// Pop the next pending interrupt vector, if any. Only meaningful
    /// for class Pic.
    fn next(&mut self) -> Option<u8> {
        None
    }

    /// DMA channel read. Only meaningful for class Dma.
    fn dma_read(&mut self, channel: u8) -> u8 {
        let _ = channel;
        0xFF
    }

    /// DMA channel write.
    fn dma_write(&mut self, channel: u8, data: u8) {
        let _ = (channel, data);
    }

    /// Resolve a monitor registered by this device with the given tag.
    fn monitor_value(&self, tag: u32) -> u64 {
        let _ = tag;
        0
    }
}

/// The device behind every unmapped address and port. Constructed by the
/// core at index 0; reads return 0xFF, writes are dropped, both leave a
/// debug-level trace.
#[derive(Debug, Default)]
pub struct Dummy;

impl Peripheral for Dummy {
    fn name(&self) -> &'static str {
        "dummy device"
    }

    fn io_in(&mut self, port: u16) -> u8 {
        log::debug!("reading unmapped IO port: {:X}", port);
        0xFF
    }

    fn io_out(&mut self, port: u16, data: u8) {
        log::debug!("writing unmapped IO port: {:X} <- {:X}", port, data);
    }

    fn read(&mut self, addr: u32) -> u8 {
        log::debug!("reading unmapped memory: {:X}", addr);
        0xFF
    }

    fn write(&mut self, addr: u32, data: u8) {
        log::debug!("writing unmapped memory: {:X} <- {:X}", addr, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_bus_callbacks() {
        let mut dummy = Dummy;
        assert_eq!(dummy.io_in(0x3F8), 0xFF);
        assert_eq!(dummy.read(0xB8000), 0xFF);
        dummy.io_out(0x3F8, 0x42);
        dummy.write(0xB8000, 0x42);
        assert_eq!(dummy.class(), PeripheralClass::Generic);
    }

    #[test]
    fn test_default_pic_surface() {
        let mut dummy = Dummy;
        assert_eq!(dummy.next(), None);
        dummy.irq(0);
        assert_eq!(dummy.dma_read(1), 0xFF);
    }
}
