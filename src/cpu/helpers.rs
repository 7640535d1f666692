//! Register, ModR/M and stack plumbing shared by the executors.

use crate::bus::Bus;
use crate::regs::{self, Registers, Segment};

use super::{AddressMode, Cpu};

pub(crate) fn sign_extend16(v: u8) -> u16 {
    v as i8 as i16 as u16
}

/// Registers addressed by a 3-bit reg field, byte width:
/// AL CL DL BL AH CH DH BH.
pub(crate) fn reg_read8(r: &Registers, reg: u8) -> u8 {
    match reg & 7 {
        0 => r.al(),
        1 => r.cl(),
        2 => r.dl(),
        3 => r.bl(),
        4 => r.ah(),
        5 => r.ch(),
        6 => r.dh(),
        _ => r.bh(),
    }
}

pub(crate) fn reg_write8(r: &mut Registers, reg: u8, data: u8) {
    match reg & 7 {
        0 => r.set_al(data),
        1 => r.set_cl(data),
        2 => r.set_dl(data),
        3 => r.set_bl(data),
        4 => r.set_ah(data),
        5 => r.set_ch(data),
        6 => r.set_dh(data),
        _ => r.set_bh(data),
    }
}

/// Registers addressed by a 3-bit reg field, word width:
/// AX CX DX BX SP BP SI DI.
pub(crate) fn reg_read16(r: &Registers, reg: u8) -> u16 {
    match reg & 7 {
        0 => r.ax,
        1 => r.cx,
        2 => r.dx,
        3 => r.bx,
        4 => r.sp,
        5 => r.bp,
        6 => r.si,
        _ => r.di,
    }
}

pub(crate) fn reg_write16(r: &mut Registers, reg: u8, data: u16) {
    match reg & 7 {
        0 => r.ax = data,
        1 => r.cx = data,
        2 => r.dx = data,
        3 => r.bx = data,
        4 => r.sp = data,
        5 => r.bp = data,
        6 => r.si = data,
        _ => r.di = data,
    }
}

impl AddressMode {
    /// True when the rm field names a memory operand.
    pub(crate) fn is_memory(&self) -> bool {
        self.md < 3
    }
}

impl Cpu {
    // ========== Bus access with transfer accounting ==========

    /// Linear address of an offset within a segment, through the
    /// resolved descriptor base.
    pub(crate) fn linear(&self, seg: Segment, offset: u16) -> u32 {
        self.sregs[seg as usize].desc.base.wrapping_add(offset as u32)
    }

    pub(crate) fn read_byte(&mut self, bus: &mut Bus, addr: u32) -> u8 {
        let data = bus.read_byte(addr);
        self.bus_transfers += 1;
        if let Some(v) = self.validator.as_mut() {
            v.read(addr, data);
        }
        data
    }

    pub(crate) fn write_byte(&mut self, bus: &mut Bus, addr: u32, data: u8) {
        bus.write_byte(addr, data);
        self.bus_transfers += 1;
        if let Some(v) = self.validator.as_mut() {
            v.write(addr, data);
        }
    }

    pub(crate) fn segment_read_byte(&mut self, bus: &mut Bus, seg: Segment, offset: u16) -> u8 {
        let addr = self.linear(seg, offset);
        self.read_byte(bus, addr)
    }

    pub(crate) fn segment_read_word(&mut self, bus: &mut Bus, seg: Segment, offset: u16) -> u16 {
        let lo = self.segment_read_byte(bus, seg, offset) as u16;
        let hi = self.segment_read_byte(bus, seg, offset.wrapping_add(1)) as u16;
        lo | (hi << 8)
    }

    pub(crate) fn segment_write_byte(&mut self, bus: &mut Bus, seg: Segment, offset: u16, data: u8) {
        let addr = self.linear(seg, offset);
        self.write_byte(bus, addr, data);
    }

    pub(crate) fn segment_write_word(&mut self, bus: &mut Bus, seg: Segment, offset: u16, data: u16) {
        self.segment_write_byte(bus, seg, offset, data as u8);
        self.segment_write_byte(bus, seg, offset.wrapping_add(1), (data >> 8) as u8);
    }

    /// Port input, mirrored to the validator as an off-frame access.
    pub(crate) fn port_in(&mut self, bus: &mut Bus, port: u16) -> u8 {
        self.bus_transfers += 1;
        if let Some(v) = self.validator.as_mut() {
            v.discard();
        }
        bus.io_in(port)
    }

    pub(crate) fn port_out(&mut self, bus: &mut Bus, port: u16, data: u8) {
        self.bus_transfers += 1;
        if let Some(v) = self.validator.as_mut() {
            v.discard();
        }
        bus.io_out(port, data);
    }

    // ========== Opcode stream ==========

    /// Next byte of the instruction stream: from the prefetch queue when
    /// it holds anything, through the bus otherwise. IP always advances.
    pub(crate) fn read_opcode8(&mut self, bus: &mut Bus) -> u8 {
        let ip = self.regs.ip;
        let data;

        #[cfg(feature = "prefetch")]
        {
            if self.queue.count > 0 {
                data = self.queue.data[0];
                self.queue.count -= 1;
                self.queue.data.copy_within(1.., 0);

                #[cfg(debug_assertions)]
                {
                    let expect = self.linear(Segment::Cs, ip);
                    if self.queue.trace[0] != expect {
                        log::error!(
                            "broken prefetch queue: expected {:05X} but got {:05X}",
                            expect,
                            self.queue.trace[0]
                        );
                        self.regs.debug = true;
                    }
                    self.queue.trace.copy_within(1.., 0);
                }
            } else {
                data = self.segment_read_byte(bus, Segment::Cs, ip);
            }
        }
        #[cfg(not(feature = "prefetch"))]
        {
            data = self.segment_read_byte(bus, Segment::Cs, ip);
        }

        self.regs.ip = ip.wrapping_add(1);

        if let Some(tracer) = self.tracer.as_mut() {
            let addr = self.sregs[Segment::Cs as usize].desc.base.wrapping_add(ip as u32);
            tracer(addr, data);
        }
        data
    }

    pub(crate) fn read_opcode16(&mut self, bus: &mut Bus) -> u16 {
        let lo = self.read_opcode8(bus) as u16;
        let hi = self.read_opcode8(bus) as u16;
        lo | (hi << 8)
    }

    // ========== ModR/M ==========

    /// Effective-address offset for the current mode record.
    pub(crate) fn get_ea_offset(&self) -> u16 {
        let r = &self.regs;
        let m = &self.mode;

        let base = match m.rm {
            0 => r.bx.wrapping_add(r.si),
            1 => r.bx.wrapping_add(r.di),
            2 => r.bp.wrapping_add(r.si),
            3 => r.bp.wrapping_add(r.di),
            4 => r.si,
            5 => r.di,
            6 => {
                if m.md == 0 {
                    return m.disp;
                }
                r.bp
            }
            _ => r.bx,
        };

        match m.md {
            0 => base,
            _ => base.wrapping_add(m.disp),
        }
    }

    /// Effective-address cycle cost, by rm formula.
    fn ea_cycles(&self) -> u64 {
        let m = &self.mode;
        match (m.md, m.rm) {
            (0, 0) | (0, 3) => 7,
            (0, 1) | (0, 2) => 8,
            (0, 6) => 6,
            (0, _) => 5,
            (_, 0) | (_, 3) => 11,
            (_, 1) | (_, 2) => 12,
            (_, _) => 9,
        }
    }

    fn override_with_ss(&mut self, cond: bool) {
        if self.seg_override.is_none() && cond {
            self.seg = Segment::Ss;
        }
    }

    /// Decode the ModR/M byte and any displacement, applying the SS
    /// default for BP-based addressing.
    pub(crate) fn read_modregrm(&mut self, bus: &mut Bus) -> u8 {
        let modregrm = self.read_opcode8(bus);
        let mut mode = AddressMode {
            md: modregrm >> 6,
            reg: (modregrm >> 3) & 7,
            rm: modregrm & 7,
            disp: 0,
        };

        match mode.md {
            0 => {
                if mode.rm == 6 {
                    mode.disp = self.read_opcode16(bus);
                }
                self.override_with_ss(mode.rm == 2 || mode.rm == 3);
            }
            1 => {
                mode.disp = sign_extend16(self.read_opcode8(bus));
                self.override_with_ss(mode.rm == 2 || mode.rm == 3 || mode.rm == 6);
            }
            2 => {
                mode.disp = self.read_opcode16(bus);
                self.override_with_ss(mode.rm == 2 || mode.rm == 3 || mode.rm == 6);
            }
            _ => {}
        }

        self.mode = mode;
        if mode.is_memory() {
            self.cycles += self.ea_cycles();
        }
        modregrm
    }

    // ========== Register-or-memory operands ==========

    pub(crate) fn rm_read8(&mut self, bus: &mut Bus) -> u8 {
        if self.mode.is_memory() {
            let offset = self.get_ea_offset();
            self.segment_read_byte(bus, self.seg, offset)
        } else {
            reg_read8(&self.regs, self.mode.rm)
        }
    }

    pub(crate) fn rm_write8(&mut self, bus: &mut Bus, data: u8) {
        if self.mode.is_memory() {
            let offset = self.get_ea_offset();
            self.segment_write_byte(bus, self.seg, offset, data);
        } else {
            reg_write8(&mut self.regs, self.mode.rm, data);
        }
    }

    pub(crate) fn rm_read16(&mut self, bus: &mut Bus) -> u16 {
        if self.mode.is_memory() {
            let offset = self.get_ea_offset();
            self.segment_read_word(bus, self.seg, offset)
        } else {
            reg_read16(&self.regs, self.mode.rm)
        }
    }

    pub(crate) fn rm_write16(&mut self, bus: &mut Bus, data: u16) {
        if self.mode.is_memory() {
            let offset = self.get_ea_offset();
            self.segment_write_word(bus, self.seg, offset, data);
        } else {
            reg_write16(&mut self.regs, self.mode.rm, data);
        }
    }

    /// Segment register named by the mode's reg field.
    pub(crate) fn seg_read16(&self) -> u16 {
        self.sregs[Segment::from_reg(self.mode.reg) as usize].raw
    }

    pub(crate) fn seg_write16(&mut self, bus: &mut Bus, data: u16) -> bool {
        let seg = Segment::from_reg(self.mode.reg);
        let ok = self.load_segment_register(bus, seg, data);
        if seg == Segment::Cs {
            self.queue.dirty = true;
        }
        // Loading a segment register holds off interrupts for one
        // instruction.
        self.defer_int = true;
        ok
    }

    // ========== Stack ==========

    /// Not suitable for PUSH SP on the 8088, which stores the value
    /// after the decrement.
    pub(crate) fn push(&mut self, bus: &mut Bus, data: u16) {
        self.regs.sp = self.regs.sp.wrapping_sub(2);
        let sp = self.regs.sp;
        self.segment_write_word(bus, Segment::Ss, sp, data);
    }

    pub(crate) fn pop(&mut self, bus: &mut Bus) -> u16 {
        let sp = self.regs.sp;
        let data = self.segment_read_word(bus, Segment::Ss, sp);
        self.regs.sp = sp.wrapping_add(2);
        data
    }

    // ========== String index stepping ==========

    pub(crate) fn update_di(&mut self, n: u16) {
        self.regs.di = if self.regs.flag(regs::DIRECTION) {
            self.regs.di.wrapping_sub(n)
        } else {
            self.regs.di.wrapping_add(n)
        };
    }

    pub(crate) fn update_si(&mut self, n: u16) {
        self.regs.si = if self.regs.flag(regs::DIRECTION) {
            self.regs.si.wrapping_sub(n)
        } else {
            self.regs.si.wrapping_add(n)
        };
    }

    pub(crate) fn update_si_di(&mut self, n: u16) {
        self.update_si(n);
        self.update_di(n);
    }
}
