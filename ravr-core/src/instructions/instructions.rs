use log::error;

use super::{Instruction, PcUpdate};
use crate::constants::sreg::*;
use crate::constants::REGISTER_COUNT;
use crate::cpu::Cpu;
use crate::fault::CpuFault;
use crate::flags;
use crate::memory::Memory;

/// Arithmetic on bytes and on the upper register pairs
pub trait Arithmetic {
    fn add(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
    fn adc(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
    fn adiw(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
    fn sub(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
    fn subi(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
    fn sbc(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
    fn sbci(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
    fn cp(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
    fn cpc(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
    fn cpi(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
}

/// Bitwise logic; V is forced to zero, C and H stay untouched
pub trait Logic {
    fn and(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
    fn andi(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
    fn or(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
    fn ori(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
    fn eor(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
}

/// Single-place right shifts; C takes the bit shifted out
pub trait Shift {
    fn asr(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
    fn lsr(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
    fn ror(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
}

/// Direct status register bit access and T-flag transfers
pub trait Bits {
    fn bset(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
    fn bclr(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
    fn bst(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
    fn bld(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
}

/// Conditional relative branches; these own the PC update entirely
pub trait Branch {
    fn brbs(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
    fn brbc(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault>;
}

/// Fetches a general-purpose register, rejecting indices outside R0..R31.
/// Unreachable from a well-formed descriptor table.
fn reg(cpu: &Cpu, idx: u16) -> Result<u8, CpuFault> {
    if idx as usize >= REGISTER_COUNT {
        error!("register operand {} outside the register file", idx);
        return Err(CpuFault::InvalidOperand(format!(
            "register index {} out of range",
            idx
        )));
    }
    cpu.mem.read(idx as usize)
}

fn set_reg(cpu: &mut Cpu, idx: u16, value: u8) -> Result<(), CpuFault> {
    if idx as usize >= REGISTER_COUNT {
        error!("register operand {} outside the register file", idx);
        return Err(CpuFault::InvalidOperand(format!(
            "register index {} out of range",
            idx
        )));
    }
    cpu.mem.write(idx as usize, value)
}

// Flag columns per instruction family. Each helper writes exactly the
// flags the family defines and leaves the rest of SREG alone.

fn add_flags(mem: &mut Memory, rd: u8, rr: u8, wide: u16, r: u8) {
    let n = flags::negative(r);
    let v = flags::overflow_add(rd, rr, r);
    mem.set_flag(SREG_C, flags::carry_add(wide));
    mem.set_flag(SREG_Z, flags::zero(r));
    mem.set_flag(SREG_N, n);
    mem.set_flag(SREG_V, v);
    mem.set_flag(SREG_S, flags::sign(n, v));
    mem.set_flag(SREG_H, flags::half_carry_add(rd, rr, r));
}

/// Subtract family. With `chain_z` the zero flag is only ever cleared,
/// so multi-byte compare chains stay correct.
fn sub_flags(mem: &mut Memory, rd: u8, rr: u8, r: u8, chain_z: bool) {
    let n = flags::negative(r);
    let v = flags::overflow_sub(rd, rr, r);
    let z = if chain_z {
        flags::zero(r) && mem.read_flag(SREG_Z)
    } else {
        flags::zero(r)
    };
    mem.set_flag(SREG_C, flags::carry_sub(rd, rr, r));
    mem.set_flag(SREG_Z, z);
    mem.set_flag(SREG_N, n);
    mem.set_flag(SREG_V, v);
    mem.set_flag(SREG_S, flags::sign(n, v));
    mem.set_flag(SREG_H, flags::half_carry_sub(rd, rr, r));
}

fn logic_flags(mem: &mut Memory, r: u8) {
    let n = flags::negative(r);
    mem.set_flag(SREG_Z, flags::zero(r));
    mem.set_flag(SREG_N, n);
    mem.set_flag(SREG_V, false);
    mem.set_flag(SREG_S, flags::sign(n, false));
}

fn shift_flags(mem: &mut Memory, r: u8, carry: bool) {
    let n = flags::negative(r);
    let v = flags::overflow_shift(n, carry);
    mem.set_flag(SREG_C, carry);
    mem.set_flag(SREG_Z, flags::zero(r));
    mem.set_flag(SREG_N, n);
    mem.set_flag(SREG_V, v);
    mem.set_flag(SREG_S, flags::sign(n, v));
}

impl Arithmetic for Cpu {
    fn add(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        // Rd <- Rd + Rr
        let rd = reg(self, inst.rd())?;
        let rr = reg(self, inst.rr())?;
        let wide = rd as u16 + rr as u16;
        let r = wide as u8;
        set_reg(self, inst.rd(), r)?;
        add_flags(&mut self.mem, rd, rr, wide, r);
        Ok(PcUpdate::Sequential)
    }

    fn adc(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        // Rd <- Rd + Rr + C
        let rd = reg(self, inst.rd())?;
        let rr = reg(self, inst.rr())?;
        let carry = self.mem.read_flag(SREG_C) as u16;
        let wide = rd as u16 + rr as u16 + carry;
        let r = wide as u8;
        set_reg(self, inst.rd(), r)?;
        add_flags(&mut self.mem, rd, rr, wide, r);
        Ok(PcUpdate::Sequential)
    }

    fn adiw(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        // Rd+1:Rd <- Rd+1:Rd + K, on one of the pairs R25:24..R31:30
        let lo_idx = 24 + inst.rd() * 2;
        let lo = reg(self, lo_idx)?;
        let hi = reg(self, lo_idx + 1)?;
        let value = lo as u16 | (hi as u16) << 8;
        let result = value.wrapping_add(inst.imm());
        set_reg(self, lo_idx, result as u8)?;
        set_reg(self, lo_idx + 1, (result >> 8) as u8)?;

        // Word-width flag rules; H is not defined for this instruction
        let vh = (value >> 15) & 1 != 0;
        let r15 = (result >> 15) & 1 != 0;
        let n = r15;
        let v = !vh && r15;
        let c = !r15 && vh;
        self.mem.set_flag(SREG_C, c);
        self.mem.set_flag(SREG_Z, result == 0);
        self.mem.set_flag(SREG_N, n);
        self.mem.set_flag(SREG_V, v);
        self.mem.set_flag(SREG_S, flags::sign(n, v));
        Ok(PcUpdate::Sequential)
    }

    fn sub(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        // Rd <- Rd - Rr
        let rd = reg(self, inst.rd())?;
        let rr = reg(self, inst.rr())?;
        let r = rd.wrapping_sub(rr);
        set_reg(self, inst.rd(), r)?;
        sub_flags(&mut self.mem, rd, rr, r, false);
        Ok(PcUpdate::Sequential)
    }

    fn subi(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        // Rd <- Rd - K, upper half of the register file
        let d = 16 + inst.rd();
        let rd = reg(self, d)?;
        let k = inst.imm() as u8;
        let r = rd.wrapping_sub(k);
        set_reg(self, d, r)?;
        sub_flags(&mut self.mem, rd, k, r, false);
        Ok(PcUpdate::Sequential)
    }

    fn sbc(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        // Rd <- Rd - Rr - C; flag rules read the original Rr, the result
        // already carries the borrow
        let rd = reg(self, inst.rd())?;
        let rr = reg(self, inst.rr())?;
        let carry = self.mem.read_flag(SREG_C) as u8;
        let r = rd.wrapping_sub(rr).wrapping_sub(carry);
        set_reg(self, inst.rd(), r)?;
        sub_flags(&mut self.mem, rd, rr, r, true);
        Ok(PcUpdate::Sequential)
    }

    fn sbci(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        let d = 16 + inst.rd();
        let rd = reg(self, d)?;
        let k = inst.imm() as u8;
        let carry = self.mem.read_flag(SREG_C) as u8;
        let r = rd.wrapping_sub(k).wrapping_sub(carry);
        set_reg(self, d, r)?;
        sub_flags(&mut self.mem, rd, k, r, true);
        Ok(PcUpdate::Sequential)
    }

    fn cp(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        // Rd - Rr, result discarded
        let rd = reg(self, inst.rd())?;
        let rr = reg(self, inst.rr())?;
        sub_flags(&mut self.mem, rd, rr, rd.wrapping_sub(rr), false);
        Ok(PcUpdate::Sequential)
    }

    fn cpc(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        let rd = reg(self, inst.rd())?;
        let rr = reg(self, inst.rr())?;
        let carry = self.mem.read_flag(SREG_C) as u8;
        let r = rd.wrapping_sub(rr).wrapping_sub(carry);
        sub_flags(&mut self.mem, rd, rr, r, true);
        Ok(PcUpdate::Sequential)
    }

    fn cpi(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        let d = 16 + inst.rd();
        let rd = reg(self, d)?;
        let k = inst.imm() as u8;
        sub_flags(&mut self.mem, rd, k, rd.wrapping_sub(k), false);
        Ok(PcUpdate::Sequential)
    }
}

impl Logic for Cpu {
    fn and(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        let r = reg(self, inst.rd())? & reg(self, inst.rr())?;
        set_reg(self, inst.rd(), r)?;
        logic_flags(&mut self.mem, r);
        Ok(PcUpdate::Sequential)
    }

    fn andi(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        let d = 16 + inst.rd();
        let r = reg(self, d)? & inst.imm() as u8;
        set_reg(self, d, r)?;
        logic_flags(&mut self.mem, r);
        Ok(PcUpdate::Sequential)
    }

    fn or(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        let r = reg(self, inst.rd())? | reg(self, inst.rr())?;
        set_reg(self, inst.rd(), r)?;
        logic_flags(&mut self.mem, r);
        Ok(PcUpdate::Sequential)
    }

    fn ori(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        let d = 16 + inst.rd();
        let r = reg(self, d)? | inst.imm() as u8;
        set_reg(self, d, r)?;
        logic_flags(&mut self.mem, r);
        Ok(PcUpdate::Sequential)
    }

    fn eor(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        let r = reg(self, inst.rd())? ^ reg(self, inst.rr())?;
        set_reg(self, inst.rd(), r)?;
        logic_flags(&mut self.mem, r);
        Ok(PcUpdate::Sequential)
    }
}

impl Shift for Cpu {
    fn asr(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        // Bit 7 is preserved, bit 0 becomes the carry
        let rd = reg(self, inst.rd())?;
        let r = (rd >> 1) | (rd & 0x80);
        set_reg(self, inst.rd(), r)?;
        shift_flags(&mut self.mem, r, rd & 0x01 != 0);
        Ok(PcUpdate::Sequential)
    }

    fn lsr(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        let rd = reg(self, inst.rd())?;
        let r = rd >> 1;
        set_reg(self, inst.rd(), r)?;
        shift_flags(&mut self.mem, r, rd & 0x01 != 0);
        Ok(PcUpdate::Sequential)
    }

    fn ror(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        // Previous carry enters at bit 7
        let rd = reg(self, inst.rd())?;
        let carry_in = self.mem.read_flag(SREG_C) as u8;
        let r = (rd >> 1) | carry_in << 7;
        set_reg(self, inst.rd(), r)?;
        shift_flags(&mut self.mem, r, rd & 0x01 != 0);
        Ok(PcUpdate::Sequential)
    }
}

impl Bits for Cpu {
    fn bset(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        self.mem.set_flag(1 << inst.sreg_bit(), true);
        Ok(PcUpdate::Sequential)
    }

    fn bclr(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        self.mem.set_flag(1 << inst.sreg_bit(), false);
        Ok(PcUpdate::Sequential)
    }

    fn bst(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        // T <- Rd bit b
        let rd = reg(self, inst.rd())?;
        let bit = rd >> inst.reg_bit() & 1 != 0;
        self.mem.set_flag(SREG_T, bit);
        Ok(PcUpdate::Sequential)
    }

    fn bld(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        // Rd bit b <- T, no flag side effects
        let rd = reg(self, inst.rd())?;
        let mask = 1u8 << inst.reg_bit();
        let r = if self.mem.read_flag(SREG_T) {
            rd | mask
        } else {
            rd & !mask
        };
        set_reg(self, inst.rd(), r)?;
        Ok(PcUpdate::Sequential)
    }
}

impl Branch for Cpu {
    fn brbs(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        let taken = self.mem.read_flag(1 << inst.sreg_bit());
        self.pc = branch_target(self.pc, taken, inst.offset());
        Ok(PcUpdate::Handled)
    }

    fn brbc(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        let taken = !self.mem.read_flag(1 << inst.sreg_bit());
        self.pc = branch_target(self.pc, taken, inst.offset());
        Ok(PcUpdate::Handled)
    }
}

/// PC + k + 1 when the condition holds, PC + 1 otherwise. Targets wrap
/// modulo the 16-bit PC; a wrapped target outside program memory faults on
/// the next fetch.
fn branch_target(pc: u16, taken: bool, k: i16) -> u16 {
    if taken {
        (pc as i32 + k as i32 + 1) as u16
    } else {
        pc.wrapping_add(1)
    }
}
