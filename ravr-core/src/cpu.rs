//! The fetch-decode-execute engine.

use log::{error, trace};

use crate::constants::REGISTER_COUNT;
use crate::decoder;
use crate::fault::CpuFault;
use crate::instructions::{Arithmetic, Bits, Branch, Logic, Shift};
use crate::instructions::{Instruction, Mnemonic, PcUpdate};
use crate::memory::Memory;

/// Engine state: the core loops through fetch/decode/execute while ready
/// and parks on the first fault.
#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Ready,
    Halted(CpuFault),
}

/// One simulated CPU instance.
///
/// All data flows through the owned [`Memory`]; instances share nothing and
/// may run on separate threads independently.
pub struct Cpu {
    pub(crate) mem: Memory,
    pub(crate) pc: u16,
    state: State,
}

impl Cpu {
    /// Creates a core with the given memory geometry. Fails when the status
    /// register address falls outside data memory or inside the register
    /// file.
    pub fn new(
        data_memory_size: usize,
        program_memory_size: usize,
        sreg_address: usize,
    ) -> Result<Cpu, CpuFault> {
        Ok(Cpu {
            mem: Memory::new(data_memory_size, program_memory_size, sreg_address)?,
            pc: 0,
            state: State::Ready,
        })
    }

    // Loader surface

    pub fn load_instruction_word(&mut self, index: usize, word: u16) -> Result<(), CpuFault> {
        self.mem.load_instruction_word(index, word)
    }

    pub fn load_program(&mut self, index: usize, words: &[u16]) -> Result<(), CpuFault> {
        self.mem.load_program(index, words)
    }

    // Debugger and test surface

    pub fn read_register(&self, index: usize) -> Result<u8, CpuFault> {
        if index >= REGISTER_COUNT {
            return Err(CpuFault::AddressOutOfRange(index));
        }
        self.mem.read(index)
    }

    pub fn write_register(&mut self, index: usize, value: u8) -> Result<(), CpuFault> {
        if index >= REGISTER_COUNT {
            return Err(CpuFault::AddressOutOfRange(index));
        }
        self.mem.write(index, value)
    }

    /// True when every flag in `mask` is set.
    pub fn read_flag(&self, mask: u8) -> bool {
        self.mem.read_flag(mask)
    }

    pub fn set_flag(&mut self, mask: u8, value: bool) {
        self.mem.set_flag(mask, value)
    }

    pub fn sreg(&self) -> u8 {
        self.mem.sreg()
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn is_halted(&self) -> bool {
        matches!(self.state, State::Halted(_))
    }

    /// Runs exactly one fetch-decode-execute cycle.
    ///
    /// A fault halts the engine and is surfaced to the caller; further
    /// calls replay the same fault without touching any state. A failed
    /// decode leaves the PC on the offending word.
    pub fn execute_one(&mut self) -> Result<(), CpuFault> {
        if let State::Halted(fault) = &self.state {
            return Err(fault.clone());
        }
        match self.step() {
            Ok(()) => Ok(()),
            Err(fault) => {
                error!("halting at pc 0x{:04x}: {}", self.pc, fault);
                self.state = State::Halted(fault.clone());
                Err(fault)
            }
        }
    }

    fn step(&mut self) -> Result<(), CpuFault> {
        let word = self.mem.program_word(self.pc as usize)?;
        let inst = decoder::decode(word)?;
        trace!("pc 0x{:04x}: {:?} (word 0x{:04x})", self.pc, inst.mnem, word);
        match self.execute(&inst)? {
            PcUpdate::Sequential => self.pc = self.pc.wrapping_add(1),
            PcUpdate::Handled => {}
        }
        Ok(())
    }

    /// Dispatches one decoded instruction to its handler and reports who
    /// updated the PC. Branch handlers perform their own update, taken or
    /// not; everything else leaves the increment to the engine.
    pub fn execute(&mut self, inst: &Instruction) -> Result<PcUpdate, CpuFault> {
        match inst.mnem {
            Mnemonic::ADD => self.add(inst),
            Mnemonic::ADC => self.adc(inst),
            Mnemonic::ADIW => self.adiw(inst),
            Mnemonic::SUB => self.sub(inst),
            Mnemonic::SUBI => self.subi(inst),
            Mnemonic::SBC => self.sbc(inst),
            Mnemonic::SBCI => self.sbci(inst),
            Mnemonic::CP => self.cp(inst),
            Mnemonic::CPC => self.cpc(inst),
            Mnemonic::CPI => self.cpi(inst),
            Mnemonic::AND => self.and(inst),
            Mnemonic::ANDI => self.andi(inst),
            Mnemonic::OR => self.or(inst),
            Mnemonic::ORI => self.ori(inst),
            Mnemonic::EOR => self.eor(inst),
            Mnemonic::ASR => self.asr(inst),
            Mnemonic::LSR => self.lsr(inst),
            Mnemonic::ROR => self.ror(inst),
            Mnemonic::BSET => self.bset(inst),
            Mnemonic::BCLR => self.bclr(inst),
            Mnemonic::BST => self.bst(inst),
            Mnemonic::BLD => self.bld(inst),
            Mnemonic::BRBS => self.brbs(inst),
            Mnemonic::BRBC => self.brbc(inst),
            Mnemonic::NOP => Ok(PcUpdate::Sequential),
        }
    }
}
