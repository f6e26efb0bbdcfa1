pub mod instructions;

// Capability traits implemented on Cpu, one per instruction category
pub use instructions::Arithmetic;
pub use instructions::Bits;
pub use instructions::Branch;
pub use instructions::Logic;
pub use instructions::Shift;

use crate::constants::sreg::*;

/// Mnemonics of the implemented subset.
///
/// Condition branches and status-bit set/clear exist only in their generic
/// form here; flag-pinned spellings live in [`BranchAlias`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mnemonic {
    ADD,  // Add without carry
    ADC,  // Add with carry
    ADIW, // Add immediate to word (register pair)
    SUB,  // Subtract without carry
    SUBI, // Subtract immediate
    SBC,  // Subtract with carry
    SBCI, // Subtract immediate with carry
    CP,   // Compare
    CPC,  // Compare with carry
    CPI,  // Compare with immediate
    AND,  // Logical AND
    ANDI, // Logical AND with immediate
    OR,   // Logical OR
    ORI,  // Logical OR with immediate
    EOR,  // Exclusive OR
    ASR,  // Arithmetic shift right
    LSR,  // Logical shift right
    ROR,  // Rotate right through carry
    BSET, // Set status register bit
    BCLR, // Clear status register bit
    BST,  // Store register bit to T
    BLD,  // Load register bit from T
    BRBS, // Branch if status bit set
    BRBC, // Branch if status bit cleared
    NOP,  // No operation
}

// Operand-field letters a descriptor pattern may use, in slot order:
// d - destination register, r - source register, K - immediate,
// k - relative branch offset, s - status register bit, b - register bit
const FIELD_LETTERS: [u8; 6] = [b'd', b'r', b'K', b'k', b's', b'b'];

/// Operand fields extracted from one instruction word.
///
/// Each field is gathered most-significant occurrence first into an
/// unsigned value; the bit count is kept so signed fields can be extended
/// at their real width.
#[derive(Debug, Clone, Copy, Default)]
pub struct Operands {
    values: [u16; FIELD_LETTERS.len()],
    widths: [u8; FIELD_LETTERS.len()],
}

impl Operands {
    fn slot(letter: u8) -> Option<usize> {
        FIELD_LETTERS.iter().position(|&l| l == letter)
    }

    /// Appends one bit to a field. False for a letter outside the known
    /// alphabet, which marks the descriptor itself as unmatchable.
    pub(crate) fn push_bit(&mut self, letter: u8, bit: u16) -> bool {
        match Self::slot(letter) {
            Some(i) => {
                self.values[i] = self.values[i] << 1 | bit;
                self.widths[i] += 1;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, letter: u8) -> u16 {
        Self::slot(letter).map_or(0, |i| self.values[i])
    }

    pub fn width(&self, letter: u8) -> u8 {
        Self::slot(letter).map_or(0, |i| self.widths[i])
    }

    /// Field value sign-extended from its own width.
    pub fn signed(&self, letter: u8) -> i16 {
        let slot = match Self::slot(letter) {
            Some(i) => i,
            None => return 0,
        };
        let value = self.values[slot];
        let width = self.widths[slot];
        if width == 0 || width >= 16 {
            return value as i16;
        }
        if value & (1 << (width - 1)) != 0 {
            (value as i32 - (1i32 << width)) as i16
        } else {
            value as i16
        }
    }
}

/// One decoded instruction: identifier, raw word, and extracted fields.
#[derive(Debug, Clone, Copy)]
pub struct Instruction {
    pub mnem: Mnemonic,
    pub word: u16,
    pub operands: Operands,
}

impl Instruction {
    /// Destination register field, as encoded (callers apply any register
    /// offset the instruction's encoding implies, e.g. +16 for immediates).
    pub fn rd(&self) -> u16 {
        self.operands.get(b'd')
    }

    /// Source register field.
    pub fn rr(&self) -> u16 {
        self.operands.get(b'r')
    }

    /// Immediate constant.
    pub fn imm(&self) -> u16 {
        self.operands.get(b'K')
    }

    /// Relative branch offset, sign-extended from its field width.
    pub fn offset(&self) -> i16 {
        self.operands.signed(b'k')
    }

    /// Status register bit index.
    pub fn sreg_bit(&self) -> u8 {
        self.operands.get(b's') as u8
    }

    /// Register bit index.
    pub fn reg_bit(&self) -> u8 {
        self.operands.get(b'b') as u8
    }
}

/// Who performs the program-counter update for an executed instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcUpdate {
    /// The engine advances PC by one word.
    Sequential,
    /// The handler wrote PC itself (branches, taken or not).
    Handled,
}

/// Flag-pinned spellings of the generic condition branches.
///
/// Each alias resolves to BRBS or BRBC plus a fixed status bit index; the
/// decoder never sees these, so no two descriptor entries can claim the
/// same word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchAlias {
    BRCS, // carry set
    BRCC, // carry cleared
    BRLO, // lower (unsigned), same encoding as BRCS
    BRSH, // same or higher (unsigned), same encoding as BRCC
    BREQ, // equal
    BRNE, // not equal
    BRMI, // minus
    BRPL, // plus
    BRVS, // overflow set
    BRVC, // overflow cleared
    BRLT, // less than (signed)
    BRGE, // greater or equal (signed)
    BRHS, // half carry set
    BRHC, // half carry cleared
    BRTS, // T set
    BRTC, // T cleared
    BRIE, // interrupts enabled
    BRID, // interrupts disabled
}

impl BranchAlias {
    /// The generic mnemonic and the status bit this alias pins.
    pub fn generic(self) -> (Mnemonic, u8) {
        match self {
            BranchAlias::BRCS | BranchAlias::BRLO => (Mnemonic::BRBS, BIT_C),
            BranchAlias::BRCC | BranchAlias::BRSH => (Mnemonic::BRBC, BIT_C),
            BranchAlias::BREQ => (Mnemonic::BRBS, BIT_Z),
            BranchAlias::BRNE => (Mnemonic::BRBC, BIT_Z),
            BranchAlias::BRMI => (Mnemonic::BRBS, BIT_N),
            BranchAlias::BRPL => (Mnemonic::BRBC, BIT_N),
            BranchAlias::BRVS => (Mnemonic::BRBS, BIT_V),
            BranchAlias::BRVC => (Mnemonic::BRBC, BIT_V),
            BranchAlias::BRLT => (Mnemonic::BRBS, BIT_S),
            BranchAlias::BRGE => (Mnemonic::BRBC, BIT_S),
            BranchAlias::BRHS => (Mnemonic::BRBS, BIT_H),
            BranchAlias::BRHC => (Mnemonic::BRBC, BIT_H),
            BranchAlias::BRTS => (Mnemonic::BRBS, BIT_T),
            BranchAlias::BRTC => (Mnemonic::BRBC, BIT_T),
            BranchAlias::BRIE => (Mnemonic::BRBS, BIT_I),
            BranchAlias::BRID => (Mnemonic::BRBC, BIT_I),
        }
    }

    /// Encodes the alias as an instruction word with offset `k`
    /// (-64..=63 instruction words; out-of-range offsets are truncated to
    /// the 7-bit field).
    pub fn encode(self, k: i8) -> u16 {
        let (mnem, bit) = self.generic();
        let base: u16 = match mnem {
            Mnemonic::BRBS => 0xF000,
            _ => 0xF400,
        };
        base | ((k as u8 as u16) & 0x7F) << 3 | bit as u16
    }
}

#[cfg(test)]
mod alias_tests {
    use super::*;
    use crate::decoder;

    #[test]
    fn aliases_resolve_through_the_generic_decoder_entry() {
        let word = BranchAlias::BRCS.encode(5);
        let inst = decoder::decode(word).unwrap();
        assert_eq!(inst.mnem, Mnemonic::BRBS);
        assert_eq!(inst.sreg_bit(), BIT_C);
        assert_eq!(inst.offset(), 5);

        let word = BranchAlias::BRNE.encode(-3);
        let inst = decoder::decode(word).unwrap();
        assert_eq!(inst.mnem, Mnemonic::BRBC);
        assert_eq!(inst.sreg_bit(), BIT_Z);
        assert_eq!(inst.offset(), -3);
    }

    #[test]
    fn unsigned_spellings_share_the_carry_encoding() {
        assert_eq!(BranchAlias::BRLO.encode(9), BranchAlias::BRCS.encode(9));
        assert_eq!(BranchAlias::BRSH.encode(-9), BranchAlias::BRCC.encode(-9));
    }

    #[test]
    fn signed_offsets_round_trip_the_field_width() {
        for k in -64..=63i16 {
            let word = BranchAlias::BREQ.encode(k as i8);
            let inst = decoder::decode(word).unwrap();
            assert_eq!(inst.offset(), k);
        }
    }
}
