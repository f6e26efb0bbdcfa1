//! Opcode decoder built on bit-pattern templates.
//!
//! Each descriptor pairs a 16-character pattern with a mnemonic. Pattern
//! characters are read most significant bit first: `0` and `1` must match
//! the word literally, any letter contributes that bit to the named operand
//! field. A word decodes to the first descriptor whose literal bits all
//! match; the table is built so the literal bits of no two entries overlap
//! on the same word.

use log::error;

use crate::fault::CpuFault;
use crate::instructions::{Instruction, Mnemonic, Operands};

/// One instruction encoding template.
pub struct Descriptor {
    pub pattern: &'static str,
    pub mnem: Mnemonic,
}

/// Encodings of the implemented subset.
///
/// Condition branches and status-bit set/clear appear only as the generic
/// BRBS/BRBC and BSET/BCLR; mnemonics that pin the `s` field are an alias
/// layer on top (`instructions::BranchAlias`), not decoder entries.
pub static DESCRIPTORS: &[Descriptor] = &[
    Descriptor { pattern: "0000000000000000", mnem: Mnemonic::NOP },
    Descriptor { pattern: "000001rdddddrrrr", mnem: Mnemonic::CPC },
    Descriptor { pattern: "000010rdddddrrrr", mnem: Mnemonic::SBC },
    Descriptor { pattern: "000011rdddddrrrr", mnem: Mnemonic::ADD },
    Descriptor { pattern: "000101rdddddrrrr", mnem: Mnemonic::CP },
    Descriptor { pattern: "000110rdddddrrrr", mnem: Mnemonic::SUB },
    Descriptor { pattern: "000111rdddddrrrr", mnem: Mnemonic::ADC },
    Descriptor { pattern: "001000rdddddrrrr", mnem: Mnemonic::AND },
    Descriptor { pattern: "001001rdddddrrrr", mnem: Mnemonic::EOR },
    Descriptor { pattern: "001010rdddddrrrr", mnem: Mnemonic::OR },
    Descriptor { pattern: "0011KKKKddddKKKK", mnem: Mnemonic::CPI },
    Descriptor { pattern: "0100KKKKddddKKKK", mnem: Mnemonic::SBCI },
    Descriptor { pattern: "0101KKKKddddKKKK", mnem: Mnemonic::SUBI },
    Descriptor { pattern: "0110KKKKddddKKKK", mnem: Mnemonic::ORI },
    Descriptor { pattern: "0111KKKKddddKKKK", mnem: Mnemonic::ANDI },
    Descriptor { pattern: "1001010ddddd0101", mnem: Mnemonic::ASR },
    Descriptor { pattern: "1001010ddddd0110", mnem: Mnemonic::LSR },
    Descriptor { pattern: "1001010ddddd0111", mnem: Mnemonic::ROR },
    Descriptor { pattern: "100101000sss1000", mnem: Mnemonic::BSET },
    Descriptor { pattern: "100101001sss1000", mnem: Mnemonic::BCLR },
    Descriptor { pattern: "10010110KKddKKKK", mnem: Mnemonic::ADIW },
    Descriptor { pattern: "111100kkkkkkksss", mnem: Mnemonic::BRBS },
    Descriptor { pattern: "111101kkkkkkksss", mnem: Mnemonic::BRBC },
    Descriptor { pattern: "1111100ddddd0bbb", mnem: Mnemonic::BLD },
    Descriptor { pattern: "1111101ddddd0bbb", mnem: Mnemonic::BST },
];

/// Decodes one instruction word, or fails with `UnknownOpcode` when no
/// descriptor's literal bits match.
pub fn decode(word: u16) -> Result<Instruction, CpuFault> {
    for desc in DESCRIPTORS {
        if let Some(operands) = match_descriptor(desc, word) {
            return Ok(Instruction {
                mnem: desc.mnem,
                word,
                operands,
            });
        }
    }
    error!("no descriptor matches instruction word 0x{:04x}", word);
    Err(CpuFault::UnknownOpcode(word))
}

fn match_descriptor(desc: &Descriptor, word: u16) -> Option<Operands> {
    let mut operands = Operands::default();
    for (i, ch) in desc.pattern.bytes().enumerate() {
        let bit = (word >> (15 - i)) & 1;
        match ch {
            b'0' => {
                if bit != 0 {
                    return None;
                }
            }
            b'1' => {
                if bit != 1 {
                    return None;
                }
            }
            letter => {
                if !operands.push_bit(letter, bit) {
                    return None;
                }
            }
        }
    }
    Some(operands)
}

#[cfg(test)]
mod decoder_tests {
    use super::*;

    /// Word with all the descriptor's literal bits and zeroed wildcards.
    fn synthesize(desc: &Descriptor) -> u16 {
        let mut word = 0u16;
        for (i, ch) in desc.pattern.bytes().enumerate() {
            if ch == b'1' {
                word |= 1 << (15 - i);
            }
        }
        word
    }

    #[test]
    fn every_descriptor_round_trips_with_zero_fields() {
        for desc in DESCRIPTORS {
            let word = synthesize(desc);
            let inst = decode(word).unwrap();
            assert_eq!(inst.mnem, desc.mnem, "word 0x{:04x}", word);
            for letter in [b'd', b'r', b'K', b'k', b's', b'b'].iter() {
                assert_eq!(inst.operands.get(*letter), 0, "word 0x{:04x}", word);
            }
        }
    }

    #[test]
    fn patterns_are_sixteen_bits_wide() {
        for desc in DESCRIPTORS {
            assert_eq!(desc.pattern.len(), 16, "pattern {}", desc.pattern);
        }
    }

    #[test]
    fn register_register_fields_are_split_correctly() {
        // add r0, r1 = 0000 1100 0000 0001
        let inst = decode(0x0C01).unwrap();
        assert_eq!(inst.mnem, Mnemonic::ADD);
        assert_eq!(inst.rd(), 0);
        assert_eq!(inst.rr(), 1);

        // adc r31, r31: the high r bit sits apart from the low nibble
        let inst = decode(0x1FFF).unwrap();
        assert_eq!(inst.mnem, Mnemonic::ADC);
        assert_eq!(inst.rd(), 31);
        assert_eq!(inst.rr(), 31);
    }

    #[test]
    fn immediate_fields_gather_msb_first() {
        // andi r16, 0xA5 = 0111 1010 0000 0101
        let inst = decode(0x7A05).unwrap();
        assert_eq!(inst.mnem, Mnemonic::ANDI);
        assert_eq!(inst.rd(), 0); // encoded d, register R16
        assert_eq!(inst.imm(), 0xA5);

        // adiw r24, 63 = 1001 0110 1100 1111
        let inst = decode(0x96CF).unwrap();
        assert_eq!(inst.mnem, Mnemonic::ADIW);
        assert_eq!(inst.rd(), 0);
        assert_eq!(inst.imm(), 63);
    }

    #[test]
    fn status_bit_ops_do_not_alias_the_shift_group() {
        // bset s=0 (sec) vs asr r0 share the 0x94 prefix
        let inst = decode(0x9408).unwrap();
        assert_eq!(inst.mnem, Mnemonic::BSET);
        assert_eq!(inst.sreg_bit(), 0);

        let inst = decode(0x9488).unwrap();
        assert_eq!(inst.mnem, Mnemonic::BCLR);

        let inst = decode(0x9405).unwrap();
        assert_eq!(inst.mnem, Mnemonic::ASR);
        assert_eq!(inst.rd(), 0);
    }

    #[test]
    fn branch_offsets_sign_extend_from_seven_bits() {
        // brbs s=0, k=-1 = 1111 0011 1111 1000
        let inst = decode(0xF3F8).unwrap();
        assert_eq!(inst.mnem, Mnemonic::BRBS);
        assert_eq!(inst.offset(), -1);

        let inst = decode(0xF000).unwrap();
        assert_eq!(inst.offset(), 0);
    }

    #[test]
    fn bit_transfer_words_decode_register_and_bit() {
        // bst r17, 6 = 1111 1011 0001 0110
        let inst = decode(0xFB16).unwrap();
        assert_eq!(inst.mnem, Mnemonic::BST);
        assert_eq!(inst.rd(), 17);
        assert_eq!(inst.reg_bit(), 6);
    }

    #[test]
    fn words_outside_the_subset_are_unknown() {
        // jmp, lds, and the all-ones word are not part of this core
        assert_eq!(decode(0x940C).unwrap_err(), CpuFault::UnknownOpcode(0x940C));
        assert_eq!(decode(0x9000).unwrap_err(), CpuFault::UnknownOpcode(0x9000));
        assert_eq!(decode(0xFFFF).unwrap_err(), CpuFault::UnknownOpcode(0xFFFF));
    }
}
