use std::fmt;

use thiserror::Error;

/// Operation selected by the low 4 bits of an instruction word.
///
/// All sixteen code points are assigned, so a word can always be decoded;
/// illegality comes from operand selectors that the opcode forbids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    NoOp = 0x0,
    Add = 0x1,
    Sub = 0x2,
    Shl = 0x3,
    Shr = 0x4,
    And = 0x5,
    Or = 0x6,
    Xor = 0x7,
    Not = 0x8,
    Jump = 0x9,
    Load = 0xA,
    Greater = 0xB,
    Less = 0xC,
    Equal = 0xD,
    Bez = 0xE,
    Bnez = 0xF,
}

impl Opcode {
    pub fn from_bits(bits: u8) -> Opcode {
        match bits & 0x0F {
            0x0 => Opcode::NoOp,
            0x1 => Opcode::Add,
            0x2 => Opcode::Sub,
            0x3 => Opcode::Shl,
            0x4 => Opcode::Shr,
            0x5 => Opcode::And,
            0x6 => Opcode::Or,
            0x7 => Opcode::Xor,
            0x8 => Opcode::Not,
            0x9 => Opcode::Jump,
            0xA => Opcode::Load,
            0xB => Opcode::Greater,
            0xC => Opcode::Less,
            0xD => Opcode::Equal,
            0xE => Opcode::Bez,
            _ => Opcode::Bnez,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::NoOp => "NO_OP",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Shl => "SHL",
            Opcode::Shr => "SHR",
            Opcode::And => "AND",
            Opcode::Or => "OR",
            Opcode::Xor => "XOR",
            Opcode::Not => "NOT",
            Opcode::Jump => "JUMP",
            Opcode::Load => "LOAD",
            Opcode::Greater => "GREATER",
            Opcode::Less => "LESS",
            Opcode::Equal => "EQUAL",
            Opcode::Bez => "BEZ",
            Opcode::Bnez => "BNEZ",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// 2-bit operand selector.
///
/// The `00` encoding is contextual: it selects the immediate byte in a value
/// position and doubles as "none" for operand slots an opcode does not use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sel {
    Imm = 0b00,
    RegA = 0b01,
    RegB = 0b10,
    Acc = 0b11,
}

impl Sel {
    pub fn from_bits(bits: u8) -> Sel {
        match bits & 0b11 {
            0b00 => Sel::Imm,
            0b01 => Sel::RegA,
            0b10 => Sel::RegB,
            _ => Sel::Acc,
        }
    }

    /// True when the selector names one of `A`, `B`, `ACC`.
    pub fn is_register(self) -> bool {
        self != Sel::Imm
    }
}

/// Operand combination the instruction word encodes but the opcode forbids.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IllegalInstruction {
    #[error("{opcode} requires a register in source_1, got selector {sel:?}")]
    SourceNotRegister { opcode: Opcode, sel: Sel },
    #[error("{opcode} takes no source_2 operand, got selector {sel:?}")]
    UnexpectedSource2 { opcode: Opcode, sel: Sel },
    #[error("{opcode} takes no operand selectors")]
    UnexpectedOperands { opcode: Opcode },
}

/// One decoded 8-bit instruction word: `[source_2:2][source_1:2][opcode:4]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub source_1: Sel,
    pub source_2: Sel,
}

impl Instruction {
    pub fn new(opcode: Opcode, source_1: Sel, source_2: Sel) -> Instruction {
        Instruction {
            opcode,
            source_1,
            source_2,
        }
    }

    /// Decode is total; every word maps to some instruction. Whether that
    /// instruction is legal is a separate question answered by [`validate`].
    ///
    /// [`validate`]: Instruction::validate
    pub fn decode(word: u8) -> Instruction {
        Instruction {
            opcode: Opcode::from_bits(word & 0x0F),
            source_1: Sel::from_bits((word >> 4) & 0b11),
            source_2: Sel::from_bits((word >> 6) & 0b11),
        }
    }

    pub fn encode(self) -> u8 {
        ((self.source_2 as u8) << 6) | ((self.source_1 as u8) << 4) | self.opcode as u8
    }

    /// Check the operand selectors against what the opcode admits.
    pub fn validate(self) -> Result<(), IllegalInstruction> {
        match self.opcode {
            // No operand slots at all; both selector fields must read 00.
            Opcode::NoOp | Opcode::Jump => {
                if self.source_1 != Sel::Imm || self.source_2 != Sel::Imm {
                    return Err(IllegalInstruction::UnexpectedOperands {
                        opcode: self.opcode,
                    });
                }
            }
            // Register source, free value source (00 selects the immediate).
            Opcode::Add
            | Opcode::Sub
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Greater
            | Opcode::Less
            | Opcode::Equal
            | Opcode::Load => {
                if !self.source_1.is_register() {
                    return Err(IllegalInstruction::SourceNotRegister {
                        opcode: self.opcode,
                        sel: self.source_1,
                    });
                }
            }
            // Register source only; source_2 must be unused.
            Opcode::Shl | Opcode::Shr | Opcode::Not | Opcode::Bez | Opcode::Bnez => {
                if !self.source_1.is_register() {
                    return Err(IllegalInstruction::SourceNotRegister {
                        opcode: self.opcode,
                        sel: self.source_1,
                    });
                }
                if self.source_2 != Sel::Imm {
                    return Err(IllegalInstruction::UnexpectedSource2 {
                        opcode: self.opcode,
                        sel: self.source_2,
                    });
                }
            }
        }
        Ok(())
    }

    /// Whether a legal instance of this instruction consumes an immediate
    /// byte on the cycle after the instruction word.
    pub fn needs_immediate(self) -> bool {
        match self.opcode {
            // Control flow always carries a target index.
            Opcode::Jump | Opcode::Bez | Opcode::Bnez => true,
            Opcode::Add
            | Opcode::Sub
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Greater
            | Opcode::Less
            | Opcode::Equal
            | Opcode::Load => self.source_2 == Sel::Imm,
            Opcode::NoOp | Opcode::Shl | Opcode::Shr | Opcode::Not => false,
        }
    }
}

impl fmt::Display for Instruction {
    // Same shape the original bench logged: source_2, source_1 in binary,
    // then the mnemonic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02b} {:02b} {}",
            self.source_2 as u8, self.source_1 as u8, self.opcode
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_splits_fields() {
        // LOAD A, #imm as driven by the original bench: 0b00_01_1010.
        let instr = Instruction::decode(0b0001_1010);
        assert_eq!(instr.opcode, Opcode::Load);
        assert_eq!(instr.source_1, Sel::RegA);
        assert_eq!(instr.source_2, Sel::Imm);

        // AND A, ACC: 0b11_01_0101.
        let instr = Instruction::decode(0b1101_0101);
        assert_eq!(instr.opcode, Opcode::And);
        assert_eq!(instr.source_1, Sel::RegA);
        assert_eq!(instr.source_2, Sel::Acc);

        // LOAD ACC, A: 0b01_11_1010.
        let instr = Instruction::decode(0b0111_1010);
        assert_eq!(instr.opcode, Opcode::Load);
        assert_eq!(instr.source_1, Sel::Acc);
        assert_eq!(instr.source_2, Sel::RegA);
    }

    #[test]
    fn encode_matches_decode() {
        for word in [0b0001_1010u8, 0b1101_0101, 0b0010_1110, 0b0000_1001] {
            assert_eq!(Instruction::decode(word).encode(), word);
        }
    }

    #[test]
    fn all_ones_word_is_illegal() {
        let instr = Instruction::decode(0xFF);
        assert_eq!(instr.opcode, Opcode::Bnez);
        assert_eq!(
            instr.validate(),
            Err(IllegalInstruction::UnexpectedSource2 {
                opcode: Opcode::Bnez,
                sel: Sel::Acc,
            })
        );
    }

    #[test]
    fn register_positions_reject_the_immediate_selector() {
        let add = Instruction::new(Opcode::Add, Sel::Imm, Sel::RegB);
        assert!(matches!(
            add.validate(),
            Err(IllegalInstruction::SourceNotRegister { .. })
        ));

        let load = Instruction::new(Opcode::Load, Sel::Imm, Sel::RegA);
        assert!(load.validate().is_err());

        let shl = Instruction::new(Opcode::Shl, Sel::Imm, Sel::Imm);
        assert!(shl.validate().is_err());
    }

    #[test]
    fn unary_rejects_source_2() {
        let not = Instruction::new(Opcode::Not, Sel::Acc, Sel::RegA);
        assert_eq!(
            not.validate(),
            Err(IllegalInstruction::UnexpectedSource2 {
                opcode: Opcode::Not,
                sel: Sel::RegA,
            })
        );
    }

    #[test]
    fn no_op_rejects_selectors() {
        assert!(Instruction::decode(0b0001_0000).validate().is_err());
        assert!(Instruction::decode(0b0100_0000).validate().is_err());
        assert!(Instruction::decode(0x00).validate().is_ok());
    }

    #[test]
    fn immediate_consumption() {
        assert!(Instruction::decode(0b0000_1001).needs_immediate()); // JUMP
        assert!(Instruction::decode(0b0001_1111).needs_immediate()); // BNEZ A
        assert!(Instruction::decode(0b0001_0001).needs_immediate()); // ADD A, #imm
        assert!(!Instruction::decode(0b1101_0101).needs_immediate()); // AND A, ACC
        assert!(!Instruction::decode(0b0010_0011).needs_immediate()); // SHL B
        assert!(!Instruction::decode(0x00).needs_immediate()); // NO_OP
    }

    #[test]
    fn display_matches_bench_trace_format() {
        let instr = Instruction::decode(0b1101_0101);
        assert_eq!(instr.to_string(), "11 01 AND");
    }
}
