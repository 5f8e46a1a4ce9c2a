//! JVM instruction decoding.
//!
//! # Key Components
//!
//! - [`decode_instruction`] - decodes the instruction at one offset
//! - [`decode_all`] - decodes a complete method body into `(offset, instruction)` pairs
//!
//! # Usage Examples
//!
//! ```rust
//! use classopt::assembly::{decode_all, opcodes};
//!
//! // iconst_0, iconst_1, iadd, ireturn
//! let code = [0x03, 0x04, 0x60, 0xAC];
//! let instructions = decode_all(&code)?;
//! assert_eq!(instructions.len(), 4);
//! assert_eq!(instructions[2].1.opcode, opcodes::IADD);
//! # Ok::<(), classopt::Error>(())
//! ```

use crate::{
    assembly::{
        instruction::{Instruction, Operand},
        opcodes::*,
        parser::Parser,
    },
    Error, Result,
};

/// Decodes the instruction starting at `offset` of `code`.
///
/// # Errors
///
/// Returns [`Error::InvalidOpcode`] for undefined opcodes and [`Error::Malformed`] for
/// truncated operands, illegal `wide` targets and inverted `tableswitch` bounds.
pub fn decode_instruction(code: &[u8], offset: usize) -> Result<Instruction> {
    let mut parser = Parser::new(code);
    parser.seek(offset)?;
    let opcode = parser.read_u8()?;

    let operand = match opcode {
        BIPUSH => Operand::Byte(parser.read_i8()?),
        SIPUSH => Operand::Short(parser.read_i16()?),
        LDC => Operand::Constant(u16::from(parser.read_u8()?)),
        LDC_W | LDC2_W | GETSTATIC..=INVOKESTATIC | NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => {
            Operand::Constant(parser.read_u16()?)
        }
        ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Operand::Local(u16::from(parser.read_u8()?)),
        IINC => Operand::Iinc {
            index: u16::from(parser.read_u8()?),
            delta: i16::from(parser.read_i8()?),
        },
        IFEQ..=JSR | IFNULL | IFNONNULL => Operand::Branch(i32::from(parser.read_i16()?)),
        GOTO_W | JSR_W => Operand::Branch(parser.read_i32()?),
        TABLESWITCH => {
            parser.align(4)?;
            let default = parser.read_i32()?;
            let low = parser.read_i32()?;
            let high = parser.read_i32()?;
            if high < low {
                return Err(malformed_error!(
                    "tableswitch at {} has high {} < low {}",
                    offset,
                    high,
                    low
                ));
            }
            let count = (i64::from(high) - i64::from(low) + 1) as usize;
            if count * 4 > parser.remaining() {
                return Err(malformed_error!("tableswitch at {} is truncated", offset));
            }
            let offsets = (0..count)
                .map(|_| parser.read_i32())
                .collect::<Result<Vec<_>>>()?;
            Operand::TableSwitch {
                default,
                low,
                high,
                offsets,
            }
        }
        LOOKUPSWITCH => {
            parser.align(4)?;
            let default = parser.read_i32()?;
            let npairs = parser.read_i32()?;
            let npairs = usize::try_from(npairs)
                .map_err(|_| malformed_error!("lookupswitch at {} has negative size", offset))?;
            if npairs * 8 > parser.remaining() {
                return Err(malformed_error!("lookupswitch at {} is truncated", offset));
            }
            let pairs = (0..npairs)
                .map(|_| Ok((parser.read_i32()?, parser.read_i32()?)))
                .collect::<Result<Vec<_>>>()?;
            Operand::LookupSwitch { default, pairs }
        }
        INVOKEINTERFACE => {
            let index = parser.read_u16()?;
            let count = parser.read_u8()?;
            parser.read_u8()?;
            Operand::InvokeInterface { index, count }
        }
        INVOKEDYNAMIC => {
            let index = parser.read_u16()?;
            parser.read_u16()?;
            Operand::Constant(index)
        }
        NEWARRAY => Operand::ArrayType(parser.read_u8()?),
        MULTIANEWARRAY => Operand::MultiANewArray {
            index: parser.read_u16()?,
            dimensions: parser.read_u8()?,
        },
        WIDE => {
            let modified = parser.read_u8()?;
            match modified {
                ILOAD..=ALOAD | ISTORE..=ASTORE | RET => {
                    let index = parser.read_u16()?;
                    return Ok(Instruction::new(modified, Operand::Local(index)));
                }
                IINC => {
                    let index = parser.read_u16()?;
                    let delta = parser.read_i16()?;
                    return Ok(Instruction::new(IINC, Operand::Iinc { index, delta }));
                }
                other => {
                    return Err(malformed_error!(
                        "wide at {} modifies {:#04x}, which takes no local variable",
                        offset,
                        other
                    ))
                }
            }
        }
        op if op > LAST_OPCODE => return Err(Error::InvalidOpcode(op)),
        _ => Operand::None,
    };

    Ok(Instruction::new(opcode, operand))
}

/// Decodes every instruction of `code`, returning them with their offsets.
///
/// Instructions are decoded linearly from offset 0, so the result also establishes the set
/// of valid instruction boundaries.
///
/// # Errors
///
/// Returns an error if any instruction fails to decode.
pub fn decode_all(code: &[u8]) -> Result<Vec<(usize, Instruction)>> {
    let mut instructions = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let instruction = decode_instruction(code, offset)?;
        let length = decoded_length(code, offset, &instruction);
        instructions.push((offset, instruction));
        offset += length;
    }
    Ok(instructions)
}

/// The number of bytes the instruction occupied in `code`, which differs from its canonical
/// [`Instruction::length`] when the input used a redundant `wide` prefix.
fn decoded_length(code: &[u8], offset: usize, instruction: &Instruction) -> usize {
    match code[offset] {
        WIDE if instruction.opcode == IINC => 6,
        WIDE => 4,
        _ => instruction.length(offset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_branches_and_locals() {
        let code = [ILOAD, 4, IFEQ, 0xFF, 0xFE, WIDE, ISTORE, 0x01, 0x00, RETURN];
        let instructions = decode_all(&code).unwrap();
        let offsets: Vec<_> = instructions.iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, vec![0, 2, 5, 9]);
        assert_eq!(instructions[1].1.branch_targets(2).unwrap(), vec![0]);
        assert_eq!(
            instructions[2].1,
            Instruction::new(ISTORE, Operand::Local(256))
        );
    }

    #[test]
    fn test_decode_switches() {
        // nop, then lookupswitch at 1 with 2 bytes of padding
        let mut code = vec![NOP, LOOKUPSWITCH, 0, 0];
        code.extend(20i32.to_be_bytes());
        code.extend(1i32.to_be_bytes());
        code.extend(7i32.to_be_bytes());
        code.extend(10i32.to_be_bytes());
        let instruction = decode_instruction(&code, 1).unwrap();
        assert_eq!(
            instruction.operand,
            Operand::LookupSwitch {
                default: 20,
                pairs: vec![(7, 10)]
            }
        );
        assert_eq!(instruction.length(1), code.len() - 1);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode_instruction(&[0xCB], 0),
            Err(Error::InvalidOpcode(0xCB))
        ));
        assert!(decode_instruction(&[SIPUSH, 0x01], 0).is_err());
        assert!(decode_instruction(&[WIDE, IADD], 0).is_err());
    }

    #[test]
    fn test_redundant_wide_keeps_its_length() {
        let code = [WIDE, ILOAD, 0x00, 0x02, IRETURN];
        let instructions = decode_all(&code).unwrap();
        assert_eq!(instructions[0].1, Instruction::new(ILOAD, Operand::Local(2)));
        assert_eq!(instructions[1].0, 4);
    }
}
