//! Instruction set and the flat instruction word layout.
//!
//! Each instruction is one opcode word followed by a fixed number of
//! operand words:
//!
//! | Opcode                | Operand words                                |
//! |-----------------------|----------------------------------------------|
//! | move/add/sub/mul/div  | dest flags, val, index; src flags, val, index|
//! | and/or/xor/shr/shl/cmp| same as move                                 |
//! | jump/jumpn/jumpz/...  | target (line number, then instruction offset)|
//! | call                  | procedure, then flags/val/index per argument |
//! | ret                   | none                                         |

use crate::Word;
use num_derive::{FromPrimitive, ToPrimitive};

#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive, ToPrimitive)]
pub enum Opcode {
    Move,
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Shr,
    Shl,
    Cmp,
    Jump,
    JumpN,
    JumpZ,
    JumpL,
    JumpG,
    Call,
    Ret,
}

impl Opcode {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Move => "move",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Shr => "shr",
            Opcode::Shl => "shl",
            Opcode::Cmp => "cmp",
            Opcode::Jump => "jump",
            Opcode::JumpN => "jumpn",
            Opcode::JumpZ => "jumpz",
            Opcode::JumpL => "jumpl",
            Opcode::JumpG => "jumpg",
            Opcode::Call => "call",
            Opcode::Ret => "ret",
        }
    }
}

/* operand word offsets, relative to the opcode word */

pub const MOVE_DEST_FLAGS: usize = 1;
pub const MOVE_DEST_VAL: usize = 2;
pub const MOVE_DEST_INDEX: usize = 3;
pub const MOVE_SRC_FLAGS: usize = 4;
pub const MOVE_SRC_VAL: usize = 5;
pub const MOVE_SRC_INDEX: usize = 6;
pub const MOVE_ARGS: usize = MOVE_SRC_INDEX;

/* operand descriptor flags */

pub const MOVE_FLAG_TYPE_MASK: Word = 3;
pub const MOVE_FLAG_IMMEDIATE: Word = 0;
pub const MOVE_FLAG_VAR: Word = 1;
pub const MOVE_FLAG_LENGTH: Word = 2;

pub const MOVE_FLAG_INDEX_TYPE_MASK: Word = 1 << 2;
pub const MOVE_FLAG_INDEX_IMMEDIATE: Word = 0 << 2;
pub const MOVE_FLAG_INDEX_VAR: Word = 1 << 2;

pub const JUMP_LOCATION: usize = 1;
pub const JUMP_ARGS: usize = JUMP_LOCATION;

pub const CALL_PROCEDURE: usize = 1;
pub const CALL_START_ARGS: usize = 2;
pub const CALL_ARG_FLAGS: usize = 0;
pub const CALL_ARG_VAL: usize = 1;
pub const CALL_ARG_INDEX: usize = 2;
pub const CALL_ARG_SIZE: usize = CALL_ARG_INDEX + 1;

pub const RET_ARGS: usize = 0;

/// Reserved statement names.  Anything else in statement position is a
/// macro call as far as the preprocessor is concerned.
pub fn is_reserved(name: &str) -> bool {
    const RESERVED: [&str; 24] = [
        "stack", "proc", "export", "ret", "label", "static", "local",
        "move", "add", "sub", "mul", "div", "and", "or", "xor", "shl",
        "shr", "cmp", "call", "jump", "jumpn", "jumpz", "jumpl", "jumpg",
    ];

    RESERVED.iter().any(|&r| r == name)
}
