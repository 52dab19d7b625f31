//! Word-level SPIR-V module model.
//!
//! Only the layout rules needed for in-place rewriting are understood:
//! instruction framing, the header's id bound, and the logical section
//! order. Operands are kept as raw words.

use crate::error::SpirvError;

pub const MAGIC: u32 = 0x0723_0203;
const HEADER_WORDS: usize = 5;

pub mod op {
    pub const NAME: u16 = 5;
    pub const MEMBER_NAME: u16 = 6;
    pub const EXTENSION: u16 = 10;
    pub const EXT_INST_IMPORT: u16 = 11;
    pub const MEMORY_MODEL: u16 = 14;
    pub const ENTRY_POINT: u16 = 15;
    pub const EXECUTION_MODE: u16 = 16;
    pub const CAPABILITY: u16 = 17;
    pub const TYPE_VOID: u16 = 19;
    pub const TYPE_BOOL: u16 = 20;
    pub const TYPE_INT: u16 = 21;
    pub const TYPE_FLOAT: u16 = 22;
    pub const TYPE_ARRAY: u16 = 28;
    pub const TYPE_RUNTIME_ARRAY: u16 = 29;
    pub const TYPE_STRUCT: u16 = 30;
    pub const TYPE_POINTER: u16 = 32;
    pub const TYPE_FUNCTION: u16 = 33;
    pub const CONSTANT: u16 = 43;
    pub const FUNCTION: u16 = 54;
    pub const FUNCTION_END: u16 = 56;
    pub const VARIABLE: u16 = 59;
    pub const LOAD: u16 = 61;
    pub const ACCESS_CHAIN: u16 = 65;
    pub const IN_BOUNDS_ACCESS_CHAIN: u16 = 66;
    pub const DECORATE: u16 = 71;
    pub const MEMBER_DECORATE: u16 = 72;
    pub const SELECT: u16 = 169;
    pub const U_LESS_THAN: u16 = 176;
    pub const ATOMIC_I_ADD: u16 = 234;
    pub const ATOMIC_U_MAX: u16 = 239;
    pub const LABEL: u16 = 248;
}

pub mod decoration {
    pub const BLOCK: u32 = 2;
    pub const BUFFER_BLOCK: u32 = 3;
    pub const ARRAY_STRIDE: u32 = 6;
    pub const BINDING: u32 = 33;
    pub const DESCRIPTOR_SET: u32 = 34;
    pub const OFFSET: u32 = 35;
}

pub mod storage_class {
    pub const UNIFORM_CONSTANT: u32 = 0;
    pub const INPUT: u32 = 1;
    pub const UNIFORM: u32 = 2;
    pub const OUTPUT: u32 = 3;
    pub const FUNCTION: u32 = 7;
    pub const STORAGE_BUFFER: u32 = 12;
}

/// One instruction: opcode plus raw operand words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: u16,
    pub operands: Vec<u32>,
}

impl Instruction {
    pub fn new(opcode: u16, operands: Vec<u32>) -> Self {
        Self { opcode, operands }
    }

    pub fn word_count(&self) -> usize {
        self.operands.len() + 1
    }

    /// Operand positions of (result type, result id) for the opcodes that
    /// carry both.
    fn typed_result_slots(opcode: u16) -> Option<(usize, usize)> {
        match opcode {
            1 // OpUndef
            | 41..=46 // constants
            | 48..=52 // specialization constants
            | 54 | 55 | 57 // function, parameter, call
            | 59 // variable
            | 61 // load
            | 65..=67 // access chains
            | 77..=83 // vector/composite ops
            | 109..=124 // conversions
            | 126..=141 // arithmetic
            | 164..=180 // logical and comparisons
            | 194..=205 // bitwise
            | 227..=242 // atomics
            | 245 // phi
            => Some((0, 1)),
            _ => None,
        }
    }

    /// The id this instruction defines, if any.
    pub fn result_id(&self) -> Option<u32> {
        let slot = match self.opcode {
            op::EXT_INST_IMPORT | op::LABEL => Some(0),
            19..=39 => Some(0), // type declarations
            other => Self::typed_result_slots(other).map(|(_, id)| id),
        }?;
        self.operands.get(slot).copied()
    }

    pub fn result_type(&self) -> Option<u32> {
        let (ty, _) = Self::typed_result_slots(self.opcode)?;
        self.operands.get(ty).copied()
    }

    fn is_type_declaration(&self) -> bool {
        (19..=39).contains(&self.opcode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub generator: u32,
    pub bound: u32,
    pub schema: u32,
}

impl Header {
    /// (major, minor)
    pub fn version(&self) -> (u8, u8) {
        (((self.version >> 16) & 0xff) as u8, ((self.version >> 8) & 0xff) as u8)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub header: Header,
    pub instructions: Vec<Instruction>,
}

impl Module {
    pub fn parse(words: &[u32]) -> Result<Self, SpirvError> {
        if words.len() < HEADER_WORDS {
            return Err(SpirvError::MissingHeader);
        }
        if words[0] != MAGIC {
            return Err(SpirvError::WrongMagic(words[0]));
        }
        let header = Header {
            version: words[1],
            generator: words[2],
            bound: words[3],
            schema: words[4],
        };

        let mut instructions = Vec::new();
        let mut offset = HEADER_WORDS;
        while offset < words.len() {
            let first = words[offset];
            let word_count = (first >> 16) as usize;
            if word_count == 0 {
                return Err(SpirvError::ZeroWordCount(offset));
            }
            let remaining = words.len() - offset;
            if word_count > remaining {
                return Err(SpirvError::IncompleteInstruction {
                    offset,
                    word_count,
                    remaining,
                });
            }
            instructions.push(Instruction {
                opcode: (first & 0xffff) as u16,
                operands: words[offset + 1..offset + word_count].to_vec(),
            });
            offset += word_count;
        }

        Ok(Self {
            header,
            instructions,
        })
    }

    /// Parse a byte stream in either endianness.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SpirvError> {
        Self::parse(&words_from_bytes(bytes)?)
    }

    pub fn assemble(&self) -> Vec<u32> {
        let len = HEADER_WORDS + self.instructions.iter().map(Instruction::word_count).sum::<usize>();
        let mut words = Vec::with_capacity(len);
        words.extend([
            MAGIC,
            self.header.version,
            self.header.generator,
            self.header.bound,
            self.header.schema,
        ]);
        for inst in &self.instructions {
            words.push(((inst.word_count() as u32) << 16) | inst.opcode as u32);
            words.extend_from_slice(&inst.operands);
        }
        words
    }

    pub fn version(&self) -> (u8, u8) {
        self.header.version()
    }

    /// Hand out a fresh id and bump the bound.
    pub fn alloc_id(&mut self) -> u32 {
        let id = self.header.bound;
        self.header.bound += 1;
        id
    }

    pub fn find(&self, mut pred: impl FnMut(&Instruction) -> bool) -> Option<&Instruction> {
        self.instructions.iter().find(|inst| pred(inst))
    }

    pub fn defining(&self, id: u32) -> Option<&Instruction> {
        self.find(|inst| inst.result_id() == Some(id))
    }

    /// Index of the first type declaration; annotations go right before it.
    pub fn types_start(&self) -> usize {
        self.instructions
            .iter()
            .position(Instruction::is_type_declaration)
            .unwrap_or(self.instructions.len())
    }

    /// Index of the first function; new global declarations go right before it.
    pub fn functions_start(&self) -> usize {
        self.instructions
            .iter()
            .position(|inst| inst.opcode == op::FUNCTION)
            .unwrap_or(self.instructions.len())
    }

    pub fn entry_points(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions
            .iter()
            .filter(|inst| inst.opcode == op::ENTRY_POINT)
    }
}

/// Decode a byte stream, detecting endianness from the magic number.
pub fn words_from_bytes(bytes: &[u8]) -> Result<Vec<u32>, SpirvError> {
    if bytes.len() < HEADER_WORDS * 4 {
        return Err(SpirvError::MissingHeader);
    }
    if bytes.len() % 4 != 0 {
        return Err(SpirvError::Misaligned(bytes.len()));
    }
    let chunks = bytes.chunks_exact(4);
    let magic_le = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let words = if magic_le == MAGIC {
        chunks
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    } else {
        let magic_be = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic_be != MAGIC {
            return Err(SpirvError::WrongMagic(magic_le));
        }
        chunks
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    };
    Ok(words)
}

/// Little-endian byte image of a word stream.
pub fn bytes_from_words(words: &[u32]) -> Vec<u8> {
    if cfg!(target_endian = "little") {
        bytemuck::cast_slice::<u32, u8>(words).to_vec()
    } else {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}

/// Encode a literal string operand: UTF-8, NUL terminated, padded to a
/// word boundary.
pub fn encode_string(s: &str) -> Vec<u32> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Number of words a literal string starting at `operands[0]` occupies.
pub fn string_word_len(operands: &[u32]) -> usize {
    operands
        .iter()
        .position(|w| w.to_le_bytes().contains(&0))
        .map(|i| i + 1)
        .unwrap_or(operands.len())
}
