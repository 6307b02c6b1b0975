// Instruction decoding
// Turns the bytes at a program counter into an Instruction. Decoding is done
// on demand at whatever pc the interpreter reaches, so branches into the
// middle of a "decoy" sequence still behave like the raw byte walk would.

use super::opcode::ActionCode;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// The action header or its declared payload runs past the buffer.
    #[error("action at {pc} runs past the end of the buffer")]
    Truncated { pc: usize },

    /// The payload is malformed but its extent is known.
    #[error("malformed {action} payload at {pc}: {detail}")]
    Payload {
        pc: usize,
        next_pc: usize,
        action: &'static str,
        detail: String,
    },
}

impl DecodeError {
    /// Where execution can safely continue, if anywhere.
    pub fn resume_at(&self) -> Option<usize> {
        match self {
            DecodeError::Truncated { .. } => None,
            DecodeError::Payload { next_pc, .. } => Some(*next_pc),
        }
    }
}

/// One literal of a `push_data` payload.
#[derive(Debug, Clone, PartialEq)]
pub enum PushItem {
    String(String),
    Float(f32),
    Null,
    Undefined,
    Register(u8),
    Boolean(bool),
    Double(f64),
    Integer(i32),
    Dictionary(u16),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionArg {
    /// 0 means "bind as a named local"
    pub register: u8,
    pub name: String,
}

/// Header of `declare_function` / `declare_function2`; the body follows it.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionHeader {
    pub name: String,
    pub args: Vec<FunctionArg>,
    pub register_count: u8,
    pub flags: u16,
    pub body_length: u16,
    pub is_function2: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Any action without payload, including `end`.
    Simple(ActionCode),
    /// A payload-free byte with no known meaning.
    UnknownSimple(u8),

    GotoFrame(u16),
    GetUrl { url: String, window: String },
    StoreRegister(u8),
    DeclareDictionary { count: u16 },
    WaitForFrame { frame: u16, skip: u8 },
    SetTarget(String),
    GotoLabel(String),
    WaitForFrame2 { skip: u8 },
    DefineFunction(FunctionHeader),
    With { block_length: u16 },
    Push(Vec<PushItem>),
    Jump(i16),
    GetUrl2 { method: u8 },
    If(i16),
    CallFrame,
    GotoFrame2 { play: bool, scene_bias: Option<u16> },
    UnknownExtended { code: u8, length: u16 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub instruction: Instruction,
    /// pc of the following action (function bodies are not skipped here)
    pub next_pc: usize,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], start: usize, end: usize) -> Self {
        Self {
            bytes,
            pos: start,
            end,
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        if self.pos + n > self.end {
            return Err(format!(
                "wanted {} bytes at {}, payload ends at {}",
                n, self.pos, self.end
            ));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, String> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_i16(&mut self) -> Result<i16, String> {
        Ok(self.read_u16()? as i16)
    }

    fn read_u32(&mut self) -> Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_f32(&mut self) -> Result<f32, String> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Doubles are stored high 32-bit word first, each word little-endian.
    fn read_swapped_f64(&mut self) -> Result<f64, String> {
        let hi = self.read_u32()? as u64;
        let lo = self.read_u32()? as u64;
        Ok(f64::from_bits((hi << 32) | lo))
    }

    fn read_cstr(&mut self) -> Result<String, String> {
        let start = self.pos;
        let rest = &self.bytes[start..self.end];
        match rest.iter().position(|&b| b == 0) {
            Some(len) => {
                self.pos = start + len + 1;
                Ok(String::from_utf8_lossy(&rest[..len]).into_owned())
            }
            None => Err(format!("unterminated string at {}", start)),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.end
    }
}

/// Decode the action starting at `pc`.
pub fn decode(bytes: &[u8], pc: usize) -> Result<Decoded, DecodeError> {
    let code = *bytes.get(pc).ok_or(DecodeError::Truncated { pc })?;

    if !ActionCode::has_payload(code) {
        let instruction = match ActionCode::from_u8(code) {
            Some(action) => Instruction::Simple(action),
            None => Instruction::UnknownSimple(code),
        };
        return Ok(Decoded {
            instruction,
            next_pc: pc + 1,
        });
    }

    if pc + 3 > bytes.len() {
        return Err(DecodeError::Truncated { pc });
    }
    let length = u16::from_le_bytes([bytes[pc + 1], bytes[pc + 2]]);
    let start = pc + 3;
    let next_pc = start + length as usize;
    if next_pc > bytes.len() {
        return Err(DecodeError::Truncated { pc });
    }

    let action = ActionCode::from_u8(code);
    let mut reader = Reader::new(bytes, start, next_pc);
    let decoded = decode_payload(action, code, length, &mut reader);

    match decoded {
        Ok(instruction) => Ok(Decoded {
            instruction,
            next_pc,
        }),
        Err(detail) => Err(DecodeError::Payload {
            pc,
            next_pc,
            action: action.map(|a| a.name()).unwrap_or("unknown"),
            detail,
        }),
    }
}

fn decode_payload(
    action: Option<ActionCode>,
    code: u8,
    length: u16,
    r: &mut Reader<'_>,
) -> Result<Instruction, String> {
    let instruction = match action {
        Some(ActionCode::GotoFrame) => Instruction::GotoFrame(r.read_u16()?),
        Some(ActionCode::GetUrl) => {
            let url = r.read_cstr()?;
            let window = r.read_cstr()?;
            Instruction::GetUrl { url, window }
        }
        Some(ActionCode::StoreRegister) => Instruction::StoreRegister(r.read_u8()?),
        Some(ActionCode::ConstantPool) => Instruction::DeclareDictionary {
            count: r.read_u16()?,
        },
        Some(ActionCode::WaitForFrame) => Instruction::WaitForFrame {
            frame: r.read_u16()?,
            skip: r.read_u8()?,
        },
        Some(ActionCode::SetTarget) => Instruction::SetTarget(r.read_cstr()?),
        Some(ActionCode::GotoLabel) => Instruction::GotoLabel(r.read_cstr()?),
        Some(ActionCode::WaitForFrame2) => Instruction::WaitForFrame2 { skip: r.read_u8()? },
        Some(ActionCode::DefineFunction) => Instruction::DefineFunction(read_function(r, false)?),
        Some(ActionCode::DefineFunction2) => Instruction::DefineFunction(read_function(r, true)?),
        Some(ActionCode::With) => Instruction::With {
            block_length: r.read_u16()?,
        },
        Some(ActionCode::Push) => Instruction::Push(read_push_items(r)?),
        Some(ActionCode::Jump) => Instruction::Jump(r.read_i16()?),
        Some(ActionCode::GetUrl2) => Instruction::GetUrl2 {
            method: r.read_u8()?,
        },
        Some(ActionCode::If) => Instruction::If(r.read_i16()?),
        Some(ActionCode::Call) => Instruction::CallFrame,
        Some(ActionCode::GotoFrame2) => {
            let flags = r.read_u8()?;
            let scene_bias = if flags & 0x02 != 0 {
                Some(r.read_u16()?)
            } else {
                None
            };
            Instruction::GotoFrame2 {
                play: flags & 0x01 != 0,
                scene_bias,
            }
        }
        _ => Instruction::UnknownExtended { code, length },
    };
    Ok(instruction)
}

fn read_function(r: &mut Reader<'_>, is_function2: bool) -> Result<FunctionHeader, String> {
    let name = r.read_cstr()?;
    let arg_count = r.read_u16()?;

    let (register_count, flags) = if is_function2 {
        (r.read_u8()?, r.read_u16()?)
    } else {
        (0, 0)
    };

    let mut args = Vec::with_capacity(arg_count as usize);
    for _ in 0..arg_count {
        let register = if is_function2 { r.read_u8()? } else { 0 };
        let name = r.read_cstr()?;
        args.push(FunctionArg { register, name });
    }

    let body_length = r.read_u16()?;

    Ok(FunctionHeader {
        name,
        args,
        register_count,
        flags,
        body_length,
        is_function2,
    })
}

fn read_push_items(r: &mut Reader<'_>) -> Result<Vec<PushItem>, String> {
    let mut items = Vec::new();
    while !r.at_end() {
        let tag = r.read_u8()?;
        let item = match tag {
            0 => PushItem::String(r.read_cstr()?),
            1 => PushItem::Float(r.read_f32()?),
            2 => PushItem::Null,
            3 => PushItem::Undefined,
            4 => PushItem::Register(r.read_u8()?),
            5 => PushItem::Boolean(r.read_u8()? != 0),
            6 => PushItem::Double(r.read_swapped_f64()?),
            7 => PushItem::Integer(r.read_u32()? as i32),
            8 => PushItem::Dictionary(r.read_u8()? as u16),
            9 => PushItem::Dictionary(r.read_u16()?),
            other => return Err(format!("unknown push type {}", other)),
        };
        items.push(item);
    }
    Ok(items)
}

impl fmt::Display for PushItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushItem::String(s) => write!(f, "\"{}\"", s),
            PushItem::Float(n) => write!(f, "{}f", n),
            PushItem::Null => write!(f, "null"),
            PushItem::Undefined => write!(f, "undefined"),
            PushItem::Register(r) => write!(f, "r:{}", r),
            PushItem::Boolean(b) => write!(f, "{}", b),
            PushItem::Double(n) => write!(f, "{}", n),
            PushItem::Integer(n) => write!(f, "{}", n),
            PushItem::Dictionary(i) => write!(f, "dict[{}]", i),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Simple(action) => write!(f, "{}", action.name()),
            Instruction::UnknownSimple(code) => write!(f, "unknown_{:02X}", code),
            Instruction::GotoFrame(frame) => write!(f, "goto_frame {}", frame),
            Instruction::GetUrl { url, window } => write!(f, "get_url \"{}\" \"{}\"", url, window),
            Instruction::StoreRegister(r) => write!(f, "store_register {}", r),
            Instruction::DeclareDictionary { count } => write!(f, "declare_dictionary {}", count),
            Instruction::WaitForFrame { frame, skip } => {
                write!(f, "wait_for_frame {} skip {}", frame, skip)
            }
            Instruction::SetTarget(path) => write!(f, "set_target \"{}\"", path),
            Instruction::GotoLabel(label) => write!(f, "goto_label \"{}\"", label),
            Instruction::WaitForFrame2 { skip } => write!(f, "wait_for_frame_expression skip {}", skip),
            Instruction::DefineFunction(header) => {
                let op = if header.is_function2 {
                    "declare_function2"
                } else {
                    "declare_function"
                };
                write!(f, "{} \"{}\" (", op, header.name)?;
                for (i, arg) in header.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if arg.register != 0 {
                        write!(f, "r{}:", arg.register)?;
                    }
                    write!(f, "{}", arg.name)?;
                }
                write!(f, ") body {}", header.body_length)?;
                if header.is_function2 {
                    write!(
                        f,
                        " regs {} flags 0x{:04X}",
                        header.register_count, header.flags
                    )?;
                }
                Ok(())
            }
            Instruction::With { block_length } => write!(f, "with {}", block_length),
            Instruction::Push(items) => {
                write!(f, "push_data")?;
                for (i, item) in items.iter().enumerate() {
                    write!(f, "{}{}", if i == 0 { " " } else { ", " }, item)?;
                }
                Ok(())
            }
            Instruction::Jump(offset) => write!(f, "branch_always {}", offset),
            Instruction::GetUrl2 { method } => write!(f, "get_url2 {}", method),
            Instruction::If(offset) => write!(f, "branch_if_true {}", offset),
            Instruction::CallFrame => write!(f, "call_frame"),
            Instruction::GotoFrame2 { play, .. } => {
                write!(f, "goto_frame_expression{}", if *play { " play" } else { "" })
            }
            Instruction::UnknownExtended { code, length } => {
                write!(f, "unknown_{:02X} ({} bytes)", code, length)
            }
        }
    }
}
