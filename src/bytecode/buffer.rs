// Action buffer
// Raw action bytes plus the string dictionary declared inside them

use super::decode::{decode, Instruction};
use super::opcode::ActionCode;
use crate::error::{AvmError, AvmResult, Diagnostic};
use std::cell::RefCell;
use std::fmt::Write;
use std::fs;
use std::path::Path;
use std::rc::Rc;

pub const INVALID_DICTIONARY_ENTRY: &str = "<invalid>";

#[derive(Debug, Clone)]
struct Dictionary {
    declared_at: usize,
    entries: Rc<[Rc<str>]>,
}

/// Immutable action bytes; the dictionary is resolved the first time its
/// declaring action executes and never replaced afterwards.
#[derive(Debug)]
pub struct ActionBuffer {
    bytes: Vec<u8>,
    dictionary: RefCell<Option<Dictionary>>,
}

impl ActionBuffer {
    /// Copy actions verbatim up to and including the terminating `end`.
    /// A missing terminator is supplied.
    pub fn read(data: &[u8]) -> AvmResult<Self> {
        Self::read_traced(data, false)
    }

    /// Load a file holding the raw actions of one frame.
    pub fn read_file(path: &Path, verbose: bool) -> AvmResult<Self> {
        let data = fs::read(path).map_err(|source| AvmError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::read_traced(&data, verbose)
    }

    pub fn read_traced(data: &[u8], verbose: bool) -> AvmResult<Self> {
        let mut bytes = Vec::with_capacity(data.len() + 1);
        let mut pc = 0;

        loop {
            let Some(&code) = data.get(pc) else {
                log::warn!("action buffer has no end action; appending one");
                bytes.push(ActionCode::End as u8);
                break;
            };

            let start = bytes.len();
            bytes.push(code);
            pc += 1;

            if ActionCode::has_payload(code) {
                if pc + 2 > data.len() {
                    return Err(AvmError::TruncatedBuffer {
                        offset: start,
                        needed: 2,
                        available: data.len() - pc,
                    });
                }
                let length = u16::from_le_bytes([data[pc], data[pc + 1]]) as usize;
                pc += 2;
                if pc + length > data.len() {
                    return Err(AvmError::TruncatedBuffer {
                        offset: start,
                        needed: length,
                        available: data.len() - pc,
                    });
                }
                bytes.extend_from_slice(&data[pc - 2..pc + length]);
                pc += length;
            }

            if verbose {
                if let Ok(decoded) = decode(&bytes, start) {
                    log::trace!("{:4}\t{}", start, decoded.instruction);
                }
            }

            if code == ActionCode::End as u8 {
                break;
            }
        }

        Ok(Self {
            bytes,
            dictionary: RefCell::new(None),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Resolve the dictionary declared by the action at `pc`, whose payload
    /// ends at `stop_pc`. Re-running the same declaration is a no-op; a
    /// declaration at another offset is rejected and the first one kept.
    pub fn resolve_dictionary(&self, pc: usize, stop_pc: usize) -> Result<(), Diagnostic> {
        if let Some(existing) = self.dictionary.borrow().as_ref() {
            if existing.declared_at == pc {
                return Ok(());
            }
            return Err(Diagnostic::malformed(format!(
                "dictionary at {} ignored; already declared at {}",
                pc, existing.declared_at
            ))
            .at(pc));
        }

        let stop_pc = stop_pc.min(self.bytes.len());
        let mut i = pc + 3;
        if i + 2 > stop_pc {
            return Err(Diagnostic::malformed("dictionary payload too short").at(pc));
        }
        let count = u16::from_le_bytes([self.bytes[i], self.bytes[i + 1]]) as usize;
        i += 2;

        let mut entries: Vec<Rc<str>> = Vec::with_capacity(count);
        let mut overrun = false;
        while entries.len() < count {
            match self.bytes[i..stop_pc].iter().position(|&b| b == 0) {
                Some(len) => {
                    entries.push(Rc::from(String::from_utf8_lossy(&self.bytes[i..i + len])));
                    i += len + 1;
                }
                None => {
                    overrun = true;
                    break;
                }
            }
        }
        while entries.len() < count {
            entries.push(Rc::from(INVALID_DICTIONARY_ENTRY));
        }

        *self.dictionary.borrow_mut() = Some(Dictionary {
            declared_at: pc,
            entries: entries.into(),
        });

        if overrun {
            return Err(Diagnostic::malformed("action buffer dictionary length exceeded").at(pc));
        }
        Ok(())
    }

    pub fn dictionary_entry(&self, index: usize) -> Option<Rc<str>> {
        self.dictionary
            .borrow()
            .as_ref()
            .and_then(|dict| dict.entries.get(index).cloned())
    }

    pub fn dictionary(&self) -> Vec<Rc<str>> {
        self.dictionary
            .borrow()
            .as_ref()
            .map(|dict| dict.entries.to_vec())
            .unwrap_or_default()
    }

    pub fn dictionary_offset(&self) -> Option<usize> {
        self.dictionary.borrow().as_ref().map(|dict| dict.declared_at)
    }

    /// One line per action: offset, mnemonic, operands.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let mut pc = 0;
        while pc < self.bytes.len() {
            match decode(&self.bytes, pc) {
                Ok(decoded) => {
                    let _ = writeln!(out, "{:5}  {}", pc, decoded.instruction);
                    if decoded.instruction == Instruction::Simple(ActionCode::End) {
                        break;
                    }
                    pc = decoded.next_pc;
                }
                Err(err) => {
                    let _ = writeln!(out, "{:5}  <{}>", pc, err);
                    match err.resume_at() {
                        Some(next) => pc = next,
                        None => break,
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::assemble::ActionWriter;

    #[test]
    fn test_read_copies_until_end() {
        let data = [0x96, 0x02, 0x00, 0x05, 0x01, 0x17, 0x00, 0xFF, 0xFF];
        let buffer = ActionBuffer::read(&data).unwrap();
        assert_eq!(buffer.bytes(), &data[..7]);
    }

    #[test]
    fn test_read_appends_missing_end() {
        let buffer = ActionBuffer::read(&[0x17]).unwrap();
        assert_eq!(buffer.bytes(), &[0x17, 0x00]);
    }

    #[test]
    fn test_read_file_reports_missing_path() {
        let err = ActionBuffer::read_file(Path::new("/nonexistent/frame.bin"), false).unwrap_err();
        assert!(matches!(err, AvmError::Io { .. }));
    }

    #[test]
    fn test_read_rejects_truncated_payload() {
        let err = ActionBuffer::read(&[0x96, 0x08, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, AvmError::TruncatedBuffer { offset: 0, .. }));
    }

    #[test]
    fn test_dictionary_is_idempotent() {
        let mut w = ActionWriter::new();
        w.declare_dictionary(&["a", "b"]);
        let buffer = ActionBuffer::read(&w.finish()).unwrap();
        let stop = buffer.len() - 1;

        buffer.resolve_dictionary(0, stop).unwrap();
        buffer.resolve_dictionary(0, stop).unwrap();
        let dict = buffer.dictionary();
        assert_eq!(dict.len(), 2);
        assert_eq!(&*dict[0], "a");
        assert_eq!(&*dict[1], "b");
    }

    #[test]
    fn test_second_dictionary_is_rejected() {
        let mut w = ActionWriter::new();
        w.declare_dictionary(&["first"]);
        let second = w.offset();
        w.declare_dictionary(&["decoy", "strings"]);
        let buffer = ActionBuffer::read(&w.finish()).unwrap();

        let first_stop = second;
        buffer.resolve_dictionary(0, first_stop).unwrap();
        let err = buffer
            .resolve_dictionary(second, buffer.len() - 1)
            .unwrap_err();
        assert_eq!(err.kind, crate::error::DiagnosticKind::MalformedBytecode);
        assert_eq!(buffer.dictionary().len(), 1);
        assert_eq!(buffer.dictionary_offset(), Some(0));
    }

    #[test]
    fn test_dictionary_overrun_marks_invalid() {
        // count says 3, only one string present
        let data = [0x88, 0x04, 0x00, 0x03, 0x00, b'x', 0x00, 0x00];
        let buffer = ActionBuffer::read(&data).unwrap();
        assert!(buffer.resolve_dictionary(0, 7).is_err());
        let dict = buffer.dictionary();
        assert_eq!(&*dict[0], "x");
        assert_eq!(&*dict[2], INVALID_DICTIONARY_ENTRY);
    }

    #[test]
    fn test_disassemble() {
        let mut w = ActionWriter::new();
        w.push_number(1.0).op(ActionCode::Trace);
        let buffer = ActionBuffer::read(&w.finish()).unwrap();
        let text = buffer.disassemble();
        assert!(text.contains("push_data 1"));
        assert!(text.contains("trace"));
        assert!(text.trim_end().ends_with("end"));
    }
}
