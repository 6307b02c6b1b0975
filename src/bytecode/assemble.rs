// Action assembler
// Emits bit-exact action bytes; used to build programs in tests and by hosts
// that synthesize small scripts

use super::decode::PushItem;
use super::opcode::ActionCode;

#[derive(Debug, Clone, Default)]
pub struct ActionWriter {
    code: Vec<u8>,
}

impl ActionWriter {
    pub fn new() -> Self {
        Self { code: Vec::new() }
    }

    /// Current byte offset, i.e. the pc of the next action written.
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn op(&mut self, code: ActionCode) -> &mut Self {
        self.code.push(code as u8);
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.code.extend_from_slice(bytes);
        self
    }

    fn extended(&mut self, code: ActionCode, payload: &[u8]) -> &mut Self {
        self.code.push(code as u8);
        self.code
            .extend_from_slice(&(payload.len() as u16).to_le_bytes());
        self.code.extend_from_slice(payload);
        self
    }

    pub fn push(&mut self, items: &[PushItem]) -> &mut Self {
        let mut payload = Vec::new();
        for item in items {
            match item {
                PushItem::String(s) => {
                    payload.push(0);
                    write_cstr(&mut payload, s);
                }
                PushItem::Float(f) => {
                    payload.push(1);
                    payload.extend_from_slice(&f.to_bits().to_le_bytes());
                }
                PushItem::Null => payload.push(2),
                PushItem::Undefined => payload.push(3),
                PushItem::Register(r) => payload.extend_from_slice(&[4, *r]),
                PushItem::Boolean(b) => payload.extend_from_slice(&[5, *b as u8]),
                PushItem::Double(d) => {
                    let bits = d.to_bits();
                    payload.push(6);
                    payload.extend_from_slice(&((bits >> 32) as u32).to_le_bytes());
                    payload.extend_from_slice(&(bits as u32).to_le_bytes());
                }
                PushItem::Integer(i) => {
                    payload.push(7);
                    payload.extend_from_slice(&i.to_le_bytes());
                }
                PushItem::Dictionary(index) => {
                    if *index <= u8::MAX as u16 {
                        payload.extend_from_slice(&[8, *index as u8]);
                    } else {
                        payload.push(9);
                        payload.extend_from_slice(&index.to_le_bytes());
                    }
                }
            }
        }
        self.extended(ActionCode::Push, &payload)
    }

    pub fn push_str(&mut self, s: &str) -> &mut Self {
        self.push(&[PushItem::String(s.to_string())])
    }

    pub fn push_number(&mut self, n: f64) -> &mut Self {
        self.push(&[PushItem::Double(n)])
    }

    pub fn push_int(&mut self, n: i32) -> &mut Self {
        self.push(&[PushItem::Integer(n)])
    }

    pub fn push_bool(&mut self, b: bool) -> &mut Self {
        self.push(&[PushItem::Boolean(b)])
    }

    pub fn push_register(&mut self, r: u8) -> &mut Self {
        self.push(&[PushItem::Register(r)])
    }

    pub fn store_register(&mut self, r: u8) -> &mut Self {
        self.extended(ActionCode::StoreRegister, &[r])
    }

    pub fn declare_dictionary(&mut self, strings: &[&str]) -> &mut Self {
        let mut payload = (strings.len() as u16).to_le_bytes().to_vec();
        for s in strings {
            write_cstr(&mut payload, s);
        }
        self.extended(ActionCode::ConstantPool, &payload)
    }

    pub fn jump(&mut self, offset: i16) -> &mut Self {
        self.extended(ActionCode::Jump, &offset.to_le_bytes())
    }

    pub fn branch_if_true(&mut self, offset: i16) -> &mut Self {
        self.extended(ActionCode::If, &offset.to_le_bytes())
    }

    pub fn goto_frame(&mut self, frame: u16) -> &mut Self {
        self.extended(ActionCode::GotoFrame, &frame.to_le_bytes())
    }

    pub fn goto_label(&mut self, label: &str) -> &mut Self {
        let mut payload = Vec::new();
        write_cstr(&mut payload, label);
        self.extended(ActionCode::GotoLabel, &payload)
    }

    pub fn goto_frame_expression(&mut self, play: bool) -> &mut Self {
        self.extended(ActionCode::GotoFrame2, &[play as u8])
    }

    pub fn set_target(&mut self, path: &str) -> &mut Self {
        let mut payload = Vec::new();
        write_cstr(&mut payload, path);
        self.extended(ActionCode::SetTarget, &payload)
    }

    pub fn get_url(&mut self, url: &str, window: &str) -> &mut Self {
        let mut payload = Vec::new();
        write_cstr(&mut payload, url);
        write_cstr(&mut payload, window);
        self.extended(ActionCode::GetUrl, &payload)
    }

    pub fn get_url2(&mut self, method: u8) -> &mut Self {
        self.extended(ActionCode::GetUrl2, &[method])
    }

    pub fn with_block(&mut self, block_length: u16) -> &mut Self {
        self.extended(ActionCode::With, &block_length.to_le_bytes())
    }

    /// `declare_function` followed by `body` (which should not end with `end`).
    pub fn define_function(&mut self, name: &str, args: &[&str], body: &[u8]) -> &mut Self {
        let mut payload = Vec::new();
        write_cstr(&mut payload, name);
        payload.extend_from_slice(&(args.len() as u16).to_le_bytes());
        for arg in args {
            write_cstr(&mut payload, arg);
        }
        payload.extend_from_slice(&(body.len() as u16).to_le_bytes());
        self.extended(ActionCode::DefineFunction, &payload);
        self.raw(body)
    }

    /// `declare_function2`; `args` pairs a register (0 = named local) with a name.
    pub fn define_function2(
        &mut self,
        name: &str,
        register_count: u8,
        flags: u16,
        args: &[(u8, &str)],
        body: &[u8],
    ) -> &mut Self {
        let mut payload = Vec::new();
        write_cstr(&mut payload, name);
        payload.extend_from_slice(&(args.len() as u16).to_le_bytes());
        payload.push(register_count);
        payload.extend_from_slice(&flags.to_le_bytes());
        for (register, arg) in args {
            payload.push(*register);
            write_cstr(&mut payload, arg);
        }
        payload.extend_from_slice(&(body.len() as u16).to_le_bytes());
        self.extended(ActionCode::DefineFunction2, &payload);
        self.raw(body)
    }

    /// Bytes written so far, without a terminating `end`.
    pub fn body(&self) -> Vec<u8> {
        self.code.clone()
    }

    /// Bytes written so far plus the terminating `end`.
    pub fn finish(&self) -> Vec<u8> {
        let mut code = self.code.clone();
        code.push(ActionCode::End as u8);
        code
    }
}

fn write_cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}
