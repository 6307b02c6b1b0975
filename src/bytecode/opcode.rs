// Action codes
// Bit 7 set means the action carries a 2-byte length and a payload

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ActionCode {
    End = 0x00,

    NextFrame = 0x04,
    PrevFrame = 0x05,
    Play = 0x06,
    Stop = 0x07,
    ToggleQuality = 0x08,
    StopSounds = 0x09,

    Add = 0x0A,
    Subtract = 0x0B,
    Multiply = 0x0C,
    Divide = 0x0D,
    Equals = 0x0E,
    Less = 0x0F,
    And = 0x10,
    Or = 0x11,
    Not = 0x12,

    StringEquals = 0x13,
    StringLength = 0x14,
    StringExtract = 0x15,

    Pop = 0x17,
    ToInteger = 0x18,

    GetVariable = 0x1C,
    SetVariable = 0x1D,
    SetTarget2 = 0x20,
    StringAdd = 0x21,
    GetProperty = 0x22,
    SetProperty = 0x23,
    CloneSprite = 0x24,
    RemoveSprite = 0x25,
    Trace = 0x26,
    StartDrag = 0x27,
    EndDrag = 0x28,
    StringLess = 0x29,
    Throw = 0x2A,
    CastOp = 0x2B,
    ImplementsOp = 0x2C,

    RandomNumber = 0x30,
    MbStringLength = 0x31,
    CharToAscii = 0x32,
    AsciiToChar = 0x33,
    GetTime = 0x34,
    MbStringExtract = 0x35,
    MbCharToAscii = 0x36,
    MbAsciiToChar = 0x37,

    Delete = 0x3A,
    Delete2 = 0x3B,
    DefineLocal = 0x3C,
    CallFunction = 0x3D,
    Return = 0x3E,
    Modulo = 0x3F,
    NewObject = 0x40,
    DefineLocal2 = 0x41,
    InitArray = 0x42,
    InitObject = 0x43,
    TypeOf = 0x44,
    TargetPath = 0x45,
    Enumerate = 0x46,
    Add2 = 0x47,
    Less2 = 0x48,
    Equals2 = 0x49,
    ToNumber = 0x4A,
    ToString = 0x4B,
    PushDuplicate = 0x4C,
    StackSwap = 0x4D,
    GetMember = 0x4E,
    SetMember = 0x4F,
    Increment = 0x50,
    Decrement = 0x51,
    CallMethod = 0x52,
    NewMethod = 0x53,
    InstanceOf = 0x54,
    Enumerate2 = 0x55,

    BitAnd = 0x60,
    BitOr = 0x61,
    BitXor = 0x62,
    BitLShift = 0x63,
    BitRShift = 0x64,
    BitURShift = 0x65,
    StrictEquals = 0x66,
    Greater = 0x67,
    StringGreater = 0x68,
    Extends = 0x69,

    GotoFrame = 0x81,
    GetUrl = 0x83,
    StoreRegister = 0x87,
    ConstantPool = 0x88,
    WaitForFrame = 0x8A,
    SetTarget = 0x8B,
    GotoLabel = 0x8C,
    WaitForFrame2 = 0x8D,
    DefineFunction2 = 0x8E,
    With = 0x94,
    Push = 0x96,
    Jump = 0x99,
    GetUrl2 = 0x9A,
    DefineFunction = 0x9B,
    If = 0x9D,
    Call = 0x9E,
    GotoFrame2 = 0x9F,
}

impl ActionCode {
    pub fn from_u8(byte: u8) -> Option<ActionCode> {
        use ActionCode::*;
        let code = match byte {
            0x00 => End,
            0x04 => NextFrame,
            0x05 => PrevFrame,
            0x06 => Play,
            0x07 => Stop,
            0x08 => ToggleQuality,
            0x09 => StopSounds,
            0x0A => Add,
            0x0B => Subtract,
            0x0C => Multiply,
            0x0D => Divide,
            0x0E => Equals,
            0x0F => Less,
            0x10 => And,
            0x11 => Or,
            0x12 => Not,
            0x13 => StringEquals,
            0x14 => StringLength,
            0x15 => StringExtract,
            0x17 => Pop,
            0x18 => ToInteger,
            0x1C => GetVariable,
            0x1D => SetVariable,
            0x20 => SetTarget2,
            0x21 => StringAdd,
            0x22 => GetProperty,
            0x23 => SetProperty,
            0x24 => CloneSprite,
            0x25 => RemoveSprite,
            0x26 => Trace,
            0x27 => StartDrag,
            0x28 => EndDrag,
            0x29 => StringLess,
            0x2A => Throw,
            0x2B => CastOp,
            0x2C => ImplementsOp,
            0x30 => RandomNumber,
            0x31 => MbStringLength,
            0x32 => CharToAscii,
            0x33 => AsciiToChar,
            0x34 => GetTime,
            0x35 => MbStringExtract,
            0x36 => MbCharToAscii,
            0x37 => MbAsciiToChar,
            0x3A => Delete,
            0x3B => Delete2,
            0x3C => DefineLocal,
            0x3D => CallFunction,
            0x3E => Return,
            0x3F => Modulo,
            0x40 => NewObject,
            0x41 => DefineLocal2,
            0x42 => InitArray,
            0x43 => InitObject,
            0x44 => TypeOf,
            0x45 => TargetPath,
            0x46 => Enumerate,
            0x47 => Add2,
            0x48 => Less2,
            0x49 => Equals2,
            0x4A => ToNumber,
            0x4B => ToString,
            0x4C => PushDuplicate,
            0x4D => StackSwap,
            0x4E => GetMember,
            0x4F => SetMember,
            0x50 => Increment,
            0x51 => Decrement,
            0x52 => CallMethod,
            0x53 => NewMethod,
            0x54 => InstanceOf,
            0x55 => Enumerate2,
            0x60 => BitAnd,
            0x61 => BitOr,
            0x62 => BitXor,
            0x63 => BitLShift,
            0x64 => BitRShift,
            0x65 => BitURShift,
            0x66 => StrictEquals,
            0x67 => Greater,
            0x68 => StringGreater,
            0x69 => Extends,
            0x81 => GotoFrame,
            0x83 => GetUrl,
            0x87 => StoreRegister,
            0x88 => ConstantPool,
            0x8A => WaitForFrame,
            0x8B => SetTarget,
            0x8C => GotoLabel,
            0x8D => WaitForFrame2,
            0x8E => DefineFunction2,
            0x94 => With,
            0x96 => Push,
            0x99 => Jump,
            0x9A => GetUrl2,
            0x9B => DefineFunction,
            0x9D => If,
            0x9E => Call,
            0x9F => GotoFrame2,
            _ => return None,
        };
        Some(code)
    }

    /// Actions with bit 7 set are followed by a u16 length and a payload.
    pub fn has_payload(byte: u8) -> bool {
        byte & 0x80 != 0
    }

    pub fn name(&self) -> &'static str {
        use ActionCode::*;
        match self {
            End => "end",
            NextFrame => "next_frame",
            PrevFrame => "prev_frame",
            Play => "play",
            Stop => "stop",
            ToggleQuality => "toggle_quality",
            StopSounds => "stop_sounds",
            Add => "add",
            Subtract => "subtract",
            Multiply => "multiply",
            Divide => "divide",
            Equals => "equal",
            Less => "less_than",
            And => "logical_and",
            Or => "logical_or",
            Not => "logical_not",
            StringEquals => "string_equal",
            StringLength => "string_length",
            StringExtract => "substring",
            Pop => "pop",
            ToInteger => "int",
            GetVariable => "get_variable",
            SetVariable => "set_variable",
            SetTarget2 => "set_target_expression",
            StringAdd => "string_concat",
            GetProperty => "get_property",
            SetProperty => "set_property",
            CloneSprite => "duplicate_clip",
            RemoveSprite => "remove_clip",
            Trace => "trace",
            StartDrag => "start_drag",
            EndDrag => "stop_drag",
            StringLess => "string_less_than",
            Throw => "throw",
            CastOp => "cast_object",
            ImplementsOp => "implements",
            RandomNumber => "random",
            MbStringLength => "mb_length",
            CharToAscii => "ord",
            AsciiToChar => "chr",
            GetTime => "get_timer",
            MbStringExtract => "mb_substring",
            MbCharToAscii => "mb_ord",
            MbAsciiToChar => "mb_chr",
            Delete => "delete",
            Delete2 => "delete2",
            DefineLocal => "set_local",
            CallFunction => "call_function",
            Return => "return",
            Modulo => "modulo",
            NewObject => "new",
            DefineLocal2 => "declare_local",
            InitArray => "init_array",
            InitObject => "init_object",
            TypeOf => "typeof",
            TargetPath => "get_target",
            Enumerate => "enumerate",
            Add2 => "add_t",
            Less2 => "less_than_t",
            Equals2 => "equal_t",
            ToNumber => "to_number",
            ToString => "to_string",
            PushDuplicate => "dup",
            StackSwap => "swap",
            GetMember => "get_member",
            SetMember => "set_member",
            Increment => "increment",
            Decrement => "decrement",
            CallMethod => "call_method",
            NewMethod => "new_method",
            InstanceOf => "instance_of",
            Enumerate2 => "enumerate_object",
            BitAnd => "bitwise_and",
            BitOr => "bitwise_or",
            BitXor => "bitwise_xor",
            BitLShift => "shift_left",
            BitRShift => "shift_right",
            BitURShift => "shift_right_unsigned",
            StrictEquals => "strict_equal",
            Greater => "greater_than_t",
            StringGreater => "string_greater_than",
            Extends => "extends",
            GotoFrame => "goto_frame",
            GetUrl => "get_url",
            StoreRegister => "store_register",
            ConstantPool => "declare_dictionary",
            WaitForFrame => "wait_for_frame",
            SetTarget => "set_target",
            GotoLabel => "goto_label",
            WaitForFrame2 => "wait_for_frame_expression",
            DefineFunction2 => "declare_function2",
            With => "with",
            Push => "push_data",
            Jump => "branch_always",
            GetUrl2 => "get_url2",
            DefineFunction => "declare_function",
            If => "branch_if_true",
            Call => "call_frame",
            GotoFrame2 => "goto_frame_expression",
        }
    }
}

impl From<ActionCode> for u8 {
    fn from(code: ActionCode) -> u8 {
        code as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_code_round_trips_through_its_byte() {
        for byte in 0..=255u8 {
            if let Some(code) = ActionCode::from_u8(byte) {
                assert_eq!(u8::from(code), byte, "{}", code.name());
            }
        }
    }

    #[test]
    fn test_payload_bit() {
        assert!(ActionCode::has_payload(ActionCode::Push as u8));
        assert!(!ActionCode::has_payload(ActionCode::Add as u8));
        assert_eq!(ActionCode::from_u8(0x16), None);
    }
}
