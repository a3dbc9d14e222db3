//! Opcode definitions.
//!
//! Opcode numbers follow the classic CPython 3.5 table so compiler output for that
//! version can be loaded directly. Opcodes at or above [`HAVE_ARGUMENT`] carry a 2-byte
//! little-endian operand; the others are a single byte.

use strum::{Display, EnumString, FromRepr, IntoStaticStr};

/// First opcode number that carries an operand.
pub const HAVE_ARGUMENT: u8 = 90;

/// A single instruction kind.
///
/// The strum name is the classic mnemonic (`BINARY_ADD`, `SETUP_LOOP`, ...). Dispatch of
/// the generic operator instructions relies on that name: stripping the `UNARY_`,
/// `BINARY_` or `INPLACE_` prefix yields the operator.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, Display, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    // === Stack manipulation ===
    PopTop = 1,
    RotTwo = 2,
    RotThree = 3,
    DupTop = 4,
    DupTopTwo = 5,
    Nop = 9,

    // === Unary operators ===
    UnaryPositive = 10,
    UnaryNegative = 11,
    UnaryNot = 12,
    UnaryInvert = 15,

    // === Binary and in-place operators ===
    BinaryPower = 19,
    BinaryMultiply = 20,
    BinaryModulo = 22,
    BinaryAdd = 23,
    BinarySubtract = 24,
    BinarySubscr = 25,
    BinaryFloorDivide = 26,
    BinaryTrueDivide = 27,
    InplaceFloorDivide = 28,
    InplaceTrueDivide = 29,
    InplaceAdd = 55,
    InplaceSubtract = 56,
    InplaceMultiply = 57,
    InplaceModulo = 59,
    StoreSubscr = 60,
    BinaryLshift = 62,
    BinaryRshift = 63,
    BinaryAnd = 64,
    BinaryXor = 65,
    BinaryOr = 66,
    InplacePower = 67,
    GetIter = 68,
    PrintExpr = 70,
    InplaceLshift = 75,
    InplaceRshift = 76,
    InplaceAnd = 77,
    InplaceXor = 78,
    InplaceOr = 79,

    // === Block control ===
    BreakLoop = 80,
    ReturnValue = 83,
    YieldValue = 86,
    PopBlock = 87,
    EndFinally = 88,
    PopExcept = 89,

    // === Operand-carrying instructions (>= HAVE_ARGUMENT) ===
    StoreName = 90,
    DeleteName = 91,
    UnpackSequence = 92,
    ForIter = 93,
    StoreGlobal = 97,
    DeleteGlobal = 98,
    LoadConst = 100,
    LoadName = 101,
    BuildTuple = 102,
    BuildList = 103,
    LoadAttr = 106,
    CompareOp = 107,
    JumpForward = 110,
    JumpIfFalseOrPop = 111,
    JumpIfTrueOrPop = 112,
    JumpAbsolute = 113,
    PopJumpIfFalse = 114,
    PopJumpIfTrue = 115,
    LoadGlobal = 116,
    ContinueLoop = 119,
    SetupLoop = 120,
    SetupExcept = 121,
    SetupFinally = 122,
    LoadFast = 124,
    StoreFast = 125,
    DeleteFast = 126,
    RaiseVarargs = 130,
    CallFunction = 131,
    MakeFunction = 132,
    LoadClosure = 135,
    LoadDeref = 136,
    ListAppend = 145,
}

/// How an instruction's raw operand is resolved before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandClass {
    /// No operand byte follows the opcode.
    None,
    /// Index into the constant pool.
    Const,
    /// Index into the name table.
    Name,
    /// Index into the local-slot table.
    Local,
    /// Offset added to the address of the following instruction.
    JumpRelative,
    /// Absolute instruction offset.
    JumpAbsolute,
    /// Used as-is (counts, comparison selectors, raise forms).
    Int,
}

impl Opcode {
    #[must_use]
    pub fn has_arg(self) -> bool {
        self as u8 >= HAVE_ARGUMENT
    }

    #[must_use]
    pub fn operand_class(self) -> OperandClass {
        match self {
            Self::LoadConst => OperandClass::Const,
            Self::StoreName
            | Self::DeleteName
            | Self::StoreGlobal
            | Self::DeleteGlobal
            | Self::LoadName
            | Self::LoadAttr
            | Self::LoadGlobal => OperandClass::Name,
            Self::LoadFast | Self::StoreFast | Self::DeleteFast => OperandClass::Local,
            Self::JumpForward | Self::ForIter | Self::SetupLoop | Self::SetupExcept | Self::SetupFinally => {
                OperandClass::JumpRelative
            }
            Self::JumpIfFalseOrPop
            | Self::JumpIfTrueOrPop
            | Self::JumpAbsolute
            | Self::PopJumpIfFalse
            | Self::PopJumpIfTrue
            | Self::ContinueLoop => OperandClass::JumpAbsolute,
            op if op.has_arg() => OperandClass::Int,
            _ => OperandClass::None,
        }
    }

    /// The mnemonic, e.g. `"BINARY_ADD"`.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// Operators reached through the generic `BINARY_*` / `INPLACE_*` dispatch.
///
/// Parsed from the mnemonic with its prefix stripped, so `BINARY_FLOOR_DIVIDE` and
/// `INPLACE_FLOOR_DIVIDE` both resolve to [`BinaryOp::FloorDivide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BinaryOp {
    Power,
    Multiply,
    Modulo,
    Add,
    Subtract,
    FloorDivide,
    TrueDivide,
    Lshift,
    Rshift,
    And,
    Xor,
    Or,
}

impl BinaryOp {
    /// Source-level operator, for error messages.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Power => "** or pow()",
            Self::Multiply => "*",
            Self::Modulo => "%",
            Self::Add => "+",
            Self::Subtract => "-",
            Self::FloorDivide => "//",
            Self::TrueDivide => "/",
            Self::Lshift => "<<",
            Self::Rshift => ">>",
            Self::And => "&",
            Self::Xor => "^",
            Self::Or => "|",
        }
    }
}

/// Operators reached through the generic `UNARY_*` dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum UnaryOp {
    Positive,
    Negative,
    Not,
    Invert,
}

impl UnaryOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Positive => "unary +",
            Self::Negative => "unary -",
            Self::Not => "not",
            Self::Invert => "unary ~",
        }
    }
}

/// `COMPARE_OP` selectors, numbered as the operand encodes them.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, Display)]
pub enum CompareOp {
    #[strum(serialize = "<")]
    Lt = 0,
    #[strum(serialize = "<=")]
    Le = 1,
    #[strum(serialize = "==")]
    Eq = 2,
    #[strum(serialize = "!=")]
    Ne = 3,
    #[strum(serialize = ">")]
    Gt = 4,
    #[strum(serialize = ">=")]
    Ge = 5,
    #[strum(serialize = "in")]
    In = 6,
    #[strum(serialize = "not in")]
    NotIn = 7,
    #[strum(serialize = "is")]
    Is = 8,
    #[strum(serialize = "is not")]
    IsNot = 9,
    #[strum(serialize = "exception match")]
    ExceptionMatch = 10,
}
