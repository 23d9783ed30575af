//! The closed opcode enumeration and its dispatch metadata. Scripts are
//! textual, so opcodes are keyed by name rather than by encoding byte; the
//! tables here gate availability per rule set (base / witness_v0 / tapscript,
//! Bitcoin vs Elements).

use crate::config::{SigVersion, SymEnvironment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    // Flow control
    Nop,
    If,
    NotIf,
    Else,
    EndIf,
    Verify,
    Return,

    // Stack
    ToAltStack,
    FromAltStack,
    Drop2,
    Dup2,
    Dup3,
    Over2,
    Rot2,
    Swap2,
    IfDup,
    Depth,
    Drop,
    Dup,
    Nip,
    Over,
    Pick,
    Roll,
    Rot,
    Swap,
    Tuck,

    // Splice
    Cat,
    Substr,
    Left,
    Right,
    Size,

    // Bitwise
    Invert,
    And,
    Or,
    Xor,
    Equal,
    EqualVerify,
    LShift,
    RShift,

    // Arithmetic
    Add1,
    Sub1,
    Negate,
    Abs,
    Not,
    NotEqual0,
    Add,
    Sub,
    BoolAnd,
    BoolOr,
    NumEqual,
    NumEqualVerify,
    NumNotEqual,
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,
    Min,
    Max,
    Within,

    // Crypto
    Ripemd160,
    Sha1,
    Sha256,
    Hash160,
    Hash256,
    CheckSig,
    CheckSigVerify,
    CheckMultisig,
    CheckMultisigVerify,
    CheckSigAdd,

    // Timelocks
    CheckLockTimeVerify,
    CheckSequenceVerify,

    // Elements: streaming hash
    Sha256Initialize,
    Sha256Update,
    Sha256Finalize,

    // Elements: signature from stack
    CheckSigFromStack,
    CheckSigFromStackVerify,

    // Elements: introspection
    InspectInputOutpoint,
    InspectInputAsset,
    InspectInputValue,
    InspectInputScriptPubKey,
    InspectInputSequence,
    InspectInputIssuance,
    InspectOutputAsset,
    InspectOutputValue,
    InspectOutputNonce,
    InspectOutputScriptPubKey,
    InspectVersion,
    InspectLockTime,
    InspectNumInputs,
    InspectNumOutputs,
    PushCurrentInputIndex,
    TxWeight,

    // Elements: 64-bit arithmetic
    Add64,
    Sub64,
    Mul64,
    Div64,
    Neg64,
    LessThan64,
    LessThanOrEqual64,
    GreaterThan64,
    GreaterThanOrEqual64,
    ScriptNumToLe64,
    Le64ToScriptNum,
    Le32ToLe64,
}

/// Name table: canonical display name without the `OP_` prefix.
const NAMES: &[(&str, OpCode)] = &[
    ("NOP", OpCode::Nop),
    ("IF", OpCode::If),
    ("NOTIF", OpCode::NotIf),
    ("ELSE", OpCode::Else),
    ("ENDIF", OpCode::EndIf),
    ("VERIFY", OpCode::Verify),
    ("RETURN", OpCode::Return),
    ("TOALTSTACK", OpCode::ToAltStack),
    ("FROMALTSTACK", OpCode::FromAltStack),
    ("2DROP", OpCode::Drop2),
    ("2DUP", OpCode::Dup2),
    ("3DUP", OpCode::Dup3),
    ("2OVER", OpCode::Over2),
    ("2ROT", OpCode::Rot2),
    ("2SWAP", OpCode::Swap2),
    ("IFDUP", OpCode::IfDup),
    ("DEPTH", OpCode::Depth),
    ("DROP", OpCode::Drop),
    ("DUP", OpCode::Dup),
    ("NIP", OpCode::Nip),
    ("OVER", OpCode::Over),
    ("PICK", OpCode::Pick),
    ("ROLL", OpCode::Roll),
    ("ROT", OpCode::Rot),
    ("SWAP", OpCode::Swap),
    ("TUCK", OpCode::Tuck),
    ("CAT", OpCode::Cat),
    ("SUBSTR", OpCode::Substr),
    ("LEFT", OpCode::Left),
    ("RIGHT", OpCode::Right),
    ("SIZE", OpCode::Size),
    ("INVERT", OpCode::Invert),
    ("AND", OpCode::And),
    ("OR", OpCode::Or),
    ("XOR", OpCode::Xor),
    ("EQUAL", OpCode::Equal),
    ("EQUALVERIFY", OpCode::EqualVerify),
    ("LSHIFT", OpCode::LShift),
    ("RSHIFT", OpCode::RShift),
    ("1ADD", OpCode::Add1),
    ("1SUB", OpCode::Sub1),
    ("NEGATE", OpCode::Negate),
    ("ABS", OpCode::Abs),
    ("NOT", OpCode::Not),
    ("0NOTEQUAL", OpCode::NotEqual0),
    ("ADD", OpCode::Add),
    ("SUB", OpCode::Sub),
    ("BOOLAND", OpCode::BoolAnd),
    ("BOOLOR", OpCode::BoolOr),
    ("NUMEQUAL", OpCode::NumEqual),
    ("NUMEQUALVERIFY", OpCode::NumEqualVerify),
    ("NUMNOTEQUAL", OpCode::NumNotEqual),
    ("LESSTHAN", OpCode::LessThan),
    ("GREATERTHAN", OpCode::GreaterThan),
    ("LESSTHANOREQUAL", OpCode::LessThanOrEqual),
    ("GREATERTHANOREQUAL", OpCode::GreaterThanOrEqual),
    ("MIN", OpCode::Min),
    ("MAX", OpCode::Max),
    ("WITHIN", OpCode::Within),
    ("RIPEMD160", OpCode::Ripemd160),
    ("SHA1", OpCode::Sha1),
    ("SHA256", OpCode::Sha256),
    ("HASH160", OpCode::Hash160),
    ("HASH256", OpCode::Hash256),
    ("CHECKSIG", OpCode::CheckSig),
    ("CHECKSIGVERIFY", OpCode::CheckSigVerify),
    ("CHECKMULTISIG", OpCode::CheckMultisig),
    ("CHECKMULTISIGVERIFY", OpCode::CheckMultisigVerify),
    ("CHECKSIGADD", OpCode::CheckSigAdd),
    ("CHECKLOCKTIMEVERIFY", OpCode::CheckLockTimeVerify),
    ("CHECKSEQUENCEVERIFY", OpCode::CheckSequenceVerify),
    ("SHA256INITIALIZE", OpCode::Sha256Initialize),
    ("SHA256UPDATE", OpCode::Sha256Update),
    ("SHA256FINALIZE", OpCode::Sha256Finalize),
    ("CHECKSIGFROMSTACK", OpCode::CheckSigFromStack),
    ("CHECKSIGFROMSTACKVERIFY", OpCode::CheckSigFromStackVerify),
    ("INSPECTINPUTOUTPOINT", OpCode::InspectInputOutpoint),
    ("INSPECTINPUTASSET", OpCode::InspectInputAsset),
    ("INSPECTINPUTVALUE", OpCode::InspectInputValue),
    ("INSPECTINPUTSCRIPTPUBKEY", OpCode::InspectInputScriptPubKey),
    ("INSPECTINPUTSEQUENCE", OpCode::InspectInputSequence),
    ("INSPECTINPUTISSUANCE", OpCode::InspectInputIssuance),
    ("INSPECTOUTPUTASSET", OpCode::InspectOutputAsset),
    ("INSPECTOUTPUTVALUE", OpCode::InspectOutputValue),
    ("INSPECTOUTPUTNONCE", OpCode::InspectOutputNonce),
    ("INSPECTOUTPUTSCRIPTPUBKEY", OpCode::InspectOutputScriptPubKey),
    ("INSPECTVERSION", OpCode::InspectVersion),
    ("INSPECTLOCKTIME", OpCode::InspectLockTime),
    ("INSPECTNUMINPUTS", OpCode::InspectNumInputs),
    ("INSPECTNUMOUTPUTS", OpCode::InspectNumOutputs),
    ("PUSHCURRENTINPUTINDEX", OpCode::PushCurrentInputIndex),
    ("TXWEIGHT", OpCode::TxWeight),
    ("ADD64", OpCode::Add64),
    ("SUB64", OpCode::Sub64),
    ("MUL64", OpCode::Mul64),
    ("DIV64", OpCode::Div64),
    ("NEG64", OpCode::Neg64),
    ("LESSTHAN64", OpCode::LessThan64),
    ("LESSTHANOREQUAL64", OpCode::LessThanOrEqual64),
    ("GREATERTHAN64", OpCode::GreaterThan64),
    ("GREATERTHANOREQUAL64", OpCode::GreaterThanOrEqual64),
    ("SCRIPTNUMTOLE64", OpCode::ScriptNumToLe64),
    ("LE64TOSCRIPTNUM", OpCode::Le64ToScriptNum),
    ("LE32TOLE64", OpCode::Le32ToLe64),
];

impl OpCode {
    pub fn name(self) -> &'static str {
        NAMES
            .iter()
            .find(|(_, op)| *op == self)
            .map(|(name, _)| *name)
            .unwrap_or("UNKNOWN")
    }

    pub fn from_name(raw: &str) -> Option<OpCode> {
        let upper = raw.to_ascii_uppercase();
        let name = upper.strip_prefix("OP_").unwrap_or(&upper);
        // Aliases kept for script compatibility.
        let name = match name {
            "CLTV" => "CHECKLOCKTIMEVERIFY",
            "CSV" => "CHECKSEQUENCEVERIFY",
            other => other,
        };
        NAMES.iter().find(|(n, _)| *n == name).map(|(_, op)| *op)
    }

    /// Whether the opcode exists under the given environment. Unknown names
    /// never reach this point; this gates known opcodes per rule set.
    pub fn is_enabled(self, env: &SymEnvironment) -> bool {
        use OpCode::*;
        if env.explicitly_enabled_opcodes.iter().any(|n| {
            OpCode::from_name(n) == Some(self)
        }) {
            return true;
        }
        match self {
            // Re-enabled splice/bitwise opcodes exist only on Elements.
            Cat | Substr | Left | Right | Invert | And | Or | Xor | LShift | RShift => {
                env.is_elements
            }
            CheckSigAdd => env.sigversion == SigVersion::Tapscript,
            Sha256Initialize | Sha256Update | Sha256Finalize | CheckSigFromStack
            | CheckSigFromStackVerify => env.is_elements,
            InspectInputOutpoint | InspectInputAsset | InspectInputValue
            | InspectInputScriptPubKey | InspectInputSequence | InspectInputIssuance
            | InspectOutputAsset | InspectOutputValue | InspectOutputNonce
            | InspectOutputScriptPubKey | InspectVersion | InspectLockTime | InspectNumInputs
            | InspectNumOutputs | PushCurrentInputIndex | TxWeight | Add64 | Sub64 | Mul64
            | Div64 | Neg64 | LessThan64 | LessThanOrEqual64 | GreaterThan64
            | GreaterThanOrEqual64 | ScriptNumToLe64 | Le64ToScriptNum | Le32ToLe64 => {
                env.is_elements && env.sigversion == SigVersion::Tapscript
            }
            CheckMultisig | CheckMultisigVerify => env.sigversion != SigVersion::Tapscript,
            _ => true,
        }
    }

    /// Operators whose displayed operand order is canonicalized when
    /// `use-deterministic-arguments-order` is set.
    pub fn is_commutative_display(self) -> bool {
        use OpCode::*;
        matches!(
            self,
            Add | Equal | EqualVerify | NumEqual | NumEqualVerify | NumNotEqual | BoolAnd
                | BoolOr | Min | Max | And | Or | Xor | Add64 | Mul64
        )
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
