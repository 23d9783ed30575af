//! The symbolic value algebra: immutable expression trees shared by
//! reference. Nodes are never mutated after construction; structural
//! equality implies semantic equality. Display canonicalization for
//! commutative operators happens at construction time so that the stored
//! operand order is already the reported one.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::script::opcode::OpCode;
use crate::symbolic::scriptnum::{
    cast_to_bool, decode_le64, decode_scriptnum, is_minimal_scriptnum,
};

/// Source position of an opcode: instruction index plus source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpPos {
    pub pc: usize,
    pub line: u32,
}

impl std::fmt::Display for OpPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:L{}", self.pc, self.line)
    }
}

/// A position an enforcement or failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Pos {
    Op(OpPos),
    End,
}

impl std::fmt::Display for Pos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pos::Op(p) => write!(f, "{p}"),
            Pos::End => f.write_str("END"),
        }
    }
}

/// Operator tag of an applied node: a script opcode, the `BOOL` cast, or a
/// transaction-field accessor with a symbolic index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpTag {
    Op(OpCode),
    Bool,
    TxField(&'static str),
}

impl OpTag {
    pub fn name(self) -> &'static str {
        match self {
            OpTag::Op(op) => op.name(),
            OpTag::Bool => "BOOL",
            OpTag::TxField(name) => name,
        }
    }

    fn is_commutative_display(self) -> bool {
        match self {
            OpTag::Op(op) => op.is_commutative_display(),
            _ => false,
        }
    }

    /// Operators whose result is already a truth value (or a 0/1 number);
    /// `CastToBool` of such a node is the node itself.
    pub fn is_boolean_natured(self) -> bool {
        use OpCode::*;
        match self {
            OpTag::Bool => true,
            OpTag::Op(op) => matches!(
                op,
                Not | NotEqual0 | Equal | EqualVerify | NumEqual | NumEqualVerify | NumNotEqual
                    | LessThan | GreaterThan | LessThanOrEqual | GreaterThanOrEqual | BoolAnd
                    | BoolOr | Within | LessThan64 | LessThanOrEqual64 | GreaterThan64
                    | GreaterThanOrEqual64 | CheckSig | CheckSigVerify | CheckSigFromStack
                    | CheckSigFromStackVerify | CheckMultisig | CheckMultisigVerify
                    | CheckLockTimeVerify | CheckSequenceVerify
            ),
            OpTag::TxField(_) => false,
        }
    }
}

#[derive(Debug)]
pub enum ValueKind {
    /// Concrete bytes, with the source position attached when
    /// `tag-data-with-position` is in effect.
    Literal {
        bytes: Vec<u8>,
        tag: Option<OpPos>,
    },
    /// A transaction witness, numbered by first appearance.
    Witness { index: usize },
    /// `$name` data placeholder.
    Placeholder { name: String },
    /// A model variable of the transaction environment, e.g. `INPUT_1_VALUE`.
    TxVar { name: String },
    /// Operator application.
    Op { tag: OpTag, args: Vec<ValueRef> },
}

pub type ValueRef = Arc<SymValue>;

#[derive(Debug)]
pub struct SymValue {
    pub kind: ValueKind,
    hash: u64,
}

impl PartialEq for SymValue {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.canonical() == other.canonical()
    }
}
impl Eq for SymValue {}

impl Hash for SymValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

fn structural_hash(kind: &ValueKind) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    let mut h = DefaultHasher::new();
    match kind {
        ValueKind::Literal { bytes, tag } => {
            0u8.hash(&mut h);
            bytes.hash(&mut h);
            tag.hash(&mut h);
        }
        ValueKind::Witness { index } => {
            1u8.hash(&mut h);
            index.hash(&mut h);
        }
        ValueKind::Placeholder { name } => {
            2u8.hash(&mut h);
            name.hash(&mut h);
        }
        ValueKind::TxVar { name } => {
            3u8.hash(&mut h);
            name.hash(&mut h);
        }
        ValueKind::Op { tag, args } => {
            4u8.hash(&mut h);
            tag.hash(&mut h);
            for a in args {
                a.hash.hash(&mut h);
            }
        }
    }
    h.finish()
}

impl SymValue {
    fn new(kind: ValueKind) -> ValueRef {
        let hash = structural_hash(&kind);
        Arc::new(SymValue { kind, hash })
    }

    pub fn literal(bytes: Vec<u8>) -> ValueRef {
        Self::new(ValueKind::Literal { bytes, tag: None })
    }

    pub fn literal_at(bytes: Vec<u8>, tag: Option<OpPos>) -> ValueRef {
        Self::new(ValueKind::Literal { bytes, tag })
    }

    pub fn number(v: i64) -> ValueRef {
        Self::literal(crate::symbolic::scriptnum::encode_scriptnum(v))
    }

    pub fn le64(v: i64) -> ValueRef {
        Self::literal(crate::symbolic::scriptnum::encode_le64(v).to_vec())
    }

    pub fn witness(index: usize) -> ValueRef {
        Self::new(ValueKind::Witness { index })
    }

    pub fn placeholder(name: impl Into<String>) -> ValueRef {
        Self::new(ValueKind::Placeholder { name: name.into() })
    }

    pub fn tx_var(name: impl Into<String>) -> ValueRef {
        Self::new(ValueKind::TxVar { name: name.into() })
    }

    /// Operator application. When the tag is commutative-for-display and
    /// deterministic argument order is requested, operands are stored sorted
    /// by their canonical rendering.
    pub fn op(tag: OpTag, mut args: Vec<ValueRef>, deterministic_order: bool) -> ValueRef {
        if deterministic_order && tag.is_commutative_display() {
            args.sort_by(|a, b| a.canonical().cmp(&b.canonical()));
        }
        Self::new(ValueKind::Op { tag, args })
    }

    /// `BOOL(v)`, folding where the cast is an identity: the canonical true
    /// literal (a script ending in an explicit `1` reports `1 @ END`) and
    /// operators that already produce a truth value (`EQUAL`, `WITHIN`,
    /// comparisons, signature checks).
    pub fn bool_of(v: &ValueRef) -> ValueRef {
        if let ValueKind::Literal { bytes, .. } = &v.kind {
            if bytes.as_slice() == [0x01] {
                return v.clone();
            }
        }
        if let ValueKind::Op { tag, .. } = &v.kind {
            if tag.is_boolean_natured() {
                return v.clone();
            }
        }
        Self::new(ValueKind::Op {
            tag: OpTag::Bool,
            args: vec![v.clone()],
        })
    }

    pub fn structural_id(&self) -> u64 {
        self.hash
    }

    /// Stable identity keying SMT variables for this value.
    pub fn smt_key(&self) -> String {
        match &self.kind {
            ValueKind::Witness { index } => format!("wit{index}"),
            ValueKind::Placeholder { name } => format!("${name}"),
            ValueKind::TxVar { name } => name.clone(),
            _ => format!("n{:016x}", self.hash),
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.kind {
            ValueKind::Literal { bytes, .. } => Some(bytes),
            _ => None,
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self.kind, ValueKind::Literal { .. })
    }

    pub fn witness_index(&self) -> Option<usize> {
        match &self.kind {
            ValueKind::Witness { index } => Some(*index),
            _ => None,
        }
    }

    pub fn as_scriptnum(&self, require_minimal: bool, max_size: usize) -> Option<i64> {
        self.as_bytes()
            .and_then(|b| decode_scriptnum(b, require_minimal, max_size).ok())
    }

    pub fn as_le64(&self) -> Option<i64> {
        self.as_bytes().and_then(decode_le64)
    }

    pub fn static_bool(&self) -> Option<bool> {
        match &self.kind {
            ValueKind::Literal { bytes, .. } => Some(cast_to_bool(bytes)),
            ValueKind::Op { tag: OpTag::Bool, args } => args[0].static_bool(),
            _ => None,
        }
    }

    pub fn op_tag(&self) -> Option<OpTag> {
        match &self.kind {
            ValueKind::Op { tag, .. } => Some(*tag),
            _ => None,
        }
    }

    pub fn op_args(&self) -> &[ValueRef] {
        match &self.kind {
            ValueKind::Op { args, .. } => args,
            _ => &[],
        }
    }

    /// Canonical rendering: no aliases, no data-reference substitution.
    /// Used for commutative-display sorting and as a fallback display.
    pub fn canonical(&self) -> String {
        let empty = RenderCtx::default();
        self.render(&empty)
    }

    pub fn render(&self, rctx: &RenderCtx) -> String {
        if let Some(name) = rctx.ref_for(self) {
            return format!("&{name}");
        }
        match &self.kind {
            ValueKind::Literal { bytes, tag } => {
                let mut out = render_literal(bytes);
                if let Some(pos) = tag {
                    out.push_str(&format!(" @ {pos}"));
                }
                out
            }
            ValueKind::Witness { index } => match rctx.aliases.get(index) {
                Some(alias) => format!("{alias}<wit{index}>"),
                None => format!("wit{index}"),
            },
            ValueKind::Placeholder { name } => format!("${name}"),
            ValueKind::TxVar { name } => name.clone(),
            ValueKind::Op { tag, args } => {
                let parts: Vec<String> = args.iter().map(|a| a.render(rctx)).collect();
                format!("{}({})", tag.name(), parts.join(", "))
            }
        }
    }
}

/// Render a literal: minimal script-numbers in decimal, everything else as
/// hex `x('..')`.
fn render_literal(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "0".to_string();
    }
    if bytes.len() <= 5 && is_minimal_scriptnum(bytes) {
        if let Ok(n) = decode_scriptnum(bytes, true, 5) {
            return n.to_string();
        }
    }
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("x('{hex}')")
}

/// Per-report display environment: witness aliases (global) and data
/// reference names (per path, keyed by node instance).
pub struct RenderCtx<'a> {
    pub aliases: std::borrow::Cow<'a, BTreeMap<usize, String>>,
    /// Keyed by `Arc` pointer so that binding a name to one pushed `1` does
    /// not relabel every other `1` in the script.
    pub refs: std::borrow::Cow<'a, BTreeMap<usize, String>>,
}

impl Default for RenderCtx<'_> {
    fn default() -> Self {
        RenderCtx {
            aliases: std::borrow::Cow::Owned(BTreeMap::new()),
            refs: std::borrow::Cow::Owned(BTreeMap::new()),
        }
    }
}

impl<'a> RenderCtx<'a> {
    pub fn new(
        aliases: &'a BTreeMap<usize, String>,
        refs: &'a BTreeMap<usize, String>,
    ) -> Self {
        RenderCtx {
            aliases: std::borrow::Cow::Borrowed(aliases),
            refs: std::borrow::Cow::Borrowed(refs),
        }
    }

    fn ref_for(&self, v: &SymValue) -> Option<&str> {
        let key = v as *const SymValue as usize;
        self.refs.get(&key).map(|s| s.as_str())
    }
}

pub fn ptr_key(v: &ValueRef) -> usize {
    Arc::as_ptr(v) as usize
}
