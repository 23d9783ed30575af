//! Lowering of symbolic values and path predicates into Z3 integer theory.
//!
//! Every value is represented by up to four integer terms: `blob` (the byte
//! content read as a little-endian unsigned integer), `size` (byte length),
//! `num` (script-number view, linked lazily), and `le64` (8-byte two's
//! complement view). Cryptographic primitives become uninterpreted functions
//! with pairwise collision-freedom axioms, 160-bit ones only under
//! `assume-no-160bit-hash-collisions`.
//!
//! The lowering is a pure function of the (immutable, shareable) value
//! graph, so racing solver workers re-lower the same query independently in
//! their own contexts.

use std::collections::HashMap;

use z3::ast::{Ast, Bool, Int};
use z3::{Context, FuncDecl, Sort};

use crate::assertions::{AssertOperand, AssertionSpec, Rel};
use crate::config::SymEnvironment;
use crate::script::opcode::OpCode;
use crate::symbolic::scriptnum::{decode_scriptnum, MAX_SCRIPT_ELEMENT_SIZE};
use crate::symbolic::state::Pred;
use crate::symbolic::value::{OpTag, SymValue, ValueKind, ValueRef};

pub const MAX_MONEY: i64 = 2_100_000_000_000_000;
const LOCKTIME_THRESHOLD: i64 = 500_000_000;
/// Sizes up to this many bytes get exact byte/number linking.
const LINK_MAX: i64 = 8;

#[derive(Clone)]
struct Cell<'ctx> {
    blob: Int<'ctx>,
    size: Int<'ctx>,
    num: Option<Int<'ctx>>,
    le64: Option<Int<'ctx>>,
}

struct HashInst<'ctx> {
    arg_blob: Int<'ctx>,
    arg_size: Int<'ctx>,
    result: Int<'ctx>,
}

/// Settings the lowering depends on, extracted so workers need no access to
/// the full environment.
#[derive(Debug, Clone)]
pub struct LowerFlags {
    pub minimaldata: bool,
    pub assume_no_160bit_hash_collisions: bool,
    pub max_num_inputs: i64,
    pub max_num_outputs: i64,
    pub max_tx_weight: i64,
}

impl LowerFlags {
    pub fn from_env(env: &SymEnvironment) -> Self {
        LowerFlags {
            minimaldata: env.effective_minimaldata(),
            assume_no_160bit_hash_collisions: env.assume_no_160bit_hash_collisions,
            max_num_inputs: env.max_num_inputs as i64,
            max_num_outputs: env.max_num_outputs as i64,
            max_tx_weight: (env.max_tx_size.saturating_mul(4)) as i64,
        }
    }
}

pub struct Lowerer<'ctx> {
    ctx: &'ctx Context,
    flags: LowerFlags,
    cells: HashMap<String, Cell<'ctx>>,
    bools: HashMap<u64, Bool<'ctx>>,
    hash_insts: HashMap<&'static str, Vec<HashInst<'ctx>>>,
    checksig_funcs: HashMap<&'static str, FuncDecl<'ctx>>,
    /// Well-formedness axioms accumulated during lowering; the backend
    /// drains and asserts them untracked.
    aux: Vec<Bool<'ctx>>,
    fresh: usize,
}

impl<'ctx> Lowerer<'ctx> {
    pub fn new(ctx: &'ctx Context, flags: LowerFlags) -> Self {
        Lowerer {
            ctx,
            flags,
            cells: HashMap::new(),
            bools: HashMap::new(),
            hash_insts: HashMap::new(),
            checksig_funcs: HashMap::new(),
            aux: Vec::new(),
            fresh: 0,
        }
    }

    pub fn drain_aux(&mut self) -> Vec<Bool<'ctx>> {
        std::mem::take(&mut self.aux)
    }

    /// Whether the value was already consulted through its numeric view in
    /// this session (drives whether model values render as numbers).
    pub fn has_num(&self, v: &ValueRef) -> bool {
        self.cells
            .get(&v.smt_key())
            .map(|cell| cell.num.is_some())
            .unwrap_or(false)
    }

    fn int(&self, v: i64) -> Int<'ctx> {
        Int::from_i64(self.ctx, v)
    }

    fn fresh_int(&mut self, prefix: &str) -> Int<'ctx> {
        self.fresh += 1;
        Int::new_const(self.ctx, format!("{prefix}!{}", self.fresh))
    }

    /// 256^k as a constant-folded term; callers keep k small (<= LINK_MAX).
    fn pow256(&self, k: i64) -> Int<'ctx> {
        self.int_pow256_static(k.max(0) as usize)
    }

    /// The symbolic count of witnesses the spending input provides.
    pub fn witness_total(&mut self) -> Int<'ctx> {
        if !self.cells.contains_key("TOTAL_WITNESSES") {
            let var = Int::new_const(self.ctx, "TOTAL_WITNESSES");
            self.aux.push(var.ge(&self.int(0)));
            let cell = Cell {
                blob: var.clone(),
                size: self.int(0),
                num: Some(var.clone()),
                le64: None,
            };
            self.cells.insert("TOTAL_WITNESSES".to_string(), cell);
        }
        self.cells["TOTAL_WITNESSES"].num.clone().expect("set above")
    }

    // ---- public views -------------------------------------------------

    pub fn blob_of(&mut self, v: &ValueRef) -> Int<'ctx> {
        self.cell(v).blob
    }

    pub fn size_of(&mut self, v: &ValueRef) -> Int<'ctx> {
        self.cell(v).size
    }

    /// Script-number view, linking byte content for sizes up to 5.
    pub fn num_of(&mut self, v: &ValueRef) -> Int<'ctx> {
        if let Some(bytes) = v.as_bytes() {
            let n = decode_scriptnum(bytes, false, 5).unwrap_or(0);
            return self.int(n);
        }
        let key = v.smt_key();
        self.cell(v);
        if let Some(num) = self.cells[&key].num.clone() {
            return num;
        }
        let num = self.fresh_int(&format!("num<{key}>"));
        let cell = self.cells.get_mut(&key).expect("cell created above");
        cell.num = Some(num.clone());
        let (blob, size) = (cell.blob.clone(), cell.size.clone());
        self.link_num(&num, &blob, &size);
        num
    }

    /// LE64 view; meaningful under a `size == 8` constraint.
    pub fn le64_of(&mut self, v: &ValueRef) -> Int<'ctx> {
        if let Some(bytes) = v.as_bytes() {
            if let Some(n) = crate::symbolic::scriptnum::decode_le64(bytes) {
                return self.int(n);
            }
        }
        let key = v.smt_key();
        self.cell(v);
        if let Some(le) = self.cells[&key].le64.clone() {
            return le;
        }
        let le = self.fresh_int(&format!("le64<{key}>"));
        let cell = self.cells.get_mut(&key).expect("cell created above");
        cell.le64 = Some(le.clone());
        let (blob, size) = (cell.blob.clone(), cell.size.clone());
        // size = 8  =>  le64 is the two's complement reading of blob.
        let half = self.pow256(7);
        let sign_bound = Int::mul(self.ctx, &[&self.int(128), &half]);
        let full = self.pow256(8);
        let negative = blob.ge(&sign_bound);
        let wrapped = Int::sub(self.ctx, &[&blob, &full]);
        let reading = negative.ite(&wrapped, &blob);
        self.aux
            .push(size._eq(&self.int(8)).implies(&le._eq(&reading)));
        le
    }

    /// Truthiness under `CastToBool`.
    pub fn bool_of(&mut self, v: &ValueRef) -> Bool<'ctx> {
        if let Some(b) = v.static_bool() {
            return Bool::from_bool(self.ctx, b);
        }
        if let Some(cached) = self.bools.get(&v.structural_id()) {
            return cached.clone();
        }
        let formula = self.bool_formula(v);
        self.bools.insert(v.structural_id(), formula.clone());
        formula
    }

    fn bool_formula(&mut self, v: &ValueRef) -> Bool<'ctx> {
        if let Some(tag) = v.op_tag() {
            if let Some(b) = self.boolean_natured(tag, v) {
                return b;
            }
        }
        // Generic data: false iff blob is zero or the negative-zero pattern.
        let blob = self.blob_of(v);
        let size = self.size_of(v);
        let mut negzero_cases: Vec<Bool<'ctx>> = Vec::new();
        for k in 1..=LINK_MAX {
            let marker = Int::mul(self.ctx, &[&self.int(128), &self.pow256(k - 1)]);
            negzero_cases.push(Bool::and(
                self.ctx,
                &[&size._eq(&self.int(k)), &blob._eq(&marker)],
            ));
        }
        let negzero_refs: Vec<&Bool> = negzero_cases.iter().collect();
        let negzero = Bool::or(self.ctx, &negzero_refs);
        Bool::and(
            self.ctx,
            &[&blob._eq(&self.int(0)).not(), &negzero.not()],
        )
    }

    /// Operators whose result is inherently a truth value.
    fn boolean_natured(&mut self, tag: OpTag, v: &ValueRef) -> Option<Bool<'ctx>> {
        use OpCode::*;
        let args = v.op_args().to_vec();
        let b = match tag {
            OpTag::Bool => self.bool_of(&args[0]),
            OpTag::Op(Not) => {
                let n = self.num_of(&args[0]);
                n._eq(&self.int(0))
            }
            OpTag::Op(NotEqual0) => {
                let n = self.num_of(&args[0]);
                n._eq(&self.int(0)).not()
            }
            OpTag::Op(Equal | EqualVerify) => {
                let (ab, asz) = (self.blob_of(&args[0]), self.size_of(&args[0]));
                let (bb, bsz) = (self.blob_of(&args[1]), self.size_of(&args[1]));
                Bool::and(self.ctx, &[&ab._eq(&bb), &asz._eq(&bsz)])
            }
            OpTag::Op(NumEqual | NumEqualVerify) => {
                let a = self.num_of(&args[0]);
                let b = self.num_of(&args[1]);
                a._eq(&b)
            }
            OpTag::Op(NumNotEqual) => {
                let a = self.num_of(&args[0]);
                let b = self.num_of(&args[1]);
                a._eq(&b).not()
            }
            OpTag::Op(LessThan) => self.num_rel(&args, Int::lt),
            OpTag::Op(GreaterThan) => self.num_rel(&args, Int::gt),
            OpTag::Op(LessThanOrEqual) => self.num_rel(&args, Int::le),
            OpTag::Op(GreaterThanOrEqual) => self.num_rel(&args, Int::ge),
            OpTag::Op(BoolAnd) => {
                let a = self.num_of(&args[0]);
                let b = self.num_of(&args[1]);
                Bool::and(
                    self.ctx,
                    &[&a._eq(&self.int(0)).not(), &b._eq(&self.int(0)).not()],
                )
            }
            OpTag::Op(BoolOr) => {
                let a = self.num_of(&args[0]);
                let b = self.num_of(&args[1]);
                Bool::or(
                    self.ctx,
                    &[&a._eq(&self.int(0)).not(), &b._eq(&self.int(0)).not()],
                )
            }
            OpTag::Op(Within) => {
                let x = self.num_of(&args[0]);
                let lo = self.num_of(&args[1]);
                let hi = self.num_of(&args[2]);
                Bool::and(self.ctx, &[&x.ge(&lo), &x.lt(&hi)])
            }
            OpTag::Op(LessThan64) => self.le64_rel(&args, Int::lt),
            OpTag::Op(LessThanOrEqual64) => self.le64_rel(&args, Int::le),
            OpTag::Op(GreaterThan64) => self.le64_rel(&args, Int::gt),
            OpTag::Op(GreaterThanOrEqual64) => self.le64_rel(&args, Int::ge),
            OpTag::Op(CheckLockTimeVerify) => self.cltv_formula(&args[0]),
            OpTag::Op(CheckSequenceVerify) => self.csv_formula(&args[0]),
            OpTag::Op(CheckSig | CheckSigFromStack | CheckMultisig) => {
                let n = self.num_of(v);
                n._eq(&self.int(1))
            }
            _ => return None,
        };
        Some(b)
    }

    fn num_rel(
        &mut self,
        args: &[ValueRef],
        rel: impl Fn(&Int<'ctx>, &Int<'ctx>) -> Bool<'ctx>,
    ) -> Bool<'ctx> {
        let a = self.num_of(&args[0]);
        let b = self.num_of(&args[1]);
        rel(&a, &b)
    }

    fn le64_rel(
        &mut self,
        args: &[ValueRef],
        rel: impl Fn(&Int<'ctx>, &Int<'ctx>) -> Bool<'ctx>,
    ) -> Bool<'ctx> {
        let a = self.le64_of(&args[0]);
        let b = self.le64_of(&args[1]);
        rel(&a, &b)
    }

    // ---- cells --------------------------------------------------------

    fn cell(&mut self, v: &ValueRef) -> Cell<'ctx> {
        let key = v.smt_key();
        if let Some(cell) = self.cells.get(&key) {
            return cell.clone();
        }
        let cell = self.build_cell(&key, v);
        self.cells.insert(key, cell.clone());
        cell
    }

    fn build_cell(&mut self, key: &str, v: &ValueRef) -> Cell<'ctx> {
        match &v.kind {
            ValueKind::Literal { bytes, .. } => Cell {
                blob: self.int_from_bytes_le(bytes),
                size: self.int(bytes.len() as i64),
                num: None,
                le64: None,
            },
            ValueKind::Witness { .. } | ValueKind::Placeholder { .. } => {
                let cell = self.data_var(key, 0, MAX_SCRIPT_ELEMENT_SIZE as i64);
                cell
            }
            ValueKind::TxVar { name } => self.tx_var_cell(key, name),
            ValueKind::Op { tag, args } => self.op_cell(key, *tag, args, v),
        }
    }

    /// A free byte-string variable with size bounds and per-size blob
    /// bounds for linked sizes.
    fn data_var(&mut self, key: &str, min_size: i64, max_size: i64) -> Cell<'ctx> {
        let blob = Int::new_const(self.ctx, format!("blob<{key}>"));
        let size = Int::new_const(self.ctx, format!("size<{key}>"));
        self.aux.push(size.ge(&self.int(min_size)));
        self.aux.push(size.le(&self.int(max_size)));
        self.aux.push(blob.ge(&self.int(0)));
        for k in 0..=LINK_MAX {
            let bound = self.pow256(k);
            self.aux
                .push(size._eq(&self.int(k)).implies(&blob.lt(&bound)));
        }
        Cell {
            blob,
            size,
            num: None,
            le64: None,
        }
    }

    fn int_from_bytes_le(&self, bytes: &[u8]) -> Int<'ctx> {
        let mut acc = self.int(0);
        for &b in bytes.iter().rev() {
            acc = Int::add(
                self.ctx,
                &[&Int::mul(self.ctx, &[&acc, &self.int(256)]), &self.int(b as i64)],
            );
        }
        acc
    }

    /// Transaction model variables, with per-field axioms.
    fn tx_var_cell(&mut self, key: &str, name: &str) -> Cell<'ctx> {
        if name == "NUM_INPUTS" || name == "NUM_OUTPUTS" {
            let max = if name == "NUM_INPUTS" {
                self.flags.max_num_inputs
            } else {
                self.flags.max_num_outputs
            };
            return self.scriptnum_var(key, 1, max);
        }
        if name == "CURRENT_INPUT_INDEX" {
            let cell = self.scriptnum_var(key, 0, self.flags.max_num_inputs - 1);
            let num_inputs = self.num_of(&SymValue::tx_var("NUM_INPUTS"));
            let idx = cell.num.clone().expect("scriptnum var has num");
            self.aux.push(idx.lt(&num_inputs));
            return cell;
        }
        if name == "TX_WEIGHT" {
            return self.scriptnum_var(key, 1, self.flags.max_tx_weight);
        }
        if name == "TX_VERSION" || name == "TX_LOCKTIME" {
            return self.le32_var(key);
        }
        if name.ends_with("_SEQUENCE") || name.ends_with("_OUTPOINT_PREVOUT_N") {
            return self.le32_var(key);
        }
        if name.ends_with("_OUTPOINT_FLAG") {
            let cell = self.data_var(key, 1, 1);
            let blob = cell.blob.clone();
            self.aux.push(blob.le(&self.int(1)));
            return cell;
        }
        if name.ends_with("_PREFIX") {
            let cell = self.data_var(key, 1, 1);
            let blob = cell.blob.clone();
            let domain: &[i64] = if name.contains("ASSET") {
                &[1, 10, 11]
            } else {
                &[1, 8, 9]
            };
            let cases: Vec<Bool> = domain.iter().map(|d| blob._eq(&self.int(*d))).collect();
            let refs: Vec<&Bool> = cases.iter().collect();
            self.aux.push(Bool::or(self.ctx, &refs));
            return cell;
        }
        if name.ends_with("_VALUE") || name.ends_with("_AMOUNT") {
            let cell = self.data_var(key, 8, 33);
            let size = cell.size.clone();
            self.aux.push(Bool::or(
                self.ctx,
                &[&size._eq(&self.int(8)), &size._eq(&self.int(33))],
            ));
            return cell;
        }
        if name.ends_with("_ASSET")
            || name.ends_with("_OUTPOINT_HASH")
            || name.ends_with("_ASSETENTROPY")
        {
            return self.data_var(key, 32, 32);
        }
        if name.ends_with("_ASSETBLINDINGNONCE") || name.ends_with("_NONCE") {
            let cell = self.data_var(key, 0, 33);
            let size = cell.size.clone();
            self.aux.push(Bool::or(
                self.ctx,
                &[
                    &size._eq(&self.int(0)),
                    &size._eq(&self.int(32)),
                    &size._eq(&self.int(33)),
                ],
            ));
            return cell;
        }
        if name.ends_with("_SPK_WITVER") {
            return self.scriptnum_var(key, -1, 16);
        }
        if name.ends_with("_SPK_WITPROG") {
            return self.data_var(key, 2, 40);
        }
        // Unknown model variable: free data.
        self.data_var(key, 0, MAX_SCRIPT_ELEMENT_SIZE as i64)
    }

    /// A variable that always carries a canonically encoded script-number in
    /// the given inclusive range.
    fn scriptnum_var(&mut self, key: &str, lo: i64, hi: i64) -> Cell<'ctx> {
        let blob = Int::new_const(self.ctx, format!("blob<{key}>"));
        let size = Int::new_const(self.ctx, format!("size<{key}>"));
        let num = Int::new_const(self.ctx, format!("num<{key}>"));
        self.aux.push(num.ge(&self.int(lo)));
        self.aux.push(num.le(&self.int(hi)));
        let canonical = self.canonical_encoding(&num, &blob, &size);
        self.aux.push(canonical);
        Cell {
            blob,
            size,
            num: Some(num),
            le64: None,
        }
    }

    fn le32_var(&mut self, key: &str) -> Cell<'ctx> {
        let cell = self.data_var(key, 4, 4);
        cell
    }

    /// Link a free `num` to `blob`/`size` for sizes 0..=5 (sign-magnitude,
    /// little-endian, sign in the top bit of the last byte).
    fn link_num(&mut self, num: &Int<'ctx>, blob: &Int<'ctx>, size: &Int<'ctx>) {
        self.aux
            .push(size._eq(&self.int(0)).implies(&num._eq(&self.int(0))));
        for k in 1..=5 {
            let marker = Int::mul(self.ctx, &[&self.int(128), &self.pow256(k - 1)]);
            let negative = blob.ge(&marker);
            let magnitude = Int::sub(self.ctx, &[blob, &marker]);
            let reading = negative.ite(&magnitude.unary_minus(), blob);
            self.aux
                .push(size._eq(&self.int(k)).implies(&num._eq(&reading)));
        }
    }

    /// `blob`/`size` are exactly the minimal encoding of `num`.
    fn canonical_encoding(
        &mut self,
        num: &Int<'ctx>,
        blob: &Int<'ctx>,
        size: &Int<'ctx>,
    ) -> Bool<'ctx> {
        let zero_case = Bool::and(
            self.ctx,
            &[
                &num._eq(&self.int(0)),
                &blob._eq(&self.int(0)),
                &size._eq(&self.int(0)),
            ],
        );
        let mut cases = vec![zero_case];
        let mut lo: i64 = 1;
        for k in 1..=5i64 {
            // Magnitude band for a k-byte minimal encoding.
            let hi = (1i64 << (8 * k - 1)) - 1;
            let marker = Int::mul(self.ctx, &[&self.int(128), &self.pow256(k - 1)]);
            let magnitude = num.ge(&self.int(0)).ite(num, &num.unary_minus());
            let in_band = Bool::and(
                self.ctx,
                &[&magnitude.ge(&self.int(lo)), &magnitude.le(&self.int(hi))],
            );
            let enc = num
                .ge(&self.int(0))
                .ite(&magnitude, &Int::add(self.ctx, &[&magnitude, &marker]));
            cases.push(Bool::and(
                self.ctx,
                &[&in_band, &size._eq(&self.int(k)), &blob._eq(&enc)],
            ));
            lo = hi + 1;
        }
        let refs: Vec<&Bool> = cases.iter().collect();
        Bool::or(self.ctx, &refs)
    }

    // ---- operator cells ----------------------------------------------

    fn op_cell(&mut self, key: &str, tag: OpTag, args: &[ValueRef], v: &ValueRef) -> Cell<'ctx> {
        use OpCode::*;
        match tag {
            // Numeric results carry canonically encoded bytes.
            OpTag::Op(Add) => self.numeric_cell(key, |l| {
                let a = l.num_of(&args[0]);
                let b = l.num_of(&args[1]);
                Int::add(l.ctx, &[&a, &b])
            }),
            OpTag::Op(Sub) => self.numeric_cell(key, |l| {
                let a = l.num_of(&args[0]);
                let b = l.num_of(&args[1]);
                Int::sub(l.ctx, &[&a, &b])
            }),
            OpTag::Op(Add1) => self.numeric_cell(key, |l| {
                let a = l.num_of(&args[0]);
                Int::add(l.ctx, &[&a, &Int::from_i64(l.ctx, 1)])
            }),
            OpTag::Op(Sub1) => self.numeric_cell(key, |l| {
                let a = l.num_of(&args[0]);
                Int::sub(l.ctx, &[&a, &Int::from_i64(l.ctx, 1)])
            }),
            OpTag::Op(Negate) => self.numeric_cell(key, |l| l.num_of(&args[0]).unary_minus()),
            OpTag::Op(Abs) => self.numeric_cell(key, |l| {
                let a = l.num_of(&args[0]);
                a.ge(&Int::from_i64(l.ctx, 0)).ite(&a, &a.unary_minus())
            }),
            OpTag::Op(Min) => self.numeric_cell(key, |l| {
                let a = l.num_of(&args[0]);
                let b = l.num_of(&args[1]);
                a.le(&b).ite(&a, &b)
            }),
            OpTag::Op(Max) => self.numeric_cell(key, |l| {
                let a = l.num_of(&args[0]);
                let b = l.num_of(&args[1]);
                a.ge(&b).ite(&a, &b)
            }),
            OpTag::Op(Size) => self.numeric_cell(key, |l| l.size_of(&args[0])),
            OpTag::TxField("DEPTH") => self.numeric_cell(key, |l| {
                let offset = l.num_of(&args[0]);
                let total = l.witness_total();
                Int::add(l.ctx, &[&total, &offset])
            }),
            OpTag::Op(Le64ToScriptNum) => self.numeric_cell(key, |l| l.le64_of(&args[0])),
            OpTag::Op(CheckSigAdd) => {
                let bit = self.checksig_bit("bsst_checksig", &[&args[0], &args[2]]);
                let sig_size = self.size_of(&args[0]);
                self.aux.push(
                    bit._eq(&self.int(0))
                        .implies(&sig_size._eq(&self.int(0))),
                );
                self.numeric_cell(key, move |l| {
                    let n = l.num_of(&args[1]);
                    Int::add(l.ctx, &[&n, &bit])
                })
            }
            OpTag::Op(CheckSig) => {
                let bit = self.checksig_bit("bsst_checksig", &[&args[0], &args[1]]);
                self.numeric_cell(key, move |_| bit)
            }
            OpTag::Op(CheckSigFromStack) => {
                let bit =
                    self.checksig_bit("bsst_checksigfromstack", &[&args[0], &args[1], &args[2]]);
                self.numeric_cell(key, move |_| bit)
            }
            OpTag::Op(CheckMultisig) => {
                let bit = self.fresh_int(&format!("multisig<{key}>"));
                self.aux.push(bit.ge(&self.int(0)));
                self.aux.push(bit.le(&self.int(1)));
                self.numeric_cell(key, move |_| bit)
            }
            // Boolean-natured operators materialize as 0/1 numbers.
            OpTag::Bool
            | OpTag::Op(
                Not | NotEqual0 | Equal | EqualVerify | NumEqual | NumEqualVerify | NumNotEqual
                | LessThan | GreaterThan | LessThanOrEqual | GreaterThanOrEqual | BoolAnd
                | BoolOr | Within | LessThan64 | LessThanOrEqual64 | GreaterThan64
                | GreaterThanOrEqual64 | CheckLockTimeVerify | CheckSequenceVerify,
            ) => {
                let b = self.bool_of(v);
                self.numeric_cell(key, move |l| {
                    b.ite(&Int::from_i64(l.ctx, 1), &Int::from_i64(l.ctx, 0))
                })
            }
            OpTag::Op(Sha256 | Hash256) => self.hash_cell(key, tag.name(), &args[0], 32, true),
            OpTag::Op(Sha1 | Ripemd160 | Hash160) => {
                let strong = self.flags.assume_no_160bit_hash_collisions;
                self.hash_cell(key, tag.name(), &args[0], 20, strong)
            }
            OpTag::Op(Sha256Initialize) => self.hash_cell(key, tag.name(), &args[0], 32, true),
            OpTag::Op(Sha256Update | Sha256Finalize) => {
                // Chain node: UF over (context blob, data blob, data size).
                let cblob = self.blob_of(&args[0]);
                let dblob = self.blob_of(&args[1]);
                let dsize = self.size_of(&args[1]);
                let f = self.stream_hash_func(tag.name());
                let result = f
                    .apply(&[&cblob, &dblob, &dsize])
                    .as_int()
                    .expect("int-sorted uf");
                self.aux.push(result.ge(&self.int(0)));
                Cell {
                    blob: result,
                    size: self.int(32),
                    num: None,
                    le64: None,
                }
            }
            OpTag::Op(Cat) => self.cat_cell(key, &args[0], &args[1]),
            OpTag::Op(Add64) => self.le64_cell(key, |l| {
                let a = l.le64_of(&args[0]);
                let b = l.le64_of(&args[1]);
                Int::add(l.ctx, &[&a, &b])
            }),
            OpTag::Op(Sub64) => self.le64_cell(key, |l| {
                let a = l.le64_of(&args[0]);
                let b = l.le64_of(&args[1]);
                Int::sub(l.ctx, &[&a, &b])
            }),
            OpTag::Op(Mul64) => self.le64_cell(key, |l| {
                let a = l.le64_of(&args[0]);
                let b = l.le64_of(&args[1]);
                Int::mul(l.ctx, &[&a, &b])
            }),
            OpTag::Op(Div64) => self.le64_cell(key, |l| {
                let a = l.le64_of(&args[0]);
                let b = l.le64_of(&args[1]);
                let zero = Int::from_i64(l.ctx, 0);
                b._eq(&zero).ite(&zero, &a.div(&b))
            }),
            OpTag::TxField("REM64") => self.le64_cell(key, |l| {
                let a = l.le64_of(&args[0]);
                let b = l.le64_of(&args[1]);
                let zero = Int::from_i64(l.ctx, 0);
                b._eq(&zero).ite(&zero, &a.rem(&b))
            }),
            OpTag::Op(Neg64) => self.le64_cell(key, |l| l.le64_of(&args[0]).unary_minus()),
            OpTag::Op(ScriptNumToLe64) => self.le64_cell(key, |l| l.num_of(&args[0])),
            OpTag::Op(Le32ToLe64) => self.le64_cell(key, |l| l.blob_of(&args[0])),
            OpTag::TxField(field) => self.tx_field_cell(key, field, &args[0]),
            _ => {
                // Remaining byte-level operators (SUBSTR family, bitwise,
                // shifts) keep partial size relations and a free blob.
                self.byte_op_cell(key, tag, args)
            }
        }
    }

    /// Numeric-natured cell: the number is primary; bytes follow the
    /// canonical encoding.
    fn numeric_cell(
        &mut self,
        key: &str,
        define: impl FnOnce(&mut Self) -> Int<'ctx>,
    ) -> Cell<'ctx> {
        let num = define(self);
        let blob = Int::new_const(self.ctx, format!("blob<{key}>"));
        let size = Int::new_const(self.ctx, format!("size<{key}>"));
        let canonical = self.canonical_encoding(&num, &blob, &size);
        self.aux.push(canonical);
        Cell {
            blob,
            size,
            num: Some(num),
            le64: None,
        }
    }

    /// LE64-natured cell: the 64-bit number is primary; byte content is the
    /// 8-byte two's complement encoding (meaningful while in bounds).
    fn le64_cell(
        &mut self,
        key: &str,
        define: impl FnOnce(&mut Self) -> Int<'ctx>,
    ) -> Cell<'ctx> {
        let raw = define(self);
        let blob = Int::new_const(self.ctx, format!("blob<{key}>"));
        let size = self.int(8);
        let full = self.pow256(8);
        let encoded = raw
            .ge(&self.int(0))
            .ite(&raw, &Int::add(self.ctx, &[&raw, &full]));
        self.aux.push(blob._eq(&encoded));
        Cell {
            blob,
            size,
            num: Some(raw.clone()),
            le64: Some(raw),
        }
    }

    fn hash_cell(
        &mut self,
        key: &str,
        tag_name: &'static str,
        arg: &ValueRef,
        out_size: i64,
        collision_free: bool,
    ) -> Cell<'ctx> {
        let arg_blob = self.blob_of(arg);
        let arg_size = self.size_of(arg);
        let f = self.stream_hash_func(tag_name);
        let result = f
            .apply(&[&arg_blob, &arg_size, &self.int(0)])
            .as_int()
            .expect("int-sorted uf");
        self.aux.push(result.ge(&self.int(0)));
        if collision_free {
            let prior = self.hash_insts.entry(tag_name).or_default();
            let prior_snapshot: Vec<(Int, Int, Int)> = prior
                .iter()
                .map(|inst| (inst.arg_blob.clone(), inst.arg_size.clone(), inst.result.clone()))
                .collect();
            prior.push(HashInst {
                arg_blob: arg_blob.clone(),
                arg_size: arg_size.clone(),
                result: result.clone(),
            });
            for (pb, ps, pr) in prior_snapshot {
                let same_result = result._eq(&pr);
                let same_args =
                    Bool::and(self.ctx, &[&arg_blob._eq(&pb), &arg_size._eq(&ps)]);
                self.aux.push(same_result.implies(&same_args));
            }
        }
        Cell {
            blob: result,
            size: self.int(out_size),
            num: None,
            le64: None,
        }
    }

    fn stream_hash_func(&mut self, name: &'static str) -> FuncDecl<'ctx> {
        let int_sort = Sort::int(self.ctx);
        FuncDecl::new(
            self.ctx,
            format!("bsst_hash_{name}"),
            &[&int_sort, &int_sort, &int_sort],
            &int_sort,
        )
    }

    /// A 0/1 uninterpreted check over the (blob, size) pairs of its inputs.
    fn checksig_bit(&mut self, func: &'static str, args: &[&ValueRef]) -> Int<'ctx> {
        let int_sort = Sort::int(self.ctx);
        let arity = args.len() * 2;
        if !self.checksig_funcs.contains_key(func) {
            let domain: Vec<Sort> = (0..arity).map(|_| Sort::int(self.ctx)).collect();
            let domain_refs: Vec<&Sort> = domain.iter().collect();
            let decl = FuncDecl::new(self.ctx, func, &domain_refs, &int_sort);
            self.checksig_funcs.insert(func, decl);
        }
        let mut terms: Vec<Int<'ctx>> = Vec::with_capacity(arity);
        for a in args {
            terms.push(self.blob_of(a));
            terms.push(self.size_of(a));
        }
        let term_refs: Vec<&dyn Ast<'ctx>> = terms.iter().map(|t| t as &dyn Ast<'ctx>).collect();
        let decl = &self.checksig_funcs[func];
        let bit = decl.apply(&term_refs).as_int().expect("int-sorted uf");
        self.aux.push(bit.ge(&self.int(0)));
        self.aux.push(bit.le(&self.int(1)));
        bit
    }

    fn cat_cell(&mut self, key: &str, a: &ValueRef, b: &ValueRef) -> Cell<'ctx> {
        let (ab, asz) = (self.blob_of(a), self.size_of(a));
        let (bb, bsz) = (self.blob_of(b), self.size_of(b));
        let size = Int::add(self.ctx, &[&asz, &bsz]);
        let blob = Int::new_const(self.ctx, format!("blob<{key}>"));
        self.aux.push(blob.ge(&self.int(0)));
        if let Some(bytes) = a.as_bytes() {
            let shift = self.int_pow256_static(bytes.len());
            let composed = Int::add(self.ctx, &[&ab, &Int::mul(self.ctx, &[&bb, &shift])]);
            self.aux.push(blob._eq(&composed));
        } else {
            for k in 0..=LINK_MAX {
                let shift = self.pow256(k);
                let composed = Int::add(self.ctx, &[&ab, &Int::mul(self.ctx, &[&bb, &shift])]);
                self.aux
                    .push(asz._eq(&self.int(k)).implies(&blob._eq(&composed)));
            }
        }
        Cell {
            blob,
            size,
            num: None,
            le64: None,
        }
    }

    fn int_pow256_static(&self, k: usize) -> Int<'ctx> {
        let mut acc = self.int(1);
        for _ in 0..k {
            acc = Int::mul(self.ctx, &[&acc, &self.int(256)]);
        }
        acc
    }

    /// Dynamic transaction field: free variable bridged to the per-index
    /// named variables so `INPUT_SEQUENCE(x)` with `x = 1` coincides with
    /// `INPUT_1_SEQUENCE`.
    fn tx_field_cell(&mut self, key: &str, field: &'static str, idx: &ValueRef) -> Cell<'ctx> {
        let (kind, bound) = if field.starts_with("OUTPUT_") {
            ("OUTPUT", self.flags.max_num_outputs)
        } else {
            ("INPUT", self.flags.max_num_inputs)
        };
        let suffix = field
            .strip_prefix("INPUT_")
            .or_else(|| field.strip_prefix("OUTPUT_"))
            .unwrap_or(field);
        // Same per-field axioms as the statically indexed variable.
        let cell = self.tx_var_cell(key, field);
        let idx_num = self.num_of(idx);
        for i in 0..bound {
            let named = SymValue::tx_var(format!("{kind}_{i}_{suffix}"));
            let named_cell = self.cell(&named);
            let selected = idx_num._eq(&self.int(i));
            let blob_eq = cell.blob._eq(&named_cell.blob);
            let size_eq = cell.size._eq(&named_cell.size);
            self.aux
                .push(selected.implies(&Bool::and(self.ctx, &[&blob_eq, &size_eq])));
        }
        cell
    }

    /// SUBSTR/LEFT/RIGHT, bitwise pairs and shifts: size relations are kept
    /// exact where cheap; byte content beyond the linked sizes stays free.
    fn byte_op_cell(&mut self, key: &str, tag: OpTag, args: &[ValueRef]) -> Cell<'ctx> {
        use OpCode::*;
        let blob = Int::new_const(self.ctx, format!("blob<{key}>"));
        let size = Int::new_const(self.ctx, format!("size<{key}>"));
        self.aux.push(blob.ge(&self.int(0)));
        self.aux.push(size.ge(&self.int(0)));
        self.aux
            .push(size.le(&self.int(MAX_SCRIPT_ELEMENT_SIZE as i64)));
        match tag {
            OpTag::Op(Invert) => {
                let asz = self.size_of(&args[0]);
                self.aux.push(size._eq(&asz));
            }
            OpTag::Op(And | Or | Xor) => {
                let asz = self.size_of(&args[0]);
                self.aux.push(size._eq(&asz));
                if matches!(tag, OpTag::Op(Xor)) {
                    // x XOR x == zero bytes.
                    let ab = self.blob_of(&args[0]);
                    let bb = self.blob_of(&args[1]);
                    self.aux.push(ab._eq(&bb).implies(&blob._eq(&self.int(0))));
                }
            }
            OpTag::Op(Left) => {
                let n = self.num_of(&args[1]);
                self.aux.push(size._eq(&n));
            }
            OpTag::Op(Right) => {
                let asz = self.size_of(&args[0]);
                let n = self.num_of(&args[1]);
                self.aux.push(size._eq(&Int::sub(self.ctx, &[&asz, &n])));
            }
            OpTag::Op(Substr) => {
                let n = self.num_of(&args[2]);
                self.aux.push(size._eq(&n));
            }
            OpTag::Op(LShift | RShift) => {
                // Numeric relation on the little-endian reading where the
                // shift amount is statically known and small.
                if let Some(k) = args[1].as_scriptnum(false, 5) {
                    if (0..=62).contains(&k) {
                        let factor = self.int(1i64 << k);
                        let ab = self.blob_of(&args[0]);
                        if matches!(tag, OpTag::Op(LShift)) {
                            self.aux
                                .push(blob._eq(&Int::mul(self.ctx, &[&ab, &factor])));
                        } else {
                            self.aux.push(blob._eq(&ab.div(&factor)));
                        }
                    }
                }
            }
            _ => {}
        }
        Cell {
            blob,
            size,
            num: None,
            le64: None,
        }
    }

    // ---- timelocks ----------------------------------------------------

    fn cltv_formula(&mut self, arg: &ValueRef) -> Bool<'ctx> {
        let type_match = self.pred(&Pred::LocktimeTypeMatch(arg.clone()));
        let in_effect = self.pred(&Pred::LocktimeInEffect(arg.clone()));
        let not_final = self.pred(&Pred::SequenceNotFinal);
        Bool::and(self.ctx, &[&type_match, &in_effect, &not_final])
    }

    fn csv_formula(&mut self, arg: &ValueRef) -> Bool<'ctx> {
        let version = self.pred(&Pred::TxVersionAtLeast2);
        let type_match = self.pred(&Pred::NSequenceTypeMatch(arg.clone()));
        let in_effect = self.pred(&Pred::NSequenceInEffect(arg.clone()));
        Bool::and(self.ctx, &[&version, &type_match, &in_effect])
    }

    fn current_input_sequence(&mut self) -> Int<'ctx> {
        let node = SymValue::op(
            OpTag::TxField("INPUT_SEQUENCE"),
            vec![SymValue::tx_var("CURRENT_INPUT_INDEX")],
            false,
        );
        self.blob_of(&node)
    }

    // ---- predicates ---------------------------------------------------

    pub fn pred(&mut self, p: &Pred) -> Bool<'ctx> {
        match p {
            Pred::IsTrue(v) => self.bool_of(v),
            Pred::IsFalse(v) => self.bool_of(v).not(),
            Pred::NumEq(v, k) => {
                let n = self.num_of(v);
                n._eq(&self.int(*k))
            }
            Pred::NumInRange(v, lo, hi) => {
                let n = self.num_of(v);
                Bool::and(self.ctx, &[&n.ge(&self.int(*lo)), &n.le(&self.int(*hi))])
            }
            Pred::SizeEq(v, k) => {
                let s = self.size_of(v);
                s._eq(&self.int(*k))
            }
            Pred::SizeLe(v, k) => {
                let s = self.size_of(v);
                s.le(&self.int(*k))
            }
            Pred::SizesEqual(a, b) => {
                let sa = self.size_of(a);
                let sb = self.size_of(b);
                sa._eq(&sb)
            }
            Pred::ValidScriptnum(v) => {
                let _ = self.num_of(v);
                let s = self.size_of(v);
                s.le(&self.int(4))
            }
            Pred::MinimalEncoding(v) => {
                let num = self.num_of(v);
                let blob = self.blob_of(v);
                let size = self.size_of(v);
                self.canonical_encoding(&num, &blob, &size)
            }
            Pred::Int64InBounds(v) => {
                let raw = self.le64_of(v);
                let min = self.int(i64::MIN);
                let max = self.int(i64::MAX);
                Bool::and(self.ctx, &[&raw.ge(&min), &raw.le(&max)])
            }
            Pred::Int64OutOfBounds(v) => self.pred(&Pred::Int64InBounds(v.clone())).not(),
            Pred::NullfailImplies { result, sig } => {
                let ok = self.bool_of(result);
                let sig_size = self.size_of(sig);
                ok.not().implies(&sig_size._eq(&self.int(0)))
            }
            Pred::MinimalIf(v) => {
                let blob = self.blob_of(v);
                let size = self.size_of(v);
                let empty = Bool::and(
                    self.ctx,
                    &[&size._eq(&self.int(0)), &blob._eq(&self.int(0))],
                );
                let one = Bool::and(
                    self.ctx,
                    &[&size._eq(&self.int(1)), &blob._eq(&self.int(1))],
                );
                Bool::or(self.ctx, &[&empty, &one])
            }
            Pred::LocktimeTypeMatch(arg) => {
                let n = self.num_of(arg);
                let locktime = self.blob_of(&SymValue::tx_var("TX_LOCKTIME"));
                let threshold = self.int(LOCKTIME_THRESHOLD);
                let arg_is_time = n.ge(&threshold);
                let lock_is_time = locktime.ge(&threshold);
                arg_is_time._eq(&lock_is_time)
            }
            Pred::LocktimeInEffect(arg) => {
                let n = self.num_of(arg);
                let locktime = self.blob_of(&SymValue::tx_var("TX_LOCKTIME"));
                n.le(&locktime)
            }
            Pred::SequenceNotFinal => {
                let seq = self.current_input_sequence();
                seq._eq(&self.int(0xffff_ffff)).not()
            }
            Pred::NSequenceTypeMatch(arg) => {
                let n = self.num_of(arg);
                let seq = self.current_input_sequence();
                let type_flag = self.int(1 << 22);
                let arg_type = n.div(&type_flag).rem(&self.int(2));
                let seq_type = seq.div(&type_flag).rem(&self.int(2));
                arg_type._eq(&seq_type)
            }
            Pred::NSequenceInEffect(arg) => {
                let n = self.num_of(arg);
                let seq = self.current_input_sequence();
                let mask = self.int(0x1_0000);
                let disable = self.int(1i64 << 31);
                let not_disabled = seq.div(&disable).rem(&self.int(2))._eq(&self.int(0));
                let masked_arg = n.rem(&mask);
                let masked_seq = seq.rem(&mask);
                Bool::and(self.ctx, &[&not_disabled, &masked_arg.le(&masked_seq)])
            }
            Pred::TxVersionAtLeast2 => {
                let version = self.blob_of(&SymValue::tx_var("TX_VERSION"));
                Bool::and(
                    self.ctx,
                    &[&version.ge(&self.int(2)), &version.le(&self.int(0x7fff_ffff))],
                )
            }
            Pred::MoneyRange(v) => {
                let size = self.size_of(v);
                let amount = self.le64_of(v);
                let in_range = Bool::and(
                    self.ctx,
                    &[&amount.ge(&self.int(0)), &amount.le(&self.int(MAX_MONEY))],
                );
                size._eq(&self.int(8)).implies(&in_range)
            }
            Pred::TotalWitnesses { count, exact } => {
                let total = self.witness_total();
                if *exact {
                    total._eq(&self.int(*count))
                } else {
                    total.ge(&self.int(*count))
                }
            }
            Pred::User {
                target,
                spec,
                negate,
            } => {
                let formula = self.user_spec(target, spec);
                if *negate {
                    formula.not()
                } else {
                    formula
                }
            }
        }
    }

    fn rel_formula(&self, rel: Rel, lhs: &Int<'ctx>, rhs: &Int<'ctx>) -> Bool<'ctx> {
        match rel {
            Rel::Eq => lhs._eq(rhs),
            Rel::Ne => lhs._eq(rhs).not(),
            Rel::Gt => lhs.gt(rhs),
            Rel::Lt => lhs.lt(rhs),
            Rel::Ge => lhs.ge(rhs),
            Rel::Le => lhs.le(rhs),
        }
    }

    /// One assert/assume spec: OR of its terms. Script-number terms force
    /// the canonical encoding of the target; LE64 terms force size 8; byte
    /// terms compare content directly. Byte operands inside a
    /// script-number-kind spec reinterpret as numbers and drop when they are
    /// not valid minimal encodings.
    fn user_spec(&mut self, target: &ValueRef, spec: &AssertionSpec) -> Bool<'ctx> {
        let mut alternatives: Vec<Bool<'ctx>> = Vec::new();
        let mut num_rels: Vec<Bool<'ctx>> = Vec::new();
        let mut le64_rels: Vec<Bool<'ctx>> = Vec::new();
        let numeric_kind = spec.uses_scriptnum();

        for term in &spec.terms {
            if spec.is_size {
                let size = self.size_of(target);
                match &term.operand {
                    AssertOperand::Num(n) => {
                        let formula = self.rel_formula(term.rel, &size, &self.int(*n));
                        alternatives.push(formula);
                    }
                    AssertOperand::NumRange(a, b) => {
                        let formula = Bool::and(
                            self.ctx,
                            &[&size.ge(&self.int(*a)), &size.le(&self.int(*b))],
                        );
                        alternatives.push(formula);
                    }
                    _ => {}
                }
                continue;
            }
            match &term.operand {
                AssertOperand::Num(n) => {
                    let num = self.num_of(target);
                    num_rels.push(self.rel_formula(term.rel, &num, &self.int(*n)));
                }
                AssertOperand::NumRange(a, b) => {
                    let num = self.num_of(target);
                    num_rels.push(Bool::and(
                        self.ctx,
                        &[&num.ge(&self.int(*a)), &num.le(&self.int(*b))],
                    ));
                }
                AssertOperand::Le64(n) => {
                    let le = self.le64_of(target);
                    le64_rels.push(self.rel_formula(term.rel, &le, &self.int(*n)));
                }
                AssertOperand::Le64Range(a, b) => {
                    let le = self.le64_of(target);
                    le64_rels.push(Bool::and(
                        self.ctx,
                        &[&le.ge(&self.int(*a)), &le.le(&self.int(*b))],
                    ));
                }
                AssertOperand::Bytes(bytes) => {
                    if numeric_kind {
                        match decode_scriptnum(bytes, true, 5) {
                            Ok(n) => {
                                let num = self.num_of(target);
                                num_rels.push(self.rel_formula(term.rel, &num, &self.int(n)));
                            }
                            Err(_) => continue,
                        }
                    } else {
                        let blob = self.blob_of(target);
                        let size = self.size_of(target);
                        let lit_blob = self.int_from_bytes_le(bytes);
                        let matches = Bool::and(
                            self.ctx,
                            &[
                                &blob._eq(&lit_blob),
                                &size._eq(&self.int(bytes.len() as i64)),
                            ],
                        );
                        alternatives.push(match term.rel {
                            Rel::Ne => matches.not(),
                            _ => matches,
                        });
                    }
                }
            }
        }

        if !num_rels.is_empty() {
            let refs: Vec<&Bool> = num_rels.iter().collect();
            let ored = Bool::or(self.ctx, &refs);
            let num = self.num_of(target);
            let blob = self.blob_of(target);
            let size = self.size_of(target);
            let canonical = self.canonical_encoding(&num, &blob, &size);
            alternatives.push(Bool::and(self.ctx, &[&canonical, &ored]));
        }
        if !le64_rels.is_empty() {
            let refs: Vec<&Bool> = le64_rels.iter().collect();
            let ored = Bool::or(self.ctx, &refs);
            let size = self.size_of(target);
            alternatives.push(Bool::and(self.ctx, &[&size._eq(&self.int(8)), &ored]));
        }
        if alternatives.is_empty() {
            return Bool::from_bool(self.ctx, true);
        }
        let refs: Vec<&Bool> = alternatives.iter().collect();
        Bool::or(self.ctx, &refs)
    }
}
