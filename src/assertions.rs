//! User-supplied constraint expressions: `bsst-assert`, `bsst-assert-size`,
//! `bsst-assume`, `bsst-assume-size`. One comment line yields one spec whose
//! whitespace-separated terms are joined by OR; adjacent specs on the same
//! target accumulate as AND.

use crate::error::{BsstError, Result};
use crate::symbolic::scriptnum::{decode_scriptnum, encode_le64, encode_scriptnum};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssertTarget {
    /// Top of the stack at the comment's program point.
    Top,
    Wit(usize),
    Ref(String),
    Placeholder(String),
}

impl std::fmt::Display for AssertTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssertTarget::Top => f.write_str("(top)"),
            AssertTarget::Wit(i) => write!(f, "wit{i}"),
            AssertTarget::Ref(name) => write!(f, "&{name}"),
            AssertTarget::Placeholder(name) => write!(f, "${name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rel {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssertOperand {
    Num(i64),
    Le64(i64),
    Bytes(Vec<u8>),
    NumRange(i64, i64),
    Le64Range(i64, i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertTerm {
    pub rel: Rel,
    pub operand: AssertOperand,
}

/// One `bsst-assert[-size]` / `bsst-assume[-size]` comment line.
#[derive(Debug, Clone)]
pub struct AssertionSpec {
    pub line: u32,
    pub target: AssertTarget,
    pub is_size: bool,
    /// OR-joined terms.
    pub terms: Vec<AssertTerm>,
    pub is_assumption: bool,
}

impl AssertionSpec {
    /// `true` if any term involves an LE64 operand; such a spec also pins the
    /// target's size to 8.
    pub fn uses_le64(&self) -> bool {
        self.terms.iter().any(|t| {
            matches!(
                t.operand,
                AssertOperand::Le64(_) | AssertOperand::Le64Range(..)
            )
        })
    }

    pub fn uses_scriptnum(&self) -> bool {
        self.terms.iter().any(|t| {
            matches!(t.operand, AssertOperand::Num(_) | AssertOperand::NumRange(..))
        })
    }

    pub fn failure_code(&self) -> String {
        if self.is_assumption {
            format!("check_assumption_at_line_{}", self.line)
        } else {
            format!("check_assertion_at_line_{}", self.line)
        }
    }
}

fn parse_rel(term: &str) -> (Rel, &str) {
    if let Some(rest) = term.strip_prefix(">=") {
        (Rel::Ge, rest)
    } else if let Some(rest) = term.strip_prefix("<=") {
        (Rel::Le, rest)
    } else if let Some(rest) = term.strip_prefix("!=") {
        (Rel::Ne, rest)
    } else if let Some(rest) = term.strip_prefix('=') {
        (Rel::Eq, rest)
    } else if let Some(rest) = term.strip_prefix('>') {
        (Rel::Gt, rest)
    } else if let Some(rest) = term.strip_prefix('<') {
        (Rel::Lt, rest)
    } else {
        (Rel::Eq, term)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Scalar {
    Num(i64),
    Le64(i64),
    Bytes(Vec<u8>),
}

fn parse_scalar(line: u32, raw: &str) -> Result<Scalar> {
    if let Some(inner) = raw.strip_prefix("le64(").and_then(|s| s.strip_suffix(')')) {
        let v: i64 = inner
            .parse()
            .map_err(|_| BsstError::parse(line, format!("bad le64 literal `{raw}`")))?;
        return Ok(Scalar::Le64(v));
    }
    if let Some(inner) = raw.strip_prefix("x('").and_then(|s| s.strip_suffix("')")) {
        return hex_bytes(line, inner).map(Scalar::Bytes);
    }
    if let Some(inner) = raw.strip_prefix("0x") {
        return hex_bytes(line, inner).map(Scalar::Bytes);
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return Ok(Scalar::Bytes(raw[1..raw.len() - 1].as_bytes().to_vec()));
    }
    if raw.chars().next().map(|c| c == '-' || c.is_ascii_digit()) == Some(true)
        && raw.chars().skip(1).all(|c| c.is_ascii_digit())
        && !raw.is_empty()
    {
        let v: i64 = raw
            .parse()
            .map_err(|_| BsstError::parse(line, format!("bad number `{raw}`")))?;
        return Ok(Scalar::Num(v));
    }
    Err(BsstError::parse(
        line,
        format!("unrecognized operand `{raw}` in constraint expression"),
    ))
}

pub fn hex_bytes(line: u32, hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(BsstError::parse(line, format!("bad hex literal `{hex}`")));
    }
    Ok(hex
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).expect("ascii hex");
            u8::from_str_radix(s, 16).expect("validated hex digits")
        })
        .collect())
}

fn parse_term(line: u32, raw: &str) -> Result<AssertTerm> {
    let (rel, rest) = parse_rel(raw);
    if rest.is_empty() {
        return Err(BsstError::parse(
            line,
            format!("empty operand in constraint term `{raw}`"),
        ));
    }
    // A range splits on the first `..` that is not inside `le64(...)`.
    if let Some(split) = find_range_split(rest) {
        if rel != Rel::Eq || raw.starts_with('=') {
            return Err(BsstError::parse(
                line,
                format!("ranges take no relational prefix: `{raw}`"),
            ));
        }
        let lo = parse_scalar(line, &rest[..split])?;
        let hi = parse_scalar(line, &rest[split + 2..])?;
        let operand = match (lo, hi) {
            (Scalar::Num(a), Scalar::Num(b)) if b > a => AssertOperand::NumRange(a, b),
            (Scalar::Le64(a), Scalar::Le64(b)) if b > a => AssertOperand::Le64Range(a, b),
            (Scalar::Num(_), Scalar::Num(_)) | (Scalar::Le64(_), Scalar::Le64(_)) => {
                return Err(BsstError::parse(
                    line,
                    format!("range end must be greater than range start: `{raw}`"),
                ))
            }
            _ => {
                return Err(BsstError::parse(
                    line,
                    format!("range bounds must be numbers of one kind: `{raw}`"),
                ))
            }
        };
        return Ok(AssertTerm { rel: Rel::Eq, operand });
    }
    let operand = match parse_scalar(line, rest)? {
        Scalar::Num(v) => AssertOperand::Num(v),
        Scalar::Le64(v) => AssertOperand::Le64(v),
        Scalar::Bytes(b) => {
            if !matches!(rel, Rel::Eq | Rel::Ne) {
                return Err(BsstError::parse(
                    line,
                    format!("byte operands allow only `=` and `!=`: `{raw}`"),
                ));
            }
            AssertOperand::Bytes(b)
        }
    };
    Ok(AssertTerm { rel, operand })
}

fn find_range_split(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let bytes = s.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b'.' if bytes[i + 1] == b'.' && depth == 0 => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Parse the expression part of an assert/assume comment (everything after
/// the colon). Terms are whitespace-separated; whitespace inside a term is a
/// parse error by construction.
pub fn parse_expr(
    line: u32,
    target: AssertTarget,
    is_size: bool,
    is_assumption: bool,
    expr: &str,
) -> Result<AssertionSpec> {
    let terms: Vec<AssertTerm> = expr
        .split_whitespace()
        .map(|raw| parse_term(line, raw))
        .collect::<Result<_>>()?;
    if terms.is_empty() {
        return Err(BsstError::parse(line, "empty constraint expression"));
    }
    let spec = AssertionSpec {
        line,
        target,
        is_size,
        terms,
        is_assumption,
    };
    if spec.uses_le64() && spec.uses_scriptnum() {
        return Err(BsstError::parse(
            line,
            "mixing le64 and script-number operands on one target",
        ));
    }
    if is_size && spec.terms.iter().any(|t| !matches!(t.operand, AssertOperand::Num(_) | AssertOperand::NumRange(..))) {
        return Err(BsstError::parse(
            line,
            "size constraints take plain numeric operands",
        ));
    }
    Ok(spec)
}

fn rel_holds(rel: Rel, lhs: i64, rhs: i64) -> bool {
    match rel {
        Rel::Eq => lhs == rhs,
        Rel::Ne => lhs != rhs,
        Rel::Gt => lhs > rhs,
        Rel::Lt => lhs < rhs,
        Rel::Ge => lhs >= rhs,
        Rel::Le => lhs <= rhs,
    }
}

/// Evaluate a spec against statically known bytes. `None` when the spec
/// consults a numeric view the bytes do not support.
pub fn eval_static(spec: &AssertionSpec, bytes: &[u8]) -> Option<bool> {
    let mut any = false;
    for term in &spec.terms {
        let holds = if spec.is_size {
            let size = bytes.len() as i64;
            match &term.operand {
                AssertOperand::Num(n) => rel_holds(term.rel, size, *n),
                AssertOperand::NumRange(a, b) => size >= *a && size <= *b,
                _ => return None,
            }
        } else {
            match &term.operand {
                AssertOperand::Num(n) => {
                    let v = decode_scriptnum(bytes, false, 5).ok()?;
                    rel_holds(term.rel, v, *n)
                }
                AssertOperand::NumRange(a, b) => {
                    let v = decode_scriptnum(bytes, false, 5).ok()?;
                    v >= *a && v <= *b
                }
                AssertOperand::Le64(n) => {
                    let v = crate::symbolic::scriptnum::decode_le64(bytes)?;
                    rel_holds(term.rel, v, *n)
                }
                AssertOperand::Le64Range(a, b) => {
                    let v = crate::symbolic::scriptnum::decode_le64(bytes)?;
                    v >= *a && v <= *b
                }
                AssertOperand::Bytes(expect) => match term.rel {
                    Rel::Ne => bytes != expect.as_slice(),
                    _ => bytes == expect.as_slice(),
                },
            }
        };
        any = any || holds;
    }
    Some(any)
}

/// Concrete byte strings a single equality-style term pins the target to,
/// used for model-value seeding and static probing.
pub fn term_exact_bytes(term: &AssertTerm) -> Option<Vec<u8>> {
    if term.rel != Rel::Eq {
        return None;
    }
    match &term.operand {
        AssertOperand::Num(n) => Some(encode_scriptnum(*n)),
        AssertOperand::Le64(n) => Some(encode_le64(*n).to_vec()),
        AssertOperand::Bytes(b) => Some(b.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(expr: &str) -> Result<AssertionSpec> {
        parse_expr(1, AssertTarget::Top, false, false, expr)
    }

    #[test]
    fn or_terms_on_one_line() {
        let s = spec("100 1000 -245").unwrap();
        assert_eq!(s.terms.len(), 3);
        assert!(s.uses_scriptnum());
        assert!(!s.uses_le64());
    }

    #[test]
    fn relational_prefixes() {
        let s = spec(">=-2 !='' <1").unwrap();
        assert_eq!(s.terms[0].rel, Rel::Ge);
        assert_eq!(s.terms[0].operand, AssertOperand::Num(-2));
        assert_eq!(s.terms[1].rel, Rel::Ne);
        assert_eq!(s.terms[1].operand, AssertOperand::Bytes(vec![]));
        assert_eq!(s.terms[2].rel, Rel::Lt);
    }

    #[test]
    fn ranges() {
        let s = spec("-1..2").unwrap();
        assert_eq!(s.terms[0].operand, AssertOperand::NumRange(-1, 2));
        let s = spec("le64(-1)..le64(2)").unwrap();
        assert_eq!(s.terms[0].operand, AssertOperand::Le64Range(-1, 2));
        assert!(spec("1..1").is_err());
        assert!(spec("2..1").is_err());
    }

    #[test]
    fn hex_and_string_operands() {
        let s = spec("x('efcdab99') 0x0100 'abc'").unwrap();
        assert_eq!(
            s.terms[0].operand,
            AssertOperand::Bytes(vec![0xef, 0xcd, 0xab, 0x99])
        );
        assert_eq!(s.terms[1].operand, AssertOperand::Bytes(vec![0x01, 0x00]));
        assert_eq!(s.terms[2].operand, AssertOperand::Bytes(b"abc".to_vec()));
    }

    #[test]
    fn le64_and_scriptnum_do_not_mix() {
        assert!(spec("100 le64(100)").is_err());
    }

    #[test]
    fn whitespace_inside_term_is_an_error() {
        // `le64( 1` splits into two terms, both malformed.
        assert!(spec("le64( 1 )").is_err());
        assert!(spec(">= 0").is_err());
    }

    #[test]
    fn static_evaluation() {
        let s = spec("20 21").unwrap();
        assert_eq!(eval_static(&s, &encode_scriptnum(20)), Some(true));
        assert_eq!(eval_static(&s, &encode_scriptnum(19)), Some(false));
        let s = parse_expr(1, AssertTarget::Top, true, false, "2").unwrap();
        assert_eq!(eval_static(&s, &[1, 2]), Some(true));
        assert_eq!(eval_static(&s, &[1]), Some(false));
    }
}
