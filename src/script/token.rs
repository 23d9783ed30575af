//! Token-level decoding: one whitespace-delimited source token into either a
//! data push or an opcode reference. Case-insensitive, `OP_` prefix
//! optional, angle-bracketed data accepted and stripped.

use crate::assertions::hex_bytes;
use crate::error::{BsstError, Result};
use crate::script::opcode::OpCode;
use crate::symbolic::scriptnum::{encode_le64, encode_scriptnum};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Decoded push data.
    Data(Vec<u8>),
    /// `$name` placeholder.
    Placeholder(String),
    Op(OpCode),
}

#[derive(Debug, Clone)]
pub struct ScriptToken {
    pub kind: TokenKind,
    pub pc: usize,
    pub line: u32,
    /// Source form, kept for the decoded-script listing.
    pub text: String,
}

pub fn decode_token(line: u32, raw: &str) -> Result<TokenKind> {
    // Angle-bracketed data markers are presentation only.
    let raw = raw
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(raw);

    if let Some(name) = raw.strip_prefix('$') {
        if name.is_empty() || !is_plain_name(name) {
            return Err(BsstError::parse(line, format!("bad placeholder `{raw}`")));
        }
        return Ok(TokenKind::Placeholder(name.to_string()));
    }
    if let Some(inner) = raw.strip_prefix("le64(").and_then(|s| s.strip_suffix(')')) {
        let v: i64 = inner
            .parse()
            .map_err(|_| BsstError::parse(line, format!("bad le64 literal `{raw}`")))?;
        return Ok(TokenKind::Data(encode_le64(v).to_vec()));
    }
    if let Some(inner) = raw.strip_prefix("x('").and_then(|s| s.strip_suffix("')")) {
        return Ok(TokenKind::Data(hex_bytes(line, inner)?));
    }
    if let Some(inner) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        return Ok(TokenKind::Data(hex_bytes(line, inner)?));
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return Ok(TokenKind::Data(raw[1..raw.len() - 1].as_bytes().to_vec()));
    }
    if is_decimal(raw) {
        let v: i64 = raw
            .parse()
            .map_err(|_| BsstError::parse(line, format!("number out of range `{raw}`")))?;
        return Ok(TokenKind::Data(encode_scriptnum(v)));
    }

    let upper = raw.to_ascii_uppercase();
    let bare = upper.strip_prefix("OP_").unwrap_or(&upper);
    match bare {
        "TRUE" => return Ok(TokenKind::Data(encode_scriptnum(1))),
        "FALSE" => return Ok(TokenKind::Data(Vec::new())),
        "1NEGATE" => return Ok(TokenKind::Data(encode_scriptnum(-1))),
        _ => {}
    }
    if is_decimal(bare) {
        // OP_0 .. OP_16 style numeric opcodes.
        let v: i64 = bare
            .parse()
            .map_err(|_| BsstError::parse(line, format!("number out of range `{raw}`")))?;
        return Ok(TokenKind::Data(encode_scriptnum(v)));
    }

    OpCode::from_name(raw)
        .map(TokenKind::Op)
        .ok_or_else(|| BsstError::parse(line, format!("unknown opcode `{raw}`")))
}

fn is_decimal(raw: &str) -> bool {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

pub fn is_plain_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_forms() {
        assert_eq!(decode_token(1, "5").unwrap(), TokenKind::Data(vec![5]));
        assert_eq!(decode_token(1, "-1").unwrap(), TokenKind::Data(vec![0x81]));
        assert_eq!(decode_token(1, "0").unwrap(), TokenKind::Data(vec![]));
        assert_eq!(
            decode_token(1, "le64(1)").unwrap(),
            TokenKind::Data(vec![1, 0, 0, 0, 0, 0, 0, 0])
        );
        assert_eq!(
            decode_token(1, "x('aa')").unwrap(),
            TokenKind::Data(vec![0xaa])
        );
        assert_eq!(
            decode_token(1, "0xAB01").unwrap(),
            TokenKind::Data(vec![0xab, 0x01])
        );
        assert_eq!(
            decode_token(1, "'abc'").unwrap(),
            TokenKind::Data(b"abc".to_vec())
        );
        assert_eq!(
            decode_token(1, "<0x01>").unwrap(),
            TokenKind::Data(vec![1])
        );
    }

    #[test]
    fn opcode_forms() {
        assert_eq!(decode_token(1, "dup").unwrap(), TokenKind::Op(OpCode::Dup));
        assert_eq!(
            decode_token(1, "OP_CHECKSIG").unwrap(),
            TokenKind::Op(OpCode::CheckSig)
        );
        assert_eq!(decode_token(1, "op_2").unwrap(), TokenKind::Data(vec![2]));
        assert!(decode_token(1, "bogus").is_err());
    }

    #[test]
    fn placeholders() {
        assert_eq!(
            decode_token(1, "$a").unwrap(),
            TokenKind::Placeholder("a".to_string())
        );
        assert!(decode_token(1, "$").is_err());
    }
}
