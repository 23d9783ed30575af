//! Line-by-line script parsing: code tokens, `=>name` data-reference
//! bindings, `bsst-*` control comments, and per-token source positions.

use std::collections::BTreeMap;

use crate::assertions::{self, AssertTarget, AssertionSpec};
use crate::config::SymEnvironment;
use crate::error::{BsstError, Result};
use crate::script::token::{decode_token, is_plain_name, ScriptToken, TokenKind};

#[derive(Debug, Default)]
pub struct ScriptInfo {
    pub tokens: Vec<ScriptToken>,
    /// `=>name` binding recorded against the pc of the preceding token.
    pub refs_at: BTreeMap<usize, Vec<String>>,
    /// Assertions applied after the token at the keyed pc.
    pub asserts_at: BTreeMap<usize, Vec<AssertionSpec>>,
    /// Global assumptions on `$name` placeholders.
    pub assumptions: Vec<AssertionSpec>,
    /// Witness aliases from `bsst-name-alias(wit<N>)`.
    pub aliases: BTreeMap<usize, String>,
    /// `bsst-plugin(name): payload` comments, in source order.
    pub plugin_comments: Vec<(u32, String, String)>,
}

impl ScriptInfo {
    pub fn body_len(&self) -> usize {
        self.tokens.len()
    }
}

pub fn parse_script(env: &SymEnvironment, source: &str) -> Result<ScriptInfo> {
    let mut info = ScriptInfo::default();
    let marker = env.comment_marker.as_str();

    for (lineno0, raw_line) in source.lines().enumerate() {
        let line = (lineno0 + 1) as u32;
        let (code, comment) = match raw_line.find(marker) {
            Some(at) => (&raw_line[..at], Some(&raw_line[at + marker.len()..])),
            None => (raw_line, None),
        };

        for word in code.split_whitespace() {
            let kind = decode_token(line, word)?;
            if let TokenKind::Op(op) = kind {
                if !op.is_enabled(env) {
                    return Err(BsstError::parse(
                        line,
                        format!("opcode `{word}` is not enabled in this mode"),
                    ));
                }
            }
            let pc = info.tokens.len();
            info.tokens.push(ScriptToken {
                kind,
                pc,
                line,
                text: word.to_string(),
            });
        }

        if let Some(comment) = comment {
            parse_comment(env, &mut info, line, comment.trim())?;
        }
    }

    validate_assumption_kinds(&info)?;
    Ok(info)
}

fn parse_comment(
    env: &SymEnvironment,
    info: &mut ScriptInfo,
    line: u32,
    comment: &str,
) -> Result<()> {
    if let Some(rest) = comment.strip_prefix("=>") {
        let name = rest.split_whitespace().next().unwrap_or("");
        if name.is_empty() || (env.restrict_data_reference_names && !is_plain_name(name)) {
            return Err(BsstError::parse(
                line,
                format!("bad data reference name `{name}`"),
            ));
        }
        let Some(last) = info.tokens.last() else {
            return Err(BsstError::parse(line, "data reference before any opcode"));
        };
        info.refs_at.entry(last.pc).or_default().push(name.to_string());
        return Ok(());
    }

    if let Some(rest) = comment.strip_prefix("bsst-name-alias(") {
        let (target, alias_part) = rest
            .split_once("):")
            .ok_or_else(|| BsstError::parse(line, "malformed bsst-name-alias comment"))?;
        let index = target
            .strip_prefix("wit")
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| {
                BsstError::parse(line, format!("alias target must be wit<N>, got `{target}`"))
            })?;
        let alias = alias_part.trim();
        if alias.is_empty() || !is_plain_name(alias) {
            return Err(BsstError::parse(line, format!("bad alias `{alias}`")));
        }
        info.aliases.insert(index, alias.to_string());
        return Ok(());
    }

    if let Some(rest) = comment.strip_prefix("bsst-plugin(") {
        let (name, payload) = rest
            .split_once("):")
            .ok_or_else(|| BsstError::parse(line, "malformed bsst-plugin comment"))?;
        info.plugin_comments
            .push((line, name.trim().to_string(), payload.trim().to_string()));
        return Ok(());
    }

    for (prefix, is_size, is_assumption) in [
        ("bsst-assert-size", true, false),
        ("bsst-assert", false, false),
        ("bsst-assume-size", true, true),
        ("bsst-assume", false, true),
    ] {
        if let Some(rest) = comment.strip_prefix(prefix) {
            return parse_constraint_comment(info, line, rest, is_size, is_assumption);
        }
    }

    Ok(())
}

fn parse_constraint_comment(
    info: &mut ScriptInfo,
    line: u32,
    rest: &str,
    is_size: bool,
    is_assumption: bool,
) -> Result<()> {
    let (target, expr) = if let Some(rest) = rest.strip_prefix('(') {
        let (target_raw, after) = rest
            .split_once("):")
            .ok_or_else(|| BsstError::parse(line, "malformed constraint target"))?;
        (parse_target(line, target_raw, is_assumption)?, after)
    } else if let Some(after) = rest.strip_prefix(':') {
        if is_assumption {
            return Err(BsstError::parse(
                line,
                "bsst-assume requires an explicit ($name) target",
            ));
        }
        (AssertTarget::Top, after)
    } else {
        return Err(BsstError::parse(line, "malformed constraint comment"));
    };

    let spec = assertions::parse_expr(line, target, is_size, is_assumption, expr.trim())?;

    if is_assumption {
        info.assumptions.push(spec);
        return Ok(());
    }
    let Some(last) = info.tokens.last() else {
        return Err(BsstError::parse(line, "assertion before any opcode"));
    };
    info.asserts_at.entry(last.pc).or_default().push(spec);
    Ok(())
}

fn parse_target(line: u32, raw: &str, is_assumption: bool) -> Result<AssertTarget> {
    if let Some(name) = raw.strip_prefix('$') {
        if !is_plain_name(name) {
            return Err(BsstError::parse(line, format!("bad placeholder `{raw}`")));
        }
        return Ok(AssertTarget::Placeholder(name.to_string()));
    }
    if is_assumption {
        return Err(BsstError::parse(
            line,
            "assumptions target placeholders only",
        ));
    }
    if let Some(name) = raw.strip_prefix('&') {
        if !is_plain_name(name) {
            return Err(BsstError::parse(line, format!("bad reference `{raw}`")));
        }
        return Ok(AssertTarget::Ref(name.to_string()));
    }
    if let Some(index) = raw.strip_prefix("wit").and_then(|s| s.parse::<usize>().ok()) {
        return Ok(AssertTarget::Wit(index));
    }
    Err(BsstError::parse(
        line,
        format!("assertion target must be wit<N>, &name or $name, got `{raw}`"),
    ))
}

/// Scriptnum and le64 constraints must not mix across comments that target
/// the same placeholder.
fn validate_assumption_kinds(info: &ScriptInfo) -> Result<()> {
    let mut kinds: BTreeMap<&str, (bool, bool)> = BTreeMap::new();
    for spec in &info.assumptions {
        if let AssertTarget::Placeholder(name) = &spec.target {
            let entry = kinds.entry(name.as_str()).or_default();
            entry.0 |= spec.uses_scriptnum();
            entry.1 |= spec.uses_le64();
            if entry.0 && entry.1 {
                return Err(BsstError::parse(
                    spec.line,
                    format!("mixed le64 and script-number constraints on ${name}"),
                ));
            }
        }
    }
    // Same rule across assert comments per named target.
    let mut assert_kinds: BTreeMap<String, (bool, bool)> = BTreeMap::new();
    for specs in info.asserts_at.values() {
        for spec in specs {
            let key = spec.target.to_string();
            if key == "(top)" {
                continue;
            }
            let entry = assert_kinds.entry(key).or_default();
            entry.0 |= spec.uses_scriptnum();
            entry.1 |= spec.uses_le64();
            if entry.0 && entry.1 {
                return Err(BsstError::parse(
                    spec.line,
                    format!("mixed le64 and script-number constraints on {}", spec.target),
                ));
            }
        }
    }
    Ok(())
}

/// `--skip-immediately-failed-branches-on` fragment matcher: true when the
/// tokens starting at `pc` spell the configured failure trap.
pub fn matches_fragment(info: &ScriptInfo, pc: usize, fragment: &str) -> bool {
    let words: Vec<&str> = fragment.split_whitespace().collect();
    if words.is_empty() || pc + words.len() > info.tokens.len() {
        return false;
    }
    words.iter().enumerate().all(|(i, w)| {
        let tok = &info.tokens[pc + i];
        match (&tok.kind, decode_token(1, w)) {
            (kind, Ok(expect)) => *kind == expect,
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> SymEnvironment {
        let mut env = SymEnvironment::default();
        env.is_elements = true;
        env.sigversion = crate::config::SigVersion::Tapscript;
        env
    }

    #[test]
    fn tokens_and_positions() {
        let info = parse_script(&env(), "DUP 1 ADD\nSWAP").unwrap();
        assert_eq!(info.tokens.len(), 4);
        assert_eq!(info.tokens[2].pc, 2);
        assert_eq!(info.tokens[2].line, 1);
        assert_eq!(info.tokens[3].line, 2);
    }

    #[test]
    fn comments_do_not_produce_tokens() {
        let info = parse_script(&env(), "DUP // a comment with DUP inside").unwrap();
        assert_eq!(info.tokens.len(), 1);
    }

    #[test]
    fn data_reference_binding() {
        let info = parse_script(&env(), "SWAP // =>remainder").unwrap();
        assert_eq!(info.refs_at[&0], vec!["remainder".to_string()]);
        assert!(parse_script(&env(), "// =>early").is_err());
    }

    #[test]
    fn alias_comment() {
        let info = parse_script(&env(), "// bsst-name-alias(wit0): a1\nADD").unwrap();
        assert_eq!(info.aliases[&0], "a1");
    }

    #[test]
    fn assume_requires_placeholder_target() {
        assert!(parse_script(&env(), "// bsst-assume($a): 1\n$a").is_ok());
        assert!(parse_script(&env(), "1\n// bsst-assume: 1").is_err());
        assert!(parse_script(&env(), "1\n// bsst-assume(&r): 1").is_err());
    }

    #[test]
    fn assert_before_any_opcode_is_an_error() {
        assert!(parse_script(&env(), "// bsst-assert: 0\n1").is_err());
    }

    #[test]
    fn assert_targets() {
        let info =
            parse_script(&env(), "1 // =>a\nDUP\n// bsst-assert(&a): 1\n// bsst-assert(wit0): 1")
                .unwrap();
        let specs = &info.asserts_at[&1];
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].target, AssertTarget::Ref("a".to_string()));
        assert_eq!(specs[1].target, AssertTarget::Wit(0));
        // A plain name is not a valid target.
        assert!(parse_script(&env(), "1 // =>wit\n// bsst-assert(wit): 1").is_err());
    }

    #[test]
    fn mixed_kinds_on_one_placeholder_rejected() {
        let src = "// bsst-assume($a): 100 101\n// bsst-assume($a): le64(100)\n$a";
        assert!(parse_script(&env(), src).is_err());
    }

    #[test]
    fn disabled_opcode_rejected() {
        let mut base = SymEnvironment::default();
        base.is_elements = false;
        assert!(parse_script(&base, "CAT").is_err());
    }

    #[test]
    fn fragment_matcher() {
        let info = parse_script(&env(), "DUP VERIFY 0").unwrap();
        assert!(matches_fragment(&info, 1, "VERIFY"));
        assert!(!matches_fragment(&info, 0, "VERIFY"));
    }
}
