//! C2 — the `$var` / `${expr}` reference expander used on every string-valued field of a catalog
//! entry before it becomes part of a compiled plan. Grounded directly in the token grammar of
//! `parsers/yaml.py`'s reference scanner: escaped `\\` and `\$`, `${...}` complex references
//! (optionally carrying a `:format` spec split at the first colon), and bare `$ident` references.

use crate::errors::ExprError;
use crate::expr::{self, Expr};

#[derive(Debug, Clone, PartialEq)]
enum RawToken {
    Literal(String),
    Simple(String),
    Complex(String),
}

/// One piece of a string template: either passed through verbatim, or a reference whose
/// evaluated value is rendered (optionally through a `:format` spec) and substituted in.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Literal(String),
    Ref { expr: Expr, format: Option<String> },
}

fn tokenize(text: &str) -> Result<Vec<RawToken>, ExprError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];

        if c == '\\' && i + 1 < chars.len() && (chars[i + 1] == '\\' || chars[i + 1] == '$') {
            literal.push(chars[i + 1]);
            i += 2;
            continue;
        }

        if c == '$' && chars.get(i + 1) == Some(&'{') {
            match chars[i + 2..].iter().position(|&c| c == '}') {
                Some(rel) => {
                    if !literal.is_empty() {
                        tokens.push(RawToken::Literal(std::mem::take(&mut literal)));
                    }
                    let body: String = chars[i + 2..i + 2 + rel].iter().collect();
                    tokens.push(RawToken::Complex(body));
                    i += 2 + rel + 1;
                }
                None => {
                    return Err(ExprError::UnexpectedToken(format!(
                        "unterminated `${{` in `{text}`"
                    )));
                }
            }
            continue;
        }

        if c == '$' && matches!(chars.get(i + 1), Some(c) if c.is_alphabetic() || *c == '_') {
            let mut j = i + 1;
            while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                j += 1;
            }
            if !literal.is_empty() {
                tokens.push(RawToken::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(RawToken::Simple(chars[i + 1..j].iter().collect()));
            i = j;
            continue;
        }

        literal.push(c);
        i += 1;
    }
    if !literal.is_empty() {
        tokens.push(RawToken::Literal(literal));
    }
    Ok(tokens)
}

/// Expands `text` in string mode: the result is a sequence of literal spans and references, each
/// reference carrying its parsed expression and an optional format spec taken from the first
/// colon in a `${expr:fmt}` body. The caller renders these against a [`expr::Env`] with
/// [`render`].
pub fn expand_string(text: &str) -> Result<Vec<TemplatePart>, ExprError> {
    tokenize(text)?
        .into_iter()
        .map(|tok| match tok {
            RawToken::Literal(s) => Ok(TemplatePart::Literal(s)),
            RawToken::Simple(name) => Ok(TemplatePart::Ref {
                expr: Expr::Var(name),
                format: None,
            }),
            RawToken::Complex(body) => {
                let (expr_text, format) = match body.split_once(':') {
                    Some((e, fmt)) => (e, Some(fmt.to_owned())),
                    None => (body.as_str(), None),
                };
                Ok(TemplatePart::Ref {
                    expr: expr::parse(expr_text)?,
                    format,
                })
            }
        })
        .collect()
}

/// Expands `text` in expression mode: used for condition bodies and `foreach` iteration
/// identifiers. `$ident` and `${expr}` tokens are unwrapped to bare syntax (`$x` -> `x`,
/// `${x.y}` -> `(x.y)`) and the reassembled text is parsed as a single expression — which is
/// also what implements the "a text consisting of exactly one reference and no surrounding text
/// emits just that reference" shortcut, since the reassembled text collapses to the reference's
/// own syntax with no extra noise around it.
pub fn expand_expr(text: &str) -> Result<Expr, ExprError> {
    let mut rebuilt = String::new();
    for tok in tokenize(text)? {
        match tok {
            RawToken::Literal(s) => rebuilt.push_str(&s),
            RawToken::Simple(name) => rebuilt.push_str(&name),
            RawToken::Complex(body) => {
                rebuilt.push('(');
                rebuilt.push_str(&body);
                rebuilt.push(')');
            }
        }
    }
    expr::parse(&rebuilt)
}

/// Normalizes a `foreach` loop-variable token (`k`, `$k`, or `${k}`) down to its bare identifier
/// name.
pub fn normalize_ident(text: &str) -> Result<String, ExprError> {
    match expand_expr(text)? {
        Expr::Var(name) => Ok(name),
        other => Err(ExprError::UnexpectedToken(format!(
            "`{text}` is not a plain identifier ({other})"
        ))),
    }
}

/// Renders a format spec against a value. `None` falls back to the value's own `Display`.
/// Supports the subset of Python-style specs this catalog dialect actually uses: an optional
/// zero-pad flag, a width, an optional `.precision`, and a trailing type char (`d`, `f`, `x`, or
/// `s`).
pub fn format_value(value: &crate::value::Value, spec: Option<&str>) -> Result<String, ExprError> {
    let Some(spec) = spec.filter(|s| !s.is_empty()) else {
        return Ok(value.to_string());
    };
    let bytes = spec.as_bytes();
    let mut idx = 0;
    let zero_pad = bytes.first() == Some(&b'0');
    if zero_pad {
        idx = 1;
    }
    let width_start = idx;
    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
        idx += 1;
    }
    let width: usize = spec[width_start..idx].parse().unwrap_or(0);
    let mut precision = None;
    if idx < bytes.len() && bytes[idx] == b'.' {
        idx += 1;
        let p_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_digit() {
            idx += 1;
        }
        precision = Some(spec[p_start..idx].parse().unwrap_or(0));
    }
    let ty = spec[idx..].chars().next().unwrap_or('s');

    let rendered = match ty {
        'd' => {
            let n = value
                .as_f64()
                .ok_or(ExprError::TypeMismatch("number", value.kind()))?;
            format!("{}", n as i64)
        }
        'f' => {
            let n = value
                .as_f64()
                .ok_or(ExprError::TypeMismatch("number", value.kind()))?;
            format!("{:.*}", precision.unwrap_or(6), n)
        }
        'x' => {
            let n = value
                .as_f64()
                .ok_or(ExprError::TypeMismatch("number", value.kind()))? as i64;
            format!("{n:x}")
        }
        _ => value.to_string(),
    };

    if width <= rendered.len() {
        return Ok(rendered);
    }
    let pad = width - rendered.len();
    if zero_pad {
        if let Some(stripped) = rendered.strip_prefix('-') {
            Ok(format!("-{}{}", "0".repeat(pad), stripped))
        } else {
            Ok(format!("{}{}", "0".repeat(pad), rendered))
        }
    } else {
        Ok(format!("{}{}", " ".repeat(pad), rendered))
    }
}

/// Evaluates and concatenates a parsed template against an environment.
pub fn render(parts: &[TemplatePart], env: &dyn expr::Env) -> Result<String, ExprError> {
    let mut out = String::new();
    for part in parts {
        match part {
            TemplatePart::Literal(s) => out.push_str(s),
            TemplatePart::Ref { expr, format } => {
                let value = expr::eval(expr, env)?;
                out.push_str(&format_value(&value, format.as_deref())?);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::collections::BTreeMap;

    struct MapEnv(BTreeMap<String, Value>);
    impl expr::Env for MapEnv {
        fn get(&self, name: &str) -> Option<Value> {
            self.0.get(name).cloned()
        }
    }

    #[test]
    fn simple_reference_in_quoted_argument() {
        let mut map = BTreeMap::new();
        map.insert("host".to_owned(), Value::str("db01"));
        let env = MapEnv(map);
        let parts = expand_string("ping -c 3 $host").unwrap();
        assert_eq!(render(&parts, &env).unwrap(), "ping -c 3 db01");
    }

    #[test]
    fn complex_reference_with_format_spec() {
        let mut map = BTreeMap::new();
        map.insert("n".to_owned(), Value::Int(7));
        let env = MapEnv(map);
        let parts = expand_string("count=${n:03d}").unwrap();
        assert_eq!(render(&parts, &env).unwrap(), "count=007");
    }

    #[test]
    fn escaped_dollar_is_literal() {
        let env = MapEnv(BTreeMap::new());
        let parts = expand_string(r"cost: \$5").unwrap();
        assert_eq!(render(&parts, &env).unwrap(), "cost: $5");
    }

    #[test]
    fn shortcut_single_reference_emits_bare_expression() {
        let expr = expand_expr("$fs").unwrap();
        assert_eq!(expr, Expr::Var("fs".to_owned()));
    }

    #[test]
    fn normalize_ident_accepts_bare_and_prefixed_forms() {
        assert_eq!(normalize_ident("k").unwrap(), "k");
        assert_eq!(normalize_ident("$k").unwrap(), "k");
        assert_eq!(normalize_ident("${k}").unwrap(), "k");
    }

    #[test]
    fn condition_body_mixes_dollar_and_bare_identifiers() {
        let mut map = BTreeMap::new();
        map.insert("fs".to_owned(), Value::str("/"));
        let env = MapEnv(map);
        let expr = expand_expr("$fs == '/'").unwrap();
        let v = expr::eval(&expr, &env).unwrap();
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn unterminated_complex_reference_errors() {
        assert!(expand_string("${oops").is_err());
    }

    #[test]
    fn text_without_dollar_or_braces_expands_verbatim() {
        let env = MapEnv(BTreeMap::new());
        let parts = expand_string("disk usage check on node").unwrap();
        assert_eq!(render(&parts, &env).unwrap(), "disk usage check on node");
    }

    #[test]
    fn simple_reference_round_trips_through_string_formatting() {
        let mut map = BTreeMap::new();
        map.insert("v".to_owned(), Value::Int(42));
        let env = MapEnv(map);
        let parts = expand_string("$v").unwrap();
        assert_eq!(render(&parts, &env).unwrap(), Value::Int(42).to_string());
    }
}
