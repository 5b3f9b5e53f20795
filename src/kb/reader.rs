//! Reader for canonical Prolog terms, as printed by `write_canonical/1`.
//!
//! Covers what canonical output can contain: atoms (plain, quoted, symbolic,
//! solo), strings, back-quoted code lists, integers and floats (including
//! radix and character-code notation), variables, compounds, lists, curly
//! terms and parenthesized terms. Operators are never needed because canonical
//! output ignores operator declarations.

use crate::kb::{KbError, KbResult};
use crate::normalize::{RawSolution, RawValue};

const SYMBOL_CHARS: &str = "+-*/\\^<>=~:.?@#&$";

/// Parse one complete term; trailing text other than whitespace and an
/// optional full stop is an error.
pub fn read_term(text: &str) -> KbResult<RawValue> {
    let mut reader = Reader::new(text);
    let term = reader.term()?;
    reader.skip_ws();
    if reader.peek() == Some('.') {
        reader.pos += 1;
        reader.skip_ws();
    }
    if reader.peek().is_some() {
        return Err(reader.error("unexpected trailing input"));
    }
    Ok(term)
}

/// Parse one solution line (a list of values) and pair it with `vars`.
pub fn read_solution(line: &str, vars: &[String]) -> KbResult<RawSolution> {
    let values = match read_term(line)? {
        RawValue::List(values) => values,
        RawValue::Atom(a) if a == "[]" => Vec::new(),
        other => {
            return Err(KbError::MalformedOutput {
                column: 1,
                message: format!("expected a list of bindings, got {other:?}"),
            });
        }
    };
    if values.len() != vars.len() {
        return Err(KbError::MalformedOutput {
            column: 1,
            message: format!("expected {} bindings, got {}", vars.len(), values.len()),
        });
    }
    Ok(vars.iter().cloned().zip(values).collect())
}

struct Reader {
    chars: Vec<char>,
    pos: usize,
}

impl Reader {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> KbError {
        KbError::MalformedOutput {
            column: self.pos + 1,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn expect(&mut self, want: char) -> KbResult<()> {
        self.skip_ws();
        match self.next() {
            Some(c) if c == want => Ok(()),
            Some(c) => {
                self.pos -= 1;
                Err(self.error(format!("expected '{want}', found '{c}'")))
            }
            None => Err(self.error(format!("expected '{want}', found end of input"))),
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn term(&mut self) -> KbResult<RawValue> {
        self.skip_ws();
        let c = self.peek().ok_or_else(|| self.error("unexpected end of input"))?;
        match c {
            '[' => self.list(),
            '{' => self.curly(),
            '(' => {
                self.pos += 1;
                let inner = self.term()?;
                self.expect(')')?;
                Ok(inner)
            }
            '"' => {
                self.pos += 1;
                Ok(RawValue::Text(self.quoted_body('"')?))
            }
            '`' => {
                self.pos += 1;
                let body = self.quoted_body('`')?;
                Ok(RawValue::List(
                    body.chars()
                        .map(|ch| RawValue::Number((ch as u32).into()))
                        .collect(),
                ))
            }
            '\'' => {
                self.pos += 1;
                let name = self.quoted_body('\'')?;
                self.maybe_compound(name)
            }
            '-' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => {
                self.pos += 1;
                self.number(true)
            }
            d if d.is_ascii_digit() => self.number(false),
            v if v == '_' || v.is_uppercase() => {
                let name = self.take_while(|ch| ch == '_' || ch.is_alphanumeric());
                Ok(RawValue::Unbound(name))
            }
            a if a.is_lowercase() => {
                let name = self.take_while(|ch| ch == '_' || ch.is_alphanumeric());
                self.maybe_compound(name)
            }
            s if SYMBOL_CHARS.contains(s) => {
                let name = self.take_while(|ch| SYMBOL_CHARS.contains(ch));
                self.maybe_compound(name)
            }
            '!' | ';' | '|' => {
                self.pos += 1;
                self.maybe_compound(c.to_string())
            }
            other => Err(self.error(format!("unexpected character '{other}'"))),
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    /// An atom, or a compound if `(` follows immediately.
    fn maybe_compound(&mut self, name: String) -> KbResult<RawValue> {
        if self.peek() != Some('(') {
            return Ok(RawValue::Atom(name));
        }
        self.pos += 1;
        let args = self.sequence(')')?;
        Ok(RawValue::Compound { name, args })
    }

    /// Comma-separated terms up to `close`. The opening bracket is consumed.
    fn sequence(&mut self, close: char) -> KbResult<Vec<RawValue>> {
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(close) {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(self.term()?);
            self.skip_ws();
            match self.next() {
                Some(',') => continue,
                Some(c) if c == close => return Ok(items),
                Some(c) => {
                    self.pos -= 1;
                    return Err(self.error(format!("expected ',' or '{close}', found '{c}'")));
                }
                None => return Err(self.error(format!("unterminated sequence, expected '{close}'"))),
            }
        }
    }

    fn list(&mut self) -> KbResult<RawValue> {
        self.pos += 1;
        self.skip_ws();
        if self.peek() == Some(']') {
            self.pos += 1;
            return self.maybe_compound("[]".into());
        }
        let mut items = Vec::new();
        loop {
            items.push(self.term()?);
            self.skip_ws();
            match self.next() {
                Some(',') => continue,
                Some(']') => return Ok(RawValue::List(items)),
                Some('|') => {
                    let tail = self.term()?;
                    self.expect(']')?;
                    return Ok(match tail {
                        RawValue::List(rest) => {
                            items.extend(rest);
                            RawValue::List(items)
                        }
                        RawValue::Atom(a) if a == "[]" => RawValue::List(items),
                        tail => RawValue::Compound {
                            name: "[|]".into(),
                            args: vec![RawValue::List(items), tail],
                        },
                    });
                }
                Some(c) => {
                    self.pos -= 1;
                    return Err(self.error(format!("expected ',', '|' or ']', found '{c}'")));
                }
                None => return Err(self.error("unterminated list")),
            }
        }
    }

    fn curly(&mut self) -> KbResult<RawValue> {
        self.pos += 1;
        self.skip_ws();
        if self.peek() == Some('}') {
            self.pos += 1;
            return self.maybe_compound("{}".into());
        }
        let inner = self.term()?;
        self.expect('}')?;
        Ok(RawValue::Compound {
            name: "{}".into(),
            args: vec![inner],
        })
    }

    fn number(&mut self, negative: bool) -> KbResult<RawValue> {
        let sign = if negative { "-" } else { "" };

        // 0'c, 0x.., 0o.., 0b..
        if self.peek() == Some('0') {
            match self.peek_at(1) {
                Some('\'') => {
                    self.pos += 2;
                    let code = match self.next() {
                        Some('\\') => self.escape('\'')?,
                        Some('\'') if self.peek() == Some('\'') => {
                            self.pos += 1;
                            Some('\'')
                        }
                        Some(ch) => Some(ch),
                        None => return Err(self.error("unterminated character code")),
                    };
                    let code = code.ok_or_else(|| self.error("empty character code"))? as i64;
                    let value = if negative { -code } else { code };
                    return Ok(RawValue::Number(value.into()));
                }
                Some(r @ ('x' | 'o' | 'b')) => {
                    let radix = match r {
                        'x' => 16,
                        'o' => 8,
                        _ => 2,
                    };
                    self.pos += 2;
                    let digits = self.take_while(|ch| ch.is_digit(radix));
                    let value = i64::from_str_radix(&digits, radix)
                        .map_err(|e| self.error(format!("bad radix literal: {e}")))?;
                    let value = if negative { -value } else { value };
                    return Ok(RawValue::Number(value.into()));
                }
                _ => {}
            }
        }

        let mut text = String::from(sign);
        text.push_str(&self.take_while(|ch| ch.is_ascii_digit() || ch == '_'));
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            text.push('.');
            text.push_str(&self.take_while(|ch| ch.is_ascii_digit()));
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign_len = usize::from(matches!(self.peek_at(1), Some('+' | '-')));
            if self.peek_at(1 + sign_len).is_some_and(|d| d.is_ascii_digit()) {
                is_float = true;
                text.push('e');
                self.pos += 1;
                if sign_len == 1 {
                    text.push(self.next().unwrap_or('+'));
                }
                text.push_str(&self.take_while(|ch| ch.is_ascii_digit()));
            }
        }
        // 1.0Inf, 1.5NaN: no JSON counterpart, keep the spelling.
        if is_float && (self.peek() == Some('I') || self.peek() == Some('N')) {
            let special = self.take_while(|ch| ch.is_ascii_alphabetic());
            text.push_str(&special);
            return Ok(RawValue::Atom(text));
        }
        let text = text.replace('_', "");
        // `Number` keeps its source text, so bignums and float spellings
        // reach normalization unchanged.
        match text.parse::<serde_json::Number>() {
            Ok(n) => Ok(RawValue::Number(n)),
            Err(_) => Ok(RawValue::Atom(text)),
        }
    }

    /// Body of a quoted item; the opening quote is consumed.
    fn quoted_body(&mut self, quote: char) -> KbResult<String> {
        let mut out = String::new();
        loop {
            match self.next() {
                None => return Err(self.error(format!("unterminated {quote}-quoted text"))),
                Some(c) if c == quote => {
                    if self.peek() == Some(quote) {
                        self.pos += 1;
                        out.push(quote);
                    } else {
                        return Ok(out);
                    }
                }
                Some('\\') => {
                    if let Some(ch) = self.escape(quote)? {
                        out.push(ch);
                    }
                }
                Some(c) => out.push(c),
            }
        }
    }

    /// Decode an escape sequence; the backslash is consumed. `None` for a
    /// line continuation.
    fn escape(&mut self, quote: char) -> KbResult<Option<char>> {
        let c = self.next().ok_or_else(|| self.error("unterminated escape"))?;
        let ch = match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'a' => '\u{7}',
            'b' => '\u{8}',
            'f' => '\u{c}',
            'v' => '\u{b}',
            'e' => '\u{1b}',
            's' => ' ',
            '0'..='7' => {
                let mut digits = String::from(c);
                digits.push_str(&self.take_while(|d| d.is_digit(8)));
                self.close_numeric_escape()?;
                self.code_point(&digits, 8)?
            }
            'x' => {
                let digits = self.take_while(|d| d.is_ascii_hexdigit());
                self.close_numeric_escape()?;
                self.code_point(&digits, 16)?
            }
            'u' | 'U' => {
                let len = if c == 'u' { 4 } else { 8 };
                let start = self.pos;
                for _ in 0..len {
                    match self.next() {
                        Some(d) if d.is_ascii_hexdigit() => {}
                        _ => return Err(self.error("short unicode escape")),
                    }
                }
                let digits: String = self.chars[start..self.pos].iter().collect();
                self.code_point(&digits, 16)?
            }
            '\n' => return Ok(None),
            '\\' | '\'' | '"' | '`' => c,
            other if other == quote => other,
            other => return Err(self.error(format!("unknown escape '\\{other}'"))),
        };
        Ok(Some(ch))
    }

    fn close_numeric_escape(&mut self) -> KbResult<()> {
        match self.next() {
            Some('\\') => Ok(()),
            _ => Err(self.error("numeric escape must end with '\\'")),
        }
    }

    fn code_point(&self, digits: &str, radix: u32) -> KbResult<char> {
        u32::from_str_radix(digits, radix)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error(format!("invalid character code '{digits}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(s: &str) -> RawValue {
        RawValue::Atom(s.into())
    }

    fn num(n: i64) -> RawValue {
        RawValue::Number(n.into())
    }

    fn exact(text: &str) -> RawValue {
        RawValue::Number(text.parse().unwrap())
    }

    #[test]
    fn reads_atoms() {
        assert_eq!(read_term("gbp").unwrap(), atom("gbp"));
        assert_eq!(read_term("'24/7'").unwrap(), atom("24/7"));
        assert_eq!(read_term("'it''s'").unwrap(), atom("it's"));
        assert_eq!(read_term("'a\\\\b'").unwrap(), atom("a\\b"));
        assert_eq!(read_term("[]").unwrap(), atom("[]"));
        assert_eq!(read_term("{}").unwrap(), atom("{}"));
        assert_eq!(read_term("=..").unwrap(), atom("=.."));
        assert_eq!(read_term("!").unwrap(), atom("!"));
    }

    #[test]
    fn reads_quoted_escapes() {
        assert_eq!(read_term(r"'line\nbreak'").unwrap(), atom("line\nbreak"));
        assert_eq!(read_term(r"'\x41\\101\'").unwrap(), atom("AA"));
        assert_eq!(read_term(r"'café'").unwrap(), atom("café"));
        assert_eq!(read_term(r"'don\'t'").unwrap(), atom("don't"));
    }

    #[test]
    fn reads_numbers() {
        assert_eq!(read_term("30").unwrap(), num(30));
        assert_eq!(read_term("-34").unwrap(), num(-34));
        assert_eq!(
            read_term("2.5").unwrap(),
            RawValue::Number(serde_json::Number::from_f64(2.5).unwrap())
        );
        assert_eq!(read_term("1.0e10").unwrap(), exact("1.0e10"));
        assert_eq!(read_term("0'a").unwrap(), num(97));
        assert_eq!(read_term("0xff").unwrap(), num(255));
        assert_eq!(read_term("1_000").unwrap(), num(1000));
        assert_eq!(read_term("1.0Inf").unwrap(), atom("1.0Inf"));
    }

    #[test]
    fn numbers_keep_their_digits() {
        let big = "123456789012345678901234567890";
        let RawValue::Number(n) = read_term(big).unwrap() else {
            panic!("expected a number");
        };
        assert_eq!(n.to_string(), big);
        assert!(n.as_i64().is_none() && n.as_u64().is_none());

        let RawValue::Number(n) = read_term("-98765432109876543210987").unwrap() else {
            panic!("expected a number");
        };
        assert_eq!(n.to_string(), "-98765432109876543210987");

        let RawValue::Number(n) = read_term("1.50").unwrap() else {
            panic!("expected a number");
        };
        assert_eq!(n.to_string(), "1.50");
    }

    #[test]
    fn reads_strings_and_code_lists() {
        assert_eq!(
            read_term("\"Mon-Fri 9AM-8PM EST\"").unwrap(),
            RawValue::Text("Mon-Fri 9AM-8PM EST".into())
        );
        assert_eq!(read_term("`ab`").unwrap(), RawValue::List(vec![num(97), num(98)]));
    }

    #[test]
    fn reads_variables() {
        assert_eq!(read_term("_").unwrap(), RawValue::Unbound("_".into()));
        assert_eq!(read_term("_G123").unwrap(), RawValue::Unbound("_G123".into()));
        assert_eq!(read_term("A").unwrap(), RawValue::Unbound("A".into()));
    }

    #[test]
    fn reads_compounds() {
        assert_eq!(
            read_term("amount(60,aud)").unwrap(),
            RawValue::Compound {
                name: "amount".into(),
                args: vec![num(60), atom("aud")]
            }
        );
        assert_eq!(
            read_term("-(a,b)").unwrap(),
            RawValue::Compound {
                name: "-".into(),
                args: vec![atom("a"), atom("b")]
            }
        );
        assert_eq!(
            read_term("'Odd'(x)").unwrap(),
            RawValue::Compound {
                name: "Odd".into(),
                args: vec![atom("x")]
            }
        );
        assert_eq!(
            read_term("{a}").unwrap(),
            RawValue::Compound {
                name: "{}".into(),
                args: vec![atom("a")]
            }
        );
    }

    #[test]
    fn reads_lists() {
        assert_eq!(
            read_term("[includes([batteries,aerosols])]").unwrap(),
            RawValue::List(vec![RawValue::Compound {
                name: "includes".into(),
                args: vec![RawValue::List(vec![atom("batteries"), atom("aerosols")])]
            }])
        );
        assert_eq!(
            read_term("[a|[b,c]]").unwrap(),
            RawValue::List(vec![atom("a"), atom("b"), atom("c")])
        );
        assert_eq!(
            read_term("[a|T]").unwrap(),
            RawValue::Compound {
                name: "[|]".into(),
                args: vec![RawValue::List(vec![atom("a")]), RawValue::Unbound("T".into())]
            }
        );
    }

    #[test]
    fn trailing_full_stop_accepted() {
        assert_eq!(read_term("[30].").unwrap(), RawValue::List(vec![num(30)]));
    }

    #[test]
    fn malformed_input_rejected() {
        assert!(read_term("").is_err());
        assert!(read_term("foo(").is_err());
        assert!(read_term("'open").is_err());
        assert!(read_term("[a b]").is_err());
        assert!(read_term("a b").is_err());
        assert!(matches!(
            read_term("f(a,,b)").unwrap_err(),
            KbError::MalformedOutput { column: 5, .. }
        ));
    }

    #[test]
    fn solution_lines_pair_with_variables() {
        let vars = vec!["Amount".to_string(), "Currency".to_string()];
        let sol = read_solution("[34,gbp]", &vars).unwrap();
        assert_eq!(
            sol,
            vec![("Amount".to_string(), num(34)), ("Currency".to_string(), atom("gbp"))]
        );
        assert_eq!(read_solution("[]", &[]).unwrap(), vec![]);
        assert!(read_solution("[34]", &vars).is_err());
        assert!(read_solution("34", &vars).is_err());
    }
}
