//! S-expression reader
//!
//! Turns source text into in-heap values: lists with dotted tails, the
//! quote family of sugar, strings with escapes, `#\` characters, and
//! atoms. An atom that parses under the numeric grammar is a number;
//! everything else interns as a symbol. Line numbers ride along per
//! top-level expression for the compiler's source map.

use arcueid_core::coerce::str_to_num;
use arcueid_core::string::{mkchar, mkstring};
use arcueid_core::symbol::intern;
use arcueid_core::value::Value;
use arcueid_core::{Builtin, Interp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// Input ended inside a list, string, or character.
    UnexpectedEof { line: usize },
    UnmatchedParen { line: usize },
    BadDottedPair { line: usize },
    BadChar { line: usize, text: String },
    BadEscape { line: usize, ch: char },
}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::UnexpectedEof { line } => {
                write!(f, "line {}: unexpected end of input", line)
            }
            ReadError::UnmatchedParen { line } => write!(f, "line {}: unmatched ')'", line),
            ReadError::BadDottedPair { line } => write!(f, "line {}: malformed dotted pair", line),
            ReadError::BadChar { line, text } => {
                write!(f, "line {}: unknown character literal #\\{}", line, text)
            }
            ReadError::BadEscape { line, ch } => {
                write!(f, "line {}: unknown string escape \\{}", line, ch)
            }
        }
    }
}

impl std::error::Error for ReadError {}

pub struct Reader {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl Reader {
    pub fn new(source: &str) -> Reader {
        Reader {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
        }
    }

    /// Every top-level expression with its starting line.
    pub fn read_all(&mut self, c: &mut Interp) -> Result<Vec<(Value, usize)>, ReadError> {
        let mut out = Vec::new();
        while let Some(e) = self.read_expr(c)? {
            out.push(e);
        }
        Ok(out)
    }

    /// The next expression, or None at end of input.
    pub fn read_expr(&mut self, c: &mut Interp) -> Result<Option<(Value, usize)>, ReadError> {
        self.skip_blank();
        if self.at_end() {
            return Ok(None);
        }
        let line = self.line;
        let v = self.read_value(c)?;
        Ok(Some((v, line)))
    }

    fn read_value(&mut self, c: &mut Interp) -> Result<Value, ReadError> {
        self.skip_blank();
        let line = self.line;
        match self.peek() {
            None => Err(ReadError::UnexpectedEof { line }),
            Some('(') => {
                self.advance();
                self.read_list(c)
            }
            Some(')') => Err(ReadError::UnmatchedParen { line }),
            Some('\'') => {
                self.advance();
                self.read_sugar(c, Builtin::Quote)
            }
            Some('`') => {
                self.advance();
                self.read_sugar(c, Builtin::QQuote)
            }
            Some(',') => {
                self.advance();
                let which = if self.peek() == Some('@') {
                    self.advance();
                    Builtin::UnquoteSp
                } else {
                    Builtin::Unquote
                };
                self.read_sugar(c, which)
            }
            Some('"') => {
                self.advance();
                self.read_string(c)
            }
            Some('#') if self.peek_at(1) == Some('\\') => {
                self.advance();
                self.advance();
                self.read_char(c)
            }
            Some(_) => self.read_atom(c),
        }
    }

    fn read_sugar(&mut self, c: &mut Interp, head: Builtin) -> Result<Value, ReadError> {
        let inner = self.read_value(c)?;
        let sym = c.builtin(head);
        Ok(c.list(&[sym, inner]))
    }

    fn read_list(&mut self, c: &mut Interp) -> Result<Value, ReadError> {
        let mut items = Vec::new();
        let mut tail = Value::Nil;
        loop {
            self.skip_blank();
            let line = self.line;
            match self.peek() {
                None => return Err(ReadError::UnexpectedEof { line }),
                Some(')') => {
                    self.advance();
                    break;
                }
                Some('.') if self.is_bare_dot() => {
                    self.advance();
                    if items.is_empty() {
                        return Err(ReadError::BadDottedPair { line });
                    }
                    tail = self.read_value(c)?;
                    self.skip_blank();
                    if self.peek() != Some(')') {
                        return Err(ReadError::BadDottedPair { line });
                    }
                    self.advance();
                    break;
                }
                Some(_) => items.push(self.read_value(c)?),
            }
        }
        let mut acc = tail;
        for &v in items.iter().rev() {
            acc = c.cons(v, acc);
        }
        Ok(acc)
    }

    fn is_bare_dot(&self) -> bool {
        matches!(
            self.peek_at(1),
            None | Some(' ') | Some('\t') | Some('\n') | Some('\r') | Some('(') | Some(')')
        )
    }

    fn read_string(&mut self, c: &mut Interp) -> Result<Value, ReadError> {
        let mut runes = Vec::new();
        loop {
            let line = self.line;
            match self.next() {
                None => return Err(ReadError::UnexpectedEof { line }),
                Some('"') => break,
                Some('\\') => match self.next() {
                    None => return Err(ReadError::UnexpectedEof { line }),
                    Some('n') => runes.push('\n'),
                    Some('t') => runes.push('\t'),
                    Some('r') => runes.push('\r'),
                    Some('0') => runes.push('\0'),
                    Some('"') => runes.push('"'),
                    Some('\\') => runes.push('\\'),
                    Some(ch) => return Err(ReadError::BadEscape { line, ch }),
                },
                Some(ch) => runes.push(ch),
            }
        }
        Ok(mkstring(c, &runes.iter().collect::<String>()))
    }

    fn read_char(&mut self, c: &mut Interp) -> Result<Value, ReadError> {
        let line = self.line;
        let mut text = String::new();
        match self.next() {
            None => return Err(ReadError::UnexpectedEof { line }),
            Some(ch) => text.push(ch),
        }
        // named characters continue with letters: #\space, #\newline
        while let Some(ch) = self.peek() {
            if ch.is_alphabetic() {
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        let ch = match text.as_str() {
            "space" => ' ',
            "newline" => '\n',
            "tab" => '\t',
            "return" => '\r',
            "nul" => '\0',
            s if s.chars().count() == 1 => s.chars().next().unwrap_or('\0'),
            _ => return Err(ReadError::BadChar { line, text }),
        };
        Ok(mkchar(c, ch))
    }

    fn read_atom(&mut self, c: &mut Interp) -> Result<Value, ReadError> {
        let mut text = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() || matches!(ch, '(' | ')' | '"' | ';') {
                break;
            }
            text.push(ch);
            self.advance();
        }
        if let Some(n) = str_to_num(c, &text, 10) {
            return Ok(n);
        }
        Ok(intern(c, &text))
    }

    fn skip_blank(&mut self) {
        loop {
            match self.peek() {
                Some(ch) if ch.is_whitespace() => {
                    self.advance();
                }
                Some(';') => {
                    while let Some(ch) = self.peek() {
                        self.advance();
                        if ch == '\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, k: usize) -> Option<char> {
        self.chars.get(self.pos + k).copied()
    }

    fn advance(&mut self) {
        if self.peek() == Some('\n') {
            self.line += 1;
        }
        self.pos += 1;
    }

    fn next(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.advance();
        }
        ch
    }

    fn at_end(&mut self) -> bool {
        self.skip_blank();
        self.pos >= self.chars.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcueid_core::pprint::write_value;
    use arcueid_core::value::{car, cadr, list_len};

    fn read_one(c: &mut Interp, src: &str) -> Value {
        let mut r = Reader::new(src);
        r.read_expr(c).unwrap().unwrap().0
    }

    #[test]
    fn atoms_numbers_and_symbols() {
        let mut c = Interp::new();
        assert_eq!(read_one(&mut c, "42"), Value::Fixnum(42));
        assert_eq!(read_one(&mut c, "-17"), Value::Fixnum(-17));
        let s = read_one(&mut c, "foo");
        assert_eq!(s, intern(&mut c, "foo"));
        // arithmetic names are symbols, not numbers
        assert_eq!(read_one(&mut c, "+"), intern(&mut c, "+"));
    }

    #[test]
    fn lists_and_dotted_pairs() {
        let mut c = Interp::new();
        let l = read_one(&mut c, "(1 2 3)");
        assert_eq!(list_len(l), 3);
        assert_eq!(car(l), Value::Fixnum(1));
        let p = read_one(&mut c, "(1 . 2)");
        assert_eq!(write_value(&mut c, p, true), "(1 . 2)");
        let nested = read_one(&mut c, "(a (b c) d)");
        assert_eq!(write_value(&mut c, nested, true), "(a (b c) d)");
    }

    #[test]
    fn quote_family_sugar() {
        let mut c = Interp::new();
        let q = read_one(&mut c, "'x");
        assert_eq!(car(q), c.builtin(Builtin::Quote));
        let qq = read_one(&mut c, "`(a ,b ,@cs)");
        assert_eq!(car(qq), c.builtin(Builtin::QQuote));
        let inner = cadr(qq);
        let unq = cadr(inner);
        assert_eq!(car(unq), c.builtin(Builtin::Unquote));
    }

    #[test]
    fn strings_and_chars() {
        let mut c = Interp::new();
        let s = read_one(&mut c, "\"a\\nb\"");
        assert_eq!(arcueid_core::string::to_rust_string(s), "a\nb");
        let u = read_one(&mut c, "\"遠野\"");
        assert_eq!(arcueid_core::string::to_rust_string(u), "遠野");
        let ch = read_one(&mut c, "#\\A");
        assert_eq!(arcueid_core::string::char_of(ch), 'A');
        let sp = read_one(&mut c, "#\\space");
        assert_eq!(arcueid_core::string::char_of(sp), ' ');
    }

    #[test]
    fn comments_and_lines() {
        let mut c = Interp::new();
        let mut r = Reader::new("; leading\n1\n; mid\n2");
        let all = r.read_all(&mut c).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], (Value::Fixnum(1), 2));
        assert_eq!(all[1], (Value::Fixnum(2), 4));
    }

    #[test]
    fn errors_carry_positions() {
        let mut c = Interp::new();
        let mut r = Reader::new("(1 2");
        assert!(matches!(
            r.read_all(&mut c),
            Err(ReadError::UnexpectedEof { .. })
        ));
        let mut r = Reader::new(")");
        assert!(matches!(
            r.read_all(&mut c),
            Err(ReadError::UnmatchedParen { .. })
        ));
    }
}
