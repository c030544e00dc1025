//! Safe parser for the Python literal subset the device emits
//!
//! The file-scan snippet makes the REPL print a nested dict/tuple structure.
//! Device output is untrusted, so it is parsed with a small recursive-descent
//! parser instead of being evaluated. Supported: dicts, tuples, lists,
//! single/double-quoted strings, signed integers, True/False/None.

/// One parsed literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    None,
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Vec<(Value, Value)>),
}

impl Value {
    /// String payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload, if this is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Look up a dict entry by string key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

/// Parse a single line as a literal value.
///
/// Returns `None` unless the entire input (modulo surrounding whitespace)
/// is one well-formed literal. Candidate lines that fail to parse are
/// simply not file-tree output.
pub fn parse(input: &str) -> Option<Value> {
    let mut p = Parser {
        bytes: input.as_bytes(),
        pos: 0,
    };
    p.skip_ws();
    let value = p.value()?;
    p.skip_ws();
    if p.pos == p.bytes.len() {
        Some(value)
    } else {
        None
    }
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.bytes[self.pos..].starts_with(word.as_bytes()) {
            self.pos += word.len();
            true
        } else {
            false
        }
    }

    fn value(&mut self) -> Option<Value> {
        self.skip_ws();
        match self.peek()? {
            b'{' => self.dict(),
            b'(' => self.tuple(),
            b'[' => self.list(),
            b'\'' | b'"' => self.string(),
            b'-' | b'0'..=b'9' => self.integer(),
            b'T' if self.eat_word("True") => Some(Value::Bool(true)),
            b'F' if self.eat_word("False") => Some(Value::Bool(false)),
            b'N' if self.eat_word("None") => Some(Value::None),
            _ => None,
        }
    }

    fn dict(&mut self) -> Option<Value> {
        self.eat(b'{');
        let mut entries = Vec::new();
        self.skip_ws();
        if self.eat(b'}') {
            return Some(Value::Dict(entries));
        }
        loop {
            let key = self.value()?;
            self.skip_ws();
            if !self.eat(b':') {
                return None;
            }
            let val = self.value()?;
            entries.push((key, val));
            self.skip_ws();
            if self.eat(b',') {
                self.skip_ws();
                // Tolerate a trailing comma before the closing brace
                if self.eat(b'}') {
                    return Some(Value::Dict(entries));
                }
                continue;
            }
            if self.eat(b'}') {
                return Some(Value::Dict(entries));
            }
            return None;
        }
    }

    fn tuple(&mut self) -> Option<Value> {
        self.eat(b'(');
        let items = self.items(b')')?;
        Some(Value::Tuple(items))
    }

    fn list(&mut self) -> Option<Value> {
        self.eat(b'[');
        let items = self.items(b']')?;
        Some(Value::List(items))
    }

    fn items(&mut self, close: u8) -> Option<Vec<Value>> {
        let mut items = Vec::new();
        self.skip_ws();
        if self.eat(close) {
            return Some(items);
        }
        loop {
            items.push(self.value()?);
            self.skip_ws();
            if self.eat(b',') {
                self.skip_ws();
                // (1,) style trailing comma
                if self.eat(close) {
                    return Some(items);
                }
                continue;
            }
            if self.eat(close) {
                return Some(items);
            }
            return None;
        }
    }

    // Accumulates bytes, not chars: the input is a valid &str and the
    // quote/escape bytes are ASCII, so multi-byte sequences pass through
    // intact and the result re-validates as UTF-8.
    fn string(&mut self) -> Option<Value> {
        let quote = self.bump()?;
        let mut out = Vec::new();
        loop {
            match self.bump()? {
                b'\\' => match self.bump()? {
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    b'\\' => out.push(b'\\'),
                    b'\'' => out.push(b'\''),
                    b'"' => out.push(b'"'),
                    other => {
                        out.push(b'\\');
                        out.push(other);
                    }
                },
                b if b == quote => return String::from_utf8(out).ok().map(Value::Str),
                b => out.push(b),
            }
        }
    }

    fn integer(&mut self) -> Option<Value> {
        let start = self.pos;
        self.eat(b'-');
        let digits_start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if self.pos == digits_start {
            return None;
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).ok()?;
        text.parse::<i64>().ok().map(Value::Int)
    }
}
