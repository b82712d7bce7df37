//! Textual operation syntax.
//!
//! ```text
//! [/type=value[/type=value...]]:operation[(name=value[,name=value...])]
//! ```
//!
//! Parameter values are double-quoted strings, JSON objects or arrays,
//! `true`/`false`, integers, `undefined`, or bare words taken as strings.

use crate::transport::{Address, Operation, RESERVED_PARAMS};
use serde_json::Value;

/// Parses one command into an operation.
///
/// The error is a human-readable description including the column.
///
/// ```
/// use appserver_runner::commands::parse_operation;
///
/// let op = parse_operation("/system-property=foo:add(value=bar)").unwrap();
/// assert_eq!(op.name(), "add");
/// assert_eq!(op.address().to_string(), "/system-property=foo");
/// assert_eq!(op.get_param("value").unwrap(), "bar");
/// ```
pub fn parse_operation(text: &str) -> Result<Operation, String> {
    let mut cursor = Cursor::new(text.trim());
    let address = cursor.address()?;
    cursor.expect(':')?;
    let name = cursor.operation_name()?;
    let mut operation = Operation::new(name, address);

    cursor.skip_whitespace();
    if cursor.eat('(') {
        for (key, value) in cursor.parameters()? {
            operation = operation.param(key, value);
        }
    }

    cursor.skip_whitespace();
    if let Some(c) = cursor.peek() {
        return Err(cursor.error(&format!("unexpected '{}' after operation", c)));
    }
    Ok(operation)
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), String> {
        if self.eat(expected) {
            Ok(())
        } else {
            match self.peek() {
                Some(c) => Err(self.error(&format!("expected '{}' but found '{}'", expected, c))),
                None => Err(self.error(&format!("expected '{}' but reached the end", expected))),
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn error(&self, message: &str) -> String {
        format!("{} at column {}", message, self.text[..self.pos].chars().count() + 1)
    }

    /// Consumes characters up to (not including) any of `stops`
    fn take_until(&mut self, stops: &[char]) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if stops.contains(&c) {
                break;
            }
            self.bump();
        }
        &self.text[start..self.pos]
    }

    fn address(&mut self) -> Result<Address, String> {
        let mut address = Address::root();
        while self.peek() == Some('/') {
            self.bump();
            if matches!(self.peek(), Some(':') | None) {
                break;
            }
            let key = self.take_until(&['=', '/', ':']).trim();
            if key.is_empty() {
                return Err(self.error("empty resource type in address"));
            }
            self.expect('=')?;
            let value = if self.peek() == Some('"') {
                self.quoted()?
            } else {
                self.take_until(&['/', ':']).trim().to_string()
            };
            if value.is_empty() {
                return Err(self.error(&format!("empty value for '{}' in address", key)));
            }
            address = address.append(key, value);
        }
        Ok(address)
    }

    fn operation_name(&mut self) -> Result<String, String> {
        let name = self.take_until(&['(', ' ', '\t']);
        if name.is_empty() {
            return Err(self.error("missing operation name"));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(self.error(&format!("invalid character '{}' in operation name", bad)));
        }
        Ok(name.to_string())
    }

    fn parameters(&mut self) -> Result<Vec<(String, Value)>, String> {
        let mut params = Vec::new();
        self.skip_whitespace();
        if self.eat(')') {
            return Ok(params);
        }
        loop {
            self.skip_whitespace();
            let key = self.take_until(&['=', ',', ')']).trim();
            if key.is_empty() {
                return Err(self.error("missing parameter name"));
            }
            if RESERVED_PARAMS.contains(&key) {
                return Err(self.error(&format!(
                    "'{}' is reserved and cannot be a parameter name",
                    key
                )));
            }
            let key = key.to_string();
            self.expect('=')?;
            self.skip_whitespace();
            let value = self.value()?;
            params.push((key, value));

            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some(')') => return Ok(params),
                Some(c) => {
                    self.pos -= c.len_utf8();
                    return Err(self.error(&format!("expected ',' or ')' but found '{}'", c)));
                }
                None => return Err(self.error("unterminated parameter list")),
            }
        }
    }

    fn value(&mut self) -> Result<Value, String> {
        match self.peek() {
            Some('"') => self.quoted().map(Value::String),
            Some('{') | Some('[') => self.json(),
            _ => {
                let word = self.take_until(&[',', ')']).trim();
                if word.is_empty() {
                    return Err(self.error("missing parameter value"));
                }
                Ok(match word {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    "undefined" => Value::Null,
                    _ => word
                        .parse::<i64>()
                        .map(Value::from)
                        .unwrap_or_else(|_| Value::String(word.to_string())),
                })
            }
        }
    }

    fn quoted(&mut self) -> Result<String, String> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated string")),
            }
        }
    }

    /// A JSON object or array, found by bracket matching outside strings
    fn json(&mut self) -> Result<Value, String> {
        let start = self.pos;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        while let Some(c) = self.bump() {
            if in_string {
                match c {
                    _ if escaped => escaped = false,
                    '\\' => escaped = true,
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '"' => in_string = true,
                '{' | '[' => depth += 1,
                '}' | ']' => {
                    depth -= 1;
                    if depth == 0 {
                        let raw = &self.text[start..self.pos];
                        return serde_json::from_str(raw)
                            .map_err(|e| self.error(&format!("invalid JSON value: {}", e)));
                    }
                }
                _ => {}
            }
        }
        Err(self.error("unterminated JSON value"))
    }
}
