use crate::ast::{Code, CodeItem, PathExpr, Value, Word, WordKind};
use crate::error::SorrelError;

/// Characters that terminate an identifier run.
const IDENT_TERMINATORS: &str = " \n\t\r[]():/";

/// Parse source text into an ordered code sequence. Pure: no binding, no
/// side effects. Malformed input (unterminated string, unbalanced
/// nesting, empty identifier) is a parse error rather than a silently
/// truncated tree.
pub fn parse(source: &str) -> Result<Code, SorrelError> {
    parse_at(source, 0)
}

/// Parse starting from a character offset into `source`.
pub fn parse_at(source: &str, start: usize) -> Result<Code, SorrelError> {
    Parser::new(source, start).run()
}

#[derive(Clone, Copy, PartialEq)]
enum OpenKind {
    Block,
    Brackets,
}

struct Parser {
    chars: Vec<char>,
    index: usize,
}

impl Parser {
    fn new(source: &str, start: usize) -> Self {
        Self {
            chars: source.chars().collect(),
            index: start,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn advance(&mut self) {
        self.index += 1;
    }

    fn run(&mut self) -> Result<Code, SorrelError> {
        // One nesting-stack entry per currently open `[` or `(`.
        let mut stack: Vec<(OpenKind, Code)> = Vec::new();
        let mut current: Code = Vec::new();

        while let Some(c) = self.peek() {
            match c {
                ' ' | '\n' | '\t' | '\r' => self.advance(),
                '[' => {
                    self.advance();
                    stack.push((OpenKind::Block, std::mem::take(&mut current)));
                }
                ']' => {
                    self.advance();
                    match stack.pop() {
                        Some((OpenKind::Block, parent)) => {
                            let code = std::mem::replace(&mut current, parent);
                            current.push(CodeItem::Block(code));
                        }
                        Some((OpenKind::Brackets, _)) => {
                            return Err(SorrelError::parse("expected ) but found ]"));
                        }
                        None => return Err(SorrelError::parse("unmatched ]")),
                    }
                }
                '(' => {
                    self.advance();
                    stack.push((OpenKind::Brackets, std::mem::take(&mut current)));
                }
                ')' => {
                    self.advance();
                    match stack.pop() {
                        Some((OpenKind::Brackets, parent)) => {
                            let code = std::mem::replace(&mut current, parent);
                            current.push(CodeItem::Brackets(code));
                        }
                        Some((OpenKind::Block, _)) => {
                            return Err(SorrelError::parse("expected ] but found )"));
                        }
                        None => return Err(SorrelError::parse("unmatched )")),
                    }
                }
                '0'..='9' => current.push(CodeItem::Const(Value::Int(self.read_integer()?))),
                '"' => current.push(CodeItem::Const(Value::Str(self.read_string()?))),
                '/' => {
                    self.advance();
                    let ident = self.read_ident();
                    if ident.is_empty() {
                        return Err(SorrelError::parse("empty refinement"));
                    }
                    current.push(CodeItem::Refinement(ident));
                }
                _ => current.push(self.read_word()?),
            }
        }

        if !stack.is_empty() {
            return Err(SorrelError::parse("unclosed block or brackets at end of input"));
        }
        Ok(current)
    }

    fn read_ident(&mut self) -> String {
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if IDENT_TERMINATORS.contains(c) {
                break;
            }
            ident.push(c);
            self.advance();
        }
        ident
    }

    fn read_integer(&mut self) -> Result<i64, SorrelError> {
        let mut value: i64 = 0;
        while let Some(c) = self.peek() {
            let Some(digit) = c.to_digit(10) else { break };
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(digit as i64))
                .ok_or_else(|| SorrelError::parse("integer literal overflow"))?;
            self.advance();
        }
        Ok(value)
    }

    fn read_string(&mut self) -> Result<String, SorrelError> {
        self.advance();
        let mut out = String::new();
        loop {
            match self.peek() {
                Some('"') => {
                    self.advance();
                    return Ok(out);
                }
                Some(c) => {
                    out.push(c);
                    self.advance();
                }
                None => return Err(SorrelError::parse("unterminated string")),
            }
        }
    }

    fn read_word(&mut self) -> Result<CodeItem, SorrelError> {
        let mut kind = WordKind::Norm;
        match self.peek() {
            Some('\'') => {
                kind = WordKind::Quote;
                self.advance();
            }
            Some(':') => {
                kind = WordKind::Get;
                self.advance();
            }
            _ => {}
        }

        let ident = self.read_ident();
        if ident.is_empty() {
            return Err(SorrelError::parse(format!(
                "empty identifier at offset {}",
                self.index
            )));
        }

        match self.peek() {
            Some(':') => {
                kind = WordKind::Set;
                self.advance();
            }
            Some('/') => {
                // The kind of the whole path comes from the prefix of the
                // first segment.
                let mut segments = vec![ident];
                self.advance();
                loop {
                    let segment = self.read_ident();
                    if segment.is_empty() {
                        return Err(SorrelError::parse("empty path segment"));
                    }
                    segments.push(segment);
                    if self.peek() == Some('/') {
                        self.advance();
                    } else {
                        break;
                    }
                }
                return Ok(CodeItem::Path(PathExpr::new(kind, segments)));
            }
            _ => {}
        }

        Ok(CodeItem::Word(Word::new(kind, ident)))
    }
}
