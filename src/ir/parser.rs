//! Textual IR listing reader.
//!
//! Reads the syntax produced by the `Display` impls of [`Function`] and
//! [`Module`]. The grammar is line oriented:
//!
//! ```text
//! function NAME {      ; opens a function
//! @N:                  ; starts block N, numbered from 0 without gaps
//!     MNEMONIC param*  ; one instruction
//! }                    ; closes the function
//! ```
//!
//! Parameters are `%name` or `%name,N` (variable), a decimal or `0x` integer,
//! a quoted string, or a bare identifier (string). Everything after `;`
//! outside a string is a comment.

use super::{BasicBlock, Function, Instruction, Module, Opcode, Parameter, Variable};
use crate::core::error::IrError;

/// Parse every function in `text`.
pub fn parse_module(text: &str) -> Result<Module, IrError> {
    Parser::new().parse(text)
}

/// Parse a listing holding exactly one function.
pub fn parse_function(text: &str) -> Result<Function, IrError> {
    let module = parse_module(text)?;
    let count = module.len();
    let mut functions = module.functions().iter();
    match (functions.next(), count) {
        (Some(function), 1) => Ok(function.clone()),
        _ => Err(IrError::Parse {
            line: text.lines().count().max(1),
            message: format!("expected exactly one function, found {count}"),
        }),
    }
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Word(&'a str),
    Quoted(String),
}

struct Parser {
    module: Module,
    // Function being read and the line it opened on.
    current: Option<(Function, usize)>,
    line: usize,
}

impl Parser {
    fn new() -> Self {
        Self {
            module: Module::new(),
            current: None,
            line: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> IrError {
        IrError::Parse {
            line: self.line,
            message: message.into(),
        }
    }

    fn parse(mut self, text: &str) -> Result<Module, IrError> {
        for (index, line) in text.lines().enumerate() {
            self.line = index + 1;
            let tokens = self.tokenize(line)?;
            if tokens.is_empty() {
                continue;
            }
            self.parse_line(&tokens)?;
        }

        if let Some((function, opened)) = self.current.take() {
            return Err(IrError::Parse {
                line: opened,
                message: format!("function `{}` is never closed", function.name()),
            });
        }
        log::debug!("parsed {} functions from listing", self.module.len());
        Ok(self.module)
    }

    fn parse_line(&mut self, tokens: &[Token<'_>]) -> Result<(), IrError> {
        match tokens {
            [Token::Word("function"), Token::Word(name), Token::Word("{")] => {
                if self.current.is_some() {
                    return Err(self.error("functions cannot be nested"));
                }
                if !is_identifier(name) {
                    return Err(self.error(format!("invalid function name `{name}`")));
                }
                self.current = Some((Function::new(*name), self.line));
                Ok(())
            }
            [Token::Word("}")] => match self.current.take() {
                Some((function, _)) => {
                    self.module.push(function);
                    Ok(())
                }
                None => Err(self.error("`}` without an open function")),
            },
            [Token::Word(label)] if label.starts_with('@') => self.parse_label(label),
            [Token::Word(mnemonic), params @ ..] => {
                let instruction = self.parse_instruction(mnemonic, params)?;
                let outside = self.error("instruction outside of a function");
                let unlabeled = self.error("instruction before the first block label");
                let (function, _) = self.current.as_mut().ok_or(outside)?;
                let block = function
                    .blocks()
                    .len()
                    .checked_sub(1)
                    .and_then(|index| function.block_mut(index))
                    .ok_or(unlabeled)?;
                block.push(instruction);
                Ok(())
            }
            _ => Err(self.error("expected a mnemonic")),
        }
    }

    fn parse_label(&mut self, label: &str) -> Result<(), IrError> {
        let index: usize = label
            .strip_prefix('@')
            .and_then(|rest| rest.strip_suffix(':'))
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| self.error(format!("malformed block label `{label}`")))?;
        let line = self.line;
        let outside = self.error("block label outside of a function");
        let (function, _) = self.current.as_mut().ok_or(outside)?;
        let expected = function.blocks().len();
        if index != expected {
            return Err(IrError::Parse {
                line,
                message: format!("expected block @{expected}, found @{index}"),
            });
        }
        function.push_block(BasicBlock::new());
        Ok(())
    }

    fn parse_instruction(&self, mnemonic: &str, tokens: &[Token<'_>]) -> Result<Instruction, IrError> {
        let opcode = Opcode::from_mnemonic(mnemonic)
            .ok_or_else(|| self.error(format!("unknown mnemonic `{mnemonic}`")))?;
        let params = tokens
            .iter()
            .map(|token| self.parse_param(token))
            .collect::<Result<Vec<_>, _>>()?;
        Instruction::new(opcode, params).map_err(|e| self.error(e.to_string()))
    }

    fn parse_param(&self, token: &Token<'_>) -> Result<Parameter, IrError> {
        let word = match token {
            Token::Quoted(text) => return Ok(Parameter::StringLiteral(text.clone())),
            Token::Word(word) => *word,
        };

        if let Some(rest) = word.strip_prefix('%') {
            let (name, offset) = match rest.split_once(',') {
                Some((name, offset)) => (name, Some(self.parse_int(offset)?)),
                None => (rest, None),
            };
            if !is_identifier(name) {
                return Err(self.error(format!("invalid variable name `{name}`")));
            }
            return Ok(Parameter::Variable(Variable {
                name: name.to_string(),
                offset,
            }));
        }

        if word.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
            return self.parse_int(word).map(Parameter::IntLiteral);
        }

        if is_identifier(word) {
            return Ok(Parameter::StringLiteral(word.to_string()));
        }
        Err(self.error(format!("unexpected token `{word}`")))
    }

    fn parse_int(&self, text: &str) -> Result<i32, IrError> {
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let invalid = || self.error(format!("invalid integer `{text}`"));
        let magnitude = match digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
        {
            // A second sign would otherwise be accepted by the std parsers.
            Some(hex) if hex.starts_with(|c: char| c.is_ascii_hexdigit()) => {
                i64::from_str_radix(hex, 16)
            }
            None if digits.starts_with(|c: char| c.is_ascii_digit()) => digits.parse::<i64>(),
            _ => return Err(invalid()),
        }
        .map_err(|_| invalid())?;

        let value = if negative { -magnitude } else { magnitude };
        i32::try_from(value).map_err(|_| self.error(format!("integer `{text}` does not fit in 32 bits")))
    }

    fn tokenize<'a>(&self, line: &'a str) -> Result<Vec<Token<'a>>, IrError> {
        let mut tokens = Vec::new();
        let mut chars = line.char_indices().peekable();

        while let Some(&(start, ch)) = chars.peek() {
            if ch == ';' {
                break;
            }
            if ch.is_whitespace() {
                chars.next();
                continue;
            }

            if ch == '"' {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some((_, '"')) => break,
                        Some((_, '\\')) => match chars.next() {
                            Some((_, 'n')) => text.push('\n'),
                            Some((_, 't')) => text.push('\t'),
                            Some((_, 'r')) => text.push('\r'),
                            Some((_, 'u')) => text.push(self.unicode_escape(&mut chars)?),
                            Some((_, c @ ('"' | '\\'))) => text.push(c),
                            _ => return Err(self.error("invalid escape in string literal")),
                        },
                        Some((_, c)) => text.push(c),
                        None => return Err(self.error("unterminated string literal")),
                    }
                }
                tokens.push(Token::Quoted(text));
                continue;
            }

            let mut end = line.len();
            while let Some(&(pos, c)) = chars.peek() {
                if c.is_whitespace() || c == ';' || c == '"' {
                    end = pos;
                    break;
                }
                chars.next();
            }
            tokens.push(Token::Word(&line[start..end]));
        }
        Ok(tokens)
    }

    // `\u{hex}` after the `u`
    fn unicode_escape(
        &self,
        chars: &mut impl Iterator<Item = (usize, char)>,
    ) -> Result<char, IrError> {
        let invalid = || self.error("invalid escape in string literal");
        if !matches!(chars.next(), Some((_, '{'))) {
            return Err(invalid());
        }
        let mut hex = String::new();
        loop {
            match chars.next() {
                Some((_, '}')) => break,
                Some((_, c)) if c.is_ascii_hexdigit() && hex.len() < 6 => hex.push(c),
                _ => return Err(invalid()),
            }
        }
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(invalid)
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}
