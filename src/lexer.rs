use crate::ast::{NumberFactor, Token};

/// A location in the input text. `offset` is a byte offset suitable for
/// slicing the original buffer; `line` and `column` are 1-based and meant
/// for error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
    byte_offset: usize,
    line: usize,
    column: usize,
    token_start: Position,
    prev_ends_operand: bool,
    peeked: Option<(Token, Position)>,
    legacy: bool,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            position: 0,
            byte_offset: 0,
            line: 1,
            column: 1,
            token_start: Position {
                offset: 0,
                line: 1,
                column: 1,
            },
            prev_ends_operand: false,
            peeked: None,
            legacy: false,
        }
    }

    /// Enables the legacy lexing mode, where a backslash-quote that would
    /// end a string is read as a literal backslash plus the closing quote.
    pub fn set_legacy(&mut self, legacy: bool) {
        self.legacy = legacy;
    }

    /// Where the most recently returned token started.
    pub fn token_start(&self) -> Position {
        self.token_start
    }

    fn current_char(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_char(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            self.byte_offset += ch.len_utf8();
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
            self.position += 1;
        }
    }

    fn here(&self) -> Position {
        Position {
            offset: self.byte_offset,
            line: self.line,
            column: self.column,
        }
    }

    /// Returns the next token without consuming it.
    pub fn peek_token(&mut self) -> Token {
        if self.peeked.is_none() {
            let start_state = self.prev_ends_operand;
            let tok = self.scan_token(start_state);
            self.peeked = Some((tok, self.token_start));
        }
        self.peeked
            .as_ref()
            .map(|(t, _)| t.clone())
            .expect("peeked token was just stored")
    }

    /// Returns and consumes the next token. Once the input is exhausted,
    /// every further call returns [`Token::EndOfInput`].
    pub fn next_token(&mut self) -> Token {
        let tok = match self.peeked.take() {
            Some((tok, start)) => {
                self.token_start = start;
                tok
            }
            None => {
                let start_state = self.prev_ends_operand;
                self.scan_token(start_state)
            }
        };
        self.prev_ends_operand = tok.ends_operand();
        tok
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), String> {
        loop {
            match self.current_char() {
                Some(ch) if ch.is_whitespace() => self.advance(),
                Some('/') if self.peek_char(1) == Some('/') => {
                    while let Some(ch) = self.current_char() {
                        self.advance();
                        if ch == '\n' {
                            break;
                        }
                    }
                }
                Some('/') if self.peek_char(1) == Some('*') => {
                    self.advance();
                    self.advance();
                    loop {
                        match self.current_char() {
                            Some('*') if self.peek_char(1) == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => self.advance(),
                            None => return Err("unterminated block comment".to_string()),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn scan_token(&mut self, prev_ends_operand: bool) -> Token {
        if let Err(msg) = self.skip_whitespace_and_comments() {
            self.token_start = self.here();
            return Token::Error(msg);
        }
        self.token_start = self.here();

        let ch = match self.current_char() {
            Some(ch) => ch,
            None => return Token::EndOfInput,
        };

        match ch {
            '0'..='9' => self.read_number(false),
            '-' => {
                // A minus after something that can end an operand is the
                // binary operator; otherwise, glued to a digit, it is the
                // sign of a numeric literal.
                if !prev_ends_operand && self.peek_char(1).is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                    self.read_number(true)
                } else {
                    self.advance();
                    Token::Minus
                }
            }
            '"' => self.read_string_token('"'),
            '\'' => self.read_string_token('\''),
            '+' => {
                self.advance();
                Token::Plus
            }
            '*' => {
                self.advance();
                Token::Multiply
            }
            '/' => {
                self.advance();
                Token::Divide
            }
            '%' => {
                self.advance();
                Token::Modulus
            }
            '.' => {
                self.advance();
                Token::Selection
            }
            ',' => {
                self.advance();
                Token::Comma
            }
            ';' => {
                self.advance();
                Token::Semicolon
            }
            ':' => {
                self.advance();
                Token::Colon
            }
            '~' => {
                self.advance();
                Token::BitwiseNot
            }
            '^' => {
                self.advance();
                Token::BitwiseXor
            }
            '(' => {
                self.advance();
                Token::OpenParen
            }
            ')' => {
                self.advance();
                Token::CloseParen
            }
            '[' => {
                self.advance();
                Token::OpenBox
            }
            ']' => {
                self.advance();
                Token::CloseBox
            }
            '{' => {
                self.advance();
                Token::OpenBrace
            }
            '}' => {
                self.advance();
                Token::CloseBrace
            }
            '?' => {
                self.advance();
                if self.current_char() == Some(':') {
                    self.advance();
                    Token::Elvis
                } else {
                    Token::QMark
                }
            }
            '<' => {
                self.advance();
                match self.current_char() {
                    Some('=') => {
                        self.advance();
                        Token::LessOrEqual
                    }
                    Some('<') => {
                        self.advance();
                        Token::LeftShift
                    }
                    _ => Token::LessThan,
                }
            }
            '>' => {
                self.advance();
                match self.current_char() {
                    Some('=') => {
                        self.advance();
                        Token::GreaterOrEqual
                    }
                    Some('>') => {
                        self.advance();
                        if self.current_char() == Some('>') {
                            self.advance();
                            Token::URightShift
                        } else {
                            Token::RightShift
                        }
                    }
                    _ => Token::GreaterThan,
                }
            }
            '=' => {
                self.advance();
                match self.current_char() {
                    Some('=') => {
                        self.advance();
                        Token::Equal
                    }
                    Some('?') if self.peek_char(1) == Some('=') => {
                        self.advance();
                        self.advance();
                        Token::MetaEqual
                    }
                    Some('!') if self.peek_char(1) == Some('=') => {
                        self.advance();
                        self.advance();
                        Token::MetaNotEqual
                    }
                    _ => Token::BoundTo,
                }
            }
            '!' => {
                self.advance();
                if self.current_char() == Some('=') {
                    self.advance();
                    Token::NotEqual
                } else {
                    Token::LogicalNot
                }
            }
            '&' => {
                self.advance();
                if self.current_char() == Some('&') {
                    self.advance();
                    Token::LogicalAnd
                } else {
                    Token::BitwiseAnd
                }
            }
            '|' => {
                self.advance();
                if self.current_char() == Some('|') {
                    self.advance();
                    Token::LogicalOr
                } else {
                    Token::BitwiseOr
                }
            }
            ch if ch.is_alphabetic() || ch == '_' => {
                let ident = self.read_identifier();
                match ident.to_ascii_lowercase().as_str() {
                    "true" => Token::Boolean(true),
                    "false" => Token::Boolean(false),
                    "undefined" => Token::Undefined,
                    "error" => Token::ErrorValue,
                    "is" => Token::MetaEqual,
                    "isnt" => Token::MetaNotEqual,
                    _ => Token::Identifier(ident),
                }
            }
            ch => {
                self.advance();
                Token::Error(format!("unexpected character '{}'", ch))
            }
        }
    }

    fn read_identifier(&mut self) -> String {
        let mut result = String::new();
        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' {
                result.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        result
    }

    fn read_number(&mut self, negative: bool) -> Token {
        // hex
        if self.current_char() == Some('0')
            && matches!(self.peek_char(1), Some('x') | Some('X'))
            && self.peek_char(2).is_some_and(|c| c.is_ascii_hexdigit())
        {
            self.advance();
            self.advance();
            let mut digits = String::new();
            while let Some(ch) = self.current_char() {
                if ch.is_ascii_hexdigit() {
                    digits.push(ch);
                    self.advance();
                } else {
                    break;
                }
            }
            return match i64::from_str_radix(&digits, 16) {
                Ok(v) => Token::Integer(if negative { -v } else { v }, self.read_factor()),
                Err(_) => Token::Error(format!("integer literal 0x{} out of range", digits)),
            };
        }

        let mut digits = String::new();
        let mut is_real = false;

        while let Some(ch) = self.current_char() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else if ch == '.'
                && !is_real
                && self.peek_char(1).is_some_and(|c| c.is_ascii_digit())
            {
                is_real = true;
                digits.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        // exponent makes it a real, but only when an exponent actually follows
        if matches!(self.current_char(), Some('e') | Some('E')) {
            let after_sign = match self.peek_char(1) {
                Some('+') | Some('-') => 2,
                _ => 1,
            };
            if self.peek_char(after_sign).is_some_and(|c| c.is_ascii_digit()) {
                is_real = true;
                digits.push('e');
                self.advance();
                if matches!(self.current_char(), Some('+') | Some('-')) {
                    digits.push(self.current_char().expect("sign was peeked"));
                    self.advance();
                }
                while let Some(ch) = self.current_char() {
                    if ch.is_ascii_digit() {
                        digits.push(ch);
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }

        if is_real {
            let factor = self.read_factor();
            match digits.parse::<f64>() {
                Ok(v) => Token::Real(if negative { -v } else { v }, factor),
                Err(_) => Token::Error(format!("malformed real literal '{}'", digits)),
            }
        } else if digits.len() > 1 && digits.starts_with('0') {
            // leading zero means octal
            let factor = self.read_factor();
            match i64::from_str_radix(&digits[1..], 8) {
                Ok(v) => Token::Integer(if negative { -v } else { v }, factor),
                Err(_) => Token::Error(format!("malformed octal literal '{}'", digits)),
            }
        } else {
            let factor = self.read_factor();
            match digits.parse::<i64>() {
                Ok(v) => Token::Integer(if negative { -v } else { v }, factor),
                Err(_) => Token::Error(format!("integer literal '{}' out of range", digits)),
            }
        }
    }

    fn read_factor(&mut self) -> NumberFactor {
        if let Some(ch) = self.current_char() {
            if let Some(factor) = NumberFactor::from_char(ch) {
                // only a lone suffix letter counts; `2Kb` is `2` and `Kb`
                let next_continues = self
                    .peek_char(1)
                    .is_some_and(|c| c.is_alphanumeric() || c == '_');
                if !next_continues {
                    self.advance();
                    return factor;
                }
            }
        }
        NumberFactor::None
    }

    fn read_string_token(&mut self, quote: char) -> Token {
        match self.read_string(quote) {
            Ok(s) => {
                if quote == '"' {
                    Token::String(s)
                } else {
                    Token::QuotedIdentifier(s)
                }
            }
            Err(msg) => Token::Error(msg),
        }
    }

    fn read_string(&mut self, quote: char) -> Result<String, String> {
        let mut result = String::new();
        self.advance(); // consume opening quote

        loop {
            match self.current_char() {
                None => return Err("unterminated string literal".to_string()),
                Some(c) if c == quote => {
                    self.advance();
                    return Ok(result);
                }
                Some('\\') => {
                    // legacy strings: a backslash-quote that would end the
                    // string keeps the backslash and closes the string
                    if self.legacy
                        && quote == '"'
                        && self.peek_char(1) == Some('"')
                        && !self.legacy_quote_continues(2)
                    {
                        self.advance(); // backslash
                        self.advance(); // closing quote
                        result.push('\\');
                        return Ok(result);
                    }
                    self.advance();
                    let escaped = match self.current_char() {
                        None => return Err("unterminated string after backslash".to_string()),
                        Some(ch) => ch,
                    };
                    if ('0'..='7').contains(&escaped) {
                        let mut octal = String::new();
                        while octal.len() < 3
                            && self.current_char().is_some_and(|c| ('0'..='7').contains(&c))
                        {
                            octal.push(self.current_char().expect("octal digit was peeked"));
                            self.advance();
                        }
                        let code = u32::from_str_radix(&octal, 8)
                            .map_err(|_| format!("malformed octal escape '\\{}'", octal))?;
                        if code == 0 {
                            return Err("octal escape yields NUL".to_string());
                        }
                        match char::from_u32(code) {
                            Some(c) => result.push(c),
                            None => {
                                return Err(format!("octal escape '\\{}' out of range", octal))
                            }
                        }
                    } else {
                        result.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            'a' => '\u{7}',
                            'b' => '\u{8}',
                            'f' => '\u{c}',
                            'v' => '\u{b}',
                            other => other, // includes \\ \" \' and pass-through
                        });
                        self.advance();
                    }
                }
                Some(ch) => {
                    result.push(ch);
                    self.advance();
                }
            }
        }
    }

    /// In legacy mode, decides whether the quote at `offset - 1` is an
    /// escaped quote inside the string (true) or the string's terminator
    /// (false), by checking whether the character following it could
    /// continue an expression.
    fn legacy_quote_continues(&self, offset: usize) -> bool {
        match self.peek_char(offset) {
            None => false,
            Some(ch) => !(ch.is_whitespace() || matches!(ch, ',' | ';' | ']' | ')' | '}')),
        }
    }
}

#[test]
fn test_reserved_words() {
    let mut lexer = Lexer::new("true FALSE undefined ERROR is isnt");
    assert_eq!(lexer.next_token(), Token::Boolean(true));
    assert_eq!(lexer.next_token(), Token::Boolean(false));
    assert_eq!(lexer.next_token(), Token::Undefined);
    assert_eq!(lexer.next_token(), Token::ErrorValue);
    assert_eq!(lexer.next_token(), Token::MetaEqual);
    assert_eq!(lexer.next_token(), Token::MetaNotEqual);
    assert_eq!(lexer.next_token(), Token::EndOfInput);
}

#[test]
fn test_minus_disambiguation() {
    use crate::ast::NumberFactor::None as NoF;
    let mut lexer = Lexer::new("a-1 * -2");
    assert_eq!(lexer.next_token(), Token::Identifier("a".to_string()));
    assert_eq!(lexer.next_token(), Token::Minus);
    assert_eq!(lexer.next_token(), Token::Integer(1, NoF));
    assert_eq!(lexer.next_token(), Token::Multiply);
    assert_eq!(lexer.next_token(), Token::Integer(-2, NoF));
}
