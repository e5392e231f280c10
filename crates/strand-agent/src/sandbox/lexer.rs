use super::SandboxError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    Keyword(Keyword),
    /// Operators and punctuation, longest match first.
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    And,
    Or,
    Not,
    In,
    Is,
    If,
    Else,
    For,
    Lambda,
    True,
    False,
    None,
    Await,
    Yield,
    /// Statement-only keywords (`import`, `def`, ...). Never valid in an expression.
    Statement(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    /// Character offset of the token's first character.
    pub pos: usize,
}

const PUNCT: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "...", "**", "//", "<<", ">>", "<=", ">=", "==", "!=", ":=",
    "->", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "@=", "+", "-", "*", "/", "%", "@",
    "&", "|", "^", "~", "<", ">", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";", "=",
];

const STATEMENT_KEYWORDS: &[&str] = &[
    "import", "from", "def", "class", "return", "del", "global", "nonlocal", "pass", "raise",
    "try", "except", "finally", "while", "with", "as", "assert", "async", "break", "continue",
    "elif",
];

fn keyword(word: &str) -> Option<Keyword> {
    let kw = match word {
        "and" => Keyword::And,
        "or" => Keyword::Or,
        "not" => Keyword::Not,
        "in" => Keyword::In,
        "is" => Keyword::Is,
        "if" => Keyword::If,
        "else" => Keyword::Else,
        "for" => Keyword::For,
        "lambda" => Keyword::Lambda,
        "True" => Keyword::True,
        "False" => Keyword::False,
        "None" => Keyword::None,
        "await" => Keyword::Await,
        "yield" => Keyword::Yield,
        other => {
            let stmt = STATEMENT_KEYWORDS.iter().find(|k| **k == other)?;
            Keyword::Statement(stmt)
        }
    };
    Some(kw)
}

/// Split an expression into tokens. The last token is always `Eof`.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, SandboxError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '#' {
            return Err(syntax(start, "comments are not allowed"));
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let (token, next) = number(&chars, i)?;
            tokens.push(Spanned { token, pos: start });
            i = next;
            continue;
        }

        if c == '\'' || c == '"' {
            let (s, next) = string(&chars, i)?;
            tokens.push(Spanned {
                token: Token::Str(s),
                pos: start,
            });
            i = next;
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let token = match keyword(&word) {
                Some(kw) => Token::Keyword(kw),
                None => Token::Name(word),
            };
            tokens.push(Spanned { token, pos: start });
            continue;
        }

        let punct = PUNCT.iter().find(|p| {
            let len = p.chars().count();
            i + len <= chars.len() && p.chars().eq(chars[i..i + len].iter().copied())
        });
        match punct {
            Some(p) => {
                tokens.push(Spanned {
                    token: Token::Punct(p),
                    pos: start,
                });
                i += p.chars().count();
            }
            None => return Err(syntax(start, &format!("unexpected character '{}'", c))),
        }
    }

    tokens.push(Spanned {
        token: Token::Eof,
        pos: chars.len(),
    });
    Ok(tokens)
}

fn number(chars: &[char], mut i: usize) -> Result<(Token, usize), SandboxError> {
    let start = i;
    let mut is_float = false;

    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '_') {
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' {
        is_float = true;
        i += 1;
        while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '_') {
            i += 1;
        }
    }
    if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        is_float = true;
        i += 1;
        if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
            i += 1;
        }
        let digits = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if digits == i {
            return Err(syntax(start, "malformed exponent"));
        }
    }
    if i < chars.len() && (chars[i].is_alphabetic() || chars[i] == '_') {
        return Err(syntax(start, "invalid numeric literal"));
    }

    let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
    let token = if is_float {
        Token::Float(
            text.parse()
                .map_err(|_| syntax(start, "invalid float literal"))?,
        )
    } else {
        Token::Int(
            text.parse()
                .map_err(|_| SandboxError::Limit(format!("integer literal {} is too large", text)))?,
        )
    };
    Ok((token, i))
}

fn string(chars: &[char], start: usize) -> Result<(String, usize), SandboxError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;

    loop {
        let c = *chars
            .get(i)
            .ok_or_else(|| syntax(start, "unterminated string"))?;
        i += 1;
        if c == quote {
            return Ok((out, i));
        }
        if c == '\n' {
            return Err(syntax(start, "unterminated string"));
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        let esc = *chars
            .get(i)
            .ok_or_else(|| syntax(start, "unterminated string"))?;
        i += 1;
        match esc {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'x' | 'u' => {
                let width = if esc == 'x' { 2 } else { 4 };
                let hex: String = chars.get(i..i + width).unwrap_or_default().iter().collect();
                let code = u32::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == width)
                    .and_then(char::from_u32)
                    .ok_or_else(|| syntax(i, "invalid escape sequence"))?;
                out.push(code);
                i += width;
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
}

fn syntax(pos: usize, message: &str) -> SandboxError {
    SandboxError::Syntax {
        pos,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_operators_longest_match() {
        assert_eq!(
            kinds("a ** 2 // 3 <= b"),
            vec![
                Token::Name("a".into()),
                Token::Punct("**"),
                Token::Int(2),
                Token::Punct("//"),
                Token::Int(3),
                Token::Punct("<="),
                Token::Name("b".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("1_000"), vec![Token::Int(1000), Token::Eof]);
        assert_eq!(kinds("2.5e3"), vec![Token::Float(2500.0), Token::Eof]);
        assert_eq!(kinds(".5"), vec![Token::Float(0.5), Token::Eof]);
        assert!(matches!(
            tokenize("99999999999999999999"),
            Err(SandboxError::Limit(_))
        ));
        assert!(tokenize("0x10").is_err());
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(
            kinds(r#"'a\'b' "c\n" '\x41'"#),
            vec![
                Token::Str("a'b".into()),
                Token::Str("c\n".into()),
                Token::Str("A".into()),
                Token::Eof,
            ]
        );
        assert!(tokenize("'open").is_err());
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            kinds("not x in y"),
            vec![
                Token::Keyword(Keyword::Not),
                Token::Name("x".into()),
                Token::Keyword(Keyword::In),
                Token::Name("y".into()),
                Token::Eof,
            ]
        );
        assert_eq!(
            kinds("import")[0],
            Token::Keyword(Keyword::Statement("import"))
        );
    }

    #[test]
    fn test_rejects_unknown_characters() {
        assert!(tokenize("a $ b").is_err());
        assert!(tokenize("a # comment").is_err());
        assert!(tokenize("`x`").is_err());
    }
}
