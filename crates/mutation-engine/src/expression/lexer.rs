//! 表达式词法分析

use std::fmt;

/// 词法单元
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Comma,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Str(s) => write!(f, "'{}'", s),
            Self::Ident(name) => write!(f, "{}", name),
            Self::Plus => f.write_str("+"),
            Self::Minus => f.write_str("-"),
            Self::Star => f.write_str("*"),
            Self::Slash => f.write_str("/"),
            Self::Percent => f.write_str("%"),
            Self::LParen => f.write_str("("),
            Self::RParen => f.write_str(")"),
            Self::Comma => f.write_str(","),
            Self::EqEq => f.write_str("=="),
            Self::NotEq => f.write_str("!="),
            Self::Lt => f.write_str("<"),
            Self::Le => f.write_str("<="),
            Self::Gt => f.write_str(">"),
            Self::Ge => f.write_str(">="),
        }
    }
}

/// 带位置的词法单元（位置为字符偏移）
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

/// 将表达式文本切分为词法单元
///
/// `.` 只允许出现在数字字面量中，因此 `a.b`、`x.len()` 之类的成员访问在词法阶段即被拒绝。
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, String> {
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

        let token = match c {
            '0'..='9' | '.' => {
                let (number, next) = read_number(&chars, i)?;
                i = next;
                Token::Number(number)
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                if i < chars.len() && chars[i] == '.' {
                    return Err(format!("位置 {}: 不支持成员访问", i));
                }
                Token::Ident(chars[start..i].iter().collect())
            }
            '\'' => {
                let (text, next) = read_string(&chars, i)?;
                i = next;
                Token::Str(text)
            }
            '+' => {
                i += 1;
                Token::Plus
            }
            '-' => {
                i += 1;
                Token::Minus
            }
            '*' => {
                i += 1;
                Token::Star
            }
            '/' => {
                i += 1;
                Token::Slash
            }
            '%' => {
                i += 1;
                Token::Percent
            }
            '(' => {
                i += 1;
                Token::LParen
            }
            ')' => {
                i += 1;
                Token::RParen
            }
            ',' => {
                i += 1;
                Token::Comma
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                i += 2;
                Token::EqEq
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                i += 2;
                Token::NotEq
            }
            '<' => match chars.get(i + 1) {
                Some('=') => {
                    i += 2;
                    Token::Le
                }
                Some('>') => {
                    i += 2;
                    Token::NotEq
                }
                _ => {
                    i += 1;
                    Token::Lt
                }
            },
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    i += 2;
                    Token::Ge
                } else {
                    i += 1;
                    Token::Gt
                }
            }
            other => return Err(format!("位置 {}: 非法字符 '{}'", i, other)),
        };

        tokens.push(Spanned {
            token,
            position: start,
        });
    }

    Ok(tokens)
}

fn read_number(chars: &[char], start: usize) -> Result<(f64, usize), String> {
    let mut i = start;
    let mut seen_dot = false;
    let mut seen_digit = false;

    while i < chars.len() {
        match chars[i] {
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        i += 1;
    }

    if !seen_digit {
        return Err(format!("位置 {}: 不支持成员访问", start));
    }

    if i < chars.len() && (chars[i] == '.' || chars[i].is_ascii_alphabetic() || chars[i] == '_') {
        return Err(format!("位置 {}: 非法的数字字面量", start));
    }

    let text: String = chars[start..i].iter().collect();
    text.parse::<f64>()
        .map(|n| (n, i))
        .map_err(|e| format!("位置 {}: 非法的数字字面量 '{}': {}", start, text, e))
}

/// 单引号字符串，`''` 表示一个单引号
fn read_string(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let mut i = start + 1;
    let mut text = String::new();

    while i < chars.len() {
        if chars[i] == '\'' {
            if chars.get(i + 1) == Some(&'\'') {
                text.push('\'');
                i += 2;
                continue;
            }
            return Ok((text, i + 1));
        }
        text.push(chars[i]);
        i += 1;
    }

    Err(format!("位置 {}: 字符串未闭合", start))
}
