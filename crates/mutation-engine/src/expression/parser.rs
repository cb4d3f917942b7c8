//! 表达式语法分析
//!
//! 递归下降解析，文法：
//!
//! ```text
//! expr           := comparison
//! comparison     := additive ( ("==" | "!=" | "<" | "<=" | ">" | ">=") additive )?
//! additive       := multiplicative ( ("+" | "-") multiplicative )*
//! multiplicative := unary ( ("*" | "/" | "%") unary )*
//! unary          := "-" unary | primary
//! primary        := NUMBER | STRING | IDENT | FUNCTION "(" args ")" | "(" expr ")"
//! ```

use super::lexer::{Spanned, Token, tokenize};
use std::collections::BTreeSet;
use std::fmt;

/// 嵌套深度上限
const MAX_DEPTH: usize = 64;

/// 白名单函数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// `CLAMP(value, min, max)`
    Clamp,
    /// `PERCENT_CHANGE(base, percent)`
    PercentChange,
    /// `ROUND_TO(value, decimals)`
    RoundTo,
}

impl Function {
    /// 按名称查找（大小写不敏感）
    pub fn lookup(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "CLAMP" => Some(Self::Clamp),
            "PERCENT_CHANGE" => Some(Self::PercentChange),
            "ROUND_TO" => Some(Self::RoundTo),
            _ => None,
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Self::Clamp => 3,
            Self::PercentChange | Self::RoundTo => 2,
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Clamp => "CLAMP",
            Self::PercentChange => "PERCENT_CHANGE",
            Self::RoundTo => "ROUND_TO",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// 语法树
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Var(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// 收集表达式引用的变量名
    pub fn variables(&self) -> BTreeSet<String> {
        let mut vars = BTreeSet::new();
        self.collect_variables(&mut vars);
        vars
    }

    fn collect_variables(&self, vars: &mut BTreeSet<String>) {
        match self {
            Self::Var(name) => {
                vars.insert(name.clone());
            }
            Self::Neg(inner) => inner.collect_variables(vars),
            Self::Binary { lhs, rhs, .. } => {
                lhs.collect_variables(vars);
                rhs.collect_variables(vars);
            }
            Self::Call { args, .. } => {
                for arg in args {
                    arg.collect_variables(vars);
                }
            }
            Self::Number(_) | Self::Str(_) => {}
        }
    }
}

/// 解析表达式文本
pub fn parse(source: &str) -> Result<Expr, String> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err("表达式为空".to_string());
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expression()?;

    if let Some(extra) = parser.peek() {
        return Err(format!(
            "位置 {}: 多余的内容 '{}'",
            extra.position, extra.token
        ));
    }

    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn peek_token(&self) -> Option<&Token> {
        self.peek().map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.advance() {
            Some(s) if s.token == expected => Ok(()),
            Some(s) => Err(format!(
                "位置 {}: 期望 '{}', 实际 '{}'",
                s.position, expected, s.token
            )),
            None => Err(format!("期望 '{}', 表达式意外结束", expected)),
        }
    }

    fn enter(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(format!("表达式嵌套超过 {} 层", MAX_DEPTH));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn expression(&mut self) -> Result<Expr, String> {
        self.enter()?;
        let expr = self.comparison();
        self.leave();
        expr
    }

    fn comparison(&mut self) -> Result<Expr, String> {
        let lhs = self.additive()?;

        let op = match self.peek_token() {
            Some(Token::EqEq) => BinaryOp::Eq,
            Some(Token::NotEq) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();

        let rhs = self.additive()?;

        if let Some(next) = self.peek()
            && matches!(
                next.token,
                Token::EqEq | Token::NotEq | Token::Lt | Token::Le | Token::Gt | Token::Ge
            )
        {
            return Err(format!("位置 {}: 比较运算不能连用", next.position));
        }

        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.multiplicative()?;

        loop {
            let op = match self.peek_token() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;

        loop {
            let op = match self.peek_token() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.peek_token() == Some(&Token::Minus) {
            self.advance();
            self.enter()?;
            let inner = self.unary();
            self.leave();
            return Ok(Expr::Neg(Box::new(inner?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, String> {
        let Some(spanned) = self.advance() else {
            return Err("表达式意外结束".to_string());
        };

        match spanned.token {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Ident(name) => {
                if self.peek_token() == Some(&Token::LParen) {
                    self.call(&name, spanned.position)
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            other => Err(format!("位置 {}: 意外的 '{}'", spanned.position, other)),
        }
    }

    fn call(&mut self, name: &str, position: usize) -> Result<Expr, String> {
        let function = Function::lookup(name)
            .ok_or_else(|| format!("位置 {}: 不支持的函数 '{}'", position, name))?;

        self.expect(Token::LParen)?;

        let mut args = Vec::new();
        if self.peek_token() != Some(&Token::RParen) {
            loop {
                args.push(self.expression()?);
                if self.peek_token() == Some(&Token::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;

        if args.len() != function.arity() {
            return Err(format!(
                "函数 {} 需要 {} 个参数, 实际 {} 个",
                function,
                function.arity(),
                args.len()
            ));
        }

        Ok(Expr::Call { function, args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Box<Expr> {
        Box::new(Expr::Number(n))
    }

    #[test]
    fn test_precedence() {
        let expr = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Add,
                lhs: num(1.0),
                rhs: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    lhs: num(2.0),
                    rhs: num(3.0),
                }),
            }
        );
    }

    #[test]
    fn test_left_associative_subtraction() {
        let expr = parse("10 - 4 - 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Sub,
                lhs: Box::new(Expr::Binary {
                    op: BinaryOp::Sub,
                    lhs: num(10.0),
                    rhs: num(4.0),
                }),
                rhs: num(3.0),
            }
        );
    }

    #[test]
    fn test_function_call_case_insensitive() {
        let expr = parse("clamp(current, 0, 10)").unwrap();
        match expr {
            Expr::Call { function, args } => {
                assert_eq!(function, Function::Clamp);
                assert_eq!(args.len(), 3);
            }
            other => panic!("unexpected expr: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_function_rejected() {
        let err = parse("EXEC(1)").unwrap_err();
        assert!(err.contains("不支持的函数"));
        assert!(parse("getClass()").is_err());
    }

    #[test]
    fn test_arity_checked() {
        assert!(parse("CLAMP(1, 2)").unwrap_err().contains("需要 3 个参数"));
        assert!(parse("ROUND_TO()").is_err());
    }

    #[test]
    fn test_syntax_errors() {
        for source in ["", "1 +", "(1 + 2", "1 2", "CLAMP(1, 2, 3", "a < b < c", ")"] {
            assert!(parse(source).is_err(), "{:?} should fail", source);
        }
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert!(parse(&deep).unwrap_err().contains("嵌套"));

        let negations = format!("{}1", "-".repeat(100));
        assert!(parse(&negations).is_err());
    }

    #[test]
    fn test_variables() {
        let expr = parse("CLAMP(current + bonus, floor, 100) * rate").unwrap();
        let vars: Vec<String> = expr.variables().into_iter().collect();
        assert_eq!(vars, vec!["bonus", "current", "floor", "rate"]);
    }
}
