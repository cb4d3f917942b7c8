//! 字段修改表达式
//!
//! 受限的算术表达式语言：数字与单引号字符串字面量、变量、`+ - * / %`、一元负号、括号、
//! 比较运算，以及白名单函数 `CLAMP`、`PERCENT_CHANGE`、`ROUND_TO`。
//! 不支持成员访问、方法调用或自定义函数。

mod evaluator;
mod lexer;
mod parser;

pub use evaluator::{CURRENT_ALIASES, CompiledExpression, ExpressionEvaluator, sanitize_name};
pub use parser::{BinaryOp, Expr, Function, parse};
