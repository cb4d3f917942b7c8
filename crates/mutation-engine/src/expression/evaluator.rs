//! 表达式求值
//!
//! 变量绑定规则：
//! - 目标字段的当前值以 `current` 和 `value` 两个别名暴露，强制转换为数值（非数值或缺失为 0）；
//!   整数列保持精确的 `i64`，整数之间的运算不经过浮点；
//! - 记录中的每个字段以规范化后的名称（非标识符字符替换为 `_`）暴露，保留原始值。
//!
//! 求值结果按原字段的类型规范化，避免数值修改悄悄改变列的存储类型。

use super::parser::{BinaryOp, Expr, Function, parse};
use crate::error::{EngineError, Result};
use crate::models::FieldModification;
use crate::value::{FieldValue, Record};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// 目标字段当前值的别名
pub const CURRENT_ALIASES: [&str; 2] = ["current", "value"];

/// 定点数结果保留的小数位数
const DECIMAL_SCALE: u32 = 2;

/// ROUND_TO 允许的小数位数范围
const MAX_ROUND_DIGITS: f64 = 15.0;

/// f64 能精确表示的最大整数
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

/// 将字段名规范化为表达式变量名
pub fn sanitize_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        sanitized.insert(0, '_');
    }
    sanitized
}

/// 运行期操作数
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Int(i64),
    Number(f64),
    Bool(bool),
    Text(String),
    Null,
}

impl Operand {
    fn from_field(value: &FieldValue) -> Self {
        match value {
            FieldValue::Null => Self::Null,
            FieldValue::Bool(b) => Self::Bool(*b),
            FieldValue::Text(s) => Self::Text(s.clone()),
            FieldValue::Uuid(u) => Self::Text(u.to_string()),
            FieldValue::Timestamp(t) => Self::Text(t.to_rfc3339()),
            FieldValue::Int(v) => Self::Int(*v),
            numeric => numeric.as_f64().map(Self::Number).unwrap_or(Self::Null),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) | Self::Number(_) => "number",
            Self::Bool(_) => "boolean",
            Self::Text(_) => "text",
            Self::Null => "null",
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Number(n) => write!(f, "{}", n),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Text(s) => write!(f, "'{}'", s),
            Self::Null => f.write_str("null"),
        }
    }
}

/// 编译后的表达式（解析一次，按记录多次求值）
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    source: String,
    ast: Expr,
}

impl CompiledExpression {
    /// 解析表达式
    pub fn compile(source: &str) -> Result<Self> {
        let ast = parse(source).map_err(|e| EngineError::expression(source, e))?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// 表达式引用的变量名
    pub fn variables(&self) -> BTreeSet<String> {
        self.ast.variables()
    }

    /// 针对一条记录计算 `field` 的新值
    pub fn evaluate(&self, field: &str, record: &Record) -> Result<FieldValue> {
        let original = record.get(field).cloned().unwrap_or_default();
        let scope = Scope::new(field, record);

        let result = scope
            .eval(&self.ast)
            .map_err(|e| EngineError::expression(&self.source, e))?;

        normalize(result, &original).map_err(|e| EngineError::expression(&self.source, e))
    }
}

/// 表达式求值器
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    /// 计算一条字段修改在给定记录上的新值
    pub fn evaluate(modification: &FieldModification, record: &Record) -> Result<FieldValue> {
        CompiledExpression::compile(&modification.expression)?.evaluate(&modification.field, record)
    }
}

/// 变量作用域
struct Scope {
    variables: HashMap<String, Operand>,
}

impl Scope {
    fn new(field: &str, record: &Record) -> Self {
        let mut variables: HashMap<String, Operand> = record
            .iter()
            .map(|(name, value)| (sanitize_name(name), Operand::from_field(value)))
            .collect();

        let current = match record.get(field) {
            Some(FieldValue::Int(v)) => Operand::Int(*v),
            other => Operand::Number(other.and_then(FieldValue::to_number_lossy).unwrap_or(0.0)),
        };
        for alias in CURRENT_ALIASES {
            variables.insert(alias.to_string(), current.clone());
        }

        Self { variables }
    }

    fn eval(&self, expr: &Expr) -> std::result::Result<Operand, String> {
        match expr {
            Expr::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_EXACT_FLOAT_INT => {
                Ok(Operand::Int(*n as i64))
            }
            Expr::Number(n) => Ok(Operand::Number(*n)),
            Expr::Str(s) => Ok(Operand::Text(s.clone())),
            Expr::Var(name) => self
                .variables
                .get(name)
                .cloned()
                .ok_or_else(|| format!("未知变量 '{}'", name)),
            Expr::Neg(inner) => match self.numeric(inner, "-")? {
                Operand::Int(v) => Ok(v
                    .checked_neg()
                    .map(Operand::Int)
                    .unwrap_or(Operand::Number(-(v as f64)))),
                other => Ok(Operand::Number(-as_f64(&other))),
            },
            Expr::Binary { op, lhs, rhs } if op.is_comparison() => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                compare(*op, &lhs, &rhs).map(Operand::Bool)
            }
            Expr::Binary { op, lhs, rhs } => {
                let symbol = op.to_string();
                let a = self.numeric(lhs, &symbol)?;
                let b = self.numeric(rhs, &symbol)?;
                match (a, b) {
                    (Operand::Int(a), Operand::Int(b)) => int_arithmetic(*op, a, b),
                    (a, b) => arithmetic(*op, as_f64(&a), as_f64(&b)).map(Operand::Number),
                }
            }
            Expr::Call { function, args } => {
                let name = function.to_string();
                let values = args
                    .iter()
                    .map(|arg| self.numeric(arg, &name))
                    .collect::<std::result::Result<Vec<Operand>, String>>()?;
                if let Some(exact) = int_call(*function, &values)? {
                    return Ok(exact);
                }
                let values: Vec<f64> = values.iter().map(as_f64).collect();
                call(*function, &values).map(Operand::Number)
            }
        }
    }

    /// 求值并要求结果为数值（整数或浮点）
    fn numeric(&self, expr: &Expr, context: &str) -> std::result::Result<Operand, String> {
        match self.eval(expr)? {
            number @ (Operand::Int(_) | Operand::Number(_)) => Ok(number),
            other => Err(format!(
                "'{}' 需要数值参数, 实际为 {} {}",
                context,
                other.type_name(),
                other
            )),
        }
    }
}

fn as_f64(operand: &Operand) -> f64 {
    match operand {
        Operand::Int(v) => *v as f64,
        Operand::Number(n) => *n,
        _ => f64::NAN,
    }
}

/// 整数运算：结果可精确表示时保持整数，否则退回浮点
fn int_arithmetic(op: BinaryOp, a: i64, b: i64) -> std::result::Result<Operand, String> {
    let exact = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div if b != 0 && a.checked_rem(b) == Some(0) => a.checked_div(b),
        BinaryOp::Rem if b != 0 => a.checked_rem(b),
        _ => None,
    };
    match exact {
        Some(v) => Ok(Operand::Int(v)),
        None => arithmetic(op, a as f64, b as f64).map(Operand::Number),
    }
}

/// 全部参数为整数时可精确求值的函数调用
fn int_call(function: Function, args: &[Operand]) -> std::result::Result<Option<Operand>, String> {
    match (function, args) {
        (Function::Clamp, [Operand::Int(value), Operand::Int(min), Operand::Int(max)]) => {
            if min > max {
                return Err(format!("CLAMP 的下界 {} 大于上界 {}", min, max));
            }
            Ok(Some(Operand::Int(*value.min(max).max(min))))
        }
        (Function::RoundTo, [Operand::Int(value), Operand::Int(decimals)])
            if (0..=MAX_ROUND_DIGITS as i64).contains(decimals) =>
        {
            Ok(Some(Operand::Int(*value)))
        }
        _ => Ok(None),
    }
}

fn arithmetic(op: BinaryOp, a: f64, b: f64) -> std::result::Result<f64, String> {
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err("除数为零".to_string());
            }
            a / b
        }
        BinaryOp::Rem => {
            if b == 0.0 {
                return Err("取模的除数为零".to_string());
            }
            a % b
        }
        _ => return Err(format!("'{}' 不是算术运算符", op)),
    };
    finite(result)
}

fn compare(op: BinaryOp, lhs: &Operand, rhs: &Operand) -> std::result::Result<bool, String> {
    use std::cmp::Ordering;

    let ordering = match (lhs, rhs) {
        (Operand::Int(a), Operand::Int(b)) => Some(a.cmp(b)),
        (Operand::Int(_) | Operand::Number(_), Operand::Int(_) | Operand::Number(_)) => {
            as_f64(lhs).partial_cmp(&as_f64(rhs))
        }
        (Operand::Text(a), Operand::Text(b)) => Some(a.cmp(b)),
        (Operand::Bool(a), Operand::Bool(b)) => Some(a.cmp(b)),
        (Operand::Null, Operand::Null) => Some(Ordering::Equal),
        _ => None,
    };

    match (op, ordering) {
        (BinaryOp::Eq, ordering) => Ok(ordering == Some(Ordering::Equal)),
        (BinaryOp::Ne, ordering) => Ok(ordering != Some(Ordering::Equal)),
        (_, None) => Err(format!(
            "无法比较 {} 与 {}",
            lhs.type_name(),
            rhs.type_name()
        )),
        (_, Some(_)) if matches!(lhs, Operand::Bool(_) | Operand::Null) => {
            Err(format!("{} 不支持大小比较", lhs.type_name()))
        }
        (BinaryOp::Lt, Some(o)) => Ok(o == Ordering::Less),
        (BinaryOp::Le, Some(o)) => Ok(o != Ordering::Greater),
        (BinaryOp::Gt, Some(o)) => Ok(o == Ordering::Greater),
        (BinaryOp::Ge, Some(o)) => Ok(o != Ordering::Less),
        (op, _) => Err(format!("'{}' 不是比较运算符", op)),
    }
}

fn call(function: Function, args: &[f64]) -> std::result::Result<f64, String> {
    let result = match (function, args) {
        (Function::Clamp, [value, min, max]) => {
            if min > max {
                return Err(format!("CLAMP 的下界 {} 大于上界 {}", min, max));
            }
            min.max(max.min(*value))
        }
        (Function::PercentChange, [base, percent]) => base * (1.0 + percent / 100.0),
        (Function::RoundTo, [value, decimals]) => {
            if decimals.fract() != 0.0 || decimals.abs() > MAX_ROUND_DIGITS {
                return Err(format!("ROUND_TO 的小数位数无效: {}", decimals));
            }
            round_to(*value, *decimals as i32)
        }
        (function, args) => {
            return Err(format!(
                "函数 {} 需要 {} 个参数, 实际 {} 个",
                function,
                function.arity(),
                args.len()
            ));
        }
    };
    finite(result)
}

/// 四舍五入到指定小数位（远离零方向）
fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    let rounded = (value * factor).round() / factor;
    if rounded.is_finite() { rounded } else { value }
}

fn finite(value: f64) -> std::result::Result<f64, String> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("计算结果不是有限数值: {}", value))
    }
}

/// 按原字段类型规范化求值结果
fn normalize(result: Operand, original: &FieldValue) -> std::result::Result<FieldValue, String> {
    match result {
        Operand::Int(v) => Ok(normalize_int(v, original)),
        Operand::Number(n) => normalize_number(n, original),
        Operand::Bool(b) => match original {
            FieldValue::Bool(_) => Ok(FieldValue::Bool(b)),
            _ => normalize_number(if b { 1.0 } else { 0.0 }, original),
        },
        Operand::Text(s) => Ok(FieldValue::Text(s)),
        Operand::Null => Ok(FieldValue::Null),
    }
}

fn normalize_int(v: i64, original: &FieldValue) -> FieldValue {
    match original {
        FieldValue::Decimal(_) => FieldValue::Decimal(Decimal::from(v)),
        FieldValue::Float(_) => FieldValue::Float(v as f64),
        _ => FieldValue::Int(v),
    }
}

fn normalize_number(n: f64, original: &FieldValue) -> std::result::Result<FieldValue, String> {
    match original {
        FieldValue::Int(_) => to_int(n.round()),
        FieldValue::Decimal(_) => FieldValue::decimal_from_f64(n, DECIMAL_SCALE)
            .ok_or_else(|| format!("无法转换为定点数: {}", n)),
        FieldValue::Float(_) => Ok(FieldValue::Float(n)),
        _ if n.fract() == 0.0 => to_int(n),
        _ => Ok(FieldValue::Float(n)),
    }
}

fn to_int(n: f64) -> std::result::Result<FieldValue, String> {
    // i64::MAX as f64 向上取整为 2^63，因此上界用严格小于
    if n >= i64::MIN as f64 && n < i64::MAX as f64 {
        Ok(FieldValue::Int(n as i64))
    } else {
        Err(format!("结果超出整数范围: {}", n))
    }
}
