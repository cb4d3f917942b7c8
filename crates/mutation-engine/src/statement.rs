//! SQL 语句生成
//!
//! 执行时所有值都以 `$n` 参数绑定；空值直接写为 `NULL` 关键字。
//! 标识符先校验再加双引号。`to_display_sql` 把参数内联为字面量，仅用于审计展示。
//!
//! 语句可以携带目标表的列类型。文本值写入或比较非文本列时显式 `CAST` 为列类型，
//! 非文本值比较文本列时转为文本，条件中的字符串因此始终按列类型解释。

use crate::error::{EngineError, Result};
use crate::models::{Condition, Selection};
use crate::operators::{LogicalOperator, Operator};
use crate::predicate::{condition_value, condition_values};
use crate::validator::{is_identifier, is_table_name};
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 列名 -> 列的 SQL 类型（如 `numeric(10,2)`、`character varying(64)`）
pub type ColumnTypes = BTreeMap<String, String>;

/// 列类型的比较方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnClass {
    Text,
    Json,
    /// 不带时区的时间戳
    NaiveTimestamp,
    Other,
}

/// 去掉类型修饰（长度、精度）后的类型名，不是合法类型名时返回 None
fn base_type(declared: &str) -> Option<String> {
    let mut base = String::with_capacity(declared.len());
    let mut depth = 0usize;
    for c in declared.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => base.push(c.to_ascii_lowercase()),
            _ => {}
        }
    }
    let base = base.split_whitespace().collect::<Vec<_>>().join(" ");

    let valid = !base.is_empty()
        && base
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '.' | '[' | ']'));
    valid.then_some(base)
}

fn classify(base: &str) -> ColumnClass {
    match base {
        "text" | "character varying" | "varchar" | "character" | "char" | "bpchar" | "name"
        | "citext" => ColumnClass::Text,
        "json" | "jsonb" => ColumnClass::Json,
        "timestamp" | "timestamp without time zone" => ColumnClass::NaiveTimestamp,
        _ => ColumnClass::Other,
    }
}

/// 将值格式化为 SQL 字面量（审计展示用）
///
/// 空值为 `NULL`，数值原样输出，布尔值为 `1`/`0`，其他值加单引号并将内部单引号加倍。
pub fn format_literal(value: &FieldValue) -> String {
    match value {
        FieldValue::Null => "NULL".to_string(),
        FieldValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        FieldValue::Int(v) => v.to_string(),
        FieldValue::Float(v) => v.to_string(),
        FieldValue::Decimal(v) => v.to_string(),
        other => quote_text(&other.to_string()),
    }
}

fn quote_text(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// 校验并引用列名
pub fn quote_identifier(name: &str) -> Result<String> {
    if is_identifier(name) {
        Ok(format!("\"{}\"", name))
    } else {
        Err(EngineError::InvalidIdentifier(name.to_string()))
    }
}

/// 校验并引用表名（支持 schema.table）
pub fn quote_table(name: &str) -> Result<String> {
    if !is_table_name(name) {
        return Err(EngineError::InvalidIdentifier(name.to_string()));
    }
    Ok(name
        .split('.')
        .map(|part| format!("\"{}\"", part))
        .collect::<Vec<_>>()
        .join("."))
}

/// 转义 LIKE 模式中的通配符
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// 占位符渲染方式
#[derive(Clone, Copy)]
enum Render {
    Params,
    Literals,
}

/// SQL 文本与参数的累积器
struct SqlWriter<'a> {
    render: Render,
    sql: String,
    params: Vec<FieldValue>,
    column_types: &'a ColumnTypes,
}

impl<'a> SqlWriter<'a> {
    fn new(render: Render, column_types: &'a ColumnTypes) -> Self {
        Self {
            render,
            sql: String::new(),
            params: Vec::new(),
            column_types,
        }
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    /// 写入一个值：空值为 `NULL`，否则为占位符或字面量
    fn value(&mut self, value: FieldValue) {
        if value.is_null() {
            self.sql.push_str("NULL");
            return;
        }
        match self.render {
            Render::Params => {
                self.params.push(value);
                self.sql.push_str(&format!("${}", self.params.len()));
            }
            Render::Literals => self.sql.push_str(&format_literal(&value)),
        }
    }

    fn column_type(&self, column: &str) -> Option<(String, ColumnClass)> {
        let base = base_type(self.column_types.get(column)?)?;
        let class = classify(&base);
        Some((base, class))
    }

    /// 比较左侧的列引用；JSON 列按文本比较
    fn column_ref(&self, column: &str) -> Result<String> {
        let quoted = quote_identifier(column)?;
        Ok(match self.column_type(column) {
            Some((_, ColumnClass::Json)) => format!("{}::text", quoted),
            _ => quoted,
        })
    }

    /// LIKE 左侧的列引用；已知的非文本列先转为文本
    fn text_column_ref(&self, column: &str) -> Result<String> {
        let quoted = quote_identifier(column)?;
        Ok(match self.column_type(column) {
            Some((_, ColumnClass::Text)) | None => quoted,
            Some(_) => format!("{}::text", quoted),
        })
    }

    /// 写入与列比较的值
    fn compared(&mut self, column: &str, value: FieldValue) {
        let target = match self.column_type(column) {
            Some((_, ColumnClass::Json)) => Some(("text".to_string(), ColumnClass::Text)),
            other => other,
        };
        self.typed(value, target);
    }

    /// 写入赋给列的值
    fn assigned(&mut self, column: &str, value: FieldValue) {
        let target = self.column_type(column);
        self.typed(value, target);
    }

    fn typed(&mut self, value: FieldValue, target: Option<(String, ColumnClass)>) {
        let Some((type_name, class)) = target else {
            self.value(value);
            return;
        };
        if value.is_null() {
            self.value(value);
            return;
        }

        let is_text = matches!(value, FieldValue::Text(_));
        let is_timestamp = matches!(value, FieldValue::Timestamp(_));
        let params = matches!(self.render, Render::Params);

        match class {
            // 时间戳参数以 timestamptz 绑定，按 UTC 落到无时区列
            ColumnClass::NaiveTimestamp if is_timestamp && params => {
                self.push("(");
                self.value(value);
                self.push(" AT TIME ZONE 'UTC')");
            }
            ColumnClass::Text if is_text => self.value(value),
            ColumnClass::Json if !is_text => {
                self.push(if type_name == "jsonb" { "to_jsonb(" } else { "to_json(" });
                self.value(value);
                self.push(")");
            }
            ColumnClass::Text => self.cast(value, &type_name),
            _ if is_text => self.cast(value, &type_name),
            _ => self.value(value),
        }
    }

    fn cast(&mut self, value: FieldValue, type_name: &str) {
        self.push("CAST(");
        self.value(value);
        self.push(&format!(" AS {})", type_name));
    }

    /// `"col" = v`，空值时为 `"col" IS NULL`
    fn equals(&mut self, column: &str, value: &FieldValue) -> Result<()> {
        let column_ref = self.column_ref(column)?;
        self.push(&column_ref);
        if value.is_null() {
            self.push(" IS NULL");
        } else {
            self.push(" = ");
            self.compared(column, value.clone());
        }
        Ok(())
    }

    fn selection(&mut self, node: &Selection) -> Result<()> {
        match node {
            Selection::Condition(cond) => self.condition(cond),
            Selection::Group(group) if group.children.is_empty() => {
                self.push(match group.operator {
                    LogicalOperator::And => "TRUE",
                    LogicalOperator::Or => "FALSE",
                });
                Ok(())
            }
            Selection::Group(group) => {
                let joiner = format!(" {} ", group.operator);
                self.push("(");
                for (i, child) in group.children.iter().enumerate() {
                    if i > 0 {
                        self.push(&joiner);
                    }
                    self.selection(child)?;
                }
                self.push(")");
                Ok(())
            }
        }
    }

    fn condition(&mut self, cond: &Condition) -> Result<()> {
        let field = cond.field.as_str();
        let column = self.column_ref(field)?;

        let comparison = |op: &str| format!("{} {} ", column, op);

        match cond.operator {
            Operator::IsNull => self.push(&format!("{} IS NULL", column)),
            Operator::IsNotNull => self.push(&format!("{} IS NOT NULL", column)),
            Operator::Eq | Operator::Neq if cond.value.is_null() => {
                let keyword = if cond.operator == Operator::Eq {
                    "IS NULL"
                } else {
                    "IS NOT NULL"
                };
                self.push(&format!("{} {}", column, keyword));
            }
            Operator::Eq
            | Operator::Neq
            | Operator::Gt
            | Operator::Gte
            | Operator::Lt
            | Operator::Lte => {
                let op = match cond.operator {
                    Operator::Eq => "=",
                    Operator::Neq => "<>",
                    Operator::Gt => ">",
                    Operator::Gte => ">=",
                    Operator::Lt => "<",
                    _ => "<=",
                };
                self.push(&comparison(op));
                self.compared(field, condition_value(&cond.value));
            }
            Operator::Between => {
                let bounds = condition_values(cond)?;
                let [min, max] = <[FieldValue; 2]>::try_from(bounds).map_err(|b| {
                    EngineError::TypeMismatch {
                        expected: "array [min, max]".to_string(),
                        actual: format!("array of {}", b.len()),
                    }
                })?;
                self.push(&comparison("BETWEEN"));
                self.compared(field, min);
                self.push(" AND ");
                self.compared(field, max);
            }
            Operator::In | Operator::NotIn => {
                // 列表中的 NULL 在 SQL 中永不相等，直接剔除
                let items: Vec<FieldValue> = condition_values(cond)?
                    .into_iter()
                    .filter(|v| !v.is_null())
                    .collect();
                let negated = cond.operator == Operator::NotIn;

                if items.is_empty() {
                    self.push(if negated { "TRUE" } else { "FALSE" });
                } else {
                    self.push(&comparison(if negated { "NOT IN" } else { "IN" }));
                    self.push("(");
                    for (i, item) in items.into_iter().enumerate() {
                        if i > 0 {
                            self.push(", ");
                        }
                        self.compared(field, item);
                    }
                    self.push(")");
                }
            }
            Operator::Contains | Operator::StartsWith | Operator::EndsWith => {
                let text = cond.value.as_str().ok_or_else(|| EngineError::TypeMismatch {
                    expected: "string".to_string(),
                    actual: cond.value.to_string(),
                })?;
                let escaped = escape_like(text);
                let pattern = match cond.operator {
                    Operator::Contains => format!("%{}%", escaped),
                    Operator::StartsWith => format!("{}%", escaped),
                    _ => format!("%{}", escaped),
                };
                let column = self.text_column_ref(field)?;
                self.push(&format!("{} LIKE ", column));
                self.value(FieldValue::Text(pattern));
                self.push(" ESCAPE '\\'");
            }
        }
        Ok(())
    }

    fn finish(self) -> (String, Vec<FieldValue>) {
        (self.sql, self.params)
    }
}

/// 查询语句：读取目标表中满足选择条件的全部列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectStatement {
    pub table: String,
    pub selection: Option<Selection>,
    /// 排序列（通常为主键），保证结果顺序稳定
    pub order_by: Option<String>,
    /// 是否加行锁（`FOR UPDATE`）
    pub for_update: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub column_types: ColumnTypes,
}

impl SelectStatement {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            selection: None,
            order_by: None,
            for_update: false,
            column_types: ColumnTypes::new(),
        }
    }

    pub fn with_column_types(mut self, column_types: &ColumnTypes) -> Self {
        self.column_types = column_types.clone();
        self
    }

    pub fn with_selection(mut self, selection: Option<Selection>) -> Self {
        self.selection = selection;
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by = Some(column.into());
        self
    }

    pub fn for_update(mut self) -> Self {
        self.for_update = true;
        self
    }

    /// 生成参数化 SQL
    pub fn to_sql(&self) -> Result<(String, Vec<FieldValue>)> {
        self.render(Render::Params)
    }

    /// 生成内联字面量的 SQL（审计展示）
    pub fn to_display_sql(&self) -> Result<String> {
        self.render(Render::Literals).map(|(sql, _)| sql)
    }

    fn render(&self, render: Render) -> Result<(String, Vec<FieldValue>)> {
        let mut writer = SqlWriter::new(render, &self.column_types);
        writer.push("SELECT * FROM ");
        writer.push(&quote_table(&self.table)?);

        if let Some(selection) = &self.selection {
            writer.push(" WHERE ");
            writer.selection(selection)?;
        }

        if let Some(column) = &self.order_by {
            writer.push(" ORDER BY ");
            writer.push(&quote_identifier(column)?);
        }

        if self.for_update {
            writer.push(" FOR UPDATE");
        }

        Ok(writer.finish())
    }
}

/// 按主键更新单行的语句
///
/// `guards` 是执行前各列应有的值，不满足时语句影响 0 行。
/// 参数化形式带 `RETURNING`，返回被赋值列写入后的实际值（经过列类型的舍入与截断）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateStatement {
    pub table: String,
    pub key_column: String,
    pub key_value: FieldValue,
    pub assignments: Vec<(String, FieldValue)>,
    #[serde(default)]
    pub guards: Vec<(String, FieldValue)>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub column_types: ColumnTypes,
}

impl UpdateStatement {
    pub fn new(
        table: impl Into<String>,
        key_column: impl Into<String>,
        key_value: FieldValue,
    ) -> Self {
        Self {
            table: table.into(),
            key_column: key_column.into(),
            key_value,
            assignments: Vec::new(),
            guards: Vec::new(),
            column_types: ColumnTypes::new(),
        }
    }

    /// 附加列类型，只保留语句涉及的列
    pub fn with_column_types(mut self, column_types: &ColumnTypes) -> Self {
        self.column_types = column_types
            .iter()
            .filter(|(column, _)| self.touches(column))
            .map(|(column, ty)| (column.clone(), ty.clone()))
            .collect();
        self
    }

    fn touches(&self, column: &str) -> bool {
        column == self.key_column
            || self.assignments.iter().any(|(c, _)| c == column)
            || self.guards.iter().any(|(c, _)| c == column)
    }

    pub fn set(mut self, column: impl Into<String>, value: FieldValue) -> Self {
        self.assignments.push((column.into(), value));
        self
    }

    pub fn guard(mut self, column: impl Into<String>, value: FieldValue) -> Self {
        self.guards.push((column.into(), value));
        self
    }

    /// 主键值的展示形式
    pub fn key_display(&self) -> String {
        self.key_value.to_string()
    }

    pub fn to_sql(&self) -> Result<(String, Vec<FieldValue>)> {
        self.render(Render::Params)
    }

    pub fn to_display_sql(&self) -> Result<String> {
        self.render(Render::Literals).map(|(sql, _)| sql)
    }

    fn render(&self, render: Render) -> Result<(String, Vec<FieldValue>)> {
        if self.assignments.is_empty() {
            return Err(EngineError::Datastore(format!(
                "表 {} 的更新语句没有任何赋值",
                self.table
            )));
        }
        if self.key_value.is_null() {
            return Err(EngineError::Datastore(format!(
                "表 {} 的主键 {} 为空",
                self.table, self.key_column
            )));
        }

        let mut writer = SqlWriter::new(render, &self.column_types);
        writer.push("UPDATE ");
        writer.push(&quote_table(&self.table)?);
        writer.push(" SET ");

        for (i, (column, value)) in self.assignments.iter().enumerate() {
            if i > 0 {
                writer.push(", ");
            }
            writer.push(&quote_identifier(column)?);
            writer.push(" = ");
            writer.assigned(column, value.clone());
        }

        writer.push(" WHERE ");
        writer.equals(&self.key_column, &self.key_value)?;

        for (column, value) in &self.guards {
            writer.push(" AND ");
            writer.equals(column, value)?;
        }

        if matches!(render, Render::Params) {
            let columns = self
                .assignments
                .iter()
                .map(|(column, _)| quote_identifier(column))
                .collect::<Result<Vec<_>>>()?;
            writer.push(" RETURNING ");
            writer.push(&columns.join(", "));
        }

        Ok(writer.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_format_literal() {
        assert_eq!(format_literal(&FieldValue::Null), "NULL");
        assert_eq!(format_literal(&FieldValue::from("a's")), "'a''s'");
        assert_eq!(format_literal(&FieldValue::Bool(true)), "1");
        assert_eq!(format_literal(&FieldValue::Bool(false)), "0");
        assert_eq!(format_literal(&FieldValue::Int(-7)), "-7");
        assert_eq!(format_literal(&FieldValue::Float(2.5)), "2.5");
        assert_eq!(
            format_literal(&FieldValue::Decimal(Decimal::from_str("19.90").unwrap())),
            "19.90"
        );
    }

    #[test]
    fn test_select_with_selection() {
        let stmt = SelectStatement::new("products")
            .with_selection(Some(Selection::and(vec![
                Selection::condition("category", Operator::Eq, "tools"),
                Selection::or(vec![
                    Selection::condition("stock", Operator::Between, json!([1, 10])),
                    Selection::condition("discontinued_at", Operator::IsNull, json!(null)),
                ]),
            ])))
            .order_by("id")
            .for_update();

        let (sql, params) = stmt.to_sql().unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM \"products\" WHERE (\"category\" = $1 AND (\"stock\" BETWEEN $2 AND $3 OR \"discontinued_at\" IS NULL)) ORDER BY \"id\" FOR UPDATE"
        );
        assert_eq!(
            params,
            vec![FieldValue::from("tools"), FieldValue::Int(1), FieldValue::Int(10)]
        );
    }

    #[test]
    fn test_select_lists_and_like() {
        let stmt = SelectStatement::new("inventory.products").with_selection(Some(Selection::and(vec![
            Selection::condition("sku", Operator::In, json!(["A", null, "B"])),
            Selection::condition("sku", Operator::NotIn, json!([])),
            Selection::condition("name", Operator::Contains, "50%_off"),
        ])));

        let (sql, params) = stmt.to_sql().unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM \"inventory\".\"products\" WHERE (\"sku\" IN ($1, $2) AND TRUE AND \"name\" LIKE $3 ESCAPE '\\')"
        );
        assert_eq!(params[2], FieldValue::from("%50\\%\\_off%"));
    }

    #[test]
    fn test_select_rejects_injection() {
        let stmt = SelectStatement::new("products")
            .with_selection(Some(Selection::condition("name\" OR 1=1 --", Operator::Eq, "x")));
        assert!(matches!(stmt.to_sql(), Err(EngineError::InvalidIdentifier(_))));

        let stmt = SelectStatement::new("products; DROP TABLE users");
        assert!(stmt.to_sql().is_err());
    }

    #[test]
    fn test_update_with_guards() {
        let stmt = UpdateStatement::new("products", "id", FieldValue::Int(7))
            .set("price", FieldValue::Int(120))
            .set("note", FieldValue::Null)
            .guard("price", FieldValue::Int(100))
            .guard("note", FieldValue::Null);

        let (sql, params) = stmt.to_sql().unwrap();
        assert_eq!(
            sql,
            "UPDATE \"products\" SET \"price\" = $1, \"note\" = NULL WHERE \"id\" = $2 AND \"price\" = $3 AND \"note\" IS NULL RETURNING \"price\", \"note\""
        );
        assert_eq!(
            params,
            vec![FieldValue::Int(120), FieldValue::Int(7), FieldValue::Int(100)]
        );

        assert_eq!(
            stmt.to_display_sql().unwrap(),
            "UPDATE \"products\" SET \"price\" = 120, \"note\" = NULL WHERE \"id\" = 7 AND \"price\" = 100 AND \"note\" IS NULL"
        );
    }

    #[test]
    fn test_update_display_quotes_text() {
        let stmt = UpdateStatement::new("products", "sku", FieldValue::from("A-1"))
            .set("name", FieldValue::from("O'Brien"));
        assert_eq!(
            stmt.to_display_sql().unwrap(),
            "UPDATE \"products\" SET \"name\" = 'O''Brien' WHERE \"sku\" = 'A-1'"
        );
    }

    #[test]
    fn test_update_requires_assignment_and_key() {
        let stmt = UpdateStatement::new("products", "id", FieldValue::Int(1));
        assert!(stmt.to_sql().is_err());

        let stmt = UpdateStatement::new("products", "id", FieldValue::Null).set("a", FieldValue::Int(1));
        assert!(stmt.to_sql().is_err());
    }

    fn column_types() -> ColumnTypes {
        [
            ("id", "bigint"),
            ("ext_ref", "character varying(64)"),
            ("token", "uuid"),
            ("note", "text"),
            ("price", "numeric(10,0)"),
            ("seen_at", "timestamp without time zone"),
            ("created_at", "timestamp with time zone"),
            ("attrs", "jsonb"),
        ]
        .into_iter()
        .map(|(c, t)| (c.to_string(), t.to_string()))
        .collect()
    }

    #[test]
    fn test_base_type() {
        assert_eq!(base_type("numeric(10,0)").as_deref(), Some("numeric"));
        assert_eq!(
            base_type("timestamp(3) without time zone").as_deref(),
            Some("timestamp without time zone")
        );
        assert_eq!(base_type("Character Varying(64)").as_deref(), Some("character varying"));
        assert_eq!(base_type("integer[]").as_deref(), Some("integer[]"));
        assert_eq!(base_type("text); DROP TABLE x; --"), None);
        assert_eq!(base_type(""), None);
    }

    #[test]
    fn test_text_conditions_cast_by_column_type() {
        let uuid_shaped = "3F2504E0-4F89-11D3-9A0C-0305E82C3301";
        let stmt = SelectStatement::new("products")
            .with_selection(Some(Selection::and(vec![
                Selection::condition("ext_ref", Operator::Eq, uuid_shaped),
                Selection::condition("note", Operator::Eq, "2024-01-15T10:00:00Z"),
                Selection::condition("token", Operator::Eq, uuid_shaped),
                Selection::condition("created_at", Operator::Gte, "2024-01-15T10:00:00Z"),
                Selection::condition("price", Operator::In, json!(["19", 20])),
            ])))
            .with_column_types(&column_types());

        let (sql, params) = stmt.to_sql().unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM \"products\" WHERE (\"ext_ref\" = $1 AND \"note\" = $2 AND \"token\" = CAST($3 AS uuid) AND \"created_at\" >= CAST($4 AS timestamp with time zone) AND \"price\" IN (CAST($5 AS numeric), $6))"
        );
        assert_eq!(params[0], FieldValue::from(uuid_shaped));
        assert_eq!(params[1], FieldValue::from("2024-01-15T10:00:00Z"));
    }

    #[test]
    fn test_non_text_values_on_text_columns() {
        let stmt = SelectStatement::new("products")
            .with_selection(Some(Selection::or(vec![
                Selection::condition("ext_ref", Operator::Eq, 42),
                Selection::condition("price", Operator::Contains, "9"),
                Selection::condition("attrs", Operator::Eq, "{\"a\":1}"),
            ])))
            .with_column_types(&column_types());

        let (sql, _) = stmt.to_sql().unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM \"products\" WHERE (\"ext_ref\" = CAST($1 AS character varying) OR \"price\"::text LIKE $2 ESCAPE '\\' OR \"attrs\"::text = $3)"
        );
    }

    #[test]
    fn test_update_casts_by_column_type() {
        let seen = chrono::DateTime::parse_from_rfc3339("2024-01-15T10:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let stmt = UpdateStatement::new("products", "id", FieldValue::Int(7))
            .set("seen_at", FieldValue::Timestamp(seen))
            .set("token", FieldValue::from("3f2504e0-4f89-11d3-9a0c-0305e82c3301"))
            .set("attrs", FieldValue::Int(1))
            .guard("seen_at", FieldValue::Null)
            .with_column_types(&column_types());

        assert_eq!(stmt.column_types.len(), 4);
        assert!(!stmt.column_types.contains_key("note"));

        let (sql, params) = stmt.to_sql().unwrap();
        assert_eq!(
            sql,
            "UPDATE \"products\" SET \"seen_at\" = ($1 AT TIME ZONE 'UTC'), \"token\" = CAST($2 AS uuid), \"attrs\" = to_jsonb($3) WHERE \"id\" = $4 AND \"seen_at\" IS NULL RETURNING \"seen_at\", \"token\", \"attrs\""
        );
        assert_eq!(params.len(), 4);

        assert_eq!(
            stmt.to_display_sql().unwrap(),
            "UPDATE \"products\" SET \"seen_at\" = '2024-01-15T10:00:00+00:00', \"token\" = CAST('3f2504e0-4f89-11d3-9a0c-0305e82c3301' AS uuid), \"attrs\" = to_jsonb(1) WHERE \"id\" = 7 AND \"seen_at\" IS NULL"
        );
    }
}
