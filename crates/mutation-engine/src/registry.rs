//! 目标表解析：显式表名优先，其次按类别映射查找（类别名不区分大小写）

use crate::error::{EngineError, Result};
use crate::models::TargetSelector;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    /// 小写类别名 -> 表名
    categories: HashMap<String, String>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(mut self, category: &str, table: impl Into<String>) -> Self {
        self.register(category, table);
        self
    }

    pub fn register(&mut self, category: &str, table: impl Into<String>) {
        self.categories.insert(category.to_lowercase(), table.into());
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn lookup(&self, category: &str) -> Option<&str> {
        self.categories
            .get(&category.trim().to_lowercase())
            .map(String::as_str)
    }

    /// 将目标选择器解析为具体表名
    pub fn resolve(&self, target: &TargetSelector) -> Result<String> {
        match target {
            TargetSelector::Table(table) if !table.trim().is_empty() => Ok(table.clone()),
            TargetSelector::Table(_) => {
                Err(EngineError::TableResolution("未指定目标表".to_string()))
            }
            TargetSelector::Category(category) => {
                self.lookup(category).map(str::to_string).ok_or_else(|| {
                    EngineError::TableResolution(format!("未知的类别 '{}'", category))
                })
            }
        }
    }
}

impl From<&HashMap<String, String>> for TableRegistry {
    fn from(categories: &HashMap<String, String>) -> Self {
        let mut registry = Self::new();
        for (category, table) in categories {
            registry.register(category, table.clone());
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let registry = TableRegistry::new().with_category("Inventory", "products");

        assert_eq!(registry.resolve(&TargetSelector::table("orders")).unwrap(), "orders");
        assert_eq!(
            registry.resolve(&TargetSelector::category("INVENTORY")).unwrap(),
            "products"
        );
        assert_eq!(
            registry.resolve(&TargetSelector::category("unknown")).unwrap_err().code(),
            "TABLE_RESOLUTION_ERROR"
        );
        assert!(registry.resolve(&TargetSelector::table("  ")).is_err());
    }

    #[test]
    fn test_from_config_map() {
        let map = HashMap::from([("Customers".to_string(), "crm.customers".to_string())]);
        let registry = TableRegistry::from(&map);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("customers"), Some("crm.customers"));
    }
}
