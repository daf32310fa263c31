//! Schema hint builder.
//!
//! Picks a handful of tables relevant to the question and renders them as
//! `- table(col type, col type, ...)` lines, hard-capped to a character budget
//! so the generation prompt size stays predictable. Relevance is a keyword
//! heuristic; with no match the first tables in catalog order are used, which
//! is a fallback, not a relevance guarantee.
use crate::error::PipelineError;
use crate::store::{DataStore, StoreError};

pub const DEFAULT_MAX_TABLES: usize = 10;
pub const DEFAULT_MAX_CHARS: usize = 6000;

/// Question vocabulary mapped to the tables it usually needs, in priority order.
const VOCABULARY: &[(&[&str], &[&str])] = &[
    (
        &[
            "product", "item", "stock", "inventory", "best-selling", "best selling", "top",
            "sản phẩm", "tồn kho", "bán chạy",
        ],
        &["products", "product", "order_items", "orders", "order", "categories", "brands"],
    ),
    (
        &[
            "order", "revenue", "sales", "sold", "profit", "income", "doanh thu", "đơn hàng",
            "lợi nhuận",
        ],
        &["orders", "order", "order_items", "products", "customers"],
    ),
    (
        &["customer", "client", "buyer", "khách hàng"],
        &["customers", "customer", "users", "orders"],
    ),
    (
        &["supplier", "vendor", "receipt", "purchase", "nhà cung cấp", "phiếu nhập"],
        &["suppliers", "receipts", "receipt_items", "products"],
    ),
    (
        &["category", "categories", "brand", "danh mục", "thương hiệu"],
        &["categories", "brands", "products"],
    ),
];

/// Bounded textual schema description for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaHint {
    pub tables: Vec<String>,
    pub text: String,
}

pub struct SchemaIntrospector {
    max_tables: usize,
    max_chars: usize,
}

impl SchemaIntrospector {
    pub fn new(max_tables: usize, max_chars: usize) -> Self {
        Self {
            max_tables,
            max_chars,
        }
    }

    pub fn build_hint(
        &self,
        store: &dyn DataStore,
        question: &str,
    ) -> Result<SchemaHint, PipelineError> {
        self.try_build(store, question)
            .map_err(PipelineError::SchemaIntrospectionFailure)
    }

    fn try_build(&self, store: &dyn DataStore, question: &str) -> Result<SchemaHint, StoreError> {
        let all_tables = store.list_tables()?;
        let tables = pick_tables(question, &all_tables, self.max_tables);

        let mut lines = Vec::with_capacity(tables.len());
        for table in &tables {
            let columns = store
                .list_columns(table)?
                .into_iter()
                .map(|column| {
                    if column.declared_type.is_empty() {
                        column.name
                    } else {
                        format!("{} {}", column.name, column.declared_type)
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("- {table}({columns})"));
        }

        let text = truncate_chars(&lines.join("\n"), self.max_chars);
        tracing::debug!(tables = tables.len(), chars = text.chars().count(), "schema hint built");
        Ok(SchemaHint { tables, text })
    }
}

/// Choose up to `max` tables for the question, preserving priority order and
/// dropping duplicates. Falls back to the first `max` catalog tables.
pub fn pick_tables(question: &str, all_tables: &[String], max: usize) -> Vec<String> {
    let q = question.to_lowercase();
    let mut picked: Vec<String> = Vec::new();

    for (keywords, preferred) in VOCABULARY {
        if !keywords.iter().any(|keyword| q.contains(keyword)) {
            continue;
        }
        for name in preferred.iter() {
            if let Some(table) = all_tables.iter().find(|t| t.eq_ignore_ascii_case(name)) {
                push_unique(&mut picked, table);
            }
        }
    }

    let words: Vec<&str> = q
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .collect();
    for table in all_tables {
        let lower = table.to_lowercase();
        let singular = lower.strip_suffix('s').unwrap_or(&lower);
        if words.iter().any(|w| *w == lower || *w == singular) {
            push_unique(&mut picked, table);
        }
    }

    if picked.is_empty() {
        return all_tables.iter().take(max).cloned().collect();
    }
    picked.truncate(max);
    picked
}

fn push_unique(picked: &mut Vec<String>, table: &str) {
    if !picked.iter().any(|t| t == table) {
        picked.push(table.to_string());
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
