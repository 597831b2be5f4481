//! Module definitions: a named, ordered list of typed fields.

pub mod formula;
pub mod row;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

pub use row::{apply_patch, normalize_row, project_row, RowValues};

/// Per-field validation messages keyed by a path such as `fields[2].formula`
pub type FieldErrors = HashMap<String, String>;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("{message}")]
    Invalid { message: String, field_errors: FieldErrors },
}

impl SchemaError {
    pub fn invalid(message: impl Into<String>, field_errors: FieldErrors) -> Self {
        SchemaError::Invalid { message: message.into(), field_errors }
    }

    pub fn field_errors(&self) -> &FieldErrors {
        match self {
            SchemaError::Invalid { field_errors, .. } => field_errors,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Date,
    Number,
    Select,
    Compute,
}

impl FieldType {
    /// Fields a formula may reference
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Number | FieldType::Compute)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleField {
    pub name: String,
    pub key: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    /// Identifier formulas use to reference this field, e.g. `S1`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Arithmetic over aliases, e.g. `[S1]+[S2]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

impl ModuleField {
    pub fn new(name: &str, key: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            key: key.to_string(),
            field_type,
            required: false,
            options: None,
            alias: None,
            formula: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = Some(options.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn with_formula(mut self, formula: &str) -> Self {
        self.formula = Some(formula.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    pub name: String,
    pub fields: Vec<ModuleField>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Module {
    pub fn field(&self, key: &str) -> Option<&ModuleField> {
        self.fields.iter().find(|f| f.key == key)
    }
}

/// Create/update payload for a module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDraft {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<ModuleField>,
}

impl ModuleDraft {
    pub fn validate(&self) -> Result<(), SchemaError> {
        validate_fields(&self.name, &self.fields)
    }
}

/// Keys a row already uses for its own identity
const RESERVED_KEYS: &[&str] = &["key", "id"];

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate a module name and its field list, collecting every problem found
pub fn validate_fields(name: &str, fields: &[ModuleField]) -> Result<(), SchemaError> {
    let mut errors = FieldErrors::new();

    if name.trim().is_empty() {
        errors.insert("name".to_string(), "Module name is required".to_string());
    }

    let mut keys = HashSet::new();
    let mut aliases: HashMap<&str, usize> = HashMap::new();

    for (i, field) in fields.iter().enumerate() {
        let at = |attr: &str| format!("fields[{}].{}", i, attr);

        if field.name.trim().is_empty() {
            errors.insert(at("name"), "Field name is required".to_string());
        }

        if field.key.is_empty() {
            errors.insert(at("key"), "Field key is required".to_string());
        } else if !is_identifier(&field.key) {
            errors.insert(at("key"), format!("Field key '{}' must be a letter or underscore followed by letters, digits or underscores", field.key));
        } else if RESERVED_KEYS.contains(&field.key.as_str()) {
            errors.insert(at("key"), format!("Field key '{}' is reserved", field.key));
        } else if !keys.insert(field.key.as_str()) {
            errors.insert(at("key"), format!("Duplicate field key '{}'", field.key));
        }

        match field.field_type {
            FieldType::Select => match &field.options {
                Some(options) if !options.is_empty() => {
                    let unique: HashSet<&String> = options.iter().collect();
                    if unique.len() != options.len() {
                        errors.insert(at("options"), "Select options must be unique".to_string());
                    }
                }
                _ => {
                    errors.insert(at("options"), "Select fields need at least one option".to_string());
                }
            },
            FieldType::Compute => {
                if field.formula.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    errors.insert(at("formula"), "Compute fields need a formula".to_string());
                }
                if field.required {
                    errors.insert(at("required"), "Compute fields cannot be required".to_string());
                }
            }
            _ => {}
        }

        if let Some(alias) = &field.alias {
            if alias.is_empty() || !alias.chars().all(|c| c.is_alphanumeric() || c == '_') {
                errors.insert(at("alias"), format!("Alias '{}' must be alphanumeric", alias));
            } else if aliases.insert(alias.as_str(), i).is_some() {
                errors.insert(at("alias"), format!("Duplicate alias '{}'", alias));
            }
        }
    }

    // Formula references, checked once every alias is known
    let mut depends_on: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, field) in fields.iter().enumerate() {
        if field.field_type != FieldType::Compute {
            continue;
        }
        let Some(source) = field.formula.as_deref().filter(|f| !f.trim().is_empty()) else {
            continue;
        };
        let key = format!("fields[{}].formula", i);
        let expr = match formula::parse(source) {
            Ok(expr) => expr,
            Err(e) => {
                errors.insert(key, format!("Invalid formula: {}", e));
                continue;
            }
        };
        for alias in expr.references() {
            match aliases.get(alias.as_str()) {
                None => {
                    errors.insert(key.clone(), format!("Formula references unknown alias '{}'", alias));
                }
                Some(&target) if !fields[target].field_type.is_numeric() => {
                    errors.insert(key.clone(), format!("Alias '{}' does not refer to a numeric field", alias));
                }
                Some(&target) => {
                    if fields[target].field_type == FieldType::Compute {
                        depends_on.entry(i).or_default().push(target);
                    }
                }
            }
        }
    }

    if let Some(i) = find_cycle(&depends_on) {
        errors.insert(format!("fields[{}].formula", i), "Compute fields reference each other in a cycle".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::invalid("Invalid module definition", errors))
    }
}

/// Returns a compute field index that takes part in a reference cycle
fn find_cycle(edges: &HashMap<usize, Vec<usize>>) -> Option<usize> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(node: usize, edges: &HashMap<usize, Vec<usize>>, marks: &mut HashMap<usize, Mark>) -> Option<usize> {
        match marks.get(&node) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => return Some(node),
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        for &next in edges.get(&node).into_iter().flatten() {
            if let Some(found) = visit(next, edges, marks) {
                return Some(found);
            }
        }
        marks.insert(node, Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    let mut nodes: Vec<usize> = edges.keys().copied().collect();
    nodes.sort_unstable();
    nodes.into_iter().find_map(|n| visit(n, edges, &mut marks))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn salary_fields() -> Vec<ModuleField> {
        vec![
            ModuleField::new("员工姓名", "empName", FieldType::String).required(),
            ModuleField::new("基本工资", "baseSal", FieldType::Number).required().with_alias("S1"),
            ModuleField::new("绩效奖金", "bonus", FieldType::Number).required().with_alias("S2"),
            ModuleField::new("总计", "total", FieldType::Compute).with_formula("[S1]+[S2]"),
        ]
    }

    #[test]
    fn accepts_salary_module() {
        assert!(validate_fields("工资管理", &salary_fields()).is_ok());
    }

    #[test]
    fn deserializes_wire_shape() {
        let field: ModuleField = serde_json::from_value(serde_json::json!({
            "name": "部门", "key": "dept", "type": "select", "required": true,
            "options": ["技术部", "市场部"]
        }))
        .unwrap();
        assert_eq!(field.field_type, FieldType::Select);
        assert_eq!(field.options.as_ref().map(Vec::len), Some(2));
        assert!(field.alias.is_none());
    }

    #[test]
    fn rejects_blank_name_and_bad_keys() {
        let fields = vec![
            ModuleField::new("A", "a", FieldType::String),
            ModuleField::new("B", "a", FieldType::String),
            ModuleField::new("C", "key", FieldType::String),
            ModuleField::new("D", "9lives", FieldType::String),
        ];
        let err = validate_fields("  ", &fields).unwrap_err();
        let errors = err.field_errors();
        assert!(errors.contains_key("name"));
        assert!(errors["fields[1].key"].contains("Duplicate"));
        assert!(errors["fields[2].key"].contains("reserved"));
        assert!(errors.contains_key("fields[3].key"));
        assert!(!errors.contains_key("fields[0].key"));
    }

    #[test]
    fn select_needs_options() {
        let fields = vec![ModuleField::new("Dept", "dept", FieldType::Select)];
        let err = validate_fields("m", &fields).unwrap_err();
        assert!(err.field_errors().contains_key("fields[0].options"));
    }

    #[test]
    fn formula_must_reference_numeric_aliases() {
        let mut fields = salary_fields();
        fields[0].alias = Some("N".to_string());
        fields[3].formula = Some("[S1] + [N] + [X]".to_string());
        let err = validate_fields("m", &fields).unwrap_err();
        let msg = &err.field_errors()["fields[3].formula"];
        assert!(msg.contains("'N'") || msg.contains("'X'"));
    }

    #[test]
    fn rejects_duplicate_alias_and_required_compute() {
        let mut fields = salary_fields();
        fields[2].alias = Some("S1".to_string());
        fields[3].required = true;
        let err = validate_fields("m", &fields).unwrap_err();
        assert!(err.field_errors().contains_key("fields[2].alias"));
        assert!(err.field_errors().contains_key("fields[3].required"));
    }

    #[test]
    fn detects_compute_cycles() {
        let fields = vec![
            ModuleField::new("X", "x", FieldType::Compute).with_alias("X").with_formula("[Y] + 1"),
            ModuleField::new("Y", "y", FieldType::Compute).with_alias("Y").with_formula("[X] * 2"),
        ];
        let err = validate_fields("m", &fields).unwrap_err();
        assert!(err
            .field_errors()
            .values()
            .any(|m| m.contains("cycle")));
    }

    #[test]
    fn deeply_nested_formula_is_a_field_error() {
        let mut fields = salary_fields();
        fields[3].formula = Some(format!("{}[S1]{}", "(".repeat(100_000), ")".repeat(100_000)));
        let err = validate_fields("m", &fields).unwrap_err();
        assert!(err.field_errors()["fields[3].formula"].contains("nests deeper"));
    }

    #[test]
    fn chained_compute_fields_are_allowed() {
        let mut fields = salary_fields();
        fields[3].alias = Some("T".to_string());
        fields.push(ModuleField::new("税后", "net", FieldType::Compute).with_formula("[T] * 0.8"));
        assert!(validate_fields("m", &fields).is_ok());
    }
}
