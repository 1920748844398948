//! Terraform variable file rendering.

use provisio_core::Variables;
use serde_json::Value;

/// Terraform type constraint inferred from a JSON value.
pub fn infer_type(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::Array(_) => "list(any)",
        Value::Object(_) => "map(any)",
        Value::String(_) | Value::Null => "string",
    }
}

/// Render `variables.tf` with one `variable` block per entry.
pub fn render_variables_tf(variables: &Variables) -> String {
    let mut out = String::new();
    for (name, value) in variables {
        out.push_str(&format!("variable \"{name}\" {{\n"));
        out.push_str(&format!("  type        = {}\n", infer_type(value)));
        out.push_str(&format!("  description = \"Variable {name}\"\n"));
        out.push_str("}\n\n");
    }
    out
}

/// Render `terraform.tfvars` assignments.
pub fn render_tfvars(variables: &Variables) -> String {
    let mut out = String::new();
    for (name, value) in variables {
        out.push_str(&format!("{name} = {}\n", hcl_literal(value)));
    }
    out
}

/// Names Terraform reserves inside a `variable` block's label.
const RESERVED_NAMES: [&str; 8] = [
    "source",
    "version",
    "providers",
    "count",
    "for_each",
    "lifecycle",
    "depends_on",
    "locals",
];

/// Reject names that cannot be declared as Terraform variables.
pub fn check_names(variables: &Variables) -> std::io::Result<()> {
    for name in variables.keys() {
        if !is_identifier(name) {
            return Err(invalid_name(name, "not a valid identifier"));
        }
        if RESERVED_NAMES.contains(&name.as_str()) {
            return Err(invalid_name(name, "reserved by terraform"));
        }
    }
    Ok(())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn invalid_name(name: &str, reason: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("variable name {name:?} is {reason}"),
    )
}

/// HCL literal for a JSON value. JSON strings, arrays and objects are valid
/// HCL expressions as-is once template openers are escaped.
fn hcl_literal(value: &Value) -> String {
    escape_templates(value).to_string()
}

/// Escape `${` and `%{` in every string, object keys included.
fn escape_templates(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(escape_str(s)),
        Value::Array(items) => Value::Array(items.iter().map(escape_templates).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (escape_str(k), escape_templates(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn escape_str(s: &str) -> String {
    s.replace("${", "$${").replace("%{", "%%{")
}
