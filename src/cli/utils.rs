use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use std::path::Path;

use crate::cli::OutputFormat;

/// Output a success message in the appropriate format
pub fn output_success(output_format: &OutputFormat, message: &str, data: Option<Value>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": true,
                "message": message
            });
            if let Some(data) = data {
                response["data"] = data;
            }
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// Print an API payload: pretty JSON for `--json`, indented YAML otherwise
pub fn output_value(output_format: &OutputFormat, value: &Value) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

/// Output an empty collection in the appropriate format
pub fn output_empty_collection(output_format: &OutputFormat, collection_name: &str, message: &str) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({ collection_name: [] }))?);
        }
        OutputFormat::Text => {
            println!("{}", message);
        }
    }
    Ok(())
}

/// Read a JSON or YAML document; `.yaml`/`.yml` files are parsed as YAML
pub fn read_document(path: &Path) -> anyhow::Result<Value> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", path.display(), e))?;
    parse_document(&content, path.extension().and_then(|e| e.to_str()))
}

pub fn parse_document(content: &str, extension: Option<&str>) -> anyhow::Result<Value> {
    match extension {
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(content)?),
        _ => Ok(serde_json::from_str(content)?),
    }
}

/// Row values from `--data` (inline JSON) or `--file`
pub fn values_from_args(data: Option<String>, file: Option<&Path>) -> anyhow::Result<Value> {
    match (data, file) {
        (Some(inline), None) => Ok(serde_json::from_str(&inline)?),
        (None, Some(path)) => read_document(path),
        (Some(_), Some(_)) => anyhow::bail!("Use either --data or --file, not both"),
        (None, None) => anyhow::bail!("Row values required (--data '{{...}}' or --file path)"),
    }
}

/// Password from the flag, `CMOD_PASSWORD`, or one line of stdin
pub fn resolve_password(provided: Option<String>) -> anyhow::Result<String> {
    if let Some(password) = provided.or_else(|| std::env::var("CMOD_PASSWORD").ok()) {
        return Ok(password);
    }

    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        anyhow::bail!("Password is required");
    }
    Ok(password)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_yaml_and_json_documents() {
        let yaml = "name: 工资管理\nfields:\n  - name: 基本工资\n    key: baseSal\n    type: number\n    alias: S1\n";
        let v = parse_document(yaml, Some("yaml")).unwrap();
        assert_eq!(v["fields"][0]["alias"], "S1");

        let v = parse_document(r#"{"name": "m", "fields": []}"#, Some("json")).unwrap();
        assert_eq!(v["name"], "m");
    }

    #[test]
    fn values_need_exactly_one_source() {
        assert!(values_from_args(None, None).is_err());
        let v = values_from_args(Some(r#"{"level": 3}"#.into()), None).unwrap();
        assert_eq!(v["level"], 3);
    }
}
