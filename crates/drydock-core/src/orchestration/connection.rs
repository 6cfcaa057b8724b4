//! Connection-string construction and placement.
//!
//! The formats here are what the deployed application parses; every
//! separator and key casing is load-bearing.

use std::path::Path;

use anyhow::Context;
use tracing::info;

pub fn postgres_connection_string(
    host: &str,
    port: u16,
    database: &str,
    username: &str,
    password: &str,
) -> String {
    format!(
        "Server={host};Port={port};Database={database};User ID={username};\
         password={password};Timeout=500; CommandTimeout=400;MaxPoolSize=1024;"
    )
}

pub fn mssql_connection_string(
    host: &str,
    port: u16,
    database: &str,
    username: &str,
    password: &str,
) -> String {
    format!(
        "Data Source={host},{port};Initial Catalog={database};\
         User ID={username};Password={password};MultipleActiveResultSets=True;\
         Pooling=true;Max Pool Size=100"
    )
}

pub fn mssql_windows_auth_connection_string(host: &str, database: &str) -> String {
    format!(
        "Data Source={host};Initial Catalog={database};\
         Integrated Security=SSPI;MultipleActiveResultSets=True;\
         Pooling=true;Max Pool Size=100"
    )
}

pub fn redis_connection_string(host: &str, db_index: u32, port: u16) -> String {
    format!("host={host};db={db_index};port={port}")
}

/// Write the db and redis connection strings into the deployed tree.
///
/// Classic .NET-Framework trees carry an XML `ConnectionStrings.config`;
/// newer trees are configured through `appsettings.json`.
pub fn write_connection_strings(
    folder: &Path,
    db: &str,
    redis: &str,
    net_framework: bool,
) -> anyhow::Result<()> {
    if net_framework {
        let path = folder.join("ConnectionStrings.config");
        let content = if path.exists() {
            std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?
        } else {
            empty_connection_strings_document()
        };
        let content = upsert_xml_entry(&content, "db", db);
        let content = upsert_xml_entry(&content, "redis", redis);
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("updated {}", path.display());
    } else {
        let path = folder.join("appsettings.json");
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut root: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        let section = root
            .as_object_mut()
            .context("appsettings.json root is not an object")?
            .entry("ConnectionStrings")
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
        let section = section
            .as_object_mut()
            .context("ConnectionStrings section is not an object")?;
        section.insert("db".to_string(), serde_json::Value::String(db.to_string()));
        section.insert(
            "redis".to_string(),
            serde_json::Value::String(redis.to_string()),
        );
        let pretty = serde_json::to_string_pretty(&root)?;
        std::fs::write(&path, pretty)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("updated {}", path.display());
    }
    Ok(())
}

fn empty_connection_strings_document() -> String {
    "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<connectionStrings>\n</connectionStrings>\n"
        .to_string()
}

/// Replace the `connectionString` value of the named `<add>` entry, or
/// append the entry when it is missing. Pure string surgery; the rest of
/// the document is left untouched.
fn upsert_xml_entry(content: &str, name: &str, value: &str) -> String {
    let marker = format!("name=\"{name}\"");
    if let Some(entry_pos) = content.find(&marker) {
        let after = &content[entry_pos..];
        if let Some(attr_offset) = after.find("connectionString=\"") {
            let value_start = entry_pos + attr_offset + "connectionString=\"".len();
            if let Some(value_len) = content[value_start..].find('"') {
                let mut out = String::with_capacity(content.len() + value.len());
                out.push_str(&content[..value_start]);
                out.push_str(value);
                out.push_str(&content[value_start + value_len..]);
                return out;
            }
        }
    }
    let entry = format!("  <add name=\"{name}\" connectionString=\"{value}\" />\n");
    match content.find("</connectionStrings>") {
        Some(close) => {
            let mut out = String::with_capacity(content.len() + entry.len());
            out.push_str(&content[..close]);
            out.push_str(&entry);
            out.push_str(&content[close..]);
            out
        }
        None => {
            let mut out = empty_connection_strings_document();
            let close = out
                .find("</connectionStrings>")
                .unwrap_or(out.len());
            out.insert_str(close, &entry);
            out
        }
    }
}
