//! Variable declaration file parsing.
//!
//! One entry per line, PLC-style:
//!
//! ```text
//! Word2   AT %MW2:  WORD;          // machine status word
//! Preset  AT %MW100: WORD := 100;  // preset value (readonly)
//! ```
//!
//! Comment-only and blank lines are ignored. Malformed lines are logged
//! and skipped; parsing always continues.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::variable::VarType;

/// Parsed declaration line. Addresses stay textual here; the registry
/// canonicalizes them.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DeclEntry {
    pub name: String,
    pub address: String,
    pub var_type: VarType,
    pub description: String,
    pub initial: Option<i64>,
    pub read_only: bool,
}

/// Parse the whole declaration text.
pub fn parse_decl_str(text: &str) -> Vec<DeclEntry> {
    let mut entries = Vec::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        match parse_line(line) {
            Some(entry) => entries.push(entry),
            None => warn!("unrecognized declaration line (skipping): {line}"),
        }
    }
    entries
}

/// Read and parse a declaration file.
pub fn load_decl_file(path: &std::path::Path) -> std::io::Result<Vec<DeclEntry>> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_decl_str(&text))
}

fn parse_line(line: &str) -> Option<DeclEntry> {
    let (code, description) = match line.split_once("//") {
        Some((code, comment)) => (code, comment.trim().to_string()),
        None => (line, String::new()),
    };
    let mut code = code.trim().trim_end_matches(';').trim().to_string();

    let mut initial = None;
    if let Some((before, after)) = code.split_once(":=") {
        let after = after.trim();
        match after.parse::<i64>() {
            Ok(v) => initial = Some(v),
            Err(_) => warn!("non-numeric initial value '{after}' ignored in: {line}"),
        }
        code = before.trim().to_string();
    }

    let (name_part, rest) = code.split_once(" AT ")?;
    let name = name_part.trim();
    let (addr_part, dtype_part) = rest.split_once(':')?;
    if name.is_empty() {
        return None;
    }
    let address = addr_part.trim().to_string();

    let mut dtype_tokens = dtype_part.split_whitespace();
    let dtype = dtype_tokens.next()?.to_ascii_uppercase();
    let mut read_only = dtype_tokens.any(|t| t.eq_ignore_ascii_case("readonly"));

    let desc_lower = description.to_ascii_lowercase();
    if desc_lower.split_whitespace().any(|t| t == "ro")
        || desc_lower.contains("readonly")
        || desc_lower.contains("read-only")
    {
        read_only = true;
    }

    // Discrete inputs are externally driven, always read-only.
    if is_discrete_input(&address) {
        read_only = true;
    }

    let var_type = match dtype.as_str() {
        "BOOL" | "BIT" => VarType::Bool,
        "BYTE" => VarType::Byte,
        "WORD" => VarType::Word,
        "DWORD" => VarType::DWord,
        "TIME" => VarType::Time,
        other => {
            warn!("unsupported type {other} for {name}, defaulting to WORD");
            VarType::Word
        }
    };

    Some(DeclEntry {
        name: name.to_string(),
        address,
        var_type,
        description,
        initial,
        read_only,
    })
}

fn is_discrete_input(address: &str) -> bool {
    let s = address.trim();
    let s = s.strip_prefix('%').unwrap_or(s);
    s.len() >= 2 && s[..2].eq_ignore_ascii_case("IX")
}
