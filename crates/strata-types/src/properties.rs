//! Properties files (`key=value` lines).
//!
//! Settings sidecars, writer-materialized configuration, and remote
//! `.settings` files all share this format. Serialization is sorted so the
//! output is byte-stable across runs. Lives in the types crate because both
//! the writer (materialized settings) and the downloader (remote settings)
//! consume it.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::error::Result;

/// Parsed properties map.
pub type Properties = BTreeMap<String, String>;

/// Parse properties from a reader. Blank lines and `#` comments are skipped;
/// lines without exactly one `=` are ignored.
pub fn parse_properties(reader: impl Read) -> Result<Properties> {
    let mut properties = Properties::new();
    for line in BufReader::new(reader).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut tokens = line.splitn(2, '=');
        let key = tokens.next().unwrap_or_default();
        let Some(value) = tokens.next() else {
            continue;
        };
        if value.contains('=') {
            continue;
        }
        properties.insert(key.to_string(), value.to_string());
    }
    Ok(properties)
}

/// Load a properties file from disk.
pub fn load_properties_file(path: &Path) -> Result<Properties> {
    let file = std::fs::File::open(path)?;
    parse_properties(file)
}

/// Serialize sorted `key=value` lines.
pub fn serialize_properties(properties: &Properties) -> String {
    let mut content = String::new();
    for (key, value) in properties {
        content.push_str(key);
        content.push('=');
        content.push_str(value);
        content.push('\n');
    }
    content
}

/// Write a properties file atomically (temp name + rename).
pub fn write_properties_file(properties: &Properties, path: &Path) -> Result<()> {
    write_string_atomic(path, &serialize_properties(properties))
}

/// Write `content` under a temp name in the same directory, then rename into
/// place. Readers only ever observe the complete file.
pub fn write_string_atomic(path: &Path, content: &str) -> Result<()> {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".tmp.{}{}", std::process::id(), nanos));
    let tmp = std::path::PathBuf::from(tmp);
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn get_string<'a>(properties: &'a Properties, key: &str, default: &'a str) -> &'a str {
    properties.get(key).map(String::as_str).unwrap_or(default)
}

pub fn get_u64(properties: &Properties, key: &str, default: u64) -> u64 {
    properties
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn get_f64(properties: &Properties, key: &str, default: f64) -> f64 {
    properties
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn get_bool(properties: &Properties, key: &str, default: bool) -> bool {
    match properties.get(key).map(String::as_str) {
        Some("true") => true,
        Some("false") => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_comments_and_junk() {
        let text = "# comment\n\ncompression.method=zst\nchecksum.extension=xxh3\nbad line\na=b=c\n";
        let props = parse_properties(text.as_bytes()).unwrap();
        assert_eq!(props.len(), 2);
        assert_eq!(get_string(&props, "compression.method", ""), "zst");
        assert_eq!(get_string(&props, "checksum.extension", ""), "xxh3");
    }

    #[test]
    fn serialize_is_sorted() {
        let mut props = Properties::new();
        props.insert("zeta".into(), "1".into());
        props.insert("alpha".into(), "2".into());
        assert_eq!(serialize_properties(&props), "alpha=2\nzeta=1\n");
    }

    #[test]
    fn typed_getters_fall_back() {
        let mut props = Properties::new();
        props.insert("n".into(), "42".into());
        props.insert("f".into(), "0.25".into());
        props.insert("flag".into(), "true".into());
        props.insert("bad".into(), "maybe".into());
        assert_eq!(get_u64(&props, "n", 0), 42);
        assert_eq!(get_u64(&props, "missing", 7), 7);
        assert_eq!(get_f64(&props, "f", 0.0), 0.25);
        assert!(get_bool(&props, "flag", false));
        assert!(!get_bool(&props, "bad", false));
    }

    #[test]
    fn atomic_write_round_trip() {
        let dir = std::env::temp_dir().join(format!("strata-props-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("test.properties");
        let mut props = Properties::new();
        props.insert("ccache.type".into(), "5".into());
        write_properties_file(&props, &path).unwrap();
        let loaded = load_properties_file(&path).unwrap();
        assert_eq!(loaded, props);
        std::fs::remove_dir_all(&dir).ok();
    }
}
