// Directory index pages and the JSON status endpoint

use super::governor::ResourceGovernor;
use crate::config::CatalogTarget;
use crate::persist::{ConfigStore, Layout};
use serde_json::{Value, json};
use std::io;
use std::path::Path;

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render an HTML index for `dir`, served at `url_path`
///
/// Directories come first, then files, each sorted by name. Hidden
/// entries and in-flight `.part` downloads are left out.
pub fn render_directory(url_path: &str, dir: &Path) -> io::Result<String> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || name.ends_with(".part") {
            continue;
        }
        let meta = entry.metadata()?;
        if meta.is_dir() {
            dirs.push(name);
        } else {
            files.push((name, meta.len()));
        }
    }
    dirs.sort();
    files.sort();

    let base = if url_path.ends_with('/') {
        url_path.to_string()
    } else {
        format!("{}/", url_path)
    };
    let title = escape_html(&base);

    let mut html = format!(
        "<!DOCTYPE html>\n<html><head><title>Index of {title}</title></head>\n<body>\n<h1>Index of {title}</h1>\n<ul>\n"
    );
    if base != "/" {
        html.push_str("<li><a href=\"../\">../</a></li>\n");
    }
    for name in &dirs {
        html.push_str(&format!(
            "<li><a href=\"{}/\">{}/</a></li>\n",
            urlencoding::encode(name),
            escape_html(name)
        ));
    }
    for (name, len) in &files {
        html.push_str(&format!(
            "<li><a href=\"{}\">{}</a> {} bytes</li>\n",
            urlencoding::encode(name),
            escape_html(name),
            len
        ));
    }
    html.push_str("</ul>\n</body></html>\n");
    Ok(html)
}

/// Snapshot returned by `GET /api/<target>.json`
pub fn api_snapshot(
    store: &ConfigStore,
    target: &CatalogTarget,
    governor: &ResourceGovernor,
) -> anyhow::Result<Value> {
    let config = store.load(target)?;
    let layout = match store.layout(target) {
        Layout::Single if config.is_none() => Value::Null,
        layout => json!(layout.as_str()),
    };

    Ok(json!({
        "name": target.name,
        "type": target.kind.as_str(),
        "source": target.source,
        "layout": layout,
        "config": config,
        "resources": governor.snapshot(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResourceConfig, TargetKind};
    use crate::persist::Provenance;
    use crate::version;
    use tempfile::TempDir;

    #[test]
    fn test_directory_order_and_escaping() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("zeta")).unwrap();
        std::fs::create_dir(dir.path().join("alpha")).unwrap();
        std::fs::write(dir.path().join("b.tar.gz"), b"x").unwrap();
        std::fs::write(dir.path().join("a <1>.zip"), b"xy").unwrap();
        std::fs::write(dir.path().join("c.zip.part"), b"partial").unwrap();
        std::fs::write(dir.path().join(".hidden"), b"").unwrap();

        let html = render_directory("/php", dir.path()).unwrap();

        let alpha = html.find("alpha/").unwrap();
        let zeta = html.find("zeta/").unwrap();
        let a = html.find("a &lt;1&gt;.zip").unwrap();
        let b = html.find("b.tar.gz").unwrap();
        assert!(alpha < zeta && zeta < a && a < b);
        assert!(html.contains("Index of /php/"));
        assert!(html.contains("href=\"a%20%3C1%3E.zip\""));
        assert!(html.contains("href=\"../\""));
        assert!(!html.contains("c.zip.part"));
        assert!(!html.contains(".hidden"));
    }

    #[test]
    fn test_root_has_no_parent_link() {
        let dir = TempDir::new().unwrap();
        let html = render_directory("/", dir.path()).unwrap();
        assert!(!html.contains("../"));
    }

    #[test]
    fn test_api_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("versions"));
        let governor = ResourceGovernor::open(&ResourceConfig {
            state_file: dir.path().join("state.json"),
            ..Default::default()
        });
        let target = CatalogTarget::new("redis", TargetKind::RegistryFeed, "redis");

        let empty = api_snapshot(&store, &target, &governor).unwrap();
        assert_eq!(empty["config"], Value::Null);
        assert_eq!(empty["layout"], Value::Null);

        let all = version::normalize_all(["5.3.7", "6.0.2"], true);
        store
            .persist(&target, &all, &all, &Provenance::now("registry-feed:redis"))
            .unwrap();

        let snapshot = api_snapshot(&store, &target, &governor).unwrap();
        assert_eq!(snapshot["name"], "redis");
        assert_eq!(snapshot["type"], "registry-feed");
        assert_eq!(snapshot["layout"], "single");
        assert_eq!(snapshot["config"]["all_versions"], json!(["5.3.7", "6.0.2"]));
        assert_eq!(snapshot["resources"]["max_concurrent_downloads"], 10);
    }
}
