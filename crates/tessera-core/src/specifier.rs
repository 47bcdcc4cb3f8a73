//! Module specifier classification and import scanning.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

/// The syntactic form of a module specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecifierKind {
    /// `http://` or `https://` URL.
    Url,
    /// `./x`, `../x` or `/x`.
    Relative,
    /// `data:` URI.
    Data,
    /// `blob:` URI.
    Blob,
    /// Package-style name such as `widgets/card`.
    Bare,
}

impl SpecifierKind {
    /// Direct forms bypass the manifest.
    pub fn is_direct(&self) -> bool {
        !matches!(self, SpecifierKind::Bare)
    }
}

/// Classify a specifier by its syntactic form.
pub fn classify(specifier: &str) -> SpecifierKind {
    let trimmed = specifier.trim();
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("https://") || lower.starts_with("http://") {
        SpecifierKind::Url
    } else if lower.starts_with("data:") {
        SpecifierKind::Data
    } else if lower.starts_with("blob:") {
        SpecifierKind::Blob
    } else if trimmed.starts_with("./") || trimmed.starts_with("../") || trimmed.starts_with('/') {
        SpecifierKind::Relative
    } else {
        SpecifierKind::Bare
    }
}

/// True for specifiers that need no manifest entry.
pub fn is_direct(specifier: &str) -> bool {
    classify(specifier).is_direct()
}

/// An import found in source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    pub specifier: String,
    /// Byte range of the specifier (without quotes) in the scanned source.
    pub range: Range<usize>,
    pub dynamic: bool,
}

fn static_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:^|[;\s])(?:import|export)\s*(?:[\w*{}\s,$]+?\s*from\s*)?["']([^"'\n]+)["']"#)
            .expect("static import pattern is valid")
    })
}

fn dynamic_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\bimport\s*\(\s*["']([^"'\n]+)["']\s*\)"#)
            .expect("dynamic import pattern is valid")
    })
}

fn any_dynamic_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bimport\s*\(").expect("dynamic import probe is valid"))
}

/// Find every static and literal dynamic import in `code`, in source order.
pub fn scan_imports(code: &str) -> Vec<ImportRef> {
    let mut found: Vec<ImportRef> = Vec::new();

    for caps in static_import_re().captures_iter(code) {
        if let Some(m) = caps.get(1) {
            found.push(ImportRef {
                specifier: m.as_str().to_string(),
                range: m.range(),
                dynamic: false,
            });
        }
    }
    for caps in dynamic_import_re().captures_iter(code) {
        if let Some(m) = caps.get(1) {
            found.push(ImportRef {
                specifier: m.as_str().to_string(),
                range: m.range(),
                dynamic: true,
            });
        }
    }

    found.sort_by_key(|i| i.range.start);
    found
}

/// True when the code contains any `import(` expression, literal or not.
pub fn has_dynamic_import(code: &str) -> bool {
    any_dynamic_import_re().is_match(code)
}

/// Replace import specifiers in `code` using `rewrite`; `None` keeps the original.
pub fn rewrite_imports<F>(code: &str, imports: &[ImportRef], mut rewrite: F) -> String
where
    F: FnMut(&ImportRef) -> Option<String>,
{
    let mut out = String::with_capacity(code.len());
    let mut cursor = 0;
    for import in imports {
        if import.range.start < cursor {
            continue;
        }
        if let Some(replacement) = rewrite(import) {
            out.push_str(&code[cursor..import.range.start]);
            out.push_str(&replacement);
            cursor = import.range.end;
        }
    }
    out.push_str(&code[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("https://cdn.example.com/a.js"), SpecifierKind::Url);
        assert_eq!(classify("./local.js"), SpecifierKind::Relative);
        assert_eq!(classify("../up.js"), SpecifierKind::Relative);
        assert_eq!(classify("data:text/javascript,export default 1"), SpecifierKind::Data);
        assert_eq!(classify("blob:https://x/123"), SpecifierKind::Blob);
        assert_eq!(classify("widgets/card"), SpecifierKind::Bare);
        assert!(!is_direct("react"));
        assert!(is_direct("/abs.js"));
    }

    #[test]
    fn test_scan_imports() {
        let code = r#"import React from "react";
import { a, b } from './local.js';
import "side-effect";
export * from "re-export";
export const label = "not-an-import";
const lazy = () => import("lazy-mod");
"#;
        let specs: Vec<(String, bool)> = scan_imports(code)
            .into_iter()
            .map(|i| (i.specifier, i.dynamic))
            .collect();
        assert_eq!(
            specs,
            vec![
                ("react".to_string(), false),
                ("./local.js".to_string(), false),
                ("side-effect".to_string(), false),
                ("re-export".to_string(), false),
                ("lazy-mod".to_string(), true),
            ]
        );
        assert!(has_dynamic_import(code));
        assert!(!has_dynamic_import("import x from 'y';"));
    }

    #[test]
    fn test_rewrite_imports() {
        let code = "import a from 'a';\nimport b from 'b';";
        let imports = scan_imports(code);
        let rewritten = rewrite_imports(code, &imports, |i| {
            (i.specifier == "b").then(|| "https://cdn/b.js".to_string())
        });
        assert_eq!(rewritten, "import a from 'a';\nimport b from 'https://cdn/b.js';");
    }
}
