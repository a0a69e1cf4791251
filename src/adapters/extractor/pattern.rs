//! Pattern-table semantic unit extractor
//!
//! Line-oriented extraction driven by the per-language rules in
//! [`super::languages`]: declaration regexes find unit starts, and the
//! language's block style (braces, indentation, keyword pairs, or
//! statement terminators) finds where each unit ends. Nested units are
//! tracked on a stack, so methods inside classes come out as `Method` and
//! appear after their enclosing unit in source order.
//!
//! This is deliberately a heuristic, not a parser. A real AST parser can
//! replace it behind the same port without touching the indexer.

use sha2::{Digest, Sha256};

use crate::domain::ports::extractor::UnitExtractor;
use crate::domain::types::{
    Extraction, Language, ParseWarning, SemanticUnit, UnitType,
};

use super::languages::{spec_for, BlockStyle, LanguageSpec, SUPPORTED};

/// Units with less body text than this are noise, not units.
const MIN_BODY_CHARS: usize = 10;

/// Pattern-based implementation of the extraction port.
#[derive(Debug, Default, Clone)]
pub struct PatternExtractor;

impl PatternExtractor {
    /// Create an extractor.
    pub fn new() -> Self {
        Self
    }
}

impl UnitExtractor for PatternExtractor {
    fn extract(&self, language: Language, source: &str) -> Extraction {
        let Some(spec) = spec_for(language) else {
            return Extraction::default();
        };
        if source.contains('\u{0}') {
            return Extraction {
                units: Vec::new(),
                imports: Vec::new(),
                warnings: vec![ParseWarning {
                    file_path: String::new(),
                    message: "binary content, nothing extracted".to_string(),
                }],
            };
        }

        let lines: Vec<&str> = source.lines().collect();
        let imports = collect_imports(spec, &lines);
        let (units, warnings) = match spec.block_style {
            BlockStyle::Braces => extract_braced(spec, &lines),
            BlockStyle::Indent => extract_indented(spec, &lines),
            BlockStyle::Keyword => extract_keyword_delimited(spec, &lines),
            BlockStyle::Semicolon => extract_statements(spec, &lines),
        };
        Extraction {
            units,
            imports,
            warnings,
        }
    }

    fn supported_languages(&self) -> &[Language] {
        SUPPORTED
    }
}

fn collect_imports(spec: &LanguageSpec, lines: &[&str]) -> Vec<String> {
    let mut imports = Vec::new();
    for line in lines {
        for pattern in &spec.imports {
            if let Some(caps) = pattern.captures(line) {
                if let Some(target) = caps.name("target") {
                    imports.push(target.as_str().to_string());
                    break;
                }
            }
        }
    }
    imports
}

fn hash_body(body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

fn signature_of(line: &str) -> String {
    let trimmed = line.trim();
    let cut = trimmed.find('{').unwrap_or(trimmed.len());
    trimmed[..cut].trim_end().trim_end_matches(':').to_string()
}

fn match_declaration(spec: &LanguageSpec, line: &str) -> Option<(UnitType, String)> {
    for rule in &spec.declarations {
        if let Some(caps) = rule.pattern.captures(line) {
            if let Some(name) = caps.name("name") {
                return Some((rule.unit_type, name.as_str().to_string()));
            }
        }
    }
    None
}

struct OpenUnit {
    slot: usize,
    open_depth: i32,
    opened: bool,
    indent: usize,
}

fn finish_unit(
    units: &mut [Option<SemanticUnit>],
    lines: &[&str],
    open: OpenUnit,
    end_line: u32,
) {
    if let Some(unit) = units.get_mut(open.slot).and_then(Option::as_mut) {
        unit.end_line = end_line.max(unit.start_line);
        let body: String = lines[(unit.start_line as usize - 1)..(unit.end_line as usize)]
            .join("\n");
        unit.body_hash = hash_body(&body);
        unit.body = body;
    }
}

fn seal(units: Vec<Option<SemanticUnit>>) -> Vec<SemanticUnit> {
    units
        .into_iter()
        .flatten()
        .filter(|u| u.body.trim().len() >= MIN_BODY_CHARS)
        .collect()
}

fn promote(unit_type: UnitType, stack: &[OpenUnit], units: &[Option<SemanticUnit>]) -> UnitType {
    // A function nested inside a class-like unit is a method.
    if unit_type == UnitType::Function
        && stack.iter().any(|open| {
            units
                .get(open.slot)
                .and_then(|u| u.as_ref())
                .is_some_and(|u| u.unit_type == UnitType::Class)
        })
    {
        UnitType::Method
    } else {
        unit_type
    }
}

fn extract_braced(
    spec: &LanguageSpec,
    lines: &[&str],
) -> (Vec<SemanticUnit>, Vec<ParseWarning>) {
    let mut units: Vec<Option<SemanticUnit>> = Vec::new();
    let mut stack: Vec<OpenUnit> = Vec::new();
    let mut depth: i32 = 0;

    for (index, line) in lines.iter().enumerate() {
        let line_no = (index + 1) as u32;
        let trimmed = line.trim();

        if let Some((unit_type, name)) = match_declaration(spec, line) {
            let unit_type = promote(unit_type, &stack, &units);
            let slot = units.len();
            units.push(Some(SemanticUnit {
                unit_type,
                unit_name: name,
                signature: signature_of(line),
                body: String::new(),
                start_line: line_no,
                end_line: line_no,
                body_hash: String::new(),
            }));
            stack.push(OpenUnit {
                slot,
                open_depth: depth,
                opened: false,
                indent: 0,
            });
        }

        let opens = line.matches('{').count() as i32;
        let closes = line.matches('}').count() as i32;
        if opens > 0 {
            if let Some(top) = stack.last_mut() {
                top.opened = true;
            }
        }
        depth += opens - closes;

        // Declaration-only lines (`fn f();`, abstract methods) close at the
        // terminating semicolon without ever opening a block.
        if let Some(top) = stack.last() {
            if !top.opened && trimmed.ends_with(';') {
                let open = stack.pop().expect("stack top just observed");
                finish_unit(&mut units, lines, open, line_no);
            }
        }

        while let Some(top) = stack.last() {
            if top.opened && depth <= top.open_depth {
                let open = stack.pop().expect("stack top just observed");
                finish_unit(&mut units, lines, open, line_no);
            } else {
                break;
            }
        }
    }

    let mut warnings = Vec::new();
    if !stack.is_empty() || depth != 0 {
        warnings.push(ParseWarning {
            file_path: String::new(),
            message: format!("unbalanced braces (depth {depth} at end of file)"),
        });
        let last = lines.len() as u32;
        while let Some(open) = stack.pop() {
            finish_unit(&mut units, lines, open, last);
        }
    }
    (seal(units), warnings)
}

fn indent_of(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

fn extract_indented(
    spec: &LanguageSpec,
    lines: &[&str],
) -> (Vec<SemanticUnit>, Vec<ParseWarning>) {
    let mut units: Vec<Option<SemanticUnit>> = Vec::new();
    let mut stack: Vec<OpenUnit> = Vec::new();
    // Last non-blank line seen, so trailing blank lines stay out of bodies.
    let mut last_content: u32 = 0;

    for (index, line) in lines.iter().enumerate() {
        let line_no = (index + 1) as u32;
        if line.trim().is_empty() {
            continue;
        }
        let indent = indent_of(line);

        while let Some(top) = stack.last() {
            if indent <= top.indent {
                let open = stack.pop().expect("stack top just observed");
                finish_unit(&mut units, lines, open, last_content);
            } else {
                break;
            }
        }

        if let Some((unit_type, name)) = match_declaration(spec, line) {
            let unit_type = promote(unit_type, &stack, &units);
            let slot = units.len();
            units.push(Some(SemanticUnit {
                unit_type,
                unit_name: name,
                signature: signature_of(line),
                body: String::new(),
                start_line: line_no,
                end_line: line_no,
                body_hash: String::new(),
            }));
            stack.push(OpenUnit {
                slot,
                open_depth: 0,
                opened: true,
                indent,
            });
        }
        last_content = line_no;
    }

    while let Some(open) = stack.pop() {
        finish_unit(&mut units, lines, open, last_content);
    }
    (seal(units), Vec::new())
}

/// Ruby-style `def ... end` tracking.
fn extract_keyword_delimited(
    spec: &LanguageSpec,
    lines: &[&str],
) -> (Vec<SemanticUnit>, Vec<ParseWarning>) {
    const OPENERS: &[&str] = &[
        "def ", "class ", "module ", "if ", "unless ", "while ", "until ", "case ", "begin",
        "for ",
    ];

    let mut units: Vec<Option<SemanticUnit>> = Vec::new();
    let mut stack: Vec<OpenUnit> = Vec::new();
    let mut depth: i32 = 0;

    for (index, line) in lines.iter().enumerate() {
        let line_no = (index + 1) as u32;
        let trimmed = line.trim();

        let declaration = match_declaration(spec, line);
        if let Some((unit_type, name)) = &declaration {
            let unit_type = promote(*unit_type, &stack, &units);
            let slot = units.len();
            units.push(Some(SemanticUnit {
                unit_type,
                unit_name: name.clone(),
                signature: signature_of(line),
                body: String::new(),
                start_line: line_no,
                end_line: line_no,
                body_hash: String::new(),
            }));
            stack.push(OpenUnit {
                slot,
                open_depth: depth,
                opened: true,
                indent: 0,
            });
        }

        let opens_block = OPENERS.iter().any(|k| trimmed.starts_with(k))
            || trimmed.ends_with(" do")
            || trimmed.contains("do |");
        if opens_block {
            depth += 1;
        }
        if trimmed == "end" || trimmed.starts_with("end ") || trimmed.ends_with(" end") {
            depth -= 1;
            while let Some(top) = stack.last() {
                if depth <= top.open_depth {
                    let open = stack.pop().expect("stack top just observed");
                    finish_unit(&mut units, lines, open, line_no);
                } else {
                    break;
                }
            }
        }
    }

    let mut warnings = Vec::new();
    if !stack.is_empty() {
        warnings.push(ParseWarning {
            file_path: String::new(),
            message: "unterminated block at end of file".to_string(),
        });
        let last = lines.len() as u32;
        while let Some(open) = stack.pop() {
            finish_unit(&mut units, lines, open, last);
        }
    }
    (seal(units), warnings)
}

/// SQL-style statement extraction: a unit runs from its `CREATE ...` line
/// to the terminating semicolon, skipping `$$`-quoted bodies.
fn extract_statements(
    spec: &LanguageSpec,
    lines: &[&str],
) -> (Vec<SemanticUnit>, Vec<ParseWarning>) {
    let mut units: Vec<Option<SemanticUnit>> = Vec::new();
    let mut open: Option<OpenUnit> = None;
    let mut in_dollar_quote = false;

    for (index, line) in lines.iter().enumerate() {
        let line_no = (index + 1) as u32;
        let trimmed = line.trim();

        if open.is_none() {
            if let Some((unit_type, name)) = match_declaration(spec, line) {
                let slot = units.len();
                units.push(Some(SemanticUnit {
                    unit_type,
                    unit_name: name,
                    signature: signature_of(line),
                    body: String::new(),
                    start_line: line_no,
                    end_line: line_no,
                    body_hash: String::new(),
                }));
                open = Some(OpenUnit {
                    slot,
                    open_depth: 0,
                    opened: true,
                    indent: 0,
                });
            }
        }

        if line.matches("$$").count() % 2 == 1 {
            in_dollar_quote = !in_dollar_quote;
        }
        if open.is_some() && !in_dollar_quote && trimmed.ends_with(';') {
            let finished = open.take().expect("statement open");
            finish_unit(&mut units, lines, finished, line_no);
        }
    }

    if let Some(unfinished) = open.take() {
        let last = lines.len() as u32;
        finish_unit(&mut units, lines, unfinished, last);
    }
    (seal(units), Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(language: Language, source: &str) -> Extraction {
        PatternExtractor::new().extract(language, source)
    }

    #[test]
    fn rust_functions_and_nested_methods() {
        let source = r#"
pub struct Auth {
    token: String,
}

impl Auth {
    pub fn authenticate_user(&self, name: &str) -> bool {
        !name.is_empty()
    }
}

fn standalone_helper(x: u32) -> u32 {
    x + 1
}
"#;
        let extraction = extract(Language::Rust, source);
        let names: Vec<&str> = extraction
            .units
            .iter()
            .map(|u| u.unit_name.as_str())
            .collect();
        assert_eq!(names, vec!["Auth", "Auth", "authenticate_user", "standalone_helper"]);

        let method = &extraction.units[2];
        assert_eq!(method.unit_type, UnitType::Method);
        assert!(method.signature.contains("authenticate_user"));
        assert!(method.start_line < method.end_line);

        let standalone = &extraction.units[3];
        assert_eq!(standalone.unit_type, UnitType::Function);
    }

    #[test]
    fn python_class_with_methods() {
        let source = r#"
import os
from auth.tokens import issue

class SessionStore:
    def start(self, name):
        return issue(name)

    def stop(self, session_id):
        del self.sessions[session_id]

def helper():
    return 42
"#;
        let extraction = extract(Language::Python, source);
        let names: Vec<&str> = extraction
            .units
            .iter()
            .map(|u| u.unit_name.as_str())
            .collect();
        assert_eq!(names, vec!["SessionStore", "start", "stop", "helper"]);
        assert_eq!(extraction.units[1].unit_type, UnitType::Method);
        assert_eq!(extraction.units[3].unit_type, UnitType::Function);
        assert_eq!(extraction.imports, vec!["os", "auth.tokens"]);
    }

    #[test]
    fn unsupported_language_yields_nothing() {
        let extraction = extract(Language::Unknown, "some text");
        assert!(extraction.units.is_empty());
        assert!(extraction.warnings.is_empty());
    }

    #[test]
    fn binary_content_warns_without_units() {
        let extraction = extract(Language::Rust, "fn main() {}\u{0}binary");
        assert!(extraction.units.is_empty());
        assert_eq!(extraction.warnings.len(), 1);
    }

    #[test]
    fn unbalanced_braces_warn_but_still_emit() {
        let source = "fn broken(x: u32) -> u32 {\n    let y = x + 1;\n";
        let extraction = extract(Language::Rust, source);
        assert_eq!(extraction.warnings.len(), 1);
        assert_eq!(extraction.units.len(), 1);
        assert_eq!(extraction.units[0].unit_name, "broken");
    }

    #[test]
    fn body_hash_is_stable_across_runs() {
        let source = "fn stable() -> u32 {\n    7\n}\n";
        let a = extract(Language::Rust, source);
        let b = extract(Language::Rust, source);
        assert_eq!(a.units[0].body_hash, b.units[0].body_hash);
        assert_eq!(a.units[0].body, "fn stable() -> u32 {\n    7\n}");
    }

    #[test]
    fn sql_statements_split_on_semicolons() {
        let source = r#"
CREATE TABLE users (id INT PRIMARY KEY, name TEXT);

CREATE OR REPLACE FUNCTION count_users() RETURNS INT AS $$
  SELECT COUNT(*) FROM users;
$$ LANGUAGE sql;
"#;
        let extraction = extract(Language::Sql, source);
        assert_eq!(extraction.units.len(), 2);
        assert_eq!(extraction.units[0].unit_type, UnitType::Other);
        assert_eq!(extraction.units[1].unit_name, "count_users");
        assert!(extraction.units[1].body.contains("LANGUAGE sql"));
    }

    #[test]
    fn go_methods_detected_by_receiver() {
        let source = r#"
func (s *Server) Handle(w http.ResponseWriter, r *http.Request) {
    s.mux.ServeHTTP(w, r)
}

func NewServer() *Server {
    return &Server{}
}
"#;
        let extraction = extract(Language::Go, source);
        assert_eq!(extraction.units[0].unit_type, UnitType::Method);
        assert_eq!(extraction.units[0].unit_name, "Handle");
        assert_eq!(extraction.units[1].unit_type, UnitType::Function);
    }
}
