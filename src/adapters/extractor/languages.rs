//! Per-language extraction rules
//!
//! Declaration patterns, block delimiting style, and import patterns for
//! the closed language set. Regexes are compiled once at first use.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::domain::types::{Language, UnitType};

/// How a language delimits the body of a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStyle {
    /// `{ ... }` with nesting
    Braces,
    /// Indentation (Python)
    Indent,
    /// `def ... end` keyword pairs (Ruby)
    Keyword,
    /// Statement ends at `;` (SQL)
    Semicolon,
}

/// A declaration pattern and the unit type it produces.
pub struct DeclarationRule {
    /// Compiled pattern; must define a `name` capture group
    pub pattern: Regex,
    /// Unit type when matched at top level
    pub unit_type: UnitType,
}

/// Extraction rules for one language.
pub struct LanguageSpec {
    /// Block delimiting style
    pub block_style: BlockStyle,
    /// Declaration patterns, tried in order
    pub declarations: Vec<DeclarationRule>,
    /// Import/include patterns; first non-empty capture is the target
    pub imports: Vec<Regex>,
}

fn rule(pattern: &str, unit_type: UnitType) -> DeclarationRule {
    DeclarationRule {
        pattern: Regex::new(pattern).expect("language declaration pattern must compile"),
        unit_type,
    }
}

fn import(pattern: &str) -> Regex {
    Regex::new(pattern).expect("language import pattern must compile")
}

fn rust_spec() -> LanguageSpec {
    LanguageSpec {
        block_style: BlockStyle::Braces,
        declarations: vec![
            rule(
                r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+\S+\s+)?fn\s+(?P<name>\w+)",
                UnitType::Function,
            ),
            rule(
                r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait|union)\s+(?P<name>\w+)",
                UnitType::Class,
            ),
            rule(
                r"^\s*impl(?:\s*<[^>]*>)?\s+(?:\w+\s+for\s+)?(?P<name>\w+)",
                UnitType::Class,
            ),
            rule(r"^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+(?P<name>\w+)", UnitType::Module),
        ],
        imports: vec![import(r"^\s*(?:pub\s+)?use\s+(?P<target>[A-Za-z_][\w:]*)")],
    }
}

fn python_spec() -> LanguageSpec {
    LanguageSpec {
        block_style: BlockStyle::Indent,
        declarations: vec![
            rule(r"^\s*(?:async\s+)?def\s+(?P<name>\w+)", UnitType::Function),
            rule(r"^\s*class\s+(?P<name>\w+)", UnitType::Class),
        ],
        imports: vec![
            import(r"^\s*from\s+(?P<target>[\w.]+)\s+import"),
            import(r"^\s*import\s+(?P<target>[\w.]+)"),
        ],
    }
}

fn javascript_spec() -> LanguageSpec {
    LanguageSpec {
        block_style: BlockStyle::Braces,
        declarations: vec![
            rule(
                r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(?P<name>\w+)",
                UnitType::Function,
            ),
            rule(
                r"^\s*(?:export\s+)?(?:const|let|var)\s+(?P<name>\w+)\s*=\s*(?:async\s*)?(?:\([^)]*\)|\w+)\s*=>",
                UnitType::Function,
            ),
            rule(
                r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(?P<name>\w+)",
                UnitType::Class,
            ),
        ],
        imports: vec![
            import(r#"^\s*import\s+.*?from\s+['"](?P<target>[^'"]+)['"]"#),
            import(r#"^\s*(?:const|let|var)\s+.*?=\s*require\(['"](?P<target>[^'"]+)['"]\)"#),
        ],
    }
}

fn typescript_spec() -> LanguageSpec {
    let mut spec = javascript_spec();
    spec.declarations.push(rule(
        r"^\s*(?:export\s+)?interface\s+(?P<name>\w+)",
        UnitType::Class,
    ));
    spec.declarations.push(rule(
        r"^\s*(?:export\s+)?namespace\s+(?P<name>\w+)",
        UnitType::Module,
    ));
    spec
}

fn java_like_spec() -> LanguageSpec {
    LanguageSpec {
        block_style: BlockStyle::Braces,
        declarations: vec![
            rule(
                r"^\s*(?:(?:public|private|protected|static|final|abstract|sealed|synchronized|native|internal|virtual|override|async|partial)\s+)*(?:class|interface|enum|record|struct)\s+(?P<name>\w+)",
                UnitType::Class,
            ),
            rule(
                r"^\s*(?:(?:public|private|protected|static|final|abstract|synchronized|native|internal|virtual|override|async|partial)\s+)+[\w<>\[\],.\s]*?\b(?P<name>\w+)\s*\([^;]*\)?\s*\{?\s*$",
                UnitType::Function,
            ),
        ],
        imports: vec![
            import(r"^\s*import\s+(?:static\s+)?(?P<target>[\w.]+)"),
            import(r"^\s*using\s+(?P<target>[\w.]+)\s*;"),
        ],
    }
}

fn go_spec() -> LanguageSpec {
    LanguageSpec {
        block_style: BlockStyle::Braces,
        declarations: vec![
            rule(r"^func\s+\([^)]+\)\s+(?P<name>\w+)", UnitType::Method),
            rule(r"^func\s+(?P<name>\w+)", UnitType::Function),
            rule(
                r"^type\s+(?P<name>\w+)\s+(?:struct|interface)\b",
                UnitType::Class,
            ),
        ],
        imports: vec![
            import(r#"^\s*import\s+(?:\w+\s+)?"(?P<target>[^"]+)""#),
            import(r#"^\s*(?:\w+\s+)?"(?P<target>[\w./-]+)"\s*$"#),
        ],
    }
}

fn c_like_spec() -> LanguageSpec {
    LanguageSpec {
        block_style: BlockStyle::Braces,
        declarations: vec![
            rule(
                r"^\s*(?:class|struct)\s+(?P<name>\w+)(?:\s*[:{]|\s*$)",
                UnitType::Class,
            ),
            rule(r"^\s*namespace\s+(?P<name>\w+)", UnitType::Module),
            rule(
                r"^[\w*&:<>~\s]*?[\w*&>]\s+\*?(?P<name>[\w~]+)\s*\([^;]*\)?\s*\{?\s*$",
                UnitType::Function,
            ),
        ],
        imports: vec![import(r#"^\s*#\s*include\s*[<"](?P<target>[^>"]+)[>"]"#)],
    }
}

fn ruby_spec() -> LanguageSpec {
    LanguageSpec {
        block_style: BlockStyle::Keyword,
        declarations: vec![
            rule(r"^\s*def\s+(?:self\.)?(?P<name>[\w?!]+)", UnitType::Function),
            rule(r"^\s*class\s+(?P<name>\w+)", UnitType::Class),
            rule(r"^\s*module\s+(?P<name>\w+)", UnitType::Module),
        ],
        imports: vec![import(
            r#"^\s*require(?:_relative)?\s+['"](?P<target>[^'"]+)['"]"#,
        )],
    }
}

fn swift_spec() -> LanguageSpec {
    LanguageSpec {
        block_style: BlockStyle::Braces,
        declarations: vec![
            rule(
                r"^\s*(?:(?:public|private|internal|fileprivate|open|static|final|override)\s+)*func\s+(?P<name>\w+)",
                UnitType::Function,
            ),
            rule(
                r"^\s*(?:(?:public|private|internal|fileprivate|open|final)\s+)*(?:class|struct|enum|protocol|extension|actor)\s+(?P<name>\w+)",
                UnitType::Class,
            ),
        ],
        imports: vec![import(r"^\s*import\s+(?P<target>\w+)")],
    }
}

fn kotlin_spec() -> LanguageSpec {
    LanguageSpec {
        block_style: BlockStyle::Braces,
        declarations: vec![
            rule(
                r"^\s*(?:(?:public|private|internal|protected|open|override|suspend|inline|operator|tailrec)\s+)*fun\s+(?:<[^>]+>\s+)?(?P<name>\w+)",
                UnitType::Function,
            ),
            rule(
                r"^\s*(?:(?:public|private|internal|protected|open|abstract|sealed|data|inner)\s+)*(?:class|object|interface)\s+(?P<name>\w+)",
                UnitType::Class,
            ),
        ],
        imports: vec![import(r"^\s*import\s+(?P<target>[\w.]+)")],
    }
}

fn php_spec() -> LanguageSpec {
    LanguageSpec {
        block_style: BlockStyle::Braces,
        declarations: vec![
            rule(
                r"^\s*(?:(?:public|private|protected|static|final|abstract)\s+)*function\s+(?P<name>\w+)",
                UnitType::Function,
            ),
            rule(
                r"^\s*(?:final\s+|abstract\s+)?(?:class|interface|trait)\s+(?P<name>\w+)",
                UnitType::Class,
            ),
        ],
        imports: vec![
            import(r"^\s*use\s+(?P<target>[\w\\]+)"),
            import(r#"^\s*(?:require|include)(?:_once)?\s*\(?\s*['"](?P<target>[^'"]+)['"]"#),
        ],
    }
}

fn sql_spec() -> LanguageSpec {
    LanguageSpec {
        block_style: BlockStyle::Semicolon,
        declarations: vec![
            rule(
                r#"(?i)^\s*create\s+(?:or\s+replace\s+)?(?:function|procedure)\s+(?P<name>[\w."]+)"#,
                UnitType::Function,
            ),
            rule(
                r#"(?i)^\s*create\s+(?:or\s+replace\s+)?(?:table|view|materialized\s+view)\s+(?:if\s+not\s+exists\s+)?(?P<name>[\w."]+)"#,
                UnitType::Other,
            ),
        ],
        imports: Vec::new(),
    }
}

static REGISTRY: LazyLock<HashMap<Language, LanguageSpec>> = LazyLock::new(|| {
    HashMap::from([
        (Language::Rust, rust_spec()),
        (Language::Python, python_spec()),
        (Language::JavaScript, javascript_spec()),
        (Language::TypeScript, typescript_spec()),
        (Language::Java, java_like_spec()),
        (Language::CSharp, java_like_spec()),
        (Language::Go, go_spec()),
        (Language::C, c_like_spec()),
        (Language::Cpp, c_like_spec()),
        (Language::Ruby, ruby_spec()),
        (Language::Swift, swift_spec()),
        (Language::Kotlin, kotlin_spec()),
        (Language::Php, php_spec()),
        (Language::Sql, sql_spec()),
    ])
});

/// Rules for `language`, if it is in the supported set.
pub fn spec_for(language: Language) -> Option<&'static LanguageSpec> {
    REGISTRY.get(&language)
}

/// The closed set of supported languages.
pub const SUPPORTED: &[Language] = &[
    Language::Python,
    Language::JavaScript,
    Language::TypeScript,
    Language::Java,
    Language::Go,
    Language::Rust,
    Language::C,
    Language::Cpp,
    Language::CSharp,
    Language::Ruby,
    Language::Swift,
    Language::Kotlin,
    Language::Php,
    Language::Sql,
];
