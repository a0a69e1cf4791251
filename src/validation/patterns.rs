//! Injection pattern catalog
//!
//! Four pattern classes compiled once into case-insensitive [`RegexSet`]s.
//! The catalog is append-only: removing a pattern requires documented
//! justification in the commit that does it.
//!
//! This is a soft defense against pathological inputs reaching downstream
//! systems, not a security boundary.

use regex::RegexSet;
use std::sync::LazyLock;

use crate::domain::error::InjectionClass;

/// SQL injection patterns.
pub const SQL_PATTERNS: &[&str] = &[
    r"'\s*or\s+'1'\s*=\s*'1",
    r#""\s*or\s+"1"\s*=\s*"1"#,
    r"'\s*or\s+1\s*=\s*1",
    r"\bor\s+1\s*=\s*1\s*(--|#|;)",
    r"'\s*or\s+''\s*=\s*'",
    r"\bunion\s+select\b",
    r"\bunion\s+all\s+select\b",
    r"\bunion\s+select\s+null\b",
    r"\bselect\s+\*\s+from\b",
    r"\bselect\s+.{0,40}\bfrom\s+information_schema\b",
    r"\bselect\s+password\s+from\b",
    r"\bselect\s+.{0,40}\bfrom\s+mysql\.user\b",
    r"\bselect\s+.{0,40}\bfrom\s+pg_catalog\b",
    r"\bselect\s+.{0,40}\bfrom\s+sysobjects\b",
    r"\bdrop\s+table\b",
    r"\bdrop\s+database\b",
    r"\bdrop\s+schema\b",
    r"\bdrop\s+index\b",
    r"\bdrop\s+view\b",
    r"\bdrop\s+procedure\b",
    r"\btruncate\s+table\b",
    r"\bdelete\s+from\s+\w+\s*(;|--|where\s+1\s*=\s*1)",
    r"\binsert\s+into\s+\w+.{0,80}\bvalues\s*\(",
    r"\bupdate\s+\w+\s+set\s+\w+\s*=",
    r"\balter\s+table\b",
    r"\balter\s+database\b",
    r"\bcreate\s+table\s+.{0,40}\bas\s+select\b",
    r"\bexec\s+xp_",
    r"\bexecute\s+xp_",
    r"\bxp_cmdshell\b",
    r"\bsp_executesql\b",
    r"\bsp_password\b",
    r"\bwaitfor\s+delay\b",
    r"\bbenchmark\s*\(\s*\d+",
    r"\bsleep\s*\(\s*\d+\s*\)",
    r"\bpg_sleep\s*\(",
    r"\bdbms_pipe\.receive_message\b",
    r"\butl_inaddr\b",
    r"\butl_http\b",
    r"\bload_file\s*\(",
    r"\binto\s+outfile\b",
    r"\binto\s+dumpfile\b",
    r"\bload\s+data\s+infile\b",
    r"\binformation_schema\.tables\b",
    r"\binformation_schema\.columns\b",
    r"\bsyscolumns\b",
    r"\bsysusers\b",
    r"\bextractvalue\s*\(",
    r"\bupdatexml\s*\(",
    r"\bhaving\s+1\s*=\s*1\b",
    r"\border\s+by\s+\d+\s*--",
    r"\bconvert\s*\(\s*int\s*,",
    r"'\s*;\s*shutdown\b",
    r"'\s*;\s*drop\b",
    r"\bgrant\s+all\s+privileges\b",
    r"\bidentified\s+by\s+'",
    r"'\s*--\s*$",
    r";\s*--\s*$",
    r"0x27\s*or\s*0x27",
];

/// Prompt-injection patterns.
pub const PROMPT_PATTERNS: &[&str] = &[
    r"ignore\s+(all\s+)?previous\s+instructions",
    r"ignore\s+(all\s+)?prior\s+instructions",
    r"ignore\s+the\s+above\s+instructions",
    r"disregard\s+(all\s+)?(previous|prior|above)\s+instructions",
    r"forget\s+(all\s+)?(previous|prior|your)\s+instructions",
    r"override\s+(all\s+)?(previous|system)\s+instructions",
    r"ignore\s+your\s+(programming|guidelines|training)",
    r"new\s+instructions?\s*:",
    r"system\s+prompt\s*:",
    r"you\s+are\s+now\s+(a|an|in)\b",
    r"from\s+now\s+on\s+you\s+(are|will)",
    r"pretend\s+(to\s+be|you\s+are)",
    r"your\s+new\s+persona",
    r"roleplay\s+as\b",
    r"stay\s+in\s+character",
    r"\bjailbreak\b",
    r"\bdan\s+mode\b",
    r"do\s+anything\s+now",
    r"developer\s+mode\s+enabled",
    r"admin\s+override\b",
    r"sudo\s+mode\b",
    r"reveal\s+(your\s+)?(system\s+)?prompt",
    r"show\s+me\s+your\s+(system\s+)?prompt",
    r"print\s+your\s+instructions",
    r"repeat\s+the\s+words\s+above",
    r"what\s+(are|were)\s+your\s+instructions",
    r"disable\s+(your\s+)?(safety|content)\s+(filter|filters|guidelines)",
    r"bypass\s+(your\s+)?safety",
    r"without\s+any\s+restrictions",
    r"no\s+longer\s+bound\s+by",
    r"simulate\s+an?\s+unrestricted",
    r"unfiltered\s+response",
    r"\[system\]",
    r"<\|im_start\|>",
    r"<\|im_end\|>",
    r"<\|endoftext\|>",
    r"begin\s+system\s+message",
    r"assistant\s*:\s*sure[,!]",
];

/// Shell-command patterns.
pub const SHELL_PATTERNS: &[&str] = &[
    r";\s*rm\s+-rf\b",
    r"&&\s*rm\s+-rf\b",
    r"\brm\s+-rf\s+/",
    r"\|\s*bash\b",
    r"\|\s*sh\s*$",
    r"\bcurl\s+[^|;]{0,120}\|\s*(ba)?sh\b",
    r"\bwget\s+[^|;]{0,120}\|\s*(ba)?sh\b",
    r"\$\(\s*curl\b",
    r"\$\(\s*wget\b",
    r"`[^`]{0,120}(curl|wget|rm\s+-rf|nc\s+-e)[^`]{0,120}`",
    r"\bnc\s+-e\s",
    r"/dev/tcp/",
    r"\bmkfifo\s+/tmp/",
    r":\(\)\s*\{\s*:\|:&\s*\}",
    r"\beval\s*\(\s*base64",
    r"\bbase64\s+(-d|--decode)\s*\|",
    r">\s*/etc/passwd",
    r"\bcat\s+/etc/shadow\b",
    r"\bchmod\s+777\s+/",
    r"\bpowershell\s+-enc(odedcommand)?\b",
    r"\bsh\s+-c\s+['\x22]",
];

/// Path-traversal patterns.
pub const PATH_PATTERNS: &[&str] = &[
    r"\.\./\.\./",
    r"\.\.\\\.\.\\",
    r"\.\.[/\\].{0,40}etc[/\\]passwd",
    r"/etc/passwd",
    r"/etc/shadow",
    r"/proc/self/environ",
    r"%2e%2e%2f",
    r"%2e%2e/",
    r"\.\.%2f",
    r"%252e%252e",
    r"\.\.;/",
    r"c:\\windows\\system32",
];

fn compile(patterns: &[&str]) -> RegexSet {
    // (?i) per pattern rather than a set-wide flag so individual patterns
    // can opt out later without recompiling the catalog.
    let prefixed: Vec<String> = patterns.iter().map(|p| format!("(?i){p}")).collect();
    RegexSet::new(&prefixed).expect("injection catalog patterns must compile")
}

static SQL_SET: LazyLock<RegexSet> = LazyLock::new(|| compile(SQL_PATTERNS));
static PROMPT_SET: LazyLock<RegexSet> = LazyLock::new(|| compile(PROMPT_PATTERNS));
static SHELL_SET: LazyLock<RegexSet> = LazyLock::new(|| compile(SHELL_PATTERNS));
static PATH_SET: LazyLock<RegexSet> = LazyLock::new(|| compile(PATH_PATTERNS));

/// Scan `text` against all four classes; returns the first class that
/// matches, in severity order.
pub fn scan(text: &str) -> Option<InjectionClass> {
    if SQL_SET.is_match(text) {
        Some(InjectionClass::Sql)
    } else if SHELL_SET.is_match(text) {
        Some(InjectionClass::Shell)
    } else if PATH_SET.is_match(text) {
        Some(InjectionClass::PathTraversal)
    } else if PROMPT_SET.is_match(text) {
        Some(InjectionClass::Prompt)
    } else {
        None
    }
}
