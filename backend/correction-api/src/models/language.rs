use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Languages accepted for training submissions.
///
/// The serialized form is the machine name stored with every attempt
/// (`"c"`, `"cpp"`, `"python"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    C,
    Cpp,
    Csharp,
    Haskell,
    Java,
    Ocaml,
    Python,
    Php,
    Rust,
    Ada,
    Js,
    Lua,
    Pascal,
    Perl,
    Scheme,
    Pseudocode,
}

impl Language {
    pub const ALL: [Language; 16] = [
        Language::C,
        Language::Cpp,
        Language::Csharp,
        Language::Haskell,
        Language::Java,
        Language::Ocaml,
        Language::Python,
        Language::Php,
        Language::Rust,
        Language::Ada,
        Language::Js,
        Language::Lua,
        Language::Pascal,
        Language::Perl,
        Language::Scheme,
        Language::Pseudocode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Csharp => "csharp",
            Language::Haskell => "haskell",
            Language::Java => "java",
            Language::Ocaml => "ocaml",
            Language::Python => "python",
            Language::Php => "php",
            Language::Rust => "rust",
            Language::Ada => "ada",
            Language::Js => "js",
            Language::Lua => "lua",
            Language::Pascal => "pascal",
            Language::Perl => "perl",
            Language::Scheme => "scheme",
            Language::Pseudocode => "pseudocode",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Language::C => "C",
            Language::Cpp => "C++",
            Language::Csharp => "C#",
            Language::Haskell => "Haskell",
            Language::Java => "Java",
            Language::Ocaml => "OCaml",
            Language::Python => "Python",
            Language::Php => "PHP",
            Language::Rust => "Rust",
            Language::Ada => "Ada",
            Language::Js => "Javascript",
            Language::Lua => "Lua",
            Language::Pascal => "Pascal",
            Language::Perl => "Perl",
            Language::Scheme => "Scheme",
            Language::Pseudocode => "Pseudocode",
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::C => &[".c"],
            Language::Cpp => &[".cc", ".c++", ".cpp"],
            Language::Csharp => &[".cs"],
            Language::Haskell => &[".hs"],
            Language::Java => &[".java"],
            Language::Ocaml => &[".ml", ".ocaml"],
            Language::Python => &[".py"],
            Language::Php => &[".php"],
            Language::Rust => &[".rs"],
            Language::Ada => &[".adb"],
            Language::Js => &[".js"],
            Language::Lua => &[".lua"],
            Language::Pascal => &[".pas", ".pascal"],
            Language::Perl => &[".pl", ".perl"],
            Language::Scheme => &[".scm"],
            Language::Pseudocode => &[".txt"],
        }
    }

    /// Identifier understood by the corrector service, `None` when the
    /// language cannot be corrected automatically.
    pub fn corrector_name(&self) -> Option<&'static str> {
        match self {
            Language::C => Some("c"),
            Language::Cpp => Some("c++"),
            Language::Csharp => Some("c#"),
            Language::Haskell => Some("haskell"),
            Language::Java => Some("java"),
            Language::Ocaml => Some("ocaml"),
            Language::Python => Some("python"),
            Language::Php => Some("php"),
            Language::Rust => Some("rust"),
            Language::Ada => Some("ada"),
            Language::Js => Some("javascript"),
            Language::Lua => Some("lua"),
            Language::Pascal => Some("pascal"),
            Language::Perl => Some("perl"),
            Language::Scheme => Some("scheme"),
            Language::Pseudocode => None,
        }
    }

    pub fn is_correctable(&self) -> bool {
        self.corrector_name().is_some()
    }

    /// User time limit in seconds granted to this language for a problem
    /// limit of `seconds`.
    pub fn time_limit(&self, seconds: f64) -> f64 {
        match self {
            Language::Csharp => seconds + 0.038,
            Language::Haskell | Language::Java => 4.0 * seconds + 0.200,
            Language::Python => 15.0 * seconds,
            Language::Php => 8.0 * seconds,
            Language::Js => 5.0 * seconds,
            Language::Lua | Language::Perl => 10.0 * seconds,
            Language::Scheme => 3.0 * seconds,
            _ => seconds,
        }
    }

    /// Memory limit in KiB for a problem limit of `kib`. Always padded with
    /// 4 MiB and doubled so that only asymptotically bad programs hit it.
    pub fn memory_limit(&self, kib: i64) -> i64 {
        let scaled = match self {
            Language::C | Language::Cpp | Language::Rust | Language::Ada | Language::Pascal => {
                kib + 4096
            }
            Language::Csharp => kib + 50000,
            Language::Haskell | Language::Java => 5 * kib + 30000,
            Language::Ocaml => 2 * kib + 15000,
            Language::Python => 5 * kib + 9000,
            Language::Php => 5 * kib + 36384,
            Language::Js => 5 * kib + 26000,
            Language::Lua | Language::Perl => kib + 5000,
            Language::Scheme => kib + 36384,
            Language::Pseudocode => kib,
        };
        4096 + scaled * 2
    }

    /// Lenient lookup by machine name, display name or file extension.
    pub fn guess(value: &str) -> Option<Language> {
        let value = value.trim().to_lowercase();
        let value = if value == "caml" { "ocaml".to_string() } else { value };

        if let Some(lang) = Language::ALL.iter().find(|l| l.as_str() == value) {
            return Some(*lang);
        }

        Language::ALL.iter().copied().find(|lang| {
            lang.display_name().to_lowercase() == value
                || lang
                    .extensions()
                    .iter()
                    .any(|ext| *ext == value || ext.trim_start_matches('.') == value)
        })
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::guess(s).ok_or_else(|| s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guess_accepts_names_and_extensions() {
        assert_eq!(Language::guess("cpp"), Some(Language::Cpp));
        assert_eq!(Language::guess("PYTHON"), Some(Language::Python));
        assert_eq!(Language::guess(".rs"), Some(Language::Rust));
        assert_eq!(Language::guess("ml"), Some(Language::Ocaml));
        assert_eq!(Language::guess("caml"), Some(Language::Ocaml));
        assert_eq!(Language::guess("C++"), Some(Language::Cpp));
        assert_eq!(Language::guess("cobol"), None);
    }

    #[test]
    fn pseudocode_is_not_correctable() {
        assert!(!Language::Pseudocode.is_correctable());
        assert!(Language::ALL
            .iter()
            .filter(|l| **l != Language::Pseudocode)
            .all(|l| l.is_correctable()));
    }

    #[test]
    fn limits_follow_language_factors() {
        assert_eq!(Language::C.memory_limit(1000), 4096 + (1000 + 4096) * 2);
        assert_eq!(Language::Python.memory_limit(1000), 4096 + (5000 + 9000) * 2);
        assert!((Language::Python.time_limit(1.0) - 15.0).abs() < f64::EPSILON);
        assert!((Language::Java.time_limit(0.5) - 2.2).abs() < 1e-9);
        assert!((Language::Cpp.time_limit(0.25) - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn serde_uses_machine_names() {
        assert_eq!(serde_json::to_string(&Language::Csharp).unwrap(), "\"csharp\"");
        let lang: Language = serde_json::from_str("\"js\"").unwrap();
        assert_eq!(lang, Language::Js);
    }
}
