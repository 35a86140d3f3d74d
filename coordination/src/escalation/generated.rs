//! Tier 3: extracting runnable code from oracle replies

use std::sync::LazyLock;

use regex::Regex;

use crate::sandbox::{CodeSnippet, SnippetLanguage};

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*(?i:(python|py|bash|shell|sh))[ \t]*\r?\n(.*?)```").unwrap()
});

/// First fenced block tagged `python`, `py`, `bash`, `sh` or `shell`.
///
/// Untagged blocks and other languages are ignored; a recognized block with
/// only whitespace counts as no code.
pub fn extract_code_block(reply: &str) -> Option<CodeSnippet> {
    let caps = FENCED_BLOCK.captures(reply)?;
    let language = SnippetLanguage::from_tag(caps.get(1)?.as_str())?;
    let code = caps.get(2)?.as_str();
    if code.trim().is_empty() {
        return None;
    }
    Some(CodeSnippet::new(language, code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_first_recognized_block() {
        let reply = "Try this:\n```text\nnot code\n```\n```bash\nsystemctl restart ollama\n```\n```python\nprint('x')\n```";
        let snippet = extract_code_block(reply).unwrap();
        assert_eq!(snippet.language, SnippetLanguage::Bash);
        assert_eq!(snippet.code, "systemctl restart ollama\n");
    }

    #[test]
    fn test_tag_variants() {
        let py = extract_code_block("```py\nprint(1)\n```").unwrap();
        assert_eq!(py.language, SnippetLanguage::Python);
        let shell = extract_code_block("```shell\nls\n```").unwrap();
        assert_eq!(shell.language, SnippetLanguage::Shell);
        let upper = extract_code_block("```Python\nprint(1)\n```").unwrap();
        assert_eq!(upper.language, SnippetLanguage::Python);
    }

    #[test]
    fn test_no_block() {
        assert!(extract_code_block("Just restart it manually.").is_none());
        assert!(extract_code_block("```\nuntagged\n```").is_none());
        assert!(extract_code_block("```rust\nfn main() {}\n```").is_none());
        assert!(extract_code_block("```bash\n   \n```").is_none());
        assert!(extract_code_block("```bash\nunterminated").is_none());
    }
}
