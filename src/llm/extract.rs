//! 从 AI 回复中提取 ``` 代码块

use std::sync::OnceLock;

use regex::Regex;

static FENCE_RE: OnceLock<Regex> = OnceLock::new();

/// 返回第一个三反引号代码块的内容（去掉可选语言标记）；没有代码块时返回去除首尾空白的原文
pub fn extract_code_block(response: &str) -> String {
    let re = FENCE_RE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_+#.-]*[ \t]*\r?\n(.*?)```").unwrap()
    });
    match re.captures(response).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().trim_end().to_string(),
        None => response.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_with_language_tag() {
        let reply = "Here you go:\n```rust\npub struct Foo;\n```\nThanks";
        assert_eq!(extract_code_block(reply), "pub struct Foo;");
    }

    #[test]
    fn test_extract_without_language_tag() {
        let reply = "```\nline one\nline two\n```";
        assert_eq!(extract_code_block(reply), "line one\nline two");
    }

    #[test]
    fn test_extract_first_block_only() {
        let reply = "```ts\nconst a = 1;\n```\n```ts\nconst b = 2;\n```";
        assert_eq!(extract_code_block(reply), "const a = 1;");
    }

    #[test]
    fn test_extract_plain_text_fallback() {
        assert_eq!(extract_code_block("  just text \n"), "just text");
    }
}
