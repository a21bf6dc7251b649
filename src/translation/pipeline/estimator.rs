//! 成本估算器
//!
//! 纯函数：根据字符数、词数、标点数和标记语法判断消息复杂度，并估算翻译耗时。

use serde::{Deserialize, Serialize};

use crate::translation::config::constants;
use crate::translation::model::Complexity;

/// 估算结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub complexity: Complexity,
    pub estimated_time_ms: u64,
    pub char_count: usize,
    pub word_count: usize,
}

/// 文本特征
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TextFeatures {
    chars: usize,
    words: usize,
    punctuation: usize,
    has_markup: bool,
}

impl TextFeatures {
    fn of(content: &str) -> Self {
        Self {
            chars: content.chars().count(),
            words: content.split_whitespace().count(),
            punctuation: content.chars().filter(|c| is_punctuation(*c)).count(),
            has_markup: has_markup(content),
        }
    }
}

/// 判断消息复杂度
pub fn classify(content: &str) -> Complexity {
    classify_features(&TextFeatures::of(content))
}

fn classify_features(features: &TextFeatures) -> Complexity {
    if features.chars > constants::ADVANCED_CHAR_THRESHOLD
        || (features.has_markup && features.chars > constants::MARKUP_ADVANCED_CHAR_THRESHOLD)
    {
        Complexity::Advanced
    } else if features.chars > constants::COMPLEX_CHAR_THRESHOLD || features.has_markup {
        Complexity::Complex
    } else if features.chars > constants::MEDIUM_CHAR_THRESHOLD
        || features.words > constants::MEDIUM_WORD_THRESHOLD
        || features.punctuation > constants::MEDIUM_PUNCTUATION_THRESHOLD
    {
        Complexity::Medium
    } else {
        Complexity::Simple
    }
}

/// 估算翻译耗时（毫秒）
pub fn estimate_time(content: &str) -> u64 {
    let features = TextFeatures::of(content);
    time_for(features.chars, classify_features(&features))
}

fn time_for(chars: usize, complexity: Complexity) -> u64 {
    let variable = chars as f64 * constants::LENGTH_FACTOR_MS * complexity.multiplier();
    constants::BASE_TIME_MS + variable.round() as u64
}

/// 完整估算
pub fn estimate(content: &str) -> CostEstimate {
    let features = TextFeatures::of(content);
    let complexity = classify_features(&features);

    CostEstimate {
        complexity,
        estimated_time_ms: time_for(features.chars, complexity),
        char_count: features.chars,
        word_count: features.words,
    }
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(
            c,
            '。' | '，' | '、' | '；' | '：' | '？' | '！' | '…' | '「' | '」' | '《' | '》' | '¿' | '¡'
        )
}

/// 标记语法检测：HTML标签、代码围栏、Markdown链接/强调、URL
fn has_markup(content: &str) -> bool {
    content.contains("```")
        || content.contains("](")
        || content.contains("**")
        || content.contains("__")
        || content.contains("http://")
        || content.contains("https://")
        || has_html_tag(content)
}

fn has_html_tag(content: &str) -> bool {
    let bytes = content.as_bytes();
    bytes.iter().enumerate().any(|(i, &b)| {
        if b != b'<' {
            return false;
        }
        let opens_tag = match bytes.get(i + 1) {
            Some(next) => next.is_ascii_alphabetic() || *next == b'/',
            None => false,
        };
        opens_tag && bytes[i + 1..].contains(&b'>')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_greeting_is_simple() {
        assert_eq!(classify("Hello world"), Complexity::Simple);
    }

    #[test]
    fn test_thresholds() {
        let medium = "a".repeat(51);
        assert_eq!(classify(&medium), Complexity::Medium);
        assert_eq!(
            classify("one two three four five six seven eight nine ten eleven"),
            Complexity::Medium
        );
        assert_eq!(classify("Wait... what?!"), Complexity::Medium);

        let complex = "b".repeat(201);
        assert_eq!(classify(&complex), Complexity::Complex);

        let advanced = "c".repeat(501);
        assert_eq!(classify(&advanced), Complexity::Advanced);
    }

    #[test]
    fn test_markup_raises_complexity() {
        assert_eq!(classify("see <b>this</b>"), Complexity::Complex);
        assert_eq!(classify("docs at https://example.com"), Complexity::Complex);
        assert_eq!(classify("a < b and c > d"), Complexity::Simple);

        let long_markup = format!("**{}**", "d".repeat(210));
        assert_eq!(classify(&long_markup), Complexity::Advanced);
    }

    #[test]
    fn test_estimate_time_formula() {
        // 11 chars, Simple: 100 + 11 * 2 * 1
        assert_eq!(estimate_time("Hello world"), 122);

        let medium = "a".repeat(60);
        // 100 + 60 * 2 * 1.5
        assert_eq!(estimate_time(&medium), 280);

        let estimate = estimate("Hello world");
        assert_eq!(estimate.char_count, 11);
        assert_eq!(estimate.word_count, 2);
        assert_eq!(estimate.complexity, Complexity::Simple);
    }

    #[test]
    fn test_counts_unicode_characters() {
        let estimate = estimate("你好世界");
        assert_eq!(estimate.char_count, 4);
        assert_eq!(estimate.estimated_time_ms, 108);
    }
}
