//! 本地近似后端
//!
//! 后端不可达时的降级实现：按文字系统判断语言，翻译直接返回原文。

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;

use super::backend::{BackendTranslation, DetectedLanguage, TranslationBackend};
use crate::translation::config::constants::FALLBACK_CONFIDENCE;
use crate::translation::error::TranslationResult;
use crate::translation::model::{normalize_language, ModelTier};

/// 拉丁字母文本的默认语言
const LATIN_DEFAULT: &str = "en";

/// 确定性的本地近似后端
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalApproximation;

impl LocalApproximation {
    pub fn new() -> Self {
        Self
    }

    /// 基于文字系统的语言检测
    pub fn detect_script(text: &str) -> DetectedLanguage {
        let mut counts: HashMap<&'static str, usize> = HashMap::new();
        let mut letters = 0usize;

        for c in text.chars().filter(|c| c.is_alphabetic()) {
            letters += 1;
            *counts.entry(script_language(c)).or_insert(0) += 1;
        }

        if letters == 0 {
            return DetectedLanguage {
                language: LATIN_DEFAULT.to_string(),
                confidence: 0.0,
            };
        }

        // 日文混用汉字，出现假名即判为日文
        if counts.get("ja").copied().unwrap_or(0) > 0 {
            let kana_and_han = counts.get("ja").copied().unwrap_or(0)
                + counts.get("zh").copied().unwrap_or(0);
            return DetectedLanguage {
                language: "ja".to_string(),
                confidence: ratio(kana_and_han, letters),
            };
        }

        let (language, count) = counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(language, count)| (*language, *count))
            .unwrap_or((LATIN_DEFAULT, 0));

        // 拉丁字母无法区分具体语言，置信度打折
        let confidence = if language == LATIN_DEFAULT {
            ratio(count, letters) * 0.5
        } else {
            ratio(count, letters)
        };

        DetectedLanguage {
            language: language.to_string(),
            confidence,
        }
    }

    /// 近似翻译：返回原文
    pub fn approximate(text: &str, source: &str, started: Instant) -> BackendTranslation {
        BackendTranslation {
            translated_text: text.to_string(),
            source_language: normalize_language(source),
            confidence: FALLBACK_CONFIDENCE,
            model_tier: ModelTier::Fallback,
            processing_time_ms: started.elapsed().as_millis() as u64,
            from_cache: false,
            degraded: true,
        }
    }
}

fn ratio(part: usize, total: usize) -> f32 {
    if total == 0 {
        0.0
    } else {
        part as f32 / total as f32
    }
}

fn script_language(c: char) -> &'static str {
    match c as u32 {
        0x3040..=0x30FF | 0x31F0..=0x31FF => "ja",
        0x4E00..=0x9FFF | 0x3400..=0x4DBF => "zh",
        0xAC00..=0xD7AF | 0x1100..=0x11FF | 0x3130..=0x318F => "ko",
        0x0400..=0x04FF => "ru",
        0x0600..=0x06FF | 0x0750..=0x077F => "ar",
        0x0590..=0x05FF => "he",
        0x0370..=0x03FF => "el",
        0x0E00..=0x0E7F => "th",
        0x0900..=0x097F => "hi",
        _ => LATIN_DEFAULT,
    }
}

#[async_trait]
impl TranslationBackend for LocalApproximation {
    async fn translate(
        &self,
        text: &str,
        source: &str,
        _target: &str,
    ) -> TranslationResult<BackendTranslation> {
        Ok(Self::approximate(text, source, Instant::now()))
    }

    async fn detect_language(&self, text: &str) -> TranslationResult<DetectedLanguage> {
        Ok(Self::detect_script(text))
    }

    async fn ensure_connected(&self) -> TranslationResult<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "local-approximation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_detection() {
        assert_eq!(LocalApproximation::detect_script("你好世界").language, "zh");
        assert_eq!(LocalApproximation::detect_script("こんにちは世界").language, "ja");
        assert_eq!(LocalApproximation::detect_script("안녕하세요").language, "ko");
        assert_eq!(LocalApproximation::detect_script("Привет мир").language, "ru");

        let latin = LocalApproximation::detect_script("Hello world");
        assert_eq!(latin.language, "en");
        assert!(latin.confidence <= 0.5);
    }

    #[test]
    fn test_empty_text_has_zero_confidence() {
        let detected = LocalApproximation::detect_script("123 !!");
        assert_eq!(detected.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_translation_returns_source_text() {
        let result = LocalApproximation::new()
            .translate("Hello", "EN", "fr")
            .await
            .expect("local approximation never fails");
        assert_eq!(result.translated_text, "Hello");
        assert_eq!(result.source_language, "en");
        assert_eq!(result.model_tier, ModelTier::Fallback);
        assert!(result.degraded);
        assert!((result.confidence - 0.1).abs() < f32::EPSILON);
    }
}
