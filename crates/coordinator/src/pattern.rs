//! Message content matching for message and direct-message triggers.

use {
    regex::{Regex, RegexBuilder},
    switchboard_protocol::{PatternMode, TriggerParameters},
};

use crate::error::Result;

/// A compiled trigger pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Matches when the message mentions the bot account.
    BotMention,
    /// Matches any non-empty content.
    Every,
    Regex(Regex),
}

impl Pattern {
    /// Compile `value` under `mode`. Everything but [`PatternMode::Regex`]
    /// treats the value as literal text.
    pub fn compile(mode: PatternMode, value: &str, case_sensitive: bool) -> Result<Self> {
        let source = match mode {
            PatternMode::BotMention => return Ok(Self::BotMention),
            PatternMode::Every => return Ok(Self::Every),
            PatternMode::Regex => value.to_string(),
            PatternMode::Exact => format!("^{}$", regex::escape(value)),
            PatternMode::Start => format!("^{}", regex::escape(value)),
            PatternMode::End => format!("{}$", regex::escape(value)),
            PatternMode::Contain => regex::escape(value),
        };
        let regex = RegexBuilder::new(&source)
            .case_insensitive(!case_sensitive)
            .build()?;
        Ok(Self::Regex(regex))
    }

    pub fn from_parameters(params: &TriggerParameters) -> Result<Self> {
        Self::compile(params.pattern, &params.value, params.case_sensitive)
    }

    pub fn is_match(&self, content: &str, mentions_bot: bool) -> bool {
        match self {
            Self::BotMention => mentions_bot,
            Self::Every => !content.is_empty(),
            Self::Regex(regex) => regex.is_match(content),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(PatternMode::Exact, "hello", "hello", true)]
    #[case(PatternMode::Exact, "hello", "hello world", false)]
    #[case(PatternMode::Exact, "hello", "HELLO", true)]
    #[case(PatternMode::Start, "!ticket", "!ticket open", true)]
    #[case(PatternMode::Start, "!ticket", "open !ticket", false)]
    #[case(PatternMode::End, "thanks", "many thanks", true)]
    #[case(PatternMode::End, "thanks", "thanks a lot", false)]
    #[case(PatternMode::Contain, "help", "can you help me", true)]
    #[case(PatternMode::Contain, "a.b", "axb", false)]
    #[case(PatternMode::Contain, "(x)", "see (x) here", true)]
    #[case(PatternMode::Contain, "1-2", "score 1-2", true)]
    #[case(PatternMode::Regex, r"^\d{3}$", "123", true)]
    #[case(PatternMode::Regex, r"^\d{3}$", "1234", false)]
    #[case(PatternMode::Every, "", "anything", true)]
    #[case(PatternMode::Every, "", "", false)]
    fn matches_content(
        #[case] mode: PatternMode,
        #[case] value: &str,
        #[case] content: &str,
        #[case] expected: bool,
    ) {
        let pattern = Pattern::compile(mode, value, false).unwrap();
        assert_eq!(pattern.is_match(content, false), expected);
    }

    #[test]
    fn case_sensitive_exact() {
        let pattern = Pattern::compile(PatternMode::Exact, "Hello", true).unwrap();
        assert!(pattern.is_match("Hello", false));
        assert!(!pattern.is_match("hello", false));
    }

    #[test]
    fn bot_mention_ignores_content() {
        let pattern = Pattern::compile(PatternMode::BotMention, "ignored", false).unwrap();
        assert!(pattern.is_match("", true));
        assert!(!pattern.is_match("ignored", false));
    }

    #[test]
    fn invalid_regex_is_an_error() {
        assert!(Pattern::compile(PatternMode::Regex, "([", false).is_err());
    }
}
