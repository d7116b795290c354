//! Cheap pre-filter for chat transports: does a line look like something to log?
//!
//! The extractor is the authority; this only keeps casual chatter from
//! costing an LLM call.

const TRIGGER_PHRASES: &[&str] = &[
    "i had",
    "i ate",
    "i drank",
    "just had",
    "just ate",
    "just drank",
    "i've had",
    "i've eaten",
    "ive had",
    "ive eaten",
    "for breakfast",
    "for lunch",
    "for dinner",
    "for a snack",
    "weighed in",
    "logged",
    "log:",
];

/// True when `text` contains a logging phrase anywhere, ignoring case.
pub fn looks_like_log(text: &str) -> bool {
    // Curly apostrophes from phone keyboards
    let text = text.trim().to_lowercase().replace('\u{2019}', "'");
    TRIGGER_PHRASES.iter().any(|phrase| text.contains(phrase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_phrases() {
        assert!(looks_like_log("I just had 24oz water and an apple"));
        assert!(looks_like_log("logged 2 eggs and coffee"));
        assert!(looks_like_log("Oatmeal FOR BREAKFAST"));
        assert!(looks_like_log("log: 1 banana"));
        assert!(looks_like_log("I\u{2019}ve eaten a bagel"));
    }

    #[test]
    fn test_chatter_is_ignored() {
        assert!(!looks_like_log("good morning!"));
        assert!(!looks_like_log("what should I eat?"));
        assert!(!looks_like_log(""));
    }
}
