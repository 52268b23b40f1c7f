// turing-core/src/corpus/normalize.rs
use once_cell::sync::Lazy;
use regex::Regex;

/// Characters dropped before a line is learned.
const STRIPPED: &[char] = &['(', ')', '[', ']', '{', '}', '\'', '"', ':', ';', '<', '>', '*'];

static MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@[A-Za-z0-9_]+").expect("mention pattern is valid"));

/// Canonical form of a chat line: punctuation stripped, `@mentions` removed,
/// whitespace collapsed to single spaces, trimmed. Idempotent.
pub fn normalize(text: &str) -> String {
    let stripped: String = text.chars().filter(|c| !STRIPPED.contains(c)).collect();
    let unmentioned = MENTION.replace_all(&stripped, " ");
    unmentioned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Words in an already normalized line.
pub fn word_count(normalized: &str) -> usize {
    normalized.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_mentions_and_punctuation() {
        assert_eq!(normalize("hello @bob world"), "hello world");
        assert_eq!(normalize("  (wow)  \"this\"   is <great>  "), "wow this is great");
        assert_eq!(normalize("@a @b_c"), "");
        assert_eq!(normalize("mail me at x@host"), "mail me at x");
    }

    #[test]
    fn idempotent() {
        for raw in [
            "hello @bob world",
            "  **bold** and {braces} ",
            "a@b@c d",
            "tabs\tand\nnewlines",
            "",
            "Kappa Kappa 123",
        ] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "input {raw:?}");
        }
    }

    #[test]
    fn idempotent_on_generated_lines() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        const ALPHABET: &[char] = &[
            'a', 'Z', '0', '_', '@', '@', ' ', ' ', '\t', '\n', '(', ')', '[', ']', '{', '}', '\'',
            '"', ':', ';', '<', '>', '*', '.', ',', '!', '-', 'é', '\u{3000}',
        ];
        let mut rng = StdRng::seed_from_u64(0x7e57);
        for _ in 0..2_000 {
            let len = rng.gen_range(0..32);
            let raw: String = (0..len)
                .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())])
                .collect();
            let once = normalize(&raw);
            assert_eq!(normalize(&once), once, "input {raw:?}");
            assert!(!MENTION.is_match(&once), "mention survived in {once:?}");
        }
    }

    #[test]
    fn counts_words() {
        assert_eq!(word_count("a b  c"), 3);
        assert_eq!(word_count(""), 0);
    }
}
