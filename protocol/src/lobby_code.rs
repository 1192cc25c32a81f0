//! Human-shareable 6-character lobby identifiers.
//!
//! The alphabet drops visually ambiguous characters (`I O 0 1`) so a code
//! read aloud or typed from memory is unlikely to be mistyped.

use rand::Rng;
use rand::seq::IndexedRandom;

/// 32-symbol alphabet: uppercase letters and digits, excluding `I O 0 1`.
pub const ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Codes are always exactly this many characters.
pub const CODE_LENGTH: usize = 6;

/// Generates a fresh random lobby code. Not guaranteed unique; the caller
/// (the lobby session manager) must retry on collision against its own
/// active-lobby set.
pub fn generate(rng: &mut impl Rng) -> String {
    let alphabet: Vec<char> = ALPHABET.chars().collect();
    (0..CODE_LENGTH)
        .map(|_| *alphabet.choose(rng).expect("alphabet is non-empty"))
        .collect()
}

/// Uppercases and trims a candidate code. Does not validate shape.
pub fn normalize(input: &str) -> String {
    input.trim().to_ascii_uppercase()
}

/// True if `candidate` is exactly [`CODE_LENGTH`] characters, all drawn from
/// [`ALPHABET`] (case-insensitive).
pub fn is_valid(candidate: &str) -> bool {
    candidate.len() == CODE_LENGTH
        && candidate
            .chars()
            .all(|c| ALPHABET.contains(c.to_ascii_uppercase()))
}

/// Builds a shareable URL carrying `code` as a query parameter.
pub fn build_url(base: &str, code: &str) -> String {
    format!("{base}?code={code}")
}

/// Recovers a lobby code from free-form text (a URL, a pasted message, or a
/// bare code), trying progressively looser strategies:
///
/// 1. A `?code=<CODE>` query parameter.
/// 2. The last path segment, if it already looks like a code.
/// 3. The last 6 alphanumeric characters of the normalized input.
///
/// Returns `None` when nothing in the input resembles a valid code.
pub fn extract_code(input: &str) -> Option<String> {
    if let Some(from_query) = extract_query_param(input) {
        let normalized = normalize(&from_query);
        if is_valid(&normalized) {
            return Some(normalized);
        }
    }

    if let Some(last_segment) = input.rsplit('/').next() {
        let normalized = normalize(last_segment);
        if is_valid(&normalized) {
            return Some(normalized);
        }
    }

    let alnum: String = normalize(input)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if alnum.len() >= CODE_LENGTH {
        let tail = &alnum[alnum.len() - CODE_LENGTH..];
        if is_valid(tail) {
            return Some(tail.to_string());
        }
    }

    None
}

fn extract_query_param(input: &str) -> Option<String> {
    let query_start = input.find('?')?;
    let query = &input[query_start + 1..];
    for pair in query.split(['&', ' ']) {
        if let Some(value) = pair.strip_prefix("code=") {
            return Some(value.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn generate_is_six_chars_from_alphabet() {
        let mut rng = StdRng::seed_from_u64(42);
        let code = generate(&mut rng);
        assert_eq!(code.len(), CODE_LENGTH);
        assert!(code.chars().all(|c| ALPHABET.contains(c)));
    }

    #[test]
    fn normalize_is_idempotent() {
        let raw = "  a1b2c3  ";
        let once = normalize(raw);
        let twice = normalize(&once);
        assert_eq!(once, twice);
        assert_eq!(once, "A1B2C3");
    }

    #[test]
    fn extract_code_from_query_param() {
        assert_eq!(
            extract_code("https://host/arcade/?code=abcd23"),
            Some("ABCD23".to_string())
        );
    }

    #[test]
    fn extract_code_from_loose_text() {
        assert_eq!(
            extract_code("join this: abcd23!"),
            Some("ABCD23".to_string())
        );
    }

    #[test]
    fn extract_code_rejects_garbage() {
        assert_eq!(extract_code("??"), None);
    }

    #[test]
    fn extract_code_from_path_segment() {
        assert_eq!(
            extract_code("https://host/join/abcd23"),
            Some("ABCD23".to_string())
        );
    }

    #[test]
    fn round_trip_through_build_url() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let code = generate(&mut rng);
            let url = build_url("https://host/arcade/", &code);
            assert_eq!(extract_code(&url), Some(code));
        }
    }

    #[test]
    fn rejects_ambiguous_characters() {
        assert!(!is_valid("IIIIII"));
        assert!(!is_valid("OOOOOO"));
        assert!(!is_valid("000000"));
        assert!(!is_valid("111111"));
    }
}
