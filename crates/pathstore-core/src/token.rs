//! Random token generation for cache records.

use rand::Rng;

/// Default token length, in characters.
pub const TOKEN_LEN: usize = 16;

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuv";

/// A random string of [`TOKEN_LEN`] base-32 characters.
pub fn random_string() -> String {
    random_string_of(TOKEN_LEN)
}

pub fn random_string_of(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_has_expected_shape() {
        let token = random_string();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.bytes().all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn tokens_differ() {
        assert_ne!(random_string(), random_string());
    }

    #[test]
    fn custom_length() {
        assert_eq!(random_string_of(4).len(), 4);
        assert!(random_string_of(0).is_empty());
    }
}
