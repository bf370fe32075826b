//! Random tokens for access keys and course codes

use rand::Rng;

/// Alphabet for access keys
pub const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Alphabet for course codes (36 symbols, 36^4 combinations per group)
pub const UPPER_ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Source of random tokens. Implementations must be safe to call concurrently.
pub trait TokenSource: Send + Sync {
    fn token(&self, alphabet: &[u8], length: usize) -> String;
}

/// Uniform tokens from the thread-local RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodeGenerator;

impl RandomCodeGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl TokenSource for RandomCodeGenerator {
    fn token(&self, alphabet: &[u8], length: usize) -> String {
        let mut rng = rand::thread_rng();
        (0..length)
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
            .collect()
    }
}

/// `groups` tokens of `group_length`, upper-cased and joined with `-`
pub fn composite_code(source: &dyn TokenSource, groups: usize, group_length: usize) -> String {
    (0..groups)
        .map(|_| source.token(UPPER_ALPHANUMERIC, group_length).to_uppercase())
        .collect::<Vec<_>>()
        .join("-")
}

/// Whether `code` looks like `XXXX-XXXX-XXXX` for the given layout
pub fn is_course_code(code: &str, groups: usize, group_length: usize) -> bool {
    let parts: Vec<&str> = code.split('-').collect();
    parts.len() == groups
        && parts.iter().all(|part| {
            part.len() == group_length
                && part
                    .bytes()
                    .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::TokenSource;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays scripted tokens, then falls back to random ones
    #[derive(Default)]
    pub struct ScriptedTokens {
        script: Mutex<VecDeque<String>>,
    }

    impl ScriptedTokens {
        pub fn new<I, S>(tokens: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                script: Mutex::new(tokens.into_iter().map(Into::into).collect()),
            }
        }

        pub fn push(&self, token: impl Into<String>) {
            self.script.lock().push_back(token.into());
        }
    }

    impl TokenSource for ScriptedTokens {
        fn token(&self, alphabet: &[u8], length: usize) -> String {
            match self.script.lock().pop_front() {
                Some(token) => token,
                None => super::RandomCodeGenerator.token(alphabet, length),
            }
        }
    }

    /// Always returns the same token
    pub struct ConstantToken(pub &'static str);

    impl TokenSource for ConstantToken {
        fn token(&self, _alphabet: &[u8], _length: usize) -> String {
            self.0.to_string()
        }
    }
}
