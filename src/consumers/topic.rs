//! Binding keys for [topic exchanges](https://www.rabbitmq.com/tutorials/amqp-concepts.html#exchange-topic).
//!
//! A binding key is a list of words separated by dots. Two words have a special meaning:
//!
//! - `*` matches exactly one word;
//! - `#` matches zero or more words.
//!
//! E.g. `log.info.*` matches `log.info.payments` but not `log.info` nor `log.info.payments.eu`,
//! while `log.#` matches all of them.
use std::fmt;
use std::str::FromStr;

/// The broker refuses routing and binding keys longer than this.
const MAX_KEY_LENGTH: usize = 255;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    #[error("Binding keys cannot exceed {MAX_KEY_LENGTH} bytes, got {0} bytes.")]
    TooLong(usize),
    #[error("The word `{word}` in binding key `{key}` mixes a wildcard with other characters.")]
    PartialWildcard { key: String, word: String },
}

/// A validated binding key for a topic exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(try_from = "String")]
pub struct BindingKey(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Word(&'a str),
    /// `*`
    One,
    /// `#`
    Any,
}

impl BindingKey {
    pub fn new(key: impl Into<String>) -> Result<Self, TopicError> {
        let key = key.into();
        if key.len() > MAX_KEY_LENGTH {
            return Err(TopicError::TooLong(key.len()));
        }
        if let Some(word) = key
            .split('.')
            .find(|w| w.len() > 1 && (w.contains('*') || w.contains('#')))
        {
            return Err(TopicError::PartialWildcard {
                word: word.to_owned(),
                key,
            });
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if a message published with `routing_key` would be routed through
    /// this binding.
    ///
    /// Runs in `O(segments × words)`, whatever the number of `#` in the key.
    pub fn matches(&self, routing_key: &str) -> bool {
        let words = split_words(routing_key);
        // reachable[j]: the segments seen so far match the first `j` words.
        let mut reachable = vec![false; words.len() + 1];
        reachable[0] = true;

        for segment in split_words(&self.0).into_iter().map(Segment::from) {
            match segment {
                Segment::Any => {
                    for j in 1..reachable.len() {
                        reachable[j] |= reachable[j - 1];
                    }
                }
                Segment::One | Segment::Word(_) => {
                    for j in (1..reachable.len()).rev() {
                        reachable[j] = reachable[j - 1]
                            && match segment {
                                Segment::Word(expected) => words[j - 1] == expected,
                                _ => true,
                            };
                    }
                    reachable[0] = false;
                }
            }
        }
        reachable[words.len()]
    }
}

/// An empty key has no words at all, not a single empty one.
fn split_words(key: &str) -> Vec<&str> {
    if key.is_empty() {
        Vec::new()
    } else {
        key.split('.').collect()
    }
}

impl<'a> From<&'a str> for Segment<'a> {
    fn from(word: &'a str) -> Self {
        match word {
            "*" => Segment::One,
            "#" => Segment::Any,
            w => Segment::Word(w),
        }
    }
}

impl FromStr for BindingKey {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for BindingKey {
    type Error = TopicError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for BindingKey {
    type Error = TopicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
