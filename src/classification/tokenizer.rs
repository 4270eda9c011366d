//! Token stream fed to the classifier.
//!
//! Header field names, subject words and body words. Words are lowercased
//! and stripped of surrounding punctuation; short words are dropped and long
//! ones collapse into a `skip:` token carrying their first character and
//! length bucket.

use super::message::MailMessage;

const MIN_WORD: usize = 3;
const MAX_WORD: usize = 12;

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
}

fn push_word(tokens: &mut Vec<String>, prefix: &str, word: String) {
    let length = word.chars().count();
    if length < MIN_WORD {
        return;
    }
    if length > MAX_WORD {
        let first = word.chars().next().unwrap_or('?');
        tokens.push(format!("{}skip:{} {}", prefix, first, length / 10 * 10));
    } else {
        tokens.push(format!("{}{}", prefix, word));
    }
}

pub fn tokenize(message: &MailMessage) -> Vec<String> {
    let mut tokens = Vec::new();

    for field in message.headers() {
        tokens.push(format!("header:{}:1", field.name.to_ascii_lowercase()));
    }

    if let Some(subject) = message.get("subject") {
        for word in words(&String::from_utf8_lossy(subject)) {
            push_word(&mut tokens, "subject:", word);
        }
    }

    for word in words(&String::from_utf8_lossy(message.body())) {
        push_word(&mut tokens, "", word);
    }

    tokens
}
