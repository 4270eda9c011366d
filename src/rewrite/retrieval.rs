//! RETR and TOP: classify the retrieved message and tag its headers.
//!
//! The body reaching the client is always the body the server sent; only the
//! header block is rebuilt. When classification fails, the original headers
//! are kept and an `X-Spambayes-Exception` header describing the failure is
//! appended instead. Caching happens in the background and never affects the
//! response.

use std::error::Error;

use log::{debug, info, warn};

use crate::classification::classifier::Disposition;
use crate::classification::headers::{
    add_classification_headers, disposition_label, remove_classification_headers,
};
use crate::classification::message::{split_headers, MailMessage};
use crate::classification::tokenizer::tokenize;
use crate::controller::state::ProxyState;
use crate::error_handling::types::RewriteError;
use crate::pop3::{Pop3Command, Verb};
use crate::storage::corpus;

pub const EXCEPTION_HEADER: &str = "X-Spambayes-Exception";

/// `TOP n 99999999` is how some clients fetch a whole message without RETR.
const FETCH_ALL_LINES: &str = "99999999";

/// Whether this retrieval counts as the user actually receiving the mail:
/// statistics and caching only happen for those.
pub fn is_full_retrieval(command: &Pop3Command) -> bool {
    match command.verb {
        Verb::Retr => true,
        Verb::Top => command.args.len() == 2 && command.args[1] == FETCH_ALL_LINES,
        _ => false,
    }
}

pub fn rewrite_retrieval(state: &ProxyState, command: &Pop3Command, response: &[u8]) -> Vec<u8> {
    if split_headers(response).is_none() {
        // Must be an error response.
        return response.to_vec();
    }

    let terminated = response.ends_with(b"\n.\r\n");
    let response = if terminated {
        &response[..response.len() - 3]
    } else {
        response
    };

    // The separator search succeeded, so there is at least one newline.
    let Some(newline) = response.iter().position(|&b| b == b'\n') else {
        return response.to_vec();
    };
    let (status, message_text) = (&response[..newline], &response[newline + 1..]);

    let message_text = match annotate(state, command, message_text) {
        Ok(rewritten) => rewritten,
        Err(e) => {
            warn!("{} could not be classified, passing it on annotated: {}", command, e);
            with_exception_header(message_text, &e)
        }
    };

    let mut out = Vec::with_capacity(status.len() + message_text.len() + 4);
    out.extend_from_slice(status);
    out.push(b'\n');
    out.extend_from_slice(&message_text);
    if terminated {
        out.extend_from_slice(b".\r\n");
    }
    out
}

fn annotate(state: &ProxyState, command: &Pop3Command, text: &[u8]) -> Result<Vec<u8>, RewriteError> {
    let options = &state.config.headers;

    let mut message = MailMessage::parse(text);
    remove_classification_headers(&mut message, options);
    let message_id = state.registry.next_message_name();

    let tokens = tokenize(&message);
    let result = state.classifier.classify(&tokens)?;
    let disposition = Disposition::from_probability(result.probability, &state.config.categorization);
    add_classification_headers(&mut message, &result, disposition, &message_id, options);
    debug!(
        "Message {} scored {:.4} from {} token(s)",
        message_id,
        result.probability,
        tokens.len()
    );

    if is_full_retrieval(command) {
        state.registry.record_disposition(disposition);
        info!(
            "{} message {} classified as {}",
            command.name,
            message_id,
            disposition_label(disposition, options)
        );
        if should_cache(state, &message, disposition, text.len()) {
            if let Some(corpora) = state.corpora() {
                corpus::store(corpora.unknown.clone(), message_id.clone(), message.to_bytes());
            }
        }
    }

    // Headers from the parsed message, body straight from the server.
    let body = split_headers(text).map(|(_, body)| body).unwrap_or(&[][..]);
    let mut out = message.header_block();
    out.extend_from_slice(b"\r\n\r\n");
    out.extend_from_slice(body);
    Ok(out)
}

fn should_cache(state: &ProxyState, message: &MailMessage, disposition: Disposition, size: usize) -> bool {
    let storage = &state.config.storage;
    if state.config.globals.self_test || !storage.cache_messages {
        return false;
    }

    let bulk_ham = storage.no_cache_bulk_ham
        && disposition == Disposition::Ham
        && message.get("precedence").is_some_and(|p| {
            let p = String::from_utf8_lossy(p);
            let p = p.trim();
            p.eq_ignore_ascii_case("bulk") || p.eq_ignore_ascii_case("list")
        });
    if bulk_ham {
        debug!("Not caching bulk ham");
        return false;
    }

    let limit = storage.no_cache_large_messages;
    if limit > 0 && size > limit {
        debug!("Not caching a {} byte message (limit {})", size, limit);
        return false;
    }
    true
}

/// The error and its causes, one per line.
fn describe(error: &RewriteError) -> String {
    let mut details = format!("RewriteError: {}", error);
    let mut source = error.source();
    while let Some(cause) = source {
        details.push_str(&format!("\ncaused by: {}", cause));
        source = cause.source();
    }
    details
}

/// Appends the failure report as a header, leaving the original headers and
/// body bytes as they were. Detail lines are folded with a leading dot so
/// indentation survives unfolding.
fn with_exception_header(text: &[u8], error: &RewriteError) -> Vec<u8> {
    let Some((headers, body)) = split_headers(text) else {
        return text.to_vec();
    };
    let details = describe(error);
    let folded = details
        .trim()
        .split('\n')
        .map(|l| l.trim_end_matches('\r'))
        .collect::<Vec<_>>()
        .join("\r\n .");

    let mut out = Vec::with_capacity(text.len() + folded.len() + 32);
    out.extend_from_slice(headers);
    out.extend_from_slice(format!("\n{}: {}\r\n\r\n", EXCEPTION_HEADER, folded).as_bytes());
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::{ClassificationResult, Classifier};
    use crate::configuration::config::Config;
    use crate::controller::state::test_support::MemoryCorpora;
    use crate::error_handling::types::ClassifyError;
    use std::sync::Arc;

    struct FixedClassifier(f64);

    impl Classifier for FixedClassifier {
        fn classify(&self, _tokens: &[String]) -> Result<ClassificationResult, ClassifyError> {
            Ok(ClassificationResult {
                probability: self.0,
                evidence: vec![("subject:offer".into(), self.0)],
            })
        }
    }

    struct BrokenClassifier;

    impl Classifier for BrokenClassifier {
        fn classify(&self, _tokens: &[String]) -> Result<ClassificationResult, ClassifyError> {
            Err(ClassifyError::Engine("database is locked\nretry later".into()))
        }
    }

    fn state_with(classifier: Arc<dyn Classifier>, memory: &MemoryCorpora, config: Config) -> ProxyState {
        ProxyState::init(config)
            .with_classifier(classifier)
            .with_corpora(memory.corpora())
    }

    fn cmd(line: &str) -> Pop3Command {
        Pop3Command::parse(line.as_bytes()).unwrap()
    }

    const RETR_RESPONSE: &[u8] =
        b"+OK 63 octets\r\nSubject: offer\r\nFrom: a@example.com\r\n\r\nBuy\r\n..stuffed\r\n.\r\n";

    fn text(bytes: &[u8]) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn text_lossy(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    #[test]
    fn injects_headers_and_keeps_body_and_terminator() {
        let memory = MemoryCorpora::new();
        let state = state_with(Arc::new(FixedClassifier(0.99)), &memory, Config::default());

        let out = text(&rewrite_retrieval(&state, &cmd("RETR 1"), RETR_RESPONSE));
        assert!(out.starts_with("+OK 63 octets\r\nSubject: offer\r\nFrom: a@example.com\r\n"));
        assert!(out.contains("\r\nX-Spambayes-Classification: spam\r\n"));
        assert!(out.contains("\r\nX-Spambayes-MailId: "));
        assert!(out.ends_with("\r\n\r\nBuy\r\n..stuffed\r\n.\r\n"));

        assert_eq!(state.registry.snapshot().num_spams, 1);
        let cached = memory.unknown.wait_for_messages(1);
        assert_eq!(cached.len(), 1);
        assert!(text(&cached[0].1).contains("X-Spambayes-Classification: spam"));
    }

    #[test]
    fn partial_top_is_tagged_but_not_counted_or_cached() {
        let memory = MemoryCorpora::new();
        let state = state_with(Arc::new(FixedClassifier(0.01)), &memory, Config::default());

        let out = text(&rewrite_retrieval(&state, &cmd("TOP 1 0"), b"+OK\r\nSubject: hi\r\n\r\n.\r\n"));
        assert_eq!(
            out.split("\r\n").take(3).collect::<Vec<_>>(),
            vec!["+OK", "Subject: hi", "X-Spambayes-Classification: ham"]
        );
        assert!(out.ends_with("\r\n\r\n.\r\n"));
        assert_eq!(state.registry.snapshot().num_hams, 0);
        assert!(memory.unknown.messages.lock().unwrap().is_empty());
    }

    #[test]
    fn top_with_fetch_all_argument_counts_like_retr() {
        assert!(is_full_retrieval(&cmd("TOP 3 99999999")));
        assert!(!is_full_retrieval(&cmd("TOP 3 100")));
        assert!(!is_full_retrieval(&cmd("TOP 3")));

        let memory = MemoryCorpora::new();
        let state = state_with(Arc::new(FixedClassifier(0.5)), &memory, Config::default());
        rewrite_retrieval(&state, &cmd("TOP 3 99999999"), RETR_RESPONSE);
        assert_eq!(state.registry.snapshot().num_unsure, 1);
        assert_eq!(memory.unknown.wait_for_messages(1).len(), 1);
    }

    #[test]
    fn classifier_failure_appends_exception_header() {
        let memory = MemoryCorpora::new();
        let state = state_with(Arc::new(BrokenClassifier), &memory, Config::default());

        let out = rewrite_retrieval(&state, &cmd("RETR 1"), RETR_RESPONSE);
        assert_eq!(
            text(&out),
            "+OK 63 octets\r\nSubject: offer\r\nFrom: a@example.com\r\n\
             X-Spambayes-Exception: RewriteError: Classification error: Classifier failure: database is locked\r\n \
             .retry later\r\n \
             .caused by: Classifier failure: database is locked\r\n \
             .retry later\r\n\
             \r\n\
             Buy\r\n..stuffed\r\n.\r\n"
        );
        assert_eq!(state.registry.snapshot().num_unsure, 0);
        assert!(memory.unknown.messages.lock().unwrap().is_empty());
    }

    #[test]
    fn lines_that_are_not_fields_are_kept_and_classified() {
        let memory = MemoryCorpora::new();
        let state = state_with(Arc::new(FixedClassifier(0.5)), &memory, Config::default());
        let response = b"+OK\r\nSubject: x\r\nnot a header\r\n\r\nbody\xff\r\n.\r\n";

        let out = rewrite_retrieval(&state, &cmd("RETR 2"), response);
        assert!(out.starts_with(
            b"+OK\r\nSubject: x\r\nnot a header\r\nX-Spambayes-Classification: unsure\r\n"
        ));
        assert!(out.ends_with(b"\r\n\r\nbody\xff\r\n.\r\n"));
        assert!(!text_lossy(&out).contains(EXCEPTION_HEADER));
        assert_eq!(state.registry.snapshot().num_unsure, 1);
    }

    #[test]
    fn unix_from_line_is_passed_through() {
        let memory = MemoryCorpora::new();
        let state = state_with(Arc::new(FixedClassifier(0.5)), &memory, Config::default());
        let response =
            b"+OK\r\nFrom alice@example.com Tue Oct 14 10:00:00 2026\r\nSubject: hi\r\n\r\nbody\r\n.\r\n";

        let out = text(&rewrite_retrieval(&state, &cmd("RETR 1"), response));
        assert!(out.starts_with(
            "+OK\r\nFrom alice@example.com Tue Oct 14 10:00:00 2026\r\nSubject: hi\r\n\
             X-Spambayes-Classification: unsure\r\n"
        ));
        assert!(!out.contains(EXCEPTION_HEADER));
        assert!(out.ends_with("\r\n\r\nbody\r\n.\r\n"));
        assert_eq!(state.registry.snapshot().num_unsure, 1);
    }

    #[test]
    fn space_before_colon_does_not_block_classification() {
        let memory = MemoryCorpora::new();
        let state = state_with(Arc::new(FixedClassifier(0.5)), &memory, Config::default());

        let out = text(&rewrite_retrieval(
            &state,
            &cmd("RETR 1"),
            b"+OK\r\nSubject : hi\r\n\r\nbody\r\n.\r\n",
        ));
        assert!(out.starts_with("+OK\r\nSubject : hi\r\nX-Spambayes-Classification: unsure\r\n"));
        assert!(!out.contains(EXCEPTION_HEADER));
        assert_eq!(state.registry.snapshot().num_unsure, 1);
    }

    #[test]
    fn lf_only_mail_is_handled() {
        let memory = MemoryCorpora::new();
        let state = state_with(Arc::new(FixedClassifier(0.5)), &memory, Config::default());
        let out = text(&rewrite_retrieval(&state, &cmd("RETR 1"), b"+OK\nSubject: a\n\nbody\n.\r\n"));
        assert!(out.starts_with("+OK\nSubject: a\r\nX-Spambayes-Classification: unsure\r\n"));
        assert!(out.ends_with("\r\n\r\nbody\n.\r\n"));
    }

    #[test]
    fn responses_without_a_header_break_are_untouched() {
        let memory = MemoryCorpora::new();
        let state = state_with(Arc::new(FixedClassifier(0.99)), &memory, Config::default());
        for response in [&b"-ERR no such message\r\n"[..], &b"+OK\r\nSubject: cut off\r\n"[..]] {
            assert_eq!(rewrite_retrieval(&state, &cmd("RETR 9"), response), response);
        }
        assert_eq!(state.registry.snapshot().num_spams, 0);
    }

    #[test]
    fn caching_rules() {
        let bulk = b"+OK\r\nSubject: news\r\nPrecedence: Bulk\r\n\r\nhello\r\n.\r\n";

        let mut config = Config::default();
        config.storage.no_cache_bulk_ham = true;
        let memory = MemoryCorpora::new();
        let state = state_with(Arc::new(FixedClassifier(0.01)), &memory, config.clone());
        rewrite_retrieval(&state, &cmd("RETR 1"), bulk);
        assert!(memory.unknown.messages.lock().unwrap().is_empty());
        assert_eq!(state.registry.snapshot().num_hams, 1);

        // Bulk spam is still cached.
        let memory = MemoryCorpora::new();
        let state = state_with(Arc::new(FixedClassifier(0.99)), &memory, config);
        rewrite_retrieval(&state, &cmd("RETR 1"), bulk);
        assert_eq!(memory.unknown.wait_for_messages(1).len(), 1);

        let mut config = Config::default();
        config.storage.no_cache_large_messages = 10;
        let memory = MemoryCorpora::new();
        let state = state_with(Arc::new(FixedClassifier(0.5)), &memory, config);
        rewrite_retrieval(&state, &cmd("RETR 1"), RETR_RESPONSE);
        assert!(memory.unknown.messages.lock().unwrap().is_empty());

        let mut config = Config::default();
        config.storage.cache_messages = false;
        let memory = MemoryCorpora::new();
        let state = state_with(Arc::new(FixedClassifier(0.5)), &memory, config);
        rewrite_retrieval(&state, &cmd("RETR 1"), RETR_RESPONSE);
        assert!(memory.unknown.messages.lock().unwrap().is_empty());

        let mut config = Config::default();
        config.globals.self_test = true;
        let memory = MemoryCorpora::new();
        let state = state_with(Arc::new(FixedClassifier(0.5)), &memory, config);
        rewrite_retrieval(&state, &cmd("RETR 1"), RETR_RESPONSE);
        assert!(memory.unknown.messages.lock().unwrap().is_empty());
        assert_eq!(state.registry.snapshot().num_unsure, 1);
    }

    #[test]
    fn forged_classification_is_replaced() {
        let memory = MemoryCorpora::new();
        let state = state_with(Arc::new(FixedClassifier(0.99)), &memory, Config::default());
        let out = text(&rewrite_retrieval(
            &state,
            &cmd("RETR 1"),
            b"+OK\r\nX-Spambayes-Classification: ham\r\nSubject: hi\r\n\r\nx\r\n.\r\n",
        ));
        assert!(!out.contains("Classification: ham"));
        assert_eq!(out.matches("X-Spambayes-Classification:").count(), 1);
    }
}
