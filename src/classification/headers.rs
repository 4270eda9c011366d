use super::classifier::{ClassificationResult, Disposition};
use super::message::MailMessage;
use crate::configuration::config::HeaderOptions;

/// Physical line length the folded headers aim for.
const FOLD_WIDTH: usize = 78;

pub fn disposition_label(disposition: Disposition, options: &HeaderOptions) -> &str {
    match disposition {
        Disposition::Ham => &options.header_ham_string,
        Disposition::Spam => &options.header_spam_string,
        Disposition::Unsure => &options.header_unsure_string,
    }
}

/// Joins `items` with `; `, starting a tab-indented continuation line
/// whenever the current one would grow past [`FOLD_WIDTH`].
pub fn fold_items(header_name: &str, items: &[String]) -> String {
    let mut out = String::new();
    let mut column = header_name.len() + 2;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(';');
            column += 1;
            if column + 1 + item.len() > FOLD_WIDTH {
                out.push_str("\r\n\t");
                column = 1;
            } else {
                out.push(' ');
                column += 1;
            }
        }
        out.push_str(item);
        column += item.len();
    }
    out
}

/// Drops classification headers a message already carries, so a sender
/// cannot pre-label its own mail.
pub fn remove_classification_headers(message: &mut MailMessage, options: &HeaderOptions) {
    message.remove(&options.classification_header_name);
    message.remove(&options.evidence_header_name);
    message.remove(&options.mailid_header_name);
}

pub fn add_classification_headers(
    message: &mut MailMessage,
    result: &ClassificationResult,
    disposition: Disposition,
    message_id: &str,
    options: &HeaderOptions,
) {
    let mut value = disposition_label(disposition, options).to_string();
    if options.include_score {
        value.push_str(&format!("; {:.2}", result.probability));
    }
    message.push(&options.classification_header_name, value);

    if options.include_evidence {
        let clues: Vec<String> = result
            .evidence
            .iter()
            .map(|(token, weight)| format!("'{}': {:.2}", token, weight))
            .collect();
        message.push(
            &options.evidence_header_name,
            fold_items(&options.evidence_header_name, &clues),
        );
    }

    if options.add_unique_id {
        message.push(&options.mailid_header_name, message_id);
    }
}
