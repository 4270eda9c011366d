use std::sync::Arc;

use log::debug;

use super::{retrieval, sizes};
use crate::controller::state::ProxyState;
use crate::pop3::{Pop3Command, Verb};
use crate::storage::corpus;

/// Turns a complete server response into what the client gets to see.
///
/// Dispatch is on the command verb; verbs without a handler get the
/// response back byte for byte. Rewriting never fails: handlers degrade to
/// passing the response through.
#[derive(Clone)]
pub struct RewritePolicy {
    state: Arc<ProxyState>,
}

impl RewritePolicy {
    pub fn new(state: Arc<ProxyState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<ProxyState> {
        &self.state
    }

    pub fn rewrite(&self, command: &Pop3Command, response: &[u8]) -> Vec<u8> {
        match command.verb {
            Verb::Stat => sizes::rewrite_stat(response),
            Verb::List => sizes::rewrite_list(response),
            Verb::Retr | Verb::Top => retrieval::rewrite_retrieval(&self.state, command, response),
            Verb::User => {
                self.expire_caches();
                response.to_vec()
            }
            _ => response.to_vec(),
        }
    }

    /// Fire-and-forget expiry of the three caches, off the I/O loop.
    fn expire_caches(&self) {
        let Some(corpora) = self.state.corpora() else {
            return;
        };
        debug!("Starting background cache expiry");
        for c in corpora.all() {
            corpus::in_background(move || corpus::sweep(c.as_ref()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::config::Config;
    use crate::controller::state::test_support::MemoryCorpora;
    use std::time::Duration;

    fn policy() -> (RewritePolicy, MemoryCorpora) {
        let memory = MemoryCorpora::new();
        let state = ProxyState::init(Config::default()).with_corpora(memory.corpora());
        (RewritePolicy::new(Arc::new(state)), memory)
    }

    fn cmd(line: &str) -> Pop3Command {
        Pop3Command::parse(line.as_bytes()).unwrap()
    }

    #[test]
    fn unknown_commands_are_relayed_byte_identical() {
        let (policy, _) = policy();
        let response = b"+OK weird\r\n\xfe\xff binary\r\n.\r\n";
        for line in ["UIDL", "NOOP", "XTND XMIT", "DELE 1", "CAPA", "QUIT"] {
            assert_eq!(policy.rewrite(&cmd(line), response), response.to_vec(), "{}", line);
        }
    }

    #[test]
    fn dispatches_size_rewrites() {
        let (policy, _) = policy();
        assert_eq!(policy.rewrite(&cmd("STAT"), b"+OK 1 100\r\n"), b"+OK 1 612\r\n");
        assert_eq!(
            policy.rewrite(&cmd("LIST"), b"+OK 2 messages\r\n1 200\r\n2 300\r\n.\r\n"),
            b"+OK 2 messages\r\n1 712\r\n2 812\r\n.\r\n"
        );
    }

    #[test]
    fn retrieval_goes_through_the_classifier() {
        let (policy, _) = policy();
        let out = policy.rewrite(&cmd("RETR 1"), b"+OK\r\nSubject: a\r\n\r\nb\r\n.\r\n");
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("X-Spambayes-Classification: unsure\r\n"));
        assert_eq!(policy.state().registry.snapshot().num_unsure, 1);
    }

    #[test]
    fn user_passes_through_and_sweeps_without_a_runtime() {
        let (policy, memory) = policy();
        assert_eq!(policy.rewrite(&cmd("USER bob"), b"+OK\r\n"), b"+OK\r\n");
        for _ in 0..100 {
            let done = [&memory.spam, &memory.ham, &memory.unknown]
                .iter()
                .all(|c| *c.sweeps.lock().unwrap() == 1);
            if done {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("expiry sweeps did not run");
    }

    #[tokio::test]
    async fn user_sweeps_on_the_blocking_pool() {
        let (policy, memory) = policy();
        assert_eq!(policy.rewrite(&cmd("user bob"), b"+OK bob\r\n"), b"+OK bob\r\n");
        for _ in 0..100 {
            let done = [&memory.spam, &memory.ham, &memory.unknown]
                .iter()
                .all(|c| *c.sweeps.lock().unwrap() == 1);
            if done {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expiry sweeps did not run");
    }
}
