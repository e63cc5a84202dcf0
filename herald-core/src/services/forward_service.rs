// herald-core/src/services/forward_service.rs
//
// In-memory index of active forwarders and the inbound-message evaluation
// path. The index is an immutable snapshot behind a reference cell: reload
// builds a fresh map and installs it with one swap, so readers only ever see
// the previous or the new state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use herald_common::models::{ActiveForwarder, DeliveryStatus, MatchType, NewForwarderLog};
use herald_common::traits::repository_traits::ForwarderRepository;

use crate::platforms::discord::InboundMessage;
use crate::platforms::ChatSender;
use crate::Error;

/// Where a forwarder listens: a channel proper, or one specific thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocationKey {
    Channel(String),
    Thread(String),
}

pub type ForwarderIndex = HashMap<LocationKey, Vec<Arc<ActiveForwarder>>>;

const FORWARDED_LOG_LIMIT: usize = 500;

/// Builds the location index from the active rule set. Thread-scoped rules
/// also pin an (initially empty) entry for their parent channel so messages
/// in the channel proper never fall through to thread-only rules.
pub fn build_index(rules: Vec<ActiveForwarder>) -> ForwarderIndex {
    let mut index = ForwarderIndex::new();

    for rule in rules {
        if rule.forwarder.keywords.is_empty() {
            warn!(
                "Forwarder {} has no keywords; skipping at cache load.",
                rule.forwarder.forwarder_id
            );
            continue;
        }
        let rule = Arc::new(rule);
        match rule.forwarder.source_thread_id.clone() {
            Some(thread_id) => {
                index
                    .entry(LocationKey::Thread(thread_id))
                    .or_default()
                    .push(rule.clone());
                index
                    .entry(LocationKey::Channel(rule.source_channel_platform_id.clone()))
                    .or_default();
            }
            None => {
                index
                    .entry(LocationKey::Channel(rule.source_channel_platform_id.clone()))
                    .or_default()
                    .push(rule);
            }
        }
    }

    index
}

/// First keyword (in rule order) that matches `content`, if any.
pub fn first_match(content: &str, keywords: &[String], match_type: MatchType) -> Option<String> {
    match match_type {
        MatchType::Contains => {
            let haystack = content.to_lowercase();
            keywords
                .iter()
                .find(|k| !k.is_empty() && haystack.contains(&k.to_lowercase()))
                .cloned()
        }
        MatchType::Exact => {
            let message_tokens = word_tokens(content);
            keywords
                .iter()
                .find(|k| {
                    let needle = word_tokens(k);
                    !needle.is_empty() && contains_subsequence(&message_tokens, &needle)
                })
                .cloned()
        }
    }
}

/// Lowercases, maps every non-word character to a space, and splits. Word
/// characters are alphanumerics and underscore.
fn word_tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn contains_subsequence(haystack: &[String], needle: &[String]) -> bool {
    needle.len() <= haystack.len() && haystack.windows(needle.len()).any(|w| w == needle)
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

pub struct ForwardService {
    forwarders: Arc<dyn ForwarderRepository>,
    sender: Arc<dyn ChatSender>,
    index: RwLock<Arc<ForwarderIndex>>,
}

impl ForwardService {
    pub fn new(forwarders: Arc<dyn ForwarderRepository>, sender: Arc<dyn ChatSender>) -> Self {
        Self {
            forwarders,
            sender,
            index: RwLock::new(Arc::new(ForwarderIndex::new())),
        }
    }

    /// Rebuilds the index from the repository and swaps it in atomically.
    /// Safe to call at any time; in-flight evaluations keep their snapshot.
    pub async fn load(&self) -> Result<(), Error> {
        let rules = self.forwarders.list_active().await?;
        let index = build_index(rules);
        let placements: usize = index.values().map(Vec::len).sum();
        let locations = index.len();
        *self.index.write().await = Arc::new(index);
        info!(
            "Forwarder cache loaded: {} rule placement(s) across {} location(s).",
            placements, locations
        );
        Ok(())
    }

    /// Evaluates one inbound message against the current snapshot. Never
    /// returns an error; every failure is logged and the event loop moves on.
    pub async fn handle_message(&self, msg: &InboundMessage) {
        if msg.author_is_bot {
            debug!("Ignoring bot message in {}", msg.channel_id);
            return;
        }
        if msg.guild_id.is_none() {
            return;
        }

        let snapshot = self.index.read().await.clone();

        let mut candidates: Vec<Arc<ActiveForwarder>> = Vec::new();
        if msg.is_thread {
            if let Some(rules) = snapshot.get(&LocationKey::Thread(msg.channel_id.clone())) {
                candidates.extend(rules.iter().cloned());
            }
            if let Some(parent) = &msg.parent_channel_id {
                if let Some(rules) = snapshot.get(&LocationKey::Channel(parent.clone())) {
                    candidates.extend(rules.iter().cloned());
                }
            }
        } else if let Some(rules) = snapshot.get(&LocationKey::Channel(msg.channel_id.clone())) {
            candidates.extend(rules.iter().cloned());
        }

        for rule in candidates {
            let matched = first_match(
                &msg.content,
                &rule.forwarder.keywords,
                rule.forwarder.match_type,
            );
            if let Some(keyword) = matched {
                self.forward(&rule, msg, &keyword).await;
            }
        }
    }

    /// Delivers one matched message to the rule's destination and records the
    /// outcome. A delivery failure only affects this rule.
    async fn forward(&self, rule: &ActiveForwarder, msg: &InboundMessage, keyword: &str) {
        let forwarder = &rule.forwarder;
        let target = forwarder
            .destination_thread_id
            .clone()
            .unwrap_or_else(|| rule.destination_channel_platform_id.clone());

        let body = format!("**Forwarded Message**\n-----\n{}", msg.content);
        let outcome = self.sender.send_message(&target, &body).await;

        let (status, error) = match outcome {
            Ok(()) => {
                debug!(
                    "Forwarder {} ({}) delivered to {}",
                    forwarder.forwarder_id, forwarder.name, target
                );
                (DeliveryStatus::Success, None)
            }
            Err(e) => {
                warn!(
                    "Forwarder {} delivery to {} failed: {}",
                    forwarder.forwarder_id, target, e
                );
                (DeliveryStatus::Failed, Some(e.to_string()))
            }
        };

        let log = NewForwarderLog {
            forwarder_id: forwarder.forwarder_id,
            forwarded_at: Utc::now(),
            original_message: truncate_chars(&msg.content, FORWARDED_LOG_LIMIT),
            matched_keyword: Some(keyword.to_string()),
            status,
            error,
        };
        if let Err(e) = self.forwarders.insert_log(&log).await {
            error!(
                "Failed to record forwarder log for {}: {}",
                forwarder.forwarder_id, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use herald_common::models::Forwarder;

    use crate::platforms::MockChatSender;

    fn rule(
        forwarder_id: i64,
        source_channel: &str,
        source_thread: Option<&str>,
        destination_channel: &str,
        destination_thread: Option<&str>,
        keywords: &[&str],
        match_type: MatchType,
    ) -> ActiveForwarder {
        let now = Utc::now();
        ActiveForwarder {
            forwarder: Forwarder {
                forwarder_id,
                user_id: 1,
                name: format!("rule-{forwarder_id}"),
                source_server_id: 1,
                source_channel_id: 10,
                source_thread_id: source_thread.map(str::to_string),
                destination_server_id: 2,
                destination_channel_id: 20,
                destination_thread_id: destination_thread.map(str::to_string),
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
                match_type,
                is_active: true,
                created_at: now,
                updated_at: now,
            },
            source_channel_platform_id: source_channel.to_string(),
            destination_channel_platform_id: destination_channel.to_string(),
        }
    }

    fn message(channel_id: &str, content: &str) -> InboundMessage {
        InboundMessage {
            guild_id: Some("555".to_string()),
            channel_id: channel_id.to_string(),
            is_thread: false,
            parent_channel_id: None,
            author_name: "alice".to_string(),
            author_is_bot: false,
            content: content.to_string(),
        }
    }

    struct RecordingForwarderRepo {
        rules: Vec<ActiveForwarder>,
        logs: Mutex<Vec<NewForwarderLog>>,
    }

    impl RecordingForwarderRepo {
        fn new(rules: Vec<ActiveForwarder>) -> Self {
            Self {
                rules,
                logs: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ForwarderRepository for RecordingForwarderRepo {
        async fn list_active(&self) -> Result<Vec<ActiveForwarder>, Error> {
            Ok(self.rules.clone())
        }

        async fn insert_log(&self, log: &NewForwarderLog) -> Result<(), Error> {
            self.logs.lock().unwrap().push(log.clone());
            Ok(())
        }
    }

    async fn service_with(
        rules: Vec<ActiveForwarder>,
        sender: MockChatSender,
    ) -> (Arc<RecordingForwarderRepo>, ForwardService) {
        let repo = Arc::new(RecordingForwarderRepo::new(rules));
        let service = ForwardService::new(repo.clone(), Arc::new(sender));
        service.load().await.expect("load should succeed");
        (repo, service)
    }

    #[test]
    fn word_tokens_normalizes_punctuation_and_case() {
        assert_eq!(word_tokens("ALERT! please, read."), vec!["alert", "please", "read"]);
        assert_eq!(word_tokens("  multi   space "), vec!["multi", "space"]);
        assert!(word_tokens("!!!").is_empty());
    }

    #[test]
    fn contains_matching_is_case_insensitive() {
        let keywords = vec!["urgent".to_string()];
        assert_eq!(
            first_match("This is URGENT today.", &keywords, MatchType::Contains),
            Some("urgent".to_string())
        );
        assert_eq!(first_match("nothing here", &keywords, MatchType::Contains), None);
    }

    #[test]
    fn contains_keyword_whitespace_is_significant() {
        let keywords = vec!["release note".to_string()];
        assert!(first_match("new release note out", &keywords, MatchType::Contains).is_some());
        assert!(first_match("release-note out", &keywords, MatchType::Contains).is_none());
    }

    #[test]
    fn exact_matching_normalizes_non_word_characters() {
        let keywords = vec!["alert".to_string()];
        assert_eq!(
            first_match("ALERT! please read.", &keywords, MatchType::Exact),
            Some("alert".to_string())
        );
    }

    #[test]
    fn exact_matching_rejects_partial_tokens() {
        let keywords = vec!["alert".to_string()];
        assert_eq!(first_match("alerts are noisy", &keywords, MatchType::Exact), None);
    }

    #[test]
    fn exact_matching_requires_contiguous_token_sequence() {
        let keywords = vec!["server down".to_string()];
        assert!(first_match("the server down again", &keywords, MatchType::Exact).is_some());
        assert!(first_match("server is down", &keywords, MatchType::Exact).is_none());
    }

    #[test]
    fn first_keyword_in_rule_order_wins() {
        let keywords = vec!["alert".to_string(), "urgent".to_string()];
        assert_eq!(
            first_match("urgent alert!", &keywords, MatchType::Contains),
            Some("alert".to_string())
        );
    }

    #[test]
    fn thread_rule_pins_empty_parent_channel_entry() {
        let index = build_index(vec![rule(
            1,
            "100",
            Some("777"),
            "900",
            None,
            &["ping"],
            MatchType::Contains,
        )]);

        assert_eq!(index.get(&LocationKey::Thread("777".into())).map(Vec::len), Some(1));
        assert_eq!(index.get(&LocationKey::Channel("100".into())).map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn matching_message_is_forwarded_with_literal_banner() {
        let mut sender = MockChatSender::new();
        sender
            .expect_send_message()
            .withf(|target, body| {
                target == "900" && body == "**Forwarded Message**\n-----\nThis is URGENT today."
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let (repo, service) = service_with(
            vec![rule(1, "100", None, "900", None, &["urgent", "alert"], MatchType::Contains)],
            sender,
        )
        .await;

        service.handle_message(&message("100", "This is URGENT today.")).await;

        let logs = repo.logs.lock().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, DeliveryStatus::Success);
        assert_eq!(logs[0].matched_keyword.as_deref(), Some("urgent"));
    }

    #[tokio::test]
    async fn bot_authors_are_never_forwarded() {
        let mut sender = MockChatSender::new();
        sender.expect_send_message().times(0);

        let (repo, service) = service_with(
            vec![rule(1, "100", None, "900", None, &["urgent"], MatchType::Contains)],
            sender,
        )
        .await;

        let mut msg = message("100", "This is URGENT today.");
        msg.author_is_bot = true;
        service.handle_message(&msg).await;

        assert!(repo.logs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn direct_messages_are_dropped() {
        let mut sender = MockChatSender::new();
        sender.expect_send_message().times(0);

        let (repo, service) = service_with(
            vec![rule(1, "100", None, "900", None, &["urgent"], MatchType::Contains)],
            sender,
        )
        .await;

        let mut msg = message("100", "urgent news");
        msg.guild_id = None;
        service.handle_message(&msg).await;

        assert!(repo.logs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn thread_only_rule_ignores_channel_proper() {
        let mut sender = MockChatSender::new();
        sender.expect_send_message().times(0);

        let (repo, service) = service_with(
            vec![rule(1, "100", Some("777"), "900", None, &["ping"], MatchType::Contains)],
            sender,
        )
        .await;

        service.handle_message(&message("100", "ping everyone")).await;

        assert!(repo.logs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn thread_message_matches_thread_and_parent_rules() {
        let mut sender = MockChatSender::new();
        sender
            .expect_send_message()
            .times(2)
            .returning(|_, _| Ok(()));

        let (repo, service) = service_with(
            vec![
                rule(1, "100", Some("777"), "900", None, &["ping"], MatchType::Contains),
                rule(2, "100", None, "901", None, &["ping"], MatchType::Contains),
            ],
            sender,
        )
        .await;

        let mut msg = message("777", "ping everyone");
        msg.is_thread = true;
        msg.parent_channel_id = Some("100".to_string());
        service.handle_message(&msg).await;

        let logs = repo.logs.lock().unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|l| l.status == DeliveryStatus::Success));
    }

    #[tokio::test]
    async fn destination_thread_takes_precedence_over_channel() {
        let mut sender = MockChatSender::new();
        sender
            .expect_send_message()
            .withf(|target, _| target == "888")
            .times(1)
            .returning(|_, _| Ok(()));

        let (_repo, service) = service_with(
            vec![rule(1, "100", None, "900", Some("888"), &["urgent"], MatchType::Contains)],
            sender,
        )
        .await;

        service.handle_message(&message("100", "urgent!")).await;
    }

    #[tokio::test]
    async fn send_failure_is_logged_and_other_rules_still_fire() {
        let mut sender = MockChatSender::new();
        sender
            .expect_send_message()
            .withf(|target, _| target == "900")
            .times(1)
            .returning(|_, _| Err(Error::Platform("boom".into())));
        sender
            .expect_send_message()
            .withf(|target, _| target == "901")
            .times(1)
            .returning(|_, _| Ok(()));

        let (repo, service) = service_with(
            vec![
                rule(1, "100", None, "900", None, &["urgent"], MatchType::Contains),
                rule(2, "100", None, "901", None, &["urgent"], MatchType::Contains),
            ],
            sender,
        )
        .await;

        service.handle_message(&message("100", "urgent!")).await;

        let logs = repo.logs.lock().unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].status, DeliveryStatus::Failed);
        assert!(logs[0].error.as_deref().unwrap_or_default().contains("boom"));
        assert_eq!(logs[1].status, DeliveryStatus::Success);
    }

    #[tokio::test]
    async fn long_messages_are_truncated_in_the_log() {
        let mut sender = MockChatSender::new();
        sender.expect_send_message().times(1).returning(|_, _| Ok(()));

        let (repo, service) = service_with(
            vec![rule(1, "100", None, "900", None, &["urgent"], MatchType::Contains)],
            sender,
        )
        .await;

        let long = format!("urgent {}", "x".repeat(600));
        service.handle_message(&message("100", &long)).await;

        let logs = repo.logs.lock().unwrap();
        assert_eq!(logs[0].original_message.chars().count(), 500);
    }
}
