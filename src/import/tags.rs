//! Tag import
//!
//! Tags published on the source topics are copied into the local tag store as
//! history records pointing at the newly committed schemas.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::Result;
use crate::services::{MessageAction, MessageLog, MessageType, TagRecord, TagStore};

/// Rewrites tag targets through the committed id table
pub struct TagRemapper<'a> {
    log: &'a dyn MessageLog,
    tags: &'a dyn TagStore,
}

impl<'a> TagRemapper<'a> {
    pub fn new(log: &'a dyn MessageLog, tags: &'a dyn TagStore) -> Self {
        Self { log, tags }
    }

    /// Import the published tags of `topics`.
    ///
    /// `id_map` maps old store ids and old message ids to new store ids; tags
    /// whose target is not in it are skipped. Returns the saved records.
    pub async fn import_tags(
        &self,
        topics: &[String],
        id_map: &HashMap<String, String>,
    ) -> Result<Vec<TagRecord>> {
        let mut records = Vec::new();
        for topic_id in topics {
            let messages = self
                .log
                .get_messages(topic_id, MessageType::Tag, MessageAction::PublishTag)
                .await?;
            for message in &messages {
                let tag = match message.to_tag() {
                    Ok(tag) => tag,
                    Err(e) => {
                        warn!(message_id = %message.id, error = %e, "skipping unreadable tag message");
                        continue;
                    }
                };
                let mut record = TagRecord::history(message, tag);
                match id_map.get(&record.target) {
                    Some(local) => {
                        record.local_target = Some(local.clone());
                        records.push(record);
                    }
                    None => {
                        debug!(tag = %record.uuid, target = %record.target, "tag target not imported");
                    }
                }
            }
        }

        if !records.is_empty() {
            self.tags.save_tags(records.clone()).await?;
        }
        debug!(count = records.len(), "tags imported");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryMessageLog, InMemoryTagStore};
    use crate::services::{RawMessage, TagMessage, TAG_STATUS_HISTORY};

    fn tag(uuid: &str, target: &str) -> RawMessage {
        RawMessage::tag(&TagMessage {
            uuid: uuid.into(),
            name: format!("tag-{}", uuid),
            target: target.into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_tags_follow_committed_ids() {
        let log = InMemoryMessageLog::new();
        log.publish_at("t.1", "T", tag("t1", "1.1")).await;
        log.publish_at("t.2", "T", tag("t2", "old-7")).await;
        log.publish_at("t.3", "T", tag("t3", "elsewhere")).await;
        log.publish_at("t.4", "U", tag("t4", "1.1")).await;
        let store = InMemoryTagStore::new();

        let mut id_map = HashMap::new();
        id_map.insert("1.1".to_string(), "10".to_string());
        id_map.insert("old-7".to_string(), "11".to_string());

        let records = TagRemapper::new(&log, &store)
            .import_tags(&["T".to_string()], &id_map)
            .await
            .unwrap();

        let targets: Vec<_> = records.iter().map(|r| r.local_target.as_deref()).collect();
        assert_eq!(targets, vec![Some("10"), Some("11")]);
        assert!(records.iter().all(|r| r.status == TAG_STATUS_HISTORY));
        assert_eq!(records[0].message_id, "t.1");
        assert_eq!(store.tags().await, records);
    }
}
