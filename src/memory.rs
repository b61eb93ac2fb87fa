//! In-memory collaborators
//!
//! Snapshot-backed implementations of the service traits. The CLI persists
//! them as JSON files between runs; tests use them directly.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ImportError, Result};
use crate::schema::{Owner, SchemaDescriptor};
use crate::services::{
    Account, AccountResolver, DocumentStore, MessageAction, MessageLog, MessageType,
    ModuleFilter, ModuleRecord, Notifier, RawMessage, SchemaFilter, TagRecord, TagStore,
};

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Message log kept in memory
#[derive(Debug, Default)]
pub struct InMemoryMessageLog {
    messages: RwLock<Vec<RawMessage>>,
}

impl InMemoryMessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<RawMessage>) -> Self {
        Self {
            messages: RwLock::new(messages),
        }
    }

    /// Load a log snapshot (a JSON array of messages)
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::from_messages(read_json(path)?))
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        write_json(path, &*self.messages.read().await)
    }

    pub async fn messages(&self) -> Vec<RawMessage> {
        self.messages.read().await.clone()
    }

    /// Append a message under a fixed id, as if it had been published earlier
    pub async fn publish_at(&self, id: &str, topic_id: &str, mut message: RawMessage) {
        message.id = id.to_string();
        message.topic_id = topic_id.to_string();
        self.messages.write().await.push(message);
    }
}

#[async_trait]
impl MessageLog for InMemoryMessageLog {
    async fn get_message(&self, id: &str, message_type: MessageType) -> Result<RawMessage> {
        self.messages
            .read()
            .await
            .iter()
            .find(|m| m.id == id && m.message_type == message_type)
            .cloned()
            .ok_or_else(|| ImportError::MessageLog(format!("message {} not found", id)))
    }

    async fn get_messages(
        &self,
        topic_id: &str,
        message_type: MessageType,
        action: MessageAction,
    ) -> Result<Vec<RawMessage>> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.topic_id == topic_id && m.message_type == message_type && m.action == action)
            .cloned()
            .collect())
    }

    async fn send_message(
        &self,
        topic_id: &str,
        mut message: RawMessage,
        account: &Account,
        _user_id: Option<&str>,
    ) -> Result<String> {
        let mut messages = self.messages.write().await;
        let now = Utc::now();
        let mut seq = messages.len();
        let mut id = format!("{}.{:09}", now.timestamp(), seq);
        while messages.iter().any(|m| m.id == id) {
            seq += 1;
            id = format!("{}.{:09}", now.timestamp(), seq);
        }
        debug!(message_id = %id, topic_id, account = %account.account_id, "message sent");
        message.id = id.clone();
        message.topic_id = topic_id.to_string();
        messages.push(message);
        Ok(id)
    }
}

/// Serialized content of an [`InMemoryStore`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub schemas: Vec<SchemaDescriptor>,
    #[serde(default)]
    pub tools: Vec<ModuleRecord>,
    #[serde(default)]
    pub policies: Vec<ModuleRecord>,
}

/// Document store kept in memory with sequential numeric ids
#[derive(Debug)]
pub struct InMemoryStore {
    state: RwLock<StoreSnapshot>,
    next_id: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::from_snapshot(StoreSnapshot::default())
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let max_id = snapshot
            .schemas
            .iter()
            .filter_map(|s| s.id.as_deref()?.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Self {
            state: RwLock::new(snapshot),
            next_id: AtomicU64::new(max_id + 1),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        Ok(Self::from_snapshot(read_json(path)?))
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        write_json(path, &*self.state.read().await)
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.state.read().await.clone()
    }

    pub async fn schemas(&self) -> Vec<SchemaDescriptor> {
        self.state.read().await.schemas.clone()
    }

    pub async fn add_tool(&self, tool: ModuleRecord) {
        self.state.write().await.tools.push(tool);
    }

    pub async fn add_policy(&self, policy: ModuleRecord) {
        self.state.write().await.policies.push(policy);
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get_schemas_by_ids(&self, ids: &[String]) -> Result<Vec<SchemaDescriptor>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.schemas.iter().find(|s| s.id.as_ref() == Some(id)))
            .cloned()
            .collect())
    }

    async fn get_schemas(&self, filter: &SchemaFilter) -> Result<Vec<SchemaDescriptor>> {
        let state = self.state.read().await;
        Ok(state.schemas.iter().filter(|s| filter.matches(s)).cloned().collect())
    }

    async fn get_schemas_count(&self, filter: &SchemaFilter) -> Result<usize> {
        let state = self.state.read().await;
        Ok(state.schemas.iter().filter(|s| filter.matches(s)).count())
    }

    async fn save_schema(&self, descriptor: &SchemaDescriptor) -> Result<String> {
        let mut state = self.state.write().await;
        if let Some(id) = &descriptor.id {
            if let Some(existing) = state.schemas.iter_mut().find(|s| s.id.as_ref() == Some(id)) {
                *existing = descriptor.clone();
                return Ok(id.clone());
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let mut row = descriptor.clone();
        row.id = Some(id.clone());
        state.schemas.push(row);
        Ok(id)
    }

    async fn delete_schema(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let before = state.schemas.len();
        state.schemas.retain(|s| s.id.as_deref() != Some(id));
        if state.schemas.len() == before {
            return Err(ImportError::Store(format!("schema {} not found", id)));
        }
        Ok(())
    }

    async fn get_tools(&self, filter: &ModuleFilter) -> Result<Vec<ModuleRecord>> {
        let state = self.state.read().await;
        Ok(state.tools.iter().filter(|t| filter.matches(t)).cloned().collect())
    }

    async fn get_tool(&self, filter: &ModuleFilter) -> Result<Option<ModuleRecord>> {
        let state = self.state.read().await;
        Ok(state.tools.iter().find(|t| filter.matches(t)).cloned())
    }

    async fn get_policy(&self, filter: &ModuleFilter) -> Result<Option<ModuleRecord>> {
        let state = self.state.read().await;
        Ok(state.policies.iter().find(|p| filter.matches(p)).cloned())
    }
}

/// Tag store kept in memory
#[derive(Debug, Default)]
pub struct InMemoryTagStore {
    tags: RwLock<Vec<TagRecord>>,
}

impl InMemoryTagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn tags(&self) -> Vec<TagRecord> {
        self.tags.read().await.clone()
    }
}

#[async_trait]
impl TagStore for InMemoryTagStore {
    async fn save_tags(&self, tags: Vec<TagRecord>) -> Result<()> {
        self.tags.write().await.extend(tags);
        Ok(())
    }
}

/// Fixed creator → account table with an optional fallback account
#[derive(Debug, Default, Clone)]
pub struct StaticAccounts {
    accounts: HashMap<String, Account>,
    fallback: Option<Account>,
}

impl StaticAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every creator to the same account
    pub fn single(account: Account) -> Self {
        Self {
            accounts: HashMap::new(),
            fallback: Some(account),
        }
    }

    pub fn with_account(mut self, creator: impl Into<String>, account: Account) -> Self {
        self.accounts.insert(creator.into(), account);
        self
    }
}

#[async_trait]
impl AccountResolver for StaticAccounts {
    async fn resolve_account(&self, owner: &Owner) -> Result<Account> {
        self.accounts
            .get(&owner.creator)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| ImportError::Account(owner.creator.clone()))
    }
}

/// Records progress events as strings
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn push(&self, event: String) {
        let mut events = self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        events.push(event);
    }
}

impl Notifier for RecordingNotifier {
    fn start(&self, label: &str) {
        self.push(format!("start: {}", label));
    }

    fn completed_and_start(&self, label: &str) {
        self.push(format!("start: {}", label));
    }

    fn info(&self, message: &str) {
        self.push(format!("info: {}", message));
    }

    fn completed(&self) {
        self.push("completed".to_string());
    }

    fn error(&self, error: &str) {
        self.push(format!("error: {}", error));
    }
}
