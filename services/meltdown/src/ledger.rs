//! File-backed token ledger.
//!
//! Balances live in a single JSON object keyed by participant id:
//! `{ "<id>": { "xp": 0, "level": 0, "tokens": 0 } }`. Every mutation rewrites the file through a
//! temporary sibling and a rename, so a crash mid-write leaves the previous version intact.
//! Fields kept by other tools sharing the file (shop purchases, gift logs) are carried through
//! untouched.

use meltdown_execution::ledger::{credit_account, debit_account};
use meltdown_execution::{Ledger, LedgerError};
use meltdown_types::meltdown::ParticipantId;
use meltdown_types::Account;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// One entry of the file: the balances this ledger owns plus whatever else was stored there.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Record {
    #[serde(flatten)]
    account: Account,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

type Accounts = BTreeMap<String, Record>;

pub struct JsonLedger {
    path: PathBuf,
    accounts: Mutex<Accounts>,
}

impl JsonLedger {
    /// Loads `path`, starting empty when the file does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let accounts = match tokio::fs::read(&path).await {
            Ok(raw) if raw.iter().all(u8::is_ascii_whitespace) => Accounts::new(),
            Ok(raw) => serde_json::from_slice(&raw).map_err(|err| {
                LedgerError::Storage(format!("failed to parse {}: {err}", path.display()))
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Accounts::new(),
            Err(err) => {
                return Err(LedgerError::Storage(format!(
                    "failed to read {}: {err}",
                    path.display()
                )))
            }
        };
        debug!(path = %path.display(), accounts = accounts.len(), "ledger loaded");
        Ok(Self {
            path,
            accounts: Mutex::new(accounts),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `f` to one account and persists the result. Nothing changes if `f` or the write
    /// fails.
    async fn update<R, F>(&self, participant: ParticipantId, f: F) -> Result<R, LedgerError>
    where
        F: FnOnce(&mut Account) -> Result<R, LedgerError> + Send,
        R: Send,
    {
        let key = participant.to_string();
        let mut accounts = self.accounts.lock().await;
        let previous = accounts.get(&key).cloned();
        let mut record = previous.clone().unwrap_or_default();
        let result = f(&mut record.account)?;

        accounts.insert(key.clone(), record);
        if let Err(err) = persist(&self.path, &accounts).await {
            match previous {
                Some(previous) => accounts.insert(key, previous),
                None => accounts.remove(&key),
            };
            return Err(err);
        }
        Ok(result)
    }
}

async fn persist(path: &Path, accounts: &Accounts) -> Result<(), LedgerError> {
    let storage = |err: std::io::Error| LedgerError::Storage(format!("{}: {err}", path.display()));
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(storage)?;
    }
    let encoded = serde_json::to_vec_pretty(accounts)
        .map_err(|err| LedgerError::Storage(format!("failed to encode accounts: {err}")))?;
    let staging = path.with_extension("json.tmp");
    tokio::fs::write(&staging, encoded).await.map_err(storage)?;
    tokio::fs::rename(&staging, path).await.map_err(storage)?;
    Ok(())
}

impl Ledger for JsonLedger {
    async fn credit(&self, participant: ParticipantId, amount: u64) -> Result<(), LedgerError> {
        self.update(participant, |account| credit_account(account, amount))
            .await
    }

    async fn debit(&self, participant: ParticipantId, amount: u64) -> Result<(), LedgerError> {
        self.update(participant, |account| debit_account(account, amount))
            .await
    }

    async fn award_experience(
        &self,
        participant: ParticipantId,
        amount: u64,
    ) -> Result<u32, LedgerError> {
        let (leveled_up, level) = self
            .update(participant, |account| Ok(account.add_experience(amount)))
            .await?;
        if leveled_up {
            info!(participant = %participant, level, "participant leveled up");
        }
        Ok(level)
    }

    async fn account(&self, participant: ParticipantId) -> Result<Account, LedgerError> {
        Ok(self
            .accounts
            .lock()
            .await
            .get(&participant.to_string())
            .map(|record| record.account.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: ParticipantId = ParticipantId(42);

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JsonLedger::open(dir.path().join("users.json")).await.unwrap();
        assert_eq!(ledger.account(ALICE).await.unwrap(), Account::default());
        assert!(!ledger.path().exists());
    }

    #[tokio::test]
    async fn writes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("users.json");
        {
            let ledger = JsonLedger::open(&path).await.unwrap();
            ledger.credit(ALICE, 300).await.unwrap();
            ledger.debit(ALICE, 100).await.unwrap();
            assert_eq!(ledger.award_experience(ALICE, 16).await, Ok(2));
        }

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({ "42": { "xp": 16, "level": 2, "tokens": 200 } })
        );
        assert!(!path.with_extension("json.tmp").exists());

        let reopened = JsonLedger::open(&path).await.unwrap();
        assert_eq!(reopened.account(ALICE).await.unwrap().tokens, 200);
    }

    #[tokio::test]
    async fn failed_debit_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let ledger = JsonLedger::open(&path).await.unwrap();
        ledger.credit(ALICE, 10).await.unwrap();

        assert_eq!(
            ledger.debit(ALICE, 50).await,
            Err(LedgerError::InsufficientFunds {
                needed: 50,
                available: 10
            })
        );
        assert_eq!(ledger.account(ALICE).await.unwrap().tokens, 10);
        assert_eq!(ledger.credit(ALICE, 0).await, Err(LedgerError::InvalidAmount));
    }

    #[tokio::test]
    async fn foreign_fields_survive_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let original = serde_json::json!({
            "42": {
                "xp": 5,
                "level": 1,
                "tokens": 10,
                "shop_purchases": [{ "item": "role", "price": 500 }],
                "logs": { "gifts": [{ "to": "7", "amount": 3 }] }
            },
            "7": { "xp": 0, "level": 0, "tokens": 3, "logs": { "gifts": [] } }
        });
        std::fs::write(&path, original.to_string()).unwrap();

        let ledger = JsonLedger::open(&path).await.unwrap();
        ledger.credit(ALICE, 1).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["42"]["tokens"], 11);
        assert_eq!(raw["42"]["shop_purchases"], original["42"]["shop_purchases"]);
        assert_eq!(raw["42"]["logs"], original["42"]["logs"]);
        assert_eq!(raw["7"], original["7"]);
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            JsonLedger::open(&path).await,
            Err(LedgerError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn unwritable_path_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("data");
        let ledger = JsonLedger::open(parent.join("users.json")).await.unwrap();
        // A regular file where the parent directory should be.
        std::fs::write(&parent, b"").unwrap();

        assert!(matches!(
            ledger.credit(ALICE, 5).await,
            Err(LedgerError::Storage(_))
        ));
        assert_eq!(ledger.account(ALICE).await.unwrap(), Account::default());
    }
}
