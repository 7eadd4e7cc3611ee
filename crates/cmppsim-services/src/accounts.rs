//! Account table: which SP account is logged in on which connection.
//!
//! The mock server never trusts identity fields inside a submit; it resolves
//! the account from the connection's remote address instead.

use std::sync::Arc;

use dashmap::DashMap;

use cmppsim_core::config::AccountConfig;
use cmppsim_core::SenderIdentity;

/// An SP account bound to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub user_name: String,
    pub sp_id: String,
    pub sp_code: String,
}

impl Account {
    pub fn identity(&self) -> SenderIdentity {
        SenderIdentity {
            sp_id: self.sp_id.clone(),
            sp_code: self.sp_code.clone(),
        }
    }
}

impl From<&AccountConfig> for Account {
    fn from(config: &AccountConfig) -> Self {
        Self {
            user_name: config.user_name.clone(),
            sp_id: config.sp_id.clone(),
            sp_code: config.sp_code.clone(),
        }
    }
}

/// Connection address → account. Shared across all tasks.
#[derive(Clone, Default)]
pub struct AccountTable {
    by_addr: Arc<DashMap<String, Account>>,
}

impl AccountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `account` to the connection at `addr` (login).
    pub fn register(&self, addr: impl Into<String>, account: Account) {
        self.by_addr.insert(addr.into(), account);
    }

    /// Unbind the connection at `addr` (logout / disconnect).
    pub fn remove(&self, addr: &str) -> Option<Account> {
        self.by_addr.remove(addr).map(|(_, account)| account)
    }

    pub fn lookup(&self, addr: &str) -> Option<Account> {
        self.by_addr.get(addr).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }
}
