//! In-memory chain state.
//!
//! Committed accounts live behind an `Arc` that only [`InMemoryChain::mine_block`]
//! replaces. Views opened with [`ChainState::state_at`] pin that map and
//! collect their own writes in an overlay with an undo journal, so nothing a
//! view does is visible to the chain or to any other view.
//!
//! A view dropped while still holding journaled writes counts them in
//! [`InMemoryChain::unreverted_writes`].

use crate::domain::{keccak256, Address, BlockHeader, Hash, SnapshotToken, StateError, U256};
use crate::ports::{ChainState, StateView};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// One account in the in-memory state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Account {
    /// Transaction counter.
    pub nonce: u64,
    /// Balance in base units.
    pub balance: U256,
    /// Contract code (empty for EOAs).
    pub code: Vec<u8>,
    /// Contract storage.
    pub storage: BTreeMap<Hash, Hash>,
}

impl Account {
    /// Externally owned account with `nonce` and `balance`.
    pub fn new(nonce: u64, balance: impl Into<U256>) -> Self {
        Self {
            nonce,
            balance: balance.into(),
            ..Default::default()
        }
    }

    /// Contract account holding `code`.
    pub fn contract(code: Vec<u8>) -> Self {
        Self {
            code,
            ..Default::default()
        }
    }
}

type Accounts = HashMap<Address, Account>;

#[derive(Debug)]
struct ChainInner {
    head: BlockHeader,
    accounts: Arc<Accounts>,
    receipts: HashSet<Hash>,
    highest_known: Option<u64>,
    fail_state_reads: bool,
    fail_reverts: bool,
    next_snapshot: u64,
    unreverted_writes: u64,
}

impl ChainInner {
    fn state_root(&self) -> Hash {
        let sorted: BTreeMap<&Address, &Account> = self.accounts.iter().collect();
        let mut preimage = Vec::with_capacity(sorted.len() * 96);
        for (address, account) in sorted {
            preimage.extend_from_slice(address);
            preimage.extend_from_slice(&account.nonce.to_be_bytes());
            let mut balance = [0u8; 32];
            account.balance.to_big_endian(&mut balance);
            preimage.extend_from_slice(&balance);
            preimage.extend_from_slice(&keccak256(&account.code));
            for (key, value) in &account.storage {
                preimage.extend_from_slice(key);
                preimage.extend_from_slice(value);
            }
        }
        keccak256(&preimage)
    }

    fn check_readable(&self) -> Result<(), StateError> {
        if self.fail_state_reads {
            return Err(StateError::Unavailable("state reads disabled".into()));
        }
        Ok(())
    }
}

/// Shared in-memory chain: a head, the committed accounts, mined receipts.
#[derive(Clone, Debug)]
pub struct InMemoryChain {
    inner: Arc<RwLock<ChainInner>>,
}

impl InMemoryChain {
    /// Creates a genesis chain whose blocks carry `gas_limit`.
    pub fn new(gas_limit: u64) -> Self {
        let mut inner = ChainInner {
            head: BlockHeader {
                height: 0,
                gas_limit,
                ..Default::default()
            },
            accounts: Arc::new(HashMap::new()),
            receipts: HashSet::new(),
            highest_known: None,
            fail_state_reads: false,
            fail_reverts: false,
            next_snapshot: 0,
            unreverted_writes: 0,
        };
        inner.head.state_root = inner.state_root();
        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    /// Adds `account` and re-roots genesis.
    pub fn with_account(self, address: Address, account: Account) -> Self {
        {
            let mut inner = self.inner.write();
            Arc::make_mut(&mut inner.accounts).insert(address, account);
            inner.head.state_root = inner.state_root();
        }
        self
    }

    /// Committed contents of `address`.
    pub fn account(&self, address: &Address) -> Account {
        self.inner
            .read()
            .accounts
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    /// Digest of the committed state.
    pub fn state_root(&self) -> Hash {
        self.inner.read().state_root()
    }

    /// Writes that views dropped without reverting.
    pub fn unreverted_writes(&self) -> u64 {
        self.inner.read().unreverted_writes
    }

    /// Seals a new head after applying `mutate` to the committed accounts.
    ///
    /// Views opened earlier keep reading the accounts they were opened on.
    /// `included` receipts become visible to [`ChainState::has_receipt`].
    pub fn mine_block<F>(&self, included: &[Hash], mutate: F) -> BlockHeader
    where
        F: FnOnce(&mut HashMap<Address, Account>),
    {
        let mut inner = self.inner.write();
        mutate(Arc::make_mut(&mut inner.accounts));
        inner.receipts.extend(included.iter().copied());

        let parent = inner.head.clone();
        let head = BlockHeader {
            height: parent.height + 1,
            parent_hash: parent.hash(),
            state_root: inner.state_root(),
            timestamp: parent.timestamp + 12,
            gas_limit: parent.gas_limit,
            coinbase: parent.coinbase,
        };
        inner.head = head.clone();
        head
    }

    /// Reports a sync target above the current head.
    pub fn set_highest_known(&self, height: Option<u64>) {
        self.inner.write().highest_known = height;
    }

    /// Makes every state read fail with `Unavailable`.
    pub fn fail_state_reads(&self, fail: bool) {
        self.inner.write().fail_state_reads = fail;
    }

    /// Makes every revert fail with `RevertFailed`.
    pub fn fail_reverts(&self, fail: bool) {
        self.inner.write().fail_reverts = fail;
    }
}

impl ChainState for InMemoryChain {
    fn current_head(&self) -> Result<BlockHeader, StateError> {
        let inner = self.inner.read();
        inner.check_readable()?;
        Ok(inner.head.clone())
    }

    fn state_at(&self, root: &Hash) -> Result<Box<dyn StateView>, StateError> {
        let inner = self.inner.read();
        inner.check_readable()?;
        if *root != inner.head.state_root {
            return Err(StateError::UnknownRoot(*root));
        }
        Ok(Box::new(InMemoryStateView {
            chain: Arc::clone(&self.inner),
            base: Arc::clone(&inner.accounts),
            overlay: HashMap::new(),
            journal: Vec::new(),
            snapshots: Vec::new(),
        }))
    }

    fn has_receipt(&self, tx_hash: &Hash) -> Result<bool, StateError> {
        let inner = self.inner.read();
        inner.check_readable()?;
        Ok(inner.receipts.contains(tx_hash))
    }

    fn highest_known_block(&self) -> Option<u64> {
        self.inner.read().highest_known
    }
}

#[derive(Debug)]
struct JournalEntry {
    address: Address,
    previous: Option<Account>,
}

/// Private overlay over the accounts committed at one root.
#[derive(Debug)]
pub struct InMemoryStateView {
    chain: Arc<RwLock<ChainInner>>,
    base: Arc<Accounts>,
    overlay: Accounts,
    journal: Vec<JournalEntry>,
    /// Open snapshots as (id, journal length when taken).
    snapshots: Vec<(u64, usize)>,
}

impl InMemoryStateView {
    fn read<T>(&self, address: &Address, f: impl FnOnce(&Account) -> T) -> Result<T, StateError>
    where
        T: Default,
    {
        self.chain.read().check_readable()?;
        Ok(self
            .overlay
            .get(address)
            .or_else(|| self.base.get(address))
            .map(f)
            .unwrap_or_default())
    }

    fn modify(&mut self, address: &Address, f: impl FnOnce(&mut Account)) -> Result<(), StateError> {
        self.chain.read().check_readable()?;
        self.journal.push(JournalEntry {
            address: *address,
            previous: self.overlay.get(address).cloned(),
        });
        let base = &self.base;
        let account = self
            .overlay
            .entry(*address)
            .or_insert_with(|| base.get(address).cloned().unwrap_or_default());
        f(account);
        Ok(())
    }
}

impl StateView for InMemoryStateView {
    fn snapshot(&mut self) -> SnapshotToken {
        let id = {
            let mut inner = self.chain.write();
            inner.next_snapshot += 1;
            inner.next_snapshot
        };
        self.snapshots.push((id, self.journal.len()));
        SnapshotToken::new(id)
    }

    fn revert_to_snapshot(&mut self, token: SnapshotToken) -> Result<(), StateError> {
        let id = token.id();
        let position = self
            .snapshots
            .iter()
            .rposition(|(snapshot, _)| *snapshot == id)
            .ok_or(StateError::InvalidSnapshot(id))?;

        if self.chain.read().fail_reverts {
            return Err(StateError::RevertFailed {
                id,
                reason: "journal unavailable".into(),
            });
        }

        let (_, journal_len) = self.snapshots[position];
        while self.journal.len() > journal_len {
            let Some(entry) = self.journal.pop() else {
                break;
            };
            match entry.previous {
                Some(account) => self.overlay.insert(entry.address, account),
                None => self.overlay.remove(&entry.address),
            };
        }
        self.snapshots.truncate(position);
        Ok(())
    }

    fn get_nonce(&self, address: &Address) -> Result<u64, StateError> {
        self.read(address, |account| account.nonce)
    }

    fn set_nonce(&mut self, address: &Address, nonce: u64) -> Result<(), StateError> {
        self.modify(address, |account| account.nonce = nonce)
    }

    fn get_balance(&self, address: &Address) -> Result<U256, StateError> {
        self.read(address, |account| account.balance)
    }

    fn set_balance(&mut self, address: &Address, balance: U256) -> Result<(), StateError> {
        self.modify(address, |account| account.balance = balance)
    }

    fn get_code(&self, address: &Address) -> Result<Vec<u8>, StateError> {
        self.read(address, |account| account.code.clone())
    }

    fn set_code(&mut self, address: &Address, code: Vec<u8>) -> Result<(), StateError> {
        self.modify(address, |account| account.code = code)
    }

    fn get_storage(&self, address: &Address, key: &Hash) -> Result<Hash, StateError> {
        self.read(address, |account| {
            account.storage.get(key).copied().unwrap_or_default()
        })
    }

    fn set_storage(&mut self, address: &Address, key: Hash, value: Hash) -> Result<(), StateError> {
        self.modify(address, |account| {
            account.storage.insert(key, value);
        })
    }
}

impl Drop for InMemoryStateView {
    fn drop(&mut self) {
        if !self.journal.is_empty() {
            self.chain.write().unreverted_writes += self.journal.len() as u64;
        }
    }
}
