use std::collections::HashSet;

use crate::common::{PageID, TransactionID};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    // No predicate locks, so this behaves like RepeatableRead
    Serializable,
}

impl IsolationLevel {
    // Whether shared locks taken by reads are kept until commit/abort
    pub fn holds_read_locks(self) -> bool {
        matches!(self, IsolationLevel::RepeatableRead | IsolationLevel::Serializable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoEntry {
    pub page_id: PageID,
    pub before_img: Vec<u8>,
    pub after_img: Vec<u8>,
}

#[derive(Debug)]
pub struct Transaction {
    pub id: TransactionID,
    pub state: TransactionState,
    pub isolation_level: IsolationLevel,
    pub modified_pages: HashSet<PageID>, // Pages we've written to
    pub locked_pages: HashSet<PageID>,   // Pages we're holding locks on until the end
    pub undo_log: Vec<UndoEntry>,        // In write order
}

impl Transaction {
    pub fn new(id: TransactionID, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            isolation_level,
            modified_pages: HashSet::new(),
            locked_pages: HashSet::new(),
            undo_log: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub fn record_write(&mut self, page_id: PageID, before_img: Vec<u8>, after_img: Vec<u8>) {
        self.modified_pages.insert(page_id);
        self.undo_log.push(UndoEntry {
            page_id,
            before_img,
            after_img,
        });
    }

    pub fn add_locked_page(&mut self, page_id: PageID) {
        self.locked_pages.insert(page_id);
    }
}
