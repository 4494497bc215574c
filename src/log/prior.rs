//! Prior-record staging queue
//!
//! Records are not written straight into log pages. They are first staged
//! on this queue under a short-held mutex, which is where each record's
//! LSA is assigned and its back-links are stamped. The flusher later pops
//! the staged prefix and lays it into pages outside the queue lock, so
//! LSA assignment never waits on I/O.
//!
//! Nodes live in an arena and are addressed by generation-checked
//! handles. A handle that outlives its node goes stale instead of
//! dangling; dereferencing it yields `None`.
//!
//! Lock order: transaction slot lock before the queue lock, never the
//! reverse.

use std::sync::Mutex;

use super::lsa::Lsa;
use super::record::LogRecord;
use crate::txn::TransactionDescriptor;

/// A staged record: its assigned address and serialized bytes.
#[derive(Debug, Clone)]
pub struct PriorNode {
    pub lsa: Lsa,
    pub bytes: Vec<u8>,
}

/// Generation-checked handle to an arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle {
    index: u32,
    gen: u32,
}

struct Slot {
    gen: u32,
    node: Option<PriorNode>,
    next: Option<NodeHandle>,
}

struct PriorInner {
    arena: Vec<Slot>,
    free: Vec<u32>,
    head: Option<NodeHandle>,
    tail: Option<NodeHandle>,
    /// Address the next staged record will receive.
    prior_lsa: Lsa,
    /// Address of the most recently staged record.
    prev_lsa: Lsa,
    list_size: usize,
}

impl PriorInner {
    fn alloc(&mut self, node: PriorNode) -> NodeHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.arena[index as usize];
            slot.node = Some(node);
            slot.next = None;
            NodeHandle {
                index,
                gen: slot.gen,
            }
        } else {
            let index = self.arena.len() as u32;
            self.arena.push(Slot {
                gen: 0,
                node: Some(node),
                next: None,
            });
            NodeHandle { index, gen: 0 }
        }
    }

    fn release(&mut self, handle: NodeHandle) -> Option<PriorNode> {
        let slot = &mut self.arena[handle.index as usize];
        if slot.gen != handle.gen {
            return None;
        }
        let node = slot.node.take();
        slot.next = None;
        slot.gen = slot.gen.wrapping_add(1);
        self.free.push(handle.index);
        node
    }
}

/// The staging queue between record construction and the append pipeline.
pub struct PriorQueue {
    inner: Mutex<PriorInner>,
    area_size: usize,
}

impl PriorQueue {
    /// A queue whose next assigned address is `start`.
    pub fn new(start: Lsa, area_size: usize) -> Self {
        Self {
            inner: Mutex::new(PriorInner {
                arena: Vec::new(),
                free: Vec::new(),
                head: None,
                tail: None,
                prior_lsa: start,
                prev_lsa: Lsa::NULL,
                list_size: 0,
            }),
            area_size,
        }
    }

    /// Stage `record` for the given transaction. Assigns the record's LSA,
    /// stamps its global and per-transaction back-links, and rolls the
    /// owner's bookmarks forward. Returns the assigned address.
    pub fn push(&self, mut record: LogRecord, tdes: &mut TransactionDescriptor) -> Lsa {
        let mut inner = self.inner.lock().unwrap();

        record.header.back_lsa = inner.prev_lsa;
        record.header.prev_tran_lsa = tdes.tail_lsa;

        let lsa = inner.prior_lsa;
        inner.prev_lsa = lsa;
        inner.prior_lsa = lsa.advance(record.serialized_len(), self.area_size);

        tdes.note_appended(lsa, &record);

        let handle = inner.alloc(PriorNode {
            lsa,
            bytes: record.serialize(),
        });
        match inner.tail {
            Some(tail) => {
                inner.arena[tail.index as usize].next = Some(handle);
            }
            None => inner.head = Some(handle),
        }
        inner.tail = Some(handle);
        inner.list_size += 1;
        lsa
    }

    /// Pop everything currently staged, in assignment order. The flusher
    /// calls this, then lays the nodes into pages without holding the
    /// queue lock.
    pub fn pop_flush_prefix(&self) -> Vec<PriorNode> {
        let mut inner = self.inner.lock().unwrap();
        let mut nodes = Vec::with_capacity(inner.list_size);
        let mut cursor = inner.head.take();
        while let Some(handle) = cursor {
            cursor = inner.arena[handle.index as usize].next;
            if let Some(node) = inner.release(handle) {
                nodes.push(node);
            }
        }
        inner.tail = None;
        inner.list_size = 0;
        nodes
    }

    /// Address the next staged record will receive.
    pub fn append_lsa(&self) -> Lsa {
        self.inner.lock().unwrap().prior_lsa
    }

    /// Address of the most recently staged record, [`Lsa::NULL`] if none
    /// has been staged yet.
    pub fn prev_lsa(&self) -> Lsa {
        self.inner.lock().unwrap().prev_lsa
    }

    /// Number of staged records awaiting flush.
    pub fn staged_count(&self) -> usize {
        self.inner.lock().unwrap().list_size
    }
}
