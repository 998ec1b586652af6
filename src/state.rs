//! The state file: a graph of nodes over [`BinaryImage`], with an
//! in-memory callsign index and a pending-work list.
//!
//! Every public mutating operation takes the single state lock for its
//! whole duration, so readers observe either all of a mutation or none
//! of it. References that leave the lock are [`OffsetPtr`] handles; the
//! records they designate are never moved or destroyed, so a handle
//! stays valid for the life of the open file.

use crate::callsign::Callsign;
use crate::error::{AirwalkError, Result};
use crate::image::BinaryImage;
use crate::layout::{header, node};
use crate::list::ListIter;
use crate::ptr::OffsetPtr;
use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

/// Growth capacity reserved beyond the on-disk length at open.
const IMAGE_RESERVE: usize = 4096;

#[derive(Debug)]
struct StateInner {
    image: BinaryImage,
    /// Canonical callsign string to node record. Uniqueness is an
    /// invariant of the file; a duplicate on load means corruption.
    index: HashMap<String, OffsetPtr>,
    /// Nodes with `query_count < visit_serial`, in load/append order.
    pending: VecDeque<OffsetPtr>,
}

/// Persistent store of every callsign seen and how it was reached.
#[derive(Debug)]
pub struct StateFile {
    inner: Mutex<StateInner>,
    path: PathBuf,
}

impl StateFile {
    /// Open or create the state file at `path`.
    ///
    /// An empty file gets a fresh header. A non-empty file is verified
    /// (magic, endian stamp, version, record framing) and indexed; any
    /// inconsistency fails with `Corrupt` and the file is left untouched.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut image = BinaryImage::open(&path, IMAGE_RESERVE)?;

        if image.size() == 0 {
            header::init(&mut image)?;
        } else {
            header::verify(&image)?;
        }

        let serial = header::visit_serial(&image)?;
        let mut index = HashMap::new();
        let mut pending = VecDeque::new();
        for found in header::all_nodes().iter(&image) {
            let ptr = found?;
            node::verify(&image, ptr.offset())?;
            let callsign = node::callsign(&image, ptr.offset())?;
            match index.entry(callsign.as_str().to_string()) {
                Entry::Occupied(_) => {
                    return Err(AirwalkError::corrupt(format!(
                        "duplicate callsign {callsign} in node list"
                    )));
                }
                Entry::Vacant(v) => {
                    v.insert(ptr);
                }
            }
            if node::query_count(&image, ptr.offset())? < serial {
                pending.push_back(ptr);
            }
        }

        Ok(StateFile {
            inner: Mutex::new(StateInner {
                image,
                index,
                pending,
            }),
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of indexed nodes.
    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a node by callsign.
    pub fn find(&self, callsign: &Callsign) -> Option<OffsetPtr> {
        self.inner.lock().index.get(callsign.as_str()).copied()
    }

    /// Record a callsign, once. Returns the existing node when the
    /// callsign is already known; otherwise appends a node, splices it
    /// into the all-nodes list, indexes it, and queues it as pending.
    /// The record and its list link commit together or not at all.
    pub fn append_node(&self, callsign: &Callsign) -> Result<OffsetPtr> {
        let mut inner = self.inner.lock();
        Self::append_locked(&mut inner, callsign, false)
    }

    /// Like [`append_node`](Self::append_node), and additionally puts the
    /// node on the seed list if it is not there yet.
    pub fn append_root_node(&self, callsign: &Callsign) -> Result<OffsetPtr> {
        let mut inner = self.inner.lock();
        Self::append_locked(&mut inner, callsign, true)
    }

    fn append_locked(
        inner: &mut StateInner,
        callsign: &Callsign,
        root: bool,
    ) -> Result<OffsetPtr> {
        let StateInner {
            image,
            index,
            pending,
        } = inner;

        match index.entry(callsign.as_str().to_string()) {
            Entry::Occupied(e) => {
                let ptr = *e.get();
                if root && !header::root_nodes().contains(image, ptr)? {
                    header::root_nodes().push_front(image, ptr)?;
                }
                Ok(ptr)
            }
            Entry::Vacant(v) => {
                let mut guard = image.append_guard();
                let at = node::append(&mut guard, callsign)?;
                let ptr = OffsetPtr::new(at);
                header::all_nodes().push_front(&mut guard, ptr)?;
                if root {
                    header::root_nodes().push_front(&mut guard, ptr)?;
                }
                guard.commit();
                v.insert(ptr);
                pending.push_back(ptr);
                Ok(ptr)
            }
        }
    }

    /// Record that `to` is reachable from `from`, once.
    pub fn link_edge(&self, from: OffsetPtr, to: OffsetPtr) -> Result<()> {
        let inner = &mut *self.inner.lock();
        let links = node::links(from.offset());
        if !links.contains(&inner.image, to)? {
            links.push_front(&mut inner.image, to)?;
        }
        Ok(())
    }

    /// Mark `ptr` as visited in this run by raising its query count to
    /// the file-wide visit serial.
    pub fn mark_visited(&self, ptr: OffsetPtr) -> Result<()> {
        let inner = &mut *self.inner.lock();
        let serial = header::visit_serial(&inner.image)?;
        node::set_query_count(&mut inner.image, ptr.offset(), serial)
    }

    /// Drain the pending list for task fan-out.
    pub fn take_pending(&self) -> Vec<OffsetPtr> {
        self.inner.lock().pending.drain(..).collect()
    }

    /// Write the image back to disk, truncating the file if it shrank.
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().image.flush()
    }

    /// Take the state lock for consistent multi-step reads. Node
    /// handles and iterators obtained through the guard are valid only
    /// while it is held.
    pub fn lock(&self) -> StateGuard<'_> {
        StateGuard {
            inner: self.inner.lock(),
        }
    }
}

impl Drop for StateFile {
    fn drop(&mut self) {
        if let Err(e) = self.inner.lock().image.flush() {
            tracing::error!(path = %self.path.display(), error = %e, "failed to flush state file");
        }
    }
}

/// Read view over a locked state file.
pub struct StateGuard<'a> {
    inner: MutexGuard<'a, StateInner>,
}

impl StateGuard<'_> {
    pub fn len(&self) -> usize {
        self.inner.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.index.is_empty()
    }

    pub fn visit_serial(&self) -> Result<u32> {
        header::visit_serial(&self.inner.image)
    }

    pub fn find(&self, callsign: &Callsign) -> Option<OffsetPtr> {
        self.inner.index.get(callsign.as_str()).copied()
    }

    /// All nodes, most recently appended first.
    pub fn nodes(&self) -> ListIter<'_> {
        header::all_nodes().iter(&self.inner.image)
    }

    /// Seed nodes, most recently appended first.
    pub fn root_nodes(&self) -> ListIter<'_> {
        header::root_nodes().iter(&self.inner.image)
    }

    /// Neighbours discovered from `ptr`, most recently linked first.
    pub fn neighbours(&self, ptr: OffsetPtr) -> ListIter<'_> {
        node::links(ptr.offset()).iter(&self.inner.image)
    }

    pub fn callsign(&self, ptr: OffsetPtr) -> Result<Callsign> {
        node::callsign(&self.inner.image, ptr.offset())
    }

    pub fn query_count(&self, ptr: OffsetPtr) -> Result<u32> {
        node::query_count(&self.inner.image, ptr.offset())
    }

    pub fn pending(&self) -> impl Iterator<Item = OffsetPtr> + '_ {
        self.inner.pending.iter().copied()
    }

    pub fn image_size(&self) -> u64 {
        self.inner.image.size()
    }
}
