use super::*;
use crate::{
    utils::locks::{read_or_recover, write_or_recover},
    CompactRangeExceededSnafu,
    StorageIoSnafu,
};
use bytes::{Buf, BufMut};
use memmap::*;
use snafu::{ensure, ResultExt};
use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        RwLock,
    },
};
use tempfile::tempfile;

/// A flat, memory-mapped array of node positions indexed directly by node id.
///
/// Only usable when node ids are dense and bounded by `capacity` (e.g. renumbered extracts).
/// Each slot holds 8 bytes. The file is sparse, so untouched id ranges cost no memory.
pub struct CompactNodeStore {
    capacity: u64,
    path: Option<PathBuf>,
    slots: RwLock<MmapMut>,
    len: AtomicUsize,
}

impl CompactNodeStore {
    /// Back the store with an anonymous temporary file.
    pub fn temporary(capacity: u64) -> Result<Self, StoreError> {
        let capacity = capacity.max(1);
        let slots = map_fresh_file(None, capacity)?;
        Ok(CompactNodeStore {
            capacity,
            path: None,
            slots: RwLock::new(slots),
            len: AtomicUsize::new(0),
        })
    }

    /// Back the store with the file at `path`, which is truncated first.
    pub fn at_path<P>(path: P, capacity: u64) -> Result<Self, StoreError>
    where
        P: AsRef<Path>,
    {
        let capacity = capacity.max(1);
        let path = path.as_ref().to_owned();
        let slots = map_fresh_file(Some(&path), capacity)?;
        Ok(CompactNodeStore {
            capacity,
            path: Some(path),
            slots: RwLock::new(slots),
            len: AtomicUsize::new(0),
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    fn slot_offset(&self, id: NodeId) -> Option<usize> {
        if id < 0 || (id as u64) >= self.capacity {
            None
        } else {
            Some((id as usize) * Slot::LENGTH)
        }
    }
}

impl NodeStore for CompactNodeStore {
    fn insert(&self, nodes: Vec<(NodeId, LatpLon)>) -> Result<(), StoreError> {
        // check the whole batch first, so a rejected batch leaves no partial writes
        for (id, _) in nodes.iter() {
            ensure!(
                self.slot_offset(*id).is_some(),
                CompactRangeExceededSnafu {
                    node_id: *id,
                    capacity: self.capacity,
                }
            );
        }
        let mut guard = write_or_recover(&self.slots, "compact node store");
        let mut added = 0usize;
        for (id, point) in nodes {
            let offset = id as usize * Slot::LENGTH;
            let slot_bytes = &mut guard[offset..offset + Slot::LENGTH];
            if Slot::read_from(&*slot_bytes).is_none() {
                added += 1;
            }
            Slot::write_to(slot_bytes, point);
        }
        self.len.fetch_add(added, Ordering::Relaxed);
        Ok(())
    }

    fn at(&self, id: NodeId) -> Option<LatpLon> {
        let offset = self.slot_offset(id)?;
        let guard = read_or_recover(&self.slots, "compact node store");
        Slot::read_from(&guard[offset..offset + Slot::LENGTH])
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut guard = write_or_recover(&self.slots, "compact node store");
        *guard = map_fresh_file(self.path.as_deref(), self.capacity)?;
        self.len.store(0, Ordering::Relaxed);
        Ok(())
    }
}

fn map_fresh_file(path: Option<&Path>, capacity: u64) -> Result<MmapMut, StoreError> {
    let file: File = match path {
        Some(p) => OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(p)
            .context(StorageIoSnafu)?,
        None => tempfile().context(StorageIoSnafu)?,
    };
    file.set_len(capacity * Slot::LENGTH as u64)
        .context(StorageIoSnafu)?;
    let mmap = unsafe { MmapOptions::new().map_mut(&file) }.context(StorageIoSnafu)?;
    Ok(mmap)
}

/// On-disk encoding of one node position.
///
/// The longitude is stored biased by `i32::MIN`, so a freshly zeroed slot decodes as absent.
/// That only excludes a longitude of exactly `i32::MIN`, which is far outside ±180º.
struct Slot;

impl Slot {
    const LENGTH: usize = 8;

    fn write_to(mut buf: impl BufMut, point: LatpLon) {
        debug_assert_ne!(point.lon, i32::MIN, "longitude outside the valid range");
        buf.put_i32(point.latp);
        buf.put_u32(((point.lon as i64) - (i32::MIN as i64)) as u32);
    }

    fn read_from(mut buf: impl Buf) -> Option<LatpLon> {
        let latp = buf.get_i32();
        let biased_lon = buf.get_u32();
        if biased_lon == 0 {
            None
        } else {
            let lon = ((biased_lon as i64) + (i32::MIN as i64)) as i32;
            Some(LatpLon { latp, lon })
        }
    }
}
