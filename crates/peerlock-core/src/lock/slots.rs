//! Reader-slot lock backend.
//!
//! A lock path owns one allocation mutex and up to `max_readers` numbered
//! slot mutexes, all named after the path.
//!
//! - Read: hold the allocation mutex just long enough to claim the first
//!   free slot. The claimed slot alone represents the read lock.
//! - Write: hold the allocation mutex for the whole lock, plus every slot
//!   that currently exists. New readers cannot claim a slot while the
//!   allocation mutex is held, and existing readers keep their slot locked.

use super::{LockMode, LockStrategy};
use crate::error::{PeerError, Result};
use crate::platform::{self, NamedMutex};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct SlotLock {
    path: PathBuf,
    max_readers: usize,
    allocation: Option<NamedMutex>,
    reader: Option<NamedMutex>,
    writer_slots: Vec<NamedMutex>,
}

impl SlotLock {
    pub fn new(path: &Path, max_readers: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            max_readers,
            allocation: None,
            reader: None,
            writer_slots: Vec::new(),
        }
    }

    pub fn max_readers(&self) -> usize {
        self.max_readers
    }

    fn slot_name(&self, idx: usize) -> String {
        platform::mutex_name(&self.path, Some(idx))
    }

    /// Claim the first slot nobody holds. Requires the allocation mutex.
    fn claim_reader_slot(&mut self) -> Result<bool> {
        for idx in 0..self.max_readers {
            let name = self.slot_name(idx);
            match NamedMutex::open(&name)? {
                Some(mut slot) => {
                    if slot.wait(false)? {
                        debug!("Claimed reader slot {} of {}", idx, self.path.display());
                        self.reader = Some(slot);
                        return Ok(true);
                    }
                }
                None => {
                    let mut slot = NamedMutex::create(&name)?;
                    if !slot.wait(false)? {
                        return Ok(false);
                    }
                    debug!("Created reader slot {} of {}", idx, self.path.display());
                    self.reader = Some(slot);
                    return Ok(true);
                }
            }
        }

        warn!("lock(): too many readers on {}", self.path.display());
        Err(PeerError::TooManyReaders {
            path: self.path.clone(),
            limit: self.max_readers,
        })
    }

    /// Open every slot that currently exists. Requires the allocation mutex.
    fn open_existing_slots(&self) -> Result<Vec<NamedMutex>> {
        let mut slots = Vec::new();
        for idx in 0..self.max_readers {
            if let Some(slot) = NamedMutex::open(&self.slot_name(idx))? {
                slots.push(slot);
            }
        }
        Ok(slots)
    }

    fn acquire_writer_slots(&mut self, block: bool) -> Result<bool> {
        let mut slots = self.open_existing_slots()?;
        if !platform::wait_all(&mut slots, block)? {
            return Ok(false);
        }
        self.writer_slots = slots;
        Ok(true)
    }
}

impl LockStrategy for SlotLock {
    fn acquire(&mut self, _file: &File, mode: LockMode, block: bool) -> Result<bool> {
        let mut allocation = match self.allocation.take() {
            Some(mutex) => mutex,
            None => NamedMutex::create(&platform::mutex_name(&self.path, None))?,
        };

        let outcome = match allocation.wait(block) {
            Ok(true) if mode == LockMode::ReadLock => {
                let claimed = self.claim_reader_slot();
                if let Err(e) = allocation.release() {
                    warn!("{}", e);
                }
                claimed
            }
            Ok(true) => {
                let taken = self.acquire_writer_slots(block);
                if !matches!(taken, Ok(true)) {
                    if let Err(e) = allocation.release() {
                        warn!("{}", e);
                    }
                }
                taken
            }
            other => other,
        };

        self.allocation = Some(allocation);
        outcome
    }

    fn release(&mut self, _file: &File, mode: LockMode) -> Result<()> {
        let mut first_err = None;

        match mode {
            LockMode::ReadLock => {
                if let Some(mut slot) = self.reader.take() {
                    if let Err(e) = slot.release() {
                        first_err.get_or_insert(e);
                    }
                }
            }
            LockMode::WriteLock => {
                for mut slot in self.writer_slots.drain(..) {
                    if let Err(e) = slot.release() {
                        first_err.get_or_insert(e);
                    }
                }
                if let Some(allocation) = self.allocation.as_mut() {
                    if let Err(e) = allocation.release() {
                        first_err.get_or_insert(e);
                    }
                }
            }
            LockMode::NoLock => {}
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
