//! In-memory configuration store

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uwb_ctl::{ConfigBlocks, ConfigStore, CtlError};

#[derive(Debug, Default)]
struct Slot {
    blocks: Option<ConfigBlocks>,
    saves: u32,
    fail: bool,
}

/// Store that keeps the last saved blocks in memory
///
/// Clones share the same slot, so a test can keep one and hand the other
/// to the context.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Slot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that already holds `blocks`
    pub fn with_blocks(blocks: ConfigBlocks) -> Self {
        let store = Self::new();
        store.slot().blocks = Some(blocks);
        store
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn blocks(&self) -> Option<ConfigBlocks> {
        self.slot().blocks.clone()
    }

    /// Successful saves so far
    pub fn saves(&self) -> u32 {
        self.slot().saves
    }

    /// Make every following save fail
    pub fn set_fail(&self, fail: bool) {
        self.slot().fail = fail;
    }
}

impl ConfigStore for MemoryStore {
    fn load(&mut self) -> Result<Option<ConfigBlocks>, CtlError> {
        Ok(self.blocks())
    }

    fn save(&mut self, blocks: &ConfigBlocks) -> Result<(), CtlError> {
        let mut slot = self.slot();
        if slot.fail {
            return Err(CtlError::Storage("simulated flash write failure".into()));
        }
        slot.blocks = Some(blocks.clone());
        slot.saves += 1;
        Ok(())
    }
}
