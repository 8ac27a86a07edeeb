//! Opaque references handed to the host.
//!
//! The host stores whatever we return from `AuthorizationPluginCreate` and
//! `MechanismCreate` and passes it back on every later call, possibly after
//! the object is gone. Handles are therefore never pointers: each one packs
//! a type tag, a generation and a slot index into a pointer-sized integer,
//! and every use goes through [`HandleRegistry::validate`].
//!
//! ```text
//!  63          32 31      16 15       0
//! +--------------+----------+----------+
//! |    magic     |generation|   slot   |
//! +--------------+----------+----------+
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use libc::c_void;

use crate::error::HandleError;

#[cfg(not(target_pointer_width = "64"))]
compile_error!("handles are packed into 64-bit pointer values");

/// Tag carried by plugin handles ('PlgN').
pub const PLUGIN_MAGIC: u32 = u32::from_be_bytes(*b"PlgN");
/// Tag carried by mechanism handles ('Mchn').
pub const MECHANISM_MAGIC: u32 = u32::from_be_bytes(*b"Mchn");

const MAX_SLOTS: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    fn new(magic: u32, generation: u16, slot: u16) -> Self {
        Handle(((magic as u64) << 32) | ((generation as u64) << 16) | slot as u64)
    }

    pub fn from_raw(raw: *mut c_void) -> Option<Self> {
        if raw.is_null() {
            None
        } else {
            Some(Handle(raw as usize as u64))
        }
    }

    /// The value handed to the host. Never dereferenced by either side.
    pub fn into_raw(self) -> *mut c_void {
        self.0 as usize as *mut c_void
    }

    pub fn magic(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn generation(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn slot(self) -> u16 {
        self.0 as u16
    }
}

struct Slot<T> {
    generation: u16,
    value: Option<Arc<T>>,
}

struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u16>,
    live: usize,
}

/// Generation-checked arena of records of one kind.
pub struct HandleRegistry<T> {
    magic: u32,
    arena: Mutex<Arena<T>>,
}

impl<T> HandleRegistry<T> {
    pub fn new(magic: u32) -> Self {
        HandleRegistry {
            magic,
            arena: Mutex::new(Arena {
                slots: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    fn arena(&self) -> MutexGuard<'_, Arena<T>> {
        // A panic while holding the lock cannot leave a slot half-written.
        self.arena.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn magic(&self) -> u32 {
        self.magic
    }

    /// Store `value` and return the handle that names it.
    pub fn insert(&self, value: Arc<T>) -> Result<Handle, HandleError> {
        let mut arena = self.arena();

        let slot = match arena.free.pop() {
            Some(slot) => slot,
            None if arena.slots.len() < MAX_SLOTS => {
                arena.slots.push(Slot {
                    generation: 1,
                    value: None,
                });
                (arena.slots.len() - 1) as u16
            }
            None => return Err(HandleError::Exhausted),
        };

        let entry = &mut arena.slots[slot as usize];
        entry.value = Some(value);
        let generation = entry.generation;
        arena.live += 1;

        Ok(Handle::new(self.magic, generation, slot))
    }

    /// Resolve a raw host reference. Fails on null, on a foreign tag and on
    /// any handle whose record has been removed.
    pub fn validate(&self, raw: *mut c_void) -> Result<Arc<T>, HandleError> {
        let handle = self.check_tag(raw)?;
        let arena = self.arena();
        match arena.slots.get(handle.slot() as usize) {
            Some(Slot {
                generation,
                value: Some(value),
            }) if *generation == handle.generation() => Ok(Arc::clone(value)),
            _ => Err(HandleError::Stale),
        }
    }

    /// Take the record out of the arena. The handle, and every copy of it the
    /// host kept, is invalid afterwards.
    pub fn remove(&self, raw: *mut c_void) -> Result<Arc<T>, HandleError> {
        let handle = self.check_tag(raw)?;
        let mut arena = self.arena();
        let slot = handle.slot();

        let entry = match arena.slots.get_mut(slot as usize) {
            Some(entry) if entry.generation == handle.generation() && entry.value.is_some() => entry,
            _ => return Err(HandleError::Stale),
        };

        let value = entry.value.take().ok_or(HandleError::Stale)?;
        entry.generation = entry.generation.wrapping_add(1).max(1);
        arena.free.push(slot);
        arena.live -= 1;
        Ok(value)
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.arena().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_tag(&self, raw: *mut c_void) -> Result<Handle, HandleError> {
        let handle = Handle::from_raw(raw).ok_or(HandleError::Null)?;
        if handle.magic() != self.magic {
            return Err(HandleError::WrongMagic {
                expected: self.magic,
                found: handle.magic(),
            });
        }
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_tags_spell_their_names() {
        assert_eq!(PLUGIN_MAGIC, 0x506C_674E);
        assert_eq!(MECHANISM_MAGIC, 0x4D63_686E);
    }

    #[test]
    fn handle_round_trips_its_fields() {
        let handle = Handle::new(MECHANISM_MAGIC, 7, 300);
        let back = Handle::from_raw(handle.into_raw()).unwrap();
        assert_eq!(back.magic(), MECHANISM_MAGIC);
        assert_eq!(back.generation(), 7);
        assert_eq!(back.slot(), 300);
    }

    #[test]
    fn validate_returns_the_stored_record() {
        let registry = HandleRegistry::new(PLUGIN_MAGIC);
        let handle = registry.insert(Arc::new(42u32)).unwrap();
        assert_eq!(*registry.validate(handle.into_raw()).unwrap(), 42);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn null_and_foreign_handles_are_rejected() {
        let plugins = HandleRegistry::new(PLUGIN_MAGIC);
        let mechanisms = HandleRegistry::<()>::new(MECHANISM_MAGIC);
        let handle = plugins.insert(Arc::new(())).unwrap();

        assert_eq!(
            mechanisms.validate(std::ptr::null_mut()).unwrap_err(),
            HandleError::Null
        );
        assert_eq!(
            mechanisms.validate(handle.into_raw()).unwrap_err(),
            HandleError::WrongMagic {
                expected: MECHANISM_MAGIC,
                found: PLUGIN_MAGIC
            }
        );
        assert!(plugins.validate(0xdead_beef_usize as *mut c_void).is_err());
    }

    #[test]
    fn removed_handles_stay_invalid_after_slot_reuse() {
        let registry = HandleRegistry::new(MECHANISM_MAGIC);
        let first = registry.insert(Arc::new("first")).unwrap();
        registry.remove(first.into_raw()).unwrap();

        assert_eq!(registry.validate(first.into_raw()).unwrap_err(), HandleError::Stale);
        assert_eq!(registry.remove(first.into_raw()).unwrap_err(), HandleError::Stale);

        let second = registry.insert(Arc::new("second")).unwrap();
        assert_eq!(second.slot(), first.slot());
        assert_ne!(second.generation(), first.generation());
        assert_eq!(registry.validate(first.into_raw()).unwrap_err(), HandleError::Stale);
        assert_eq!(*registry.validate(second.into_raw()).unwrap(), "second");
    }

    #[test]
    fn full_arena_reports_exhaustion() {
        let registry = HandleRegistry::new(MECHANISM_MAGIC);
        for _ in 0..MAX_SLOTS {
            registry.insert(Arc::new(())).unwrap();
        }
        assert_eq!(registry.insert(Arc::new(())).unwrap_err(), HandleError::Exhausted);
    }
}
