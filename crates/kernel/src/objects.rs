use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use worldsim_common::ObjectId;

/// A simulation object addressable by its [`ObjectId`].
///
/// Objects are owned by an [`ObjectManager`]; create them with
/// [`ObjectManager::allocate`] or [`ObjectManager::emplace`] and destroy them
/// with [`ObjectManager::kill`].
pub trait Object: Any + Send + Sync + fmt::Debug {
    fn object_id(&self) -> ObjectId;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Errors reported when storing objects at caller-chosen IDs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectError {
    #[error("the null object id cannot hold an object")]
    NullId,
    #[error("object id {0} is already in use")]
    IdInUse(ObjectId),
}

/// Number of slots per chunk of the object table.
pub const CHUNK_SIZE: usize = 4096;

type Slot = Option<Box<dyn Object>>;

/// A contiguous run of unused IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRegion {
    pub first: u64,
    /// Never 0 while the region is part of a free list.
    pub count: u64,
}

impl IdRegion {
    /// One past the last ID of the region.
    fn end(&self) -> u64 {
        self.first + self.count
    }
}

/// Owns all simulation objects and hands out their IDs.
///
/// Storage is a sparse map of fixed-size chunks keyed by `(id - 1) /
/// CHUNK_SIZE`. A chunk is created the first time one of its IDs holds an
/// object, so far-apart caller-chosen IDs cost one chunk each. Unused IDs are tracked as a sorted list
/// of disjoint, non-adjacent [`IdRegion`]s; allocation always takes the lowest
/// free ID.
///
/// The manager is not thread-safe; the server only touches it from the
/// simulation thread while holding the interframe lock.
pub struct ObjectManager {
    chunks: BTreeMap<u64, Box<[Slot]>>,
    free_list: Vec<IdRegion>,
    live: usize,
}

impl ObjectManager {
    pub fn new() -> Self {
        Self {
            chunks: BTreeMap::new(),
            free_list: vec![IdRegion {
                first: 1,
                count: u64::MAX - 1,
            }],
            live: 0,
        }
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// The current free list, sorted by `first`.
    pub fn free_list(&self) -> &[IdRegion] {
        &self.free_list
    }

    /// Total number of free IDs.
    pub fn free_count(&self) -> u64 {
        self.free_list.iter().map(|r| r.count).sum()
    }

    /// Whether `id` is currently in the free list.
    pub fn is_free(&self, id: ObjectId) -> bool {
        let idx = self.free_list.partition_point(|r| r.first <= id.0);
        idx > 0 && id.0 < self.free_list[idx - 1].end()
    }

    /// Take the lowest unused ID out of the free list.
    ///
    /// # Panics
    ///
    /// Panics if the ID space is exhausted. With 64 bit IDs memory runs out
    /// long before that, so reaching it means the free list was corrupted.
    pub fn allocate_object_id(&mut self) -> ObjectId {
        let Some(first) = self.free_list.first_mut() else {
            panic!("object id space exhausted");
        };
        let id = first.first;
        first.first += 1;
        first.count -= 1;
        if first.count == 0 {
            self.free_list.remove(0);
        }
        ObjectId(id)
    }

    /// Return `id` to the free list, merging it with adjacent regions.
    ///
    /// Releasing the null ID or an ID which is already free is a no-op.
    pub fn release_object_id(&mut self, id: ObjectId) {
        if id.is_null() || id.0 == u64::MAX {
            return;
        }
        let id = id.0;
        // index of the first region starting above id
        let idx = self.free_list.partition_point(|r| r.first <= id);

        let joins_prev = if idx > 0 {
            let prev = &self.free_list[idx - 1];
            if id < prev.end() {
                tracing::warn!(id, "released object id which is already free");
                return;
            }
            prev.end() == id
        } else {
            false
        };
        let joins_next = self
            .free_list
            .get(idx)
            .is_some_and(|next| next.first == id + 1);

        match (joins_prev, joins_next) {
            (true, true) => {
                let next = self.free_list.remove(idx);
                self.free_list[idx - 1].count += 1 + next.count;
            }
            (true, false) => {
                self.free_list[idx - 1].count += 1;
            }
            (false, true) => {
                let next = &mut self.free_list[idx];
                next.first = id;
                next.count += 1;
            }
            (false, false) => {
                self.free_list.insert(idx, IdRegion { first: id, count: 1 });
            }
        }
    }

    /// Remove a specific `id` from the free list, splitting its region.
    fn reserve_object_id(&mut self, id: ObjectId) -> Result<(), ObjectError> {
        if id.is_null() {
            return Err(ObjectError::NullId);
        }
        let raw = id.0;
        let idx = self.free_list.partition_point(|r| r.first <= raw);
        if idx == 0 || raw >= self.free_list[idx - 1].end() {
            return Err(ObjectError::IdInUse(id));
        }
        let idx = idx - 1;
        let region = self.free_list[idx];

        if region.first == raw {
            let region = &mut self.free_list[idx];
            region.first += 1;
            region.count -= 1;
            if region.count == 0 {
                self.free_list.remove(idx);
            }
        } else if region.end() - 1 == raw {
            self.free_list[idx].count -= 1;
        } else {
            // keep the upper part in place and insert the lower part before it
            let lower = IdRegion {
                first: region.first,
                count: raw - region.first,
            };
            self.free_list[idx] = IdRegion {
                first: raw + 1,
                count: region.end() - (raw + 1),
            };
            self.free_list.insert(idx, lower);
        }
        Ok(())
    }

    fn slot_index(id: ObjectId) -> Option<(u64, usize)> {
        if id.is_null() {
            return None;
        }
        let offset = id.0 - 1;
        let chunk_size = CHUNK_SIZE as u64;
        Some((offset / chunk_size, (offset % chunk_size) as usize))
    }

    fn slot(&self, id: ObjectId) -> Option<&Slot> {
        let (chunk, index) = Self::slot_index(id)?;
        self.chunks.get(&chunk).map(|c| &c[index])
    }

    fn slot_mut(&mut self, id: ObjectId) -> Option<&mut Slot> {
        let (chunk, index) = Self::slot_index(id)?;
        self.chunks.get_mut(&chunk).map(|c| &mut c[index])
    }

    /// Slot for `id`, creating its chunk if needed. `None` for the null ID.
    fn require_slot(&mut self, id: ObjectId) -> Option<&mut Slot> {
        let (chunk, index) = Self::slot_index(id)?;
        let chunk = self
            .chunks
            .entry(chunk)
            .or_insert_with(|| std::iter::repeat_with(|| None).take(CHUNK_SIZE).collect());
        Some(&mut chunk[index])
    }

    /// The object stored at `id`, if any.
    pub fn get_base(&self, id: ObjectId) -> Option<&dyn Object> {
        self.slot(id)?.as_deref()
    }

    pub fn get_base_mut(&mut self, id: ObjectId) -> Option<&mut (dyn Object + 'static)> {
        self.slot_mut(id)?.as_deref_mut()
    }

    /// The object stored at `id` if it is a `T`.
    pub fn get_safe<T: Object>(&self, id: ObjectId) -> Option<&T> {
        self.get_base(id)?.as_any().downcast_ref::<T>()
    }

    pub fn get_safe_mut<T: Object>(&mut self, id: ObjectId) -> Option<&mut T> {
        self.get_base_mut(id)?.as_any_mut().downcast_mut::<T>()
    }

    /// Store `obj` at the slot of its own ID, replacing whatever was there.
    ///
    /// The ID must have been taken out of the free list beforehand.
    pub fn set_object(&mut self, obj: Box<dyn Object>) -> Result<(), ObjectError> {
        let id = obj.object_id();
        let occupied = self.get_base(id).is_some();
        let slot = self.require_slot(id).ok_or(ObjectError::NullId)?;
        *slot = Some(obj);
        if !occupied {
            self.live += 1;
        }
        Ok(())
    }

    fn store<T: Object>(&mut self, id: ObjectId, obj: T) -> &mut T {
        if self.get_base(id).is_none() {
            self.live += 1;
        }
        let Some(slot) = self.require_slot(id) else {
            unreachable!("stored objects never have the null id");
        };
        match slot.insert(Box::new(obj)).as_any_mut().downcast_mut::<T>() {
            Some(obj) => obj,
            None => unreachable!("object stored at {id} has a different type"),
        }
    }

    /// Allocate an ID, construct an object with it and store it.
    pub fn allocate<T, F>(&mut self, make: F) -> &mut T
    where
        T: Object,
        F: FnOnce(ObjectId) -> T,
    {
        let id = self.allocate_object_id();
        self.store(id, make(id))
    }

    /// Construct an object for the caller-chosen `id`, which must be free.
    ///
    /// Passing the null ID behaves like [`ObjectManager::allocate`].
    pub fn emplace<T, F>(&mut self, id: ObjectId, make: F) -> Result<&mut T, ObjectError>
    where
        T: Object,
        F: FnOnce(ObjectId) -> T,
    {
        if id.is_null() {
            return Ok(self.allocate(make));
        }
        self.reserve_object_id(id)?;
        Ok(self.store(id, make(id)))
    }

    /// Destroy the object at `id` and release the ID.
    ///
    /// Returns false without touching anything if no object lives at `id`.
    pub fn kill(&mut self, id: ObjectId) -> bool {
        let Some(slot) = self.slot_mut(id) else {
            return false;
        };
        if slot.take().is_none() {
            return false;
        }
        self.live -= 1;
        self.release_object_id(id);
        true
    }

    /// IDs of all live objects, ascending.
    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.chunks
            .values()
            .flat_map(|chunk| chunk.iter())
            .filter_map(|slot| slot.as_ref().map(|obj| obj.object_id()))
    }
}

impl Default for ObjectManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectManager")
            .field("chunks", &self.chunks.len())
            .field("live", &self.live)
            .field("free_regions", &self.free_list.len())
            .finish()
    }
}

/// Dumps the free list, one region per line.
impl fmt::Display for ObjectManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, region) in self.free_list.iter().enumerate() {
            writeln!(
                f,
                "entry {i:>3}  first = {:#018x}  count = {:#018x}",
                region.first, region.count
            )?;
        }
        Ok(())
    }
}

/// Implements [`Object`] for a struct with an `id: ObjectId` field.
#[macro_export]
macro_rules! impl_object {
    ($ty:ty) => {
        impl $crate::objects::Object for $ty {
            fn object_id(&self) -> ::worldsim_common::ObjectId {
                self.id
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }
        }
    };
}
