//! Branch contexts: the objects currently open along the active document path.
//!
//! Two stores are provided. [`TypeMapBranch`] keeps at most one live object per
//! concrete type and refuses a second insertion, which catches rule trees that
//! forget to remove an object before a sibling element inserts the same type
//! again. [`ListBranch`] allows several objects of one type to be live at once
//! and resolves lookups most-recent-first.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::BranchError;

/// Predicate over a stored object.
pub type AnyPredicate<'a> = &'a dyn Fn(&dyn Any) -> bool;

/// Scoped object storage consulted by hooks and mapping units.
pub trait BranchContext {
    /// Borrow the live object of exactly type `T`.
    fn get<T: Any>(&self) -> Option<&T>;

    /// Mutably borrow the live object of exactly type `T`.
    fn get_mut<T: Any>(&mut self) -> Option<&mut T>;

    /// First stored object accepted by `predicate`.
    fn find(&self, predicate: AnyPredicate<'_>) -> Option<&dyn Any>;

    /// Mutable variant of [`BranchContext::find`].
    fn find_mut(&mut self, predicate: AnyPredicate<'_>) -> Option<&mut dyn Any>;

    /// Remove and return the live object of type `T`.
    fn remove<T: Any>(&mut self) -> Option<T>;

    /// Remove and return the object [`BranchContext::find`] would return.
    fn remove_where(&mut self, predicate: AnyPredicate<'_>) -> Option<Box<dyn Any>>;

    /// Store `value` under its own type.
    fn insert<T: Any>(&mut self, value: T) -> Result<(), BranchError>;

    /// Store an already boxed object under its runtime type.
    fn insert_boxed(&mut self, value: Box<dyn Any>) -> Result<(), BranchError>;

    /// Number of live objects.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First object of type `T` accepted by `predicate`.
    fn get_matching<T, P>(&self, predicate: P) -> Option<&T>
    where
        T: Any,
        P: Fn(&T) -> bool,
    {
        self.find(&|candidate| candidate.downcast_ref::<T>().is_some_and(&predicate))
            .and_then(|found| found.downcast_ref::<T>())
    }

    /// Mutable variant of [`BranchContext::get_matching`].
    fn get_matching_mut<T, P>(&mut self, predicate: P) -> Option<&mut T>
    where
        T: Any,
        P: Fn(&T) -> bool,
    {
        self.find_mut(&|candidate| candidate.downcast_ref::<T>().is_some_and(&predicate))
            .and_then(|found| found.downcast_mut::<T>())
    }

    /// Remove the first object of type `T` accepted by `predicate`.
    fn remove_matching<T, P>(&mut self, predicate: P) -> Option<T>
    where
        T: Any,
        P: Fn(&T) -> bool,
    {
        self.remove_where(&|candidate| candidate.downcast_ref::<T>().is_some_and(&predicate))
            .and_then(|found| found.downcast::<T>().ok())
            .map(|found| *found)
    }
}

const BOXED_TYPE_NAME: &str = "<boxed value>";

struct Entry {
    type_name: &'static str,
    value: Box<dyn Any>,
}

/// Branch context holding at most one live object per concrete type.
#[derive(Default)]
pub struct TypeMapBranch {
    entries: HashMap<TypeId, Entry>,
}

impl TypeMapBranch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context pre-seeded with one object, typically an existing result graph
    /// that a document should extend.
    pub fn with<T: Any>(value: T) -> Self {
        let mut branch = Self::new();
        branch.entries.insert(
            TypeId::of::<T>(),
            Entry {
                type_name: type_name::<T>(),
                value: Box::new(value),
            },
        );
        branch
    }

    /// Whether an object of type `T` is live.
    pub fn contains<T: Any>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    fn bind(&mut self, id: TypeId, entry: Entry) -> Result<(), BranchError> {
        if let Some(existing) = self.entries.get(&id) {
            // A boxed insert only knows the runtime type id; name the live entry instead.
            let type_name = if entry.type_name == BOXED_TYPE_NAME {
                existing.type_name
            } else {
                entry.type_name
            };
            return Err(BranchError::DuplicateBinding { type_name });
        }
        debug!(kind = entry.type_name, "push object onto branch");
        self.entries.insert(id, entry);
        Ok(())
    }
}

impl std::fmt::Debug for TypeMapBranch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set()
            .entries(self.entries.values().map(|entry| entry.type_name))
            .finish()
    }
}

impl BranchContext for TypeMapBranch {
    fn get<T: Any>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value.downcast_ref::<T>())
    }

    fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.entries
            .get_mut(&TypeId::of::<T>())
            .and_then(|entry| entry.value.downcast_mut::<T>())
    }

    fn find(&self, predicate: AnyPredicate<'_>) -> Option<&dyn Any> {
        self.entries
            .values()
            .map(|entry| &*entry.value)
            .find(|value| predicate(*value))
    }

    fn find_mut(&mut self, predicate: AnyPredicate<'_>) -> Option<&mut dyn Any> {
        for entry in self.entries.values_mut() {
            if predicate(&*entry.value) {
                return Some(&mut *entry.value);
            }
        }
        None
    }

    fn remove<T: Any>(&mut self) -> Option<T> {
        match self.entries.remove(&TypeId::of::<T>()) {
            Some(entry) => {
                debug!(kind = entry.type_name, "pop object from branch");
                entry.value.downcast::<T>().ok().map(|value| *value)
            }
            None => {
                warn!(
                    kind = type_name::<T>(),
                    "object did not exist on the branch during remove"
                );
                None
            }
        }
    }

    fn remove_where(&mut self, predicate: AnyPredicate<'_>) -> Option<Box<dyn Any>> {
        let key = self
            .entries
            .iter()
            .find(|(_, entry)| predicate(&*entry.value))
            .map(|(key, _)| *key);
        match key.and_then(|key| self.entries.remove(&key)) {
            Some(entry) => {
                debug!(kind = entry.type_name, "pop object from branch by predicate");
                Some(entry.value)
            }
            None => {
                warn!("object did not exist on the branch during remove by predicate");
                None
            }
        }
    }

    fn insert<T: Any>(&mut self, value: T) -> Result<(), BranchError> {
        self.bind(
            TypeId::of::<T>(),
            Entry {
                type_name: type_name::<T>(),
                value: Box::new(value),
            },
        )
    }

    fn insert_boxed(&mut self, value: Box<dyn Any>) -> Result<(), BranchError> {
        let id = (*value).type_id();
        self.bind(
            id,
            Entry {
                type_name: BOXED_TYPE_NAME,
                value,
            },
        )
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Branch context allowing several live objects of one type; lookups scan from
/// the most recently inserted object backwards.
#[derive(Default)]
pub struct ListBranch {
    objects: Vec<Box<dyn Any>>,
}

impl ListBranch {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, predicate: AnyPredicate<'_>) -> Option<usize> {
        self.objects
            .iter()
            .rposition(|object| predicate(&**object))
    }
}

impl std::fmt::Debug for ListBranch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListBranch")
            .field("len", &self.objects.len())
            .finish()
    }
}

impl BranchContext for ListBranch {
    fn get<T: Any>(&self) -> Option<&T> {
        self.objects
            .iter()
            .rev()
            .find_map(|object| object.downcast_ref::<T>())
    }

    fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.objects
            .iter_mut()
            .rev()
            .find_map(|object| object.downcast_mut::<T>())
    }

    fn find(&self, predicate: AnyPredicate<'_>) -> Option<&dyn Any> {
        self.position(predicate)
            .map(|index| &*self.objects[index])
    }

    fn find_mut(&mut self, predicate: AnyPredicate<'_>) -> Option<&mut dyn Any> {
        let index = self.position(predicate)?;
        Some(&mut *self.objects[index])
    }

    fn remove<T: Any>(&mut self) -> Option<T> {
        self.remove_where(&|object| object.is::<T>())
            .and_then(|object| object.downcast::<T>().ok())
            .map(|object| *object)
    }

    fn remove_where(&mut self, predicate: AnyPredicate<'_>) -> Option<Box<dyn Any>> {
        match self.position(predicate) {
            Some(index) => {
                debug!(index, "pop object from branch by predicate");
                Some(self.objects.remove(index))
            }
            None => {
                warn!("object did not exist on the branch during remove by predicate");
                None
            }
        }
    }

    fn insert<T: Any>(&mut self, value: T) -> Result<(), BranchError> {
        self.insert_boxed(Box::new(value))
    }

    fn insert_boxed(&mut self, value: Box<dyn Any>) -> Result<(), BranchError> {
        debug!(depth = self.objects.len(), "push object onto branch");
        self.objects.push(value);
        Ok(())
    }

    fn len(&self) -> usize {
        self.objects.len()
    }
}
