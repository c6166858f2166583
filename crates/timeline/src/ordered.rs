//! Sorted-by-key storage with binary search and change notification.
//!
//! Used both for key frames (unique frame numbers) and for segments
//! (ordered by track then start frame, duplicates allowed).

use std::fmt::Debug;
use std::ops::Index;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::TimelineError;

pub trait Keyed {
    type Key: Ord + Copy + Debug;

    /// Whether two items may share a key.
    const UNIQUE: bool;

    fn key(&self) -> Self::Key;
}

/// Incremental change emitted to subscribers after every mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionChange<T> {
    Added { index: usize, item: T },
    Removed { index: usize, item: T },
    Replaced { index: usize, old: T, new: T },
    Moved { from: usize, to: usize, item: T },
    Reset,
}

#[derive(Debug)]
pub struct OrderedCollection<T> {
    items: Vec<T>,
    observers: Vec<Sender<CollectionChange<T>>>,
}

impl<T: Keyed + Clone> OrderedCollection<T> {
    pub fn new() -> Self { Self { items: Vec::new(), observers: Vec::new() } }

    /// Sorts `items` by key; fails on a repeated key when keys are unique.
    pub fn from_items(mut items: Vec<T>) -> Result<Self, TimelineError> {
        items.sort_by_key(|it| it.key());
        if T::UNIQUE {
            if let Some(pair) = items.windows(2).find(|w| w[0].key() == w[1].key()) {
                return Err(TimelineError::DuplicateKey(format!("{:?}", pair[1].key())));
            }
        }
        Ok(Self { items, observers: Vec::new() })
    }

    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn get(&self, index: usize) -> Option<&T> { self.items.get(index) }
    pub fn first(&self) -> Option<&T> { self.items.first() }
    pub fn last(&self) -> Option<&T> { self.items.last() }
    pub fn iter(&self) -> std::slice::Iter<'_, T> { self.items.iter() }
    pub fn as_slice(&self) -> &[T] { &self.items }

    /// `Ok(index)` of the first item with `key`, otherwise `Err` with the
    /// index of the first item whose key is greater (or `len()`).
    pub fn binary_search(&self, key: &T::Key) -> Result<usize, usize> {
        let i = self.lower_bound(key);
        match self.items.get(i) {
            Some(item) if item.key() == *key => Ok(i),
            _ => Err(i),
        }
    }

    /// Same search, with a miss encoded as the bitwise complement of the
    /// insertion point.
    pub fn search_index(&self, key: &T::Key) -> isize {
        match self.binary_search(key) {
            Ok(i) => i as isize,
            Err(i) => !(i as isize),
        }
    }

    /// Index of the first item whose key is not less than `key`.
    pub fn lower_bound(&self, key: &T::Key) -> usize {
        self.items.partition_point(|it| it.key() < *key)
    }

    pub fn position<P>(&self, pred: P) -> Option<usize>
    where
        P: FnMut(&T) -> bool,
    {
        self.items.iter().position(pred)
    }

    pub fn insert(&mut self, item: T) -> Result<usize, TimelineError> {
        let key = item.key();
        let index = if T::UNIQUE {
            match self.binary_search(&key) {
                Ok(_) => return Err(TimelineError::DuplicateKey(format!("{key:?}"))),
                Err(i) => i,
            }
        } else {
            self.items.partition_point(|it| it.key() <= key)
        };
        self.items.insert(index, item.clone());
        self.notify(CollectionChange::Added { index, item });
        Ok(index)
    }

    pub fn remove_at(&mut self, index: usize) -> Result<T, TimelineError> {
        self.check_index(index)?;
        let item = self.items.remove(index);
        self.notify(CollectionChange::Removed { index, item: item.clone() });
        Ok(item)
    }

    pub fn remove_key(&mut self, key: &T::Key) -> Result<T, TimelineError> {
        match self.binary_search(key) {
            Ok(i) => self.remove_at(i),
            Err(_) => Err(TimelineError::NotFound(format!("{key:?}"))),
        }
    }

    /// Swaps in `item` at `index`; its key must keep the collection sorted.
    pub fn replace(&mut self, index: usize, item: T) -> Result<T, TimelineError> {
        self.check_index(index)?;
        let key = item.key();
        let fits_prev = index == 0 || self.fits_after(self.items[index - 1].key(), key);
        let fits_next = index + 1 >= self.items.len() || self.fits_after(key, self.items[index + 1].key());
        if !(fits_prev && fits_next) {
            return Err(TimelineError::OrderViolation(index));
        }
        let old = std::mem::replace(&mut self.items[index], item.clone());
        self.notify(CollectionChange::Replaced { index, old: old.clone(), new: item });
        Ok(old)
    }

    /// Reorders within a run of equal keys. Any other move breaks ordering.
    pub fn move_item(&mut self, from: usize, to: usize) -> Result<(), TimelineError> {
        self.check_index(from)?;
        self.check_index(to)?;
        if from == to {
            return Ok(());
        }
        let key = self.items[from].key();
        let span = if from < to { &self.items[from + 1..=to] } else { &self.items[to..from] };
        if span.iter().any(|it| it.key() != key) {
            return Err(TimelineError::OrderViolation(from));
        }
        let item = self.items.remove(from);
        self.items.insert(to, item.clone());
        self.notify(CollectionChange::Moved { from, to, item });
        Ok(())
    }

    /// Mutates the item at `index` and re-sorts it. Returns its new index.
    /// A unique-key clash leaves the collection untouched.
    pub fn update<F>(&mut self, index: usize, f: F) -> Result<usize, TimelineError>
    where
        F: FnOnce(&mut T),
    {
        self.try_update(index, |item| {
            f(item);
            Ok(())
        })
    }

    /// Edits a copy of the item at `index` and commits it only when `f`
    /// succeeds; a failed edit changes nothing and notifies nobody.
    pub fn try_update<F>(&mut self, index: usize, f: F) -> Result<usize, TimelineError>
    where
        F: FnOnce(&mut T) -> Result<(), TimelineError>,
    {
        self.check_index(index)?;
        let mut item = self.items[index].clone();
        f(&mut item)?;
        let old = self.items.remove(index);
        let key = item.key();
        let to = if T::UNIQUE {
            match self.binary_search(&key) {
                Ok(_) => {
                    self.items.insert(index, old);
                    return Err(TimelineError::DuplicateKey(format!("{key:?}")));
                }
                Err(i) => i,
            }
        } else {
            self.items.partition_point(|it| it.key() <= key)
        };
        self.items.insert(to, item.clone());
        self.notify(CollectionChange::Replaced { index, old, new: item.clone() });
        if to != index {
            self.notify(CollectionChange::Moved { from: index, to, item });
        }
        Ok(to)
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.notify(CollectionChange::Reset);
    }

    /// Receiver for every subsequent change. Dropped receivers are pruned
    /// on the next notification.
    pub fn subscribe(&mut self) -> Receiver<CollectionChange<T>> {
        let (tx, rx) = unbounded();
        self.observers.push(tx);
        rx
    }

    pub fn into_vec(self) -> Vec<T> { self.items }

    fn fits_after(&self, before: T::Key, after: T::Key) -> bool {
        if T::UNIQUE { before < after } else { before <= after }
    }

    fn check_index(&self, index: usize) -> Result<(), TimelineError> {
        if index >= self.items.len() {
            return Err(TimelineError::IndexOutOfRange { index, len: self.items.len() });
        }
        Ok(())
    }

    fn notify(&mut self, change: CollectionChange<T>) {
        if self.observers.is_empty() {
            return;
        }
        self.observers.retain(|tx| tx.send(change.clone()).is_ok());
    }
}

impl<T: Keyed + Clone> Default for OrderedCollection<T> {
    fn default() -> Self { Self::new() }
}

// Subscriptions stay with the source instance.
impl<T: Clone> Clone for OrderedCollection<T> {
    fn clone(&self) -> Self { Self { items: self.items.clone(), observers: Vec::new() } }
}

impl<T: PartialEq> PartialEq for OrderedCollection<T> {
    fn eq(&self, other: &Self) -> bool { self.items == other.items }
}

impl<T> Index<usize> for OrderedCollection<T> {
    type Output = T;
    fn index(&self, index: usize) -> &T { &self.items[index] }
}

impl<'a, T> IntoIterator for &'a OrderedCollection<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;
    fn into_iter(self) -> Self::IntoIter { self.items.iter() }
}

impl<T: Serialize> Serialize for OrderedCollection<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.items.serialize(serializer)
    }
}

impl<'de, T: Keyed + Clone + Deserialize<'de>> Deserialize<'de> for OrderedCollection<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let items = Vec::<T>::deserialize(deserializer)?;
        Self::from_items(items).map_err(serde::de::Error::custom)
    }
}
