//! Fixed-capacity object table addressed by host-assigned identifiers.
//!
//! Every configured object lives in the slot matching its object id and is
//! tagged with the schema (the configuring command) that created it, so a
//! lookup through the wrong command fails instead of aliasing another object.

use core::fmt;

use heapless::Vec;

use crate::device::Oid;

/// Name of the command that owns an object slot.
pub type Schema = &'static str;

/// Errors raised while allocating an object slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AllocationError {
    /// The object id does not fit in the table.
    Exhausted { oid: Oid, capacity: usize },
    /// The slot is already owned by a different schema.
    SchemaMismatch { oid: Oid, existing: Schema },
}

impl fmt::Display for AllocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationError::Exhausted { oid, capacity } => {
                write!(f, "oid {oid} exceeds object capacity {capacity}")
            }
            AllocationError::SchemaMismatch { oid, existing } => {
                write!(f, "oid {oid} already assigned to {existing}")
            }
        }
    }
}

/// Raised when a lookup finds no object of the requested schema.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NotFoundError {
    pub oid: Oid,
    pub schema: Schema,
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no {} object with oid {}", self.schema, self.oid)
    }
}

#[derive(Clone, Debug)]
struct Entry<T> {
    schema: Schema,
    value: T,
}

/// Registry of objects keyed by [`Oid`].
#[derive(Clone, Debug)]
pub struct ObjectRegistry<T, const CAPACITY: usize> {
    slots: Vec<Option<Entry<T>>, CAPACITY>,
}

impl<T, const CAPACITY: usize> ObjectRegistry<T, CAPACITY> {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Maximum number of objects.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        CAPACITY
    }

    /// Checks whether [`ObjectRegistry::allocate`] would succeed without touching the table.
    pub fn check(&self, oid: Oid, schema: Schema) -> Result<(), AllocationError> {
        if usize::from(oid) >= CAPACITY {
            return Err(AllocationError::Exhausted {
                oid,
                capacity: CAPACITY,
            });
        }
        match self.slots.get(usize::from(oid)) {
            Some(Some(existing)) if existing.schema != schema => {
                Err(AllocationError::SchemaMismatch {
                    oid,
                    existing: existing.schema,
                })
            }
            _ => Ok(()),
        }
    }

    /// Stores `value` in the slot for `oid`, replacing an object of the same schema.
    pub fn allocate(&mut self, oid: Oid, schema: Schema, value: T) -> Result<&mut T, AllocationError> {
        self.check(oid, schema)?;

        let index = usize::from(oid);
        while self.slots.len() <= index {
            // Length is bounded by the capacity check above.
            if self.slots.push(None).is_err() {
                return Err(AllocationError::Exhausted {
                    oid,
                    capacity: CAPACITY,
                });
            }
        }

        let entry = self.slots[index].insert(Entry { schema, value });
        Ok(&mut entry.value)
    }

    /// Looks up the object for `oid` created under `schema`.
    pub fn lookup(&self, oid: Oid, schema: Schema) -> Result<&T, NotFoundError> {
        match self.slots.get(usize::from(oid)) {
            Some(Some(entry)) if entry.schema == schema => Ok(&entry.value),
            _ => Err(NotFoundError { oid, schema }),
        }
    }

    /// Mutable variant of [`ObjectRegistry::lookup`].
    pub fn lookup_mut(&mut self, oid: Oid, schema: Schema) -> Result<&mut T, NotFoundError> {
        match self.slots.get_mut(usize::from(oid)) {
            Some(Some(entry)) if entry.schema == schema => Ok(&mut entry.value),
            _ => Err(NotFoundError { oid, schema }),
        }
    }

    /// Returns `true` when `oid` holds an object of `schema`.
    #[must_use]
    pub fn contains(&self, oid: Oid, schema: Schema) -> bool {
        self.lookup(oid, schema).is_ok()
    }

    /// Number of allocated objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns `true` when no object has been allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over objects of `schema` in object id order.
    pub fn iter_schema(&self, schema: Schema) -> impl Iterator<Item = (Oid, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(move |(index, slot)| match slot {
                Some(entry) if entry.schema == schema => {
                    Oid::try_from(index).ok().map(|oid| (oid, &entry.value))
                }
                _ => None,
            })
    }
}

impl<T, const CAPACITY: usize> Default for ObjectRegistry<T, CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADC: Schema = "config_hx711";
    const OTHER: Schema = "config_endstop";

    #[test]
    fn allocate_then_lookup() {
        let mut registry: ObjectRegistry<u32, 4> = ObjectRegistry::new();
        *registry.allocate(2, ADC, 7).expect("allocation") += 1;

        assert_eq!(registry.lookup(2, ADC), Ok(&8));
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(0, ADC));
    }

    #[test]
    fn oid_beyond_capacity_is_exhausted() {
        let mut registry: ObjectRegistry<u32, 2> = ObjectRegistry::new();
        assert_eq!(
            registry.allocate(2, ADC, 1),
            Err(AllocationError::Exhausted { oid: 2, capacity: 2 })
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn schema_mismatch_is_rejected() {
        let mut registry: ObjectRegistry<u32, 4> = ObjectRegistry::new();
        registry.allocate(1, OTHER, 1).expect("allocation");

        assert_eq!(
            registry.allocate(1, ADC, 2),
            Err(AllocationError::SchemaMismatch {
                oid: 1,
                existing: OTHER
            })
        );
        assert_eq!(
            registry.lookup(1, ADC),
            Err(NotFoundError { oid: 1, schema: ADC })
        );
        assert_eq!(registry.lookup(1, OTHER), Ok(&1));
    }

    #[test]
    fn same_schema_reallocation_replaces_object() {
        let mut registry: ObjectRegistry<u32, 4> = ObjectRegistry::new();
        registry.allocate(0, ADC, 1).expect("allocation");
        registry.allocate(0, ADC, 5).expect("reallocation");
        assert_eq!(registry.lookup(0, ADC), Ok(&5));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn iter_schema_skips_other_objects() {
        let mut registry: ObjectRegistry<u32, 8> = ObjectRegistry::new();
        registry.allocate(5, ADC, 50).expect("allocation");
        registry.allocate(1, ADC, 10).expect("allocation");
        registry.allocate(3, OTHER, 30).expect("allocation");

        let mut seen = heapless::Vec::<(Oid, u32), 8>::new();
        for (oid, value) in registry.iter_schema(ADC) {
            seen.push((oid, *value)).expect("capacity");
        }
        assert_eq!(seen.as_slice(), &[(1, 10), (5, 50)]);
    }
}
