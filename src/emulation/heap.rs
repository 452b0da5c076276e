//! Managed heap of the reference runtime.
//!
//! [`ManagedHeap`] stores class instances with named fields. Objects are referenced through
//! [`HeapRef`] handles that stay valid for the lifetime of the heap; no garbage collection is
//! simulated. The heap enforces [`EmulationLimits::max_heap_objects`](crate::emulation::EmulationLimits).

use std::{collections::HashMap, fmt};

use crate::{
    emulation::{EmValue, EmulationError, HeapRef},
    Result,
};

/// A class instance on the heap.
#[derive(Debug, Clone, PartialEq)]
pub struct HeapObject {
    /// Full name of the object's type
    pub type_name: String,
    /// Field values by name
    pub fields: HashMap<String, EmValue>,
}

impl fmt::Display for HeapObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.fields.keys().collect();
        names.sort();

        write!(f, "{} {{", self.type_name)?;
        for (i, name) in names.into_iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {name} = {}", self.fields[name])?;
        }
        write!(f, " }}")
    }
}

/// Simulated managed heap.
#[derive(Debug, Default)]
pub struct ManagedHeap {
    objects: HashMap<u64, HeapObject>,
    next_id: u64,
    max_objects: usize,
}

impl ManagedHeap {
    /// Creates a heap holding at most `max_objects` objects (0 for unlimited).
    #[must_use]
    pub fn new(max_objects: usize) -> Self {
        ManagedHeap {
            objects: HashMap::new(),
            next_id: 1,
            max_objects,
        }
    }

    /// Allocates an object of `type_name` without fields.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::HeapLimitExceeded`] if the heap is full.
    pub fn alloc_object(&mut self, type_name: &str) -> Result<HeapRef> {
        self.alloc_object_with_fields(type_name, Vec::new())
    }

    /// Allocates an object of `type_name` with initial field values.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::HeapLimitExceeded`] if the heap is full.
    pub fn alloc_object_with_fields(
        &mut self,
        type_name: &str,
        fields: Vec<(&str, EmValue)>,
    ) -> Result<HeapRef> {
        if self.max_objects > 0 && self.objects.len() >= self.max_objects {
            return Err(EmulationError::HeapLimitExceeded {
                limit: self.max_objects,
            }
            .into());
        }

        let id = self.next_id.max(1);
        self.next_id = id + 1;
        self.objects.insert(
            id,
            HeapObject {
                type_name: type_name.to_string(),
                fields: fields
                    .into_iter()
                    .map(|(name, value)| (name.to_string(), value))
                    .collect(),
            },
        );
        Ok(HeapRef(id))
    }

    /// Returns the object behind `heap_ref`.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::InvalidHeapReference`] for unknown references.
    pub fn get(&self, heap_ref: HeapRef) -> Result<&HeapObject> {
        self.objects.get(&heap_ref.0).ok_or_else(|| {
            EmulationError::InvalidHeapReference {
                reference_id: heap_ref.0,
            }
            .into()
        })
    }

    /// Reads a field.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::InvalidHeapReference`] for unknown references and
    /// [`EmulationError::FieldNotFound`] if the field was never assigned.
    pub fn get_field(&self, heap_ref: HeapRef, field: &str) -> Result<EmValue> {
        let object = self.get(heap_ref)?;
        object.fields.get(field).cloned().ok_or_else(|| {
            EmulationError::FieldNotFound {
                type_name: object.type_name.clone(),
                field: field.to_string(),
            }
            .into()
        })
    }

    /// Writes a field, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::InvalidHeapReference`] for unknown references.
    pub fn set_field(&mut self, heap_ref: HeapRef, field: &str, value: EmValue) -> Result<()> {
        let object = self.objects.get_mut(&heap_ref.0).ok_or(
            EmulationError::InvalidHeapReference {
                reference_id: heap_ref.0,
            },
        )?;
        object.fields.insert(field.to_string(), value);
        Ok(())
    }

    /// Returns `true` if `heap_ref` refers to a live object.
    #[must_use]
    pub fn contains(&self, heap_ref: HeapRef) -> bool {
        self.objects.contains_key(&heap_ref.0)
    }

    /// Number of live objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}
