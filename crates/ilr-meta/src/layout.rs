//! Runtime object and class layout constants.

/// Offsets of the runtime structures the compiled code touches directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeLayout {
    pub pointer_size: u8,
    /// Size of the object header (class pointer + monitor).
    pub object_header_size: i64,
    /// Offset of the length field of a single-dimensional array.
    pub array_length_offset: i64,
    /// Offset of the first array element.
    pub array_data_offset: i64,
    /// Offset of the static field block pointer inside a class.
    pub class_static_fields_offset: i64,
    /// Offset of the first virtual table entry inside a class.
    pub class_vtable_offset: i64,
    /// Bytes per virtual table entry (method pointer + method info).
    pub vtable_entry_size: i64,
}

impl RuntimeLayout {
    /// Default layout for the given pointer size (4 or 8).
    #[must_use]
    pub const fn for_pointer_size(pointer_size: u8) -> Self {
        if pointer_size == 4 {
            Self {
                pointer_size,
                object_header_size: 0x8,
                array_length_offset: 0xC,
                array_data_offset: 0x10,
                class_static_fields_offset: 0x5C,
                class_vtable_offset: 0xC8,
                vtable_entry_size: 0x8,
            }
        } else {
            Self {
                pointer_size,
                object_header_size: 0x10,
                array_length_offset: 0x18,
                array_data_offset: 0x20,
                class_static_fields_offset: 0xB8,
                class_vtable_offset: 0x128,
                vtable_entry_size: 0x10,
            }
        }
    }

    #[must_use]
    pub const fn with_vtable_offset(mut self, offset: i64) -> Self {
        self.class_vtable_offset = offset;
        self
    }

    #[must_use]
    pub const fn with_static_fields_offset(mut self, offset: i64) -> Self {
        self.class_static_fields_offset = offset;
        self
    }

    /// Virtual table slot addressed by a displacement from a class pointer.
    ///
    /// Both halves of an entry (method pointer and method info) map to the
    /// same slot.
    #[must_use]
    pub const fn vtable_slot(&self, displacement: i64) -> Option<u16> {
        if displacement < self.class_vtable_offset || self.vtable_entry_size <= 0 {
            return None;
        }
        let slot = (displacement - self.class_vtable_offset) / self.vtable_entry_size;
        if slot > u16::MAX as i64 {
            return None;
        }
        Some(slot as u16)
    }

    /// Element index addressed by a displacement from an array pointer.
    #[must_use]
    pub const fn array_index(&self, displacement: i64, element_size: i64) -> Option<i64> {
        let rel = displacement - self.array_data_offset;
        if rel < 0 || element_size <= 0 || rel % element_size != 0 {
            return None;
        }
        Some(rel / element_size)
    }
}

impl Default for RuntimeLayout {
    fn default() -> Self {
        Self::for_pointer_size(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vtable_slot() {
        let layout = RuntimeLayout::for_pointer_size(8);
        assert_eq!(layout.vtable_slot(0x128), Some(0));
        assert_eq!(layout.vtable_slot(0x130), Some(0));
        assert_eq!(layout.vtable_slot(0x148), Some(2));
        assert_eq!(layout.vtable_slot(0x40), None);
    }

    #[test]
    fn test_array_index() {
        let layout = RuntimeLayout::for_pointer_size(8);
        assert_eq!(layout.array_index(0x20, 4), Some(0));
        assert_eq!(layout.array_index(0x2C, 4), Some(3));
        assert_eq!(layout.array_index(0x2D, 4), None);
        assert_eq!(layout.array_index(0x18, 4), None);

        let small = RuntimeLayout::for_pointer_size(4);
        assert_eq!(small.array_index(0x18, 4), Some(2));
    }
}
