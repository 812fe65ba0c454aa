//! Size classes served by the slab allocator.

/// Size classes for slab allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum SizeClass {
    Bytes16 = 16,
    Bytes32 = 32,
    Bytes64 = 64,
    Bytes128 = 128,
    Bytes256 = 256,
    Bytes512 = 512,
}

impl SizeClass {
    pub const COUNT: usize = 6;
    pub const MAX_OBJ_SIZE: usize = crate::SLAB_MAX_SIZE;

    pub const ALL: [SizeClass; Self::COUNT] = [
        SizeClass::Bytes16,
        SizeClass::Bytes32,
        SizeClass::Bytes64,
        SizeClass::Bytes128,
        SizeClass::Bytes256,
        SizeClass::Bytes512,
    ];

    /// Smallest class that holds `size` bytes
    pub fn for_size(size: usize) -> Option<Self> {
        Some(match size {
            0 => return None,
            1..=16 => SizeClass::Bytes16,
            17..=32 => SizeClass::Bytes32,
            33..=64 => SizeClass::Bytes64,
            65..=128 => SizeClass::Bytes128,
            129..=256 => SizeClass::Bytes256,
            257..=512 => SizeClass::Bytes512,
            _ => return None,
        })
    }

    pub fn size(&self) -> usize {
        *self as usize
    }

    pub fn to_index(&self) -> usize {
        match self {
            SizeClass::Bytes16 => 0,
            SizeClass::Bytes32 => 1,
            SizeClass::Bytes64 => 2,
            SizeClass::Bytes128 => 3,
            SizeClass::Bytes256 => 4,
            SizeClass::Bytes512 => 5,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Objects carved from one page of `page_size` bytes
    pub fn objects_per_page(&self, page_size: usize) -> usize {
        page_size / self.size()
    }
}
