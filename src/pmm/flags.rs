bitflags::bitflags! {
    /// Request modifiers accepted by [`PhysicalMemoryManager::alloc`].
    ///
    /// Only `ZERO` changes behaviour; the rest are carried through to the
    /// trace log so callers can tag requests.
    ///
    /// [`PhysicalMemoryManager::alloc`]: super::PhysicalMemoryManager::alloc
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AllocFlags: u32 {
        /// Fill the returned bytes with zeroes.
        const ZERO   = 1 << 0;
        const ATOMIC = 1 << 1;
        const DMA    = 1 << 2;
        const HIGH   = 1 << 3;
        const KERNEL = 1 << 4;
    }
}
