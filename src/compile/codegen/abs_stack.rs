//! The abstract stack.

/// This data structure keeps track of an abstract stack pointer for a
/// compilation unit's frame during storage assignment. The abstract stack
/// pointer is zero-based, so the stack pointer value also serves as the
/// size of the stack.
///
/// The implementation is platform agnostic: as the abstract stack gets
/// bigger, the abstract stack pointer grows upwards, even on architectures
/// where the stack grows downwards.
#[derive(Debug, Default)]
pub struct AbstractStack(usize);

impl AbstractStack {
    /// Aligns the abstract stack pointer to the specified number of bytes.
    ///
    /// Returns the newly aligned stack pointer.
    pub fn align(&mut self, to: usize) -> usize {
        let rem = self.0 % to;
        if rem != 0 {
            self.0 += to - rem;
        }
        self.0
    }

    /// Makes the stack bigger by `nbytes` bytes.
    ///
    /// Returns the new stack pointer.
    pub fn grow(&mut self, nbytes: usize) -> usize {
        self.0 += nbytes;
        self.0
    }

    /// Returns the stack pointer value.
    pub fn size(&self) -> usize {
        self.0
    }
}
