//! The back end: storage assignment and instruction lowering.

use crate::compile::CompilationError;

pub mod a64;
pub mod abs_stack;
pub mod reg_alloc;

/// A trait that defines access to a lowered trace.
pub trait CodeGenOutput {
    /// Disassemble the lowered trace into a string.
    fn disassemble(&self) -> String;

    /// The length of the lowered instruction sequence.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// All trace lowerers conform to this contract.
pub trait CodeGen {
    /// Perform lowering.
    fn codegen(self) -> Result<Box<dyn CodeGenOutput>, CompilationError>;
}
