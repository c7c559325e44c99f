//! The backend lowers the IR to 32-bit x86 assembly in two steps: a
//! per-block linear-scan register allocation over the three general-purpose
//! registers, then AT&T-syntax emission threading the allocation map and the
//! stack-frame layout through a fixed calling convention.

pub mod emit;
pub mod regalloc;
pub mod x86;

pub use emit::codegen_module;
