//! Per-block dead-code elimination. An instruction is dead when nothing uses
//! its result and removing it cannot change observable behavior. Victims are
//! collected first and erased afterwards so the block is never mutated while
//! it is being walked.

use crate::ir::{BlockId, Function};

pub fn run(function: &mut Function, block: BlockId) -> bool {
    let mut to_delete = Vec::new();

    for &id in &function.blocks[block].insts {
        if !function.inst(id).has_side_effects() && !function.has_uses(id) {
            to_delete.push(id);
        }
    }

    for &id in &to_delete {
        function.erase_from_parent(id);
    }

    !to_delete.is_empty()
}
