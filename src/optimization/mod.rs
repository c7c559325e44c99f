//! The optimizer. Each function is rewritten in place by four transforms
//! applied to fixpoint: constant propagation exposes constant operands to
//! folding, folding leaves dead values for CSE to ignore and DCE to delete,
//! and DCE frees uses that unlock further rounds. The outer loop stops when
//! a full round reports no change.

use crate::ir::{BlockId, Function, Module};

pub mod constant_fold;
pub mod constant_prop;
pub mod cse;
pub mod dce;

pub fn optimize_module(module: &mut Module) {
    for function in &mut module.functions {
        optimize_function(function);
    }
}

pub fn optimize_function(function: &mut Function) {
    let blocks: Vec<BlockId> = function.blocks.indices().collect();

    let mut changed = true;
    while changed {
        changed = constant_prop::run(function);

        for &block in &blocks {
            changed = constant_fold::run(function, block) || changed;
            changed = cse::run(function, block) || changed;
            changed = dce::run(function, block) || changed;
        }
    }
}
