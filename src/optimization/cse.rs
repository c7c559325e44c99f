//! Per-block common-subexpression elimination. Instructions are bucketed by
//! opcode; a later instruction whose operands are identical to an earlier
//! live one is replaced by it. Loads additionally require that no store in
//! between writes the same slot. Calls are never candidates since their
//! results are not pure, and cross-block reuse is out of scope because the
//! safety walk is defined only within one block.

use hashbrown::HashMap;

use crate::ir::{BlockId, Function, InstId, Opcode, Operand};

pub fn run(function: &mut Function, block: BlockId) -> bool {
    let insts = function.blocks[block].insts.clone();
    let mut buckets: HashMap<Opcode, Vec<usize>> = HashMap::new();
    let mut changed = false;

    for (position, &id) in insts.iter().enumerate() {
        let inst = function.inst(id);

        if inst.opcode == Opcode::Alloca || inst.has_side_effects() {
            continue;
        }

        let bucket = buckets.entry(inst.opcode).or_default();

        for &previous_position in bucket.iter() {
            let previous = insts[previous_position];

            // A previous instruction may have lost its last user in an
            // earlier round without being deleted yet; reusing it would
            // resurrect dead code.
            if !function.has_uses(previous) {
                continue;
            }

            if !is_common_subexpression(function, &insts, previous_position, position) {
                continue;
            }

            function.replace_all_uses(id, Operand::Inst(previous));
            changed = true;
            break;
        }

        buckets.get_mut(&function.inst(id).opcode).unwrap().push(position);
    }

    changed
}

fn is_common_subexpression(
    function: &Function,
    insts: &[InstId],
    previous_position: usize,
    position: usize,
) -> bool {
    let previous = function.inst(insts[previous_position]);
    let current = function.inst(insts[position]);

    if previous.operands != current.operands {
        return false;
    }

    if previous.predicate != current.predicate {
        return false;
    }

    if current.opcode == Opcode::Load {
        return safe_to_reuse_load(function, insts, previous_position, position);
    }

    true
}

/// A load may reuse an earlier identical load only if no store in between
/// writes to the same slot.
fn safe_to_reuse_load(
    function: &Function,
    insts: &[InstId],
    previous_position: usize,
    position: usize,
) -> bool {
    let pointer = function.inst(insts[previous_position]).pointer_operand();

    !insts[previous_position + 1..position].iter().any(|&id| {
        let inst = function.inst(id);
        inst.opcode == Opcode::Store && inst.pointer_operand() == pointer
    })
}
