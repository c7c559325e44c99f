//! Per-block linear-scan register allocation over `%ebx`, `%ecx`, `%edx`.
//!
//! Allocation is local to each basic block: every source variable lives in a
//! stack slot and crosses blocks through `load`/`store`, so temporaries never
//! outlive their defining block and nothing needs to survive a block edge in
//! a register. Within a block the scan walks instructions once, reusing a
//! dying first operand's register for two-address arithmetic and spilling
//! the value with the fewest recorded uses when pressure runs out.

use hashbrown::HashMap;

use crate::backend::x86::{Allocation, Gpr};
use crate::ir::{BlockId, Function, InstId, Opcode};

/// The allocator's output for one function
pub struct FunctionAllocation {
    pub allocations: HashMap<InstId, Allocation>,
    /// True when `%ebx` was handed to any value, obliging the emitter to
    /// save and restore it
    pub used_callee_saved: bool,
}

pub fn allocate_function(function: &Function) -> FunctionAllocation {
    let mut allocation = FunctionAllocation {
        allocations: HashMap::new(),
        used_callee_saved: false,
    };

    for block in function.blocks.indices() {
        allocate_block(function, block, &mut allocation);
    }

    allocation
}

/// Instruction indices at which each block-local value is live: its
/// definition index followed by every use site, in order. Slots are
/// excluded; so are operands defined outside this block.
fn build_live_uses(function: &Function, insts: &[InstId]) -> HashMap<InstId, Vec<usize>> {
    let mut live_uses: HashMap<InstId, Vec<usize>> = HashMap::new();

    for (index, &id) in insts.iter().enumerate() {
        for operand in &function.inst(id).operands {
            if let Some(value) = operand.as_inst() {
                if let Some(uses) = live_uses.get_mut(&value) {
                    uses.push(index);
                }
            }
        }

        if function.inst(id).has_result() {
            live_uses.insert(id, vec![index]);
        }
    }

    live_uses
}

struct BlockState {
    assigned: HashMap<InstId, Allocation>,
    /// Values currently occupying a register, in assignment order
    active: Vec<InstId>,
    /// Registers not currently assigned, kept in preference order
    free: Vec<Gpr>,
}

impl BlockState {
    fn assign(&mut self, value: InstId, register: Gpr) {
        self.assigned.insert(value, Allocation::Reg(register));
        self.active.push(value);
    }

    fn take_free_register(&mut self) -> Option<Gpr> {
        if self.free.is_empty() {
            None
        } else {
            Some(self.free.remove(0))
        }
    }

    fn release(&mut self, value: InstId, register: Gpr) {
        self.active.retain(|&v| v != value);
        self.free.push(register);
        self.free.sort();
    }
}

fn allocate_block(function: &Function, block: BlockId, out: &mut FunctionAllocation) {
    let insts: Vec<InstId> = function.blocks[block]
        .insts
        .iter()
        .copied()
        .filter(|&id| function.inst(id).opcode != Opcode::Alloca)
        .collect();

    let live_uses = build_live_uses(function, &insts);

    let mut state = BlockState {
        assigned: HashMap::new(),
        active: Vec::new(),
        free: Gpr::ALLOCATABLE.to_vec(),
    };

    // Releases the registers of operands whose live range ends at `index`
    let release_dying_operands =
        |state: &mut BlockState, id: InstId, index: usize, skip_first: bool| {
            for (position, operand) in function.inst(id).operands.iter().enumerate() {
                if skip_first && position == 0 {
                    continue;
                }
                let Some(value) = operand.as_inst() else {
                    continue;
                };
                if !state.active.contains(&value) {
                    continue;
                }
                if live_uses.get(&value).map(|uses| *uses.last().unwrap()) != Some(index) {
                    continue;
                }
                if let Some(&Allocation::Reg(register)) = state.assigned.get(&value) {
                    state.release(value, register);
                }
            }
        };

    for (index, &id) in insts.iter().enumerate() {
        let inst = function.inst(id);

        if !inst.has_result() {
            release_dying_operands(&mut state, id, index, false);
            continue;
        }

        // Two-address coalescing: a dying first operand hands its register
        // straight to the result, skipping a copy
        if inst.is_arithmetic() {
            let first = inst.operands[0].as_inst();
            let dying_register = first.and_then(|value| {
                if !state.active.contains(&value) {
                    return None;
                }
                if live_uses.get(&value).map(|uses| *uses.last().unwrap()) != Some(index) {
                    return None;
                }
                match state.assigned.get(&value) {
                    Some(&Allocation::Reg(register)) => Some((value, register)),
                    _ => None,
                }
            });

            if let Some((value, register)) = dying_register {
                state.active.retain(|&v| v != value);
                state.assign(id, register);
                release_dying_operands(&mut state, id, index, true);
                continue;
            }
        }

        if let Some(register) = state.take_free_register() {
            state.assign(id, register);
            release_dying_operands(&mut state, id, index, false);
            continue;
        }

        // No register left: spill whichever of the contenders has the
        // fewest recorded uses, the first encountered winning ties
        let victim = *state
            .active
            .iter()
            .reduce(|best, candidate| {
                if live_uses[candidate].len() < live_uses[best].len() {
                    candidate
                } else {
                    best
                }
            })
            .expect("register pressure implies active values");

        if live_uses[&victim].len() > live_uses[&id].len() {
            out.allocations.insert(id, Allocation::Spill);
            // Recorded directly; spilled values never join the active set
        } else {
            let Allocation::Reg(register) = state.assigned[&victim] else {
                unreachable!("active values hold registers")
            };
            state.assigned.insert(victim, Allocation::Spill);
            state.active.retain(|&v| v != victim);
            state.assign(id, register);
        }
    }

    if state
        .assigned
        .values()
        .any(|&a| a == Allocation::Reg(Gpr::Ebx))
    {
        out.used_callee_saved = true;
    }

    out.allocations.extend(state.assigned);
}
