//! Whole-function constant propagation, a reaching-definitions dataflow over
//! stores. Stores are the definitions; a load is replaced by a constant when
//! every store that can reach it writes that same constant to its slot.
//!
//! The lattice is the finite powerset of store instructions and the transfer
//! functions are monotone, so the IN/OUT iteration reaches fixpoint.

use hashbrown::{HashMap, HashSet};

use crate::index::IndexVec;
use crate::ir::{BlockId, ConstInt, Function, InstId, Opcode, Operand};

type StoreSet = HashSet<InstId>;

/// Slot to the stores writing it, in function order
type StoreMap = HashMap<InstId, Vec<InstId>>;

pub fn run(function: &mut Function) -> bool {
    let stores = build_store_map(function);
    let (gen, kill) = build_gen_kill_sets(function, &stores);
    let in_sets = solve_dataflow(function, &gen, &kill);

    rewrite_loads(function, &stores, &in_sets)
}

fn build_store_map(function: &Function) -> StoreMap {
    let mut stores: StoreMap = HashMap::new();

    for block in function.blocks.iter() {
        for &id in &block.insts {
            if function.inst(id).opcode == Opcode::Store {
                let pointer = function.inst(id).pointer_operand().expect("store writes a slot");
                stores.entry(pointer).or_default().push(id);
            }
        }
    }

    stores
}

/// GEN[B] holds the last store in B to each slot; KILL[B] holds every other
/// store in the function writing a slot that B writes.
fn build_gen_kill_sets(
    function: &Function,
    stores: &StoreMap,
) -> (IndexVec<BlockId, StoreSet>, IndexVec<BlockId, StoreSet>) {
    let mut gen = IndexVec::from_raw(vec![StoreSet::new(); function.blocks.len()]);
    let mut kill = IndexVec::from_raw(vec![StoreSet::new(); function.blocks.len()]);

    for (block_id, block) in function.blocks.enumerate() {
        for &id in &block.insts {
            if function.inst(id).opcode != Opcode::Store {
                continue;
            }

            let pointer = function.inst(id).pointer_operand().expect("store writes a slot");

            for &other in &stores[&pointer] {
                if other != id {
                    gen[block_id].remove(&other);
                    kill[block_id].insert(other);
                }
            }

            gen[block_id].insert(id);
        }
    }

    (gen, kill)
}

/// Iterates IN[B] = ⋃ OUT[P] and OUT[B] = (IN[B] ∖ KILL[B]) ∪ GEN[B] until
/// no OUT set changes, and returns the IN sets.
fn solve_dataflow(
    function: &Function,
    gen: &IndexVec<BlockId, StoreSet>,
    kill: &IndexVec<BlockId, StoreSet>,
) -> IndexVec<BlockId, StoreSet> {
    let predecessors = function.predecessors();

    let mut in_sets = IndexVec::from_raw(vec![StoreSet::new(); function.blocks.len()]);
    let mut out_sets = IndexVec::from_raw(
        function.blocks.indices().map(|b| gen[b].clone()).collect(),
    );

    let mut changed = true;
    while changed {
        changed = false;

        for block in function.blocks.indices() {
            let mut incoming = StoreSet::new();
            for &pred in &predecessors[block] {
                incoming.extend(out_sets[pred].iter().copied());
            }
            in_sets[block] = incoming;

            let out = if in_sets[block].is_empty() {
                gen[block].clone()
            } else {
                let mut out: StoreSet = in_sets[block]
                    .difference(&kill[block])
                    .copied()
                    .collect();
                out.extend(gen[block].iter().copied());
                out
            };

            if out != out_sets[block] {
                changed = true;
                out_sets[block] = out;
            }
        }
    }

    in_sets
}

/// Walks each block with the running set of reaching stores and rewrites the
/// loads whose every reaching store writes one same constant. Replaced loads
/// are erased after the walk.
fn rewrite_loads(
    function: &mut Function,
    stores: &StoreMap,
    in_sets: &IndexVec<BlockId, StoreSet>,
) -> bool {
    let mut to_delete = Vec::new();

    for block in function.blocks.indices() {
        let mut reaching = in_sets[block].clone();

        for id in function.blocks[block].insts.clone() {
            match function.inst(id).opcode {
                Opcode::Store => {
                    let pointer =
                        function.inst(id).pointer_operand().expect("store writes a slot");
                    for killed in &stores[&pointer] {
                        reaching.remove(killed);
                    }
                    reaching.insert(id);
                }
                Opcode::Load => {
                    let pointer =
                        function.inst(id).pointer_operand().expect("load reads a slot");
                    let slot_stores = stores.get(&pointer).map(Vec::as_slice).unwrap_or(&[]);
                    let Some(constant) =
                        single_reaching_constant(function, slot_stores, &reaching)
                    else {
                        continue;
                    };

                    function.replace_all_uses(id, Operand::Const(constant));
                    to_delete.push(id);
                }
                _ => {}
            }
        }
    }

    let changed = !to_delete.is_empty();
    for id in to_delete {
        function.erase_from_parent(id);
    }

    changed
}

/// The one constant every reaching store to this slot writes, if any reach
/// and they all agree by value and type.
fn single_reaching_constant(
    function: &Function,
    slot_stores: &[InstId],
    reaching: &StoreSet,
) -> Option<ConstInt> {
    let mut result = None;

    let mut any = false;
    for &store in slot_stores {
        if !reaching.contains(&store) {
            continue;
        }
        any = true;

        let value = function.inst(store).operands[0].as_const()?;
        match result {
            None => result = Some(value),
            Some(seen) if seen == value => {}
            Some(_) => return None,
        }
    }

    if any {
        result
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::index::Index;

    fn parse(text: &str) -> crate::ir::Module {
        crate::ir::parser::parse_module(text, "test.ll").unwrap()
    }

    #[test]
    fn gen_holds_only_the_last_store_per_slot() {
        let module = parse(indoc! {r#"
            define i32 @f(i32 %0) {
              %2 = alloca i32, align 4
              store i32 1, i32* %2, align 4
              store i32 2, i32* %2, align 4
              %3 = load i32, i32* %2, align 4
              ret i32 %3
            }
        "#});

        let function = &module.functions[0];
        let stores = build_store_map(function);
        let (gen, kill) = build_gen_kill_sets(function, &stores);

        let first = InstId::new(1);
        let second = InstId::new(2);

        let expected_gen: StoreSet = [second].into_iter().collect();
        let expected_kill: StoreSet = [first].into_iter().collect();
        assert_eq!(gen[BlockId::ZERO], expected_gen);
        assert_eq!(kill[BlockId::ZERO], expected_kill);
    }

    #[test]
    fn replaces_load_reached_by_one_constant() {
        let mut module = parse(indoc! {r#"
            define i32 @f(i32 %0) {
              %2 = alloca i32, align 4
              store i32 5, i32* %2, align 4
              %3 = load i32, i32* %2, align 4
              %4 = add nsw i32 %3, 1
              ret i32 %4
            }
        "#});

        let function = &mut module.functions[0];
        assert!(run(function));

        let add = function.inst(InstId::new(3));
        assert_eq!(
            add.operands[0],
            Operand::Const(crate::ir::ConstInt::i32(5))
        );
        // The load is gone from the block
        assert_eq!(function.blocks[BlockId::ZERO].insts.len(), 4);
    }

    #[test]
    fn disagreeing_stores_block_the_rewrite() {
        let mut module = parse(indoc! {r#"
            define i32 @f(i32 %0) {
              %2 = alloca i32, align 4
              %3 = alloca i32, align 4
              store i32 %0, i32* %2, align 4
              store i32 5, i32* %3, align 4
              %4 = load i32, i32* %2, align 4
              %5 = icmp sgt i32 %4, 0
              br i1 %5, label %6, label %7

            6:                                                ; preds = %1
              store i32 7, i32* %3, align 4
              br label %7

            7:                                                ; preds = %6, %1
              %8 = load i32, i32* %3, align 4
              ret i32 %8
            }
        "#});

        let function = &mut module.functions[0];
        assert!(!run(function));

        // The merge-block load still reads its slot
        let merge = BlockId::new(2);
        let load = function.blocks[merge].insts[0];
        assert_eq!(function.inst(load).opcode, Opcode::Load);
        assert!(function.has_uses(load));
    }

    #[test]
    fn store_in_a_loop_body_kills_the_preheader_constant() {
        let mut module = parse(indoc! {r#"
            define i32 @f(i32 %0) {
              %2 = alloca i32, align 4
              store i32 0, i32* %2, align 4
              br label %3

            3:                                                ; preds = %6, %1
              %4 = load i32, i32* %2, align 4
              %5 = icmp slt i32 %4, 10
              br i1 %5, label %6, label %8

            6:                                                ; preds = %3
              %7 = add nsw i32 %4, 1
              store i32 %7, i32* %2, align 4
              br label %3

            8:                                                ; preds = %3
              ret i32 %4
            }
        "#});

        let function = &mut module.functions[0];

        // The header load is reached both by the constant initializer and by
        // the non-constant loop store, so nothing changes.
        assert!(!run(function));
    }
}
