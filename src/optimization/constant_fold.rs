//! Per-block constant folding: arithmetic and comparisons whose operands are
//! all constants are computed at compile time. The folded instruction keeps
//! its place in the block until dead-code elimination deletes it.

use crate::ir::{BlockId, ConstInt, Function, Opcode, Operand};

pub fn run(function: &mut Function, block: BlockId) -> bool {
    let mut changed = false;

    for id in function.blocks[block].insts.clone() {
        let inst = function.inst(id);

        if !inst.is_arithmetic() && inst.opcode != Opcode::Icmp {
            continue;
        }

        let (Some(lhs), Some(rhs)) = (
            inst.operands[0].as_const(),
            inst.operands[1].as_const(),
        ) else {
            continue;
        };

        // Two's-complement wrapping, matching the target's 32-bit arithmetic
        let folded = match inst.opcode {
            Opcode::Add => ConstInt::i32(lhs.value.wrapping_add(rhs.value)),
            Opcode::Sub => ConstInt::i32(lhs.value.wrapping_sub(rhs.value)),
            Opcode::Mul => ConstInt::i32(lhs.value.wrapping_mul(rhs.value)),
            Opcode::Icmp => {
                let predicate = inst.predicate.expect("icmp carries a predicate");
                ConstInt::i1(predicate.evaluate(lhs.value, rhs.value))
            }
            _ => unreachable!(),
        };

        function.replace_all_uses(id, Operand::Const(folded));
        changed = true;
    }

    changed
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::ir::parser::parse_module;
    use crate::ir::InstId;
    use crate::index::Index;

    #[test]
    fn folds_wrapping_arithmetic() {
        let mut module = parse_module(
            indoc! {r#"
                define i32 @f() {
                  %1 = add nsw i32 2147483647, 1
                  ret i32 %1
                }
            "#},
            "f.ll",
        )
        .unwrap();

        let function = &mut module.functions[0];
        assert!(run(function, BlockId::ZERO));

        let ret = function.inst(InstId::new(1));
        assert_eq!(ret.operands[0], Operand::Const(ConstInt::i32(i32::MIN)));
    }

    #[test]
    fn folds_signed_comparisons() {
        let mut module = parse_module(
            indoc! {r#"
                define i32 @f() {
                  %1 = icmp slt i32 -1, 0
                  br i1 %1, label %2, label %3

                2:
                  ret i32 1

                3:
                  ret i32 0
                }
            "#},
            "f.ll",
        )
        .unwrap();

        let function = &mut module.functions[0];
        assert!(run(function, BlockId::ZERO));

        let branch = function.inst(InstId::new(1));
        assert_eq!(branch.operands[0], Operand::Const(ConstInt::i1(true)));
    }

    #[test]
    fn leaves_non_constant_operands_alone() {
        let mut module = parse_module(
            indoc! {r#"
                define i32 @f(i32 %0) {
                  %2 = add nsw i32 %0, 1
                  ret i32 %2
                }
            "#},
            "f.ll",
        )
        .unwrap();

        let function = &mut module.functions[0];
        assert!(!run(function, BlockId::ZERO));
    }
}
