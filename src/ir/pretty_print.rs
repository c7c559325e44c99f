//! Textual output for IR modules: a plain writer producing `.ll` text that
//! round-trips through the parser, and a colored dump for the terminal.

use colored::Colorize;
use hashbrown::HashMap;
use itertools::Itertools;

use crate::ir::{BlockId, Function, InstId, IntWidth, Module, Opcode, Operand};

/// The canonical unnamed-value numbering: parameters first, then each block
/// and each result-producing instruction in program order.
struct Numbering {
    values: HashMap<InstId, usize>,
    blocks: HashMap<BlockId, usize>,
}

fn number_function(function: &Function) -> Numbering {
    let mut numbering = Numbering {
        values: HashMap::new(),
        blocks: HashMap::new(),
    };

    let mut counter = usize::from(function.has_param);

    for (block_id, block) in function.blocks.enumerate() {
        numbering.blocks.insert(block_id, counter);
        counter += 1;

        for &id in &block.insts {
            if function.inst(id).has_result() {
                numbering.values.insert(id, counter);
                counter += 1;
            }
        }
    }

    numbering
}

fn format_operand(numbering: &Numbering, operand: Operand) -> String {
    match operand {
        Operand::Inst(id) => format!("%{}", numbering.values[&id]),
        Operand::Param => "%0".to_owned(),
        Operand::Const(c) => match c.width {
            IntWidth::I32 => c.value.to_string(),
            IntWidth::I1 => if c.value != 0 { "true" } else { "false" }.to_owned(),
        },
        Operand::Block(id) => format!("%{}", numbering.blocks[&id]),
    }
}

fn format_instruction(function: &Function, numbering: &Numbering, id: InstId) -> String {
    let inst = function.inst(id);
    let op = |index: usize| format_operand(numbering, inst.operands[index]);

    match inst.opcode {
        Opcode::Alloca => {
            format!("%{} = alloca i32, align 4", numbering.values[&id])
        }
        Opcode::Load => {
            format!(
                "%{} = load i32, i32* {}, align 4",
                numbering.values[&id],
                op(0)
            )
        }
        Opcode::Store => {
            format!("store i32 {}, i32* {}, align 4", op(0), op(1))
        }
        Opcode::Add | Opcode::Sub | Opcode::Mul => {
            format!(
                "%{} = {} nsw i32 {}, {}",
                numbering.values[&id],
                inst.opcode,
                op(0),
                op(1)
            )
        }
        Opcode::Icmp => {
            format!(
                "%{} = icmp {} i32 {}, {}",
                numbering.values[&id],
                inst.predicate.expect("icmp carries a predicate"),
                op(0),
                op(1)
            )
        }
        Opcode::Br => match inst.operands.len() {
            1 => format!("br label {}", op(0)),
            // Stored order is (condition, false, true); printed order is
            // (condition, true, false)
            _ => format!("br i1 {}, label {}, label {}", op(0), op(2), op(1)),
        },
        Opcode::Ret => format!("ret i32 {}", op(0)),
        Opcode::Call => {
            let callee = inst.callee.as_ref().expect("call carries a callee");
            let args = inst
                .operands
                .iter()
                .map(|&arg| format!("i32 {}", format_operand(numbering, arg)))
                .join(", ");

            if callee.returns_value {
                format!(
                    "%{} = call i32 @{}({})",
                    numbering.values[&id],
                    callee.name,
                    args
                )
            } else {
                format!("call void @{}({})", callee.name, args)
            }
        }
    }
}

/// Renders the module as `.ll` text accepted by [`crate::ir::parser`].
pub fn write_module(module: &Module) -> String {
    let mut out = String::new();

    out.push_str(&format!("; ModuleID = '{}'\n", module.source_name));
    out.push_str(&format!("source_filename = \"{}\"\n", module.source_name));

    for declaration in &module.declarations {
        let ty = if declaration.returns_value {
            ("i32", "")
        } else {
            ("void", "i32")
        };
        out.push_str(&format!("\ndeclare {} @{}({})\n", ty.0, declaration.name, ty.1));
    }

    for function in &module.functions {
        let numbering = number_function(function);
        let preds = function.predecessors();

        let param = if function.has_param { "i32 %0" } else { "" };
        out.push_str(&format!("\ndefine i32 @{}({param}) {{\n", function.name));

        for (block_id, block) in function.blocks.enumerate() {
            if block_id != BlockId::ZERO {
                let label = format!("{}:", numbering.blocks[&block_id]);
                if preds[block_id].is_empty() {
                    out.push_str(&format!("\n{label}\n"));
                } else {
                    let preds = preds[block_id]
                        .iter()
                        .map(|&p| format!("%{}", numbering.blocks[&p]))
                        .join(", ");
                    out.push_str(&format!("\n{label:<50}; preds = {preds}\n"));
                }
            }

            for &id in &block.insts {
                out.push_str("  ");
                out.push_str(&format_instruction(function, &numbering, id));
                out.push('\n');
            }
        }

        out.push_str("}\n");
    }

    out
}

/// Dumps the module to stdout with syntax colors, for `-e ir`.
pub fn pretty_print_module(module: &Module) {
    for function in &module.functions {
        let numbering = number_function(function);

        println!(
            "{} {}{}{}{} {{",
            "define".magenta(),
            format!("@{}", function.name).blue(),
            "(".white(),
            if function.has_param { "%0".yellow() } else { "".yellow() },
            ")".white(),
        );

        for (block_id, block) in function.blocks.enumerate() {
            if block_id != BlockId::ZERO {
                println!("{}", format!("{}:", numbering.blocks[&block_id]).bright_red());
            }

            for &id in &block.insts {
                println!("    {}", format_instruction(function, &numbering, id));
            }
        }

        println!("}}");
    }
}
