//! Lowers functions to AT&T-syntax 32-bit x86 using the allocation map.
//!
//! Frame layout: `%ebp` is pushed and re-pointed on entry, `%ebx` is saved
//! below it when the allocator handed it out, and slots and spills follow at
//! negative offsets. Caller data sits above: the return address at
//! `4(%ebp)`, the single parameter at `8(%ebp)`. The slot backing the
//! parameter is aliased to the caller's copy instead of occupying frame
//! space.

use colored::Colorize;
use hashbrown::HashMap;

use crate::backend::regalloc::{allocate_function, FunctionAllocation};
use crate::backend::x86::{Allocation, Assembler, Gpr};
use crate::ir::{BlockId, Function, InstId, Module, Opcode, Operand};

/// Translates the whole module to assembly text.
pub fn codegen_module(module: &Module) -> String {
    let mut asm = Assembler::new();

    asm.emit(format!(".file \"{}\"", module.source_name));
    asm.emit(".text");

    // Block labels are numbered across the file so that every function's
    // labels stay unique in the output
    let mut next_label = 0usize;

    for (counter, function) in module.functions.iter().enumerate() {
        let allocation = allocate_function(function);
        FunctionCodegen::new(function, &allocation, &mut asm, counter, &mut next_label).run();
    }

    asm.into_output()
}

/// Where an operand's value can be found at emission time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Immediate(i32),
    Register(Gpr),
    /// `offset(%ebp)`
    Memory(i32),
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Immediate(value) => write!(f, "${value}"),
            Location::Register(register) => write!(f, "{register}"),
            Location::Memory(offset) => write!(f, "{offset}(%ebp)"),
        }
    }
}

struct FunctionCodegen<'a> {
    function: &'a Function,
    allocation: &'a FunctionAllocation,
    asm: &'a mut Assembler,
    counter: usize,
    /// Frame-pointer-relative offsets of slots and spills
    offsets: HashMap<InstId, i32>,
    frame_size: i32,
    labels: HashMap<BlockId, usize>,
}

impl<'a> FunctionCodegen<'a> {
    fn new(
        function: &'a Function,
        allocation: &'a FunctionAllocation,
        asm: &'a mut Assembler,
        counter: usize,
        next_label: &mut usize,
    ) -> Self {
        let (offsets, frame_size) = build_offset_map(function, allocation);

        let mut labels = HashMap::new();
        for block in function.blocks.indices() {
            labels.insert(block, *next_label);
            *next_label += 1;
        }

        Self {
            function,
            allocation,
            asm,
            counter,
            offsets,
            frame_size,
            labels,
        }
    }

    fn run(mut self) {
        self.asm.emit(format!(".globl {}", self.function.name));
        self.asm
            .emit(format!(".type {}, @function", self.function.name));
        self.asm.label(&self.function.name);
        self.asm.label(format!(".LFB{}", self.counter));

        self.asm.emit("pushl %ebp");
        self.asm.emit("movl %esp, %ebp");
        if self.allocation.used_callee_saved {
            self.asm.emit("pushl %ebx");
        }
        self.asm.emit(format!("subl ${}, %esp", self.frame_size));

        let last = self
            .function
            .blocks
            .iter()
            .last()
            .and_then(|block| block.insts.last().copied());

        for (block_id, block) in self.function.blocks.enumerate() {
            // Control falls through from the prologue into the entry block,
            // so its label is never printed
            if block_id != BlockId::ZERO {
                self.asm.label(format!(".L{}", self.labels[&block_id]));
            }

            for &id in &block.insts {
                self.emit_instruction(id, last == Some(id));
            }
        }

        if self.allocation.used_callee_saved {
            self.asm.emit("movl -4(%ebp), %ebx");
        }
        self.asm.emit("leave");
        self.asm.emit("ret");
    }

    /// The location holding a value operand. Slot pointers and spilled
    /// values resolve through the offset map; the parameter reads straight
    /// from the caller's copy.
    fn locate(&self, operand: Operand) -> Location {
        match operand {
            Operand::Const(constant) => Location::Immediate(constant.value),
            Operand::Param => Location::Memory(8),
            Operand::Inst(id) => match self.allocation.allocations.get(&id) {
                Some(&Allocation::Reg(register)) => Location::Register(register),
                _ => Location::Memory(self.offsets[&id]),
            },
            Operand::Block(_) => unreachable!("labels are not value operands"),
        }
    }

    fn block_label(&self, operand: Operand) -> String {
        let block = operand.as_block().expect("branch targets are labels");
        format!(".L{}", self.labels[&block])
    }

    fn emit_instruction(&mut self, id: InstId, is_last: bool) {
        let inst = self.function.inst(id);

        match inst.opcode {
            // Slots emit nothing; they exist as frame offsets
            Opcode::Alloca => {}

            Opcode::Ret => {
                match self.locate(inst.operands[0]) {
                    Location::Register(Gpr::Eax) => {}
                    source => self.asm.emit(format!("movl {source}, %eax")),
                }
                // The shared epilogue covers the function's final return
                if !is_last {
                    if self.allocation.used_callee_saved {
                        self.asm.emit("movl -4(%ebp), %ebx");
                    }
                    self.asm.emit("leave");
                    self.asm.emit("ret");
                }
            }

            Opcode::Load => {
                let pointer = self.slot_offset(inst.operands[0]);
                match self.allocation.allocations[&id] {
                    Allocation::Reg(register) => {
                        self.asm.emit(format!("movl {pointer}(%ebp), {register}"));
                    }
                    Allocation::Spill => {
                        let destination = self.offsets[&id];
                        self.asm.emit(format!("movl {pointer}(%ebp), %eax"));
                        self.asm.emit(format!("movl %eax, {destination}(%ebp)"));
                    }
                }
            }

            Opcode::Store => {
                let pointer = self.slot_offset(inst.operands[1]);
                match inst.operands[0] {
                    // The parameter is already in its slot: the slot is
                    // aliased to the caller's copy at 8(%ebp)
                    Operand::Param => {}
                    value => match self.locate(value) {
                        Location::Memory(offset) => {
                            self.asm.emit(format!("movl {offset}(%ebp), %eax"));
                            self.asm.emit(format!("movl %eax, {pointer}(%ebp)"));
                        }
                        source => {
                            self.asm.emit(format!("movl {source}, {pointer}(%ebp)"));
                        }
                    },
                }
            }

            Opcode::Call => {
                let callee = inst.callee.as_ref().expect("call carries a callee");

                self.asm.emit("pushl %ebx");
                self.asm.emit("pushl %ecx");
                self.asm.emit("pushl %edx");

                if let Some(&argument) = inst.operands.first() {
                    let source = self.locate(argument);
                    self.asm.emit(format!("pushl {source}"));
                }

                self.asm.emit(format!("call {}@PLT", callee.name));

                if !inst.operands.is_empty() {
                    self.asm.emit("addl $4, %esp");
                }

                self.asm.emit("popl %edx");
                self.asm.emit("popl %ecx");
                self.asm.emit("popl %ebx");

                if callee.returns_value {
                    match self.allocation.allocations[&id] {
                        Allocation::Reg(register) => {
                            self.asm.emit(format!("movl %eax, {register}"));
                        }
                        Allocation::Spill => {
                            let destination = self.offsets[&id];
                            self.asm.emit(format!("movl %eax, {destination}(%ebp)"));
                        }
                    }
                }
            }

            Opcode::Br if inst.operands.len() == 1 => {
                let target = self.block_label(inst.operands[0]);
                self.asm.emit(format!("jmp {target}"));
            }

            Opcode::Br => {
                // The condition is the most recent icmp in this block; its
                // predicate picks the jump taken to the true target
                let predicate = inst.operands[0]
                    .as_inst()
                    .and_then(|cond| self.function.inst(cond).predicate);

                let Some(predicate) = predicate else {
                    self.report_unsupported(id, "conditional branch on a non-comparison value");
                    return;
                };

                let true_target = self.block_label(inst.operands[2]);
                let false_target = self.block_label(inst.operands[1]);
                self.asm
                    .emit(format!("{} {true_target}", predicate.jump_mnemonic()));
                self.asm.emit(format!("jmp {false_target}"));
            }

            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Icmp => {
                let mnemonic = match inst.opcode {
                    Opcode::Add => "addl",
                    Opcode::Sub => "subl",
                    Opcode::Mul => "imull",
                    Opcode::Icmp => "cmpl",
                    _ => unreachable!(),
                };

                // The working register is the instruction's own allocation,
                // or %eax for spilled results
                let working = match self.allocation.allocations[&id] {
                    Allocation::Reg(register) => register,
                    Allocation::Spill => Gpr::Eax,
                };

                match self.locate(inst.operands[0]) {
                    Location::Register(register) if register == working => {}
                    source => self.asm.emit(format!("movl {source}, {working}")),
                }

                let source = self.locate(inst.operands[1]);
                self.asm.emit(format!("{mnemonic} {source}, {working}"));

                if self.allocation.allocations[&id] == Allocation::Spill {
                    let destination = self.offsets[&id];
                    self.asm.emit(format!("movl {working}, {destination}(%ebp)"));
                }
            }
        }
    }

    fn slot_offset(&self, pointer: Operand) -> i32 {
        let slot = pointer.as_inst().expect("pointers address slots");
        self.offsets[&slot]
    }

    fn report_unsupported(&self, id: InstId, reason: &str) {
        eprintln!(
            "{}: skipping unsupported instruction in @{}: {reason} ({:?})",
            "error".red(),
            self.function.name,
            self.function.inst(id).opcode,
        );
    }
}

/// Assigns every slot and spill its frame offset and totals the frame size.
/// The slot holding the parameter is aliased to the caller's copy at `+8`;
/// everything else descends from just below the saved `%ebx`, when present.
fn build_offset_map(
    function: &Function,
    allocation: &FunctionAllocation,
) -> (HashMap<InstId, i32>, i32) {
    let mut offsets = HashMap::new();
    let mut local = if allocation.used_callee_saved { 4 } else { 0 };

    for block in function.blocks.iter() {
        for &id in &block.insts {
            let placed_locally = match function.inst(id).opcode {
                Opcode::Alloca => {
                    if is_parameter_slot(function, id) {
                        offsets.insert(id, 8);
                        false
                    } else {
                        true
                    }
                }
                _ => allocation.allocations.get(&id) == Some(&Allocation::Spill),
            };

            if placed_locally {
                local += 4;
                offsets.insert(id, -local);
            }
        }
    }

    (offsets, local)
}

/// The parameter's backing slot is recognizable as the store target of the
/// prologue's parameter store.
fn is_parameter_slot(function: &Function, slot: InstId) -> bool {
    function.uses_of(slot).iter().any(|&(user, index)| {
        let user = function.inst(user);
        user.opcode == Opcode::Store && index == 1 && user.operands[0] == Operand::Param
    })
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::index::Index;

    fn parse(text: &str) -> Module {
        crate::ir::parser::parse_module(text, "test.ll").unwrap()
    }

    #[test]
    fn parameter_slot_aliases_the_callers_copy() {
        let module = parse(indoc! {r#"
            define i32 @f(i32 %0) {
              %2 = alloca i32, align 4
              %3 = alloca i32, align 4
              store i32 %0, i32* %2, align 4
              store i32 1, i32* %3, align 4
              %4 = load i32, i32* %2, align 4
              ret i32 %4
            }
        "#});

        let function = &module.functions[0];
        let allocation = allocate_function(function);
        let (offsets, frame_size) = build_offset_map(function, &allocation);

        // The load takes %ebx, so the saved register claims -4 and the
        // non-parameter slot lands below it
        assert!(allocation.used_callee_saved);
        assert_eq!(offsets[&InstId::new(0)], 8);
        assert_eq!(offsets[&InstId::new(1)], -8);
        assert_eq!(frame_size, 8);
    }

    #[test]
    fn offsets_are_unique_and_account_for_saved_ebx() {
        let module = parse(indoc! {r#"
            define i32 @f(i32 %0) {
              %2 = alloca i32, align 4
              %3 = alloca i32, align 4
              %4 = alloca i32, align 4
              store i32 %0, i32* %2, align 4
              store i32 1, i32* %3, align 4
              store i32 2, i32* %4, align 4
              %5 = load i32, i32* %3, align 4
              %6 = load i32, i32* %4, align 4
              %7 = add nsw i32 %5, %6
              ret i32 %7
            }
        "#});

        let function = &module.functions[0];
        let allocation = allocate_function(function);
        assert!(allocation.used_callee_saved);

        let (offsets, frame_size) = build_offset_map(function, &allocation);

        // Saved %ebx occupies -4; locals start below it
        let mut negative: Vec<i32> = offsets.values().copied().filter(|&o| o < 0).collect();
        negative.sort();
        assert_eq!(negative, vec![-12, -8]);
        assert_eq!(frame_size, 12);
    }

    #[test]
    fn fall_through_entry_has_no_label() {
        let module = parse(indoc! {r#"
            define i32 @f(i32 %0) {
              %2 = alloca i32, align 4
              store i32 %0, i32* %2, align 4
              %3 = load i32, i32* %2, align 4
              %4 = icmp sgt i32 %3, 0
              br i1 %4, label %5, label %6

            5:
              ret i32 1

            6:
              ret i32 0
            }
        "#});

        let asm = codegen_module(&module);

        assert!(!asm.contains(".L0:"));
        assert!(asm.contains(".L1:"));
        assert!(asm.contains(".L2:"));
        assert!(asm.contains("jg .L1"));
        assert!(asm.contains("jmp .L2"));
    }
}
