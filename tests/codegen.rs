//! End-to-end backend scenarios: parse a textual module, run allocation and
//! emission, and check the shape of the AT&T assembly.

use indoc::indoc;

use minicc::backend::codegen_module;
use minicc::ir::parser::parse_module;
use minicc::optimization::optimize_module;

fn assemble(text: &str) -> String {
    let module = parse_module(text, "test.ll").expect("test input parses");
    codegen_module(&module)
}

fn line_index(assembly: &str, needle: &str) -> usize {
    assembly
        .lines()
        .position(|line| line.trim() == needle)
        .unwrap_or_else(|| panic!("`{needle}` not found in:\n{assembly}"))
}

#[test]
fn module_directives_come_first() {
    let assembly = assemble(indoc! {r#"
        define i32 @f() {
          ret i32 0
        }
    "#});

    let lines: Vec<&str> = assembly.lines().collect();
    assert_eq!(lines[0], "\t.file \"test.ll\"");
    assert_eq!(lines[1], "\t.text");
    assert!(assembly.contains("\t.globl f\n"));
    assert!(assembly.contains("\t.type f, @function\n"));
    assert!(assembly.contains("f:\n.LFB0:\n"));
}

#[test]
fn constant_return_goes_through_eax() {
    let assembly = assemble(indoc! {r#"
        define i32 @f() {
          ret i32 14
        }
    "#});

    let movl = line_index(&assembly, "movl $14, %eax");
    let leave = line_index(&assembly, "leave");
    let ret = line_index(&assembly, "ret");
    assert!(movl < leave && leave < ret);
}

#[test]
fn optimized_cse_input_multiplies_once() {
    let mut module = parse_module(
        indoc! {r#"
            define i32 @func(i32 %0) {
              %2 = alloca i32, align 4
              %3 = alloca i32, align 4
              %4 = alloca i32, align 4
              store i32 %0, i32* %2, align 4
              %5 = load i32, i32* %2, align 4
              %6 = mul nsw i32 %5, 10
              store i32 %6, i32* %3, align 4
              %7 = load i32, i32* %2, align 4
              %8 = mul nsw i32 %7, 10
              store i32 %8, i32* %4, align 4
              %9 = load i32, i32* %3, align 4
              %10 = load i32, i32* %4, align 4
              %11 = add nsw i32 %9, %10
              ret i32 %11
            }
        "#},
        "test.ll",
    )
    .unwrap();

    optimize_module(&mut module);
    let assembly = codegen_module(&module);

    assert_eq!(assembly.matches("imull").count(), 1);
    assert_eq!(assembly.matches("addl").count(), 1);
}

#[test]
fn two_address_reuse_has_no_copy_between_sums() {
    // t1 = a + b; t2 = t1 + c: t1 dies into t2, so both sums target the
    // same register with no movl in between
    let assembly = assemble(indoc! {r#"
        define i32 @f(i32 %0) {
          %2 = alloca i32, align 4
          %3 = alloca i32, align 4
          %4 = alloca i32, align 4
          store i32 %0, i32* %2, align 4
          store i32 2, i32* %3, align 4
          store i32 3, i32* %4, align 4
          %5 = load i32, i32* %2, align 4
          %6 = load i32, i32* %3, align 4
          %7 = add nsw i32 %5, %6
          %8 = load i32, i32* %4, align 4
          %9 = add nsw i32 %7, %8
          ret i32 %9
        }
    "#});

    assert_eq!(assembly.matches("addl %ecx, %ebx").count(), 2);
    assert!(!assembly.contains("movl %ebx, %ebx"));
}

#[test]
fn spills_reserve_extra_frame_space() {
    // Five temporaries overlap; two spill, and with the saved %ebx the
    // frame grows to 12 bytes
    let assembly = assemble(indoc! {r#"
        define i32 @f(i32 %0) {
          %2 = add nsw i32 %0, 1
          %3 = add nsw i32 %0, 2
          %4 = add nsw i32 %0, 3
          %5 = add nsw i32 %0, 4
          %6 = add nsw i32 %0, 5
          %7 = add nsw i32 %2, %2
          %8 = add nsw i32 %3, %3
          %9 = add nsw i32 %4, %4
          %10 = add nsw i32 %7, %8
          %11 = add nsw i32 %10, %9
          %12 = add nsw i32 %11, %5
          %13 = add nsw i32 %12, %6
          ret i32 %13
        }
    "#});

    assert!(assembly.contains("subl $12, %esp"));
    // The spilled sums go to memory through %eax and come back as memory
    // operands
    assert!(assembly.contains("movl %eax, -8(%ebp)"));
    assert!(assembly.contains("movl %eax, -12(%ebp)"));
    assert!(assembly.contains("addl -8(%ebp), %ebx"));
    assert!(assembly.contains("addl -12(%ebp), %ebx"));
}

#[test]
fn frame_discipline_restores_saved_registers() {
    let assembly = assemble(indoc! {r#"
        define i32 @f(i32 %0) {
          %2 = alloca i32, align 4
          store i32 %0, i32* %2, align 4
          %3 = load i32, i32* %2, align 4
          ret i32 %3
        }
    "#});

    let push_ebp = line_index(&assembly, "pushl %ebp");
    let push_ebx = line_index(&assembly, "pushl %ebx");
    let restore_ebx = line_index(&assembly, "movl -4(%ebp), %ebx");
    let leave = line_index(&assembly, "leave");
    let ret = line_index(&assembly, "ret");

    assert!(push_ebp < push_ebx);
    assert!(push_ebx < restore_ebx);
    assert!(restore_ebx < leave && leave < ret);
}

#[test]
fn calls_save_and_restore_caller_registers() {
    let assembly = assemble(indoc! {r#"
        declare void @print(i32)
        declare i32 @read()

        define i32 @f() {
          %1 = alloca i32, align 4
          %2 = call i32 @read()
          store i32 %2, i32* %1, align 4
          %3 = load i32, i32* %1, align 4
          call void @print(i32 %3)
          ret i32 0
        }
    "#});

    assert!(assembly.contains("call read@PLT"));
    assert!(assembly.contains("call print@PLT"));

    // The argument push is popped off after the call
    let call = line_index(&assembly, "call print@PLT");
    let adjust = line_index(&assembly, "addl $4, %esp");
    assert_eq!(adjust, call + 1);

    // Saves in push order, restores in reverse
    let lines: Vec<&str> = assembly.lines().map(str::trim).collect();
    let save_at = lines
        .windows(3)
        .position(|w| w == ["pushl %ebx", "pushl %ecx", "pushl %edx"])
        .expect("caller saves precede the call");
    assert!(save_at < call);
    assert!(lines
        .windows(3)
        .any(|w| w == ["popl %edx", "popl %ecx", "popl %ebx"]));
}

#[test]
fn conditional_branches_use_the_predicate_mnemonic() {
    let assembly = assemble(indoc! {r#"
        define i32 @f(i32 %0) {
          %2 = alloca i32, align 4
          store i32 %0, i32* %2, align 4
          %3 = load i32, i32* %2, align 4
          %4 = icmp sle i32 %3, 10
          br i1 %4, label %5, label %6

        5:                                                ; preds = %1
          ret i32 1

        6:                                                ; preds = %1
          ret i32 0
        }
    "#});

    let compare = line_index(&assembly, "cmpl $10, %ecx");
    let jump = line_index(&assembly, "jle .L1");
    let fallback = line_index(&assembly, "jmp .L2");
    assert!(compare < jump && jump == fallback - 1);

    assert!(assembly.contains(".L1:"));
    assert!(assembly.contains(".L2:"));
}

#[test]
fn labels_stay_unique_across_functions() {
    let assembly = assemble(indoc! {r#"
        define i32 @first(i32 %0) {
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

        define i32 @second(i32 %0) {
          %2 = alloca i32, align 4
          store i32 %0, i32* %2, align 4
          %3 = load i32, i32* %2, align 4
          %4 = icmp slt i32 %3, 0
          br i1 %4, label %5, label %6

        5:
          ret i32 -1

        6:
          ret i32 0
        }
    "#});

    for label in [".L1:", ".L2:", ".L4:", ".L5:"] {
        assert_eq!(assembly.matches(label).count(), 1, "{label} duplicated");
    }
    assert!(assembly.contains(".LFB0:"));
    assert!(assembly.contains(".LFB1:"));
}

#[test]
fn multiple_returns_each_restore_the_frame() {
    let assembly = assemble(indoc! {r#"
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

    assert_eq!(assembly.matches("\tleave\n").count(), 2);
    assert_eq!(assembly.matches("\tret\n").count(), 2);
}
