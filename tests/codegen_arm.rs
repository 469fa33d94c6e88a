use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

fn compile(src: &str) -> String {
    let path: PathBuf = std::env::temp_dir().join(format!(
        "wacc_codegen_{}_{}.wacc",
        std::process::id(),
        NEXT_ID.fetch_add(1, Ordering::Relaxed)
    ));
    fs::write(&path, src).expect("failed to write test source");
    let out = Command::new(env!("CARGO_BIN_EXE_wacc"))
        .arg(&path)
        .output()
        .expect("failed to spawn wacc");
    let _ = fs::remove_file(&path);
    assert!(
        out.status.success(),
        "compiler failed.\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8(out.stdout).expect("stdout is not valid utf-8")
}

#[test]
fn emits_exit_call_with_value_in_r0() {
    let asm = compile("begin int x = 3 ; exit x end");
    assert!(asm.contains("main:"), "asm:\n{asm}");
    assert!(asm.contains("\tpush {lr}"), "asm:\n{asm}");
    assert!(asm.contains("\tldr r4, =3"), "asm:\n{asm}");
    assert!(asm.contains("\tmov r0, r4"), "asm:\n{asm}");
    assert!(asm.contains("\tbl exit"), "asm:\n{asm}");
    assert!(asm.contains("\tpop {pc}"), "asm:\n{asm}");
    assert!(asm.contains("\t.ltorg"), "asm:\n{asm}");
    assert!(asm.contains("\t.global main"), "asm:\n{asm}");
}

#[test]
fn stores_and_reloads_locals_relative_to_sp() {
    let asm = compile("begin int x = 3 ; exit x end");
    assert!(asm.contains("\tsub sp, sp, #4"), "asm:\n{asm}");
    assert!(asm.contains("\tstr r4, [sp]"), "asm:\n{asm}");
    assert!(asm.contains("\tldr r4, [sp]"), "asm:\n{asm}");
}

#[test]
fn deduplicates_identical_string_literals() {
    let asm = compile("begin print \"hello\" ; println \"hello\" end");
    assert_eq!(
        asm.matches(".ascii \"hello\\0\"").count(),
        1,
        "asm:\n{asm}"
    );
    assert!(asm.contains(".msg_0:"), "asm:\n{asm}");
    assert!(asm.contains("\t.word 5"), "asm:\n{asm}");
    assert_eq!(asm.matches("bl p_print_string").count(), 2, "asm:\n{asm}");
    assert_eq!(asm.matches("bl p_print_ln").count(), 1, "asm:\n{asm}");
}

#[test]
fn keeps_data_pool_in_insertion_order() {
    let asm = compile("begin print \"first\" ; print \"second\" end");
    let first = asm.find("first").expect("first literal missing");
    let second = asm.find("second").expect("second literal missing");
    assert!(first < second, "asm:\n{asm}");
    assert!(asm.contains(".msg_0:"), "asm:\n{asm}");
    assert!(asm.contains(".msg_1:"), "asm:\n{asm}");
}

#[test]
fn escapes_string_contents_for_the_assembler() {
    let asm = compile("begin print \"a\\nb\" end");
    assert!(asm.contains(".ascii \"a\\nb\\0\""), "asm:\n{asm}");
    assert!(asm.contains("\t.word 3"), "asm:\n{asm}");
}

#[test]
fn allocates_header_word_for_empty_array() {
    let asm = compile("begin int[] a = [] ; exit 0 end");
    assert!(asm.contains("\tldr r0, =4"), "asm:\n{asm}");
    assert!(asm.contains("\tbl malloc"), "asm:\n{asm}");
}

#[test]
fn lays_out_function_frames_and_calls() {
    let asm = compile(
        "begin int add(int a, int b) is return a + b end \
         int r = call add(1, 2) ; exit r end",
    );
    assert!(asm.contains("wacc_add:"), "asm:\n{asm}");
    assert_eq!(asm.matches("str r4, [sp, #-4]!").count(), 2, "asm:\n{asm}");
    assert!(asm.contains("\tbl wacc_add"), "asm:\n{asm}");
    assert!(asm.contains("\tadd sp, sp, #8"), "asm:\n{asm}");
    // First parameter sits deepest in the frame.
    assert!(asm.contains("\tldr r4, [sp, #8]"), "asm:\n{asm}");
    assert!(asm.contains("\tldr r5, [sp, #4]"), "asm:\n{asm}");
    assert!(asm.contains("\tadd r4, r4, r5"), "asm:\n{asm}");
    assert!(asm.contains("\tmov r4, r0"), "asm:\n{asm}");
}

#[test]
fn lowers_while_into_check_at_the_bottom() {
    let asm = compile("begin int i = 0 ; while i < 3 do i = i + 1 done ; exit i end");
    assert!(asm.contains("\tb L0"), "asm:\n{asm}");
    assert!(asm.contains("L0:"), "asm:\n{asm}");
    assert!(asm.contains("L1:"), "asm:\n{asm}");
    assert!(asm.contains("\tcmp r4, #1"), "asm:\n{asm}");
    assert!(asm.contains("\tbeq L1"), "asm:\n{asm}");
    assert!(asm.contains("\tmovlt r4, #1"), "asm:\n{asm}");
    assert!(asm.contains("\tmovge r4, #0"), "asm:\n{asm}");
}

#[test]
fn lowers_if_into_two_branches() {
    let asm = compile("begin if true then skip else skip fi ; exit 0 end");
    assert!(asm.contains("\tcmp r4, #0"), "asm:\n{asm}");
    assert!(asm.contains("\tbeq L0"), "asm:\n{asm}");
    assert!(asm.contains("\tb L1"), "asm:\n{asm}");
    assert!(asm.contains("L0:"), "asm:\n{asm}");
    assert!(asm.contains("L1:"), "asm:\n{asm}");
}

#[test]
fn prints_each_type_through_its_own_routine() {
    let asm = compile(
        "begin print 1 ; print true ; print 'a' ; print \"s\" ; \
         int[] a = [1] ; print a end",
    );
    assert!(asm.contains("bl p_print_int"), "asm:\n{asm}");
    assert!(asm.contains("bl p_print_bool"), "asm:\n{asm}");
    assert!(asm.contains("\tbl putchar"), "asm:\n{asm}");
    assert!(asm.contains("bl p_print_string"), "asm:\n{asm}");
    assert!(asm.contains("bl p_print_reference"), "asm:\n{asm}");
    assert!(asm.contains("\tmov r4, #97"), "asm:\n{asm}");
}

#[test]
fn emits_each_runtime_helper_once() {
    let asm = compile("begin print 1 ; print 2 ; print 3 end");
    assert_eq!(asm.matches("p_print_int:").count(), 1, "asm:\n{asm}");
    assert!(asm.contains("\tbl printf"), "asm:\n{asm}");
    assert!(asm.contains("\tbl fflush"), "asm:\n{asm}");
    assert!(asm.contains(".ascii \"%d\\0\""), "asm:\n{asm}");
}

#[test]
fn bool_printer_chooses_between_pooled_words() {
    let asm = compile("begin println true end");
    assert!(asm.contains(".ascii \"true\\0\""), "asm:\n{asm}");
    assert!(asm.contains(".ascii \"false\\0\""), "asm:\n{asm}");
    assert!(asm.contains("\tldrne r0, ="), "asm:\n{asm}");
    assert!(asm.contains("\tldreq r0, ="), "asm:\n{asm}");
}

#[test]
fn reads_through_scanf_wrappers() {
    let asm = compile("begin int x = 0 ; char c = 'a' ; read x ; read c end");
    assert!(asm.contains("p_read_int:"), "asm:\n{asm}");
    assert!(asm.contains("p_read_char:"), "asm:\n{asm}");
    assert_eq!(asm.matches("\tbl scanf").count(), 2, "asm:\n{asm}");
    assert!(asm.contains(".ascii \"%d\\0\""), "asm:\n{asm}");
    assert!(asm.contains(".ascii \" %c\\0\""), "asm:\n{asm}");
    // read takes the address of its target.
    assert!(asm.contains("\tadd r4, sp, #"), "asm:\n{asm}");
}

#[test]
fn divides_through_the_eabi_helpers() {
    let asm = compile("begin int x = 7 / 2 ; int y = 7 % 2 ; exit x end");
    assert!(asm.contains("\tbl __aeabi_idiv"), "asm:\n{asm}");
    assert!(asm.contains("\tbl __aeabi_idivmod"), "asm:\n{asm}");
    assert!(asm.contains("\tmov r4, r1"), "asm:\n{asm}");
}

#[test]
fn multiplies_with_smull() {
    let asm = compile("begin int x = 6 * 7 ; exit x end");
    assert!(asm.contains("\tsmull r4, r5, r4, r5"), "asm:\n{asm}");
}

#[test]
fn negation_and_not_use_rsb_and_eor() {
    let asm = compile("begin bool b = !true ; int x = -(1) ; exit x end");
    assert!(asm.contains("\teor r4, r4, #1"), "asm:\n{asm}");
    assert!(asm.contains("\trsb r4, r4, #0"), "asm:\n{asm}");
}

#[test]
fn array_length_reads_the_header_word() {
    let asm = compile("begin int[] a = [1, 2, 3] ; exit len a end");
    assert!(asm.contains("\tldr r4, [r4]"), "asm:\n{asm}");
}

#[test]
fn array_indexing_skips_header_and_scales_words() {
    let asm = compile("begin int[] a = [1, 2] ; exit a[1] end");
    assert!(asm.contains("\tadd r4, r4, #4"), "asm:\n{asm}");
    assert!(asm.contains("\tadd r4, r4, r5, lsl #2"), "asm:\n{asm}");
}

#[test]
fn char_arrays_are_byte_packed() {
    let asm = compile("begin char[] a = ['h', 'i'] ; exit 0 end");
    // 4-byte header plus two single-byte cells.
    assert!(asm.contains("\tldr r0, =6"), "asm:\n{asm}");
    assert!(asm.contains("\tstrb r5, [r4, #4]"), "asm:\n{asm}");
    assert!(asm.contains("\tstrb r5, [r4, #5]"), "asm:\n{asm}");
}

#[test]
fn newpair_allocates_eight_bytes() {
    let asm = compile("begin pair(int, int) p = newpair(1, 2) ; free p end");
    assert!(asm.contains("\tldr r0, =8"), "asm:\n{asm}");
    assert!(asm.contains("\tbl malloc"), "asm:\n{asm}");
    assert!(asm.contains("\tstr r5, [r4, #4]"), "asm:\n{asm}");
    assert!(asm.contains("\tbl free"), "asm:\n{asm}");
}

#[test]
fn pair_elements_load_through_the_pair_pointer() {
    let asm = compile(
        "begin pair(int, int) p = newpair(1, 2) ; int x = snd p ; exit x end",
    );
    assert!(asm.contains("\tldr r4, [r4, #4]"), "asm:\n{asm}");
}

#[test]
fn block_scopes_roll_the_stack_pointer_back() {
    let asm = compile("begin begin int x = 1 ; skip end ; exit 0 end");
    assert!(asm.contains("\tsub sp, sp, #4"), "asm:\n{asm}");
    assert!(asm.contains("\tadd sp, sp, #4"), "asm:\n{asm}");
}

#[test]
fn functions_precede_main_in_source_order() {
    let asm = compile(
        "begin int one() is return 1 end int two() is return 2 end \
         int x = call one() ; exit x end",
    );
    let one = asm.find("wacc_one:").expect("wacc_one missing");
    let two = asm.find("wacc_two:").expect("wacc_two missing");
    let main = asm.find("main:").expect("main missing");
    assert!(one < two && two < main, "asm:\n{asm}");
}

#[test]
fn byte_sized_locals_use_byte_loads_and_stores() {
    let asm = compile("begin char c = 'x' ; bool b = true ; exit ord c end");
    assert!(asm.contains("\tsub sp, sp, #1"), "asm:\n{asm}");
    assert!(asm.contains("\tstrb r4, [sp]"), "asm:\n{asm}");
    assert!(asm.contains("\tldrsb r4, [sp"), "asm:\n{asm}");
}
