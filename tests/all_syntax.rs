use std::fs;
use std::path::PathBuf;
use std::process::Command;

fn compile(src: &str) -> String {
    let path: PathBuf =
        std::env::temp_dir().join(format!("wacc_all_syntax_{}.wacc", std::process::id()));
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

const ALL_SYNTAX: &str = r#"
# exercises the whole statement, expression and type surface
begin
  int fact(int n) is
    if n <= 1 then
      return 1
    else
      int rec = call fact(n - 1) ;
      return n * rec
    fi
  end

  char shift(char c, int by) is
    int code = ord c ;
    return chr (code + by)
  end

  bool isNull(pair(int, int) p) is
    return p == null
  end

  int sum(int[] xs, int n) is
    int total = 0 ;
    int i = 0 ;
    while i < n do
      total = total + xs[i] ;
      i = i + 1
    done ;
    return total
  end

  skip ;
  int f = call fact(6) ;
  println f ;
  char c = call shift('a', 1) ;
  println c ;
  int[] xs = [1, 2, 3, 4] ;
  int total = call sum(xs, len xs) ;
  println total ;
  int[][] grid = [xs] ;
  println grid[0][2] ;
  pair(int, bool) entry = newpair(42, true) ;
  int key = fst entry ;
  bool flag = snd entry ;
  println key ;
  println flag ;
  snd entry = false ;
  pair(int, int) nothing = null ;
  bool missing = call isNull(nothing) ;
  println missing ;
  string banner = "done:\t\"ok\"\n" ;
  print banner ;
  char[] word = ['w', 'a', 'c', 'c'] ;
  println word ;
  bool verdict = 1 < 2 && 'a' <= 'b' || !(3 >= 4) && 1 != 2 ;
  println verdict ;
  int parity = 7 % 2 ;
  int half = 7 / 2 ;
  println parity + half ;
  begin
    int shadowed = 1 ;
    println shadowed
  end ;
  read key ;
  free entry ;
  if flag == false then
    println "flag cleared"
  else
    println "flag set"
  fi ;
  exit 0
end
"#;

#[test]
fn compiles_the_whole_language_surface() {
    let asm = compile(ALL_SYNTAX);

    // user functions in source order, then the entry point
    let fact = asm.find("wacc_fact:").expect("wacc_fact missing");
    let shift = asm.find("wacc_shift:").expect("wacc_shift missing");
    let sum = asm.find("wacc_sum:").expect("wacc_sum missing");
    let main = asm.find("main:").expect("main missing");
    assert!(fact < shift && shift < sum && sum < main);

    assert!(asm.contains("\t.data"));
    assert!(asm.contains(".msg_0:"));
    assert!(asm.contains("\t.text"));
    assert!(asm.contains("\t.global main"));

    assert!(asm.contains("\tbl wacc_fact"));
    assert!(asm.contains("\tbl wacc_sum"));
    assert!(asm.contains("\tsmull r4, r5, r4, r5"));
    assert!(asm.contains("\tbl __aeabi_idiv"));
    assert!(asm.contains("\tbl __aeabi_idivmod"));
    assert!(asm.contains("\teor r4, r4, #1"));
    assert!(asm.contains("\tand r4, r4, r5"));
    assert!(asm.contains("\torr r4, r4, r5"));

    assert!(asm.contains("bl p_print_int"));
    assert!(asm.contains("bl p_print_bool"));
    assert!(asm.contains("bl p_print_string"));
    assert!(asm.contains("bl p_print_ln"));
    assert!(asm.contains("\tbl putchar"));
    assert!(asm.contains("bl p_read_int"));
    assert!(asm.contains("\tbl malloc"));
    assert!(asm.contains("\tbl free"));
    assert!(asm.contains("\tbl exit"));

    // escaped string literal lands in the pool verbatim
    assert!(asm.contains(".ascii \"done:\\t\\\"ok\\\"\\n\\0\""));

    // byte-sized cells for the char array
    assert!(asm.contains("\tstrb r5, [r4, #4]"));

    // frame discipline
    assert!(asm.contains("\tpush {lr}"));
    assert!(asm.contains("\tpop {pc}"));
    assert!(asm.contains("\t.ltorg"));
}
