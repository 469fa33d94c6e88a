use std::collections::HashMap;
use std::fmt;

use crate::ast::*;
use crate::sema::PrintTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum Reg {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
    R11,
    R12,
    Sp,
    Lr,
    Pc,
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Reg::R0 => "r0",
            Reg::R1 => "r1",
            Reg::R2 => "r2",
            Reg::R3 => "r3",
            Reg::R4 => "r4",
            Reg::R5 => "r5",
            Reg::R6 => "r6",
            Reg::R7 => "r7",
            Reg::R8 => "r8",
            Reg::R9 => "r9",
            Reg::R10 => "r10",
            Reg::R11 => "r11",
            Reg::R12 => "r12",
            Reg::Sp => "sp",
            Reg::Lr => "lr",
            Reg::Pc => "pc",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Lt => "lt",
            Cond::Le => "le",
            Cond::Gt => "gt",
            Cond::Ge => "ge",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub enum Operand {
    Reg(Reg),
    Imm(i32),
    /// Register shifted left, as the scaled index of a word array access.
    Lsl(Reg, u32),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "{r}"),
            Operand::Imm(i) => write!(f, "#{i}"),
            Operand::Lsl(r, n) => write!(f, "{r}, lsl #{n}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Addr {
    /// `[rX]`
    Reg(Reg),
    /// `[rX, #n]`
    Offset(Reg, i32),
    /// `[rX, #n]!` with writeback, used to push call arguments.
    PreIndexed(Reg, i32),
    /// `=n` literal-pool constant.
    Const(i32),
    /// `=label` address constant.
    Label(String),
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addr::Reg(r) => write!(f, "[{r}]"),
            Addr::Offset(r, 0) => write!(f, "[{r}]"),
            Addr::Offset(r, n) => write!(f, "[{r}, #{n}]"),
            Addr::PreIndexed(r, n) => write!(f, "[{r}, #{n}]!"),
            Addr::Const(i) => write!(f, "={i}"),
            Addr::Label(l) => write!(f, "={l}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Instr {
    Move(Reg, Operand),
    MoveCond(Cond, Reg, Operand),
    Load(Reg, Addr),
    LoadCond(Cond, Reg, Addr),
    LoadByte(Reg, Addr),
    Store(Reg, Addr),
    StoreByte(Reg, Addr),
    Push(Reg),
    Pop(Reg),
    Add(Reg, Reg, Operand),
    Sub(Reg, Reg, Operand),
    Rsb(Reg, Reg, Operand),
    And(Reg, Reg, Operand),
    Orr(Reg, Reg, Operand),
    Eor(Reg, Reg, Operand),
    Smull(Reg, Reg, Reg, Reg),
    Cmp(Reg, Operand),
    Branch(String),
    BranchCond(Cond, String),
    BranchAndLink(String),
    Label(String),
    Directive(String),
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Move(rd, op) => write!(f, "\tmov {rd}, {op}"),
            Instr::MoveCond(c, rd, op) => write!(f, "\tmov{c} {rd}, {op}"),
            Instr::Load(rd, a) => write!(f, "\tldr {rd}, {a}"),
            Instr::LoadCond(c, rd, a) => write!(f, "\tldr{c} {rd}, {a}"),
            Instr::LoadByte(rd, a) => write!(f, "\tldrsb {rd}, {a}"),
            Instr::Store(rd, a) => write!(f, "\tstr {rd}, {a}"),
            Instr::StoreByte(rd, a) => write!(f, "\tstrb {rd}, {a}"),
            Instr::Push(r) => write!(f, "\tpush {{{r}}}"),
            Instr::Pop(r) => write!(f, "\tpop {{{r}}}"),
            Instr::Add(rd, rn, op) => write!(f, "\tadd {rd}, {rn}, {op}"),
            Instr::Sub(rd, rn, op) => write!(f, "\tsub {rd}, {rn}, {op}"),
            Instr::Rsb(rd, rn, op) => write!(f, "\trsb {rd}, {rn}, {op}"),
            Instr::And(rd, rn, op) => write!(f, "\tand {rd}, {rn}, {op}"),
            Instr::Orr(rd, rn, op) => write!(f, "\torr {rd}, {rn}, {op}"),
            Instr::Eor(rd, rn, op) => write!(f, "\teor {rd}, {rn}, {op}"),
            Instr::Smull(lo, hi, rm, rs) => write!(f, "\tsmull {lo}, {hi}, {rm}, {rs}"),
            Instr::Cmp(rn, op) => write!(f, "\tcmp {rn}, {op}"),
            Instr::Branch(l) => write!(f, "\tb {l}"),
            Instr::BranchCond(c, l) => write!(f, "\tb{c} {l}"),
            Instr::BranchAndLink(l) => write!(f, "\tbl {l}"),
            Instr::Label(l) => write!(f, "{l}:"),
            Instr::Directive(d) => write!(f, "\t.{d}"),
        }
    }
}

/// Rewrite a raw string into its assembler-escaped form. Idempotent: the
/// backslash itself is not re-escaped.
pub fn escape_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\u{8}' => out.push_str("\\b"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\u{c}' => out.push_str("\\f"),
            '\r' => out.push_str("\\r"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            other => out.push(other),
        }
    }
    out
}

#[derive(Debug, Clone)]
struct PoolEntry {
    escaped: String,
    raw_len: usize,
}

/// De-duplicated read-only data segment, in insertion order.
#[derive(Debug, Default)]
struct StringPool {
    entries: Vec<PoolEntry>,
    index: HashMap<String, usize>,
}

impl StringPool {
    /// Intern a string and return its label. Re-inserting content with the
    /// same escaped form hands back the existing label.
    fn intern(&mut self, raw: &str) -> String {
        let escaped = escape_string(raw);
        if let Some(&i) = self.index.get(&escaped) {
            return msg_label(i);
        }
        let i = self.entries.len();
        self.entries.push(PoolEntry {
            escaped: escaped.clone(),
            raw_len: raw.chars().count(),
        });
        self.index.insert(escaped, i);
        msg_label(i)
    }
}

fn msg_label(i: usize) -> String {
    format!(".msg_{i}")
}

/// Runtime support routines emitted after `main`, each at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Helper {
    PrintInt,
    PrintBool,
    PrintString,
    PrintReference,
    PrintLn,
    ReadInt,
    ReadChar,
}

impl Helper {
    fn label(self) -> &'static str {
        match self {
            Helper::PrintInt => "p_print_int",
            Helper::PrintBool => "p_print_bool",
            Helper::PrintString => "p_print_string",
            Helper::PrintReference => "p_print_reference",
            Helper::PrintLn => "p_print_ln",
            Helper::ReadInt => "p_read_int",
            Helper::ReadChar => "p_read_char",
        }
    }
}

fn type_size(t: &Type) -> i32 {
    match t {
        Type::Bool | Type::Char => 1,
        _ => 4,
    }
}

#[derive(Debug, Clone)]
struct VarSlot {
    // Offset from the frame base; negative for locals, non-negative for
    // caller-pushed parameters.
    offset: i32,
    ty: Type,
}

pub struct ArmGen<'a> {
    print_table: &'a PrintTable,
    instrs: Vec<Instr>,
    pool: StringPool,
    avail: Vec<Reg>,
    vars: HashMap<String, VarSlot>,
    // Bytes pushed below the frame base so far.
    sp_offset: i32,
    // sp_offset at function body entry; `return` unwinds back to it.
    original_sp: i32,
    used_stack: i32,
    func_names: Vec<String>,
    helpers: Vec<Helper>,
    label_count: u32,
}

pub fn generate(prog: &Program, print_table: &PrintTable) -> Result<String, String> {
    let mut g = ArmGen::new(print_table);
    g.gen_program(prog)?;
    Ok(g.render())
}

const SCRATCH: [Reg; 8] = [
    Reg::R4,
    Reg::R5,
    Reg::R6,
    Reg::R7,
    Reg::R8,
    Reg::R9,
    Reg::R10,
    Reg::R11,
];

impl<'a> ArmGen<'a> {
    pub fn new(print_table: &'a PrintTable) -> Self {
        Self {
            print_table,
            instrs: Vec::new(),
            pool: StringPool::default(),
            avail: SCRATCH.to_vec(),
            vars: HashMap::new(),
            sp_offset: 0,
            original_sp: 0,
            used_stack: 0,
            func_names: Vec::new(),
            helpers: Vec::new(),
            label_count: 0,
        }
    }

    fn emit(&mut self, i: Instr) {
        self.instrs.push(i);
    }

    fn res_reg(&self) -> Result<Reg, String> {
        self.avail
            .first()
            .copied()
            .ok_or_else(|| "internal: expression too deep for the scratch register pool".into())
    }

    fn take_reg(&mut self) -> Result<Reg, String> {
        if self.avail.is_empty() {
            return Err("internal: expression too deep for the scratch register pool".into());
        }
        Ok(self.avail.remove(0))
    }

    fn release_reg(&mut self, r: Reg) {
        self.avail.insert(0, r);
    }

    fn next_label(&mut self) -> String {
        let l = format!("L{}", self.label_count);
        self.label_count += 1;
        l
    }

    fn need_helper(&mut self, h: Helper) {
        if !self.helpers.contains(&h) {
            self.helpers.push(h);
        }
    }

    fn slot(&self, name: &str) -> Result<VarSlot, String> {
        self.vars
            .get(name)
            .cloned()
            .ok_or_else(|| format!("internal: no stack slot recorded for '{name}'"))
    }

    pub fn gen_program(&mut self, prog: &Program) -> Result<(), String> {
        for f in &prog.funcs {
            self.func_names.push(f.name.clone());
        }

        for f in &prog.funcs {
            self.gen_func(f)?;
        }

        self.emit(Instr::Label("main".to_string()));
        self.emit(Instr::Push(Reg::Lr));
        self.vars = HashMap::new();
        self.sp_offset = 4;
        self.original_sp = 4;
        self.used_stack = 0;
        self.gen_stats(&prog.body)?;
        self.emit(Instr::Load(Reg::R0, Addr::Const(0)));
        self.emit(Instr::Pop(Reg::Pc));
        self.emit(Instr::Directive("ltorg".to_string()));

        let helpers = std::mem::take(&mut self.helpers);
        for h in helpers {
            self.gen_helper(h);
        }
        Ok(())
    }

    fn gen_func(&mut self, f: &Func) -> Result<(), String> {
        self.emit(Instr::Label(format!("wacc_{}", f.name)));
        self.emit(Instr::Push(Reg::Lr));

        self.vars = HashMap::new();
        self.sp_offset = 4;
        self.original_sp = 4;
        self.used_stack = 0;

        // The caller pushed arguments left to right, so the first parameter
        // sits deepest; offsets are measured upward from the frame base.
        let mut above = 0;
        for p in f.params.iter().rev() {
            self.vars.insert(
                p.name.clone(),
                VarSlot {
                    offset: above,
                    ty: p.ty.clone(),
                },
            );
            above += type_size(&p.ty);
        }

        self.gen_stats(&f.body)?;
        self.emit(Instr::Pop(Reg::Pc));
        self.emit(Instr::Directive("ltorg".to_string()));
        Ok(())
    }

    /// Generate a block, rolling the stack pointer and the slot table back to
    /// their state at block entry.
    fn gen_stats(&mut self, stats: &[Stat]) -> Result<(), String> {
        let saved_vars = self.vars.clone();
        let saved_sp = self.sp_offset;
        for s in stats {
            self.gen_stat(s)?;
        }
        if self.sp_offset > saved_sp {
            let n = self.sp_offset - saved_sp;
            self.emit(Instr::Add(Reg::Sp, Reg::Sp, Operand::Imm(n)));
        }
        self.sp_offset = saved_sp;
        self.vars = saved_vars;
        Ok(())
    }

    fn gen_stat(&mut self, s: &Stat) -> Result<(), String> {
        match s {
            Stat::Skip(_) => Ok(()),
            Stat::Declare(ty, name, rv, _) => {
                let rd = self.res_reg()?;
                self.gen_rvalue(rv)?;
                let size = type_size(ty);
                self.emit(Instr::Sub(Reg::Sp, Reg::Sp, Operand::Imm(size)));
                if size == 1 {
                    self.emit(Instr::StoreByte(rd, Addr::Offset(Reg::Sp, 0)));
                } else {
                    self.emit(Instr::Store(rd, Addr::Offset(Reg::Sp, 0)));
                }
                self.sp_offset += size;
                self.used_stack += size;
                self.vars.insert(
                    name.clone(),
                    VarSlot {
                        offset: -self.sp_offset,
                        ty: ty.clone(),
                    },
                );
                Ok(())
            }
            Stat::Assign(lv, rv, _) => {
                let rd = self.res_reg()?;
                self.gen_rvalue(rv)?;
                match lv {
                    LValue::Ident(name, _) => {
                        let slot = self.slot(name)?;
                        let delta = self.sp_offset + slot.offset;
                        if type_size(&slot.ty) == 1 {
                            self.emit(Instr::StoreByte(rd, Addr::Offset(Reg::Sp, delta)));
                        } else {
                            self.emit(Instr::Store(rd, Addr::Offset(Reg::Sp, delta)));
                        }
                    }
                    _ => {
                        self.take_reg()?;
                        let ty = self.gen_lvalue_addr(lv)?;
                        let ra = self.res_reg()?;
                        if type_size(&ty) == 1 {
                            self.emit(Instr::StoreByte(rd, Addr::Reg(ra)));
                        } else {
                            self.emit(Instr::Store(rd, Addr::Reg(ra)));
                        }
                        self.release_reg(rd);
                    }
                }
                Ok(())
            }
            Stat::Read(lv, _) => {
                let rd = self.res_reg()?;
                let ty = self.gen_lvalue_addr(lv)?;
                self.emit(Instr::Move(Reg::R0, Operand::Reg(rd)));
                let helper = match ty {
                    Type::Char => Helper::ReadChar,
                    _ => Helper::ReadInt,
                };
                self.need_helper(helper);
                self.emit(Instr::BranchAndLink(helper.label().to_string()));
                Ok(())
            }
            Stat::Free(e, _) => {
                let rd = self.res_reg()?;
                self.gen_expr(e)?;
                self.emit(Instr::Move(Reg::R0, Operand::Reg(rd)));
                self.emit(Instr::BranchAndLink("free".to_string()));
                Ok(())
            }
            Stat::Return(e, _) => {
                let rd = self.res_reg()?;
                self.gen_expr(e)?;
                self.emit(Instr::Move(Reg::R0, Operand::Reg(rd)));
                if self.sp_offset > self.original_sp {
                    let n = self.sp_offset - self.original_sp;
                    self.emit(Instr::Add(Reg::Sp, Reg::Sp, Operand::Imm(n)));
                }
                self.emit(Instr::Pop(Reg::Pc));
                Ok(())
            }
            Stat::Exit(e, _) => {
                let rd = self.res_reg()?;
                self.gen_expr(e)?;
                self.emit(Instr::Move(Reg::R0, Operand::Reg(rd)));
                self.emit(Instr::BranchAndLink("exit".to_string()));
                Ok(())
            }
            Stat::Print(e, _) => self.gen_print(e),
            Stat::Println(e, _) => {
                self.gen_print(e)?;
                self.need_helper(Helper::PrintLn);
                self.emit(Instr::BranchAndLink(Helper::PrintLn.label().to_string()));
                Ok(())
            }
            Stat::If(cond, then_body, else_body, _) => {
                let else_label = self.next_label();
                let end_label = self.next_label();
                let rd = self.res_reg()?;
                self.gen_expr(cond)?;
                self.emit(Instr::Cmp(rd, Operand::Imm(0)));
                self.emit(Instr::BranchCond(Cond::Eq, else_label.clone()));
                self.gen_stats(then_body)?;
                self.emit(Instr::Branch(end_label.clone()));
                self.emit(Instr::Label(else_label));
                self.gen_stats(else_body)?;
                self.emit(Instr::Label(end_label));
                Ok(())
            }
            Stat::While(cond, body, _) => {
                let cond_label = self.next_label();
                let body_label = self.next_label();
                self.emit(Instr::Branch(cond_label.clone()));
                self.emit(Instr::Label(body_label.clone()));
                self.gen_stats(body)?;
                self.emit(Instr::Label(cond_label));
                let rd = self.res_reg()?;
                self.gen_expr(cond)?;
                self.emit(Instr::Cmp(rd, Operand::Imm(1)));
                self.emit(Instr::BranchCond(Cond::Eq, body_label));
                Ok(())
            }
            Stat::Scope(body, _) => self.gen_stats(body),
        }
    }

    fn gen_print(&mut self, e: &Expr) -> Result<(), String> {
        let rd = self.res_reg()?;
        self.gen_expr(e)?;
        self.emit(Instr::Move(Reg::R0, Operand::Reg(rd)));
        let ty = self
            .print_table
            .get(&e.pos())
            .ok_or_else(|| {
                let (l, c) = e.pos();
                format!("internal: no print type recorded at line {l}, column {c}")
            })?
            .clone();
        match ty {
            Type::Char => {
                self.emit(Instr::BranchAndLink("putchar".to_string()));
            }
            Type::Int => {
                self.need_helper(Helper::PrintInt);
                self.emit(Instr::BranchAndLink(Helper::PrintInt.label().to_string()));
            }
            Type::Bool => {
                self.need_helper(Helper::PrintBool);
                self.emit(Instr::BranchAndLink(Helper::PrintBool.label().to_string()));
            }
            Type::String => {
                self.need_helper(Helper::PrintString);
                self.emit(Instr::BranchAndLink(Helper::PrintString.label().to_string()));
            }
            Type::Array(ref elem) if **elem == Type::Char => {
                self.need_helper(Helper::PrintString);
                self.emit(Instr::BranchAndLink(Helper::PrintString.label().to_string()));
            }
            _ => {
                // Pairs, arrays and erased values print as an address.
                self.need_helper(Helper::PrintReference);
                self.emit(Instr::BranchAndLink(
                    Helper::PrintReference.label().to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Static type of a well-typed expression, recovered from declared slots.
    fn expr_type(&self, e: &Expr) -> Result<Type, String> {
        Ok(match e {
            Expr::IntLit(_, _) => Type::Int,
            Expr::BoolLit(_, _) => Type::Bool,
            Expr::CharLit(_, _) => Type::Char,
            Expr::StrLit(_, _) => Type::String,
            Expr::NullLit(_) => Type::Null,
            Expr::Ident(name, _) => self.slot(name)?.ty,
            Expr::ArrayElem(name, idxs, _) => {
                let mut t = self.slot(name)?.ty;
                for _ in idxs {
                    t = match t {
                        Type::Array(elem) => *elem,
                        other => {
                            return Err(format!("internal: indexing into non-array type {other}"))
                        }
                    };
                }
                t
            }
            Expr::Unary(op, _, _) => match op {
                UnOp::Not => Type::Bool,
                UnOp::Neg | UnOp::Len | UnOp::Ord => Type::Int,
                UnOp::Chr => Type::Char,
            },
            Expr::Binary(_, op, _, _) => match op {
                BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Add | BinOp::Sub => Type::Int,
                _ => Type::Bool,
            },
        })
    }

    /// Evaluate an expression into the current result register.
    fn gen_expr(&mut self, e: &Expr) -> Result<(), String> {
        let rd = self.res_reg()?;
        match e {
            Expr::IntLit(i, _) => self.emit(Instr::Load(rd, Addr::Const(*i))),
            Expr::BoolLit(b, _) => {
                self.emit(Instr::Move(rd, Operand::Imm(i32::from(*b))));
            }
            Expr::CharLit(c, _) => self.emit(Instr::Move(rd, Operand::Imm(*c as i32))),
            Expr::StrLit(s, _) => {
                let label = self.pool.intern(s);
                self.emit(Instr::Load(rd, Addr::Label(label)));
            }
            Expr::NullLit(_) => self.emit(Instr::Load(rd, Addr::Const(0))),
            Expr::Ident(name, _) => {
                let slot = self.slot(name)?;
                let delta = self.sp_offset + slot.offset;
                if type_size(&slot.ty) == 1 {
                    self.emit(Instr::LoadByte(rd, Addr::Offset(Reg::Sp, delta)));
                } else {
                    self.emit(Instr::Load(rd, Addr::Offset(Reg::Sp, delta)));
                }
            }
            Expr::ArrayElem(name, idxs, _) => {
                let elem_ty = self.gen_array_elem_addr(name, idxs)?;
                if type_size(&elem_ty) == 1 {
                    self.emit(Instr::LoadByte(rd, Addr::Reg(rd)));
                } else {
                    self.emit(Instr::Load(rd, Addr::Reg(rd)));
                }
            }
            Expr::Unary(op, inner, _) => {
                self.gen_expr(inner)?;
                match op {
                    UnOp::Not => self.emit(Instr::Eor(rd, rd, Operand::Imm(1))),
                    UnOp::Neg => self.emit(Instr::Rsb(rd, rd, Operand::Imm(0))),
                    UnOp::Len => self.emit(Instr::Load(rd, Addr::Reg(rd))),
                    // ord and chr preserve the register representation.
                    UnOp::Ord | UnOp::Chr => {}
                }
            }
            Expr::Binary(lhs, op, rhs, _) => {
                self.gen_expr(lhs)?;
                self.take_reg()?;
                let rs = self.res_reg()?;
                self.gen_expr(rhs)?;
                match op {
                    BinOp::Add => self.emit(Instr::Add(rd, rd, Operand::Reg(rs))),
                    BinOp::Sub => self.emit(Instr::Sub(rd, rd, Operand::Reg(rs))),
                    BinOp::Mul => self.emit(Instr::Smull(rd, rs, rd, rs)),
                    BinOp::Div => {
                        self.emit(Instr::Move(Reg::R0, Operand::Reg(rd)));
                        self.emit(Instr::Move(Reg::R1, Operand::Reg(rs)));
                        self.emit(Instr::BranchAndLink("__aeabi_idiv".to_string()));
                        self.emit(Instr::Move(rd, Operand::Reg(Reg::R0)));
                    }
                    BinOp::Mod => {
                        self.emit(Instr::Move(Reg::R0, Operand::Reg(rd)));
                        self.emit(Instr::Move(Reg::R1, Operand::Reg(rs)));
                        self.emit(Instr::BranchAndLink("__aeabi_idivmod".to_string()));
                        self.emit(Instr::Move(rd, Operand::Reg(Reg::R1)));
                    }
                    BinOp::And => self.emit(Instr::And(rd, rd, Operand::Reg(rs))),
                    BinOp::Or => self.emit(Instr::Orr(rd, rd, Operand::Reg(rs))),
                    BinOp::Gt => self.gen_compare(rd, rs, Cond::Gt, Cond::Le),
                    BinOp::Ge => self.gen_compare(rd, rs, Cond::Ge, Cond::Lt),
                    BinOp::Lt => self.gen_compare(rd, rs, Cond::Lt, Cond::Ge),
                    BinOp::Le => self.gen_compare(rd, rs, Cond::Le, Cond::Gt),
                    BinOp::Eq => self.gen_compare(rd, rs, Cond::Eq, Cond::Ne),
                    BinOp::Ne => self.gen_compare(rd, rs, Cond::Ne, Cond::Eq),
                }
                self.release_reg(rd);
            }
        }
        Ok(())
    }

    fn gen_compare(&mut self, rd: Reg, rs: Reg, yes: Cond, no: Cond) {
        self.emit(Instr::Cmp(rd, Operand::Reg(rs)));
        self.emit(Instr::MoveCond(yes, rd, Operand::Imm(1)));
        self.emit(Instr::MoveCond(no, rd, Operand::Imm(0)));
    }

    /// Leave the address of `name[idx]...[idx]` in the result register and
    /// return the element type found there.
    fn gen_array_elem_addr(&mut self, name: &str, idxs: &[Expr]) -> Result<Type, String> {
        let rd = self.res_reg()?;
        let slot = self.slot(name)?;
        let delta = self.sp_offset + slot.offset;
        self.emit(Instr::Load(rd, Addr::Offset(Reg::Sp, delta)));
        let mut ty = slot.ty;
        for (depth, idx) in idxs.iter().enumerate() {
            let elem_ty = match ty {
                Type::Array(elem) => *elem,
                other => return Err(format!("internal: indexing into non-array type {other}")),
            };
            self.take_reg()?;
            let ri = self.res_reg()?;
            self.gen_expr(idx)?;
            // Skip the length word, then scale the index by the element size.
            self.emit(Instr::Add(rd, rd, Operand::Imm(4)));
            if type_size(&elem_ty) == 1 {
                self.emit(Instr::Add(rd, rd, Operand::Reg(ri)));
            } else {
                self.emit(Instr::Add(rd, rd, Operand::Lsl(ri, 2)));
            }
            self.release_reg(rd);
            if depth + 1 < idxs.len() {
                self.emit(Instr::Load(rd, Addr::Reg(rd)));
            }
            ty = elem_ty;
        }
        Ok(ty)
    }

    /// Evaluate an lvalue as a value (used for the pair underneath fst/snd).
    fn gen_lvalue_value(&mut self, lv: &LValue) -> Result<Type, String> {
        let rd = self.res_reg()?;
        match lv {
            LValue::Ident(name, _) => {
                let slot = self.slot(name)?;
                let delta = self.sp_offset + slot.offset;
                if type_size(&slot.ty) == 1 {
                    self.emit(Instr::LoadByte(rd, Addr::Offset(Reg::Sp, delta)));
                } else {
                    self.emit(Instr::Load(rd, Addr::Offset(Reg::Sp, delta)));
                }
                Ok(slot.ty)
            }
            LValue::ArrayElem(name, idxs, _) => {
                let ty = self.gen_array_elem_addr(name, idxs)?;
                if type_size(&ty) == 1 {
                    self.emit(Instr::LoadByte(rd, Addr::Reg(rd)));
                } else {
                    self.emit(Instr::Load(rd, Addr::Reg(rd)));
                }
                Ok(ty)
            }
            LValue::PairElem(sel, inner, _) => {
                let (elem_ty, off) = self.pair_elem_slot(*sel, inner)?;
                self.gen_lvalue_value(inner)?;
                if type_size(&elem_ty) == 1 {
                    self.emit(Instr::LoadByte(rd, Addr::Offset(rd, off)));
                } else {
                    self.emit(Instr::Load(rd, Addr::Offset(rd, off)));
                }
                Ok(elem_ty)
            }
        }
    }

    /// Leave the address of an lvalue in the result register and return the
    /// type stored at that address.
    fn gen_lvalue_addr(&mut self, lv: &LValue) -> Result<Type, String> {
        let rd = self.res_reg()?;
        match lv {
            LValue::Ident(name, _) => {
                let slot = self.slot(name)?;
                let delta = self.sp_offset + slot.offset;
                self.emit(Instr::Add(rd, Reg::Sp, Operand::Imm(delta)));
                Ok(slot.ty)
            }
            LValue::ArrayElem(name, idxs, _) => self.gen_array_elem_addr(name, idxs),
            LValue::PairElem(sel, inner, _) => {
                let (elem_ty, off) = self.pair_elem_slot(*sel, inner)?;
                self.gen_lvalue_value(inner)?;
                if off != 0 {
                    self.emit(Instr::Add(rd, rd, Operand::Imm(off)));
                }
                Ok(elem_ty)
            }
        }
    }

    /// The static element type behind fst/snd of `inner`, and its offset
    /// within the pair cell.
    fn pair_elem_slot(&self, sel: PairSel, inner: &LValue) -> Result<(Type, i32), String> {
        let inner_ty = self.lvalue_type(inner)?;
        let elem_ty = match inner_ty {
            Type::Pair(a, b) => match sel {
                PairSel::Fst => *a,
                PairSel::Snd => *b,
            },
            // Erasure lost the element type; treat the slot as a word.
            _ => Type::Any,
        };
        let off = match sel {
            PairSel::Fst => 0,
            PairSel::Snd => 4,
        };
        Ok((elem_ty, off))
    }

    fn lvalue_type(&self, lv: &LValue) -> Result<Type, String> {
        match lv {
            LValue::Ident(name, _) => Ok(self.slot(name)?.ty),
            LValue::ArrayElem(name, idxs, _) => {
                let mut t = self.slot(name)?.ty;
                for _ in idxs {
                    t = match t {
                        Type::Array(elem) => *elem,
                        other => {
                            return Err(format!("internal: indexing into non-array type {other}"))
                        }
                    };
                }
                Ok(t)
            }
            LValue::PairElem(sel, inner, _) => {
                let (ty, _) = self.pair_elem_slot(*sel, inner)?;
                Ok(ty)
            }
        }
    }

    fn gen_rvalue(&mut self, rv: &RValue) -> Result<(), String> {
        match rv {
            RValue::Expr(e) => self.gen_expr(e),
            RValue::ArrayLit(elems, _) => {
                let rd = self.res_reg()?;
                let elem_size = match elems.first() {
                    Some(e) => type_size(&self.expr_type(e)?),
                    None => 4,
                };
                let total = 4 + elems.len() as i32 * elem_size;
                self.emit(Instr::Load(Reg::R0, Addr::Const(total)));
                self.emit(Instr::BranchAndLink("malloc".to_string()));
                self.emit(Instr::Move(rd, Operand::Reg(Reg::R0)));
                self.take_reg()?;
                let ri = self.res_reg()?;
                self.emit(Instr::Load(ri, Addr::Const(elems.len() as i32)));
                self.emit(Instr::Store(ri, Addr::Reg(rd)));
                for (i, e) in elems.iter().enumerate() {
                    self.gen_expr(e)?;
                    let off = 4 + i as i32 * elem_size;
                    if elem_size == 1 {
                        self.emit(Instr::StoreByte(ri, Addr::Offset(rd, off)));
                    } else {
                        self.emit(Instr::Store(ri, Addr::Offset(rd, off)));
                    }
                }
                self.release_reg(rd);
                Ok(())
            }
            RValue::NewPair(a, b, _) => {
                let rd = self.res_reg()?;
                self.emit(Instr::Load(Reg::R0, Addr::Const(8)));
                self.emit(Instr::BranchAndLink("malloc".to_string()));
                self.emit(Instr::Move(rd, Operand::Reg(Reg::R0)));
                self.take_reg()?;
                let ri = self.res_reg()?;
                for (e, off) in [(a, 0), (b, 4)] {
                    let size = type_size(&self.expr_type(e)?);
                    self.gen_expr(e)?;
                    if size == 1 {
                        self.emit(Instr::StoreByte(ri, Addr::Offset(rd, off)));
                    } else {
                        self.emit(Instr::Store(ri, Addr::Offset(rd, off)));
                    }
                }
                self.release_reg(rd);
                Ok(())
            }
            RValue::Call(name, args, _) => {
                if !self.func_names.iter().any(|n| n == name) {
                    return Err(format!("internal: call to unregistered function '{name}'"));
                }
                let rd = self.res_reg()?;
                let mut pushed = 0;
                for arg in args {
                    let size = type_size(&self.expr_type(arg)?);
                    self.gen_expr(arg)?;
                    if size == 1 {
                        self.emit(Instr::StoreByte(rd, Addr::PreIndexed(Reg::Sp, -size)));
                    } else {
                        self.emit(Instr::Store(rd, Addr::PreIndexed(Reg::Sp, -size)));
                    }
                    self.sp_offset += size;
                    pushed += size;
                }
                self.emit(Instr::BranchAndLink(format!("wacc_{name}")));
                if pushed > 0 {
                    self.emit(Instr::Add(Reg::Sp, Reg::Sp, Operand::Imm(pushed)));
                    self.sp_offset -= pushed;
                }
                self.emit(Instr::Move(rd, Operand::Reg(Reg::R0)));
                Ok(())
            }
            RValue::PairElem(sel, inner, pos) => {
                // Re-use the lvalue path: fst/snd reads the same cell.
                let as_lvalue = LValue::PairElem(*sel, Box::new(inner.clone()), *pos);
                self.gen_lvalue_value(&as_lvalue)?;
                Ok(())
            }
        }
    }

    fn gen_helper(&mut self, h: Helper) {
        match h {
            Helper::PrintInt => {
                let fmt = self.pool.intern("%d");
                self.emit(Instr::Label(h.label().to_string()));
                self.emit(Instr::Push(Reg::Lr));
                self.emit(Instr::Move(Reg::R1, Operand::Reg(Reg::R0)));
                self.emit(Instr::Load(Reg::R0, Addr::Label(fmt)));
                self.emit(Instr::Add(Reg::R0, Reg::R0, Operand::Imm(4)));
                self.emit(Instr::BranchAndLink("printf".to_string()));
                self.flush_and_return();
            }
            Helper::PrintBool => {
                let t = self.pool.intern("true");
                let f = self.pool.intern("false");
                self.emit(Instr::Label(h.label().to_string()));
                self.emit(Instr::Push(Reg::Lr));
                self.emit(Instr::Cmp(Reg::R0, Operand::Imm(0)));
                self.emit(Instr::LoadCond(Cond::Ne, Reg::R0, Addr::Label(t)));
                self.emit(Instr::LoadCond(Cond::Eq, Reg::R0, Addr::Label(f)));
                self.emit(Instr::Add(Reg::R0, Reg::R0, Operand::Imm(4)));
                self.emit(Instr::BranchAndLink("printf".to_string()));
                self.flush_and_return();
            }
            Helper::PrintString => {
                let fmt = self.pool.intern("%.*s");
                self.emit(Instr::Label(h.label().to_string()));
                self.emit(Instr::Push(Reg::Lr));
                self.emit(Instr::Load(Reg::R1, Addr::Reg(Reg::R0)));
                self.emit(Instr::Add(Reg::R2, Reg::R0, Operand::Imm(4)));
                self.emit(Instr::Load(Reg::R0, Addr::Label(fmt)));
                self.emit(Instr::Add(Reg::R0, Reg::R0, Operand::Imm(4)));
                self.emit(Instr::BranchAndLink("printf".to_string()));
                self.flush_and_return();
            }
            Helper::PrintReference => {
                let fmt = self.pool.intern("%p");
                self.emit(Instr::Label(h.label().to_string()));
                self.emit(Instr::Push(Reg::Lr));
                self.emit(Instr::Move(Reg::R1, Operand::Reg(Reg::R0)));
                self.emit(Instr::Load(Reg::R0, Addr::Label(fmt)));
                self.emit(Instr::Add(Reg::R0, Reg::R0, Operand::Imm(4)));
                self.emit(Instr::BranchAndLink("printf".to_string()));
                self.flush_and_return();
            }
            Helper::PrintLn => {
                let empty = self.pool.intern("");
                self.emit(Instr::Label(h.label().to_string()));
                self.emit(Instr::Push(Reg::Lr));
                self.emit(Instr::Load(Reg::R0, Addr::Label(empty)));
                self.emit(Instr::Add(Reg::R0, Reg::R0, Operand::Imm(4)));
                self.emit(Instr::BranchAndLink("puts".to_string()));
                self.flush_and_return();
            }
            Helper::ReadInt => {
                let fmt = self.pool.intern("%d");
                self.emit(Instr::Label(h.label().to_string()));
                self.emit(Instr::Push(Reg::Lr));
                self.emit(Instr::Move(Reg::R1, Operand::Reg(Reg::R0)));
                self.emit(Instr::Load(Reg::R0, Addr::Label(fmt)));
                self.emit(Instr::Add(Reg::R0, Reg::R0, Operand::Imm(4)));
                self.emit(Instr::BranchAndLink("scanf".to_string()));
                self.emit(Instr::Pop(Reg::Pc));
            }
            Helper::ReadChar => {
                let fmt = self.pool.intern(" %c");
                self.emit(Instr::Label(h.label().to_string()));
                self.emit(Instr::Push(Reg::Lr));
                self.emit(Instr::Move(Reg::R1, Operand::Reg(Reg::R0)));
                self.emit(Instr::Load(Reg::R0, Addr::Label(fmt)));
                self.emit(Instr::Add(Reg::R0, Reg::R0, Operand::Imm(4)));
                self.emit(Instr::BranchAndLink("scanf".to_string()));
                self.emit(Instr::Pop(Reg::Pc));
            }
        }
    }

    fn flush_and_return(&mut self) {
        self.emit(Instr::Move(Reg::R0, Operand::Imm(0)));
        self.emit(Instr::BranchAndLink("fflush".to_string()));
        self.emit(Instr::Pop(Reg::Pc));
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.pool.entries.is_empty() {
            out.push_str("\t.data\n");
            for (i, entry) in self.pool.entries.iter().enumerate() {
                out.push('\n');
                out.push_str(&format!("{}:\n", msg_label(i)));
                out.push_str(&format!("\t.word {}\n", entry.raw_len));
                out.push_str(&format!("\t.ascii \"{}\\0\"\n", entry.escaped));
            }
            out.push('\n');
        }
        out.push_str("\t.text\n\n\t.global main\n");
        for i in &self.instrs {
            out.push_str(&format!("{i}\n"));
        }
        out
    }
}
