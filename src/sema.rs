use std::collections::HashMap;

use crate::ast::*;
use crate::error::SemanticError;

/// Expression types keyed by the position of a `print`/`println` argument.
/// The backend uses this to pick the matching output routine.
pub type PrintTable = HashMap<Pos, Type>;

#[derive(Debug, Clone)]
pub struct FuncSig {
    pub ret_ty: Type,
    pub param_tys: Vec<Type>,
}

/// Structural type equivalence.
///
/// `Any` and `Error` are wildcards, `null` is compatible with every pair
/// shape, a `char[]` may stand in for `string`, and an erased `pair` element
/// is compatible with anything a pair element could be.
pub fn types_match(a: &Type, b: &Type) -> bool {
    match (a, b) {
        (Type::Error, _) | (_, Type::Error) => true,
        (Type::Any, _) | (_, Type::Any) => true,
        (Type::ErasedPair, _) | (_, Type::ErasedPair) => true,
        (Type::Int, Type::Int)
        | (Type::Bool, Type::Bool)
        | (Type::Char, Type::Char)
        | (Type::String, Type::String)
        | (Type::Null, Type::Null) => true,
        (Type::String, Type::Array(e)) | (Type::Array(e), Type::String) => {
            matches!(**e, Type::Char)
        }
        (Type::Array(x), Type::Array(y)) => types_match(x, y),
        (Type::Pair(a1, a2), Type::Pair(b1, b2)) => types_match(a1, b1) && types_match(a2, b2),
        (Type::Null, Type::Pair(_, _)) | (Type::Pair(_, _), Type::Null) => true,
        _ => false,
    }
}

/// Element types of a `newpair` lose one level of pair structure.
fn erase_elem(t: Type) -> Type {
    match t {
        Type::Pair(_, _) | Type::Null => Type::ErasedPair,
        other => other,
    }
}

#[derive(Debug)]
struct ScopeStack {
    frames: Vec<HashMap<String, Type>>,
}

impl ScopeStack {
    fn new() -> Self {
        Self {
            frames: vec![HashMap::new()],
        }
    }

    fn enter(&mut self) {
        self.frames.push(HashMap::new());
    }

    fn exit(&mut self) {
        self.frames.pop();
    }

    /// Bind `name` in the innermost frame; false if it is already taken there.
    fn declare(&mut self, name: &str, ty: Type) -> bool {
        let top = self.frames.last_mut().expect("scope stack is never empty");
        if top.contains_key(name) {
            return false;
        }
        top.insert(name.to_string(), ty);
        true
    }

    fn lookup(&self, name: &str) -> Option<&Type> {
        self.frames.iter().rev().find_map(|f| f.get(name))
    }
}

pub struct Analyser {
    funcs: HashMap<String, FuncSig>,
    scopes: ScopeStack,
    // None while checking the program body.
    ret_ty: Option<Type>,
    errors: Vec<SemanticError>,
    print_table: PrintTable,
}

pub fn check_program(prog: &Program) -> (Vec<SemanticError>, PrintTable) {
    let mut a = Analyser {
        funcs: HashMap::new(),
        scopes: ScopeStack::new(),
        ret_ty: None,
        errors: Vec::new(),
        print_table: PrintTable::new(),
    };

    // All signatures are visible before any body is checked, so functions may
    // call forward and recurse freely.
    for f in &prog.funcs {
        if a.funcs.contains_key(&f.name) {
            a.errors.push(SemanticError::RedefinedFunction {
                name: f.name.clone(),
                pos: f.pos,
            });
            continue;
        }
        a.funcs.insert(
            f.name.clone(),
            FuncSig {
                ret_ty: f.ret_ty.clone(),
                param_tys: f.params.iter().map(|p| p.ty.clone()).collect(),
            },
        );
    }

    for f in &prog.funcs {
        a.check_func(f);
    }

    a.ret_ty = None;
    a.scopes = ScopeStack::new();
    a.check_stats(&prog.body);

    (a.errors, a.print_table)
}

impl Analyser {
    fn check_func(&mut self, f: &Func) {
        self.scopes = ScopeStack::new();
        for p in &f.params {
            if !self.scopes.declare(&p.name, p.ty.clone()) {
                self.errors.push(SemanticError::RedefinedVariable {
                    name: p.name.clone(),
                    pos: p.pos,
                });
            }
        }
        self.ret_ty = Some(f.ret_ty.clone());
        self.check_stats(&f.body);
        self.ret_ty = None;
    }

    fn check_stats(&mut self, stats: &[Stat]) {
        self.scopes.enter();
        for s in stats {
            self.check_stat(s);
        }
        self.scopes.exit();
    }

    fn check_stat(&mut self, s: &Stat) {
        match s {
            Stat::Skip(_) => {}
            Stat::Declare(ty, name, rv, pos) => {
                let rt = self.type_of_rvalue(rv);
                if !self.scopes.declare(name, ty.clone()) {
                    self.errors.push(SemanticError::RedefinedVariable {
                        name: name.clone(),
                        pos: *pos,
                    });
                    return;
                }
                if !types_match(ty, &rt) {
                    self.errors.push(SemanticError::TypeMismatch {
                        context: format!("declaration of '{name}'"),
                        expected: vec![ty.clone()],
                        got: rt,
                        pos: rv.pos(),
                    });
                }
            }
            Stat::Assign(lv, rv, _) => {
                let lt = self.type_of_lvalue(lv);
                let rt = self.type_of_rvalue(rv);
                // Moving one unknown pair element into another leaves both
                // sides untyped; at least one must pin the type down.
                if matches!(lv, LValue::PairElem(_, _, _))
                    && matches!(rv, RValue::PairElem(_, _, _))
                    && lt == Type::Any
                    && rt == Type::Any
                {
                    self.errors.push(SemanticError::TypeMismatch {
                        context: "assignment between pair elements of unknown type".to_string(),
                        expected: vec![],
                        got: Type::Any,
                        pos: rv.pos(),
                    });
                    return;
                }
                if !types_match(&lt, &rt) {
                    self.errors.push(SemanticError::TypeMismatch {
                        context: "assignment".to_string(),
                        expected: vec![lt],
                        got: rt,
                        pos: rv.pos(),
                    });
                }
            }
            Stat::Read(lv, _) => {
                let lt = self.type_of_lvalue(lv);
                // `read` must know which input routine to use, so the exact
                // target type is required; erased elements do not qualify.
                if !matches!(lt, Type::Int | Type::Char | Type::Error) {
                    self.errors.push(SemanticError::TypeMismatch {
                        context: "'read' target".to_string(),
                        expected: vec![Type::Int, Type::Char],
                        got: lt,
                        pos: lv.pos(),
                    });
                }
            }
            Stat::Free(e, _) => {
                let t = self.type_of_expr(e);
                let heap_allocated = matches!(
                    t,
                    Type::Array(_)
                        | Type::Pair(_, _)
                        | Type::ErasedPair
                        | Type::Null
                        | Type::Any
                        | Type::Error
                );
                if !heap_allocated {
                    self.errors.push(SemanticError::TypeMismatch {
                        context: "'free' argument".to_string(),
                        expected: vec![Type::Array(Box::new(Type::Any)), Type::ErasedPair],
                        got: t,
                        pos: e.pos(),
                    });
                }
            }
            Stat::Return(e, pos) => {
                let t = self.type_of_expr(e);
                match self.ret_ty.clone() {
                    None => self.errors.push(SemanticError::UnexpectedReturn { pos: *pos }),
                    Some(rt) => {
                        if !types_match(&rt, &t) {
                            self.errors.push(SemanticError::TypeMismatch {
                                context: "'return' value".to_string(),
                                expected: vec![rt],
                                got: t,
                                pos: e.pos(),
                            });
                        }
                    }
                }
            }
            Stat::Exit(e, _) => {
                let t = self.type_of_expr(e);
                if !types_match(&Type::Int, &t) {
                    self.errors.push(SemanticError::TypeMismatch {
                        context: "'exit' code".to_string(),
                        expected: vec![Type::Int],
                        got: t,
                        pos: e.pos(),
                    });
                }
            }
            Stat::Print(e, _) | Stat::Println(e, _) => {
                let t = self.type_of_expr(e);
                self.print_table.insert(e.pos(), t);
            }
            Stat::If(cond, then_body, else_body, _) => {
                self.check_cond(cond, "'if' condition");
                self.check_stats(then_body);
                self.check_stats(else_body);
            }
            Stat::While(cond, body, _) => {
                self.check_cond(cond, "'while' condition");
                self.check_stats(body);
            }
            Stat::Scope(body, _) => self.check_stats(body),
        }
    }

    fn check_cond(&mut self, cond: &Expr, context: &str) {
        let t = self.type_of_expr(cond);
        if !types_match(&Type::Bool, &t) {
            self.errors.push(SemanticError::TypeMismatch {
                context: context.to_string(),
                expected: vec![Type::Bool],
                got: t,
                pos: cond.pos(),
            });
        }
    }

    fn type_of_expr(&mut self, e: &Expr) -> Type {
        match e {
            Expr::IntLit(_, _) => Type::Int,
            Expr::BoolLit(_, _) => Type::Bool,
            Expr::CharLit(_, _) => Type::Char,
            Expr::StrLit(_, _) => Type::String,
            Expr::NullLit(_) => Type::Null,
            Expr::Ident(name, pos) => self.ident_type(name, *pos),
            Expr::ArrayElem(name, idxs, pos) => self.array_elem_type(name, idxs, *pos),
            Expr::Unary(op, inner, _) => {
                let t = self.type_of_expr(inner);
                let (want, out) = match op {
                    UnOp::Not => (Type::Bool, Type::Bool),
                    UnOp::Neg => (Type::Int, Type::Int),
                    UnOp::Len => (Type::Array(Box::new(Type::Any)), Type::Int),
                    UnOp::Ord => (Type::Char, Type::Int),
                    UnOp::Chr => (Type::Int, Type::Char),
                };
                if !types_match(&want, &t) {
                    self.errors.push(SemanticError::TypeMismatch {
                        context: format!("operand of '{op}'"),
                        expected: vec![want],
                        got: t,
                        pos: inner.pos(),
                    });
                }
                out
            }
            Expr::Binary(lhs, op, rhs, _) => {
                let lt = self.type_of_expr(lhs);
                let rt = self.type_of_expr(rhs);
                match op {
                    BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Add | BinOp::Sub => {
                        self.expect_operand(op, &Type::Int, &lt, lhs.pos());
                        self.expect_operand(op, &Type::Int, &rt, rhs.pos());
                        Type::Int
                    }
                    BinOp::Gt | BinOp::Ge | BinOp::Lt | BinOp::Le => {
                        if !types_match(&Type::Int, &lt) && !types_match(&Type::Char, &lt) {
                            self.errors.push(SemanticError::TypeMismatch {
                                context: format!("operand of '{op}'"),
                                expected: vec![Type::Int, Type::Char],
                                got: lt,
                                pos: lhs.pos(),
                            });
                        } else if !types_match(&lt, &rt) {
                            self.errors.push(SemanticError::TypeMismatch {
                                context: format!("operand of '{op}'"),
                                expected: vec![lt],
                                got: rt,
                                pos: rhs.pos(),
                            });
                        }
                        Type::Bool
                    }
                    BinOp::Eq | BinOp::Ne => {
                        if !types_match(&lt, &rt) {
                            self.errors.push(SemanticError::TypeMismatch {
                                context: format!("operand of '{op}'"),
                                expected: vec![lt],
                                got: rt,
                                pos: rhs.pos(),
                            });
                        }
                        Type::Bool
                    }
                    BinOp::And | BinOp::Or => {
                        self.expect_operand(op, &Type::Bool, &lt, lhs.pos());
                        self.expect_operand(op, &Type::Bool, &rt, rhs.pos());
                        Type::Bool
                    }
                }
            }
        }
    }

    fn expect_operand(&mut self, op: &BinOp, want: &Type, got: &Type, pos: Pos) {
        if !types_match(want, got) {
            self.errors.push(SemanticError::TypeMismatch {
                context: format!("operand of '{op}'"),
                expected: vec![want.clone()],
                got: got.clone(),
                pos,
            });
        }
    }

    fn ident_type(&mut self, name: &str, pos: Pos) -> Type {
        match self.scopes.lookup(name) {
            Some(t) => t.clone(),
            None => {
                self.errors.push(SemanticError::UndefinedVariable {
                    name: name.to_string(),
                    pos,
                });
                Type::Error
            }
        }
    }

    fn array_elem_type(&mut self, name: &str, idxs: &[Expr], pos: Pos) -> Type {
        for idx in idxs {
            let it = self.type_of_expr(idx);
            if !types_match(&Type::Int, &it) {
                self.errors.push(SemanticError::TypeMismatch {
                    context: "array index".to_string(),
                    expected: vec![Type::Int],
                    got: it,
                    pos: idx.pos(),
                });
            }
        }
        let mut t = self.ident_type(name, pos);
        if t == Type::Error {
            return Type::Error;
        }
        let mut declared = 0usize;
        {
            let mut probe = &t;
            while let Type::Array(elem) = probe {
                declared += 1;
                probe = elem;
            }
        }
        if declared < idxs.len() {
            self.errors.push(SemanticError::ArrayDimensionMismatch {
                name: name.to_string(),
                declared,
                used: idxs.len(),
                pos,
            });
            return Type::Error;
        }
        for _ in idxs {
            t = match t {
                Type::Array(elem) => *elem,
                _ => unreachable!("rank checked above"),
            };
        }
        t
    }

    fn pair_elem_type(&mut self, sel: PairSel, inner_ty: Type, pos: Pos) -> Type {
        match inner_ty {
            Type::Pair(a, b) => match sel {
                PairSel::Fst => *a,
                PairSel::Snd => *b,
            },
            // The pair shape is unknown: the element type is too.
            Type::ErasedPair | Type::Null | Type::Any => Type::Any,
            Type::Error => Type::Error,
            other => {
                self.errors.push(SemanticError::TypeMismatch {
                    context: format!("'{sel}' of a non-pair value"),
                    expected: vec![Type::ErasedPair],
                    got: other,
                    pos,
                });
                Type::Error
            }
        }
    }

    fn type_of_lvalue(&mut self, lv: &LValue) -> Type {
        match lv {
            LValue::Ident(name, pos) => self.ident_type(name, *pos),
            LValue::ArrayElem(name, idxs, pos) => self.array_elem_type(name, idxs, *pos),
            LValue::PairElem(sel, inner, pos) => {
                let it = self.type_of_lvalue(inner);
                self.pair_elem_type(*sel, it, *pos)
            }
        }
    }

    fn type_of_rvalue(&mut self, rv: &RValue) -> Type {
        match rv {
            RValue::Expr(e) => self.type_of_expr(e),
            RValue::ArrayLit(elems, _) => {
                let mut elem_ty = Type::Any;
                for (i, e) in elems.iter().enumerate() {
                    let t = self.type_of_expr(e);
                    if i == 0 {
                        elem_ty = t;
                    } else if !types_match(&elem_ty, &t) {
                        self.errors.push(SemanticError::TypeMismatch {
                            context: "array literal element".to_string(),
                            expected: vec![elem_ty.clone()],
                            got: t,
                            pos: e.pos(),
                        });
                    }
                }
                Type::Array(Box::new(elem_ty))
            }
            RValue::NewPair(a, b, _) => {
                let ta = self.type_of_expr(a);
                let tb = self.type_of_expr(b);
                Type::Pair(Box::new(erase_elem(ta)), Box::new(erase_elem(tb)))
            }
            RValue::Call(name, args, pos) => {
                let arg_tys: Vec<(Type, Pos)> = args
                    .iter()
                    .map(|a| (self.type_of_expr(a), a.pos()))
                    .collect();
                let sig = match self.funcs.get(name) {
                    Some(sig) => sig.clone(),
                    None => {
                        self.errors.push(SemanticError::UndefinedFunction {
                            name: name.clone(),
                            pos: *pos,
                        });
                        return Type::Error;
                    }
                };
                if sig.param_tys.len() != arg_tys.len() {
                    self.errors.push(SemanticError::IncorrectNumberOfArgs {
                        name: name.clone(),
                        expected: sig.param_tys.len(),
                        got: arg_tys.len(),
                        pos: *pos,
                    });
                    return sig.ret_ty;
                }
                for (i, (param_ty, (arg_ty, arg_pos))) in
                    sig.param_tys.iter().zip(&arg_tys).enumerate()
                {
                    if !types_match(param_ty, arg_ty) {
                        self.errors.push(SemanticError::TypeMismatch {
                            context: format!("argument {} of call to '{name}'", i + 1),
                            expected: vec![param_ty.clone()],
                            got: arg_ty.clone(),
                            pos: *arg_pos,
                        });
                    }
                }
                sig.ret_ty
            }
            RValue::PairElem(sel, inner, pos) => {
                let it = self.type_of_lvalue(inner);
                self.pair_elem_type(*sel, it, *pos)
            }
        }
    }
}
