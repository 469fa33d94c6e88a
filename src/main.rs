use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use std::env;
use std::fs;
use std::process;

mod ast;
mod codegen;
mod error;
mod sema;

use ast::*;

#[derive(Parser)]
#[grammar = "wacc.pest"]
struct WaccParser;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("usage: wacc <source-file>");
        process::exit(-1);
    }
    let src = match fs::read_to_string(&args[1]) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read {}: {e}", args[1]);
            process::exit(-1);
        }
    };

    let prog = match parse_program(&src) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{e}");
            process::exit(100);
        }
    };

    let (errors, print_table) = sema::check_program(&prog);
    if !errors.is_empty() {
        for err in &errors {
            eprintln!("{}", err.render(&src));
        }
        process::exit(200);
    }

    match codegen::generate(&prog, &print_table) {
        Ok(asm) => print!("{asm}"),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

fn parse_program(src: &str) -> Result<Program, String> {
    let mut pairs = WaccParser::parse(Rule::program, src).map_err(|e| {
        let (line, col) = match e.line_col {
            pest::error::LineColLocation::Pos((l, c)) => (l, c),
            pest::error::LineColLocation::Span((l, c), _) => (l, c),
        };
        format!("syntax error at line {line}, column {col}: {e}")
    })?;
    let p = pairs.next().ok_or("no program")?;
    let prog = build_program(p)?;
    for f in &prog.funcs {
        if !returns_on_all_paths(&f.body) {
            return Err(format!(
                "syntax error at line {}, column {}: function '{}' does not end with a return or exit on every path",
                f.pos.0, f.pos.1, f.name
            ));
        }
    }
    Ok(prog)
}

fn returns_on_all_paths(stats: &[Stat]) -> bool {
    match stats.last() {
        Some(s) => stat_terminates(s),
        None => false,
    }
}

fn stat_terminates(s: &Stat) -> bool {
    match s {
        Stat::Return(_, _) | Stat::Exit(_, _) => true,
        Stat::If(_, then_body, else_body, _) => {
            returns_on_all_paths(then_body) && returns_on_all_paths(else_body)
        }
        Stat::Scope(body, _) => returns_on_all_paths(body),
        _ => false,
    }
}

fn pos_of(p: &Pair<Rule>) -> Pos {
    let (line, col) = p.as_span().start_pos().line_col();
    (line as i32, col as i32)
}

fn build_program(p: Pair<Rule>) -> Result<Program, String> {
    let mut funcs = vec![];
    let mut body = vec![];
    for item in p.into_inner() {
        match item.as_rule() {
            Rule::func => funcs.push(build_func(item)?),
            Rule::stat_seq => body = build_stat_seq(item)?,
            _ => {}
        }
    }
    Ok(Program { funcs, body })
}

fn build_func(p: Pair<Rule>) -> Result<Func, String> {
    let pos = pos_of(&p);
    let mut ret_ty = None;
    let mut name = String::new();
    let mut params = vec![];
    let mut body = vec![];
    for item in p.into_inner() {
        match item.as_rule() {
            Rule::type_ => ret_ty = Some(build_type(item)?),
            Rule::ident => name = item.as_str().to_string(),
            Rule::param_list => params = build_param_list(item)?,
            Rule::stat_seq => body = build_stat_seq(item)?,
            _ => {}
        }
    }
    Ok(Func {
        ret_ty: ret_ty.ok_or("missing function return type")?,
        name,
        params,
        body,
        pos,
    })
}

fn build_param_list(p: Pair<Rule>) -> Result<Vec<Param>, String> {
    let mut params = vec![];
    for item in p.into_inner() {
        if item.as_rule() != Rule::param {
            continue;
        }
        let pos = pos_of(&item);
        let mut it = item.into_inner();
        let ty = build_type(it.next().ok_or("missing parameter type")?)?;
        let name = it
            .next()
            .ok_or("missing parameter name")?
            .as_str()
            .to_string();
        params.push(Param { ty, name, pos });
    }
    Ok(params)
}

fn build_stat_seq(p: Pair<Rule>) -> Result<Vec<Stat>, String> {
    let mut stats = vec![];
    for s in p.into_inner() {
        stats.push(build_stat(s)?);
    }
    Ok(stats)
}

fn build_stat(p: Pair<Rule>) -> Result<Stat, String> {
    let pos = pos_of(&p);
    match p.as_rule() {
        Rule::skip_stat => Ok(Stat::Skip(pos)),
        Rule::declare_stat => {
            let mut it = p.into_inner();
            let ty = build_type(it.next().unwrap())?;
            let name = it.next().unwrap().as_str().to_string();
            let rv = build_rvalue(it.next().unwrap())?;
            Ok(Stat::Declare(ty, name, rv, pos))
        }
        Rule::assign_stat => {
            let mut it = p.into_inner();
            let lv = build_lvalue(it.next().unwrap())?;
            let rv = build_rvalue(it.next().unwrap())?;
            Ok(Stat::Assign(lv, rv, pos))
        }
        Rule::read_stat => {
            let mut lv = None;
            for item in p.into_inner() {
                if item.as_rule() == Rule::lvalue {
                    lv = Some(build_lvalue(item)?);
                }
            }
            Ok(Stat::Read(lv.ok_or("missing read target")?, pos))
        }
        Rule::free_stat | Rule::return_stat | Rule::exit_stat | Rule::print_stat
        | Rule::println_stat => {
            let rule = p.as_rule();
            let mut expr = None;
            for item in p.into_inner() {
                if item.as_rule() == Rule::expr {
                    expr = Some(build_expr(item)?);
                }
            }
            let e = expr.ok_or("missing statement expression")?;
            Ok(match rule {
                Rule::free_stat => Stat::Free(e, pos),
                Rule::return_stat => Stat::Return(e, pos),
                Rule::exit_stat => Stat::Exit(e, pos),
                Rule::print_stat => Stat::Print(e, pos),
                _ => Stat::Println(e, pos),
            })
        }
        Rule::if_stat => {
            let mut cond = None;
            let mut seqs = vec![];
            for item in p.into_inner() {
                match item.as_rule() {
                    Rule::expr => cond = Some(build_expr(item)?),
                    Rule::stat_seq => seqs.push(build_stat_seq(item)?),
                    _ => {}
                }
            }
            let else_body = seqs.pop().ok_or("missing else branch")?;
            let then_body = seqs.pop().ok_or("missing then branch")?;
            Ok(Stat::If(
                cond.ok_or("missing if condition")?,
                then_body,
                else_body,
                pos,
            ))
        }
        Rule::while_stat => {
            let mut cond = None;
            let mut body = None;
            for item in p.into_inner() {
                match item.as_rule() {
                    Rule::expr => cond = Some(build_expr(item)?),
                    Rule::stat_seq => body = Some(build_stat_seq(item)?),
                    _ => {}
                }
            }
            Ok(Stat::While(
                cond.ok_or("missing while condition")?,
                body.ok_or("missing while body")?,
                pos,
            ))
        }
        Rule::scope_stat => {
            let mut body = None;
            for item in p.into_inner() {
                if item.as_rule() == Rule::stat_seq {
                    body = Some(build_stat_seq(item)?);
                }
            }
            Ok(Stat::Scope(body.ok_or("missing scope body")?, pos))
        }
        other => Err(format!("unexpected statement: {other:?}")),
    }
}

fn build_lvalue(p: Pair<Rule>) -> Result<LValue, String> {
    let pos = pos_of(&p);
    let inner = p.into_inner().next().ok_or("empty lvalue")?;
    match inner.as_rule() {
        Rule::pair_elem => {
            let (sel, lv) = build_pair_elem(inner)?;
            Ok(LValue::PairElem(sel, Box::new(lv), pos))
        }
        Rule::array_elem => {
            let (name, idxs, pos) = build_array_elem(inner)?;
            Ok(LValue::ArrayElem(name, idxs, pos))
        }
        Rule::ident => Ok(LValue::Ident(inner.as_str().to_string(), pos)),
        other => Err(format!("unexpected lvalue: {other:?}")),
    }
}

fn build_pair_elem(p: Pair<Rule>) -> Result<(PairSel, LValue), String> {
    let mut sel = None;
    let mut lv = None;
    for item in p.into_inner() {
        match item.as_rule() {
            Rule::kw_fst => sel = Some(PairSel::Fst),
            Rule::kw_snd => sel = Some(PairSel::Snd),
            Rule::lvalue => lv = Some(build_lvalue(item)?),
            _ => {}
        }
    }
    Ok((
        sel.ok_or("missing pair selector")?,
        lv.ok_or("missing pair operand")?,
    ))
}

fn build_array_elem(p: Pair<Rule>) -> Result<(String, Vec<Expr>, Pos), String> {
    let pos = pos_of(&p);
    let mut name = String::new();
    let mut idxs = vec![];
    for item in p.into_inner() {
        match item.as_rule() {
            Rule::ident => name = item.as_str().to_string(),
            Rule::expr => idxs.push(build_expr(item)?),
            _ => {}
        }
    }
    Ok((name, idxs, pos))
}

fn build_rvalue(p: Pair<Rule>) -> Result<RValue, String> {
    let pos = pos_of(&p);
    match p.as_rule() {
        Rule::array_lit => {
            let mut elems = vec![];
            for item in p.into_inner() {
                if item.as_rule() == Rule::expr {
                    elems.push(build_expr(item)?);
                }
            }
            Ok(RValue::ArrayLit(elems, pos))
        }
        Rule::newpair => {
            let mut exprs = vec![];
            for item in p.into_inner() {
                if item.as_rule() == Rule::expr {
                    exprs.push(build_expr(item)?);
                }
            }
            let snd = exprs.pop().ok_or("missing newpair operand")?;
            let fst = exprs.pop().ok_or("missing newpair operand")?;
            Ok(RValue::NewPair(fst, snd, pos))
        }
        Rule::call => {
            let mut name = String::new();
            let mut args = vec![];
            for item in p.into_inner() {
                match item.as_rule() {
                    Rule::ident => name = item.as_str().to_string(),
                    Rule::arg_list => {
                        for a in item.into_inner() {
                            if a.as_rule() == Rule::expr {
                                args.push(build_expr(a)?);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(RValue::Call(name, args, pos))
        }
        Rule::pair_elem => {
            let (sel, lv) = build_pair_elem(p)?;
            Ok(RValue::PairElem(sel, lv, pos))
        }
        Rule::expr => Ok(RValue::Expr(build_expr(p)?)),
        other => Err(format!("unexpected rvalue: {other:?}")),
    }
}

fn build_type(p: Pair<Rule>) -> Result<Type, String> {
    let mut base = None;
    let mut suffixes = 0usize;
    for item in p.into_inner() {
        match item.as_rule() {
            Rule::base_type => base = Some(build_base_type(&item)?),
            Rule::pair_type => base = Some(build_pair_type(item)?),
            Rule::array_suffix => suffixes += 1,
            _ => {}
        }
    }
    let mut ty = base.ok_or("missing type")?;
    for _ in 0..suffixes {
        ty = Type::Array(Box::new(ty));
    }
    Ok(ty)
}

fn build_base_type(p: &Pair<Rule>) -> Result<Type, String> {
    match p.as_str() {
        "int" => Ok(Type::Int),
        "bool" => Ok(Type::Bool),
        "char" => Ok(Type::Char),
        "string" => Ok(Type::String),
        other => Err(format!("unknown base type: {other}")),
    }
}

fn build_pair_type(p: Pair<Rule>) -> Result<Type, String> {
    let mut elems = vec![];
    for item in p.into_inner() {
        if item.as_rule() == Rule::pair_elem_type {
            elems.push(build_pair_elem_type(item)?);
        }
    }
    let snd = elems.pop().ok_or("missing pair element type")?;
    let fst = elems.pop().ok_or("missing pair element type")?;
    Ok(Type::Pair(Box::new(fst), Box::new(snd)))
}

fn build_pair_elem_type(p: Pair<Rule>) -> Result<Type, String> {
    let inner = p.into_inner().next().ok_or("empty pair element type")?;
    match inner.as_rule() {
        Rule::kw_pair => Ok(Type::ErasedPair),
        Rule::base_elem_type => {
            let mut base = None;
            let mut suffixes = 0usize;
            for item in inner.into_inner() {
                match item.as_rule() {
                    Rule::base_type => base = Some(build_base_type(&item)?),
                    Rule::array_suffix => suffixes += 1,
                    _ => {}
                }
            }
            let mut ty = base.ok_or("missing pair element base type")?;
            for _ in 0..suffixes {
                ty = Type::Array(Box::new(ty));
            }
            Ok(ty)
        }
        Rule::pair_arr_type => {
            let mut base = None;
            let mut suffixes = 0usize;
            for item in inner.into_inner() {
                match item.as_rule() {
                    Rule::pair_type => base = Some(build_pair_type(item)?),
                    Rule::array_suffix => suffixes += 1,
                    _ => {}
                }
            }
            let mut ty = base.ok_or("missing pair element type")?;
            for _ in 0..suffixes {
                ty = Type::Array(Box::new(ty));
            }
            Ok(ty)
        }
        other => Err(format!("unexpected pair element type: {other:?}")),
    }
}

fn build_expr(p: Pair<Rule>) -> Result<Expr, String> {
    match p.as_rule() {
        Rule::expr | Rule::paren_expr => build_expr(p.into_inner().next().unwrap()),
        Rule::or_expr | Rule::and_expr => {
            // || and && group to the right.
            let mut operands = vec![];
            let mut ops = vec![];
            for item in p.into_inner() {
                match item.as_rule() {
                    Rule::op_or | Rule::op_and => ops.push(parse_binop(item.as_str())?),
                    _ => operands.push(build_expr(item)?),
                }
            }
            let mut e = operands.pop().ok_or("empty expression")?;
            while let Some(lhs) = operands.pop() {
                let op = ops.pop().ok_or("operator without operand")?;
                let pos = lhs.pos();
                e = Expr::Binary(Box::new(lhs), op, Box::new(e), pos);
            }
            Ok(e)
        }
        Rule::eq_expr | Rule::cmp_expr => {
            let mut it = p.into_inner();
            let left = build_expr(it.next().unwrap())?;
            if let Some(op) = it.next() {
                let right = build_expr(it.next().unwrap())?;
                let pos = left.pos();
                Ok(Expr::Binary(
                    Box::new(left),
                    parse_binop(op.as_str())?,
                    Box::new(right),
                    pos,
                ))
            } else {
                Ok(left)
            }
        }
        Rule::add_expr | Rule::mul_expr => {
            let mut it = p.into_inner();
            let mut e = build_expr(it.next().unwrap())?;
            while let Some(op) = it.next() {
                let rhs = build_expr(it.next().unwrap())?;
                let pos = e.pos();
                e = Expr::Binary(Box::new(e), parse_binop(op.as_str())?, Box::new(rhs), pos);
            }
            Ok(e)
        }
        Rule::unary_expr => {
            let mut it = p.into_inner();
            let first = it.next().unwrap();
            if first.as_rule() == Rule::unary_op {
                let pos = pos_of(&first);
                let op = parse_unop(first.as_str())?;
                let inner = build_expr(it.next().unwrap())?;
                Ok(Expr::Unary(op, Box::new(inner), pos))
            } else {
                build_expr(first)
            }
        }
        Rule::int_lit => {
            let pos = pos_of(&p);
            let n: i32 = p.as_str().parse().map_err(|_| {
                format!(
                    "syntax error at line {}, column {}: integer literal '{}' is out of range",
                    pos.0,
                    pos.1,
                    p.as_str()
                )
            })?;
            Ok(Expr::IntLit(n, pos))
        }
        Rule::bool_lit => Ok(Expr::BoolLit(p.as_str() == "true", pos_of(&p))),
        Rule::null_lit => Ok(Expr::NullLit(pos_of(&p))),
        Rule::char_lit => {
            let pos = pos_of(&p);
            let s = p.as_str();
            let decoded = decode_escapes(&s[1..s.len() - 1])?;
            let c = decoded.chars().next().ok_or("empty character literal")?;
            Ok(Expr::CharLit(c, pos))
        }
        Rule::str_lit => {
            let pos = pos_of(&p);
            let s = p.as_str();
            let decoded = decode_escapes(&s[1..s.len() - 1])?;
            Ok(Expr::StrLit(decoded, pos))
        }
        Rule::array_elem => {
            let (name, idxs, pos) = build_array_elem(p)?;
            Ok(Expr::ArrayElem(name, idxs, pos))
        }
        Rule::ident => Ok(Expr::Ident(p.as_str().to_string(), pos_of(&p))),
        other => Err(format!("unexpected expression node: {other:?}")),
    }
}

fn parse_binop(s: &str) -> Result<BinOp, String> {
    match s {
        "*" => Ok(BinOp::Mul),
        "/" => Ok(BinOp::Div),
        "%" => Ok(BinOp::Mod),
        "+" => Ok(BinOp::Add),
        "-" => Ok(BinOp::Sub),
        ">" => Ok(BinOp::Gt),
        ">=" => Ok(BinOp::Ge),
        "<" => Ok(BinOp::Lt),
        "<=" => Ok(BinOp::Le),
        "==" => Ok(BinOp::Eq),
        "!=" => Ok(BinOp::Ne),
        "&&" => Ok(BinOp::And),
        "||" => Ok(BinOp::Or),
        other => Err(format!("unknown binary operator: {other}")),
    }
}

fn parse_unop(s: &str) -> Result<UnOp, String> {
    match s {
        "!" => Ok(UnOp::Not),
        "-" => Ok(UnOp::Neg),
        "len" => Ok(UnOp::Len),
        "ord" => Ok(UnOp::Ord),
        "chr" => Ok(UnOp::Chr),
        other => Err(format!("unknown unary operator: {other}")),
    }
}

fn decode_escapes(s: &str) -> Result<String, String> {
    let mut out = String::with_capacity(s.len());
    let mut it = s.chars();
    while let Some(c) = it.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let esc = it.next().ok_or("dangling escape in literal")?;
        out.push(match esc {
            '0' => '\0',
            'b' => '\u{8}',
            't' => '\t',
            'n' => '\n',
            'f' => '\u{c}',
            'r' => '\r',
            '"' => '"',
            '\'' => '\'',
            '\\' => '\\',
            other => return Err(format!("unknown escape: \\{other}")),
        });
    }
    Ok(out)
}
