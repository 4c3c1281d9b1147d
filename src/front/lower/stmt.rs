//! 语句与声明的翻译

use crate::back::target::SIZE_OF_INT;
use crate::front::ast::*;
use crate::front::lower::expr::{eval_const_expr, lower_call, lower_cond, lower_expr, lower_lval};
use crate::front::lower::LowerContext;
use crate::ir::{BinOp, IrNode};
use crate::CompilerError;

/// 编译单元：先翻译全部全局变量（数据段），再翻译各函数
pub fn lower_comp_unit(ast: &CompUnit, ctx: &mut LowerContext) -> Result<(), CompilerError> {
    ctx.symbols.enter_scope();
    // 运行时函数直接登记在全局层
    ctx.symbols.insert("read")?;
    ctx.symbols.insert("write")?;

    for item in &ast.items {
        if let GlobalItem::Decl(decl) = item {
            lower_var_decl(decl, ctx)?;
        }
    }
    for item in &ast.items {
        if let GlobalItem::FuncDef(func) = item {
            lower_func_def(func, ctx)?;
        }
    }

    ctx.symbols.exit_scope();
    Ok(())
}

fn lower_func_def(func: &FuncDef, ctx: &mut LowerContext) -> Result<(), CompilerError> {
    let function_name = ctx.symbols.insert(&func.name)?;
    ctx.symbols.enter_scope();
    ctx.push(IrNode::FuncDef(function_name));

    for param in &func.params {
        let name = ctx.symbols.insert(&param.name)?;
        if param.is_array {
            let mut dims: Vec<Option<i32>> = vec![None];
            dims.extend(param.dims.iter().map(|&d| Some(d)));
            ctx.symbols.insert_array(name.clone(), dims);
        }
        ctx.push(IrNode::Param(name));
    }

    // 函数体与形参共用同一层作用域
    for item in &func.body {
        lower_block_item(item, ctx)?;
    }

    // 末尾不是 return 则补一个
    let ends_with_return = matches!(
        func.body.last(),
        Some(BlockItem::Stmt(Stmt::Return(_, _)))
    );
    if !ends_with_return {
        match func.ty {
            DataType::Void => ctx.push(IrNode::Return),
            DataType::Int => {
                let zero = ctx.new_temp();
                ctx.push(IrNode::LoadImm { dst: zero.clone(), value: 0 });
                ctx.push(IrNode::ReturnWithVal(zero));
            }
        }
    }

    ctx.symbols.exit_scope();
    Ok(())
}

fn lower_block(block: &Block, ctx: &mut LowerContext) -> Result<(), CompilerError> {
    ctx.symbols.enter_scope();
    for item in block {
        lower_block_item(item, ctx)?;
    }
    ctx.symbols.exit_scope();
    Ok(())
}

fn lower_block_item(item: &BlockItem, ctx: &mut LowerContext) -> Result<(), CompilerError> {
    match item {
        BlockItem::Decl(decl) => lower_var_decl(decl, ctx),
        BlockItem::Stmt(stmt) => lower_stmt(stmt, ctx),
    }
}

pub fn lower_stmt(stmt: &Stmt, ctx: &mut LowerContext) -> Result<(), CompilerError> {
    match stmt {
        Stmt::Assign(lval, rhs, _) => {
            let target = lower_lval(lval, None, ctx)?;
            match target.strip_prefix('*') {
                Some(addr) => {
                    let value = ctx.new_temp();
                    lower_expr(rhs, Some(value.clone()), ctx)?;
                    ctx.push(IrNode::Store { addr: addr.to_string(), src: value });
                }
                // 标量目标：右侧直接落入其重整名
                None => {
                    lower_expr(rhs, Some(target), ctx)?;
                }
            }
            Ok(())
        }
        Stmt::Expr(None) => Ok(()),
        Stmt::Expr(Some(expr)) => {
            match expr {
                Expr::Call(name, args, _) => {
                    lower_call(name, args, None, true, ctx)?;
                }
                _ => {
                    lower_expr(expr, None, ctx)?;
                }
            }
            Ok(())
        }
        Stmt::Block(block) => lower_block(block, ctx),
        Stmt::If { cond, then_stmt, else_stmt, .. } => {
            let then_label = ctx.new_label();
            // 无 else 时 else 标号即汇合点
            let else_label = ctx.new_label();
            lower_cond(cond, &then_label, &else_label, ctx)?;
            ctx.push(IrNode::Label(then_label));
            lower_stmt(then_stmt, ctx)?;
            match else_stmt {
                Some(else_stmt) => {
                    let end_label = ctx.new_label();
                    ctx.push(IrNode::Goto(end_label.clone()));
                    ctx.push(IrNode::Label(else_label));
                    lower_stmt(else_stmt, ctx)?;
                    ctx.push(IrNode::Label(end_label));
                }
                None => ctx.push(IrNode::Label(else_label)),
            }
            Ok(())
        }
        Stmt::While { cond, body, .. } => {
            let cond_label = ctx.new_label();
            let body_label = ctx.new_label();
            let end_label = ctx.new_label();
            ctx.push(IrNode::Label(cond_label.clone()));
            lower_cond(cond, &body_label, &end_label, ctx)?;
            ctx.push(IrNode::Label(body_label));
            lower_stmt(body, ctx)?;
            ctx.push(IrNode::Goto(cond_label));
            ctx.push(IrNode::Label(end_label));
            Ok(())
        }
        Stmt::Return(expr, _) => {
            match expr {
                Some(expr) => {
                    let place = ctx.new_temp();
                    lower_expr(expr, Some(place.clone()), ctx)?;
                    ctx.push(IrNode::ReturnWithVal(place));
                }
                None => ctx.push(IrNode::Return),
            }
            Ok(())
        }
    }
}

fn lower_var_decl(decl: &VarDecl, ctx: &mut LowerContext) -> Result<(), CompilerError> {
    for def in &decl.defs {
        let name = ctx.symbols.insert(&def.name)?;
        if !def.dims.is_empty() {
            ctx.symbols
                .insert_array(name.clone(), def.dims.iter().map(|&d| Some(d)).collect());
        }
        lower_var_def(def, &name, ctx)?;
    }
    Ok(())
}

fn lower_var_def(def: &VarDef, name: &str, ctx: &mut LowerContext) -> Result<(), CompilerError> {
    let global = ctx.symbols.is_global_layer();
    if global {
        ctx.push(IrNode::GlobalVar(name.to_string()));
    }

    if !def.dims.is_empty() {
        let total: i32 = def.dims.iter().product();
        if !global {
            ctx.push(IrNode::VarDec { ident: name.to_string(), size: total * SIZE_OF_INT });
        }
        match &def.init {
            Some(init) => {
                let vals = match init {
                    InitVal::List(vals, _) => vals,
                    InitVal::Single(_) => {
                        return Err(CompilerError::LoweringError(format!(
                            "array `{}` must be initialized with a brace-enclosed initializer",
                            def.name
                        )))
                    }
                };
                let walker = if global {
                    None
                } else {
                    let init_place = ctx.new_temp();
                    let num_place = ctx.new_temp();
                    ctx.push(IrNode::Assign {
                        dst: init_place.clone(),
                        src: name.to_string(),
                    });
                    Some((init_place, num_place))
                };
                lower_array_init(&def.dims, 0, def.dims.len() - 1, vals, &walker, ctx)?;
            }
            None => {
                if global {
                    for _ in 0..total {
                        ctx.push(IrNode::Word(0));
                    }
                }
            }
        }
    } else if let Some(init) = &def.init {
        let expr = scalar_init_expr(def, init)?;
        if global {
            ctx.push(IrNode::Word(eval_const_expr(expr)?));
        } else {
            lower_expr(expr, Some(name.to_string()), ctx)?;
        }
    } else if global {
        ctx.push(IrNode::Word(0));
    } else {
        // 无初始化的局部标量清零
        ctx.push(IrNode::LoadImm { dst: name.to_string(), value: 0 });
    }
    Ok(())
}

/// 标量初始化器：`int x = e;` 或 C 风格的 `int x = {e};`
fn scalar_init_expr<'a>(def: &VarDef, init: &'a InitVal) -> Result<&'a Expr, CompilerError> {
    match init {
        InitVal::Single(expr) => Ok(expr),
        InitVal::List(vals, _) => match vals.as_slice() {
            [InitVal::Single(expr)] => Ok(expr),
            _ => Err(CompilerError::LoweringError(format!(
                "scalar `{}` requires exactly one initializer element",
                def.name
            ))),
        },
    }
}

/// 花括号初始化列表的递归对齐填充。
///
/// 处理 `dims[l..=r]` 范围的子数组：标量元素占用下一个扁平槽位；
/// 嵌套列表必须对齐在某个尾部子数组的边界上，从最内维向外扫描，
/// 当已填个数能整除该维长度时继续外扩，把嵌套列表交给对应的更宽
/// 子数组递归处理。未填满的尾部补零。
///
/// `walker` 为 None 时在数据段发射 `.WORD`，否则携带
/// (游标指针, 元素暂存) 两个临时变量，逐元素 Store 并步进 4 字节
fn lower_array_init(
    dims: &[i32],
    l: usize,
    r: usize,
    vals: &[InitVal],
    walker: &Option<(String, String)>,
    ctx: &mut LowerContext,
) -> Result<(), CompilerError> {
    let total: i64 = dims[l..=r].iter().map(|&d| d as i64).product();
    let mut finished: i64 = 0;

    for val in vals {
        match val {
            InitVal::List(inner, _) => {
                let mut edge = r;
                while edge > l && finished % dims[edge] as i64 == 0 {
                    edge -= 1;
                }
                lower_array_init(dims, edge + 1, r, inner, walker, ctx)?;
                let sub: i64 = dims[edge + 1..=r].iter().map(|&d| d as i64).product();
                finished += sub;
            }
            InitVal::Single(expr) => {
                match walker {
                    None => ctx.push(IrNode::Word(eval_const_expr(expr)?)),
                    Some((init_place, num_place)) => {
                        lower_expr(expr, Some(num_place.clone()), ctx)?;
                        emit_store_and_bump(init_place, num_place, ctx);
                    }
                }
                finished += 1;
            }
        }
    }

    // 尾部补零
    if finished < total {
        if let Some((_, num_place)) = walker {
            ctx.push(IrNode::LoadImm { dst: num_place.clone(), value: 0 });
        }
        for _ in finished..total {
            match walker {
                None => ctx.push(IrNode::Word(0)),
                Some((init_place, num_place)) => {
                    emit_store_and_bump(init_place, num_place, ctx)
                }
            }
        }
    }
    Ok(())
}

fn emit_store_and_bump(init_place: &str, num_place: &str, ctx: &mut LowerContext) {
    ctx.push(IrNode::Store {
        addr: init_place.to_string(),
        src: num_place.to_string(),
    });
    ctx.push(IrNode::BinopImm {
        dst: init_place.to_string(),
        src: init_place.to_string(),
        imm: SIZE_OF_INT,
        op: BinOp::Add,
    });
}
