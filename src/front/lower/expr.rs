//! 表达式翻译：取值模式与条件模式

use crate::back::target::SIZE_OF_INT;
use crate::front::ast::*;
use crate::front::lower::LowerContext;
use crate::ir::{BinOp, CmpOp, IrNode, UnOp};
use crate::CompilerError;

/// 消解解引用哨兵：`*p` 形式的操作数先显式 Load 到新临时变量
pub(crate) fn resolve_deref(name: String, ctx: &mut LowerContext) -> String {
    match name.strip_prefix('*') {
        Some(addr) => {
            let temp = ctx.new_temp();
            ctx.push(IrNode::Load { dst: temp.clone(), addr: addr.to_string() });
            temp
        }
        None => name,
    }
}

fn rel_to_cmp(op: RelOp) -> CmpOp {
    match op {
        RelOp::Lt => CmpOp::Lt,
        RelOp::Gt => CmpOp::Gt,
        RelOp::Le => CmpOp::Le,
        RelOp::Ge => CmpOp::Ge,
    }
}

fn eq_to_cmp(op: EqOp) -> CmpOp {
    match op {
        EqOp::Eq => CmpOp::Eq,
        EqOp::Ne => CmpOp::Ne,
    }
}

fn bin_to_ir(op: BinaryOp) -> BinOp {
    match op {
        BinaryOp::Add => BinOp::Add,
        BinaryOp::Sub => BinOp::Sub,
        BinaryOp::Mul => BinOp::Mul,
        BinaryOp::Div => BinOp::Div,
        BinaryOp::Mod => BinOp::Mod,
    }
}

/// 取值模式。`place` 为 None 时由被翻译的表达式决定落点，
/// 返回实际持有结果的名字（LVal 可能返回带 `*` 哨兵的名字）
pub fn lower_expr(
    expr: &Expr,
    place: Option<String>,
    ctx: &mut LowerContext,
) -> Result<String, CompilerError> {
    match expr {
        Expr::IntConst(value, _) => {
            let place = place.unwrap_or_else(|| ctx.new_temp());
            ctx.push(IrNode::LoadImm { dst: place.clone(), value: *value });
            Ok(place)
        }
        Expr::LVal(lval) => lower_lval(lval, place, ctx),
        Expr::Unary(UnaryOp::Not, _, _) => lower_bool_value(expr, place, ctx),
        Expr::Unary(op, operand, _) => {
            let place = place.unwrap_or_else(|| ctx.new_temp());
            let operand_place = ctx.new_temp();
            lower_expr(operand, Some(operand_place.clone()), ctx)?;
            let op = match op {
                UnaryOp::Plus => UnOp::Pos,
                UnaryOp::Minus => UnOp::Neg,
                UnaryOp::Not => unreachable!(),
            };
            ctx.push(IrNode::Unop { dst: place.clone(), src: operand_place, op });
            Ok(place)
        }
        Expr::Binary(op, lhs, rhs, _) => {
            let place = place.unwrap_or_else(|| ctx.new_temp());
            let left = lower_expr(lhs, None, ctx)?;
            let right = lower_expr(rhs, None, ctx)?;
            let left = resolve_deref(left, ctx);
            let right = resolve_deref(right, ctx);
            ctx.push(IrNode::Binop {
                dst: place.clone(),
                lhs: left,
                rhs: right,
                op: bin_to_ir(*op),
            });
            Ok(place)
        }
        // 关系/逻辑表达式作为右值：经条件路径物化为 0/1
        Expr::Rel(..) | Expr::Eq(..) | Expr::LAnd(..) | Expr::LOr(..) => {
            lower_bool_value(expr, place, ctx)
        }
        Expr::Call(name, args, _) => lower_call(name, args, place, false, ctx),
    }
}

/// 条件模式：按短路语义生成到 true/false 标号的跳转
pub fn lower_cond(
    expr: &Expr,
    true_label: &str,
    false_label: &str,
    ctx: &mut LowerContext,
) -> Result<(), CompilerError> {
    match expr {
        Expr::Rel(op, lhs, rhs, _) => {
            lower_branch(rel_to_cmp(*op), lhs, rhs, true_label, false_label, ctx)
        }
        Expr::Eq(op, lhs, rhs, _) => {
            lower_branch(eq_to_cmp(*op), lhs, rhs, true_label, false_label, ctx)
        }
        Expr::LAnd(lhs, rhs, _) => {
            let left_label = ctx.new_label();
            lower_cond(lhs, &left_label, false_label, ctx)?;
            ctx.push(IrNode::Label(left_label));
            lower_cond(rhs, true_label, false_label, ctx)
        }
        Expr::LOr(lhs, rhs, _) => {
            let left_label = ctx.new_label();
            lower_cond(lhs, true_label, &left_label, ctx)?;
            ctx.push(IrNode::Label(left_label));
            lower_cond(rhs, true_label, false_label, ctx)
        }
        Expr::Unary(UnaryOp::Not, operand, _) => {
            lower_cond(operand, false_label, true_label, ctx)
        }
        // 其余表达式按 (e != 0) 处理
        _ => {
            let place = ctx.new_temp();
            lower_expr(expr, Some(place.clone()), ctx)?;
            let zero = ctx.new_temp();
            ctx.push(IrNode::LoadImm { dst: zero.clone(), value: 0 });
            ctx.push(IrNode::CondGoto {
                lhs: place,
                rhs: zero,
                op: CmpOp::Ne,
                target: true_label.to_string(),
            });
            ctx.push(IrNode::Goto(false_label.to_string()));
            Ok(())
        }
    }
}

fn lower_branch(
    op: CmpOp,
    lhs: &Expr,
    rhs: &Expr,
    true_label: &str,
    false_label: &str,
    ctx: &mut LowerContext,
) -> Result<(), CompilerError> {
    let left = lower_expr(lhs, None, ctx)?;
    let left = resolve_deref(left, ctx);
    let right = lower_expr(rhs, None, ctx)?;
    let right = resolve_deref(right, ctx);
    ctx.push(IrNode::CondGoto {
        lhs: left,
        rhs: right,
        op,
        target: true_label.to_string(),
    });
    ctx.push(IrNode::Goto(false_label.to_string()));
    Ok(())
}

/// 布尔表达式的取值形式：条件路径落入 0/1
fn lower_bool_value(
    expr: &Expr,
    place: Option<String>,
    ctx: &mut LowerContext,
) -> Result<String, CompilerError> {
    let place = place.unwrap_or_else(|| ctx.new_temp());
    let true_label = ctx.new_label();
    let false_label = ctx.new_label();
    let end_label = ctx.new_label();
    lower_cond(expr, &true_label, &false_label, ctx)?;
    ctx.push(IrNode::Label(true_label));
    ctx.push(IrNode::LoadImm { dst: place.clone(), value: 1 });
    ctx.push(IrNode::Goto(end_label.clone()));
    ctx.push(IrNode::Label(false_label));
    ctx.push(IrNode::LoadImm { dst: place.clone(), value: 0 });
    ctx.push(IrNode::Label(end_label));
    Ok(place)
}

/// 左值翻译。无下标时给出变量本身（全局标量给出 `*地址` 哨兵），
/// 带下标时完成按行主序的扁平偏移计算：
/// 下标不足声明维数的访问产生指针，恰好用满维数的访问产生哨兵
pub fn lower_lval(
    lval: &LVal,
    place: Option<String>,
    ctx: &mut LowerContext,
) -> Result<String, CompilerError> {
    let mut name = ctx.symbols.lookup(&lval.name)?;

    if !lval.indices.is_empty() {
        let dims = ctx.symbols.lookup_array(&name)?.clone();
        let offset = ctx.new_temp();
        let block_place = ctx.new_temp();
        let cur_offset = ctx.new_temp();

        if ctx.symbols.is_global(&name) {
            ctx.push(IrNode::LoadGlobal { dst: offset.clone(), symbol: name.clone() });
        } else {
            // 局部数组基址或数组形参的指针值
            ctx.push(IrNode::Assign { dst: offset.clone(), src: name.clone() });
        }

        // 未使用的尾部维度并入块长
        let mut block = SIZE_OF_INT;
        for i in (lval.indices.len()..dims.len()).rev() {
            match dims[i] {
                Some(d) => block *= d,
                None => {
                    return Err(CompilerError::LoweringError(format!(
                        "array `{}` not fully initialized",
                        name
                    )))
                }
            }
        }

        for i in (0..lval.indices.len()).rev() {
            let dim_place = ctx.new_temp();
            lower_expr(&lval.indices[i], Some(dim_place.clone()), ctx)?;
            ctx.push(IrNode::LoadImm { dst: block_place.clone(), value: block });
            ctx.push(IrNode::Binop {
                dst: cur_offset.clone(),
                lhs: dim_place,
                rhs: block_place.clone(),
                op: BinOp::Mul,
            });
            ctx.push(IrNode::Binop {
                dst: offset.clone(),
                lhs: offset.clone(),
                rhs: cur_offset.clone(),
                op: BinOp::Add,
            });
            // 形参省略的首维不参与块长累乘
            if let Some(d) = dims[i] {
                block *= d;
            }
        }

        name = if dims.len() > lval.indices.len() {
            offset
        } else {
            format!("*{}", offset)
        };
    } else if ctx.symbols.is_global(&name) {
        let global_place = ctx.new_temp();
        ctx.push(IrNode::LoadGlobal { dst: global_place.clone(), symbol: name.clone() });
        name = if ctx.symbols.is_array(&name) {
            global_place
        } else {
            format!("*{}", global_place)
        };
    }

    match place {
        None => Ok(name),
        Some(place) => {
            match name.strip_prefix('*') {
                Some(addr) => {
                    ctx.push(IrNode::Load { dst: place.clone(), addr: addr.to_string() })
                }
                None => ctx.push(IrNode::Assign { dst: place.clone(), src: name }),
            }
            Ok(place)
        }
    }
}

/// 常量表达式求值，用于全局初始化器的折叠。
/// 检查器已保证表达式中不含变量引用和调用
pub fn eval_const_expr(expr: &Expr) -> Result<i32, CompilerError> {
    match expr {
        Expr::IntConst(value, _) => Ok(*value),
        Expr::Unary(op, operand, _) => {
            let value = eval_const_expr(operand)?;
            Ok(match op {
                UnaryOp::Plus => value,
                UnaryOp::Minus => value.wrapping_neg(),
                UnaryOp::Not => (value == 0) as i32,
            })
        }
        Expr::Binary(op, lhs, rhs, _) => {
            let lhs = eval_const_expr(lhs)?;
            let rhs = eval_const_expr(rhs)?;
            match op {
                BinaryOp::Add => Ok(lhs.wrapping_add(rhs)),
                BinaryOp::Sub => Ok(lhs.wrapping_sub(rhs)),
                BinaryOp::Mul => Ok(lhs.wrapping_mul(rhs)),
                BinaryOp::Div => {
                    if rhs == 0 {
                        Err(CompilerError::LoweringError(
                            "division by zero in constant expression".to_string(),
                        ))
                    } else {
                        Ok(lhs.wrapping_div(rhs))
                    }
                }
                BinaryOp::Mod => {
                    if rhs == 0 {
                        Err(CompilerError::LoweringError(
                            "modulo by zero in constant expression".to_string(),
                        ))
                    } else {
                        Ok(lhs.wrapping_rem(rhs))
                    }
                }
            }
        }
        Expr::Rel(op, lhs, rhs, _) => {
            let lhs = eval_const_expr(lhs)?;
            let rhs = eval_const_expr(rhs)?;
            let result = match op {
                RelOp::Lt => lhs < rhs,
                RelOp::Gt => lhs > rhs,
                RelOp::Le => lhs <= rhs,
                RelOp::Ge => lhs >= rhs,
            };
            Ok(result as i32)
        }
        Expr::Eq(op, lhs, rhs, _) => {
            let lhs = eval_const_expr(lhs)?;
            let rhs = eval_const_expr(rhs)?;
            let result = match op {
                EqOp::Eq => lhs == rhs,
                EqOp::Ne => lhs != rhs,
            };
            Ok(result as i32)
        }
        Expr::LAnd(lhs, rhs, _) => {
            Ok((eval_const_expr(lhs)? != 0 && eval_const_expr(rhs)? != 0) as i32)
        }
        Expr::LOr(lhs, rhs, _) => {
            Ok((eval_const_expr(lhs)? != 0 || eval_const_expr(rhs)? != 0) as i32)
        }
        Expr::LVal(_) | Expr::Call(_, _, _) => Err(CompilerError::LoweringError(
            "global initializer is not a constant expression".to_string(),
        )),
    }
}

/// 调用翻译。先把所有实参求值到新临时变量，再连续发射 `Arg` 序列，
/// 保证 `Arg 1..k` 紧贴其 `Call`（嵌套调用也不会交错）
pub fn lower_call(
    func: &str,
    args: &[Expr],
    place: Option<String>,
    ignore_return: bool,
    ctx: &mut LowerContext,
) -> Result<String, CompilerError> {
    let function = ctx.symbols.lookup(func)?;

    let mut arg_places = Vec::with_capacity(args.len());
    for arg in args {
        let arg_place = ctx.new_temp();
        lower_expr(arg, Some(arg_place.clone()), ctx)?;
        arg_places.push(arg_place);
    }
    for arg_place in arg_places {
        ctx.push(IrNode::Arg(arg_place));
    }

    if ignore_return {
        ctx.push(IrNode::Call(function));
        Ok(String::new())
    } else {
        let place = place.unwrap_or_else(|| ctx.new_temp());
        ctx.push(IrNode::CallWithRet { dst: place.clone(), func: function });
        Ok(place)
    }
}
