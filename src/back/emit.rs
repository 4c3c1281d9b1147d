//! # 指令选择与发射
//!
//! 单个函数的发射分两趟：
//!
//! 1. **序幕扫描**：活跃分析、线性扫描分配之后，逐节点登记帧槽
//!    （局部数组、栈驻留操作数、调用暂存槽、出参区、`_ra` 与
//!    被用到的被调用者保存寄存器的保存槽），随后固定帧大小。
//! 2. **生成**：发射序幕（压栈、保存 ra 与 s 寄存器），再逐节点
//!    选择指令。操作数经 `FrameTable::allocate_temp` 物化；标号、
//!    分支、调用处清空临时寄存器。
//!
//! ## 调用现场
//!
//! 被调用者保存寄存器由被调用方负责，调用点不重复保存。调用点
//! 需要保护的是 a 寄存器常驻（预绑定形参）且跨调用仍活跃的值：
//! 在实参准备开始处（首个 `Arg`，无参调用则在 `Call` 处）暂存入
//! 帧槽并摘除映射，期间的读取自动走栈；调用返回后成对恢复。
//! `CallWithRet` 的目标由调用定值，区间起点在调用之后，天然不在
//! 暂存集合里。

use crate::back::frame::FrameTable;
use crate::back::insts::{Instruction, Reg};
use crate::back::liveness;
use crate::back::program::AsmProgram;
use crate::back::regalloc;
use crate::back::target::{
    is_callee_saved, ARG_REGISTERS, REGISTER_NAMES, REG_A0, REG_RA, REG_ZERO, SIZE_OF_INT,
};
use crate::ir::{BinOp, IrNode, UnOp};
use crate::CompilerError;

/// 发射一个函数：`nodes` 为其 `FuncDef` 之后的 IR 子序列
pub fn emit_function(
    name: &str,
    nodes: &[IrNode],
    table: &mut FrameTable,
    asm: &mut AsmProgram,
) -> Result<(), CompilerError> {
    table.reset_for_function();

    let live = liveness::analyze(nodes)?;
    table.intervals = regalloc::build_intervals(&live);

    // 形参节点位于函数体开头
    let params: Vec<String> = nodes
        .iter()
        .map_while(|node| match node {
            IrNode::Param(ident) => Some(ident.clone()),
            _ => None,
        })
        .collect();
    for (k, param) in params.iter().enumerate() {
        if k < ARG_REGISTERS.len() {
            table.ident_reg.insert(param.clone(), ARG_REGISTERS[k]);
        } else {
            table.insert_stack_param(param, k + 1);
        }
    }

    regalloc::linear_scan(&table.intervals, &mut table.ident_reg);

    prologue_scan(nodes, table);

    if table.has_call {
        table.insert("_ra", SIZE_OF_INT, false);
    }
    let used_callee = used_callee_saved(table);
    for &reg in &used_callee {
        table.insert(&saved_slot_name(reg), SIZE_OF_INT, false);
    }
    table.seal_frame();

    // 序幕
    asm.push(Instruction::Label(name.to_string()));
    table.add_sp(-table.frame_size(), asm)?;
    if table.has_call {
        let offset = table.resolved_offset("_ra")?;
        table.store_to_sp(Reg(REG_RA), offset, asm)?;
    }
    for &reg in &used_callee {
        let offset = table.resolved_offset(&saved_slot_name(reg))?;
        table.store_to_sp(Reg(reg), offset, asm)?;
    }
    table.mark_params_live(&params);
    table.load_stack_params(&params, asm)?;

    for (index, node) in nodes.iter().enumerate() {
        emit_node(index, node, table, &used_callee, asm)?;
    }
    Ok(())
}

/// 逐节点登记帧槽并统计调用信息
fn prologue_scan(nodes: &[IrNode], table: &mut FrameTable) {
    let mut group_first_arg: Option<usize> = None;
    let mut group_args = 0usize;

    for (index, node) in nodes.iter().enumerate() {
        match node {
            IrNode::Param(_) => continue,
            IrNode::VarDec { ident, size } => {
                table.insert(ident, *size, true);
                continue;
            }
            IrNode::Arg(_) => {
                if group_first_arg.is_none() {
                    group_first_arg = Some(index);
                }
                group_args += 1;
            }
            IrNode::Call(_) | IrNode::CallWithRet { .. } => {
                table.has_call = true;
                let park_at = group_first_arg.unwrap_or(index);
                // 跨调用活跃的 a 寄存器常驻形参需要暂存槽
                for (ident, _) in table.args_live_at(park_at) {
                    table.insert(&ident, SIZE_OF_INT, false);
                }
                if group_args > ARG_REGISTERS.len() {
                    table.reserve_outgoing(group_args - ARG_REGISTERS.len());
                }
                group_first_arg = None;
                group_args = 0;
            }
            _ => {}
        }
        // 栈驻留的操作数在首次触及处获得槽位
        for ident in node.defs().into_iter().chain(node.uses()) {
            if !table.ident_reg.contains_key(ident) && !table.contains(ident) {
                table.insert(ident, SIZE_OF_INT, false);
            }
        }
    }
}

/// 线性扫描实际占用的被调用者保存寄存器，升序
fn used_callee_saved(table: &FrameTable) -> Vec<usize> {
    let mut used: Vec<usize> = table
        .ident_reg
        .values()
        .copied()
        .filter(|&reg| is_callee_saved(reg))
        .collect();
    used.sort_unstable();
    used.dedup();
    used
}

fn saved_slot_name(reg: usize) -> String {
    format!("_{}", REGISTER_NAMES[reg])
}

/// 还原被调用者保存寄存器与 ra，收回栈帧。
/// 恢复集合与序幕的保存集合严格一致
fn emit_epilogue(
    table: &mut FrameTable,
    used_callee: &[usize],
    asm: &mut AsmProgram,
) -> Result<(), CompilerError> {
    for &reg in used_callee {
        let offset = table.resolved_offset(&saved_slot_name(reg))?;
        table.load_from_sp(Reg(reg), offset, asm);
    }
    if table.has_call {
        let offset = table.resolved_offset("_ra")?;
        table.load_from_sp(Reg(REG_RA), offset, asm);
    }
    table.add_sp(table.frame_size(), asm)?;
    Ok(())
}

fn emit_node(
    index: usize,
    node: &IrNode,
    table: &mut FrameTable,
    used_callee: &[usize],
    asm: &mut AsmProgram,
) -> Result<(), CompilerError> {
    match node {
        IrNode::LoadImm { dst, value } => {
            let rd = table.allocate_temp(dst, false, asm)?;
            asm.push(Instruction::Li(rd, *value));
            table.free(rd, true);
        }
        IrNode::Assign { dst, src } => {
            emit_move(dst, src, table, asm)?;
        }
        IrNode::Binop { dst, lhs, rhs, op } => {
            let r1 = table.allocate_temp(lhs, true, asm)?;
            let r2 = table.allocate_temp(rhs, true, asm)?;
            let rd = table.allocate_temp(dst, false, asm)?;
            asm.push(Instruction::Binary { op: *op, dst: rd, src1: r1, src2: r2 });
            table.free(rd, true);
            table.free(r1, false);
            table.free(r2, false);
        }
        IrNode::BinopImm { dst, src, imm, op } => {
            // x op 0 退化为移动
            if *imm == 0 {
                emit_move(dst, src, table, asm)?;
            } else {
                let rs = table.allocate_temp(src, true, asm)?;
                let rd = table.allocate_temp(dst, false, asm)?;
                asm.push(Instruction::BinaryImm { op: *op, dst: rd, src: rs, imm: *imm });
                table.free(rd, true);
                table.free(rs, false);
            }
        }
        IrNode::Unop { dst, src, op } => {
            let rs = table.allocate_temp(src, true, asm)?;
            let rd = table.allocate_temp(dst, false, asm)?;
            match op {
                UnOp::Pos => asm.push(Instruction::Mv(rd, rs)),
                UnOp::Neg => asm.push(Instruction::Binary {
                    op: BinOp::Sub,
                    dst: rd,
                    src1: Reg(REG_ZERO),
                    src2: rs,
                }),
                UnOp::Not => {
                    return Err(CompilerError::CodeGenError(
                        "invalid unary operator in value position".to_string(),
                    ))
                }
            }
            table.free(rd, true);
            table.free(rs, false);
        }
        IrNode::Load { dst, addr } => {
            let ra = table.allocate_temp(addr, true, asm)?;
            let rd = table.allocate_temp(dst, false, asm)?;
            asm.push(Instruction::Lw(rd, ra, 0));
            table.free(rd, true);
            table.free(ra, false);
        }
        IrNode::Store { addr, src } => {
            let ra = table.allocate_temp(addr, true, asm)?;
            let rs = table.allocate_temp(src, true, asm)?;
            asm.push(Instruction::Sw(rs, ra, 0));
            table.free(ra, false);
            table.free(rs, false);
        }
        IrNode::Label(label) => {
            table.clear_temps(asm)?;
            table.invalidate_array_homes();
            asm.push(Instruction::Label(label.clone()));
        }
        IrNode::Goto(target) => {
            table.clear_temps(asm)?;
            asm.push(Instruction::J(target.clone()));
        }
        IrNode::CondGoto { lhs, rhs, op, target } => {
            let r1 = table.allocate_temp(lhs, true, asm)?;
            let r2 = table.allocate_temp(rhs, true, asm)?;
            table.clear_temps(asm)?;
            asm.push(Instruction::Branch {
                op: *op,
                lhs: r1,
                rhs: r2,
                target: target.clone(),
            });
            table.free(r1, false);
            table.free(r2, false);
        }
        IrNode::Param(_) | IrNode::VarDec { .. } => {}
        IrNode::Arg(src) => {
            if table.cur_arg() == 0 {
                table.park_live_args(index, asm)?;
            }
            let k = table.next_arg();
            let rs = table.allocate_temp(src, true, asm)?;
            if k <= ARG_REGISTERS.len() {
                asm.push(Instruction::Mv(Reg(ARG_REGISTERS[k - 1]), rs));
            } else {
                let slot = table.take_outgoing_slot();
                table.store_to_sp(rs, slot, asm)?;
            }
            table.free(rs, false);
        }
        IrNode::Call(func) => {
            if table.cur_arg() == 0 {
                table.park_live_args(index, asm)?;
            }
            table.clear_temps(asm)?;
            asm.push(Instruction::Call(func.clone()));
            table.end_call(asm)?;
            table.restore_parked(asm)?;
        }
        IrNode::CallWithRet { dst, func } => {
            if table.cur_arg() == 0 {
                table.park_live_args(index, asm)?;
            }
            table.clear_temps(asm)?;
            asm.push(Instruction::Call(func.clone()));
            table.end_call(asm)?;
            let rd = table.allocate_temp(dst, false, asm)?;
            if rd.0 != REG_A0 {
                asm.push(Instruction::Mv(rd, Reg(REG_A0)));
            }
            table.free(rd, true);
            table.restore_parked(asm)?;
        }
        IrNode::Return => {
            table.clear_temps(asm)?;
            emit_epilogue(table, used_callee, asm)?;
            asm.push(Instruction::Ret);
        }
        IrNode::ReturnWithVal(src) => {
            let rs = table.allocate_temp(src, true, asm)?;
            if rs.0 != REG_A0 {
                asm.push(Instruction::Mv(Reg(REG_A0), rs));
            }
            table.free(rs, false);
            table.clear_temps(asm)?;
            emit_epilogue(table, used_callee, asm)?;
            asm.push(Instruction::Ret);
        }
        IrNode::LoadGlobal { dst, symbol } => {
            let rd = table.allocate_temp(dst, false, asm)?;
            asm.push(Instruction::La(rd, symbol.clone()));
            table.free(rd, true);
        }
        IrNode::FuncDef(_) | IrNode::GlobalVar(_) | IrNode::Word(_) => {
            return Err(CompilerError::CodeGenError(format!(
                "unexpected node in function body: {}",
                node
            )))
        }
    }
    Ok(())
}

fn emit_move(
    dst: &str,
    src: &str,
    table: &mut FrameTable,
    asm: &mut AsmProgram,
) -> Result<(), CompilerError> {
    let rs = table.allocate_temp(src, true, asm)?;
    let rd = table.allocate_temp(dst, false, asm)?;
    asm.push(Instruction::Mv(rd, rs));
    table.free(rd, true);
    table.free(rs, false);
    Ok(())
}
