//! # 栈帧与寄存器状态表
//!
//! 每个函数发射期间的全部可变状态：标识符的栈偏移、寄存器指派、
//! 临时寄存器的租用与回写、调用现场的暂存。
//!
//! ## 栈帧布局（序幕执行后，从 sp 向上）
//!
//! ```text
//! sp + 0                      出参区（第 9 个起的实参）
//! sp + stack_preserve         局部/溢出/保存槽区（ident_offset 所指）
//! sp + frame_size             调用者帧：栈传入的形参（第 9 个起）
//! ```
//!
//! 栈传入形参的偏移用负数哨兵编码：第 k 个形参（k>8）记为
//! -(k-8)，实际地址为 sp + frame_size + (k-9)*4。
//!
//! ## 寄存器状态
//!
//! `reg_state` 每寄存器两位：bit0 为本条 IR 发射期间占用，
//! bit1 为装载后被写（回写时需要落栈）。临时寄存器在每个标号、
//! 分支和调用处整体回写并清空，不跨基本块持值。

use std::collections::{HashMap, HashSet};

use crate::back::insts::{Instruction, Reg};
use crate::back::program::AsmProgram;
use crate::back::regalloc::LiveInterval;
use crate::back::target::{
    fits_imm12, is_arg_reg, is_temp_reg, ARG_REGISTERS, NUM_OF_REG, REG_SP, SIZE_OF_INT,
    TEMP_REGISTERS,
};
use crate::ir::BinOp;
use crate::CompilerError;

pub struct FrameTable {
    /// 标识符 -> 帧内偏移；负数为栈传入形参的哨兵
    ident_offset: HashMap<String, i32>,
    /// 标识符 -> 常驻物理寄存器（线性扫描结果 + 预绑定形参）
    pub ident_reg: HashMap<String, usize>,
    /// 各标识符的活跃区间
    pub intervals: HashMap<String, LiveInterval>,
    /// 基址即值的标识符（局部数组）：物化时取 sp+偏移
    array_set: HashSet<String>,
    /// 数据段标号（跨函数保留）
    globals: HashSet<String>,
    /// 每个物理寄存器当前持有的标识符
    registers: [Option<String>; NUM_OF_REG],
    reg_state: [u8; NUM_OF_REG],
    /// 常驻寄存器当前是否持有标识符的现值
    reg_valid: [bool; NUM_OF_REG],
    /// 局部/溢出/保存槽区已分配字节数
    stack_offset: i32,
    /// 出参区大小
    stack_preserve: i32,
    /// 当前调用组出参区已用字节
    preserve_used: i32,
    /// 当前调用组已发射的实参个数
    cur_arg: usize,
    /// 因调用暂存到栈上的 a 寄存器常驻标识符
    parked: Vec<(String, usize)>,
    /// 帧总大小，序幕扫描完成后固定
    frame_size: i32,
    pub has_call: bool,
    /// 临时寄存器轮转逐出的游标
    last_victim: usize,
}

impl FrameTable {
    pub fn new() -> Self {
        Self {
            ident_offset: HashMap::new(),
            ident_reg: HashMap::new(),
            intervals: HashMap::new(),
            array_set: HashSet::new(),
            globals: HashSet::new(),
            registers: std::array::from_fn(|_| None),
            reg_state: [0; NUM_OF_REG],
            reg_valid: [false; NUM_OF_REG],
            stack_offset: 0,
            stack_preserve: 0,
            preserve_used: 0,
            cur_arg: 0,
            parked: Vec::new(),
            frame_size: 0,
            has_call: false,
            last_victim: 0,
        }
    }

    /// 清空单个函数的状态；全局符号集合保留
    pub fn reset_for_function(&mut self) {
        self.ident_offset.clear();
        self.ident_reg.clear();
        self.intervals.clear();
        self.array_set.clear();
        self.registers = std::array::from_fn(|_| None);
        self.reg_state = [0; NUM_OF_REG];
        self.reg_valid = [false; NUM_OF_REG];
        self.stack_offset = 0;
        self.stack_preserve = 0;
        self.preserve_used = 0;
        self.cur_arg = 0;
        self.parked.clear();
        self.frame_size = 0;
        self.has_call = false;
        self.last_victim = 0;
    }

    // ---------- 栈槽管理（序幕扫描阶段） ----------

    /// 分配一个帧内槽位。已存在则不动
    pub fn insert(&mut self, ident: &str, size: i32, store_addr: bool) {
        if self.ident_offset.contains_key(ident) {
            return;
        }
        if store_addr {
            self.array_set.insert(ident.to_string());
        }
        self.ident_offset.insert(ident.to_string(), self.stack_offset);
        self.stack_offset += size;
    }

    /// 登记第 k 个（k > 8，1 起）栈传入形参的哨兵偏移
    pub fn insert_stack_param(&mut self, ident: &str, k: usize) {
        self.ident_offset.insert(ident.to_string(), -((k - 8) as i32));
    }

    pub fn contains(&self, ident: &str) -> bool {
        self.ident_offset.contains_key(ident)
    }

    pub fn insert_global(&mut self, ident: &str) {
        self.globals.insert(ident.to_string());
    }

    pub fn is_array(&self, ident: &str) -> bool {
        self.array_set.contains(ident)
    }

    /// 出参区至少容纳 count 个超限实参
    pub fn reserve_outgoing(&mut self, count: usize) {
        let bytes = count as i32 * SIZE_OF_INT;
        if bytes > self.stack_preserve {
            self.stack_preserve = bytes;
        }
    }

    /// 序幕扫描完成后固定帧大小
    pub fn seal_frame(&mut self) {
        self.frame_size = self.stack_offset + self.stack_preserve;
    }

    pub fn frame_size(&self) -> i32 {
        self.frame_size
    }

    /// 标识符的实际 sp 偏移（消解哨兵并计入出参区）
    pub fn resolved_offset(&self, ident: &str) -> Result<i32, CompilerError> {
        let offset = *self.ident_offset.get(ident).ok_or_else(|| {
            CompilerError::CodeGenError(format!(
                "identifier `{}` not found in frame table",
                ident
            ))
        })?;
        if offset < 0 {
            Ok(self.frame_size + (-offset - 1) * SIZE_OF_INT)
        } else {
            Ok(offset + self.stack_preserve)
        }
    }

    // ---------- 寄存器物化 ----------

    /// 函数入口：形参 1..8 已随调用约定到位
    pub fn mark_params_live(&mut self, params: &[String]) {
        for (k, param) in params.iter().take(ARG_REGISTERS.len()).enumerate() {
            let reg = ARG_REGISTERS[k];
            self.registers[reg] = Some(param.clone());
            self.reg_valid[reg] = true;
        }
    }

    /// 获得寄存器的栈传形参（第 9 个起）在序幕中一次性装载。
    /// 入口装载支配所有使用点，此后寄存器即其权威存放处
    pub fn load_stack_params(
        &mut self,
        params: &[String],
        asm: &mut AsmProgram,
    ) -> Result<(), CompilerError> {
        for param in params.iter().skip(ARG_REGISTERS.len()) {
            if let Some(&reg) = self.ident_reg.get(param) {
                let offset = self.resolved_offset(param)?;
                self.load_from_sp(Reg(reg), offset, asm);
                self.registers[reg] = Some(param.clone());
                self.reg_valid[reg] = true;
            }
        }
        Ok(())
    }

    /// 基本块入口：数组基址的惰性物化不支配跨块路径，作废后
    /// 在新块内按需重新取址
    pub fn invalidate_array_homes(&mut self) {
        for (ident, &reg) in &self.ident_reg {
            if self.array_set.contains(ident) {
                self.reg_valid[reg] = false;
            }
        }
    }

    /// 把标识符解析到一个物理寄存器，按需发射装载或取址。
    /// 常驻寄存器的标识符直接用其家寄存器；栈驻留的从临时池取
    pub fn allocate_temp(
        &mut self,
        ident: &str,
        need_load: bool,
        asm: &mut AsmProgram,
    ) -> Result<Reg, CompilerError> {
        if let Some(&reg) = self.ident_reg.get(ident) {
            if self.registers[reg].as_deref() != Some(ident) {
                self.registers[reg] = Some(ident.to_string());
            }
            if !self.reg_valid[reg] && (self.array_set.contains(ident) || need_load) {
                self.materialize(Reg(reg), ident, need_load, asm)?;
                self.reg_valid[reg] = true;
            }
            self.reg_state[reg] |= 0b01;
            return Ok(Reg(reg));
        }

        if self.globals.contains(ident) {
            return Err(CompilerError::CodeGenError(format!(
                "global `{}` used as a plain operand",
                ident
            )));
        }
        if !self.ident_offset.contains_key(ident) {
            return Err(CompilerError::CodeGenError(format!(
                "identifier `{}` not found in frame table",
                ident
            )));
        }

        // 已有临时寄存器持有该标识符
        for &i in &TEMP_REGISTERS {
            if self.registers[i].as_deref() == Some(ident) {
                self.reg_state[i] = 0b11;
                return Ok(Reg(i));
            }
        }
        // 空闲临时寄存器
        for &i in &TEMP_REGISTERS {
            if self.registers[i].is_none() {
                self.registers[i] = Some(ident.to_string());
                self.materialize(Reg(i), ident, need_load, asm)?;
                return Ok(Reg(i));
            }
        }
        // 轮转逐出一个本步未占用的
        let pool = TEMP_REGISTERS.len();
        for step in 1..=pool {
            let index = (self.last_victim + step) % pool;
            let i = TEMP_REGISTERS[index];
            if self.reg_state[i] & 0b01 == 0 {
                self.clear(Reg(i), asm)?;
                self.registers[i] = Some(ident.to_string());
                self.materialize(Reg(i), ident, need_load, asm)?;
                self.last_victim = index;
                return Ok(Reg(i));
            }
        }
        Err(CompilerError::CodeGenError(
            "no available register".to_string(),
        ))
    }

    /// 在 reg 中物化标识符：数组取基址，标量按需从栈装载
    fn materialize(
        &mut self,
        reg: Reg,
        ident: &str,
        need_load: bool,
        asm: &mut AsmProgram,
    ) -> Result<(), CompilerError> {
        self.reg_state[reg.0] |= 0b01;
        if self.array_set.contains(ident) {
            let offset = self.resolved_offset(ident)?;
            if fits_imm12(offset) {
                asm.push(Instruction::Mv(reg, Reg(REG_SP)));
                if offset > 0 {
                    asm.push(Instruction::BinaryImm {
                        op: BinOp::Add,
                        dst: reg,
                        src: reg,
                        imm: offset,
                    });
                }
            } else {
                asm.push(Instruction::Li(reg, offset));
                asm.push(Instruction::Binary {
                    op: BinOp::Add,
                    dst: reg,
                    src1: Reg(REG_SP),
                    src2: reg,
                });
            }
        } else if need_load {
            if let Ok(offset) = self.resolved_offset(ident) {
                self.load_from_sp(reg, offset, asm);
            }
        }
        Ok(())
    }

    /// 本条 IR 发射完毕，释放寄存器的占用位。
    /// need_store 表示本步写入了新值：临时寄存器记为脏，
    /// 常驻寄存器则确认其现值有效
    pub fn free(&mut self, reg: Reg, need_store: bool) {
        let i = reg.0;
        if self.reg_state[i] & 0b01 == 0 || self.registers[i].is_none() {
            return;
        }
        if need_store {
            self.reg_state[i] |= 0b10;
            if let Some(ident) = &self.registers[i] {
                if self.ident_reg.get(ident.as_str()) == Some(&i) {
                    self.reg_valid[i] = true;
                }
            }
        }
        self.reg_state[i] &= 0b10;
    }

    /// 回写并遗忘一个寄存器的租户。只有临时寄存器的脏值落栈；
    /// 数组基址永不回写
    pub fn clear(&mut self, reg: Reg, asm: &mut AsmProgram) -> Result<(), CompilerError> {
        let i = reg.0;
        if let Some(ident) = self.registers[i].clone() {
            if self.reg_state[i] & 0b10 != 0 && is_temp_reg(i) && !self.array_set.contains(&ident)
            {
                let offset = self.resolved_offset(&ident)?;
                self.store_to_sp(Reg(i), offset, asm)?;
            }
        }
        self.reg_state[i] = 0;
        self.registers[i] = None;
        self.reg_valid[i] = false;
        Ok(())
    }

    /// 标号、分支与调用边界：临时寄存器不跨越
    pub fn clear_temps(&mut self, asm: &mut AsmProgram) -> Result<(), CompilerError> {
        for &i in &TEMP_REGISTERS {
            self.clear(Reg(i), asm)?;
        }
        Ok(())
    }

    // ---------- 调用现场 ----------

    /// 实参计数，1 起。第一个实参处会先暂存跨调用的 a 寄存器
    pub fn next_arg(&mut self) -> usize {
        self.cur_arg += 1;
        self.cur_arg
    }

    pub fn cur_arg(&self) -> usize {
        self.cur_arg
    }

    /// 出参区游标，发射一个超限实参后步进
    pub fn take_outgoing_slot(&mut self) -> i32 {
        let offset = self.preserve_used;
        self.preserve_used += SIZE_OF_INT;
        offset
    }

    /// 调用准备开始：把在 index 处仍活跃的 a 寄存器常驻标识符
    /// 暂存到各自的帧槽，并暂时摘除其寄存器映射，期间的读取走栈。
    /// 被调用结果的目标标识符区间起点在调用之后，天然不在此列
    pub fn park_live_args(
        &mut self,
        index: usize,
        asm: &mut AsmProgram,
    ) -> Result<(), CompilerError> {
        for (ident, reg) in self.args_live_at(index) {
            let offset = self.resolved_offset(&ident)?;
            self.store_to_sp(Reg(reg), offset, asm)?;
            self.ident_reg.remove(&ident);
            self.registers[reg] = None;
            self.reg_state[reg] = 0;
            self.reg_valid[reg] = false;
            self.parked.push((ident, reg));
        }
        Ok(())
    }

    /// 在 index 处仍然活跃的 a 寄存器常驻标识符，
    /// 按 (区间起点, 名字) 排序保证确定性
    pub fn args_live_at(&self, index: usize) -> Vec<(String, usize)> {
        let mut live: Vec<(String, usize)> = self
            .ident_reg
            .iter()
            .filter(|(_, &reg)| is_arg_reg(reg))
            .filter(|(ident, _)| {
                self.intervals
                    .get(*ident)
                    .map(|iv| iv.spans(index))
                    .unwrap_or(false)
            })
            .map(|(ident, &reg)| (ident.clone(), reg))
            .collect();
        live.sort_by(|a, b| {
            let ia = self.intervals[&a.0];
            let ib = self.intervals[&b.0];
            (ia.start, &a.0).cmp(&(ib.start, &b.0))
        });
        live
    }

    /// 调用返回后：恢复暂存的 a 寄存器并重建其映射
    pub fn restore_parked(&mut self, asm: &mut AsmProgram) -> Result<(), CompilerError> {
        for (ident, reg) in std::mem::take(&mut self.parked) {
            let offset = self.resolved_offset(&ident)?;
            self.load_from_sp(Reg(reg), offset, asm);
            self.ident_reg.insert(ident.clone(), reg);
            self.registers[reg] = Some(ident);
            self.reg_valid[reg] = true;
            self.reg_state[reg] = 0;
        }
        Ok(())
    }

    /// 调用完成：实参寄存器全部失效，出参区游标复位
    pub fn end_call(&mut self, asm: &mut AsmProgram) -> Result<(), CompilerError> {
        self.preserve_used = 0;
        self.cur_arg = 0;
        for &i in &ARG_REGISTERS {
            self.clear(Reg(i), asm)?;
        }
        Ok(())
    }

    // ---------- 立即数范围感知的访存 ----------

    pub fn load_from_sp(&mut self, reg: Reg, offset: i32, asm: &mut AsmProgram) {
        if fits_imm12(offset) {
            asm.push(Instruction::Lw(reg, Reg(REG_SP), offset));
        } else {
            // 目标寄存器自身作地址暂存
            asm.push(Instruction::Li(reg, offset));
            asm.push(Instruction::Binary {
                op: BinOp::Add,
                dst: reg,
                src1: Reg(REG_SP),
                src2: reg,
            });
            asm.push(Instruction::Lw(reg, reg, 0));
        }
    }

    pub fn store_to_sp(
        &mut self,
        reg: Reg,
        offset: i32,
        asm: &mut AsmProgram,
    ) -> Result<(), CompilerError> {
        if fits_imm12(offset) {
            asm.push(Instruction::Sw(reg, Reg(REG_SP), offset));
        } else {
            let scratch = self.scratch_reg(reg, asm)?;
            asm.push(Instruction::Li(scratch, offset));
            asm.push(Instruction::Binary {
                op: BinOp::Add,
                dst: scratch,
                src1: Reg(REG_SP),
                src2: scratch,
            });
            asm.push(Instruction::Sw(reg, scratch, 0));
        }
        Ok(())
    }

    /// 调整栈指针，越界立即数经临时寄存器中转
    pub fn add_sp(&mut self, offset: i32, asm: &mut AsmProgram) -> Result<(), CompilerError> {
        if offset == 0 {
            return Ok(());
        }
        if fits_imm12(offset) {
            asm.push(Instruction::BinaryImm {
                op: BinOp::Add,
                dst: Reg(REG_SP),
                src: Reg(REG_SP),
                imm: offset,
            });
        } else {
            let scratch = self.scratch_reg(Reg(REG_SP), asm)?;
            asm.push(Instruction::Li(scratch, offset));
            asm.push(Instruction::Binary {
                op: BinOp::Add,
                dst: Reg(REG_SP),
                src1: Reg(REG_SP),
                src2: scratch,
            });
        }
        Ok(())
    }

    /// 取一个可用作地址运算的临时寄存器。优先无租户的干净寄存器，
    /// 其次放弃一个未脏的租户；脏租户只有在回写不再需要中转时
    /// 才能腾退
    fn scratch_reg(&mut self, exclude: Reg, asm: &mut AsmProgram) -> Result<Reg, CompilerError> {
        for &i in &TEMP_REGISTERS {
            if i != exclude.0 && self.reg_state[i] == 0 && self.registers[i].is_none() {
                return Ok(Reg(i));
            }
        }
        for &i in &TEMP_REGISTERS {
            if i != exclude.0 && self.reg_state[i] & 0b01 == 0 && self.reg_state[i] & 0b10 == 0 {
                self.registers[i] = None;
                self.reg_state[i] = 0;
                return Ok(Reg(i));
            }
        }
        for &i in &TEMP_REGISTERS {
            if i == exclude.0 || self.reg_state[i] & 0b01 != 0 {
                continue;
            }
            let offset = match &self.registers[i] {
                Some(ident) => self.resolved_offset(ident)?,
                None => continue,
            };
            if fits_imm12(offset) {
                self.clear(Reg(i), asm)?;
                return Ok(Reg(i));
            }
        }
        Err(CompilerError::CodeGenError(
            "no available register".to_string(),
        ))
    }
}
