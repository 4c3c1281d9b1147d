//! # IR 生成模块
//!
//! 把类型检查通过的 AST 翻译为线性 IR。翻译分两种模式：
//!
//! 1. **取值模式**（`lower_expr`）：把表达式的值写入调用者给定的
//!    目的名，或自取一个新临时变量；返回实际存放结果的名字。
//! 2. **条件模式**（`lower_cond`）：接受 true/false 两个标号，
//!    按短路语义直接生成跳转，不物化布尔值。
//!
//! 数组访问产生显式的地址计算；读出元素时用 `*` 前缀哨兵延迟
//! `Load` 的发射，哨兵名一旦作为普通操作数使用就先被消解。
//! 本阶段不关心寄存器和栈帧，只负责 IR 的语义正确。

pub mod expr;
pub mod stmt;

use crate::front::ast::CompUnit;
use crate::front::symbol::SymbolTable;
use crate::ir::IrNode;
use crate::CompilerError;

/// IR 生成上下文：符号表加上不断增长的 IR 序列
pub struct LowerContext {
    pub symbols: SymbolTable,
    pub code: Vec<IrNode>,
}

impl LowerContext {
    pub fn new() -> Self {
        Self {
            symbols: SymbolTable::new(),
            code: Vec::new(),
        }
    }

    pub fn push(&mut self, node: IrNode) {
        self.code.push(node);
    }

    pub fn new_temp(&mut self) -> String {
        self.symbols.new_temp()
    }

    pub fn new_label(&mut self) -> String {
        self.symbols.new_label()
    }
}

/// 翻译整个编译单元，返回完整的 IR 序列
pub fn lower_program(ast: &CompUnit) -> Result<Vec<IrNode>, CompilerError> {
    let mut ctx = LowerContext::new();
    stmt::lower_comp_unit(ast, &mut ctx)?;
    Ok(ctx.code)
}
