//! # 前端模块
//!
//! - `ast`: 语法树定义（由 lalrpop 生成的 parser 构造）
//! - `semantic`: 语义检查
//! - `symbol`: 作用域栈与重整符号表
//! - `lower`: AST 到线性 IR 的翻译

pub mod ast;
pub mod lower;
pub mod semantic;
pub mod symbol;

use crate::front::ast::CompUnit;
use crate::ir::IrNode;
use crate::utils::SourceMap;
use crate::CompilerError;

/// 语义检查通过后翻译为 IR
pub fn check_and_lower(
    ast: &CompUnit,
    source_map: &SourceMap,
) -> Result<Vec<IrNode>, CompilerError> {
    semantic::check(ast, source_map)?;
    lower::lower_program(ast)
}
