use super::{Block, DataType, Span, VarDecl};

/// 函数形参。数组形参的首维省略，`dims` 只保存其余各维的长度
#[derive(Debug, Clone, PartialEq)]
pub struct FuncFParam {
    pub ty: DataType,
    pub name: String,
    pub is_array: bool,
    pub dims: Vec<i32>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDef {
    pub ty: DataType,
    pub name: String,
    pub params: Vec<FuncFParam>,
    pub body: Block,
    pub span: Span,
}

// CompUnit ::= (Decl | FuncDef)+;
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalItem {
    Decl(VarDecl),
    FuncDef(FuncDef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompUnit {
    pub items: Vec<GlobalItem>,
}
