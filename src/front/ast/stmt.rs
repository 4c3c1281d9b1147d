use super::{Expr, LVal, Span, VarDecl};

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    // LVal "=" Exp ";"
    Assign(LVal, Expr, Span),
    // [Exp] ";"，None 表示空语句
    Expr(Option<Expr>),
    // Block
    Block(Block),
    // "if" "(" Exp ")" Stmt ["else" Stmt]
    If {
        cond: Expr,
        then_stmt: Box<Stmt>,
        else_stmt: Option<Box<Stmt>>,
        span: Span,
    },
    // "while" "(" Exp ")" Stmt
    While {
        cond: Expr,
        body: Box<Stmt>,
        span: Span,
    },
    // "return" [Exp] ";"
    Return(Option<Expr>, Span),
}

// BlockItem ::= VarDecl | Stmt;
#[derive(Debug, Clone, PartialEq)]
pub enum BlockItem {
    Decl(VarDecl),
    Stmt(Stmt),
}

// Block ::= "{" {BlockItem} "}";
pub type Block = Vec<BlockItem>;
