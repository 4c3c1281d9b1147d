//! # 语义检查模块
//!
//! 在解析之后、IR 生成之前运行。检查通过后，AST 中的每个标识符和
//! 调用都保证合法，后续阶段直接信任输入。
//!
//! ## 检查内容
//!
//! 1. 名字解析：未声明、重复定义
//! 2. 类型一致性：赋值、初始化、运算数、条件、返回值
//! 3. 函数调用：实参个数与类型
//! 4. 数组：下标个数、花括号初始化列表的对齐与越界
//! 5. 全局初始化器必须是编译期常量
//!
//! 检查器会收集所有诊断信息（带源码位置）后一次性报告，
//! 而不是在第一个错误处停下。

use std::fmt;

use crate::front::ast::*;
use crate::front::symbol::ScopeStack;
use crate::utils::SourceMap;
use crate::CompilerError;

/// 语义类型。数组元素类型恒为 int，维度 -1 表示数组形参省略的首维
#[derive(Debug, Clone)]
pub enum Ty {
    /// 出错后的占位类型，与任何类型兼容，用于抑制连锁报错
    Unknown,
    Int,
    Void,
    Array(Vec<i32>),
    Func { ret: Box<Ty>, params: Vec<Ty> },
}

impl Ty {
    /// 类型兼容性。Unknown 与一切兼容；-1 维度作为通配符参与比较
    pub fn compatible(&self, other: &Ty) -> bool {
        match (self, other) {
            (Ty::Unknown, _) | (_, Ty::Unknown) => true,
            (Ty::Int, Ty::Int) | (Ty::Void, Ty::Void) => true,
            (Ty::Array(a), Ty::Array(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(&x, &y)| x == y || x == -1 || y == -1)
            }
            (
                Ty::Func { ret: r1, params: p1 },
                Ty::Func { ret: r2, params: p2 },
            ) => {
                r1.compatible(r2)
                    && p1.len() == p2.len()
                    && p1.iter().zip(p2.iter()).all(|(a, b)| a.compatible(b))
            }
            _ => false,
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Ty::Unknown => write!(f, "unknown"),
            Ty::Int => write!(f, "int"),
            Ty::Void => write!(f, "void"),
            Ty::Array(dims) => {
                write!(f, "int")?;
                let mut dims = dims.as_slice();
                if dims.first() == Some(&-1) {
                    write!(f, " (*)")?;
                    dims = &dims[1..];
                }
                for dim in dims {
                    write!(f, "[{}]", dim)?;
                }
                Ok(())
            }
            Ty::Func { ret, params } => {
                write!(f, "{} (", ret)?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", param)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// 对整个编译单元做语义检查
pub fn check(ast: &CompUnit, source_map: &SourceMap) -> Result<(), CompilerError> {
    let mut checker = Checker::new(source_map);
    checker.check_comp_unit(ast);
    if checker.errors.is_empty() {
        Ok(())
    } else {
        Err(CompilerError::SemanticError(checker.errors.join("\n")))
    }
}

struct Checker<'a> {
    scopes: ScopeStack<Ty>,
    /// 当前函数的返回类型，函数体外为 None
    ret_ty: Option<Ty>,
    errors: Vec<String>,
    source_map: &'a SourceMap,
}

impl<'a> Checker<'a> {
    fn new(source_map: &'a SourceMap) -> Self {
        Self {
            scopes: ScopeStack::new(),
            ret_ty: None,
            errors: Vec::new(),
            source_map,
        }
    }

    fn error_at(&mut self, message: impl Into<String>, span: Span) {
        self.errors.push(format!(
            "{} at {}",
            message.into(),
            self.source_map.format_location(span.begin)
        ));
    }

    fn insert(&mut self, name: &str, ty: Ty, span: Span) {
        if !self.scopes.insert(name.to_string(), ty) {
            self.error_at(format!("redefinition of `{}`", name), span);
        }
    }

    fn check_comp_unit(&mut self, ast: &CompUnit) {
        self.scopes.enter_scope();
        // 预声明运行时函数 read 和 write
        self.scopes.insert(
            "read".to_string(),
            Ty::Func { ret: Box::new(Ty::Int), params: Vec::new() },
        );
        self.scopes.insert(
            "write".to_string(),
            Ty::Func { ret: Box::new(Ty::Void), params: vec![Ty::Int] },
        );

        for item in &ast.items {
            match item {
                GlobalItem::Decl(decl) => self.check_var_decl(decl),
                GlobalItem::FuncDef(func) => self.check_func_def(func),
            }
        }
        self.scopes.exit_scope();
    }

    fn check_var_decl(&mut self, decl: &VarDecl) {
        let global = self.scopes.is_global_layer();
        for def in &decl.defs {
            let ty = if def.dims.is_empty() {
                Ty::Int
            } else {
                Ty::Array(def.dims.clone())
            };
            if def.dims.iter().any(|&d| d <= 0) {
                self.error_at(
                    format!("array `{}` must have a positive size", def.name),
                    def.span,
                );
            } else if let Some(init) = &def.init {
                self.check_var_init(def, init, global);
            }
            self.insert(&def.name, ty, def.span);
        }
    }

    fn check_var_init(&mut self, def: &VarDef, init: &InitVal, global: bool) {
        if global && !init_is_const(init) {
            self.error_at(
                format!("initializer of global `{}` is not a constant", def.name),
                init.span(),
            );
        }
        if def.dims.is_empty() {
            // 标量：允许 `int x = 1;` 与 C 风格的 `int x = {1};`
            match init {
                InitVal::Single(expr) => {
                    let ty = self.check_expr(expr);
                    if !ty.compatible(&Ty::Int) {
                        self.error_at(
                            format!("invalid conversion from `{}` to `int`", ty),
                            expr.span(),
                        );
                    }
                }
                InitVal::List(vals, span) => match vals.as_slice() {
                    [] => self.error_at("empty scalar initializer", *span),
                    [InitVal::Single(expr)] => {
                        let ty = self.check_expr(expr);
                        if !ty.compatible(&Ty::Int) {
                            self.error_at(
                                format!("invalid conversion from `{}` to `int`", ty),
                                expr.span(),
                            );
                        }
                    }
                    [InitVal::List(_, inner)] => {
                        self.error_at("braces around scalar initializer", *inner)
                    }
                    _ => self.error_at(
                        format!(
                            "scalar object `{}` requires one element in initializer",
                            def.name
                        ),
                        *span,
                    ),
                },
            }
        } else {
            match init {
                InitVal::Single(_) => self.error_at(
                    "array must be initialized with a brace-enclosed initializer",
                    init.span(),
                ),
                InitVal::List(vals, _) => {
                    self.check_init_list(&def.dims, 0, def.dims.len() - 1, vals)
                }
            }
        }
    }

    /// 花括号初始化列表的递归对齐检查（规则见 IR 生成模块）
    fn check_init_list(&mut self, dims: &[i32], l: usize, r: usize, vals: &[InitVal]) {
        let max_num: i64 = dims[l..=r].iter().map(|&d| d as i64).product();
        let mut finished: i64 = 0;
        for val in vals {
            match val {
                InitVal::List(inner, span) => {
                    if finished % dims[r] as i64 != 0 {
                        self.error_at("array initializer must be aligned", *span);
                        return;
                    }
                    let mut edge = r;
                    while edge > l && finished % dims[edge] as i64 == 0 {
                        edge -= 1;
                    }
                    self.check_init_list(dims, edge + 1, r, inner);
                    finished += sub_size(dims, edge + 1, r);
                }
                InitVal::Single(expr) => {
                    let ty = self.check_expr(expr);
                    if !ty.compatible(&Ty::Int) {
                        self.error_at(
                            format!("invalid conversion from `{}` to `int`", ty),
                            expr.span(),
                        );
                    }
                    finished += 1;
                }
            }
            if finished > max_num {
                self.error_at("excess elements in array initializer", val.span());
                break;
            }
        }
    }

    fn check_func_def(&mut self, func: &FuncDef) {
        let ret = match func.ty {
            DataType::Int => Ty::Int,
            DataType::Void => Ty::Void,
        };
        let params: Vec<Ty> = func.params.iter().map(param_ty).collect();
        // 先插入函数自身，允许递归调用
        self.insert(
            &func.name,
            Ty::Func { ret: Box::new(ret.clone()), params: params.clone() },
            func.span,
        );

        self.scopes.enter_scope();
        for (param, ty) in func.params.iter().zip(params) {
            self.insert(&param.name, ty, param.span);
        }
        self.ret_ty = Some(ret);
        // 函数体与形参共用同一层作用域
        for item in &func.body {
            match item {
                BlockItem::Decl(decl) => self.check_var_decl(decl),
                BlockItem::Stmt(stmt) => self.check_stmt(stmt),
            }
        }
        self.ret_ty = None;
        self.scopes.exit_scope();
    }

    fn check_block(&mut self, block: &Block) {
        self.scopes.enter_scope();
        for item in block {
            match item {
                BlockItem::Decl(decl) => self.check_var_decl(decl),
                BlockItem::Stmt(stmt) => self.check_stmt(stmt),
            }
        }
        self.scopes.exit_scope();
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Assign(lval, expr, span) => {
                let lhs = self.check_lval(lval);
                let rhs = self.check_expr(expr);
                if !lhs.compatible(&rhs) {
                    if matches!(rhs, Ty::Array(_)) || matches!(lhs, Ty::Array(_)) {
                        self.error_at("invalid array assignment", *span);
                    } else if matches!(rhs, Ty::Void) {
                        self.error_at("void value not ignored as it ought to be", *span);
                    } else {
                        self.error_at(
                            format!("invalid conversion from `{}` to `{}`", rhs, lhs),
                            *span,
                        );
                    }
                }
            }
            Stmt::Expr(expr) => {
                if let Some(expr) = expr {
                    self.check_expr(expr);
                }
            }
            Stmt::Block(block) => self.check_block(block),
            Stmt::If { cond, then_stmt, else_stmt, span } => {
                self.check_cond(cond, *span);
                self.check_stmt(then_stmt);
                if let Some(else_stmt) = else_stmt {
                    self.check_stmt(else_stmt);
                }
            }
            Stmt::While { cond, body, span } => {
                self.check_cond(cond, *span);
                self.check_stmt(body);
            }
            Stmt::Return(expr, span) => {
                let ret = match expr {
                    Some(e) => self.check_expr(e),
                    None => Ty::Void,
                };
                match self.ret_ty.clone() {
                    None => self.error_at("`return` outside of a function", *span),
                    Some(expected) => {
                        if !expected.compatible(&ret) {
                            if matches!(expected, Ty::Void) {
                                self.error_at(
                                    "return-statement with a value, in function returning `void`",
                                    *span,
                                );
                            } else if matches!(ret, Ty::Void) {
                                self.error_at(
                                    format!(
                                        "return-statement with no value, in function returning `{}`",
                                        expected
                                    ),
                                    *span,
                                );
                            } else {
                                self.error_at(
                                    format!(
                                        "invalid conversion from `{}` to `{}`",
                                        ret, expected
                                    ),
                                    *span,
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    fn check_cond(&mut self, cond: &Expr, span: Span) {
        let ty = self.check_expr(cond);
        if !ty.compatible(&Ty::Int) {
            self.error_at(format!("invalid conversion from `{}` to `int`", ty), span);
        }
    }

    fn check_lval(&mut self, lval: &LVal) -> Ty {
        let ty = match self.scopes.lookup(&lval.name) {
            Some(ty) => ty.clone(),
            None => {
                self.error_at(
                    format!("`{}` was not declared in this scope", lval.name),
                    lval.span,
                );
                return Ty::Unknown;
            }
        };
        if lval.indices.is_empty() {
            return ty;
        }

        for index in &lval.indices {
            let index_ty = self.check_expr(index);
            if !index_ty.compatible(&Ty::Int) {
                self.error_at(
                    format!("invalid types `{}` for array subscript", index_ty),
                    index.span(),
                );
            }
        }
        match ty {
            Ty::Array(dims) => {
                if lval.indices.len() > dims.len() {
                    self.error_at(
                        format!("too many indices for array `{}`", lval.name),
                        lval.span,
                    );
                    Ty::Unknown
                } else if lval.indices.len() == dims.len() {
                    Ty::Int
                } else {
                    // 部分下标访问退化为指针类型：首维变为 -1
                    let mut rest = vec![-1];
                    rest.extend_from_slice(&dims[lval.indices.len() + 1..]);
                    Ty::Array(rest)
                }
            }
            Ty::Unknown => Ty::Unknown,
            other => {
                self.error_at(
                    format!("invalid types `{}` for array subscript", other),
                    lval.span,
                );
                Ty::Unknown
            }
        }
    }

    fn check_expr(&mut self, expr: &Expr) -> Ty {
        match expr {
            Expr::IntConst(_, _) => Ty::Int,
            Expr::LVal(lval) => self.check_lval(lval),
            Expr::Unary(_, operand, span) => {
                let ty = self.check_expr(operand);
                if !ty.compatible(&Ty::Int) {
                    self.error_at(
                        format!("invalid conversion from `{}` to `int`", ty),
                        *span,
                    );
                }
                Ty::Int
            }
            Expr::Binary(op, lhs, rhs, span) => {
                let lty = self.check_expr(lhs);
                let rty = self.check_expr(rhs);
                if !lty.compatible(&rty) {
                    self.error_at(
                        format!(
                            "invalid operands of types `{}` and `{}` to binary `{}`",
                            lty,
                            rty,
                            binary_op_str(*op)
                        ),
                        *span,
                    );
                }
                lty
            }
            Expr::Rel(_, lhs, rhs, span) | Expr::Eq(_, lhs, rhs, span) => {
                let lty = self.check_expr(lhs);
                let rty = self.check_expr(rhs);
                if !lty.compatible(&rty) {
                    self.error_at(
                        format!("invalid conversion from `{}` to `{}`", rty, lty),
                        *span,
                    );
                }
                Ty::Int
            }
            Expr::LAnd(lhs, rhs, span) | Expr::LOr(lhs, rhs, span) => {
                for side in [lhs, rhs] {
                    let ty = self.check_expr(side);
                    if !ty.compatible(&Ty::Int) {
                        self.error_at(
                            format!("invalid conversion from `{}` to `int`", ty),
                            *span,
                        );
                    }
                }
                Ty::Int
            }
            Expr::Call(name, args, span) => self.check_call(name, args, *span),
        }
    }

    fn check_call(&mut self, name: &str, args: &[Expr], span: Span) -> Ty {
        let ty = match self.scopes.lookup(name) {
            Some(ty) => ty.clone(),
            None => {
                self.error_at(format!("`{}` was not declared in this scope", name), span);
                return Ty::Unknown;
            }
        };
        let (ret, params) = match ty {
            Ty::Func { ret, params } => (*ret, params),
            Ty::Unknown => return Ty::Unknown,
            _ => {
                self.error_at(format!("`{}` cannot be used as a function", name), span);
                return Ty::Unknown;
            }
        };
        if args.len() < params.len() {
            self.error_at(format!("too few arguments to function `{}`", name), span);
            return ret;
        }
        if args.len() > params.len() {
            self.error_at(format!("too many arguments to function `{}`", name), span);
            return ret;
        }
        for (arg, param) in args.iter().zip(&params) {
            let arg_ty = self.check_expr(arg);
            if !arg_ty.compatible(param) {
                self.error_at(
                    format!("invalid conversion from `{}` to `{}`", arg_ty, param),
                    arg.span(),
                );
            }
        }
        ret
    }
}

/// 形参的语义类型：数组形参首维记为 -1
fn param_ty(param: &FuncFParam) -> Ty {
    if param.is_array {
        let mut dims = vec![-1];
        dims.extend_from_slice(&param.dims);
        Ty::Array(dims)
    } else {
        Ty::Int
    }
}

fn sub_size(dims: &[i32], l: usize, r: usize) -> i64 {
    dims[l..=r].iter().map(|&d| d as i64).product()
}

fn binary_op_str(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
    }
}

/// 初始化器是否为编译期常量（全局变量要求）
fn init_is_const(init: &InitVal) -> bool {
    match init {
        InitVal::Single(expr) => expr_is_const(expr),
        InitVal::List(vals, _) => vals.iter().all(init_is_const),
    }
}

fn expr_is_const(expr: &Expr) -> bool {
    match expr {
        Expr::IntConst(_, _) => true,
        Expr::Unary(_, e, _) => expr_is_const(e),
        Expr::Binary(_, l, r, _)
        | Expr::Rel(_, l, r, _)
        | Expr::Eq(_, l, r, _)
        | Expr::LAnd(l, r, _)
        | Expr::LOr(l, r, _) => expr_is_const(l) && expr_is_const(r),
        Expr::LVal(_) | Expr::Call(_, _, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use crate::utils::SourceMap;

    fn check_source(src: &str) -> Result<(), String> {
        let ast = crate::minic::CompUnitParser::new()
            .parse(src)
            .expect("parse failed");
        let source_map = SourceMap::new(src);
        super::check(&ast, &source_map).map_err(|e| e.to_string())
    }

    #[test]
    fn accepts_well_typed_program() {
        let src = indoc! {"
            int g[2][3];
            int sum(int a[][3], int n) {
                int i = 0;
                int s = 0;
                while (i < n) {
                    s = s + a[i][0];
                    i = i + 1;
                }
                return s;
            }
            int main() {
                g[0][0] = 1;
                write(sum(g, 2));
                return 0;
            }
        "};
        assert!(check_source(src).is_ok());
    }

    #[test]
    fn rejects_undeclared_and_reports_location() {
        let err = check_source("int main() { return x; }").unwrap_err();
        assert!(err.contains("`x` was not declared"));
        assert!(err.contains("line 1"));
    }

    #[test]
    fn rejects_call_arity_mismatch() {
        let src = indoc! {"
            int f(int a, int b) { return a + b; }
            int main() { return f(1); }
        "};
        let err = check_source(src).unwrap_err();
        assert!(err.contains("too few arguments to function `f`"));
    }

    #[test]
    fn rejects_misaligned_initializer() {
        let err =
            check_source("int a[2][3] = {1, 2, {3}}; int main() { return 0; }").unwrap_err();
        assert!(err.contains("array initializer must be aligned"));
    }

    #[test]
    fn rejects_excess_initializer_elements() {
        let err =
            check_source("int a[2] = {1, 2, 3}; int main() { return 0; }").unwrap_err();
        assert!(err.contains("excess elements"));
    }

    #[test]
    fn rejects_return_value_in_void_function() {
        let src = indoc! {"
            void f() { return 1; }
            int main() { return 0; }
        "};
        let err = check_source(src).unwrap_err();
        assert!(err.contains("function returning `void`"));
    }

    #[test]
    fn rejects_wrong_subscript_count() {
        let src = indoc! {"
            int a[2][3];
            int main() { return a[1][2][3]; }
        "};
        let err = check_source(src).unwrap_err();
        assert!(err.contains("too many indices"));
    }

    #[test]
    fn rejects_nonconst_global_initializer() {
        let src = indoc! {"
            int f() { return 1; }
            int g = f();
            int main() { return g; }
        "};
        let err = check_source(src).unwrap_err();
        assert!(err.contains("not a constant"));
    }

    #[test]
    fn array_parameter_dimensions_use_wildcard() {
        let src = indoc! {"
            int first(int a[]) { return a[0]; }
            int main() {
                int v[8];
                v[0] = 42;
                return first(v);
            }
        "};
        assert!(check_source(src).is_ok());
    }

    #[test]
    fn collects_multiple_errors() {
        let src = indoc! {"
            int main() {
                x = 1;
                return y;
            }
        "};
        let err = check_source(src).unwrap_err();
        assert!(err.contains("`x` was not declared"));
        assert!(err.contains("`y` was not declared"));
    }
}
