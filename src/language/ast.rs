use crate::language::{span::Span, types::ChanDir};
use std::fmt;

#[derive(Clone, Debug, Default)]
pub struct File {
    pub package: String,
    pub imports: Vec<Import>,
    pub decls: Vec<Decl>,
}

#[derive(Clone, Debug)]
pub struct Import {
    pub alias: Option<String>,
    pub path: String,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub enum Decl {
    Func(FuncDecl),
    Type(TypeDecl),
    Var(VarDecl),
    Const(ConstDecl),
}

#[derive(Clone, Debug)]
pub struct FuncDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub results: Vec<Param>,
    pub variadic: bool,
    pub body: Block,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct Param {
    pub name: Option<String>,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct TypeDecl {
    pub name: String,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct VarDecl {
    pub names: Vec<Identifier>,
    pub ty: Option<TypeExpr>,
    pub values: Vec<Expr>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct ConstDecl {
    pub names: Vec<Identifier>,
    pub ty: Option<TypeExpr>,
    pub values: Vec<Expr>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub enum TypeExpr {
    Named(Identifier),
    Qualified {
        package: String,
        name: String,
        span: Span,
    },
    Chan {
        dir: ChanDir,
        elem: Box<TypeExpr>,
        span: Span,
    },
    Slice {
        elem: Box<TypeExpr>,
        span: Span,
    },
    Map {
        key: Box<TypeExpr>,
        value: Box<TypeExpr>,
        span: Span,
    },
    Func {
        params: Vec<TypeExpr>,
        results: Vec<TypeExpr>,
        variadic: bool,
        span: Span,
    },
    Struct {
        fields: Vec<FieldDecl>,
        span: Span,
    },
    Interface {
        methods: Vec<MethodSpec>,
        span: Span,
    },
}

#[derive(Clone, Debug)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeExpr,
}

#[derive(Clone, Debug)]
pub struct MethodSpec {
    pub name: String,
    pub params: Vec<TypeExpr>,
    pub results: Vec<TypeExpr>,
}

impl TypeExpr {
    pub fn named(name: impl Into<String>) -> Self {
        TypeExpr::Named(Identifier::new(name))
    }

    pub fn chan(dir: ChanDir, elem: TypeExpr) -> Self {
        TypeExpr::Chan {
            dir,
            elem: Box::new(elem),
            span: Span::default(),
        }
    }

    pub fn slice(elem: TypeExpr) -> Self {
        TypeExpr::Slice {
            elem: Box::new(elem),
            span: Span::default(),
        }
    }

    pub fn map(key: TypeExpr, value: TypeExpr) -> Self {
        TypeExpr::Map {
            key: Box::new(key),
            value: Box::new(value),
            span: Span::default(),
        }
    }

    pub fn span(&self) -> Span {
        match self {
            TypeExpr::Named(ident) => ident.span,
            TypeExpr::Qualified { span, .. }
            | TypeExpr::Chan { span, .. }
            | TypeExpr::Slice { span, .. }
            | TypeExpr::Map { span, .. }
            | TypeExpr::Func { span, .. }
            | TypeExpr::Struct { span, .. }
            | TypeExpr::Interface { span, .. } => *span,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

impl Block {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self {
            statements,
            span: Span::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Stmt {
    Expr(Expr),
    Send {
        chan: Expr,
        value: Expr,
        span: Span,
    },
    Define {
        names: Vec<Identifier>,
        values: Vec<Expr>,
        span: Span,
    },
    Assign {
        targets: Vec<Expr>,
        op: AssignOp,
        values: Vec<Expr>,
        span: Span,
    },
    IncDec {
        target: Expr,
        increment: bool,
        span: Span,
    },
    Var(VarDecl),
    Const(ConstDecl),
    Block(Block),
    If(IfStmt),
    For(ForStmt),
    Range(RangeStmt),
    Switch(SwitchStmt),
    Break(Span),
    Continue(Span),
    Return {
        values: Vec<Expr>,
        span: Span,
    },
}

#[derive(Clone, Debug)]
pub struct IfStmt {
    pub init: Option<Box<Stmt>>,
    pub condition: Expr,
    pub then_branch: Block,
    pub else_branch: Option<Box<Stmt>>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct ForStmt {
    pub init: Option<Box<Stmt>>,
    pub condition: Option<Expr>,
    pub post: Option<Box<Stmt>>,
    pub body: Block,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct RangeStmt {
    pub key: Option<Identifier>,
    pub value: Option<Identifier>,
    pub expr: Expr,
    pub body: Block,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct SwitchStmt {
    pub init: Option<Box<Stmt>>,
    pub tag: Option<Expr>,
    pub clauses: Vec<CaseClause>,
    pub span: Span,
}

/// A `case` clause; an empty `values` list is the `default` clause.
#[derive(Clone, Debug)]
pub struct CaseClause {
    pub values: Vec<Expr>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Op(BinaryOp),
}

impl Stmt {
    pub fn expr(expr: Expr) -> Self {
        Stmt::Expr(expr)
    }

    pub fn send(chan: Expr, value: Expr) -> Self {
        Stmt::Send {
            chan,
            value,
            span: Span::default(),
        }
    }

    pub fn define(names: &[&str], values: Vec<Expr>) -> Self {
        Stmt::Define {
            names: names.iter().map(|name| Identifier::new(*name)).collect(),
            values,
            span: Span::default(),
        }
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        Stmt::Assign {
            targets: vec![target],
            op: AssignOp::Assign,
            values: vec![value],
            span: Span::default(),
        }
    }

    pub fn op_assign(target: Expr, op: BinaryOp, value: Expr) -> Self {
        Stmt::Assign {
            targets: vec![target],
            op: AssignOp::Op(op),
            values: vec![value],
            span: Span::default(),
        }
    }

    pub fn inc(target: Expr) -> Self {
        Stmt::IncDec {
            target,
            increment: true,
            span: Span::default(),
        }
    }

    pub fn ret(values: Vec<Expr>) -> Self {
        Stmt::Return {
            values,
            span: Span::default(),
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Stmt::Expr(expr) => expr.span(),
            Stmt::Send { span, .. }
            | Stmt::Define { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::IncDec { span, .. }
            | Stmt::Return { span, .. } => *span,
            Stmt::Var(decl) => decl.span,
            Stmt::Const(decl) => decl.span,
            Stmt::Block(block) => block.span,
            Stmt::If(stmt) => stmt.span,
            Stmt::For(stmt) => stmt.span,
            Stmt::Range(stmt) => stmt.span,
            Stmt::Switch(stmt) => stmt.span,
            Stmt::Break(span) | Stmt::Continue(span) => *span,
        }
    }
}

#[derive(Clone, Debug)]
pub enum Expr {
    Identifier(Identifier),
    Literal(Literal),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        spread: bool,
        span: Span,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    Slice {
        base: Box<Expr>,
        low: Option<Box<Expr>>,
        high: Option<Box<Expr>>,
        span: Span,
    },
    Selector {
        base: Box<Expr>,
        field: Identifier,
        span: Span,
    },
    TypeAssert {
        expr: Box<Expr>,
        ty: TypeExpr,
        span: Span,
    },
    FuncLit(Box<FuncLit>),
    Composite {
        ty: TypeExpr,
        elements: Vec<Element>,
        span: Span,
    },
    Type(TypeExpr),
}

#[derive(Clone, Debug)]
pub struct FuncLit {
    pub params: Vec<Param>,
    pub results: Vec<Param>,
    pub variadic: bool,
    pub body: Block,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct Element {
    pub key: Option<Expr>,
    pub value: Expr,
}

#[derive(Clone, Debug)]
pub struct Identifier {
    pub name: String,
    pub span: Span,
}

impl Identifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            span: Span::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Int(i128, Span),
    Float(f64, Span),
    Imaginary(f64, Span),
    Rune(char, Span),
    String(String, Span),
}

impl Literal {
    pub fn span(&self) -> Span {
        match self {
            Literal::Int(_, span)
            | Literal::Float(_, span)
            | Literal::Imaginary(_, span)
            | Literal::Rune(_, span)
            | Literal::String(_, span) => *span,
        }
    }
}

#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    AndNot,
    Shl,
    Shr,
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::AndNot => "&^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }

    pub fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr)
    }
}

#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Neg,
    Not,
    BitNot,
    Recv,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Plus => "+",
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "^",
            UnaryOp::Recv => "<-",
        }
    }
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Identifier(Identifier::new(name))
    }

    pub fn int(value: i128) -> Self {
        Expr::Literal(Literal::Int(value, Span::default()))
    }

    pub fn float(value: f64) -> Self {
        Expr::Literal(Literal::Float(value, Span::default()))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expr::Literal(Literal::String(value.into(), Span::default()))
    }

    pub fn unary(op: UnaryOp, expr: Expr) -> Self {
        Expr::Unary {
            op,
            expr: Box::new(expr),
            span: Span::default(),
        }
    }

    pub fn recv(chan: Expr) -> Self {
        Expr::unary(UnaryOp::Recv, chan)
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            span: Span::default(),
        }
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: Box::new(callee),
            args,
            spread: false,
            span: Span::default(),
        }
    }

    pub fn index(base: Expr, index: Expr) -> Self {
        Expr::Index {
            base: Box::new(base),
            index: Box::new(index),
            span: Span::default(),
        }
    }

    pub fn selector(base: Expr, field: impl Into<String>) -> Self {
        Expr::Selector {
            base: Box::new(base),
            field: Identifier::new(field),
            span: Span::default(),
        }
    }

    pub fn make(ty: TypeExpr, args: Vec<Expr>) -> Self {
        let mut all = vec![Expr::Type(ty)];
        all.extend(args);
        Expr::call(Expr::ident("make"), all)
    }

    pub fn span(&self) -> Span {
        match self {
            Expr::Identifier(ident) => ident.span,
            Expr::Literal(literal) => literal.span(),
            Expr::FuncLit(lit) => lit.span,
            Expr::Type(ty) => ty.span(),
            Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Call { span, .. }
            | Expr::Index { span, .. }
            | Expr::Slice { span, .. }
            | Expr::Selector { span, .. }
            | Expr::TypeAssert { span, .. }
            | Expr::Composite { span, .. } => *span,
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Identifier(ident) => write!(f, "{}", ident.name),
            Expr::Literal(literal) => match literal {
                Literal::Int(v, _) => write!(f, "{v}"),
                Literal::Float(v, _) => write!(f, "{v:?}"),
                Literal::Imaginary(v, _) => write!(f, "{v:?}i"),
                Literal::Rune(c, _) => write!(f, "{c:?}"),
                Literal::String(s, _) => write!(f, "{s:?}"),
            },
            Expr::Unary { op, expr, .. } => write!(f, "{}{}", op.symbol(), expr),
            Expr::Binary {
                op, left, right, ..
            } => write!(f, "{} {} {}", left, op.symbol(), right),
            Expr::Call {
                callee,
                args,
                spread,
                ..
            } => {
                write!(f, "{callee}(")?;
                write_list(f, args)?;
                if *spread {
                    write!(f, "...")?;
                }
                write!(f, ")")
            }
            Expr::Index { base, index, .. } => write!(f, "{base}[{index}]"),
            Expr::Slice {
                base, low, high, ..
            } => {
                write!(f, "{base}[")?;
                if let Some(low) = low {
                    write!(f, "{low}")?;
                }
                write!(f, ":")?;
                if let Some(high) = high {
                    write!(f, "{high}")?;
                }
                write!(f, "]")
            }
            Expr::Selector { base, field, .. } => write!(f, "{}.{}", base, field.name),
            Expr::TypeAssert { expr, ty, .. } => write!(f, "{expr}.({ty})"),
            Expr::FuncLit(_) => write!(f, "func literal"),
            Expr::Composite { ty, elements, .. } => {
                write!(f, "{ty}{{")?;
                for (idx, element) in elements.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    if let Some(key) = &element.key {
                        write!(f, "{key}: ")?;
                    }
                    write!(f, "{}", element.value)?;
                }
                write!(f, "}}")
            }
            Expr::Type(ty) => write!(f, "{ty}"),
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::Named(ident) => write!(f, "{}", ident.name),
            TypeExpr::Qualified { package, name, .. } => write!(f, "{package}.{name}"),
            TypeExpr::Chan { dir, elem, .. } => match dir {
                ChanDir::Both => write!(f, "chan {elem}"),
                ChanDir::Send => write!(f, "chan<- {elem}"),
                ChanDir::Recv => write!(f, "<-chan {elem}"),
            },
            TypeExpr::Slice { elem, .. } => write!(f, "[]{elem}"),
            TypeExpr::Map { key, value, .. } => write!(f, "map[{key}]{value}"),
            TypeExpr::Func {
                params, results, ..
            } => {
                write!(f, "func(")?;
                write_list(f, params)?;
                write!(f, ")")?;
                match results.len() {
                    0 => Ok(()),
                    1 => write!(f, " {}", results[0]),
                    _ => {
                        write!(f, " (")?;
                        write_list(f, results)?;
                        write!(f, ")")
                    }
                }
            }
            TypeExpr::Struct { fields, .. } => {
                write!(f, "struct {{")?;
                for (idx, field) in fields.iter().enumerate() {
                    let sep = if idx == 0 { " " } else { "; " };
                    write!(f, "{sep}{} {}", field.name, field.ty)?;
                }
                write!(f, " }}")
            }
            TypeExpr::Interface { methods, .. } => {
                if methods.is_empty() {
                    return write!(f, "interface {{}}");
                }
                write!(f, "interface {{")?;
                for method in methods {
                    write!(f, " {}(", method.name)?;
                    write_list(f, &method.params)?;
                    write!(f, ")")?;
                }
                write!(f, " }}")
            }
        }
    }
}
