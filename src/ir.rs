use serde::Deserialize;

/// Resolved-program document handed over by the host compiler.
///
/// Declarations live in arena tables and reference each other through typed
/// ids; expressions and statements are closed sums so every checker dispatch
/// is exhaustive at compile time.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Program {
    pub(crate) units: Vec<CompilationUnit>,
    pub(crate) classes: Vec<ClassDecl>,
    pub(crate) methods: Vec<MethodDecl>,
    pub(crate) fields: Vec<FieldDecl>,
    #[serde(default)]
    pub(crate) locals: Vec<LocalDecl>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize)]
pub(crate) struct ClassId(pub(crate) u32);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize)]
pub(crate) struct MethodId(pub(crate) u32);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize)]
pub(crate) struct FieldId(pub(crate) u32);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize)]
pub(crate) struct LocalId(pub(crate) u32);

/// One source file, holding its top-level classes.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct CompilationUnit {
    pub(crate) path: String,
    #[serde(default)]
    pub(crate) package: String,
    pub(crate) classes: Vec<ClassId>,
}

/// Nullness scope marker attached to a declaration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
pub(crate) enum Marker {
    NullMarked,
    NullUnmarked,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
pub(crate) enum ClassKind {
    Class,
    Interface,
    Enum,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
pub(crate) enum Enclosing {
    Class(ClassId),
    Method(MethodId),
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ClassDecl {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) package: String,
    #[serde(default)]
    pub(crate) enclosing: Option<Enclosing>,
    #[serde(default = "default_class_kind")]
    pub(crate) kind: ClassKind,
    #[serde(default)]
    pub(crate) is_final: bool,
    #[serde(default)]
    pub(crate) marker: Option<Marker>,
    #[serde(default)]
    pub(crate) annotations: Vec<String>,
    #[serde(default)]
    pub(crate) suppressions: Vec<String>,
    #[serde(default)]
    pub(crate) type_params: Vec<TypeParam>,
    #[serde(default)]
    pub(crate) super_class: Option<TypeRef>,
    #[serde(default)]
    pub(crate) interfaces: Vec<TypeRef>,
    #[serde(default)]
    pub(crate) fields: Vec<FieldId>,
    #[serde(default)]
    pub(crate) methods: Vec<MethodId>,
    /// Member and local classes declared inside this one.
    #[serde(default)]
    pub(crate) nested_classes: Vec<ClassId>,
    #[serde(default)]
    pub(crate) instance_init_blocks: Vec<Block>,
    #[serde(default)]
    pub(crate) static_init_blocks: Vec<Block>,
    #[serde(default)]
    pub(crate) span: Span,
}

fn default_class_kind() -> ClassKind {
    ClassKind::Class
}

/// Generic type parameter of a class declaration.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct TypeParam {
    pub(crate) name: String,
    /// True when the parameter's bound admits nullable arguments.
    #[serde(default)]
    pub(crate) admits_nullable: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct MethodDecl {
    pub(crate) name: String,
    pub(crate) owner: ClassId,
    #[serde(default)]
    pub(crate) marker: Option<Marker>,
    #[serde(default)]
    pub(crate) annotations: Vec<String>,
    #[serde(default)]
    pub(crate) suppressions: Vec<String>,
    #[serde(default)]
    pub(crate) params: Vec<ParamDecl>,
    pub(crate) return_type: TypeRef,
    #[serde(default)]
    pub(crate) is_constructor: bool,
    #[serde(default)]
    pub(crate) is_static: bool,
    #[serde(default)]
    pub(crate) is_abstract: bool,
    #[serde(default)]
    pub(crate) is_final: bool,
    #[serde(default)]
    pub(crate) is_private: bool,
    #[serde(default)]
    pub(crate) is_varargs: bool,
    /// True when the source carries an explicit overriding marker.
    #[serde(default)]
    pub(crate) is_override_annotated: bool,
    /// Host-resolved method this one directly overrides, if any.
    #[serde(default)]
    pub(crate) overrides: Option<MethodId>,
    #[serde(default)]
    pub(crate) body: Option<Block>,
    #[serde(default)]
    pub(crate) span: Span,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ParamDecl {
    pub(crate) name: String,
    pub(crate) ty: TypeRef,
    #[serde(default)]
    pub(crate) span: Span,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct FieldDecl {
    pub(crate) name: String,
    pub(crate) owner: ClassId,
    pub(crate) ty: TypeRef,
    #[serde(default)]
    pub(crate) is_static: bool,
    #[serde(default)]
    pub(crate) is_final: bool,
    #[serde(default)]
    pub(crate) annotations: Vec<String>,
    #[serde(default)]
    pub(crate) suppressions: Vec<String>,
    #[serde(default)]
    pub(crate) initializer: Option<Expr>,
    #[serde(default)]
    pub(crate) span: Span,
}

/// Local variable or lambda parameter.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct LocalDecl {
    pub(crate) name: String,
    pub(crate) ty: TypeRef,
    #[serde(default)]
    pub(crate) span: Span,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
pub(crate) enum Primitive {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Char,
    Float,
    Double,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub(crate) enum TypeKind {
    Class(ClassId),
    Primitive(Primitive),
    /// Element type in `args[0]`.
    Array,
    TypeVar(String),
    Void,
}

/// Type reference with its nullability marker and generic arguments.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub(crate) struct TypeRef {
    pub(crate) kind: TypeKind,
    #[serde(default)]
    pub(crate) nullable: bool,
    #[serde(default)]
    pub(crate) args: Vec<TypeRef>,
}

impl TypeRef {
    pub(crate) fn is_primitive(&self) -> bool {
        matches!(self.kind, TypeKind::Primitive(_))
    }

    pub(crate) fn element_type(&self) -> Option<&TypeRef> {
        match self.kind {
            TypeKind::Array => self.args.first(),
            _ => None,
        }
    }
}

/// Line/column position inside a compilation unit.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Deserialize)]
pub(crate) struct Span {
    #[serde(default)]
    pub(crate) line: u32,
    #[serde(default)]
    pub(crate) col: u32,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct Block {
    #[serde(default)]
    pub(crate) stmts: Vec<Stmt>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) enum Stmt {
    Expr {
        expr: Expr,
    },
    Local {
        local: LocalId,
        #[serde(default)]
        init: Option<Expr>,
        #[serde(default)]
        span: Span,
    },
    Block(Block),
    If {
        cond: Expr,
        then_block: Block,
        #[serde(default)]
        else_block: Option<Block>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    DoWhile {
        body: Block,
        cond: Expr,
    },
    ForEach {
        local: LocalId,
        iterable: Expr,
        body: Block,
        #[serde(default)]
        span: Span,
    },
    Return {
        #[serde(default)]
        value: Option<Expr>,
        #[serde(default)]
        span: Span,
    },
    Switch {
        selector: Expr,
        #[serde(default)]
        cases: Vec<SwitchCase>,
        #[serde(default)]
        span: Span,
    },
    Synchronized {
        lock: Expr,
        body: Block,
        #[serde(default)]
        span: Span,
    },
    Try {
        body: Block,
        #[serde(default)]
        catches: Vec<CatchClause>,
        #[serde(default)]
        finally: Option<Block>,
    },
    Throw {
        expr: Expr,
        #[serde(default)]
        span: Span,
    },
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct SwitchCase {
    #[serde(default)]
    pub(crate) labels: Vec<CaseLabel>,
    pub(crate) body: Block,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub(crate) enum CaseLabel {
    Null,
    Default,
    Constant(String),
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct CatchClause {
    pub(crate) local: LocalId,
    pub(crate) body: Block,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    UShr,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// String concatenation; never a primitive context.
    Concat,
}

impl BinaryOp {
    /// True when the operator consumes its operands as primitives.
    pub(crate) fn is_primitive_context(self) -> bool {
        !matches!(self, BinaryOp::Concat | BinaryOp::Eq | BinaryOp::Ne)
    }

    pub(crate) fn is_equality(self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::Ne)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
    Plus,
    BitNot,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
pub(crate) enum MethodRefKind {
    Static,
    Bound,
    /// Receiver becomes a synthesized first parameter of the functional slot.
    Unbound,
    Constructor,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Deserialize)]
pub(crate) enum IdentTarget {
    Local(LocalId),
    Param { method: MethodId, index: u32 },
    /// Field read through the implicit receiver.
    Field(FieldId),
    Class(ClassId),
    Package,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct LambdaParam {
    pub(crate) local: LocalId,
    /// True when the parameter has no source-level type.
    #[serde(default)]
    pub(crate) implicit_type: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) enum LambdaBody {
    Expr(Box<Expr>),
    Block(Block),
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) enum Expr {
    NullLit {
        #[serde(default)]
        span: Span,
    },
    /// Primitive, string or class literal; `prim` is None for references.
    Literal {
        #[serde(default)]
        prim: Option<Primitive>,
        /// Source text of the literal, used as a constant key.
        #[serde(default)]
        text: String,
        #[serde(default)]
        span: Span,
    },
    This {
        #[serde(default)]
        span: Span,
    },
    Ident {
        target: IdentTarget,
        #[serde(default)]
        span: Span,
    },
    FieldAccess {
        receiver: Box<Expr>,
        field: FieldId,
        #[serde(default)]
        span: Span,
    },
    Call {
        #[serde(default)]
        receiver: Option<Box<Expr>>,
        method: MethodId,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    New {
        class_type: TypeRef,
        #[serde(default)]
        ctor: Option<MethodId>,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    NewArray {
        elem: TypeRef,
        #[serde(default)]
        dims: Vec<Expr>,
        #[serde(default)]
        init: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    Index {
        array: Box<Expr>,
        index: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
    Conditional {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
        /// Inferred type of the whole conditional, from the host.
        ty: TypeRef,
        #[serde(default)]
        span: Span,
    },
    Cast {
        ty: TypeRef,
        expr: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
    InstanceOf {
        expr: Box<Expr>,
        ty: TypeRef,
        #[serde(default)]
        span: Span,
    },
    Lambda {
        functional: TypeRef,
        /// Abstract-method slot of the target functional type.
        slot: MethodId,
        #[serde(default)]
        params: Vec<LambdaParam>,
        body: LambdaBody,
        #[serde(default)]
        span: Span,
    },
    MethodRef {
        kind: MethodRefKind,
        functional: TypeRef,
        slot: MethodId,
        target: MethodId,
        #[serde(default)]
        span: Span,
    },
    /// Construct the host could not resolve; treated conservatively.
    Unresolved {
        #[serde(default)]
        span: Span,
    },
}

impl Expr {
    pub(crate) fn span(&self) -> Span {
        match self {
            Expr::NullLit { span }
            | Expr::Literal { span, .. }
            | Expr::This { span }
            | Expr::Ident { span, .. }
            | Expr::FieldAccess { span, .. }
            | Expr::Call { span, .. }
            | Expr::New { span, .. }
            | Expr::NewArray { span, .. }
            | Expr::Index { span, .. }
            | Expr::Assign { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Conditional { span, .. }
            | Expr::Cast { span, .. }
            | Expr::InstanceOf { span, .. }
            | Expr::Lambda { span, .. }
            | Expr::MethodRef { span, .. }
            | Expr::Unresolved { span } => *span,
        }
    }
}

impl Program {
    pub(crate) fn class(&self, id: ClassId) -> &ClassDecl {
        &self.classes[id.0 as usize]
    }

    pub(crate) fn method(&self, id: MethodId) -> &MethodDecl {
        &self.methods[id.0 as usize]
    }

    pub(crate) fn field(&self, id: FieldId) -> &FieldDecl {
        &self.fields[id.0 as usize]
    }

    pub(crate) fn local(&self, id: LocalId) -> &LocalDecl {
        &self.locals[id.0 as usize]
    }

    /// Outermost enclosing class of `id`, following class and method nesting.
    pub(crate) fn top_level_class_of(&self, id: ClassId) -> ClassId {
        let mut current = id;
        loop {
            match self.class(current).enclosing {
                None => return current,
                Some(Enclosing::Class(outer)) => current = outer,
                Some(Enclosing::Method(method)) => current = self.method(method).owner,
            }
        }
    }

    /// Dotted qualified name, with nested classes joined by `.`.
    pub(crate) fn class_qualified_name(&self, id: ClassId) -> String {
        let mut names = vec![self.class(id).name.clone()];
        let mut current = id;
        while let Some(enclosing) = self.class(current).enclosing {
            current = match enclosing {
                Enclosing::Class(outer) => outer,
                Enclosing::Method(method) => self.method(method).owner,
            };
            names.push(self.class(current).name.clone());
        }
        names.reverse();
        let package = &self.class(current).package;
        if package.is_empty() {
            names.join(".")
        } else {
            format!("{}.{}", package, names.join("."))
        }
    }

    /// `pkg.Class#member` key used by the library model.
    pub(crate) fn method_qualified_name(&self, id: MethodId) -> String {
        let method = self.method(id);
        format!("{}#{}", self.class_qualified_name(method.owner), method.name)
    }

    pub(crate) fn field_qualified_name(&self, id: FieldId) -> String {
        let field = self.field(id);
        format!("{}#{}", self.class_qualified_name(field.owner), field.name)
    }

    /// Bounds-check every id reference in the declaration tables. Documents
    /// that fail here are rejected before any checking starts.
    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        let class_count = self.classes.len();
        let method_count = self.methods.len();
        let field_count = self.fields.len();
        let check_class = |id: ClassId| -> anyhow::Result<()> {
            anyhow::ensure!((id.0 as usize) < class_count, "class id {} out of range", id.0);
            Ok(())
        };
        let check_method = |id: MethodId| -> anyhow::Result<()> {
            anyhow::ensure!(
                (id.0 as usize) < method_count,
                "method id {} out of range",
                id.0
            );
            Ok(())
        };
        let check_field = |id: FieldId| -> anyhow::Result<()> {
            anyhow::ensure!((id.0 as usize) < field_count, "field id {} out of range", id.0);
            Ok(())
        };
        for unit in &self.units {
            for class in &unit.classes {
                check_class(*class)?;
            }
        }
        for class in &self.classes {
            match class.enclosing {
                Some(Enclosing::Class(outer)) => check_class(outer)?,
                Some(Enclosing::Method(method)) => check_method(method)?,
                None => {}
            }
            for field in &class.fields {
                check_field(*field)?;
            }
            for method in &class.methods {
                check_method(*method)?;
            }
            for nested in &class.nested_classes {
                check_class(*nested)?;
            }
        }
        for method in &self.methods {
            check_class(method.owner)?;
            if let Some(overridden) = method.overrides {
                check_method(overridden)?;
            }
        }
        for field in &self.fields {
            check_class(field.owner)?;
        }
        Ok(())
    }
}
