/// Operators of the expression language.
///
/// One closed enumeration covers unary, binary and ternary operations; the
/// tree node variant determines the arity it is used with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    // Comparison
    /// Less than (`<`)
    LessThan,
    /// Less than or equal (`<=`)
    LessOrEqual,
    /// Greater than (`>`)
    GreaterThan,
    /// Greater than or equal (`>=`)
    GreaterOrEqual,
    /// Equal (`==`), case-insensitive on strings
    Equal,
    /// Not equal (`!=`)
    NotEqual,
    /// Meta-equal (`=?=` / `is`): same type and same value, Undefined and
    /// Error compare as ordinary values, strings compare case-sensitively
    MetaEqual,
    /// Meta-not-equal (`=!=` / `isnt`)
    MetaNotEqual,

    // Arithmetic
    /// Addition (`+`); also absolute/relative time arithmetic
    Addition,
    /// Subtraction (`-`)
    Subtraction,
    /// Multiplication (`*`)
    Multiplication,
    /// Division (`/`); integer division truncates, divisor zero is Error
    Division,
    /// Modulus (`%`); defined on integers only
    Modulus,
    /// Unary minus
    UnaryMinus,
    /// Unary plus; passes numbers through, errors on everything else
    UnaryPlus,

    // Bitwise (integers only)
    /// Bitwise AND (`&`)
    BitwiseAnd,
    /// Bitwise OR (`|`)
    BitwiseOr,
    /// Bitwise XOR (`^`)
    BitwiseXor,
    /// Bitwise complement (`~`)
    BitwiseNot,
    /// Left shift (`<<`)
    LeftShift,
    /// Arithmetic right shift (`>>`)
    RightShift,
    /// Logical right shift (`>>>`)
    URightShift,

    // Logical
    /// Logical AND (`&&`), short-circuiting, three-valued
    LogicalAnd,
    /// Logical OR (`||`), short-circuiting, three-valued
    LogicalOr,
    /// Logical NOT (`!`)
    LogicalNot,

    // Misc
    /// The conditional operator (`c ? t : f`)
    Ternary,
    /// The elvis operator (`a ?: b`): `b` when `a` is Undefined, else `a`
    Elvis,
    /// Subscript (`container[index]`)
    Subscript,
    /// Explicit parenthesization, preserved in the tree for round-tripping
    Parentheses,
}

impl OpKind {
    /// Binding strength, higher binds tighter (K&R-style levels). Used by the
    /// unparser to decide where parentheses are required.
    pub fn precedence(self) -> i32 {
        use OpKind::*;
        match self {
            Subscript | Elvis => 12,
            LogicalNot | BitwiseNot | UnaryPlus | UnaryMinus => 11,
            Multiplication | Division | Modulus => 10,
            Addition | Subtraction => 9,
            LeftShift | RightShift | URightShift => 8,
            LessThan | LessOrEqual | GreaterThan | GreaterOrEqual => 7,
            Equal | NotEqual | MetaEqual | MetaNotEqual => 6,
            BitwiseAnd => 5,
            BitwiseXor => 4,
            BitwiseOr => 3,
            LogicalAnd => 2,
            LogicalOr => 1,
            Ternary => 0,
            Parentheses => 13,
        }
    }

    /// Strict operators absorb Error and then Undefined operands before the
    /// operation itself is consulted. The meta comparisons, the logical
    /// connectives and the conditional are the non-strict exceptions.
    pub fn is_strict(self) -> bool {
        !matches!(
            self,
            OpKind::MetaEqual
                | OpKind::MetaNotEqual
                | OpKind::LogicalAnd
                | OpKind::LogicalOr
                | OpKind::Ternary
                | OpKind::Elvis
        )
    }

    /// The surface syntax for this operator, as the unparser prints it.
    pub fn as_str(self) -> &'static str {
        use OpKind::*;
        match self {
            LessThan => "<",
            LessOrEqual => "<=",
            GreaterThan => ">",
            GreaterOrEqual => ">=",
            Equal => "==",
            NotEqual => "!=",
            MetaEqual => "=?=",
            MetaNotEqual => "=!=",
            Addition => "+",
            Subtraction => "-",
            Multiplication => "*",
            Division => "/",
            Modulus => "%",
            UnaryMinus => "-",
            UnaryPlus => "+",
            BitwiseAnd => "&",
            BitwiseOr => "|",
            BitwiseXor => "^",
            BitwiseNot => "~",
            LeftShift => "<<",
            RightShift => ">>",
            URightShift => ">>>",
            LogicalAnd => "&&",
            LogicalOr => "||",
            LogicalNot => "!",
            Ternary => "?:",
            Elvis => "?:",
            Subscript => "[]",
            Parentheses => "()",
        }
    }
}
