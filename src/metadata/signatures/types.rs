use crate::metadata::token::Token;

/// A type as written in a metadata signature blob.
///
/// Class and value type references are kept as tokens of the image the blob came from; turning them
/// into runtime types is the job of whoever owns that image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSignature {
    /// `void`
    Void,
    /// `bool`
    Boolean,
    /// `char`
    Char,
    /// `sbyte`
    I1,
    /// `byte`
    U1,
    /// `short`
    I2,
    /// `ushort`
    U2,
    /// `int`
    I4,
    /// `uint`
    U4,
    /// `long`
    I8,
    /// `ulong`
    U8,
    /// `float`
    R4,
    /// `double`
    R8,
    /// `nint`
    I,
    /// `nuint`
    U,
    /// `string`
    String,
    /// `object`
    Object,
    /// `System.TypedReference`
    TypedByRef,
    /// An unmanaged pointer.
    Ptr(Box<TypeSignature>),
    /// A managed reference.
    ByRef(Box<TypeSignature>),
    /// A value type given by a TypeDef, TypeRef or TypeSpec token.
    ValueType(Token),
    /// A reference type given by a TypeDef, TypeRef or TypeSpec token.
    Class(Token),
    /// `!n`, a type parameter of the enclosing type.
    GenericParamType(u32),
    /// `!!n`, a type parameter of the enclosing method.
    GenericParamMethod(u32),
    /// A single-dimensional, zero-based array.
    SzArray(Box<TypeSignature>),
    /// A general array.
    Array(SignatureArray),
    /// An instantiation of a generic type definition.
    GenericInst(Box<TypeSignature>, Vec<TypeSignature>),
    /// A function pointer.
    FnPtr(Box<SignatureMethod>),
    /// A type carrying custom modifiers.
    Modified(Vec<CustomModifier>, Box<TypeSignature>),
    /// A pinned local.
    Pinned(Box<TypeSignature>),
}

/// A `modreq` or `modopt` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CustomModifier {
    /// True for `modreq`.
    pub required: bool,
    /// The modifier type.
    pub modifier: Token,
}

/// A general array shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureArray {
    /// Element type.
    pub base: Box<TypeSignature>,
    /// Number of dimensions.
    pub rank: u32,
    /// Declared sizes, possibly fewer than `rank`.
    pub sizes: Vec<u32>,
    /// Declared lower bounds, possibly fewer than `rank`.
    pub lower_bounds: Vec<i32>,
}

/// A parameter or return type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureParameter {
    /// Custom modifiers applied to the parameter.
    pub modifiers: Vec<CustomModifier>,
    /// True if passed by reference.
    pub by_ref: bool,
    /// The parameter type.
    pub base: TypeSignature,
}

impl SignatureParameter {
    /// A plain by-value parameter.
    #[must_use]
    pub fn new(base: TypeSignature) -> Self {
        SignatureParameter {
            modifiers: Vec::new(),
            by_ref: false,
            base,
        }
    }
}

/// A `MethodDefSig` or `MethodRefSig`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureMethod {
    /// `HASTHIS`
    pub has_this: bool,
    /// `EXPLICITTHIS`
    pub explicit_this: bool,
    /// The calling convention bits (low nibble).
    pub calling_convention: u8,
    /// Number of method type parameters; zero for non-generic methods.
    pub generic_param_count: u32,
    /// Return type.
    pub return_type: SignatureParameter,
    /// Fixed parameters.
    pub params: Vec<SignatureParameter>,
    /// Parameters after the vararg sentinel.
    pub varargs: Vec<SignatureParameter>,
}

/// A `FieldSig`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureField {
    /// Custom modifiers applied to the field.
    pub modifiers: Vec<CustomModifier>,
    /// The field type.
    pub base: TypeSignature,
}

/// A `MethodSpec` instantiation blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureMethodSpec {
    /// The method type arguments.
    pub generic_args: Vec<TypeSignature>,
}

impl TypeSignature {
    /// Strips custom modifiers and pinning.
    #[must_use]
    pub fn unmodified(&self) -> &TypeSignature {
        match self {
            TypeSignature::Modified(_, inner) | TypeSignature::Pinned(inner) => inner.unmodified(),
            other => other,
        }
    }
}
