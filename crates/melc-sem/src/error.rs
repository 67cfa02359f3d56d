//! User-facing semantic errors. All are fatal; the driver prints them to
//! stderr and exits 1.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SemError {
    #[error("line {line}: type {name} has already been defined")]
    DuplicateType { name: String, line: u32 },

    #[error("line {line}: constructor {name} already belongs to type {owner}")]
    DuplicateConstructor {
        name: String,
        owner: String,
        line: u32,
    },

    #[error("line {line}: identifier {name} not found")]
    UnknownIdentifier { name: String, line: u32 },

    #[error("line {line}: type {name} not found")]
    UnknownType { name: String, line: u32 },

    #[error("line {line}: constructor {name} not found")]
    UnknownConstructor { name: String, line: u32 },

    #[error("line {line}: partial function call not allowed")]
    PartialApplication { line: u32 },

    #[error("line {line}: too many arguments given to {name}")]
    TooManyArguments { name: String, line: u32 },

    #[error("line {line}: partial constructor call not allowed")]
    PartialConstructor { line: u32 },

    #[error("line {line}: partial constructor pattern not allowed")]
    PartialConstructorPattern { line: u32 },

    #[error("line {line}: {name} already declared as non-function")]
    NotAFunction { name: String, line: u32 },

    #[error("line {line}: array access attempted on {ty}")]
    NotAnArray { ty: String, line: u32 },

    #[error("line {line}: array access must supply one index per dimension")]
    ArrayIndexCount { line: u32 },

    #[error("line {line}: arrays cannot contain arrays")]
    ArrayOfArray { line: u32 },

    #[error("line {line}: a ref cannot point to an array")]
    RefOfArray { line: u32 },

    #[error("line {line}: array types cannot be allocated with new")]
    NewOfArray { line: u32 },

    #[error("line {line}: only function definitions can be recursive")]
    NonFunctionRecursive { line: u32 },

    #[error("line {line}: array and function values cannot be compared")]
    EqualityOnAggregate { line: u32 },

    #[error("line {line}: comparison operands must be int, char or float")]
    NotComparable { line: u32 },

    #[error("line {line}: dimension index out of bounds")]
    DimOutOfBounds { line: u32 },

    #[error(
        "line {line}: structural equality on {ty} is not defined: \
         its constructors contain array or function fields"
    )]
    StructuralEqOnAggregateFields { ty: String, line: u32 },

    #[error(
        "line {line}: function {function} captures {name}, which is local to an \
         enclosing function; closures are not supported"
    )]
    NestedClosure {
        function: String,
        name: String,
        line: u32,
    },
}
