//! Semantic analysis for Bolt BASIC: two-pass symbol resolution, sigil-driven
//! type inference, control-flow balance checks, compile-time constant
//! folding, and DATA/RESTORE staging.
//!
//! Pass 1 collects declarations (line numbers, labels, DIM, DEF FN,
//! FUNCTION/SUB, CONSTANT, DATA). Pass 2 validates statement usage and infers
//! expression types. The two passes never interleave.

mod analyzer;
mod consteval;
mod symbols;

pub use analyzer::SemanticAnalyzer;
pub use consteval::{evaluate_const_expr, EvalNote};
pub use symbols::{
    canon, ArraySymbol, Binding, ConstantSymbol, DataSegment, FunctionSymbol, LabelSymbol,
    LineNumberSymbol, SymbolTable, VariableSymbol, FIRST_LABEL_ID,
};
