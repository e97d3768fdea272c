//! Pipeline driver: source text -> lexer -> parser (+ option extraction) ->
//! semantic analysis -> CFG -> IR. Lexer, parser, and semantic stages
//! accumulate diagnostics with recovery so one run reports everything; the
//! CFG and IR stages only run once the earlier stages are clean.

pub mod service;

use bolt_common::{CompilerOptions, Diagnostic};
use bolt_ir::IrProgram;
use bolt_registry::{CommandRegistry, ConstantsManager};
use bolt_semantic::SemanticAnalyzer;

/// Successful compilation: the IR program plus the constants it references
/// by index (the manager must outlive code emission) and any warnings.
#[derive(Debug)]
pub struct CompiledProgram {
    pub ir: IrProgram,
    pub constants: ConstantsManager,
    pub options: CompilerOptions,
    pub warnings: Vec<Diagnostic>,
}

pub type CompileResult = std::result::Result<CompiledProgram, Vec<Diagnostic>>;

/// Compile BASIC source text against a command registry. Synchronous and
/// single-threaded end to end; the registry is only read.
pub fn compile(source: &str, registry: &CommandRegistry) -> CompileResult {
    let parsed = bolt_parser::parse_source(source, registry);
    let mut diagnostics = parsed.diagnostics;

    let mut analyzer = SemanticAnalyzer::new(registry);
    analyzer.analyze(&parsed.program, &parsed.options);
    diagnostics.extend(analyzer.errors().iter().cloned());
    let warnings: Vec<Diagnostic> = analyzer.warnings().to_vec();

    if diagnostics.iter().any(|d| d.is_error()) {
        diagnostics.extend(warnings);
        return Err(diagnostics);
    }

    let cfg = bolt_cfg::build(&parsed.program, analyzer.symbols());
    let ir = bolt_ir::generate(&cfg, &parsed.program, analyzer.symbols());

    Ok(CompiledProgram {
        ir,
        constants: analyzer.take_constants(),
        options: parsed.options,
        warnings,
    })
}

/// Compile with a caller-configured analyzer (host-injected constants,
/// strict mode, preprocessed DATA labels).
pub fn compile_with(source: &str, registry: &CommandRegistry, analyzer: &mut SemanticAnalyzer) -> CompileResult {
    let parsed = bolt_parser::parse_source(source, registry);
    let mut diagnostics = parsed.diagnostics;

    analyzer.analyze(&parsed.program, &parsed.options);
    diagnostics.extend(analyzer.errors().iter().cloned());
    let warnings: Vec<Diagnostic> = analyzer.warnings().to_vec();

    if diagnostics.iter().any(|d| d.is_error()) {
        diagnostics.extend(warnings);
        return Err(diagnostics);
    }

    let cfg = bolt_cfg::build(&parsed.program, analyzer.symbols());
    let ir = bolt_ir::generate(&cfg, &parsed.program, analyzer.symbols());

    Ok(CompiledProgram {
        ir,
        constants: analyzer.take_constants(),
        options: parsed.options,
        warnings,
    })
}
