//! Serializable diagnostics for editor and tooling integration: a light
//! analysis pass that reports errors and top-level symbols as JSON-friendly
//! records.

use serde::{Deserialize, Serialize};

use bolt_ast::StmtKind;
use bolt_common::Severity;
use bolt_registry::CommandRegistry;
use bolt_semantic::SemanticAnalyzer;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub code: String,
    pub stage: String,
    pub line: u32,
    pub column: u32,
    pub severity: DiagnosticSeverity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SymbolKind {
    Function,
    Sub,
    Variable,
    Array,
    Label,
    Constant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    pub kind: SymbolKind,
    pub line: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompilerDiagnostics {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    pub symbols: Vec<SymbolInfo>,
}

fn convert(d: &bolt_common::Diagnostic) -> Diagnostic {
    Diagnostic {
        message: d.message.clone(),
        code: d.code.to_string(),
        stage: d.stage.name().to_string(),
        line: d.location.line,
        column: d.location.column,
        severity: match d.severity {
            Severity::Error => DiagnosticSeverity::Error,
            Severity::Warning => DiagnosticSeverity::Warning,
        },
    }
}

/// Run the front half of the pipeline and collect diagnostics plus symbol
/// information, without generating code.
pub fn analyze_source(source: &str, registry: &CommandRegistry) -> CompilerDiagnostics {
    let mut out = CompilerDiagnostics::default();
    let parsed = bolt_parser::parse_source(source, registry);
    for d in &parsed.diagnostics {
        if d.is_error() {
            out.errors.push(convert(d));
        } else {
            out.warnings.push(convert(d));
        }
    }

    let mut analyzer = SemanticAnalyzer::new(registry);
    analyzer.analyze(&parsed.program, &parsed.options);
    out.errors.extend(analyzer.errors().iter().map(convert));
    out.warnings.extend(analyzer.warnings().iter().map(convert));

    for line in &parsed.program.lines {
        for stmt in &line.stmts {
            let info = match &stmt.kind {
                StmtKind::Function { name, .. } => Some((name.clone(), SymbolKind::Function)),
                StmtKind::Sub { name, .. } => Some((name.clone(), SymbolKind::Sub)),
                StmtKind::DefFn { name, .. } => Some((name.clone(), SymbolKind::Function)),
                StmtKind::Label { name } => Some((name.clone(), SymbolKind::Label)),
                StmtKind::Constant { name, .. } => Some((name.clone(), SymbolKind::Constant)),
                StmtKind::Dim { arrays } => {
                    for decl in arrays {
                        out.symbols.push(SymbolInfo {
                            name: decl.name.clone(),
                            kind: SymbolKind::Array,
                            line: line.number,
                        });
                    }
                    None
                }
                StmtKind::Let { variable, indices, .. } if indices.is_empty() => {
                    Some((variable.clone(), SymbolKind::Variable))
                }
                _ => None,
            };
            if let Some((name, kind)) = info {
                out.symbols.push(SymbolInfo { name, kind, line: line.number });
            }
        }
    }
    out
}
