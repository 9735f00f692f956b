//! The import/export extractor.
//!
//! Walks a parsed module's top-level statements and emits one [`Finding`]
//! per import/export construct, with a [`SymbolFinding`] per bound symbol.
//! Declaration-style and require-style linkage are both covered; stage
//! annotations are read from the leading comment block of the local
//! identifier, falling back to the specifier.

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    Declaration, ExportDefaultDeclarationKind, Expression, ImportDeclaration,
    ImportDeclarationSpecifier, ModuleExportName, Statement, VariableDeclarationKind,
};
use oxc_semantic::SemanticBuilder;

use crate::findings::{
    Finding, FindingKind, LinkKind, Local, Remote, SourceSpan, SymbolFinding,
};
use crate::parser::{parse, LineIndex, ParseError, ParseOptions, ParsedModule};
use crate::require::{
    bulk_export_findings, exports_target, leaf_identifiers, require_binding_symbols, require_call,
    value_local, ExportsTarget,
};
use crate::stage::CommentIndex;

/// Parse a module source and extract its findings in one step.
pub fn analyze_source(source: &str) -> Result<Vec<Finding>, ParseError> {
    let allocator = Allocator::default();
    let parsed = parse(&allocator, source, ParseOptions::default())?;
    Ok(extract_findings(&parsed))
}

/// Extract linkage findings from a parsed module. Pure: the AST is only
/// read.
pub fn extract_findings(parsed: &ParsedModule<'_>) -> Vec<Finding> {
    let program = &parsed.program;
    let source = parsed.source_text;
    let comments = CommentIndex::new(program, source);
    let lines = LineIndex::new(source);

    // `require` only counts when it is unbound in the surrounding scope. A
    // module-scope binding would resolve every top-level use, so one
    // unresolved reference is enough to know the forms below are genuine.
    let semantic = SemanticBuilder::new().build(program);
    let require_unbound = semantic
        .semantic
        .scoping()
        .root_unresolved_references()
        .contains_key("require");

    let mut findings = Vec::new();

    for statement in &program.body {
        match statement {
            Statement::ImportDeclaration(import) => {
                findings.push(import_finding(import, &comments, &lines));
            }

            Statement::ExportNamedDeclaration(export) => {
                let line = lines.line_of(export.span.start);
                let export_pos = export.span.start;
                let mut symbols = Vec::new();

                if let Some(declaration) = &export.declaration {
                    match declaration {
                        Declaration::FunctionDeclaration(function) => {
                            if let Some(ident) = &function.id {
                                symbols.push(
                                    SymbolFinding::new(
                                        Remote::Named(ident.name.to_string()),
                                        Local::Named(ident.name.to_string()),
                                        lines.line_of(ident.span.start),
                                    )
                                    .with_stage(comments.stage_at_first(&[
                                        export_pos,
                                        function.span.start,
                                        ident.span.start,
                                    ])),
                                );
                            }
                        }
                        Declaration::ClassDeclaration(class) => {
                            if let Some(ident) = &class.id {
                                symbols.push(
                                    SymbolFinding::new(
                                        Remote::Named(ident.name.to_string()),
                                        Local::Named(ident.name.to_string()),
                                        lines.line_of(ident.span.start),
                                    )
                                    .with_stage(comments.stage_at_first(&[
                                        export_pos,
                                        class.span.start,
                                        ident.span.start,
                                    ])),
                                );
                            }
                        }
                        Declaration::VariableDeclaration(variable) => {
                            // Annotations bind only to single-assignment
                            // forms; on `let`/`var` they are silently
                            // ignored.
                            let stage_applies =
                                variable.kind == VariableDeclarationKind::Const;
                            for declarator in &variable.declarations {
                                let mut leaves = Vec::new();
                                leaf_identifiers(&declarator.id, &mut leaves);
                                for (name, position) in leaves {
                                    let stage = if stage_applies {
                                        comments.stage_at_first(&[position, export_pos])
                                    } else {
                                        None
                                    };
                                    symbols.push(
                                        SymbolFinding::new(
                                            Remote::Named(name.clone()),
                                            Local::Named(name),
                                            lines.line_of(position),
                                        )
                                        .with_stage(stage),
                                    );
                                }
                            }
                        }
                        _ => {}
                    }
                    findings.push(
                        Finding::new(FindingKind::Export, LinkKind::Declaration, line)
                            .with_symbols(symbols),
                    );
                } else {
                    let source_pos = export.source.as_ref().map(|s| s.span.start);
                    for specifier in &export.specifiers {
                        let mut positions = vec![specifier.span.start];
                        if let Some(pos) = source_pos {
                            positions.push(pos);
                        }
                        symbols.push(
                            SymbolFinding::new(
                                Remote::Named(module_export_name(&specifier.exported)),
                                Local::Named(module_export_name(&specifier.local)),
                                lines.line_of(specifier.span.start),
                            )
                            .with_stage(comments.stage_at_first(&positions)),
                        );
                    }
                    let mut finding =
                        Finding::new(FindingKind::Export, LinkKind::Declaration, line)
                            .with_symbols(symbols);
                    if let Some(src) = &export.source {
                        finding = finding.with_specifier(
                            src.value.to_string(),
                            SourceSpan::new(src.span.start, src.span.end),
                        );
                    }
                    findings.push(finding);
                }
            }

            Statement::ExportDefaultDeclaration(export) => {
                let line = lines.line_of(export.span.start);
                let local = match &export.declaration {
                    ExportDefaultDeclarationKind::FunctionDeclaration(function) => function
                        .id
                        .as_ref()
                        .map(|ident| Local::Named(ident.name.to_string()))
                        .unwrap_or(Local::None),
                    ExportDefaultDeclarationKind::ClassDeclaration(class) => class
                        .id
                        .as_ref()
                        .map(|ident| Local::Named(ident.name.to_string()))
                        .unwrap_or(Local::None),
                    _ => Local::None,
                };
                findings.push(
                    Finding::new(FindingKind::Export, LinkKind::Declaration, line).with_symbols(
                        vec![SymbolFinding::new(Remote::Default, local, line)
                            .with_stage(comments.stage_at(export.span.start))],
                    ),
                );
            }

            Statement::ExportAllDeclaration(export) => {
                let line = lines.line_of(export.span.start);
                let symbol = match &export.exported {
                    Some(name) => SymbolFinding::new(
                        Remote::Named(module_export_name(name)),
                        Local::Star,
                        line,
                    ),
                    None => SymbolFinding::new(Remote::Star, Local::None, line),
                };
                findings.push(
                    Finding::new(FindingKind::Export, LinkKind::Declaration, line)
                        .with_specifier(
                            export.source.value.to_string(),
                            SourceSpan::new(export.source.span.start, export.source.span.end),
                        )
                        .with_symbols(vec![symbol.with_stage(comments.stage_at_first(&[
                            export.span.start,
                            export.source.span.start,
                        ]))]),
                );
            }

            Statement::VariableDeclaration(variable) if require_unbound => {
                let stage_applies = variable.kind == VariableDeclarationKind::Const;
                for declarator in &variable.declarations {
                    let Some(init) = &declarator.init else {
                        continue;
                    };
                    let Some(required) = require_call(init) else {
                        continue;
                    };
                    let mut symbols = Vec::new();
                    require_binding_symbols(
                        &declarator.id,
                        stage_applies,
                        &comments,
                        &lines,
                        &mut symbols,
                    );
                    findings.push(
                        Finding::new(
                            FindingKind::Import,
                            LinkKind::RequireLike,
                            lines.line_of(declarator.span.start),
                        )
                        .with_specifier(required.specifier, required.span)
                        .with_symbols(symbols),
                    );
                }
            }

            Statement::ExpressionStatement(statement) => {
                let line = lines.line_of(statement.span.start);
                if require_unbound {
                    if let Some(required) = require_call(&statement.expression) {
                        // A bare require pulls the module in for effect
                        // only; it binds nothing.
                        findings.push(
                            Finding::new(FindingKind::Import, LinkKind::RequireLike, line)
                                .with_specifier(required.specifier, required.span),
                        );
                        continue;
                    }
                }
                if let Expression::AssignmentExpression(assign) = &statement.expression {
                    match exports_target(assign) {
                        Some(ExportsTarget::Property { name, position }) => {
                            findings.push(
                                Finding::new(FindingKind::Export, LinkKind::RequireLike, line)
                                    .with_symbols(vec![SymbolFinding::new(
                                        Remote::Named(name),
                                        value_local(&assign.right),
                                        line,
                                    )
                                    .with_stage(comments.stage_at_first(&[
                                        statement.span.start,
                                        position,
                                    ]))]),
                            );
                        }
                        Some(ExportsTarget::Whole) => {
                            if let Expression::ObjectExpression(object) = &assign.right {
                                findings.extend(bulk_export_findings(
                                    object,
                                    require_unbound,
                                    &comments,
                                    &lines,
                                    line,
                                ));
                            }
                        }
                        None => {}
                    }
                }
            }

            _ => {}
        }
    }

    findings
}

fn import_finding(
    import: &ImportDeclaration<'_>,
    comments: &CommentIndex<'_>,
    lines: &LineIndex,
) -> Finding {
    let line = lines.line_of(import.span.start);
    let source_pos = import.source.span.start;
    let mut symbols = Vec::new();

    if let Some(specifiers) = &import.specifiers {
        for specifier in specifiers {
            let symbol = match specifier {
                ImportDeclarationSpecifier::ImportDefaultSpecifier(spec) => SymbolFinding::new(
                    Remote::Default,
                    Local::Named(spec.local.name.to_string()),
                    lines.line_of(spec.span.start),
                )
                .with_stage(comments.stage_at_first(&[spec.local.span.start, source_pos])),
                ImportDeclarationSpecifier::ImportNamespaceSpecifier(spec) => SymbolFinding::new(
                    Remote::Star,
                    Local::Named(spec.local.name.to_string()),
                    lines.line_of(spec.span.start),
                )
                .with_stage(comments.stage_at_first(&[spec.span.start, source_pos])),
                ImportDeclarationSpecifier::ImportSpecifier(spec) => SymbolFinding::new(
                    Remote::Named(module_export_name(&spec.imported)),
                    Local::Named(spec.local.name.to_string()),
                    lines.line_of(spec.span.start),
                )
                .with_stage(comments.stage_at_first(&[
                    spec.span.start,
                    spec.local.span.start,
                    source_pos,
                ])),
            };
            symbols.push(symbol);
        }
    }

    Finding::new(FindingKind::Import, LinkKind::Declaration, line)
        .with_specifier(
            import.source.value.to_string(),
            SourceSpan::new(import.source.span.start, import.source.span.end),
        )
        .with_symbols(symbols)
}

fn module_export_name(name: &ModuleExportName<'_>) -> String {
    match name {
        ModuleExportName::IdentifierName(ident) => ident.name.to_string(),
        ModuleExportName::IdentifierReference(ident) => ident.name.to_string(),
        ModuleExportName::StringLiteral(literal) => literal.value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::BindingStage;

    fn findings_of(source: &str) -> Vec<Finding> {
        analyze_source(source).unwrap()
    }

    #[test]
    fn bare_require_binds_nothing() {
        let findings = findings_of("require('./foo');");
        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.kind, FindingKind::Import);
        assert_eq!(finding.link, LinkKind::RequireLike);
        assert_eq!(finding.specifier.as_deref(), Some("./foo"));
        assert!(finding.symbols.is_empty());
    }

    #[test]
    fn destructured_require_with_stage() {
        let findings = findings_of(
            "const { a, /* @prebake.moot */ b, c: d, ...rest } = require('foo');",
        );
        assert_eq!(findings.len(), 1);
        let symbols = &findings[0].symbols;
        assert_eq!(symbols.len(), 4);

        assert_eq!(symbols[0].remote, Remote::Named("a".into()));
        assert_eq!(symbols[0].local, Local::Named("a".into()));
        assert_eq!(symbols[0].stage, None);

        assert_eq!(symbols[1].remote, Remote::Named("b".into()));
        assert_eq!(symbols[1].local, Local::Named("b".into()));
        assert_eq!(symbols[1].stage, Some(BindingStage::Moot));

        assert_eq!(symbols[2].remote, Remote::Named("c".into()));
        assert_eq!(symbols[2].local, Local::Named("d".into()));

        assert_eq!(symbols[3].remote, Remote::Star);
        assert_eq!(symbols[3].local, Local::Named("rest".into()));
    }

    #[test]
    fn shadowed_require_is_ignored() {
        let findings = findings_of("const require = () => 0;\nrequire('./foo');");
        assert!(findings.iter().all(|f| f.link != LinkKind::RequireLike));
    }

    #[test]
    fn whole_namespace_require_binding() {
        let findings = findings_of("const pkg = require('pkg');");
        let symbols = &findings[0].symbols;
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].remote, Remote::Star);
        assert_eq!(symbols[0].local, Local::Named("pkg".into()));
    }

    #[test]
    fn declaration_import_forms() {
        let findings = findings_of(
            "import d, { a, b as c } from './m.js';\nimport * as ns from './n.js';",
        );
        assert_eq!(findings.len(), 2);

        let first = &findings[0].symbols;
        assert_eq!(first[0].remote, Remote::Default);
        assert_eq!(first[0].local, Local::Named("d".into()));
        assert_eq!(first[1].remote, Remote::Named("a".into()));
        assert_eq!(first[2].remote, Remote::Named("b".into()));
        assert_eq!(first[2].local, Local::Named("c".into()));

        let second = &findings[1].symbols;
        assert_eq!(second[0].remote, Remote::Star);
        assert_eq!(second[0].local, Local::Named("ns".into()));
    }

    #[test]
    fn import_stage_from_local_identifier() {
        let findings =
            findings_of("import { /* @prebake.eager */ a } from './m.js';");
        assert_eq!(findings[0].symbols[0].stage, Some(BindingStage::Eager));
    }

    #[test]
    fn export_variable_destructuring() {
        let findings = findings_of("export const { a, b: c } = obj;");
        let symbols = &findings[0].symbols;
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].remote, Remote::Named("a".into()));
        assert_eq!(symbols[1].remote, Remote::Named("c".into()));
        assert_eq!(symbols[1].local, Local::Named("c".into()));
    }

    #[test]
    fn export_stage_on_const() {
        let findings = findings_of("/* @prebake.eager */ export const answer = 42;");
        assert_eq!(findings[0].symbols[0].stage, Some(BindingStage::Eager));
    }

    #[test]
    fn export_stage_ignored_on_let() {
        let findings = findings_of("/* @prebake.eager */ export let counter = 0;");
        assert_eq!(findings[0].symbols[0].stage, None);
    }

    #[test]
    fn export_function_and_default() {
        let findings = findings_of("export function f() {}\nexport default class C {}");
        assert_eq!(findings[0].symbols[0].remote, Remote::Named("f".into()));
        assert_eq!(findings[1].symbols[0].remote, Remote::Default);
        assert_eq!(findings[1].symbols[0].local, Local::Named("C".into()));
    }

    #[test]
    fn named_re_export_records_both_names() {
        let findings = findings_of("export { a as b } from './m.js';");
        let finding = &findings[0];
        assert_eq!(finding.specifier.as_deref(), Some("./m.js"));
        assert_eq!(finding.symbols[0].remote, Remote::Named("b".into()));
        assert_eq!(finding.symbols[0].local, Local::Named("a".into()));
    }

    #[test]
    fn star_re_export_forms() {
        let findings = findings_of("export * from './a.js';\nexport * as ns from './b.js';");
        assert_eq!(findings[0].symbols[0].remote, Remote::Star);
        assert_eq!(findings[0].symbols[0].local, Local::None);
        assert_eq!(findings[1].symbols[0].remote, Remote::Named("ns".into()));
        assert_eq!(findings[1].symbols[0].local, Local::Star);
    }

    #[test]
    fn single_property_require_export() {
        let findings = findings_of("module.exports.answer = answer;");
        let finding = &findings[0];
        assert_eq!(finding.kind, FindingKind::Export);
        assert_eq!(finding.link, LinkKind::RequireLike);
        assert_eq!(finding.symbols[0].remote, Remote::Named("answer".into()));
        assert_eq!(finding.symbols[0].local, Local::Named("answer".into()));
    }

    #[test]
    fn bulk_require_export_with_spread() {
        let findings =
            findings_of("module.exports = { a, b: c, ...require('other') };");
        assert_eq!(findings.len(), 2);

        let bulk = &findings[0];
        assert_eq!(bulk.kind, FindingKind::Export);
        assert_eq!(bulk.symbols.len(), 2);
        assert_eq!(bulk.symbols[0].remote, Remote::Named("a".into()));
        assert_eq!(bulk.symbols[1].local, Local::Named("c".into()));

        let spread = &findings[1];
        assert_eq!(spread.specifier.as_deref(), Some("other"));
        assert_eq!(spread.symbols[0].remote, Remote::Star);
    }

    #[test]
    fn extractor_reports_lines() {
        let findings = findings_of("\n\nrequire('./foo');");
        assert_eq!(findings[0].line, 3);
    }
}
