//! Require-style linkage detection.
//!
//! Handles the CommonJS-flavored forms: bare `require('literal')` calls,
//! `const x = require(...)` bindings (including destructuring),
//! `exports.name = value` single-property exports, and
//! `module.exports = { ... }` bulk exports with `...require('literal')`
//! namespace spreads.
//!
//! Only calls where `require` is unbound in the surrounding scope count;
//! the caller establishes that through semantic analysis.

use oxc_ast::ast::{
    AssignmentExpression, AssignmentOperator, AssignmentTarget, BindingPattern, BindingPatternKind,
    Expression, ObjectExpression, ObjectPropertyKind, PropertyKey, StaticMemberExpression,
};

use crate::findings::{
    Finding, FindingKind, LinkKind, Local, Remote, SourceSpan, SymbolFinding,
};
use crate::parser::LineIndex;
use crate::stage::CommentIndex;

/// A `require('literal')` occurrence.
pub(crate) struct RequireRef {
    pub specifier: String,
    pub span: SourceSpan,
}

/// Match a bare `require('literal')` call. Calls with a non-literal or
/// missing argument do not count.
pub(crate) fn require_call(expr: &Expression<'_>) -> Option<RequireRef> {
    let Expression::CallExpression(call) = expr else {
        return None;
    };
    let Expression::Identifier(callee) = &call.callee else {
        return None;
    };
    if callee.name != "require" || call.arguments.len() != 1 {
        return None;
    }
    let Expression::StringLiteral(literal) = call.arguments[0].as_expression()? else {
        return None;
    };
    Some(RequireRef {
        specifier: literal.value.to_string(),
        span: SourceSpan::new(literal.span.start, literal.span.end),
    })
}

/// Collect all leaf binding identifiers of a pattern with their positions.
pub(crate) fn leaf_identifiers(pattern: &BindingPattern<'_>, out: &mut Vec<(String, u32)>) {
    match &pattern.kind {
        BindingPatternKind::BindingIdentifier(ident) => {
            out.push((ident.name.to_string(), ident.span.start));
        }
        BindingPatternKind::ObjectPattern(object) => {
            for property in &object.properties {
                leaf_identifiers(&property.value, out);
            }
            if let Some(rest) = &object.rest {
                leaf_identifiers(&rest.argument, out);
            }
        }
        BindingPatternKind::ArrayPattern(array) => {
            for element in array.elements.iter().flatten() {
                leaf_identifiers(element, out);
            }
            if let Some(rest) = &array.rest {
                leaf_identifiers(&rest.argument, out);
            }
        }
        BindingPatternKind::AssignmentPattern(assignment) => {
            leaf_identifiers(&assignment.left, out);
        }
    }
}

pub(crate) fn property_key_name(key: &PropertyKey<'_>) -> Option<String> {
    match key {
        PropertyKey::StaticIdentifier(ident) => Some(ident.name.to_string()),
        PropertyKey::StringLiteral(literal) => Some(literal.value.to_string()),
        _ => None,
    }
}

/// Symbols bound by the left-hand pattern of `pattern = require(...)`.
///
/// A plain identifier binds the whole namespace (`remote: *`). Object
/// patterns bind one symbol per property, with the rest element again
/// binding the namespace remainder. Stage annotations attach to the
/// individual element; they are ignored unless the binding is a
/// single-assignment (`const`) form.
pub(crate) fn require_binding_symbols(
    pattern: &BindingPattern<'_>,
    stage_applies: bool,
    comments: &CommentIndex<'_>,
    lines: &LineIndex,
    out: &mut Vec<SymbolFinding>,
) {
    let stage_at = |positions: &[u32]| {
        if stage_applies {
            comments.stage_at_first(positions)
        } else {
            None
        }
    };

    match &pattern.kind {
        BindingPatternKind::BindingIdentifier(ident) => {
            out.push(
                SymbolFinding::new(
                    Remote::Star,
                    Local::Named(ident.name.to_string()),
                    lines.line_of(ident.span.start),
                )
                .with_stage(stage_at(&[ident.span.start])),
            );
        }
        BindingPatternKind::ObjectPattern(object) => {
            for property in &object.properties {
                let Some(key) = property_key_name(&property.key) else {
                    continue;
                };
                let stage = stage_at(&[property.span.start]);
                let value = unwrap_defaults(&property.value);
                match &value.kind {
                    BindingPatternKind::BindingIdentifier(ident) => {
                        out.push(
                            SymbolFinding::new(
                                Remote::Named(key),
                                Local::Named(ident.name.to_string()),
                                lines.line_of(property.span.start),
                            )
                            .with_stage(stage),
                        );
                    }
                    _ => {
                        // Nested pattern: one symbol per leaf, all drawn
                        // from the same remote property.
                        let mut leaves = Vec::new();
                        leaf_identifiers(value, &mut leaves);
                        for (name, position) in leaves {
                            out.push(
                                SymbolFinding::new(
                                    Remote::Named(key.clone()),
                                    Local::Named(name),
                                    lines.line_of(position),
                                )
                                .with_stage(stage.or_else(|| stage_at(&[position]))),
                            );
                        }
                    }
                }
            }
            if let Some(rest) = &object.rest {
                let mut leaves = Vec::new();
                leaf_identifiers(&rest.argument, &mut leaves);
                for (name, position) in leaves {
                    out.push(
                        SymbolFinding::new(
                            Remote::Star,
                            Local::Named(name),
                            lines.line_of(position),
                        )
                        .with_stage(stage_at(&[rest.span.start, position])),
                    );
                }
            }
        }
        BindingPatternKind::ArrayPattern(_) => {
            let mut leaves = Vec::new();
            leaf_identifiers(pattern, &mut leaves);
            for (name, position) in leaves {
                out.push(
                    SymbolFinding::new(Remote::None, Local::Named(name), lines.line_of(position))
                        .with_stage(stage_at(&[position])),
                );
            }
        }
        BindingPatternKind::AssignmentPattern(assignment) => {
            require_binding_symbols(&assignment.left, stage_applies, comments, lines, out);
        }
    }
}

fn unwrap_defaults<'a, 'b>(pattern: &'a BindingPattern<'b>) -> &'a BindingPattern<'b> {
    match &pattern.kind {
        BindingPatternKind::AssignmentPattern(assignment) => unwrap_defaults(&assignment.left),
        _ => pattern,
    }
}

/// What an assignment writes to, when it writes to the exports object.
pub(crate) enum ExportsTarget {
    /// `module.exports = ...` / `exports = ...`
    Whole,
    /// `module.exports.name = ...` / `exports.name = ...`
    Property { name: String, position: u32 },
}

pub(crate) fn exports_target(assign: &AssignmentExpression<'_>) -> Option<ExportsTarget> {
    if assign.operator != AssignmentOperator::Assign {
        return None;
    }
    match &assign.left {
        AssignmentTarget::AssignmentTargetIdentifier(ident) if ident.name == "exports" => {
            Some(ExportsTarget::Whole)
        }
        AssignmentTarget::StaticMemberExpression(member) => {
            if is_exports_object(&member.object) {
                Some(ExportsTarget::Property {
                    name: member.property.name.to_string(),
                    position: member.span.start,
                })
            } else if is_module_exports(member) {
                Some(ExportsTarget::Whole)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn is_module_exports(member: &StaticMemberExpression<'_>) -> bool {
    member.property.name == "exports"
        && matches!(&member.object, Expression::Identifier(ident) if ident.name == "module")
}

fn is_exports_object(expr: &Expression<'_>) -> bool {
    match expr {
        Expression::Identifier(ident) => ident.name == "exports",
        Expression::StaticMemberExpression(member) => is_module_exports(member),
        _ => false,
    }
}

/// The local name an exported value carries, when it is a plain identifier.
pub(crate) fn value_local(expr: &Expression<'_>) -> Local {
    match expr {
        Expression::Identifier(ident) => Local::Named(ident.name.to_string()),
        _ => Local::None,
    }
}

/// Findings for `module.exports = { ... }`: a bulk export finding plus one
/// re-export finding per `...require('literal')` spread.
pub(crate) fn bulk_export_findings(
    object: &ObjectExpression<'_>,
    require_unbound: bool,
    comments: &CommentIndex<'_>,
    lines: &LineIndex,
    line: u32,
) -> Vec<Finding> {
    let mut symbols = Vec::new();
    let mut re_exports = Vec::new();

    for property in &object.properties {
        match property {
            ObjectPropertyKind::ObjectProperty(property) => {
                let Some(key) = property_key_name(&property.key) else {
                    continue;
                };
                symbols.push(
                    SymbolFinding::new(
                        Remote::Named(key),
                        value_local(&property.value),
                        lines.line_of(property.span.start),
                    )
                    .with_stage(comments.stage_at(property.span.start)),
                );
            }
            ObjectPropertyKind::SpreadProperty(spread) => {
                if !require_unbound {
                    continue;
                }
                if let Some(required) = require_call(&spread.argument) {
                    re_exports.push(
                        Finding::new(
                            FindingKind::Export,
                            LinkKind::RequireLike,
                            lines.line_of(spread.span.start),
                        )
                        .with_specifier(required.specifier, required.span)
                        .with_symbols(vec![SymbolFinding::new(
                            Remote::Star,
                            Local::None,
                            lines.line_of(spread.span.start),
                        )]),
                    );
                }
            }
        }
    }

    let mut findings = vec![Finding::new(FindingKind::Export, LinkKind::RequireLike, line)
        .with_symbols(symbols)];
    findings.extend(re_exports);
    findings
}
