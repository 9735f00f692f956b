//! Stage-annotation scanning.
//!
//! Stage annotations are free-form leading comment tokens —
//! `@prebake.moot`, `@prebake.eager`, `@prebake.runtime` — attached to
//! declarations and destructuring elements. Within one leading comment
//! block the last token wins.

use rustc_hash::FxHashMap;

use oxc_ast::ast::Program;

use crate::findings::BindingStage;

const TAGS: [(&str, BindingStage); 3] = [
    ("@prebake.moot", BindingStage::Moot),
    ("@prebake.eager", BindingStage::Eager),
    ("@prebake.runtime", BindingStage::Runtime),
];

/// Find the stage requested by annotation tokens in a comment text.
/// The last token wins.
pub fn stage_in_text(text: &str) -> Option<BindingStage> {
    let mut winner: Option<(usize, BindingStage)> = None;
    for (tag, stage) in TAGS {
        for (position, _) in text.match_indices(tag) {
            // Reject `@prebake.mootling` and friends.
            let boundary = text[position + tag.len()..]
                .chars()
                .next()
                .is_none_or(|c| !c.is_ascii_alphanumeric());
            if !boundary {
                continue;
            }
            match winner {
                Some((best, _)) if best >= position => {}
                _ => winner = Some((position, stage)),
            }
        }
    }
    winner.map(|(_, stage)| stage)
}

/// Index of a program's comments keyed by the node position each comment
/// attaches to.
pub struct CommentIndex<'a> {
    source: &'a str,
    by_attachment: FxHashMap<u32, Vec<(u32, u32)>>,
}

impl<'a> CommentIndex<'a> {
    pub fn new(program: &Program<'_>, source: &'a str) -> Self {
        let mut by_attachment: FxHashMap<u32, Vec<(u32, u32)>> = FxHashMap::default();
        for comment in &program.comments {
            let content = comment.content_span();
            by_attachment
                .entry(comment.attached_to)
                .or_default()
                .push((content.start, content.end));
        }
        Self {
            source,
            by_attachment,
        }
    }

    /// Stage from the comment block leading the node that starts at
    /// `position`. Scans the whole block in order; last match wins.
    pub fn stage_at(&self, position: u32) -> Option<BindingStage> {
        let spans = self.by_attachment.get(&position)?;
        let mut stage = None;
        for (start, end) in spans {
            if let Some(found) = stage_in_text(&self.source[*start as usize..*end as usize]) {
                stage = Some(found);
            }
        }
        stage
    }

    /// Stage at the first position in `positions` that carries one.
    pub fn stage_at_first(&self, positions: &[u32]) -> Option<BindingStage> {
        positions.iter().find_map(|p| self.stage_at(*p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_tag_is_found() {
        assert_eq!(stage_in_text(" @prebake.moot "), Some(BindingStage::Moot));
        assert_eq!(stage_in_text(" @prebake.eager "), Some(BindingStage::Eager));
        assert_eq!(
            stage_in_text(" @prebake.runtime "),
            Some(BindingStage::Runtime)
        );
    }

    #[test]
    fn last_tag_wins() {
        assert_eq!(
            stage_in_text("@prebake.moot then @prebake.runtime"),
            Some(BindingStage::Runtime)
        );
    }

    #[test]
    fn similar_prefixes_do_not_match() {
        assert_eq!(stage_in_text("@prebake.mootling"), None);
        assert_eq!(stage_in_text("no tags here"), None);
    }

    #[test]
    fn comment_index_attaches_to_following_node() {
        use oxc_allocator::Allocator;
        let source = "/* @prebake.moot */ const x = 1;";
        let allocator = Allocator::default();
        let parsed =
            crate::parser::parse(&allocator, source, crate::parser::ParseOptions::default())
                .unwrap();
        let index = CommentIndex::new(&parsed.program, source);

        // The comment attaches to the start of the const statement.
        use oxc_span::GetSpan;
        let stmt_start = parsed.program.body[0].span().start;
        assert_eq!(index.stage_at(stmt_start), Some(BindingStage::Moot));
    }
}
