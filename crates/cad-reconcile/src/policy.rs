//! Accept/reject policy: turn a classification into pending-table effects.

use anyhow::Result;
use sqlx::PgPool;

use cad_db::boundaries::{pending_deletions_add, pending_mark, pending_mark_many};
use cad_schemas::MatchType;

/// The reconciler's decision for one pending row.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Mark the row with the tag; no side effects.
    Simple(MatchType),
    /// Merge/segment outcome: mark the row, schedule absorbed accepted ids
    /// for deletion, and accept identified siblings as `NewSegment`.
    MergeSegment {
        tag: MatchType,
        absorbed: Vec<i64>,
        siblings: Vec<i64>,
    },
}

impl Decision {
    pub fn tag(&self) -> MatchType {
        match self {
            Decision::Simple(tag) => *tag,
            Decision::MergeSegment { tag, .. } => *tag,
        }
    }
}

/// Apply a decision to the database.  Every operation here is idempotent, so
/// re-applying after a crash converges.
pub async fn apply_decision(pool: &PgPool, poly_id: i64, decision: &Decision) -> Result<()> {
    match decision {
        Decision::Simple(tag) => {
            pending_mark(pool, poly_id, *tag).await?;
        }
        Decision::MergeSegment {
            tag,
            absorbed,
            siblings,
        } => {
            pending_mark(pool, poly_id, *tag).await?;
            pending_deletions_add(pool, absorbed).await?;
            pending_mark_many(pool, siblings, MatchType::NewSegment).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_exposes_its_tag() {
        assert_eq!(Decision::Simple(MatchType::Exact).tag(), MatchType::Exact);
        let d = Decision::MergeSegment {
            tag: MatchType::Merged,
            absorbed: vec![1],
            siblings: vec![],
        };
        assert_eq!(d.tag(), MatchType::Merged);
        assert!(d.tag().is_accepting());
    }
}
