use std::collections::BTreeMap;
use std::fmt;

/// Counts from a Matcher run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MatchStats {
    pub queries_total: u32,
    pub queries_ok: u32,
    pub queries_failed: u32,
    pub items_retrieved: u32,
    pub too_old: u32,
    pub excluded: u32,
    pub unmatched: u32,
    pub duplicates: u32,
    pub matched: u32,
}

/// Counts from a Classifier run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClassifyStats {
    pub items_total: u32,
    pub labeled: u32,
    /// Labeled, but the response could not be mapped onto the taxonomy.
    pub unresolved: u32,
    /// The call itself failed; the item got the fallback and a failure marker.
    pub failed: u32,
    /// Never started because of the run deadline or an abort.
    pub not_started: u32,
    /// Answered but not written: the call that aborted the batch, and calls
    /// still in flight when it did.
    pub discarded: u32,
    pub by_label: BTreeMap<String, u32>,
}

impl ClassifyStats {
    pub fn completed(&self) -> u32 {
        self.labeled + self.failed
    }
}

/// Everything a CLI invocation did, printed at the end.
#[derive(Debug, Default)]
pub struct RunStats {
    pub matching: Option<MatchStats>,
    pub classification: Option<ClassifyStats>,
}

impl fmt::Display for MatchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Queries:            {} ({} ok, {} failed)", self.queries_total, self.queries_ok, self.queries_failed)?;
        writeln!(f, "Items retrieved:    {}", self.items_retrieved)?;
        writeln!(f, "Too old:            {}", self.too_old)?;
        writeln!(f, "Excluded:           {}", self.excluded)?;
        writeln!(f, "Not matched:        {}", self.unmatched)?;
        writeln!(f, "Duplicates:         {}", self.duplicates)?;
        writeln!(f, "Matched:            {}", self.matched)
    }
}

impl fmt::Display for ClassifyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Items:              {}", self.items_total)?;
        writeln!(f, "Labeled:            {}", self.labeled)?;
        writeln!(f, "Unresolved:         {}", self.unresolved)?;
        writeln!(f, "Failed:             {}", self.failed)?;
        writeln!(f, "Not started:        {}", self.not_started)?;
        if self.discarded > 0 {
            writeln!(f, "Discarded:          {}", self.discarded)?;
        }
        if !self.by_label.is_empty() {
            let total = self.labeled.max(1);
            writeln!(f, "\nBy label:")?;
            for (label, count) in &self.by_label {
                writeln!(
                    f,
                    "  {label:<16} {count:>5} ({:.0}%)",
                    *count as f64 / total as f64 * 100.0
                )?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== InjuryLens Run Complete ===")?;
        if let Some(matching) = &self.matching {
            writeln!(f, "\n-- Search --")?;
            write!(f, "{matching}")?;
        }
        if let Some(classification) = &self.classification {
            writeln!(f, "\n-- Classify --")?;
            write!(f, "{classification}")?;
        }
        Ok(())
    }
}
