/// Stats from one job run.
#[derive(Debug, Default, Clone)]
pub struct HarvestStats {
    pub pages_fetched: u32,
    pub profiles_seen: u64,
    pub records_created: u64,
    pub duplicates_merged: u64,
    pub flagged_for_review: u64,
    pub parse_failures: u64,
    pub fetch_errors: u64,
    pub sources_completed: u32,
    pub sources_failed: u32,
    pub sources_skipped: u32,
}

impl std::fmt::Display for HarvestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Harvest Run Complete ===")?;
        writeln!(f, "Pages fetched:      {}", self.pages_fetched)?;
        writeln!(f, "Profiles seen:      {}", self.profiles_seen)?;
        writeln!(f, "Records created:    {}", self.records_created)?;
        writeln!(f, "Duplicates merged:  {}", self.duplicates_merged)?;
        writeln!(f, "Flagged for review: {}", self.flagged_for_review)?;
        writeln!(f, "Parse failures:     {}", self.parse_failures)?;
        writeln!(f, "Fetch errors:       {}", self.fetch_errors)?;
        writeln!(
            f,
            "Sources:            {} completed / {} failed / {} skipped",
            self.sources_completed, self.sources_failed, self.sources_skipped
        )?;
        let total = self.profiles_seen.max(1);
        writeln!(
            f,
            "Duplicate rate:     {:.0}%",
            self.duplicates_merged as f64 / total as f64 * 100.0
        )?;
        Ok(())
    }
}
