/// The seven pipeline phases and their dependency DAG.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    KeywordMetrics,
    SerpCollection,
    CompanyEnrichmentSerp,
    YoutubeEnrichment,
    ContentScraping,
    ContentAnalysis,
    DsiCalculation,
}

impl PipelinePhase {
    /// All phases in DAG order.
    pub(crate) const ALL: [PipelinePhase; 7] = [
        PipelinePhase::KeywordMetrics,
        PipelinePhase::SerpCollection,
        PipelinePhase::CompanyEnrichmentSerp,
        PipelinePhase::YoutubeEnrichment,
        PipelinePhase::ContentScraping,
        PipelinePhase::ContentAnalysis,
        PipelinePhase::DsiCalculation,
    ];

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            PipelinePhase::KeywordMetrics => "keyword_metrics",
            PipelinePhase::SerpCollection => "serp_collection",
            PipelinePhase::CompanyEnrichmentSerp => "company_enrichment_serp",
            PipelinePhase::YoutubeEnrichment => "youtube_enrichment",
            PipelinePhase::ContentScraping => "content_scraping",
            PipelinePhase::ContentAnalysis => "content_analysis",
            PipelinePhase::DsiCalculation => "dsi_calculation",
        }
    }

    #[allow(dead_code)]
    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "keyword_metrics" => Some(PipelinePhase::KeywordMetrics),
            "serp_collection" => Some(PipelinePhase::SerpCollection),
            "company_enrichment_serp" => Some(PipelinePhase::CompanyEnrichmentSerp),
            "youtube_enrichment" => Some(PipelinePhase::YoutubeEnrichment),
            "content_scraping" => Some(PipelinePhase::ContentScraping),
            "content_analysis" => Some(PipelinePhase::ContentAnalysis),
            "dsi_calculation" => Some(PipelinePhase::DsiCalculation),
        _ => None,
        }
    }

    /// Declared predecessors. A phase may run only once every non-skipped
    /// predecessor is completed.
    pub(crate) fn predecessors(self) -> &'static [PipelinePhase] {
        match self {
            PipelinePhase::KeywordMetrics => &[],
            PipelinePhase::SerpCollection => &[PipelinePhase::KeywordMetrics],
            PipelinePhase::CompanyEnrichmentSerp
            | PipelinePhase::YoutubeEnrichment
            | PipelinePhase::ContentScraping => &[PipelinePhase::SerpCollection],
            PipelinePhase::ContentAnalysis => &[
                PipelinePhase::ContentScraping,
                PipelinePhase::CompanyEnrichmentSerp,
                PipelinePhase::YoutubeEnrichment,
            ],
            PipelinePhase::DsiCalculation => &[PipelinePhase::ContentAnalysis],
        }
    }

    /// Phases whose declared predecessors include `self`.
    pub(crate) fn dependents(self) -> Vec<PipelinePhase> {
        Self::ALL
            .iter()
            .copied()
            .filter(|phase| phase.predecessors().contains(&self))
            .collect()
    }

    /// Critical phases fail the run when they do not complete; non-critical
    /// ones (video enrichment) are skipped instead.
    pub(crate) fn is_critical(self) -> bool {
        !matches!(
            self,
            PipelinePhase::YoutubeEnrichment
                | PipelinePhase::KeywordMetrics
                | PipelinePhase::CompanyEnrichmentSerp
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_a_topological_order() {
        for (index, phase) in PipelinePhase::ALL.iter().enumerate() {
            for predecessor in phase.predecessors() {
                let pred_index = PipelinePhase::ALL
                    .iter()
                    .position(|p| p == predecessor)
                    .expect("predecessor present");
                assert!(
                    pred_index < index,
                    "{:?} must come before {:?}",
                    predecessor,
                    phase
                );
            }
        }
    }

    #[test]
    fn serp_failure_would_block_four_phases() {
        let dependents = PipelinePhase::SerpCollection.dependents();
        assert_eq!(dependents.len(), 3);
        assert!(dependents.contains(&PipelinePhase::CompanyEnrichmentSerp));
        assert!(dependents.contains(&PipelinePhase::YoutubeEnrichment));
        assert!(dependents.contains(&PipelinePhase::ContentScraping));
    }

    #[test]
    fn content_analysis_has_three_predecessors() {
        let predecessors = PipelinePhase::ContentAnalysis.predecessors();
        assert_eq!(predecessors.len(), 3);
    }

    #[test]
    fn criticality_matches_failure_policy() {
        assert!(PipelinePhase::SerpCollection.is_critical());
        assert!(PipelinePhase::ContentScraping.is_critical());
        assert!(PipelinePhase::ContentAnalysis.is_critical());
        assert!(PipelinePhase::DsiCalculation.is_critical());
        assert!(!PipelinePhase::YoutubeEnrichment.is_critical());
    }

    #[test]
    fn names_round_trip() {
        for phase in PipelinePhase::ALL {
            assert_eq!(PipelinePhase::parse(phase.as_str()), Some(phase));
        }
        assert!(PipelinePhase::parse("unknown_phase").is_none());
    }
}
