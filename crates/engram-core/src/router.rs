//! # Query Router
//!
//! Pattern-based tier selection and mode heuristics. The router decides
//! which retrieval tiers run for a query and detects the query mode
//! that controls context breadth downstream.
//!
//! Rules are ordered, case-insensitive and first-match-wins. Some
//! query shapes belong to surfaces outside this core (preference
//! lookups, structured client/project tables, the event log); for
//! those the router returns an annotated plan instead of guessing a
//! tier.
//!
//! One override is unconditional: execution-mode queries never run the
//! probabilistic tier, whatever the pattern suggested. Execution
//! queries must stay fast.

use serde::{Deserialize, Serialize};

use crate::memory::TierKind;

// ============================================================================
// QUERY MODE
// ============================================================================

/// Per-query mode controlling context breadth and expensive tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Fast, narrow context; the default on ambiguity
    #[default]
    Execution,
    /// Wider context for deliberate work
    Planning,
    /// Widest context for idea generation
    Brainstorming,
}

impl QueryMode {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Execution => "execution",
            QueryMode::Planning => "planning",
            QueryMode::Brainstorming => "brainstorming",
        }
    }
}

impl std::fmt::Display for QueryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// TIER PLAN
// ============================================================================

/// Query shapes answered by surfaces outside this core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutedElsewhere {
    /// Personal preference / key-value lookup
    Preferences,
    /// Structured client/project table lookup
    StructuredLookup,
    /// Date-keyed event log
    EventLog,
}

/// The routed plan for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierPlan {
    /// Tiers to invoke, sorted and unique
    pub tiers: Vec<TierKind>,
    /// Whether the graph tier widens its seed set by multi-hop search
    pub multi_hop: bool,
    /// Set when the query belongs to a surface outside the core
    pub annotation: Option<RoutedElsewhere>,
    /// Name of the rule that matched, recorded for attribution
    pub rule: String,
    /// True when the execution-mode override removed the
    /// probabilistic tier
    pub prob_dropped_by_mode: bool,
}

impl TierPlan {
    fn new(rule: &str, tiers: Vec<TierKind>) -> Self {
        Self {
            tiers,
            multi_hop: false,
            annotation: None,
            rule: rule.to_string(),
            prob_dropped_by_mode: false,
        }
    }

    /// Whether a tier is part of the plan
    pub fn includes(&self, tier: TierKind) -> bool {
        self.tiers.contains(&tier)
    }

    /// Whether the plan invokes no tier at all
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Pattern-based router. Stateless; safe to share.
#[derive(Debug, Default, Clone)]
pub struct QueryRouter;

impl QueryRouter {
    /// Create a router
    pub fn new() -> Self {
        Self
    }

    /// Detect the query mode from phrasing. Ambiguous queries default
    /// to execution.
    pub fn detect_mode(&self, query: &str) -> QueryMode {
        let q = query.to_lowercase();

        let brainstorming = ["brainstorm", "ideas for", "what if", "imagine", "explore", "could we"]
            .iter()
            .any(|kw| q.contains(kw));
        let planning = [" plan", "roadmap", "strategy", "milestone", "prioritize", "next week", "should we"]
            .iter()
            .any(|kw| q.contains(kw) || q.starts_with(kw.trim_start()));

        match (brainstorming, planning) {
            (true, false) => QueryMode::Brainstorming,
            (false, true) => QueryMode::Planning,
            // Both or neither: ambiguous, stay fast
            _ => QueryMode::Execution,
        }
    }

    /// Select the tiers for a query. First matching rule wins, then
    /// the execution-mode override is applied.
    pub fn route(&self, query: &str, mode: QueryMode) -> TierPlan {
        let q = query.to_lowercase();

        let mut plan = if q.contains("what's my ") || q.contains("what is my ") {
            let mut plan = TierPlan::new("preferences", Vec::new());
            plan.annotation = Some(RoutedElsewhere::Preferences);
            plan
        } else if q.contains("what client") || q.contains("what project") {
            let mut plan = TierPlan::new("structured_lookup", vec![TierKind::Vector]);
            plan.annotation = Some(RoutedElsewhere::StructuredLookup);
            plan
        } else if q.contains("what about ") {
            TierPlan::new("topic_probe", vec![TierKind::Vector, TierKind::HippoRag])
        } else if q.contains("what led to ") || (q.contains("how did ") && q.contains(" happen")) {
            let mut plan = TierPlan::new("causal_chain", vec![TierKind::HippoRag]);
            plan.multi_hop = true;
            plan
        } else if q.contains("what happened on ") {
            let mut plan = TierPlan::new("event_log", Vec::new());
            plan.annotation = Some(RoutedElsewhere::EventLog);
            plan
        } else if Self::looks_probabilistic(&q) {
            TierPlan::new(
                "probabilistic",
                vec![TierKind::Vector, TierKind::HippoRag, TierKind::Probabilistic],
            )
        } else {
            TierPlan::new("default", vec![TierKind::Vector, TierKind::HippoRag])
        };

        if mode == QueryMode::Execution && plan.includes(TierKind::Probabilistic) {
            plan.tiers.retain(|t| *t != TierKind::Probabilistic);
            plan.prob_dropped_by_mode = true;
        }

        // Wider modes buy graph depth: planning and brainstorming
        // queries widen their seed set by multi-hop search
        if mode != QueryMode::Execution && plan.includes(TierKind::HippoRag) {
            plan.multi_hop = true;
        }

        plan.tiers.sort();
        plan.tiers.dedup();
        plan
    }

    /// Conditional-probability phrasing: "P(rain|cloud)", "likelihood
    /// of", "probability of", "odds of"
    fn looks_probabilistic(q: &str) -> bool {
        if q.contains("likelihood") || q.contains("probability") || q.contains("odds of") {
            return true;
        }
        // P(x|y) style
        if let Some(open) = q.find("p(") {
            if let Some(close) = q[open..].find(')') {
                return q[open..open + close].contains('|');
            }
        }
        false
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferences_routes_outside_core() {
        let router = QueryRouter::new();
        let plan = router.route("What's my favorite editor?", QueryMode::Execution);
        assert!(plan.is_empty());
        assert_eq!(plan.annotation, Some(RoutedElsewhere::Preferences));
        assert_eq!(plan.rule, "preferences");
    }

    #[test]
    fn test_structured_lookup_keeps_vector() {
        let router = QueryRouter::new();
        let plan = router.route("What project is Alice on?", QueryMode::Execution);
        assert_eq!(plan.tiers, vec![TierKind::Vector]);
        assert_eq!(plan.annotation, Some(RoutedElsewhere::StructuredLookup));
    }

    #[test]
    fn test_topic_probe() {
        let router = QueryRouter::new();
        let plan = router.route("What about the migration?", QueryMode::Execution);
        assert_eq!(plan.tiers, vec![TierKind::Vector, TierKind::HippoRag]);
        assert!(!plan.multi_hop);
    }

    #[test]
    fn test_wide_modes_enable_multi_hop() {
        let router = QueryRouter::new();
        let plan = router.route("What about the migration?", QueryMode::Planning);
        assert!(plan.multi_hop);
        let plan = router.route("What about the migration?", QueryMode::Brainstorming);
        assert!(plan.multi_hop);
        // But not for plans without the graph tier
        let plan = router.route("What's my favorite editor?", QueryMode::Planning);
        assert!(!plan.multi_hop);
    }

    #[test]
    fn test_causal_chain_enables_multi_hop() {
        let router = QueryRouter::new();
        let plan = router.route("What led to the outage?", QueryMode::Execution);
        assert_eq!(plan.tiers, vec![TierKind::HippoRag]);
        assert!(plan.multi_hop);

        let plan = router.route("How did the merger happen?", QueryMode::Planning);
        assert!(plan.multi_hop);
    }

    #[test]
    fn test_event_log_routes_outside_core() {
        let router = QueryRouter::new();
        let plan = router.route("What happened on 2026-03-01?", QueryMode::Execution);
        assert!(plan.is_empty());
        assert_eq!(plan.annotation, Some(RoutedElsewhere::EventLog));
    }

    #[test]
    fn test_probabilistic_pattern_adds_tier() {
        let router = QueryRouter::new();
        let plan = router.route("P(rain|cloud)?", QueryMode::Planning);
        assert!(plan.includes(TierKind::Probabilistic));
        assert!(plan.includes(TierKind::Vector));
        assert!(plan.includes(TierKind::HippoRag));

        let plan = router.route("likelihood of churn next month", QueryMode::Planning);
        assert!(plan.includes(TierKind::Probabilistic));
    }

    #[test]
    fn test_execution_mode_drops_probabilistic() {
        let router = QueryRouter::new();
        let plan = router.route("P(rain|cloud)?", QueryMode::Execution);
        assert!(!plan.includes(TierKind::Probabilistic));
        assert!(plan.prob_dropped_by_mode);
    }

    #[test]
    fn test_default_plan() {
        let router = QueryRouter::new();
        let plan = router.route("tesla founding story", QueryMode::Execution);
        assert_eq!(plan.tiers, vec![TierKind::Vector, TierKind::HippoRag]);
        assert_eq!(plan.rule, "default");
        assert!(!plan.prob_dropped_by_mode);
    }

    #[test]
    fn test_first_match_wins() {
        let router = QueryRouter::new();
        // Contains both a preference and a topic pattern; preference
        // rule is evaluated first
        let plan = router.route("what's my take, what about pricing?", QueryMode::Planning);
        assert_eq!(plan.rule, "preferences");
    }

    #[test]
    fn test_mode_detection() {
        let router = QueryRouter::new();
        assert_eq!(
            router.detect_mode("brainstorm ideas for the launch"),
            QueryMode::Brainstorming
        );
        assert_eq!(
            router.detect_mode("draft the roadmap for Q3"),
            QueryMode::Planning
        );
        assert_eq!(router.detect_mode("fix the login bug"), QueryMode::Execution);
        // Ambiguous: both planning and brainstorming phrasing
        assert_eq!(
            router.detect_mode("brainstorm the roadmap"),
            QueryMode::Execution
        );
    }

    #[test]
    fn test_p_pattern_requires_conditional_bar() {
        let router = QueryRouter::new();
        let plan = router.route("jeep(wrangler) trim levels", QueryMode::Planning);
        assert!(!plan.includes(TierKind::Probabilistic));
    }
}
