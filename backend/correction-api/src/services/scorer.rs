//! Scoring of corrector reports and the fold of an attempt score into its
//! submission.
//!
//! Correctness is all-or-nothing. Performance tests only modulate the upper
//! half of the score: `floor(base / 2) * (1 + passed / total)`. Tests the
//! corrector did not run are left out of both counts.

use crate::config::ScoringConfig;
use crate::models::{
    CorrectionResult, Problem, ScoreState, TestCase, TestOutcome, TestType, TestVerdict, Verdict,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub score: i64,
    pub compiled: bool,
    pub passed_correction: usize,
    pub total_correction: usize,
    pub passed_performance: usize,
    pub total_performance: usize,
    pub verdicts: Vec<TestVerdict>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldEffect {
    BestScoreRaised { from: i64, to: i64 },
    MalusIncreased { by: i64, total: i64 },
    Unchanged,
}

/// `16 * 4^difficulty`, saturating for absurd difficulties.
pub fn base_score(difficulty: u32) -> i64 {
    4i64.checked_pow(difficulty)
        .and_then(|p| p.checked_mul(16))
        .unwrap_or(i64::MAX)
}

/// Malus stops growing once it reaches `4^(difficulty + 1)`.
pub fn malus_cap(difficulty: u32) -> i64 {
    4i64.checked_pow(difficulty + 1).unwrap_or(i64::MAX)
}

/// `4^(difficulty - 1)`; difficulty 0 uses the configured value.
pub fn malus_increment(difficulty: u32, config: &ScoringConfig) -> i64 {
    match difficulty {
        0 => config.zero_difficulty_malus.max(0),
        d => 4i64.checked_pow(d - 1).unwrap_or(i64::MAX),
    }
}

/// A test passes iff it exited with 0, the sandbox reported `OK`, and its
/// output matches the reference once surrounding whitespace is stripped.
pub fn test_passes(reference: &TestCase, outcome: &TestOutcome) -> bool {
    outcome.exitcode == 0 && outcome.meta.is_ok() && outcome.stdout.trim() == reference.stdout.trim()
}

pub fn score(problem: &Problem, result: &CorrectionResult) -> i64 {
    evaluate(problem, result).score
}

pub fn evaluate(problem: &Problem, result: &CorrectionResult) -> Evaluation {
    let compiled = !result.compile.as_ref().is_some_and(|c| c.failed());

    let verdicts: Vec<TestVerdict> = problem
        .tests()
        .iter()
        .map(|reference| TestVerdict {
            name: reference.name.clone(),
            test_type: reference.test_type,
            verdict: match result.outcome(&reference.name) {
                _ if !compiled => Verdict::Skipped,
                None => Verdict::Skipped,
                Some(outcome) if test_passes(reference, outcome) => Verdict::Passed,
                Some(_) => Verdict::Failed,
            },
        })
        .collect();

    // skipped tests count toward neither side of a ratio
    let count = |test_type: TestType, passed_only: bool| {
        verdicts
            .iter()
            .filter(|v| v.test_type == test_type && v.verdict != Verdict::Skipped)
            .filter(|v| !passed_only || v.verdict == Verdict::Passed)
            .count()
    };
    let total_correction = count(TestType::Correction, false);
    let passed_correction = count(TestType::Correction, true);
    let total_performance = count(TestType::Performance, false);
    let passed_performance = count(TestType::Performance, true);

    let mut evaluation = Evaluation {
        score: 0,
        compiled,
        passed_correction,
        total_correction,
        passed_performance,
        total_performance,
        verdicts,
    };

    if !compiled {
        return evaluation;
    }

    if result.tests.is_none() {
        // nothing was executed at all
        return evaluation;
    }

    if total_correction == 0 {
        tracing::warn!(problem = %problem.key(), "there is no correction test for problem");
    }

    if passed_correction != total_correction {
        return evaluation;
    }

    let base = base_score(problem.difficulty());
    evaluation.score = if total_performance == 0 {
        base
    } else {
        // (base / 2) * (1 + p / t) == (base / 2) * (t + p) / t, exactly
        let half = (base / 2) as i128;
        let (passed, total) = (passed_performance as i128, total_performance as i128);
        i64::try_from(half * (total + passed) / total).unwrap_or(i64::MAX)
    };
    evaluation
}

/// Folds the score of one attempt into the submission state.
///
/// The best score never decreases. A failed attempt on a still unsolved
/// problem adds malus until the cap is reached.
pub fn apply_result(
    state: ScoreState,
    this_score: i64,
    difficulty: u32,
    config: &ScoringConfig,
) -> (ScoreState, FoldEffect) {
    let cap = malus_cap(difficulty);

    if this_score > state.score_base {
        let next = ScoreState {
            score_base: this_score,
            ..state
        };
        return (
            next,
            FoldEffect::BestScoreRaised {
                from: state.score_base,
                to: this_score,
            },
        );
    }

    if this_score == 0 && state.score_base == 0 && state.malus < cap {
        let increment = malus_increment(difficulty, config);
        let malus = state.malus.saturating_add(increment).min(cap);
        if malus > state.malus {
            tracing::debug!(by = malus - state.malus, total = malus, "increased malus");
            return (
                ScoreState { malus, ..state },
                FoldEffect::MalusIncreased {
                    by: malus - state.malus,
                    total: malus,
                },
            );
        }
    }

    (state, FoldEffect::Unchanged)
}
