mod lexer;

pub use lexer::sanitize;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Points for each matched category. Five categories, so a sample that
/// exercises all of them yields a 100-point rubric.
pub const CATEGORY_POINTS: u32 = 20;
pub const FALLBACK_POINTS: u32 = 100;
pub const FALLBACK_LABEL: &str = "Código base";

struct Category {
    label: &'static str,
    pattern: &'static str,
    feedback: &'static str,
}

const CATEGORIES: [Category; 5] = [
    Category {
        label: "Declaración de variables",
        pattern: r"\b(int|float|double|char|long|short|unsigned|signed|bool)\s+\**\s*[A-Za-z_]\w*\s*(=|;|,|\[)",
        feedback: "Declara al menos una variable indicando su tipo, por ejemplo: int x = 5;",
    },
    Category {
        label: "Estructura condicional",
        pattern: r"\b(if|else|switch)\b",
        feedback: "Usa una estructura condicional (if, else o switch).",
    },
    Category {
        label: "Estructura repetitiva",
        pattern: r"\b(for|while|do)\b",
        feedback: "Usa un ciclo (for, while o do-while).",
    },
    Category {
        label: "Entrada/salida estándar",
        pattern: r"\b(printf|scanf|puts|gets|fgets|putchar|getchar)\s*\(",
        feedback: "Muestra o lee datos con printf, scanf u otra función de stdio.",
    },
    Category {
        label: "Fin de sentencias",
        pattern: r";",
        feedback: "Termina cada sentencia con punto y coma (;).",
    },
];

const FALLBACK_PATTERN: &str = r"\S";
const FALLBACK_FEEDBACK: &str = "Escribe tu solución antes de enviarla.";

/// Which text a criterion's pattern is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchScope {
    /// Comments and literal contents removed.
    #[default]
    Sanitized,
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    pub label: String,
    pub points_total: u32,
    #[serde(default)]
    pub points_awarded: u32,
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default)]
    pub scope: MatchScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rubric {
    pub criteria: Vec<Criterion>,
}

impl Rubric {
    pub fn total(&self) -> u32 {
        self.criteria.iter().map(|c| c.points_total).sum()
    }

    pub fn is_fallback(&self) -> bool {
        self.criteria.len() == 1 && self.criteria[0].label == FALLBACK_LABEL
    }

    pub fn from_json(raw: &str) -> Result<Self, RubricError> {
        serde_json::from_str(raw).map_err(|e| RubricError::invalid(format!("bad rubric json: {e}")))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "[]".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionResult {
    pub label: String,
    pub passed: bool,
    pub points_awarded: u32,
    pub points_total: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GradeReport {
    pub score: u32,
    pub max: u32,
    pub details: Vec<CriterionResult>,
}

impl GradeReport {
    pub fn all_passed(&self) -> bool {
        self.details.iter().all(|d| d.passed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RubricError {
    pub code: String,
    pub message: String,
}

impl RubricError {
    fn invalid(message: impl Into<String>) -> Self {
        RubricError {
            code: "rubric_invalid".to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RubricError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RubricError {}

/// Derives a rubric from a teacher's expected-code sample.
///
/// Each of the fixed categories that matches the sanitized sample at least
/// once contributes one criterion worth [`CATEGORY_POINTS`], in category
/// order. A sample matching none of them gets a single
/// [`FALLBACK_POINTS`] criterion that accepts any non-blank submission.
pub fn generate_rubric(expected_code: &str) -> Rubric {
    let sanitized = sanitize(expected_code);
    let mut criteria = Vec::with_capacity(CATEGORIES.len());

    for cat in CATEGORIES.iter() {
        let Ok(re) = Regex::new(cat.pattern) else {
            continue;
        };
        if re.is_match(&sanitized) {
            criteria.push(Criterion {
                label: cat.label.to_string(),
                points_total: CATEGORY_POINTS,
                points_awarded: 0,
                pattern: cat.pattern.to_string(),
                feedback: Some(cat.feedback.to_string()),
                scope: MatchScope::Sanitized,
            });
        }
    }

    if criteria.is_empty() {
        criteria.push(Criterion {
            label: FALLBACK_LABEL.to_string(),
            points_total: FALLBACK_POINTS,
            points_awarded: 0,
            pattern: FALLBACK_PATTERN.to_string(),
            feedback: Some(FALLBACK_FEEDBACK.to_string()),
            scope: MatchScope::Raw,
        });
    }

    Rubric { criteria }
}

/// Applies every criterion of `rubric` to `code`. Pure: the same inputs
/// always produce the same report.
pub fn grade(rubric: &Rubric, code: &str) -> Result<GradeReport, RubricError> {
    let sanitized = sanitize(code);
    let mut details = Vec::with_capacity(rubric.criteria.len());
    let mut score: u32 = 0;
    let mut max: u32 = 0;

    for c in rubric.criteria.iter() {
        let re = Regex::new(&c.pattern).map_err(|e| {
            RubricError::invalid(format!("criterion '{}' has a bad pattern: {e}", c.label))
        })?;
        let haystack = match c.scope {
            MatchScope::Sanitized => sanitized.as_str(),
            MatchScope::Raw => code,
        };
        let passed = re.is_match(haystack);
        let points_awarded = if passed { c.points_total } else { 0 };
        score += points_awarded;
        max += c.points_total;
        details.push(CriterionResult {
            label: c.label.clone(),
            passed,
            points_awarded,
            points_total: c.points_total,
            feedback: if passed { None } else { c.feedback.clone() },
        });
    }

    Ok(GradeReport {
        score,
        max,
        details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_SAMPLE: &str = r#"#include <stdio.h>
int main() {
    int x = 5;
    if (x > 3) {
        for (int i = 0; i < x; i++) {
            printf("%d\n", i);
        }
    }
    return 0;
}
"#;

    #[test]
    fn full_sample_yields_five_criteria_worth_100() {
        let r = generate_rubric(FULL_SAMPLE);
        assert_eq!(r.criteria.len(), 5);
        assert_eq!(r.total(), 100);
        assert!(r.criteria.iter().all(|c| c.points_awarded == 0));
        let labels: Vec<&str> = r.criteria.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "Declaración de variables",
                "Estructura condicional",
                "Estructura repetitiva",
                "Entrada/salida estándar",
                "Fin de sentencias",
            ]
        );
    }

    #[test]
    fn grading_the_sample_scores_the_full_total() {
        let r = generate_rubric(FULL_SAMPLE);
        let report = grade(&r, FULL_SAMPLE).expect("grade");
        assert_eq!(report.score, r.total());
        assert_eq!(report.max, 100);
        assert!(report.all_passed());
        assert!(report.details.iter().all(|d| d.feedback.is_none()));
    }

    #[test]
    fn only_printf_scores_twenty() {
        let r = generate_rubric(FULL_SAMPLE);
        let report = grade(&r, r#"printf("hola")"#).expect("grade");
        assert_eq!(report.score, 20);
        assert_eq!(report.max, 100);
        let passed: Vec<&str> = report
            .details
            .iter()
            .filter(|d| d.passed)
            .map(|d| d.label.as_str())
            .collect();
        assert_eq!(passed, vec!["Entrada/salida estándar"]);
        assert!(report
            .details
            .iter()
            .filter(|d| !d.passed)
            .all(|d| d.feedback.is_some()));
    }

    #[test]
    fn partial_sample_yields_twenty_per_category() {
        let r = generate_rubric("while (1) puts(\"x\");");
        assert_eq!(r.criteria.len(), 3);
        assert_eq!(r.total(), 60);
    }

    #[test]
    fn unmatched_sample_falls_back_to_single_base_criterion() {
        let r = generate_rubric("return 0");
        assert_eq!(r.criteria.len(), 1);
        assert!(r.is_fallback());
        assert_eq!(r.total(), FALLBACK_POINTS);
        assert_eq!(grade(&r, "x").expect("grade").score, 100);
        assert_eq!(grade(&r, "   \n ").expect("grade").score, 0);
    }

    #[test]
    fn comment_only_sample_still_scores_when_submitted_verbatim() {
        let sample = "// if for printf;";
        let r = generate_rubric(sample);
        assert!(r.is_fallback());
        assert_eq!(grade(&r, sample).expect("grade").score, 100);
    }

    #[test]
    fn keywords_inside_comments_do_not_count() {
        let r = generate_rubric(FULL_SAMPLE);
        let report = grade(&r, "/* if for while */ printf(\"if\");").expect("grade");
        assert_eq!(report.score, 40);
    }

    #[test]
    fn stored_rubric_roundtrips_and_bad_patterns_are_errors() {
        let r = generate_rubric(FULL_SAMPLE);
        let back = Rubric::from_json(&r.to_json()).expect("decode");
        assert_eq!(back, r);

        let bad = Rubric {
            criteria: vec![Criterion {
                label: "roto".into(),
                points_total: 100,
                points_awarded: 0,
                pattern: "(".into(),
                feedback: None,
                scope: MatchScope::Sanitized,
            }],
        };
        let e = grade(&bad, "int x;").expect_err("bad pattern");
        assert_eq!(e.code, "rubric_invalid");
    }
}
