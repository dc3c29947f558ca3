/// Inputs to the per-record quality heuristic.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityInputs {
    pub amount_parsed: bool,
    pub date_parsed: bool,
    pub has_description: bool,
    pub has_person: bool,
    pub has_location: bool,
    pub has_category: bool,
}

pub fn data_quality_score(r: &QualityInputs) -> i64 {
    let mut score: i64 = 100;
    if !r.amount_parsed {
        score -= 30;
    }
    if !r.date_parsed {
        score -= 30;
    }
    if !r.has_description {
        score -= 10;
    }
    if !r.has_person {
        score -= 20;
    }
    if !r.has_location {
        score -= 5;
    }
    if !r.has_category {
        score -= 5;
    }
    score.max(0)
}

pub fn quality_band(score: i64) -> &'static str {
    if score >= 90 {
        "high"
    } else if score >= 70 {
        "good"
    } else {
        "poor"
    }
}
