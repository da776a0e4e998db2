/// One model identifier in the ordered fallback list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackCandidate {
    pub model: String,
}

/// Resolve the ordered candidate list: primary first, then each fallback,
/// with duplicates and blanks dropped.
pub fn resolve_candidates(primary: &str, fallbacks: &[String]) -> Vec<FallbackCandidate> {
    let mut out: Vec<FallbackCandidate> = Vec::with_capacity(1 + fallbacks.len());
    for model in std::iter::once(primary).chain(fallbacks.iter().map(String::as_str)) {
        let model = model.trim();
        if model.is_empty() {
            continue;
        }
        if out.iter().any(|c| c.model == model) {
            continue;
        }
        out.push(FallbackCandidate {
            model: model.to_string(),
        });
    }
    out
}
