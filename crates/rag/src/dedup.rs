pub const DEFAULT_DUPLICATE_THRESHOLD: f64 = 0.9;

/// Normalized edit-distance similarity in `[0, 1]`. Case and runs of
/// whitespace are ignored.
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&canonical(a), &canonical(b))
}

fn canonical(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone)]
pub struct DuplicateGuard {
    threshold: f64,
    accepted: Vec<String>,
}

impl DuplicateGuard {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            accepted: Vec::new(),
        }
    }

    pub fn is_duplicate(&self, text: &str) -> bool {
        self.accepted
            .iter()
            .any(|seen| similarity(seen, text) > self.threshold)
    }

    pub fn admit(&mut self, text: &str) -> bool {
        if self.is_duplicate(text) {
            return false;
        }
        self.accepted.push(text.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }
}

impl Default for DuplicateGuard {
    fn default() -> Self {
        Self::new(DEFAULT_DUPLICATE_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_and_near_identical_texts_are_duplicates() {
        let mut guard = DuplicateGuard::default();
        assert!(guard.admit("Explain Kirchhoff's current law with an example."));
        assert!(!guard.admit("Explain Kirchhoff's current law with an example."));
        assert!(!guard.admit("explain  kirchhoff's current law with an example"));
        assert!(guard.admit("Derive the Thevenin equivalent of the circuit."));
        assert_eq!(guard.len(), 2);
    }

    #[test]
    fn similarity_bounds() {
        assert!((similarity("abc", "abc") - 1.0).abs() < 1e-12);
        assert!(similarity("abc", "xyz") < 0.1);
        assert!((similarity("", "") - 1.0).abs() < 1e-12);
    }
}
