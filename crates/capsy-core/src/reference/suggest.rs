//! Autocomplete ranking over the medication reference set.

use strsim::{jaro_winkler, normalized_levenshtein};

use super::MedicationEntry;

/// Maximum suggestions returned for one term.
pub const SUGGESTION_LIMIT: usize = 5;

/// Result of filtering the reference set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suggestions {
    /// The reference set is still being fetched; render a placeholder row.
    Loading,
    /// Ranked matches, at most [`SUGGESTION_LIMIT`].
    Ready(Vec<MedicationEntry>),
}

/// Case-insensitive substring filter over both language fields, ranked by
/// fuzzy similarity to the term.
pub(super) fn rank_matches(entries: &[MedicationEntry], term: &str) -> Vec<MedicationEntry> {
    let needle = term.to_lowercase();

    let mut scored: Vec<(f64, &MedicationEntry)> = entries
        .iter()
        .filter(|entry| {
            entry.name.to_lowercase().contains(&needle)
                || entry.name_es.to_lowercase().contains(&needle)
        })
        .map(|entry| {
            let score = fuzzy_match(&needle, &entry.name.to_lowercase())
                .max(fuzzy_match(&needle, &entry.name_es.to_lowercase()));
            (score, entry)
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    scored
        .into_iter()
        .take(SUGGESTION_LIMIT)
        .map(|(_, entry)| entry.clone())
        .collect()
}

/// Compute fuzzy string similarity using combined metrics.
fn fuzzy_match(a: &str, b: &str) -> f64 {
    // Jaro-Winkler favors shared prefixes (how people type medication
    // names); Levenshtein keeps overall closeness in the mix.
    let jw = jaro_winkler(a, b);
    let lev = normalized_levenshtein(a, b);
    jw * 0.6 + lev * 0.4
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> Vec<MedicationEntry> {
        vec![
            MedicationEntry::new("Paracetamol", "Paracetamol"),
            MedicationEntry::new("Ibuprofen", "Ibuprofeno"),
            MedicationEntry::new("Loratadine", "Loratadina"),
            MedicationEntry::new("Omeprazole", "Omeprazol"),
            MedicationEntry::new("Metformin", "Metformina"),
            MedicationEntry::new("Metoprolol", "Metoprolol"),
            MedicationEntry::new("Methotrexate", "Metotrexato"),
        ]
    }

    #[test]
    fn test_substring_match_either_field() {
        let matches = rank_matches(&entries(), "ibupro");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "Ibuprofen");

        // Spanish-only spelling still matches
        let matches = rank_matches(&entries(), "omeprazol");
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn test_limit_is_five() {
        let many: Vec<MedicationEntry> = (0..20)
            .map(|i| MedicationEntry::new(format!("Vitamina B{i}"), format!("Vitamina B{i}")))
            .collect();
        let matches = rank_matches(&many, "vitamina");
        assert_eq!(matches.len(), SUGGESTION_LIMIT);
    }

    #[test]
    fn test_closest_match_ranks_first() {
        let matches = rank_matches(&entries(), "meto");
        assert!(matches.len() >= 2);
        assert_eq!(matches[0].name, "Metoprolol");
    }

    #[test]
    fn test_case_insensitive() {
        let matches = rank_matches(&entries(), "PARACE");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "Paracetamol");
    }

    #[test]
    fn test_fuzzy_match_ordering() {
        assert!(fuzzy_match("paracetamol", "paracetamol") > 0.99);
        assert!(
            fuzzy_match("meto", "metoprolol") > fuzzy_match("meto", "methotrexate"),
            "prefix-closer name should score higher"
        );
    }
}
