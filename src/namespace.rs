/// Reserved prefix for all generated identifiers.
pub const TEST_PREFIX: &str = "loadtest_";

/// Root collection holding one record per team.
pub const ROOT_COLLECTION: &str = "teams";

/// Human-readable team name for launch `index` (0-based) within run `run_tag`.
pub fn team_name(index: usize, run_tag: &str) -> String {
    format!("Team {:03} {}", index + 1, run_tag)
}

/// Lower-cases `name`, replaces every non-alphanumeric char with `_`,
/// and prepends the reserved prefix.
pub fn team_id(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{TEST_PREFIX}{sanitized}")
}

/// Deterministic participant id: same (team, participant) pair, same id.
pub fn participant_id(team_index: usize, participant_index: usize) -> String {
    format!("{TEST_PREFIX}t{team_index}_p{participant_index}")
}

/// `teams/<team_id>`
pub fn team_path(team_id: &str) -> String {
    format!("{ROOT_COLLECTION}/{team_id}")
}

pub fn is_generated(key: &str) -> bool {
    key.starts_with(TEST_PREFIX)
}
